use std::path::Path;

use crate::cli::ConfigAction;
use crate::config::Config;

fn fail(json_output: bool, message: &str, e: &anyhow::Error) -> ! {
    if json_output {
        let body = serde_json::json!({ "status": "error", "message": format!("{}: {:#}", message, e) });
        println!("{}", body);
    } else {
        eprintln!("Error: {}: {:#}", message, e);
    }
    std::process::exit(1);
}

fn succeed(json_output: bool, message: String) {
    if json_output {
        println!("{}", serde_json::json!({ "status": "success", "message": message }));
    } else {
        println!("{}", message);
    }
}

pub fn handle_config_action(action: ConfigAction, config_path: &Path, json_output: bool) {
    match action {
        ConfigAction::Init => match Config::default().save_to(config_path) {
            Ok(()) => succeed(json_output, format!("Configuration initialized at: {}", config_path.display())),
            Err(e) => fail(json_output, "Failed to initialize config", &e),
        },
        ConfigAction::Show => match Config::load_from(config_path) {
            Ok(config) => {
                if json_output {
                    match serde_json::to_string_pretty(&config) {
                        Ok(json) => println!("{}", json),
                        Err(e) => fail(json_output, "Failed to serialize config to JSON", &e.into()),
                    }
                } else {
                    match toml::to_string_pretty(&config) {
                        Ok(toml_str) => {
                            println!("Configuration ({})", config_path.display());
                            println!("{}", toml_str);
                        }
                        Err(e) => fail(json_output, "Failed to serialize config", &e.into()),
                    }
                }
            }
            Err(e) => fail(json_output, "Failed to load config", &e),
        },
        ConfigAction::Set { key, value } => {
            let mut config = match Config::load_from(config_path) {
                Ok(config) => config,
                Err(e) => fail(json_output, "Failed to load config", &e),
            };
            if let Err(e) = config.set_value(&key, &value) {
                fail(json_output, "Invalid configuration", &e);
            }
            match config.save_to(config_path) {
                Ok(()) => succeed(json_output, format!("Configuration updated: {} = {}", key, value)),
                Err(e) => fail(json_output, "Failed to save config", &e),
            }
        }
    }
}
