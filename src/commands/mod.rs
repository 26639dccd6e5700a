// Command handlers module
pub mod config;
pub mod run;
pub mod settings;
pub mod status;

// Re-export command handlers for easy access
pub use config::handle_config_action;
pub use run::{RunMode, Runtime, handle_run_command};
pub use settings::handle_settings_action;
pub use status::handle_status_command;
