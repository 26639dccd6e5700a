use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::EnvironmentConfig;
use crate::scheduler::registry::TaskRegistry;
use crate::storage::kv::{CORE, ConfigStore, keys};

pub const DISK_USAGE_TASK: &str = "disk-usage";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvironmentStatus {
    pub exec_capable: bool,
    pub du_available: bool,
    pub du_path: Option<PathBuf>,
    /// `nice` and `ionice` both found.
    pub priority_tools: bool,
}

/// Host facilities the probe inspects.
pub trait ProbeHost {
    /// Whether a trivial child process can be started.
    fn can_spawn(&self) -> bool;
    fn which(&self, program: &str) -> Option<PathBuf>;
    fn is_executable(&self, path: &Path) -> bool;
    fn is_posix(&self) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

impl ProbeHost for SystemHost {
    fn can_spawn(&self) -> bool {
        let mut cmd = if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", "exit 0"]);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", "exit 0"]);
            cmd
        };

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn which(&self, program: &str) -> Option<PathBuf> {
        let output = Command::new("which")
            .arg(program)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .ok()?;

        if !output.status.success() {
            return None;
        }

        let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if path.is_empty() { None } else { Some(PathBuf::from(path)) }
    }

    #[cfg(unix)]
    fn is_executable(&self, path: &Path) -> bool {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    fn is_executable(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_posix(&self) -> bool {
        cfg!(unix)
    }
}

/// Detect command execution and a usable `du`.
///
/// On POSIX hosts `du` is located with `which`; elsewhere the previously
/// configured path is only validated.
pub fn probe(host: &dyn ProbeHost, allow_exec: bool, configured_du: Option<&str>) -> EnvironmentStatus {
    let exec_capable = allow_exec && host.can_spawn();
    if !exec_capable {
        return EnvironmentStatus {
            exec_capable: false,
            du_available: false,
            du_path: None,
            priority_tools: false,
        };
    }

    let candidate = if host.is_posix() {
        host.which("du")
    } else {
        configured_du
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    };
    let du_path = candidate.filter(|path| host.is_executable(path));

    let priority_tools = priority_tools_available(host);

    EnvironmentStatus {
        exec_capable,
        du_available: du_path.is_some(),
        du_path,
        priority_tools,
    }
}

/// `nice` and `ionice` are both on the path of a POSIX host.
fn priority_tools_available(host: &dyn ProbeHost) -> bool {
    host.is_posix() && host.which("nice").is_some() && host.which("ionice").is_some()
}

/// Store the probe result; the `pathtodu` setting is written only when it changed.
pub fn persist<S: ConfigStore + ?Sized>(store: &S, status: &EnvironmentStatus, now: DateTime<Utc>) -> Result<()> {
    if let Some(path) = &status.du_path {
        let path = path.to_string_lossy();
        let current = store.get_in(CORE, keys::PATH_TO_DU)?;
        if current.as_deref().map(str::trim) != Some(path.as_ref()) {
            info!(path = %path, "recording du path");
            store.set_in(CORE, keys::PATH_TO_DU, &path)
                .context("Failed to record du path")?;
        }
    }

    store.set_bool(keys::SHELL_EXEC_AVAILABLE, status.exec_capable)?;
    store.set_bool(keys::DU_COMMAND_AVAILABLE, status.du_available)?;
    store.set_bool(keys::PRIORITY_TOOLS_AVAILABLE, status.priority_tools)?;
    store.set_i64(keys::LAST_ENVIRONMENT_CHECK, now.timestamp())?;
    Ok(())
}

/// Point the disk-usage task at the fast or slow hour. Returns whether a
/// write happened.
pub fn apply_schedule_feedback<R: TaskRegistry + ?Sized>(
    registry: &R,
    status: &EnvironmentStatus,
    config: &EnvironmentConfig,
) -> Result<bool> {
    let task = match registry.get_task(DISK_USAGE_TASK)? {
        Some(task) => task,
        None => {
            debug!("disk-usage task not registered, skipping schedule feedback");
            return Ok(false);
        }
    };

    let hour = if status.du_available { &config.fast_hour } else { &config.slow_hour };
    if task.schedule.hour == *hour {
        return Ok(false);
    }

    let updated = task.schedule.with_hour(hour);
    info!(from = %task.schedule, to = %updated, "adjusting disk-usage schedule");
    registry.set_task_schedule(DISK_USAGE_TASK, &updated)
}

/// `du` recorded by the last probe, if it is still executable.
pub fn recorded_du_path<S: ConfigStore + ?Sized>(store: &S, host: &dyn ProbeHost) -> Result<Option<PathBuf>> {
    if store.get_bool(keys::DU_COMMAND_AVAILABLE)? != Some(true) {
        return Ok(None);
    }

    let path = store.get_in(CORE, keys::PATH_TO_DU)?
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .map(PathBuf::from);

    Ok(path.filter(|p| host.is_executable(p)))
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;

    /// Scripted host for probe tests.
    #[derive(Debug, Clone)]
    pub struct FakeHost {
        pub spawn: bool,
        pub posix: bool,
        pub found: Vec<(&'static str, &'static str)>,
        pub executable: Vec<&'static str>,
    }

    impl FakeHost {
        pub fn with_du() -> Self {
            Self {
                spawn: true,
                posix: true,
                found: vec![("du", "/usr/bin/du"), ("nice", "/usr/bin/nice"), ("ionice", "/usr/bin/ionice")],
                executable: vec!["/usr/bin/du"],
            }
        }

        pub fn without_du() -> Self {
            Self { found: Vec::new(), executable: Vec::new(), ..Self::with_du() }
        }
    }

    impl ProbeHost for FakeHost {
        fn can_spawn(&self) -> bool {
            self.spawn
        }

        fn which(&self, program: &str) -> Option<PathBuf> {
            self.found.iter().find(|(name, _)| *name == program).map(|(_, path)| PathBuf::from(path))
        }

        fn is_executable(&self, path: &Path) -> bool {
            self.executable.iter().any(|p| Path::new(p) == path)
        }

        fn is_posix(&self) -> bool {
            self.posix
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::FakeHost;
    use super::*;
    use crate::storage::{Database, MemoryStore};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 3, 0, 0).unwrap()
    }

    #[test]
    fn test_probe_finds_du() {
        let status = probe(&FakeHost::with_du(), true, None);
        assert!(status.exec_capable);
        assert!(status.du_available);
        assert_eq!(status.du_path, Some(PathBuf::from("/usr/bin/du")));
        assert!(status.priority_tools);
    }

    #[test]
    fn test_exec_disallowed_by_config() {
        let status = probe(&FakeHost::with_du(), false, None);
        assert!(!status.exec_capable);
        assert!(!status.du_available);
    }

    #[test]
    fn test_spawn_failure_means_no_exec() {
        let host = FakeHost { spawn: false, ..FakeHost::with_du() };
        assert!(!probe(&host, true, None).exec_capable);
    }

    #[test]
    fn test_non_posix_validates_configured_path() {
        let host = FakeHost { posix: false, ..FakeHost::with_du() };

        let status = probe(&host, true, Some("/usr/bin/du"));
        assert!(status.du_available);
        assert!(!status.priority_tools);

        let status = probe(&host, true, Some("/opt/missing/du"));
        assert!(!status.du_available);

        assert!(!probe(&host, true, None).du_available);
    }

    #[test]
    fn test_persist_writes_flags_and_path() {
        let store = MemoryStore::new();
        let status = probe(&FakeHost::with_du(), true, None);

        persist(&store, &status, now()).unwrap();

        assert_eq!(store.get_in(CORE, keys::PATH_TO_DU).unwrap().as_deref(), Some("/usr/bin/du"));
        assert_eq!(store.get_bool(keys::SHELL_EXEC_AVAILABLE).unwrap(), Some(true));
        assert_eq!(store.get_bool(keys::DU_COMMAND_AVAILABLE).unwrap(), Some(true));
        assert_eq!(store.get_bool(keys::PRIORITY_TOOLS_AVAILABLE).unwrap(), Some(true));
        assert_eq!(store.get_i64(keys::LAST_ENVIRONMENT_CHECK).unwrap(), now().timestamp());

        assert_eq!(recorded_du_path(&store, &FakeHost::with_du()).unwrap(), Some(PathBuf::from("/usr/bin/du")));
        assert_eq!(recorded_du_path(&store, &FakeHost::without_du()).unwrap(), None);
    }

    #[test]
    fn test_persist_without_du_keeps_existing_path() {
        let store = MemoryStore::new();
        store.set_in(CORE, keys::PATH_TO_DU, "/usr/local/bin/du").unwrap();

        persist(&store, &probe(&FakeHost::without_du(), true, None), now()).unwrap();

        assert_eq!(store.get_in(CORE, keys::PATH_TO_DU).unwrap().as_deref(), Some("/usr/local/bin/du"));
        assert_eq!(store.get_bool(keys::DU_COMMAND_AVAILABLE).unwrap(), Some(false));
        assert_eq!(store.get_bool(keys::PRIORITY_TOOLS_AVAILABLE).unwrap(), Some(false));
    }

    #[test]
    fn test_schedule_feedback_fast_then_slow() {
        let db = Database::open_in_memory().unwrap();
        let config = EnvironmentConfig::default();

        let with_du = probe(&FakeHost::with_du(), true, None);
        assert!(apply_schedule_feedback(&db, &with_du, &config).unwrap());
        assert_eq!(db.get_task(DISK_USAGE_TASK).unwrap().unwrap().schedule.hour, "*/6");

        // Unchanged environment: no write
        assert!(!apply_schedule_feedback(&db, &with_du, &config).unwrap());

        let without_du = probe(&FakeHost::without_du(), true, None);
        assert!(apply_schedule_feedback(&db, &without_du, &config).unwrap());
        let task = db.get_task(DISK_USAGE_TASK).unwrap().unwrap();
        assert_eq!(task.schedule.hour, "12");
        assert_eq!(task.schedule.minute, "0");
    }
}
