use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use globset::{Glob, GlobMatcher};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Strategy for measuring the bytes under a directory tree.
pub trait DirectorySizer {
    /// Total size of regular files under `path`; 0 when `path` does not exist.
    /// `exclude` is a glob matched against file names.
    fn size(&self, path: &Path, exclude: Option<&str>) -> Result<u64>;

    fn name(&self) -> &'static str;
}

/// Compile an exclude glob (`*`, `?`, `[...]` classes) for file-name matching.
pub fn exclude_matcher(pattern: &str) -> Result<GlobMatcher> {
    let glob = Glob::new(pattern).with_context(|| format!("Invalid exclude pattern '{}'", pattern))?;
    Ok(glob.compile_matcher())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RecursiveWalk;

impl DirectorySizer for RecursiveWalk {
    fn size(&self, path: &Path, exclude: Option<&str>) -> Result<u64> {
        if !path.exists() {
            debug!(path = %path.display(), "directory missing, size 0");
            return Ok(0);
        }

        let exclude = exclude
            .filter(|p| !p.is_empty())
            .map(exclude_matcher)
            .transpose()?;

        let mut total: u64 = 0;
        let mut skipped = 0usize;

        for entry in WalkDir::new(path).follow_links(true) {
            // Loops and unreadable entries are skipped, not fatal
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    skipped += 1;
                    debug!(error = %err, "skipping entry");
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            if let Some(matcher) = &exclude {
                if matcher.is_match(entry.file_name()) {
                    continue;
                }
            }

            match entry.metadata() {
                Ok(meta) => total = total.saturating_add(meta.len()),
                Err(err) => {
                    skipped += 1;
                    debug!(path = %entry.path().display(), error = %err, "skipping unreadable file");
                }
            }
        }

        if skipped > 0 {
            debug!(path = %path.display(), skipped, "walk skipped entries");
        }

        Ok(total)
    }

    fn name(&self) -> &'static str {
        "walk"
    }
}

/// Shells out to `du -Lsk`, falling back to a walk on any failure.
#[derive(Debug, Clone)]
pub struct NativeDu {
    du_path: PathBuf,
    low_priority: bool,
    timeout: Duration,
    fallback: RecursiveWalk,
}

impl NativeDu {
    pub fn new(du_path: impl Into<PathBuf>, low_priority: bool, timeout: Duration) -> Self {
        Self {
            du_path: du_path.into(),
            low_priority,
            timeout,
            fallback: RecursiveWalk,
        }
    }

    fn command(&self, path: &Path, exclude: Option<&str>) -> Command {
        let mut cmd = if self.low_priority {
            let mut cmd = Command::new("nice");
            cmd.args(["-n", "19", "ionice", "-c3"]).arg(&self.du_path);
            cmd
        } else {
            Command::new(&self.du_path)
        };

        cmd.arg("-Lsk").arg(path);
        if let Some(pattern) = exclude.filter(|p| !p.is_empty()) {
            cmd.arg(format!("--exclude={}", pattern));
        }
        cmd
    }

    fn run_du(&self, path: &Path, exclude: Option<&str>) -> Result<u64> {
        let mut child = self.command(path, exclude)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.du_path.display()))?;

        let start = Instant::now();
        loop {
            match child.try_wait().context("Failed to poll du")? {
                Some(status) => {
                    let mut out = String::new();
                    if let Some(mut stdout) = child.stdout.take() {
                        stdout.read_to_string(&mut out).context("Failed to read du output")?;
                    }
                    // du may exit non-zero on a partially unreadable tree yet still print a total
                    if let Some(kib) = parse_du_output(&out) {
                        return Ok(kib.saturating_mul(1024));
                    }
                    bail!("du exited with {} and no usable output", status);
                }
                None => {
                    if start.elapsed() >= self.timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(anyhow!("du timed out after {:?}", self.timeout));
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
            }
        }
    }
}

/// Leading integer of the first line of `du -s` output.
pub fn parse_du_output(output: &str) -> Option<u64> {
    output
        .lines()
        .next()?
        .split_whitespace()
        .next()?
        .parse::<u64>()
        .ok()
}

impl DirectorySizer for NativeDu {
    fn size(&self, path: &Path, exclude: Option<&str>) -> Result<u64> {
        if !path.exists() {
            return Ok(0);
        }

        match self.run_du(path, exclude) {
            Ok(bytes) => Ok(bytes),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "du failed, falling back to directory walk");
                self.fallback.size(path, exclude)
            }
        }
    }

    fn name(&self) -> &'static str {
        "du"
    }
}

/// Native `du` when the probe found one, the walk otherwise.
pub fn select_sizer(du_path: Option<&Path>, low_priority: bool, timeout: Duration) -> Box<dyn DirectorySizer> {
    match du_path {
        Some(path) => Box::new(NativeDu::new(path, low_priority, timeout)),
        None => Box::new(RecursiveWalk),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, bytes: usize) {
        fs::write(dir.join(name), vec![b'x'; bytes]).unwrap();
    }

    #[test]
    fn test_exclude_matcher() {
        let matcher = exclude_matcher("*.log").unwrap();
        assert!(matcher.is_match("error.log"));
        assert!(!matcher.is_match("error.log.gz"));

        let matcher = exclude_matcher("cache?.bin").unwrap();
        assert!(matcher.is_match("cache1.bin"));
        assert!(!matcher.is_match("cache10.bin"));

        // Regex metacharacters are literal
        let matcher = exclude_matcher("a+b.txt").unwrap();
        assert!(matcher.is_match("a+b.txt"));
        assert!(!matcher.is_match("aab.txt"));

        let matcher = exclude_matcher("*.[ch]").unwrap();
        assert!(matcher.is_match("a.c"));
        assert!(matcher.is_match("b.h"));
        assert!(!matcher.is_match("x.[ch]"));
        assert!(!matcher.is_match("keep.txt"));

        assert!(exclude_matcher("[unclosed").is_err());
    }

    #[test]
    fn test_walk_sums_nested_files() {
        let temp = TempDir::new().unwrap();
        write_file(temp.path(), "a.bin", 1000);
        fs::create_dir(temp.path().join("nested")).unwrap();
        write_file(&temp.path().join("nested"), "b.bin", 2500);

        assert_eq!(RecursiveWalk.size(temp.path(), None).unwrap(), 3500);
    }

    #[test]
    fn test_walk_exclude_matches_file_names() {
        let temp = TempDir::new().unwrap();
        write_file(temp.path(), "keep.dat", 100);
        write_file(temp.path(), "trace.log", 900);

        assert_eq!(RecursiveWalk.size(temp.path(), Some("*.log")).unwrap(), 100);
        assert_eq!(RecursiveWalk.size(temp.path(), Some("")).unwrap(), 1000);
    }

    #[test]
    fn test_walk_exclude_honours_character_classes() {
        let temp = TempDir::new().unwrap();
        write_file(temp.path(), "a.c", 100);
        write_file(temp.path(), "b.h", 200);
        write_file(temp.path(), "keep.txt", 4096);

        assert_eq!(RecursiveWalk.size(temp.path(), Some("*.[ch]")).unwrap(), 4096);
    }

    #[test]
    fn test_missing_root_is_zero() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("does-not-exist");

        assert_eq!(RecursiveWalk.size(&missing, None).unwrap(), 0);
        let du = NativeDu::new("/nonexistent/du", false, Duration::from_secs(1));
        assert_eq!(du.size(&missing, None).unwrap(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_walk_skips_symlink_cycle() {
        let temp = TempDir::new().unwrap();
        let inner = temp.path().join("inner");
        fs::create_dir(&inner).unwrap();
        write_file(&inner, "data.bin", 512);
        std::os::unix::fs::symlink(temp.path(), inner.join("loop")).unwrap();

        assert_eq!(RecursiveWalk.size(temp.path(), None).unwrap(), 512);
    }

    #[test]
    fn test_broken_du_falls_back_to_walk() {
        let temp = TempDir::new().unwrap();
        write_file(temp.path(), "a.bin", 4096);

        let du = NativeDu::new("/nonexistent/du", false, Duration::from_secs(1));
        assert_eq!(du.size(temp.path(), None).unwrap(), 4096);
    }

    #[cfg(unix)]
    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_du_output_is_scaled_to_bytes() {
        let bin = TempDir::new().unwrap();
        let script = write_script(bin.path(), "du", "printf '7\\t/x\\n'");
        let data = TempDir::new().unwrap();
        write_file(data.path(), "a.bin", 100);

        let du = NativeDu::new(script, false, Duration::from_secs(5));
        assert_eq!(du.size(data.path(), None).unwrap(), 7 * 1024);
    }

    #[cfg(unix)]
    #[test]
    fn test_hung_du_is_killed_and_walk_used() {
        let bin = TempDir::new().unwrap();
        let script = write_script(bin.path(), "du", "exec sleep 5");
        let data = TempDir::new().unwrap();
        write_file(data.path(), "a.bin", 1500);

        let du = NativeDu::new(script, false, Duration::from_millis(100));
        let start = Instant::now();
        assert_eq!(du.size(data.path(), None).unwrap(), 1500);
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[test]
    fn test_du_without_total_falls_back() {
        let bin = TempDir::new().unwrap();
        let script = write_script(bin.path(), "du", "echo 'du: cannot read' >&2; exit 1");
        let data = TempDir::new().unwrap();
        write_file(data.path(), "a.bin", 300);

        let du = NativeDu::new(script, false, Duration::from_secs(5));
        assert_eq!(du.size(data.path(), None).unwrap(), 300);
    }

    #[test]
    fn test_du_command_line() {
        let du = NativeDu::new("/usr/bin/du", true, Duration::from_secs(1));
        let cmd = du.command(Path::new("/srv/data"), Some("*.[ch]"));
        let args: Vec<String> = cmd.get_args().map(|a| a.to_string_lossy().to_string()).collect();
        assert_eq!(cmd.get_program(), "nice");
        assert_eq!(args, ["-n", "19", "ionice", "-c3", "/usr/bin/du", "-Lsk", "/srv/data", "--exclude=*.[ch]"]);

        let du = NativeDu::new("/usr/bin/du", false, Duration::from_secs(1));
        let cmd = du.command(Path::new("/srv/data"), Some(""));
        let args: Vec<String> = cmd.get_args().map(|a| a.to_string_lossy().to_string()).collect();
        assert_eq!(cmd.get_program(), "/usr/bin/du");
        assert_eq!(args, ["-Lsk", "/srv/data"]);
    }

    #[test]
    fn test_parse_du_output() {
        assert_eq!(parse_du_output("1234\t/var/data\n"), Some(1234));
        assert_eq!(parse_du_output(""), None);
        assert_eq!(parse_du_output("du: cannot access"), None);
    }

    #[test]
    fn test_select_sizer() {
        assert_eq!(select_sizer(None, false, Duration::from_secs(1)).name(), "walk");
        assert_eq!(select_sizer(Some(Path::new("/usr/bin/du")), true, Duration::from_secs(1)).name(), "du");
    }
}
