//! Warp terminal discovery and process control.
//!
//! The executable is resolved in this order:
//!
//! 1. an explicit override, if the file exists
//! 2. the `WARP_PATH` environment variable, if the file exists
//! 3. the platform install location
//!
//! Process control shells out to the platform tools (`tasklist`/`taskkill`
//! on Windows, `pgrep -x`/`kill` elsewhere). Processes are matched by the
//! exact name of the resolved executable, and the gateway's own process is
//! never reported or signalled.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::error::WarpError;

/// Environment variable naming the Warp executable.
pub const WARP_PATH_ENV: &str = "WARP_PATH";

/// Delay between kill and launch on restart.
pub const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Locates and controls the Warp terminal.
#[derive(Debug, Clone, Default)]
pub struct WarpLocator {
    override_path: Option<PathBuf>,
}

impl WarpLocator {
    /// Creates a locator using only the environment and platform default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an explicit executable path. Ignored at resolve time if it does not exist.
    pub fn with_override(mut self, path: impl Into<PathBuf>) -> Self {
        self.override_path = Some(path.into());
        self
    }

    pub fn override_path(&self) -> Option<&Path> {
        self.override_path.as_deref()
    }

    /// Returns the executable path that would be used.
    pub fn resolve(&self) -> PathBuf {
        let env_path = std::env::var_os(WARP_PATH_ENV).map(PathBuf::from);
        self.resolve_with(env_path, home_dir())
    }

    fn resolve_with(&self, env_path: Option<PathBuf>, home: Option<PathBuf>) -> PathBuf {
        if let Some(path) = self.override_path.as_ref().filter(|p| p.exists()) {
            return path.clone();
        }
        if let Some(path) = env_path.filter(|p| !p.as_os_str().is_empty() && p.exists()) {
            return path;
        }
        default_path(home)
    }

    /// Returns true if the resolved executable exists.
    pub fn is_installed(&self) -> bool {
        self.resolve().exists()
    }

    /// Starts Warp detached and returns the path it was started from.
    pub fn launch(&self) -> Result<PathBuf, WarpError> {
        let path = self.resolve();
        if !path.exists() {
            tracing::error!("Warp is not installed at {}", path.display());
            return Err(WarpError::NotInstalled(path));
        }

        Command::new(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        tracing::info!("Warp started: {}", path.display());
        Ok(path)
    }

    /// Name the running Warp process is matched by.
    ///
    /// The file name of the resolved executable, cut to the 15 bytes Linux
    /// keeps of a process name.
    pub fn process_name(&self) -> String {
        let path = self.resolve();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| default_process_name().to_string());
        truncate_comm(name)
    }

    /// Returns the IDs of running Warp processes, excluding this process.
    pub fn running_pids(&self) -> Vec<u32> {
        let name = self.process_name();
        let output = if cfg!(windows) {
            Command::new("tasklist")
                .args(["/FO", "CSV", "/NH", "/FI"])
                .arg(format!("IMAGENAME eq {name}"))
                .stderr(Stdio::null())
                .output()
        } else {
            Command::new("pgrep")
                .args(["-x", name.as_str()])
                .stderr(Stdio::null())
                .output()
        };

        match output {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let pids = if cfg!(windows) {
                    parse_tasklist(&stdout)
                } else {
                    parse_pgrep(&stdout)
                };
                pids.into_iter()
                    .filter(|pid| *pid != std::process::id())
                    .collect()
            }
            Err(e) => {
                tracing::error!("Failed to list Warp processes: {}", e);
                Vec::new()
            }
        }
    }

    /// Returns true if a Warp process is running.
    pub fn is_running(&self) -> bool {
        !self.running_pids().is_empty()
    }

    /// Terminates running Warp processes. Succeeds even if none were running.
    pub fn kill(&self) -> Result<(), WarpError> {
        let pids = self.running_pids();
        if pids.is_empty() {
            tracing::info!("No Warp process running");
            return Ok(());
        }

        let mut command = if cfg!(windows) {
            let mut command = Command::new("taskkill");
            command.arg("/F");
            for pid in &pids {
                command.args(["/PID", &pid.to_string()]);
            }
            command
        } else {
            let mut command = Command::new("kill");
            command.arg("-TERM").args(pids.iter().map(u32::to_string));
            command
        };
        command.stdout(Stdio::null()).stderr(Stdio::null()).status()?;

        tracing::info!("Warp processes terminated: {:?}", pids);
        Ok(())
    }

    /// Kills Warp, waits briefly, then launches it again.
    pub fn restart(&self) -> Result<PathBuf, WarpError> {
        tracing::info!("Restarting Warp...");
        self.kill()?;
        std::thread::sleep(RESTART_DELAY);
        self.launch()
    }
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}

/// Platform install location of the Warp executable.
fn default_path(home: Option<PathBuf>) -> PathBuf {
    if cfg!(target_os = "macos") {
        return PathBuf::from("/Applications/Warp.app/Contents/MacOS/Warp");
    }

    let home = home.unwrap_or_default();
    if cfg!(windows) {
        home.join("AppData")
            .join("Local")
            .join("Programs")
            .join("Warp")
            .join("warp.exe")
    } else {
        home.join(".local").join("share").join("warp-terminal").join("warp")
    }
}

fn default_process_name() -> &'static str {
    if cfg!(target_os = "macos") {
        "Warp"
    } else if cfg!(windows) {
        "warp.exe"
    } else {
        "warp"
    }
}

/// Linux matches `pgrep -x` against the kernel's 15-byte process name.
fn truncate_comm(mut name: String) -> String {
    if cfg!(target_os = "linux") && name.len() > 15 {
        let mut end = 15;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
    }
    name
}

/// One PID per line.
fn parse_pgrep(stdout: &str) -> Vec<u32> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}

/// `tasklist /FO CSV /NH` rows: `"warp.exe","1234",...`. The no-match
/// message has no second field.
fn parse_tasklist(stdout: &str) -> Vec<u32> {
    stdout
        .lines()
        .filter_map(|line| line.split(',').nth(1))
        .filter_map(|field| field.trim().trim_matches('"').parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"").unwrap();
        path
    }

    #[test]
    fn existing_override_wins() {
        let tmp = TempDir::new().unwrap();
        let custom = touch(&tmp, "custom-warp");
        let env = touch(&tmp, "env-warp");

        let locator = WarpLocator::new().with_override(&custom);
        assert_eq!(locator.resolve_with(Some(env), None), custom);
    }

    #[test]
    fn missing_override_falls_back_to_env() {
        let tmp = TempDir::new().unwrap();
        let env = touch(&tmp, "env-warp");

        let locator = WarpLocator::new().with_override(tmp.path().join("missing"));
        assert_eq!(locator.resolve_with(Some(env.clone()), None), env);
    }

    #[test]
    fn missing_env_falls_back_to_default() {
        let tmp = TempDir::new().unwrap();
        let home = tmp.path().to_path_buf();

        let locator = WarpLocator::new();
        let resolved = locator.resolve_with(Some(tmp.path().join("missing")), Some(home.clone()));
        assert_eq!(resolved, default_path(Some(home)));
    }

    #[test]
    fn empty_env_is_ignored() {
        let locator = WarpLocator::new();
        assert_eq!(
            locator.resolve_with(Some(PathBuf::new()), None),
            default_path(None)
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn linux_default_path() {
        let path = default_path(Some(PathBuf::from("/home/u")));
        assert_eq!(path, PathBuf::from("/home/u/.local/share/warp-terminal/warp"));
    }

    #[test]
    fn process_name_follows_resolved_executable() {
        let tmp = TempDir::new().unwrap();
        let custom = touch(&tmp, "my-terminal");
        let locator = WarpLocator::new().with_override(&custom);
        assert_eq!(locator.process_name(), "my-terminal");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn long_process_name_is_cut_to_comm_length() {
        assert_eq!(
            truncate_comm("warpgateway-terminal".to_string()),
            "warpgateway-ter"
        );
        assert_eq!(truncate_comm("warp".to_string()), "warp");
    }

    #[test]
    fn pgrep_output_parsing() {
        assert_eq!(parse_pgrep("123\n456\n\n"), vec![123, 456]);
        assert!(parse_pgrep("").is_empty());
    }

    #[test]
    fn tasklist_output_parsing() {
        let out = "\"warp.exe\",\"4321\",\"Console\",\"1\",\"120,000 K\"\r\n";
        assert_eq!(parse_tasklist(out), vec![4321]);
        assert!(parse_tasklist("INFO: No tasks are running which match the specified criteria.")
            .is_empty());
    }

    #[test]
    fn not_running_when_no_process_has_the_name() {
        let tmp = TempDir::new().unwrap();
        let absent = touch(&tmp, "wg-absent-term");
        let locator = WarpLocator::new().with_override(&absent);
        assert!(!locator.is_running());
        assert!(locator.running_pids().is_empty());
        assert!(locator.kill().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn own_process_is_never_matched() {
        // Pointing the locator at this test binary must not report or signal us.
        let me = std::env::current_exe().unwrap();
        let locator = WarpLocator::new().with_override(&me);
        assert!(!locator.running_pids().contains(&std::process::id()));
        assert!(locator.kill().is_ok());
    }

    #[test]
    fn launch_missing_is_not_installed() {
        let tmp = TempDir::new().unwrap();
        let locator = WarpLocator::new().with_override(tmp.path().join("missing"));
        // Only meaningful when nothing is installed at the env/default location.
        if !locator.is_installed() {
            assert!(matches!(locator.launch(), Err(WarpError::NotInstalled(_))));
        }
    }
}
