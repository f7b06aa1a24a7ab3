use crate::error_handling::DispatchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

/// Target shell platform. Tier classification is platform-aware but
/// platform-neutral in its built-in rules; only process spawning differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Bash,
    PowerShell,
}

impl Platform {
    /// Detect the platform for the current host.
    pub fn detect() -> Self {
        if cfg!(target_os = "windows") {
            Platform::PowerShell
        } else {
            Platform::Bash
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Bash => "bash",
            Platform::PowerShell => "powershell",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bash" | "sh" | "linux" | "macos" => Ok(Platform::Bash),
            "powershell" | "pwsh" | "windows" => Ok(Platform::PowerShell),
            other => Err(format!("unknown platform '{}'", other)),
        }
    }
}

/// Captured process output.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ExecutionOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Platform-specific process execution.
///
/// The adapter spawns the process, captures stdout/stderr/exit code, and
/// enforces a hard timeout that kills the process. It never rewrites or
/// interprets the command string; that responsibility belongs strictly to
/// the tiers and strategies upstream.
#[async_trait]
pub trait ShellExecutor: Send + Sync {
    fn platform(&self) -> Platform;

    async fn execute(
        &self,
        command: &str,
        cwd: &Path,
        timeout: Duration,
    ) -> Result<ExecutionOutput, DispatchError>;
}

async fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
) -> Result<ExecutionOutput, DispatchError> {
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .map_err(|e| DispatchError::ExecutionSpawn(e.to_string()))?;

    // Dropping the wait future on timeout kills the child via kill_on_drop.
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(ExecutionOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        }),
        Ok(Err(e)) => Err(DispatchError::ExecutionSpawn(e.to_string())),
        Err(_) => Err(DispatchError::ExecutionTimeout(timeout.as_secs())),
    }
}

/// Bash adapter: `bash -c <command>`.
pub struct BashExecutor;

#[async_trait]
impl ShellExecutor for BashExecutor {
    fn platform(&self) -> Platform {
        Platform::Bash
    }

    async fn execute(
        &self,
        command: &str,
        cwd: &Path,
        timeout: Duration,
    ) -> Result<ExecutionOutput, DispatchError> {
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(command).current_dir(cwd);
        run_with_timeout(cmd, timeout).await
    }
}

/// PowerShell adapter: `powershell -NoProfile -Command <command>`.
pub struct PowerShellExecutor;

#[async_trait]
impl ShellExecutor for PowerShellExecutor {
    fn platform(&self) -> Platform {
        Platform::PowerShell
    }

    async fn execute(
        &self,
        command: &str,
        cwd: &Path,
        timeout: Duration,
    ) -> Result<ExecutionOutput, DispatchError> {
        let mut cmd = Command::new("powershell");
        cmd.arg("-NoProfile").arg("-Command").arg(command).current_dir(cwd);
        run_with_timeout(cmd, timeout).await
    }
}

/// One executor per platform, selected at dispatch time. Tests swap in
/// spy executors here to assert the adapter-was-never-called properties.
#[derive(Clone)]
pub struct ShellRegistry {
    bash: Arc<dyn ShellExecutor>,
    powershell: Arc<dyn ShellExecutor>,
}

impl ShellRegistry {
    pub fn new() -> Self {
        Self {
            bash: Arc::new(BashExecutor),
            powershell: Arc::new(PowerShellExecutor),
        }
    }

    pub fn with_executors(
        bash: Arc<dyn ShellExecutor>,
        powershell: Arc<dyn ShellExecutor>,
    ) -> Self {
        Self { bash, powershell }
    }

    pub fn get(&self, platform: Platform) -> Arc<dyn ShellExecutor> {
        match platform {
            Platform::Bash => Arc::clone(&self.bash),
            Platform::PowerShell => Arc::clone(&self.powershell),
        }
    }
}

impl Default for ShellRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Default execution timeout applied when the config carries none.
pub const DEFAULT_SHELL_TIMEOUT: Duration = Duration::from_secs(30);

pub fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_parse() {
        assert_eq!("bash".parse::<Platform>().unwrap(), Platform::Bash);
        assert_eq!("PowerShell".parse::<Platform>().unwrap(), Platform::PowerShell);
        assert_eq!("pwsh".parse::<Platform>().unwrap(), Platform::PowerShell);
        assert!("fish".parse::<Platform>().is_err());
    }

    #[test]
    fn test_platform_wire_name() {
        assert_eq!(Platform::Bash.as_str(), "bash");
        assert_eq!(Platform::PowerShell.as_str(), "powershell");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bash_captures_output_and_exit_code() {
        let out = BashExecutor
            .execute("echo hello && exit 3", Path::new("/tmp"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_the_process() {
        let err = BashExecutor
            .execute("sleep 10", Path::new("/tmp"), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::ExecutionTimeout(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_adapter_does_not_rewrite_the_command() {
        // A literal that looks like a flag must reach the shell untouched.
        let out = BashExecutor
            .execute("echo -- --force", Path::new("/tmp"), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.stdout.contains("--force"));
    }
}
