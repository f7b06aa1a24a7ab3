use colored::*;
use std::fmt;

/// Error taxonomy for the dispatch pipeline.
///
/// Every variant at tiers 2-4 resolves locally to a rejected
/// `CommandResult` carrying the rendered message; none of these are
/// allowed to escape and terminate the session. Only config/table load
/// failures at boot are fatal, and those travel as `anyhow::Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// Malformed or empty input that could not be classified
    Classification(String),
    /// Advisory validation call exceeded its deadline
    ValidationTimeout,
    /// Advisory response failed the wire schema
    ValidationParse(String),
    /// Advisory service unreachable or transport-level failure
    ValidationTransport(String),
    /// Process could not be spawned
    ExecutionSpawn(String),
    /// Process exceeded the execution timeout and was killed
    ExecutionTimeout(u64),
    /// User declined (or failed to affirm) a confirmation prompt
    ConfirmationDeclined,
    /// Pipe/device re-entry exceeded the recursion or segment guard
    RecursionLimit(usize),
    /// Device-routing target not present in the device registry
    UnknownDevice(String),
    /// Tier 4 command refused by the lockdown tier
    Lockdown(String),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Classification(msg) => write!(f, "classification failed: {}", msg),
            DispatchError::ValidationTimeout => {
                write!(f, "validation unavailable: advisory service timed out")
            }
            DispatchError::ValidationParse(msg) => {
                write!(f, "validation unavailable: malformed advisory response ({})", msg)
            }
            DispatchError::ValidationTransport(msg) => {
                write!(f, "validation unavailable: {}", msg)
            }
            DispatchError::ExecutionSpawn(msg) => write!(f, "failed to spawn process: {}", msg),
            DispatchError::ExecutionTimeout(secs) => {
                write!(f, "execution timed out after {}s and was killed", secs)
            }
            DispatchError::ConfirmationDeclined => write!(f, "confirmation declined"),
            DispatchError::RecursionLimit(limit) => {
                write!(f, "input exceeds the recursion or segment limit of {}", limit)
            }
            DispatchError::UnknownDevice(name) => write!(f, "unknown device '{}'", name),
            DispatchError::Lockdown(reason) => write!(f, "lockdown: {}", reason),
        }
    }
}

impl std::error::Error for DispatchError {}

impl DispatchError {
    /// Actionable suggestions shown alongside the error in the CLI.
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            DispatchError::ValidationTimeout | DispatchError::ValidationTransport(_) => vec![
                "Check that the advisory service is running and reachable".to_string(),
                "Verify the gate_url in your configuration".to_string(),
                "Retry, or use the explicit '!' bypass for non-lockdown commands".to_string(),
            ],
            DispatchError::ValidationParse(_) => vec![
                "The advisory service returned an unexpected shape; check its version".to_string(),
            ],
            DispatchError::ConfirmationDeclined => vec![
                "Re-run and answer 'y' to confirm, or pass --yes for scripted use".to_string(),
            ],
            DispatchError::ExecutionTimeout(_) => vec![
                "Raise shell_timeout_ms in the configuration for long-running commands".to_string(),
            ],
            DispatchError::UnknownDevice(_) => vec![
                "List configured devices with ':config'".to_string(),
            ],
            DispatchError::Lockdown(_) => vec![
                "Lockdown commands cannot be executed through this pipeline".to_string(),
            ],
            _ => Vec::new(),
        }
    }
}

/// Display a success message in a consistent style
pub fn display_success(message: &str) {
    println!("{} {}", "ok:".bold().green(), message);
}

/// Display a warning message in a consistent style
pub fn display_warning(message: &str) {
    eprintln!("{} {}", "warning:".bold().yellow(), message);
}

/// Display an informational message in a consistent style
pub fn display_info(message: &str) {
    println!("{} {}", "info:".bold().cyan(), message);
}

/// Display an error with its actionable suggestions
pub fn display_error(message: &str, suggestions: &[String]) {
    eprintln!("{} {}", "error:".bold().red(), message);
    if !suggestions.is_empty() {
        eprintln!("{}", "suggested solutions:".bold().yellow());
        for (i, suggestion) in suggestions.iter().enumerate() {
            eprintln!("  {}. {}", (i + 1).to_string().green(), suggestion);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_render_as_unavailable() {
        assert!(DispatchError::ValidationTimeout.to_string().contains("validation unavailable"));
        assert!(DispatchError::ValidationParse("bad field".into())
            .to_string()
            .contains("validation unavailable"));
        assert!(DispatchError::ValidationTransport("connection refused".into())
            .to_string()
            .contains("validation unavailable"));
    }

    #[test]
    fn test_gate_errors_carry_suggestions() {
        assert!(!DispatchError::ValidationTimeout.suggestions().is_empty());
        assert!(DispatchError::Classification("empty".into()).suggestions().is_empty());
    }
}
