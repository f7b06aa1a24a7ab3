use crate::error_handling::DispatchError;
use crate::gate::{ValidationGate, ValidationVerdict};
use crate::logging::{LogCategory, LogContext};
use crate::shell::{Platform, ShellRegistry};
use crate::tiers::Tier;
use crate::{log_info, log_safety};
use async_trait::async_trait;
use colored::*;
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Correction substitutions below this confidence are discarded and the
/// original command runs instead.
pub const CORRECTION_CONFIDENCE_THRESHOLD: f32 = 0.8;

/// The single outcome of one dispatched invocation.
///
/// Immutable once built. Pipe sub-invocations each produce their own
/// result; the pipeline as a whole still resolves to exactly one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub tier_applied: Option<Tier>,
    pub strategy_used: String,
    /// Set whenever AI text replaced the user's text, never silently.
    pub ai_corrected: Option<String>,
    pub ai_validation: Option<ValidationVerdict>,
}

impl CommandResult {
    pub fn executed(
        output: String,
        error: Option<String>,
        exit_code: Option<i32>,
        tier: Option<Tier>,
        strategy: &str,
    ) -> Self {
        Self {
            success: exit_code == Some(0),
            output,
            error,
            exit_code,
            tier_applied: tier,
            strategy_used: strategy.to_string(),
            ai_corrected: None,
            ai_validation: None,
        }
    }

    pub fn rejected(message: String, tier: Option<Tier>, strategy: &str) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(message),
            exit_code: None,
            tier_applied: tier,
            strategy_used: strategy.to_string(),
            ai_corrected: None,
            ai_validation: None,
        }
    }

    /// A non-executing success, used by vet mode and informational
    /// strategies.
    pub fn approved(message: String, tier: Option<Tier>, strategy: &str) -> Self {
        Self {
            success: true,
            output: message,
            error: None,
            exit_code: None,
            tier_applied: tier,
            strategy_used: strategy.to_string(),
            ai_corrected: None,
            ai_validation: None,
        }
    }

    pub fn with_corrected(mut self, corrected: Option<String>) -> Self {
        self.ai_corrected = corrected;
        self
    }

    pub fn with_validation(mut self, verdict: Option<ValidationVerdict>) -> Self {
        self.ai_validation = verdict;
        self
    }
}

/// Blocking yes/no gate in front of Tier 2.5 execution.
#[async_trait]
pub trait Confirmer: Send + Sync {
    /// Present the command (and any advisory warnings) and return true
    /// only on an explicit affirmation.
    async fn confirm(&self, command: &str, warnings: &[String]) -> bool;
}

/// Interactive prompt on the terminal. Anything but y/yes declines.
pub struct TerminalConfirmer;

#[async_trait]
impl Confirmer for TerminalConfirmer {
    async fn confirm(&self, command: &str, warnings: &[String]) -> bool {
        for warning in warnings {
            eprintln!("{} {}", "warning:".bold().yellow(), warning);
        }
        print!(
            "{} execute '{}'? [y/N] ",
            "confirm:".bold().yellow(),
            command.bold()
        );
        let _ = io::stdout().flush();

        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

/// Scripted affirmation for `--yes` and non-interactive use.
pub struct AssumeYes;

#[async_trait]
impl Confirmer for AssumeYes {
    async fn confirm(&self, _command: &str, _warnings: &[String]) -> bool {
        true
    }
}

/// Deterministic confirmer for tests: fixed answer, records prompts.
pub struct ScriptedConfirmer {
    answer: bool,
    pub prompts: std::sync::Mutex<Vec<String>>,
}

impl ScriptedConfirmer {
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            prompts: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Confirmer for ScriptedConfirmer {
    async fn confirm(&self, command: &str, _warnings: &[String]) -> bool {
        self.prompts.lock().unwrap().push(command.to_string());
        self.answer
    }
}

/// The tier state machine.
///
/// Dispatch is deterministic: identical (command, platform, tier,
/// advisory response) inputs produce identical results. Every failure
/// path at tiers 2 through 4 resolves locally to a rejected result.
pub struct TierDispatcher {
    gate: Arc<dyn ValidationGate>,
    shells: ShellRegistry,
    confirmer: Arc<dyn Confirmer>,
    shell_timeout: Duration,
}

const STRATEGY_TIER_EXECUTION: &str = "tier_execution";

impl TierDispatcher {
    pub fn new(
        gate: Arc<dyn ValidationGate>,
        shells: ShellRegistry,
        confirmer: Arc<dyn Confirmer>,
        shell_timeout: Duration,
    ) -> Self {
        Self {
            gate,
            shells,
            confirmer,
            shell_timeout,
        }
    }

    /// Resolve one command through its tier. `vet_only` runs the full
    /// machinery (correction, confirmation, validation) but suppresses
    /// the shell adapter call itself.
    pub async fn dispatch(
        &self,
        command: &str,
        platform: Platform,
        tier: Tier,
        cwd: &Path,
        vet_only: bool,
    ) -> CommandResult {
        match tier {
            Tier::Instant => {
                self.run_or_vet(command, platform, Tier::Instant, cwd, vet_only)
                    .await
            }
            Tier::AutoCorrect => {
                let (final_command, corrected) = self.try_correct(command, platform).await;
                self.run_or_vet(&final_command, platform, Tier::AutoCorrect, cwd, vet_only)
                    .await
                    .with_corrected(corrected)
            }
            Tier::AutoCorrectConfirm => {
                let (final_command, corrected) = self.try_correct(command, platform).await;
                if !self.confirmer.confirm(&final_command, &[]).await {
                    return CommandResult::rejected(
                        DispatchError::ConfirmationDeclined.to_string(),
                        Some(Tier::AutoCorrectConfirm),
                        STRATEGY_TIER_EXECUTION,
                    )
                    .with_corrected(corrected);
                }
                self.run_or_vet(
                    &final_command,
                    platform,
                    Tier::AutoCorrectConfirm,
                    cwd,
                    vet_only,
                )
                .await
                .with_corrected(corrected)
            }
            Tier::AiValidate => self.validate_then_run(command, platform, cwd, vet_only).await,
            Tier::Lockdown => {
                log_safety!(
                    "lockdown refusal",
                    LogContext::new()
                        .with_command_name(first_word(command))
                        .with_tier("4")
                        .with_platform(platform.as_str())
                );
                CommandResult::rejected(
                    DispatchError::Lockdown(
                        "this command is never executed through the dispatcher".to_string(),
                    )
                    .to_string(),
                    Some(Tier::Lockdown),
                    STRATEGY_TIER_EXECUTION,
                )
            }
        }
    }

    /// Run a command through the shell adapter with no tier machinery.
    /// The force-execution path calls this after its own lockdown check.
    pub async fn execute_unchecked(
        &self,
        command: &str,
        platform: Platform,
        cwd: &Path,
        tier: Option<Tier>,
        strategy: &str,
    ) -> CommandResult {
        let executor = self.shells.get(platform);
        match executor.execute(command, cwd, self.shell_timeout).await {
            Ok(output) => {
                log_info!(
                    LogCategory::Execution,
                    "command executed",
                    LogContext::new()
                        .with_command_name(first_word(command))
                        .with_platform(platform.as_str())
                        .with_strategy(strategy)
                        .with_success(output.success())
                );
                CommandResult::executed(
                    output.stdout,
                    if output.stderr.is_empty() {
                        None
                    } else {
                        Some(output.stderr)
                    },
                    output.exit_code,
                    tier,
                    strategy,
                )
            }
            Err(e) => CommandResult::rejected(e.to_string(), tier, strategy),
        }
    }

    async fn run_or_vet(
        &self,
        command: &str,
        platform: Platform,
        tier: Tier,
        cwd: &Path,
        vet_only: bool,
    ) -> CommandResult {
        if vet_only {
            return CommandResult::approved(
                String::new(),
                Some(tier),
                STRATEGY_TIER_EXECUTION,
            );
        }
        self.execute_unchecked(command, platform, cwd, Some(tier), STRATEGY_TIER_EXECUTION)
            .await
    }

    /// Tier 2/2.5 correction step. Substitutes only a confident,
    /// different correction; every advisory failure keeps the original
    /// (no suggestion is not the same as unsafe).
    async fn try_correct(&self, command: &str, platform: Platform) -> (String, Option<String>) {
        match self.gate.correct(command, platform).await {
            Ok(correction)
                if correction.confidence >= CORRECTION_CONFIDENCE_THRESHOLD
                    && correction.corrected != command =>
            {
                log_info!(
                    LogCategory::Gate,
                    "correction applied",
                    LogContext::new()
                        .with_command_name(first_word(command))
                        .with_platform(platform.as_str())
                );
                let corrected = correction.corrected;
                (corrected.clone(), Some(corrected))
            }
            _ => (command.to_string(), None),
        }
    }

    /// Tier 3: the gate advises, the machine decides fail-safe. An
    /// unreachable or malformed gate rejects; it never waves through.
    async fn validate_then_run(
        &self,
        command: &str,
        platform: Platform,
        cwd: &Path,
        vet_only: bool,
    ) -> CommandResult {
        match self.gate.validate(command, platform, Tier::AiValidate).await {
            Ok(verdict) if verdict.safe => {
                self.run_or_vet(command, platform, Tier::AiValidate, cwd, vet_only)
                    .await
                    .with_validation(Some(verdict))
            }
            Ok(verdict) => {
                let mut message = format!("rejected by validation: {}", verdict.reason);
                for warning in &verdict.warnings {
                    message.push_str(&format!("\n  warning: {}", warning));
                }
                if let Some(suggestion) = &verdict.suggestion {
                    message.push_str(&format!("\n  try instead: {}", suggestion));
                }
                CommandResult::rejected(message, Some(Tier::AiValidate), STRATEGY_TIER_EXECUTION)
                    .with_validation(Some(verdict))
            }
            Err(e) => {
                log_info!(
                    LogCategory::Gate,
                    format!("validation failed closed: {}", e),
                    LogContext::new()
                        .with_command_name(first_word(command))
                        .with_platform(platform.as_str())
                );
                CommandResult::rejected(e.to_string(), Some(Tier::AiValidate), STRATEGY_TIER_EXECUTION)
            }
        }
    }
}

fn first_word(command: &str) -> &str {
    command.split_whitespace().next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{Correction, ScriptedGate, ValidationVerdict};
    use crate::shell::{ExecutionOutput, ShellExecutor};
    use std::sync::Mutex;

    /// Records every command it is asked to run and answers success.
    struct SpyExecutor {
        platform: Platform,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ShellExecutor for SpyExecutor {
        fn platform(&self) -> Platform {
            self.platform
        }

        async fn execute(
            &self,
            command: &str,
            _cwd: &Path,
            _timeout: Duration,
        ) -> Result<ExecutionOutput, DispatchError> {
            self.calls.lock().unwrap().push(command.to_string());
            Ok(ExecutionOutput {
                stdout: format!("ran: {}", command),
                stderr: String::new(),
                exit_code: Some(0),
            })
        }
    }

    fn spy_registry() -> (ShellRegistry, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let bash = Arc::new(SpyExecutor {
            platform: Platform::Bash,
            calls: Arc::clone(&calls),
        });
        let powershell = Arc::new(SpyExecutor {
            platform: Platform::PowerShell,
            calls: Arc::clone(&calls),
        });
        (ShellRegistry::with_executors(bash, powershell), calls)
    }

    fn dispatcher_with(
        gate: ScriptedGate,
        confirmer: Arc<dyn Confirmer>,
    ) -> (TierDispatcher, Arc<Mutex<Vec<String>>>) {
        let (shells, calls) = spy_registry();
        let dispatcher = TierDispatcher::new(
            Arc::new(gate),
            shells,
            confirmer,
            Duration::from_secs(5),
        );
        (dispatcher, calls)
    }

    #[tokio::test]
    async fn test_tier1_executes_directly() {
        let (dispatcher, calls) = dispatcher_with(ScriptedGate::permissive(), Arc::new(AssumeYes));
        let result = dispatcher
            .dispatch("ls -la", Platform::Bash, Tier::Instant, Path::new("/tmp"), false)
            .await;
        assert!(result.success);
        assert_eq!(result.tier_applied, Some(Tier::Instant));
        assert_eq!(calls.lock().unwrap().as_slice(), ["ls -la"]);
    }

    #[tokio::test]
    async fn test_tier4_never_reaches_the_adapter() {
        let (dispatcher, calls) = dispatcher_with(ScriptedGate::permissive(), Arc::new(AssumeYes));
        let result = dispatcher
            .dispatch("mkfs /dev/sda", Platform::Bash, Tier::Lockdown, Path::new("/tmp"), false)
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("lockdown"));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tier2_applies_confident_corrections() {
        let gate = ScriptedGate::new(
            Ok(ValidationVerdict {
                safe: true,
                reason: "ok".to_string(),
                warnings: Vec::new(),
                suggestion: None,
            }),
            Ok(Correction {
                corrected: "git status".to_string(),
                confidence: 0.95,
            }),
        );
        let (dispatcher, calls) = dispatcher_with(gate, Arc::new(AssumeYes));
        let result = dispatcher
            .dispatch("git stauts", Platform::Bash, Tier::AutoCorrect, Path::new("/tmp"), false)
            .await;
        assert!(result.success);
        assert_eq!(result.ai_corrected.as_deref(), Some("git status"));
        assert_eq!(calls.lock().unwrap().as_slice(), ["git status"]);
    }

    #[tokio::test]
    async fn test_tier2_discards_low_confidence_corrections() {
        let gate = ScriptedGate::new(
            Ok(ValidationVerdict {
                safe: true,
                reason: "ok".to_string(),
                warnings: Vec::new(),
                suggestion: None,
            }),
            Ok(Correction {
                corrected: "git status".to_string(),
                confidence: 0.5,
            }),
        );
        let (dispatcher, calls) = dispatcher_with(gate, Arc::new(AssumeYes));
        let result = dispatcher
            .dispatch("git stauts", Platform::Bash, Tier::AutoCorrect, Path::new("/tmp"), false)
            .await;
        assert!(result.success);
        assert_eq!(result.ai_corrected, None);
        assert_eq!(calls.lock().unwrap().as_slice(), ["git stauts"]);
    }

    #[tokio::test]
    async fn test_tier2_runs_original_when_corrector_is_down() {
        let (dispatcher, calls) = dispatcher_with(ScriptedGate::unavailable(), Arc::new(AssumeYes));
        let result = dispatcher
            .dispatch("git stauts", Platform::Bash, Tier::AutoCorrect, Path::new("/tmp"), false)
            .await;
        assert!(result.success);
        assert_eq!(result.ai_corrected, None);
        assert_eq!(calls.lock().unwrap().as_slice(), ["git stauts"]);
    }

    #[tokio::test]
    async fn test_tier2_5_decline_blocks_execution() {
        let confirmer = Arc::new(ScriptedConfirmer::new(false));
        let confirmer_dyn: Arc<dyn Confirmer> = confirmer.clone();
        let (dispatcher, calls) = dispatcher_with(ScriptedGate::unavailable(), confirmer_dyn);
        let result = dispatcher
            .dispatch("mv a b", Platform::Bash, Tier::AutoCorrectConfirm, Path::new("/tmp"), false)
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("confirmation declined"));
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(confirmer.prompts.lock().unwrap().as_slice(), ["mv a b"]);
    }

    #[tokio::test]
    async fn test_tier2_5_confirms_the_corrected_text() {
        let gate = ScriptedGate::new(
            Err(DispatchError::ValidationTimeout),
            Ok(Correction {
                corrected: "mv src dst".to_string(),
                confidence: 0.9,
            }),
        );
        let confirmer = Arc::new(ScriptedConfirmer::new(true));
        let confirmer_dyn: Arc<dyn Confirmer> = confirmer.clone();
        let (dispatcher, calls) = dispatcher_with(gate, confirmer_dyn);
        let result = dispatcher
            .dispatch("mv scr dst", Platform::Bash, Tier::AutoCorrectConfirm, Path::new("/tmp"), false)
            .await;
        assert!(result.success);
        // The user affirms what will actually run, not what they typed.
        assert_eq!(confirmer.prompts.lock().unwrap().as_slice(), ["mv src dst"]);
        assert_eq!(calls.lock().unwrap().as_slice(), ["mv src dst"]);
    }

    #[tokio::test]
    async fn test_tier3_unsafe_verdict_rejects() {
        let gate = ScriptedGate::new(
            Ok(ValidationVerdict {
                safe: false,
                reason: "recursive delete outside workspace".to_string(),
                warnings: vec!["irreversible".to_string()],
                suggestion: Some("rm -ri".to_string()),
            }),
            Err(DispatchError::ValidationTimeout),
        );
        let (dispatcher, calls) = dispatcher_with(gate, Arc::new(AssumeYes));
        let result = dispatcher
            .dispatch("rm -rf build", Platform::Bash, Tier::AiValidate, Path::new("/tmp"), false)
            .await;
        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.contains("recursive delete outside workspace"));
        assert!(error.contains("irreversible"));
        assert!(error.contains("rm -ri"));
        assert!(calls.lock().unwrap().is_empty());
        assert!(result.ai_validation.is_some());
    }

    #[tokio::test]
    async fn test_tier3_fails_safe_when_gate_is_down() {
        let (dispatcher, calls) = dispatcher_with(ScriptedGate::unavailable(), Arc::new(AssumeYes));
        let result = dispatcher
            .dispatch("rm -rf build", Platform::Bash, Tier::AiValidate, Path::new("/tmp"), false)
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("validation unavailable"));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vet_mode_suppresses_the_adapter_only() {
        let (dispatcher, calls) = dispatcher_with(ScriptedGate::permissive(), Arc::new(AssumeYes));
        let result = dispatcher
            .dispatch("rm -rf build", Platform::Bash, Tier::AiValidate, Path::new("/tmp"), true)
            .await;
        assert!(result.success);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vet_mode_still_requires_confirmation() {
        let confirmer = Arc::new(ScriptedConfirmer::new(false));
        let confirmer_dyn: Arc<dyn Confirmer> = confirmer.clone();
        let (dispatcher, calls) = dispatcher_with(ScriptedGate::unavailable(), confirmer_dyn);
        let result = dispatcher
            .dispatch("mv a b", Platform::Bash, Tier::AutoCorrectConfirm, Path::new("/tmp"), true)
            .await;
        assert!(!result.success);
        assert!(calls.lock().unwrap().is_empty());
    }
}
