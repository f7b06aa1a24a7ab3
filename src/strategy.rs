use crate::error_handling::DispatchError;
use crate::execution::{CommandResult, TierDispatcher};
use crate::history;
use crate::logging::LogContext;
use crate::parser::ShellParser;
use crate::shell::Platform;
use crate::tiers::{Tier, TierTable};
use crate::log_safety;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Re-entry depth ceiling for pipe and device recursion.
pub const MAX_DEPTH: usize = 8;
/// Hard cap on pipe segments in one input line.
pub const MAX_PIPE_SEGMENTS: usize = 16;

/// Mutable per-session state behind one lock: working directory and the
/// current tier table snapshot. Everything else on the session is
/// immutable for its lifetime.
struct SessionState {
    cwd: PathBuf,
    table: Arc<TierTable>,
}

/// One interactive session. Commands within a session resolve strictly
/// in sequence, so the state lock is never contended.
pub struct Session {
    state: Mutex<SessionState>,
    devices: HashMap<String, Platform>,
}

impl Session {
    pub fn new(cwd: PathBuf, table: TierTable, devices: HashMap<String, Platform>) -> Self {
        Self {
            state: Mutex::new(SessionState {
                cwd,
                table: Arc::new(table),
            }),
            devices,
        }
    }

    pub fn cwd(&self) -> PathBuf {
        self.state.lock().unwrap().cwd.clone()
    }

    pub fn set_cwd(&self, cwd: PathBuf) {
        self.state.lock().unwrap().cwd = cwd;
    }

    /// Current snapshot. Callers hold the `Arc`, not the lock, so a
    /// concurrent override swap never changes a classification mid-flight.
    pub fn table(&self) -> Arc<TierTable> {
        Arc::clone(&self.state.lock().unwrap().table)
    }

    pub fn set_table(&self, table: TierTable) {
        self.state.lock().unwrap().table = Arc::new(table);
    }

    pub fn device(&self, name: &str) -> Option<Platform> {
        self.devices.get(name).copied()
    }

    pub fn device_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.devices.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Immutable per-invocation routing context.
#[derive(Clone)]
pub struct StrategyContext {
    pub raw_input: String,
    pub platform: Platform,
    pub force_flag: bool,
    pub device_target: Option<String>,
    pub pipe_segments: Vec<String>,
    pub depth: usize,
    pub vet_only: bool,
    pub session: Arc<Session>,
}

impl StrategyContext {
    pub fn new(raw_input: &str, platform: Platform, session: Arc<Session>) -> Self {
        Self::build(raw_input, platform, 0, false, session)
    }

    /// Vet mode: run the whole pipeline except the adapter call.
    pub fn vetting(mut self) -> Self {
        self.vet_only = true;
        self
    }

    /// Context for a router re-entry (pipe segment or device payload).
    pub fn child(&self, raw_input: &str, platform: Platform, vet_only: bool) -> Self {
        Self::build(
            raw_input,
            platform,
            self.depth + 1,
            vet_only,
            Arc::clone(&self.session),
        )
    }

    fn build(
        raw_input: &str,
        platform: Platform,
        depth: usize,
        vet_only: bool,
        session: Arc<Session>,
    ) -> Self {
        let trimmed = raw_input.trim().to_string();
        let parser = ShellParser::new();

        let force_flag = trimmed.starts_with('!');
        let device_target = trimmed
            .strip_prefix('@')
            .and_then(|rest| rest.split_whitespace().next())
            .map(|name| name.to_string());
        let pipe_segments = parser.split_pipeline(&trimmed);

        Self {
            raw_input: trimmed,
            platform,
            force_flag,
            device_target,
            pipe_segments,
            depth,
            vet_only,
            session,
        }
    }

    /// The input with the device prefix removed, for router re-entry.
    fn device_payload(&self) -> String {
        match self.raw_input.split_once(char::is_whitespace) {
            Some((_prefix, rest)) => rest.trim().to_string(),
            None => String::new(),
        }
    }
}

/// A routing strategy. `matches` is a pure predicate over the context;
/// `execute` resolves the input to exactly one result.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn matches(&self, ctx: &StrategyContext) -> bool;
    async fn execute(&self, ctx: &StrategyContext, router: &Router) -> CommandResult;
}

/// Ordered, closed strategy list. First match wins; the tier execution
/// catch-all at the end matches everything, so routing always resolves.
pub struct Router {
    strategies: Vec<Arc<dyn Strategy>>,
    dispatcher: Arc<TierDispatcher>,
}

impl Router {
    pub fn new(dispatcher: Arc<TierDispatcher>) -> Self {
        let strategies: Vec<Arc<dyn Strategy>> = vec![
            Arc::new(PipeStrategy),
            Arc::new(DeviceRoutingStrategy),
            Arc::new(ForceExecutionStrategy),
            Arc::new(MetaStrategy),
            Arc::new(NaturalLanguageStrategy),
            Arc::new(CdStrategy),
            Arc::new(TierExecutionStrategy),
        ];
        Self {
            strategies,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &TierDispatcher {
        &self.dispatcher
    }

    /// Route one input to one result. Boxed so pipe and device
    /// strategies can re-enter recursively.
    pub fn route<'a>(&'a self, ctx: StrategyContext) -> BoxFuture<'a, CommandResult> {
        Box::pin(async move {
            if ctx.depth >= MAX_DEPTH {
                return CommandResult::rejected(
                    DispatchError::RecursionLimit(MAX_DEPTH).to_string(),
                    None,
                    "router",
                );
            }
            for strategy in &self.strategies {
                if strategy.matches(&ctx) {
                    return strategy.execute(&ctx, self).await;
                }
            }
            // The catch-all always matches; this is unreachable in practice.
            CommandResult::rejected(
                DispatchError::Classification("no strategy matched".to_string()).to_string(),
                None,
                "router",
            )
        })
    }
}

/// Pipelines: vet every segment through its own tier gate, then execute
/// the (possibly corrected) pipeline once so real pipe data flow is
/// preserved.
struct PipeStrategy;

#[async_trait]
impl Strategy for PipeStrategy {
    fn name(&self) -> &'static str {
        "pipe"
    }

    // A leading '!' forces the whole line, pipes included, through the
    // force path instead.
    fn matches(&self, ctx: &StrategyContext) -> bool {
        ctx.pipe_segments.len() > 1 && !ctx.force_flag
    }

    async fn execute(&self, ctx: &StrategyContext, router: &Router) -> CommandResult {
        if ctx.pipe_segments.len() > MAX_PIPE_SEGMENTS {
            return CommandResult::rejected(
                DispatchError::RecursionLimit(MAX_PIPE_SEGMENTS).to_string(),
                None,
                self.name(),
            );
        }

        let mut final_segments = Vec::with_capacity(ctx.pipe_segments.len());
        let mut any_corrected = false;
        let mut most_cautious: Option<Tier> = None;

        for (index, segment) in ctx.pipe_segments.iter().enumerate() {
            let child = ctx.child(segment, ctx.platform, true);
            let vetted = router.route(child).await;

            if !vetted.success {
                let reason = vetted
                    .error
                    .unwrap_or_else(|| "rejected".to_string());
                return CommandResult::rejected(
                    format!("pipeline segment {} rejected: {}", index + 1, reason),
                    vetted.tier_applied,
                    self.name(),
                );
            }

            most_cautious = most_cautious.max(vetted.tier_applied);
            match vetted.ai_corrected {
                Some(corrected) => {
                    any_corrected = true;
                    final_segments.push(corrected);
                }
                None => final_segments.push(segment.clone()),
            }
        }

        let final_pipeline = final_segments.join(" | ");
        let corrected = if any_corrected {
            Some(final_pipeline.clone())
        } else {
            None
        };

        if ctx.vet_only {
            return CommandResult::approved(String::new(), most_cautious, self.name())
                .with_corrected(corrected);
        }

        let result = router
            .dispatcher()
            .execute_unchecked(
                &final_pipeline,
                ctx.platform,
                &ctx.session.cwd(),
                most_cautious,
                self.name(),
            )
            .await;
        result.with_corrected(corrected)
    }
}

/// `@name command`: resolve the device to a platform profile and route
/// the payload again under that platform.
struct DeviceRoutingStrategy;

#[async_trait]
impl Strategy for DeviceRoutingStrategy {
    fn name(&self) -> &'static str {
        "device_routing"
    }

    fn matches(&self, ctx: &StrategyContext) -> bool {
        ctx.device_target.is_some()
    }

    async fn execute(&self, ctx: &StrategyContext, router: &Router) -> CommandResult {
        let name = ctx.device_target.as_deref().unwrap_or_default();
        let platform = match ctx.session.device(name) {
            Some(platform) => platform,
            None => {
                return CommandResult::rejected(
                    DispatchError::UnknownDevice(name.to_string()).to_string(),
                    None,
                    self.name(),
                )
            }
        };

        let payload = ctx.device_payload();
        if payload.is_empty() {
            return CommandResult::rejected(
                DispatchError::Classification(format!("no command after '@{}'", name)).to_string(),
                None,
                self.name(),
            );
        }

        let child = ctx.child(&payload, platform, ctx.vet_only);
        let routed = router.route(child).await;
        CommandResult {
            strategy_used: self.name().to_string(),
            ..routed
        }
    }
}

/// `!command`: explicit bypass of tiers 2 through 3. Lockdown is not
/// bypassable; the attempt itself is a safety event.
struct ForceExecutionStrategy;

#[async_trait]
impl Strategy for ForceExecutionStrategy {
    fn name(&self) -> &'static str {
        "force_execution"
    }

    fn matches(&self, ctx: &StrategyContext) -> bool {
        ctx.force_flag
    }

    async fn execute(&self, ctx: &StrategyContext, router: &Router) -> CommandResult {
        let command = ctx.raw_input.trim_start_matches('!').trim().to_string();
        if command.is_empty() {
            return CommandResult::rejected(
                DispatchError::Classification("nothing to force".to_string()).to_string(),
                None,
                self.name(),
            );
        }

        let classification = ctx
            .session
            .table()
            .classify_detailed(&command, ctx.platform);

        if classification.tier == Tier::Lockdown {
            log_safety!(
                "force bypass refused for lockdown command",
                LogContext::new()
                    .with_command_name(classification.command_name.as_deref().unwrap_or(""))
                    .with_tier("4")
                    .with_platform(ctx.platform.as_str())
            );
            return CommandResult::rejected(
                DispatchError::Lockdown("the '!' bypass does not apply to this command".to_string())
                    .to_string(),
                Some(Tier::Lockdown),
                self.name(),
            );
        }

        log_safety!(
            "validation bypassed by explicit '!'",
            LogContext::new()
                .with_command_name(classification.command_name.as_deref().unwrap_or(""))
                .with_tier(&classification.tier.to_string())
                .with_platform(ctx.platform.as_str())
        );

        if ctx.vet_only {
            return CommandResult::approved(String::new(), Some(classification.tier), self.name());
        }

        router
            .dispatcher()
            .execute_unchecked(
                &command,
                ctx.platform,
                &ctx.session.cwd(),
                Some(classification.tier),
                self.name(),
            )
            .await
    }
}

/// `:`-prefixed session commands: tier table inspection and override
/// management, configuration summary, history.
struct MetaStrategy;

#[async_trait]
impl Strategy for MetaStrategy {
    fn name(&self) -> &'static str {
        "meta"
    }

    fn matches(&self, ctx: &StrategyContext) -> bool {
        ctx.raw_input.starts_with(':')
    }

    async fn execute(&self, ctx: &StrategyContext, _router: &Router) -> CommandResult {
        let line = ctx.raw_input.trim_start_matches(':');
        let parts: Vec<&str> = line.split_whitespace().collect();

        match parts.as_slice() {
            ["tier"] | ["tier", "show"] => {
                let table = ctx.session.table();
                let overrides = table.override_rules();
                let mut out = String::from("tier overrides (session):\n");
                if overrides.is_empty() {
                    out.push_str("  (none)\n");
                }
                for rule in overrides {
                    let platform = rule
                        .platform
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "any".to_string());
                    out.push_str(&format!("  {} -> {} [{}]\n", rule.command, rule.tier, platform));
                }
                CommandResult::approved(out, None, self.name())
            }
            ["tier", "set", command, tier] | ["tier", "set", command, tier, _] => {
                let platform = parts.get(4).and_then(|s| s.parse::<Platform>().ok());
                let tier = match tier.parse::<Tier>() {
                    Ok(tier) => tier,
                    Err(e) => {
                        return CommandResult::rejected(
                            DispatchError::Classification(e).to_string(),
                            None,
                            self.name(),
                        )
                    }
                };
                let next = ctx.session.table().with_override(command, platform, tier);
                ctx.session.set_table(next);
                CommandResult::approved(
                    format!("override set: {} -> tier {} (session only)", command, tier),
                    None,
                    self.name(),
                )
            }
            ["tier", "unset", command] | ["tier", "unset", command, _] => {
                let platform = parts.get(3).and_then(|s| s.parse::<Platform>().ok());
                let next = ctx.session.table().without_override(command, platform);
                ctx.session.set_table(next);
                CommandResult::approved(
                    format!("override removed: {}", command),
                    None,
                    self.name(),
                )
            }
            ["config"] => {
                let table = ctx.session.table();
                let out = format!(
                    "platform: {}\ncwd: {}\ndevices: {}\ntier overrides: {}\n",
                    ctx.platform,
                    ctx.session.cwd().display(),
                    ctx.session.device_names().join(", "),
                    table.override_rules().len(),
                );
                CommandResult::approved(out, None, self.name())
            }
            ["history"] => match history::load_default() {
                Ok(records) => {
                    let mut out = String::new();
                    for record in records.iter().rev().take(20) {
                        out.push_str(&record.render_line());
                        out.push('\n');
                    }
                    if out.is_empty() {
                        out.push_str("(no history)\n");
                    }
                    CommandResult::approved(out, None, self.name())
                }
                Err(e) => CommandResult::rejected(
                    format!("cannot load history: {}", e),
                    None,
                    self.name(),
                ),
            },
            _ => CommandResult::rejected(
                DispatchError::Classification(format!("unknown meta command ':{}'", line))
                    .to_string(),
                None,
                self.name(),
            ),
        }
    }
}

/// Natural-language input is recognized and parked, never answered or
/// executed here.
struct NaturalLanguageStrategy;

const NL_PREFIXES: [&str; 5] = ["ask", "explain", "how", "what", "why"];

#[async_trait]
impl Strategy for NaturalLanguageStrategy {
    fn name(&self) -> &'static str {
        "natural_language"
    }

    fn matches(&self, ctx: &StrategyContext) -> bool {
        if ctx.raw_input.ends_with('?') {
            return true;
        }
        ShellParser::new()
            .first_token(&ctx.raw_input)
            .map(|token| NL_PREFIXES.contains(&token.as_str()))
            .unwrap_or(false)
    }

    async fn execute(&self, ctx: &StrategyContext, _router: &Router) -> CommandResult {
        CommandResult::approved(
            format!(
                "'{}' looks like a question, not a shell command; nothing was executed",
                ctx.raw_input
            ),
            None,
            self.name(),
        )
    }
}

/// `cd` changes the session working directory in-process instead of
/// spawning a shell whose directory change would be lost.
struct CdStrategy;

#[async_trait]
impl Strategy for CdStrategy {
    fn name(&self) -> &'static str {
        "cd"
    }

    fn matches(&self, ctx: &StrategyContext) -> bool {
        ShellParser::new()
            .first_token(&ctx.raw_input)
            .map(|token| token == "cd")
            .unwrap_or(false)
    }

    async fn execute(&self, ctx: &StrategyContext, _router: &Router) -> CommandResult {
        let target = ctx
            .raw_input
            .split_once(char::is_whitespace)
            .map(|(_, rest)| rest.trim().trim_matches('"').trim_matches('\''))
            .filter(|rest| !rest.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(crate::shell::home_dir);

        let resolved = if target.is_absolute() {
            target
        } else {
            ctx.session.cwd().join(target)
        };

        match resolved.canonicalize() {
            Ok(path) if path.is_dir() => {
                if !ctx.vet_only {
                    ctx.session.set_cwd(path.clone());
                }
                CommandResult::approved(format!("now in {}", path.display()), None, self.name())
            }
            _ => CommandResult::rejected(
                format!("cd: no such directory '{}'", resolved.display()),
                None,
                self.name(),
            ),
        }
    }
}

/// Catch-all: classify and hand off to the tier state machine.
struct TierExecutionStrategy;

#[async_trait]
impl Strategy for TierExecutionStrategy {
    fn name(&self) -> &'static str {
        "tier_execution"
    }

    fn matches(&self, _ctx: &StrategyContext) -> bool {
        true
    }

    async fn execute(&self, ctx: &StrategyContext, router: &Router) -> CommandResult {
        let tier = ctx.session.table().classify(&ctx.raw_input, ctx.platform);
        router
            .dispatcher()
            .dispatch(
                &ctx.raw_input,
                ctx.platform,
                tier,
                &ctx.session.cwd(),
                ctx.vet_only,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{AssumeYes, ScriptedConfirmer};
    use crate::gate::ScriptedGate;
    use crate::shell::{ExecutionOutput, ShellExecutor, ShellRegistry};
    use std::path::Path;
    use std::time::Duration;

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
                stdout: String::new(),
                stderr: String::new(),
                exit_code: Some(0),
            })
        }
    }

    fn test_router(gate: ScriptedGate) -> (Router, Arc<Session>, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = ShellRegistry::with_executors(
            Arc::new(SpyExecutor {
                platform: Platform::Bash,
                calls: Arc::clone(&calls),
            }),
            Arc::new(SpyExecutor {
                platform: Platform::PowerShell,
                calls: Arc::clone(&calls),
            }),
        );
        let dispatcher = Arc::new(TierDispatcher::new(
            Arc::new(gate),
            registry,
            Arc::new(AssumeYes),
            Duration::from_secs(5),
        ));
        let mut devices = HashMap::new();
        devices.insert("winbox".to_string(), Platform::PowerShell);
        let session = Arc::new(Session::new(
            PathBuf::from("/tmp"),
            TierTable::default(),
            devices,
        ));
        (Router::new(dispatcher), session, calls)
    }

    fn ctx(router_session: &Arc<Session>, input: &str) -> StrategyContext {
        StrategyContext::new(input, Platform::Bash, Arc::clone(router_session))
    }

    #[tokio::test]
    async fn test_pipe_vets_every_segment_and_executes_once() {
        let (router, session, calls) = test_router(ScriptedGate::permissive());
        let result = router
            .route(ctx(&session, "cat log.txt | grep error | wc -l"))
            .await;
        assert!(result.success);
        assert_eq!(result.strategy_used, "pipe");
        // One adapter call for the whole pipeline, none per segment.
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            ["cat log.txt | grep error | wc -l"]
        );
    }

    #[tokio::test]
    async fn test_pipe_with_lockdown_segment_rejects_whole_line() {
        let (router, session, calls) = test_router(ScriptedGate::permissive());
        let result = router.route(ctx(&session, "cat data | mkfs /dev/sda")).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("segment 2"));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pipe_takes_precedence_over_device_prefix() {
        let (router, session, _calls) = test_router(ScriptedGate::permissive());
        let result = router.route(ctx(&session, "@winbox dir | findstr x")).await;
        assert_eq!(result.strategy_used, "pipe");
    }

    #[tokio::test]
    async fn test_device_routes_to_the_registered_platform() {
        let (router, session, calls) = test_router(ScriptedGate::permissive());
        let result = router.route(ctx(&session, "@winbox get-childitem")).await;
        assert!(result.success);
        assert_eq!(result.strategy_used, "device_routing");
        assert_eq!(calls.lock().unwrap().as_slice(), ["get-childitem"]);
    }

    #[tokio::test]
    async fn test_unknown_device_rejects() {
        let (router, session, calls) = test_router(ScriptedGate::permissive());
        let result = router.route(ctx(&session, "@nosuch ls")).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("unknown device"));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_force_skips_validation_but_not_lockdown() {
        let (router, session, calls) = test_router(ScriptedGate::unavailable());
        // Tier 3 command, gate down: force still runs it.
        let result = router.route(ctx(&session, "!rm -rf build")).await;
        assert!(result.success);
        assert_eq!(result.strategy_used, "force_execution");
        assert_eq!(calls.lock().unwrap().as_slice(), ["rm -rf build"]);

        let result = router.route(ctx(&session, "!mkfs /dev/sda")).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("lockdown"));
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_meta_tier_set_swaps_the_snapshot() {
        let (router, session, _calls) = test_router(ScriptedGate::permissive());
        let before = session.table();
        assert_eq!(before.classify("deploy", Platform::Bash), Tier::AiValidate);

        let result = router.route(ctx(&session, ":tier set deploy 1")).await;
        assert!(result.success);
        assert_eq!(result.strategy_used, "meta");

        assert_eq!(session.table().classify("deploy", Platform::Bash), Tier::Instant);
        // The old snapshot is untouched.
        assert_eq!(before.classify("deploy", Platform::Bash), Tier::AiValidate);
    }

    #[tokio::test]
    async fn test_natural_language_never_executes() {
        let (router, session, calls) = test_router(ScriptedGate::permissive());
        let result = router.route(ctx(&session, "how do I list files?")).await;
        assert!(result.success);
        assert_eq!(result.strategy_used, "natural_language");
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cd_updates_the_session_cwd() {
        let (router, session, calls) = test_router(ScriptedGate::permissive());
        let result = router.route(ctx(&session, "cd /")).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(session.cwd(), PathBuf::from("/"));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cd_to_missing_directory_rejects() {
        let (router, session, _calls) = test_router(ScriptedGate::permissive());
        let result = router
            .route(ctx(&session, "cd /definitely/not/a/real/dir"))
            .await;
        assert!(!result.success);
        assert_eq!(session.cwd(), PathBuf::from("/tmp"));
    }

    #[tokio::test]
    async fn test_catch_all_applies_tier_dispatch() {
        let (router, session, calls) = test_router(ScriptedGate::permissive());
        let result = router.route(ctx(&session, "ls -la")).await;
        assert!(result.success);
        assert_eq!(result.strategy_used, "tier_execution");
        assert_eq!(result.tier_applied, Some(Tier::Instant));
        assert_eq!(calls.lock().unwrap().as_slice(), ["ls -la"]);
    }

    #[tokio::test]
    async fn test_confirmation_happens_inside_pipe_vetting() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = ShellRegistry::with_executors(
            Arc::new(SpyExecutor {
                platform: Platform::Bash,
                calls: Arc::clone(&calls),
            }),
            Arc::new(SpyExecutor {
                platform: Platform::PowerShell,
                calls: Arc::clone(&calls),
            }),
        );
        let confirmer = Arc::new(ScriptedConfirmer::new(false));
        let confirmer_dyn: Arc<dyn crate::execution::Confirmer> = confirmer.clone();
        let dispatcher = Arc::new(TierDispatcher::new(
            Arc::new(ScriptedGate::permissive()),
            registry,
            confirmer_dyn,
            Duration::from_secs(5),
        ));
        let session = Arc::new(Session::new(
            PathBuf::from("/tmp"),
            TierTable::default(),
            HashMap::new(),
        ));
        let router = Router::new(dispatcher);

        // mv is tier 2.5; declining its confirmation sinks the pipeline.
        let result = router
            .route(StrategyContext::new(
                "ls | mv a b",
                Platform::Bash,
                Arc::clone(&session),
            ))
            .await;
        assert!(!result.success);
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(confirmer.prompts.lock().unwrap().as_slice(), ["mv a b"]);
    }
}
