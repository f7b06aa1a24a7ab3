use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;

use tiershell::config::Config;
use tiershell::error_handling::{display_error, display_info, display_success};
use tiershell::execution::{AssumeYes, Confirmer, TerminalConfirmer, TierDispatcher};
use tiershell::gate::HttpValidationGate;
use tiershell::history;
use tiershell::logging::init_logger;
use tiershell::parser::ShellParser;
use tiershell::shell::{home_dir, Platform, ShellRegistry};
use tiershell::strategy::{Router, Session, StrategyContext};
use tiershell::tiers::{Tier, TierRule, TierTable};

#[derive(Parser)]
#[command(name = "tiershell")]
#[command(version = "0.1.0")]
#[command(about = "Safety-tiered command dispatcher")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// The command line to dispatch
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    input: Vec<String>,

    /// Target platform (bash or powershell); detected when omitted
    #[arg(long, global = true)]
    platform: Option<String>,

    /// Answer every confirmation prompt with yes (scripted use)
    #[arg(long)]
    yes: bool,

    /// Classify and validate without executing anything
    #[arg(long)]
    vet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current configuration
    Config,
    /// Inspect or change persisted tier overrides
    Tier {
        #[command(subcommand)]
        action: TierAction,
    },
    /// Show recent dispatch history
    History,
}

#[derive(Subcommand)]
enum TierAction {
    /// List persisted tier overrides
    Show,
    /// Set a tier override for a command name
    Set {
        /// Command name (first token) the override applies to
        name: String,
        /// Tier: 1, 2, 2.5, 3 or 4
        tier: String,
        /// Restrict the override to one platform
        #[arg(long)]
        platform: Option<String>,
    },
    /// Remove a tier override
    Unset {
        /// Command name the override applies to
        name: String,
        /// Platform the override was restricted to
        #[arg(long)]
        platform: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = init_logger() {
        eprintln!("Warning: Failed to initialize logger: {}", e);
    }

    let cli = Cli::parse();
    let mut config = Config::load();

    match cli.command {
        Some(Commands::Config) => {
            show_config(&config);
            Ok(())
        }
        Some(Commands::Tier { action }) => run_tier_action(&mut config, action),
        Some(Commands::History) => {
            for record in history::load_default()?.iter().rev().take(20) {
                println!("{}", record.render_line());
            }
            Ok(())
        }
        None => {
            let line = cli.input.join(" ");
            if line.trim().is_empty() {
                println!("{}", "tiershell".bold().cyan());
                println!("Usage: tiershell <command line>   (see --help for subcommands)");
                return Ok(());
            }
            dispatch_line(&line, &config, cli.platform.as_deref(), cli.yes, cli.vet).await
        }
    }
}

fn show_config(config: &Config) {
    println!("gate_url: {}", config.gate_url);
    println!("gate_timeout_ms: {}", config.gate_timeout_ms);
    println!("shell_timeout_ms: {}", config.shell_timeout_ms);
    println!("assume_yes: {}", config.assume_yes);

    let mut devices: Vec<_> = config.devices.iter().collect();
    devices.sort_by_key(|(name, _)| name.as_str());
    println!("devices:");
    if devices.is_empty() {
        println!("  (none)");
    }
    for (name, platform) in devices {
        println!("  @{} -> {}", name, platform);
    }

    println!("tier overrides:");
    if config.tier_overrides.is_empty() {
        println!("  (none)");
    }
    for rule in &config.tier_overrides {
        let platform = rule
            .platform
            .map(|p| p.to_string())
            .unwrap_or_else(|| "any".to_string());
        println!("  {} -> {} [{}]", rule.command, rule.tier, platform);
    }
}

fn run_tier_action(config: &mut Config, action: TierAction) -> Result<()> {
    match action {
        TierAction::Show => {
            let table = TierTable::new(&config.tier_overrides);
            let overrides = table.override_rules();
            if overrides.is_empty() {
                println!("(no overrides; built-in rules apply)");
            }
            for rule in overrides {
                let platform = rule
                    .platform
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "any".to_string());
                println!("{} -> {} [{}]", rule.command, rule.tier, platform);
            }
            Ok(())
        }
        TierAction::Set {
            name,
            tier,
            platform,
        } => {
            let tier: Tier = tier.parse().map_err(|e: String| anyhow!(e))?;
            let platform = parse_platform(platform.as_deref())?;
            config
                .tier_overrides
                .retain(|rule| !(rule.command == name.to_lowercase() && rule.platform == platform));
            config.tier_overrides.push(TierRule {
                command: name.to_lowercase(),
                platform,
                tier,
            });
            config.save()?;
            display_success(&format!("override set: {} -> tier {}", name, tier));
            Ok(())
        }
        TierAction::Unset { name, platform } => {
            let platform = parse_platform(platform.as_deref())?;
            let before = config.tier_overrides.len();
            config
                .tier_overrides
                .retain(|rule| !(rule.command == name.to_lowercase() && rule.platform == platform));
            if config.tier_overrides.len() == before {
                return Err(anyhow!("no override for '{}'", name));
            }
            config.save()?;
            display_success(&format!("override removed: {}", name));
            Ok(())
        }
    }
}

fn parse_platform(raw: Option<&str>) -> Result<Option<Platform>> {
    match raw {
        Some(s) => s.parse::<Platform>().map(Some).map_err(|e| anyhow!(e)),
        None => Ok(None),
    }
}

async fn dispatch_line(
    line: &str,
    config: &Config,
    platform: Option<&str>,
    assume_yes: bool,
    vet: bool,
) -> Result<()> {
    let platform = match platform {
        Some(s) => s.parse::<Platform>().map_err(|e| anyhow!(e))?,
        None => Platform::detect(),
    };

    let gate = HttpValidationGate::new(&config.gate_url, config.gate_timeout())?;
    let confirmer: Arc<dyn Confirmer> = if assume_yes || config.assume_yes {
        Arc::new(AssumeYes)
    } else {
        Arc::new(TerminalConfirmer)
    };
    let dispatcher = Arc::new(TierDispatcher::new(
        Arc::new(gate),
        ShellRegistry::new(),
        confirmer,
        config.shell_timeout(),
    ));
    let router = Router::new(dispatcher);

    let cwd = std::env::current_dir().unwrap_or_else(|_| home_dir());
    let session = Arc::new(Session::new(
        cwd,
        TierTable::new(&config.tier_overrides),
        config.devices.clone(),
    ));

    let mut ctx = StrategyContext::new(line, platform, Arc::clone(&session));
    if vet {
        ctx = ctx.vetting();
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈")
            .template("{spinner:.cyan} {msg}")?,
    );
    pb.set_message("Dispatching...");
    pb.enable_steady_tick(std::time::Duration::from_millis(100));

    let result = router.route(ctx).await;
    pb.finish_and_clear();

    let command_name = ShellParser::new().first_token(line);
    if let Err(e) = history::append(command_name, &result) {
        eprintln!("Warning: Failed to record history: {}", e);
    }

    if let Some(corrected) = &result.ai_corrected {
        display_info(&format!("ran corrected command: {}", corrected));
    }
    if let Some(verdict) = &result.ai_validation {
        for warning in &verdict.warnings {
            eprintln!("{} {}", "warning:".bold().yellow(), warning);
        }
    }

    if !result.output.is_empty() {
        print!("{}", result.output);
        if !result.output.ends_with('\n') {
            println!();
        }
    }

    // An executed command's stderr passes through untouched; only
    // dispatcher rejections get the rendered error treatment.
    match (&result.error, result.exit_code) {
        (Some(stderr), Some(_)) => {
            eprint!("{}", stderr);
            if !stderr.ends_with('\n') {
                eprintln!();
            }
        }
        (Some(message), None) => display_error(message, &[]),
        _ => {}
    }

    if result.success {
        if vet {
            display_success(&format!(
                "approved at tier {} via {}",
                result
                    .tier_applied
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                result.strategy_used
            ));
        }
        std::process::exit(result.exit_code.unwrap_or(0));
    }
    std::process::exit(result.exit_code.unwrap_or(1));
}
