use crate::parser::ShellParser;
use crate::shell::Platform;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Safety tier governing how a command is handled before execution.
///
/// Strictly increasing in caution: `Instant` runs untouched, `Lockdown`
/// never runs through the normal pipeline. The derived `Ord` follows the
/// caution ordering, so `max()` over a pipeline's segments picks the most
/// cautious tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Tier 1: execute directly, unmodified
    #[serde(rename = "1")]
    Instant,
    /// Tier 2: auto-correct typos, then execute
    #[serde(rename = "2")]
    AutoCorrect,
    /// Tier 2.5: auto-correct, then require explicit confirmation
    #[serde(rename = "2.5")]
    AutoCorrectConfirm,
    /// Tier 3: require an external safety verdict before execution
    #[serde(rename = "3")]
    AiValidate,
    /// Tier 4: never executed through the normal pipeline
    #[serde(rename = "4")]
    Lockdown,
}

impl Tier {
    /// Numeric form used on the advisory wire.
    pub fn as_number(&self) -> f32 {
        match self {
            Tier::Instant => 1.0,
            Tier::AutoCorrect => 2.0,
            Tier::AutoCorrectConfirm => 2.5,
            Tier::AiValidate => 3.0,
            Tier::Lockdown => 4.0,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Tier::Instant => "1",
            Tier::AutoCorrect => "2",
            Tier::AutoCorrectConfirm => "2.5",
            Tier::AiValidate => "3",
            Tier::Lockdown => "4",
        };
        write!(f, "{}", label)
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(Tier::Instant),
            "2" => Ok(Tier::AutoCorrect),
            "2.5" => Ok(Tier::AutoCorrectConfirm),
            "3" => Ok(Tier::AiValidate),
            "4" => Ok(Tier::Lockdown),
            other => Err(format!("unknown tier '{}' (expected 1, 2, 2.5, 3 or 4)", other)),
        }
    }
}

/// A single classification rule: command name, optionally pinned to a
/// platform, mapped to a tier. Used both for built-in base rules and for
/// user overrides in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierRule {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    pub tier: Tier,
}

/// Pattern that escalates a whole input line to Lockdown regardless of
/// its first token. Reserved for catastrophic literals where waiting for
/// an advisory verdict is not acceptable.
#[derive(Debug, Clone)]
struct LockdownPattern {
    pattern: Regex,
    reason: String,
}

type RuleKey = (String, Option<Platform>);

/// Immutable tier table snapshot.
///
/// Built once at boot from built-in base rules merged with user
/// overrides (override wins). Never mutated in place: [`TierTable::with_override`]
/// and [`TierTable::without_override`] produce a new snapshot which the
/// session swaps in atomically.
#[derive(Debug, Clone)]
pub struct TierTable {
    base: HashMap<RuleKey, Tier>,
    overrides: HashMap<RuleKey, Tier>,
    lockdown_patterns: Vec<LockdownPattern>,
    parser: ShellParser,
}

/// Full classification outcome, including the command name that was
/// looked up and the lockdown escalation reason when one applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub tier: Tier,
    pub command_name: Option<String>,
    pub lockdown_reason: Option<String>,
}

impl TierTable {
    /// Build the boot snapshot: built-in base rules plus user overrides.
    pub fn new(user_overrides: &[TierRule]) -> Self {
        let mut base = HashMap::new();
        for (name, tier) in builtin_rules() {
            base.insert((name.to_string(), None), *tier);
        }

        let mut overrides = HashMap::new();
        for rule in user_overrides {
            overrides.insert((rule.command.to_lowercase(), rule.platform), rule.tier);
        }

        Self {
            base,
            overrides,
            lockdown_patterns: lockdown_patterns(),
            parser: ShellParser::new(),
        }
    }

    /// Classify a raw input line for a platform.
    ///
    /// Name-only classification: arguments never change the base tier
    /// (argument sensitivity is the advisory gate's job). The one
    /// exception is the lockdown pattern list, which escalates
    /// catastrophic literals to Tier 4 without consulting anything
    /// external. Empty or unparseable input classifies as Tier 3.
    pub fn classify(&self, line: &str, platform: Platform) -> Tier {
        self.classify_detailed(line, platform).tier
    }

    /// Like [`TierTable::classify`], but keeps the looked-up command name
    /// and the lockdown reason for the caller's result record.
    pub fn classify_detailed(&self, line: &str, platform: Platform) -> Classification {
        for lp in &self.lockdown_patterns {
            if lp.pattern.is_match(line) {
                return Classification {
                    tier: Tier::Lockdown,
                    command_name: self.parser.first_token(line),
                    lockdown_reason: Some(lp.reason.clone()),
                };
            }
        }

        let name = match self.parser.first_token(line) {
            Some(name) => name,
            // Fail-safe default, never Tier 1.
            None => {
                return Classification {
                    tier: Tier::AiValidate,
                    command_name: None,
                    lockdown_reason: None,
                }
            }
        };

        let tier = self
            .lookup(&self.overrides, &name, platform)
            .or_else(|| self.lookup(&self.base, &name, platform))
            .unwrap_or(Tier::AiValidate);

        Classification {
            tier,
            command_name: Some(name),
            lockdown_reason: None,
        }
    }

    /// Override lookup order: platform-specific entry, then any-platform.
    fn lookup(&self, rules: &HashMap<RuleKey, Tier>, name: &str, platform: Platform) -> Option<Tier> {
        rules
            .get(&(name.to_string(), Some(platform)))
            .or_else(|| rules.get(&(name.to_string(), None)))
            .copied()
    }

    /// Produce a new snapshot with one additional user override.
    pub fn with_override(&self, command: &str, platform: Option<Platform>, tier: Tier) -> Self {
        let mut next = self.clone();
        next.overrides.insert((command.to_lowercase(), platform), tier);
        next
    }

    /// Produce a new snapshot with a user override removed.
    pub fn without_override(&self, command: &str, platform: Option<Platform>) -> Self {
        let mut next = self.clone();
        next.overrides.remove(&(command.to_lowercase(), platform));
        next
    }

    /// User overrides as serializable rules, for `tier show` and for
    /// persisting back into the config file.
    pub fn override_rules(&self) -> Vec<TierRule> {
        let mut rules: Vec<TierRule> = self
            .overrides
            .iter()
            .map(|((command, platform), tier)| TierRule {
                command: command.clone(),
                platform: *platform,
                tier: *tier,
            })
            .collect();
        rules.sort_by(|a, b| a.command.cmp(&b.command));
        rules
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self::new(&[])
    }
}

/// Built-in base rules, all platform-neutral so that alias-equivalent
/// command names carry the same tier on bash and PowerShell.
fn builtin_rules() -> &'static [(&'static str, Tier)] {
    &[
        // Read-only, side-effect free
        ("ls", Tier::Instant),
        ("dir", Tier::Instant),
        ("get-childitem", Tier::Instant),
        ("pwd", Tier::Instant),
        ("get-location", Tier::Instant),
        ("echo", Tier::Instant),
        ("write-output", Tier::Instant),
        ("cat", Tier::Instant),
        ("get-content", Tier::Instant),
        ("head", Tier::Instant),
        ("tail", Tier::Instant),
        ("wc", Tier::Instant),
        ("whoami", Tier::Instant),
        ("date", Tier::Instant),
        ("get-date", Tier::Instant),
        ("hostname", Tier::Instant),
        ("uptime", Tier::Instant),
        ("uname", Tier::Instant),
        ("which", Tier::Instant),
        // Typo-prone everyday tools, safe to run once spelled right
        ("git", Tier::AutoCorrect),
        ("grep", Tier::AutoCorrect),
        ("select-string", Tier::AutoCorrect),
        ("find", Tier::AutoCorrect),
        ("ps", Tier::AutoCorrect),
        ("get-process", Tier::AutoCorrect),
        ("df", Tier::AutoCorrect),
        ("du", Tier::AutoCorrect),
        ("ping", Tier::AutoCorrect),
        ("cargo", Tier::AutoCorrect),
        ("make", Tier::AutoCorrect),
        // Mutating but routine; corrected then confirmed
        ("mv", Tier::AutoCorrectConfirm),
        ("move-item", Tier::AutoCorrectConfirm),
        ("cp", Tier::AutoCorrectConfirm),
        ("copy-item", Tier::AutoCorrectConfirm),
        ("mkdir", Tier::AutoCorrectConfirm),
        ("new-item", Tier::AutoCorrectConfirm),
        ("touch", Tier::AutoCorrectConfirm),
        ("chmod", Tier::AutoCorrectConfirm),
        ("chown", Tier::AutoCorrectConfirm),
        ("kill", Tier::AutoCorrectConfirm),
        ("killall", Tier::AutoCorrectConfirm),
        ("stop-process", Tier::AutoCorrectConfirm),
        ("tar", Tier::AutoCorrectConfirm),
        // Destructive or network-fetching; advisory verdict required
        ("rm", Tier::AiValidate),
        ("remove-item", Tier::AiValidate),
        ("rmdir", Tier::AiValidate),
        ("dd", Tier::AiValidate),
        ("ln", Tier::AiValidate),
        ("truncate", Tier::AiValidate),
        ("curl", Tier::AiValidate),
        ("wget", Tier::AiValidate),
        ("invoke-webrequest", Tier::AiValidate),
        // Never through the normal pipeline
        ("mkfs", Tier::Lockdown),
        ("fdisk", Tier::Lockdown),
        ("parted", Tier::Lockdown),
        ("shred", Tier::Lockdown),
        ("format", Tier::Lockdown),
        ("clear-disk", Tier::Lockdown),
    ]
}

/// Catastrophic literals that skip name lookup entirely.
fn lockdown_patterns() -> Vec<LockdownPattern> {
    vec![
        LockdownPattern {
            pattern: Regex::new(r"^rm\s+(-[a-zA-Z]*\s+)*(-[a-zA-Z]*[rR][a-zA-Z]*\s+)+/\s*$").unwrap(),
            reason: "recursive removal of the filesystem root".to_string(),
        },
        LockdownPattern {
            pattern: Regex::new(r"rm\s+-rf\s+/\s*$").unwrap(),
            reason: "recursive removal of the filesystem root".to_string(),
        },
        LockdownPattern {
            pattern: Regex::new(r":\(\)\s*\{.*:\s*\|.*:\s*&.*\}.*:").unwrap(),
            reason: "fork bomb".to_string(),
        },
        LockdownPattern {
            pattern: Regex::new(r"dd\s+.*of=/dev/(sd[a-z]|nvme[0-9]|disk[0-9])").unwrap(),
            reason: "raw write to a block device".to_string(),
        },
        LockdownPattern {
            pattern: Regex::new(r"^mkfs(\.|\s)").unwrap(),
            reason: "filesystem creation destroys existing data".to_string(),
        },
    ]
}
