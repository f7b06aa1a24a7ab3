use crate::execution::CommandResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Stored entries beyond this count are dropped, oldest first.
const MAX_RECORDS: usize = 50;

/// Privacy-safe summary of one dispatch outcome. Only the command name
/// token is kept, never the full command text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub timestamp: DateTime<Utc>,
    pub command_name: Option<String>,
    pub tier: Option<String>,
    pub strategy: String,
    pub success: bool,
}

impl DispatchRecord {
    pub fn from_result(command_name: Option<String>, result: &CommandResult) -> Self {
        Self {
            timestamp: Utc::now(),
            command_name,
            tier: result.tier_applied.map(|t| t.to_string()),
            strategy: result.strategy_used.clone(),
            success: result.success,
        }
    }

    pub fn render_line(&self) -> String {
        format!(
            "{}  {:8}  tier {:3}  {:16}  {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            if self.success { "ok" } else { "rejected" },
            self.tier.as_deref().unwrap_or("-"),
            self.strategy,
            self.command_name.as_deref().unwrap_or("-"),
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    pub records: Vec<DispatchRecord>,
}

impl History {
    /// Load from disk; a missing or unreadable file is an empty history.
    pub fn load() -> Self {
        if let Some(path) = Self::history_path() {
            if path.exists() {
                if let Ok(content) = fs::read_to_string(&path) {
                    if let Ok(history) = serde_json::from_str::<History>(&content) {
                        return history;
                    }
                }
            }
        }
        History::default()
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::history_path()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut limited = self.clone();
        if limited.records.len() > MAX_RECORDS {
            limited.records = limited
                .records
                .split_off(limited.records.len() - MAX_RECORDS);
        }

        let content = serde_json::to_string_pretty(&limited)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn add(&mut self, record: DispatchRecord) {
        self.records.push(record);
        if self.records.len() > MAX_RECORDS {
            self.records = self.records.split_off(self.records.len() - MAX_RECORDS);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn history_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut path| {
            path.push("tiershell");
            path.push("history.json");
            path
        })
    }
}

/// Load the stored records for display.
pub fn load_default() -> anyhow::Result<Vec<DispatchRecord>> {
    Ok(History::load().records)
}

/// Append one outcome to the stored history.
pub fn append(command_name: Option<String>, result: &CommandResult) -> anyhow::Result<()> {
    let mut history = History::load();
    history.add(DispatchRecord::from_result(command_name, result));
    history.save()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, success: bool) -> DispatchRecord {
        DispatchRecord {
            timestamp: Utc::now(),
            command_name: Some(name.to_string()),
            tier: Some("1".to_string()),
            strategy: "tier_execution".to_string(),
            success,
        }
    }

    #[test]
    fn test_add_truncates_to_the_cap() {
        let mut history = History::default();
        for i in 0..60 {
            history.add(record(&format!("cmd{}", i), true));
        }
        assert_eq!(history.len(), MAX_RECORDS);
        assert_eq!(
            history.records[0].command_name.as_deref(),
            Some("cmd10")
        );
        assert_eq!(
            history.records.last().unwrap().command_name.as_deref(),
            Some("cmd59")
        );
    }

    #[test]
    fn test_record_keeps_name_token_only() {
        let result = CommandResult::rejected(
            "rejected by validation: destructive".to_string(),
            Some(crate::tiers::Tier::AiValidate),
            "tier_execution",
        );
        let record = DispatchRecord::from_result(Some("rm".to_string()), &result);
        assert_eq!(record.command_name.as_deref(), Some("rm"));
        assert_eq!(record.tier.as_deref(), Some("3"));
        assert!(!record.success);
        // The rendered line never shows arguments.
        assert!(record.render_line().contains("rm"));
        assert!(!record.render_line().contains("-rf"));
    }

    #[test]
    fn test_round_trips_through_json() {
        let mut history = History::default();
        history.add(record("ls", true));
        let json = serde_json::to_string(&history).unwrap();
        let loaded: History = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.records, history.records);
    }
}
