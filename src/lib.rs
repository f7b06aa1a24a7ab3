pub mod config;
pub mod error_handling;
pub mod execution;
pub mod gate;
pub mod history;
pub mod logging;
pub mod parser;
pub mod shell;
pub mod strategy;
pub mod tiers;

pub use config::Config;
pub use error_handling::DispatchError;
pub use execution::{CommandResult, TierDispatcher};
pub use gate::{HttpValidationGate, ValidationGate, ValidationVerdict};
pub use shell::{Platform, ShellRegistry};
pub use strategy::{Router, Session, StrategyContext};
pub use tiers::{Tier, TierTable};
