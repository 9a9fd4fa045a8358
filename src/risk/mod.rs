// Risk management: hard limits plus the emergency-stop state machine
pub mod limits;
pub mod manager;

pub use limits::{Denial, RiskLimits, TradeProposal};
pub use manager::RiskManager;
