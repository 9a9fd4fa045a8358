// Signal generation: rolling indicator window + vote aggregation
pub mod aggregator;
pub mod engine;

pub use aggregator::{AgreementPolicy, SignalAggregator};
pub use engine::{IndicatorConfig, IndicatorEngine};
