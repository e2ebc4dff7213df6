/// Store-backed monthly aggregation
pub mod aggregator;

/// Pure SLA arithmetic
pub mod calculator;

pub use aggregator::{AggregationReport, SlaAggregator};
pub use calculator::{classify, compute, discount_amount, sla_percentage};
