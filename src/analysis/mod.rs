/// Baseline deviation checks on incident rate, latency and packet loss
pub mod anomaly;

/// Impact tiers and cause hypotheses for downtime incidents
pub mod root_cause;

pub use anomaly::AnomalyDetector;
pub use root_cause::{
    Cause, Hypothesis, ImpactSeverity, ImpactTier, RootCauseAnalysis, RootCauseAnalyzer,
};
