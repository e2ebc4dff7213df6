/// Incident lifecycle driven by the connection log
pub mod detector;

/// Exclusion policy rules and engine
pub mod exclusion;

pub use detector::{DetectionReport, IncidentDetector};
pub use exclusion::{
    ExclusionEngine, ExclusionReport, ExclusionRule, IsolationRule, MaintenanceRule, TransientRule,
};
