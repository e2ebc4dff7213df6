/// Operator write paths and read accessors
pub mod admin;

/// Alert routing, channels and escalation
pub mod alerts;

/// Anomaly detection and root-cause analysis
pub mod analysis;

/// Probe collectors and the connection log writer
pub mod collectors;

/// Configuration management
pub mod config;

/// Error types for the engine
pub mod error;

/// Blocking HTTP client shared by the device API and message gateways
pub mod gateway;

/// Incident detection and exclusion policy
pub mod incidents;

/// Typed records
pub mod model;

/// Periodic jobs
pub mod scheduler;

/// Monthly SLA computation
pub mod sla;

/// SQLite-backed store
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use error::{AlertError, ConfigError, GatewayError, ModelError, ProbeError, SchedulerError, StoreError};
pub use store::Store;
