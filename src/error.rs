use thiserror::Error;

/// Errors raised by probe sources
///
/// A probe that runs and gets no answer is not an error; it yields an offline
/// sample. These variants cover the cases where the probe itself could not run.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Failed to spawn probe: {0}")]
    Spawn(String),

    #[error("Probe timed out after {0} ms")]
    Timeout(u64),

    #[error("Failed to parse probe output: {0}")]
    Parse(String),

    #[error("Device source unavailable: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the relational store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Errors raised while delivering alerts
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Failed to deliver message: {0}")]
    DeliveryFailed(String),

    #[error("No recipient matched: {0}")]
    NoRecipient(String),

    #[error("Gateway transport error: {0}")]
    Transport(String),
}

/// Errors from the HTTP gateway shared by the device API and the message channels
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("Gateway returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid gateway response: {0}")]
    Decode(String),

    #[error("Failed to start HTTP runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Errors from the job scheduler
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Job '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Scheduler is already started")]
    AlreadyStarted,

    #[error("Job '{job}' failed: {reason}")]
    JobFailed { job: String, reason: String },
}

/// Validation failures from record constructors
#[derive(Error, Debug, PartialEq)]
pub enum ModelError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Value out of range for {field}: {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("Invalid time window: end precedes start")]
    InvertedWindow,

    #[error("Unknown {kind} value: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("Invalid incident transition: {0}")]
    InvalidTransition(String),
}
