/// Session snapshots for PPPoE customers, batched per device
pub mod bandwidth_collector;

/// Connection log writer
pub mod log_writer;

/// ICMP liveness for static IP customers
pub mod ping_collector;

/// Probe sources (system ping, device API)
pub mod source;

mod pool;

pub use bandwidth_collector::BandwidthCollector;
pub use log_writer::LogWriter;
pub use ping_collector::PingCollector;
pub use source::{HttpSessionSource, PingReply, PingSource, SessionSnapshot, SessionSource, SystemPing};
