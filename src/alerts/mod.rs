/// Message channels and text formatting
pub mod channels;

/// Critical root-cause escalation
pub mod escalation;

/// Per-key escalation cooldown
pub mod limiter;

/// Alert routing with delivery logging
pub mod router;

pub use channels::{sender_for, HttpGatewaySender, LogSender, MessageSender};
pub use escalation::{EscalationReport, Escalator};
pub use limiter::EscalationLimiter;
pub use router::AlertRouter;
