//! Core record types for the availability and SLA engine
//!
//! Every record that crosses a component boundary is defined here. Records are
//! `#[non_exhaustive]` so code outside this crate can read their fields but
//! must go through the validated constructors to build one.

use crate::error::ModelError;
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Timestamp type for consistent time handling across the engine
pub type Timestamp = DateTime<Utc>;

/// Declares a unit enum with a stable lowercase text form used by the store.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ModelError::UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

text_enum!(
    /// How the customer is connected
    ServiceType, "service_type" { Pppoe => "pppoe", StaticIp => "static_ip" }
);

text_enum!(
    /// Liveness result of one probe cycle
    LinkStatus, "status" { Online => "online", Offline => "offline" }
);

text_enum!(IncidentType, "incident_type" {
    Downtime => "downtime",
    Degraded => "degraded",
    Maintenance => "maintenance",
});

text_enum!(
    /// Incident lifecycle state; `Resolved` and `Excluded` are terminal
    IncidentStatus, "incident_status" {
        Ongoing => "ongoing",
        Resolved => "resolved",
        Excluded => "excluded",
    }
);

text_enum!(ExcludeReason, "exclude_reason" {
    Transient => "transient",
    Maintenance => "maintenance",
    Isolated => "isolated",
    Manual => "manual",
});

text_enum!(SlaStatus, "sla_status" { Met => "met", Warning => "warning", Breach => "breach" });

text_enum!(AnomalySeverity, "anomaly_severity" { Major => "major", Critical => "critical" });

text_enum!(AnomalyMetric, "metric" {
    IncidentRate => "incident_rate",
    Latency => "latency",
    PacketLoss => "packet_loss",
});

text_enum!(AlertType, "alert_type" { Critical => "critical", Warning => "warning", Info => "info" });

text_enum!(RecipientType, "recipient_type" { Internal => "internal", Customer => "customer" });

text_enum!(DeliveryStatus, "delivery_status" { Sent => "sent", Failed => "failed" });

/// Round a span to whole minutes, half away from zero
pub fn minutes_between(start: Timestamp, end: Timestamp) -> i64 {
    let seconds = (end - start).num_seconds().max(0);
    (seconds as f64 / 60.0).round() as i64
}

fn require(value: &str, field: &'static str) -> Result<(), ModelError> {
    if value.trim().is_empty() {
        Err(ModelError::MissingField(field))
    } else {
        Ok(())
    }
}

/// One probe outcome for one customer at one instant
///
/// Append-only: written once by a collector, never updated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[non_exhaustive]
pub struct ConnectionLogEntry {
    pub customer_id: String,
    pub service_type: ServiceType,
    pub timestamp: Timestamp,
    pub status: LinkStatus,
    pub response_time_ms: Option<f64>,
    pub packet_loss_percent: Option<f64>,
    pub bytes_in: Option<u64>,
    pub bytes_out: Option<u64>,
}

impl ConnectionLogEntry {
    fn new(
        customer_id: impl Into<String>,
        service_type: ServiceType,
        timestamp: Timestamp,
        status: LinkStatus,
    ) -> Result<Self, ModelError> {
        let customer_id = customer_id.into();
        require(&customer_id, "customer_id")?;
        Ok(Self {
            customer_id,
            service_type,
            timestamp,
            status,
            response_time_ms: None,
            packet_loss_percent: None,
            bytes_in: None,
            bytes_out: None,
        })
    }

    pub fn online(
        customer_id: impl Into<String>,
        service_type: ServiceType,
        timestamp: Timestamp,
    ) -> Result<Self, ModelError> {
        Self::new(customer_id, service_type, timestamp, LinkStatus::Online)
    }

    pub fn offline(
        customer_id: impl Into<String>,
        service_type: ServiceType,
        timestamp: Timestamp,
    ) -> Result<Self, ModelError> {
        Self::new(customer_id, service_type, timestamp, LinkStatus::Offline)
    }

    /// Attach ping measurements. Loss must be a percentage in 0..=100.
    pub fn with_ping(
        mut self,
        response_time_ms: Option<f64>,
        packet_loss_percent: f64,
    ) -> Result<Self, ModelError> {
        if !(0.0..=100.0).contains(&packet_loss_percent) {
            return Err(ModelError::OutOfRange {
                field: "packet_loss_percent",
                value: packet_loss_percent,
            });
        }
        if let Some(rtt) = response_time_ms {
            if !rtt.is_finite() || rtt < 0.0 {
                return Err(ModelError::OutOfRange {
                    field: "response_time_ms",
                    value: rtt,
                });
            }
        }
        self.response_time_ms = response_time_ms;
        self.packet_loss_percent = Some(packet_loss_percent);
        Ok(self)
    }

    pub fn with_counters(mut self, bytes_in: u64, bytes_out: u64) -> Self {
        self.bytes_in = Some(bytes_in);
        self.bytes_out = Some(bytes_out);
        self
    }

    pub fn is_offline(&self) -> bool {
        self.status == LinkStatus::Offline
    }
}

/// A bounded period during which a customer's service was down or degraded
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[non_exhaustive]
pub struct Incident {
    pub id: i64,
    pub customer_id: String,
    pub service_type: ServiceType,
    pub incident_type: IncidentType,
    pub start_time: Timestamp,
    pub end_time: Option<Timestamp>,
    pub duration_minutes: i64,
    pub status: IncidentStatus,
    pub exclude_reason: Option<ExcludeReason>,
    pub is_counted_in_sla: bool,
}

impl Incident {
    /// A freshly detected downtime incident, not yet persisted (`id == 0`)
    pub fn open_downtime(
        customer_id: impl Into<String>,
        service_type: ServiceType,
        start_time: Timestamp,
    ) -> Result<Self, ModelError> {
        let customer_id = customer_id.into();
        require(&customer_id, "customer_id")?;
        Ok(Self {
            id: 0,
            customer_id,
            service_type,
            incident_type: IncidentType::Downtime,
            start_time,
            end_time: None,
            duration_minutes: 0,
            status: IncidentStatus::Ongoing,
            exclude_reason: None,
            is_counted_in_sla: true,
        })
    }

    pub fn is_ongoing(&self) -> bool {
        self.status == IncidentStatus::Ongoing
    }

    pub fn is_excluded(&self) -> bool {
        self.status == IncidentStatus::Excluded
    }

    /// End of the incident's window, or `now` while it is still open
    pub fn effective_end(&self, now: Timestamp) -> Timestamp {
        self.end_time.unwrap_or(now)
    }

    pub fn overlaps(&self, start: Timestamp, end: Timestamp, now: Timestamp) -> bool {
        self.start_time < end && self.effective_end(now) > start
    }

    /// ongoing -> resolved
    pub fn resolve(&mut self, now: Timestamp) -> Result<(), ModelError> {
        if self.status != IncidentStatus::Ongoing {
            return Err(ModelError::InvalidTransition(format!(
                "{} -> resolved",
                self.status
            )));
        }
        self.close(now);
        self.status = IncidentStatus::Resolved;
        Ok(())
    }

    /// ongoing|resolved -> excluded
    ///
    /// Excluding an ongoing incident closes it at `now`.
    pub fn exclude(&mut self, reason: ExcludeReason, now: Timestamp) -> Result<(), ModelError> {
        if self.status == IncidentStatus::Excluded {
            return Err(ModelError::InvalidTransition(
                "excluded -> excluded".to_string(),
            ));
        }
        if self.status == IncidentStatus::Ongoing {
            self.close(now);
        }
        self.status = IncidentStatus::Excluded;
        self.exclude_reason = Some(reason);
        self.is_counted_in_sla = false;
        Ok(())
    }

    fn close(&mut self, now: Timestamp) {
        let end = now.max(self.start_time);
        self.end_time = Some(end);
        self.duration_minutes = minutes_between(self.start_time, end);
    }
}

/// Calendar month an SLA record covers, rendered as `YYYY-MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MonthYear {
    year: i32,
    month: u32,
}

impl MonthYear {
    pub fn new(year: i32, month: u32) -> Result<Self, ModelError> {
        if !(1..=12).contains(&month) {
            return Err(ModelError::OutOfRange {
                field: "month",
                value: month as f64,
            });
        }
        Ok(Self { year, month })
    }

    pub fn containing(ts: Timestamp) -> Self {
        Self {
            year: ts.year(),
            month: ts.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn previous(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn start(&self) -> Timestamp {
        Utc.with_ymd_and_hms(self.year, self.month, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    pub fn end(&self) -> Timestamp {
        self.next().start()
    }

    pub fn days(&self) -> u32 {
        let first = NaiveDate::from_ymd_opt(self.year, self.month, 1);
        let next = self.next();
        let following = NaiveDate::from_ymd_opt(next.year, next.month, 1);
        match (first, following) {
            (Some(a), Some(b)) => (b - a).num_days() as u32,
            _ => 30,
        }
    }

    pub fn total_minutes(&self) -> f64 {
        f64::from(self.days()) * 1440.0
    }
}

impl fmt::Display for MonthYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthYear {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || ModelError::UnknownVariant {
            kind: "month_year",
            value: s.to_string(),
        };
        let (year, month) = s.trim().split_once('-').ok_or_else(unknown)?;
        let year = year.parse::<i32>().map_err(|_| unknown())?;
        let month = month.parse::<u32>().map_err(|_| unknown())?;
        Self::new(year, month)
    }
}

/// Monthly availability figures for one customer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[non_exhaustive]
pub struct SlaRecord {
    pub customer_id: String,
    pub month_year: MonthYear,
    pub total_minutes: f64,
    pub downtime_minutes: f64,
    pub excluded_downtime_minutes: f64,
    pub counted_downtime_minutes: f64,
    pub sla_percentage: f64,
    pub sla_target: f64,
    pub sla_status: SlaStatus,
    pub incident_count: u32,
    pub discount_amount: f64,
    pub discount_approved: bool,
}

impl SlaRecord {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        customer_id: String,
        month_year: MonthYear,
        total_minutes: f64,
        downtime_minutes: f64,
        excluded_downtime_minutes: f64,
        sla_percentage: f64,
        sla_target: f64,
        sla_status: SlaStatus,
        incident_count: u32,
        discount_amount: f64,
    ) -> Self {
        Self {
            customer_id,
            month_year,
            total_minutes,
            downtime_minutes,
            excluded_downtime_minutes,
            counted_downtime_minutes: downtime_minutes - excluded_downtime_minutes,
            sla_percentage,
            sla_target,
            sla_status,
            incident_count,
            discount_amount,
            discount_approved: false,
        }
    }
}

/// A metric reading that left its normal range
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[non_exhaustive]
pub struct Anomaly {
    pub timestamp: Timestamp,
    pub metric: AnomalyMetric,
    pub current_value: f64,
    pub normal_range: (f64, f64),
    pub anomaly_score: f64,
    pub severity: AnomalySeverity,
}

impl Anomaly {
    pub fn new(
        timestamp: Timestamp,
        metric: AnomalyMetric,
        current_value: f64,
        normal_range: (f64, f64),
        anomaly_score: f64,
        severity: AnomalySeverity,
    ) -> Result<Self, ModelError> {
        if normal_range.1 < normal_range.0 {
            return Err(ModelError::InvertedWindow);
        }
        if !current_value.is_finite() {
            return Err(ModelError::OutOfRange {
                field: "current_value",
                value: current_value,
            });
        }
        Ok(Self {
            timestamp,
            metric,
            current_value,
            normal_range,
            anomaly_score: anomaly_score.clamp(0.0, 100.0),
            severity,
        })
    }
}

/// Who on the staff side should receive an internal alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StaffTarget {
    /// A single channel identifier
    Direct(String),
    /// Every active staff member with the role, optionally limited to one area
    Role { role: String, area: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    Staff(StaffTarget),
    Customer(String),
}

/// A message to be routed to staff or to a customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Alert {
    pub alert_type: AlertType,
    pub recipient: Recipient,
    pub title: String,
    pub body: String,
    pub metadata: BTreeMap<String, String>,
}

impl Alert {
    fn new(
        alert_type: AlertType,
        recipient: Recipient,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self, ModelError> {
        let title = title.into();
        require(&title, "title")?;
        Ok(Self {
            alert_type,
            recipient,
            title,
            body: body.into(),
            metadata: BTreeMap::new(),
        })
    }

    pub fn to_role(
        alert_type: AlertType,
        role: impl Into<String>,
        area: Option<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self, ModelError> {
        let role = role.into();
        require(&role, "role")?;
        Self::new(
            alert_type,
            Recipient::Staff(StaffTarget::Role { role, area }),
            title,
            body,
        )
    }

    pub fn to_staff_member(
        alert_type: AlertType,
        channel_id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self, ModelError> {
        let channel_id = channel_id.into();
        require(&channel_id, "channel_id")?;
        Self::new(
            alert_type,
            Recipient::Staff(StaffTarget::Direct(channel_id)),
            title,
            body,
        )
    }

    pub fn to_customer(
        alert_type: AlertType,
        customer_id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self, ModelError> {
        let customer_id = customer_id.into();
        require(&customer_id, "customer_id")?;
        Self::new(alert_type, Recipient::Customer(customer_id), title, body)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn recipient_type(&self) -> RecipientType {
        match self.recipient {
            Recipient::Staff(_) => RecipientType::Internal,
            Recipient::Customer(_) => RecipientType::Customer,
        }
    }
}

/// Audit row written for every delivery attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct AlertLog {
    pub id: i64,
    pub alert_type: AlertType,
    pub recipient_type: RecipientType,
    pub channel: String,
    pub recipient_identifier: String,
    pub title: String,
    pub delivery_status: DeliveryStatus,
    pub error: Option<String>,
    pub sent_at: Timestamp,
}

/// A monitored customer as seen by the customer registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub customer_id: String,
    pub name: String,
    pub service_type: ServiceType,
    /// Address pinged for static IP customers
    pub probe_address: Option<String>,
    /// Device holding the customer's PPPoE session
    pub device_id: Option<String>,
    pub session_name: Option<String>,
    /// Shared upstream (OLT, ODP, distribution router) used to group outages
    pub aggregation_point: Option<String>,
    pub service_area: Option<String>,
    pub channel_id: Option<String>,
    pub sla_target: Option<f64>,
    pub monthly_fee: f64,
    /// Billing isolation for non-payment
    pub isolated: bool,
    pub active: bool,
}

impl Customer {
    pub fn new(
        customer_id: impl Into<String>,
        name: impl Into<String>,
        service_type: ServiceType,
    ) -> Result<Self, ModelError> {
        let customer_id = customer_id.into();
        require(&customer_id, "customer_id")?;
        Ok(Self {
            customer_id,
            name: name.into(),
            service_type,
            probe_address: None,
            device_id: None,
            session_name: None,
            aggregation_point: None,
            service_area: None,
            channel_id: None,
            sla_target: None,
            monthly_fee: 0.0,
            isolated: false,
            active: true,
        })
    }
}

/// An approved planned-maintenance window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct MaintenanceWindow {
    pub id: i64,
    pub title: String,
    pub start: Timestamp,
    pub end: Timestamp,
    pub customer_ids: Vec<String>,
}

impl MaintenanceWindow {
    pub fn new(
        title: impl Into<String>,
        start: Timestamp,
        end: Timestamp,
        customer_ids: Vec<String>,
    ) -> Result<Self, ModelError> {
        if end <= start {
            return Err(ModelError::InvertedWindow);
        }
        Ok(Self {
            id: 0,
            title: title.into(),
            start,
            end,
            customer_ids,
        })
    }

    pub fn affects(&self, customer_id: &str) -> bool {
        self.customer_ids.iter().any(|id| id == customer_id)
    }

    pub fn overlaps(&self, start: Timestamp, end: Timestamp) -> bool {
        self.start < end && self.end > start
    }
}

/// An active staff member reachable on the internal channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffMember {
    pub name: String,
    pub role: String,
    pub service_area: Option<String>,
    pub channel_id: String,
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(h: u32, m: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 5, h, m, 0).unwrap()
    }

    #[test]
    fn test_log_entry_requires_customer() {
        let result = ConnectionLogEntry::online("  ", ServiceType::Pppoe, at(10, 0));
        assert_eq!(result.unwrap_err(), ModelError::MissingField("customer_id"));
    }

    #[test]
    fn test_log_entry_rejects_loss_out_of_range() {
        let entry = ConnectionLogEntry::online("c1", ServiceType::StaticIp, at(10, 0)).unwrap();
        assert!(entry.clone().with_ping(Some(12.0), 140.0).is_err());
        assert!(entry.clone().with_ping(Some(-1.0), 0.0).is_err());
        let ok = entry.with_ping(Some(12.5), 0.0).unwrap();
        assert_eq!(ok.response_time_ms, Some(12.5));
        assert_eq!(ok.packet_loss_percent, Some(0.0));
    }

    #[test]
    fn test_text_enum_round_trip() {
        assert_eq!("static_ip".parse::<ServiceType>().unwrap(), ServiceType::StaticIp);
        assert_eq!(IncidentStatus::Excluded.to_string(), "excluded");
        assert!("sideways".parse::<LinkStatus>().is_err());
    }

    #[test]
    fn test_incident_resolve_rounds_duration() {
        let mut incident = Incident::open_downtime("c1", ServiceType::Pppoe, at(10, 0)).unwrap();
        let end = at(10, 45) + Duration::seconds(29);
        incident.resolve(end).unwrap();
        assert_eq!(incident.status, IncidentStatus::Resolved);
        assert_eq!(incident.duration_minutes, 45);
        assert!(incident.is_counted_in_sla);

        let mut other = Incident::open_downtime("c1", ServiceType::Pppoe, at(10, 0)).unwrap();
        other.resolve(at(10, 0) + Duration::seconds(90)).unwrap();
        assert_eq!(other.duration_minutes, 2);
    }

    #[test]
    fn test_incident_transitions_are_one_directional() {
        let mut incident = Incident::open_downtime("c1", ServiceType::Pppoe, at(10, 0)).unwrap();
        incident.resolve(at(10, 10)).unwrap();
        assert!(incident.resolve(at(10, 20)).is_err());

        incident.exclude(ExcludeReason::Transient, at(10, 30)).unwrap();
        assert_eq!(incident.duration_minutes, 10);
        assert_eq!(incident.end_time, Some(at(10, 10)));
        assert!(!incident.is_counted_in_sla);
        assert!(incident.exclude(ExcludeReason::Manual, at(10, 40)).is_err());
    }

    #[test]
    fn test_excluding_ongoing_incident_closes_it() {
        let mut incident = Incident::open_downtime("c1", ServiceType::Pppoe, at(9, 0)).unwrap();
        incident.exclude(ExcludeReason::Maintenance, at(9, 40)).unwrap();
        assert_eq!(incident.end_time, Some(at(9, 40)));
        assert_eq!(incident.duration_minutes, 40);
        assert_eq!(incident.exclude_reason, Some(ExcludeReason::Maintenance));
    }

    #[test]
    fn test_month_year_calendar_math() {
        let jan: MonthYear = "2024-01".parse().unwrap();
        assert_eq!(jan.days(), 31);
        assert_eq!(jan.total_minutes(), 44_640.0);
        assert_eq!(jan.previous().to_string(), "2023-12");
        assert_eq!("2024-02".parse::<MonthYear>().unwrap().days(), 29);
        assert_eq!("2023-02".parse::<MonthYear>().unwrap().days(), 28);
        assert_eq!(MonthYear::new(2024, 12).unwrap().end(), Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        assert!("2024-13".parse::<MonthYear>().is_err());
        assert!("march".parse::<MonthYear>().is_err());
    }

    #[test]
    fn test_alert_constructors() {
        let alert = Alert::to_role(AlertType::Critical, "noc", None, "Mass outage", "body")
            .unwrap()
            .with_metadata("aggregation_point", "olt-1");
        assert_eq!(alert.recipient_type(), RecipientType::Internal);
        assert_eq!(alert.metadata["aggregation_point"], "olt-1");

        let customer = Alert::to_customer(AlertType::Info, "c9", "Restored", "").unwrap();
        assert_eq!(customer.recipient_type(), RecipientType::Customer);

        assert!(Alert::to_role(AlertType::Info, "", None, "t", "b").is_err());
        assert!(Alert::to_customer(AlertType::Info, "c9", " ", "b").is_err());
    }

    #[test]
    fn test_maintenance_window_validation() {
        assert_eq!(
            MaintenanceWindow::new("fiber splice", at(11, 0), at(10, 0), vec![]).unwrap_err(),
            ModelError::InvertedWindow
        );
        let window =
            MaintenanceWindow::new("fiber splice", at(10, 0), at(12, 0), vec!["c1".into()]).unwrap();
        assert!(window.affects("c1"));
        assert!(!window.affects("c2"));
        assert!(window.overlaps(at(11, 30), at(13, 0)));
        assert!(!window.overlaps(at(12, 0), at(13, 0)));
    }

    #[test]
    fn test_anomaly_score_is_clamped() {
        let anomaly = Anomaly::new(
            at(10, 0),
            AnomalyMetric::Latency,
            300.0,
            (0.0, 75.0),
            250.0,
            AnomalySeverity::Critical,
        )
        .unwrap();
        assert_eq!(anomaly.anomaly_score, 100.0);
    }
}
