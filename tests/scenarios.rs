//! End-to-end scenarios over an in-memory store

use chrono::{DateTime, Duration, TimeZone, Utc};
use slawatch::alerts::{AlertRouter, Escalator, LogSender};
use slawatch::analysis::{ImpactSeverity, ImpactTier, RootCauseAnalyzer};
use slawatch::config::{DetectionConfig, RootCauseConfig, SlaConfig};
use slawatch::error::AlertError;
use slawatch::incidents::{ExclusionEngine, IncidentDetector};
use slawatch::model::{
    Alert, AlertType, ConnectionLogEntry, Customer, DeliveryStatus, ExcludeReason,
    IncidentStatus, MonthYear, ServiceType, SlaStatus, StaffMember,
};
use slawatch::sla::{self, SlaAggregator};
use slawatch::store::{CustomerRegistry, StaffDirectory, Store};
use std::sync::Arc;

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, h, m, 0).unwrap()
}

fn log(store: &Store, customer: &str, online: bool, ts: DateTime<Utc>) {
    let entry = if online {
        ConnectionLogEntry::online(customer, ServiceType::Pppoe, ts).unwrap()
    } else {
        ConnectionLogEntry::offline(customer, ServiceType::Pppoe, ts).unwrap()
    };
    store.append_logs(&[entry]).unwrap();
}

fn customer(store: &Store, id: &str, point: Option<&str>) {
    let mut customer = Customer::new(id, id, ServiceType::Pppoe).unwrap();
    customer.device_id = Some("rb-1".into());
    customer.aggregation_point = point.map(str::to_string);
    customer.monthly_fee = 250_000.0;
    store.upsert_customer(&customer).unwrap();
}

fn router(store: &Arc<Store>) -> Arc<AlertRouter> {
    Arc::new(AlertRouter::new(
        Arc::clone(store),
        Arc::clone(store) as Arc<dyn StaffDirectory>,
        Arc::clone(store) as Arc<dyn CustomerRegistry>,
        Arc::new(LogSender::new("staff")),
        Arc::new(LogSender::new("customer")),
    ))
}

struct Pipeline {
    detector: IncidentDetector,
    exclusion: ExclusionEngine,
}

impl Pipeline {
    fn new(store: &Arc<Store>) -> Self {
        Self {
            detector: IncidentDetector::new(Arc::clone(store), &DetectionConfig::default()),
            exclusion: ExclusionEngine::with_default_rules(Arc::clone(store), &SlaConfig::default()),
        }
    }

    fn pass(&self, now: DateTime<Utc>) {
        self.detector.run_at(now).unwrap();
        self.exclusion.run_at(now).unwrap();
    }
}

#[test]
fn scenario_45_minute_outage_counts_against_sla() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    customer(&store, "c1", None);
    let pipeline = Pipeline::new(&store);

    log(&store, "c1", false, at(10, 0));
    pipeline.pass(at(10, 0));
    log(&store, "c1", false, at(10, 30));
    pipeline.pass(at(10, 30));
    log(&store, "c1", true, at(10, 45));
    pipeline.pass(at(10, 45));

    let incidents = store.incidents_for_customer("c1", 10).unwrap();
    assert_eq!(incidents.len(), 1);
    let incident = &incidents[0];
    assert_eq!(incident.status, IncidentStatus::Resolved);
    assert_eq!(incident.duration_minutes, 45);
    assert!(incident.is_counted_in_sla);
    assert_eq!(incident.exclude_reason, None);
}

#[test]
fn scenario_ten_minute_flap_is_excluded_as_transient() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    customer(&store, "c1", None);
    let pipeline = Pipeline::new(&store);

    log(&store, "c1", false, at(10, 0));
    pipeline.pass(at(10, 0));
    assert!(store.ongoing_incident("c1", ServiceType::Pppoe).unwrap().is_some());

    log(&store, "c1", true, at(10, 10));
    pipeline.pass(at(10, 10));

    let incident = store.incidents_for_customer("c1", 1).unwrap().remove(0);
    assert_eq!(incident.duration_minutes, 10);
    assert_eq!(incident.status, IncidentStatus::Excluded);
    assert_eq!(incident.exclude_reason, Some(ExcludeReason::Transient));
    assert!(!incident.is_counted_in_sla);

    // later passes leave the excluded incident alone
    log(&store, "c1", true, at(10, 20));
    pipeline.pass(at(10, 20));
    assert_eq!(store.incident(incident.id).unwrap(), incident);

    let record = SlaAggregator::new(Arc::clone(&store), SlaConfig::default())
        .aggregate(
            &store.customer("c1").unwrap().unwrap(),
            "2024-01".parse::<MonthYear>().unwrap(),
            at(12, 0),
        )
        .unwrap();
    assert_eq!(record.downtime_minutes, 10.0);
    assert_eq!(record.excluded_downtime_minutes, 10.0);
    assert_eq!(record.counted_downtime_minutes, 0.0);
    assert_eq!(record.sla_percentage, 100.0);
}

#[test]
fn scenario_ninety_nine_percent_month_is_a_breach() {
    let config = SlaConfig::default();
    let month: MonthYear = "2024-01".parse().unwrap();
    assert_eq!(month.total_minutes(), 44_640.0);

    let percentage = sla::sla_percentage(month.total_minutes(), 446.4);
    assert!((percentage - 99.0).abs() < 1e-9);
    let status = sla::classify(percentage, 99.5, config.warning_margin);
    assert_eq!(status, SlaStatus::Breach);
    assert!(sla::discount_amount(percentage, 99.5, status, 250_000.0, &config) > 0.0);
}

#[test]
fn scenario_mass_outage_escalates_to_noc() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    store
        .upsert_staff(&StaffMember {
            name: "NOC on call".into(),
            role: "noc".into(),
            service_area: None,
            channel_id: "noc-oncall".into(),
            active: true,
        })
        .unwrap();
    for i in 0..12 {
        let id = format!("c{:02}", i);
        customer(&store, &id, Some("olt-9"));
        log(&store, &id, false, at(10, i));
    }

    let detection = IncidentDetector::new(Arc::clone(&store), &DetectionConfig::default())
        .run_at(at(10, 15))
        .unwrap();
    assert_eq!(detection.opened.len(), 12);

    let analyzer = RootCauseAnalyzer::new(
        Arc::clone(&store),
        Arc::clone(&store) as Arc<dyn CustomerRegistry>,
        RootCauseConfig::default(),
    );
    let analyses = analyzer.analyze_all(&detection.opened, at(10, 15));
    assert_eq!(analyses.len(), 12);
    for analysis in &analyses {
        assert_eq!(analysis.affected_customers, 12);
        assert_eq!(analysis.tier, ImpactTier::MassOutage);
        assert_eq!(analysis.confidence, 0.90);
        assert_eq!(analysis.severity, ImpactSeverity::Critical);
    }

    let escalation =
        Escalator::new(router(&store), &RootCauseConfig::default()).escalate(&analyses, at(10, 15));
    assert_eq!(escalation.sent, 1);
    assert_eq!(escalation.suppressed, 11);

    let logs = store.alert_logs_since(at(10, 0)).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].alert_type, AlertType::Critical);
    assert_eq!(logs[0].recipient_identifier, "noc-oncall");
    assert_eq!(logs[0].delivery_status, DeliveryStatus::Sent);
}

#[test]
fn scenario_unknown_role_writes_one_failed_log_row() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let alert = Alert::to_role(
        AlertType::Warning,
        "no-such-role",
        None,
        "Latency anomaly",
        "mean RTT above baseline",
    )
    .unwrap();

    let result = router(&store).route_alert(&alert, at(9, 0));
    assert!(matches!(result, Err(AlertError::NoRecipient(_))));

    let logs = store.alert_logs_since(at(9, 0) - Duration::minutes(1)).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].delivery_status, DeliveryStatus::Failed);
}
