//! Exclusion policy rules
//!
//! Rules are evaluated in registration order and the first match wins. The
//! default set is transient, then maintenance, then billing isolation.

use crate::config::SlaConfig;
use crate::error::StoreError;
use crate::model::{ExcludeReason, Incident, IncidentStatus, Timestamp};
use crate::store::{CustomerRegistry, MaintenanceSchedule, Store};
use log::{debug, error, info};
use std::sync::Arc;

/// A policy deciding whether an incident should stop counting against the SLA
pub trait ExclusionRule: Send + Sync {
    fn matches(&self, incident: &Incident, now: Timestamp) -> Result<bool, StoreError>;

    fn name(&self) -> &str;

    /// Reason recorded on the incident when this rule matches
    fn reason(&self) -> ExcludeReason;
}

/// Short resolved outages below the actionable threshold
///
/// Ongoing incidents never match, however long they have been open.
pub struct TransientRule {
    pub threshold_minutes: i64,
}

impl TransientRule {
    pub fn new(threshold_minutes: i64) -> Self {
        Self { threshold_minutes }
    }
}

impl ExclusionRule for TransientRule {
    fn matches(&self, incident: &Incident, _now: Timestamp) -> Result<bool, StoreError> {
        Ok(incident.status == IncidentStatus::Resolved
            && incident.duration_minutes < self.threshold_minutes)
    }

    fn name(&self) -> &str {
        "TransientRule"
    }

    fn reason(&self) -> ExcludeReason {
        ExcludeReason::Transient
    }
}

/// Incidents overlapping an approved maintenance window for the customer
pub struct MaintenanceRule {
    schedule: Arc<dyn MaintenanceSchedule>,
}

impl MaintenanceRule {
    pub fn new(schedule: Arc<dyn MaintenanceSchedule>) -> Self {
        Self { schedule }
    }
}

impl ExclusionRule for MaintenanceRule {
    fn matches(&self, incident: &Incident, now: Timestamp) -> Result<bool, StoreError> {
        let end = incident.effective_end(now);
        // zero-length incidents still need a non-empty query window
        let end = if end <= incident.start_time {
            incident.start_time + chrono::Duration::seconds(1)
        } else {
            end
        };
        let windows =
            self.schedule
                .windows_overlapping(&incident.customer_id, incident.start_time, end)?;
        if let Some(window) = windows.first() {
            debug!(
                "Incident {} overlaps maintenance '{}' ({} - {})",
                incident.id, window.title, window.start, window.end
            );
        }
        Ok(!windows.is_empty())
    }

    fn name(&self) -> &str {
        "MaintenanceRule"
    }

    fn reason(&self) -> ExcludeReason {
        ExcludeReason::Maintenance
    }
}

/// Customers currently isolated for non-payment
pub struct IsolationRule {
    registry: Arc<dyn CustomerRegistry>,
}

impl IsolationRule {
    pub fn new(registry: Arc<dyn CustomerRegistry>) -> Self {
        Self { registry }
    }
}

impl ExclusionRule for IsolationRule {
    fn matches(&self, incident: &Incident, _now: Timestamp) -> Result<bool, StoreError> {
        Ok(self
            .registry
            .customer(&incident.customer_id)?
            .map(|c| c.isolated)
            .unwrap_or(false))
    }

    fn name(&self) -> &str {
        "IsolationRule"
    }

    fn reason(&self) -> ExcludeReason {
        ExcludeReason::Isolated
    }
}

#[derive(Debug, Default)]
pub struct ExclusionReport {
    pub excluded: Vec<Incident>,
    /// Incidents evaluated this pass
    pub evaluated: usize,
    pub failures: usize,
}

/// Applies the exclusion rules to every incident not yet settled by policy
///
/// Ongoing incidents are re-evaluated each pass. A resolved incident is
/// evaluated once; if no rule matches it is marked checked and left alone.
pub struct ExclusionEngine {
    store: Arc<Store>,
    rules: Vec<Box<dyn ExclusionRule>>,
}

impl ExclusionEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            rules: Vec::new(),
        }
    }

    /// Transient, maintenance and isolation rules backed by the store
    pub fn with_default_rules(store: Arc<Store>, sla: &SlaConfig) -> Self {
        let mut engine = Self::new(Arc::clone(&store));
        engine.add_rule(Box::new(TransientRule::new(sla.transient_minutes)));
        engine.add_rule(Box::new(MaintenanceRule::new(
            Arc::clone(&store) as Arc<dyn MaintenanceSchedule>
        )));
        engine.add_rule(Box::new(IsolationRule::new(store as Arc<dyn CustomerRegistry>)));
        engine
    }

    pub fn add_rule(&mut self, rule: Box<dyn ExclusionRule>) {
        self.rules.push(rule);
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// First matching rule for an incident
    pub fn evaluate(
        &self,
        incident: &Incident,
        now: Timestamp,
    ) -> Result<Option<ExcludeReason>, StoreError> {
        for rule in &self.rules {
            if rule.matches(incident, now)? {
                debug!("{} matched incident {}", rule.name(), incident.id);
                return Ok(Some(rule.reason()));
            }
        }
        Ok(None)
    }

    pub fn run_at(&self, now: Timestamp) -> Result<ExclusionReport, StoreError> {
        let mut report = ExclusionReport::default();

        for incident in self.store.incidents_pending_policy()? {
            report.evaluated += 1;
            let (id, customer_id) = (incident.id, incident.customer_id.clone());
            match self.apply(incident, now) {
                Ok(Some(excluded)) => report.excluded.push(excluded),
                Ok(None) => {}
                Err(e) => {
                    error!(
                        "Exclusion policy failed for incident {} ({}): {}",
                        id, customer_id, e
                    );
                    report.failures += 1;
                }
            }
        }

        if !report.excluded.is_empty() || report.failures > 0 {
            info!(
                "Exclusion pass: {} evaluated, {} excluded, {} failures",
                report.evaluated,
                report.excluded.len(),
                report.failures
            );
        }
        Ok(report)
    }

    fn apply(&self, mut incident: Incident, now: Timestamp) -> Result<Option<Incident>, StoreError> {
        match self.evaluate(&incident, now)? {
            Some(reason) => {
                incident
                    .exclude(reason, now)
                    .map_err(|e| StoreError::InvalidTransition(e.to_string()))?;
                if !self.store.save_exclusion(&incident)? {
                    return Ok(None);
                }
                info!(
                    "Excluded incident {} for {} ({}, {} minutes)",
                    incident.id, incident.customer_id, reason, incident.duration_minutes
                );
                Ok(Some(incident))
            }
            None => {
                if incident.status == IncidentStatus::Resolved {
                    self.store.mark_policy_checked(incident.id)?;
                }
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Customer, MaintenanceWindow, ServiceType};
    use crate::store::MockMaintenanceSchedule;
    use chrono::{TimeZone, Utc};

    fn at(h: u32, m: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 5, h, m, 0).unwrap()
    }

    fn store_with_customer(isolated: bool) -> Arc<Store> {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let mut customer = Customer::new("c1", "Warung Sari", ServiceType::Pppoe).unwrap();
        customer.isolated = isolated;
        store.upsert_customer(&customer).unwrap();
        store
    }

    fn open(store: &Store, start: Timestamp) -> Incident {
        let incident = Incident::open_downtime("c1", ServiceType::Pppoe, start).unwrap();
        store.insert_incident_if_absent(&incident).unwrap().unwrap()
    }

    fn resolved(store: &Store, start: Timestamp, end: Timestamp) -> Incident {
        let mut incident = open(store, start);
        incident.resolve(end).unwrap();
        store.save_resolution(&incident).unwrap();
        incident
    }

    fn engine(store: &Arc<Store>) -> ExclusionEngine {
        ExclusionEngine::with_default_rules(Arc::clone(store), &SlaConfig::default())
    }

    #[test]
    fn test_rule_error_is_isolated_to_its_incident() {
        let store = store_with_customer(false);
        store
            .upsert_customer(&Customer::new("c2", "Toko Jaya", ServiceType::Pppoe).unwrap())
            .unwrap();
        let counted = resolved(&store, at(9, 0), at(9, 45));
        let mut broken = store
            .insert_incident_if_absent(
                &Incident::open_downtime("c2", ServiceType::Pppoe, at(9, 0)).unwrap(),
            )
            .unwrap()
            .unwrap();
        broken.resolve(at(9, 50)).unwrap();
        store.save_resolution(&broken).unwrap();

        let mut schedule = MockMaintenanceSchedule::new();
        schedule
            .expect_windows_overlapping()
            .returning(|customer_id, _, _| match customer_id {
                "c2" => Err(StoreError::NotFound("maintenance calendar".into())),
                _ => Ok(Vec::new()),
            });
        let mut engine = ExclusionEngine::new(Arc::clone(&store));
        engine.add_rule(Box::new(MaintenanceRule::new(Arc::new(schedule))));

        let report = engine.run_at(at(10, 0)).unwrap();
        assert_eq!(report.evaluated, 2);
        assert_eq!(report.failures, 1);
        assert!(report.excluded.is_empty());

        // the healthy incident is settled, the failed one is retried next pass
        let pending: Vec<i64> = store
            .incidents_pending_policy()
            .unwrap()
            .iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(pending, vec![broken.id]);
        assert_ne!(counted.id, broken.id);
    }

    #[test]
    fn test_default_rule_order() {
        let store = store_with_customer(false);
        let engine = engine(&store);
        assert_eq!(engine.rule_count(), 3);
        let names: Vec<_> = engine.rules.iter().map(|r| r.name().to_string()).collect();
        assert_eq!(names, vec!["TransientRule", "MaintenanceRule", "IsolationRule"]);
    }

    #[test]
    fn test_short_resolved_incident_is_transient() {
        let store = store_with_customer(false);
        let incident = resolved(&store, at(10, 0), at(10, 10));
        let report = engine(&store).run_at(at(10, 15)).unwrap();

        assert_eq!(report.excluded.len(), 1);
        let stored = store.incident(incident.id).unwrap();
        assert_eq!(stored.status, IncidentStatus::Excluded);
        assert_eq!(stored.exclude_reason, Some(ExcludeReason::Transient));
        assert!(!stored.is_counted_in_sla);
        assert_eq!(stored.duration_minutes, 10);
    }

    #[test]
    fn test_long_resolved_incident_is_counted_and_settled() {
        let store = store_with_customer(false);
        let incident = resolved(&store, at(10, 0), at(10, 45));
        let report = engine(&store).run_at(at(10, 50)).unwrap();
        assert!(report.excluded.is_empty());
        assert_eq!(report.evaluated, 1);

        let stored = store.incident(incident.id).unwrap();
        assert_eq!(stored.status, IncidentStatus::Resolved);
        assert!(stored.is_counted_in_sla);
        assert!(store.incidents_pending_policy().unwrap().is_empty());
    }

    #[test]
    fn test_ongoing_incident_is_never_transient() {
        let store = store_with_customer(false);
        open(&store, at(10, 0));
        let report = engine(&store).run_at(at(10, 5)).unwrap();
        assert!(report.excluded.is_empty());
        // still pending: ongoing incidents are revisited every pass
        assert_eq!(store.incidents_pending_policy().unwrap().len(), 1);
    }

    #[test]
    fn test_transient_wins_over_maintenance() {
        let store = store_with_customer(true);
        store
            .add_maintenance_window(
                &MaintenanceWindow::new("splice", at(9, 0), at(12, 0), vec!["c1".into()]).unwrap(),
            )
            .unwrap();
        let incident = resolved(&store, at(10, 0), at(10, 20));
        engine(&store).run_at(at(10, 30)).unwrap();
        assert_eq!(
            store.incident(incident.id).unwrap().exclude_reason,
            Some(ExcludeReason::Transient)
        );
    }

    #[test]
    fn test_maintenance_closes_ongoing_incident() {
        let store = store_with_customer(false);
        store
            .add_maintenance_window(
                &MaintenanceWindow::new("OLT swap", at(9, 30), at(11, 0), vec!["c1".into()])
                    .unwrap(),
            )
            .unwrap();
        let incident = open(&store, at(10, 0));
        let report = engine(&store).run_at(at(10, 40)).unwrap();
        assert_eq!(report.excluded.len(), 1);

        let stored = store.incident(incident.id).unwrap();
        assert_eq!(stored.exclude_reason, Some(ExcludeReason::Maintenance));
        assert_eq!(stored.end_time, Some(at(10, 40)));
        assert_eq!(stored.duration_minutes, 40);
        assert!(store.ongoing_incidents().unwrap().is_empty());
    }

    #[test]
    fn test_isolated_customer_is_excluded() {
        let store = store_with_customer(true);
        let incident = resolved(&store, at(8, 0), at(10, 0));
        engine(&store).run_at(at(10, 5)).unwrap();
        assert_eq!(
            store.incident(incident.id).unwrap().exclude_reason,
            Some(ExcludeReason::Isolated)
        );
    }

    #[test]
    fn test_excluded_incident_is_never_revisited() {
        let store = store_with_customer(false);
        let incident = resolved(&store, at(10, 0), at(10, 10));
        let engine = engine(&store);
        engine.run_at(at(10, 15)).unwrap();
        store.set_customer_isolated("c1", true).unwrap();

        let report = engine.run_at(at(10, 20)).unwrap();
        assert_eq!(report.evaluated, 0);
        assert_eq!(
            store.incident(incident.id).unwrap().exclude_reason,
            Some(ExcludeReason::Transient)
        );
    }
}
