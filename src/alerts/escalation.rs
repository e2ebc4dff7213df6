use super::limiter::EscalationLimiter;
use super::router::AlertRouter;
use crate::analysis::RootCauseAnalysis;
use crate::config::RootCauseConfig;
use crate::model::Timestamp;
use log::{debug, error, warn};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EscalationReport {
    pub sent: usize,
    pub suppressed: usize,
    pub failed: usize,
    /// Critical incidents still owed an escalation; retry them next pass
    pub undelivered: Vec<i64>,
}

/// Sends critical root-cause findings to the on-call role
///
/// One outage usually produces a burst of incidents behind the same
/// aggregation point; only the first delivered escalation per point counts
/// against the cooldown. A key whose delivery failed is tried once per pass
/// and its incidents come back in `undelivered`.
pub struct Escalator {
    router: Arc<AlertRouter>,
    role: String,
    limiter: Mutex<EscalationLimiter>,
}

impl Escalator {
    pub fn new(router: Arc<AlertRouter>, config: &RootCauseConfig) -> Self {
        Self {
            router,
            role: config.escalation_role.clone(),
            limiter: Mutex::new(EscalationLimiter::with_cooldown_minutes(
                config.escalation_cooldown_minutes,
            )),
        }
    }

    fn limiter(&self) -> MutexGuard<'_, EscalationLimiter> {
        match self.limiter.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn escalate(&self, analyses: &[RootCauseAnalysis], now: Timestamp) -> EscalationReport {
        let mut report = EscalationReport::default();
        let mut failed_keys: HashSet<String> = HashSet::new();
        for analysis in analyses {
            let alert = match analysis.escalation_alert(&self.role) {
                Ok(Some(alert)) => alert,
                Ok(None) => continue,
                Err(e) => {
                    error!("Cannot build escalation for incident {}: {}", analysis.incident_id, e);
                    report.failed += 1;
                    continue;
                }
            };

            let key = analysis
                .aggregation_point
                .clone()
                .unwrap_or_else(|| analysis.customer_id.clone());
            if failed_keys.contains(&key) {
                report.undelivered.push(analysis.incident_id);
                continue;
            }
            if !self.limiter().can_send(&key, now) {
                debug!("Escalation for {} suppressed (cooldown)", key);
                report.suppressed += 1;
                continue;
            }

            match self.router.route_alert(&alert, now) {
                Ok(_) => {
                    self.limiter().record_at(&key, now);
                    report.sent += 1;
                }
                Err(e) => {
                    warn!(
                        "Escalation for incident {} ({}) failed: {}",
                        analysis.incident_id, key, e
                    );
                    report.failed += 1;
                    report.undelivered.push(analysis.incident_id);
                    failed_keys.insert(key);
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::channels::{LogSender, MessageSender};
    use crate::error::AlertError;
    use crate::analysis::{ImpactSeverity, ImpactTier};
    use crate::model::{DeliveryStatus, StaffMember};
    use crate::store::{CustomerRegistry, StaffDirectory, Store};
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn analysis(id: i64, point: &str, severity: ImpactSeverity) -> RootCauseAnalysis {
        RootCauseAnalysis {
            incident_id: id,
            customer_id: format!("c{}", id),
            aggregation_point: Some(point.to_string()),
            service_area: None,
            affected_customers: 12,
            duration_minutes: 5,
            tier: ImpactTier::MassOutage,
            confidence: 0.9,
            severity,
            hypotheses: Vec::new(),
            recommended_actions: vec!["Check power".into()],
        }
    }

    fn escalator(store: &Arc<Store>) -> Escalator {
        let router = AlertRouter::new(
            Arc::clone(store),
            Arc::clone(store) as Arc<dyn StaffDirectory>,
            Arc::clone(store) as Arc<dyn CustomerRegistry>,
            Arc::new(LogSender::new("staff")),
            Arc::new(LogSender::new("customer")),
        );
        Escalator::new(Arc::new(router), &RootCauseConfig::default())
    }

    #[test]
    fn test_burst_behind_one_point_escalates_once() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .upsert_staff(&StaffMember {
                name: "On call".into(),
                role: "noc".into(),
                service_area: None,
                channel_id: "noc-1".into(),
                active: true,
            })
            .unwrap();
        let escalator = escalator(&store);
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap();

        let burst: Vec<_> = (1..=3)
            .map(|id| analysis(id, "olt-7", ImpactSeverity::Critical))
            .collect();
        let report = escalator.escalate(&burst, now);
        assert_eq!(report.sent, 1);
        assert_eq!(report.suppressed, 2);

        let later = escalator.escalate(&burst[..1], now + Duration::minutes(31));
        assert_eq!(later.sent, 1);

        let logs = store.alert_logs_since(now).unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|l| l.delivery_status == DeliveryStatus::Sent));
    }

    #[test]
    fn test_non_critical_is_not_escalated() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let report = escalator(&store).escalate(
            &[analysis(1, "odp-1", ImpactSeverity::Major)],
            Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap(),
        );
        assert_eq!(report, EscalationReport::default());
        assert!(store
            .alert_logs_since(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_missing_role_counts_as_failed() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap();
        let report = escalator(&store).escalate(&[analysis(1, "olt-1", ImpactSeverity::Critical)], now);
        assert_eq!(report.failed, 1);
        assert_eq!(store.delivery_stats_since(now).unwrap().failed, 1);
    }

    /// Fails its first `failures` sends, then delivers
    struct FlakySender {
        failures: AtomicUsize,
    }

    impl MessageSender for FlakySender {
        fn send(&self, _recipient: &str, _text: &str) -> Result<(), AlertError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(AlertError::DeliveryFailed("gateway unavailable".into()));
            }
            Ok(())
        }

        fn channel_name(&self) -> String {
            "staff".into()
        }
    }

    #[test]
    fn test_failed_escalation_does_not_start_cooldown() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .upsert_staff(&StaffMember {
                name: "On call".into(),
                role: "noc".into(),
                service_area: None,
                channel_id: "noc-1".into(),
                active: true,
            })
            .unwrap();
        let router = AlertRouter::new(
            Arc::clone(&store),
            Arc::clone(&store) as Arc<dyn StaffDirectory>,
            Arc::clone(&store) as Arc<dyn CustomerRegistry>,
            Arc::new(FlakySender {
                failures: AtomicUsize::new(1),
            }),
            Arc::new(LogSender::new("customer")),
        );
        let escalator = Escalator::new(Arc::new(router), &RootCauseConfig::default());
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap();
        let burst: Vec<_> = (1..=12)
            .map(|id| analysis(id, "olt-1", ImpactSeverity::Critical))
            .collect();

        let first = escalator.escalate(&burst, now);
        assert_eq!(first.sent, 0);
        assert_eq!(first.failed, 1);
        assert_eq!(first.suppressed, 0);
        assert_eq!(first.undelivered, (1..=12).collect::<Vec<i64>>());

        let retry = escalator.escalate(&burst, now + Duration::minutes(5));
        assert_eq!(retry.sent, 1);
        assert_eq!(retry.suppressed, 11);
        assert!(retry.undelivered.is_empty());

        let logs = store.alert_logs_since(now).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].delivery_status, DeliveryStatus::Failed);
        assert_eq!(logs[1].delivery_status, DeliveryStatus::Sent);
    }
}
