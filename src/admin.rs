//! Manual write paths and read accessors for operators
//!
//! Every write here is recorded in the audit log with the acting user.

use crate::error::StoreError;
use crate::model::{ExcludeReason, Incident, MonthYear, SlaRecord, Timestamp};
use crate::sla::SlaAggregator;
use crate::store::{CustomerRegistry, DeliveryStats, Store};
use chrono::Duration;
use log::{info, warn};
use std::sync::Arc;

pub struct Admin {
    store: Arc<Store>,
    registry: Arc<dyn CustomerRegistry>,
    aggregator: SlaAggregator,
}

impl Admin {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<dyn CustomerRegistry>,
        aggregator: SlaAggregator,
    ) -> Self {
        Self {
            store,
            registry,
            aggregator,
        }
    }

    /// Exclude an incident by hand and refresh the SLA months it touches
    ///
    /// An ongoing incident is closed now. Excluding twice is an error.
    pub fn exclude_incident(
        &self,
        incident_id: i64,
        actor: &str,
        note: Option<&str>,
        now: Timestamp,
    ) -> Result<Incident, StoreError> {
        let mut incident = self.store.incident(incident_id)?;
        incident
            .exclude(ExcludeReason::Manual, now)
            .map_err(|e| StoreError::InvalidTransition(format!("incident {}: {}", incident_id, e)))?;
        if !self.store.save_exclusion(&incident)? {
            return Err(StoreError::InvalidTransition(format!(
                "incident {} was excluded concurrently",
                incident_id
            )));
        }
        self.store.append_audit(
            actor,
            "exclude_incident",
            &format!("incident:{}", incident_id),
            note,
            now,
        )?;
        info!(
            "{} excluded incident {} for {} ({} minutes)",
            actor, incident_id, incident.customer_id, incident.duration_minutes
        );

        self.refresh_sla(&incident, now);
        Ok(incident)
    }

    fn refresh_sla(&self, incident: &Incident, now: Timestamp) {
        let customer = match self.registry.customer(&incident.customer_id) {
            Ok(Some(customer)) => customer,
            Ok(None) => return,
            Err(e) => {
                warn!("SLA refresh for {} skipped: {}", incident.customer_id, e);
                return;
            }
        };
        let first = MonthYear::containing(incident.start_time);
        let last = MonthYear::containing(incident.effective_end(now));
        let mut month = first;
        loop {
            if let Err(e) = self.aggregator.aggregate(&customer, month, now) {
                warn!("SLA refresh for {} {} failed: {}", customer.customer_id, month, e);
            }
            if month >= last {
                break;
            }
            month = month.next();
        }
    }

    /// Approve the discount on a computed SLA record
    pub fn approve_discount(
        &self,
        customer_id: &str,
        month: MonthYear,
        actor: &str,
        now: Timestamp,
    ) -> Result<SlaRecord, StoreError> {
        self.store.set_discount_approved(customer_id, month, true)?;
        let record = self
            .store
            .sla_record(customer_id, month)?
            .ok_or_else(|| StoreError::NotFound(format!("sla record {} {}", customer_id, month)))?;
        self.store.append_audit(
            actor,
            "approve_discount",
            &format!("sla:{}:{}", customer_id, month),
            Some(&format!("{:.2}", record.discount_amount)),
            now,
        )?;
        info!(
            "{} approved discount {:.2} for {} {}",
            actor, record.discount_amount, customer_id, month
        );
        Ok(record)
    }

    pub fn incidents(&self, customer_id: &str, limit: usize) -> Result<Vec<Incident>, StoreError> {
        self.store.incidents_for_customer(customer_id, limit)
    }

    /// One month's record, or the full history newest first
    pub fn sla(
        &self,
        customer_id: &str,
        month: Option<MonthYear>,
    ) -> Result<Vec<SlaRecord>, StoreError> {
        match month {
            Some(month) => Ok(self.store.sla_record(customer_id, month)?.into_iter().collect()),
            None => self.store.sla_history(customer_id),
        }
    }

    pub fn alert_stats(&self, hours: i64, now: Timestamp) -> Result<DeliveryStats, StoreError> {
        self.store.delivery_stats_since(now - Duration::hours(hours))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SlaConfig;
    use crate::model::{Customer, IncidentStatus, ServiceType};
    use chrono::{TimeZone, Utc};

    fn setup() -> (Arc<Store>, Admin) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let mut customer = Customer::new("c1", "Kedai Kopi", ServiceType::Pppoe).unwrap();
        customer.monthly_fee = 300_000.0;
        store.upsert_customer(&customer).unwrap();
        let admin = Admin::new(
            Arc::clone(&store),
            Arc::clone(&store) as Arc<dyn CustomerRegistry>,
            SlaAggregator::new(Arc::clone(&store), SlaConfig::default()),
        );
        (store, admin)
    }

    fn resolved(store: &Store, start: Timestamp, minutes: i64) -> Incident {
        let incident = Incident::open_downtime("c1", ServiceType::Pppoe, start).unwrap();
        let mut stored = store.insert_incident_if_absent(&incident).unwrap().unwrap();
        stored.resolve(start + Duration::minutes(minutes)).unwrap();
        store.save_resolution(&stored).unwrap();
        stored
    }

    #[test]
    fn test_manual_exclusion_is_audited_and_refreshes_sla() {
        let (store, admin) = setup();
        let start = Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap();
        let incident = resolved(&store, start, 446);
        let now = Utc.with_ymd_and_hms(2024, 1, 12, 0, 0, 0).unwrap();

        let excluded = admin
            .exclude_incident(incident.id, "supervisor", Some("fiber works"), now)
            .unwrap();
        assert_eq!(excluded.status, IncidentStatus::Excluded);
        assert_eq!(excluded.exclude_reason, Some(ExcludeReason::Manual));

        let audit = store.audit_entries(&format!("incident:{}", incident.id)).unwrap();
        assert_eq!(
            audit,
            vec![(
                "supervisor".to_string(),
                "exclude_incident".to_string(),
                Some("fiber works".to_string())
            )]
        );

        let record = store.sla_record("c1", "2024-01".parse().unwrap()).unwrap().unwrap();
        assert_eq!(record.counted_downtime_minutes, 0.0);
        assert_eq!(record.excluded_downtime_minutes, 446.0);
    }

    #[test]
    fn test_excluding_twice_is_rejected() {
        let (store, admin) = setup();
        let start = Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap();
        let incident = resolved(&store, start, 60);
        let now = Utc.with_ymd_and_hms(2024, 1, 12, 0, 0, 0).unwrap();

        admin.exclude_incident(incident.id, "a", None, now).unwrap();
        assert!(matches!(
            admin.exclude_incident(incident.id, "b", None, now),
            Err(StoreError::InvalidTransition(_))
        ));
        assert_eq!(
            store
                .audit_entries(&format!("incident:{}", incident.id))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_approve_discount() {
        let (store, admin) = setup();
        let month: MonthYear = "2024-01".parse().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 2, 2, 0, 0, 0).unwrap();
        assert!(matches!(
            admin.approve_discount("c1", month, "finance", now),
            Err(StoreError::NotFound(_))
        ));

        resolved(&store, Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap(), 600);
        let customer = store.customer("c1").unwrap().unwrap();
        SlaAggregator::new(Arc::clone(&store), SlaConfig::default())
            .aggregate(&customer, month, now)
            .unwrap();

        let record = admin.approve_discount("c1", month, "finance", now).unwrap();
        assert!(record.discount_approved);
        assert!(record.discount_amount > 0.0);
        assert_eq!(admin.sla("c1", None).unwrap().len(), 1);
    }
}
