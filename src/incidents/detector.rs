use crate::config::DetectionConfig;
use crate::error::StoreError;
use crate::model::{Incident, LinkStatus, ServiceType, Timestamp};
use crate::store::Store;
use chrono::Duration;
use log::{debug, error, info, warn};
use std::sync::Arc;

/// Outcome of one detection pass
#[derive(Debug, Default)]
pub struct DetectionReport {
    pub opened: Vec<Incident>,
    pub resolved: Vec<Incident>,
    /// Keys whose processing failed and will be retried next pass
    pub failures: usize,
}

/// Drives the per-key incident lifecycle from the connection log
///
/// Only explicit samples move the state machine: an `offline` latest sample
/// opens an incident, an `online` latest sample resolves it. A key with no
/// recent sample is left alone.
pub struct IncidentDetector {
    store: Arc<Store>,
    lookback: Duration,
}

impl IncidentDetector {
    pub fn new(store: Arc<Store>, config: &DetectionConfig) -> Self {
        Self {
            store,
            lookback: Duration::minutes(config.lookback_minutes as i64),
        }
    }

    pub fn run_at(&self, now: Timestamp) -> Result<DetectionReport, StoreError> {
        let mut report = DetectionReport::default();

        for incident in self.store.ongoing_incidents()? {
            match self.try_resolve(incident, now) {
                Ok(Some(resolved)) => report.resolved.push(resolved),
                Ok(None) => {}
                Err(e) => {
                    error!("Failed to resolve incident: {}", e);
                    report.failures += 1;
                }
            }
        }

        for (customer_id, service_type) in self.store.recent_log_keys(now - self.lookback)? {
            match self.try_open(&customer_id, service_type) {
                Ok(Some(opened)) => report.opened.push(opened),
                Ok(None) => {}
                Err(e) => {
                    error!(
                        "Failed to evaluate {} ({}) for a new incident: {}",
                        customer_id, service_type, e
                    );
                    report.failures += 1;
                }
            }
        }

        info!(
            "Detection pass: {} opened, {} resolved, {} failures",
            report.opened.len(),
            report.resolved.len(),
            report.failures
        );
        Ok(report)
    }

    fn try_resolve(
        &self,
        mut incident: Incident,
        now: Timestamp,
    ) -> Result<Option<Incident>, StoreError> {
        let latest = self
            .store
            .latest_log(&incident.customer_id, incident.service_type)?;
        let back_online = matches!(
            latest,
            Some(ref entry) if entry.status == LinkStatus::Online && entry.timestamp >= incident.start_time
        );
        if !back_online {
            return Ok(None);
        }

        incident
            .resolve(now)
            .map_err(|e| StoreError::InvalidTransition(e.to_string()))?;
        if !self.store.save_resolution(&incident)? {
            debug!("Incident {} changed under us, skipping resolve", incident.id);
            return Ok(None);
        }
        info!(
            "Resolved incident {} for {} after {} minutes",
            incident.id, incident.customer_id, incident.duration_minutes
        );
        Ok(Some(incident))
    }

    fn try_open(
        &self,
        customer_id: &str,
        service_type: ServiceType,
    ) -> Result<Option<Incident>, StoreError> {
        let Some(latest) = self.store.latest_log(customer_id, service_type)? else {
            return Ok(None);
        };
        if latest.status != LinkStatus::Offline {
            return Ok(None);
        }
        if self.store.ongoing_incident(customer_id, service_type)?.is_some() {
            return Ok(None);
        }

        let start = self
            .store
            .outage_start(customer_id, service_type)?
            .unwrap_or(latest.timestamp);

        // An outage closed early by exclusion stays closed until the link
        // has been seen online again.
        if let Some(previous_end) = self.store.last_incident_end(customer_id, service_type)? {
            if previous_end >= start {
                debug!(
                    "{} ({}) still in an outage already handled up to {}",
                    customer_id, service_type, previous_end
                );
                return Ok(None);
            }
        }

        let incident = Incident::open_downtime(customer_id, service_type, start)
            .map_err(|e| StoreError::Corrupt {
                table: "connection_logs",
                detail: e.to_string(),
            })?;
        match self.store.insert_incident_if_absent(&incident)? {
            Some(stored) => {
                warn!(
                    "Opened downtime incident {} for {} ({}) starting {}",
                    stored.id, customer_id, service_type, start
                );
                Ok(Some(stored))
            }
            None => {
                debug!("Concurrent pass already opened an incident for {}", customer_id);
                Ok(None)
            }
        }
    }
}
