use super::pool::probe_all;
use super::source::{SessionSnapshot, SessionSource};
use crate::config::ProbeConfig;
use crate::error::ProbeError;
use crate::model::{ConnectionLogEntry, Customer, ServiceType, Timestamp};
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// PPPoE customers attached to one device: (customer_id, session name)
type DeviceBatch = (String, Vec<(String, String)>);

/// Session-snapshot collection for PPPoE customers
///
/// The device API is called once per device. A customer whose session is in
/// the snapshot is online with its byte counters; a missing session, a failed
/// call or an overrun budget makes every affected customer offline.
pub struct BandwidthCollector {
    source: Arc<dyn SessionSource>,
    workers: usize,
    budget: Duration,
}

impl BandwidthCollector {
    pub fn new(source: Arc<dyn SessionSource>, probes: &ProbeConfig) -> Self {
        Self {
            source,
            workers: probes.workers,
            budget: probes.session_budget(),
        }
    }

    /// Group active PPPoE customers by the device holding their session
    pub fn batches(customers: &[Customer]) -> Vec<DeviceBatch> {
        let mut by_device: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
        for customer in customers
            .iter()
            .filter(|c| c.active && c.service_type == ServiceType::Pppoe)
        {
            if customer.customer_id.trim().is_empty() {
                warn!("Skipping PPPoE customer without an id on {:?}", customer.device_id);
                continue;
            }
            let Some(device) = customer.device_id.as_ref().filter(|d| !d.trim().is_empty()) else {
                debug!("{} has no device id, skipping session probe", customer.customer_id);
                continue;
            };
            let session = customer
                .session_name
                .clone()
                .unwrap_or_else(|| customer.customer_id.clone());
            by_device
                .entry(device.clone())
                .or_default()
                .push((customer.customer_id.clone(), session));
        }
        by_device.into_iter().collect()
    }

    pub fn collect(&self, customers: &[Customer], now: Timestamp) -> Vec<ConnectionLogEntry> {
        let batches = Self::batches(customers);
        if batches.is_empty() {
            debug!("No PPPoE devices to query");
            return Vec::new();
        }

        let source = Arc::clone(&self.source);
        let results = probe_all(batches, self.workers, self.budget, move |(device, _)| {
            source.active_sessions(device)
        });

        let mut entries = Vec::new();
        for ((device, members), outcome) in results {
            let sessions = Self::index_sessions(&device, members.len(), outcome);
            for (customer_id, session_name) in members {
                let snapshot = sessions.as_ref().and_then(|s| s.get(&session_name));
                // batches never carry a blank id, so only that can fail here
                let entry = match snapshot {
                    Some(snapshot) => {
                        ConnectionLogEntry::online(&customer_id, ServiceType::Pppoe, now)
                            .map(|e| e.with_counters(snapshot.bytes_in, snapshot.bytes_out))
                    }
                    None => ConnectionLogEntry::offline(&customer_id, ServiceType::Pppoe, now),
                };
                match entry {
                    Ok(entry) => entries.push(entry),
                    Err(e) => error!("Cannot log session result for {:?}: {}", customer_id, e),
                }
            }
        }

        let offline = entries.iter().filter(|e| e.is_offline()).count();
        info!(
            "Bandwidth cycle: {} customers, {} offline",
            entries.len(),
            offline
        );
        entries
    }

    fn index_sessions(
        device: &str,
        customers: usize,
        outcome: Option<Result<Vec<SessionSnapshot>, ProbeError>>,
    ) -> Option<HashMap<String, SessionSnapshot>> {
        match outcome {
            Some(Ok(sessions)) => Some(
                sessions
                    .into_iter()
                    .map(|s| (s.session_name.clone(), s))
                    .collect(),
            ),
            Some(Err(e)) => {
                warn!(
                    "Session fetch from {} failed, marking {} customers offline: {}",
                    device, customers, e
                );
                None
            }
            None => {
                warn!(
                    "Session fetch from {} timed out, marking {} customers offline",
                    device, customers
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::source::MockSessionSource;
    use crate::model::LinkStatus;
    use chrono::{TimeZone, Utc};
    use mockall::predicate::eq;

    fn pppoe(id: &str, device: Option<&str>) -> Customer {
        let mut customer = Customer::new(id, id, ServiceType::Pppoe).unwrap();
        customer.device_id = device.map(str::to_string);
        customer
    }

    fn snapshot(name: &str, bytes_in: u64, bytes_out: u64) -> SessionSnapshot {
        SessionSnapshot {
            session_name: name.to_string(),
            bytes_in,
            bytes_out,
        }
    }

    #[test]
    fn test_batches_group_by_device() {
        let mut named = pppoe("c3", Some("r1"));
        named.session_name = Some("pppoe-c3".into());
        let customers = vec![
            pppoe("c1", Some("r1")),
            pppoe("c2", Some("r2")),
            named,
            pppoe("c4", None),
            Customer::new("s1", "s1", ServiceType::StaticIp).unwrap(),
        ];
        let batches = BandwidthCollector::batches(&customers);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].0, "r1");
        assert_eq!(
            batches[0].1,
            vec![
                ("c1".to_string(), "c1".to_string()),
                ("c3".to_string(), "pppoe-c3".to_string())
            ]
        );
        assert_eq!(batches[1].1.len(), 1);
    }

    #[test]
    fn test_every_batched_customer_gets_an_entry() {
        let mut blank = pppoe("c9", Some("r1"));
        blank.customer_id = "  ".into();
        let customers = vec![pppoe("c1", Some("r1")), blank, pppoe("c2", Some("r1"))];
        assert_eq!(BandwidthCollector::batches(&customers)[0].1.len(), 2);

        let mut source = MockSessionSource::new();
        source
            .expect_active_sessions()
            .returning(|_| Ok(vec![snapshot("c1", 10, 20), snapshot("c2", 30, 40)]));
        let collector = BandwidthCollector::new(Arc::new(source), &ProbeConfig::default());
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();
        let entries = collector.collect(&customers, now);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.status == LinkStatus::Online));
    }

    #[test]
    fn test_device_failure_only_affects_its_customers() {
        let mut source = MockSessionSource::new();
        source
            .expect_active_sessions()
            .with(eq("r1"))
            .returning(|_| Ok(vec![snapshot("c1", 1_000, 2_000)]));
        source
            .expect_active_sessions()
            .with(eq("r2"))
            .returning(|_| Err(ProbeError::Transport("connection refused".into())));

        let collector = BandwidthCollector::new(Arc::new(source), &ProbeConfig::default());
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();
        let entries = collector.collect(
            &[
                pppoe("c1", Some("r1")),
                pppoe("c2", Some("r1")),
                pppoe("c3", Some("r2")),
            ],
            now,
        );

        assert_eq!(entries.len(), 3);
        let by_id: HashMap<_, _> = entries.iter().map(|e| (e.customer_id.as_str(), e)).collect();
        assert_eq!(by_id["c1"].status, LinkStatus::Online);
        assert_eq!(by_id["c1"].bytes_in, Some(1_000));
        assert_eq!(by_id["c1"].bytes_out, Some(2_000));
        assert_eq!(by_id["c2"].status, LinkStatus::Offline);
        assert_eq!(by_id["c3"].status, LinkStatus::Offline);
    }
}
