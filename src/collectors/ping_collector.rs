use super::pool::probe_all;
use super::source::{PingReply, PingSource};
use crate::config::ProbeConfig;
use crate::error::{ModelError, ProbeError};
use crate::model::{ConnectionLogEntry, Customer, LinkStatus, ServiceType, Timestamp};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Liveness probing of static IP customers
///
/// One ICMP probe per customer per cycle. Every targeted customer gets exactly
/// one log entry, offline when the probe failed, errored or ran out of budget.
pub struct PingCollector {
    source: Arc<dyn PingSource>,
    workers: usize,
    budget: Duration,
}

impl PingCollector {
    pub fn new(source: Arc<dyn PingSource>, probes: &ProbeConfig) -> Self {
        Self {
            source,
            workers: probes.workers,
            budget: probes.ping_budget(),
        }
    }

    /// Customers this collector is responsible for
    pub fn targets(customers: &[Customer]) -> Vec<(String, String)> {
        customers
            .iter()
            .filter(|c| c.active && c.service_type == ServiceType::StaticIp)
            .filter(|c| !c.customer_id.trim().is_empty())
            .filter_map(|c| {
                c.probe_address
                    .as_ref()
                    .filter(|addr| !addr.trim().is_empty())
                    .map(|addr| (c.customer_id.clone(), addr.clone()))
            })
            .collect()
    }

    pub fn collect(&self, customers: &[Customer], now: Timestamp) -> Vec<ConnectionLogEntry> {
        let targets = Self::targets(customers);
        if targets.is_empty() {
            debug!("No static IP customers to ping");
            return Vec::new();
        }

        let source = Arc::clone(&self.source);
        let results = probe_all(targets, self.workers, self.budget, move |(_, address)| {
            source.ping(address)
        });

        let mut entries = Vec::with_capacity(results.len());
        let mut offline = 0usize;
        for ((customer_id, address), outcome) in results {
            let entry = match Self::to_entry(&customer_id, &address, outcome, now) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Dropping ping result for {}: {}", customer_id, e);
                    continue;
                }
            };
            if entry.is_offline() {
                offline += 1;
            }
            entries.push(entry);
        }

        info!(
            "Ping cycle: {} probed, {} offline",
            entries.len(),
            offline
        );
        entries
    }

    fn to_entry(
        customer_id: &str,
        address: &str,
        outcome: Option<Result<PingReply, ProbeError>>,
        now: Timestamp,
    ) -> Result<ConnectionLogEntry, ModelError> {
        let (status, rtt, loss) = match outcome {
            Some(Ok(reply)) if reply.is_reachable() => {
                (LinkStatus::Online, reply.avg_rtt_ms, reply.packet_loss_percent)
            }
            Some(Ok(reply)) => {
                debug!("{} ({}) did not answer", customer_id, address);
                (LinkStatus::Offline, None, reply.packet_loss_percent)
            }
            Some(Err(e)) => {
                warn!("Ping probe for {} ({}) failed: {}", customer_id, address, e);
                (LinkStatus::Offline, None, 100.0)
            }
            None => (LinkStatus::Offline, None, 100.0),
        };
        let entry = match status {
            LinkStatus::Online => {
                ConnectionLogEntry::online(customer_id, ServiceType::StaticIp, now)?
            }
            LinkStatus::Offline => {
                ConnectionLogEntry::offline(customer_id, ServiceType::StaticIp, now)?
            }
        };
        // the sample still counts when only the measurements are unusable
        match entry.clone().with_ping(rtt, loss) {
            Ok(measured) => Ok(measured),
            Err(e) => {
                warn!(
                    "Discarding ping measurements for {} ({}): {}",
                    customer_id, address, e
                );
                Ok(entry)
            }
        }
    }
}
