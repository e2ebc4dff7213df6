use super::calculator;
use crate::config::SlaConfig;
use crate::error::StoreError;
use crate::model::{Customer, MonthYear, SlaRecord, SlaStatus, Timestamp};
use crate::store::Store;
use log::{debug, error, info};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct AggregationReport {
    pub records: Vec<SlaRecord>,
    pub failures: usize,
}

impl AggregationReport {
    pub fn breaches(&self) -> impl Iterator<Item = &SlaRecord> {
        self.records
            .iter()
            .filter(|r| r.sla_status == SlaStatus::Breach)
    }
}

/// Rolls incidents up into per-customer monthly SLA records
pub struct SlaAggregator {
    store: Arc<Store>,
    config: SlaConfig,
}

impl SlaAggregator {
    pub fn new(store: Arc<Store>, config: SlaConfig) -> Self {
        Self { store, config }
    }

    /// Recompute and upsert the record for one customer and month
    pub fn aggregate(
        &self,
        customer: &Customer,
        month: MonthYear,
        now: Timestamp,
    ) -> Result<SlaRecord, StoreError> {
        let incidents = self.store.downtime_overlapping(
            &customer.customer_id,
            month.start(),
            month.end(),
            now,
        )?;
        let target = customer.sla_target.unwrap_or(self.config.default_target);
        let record = calculator::compute(
            &customer.customer_id,
            month,
            &incidents,
            target,
            customer.monthly_fee,
            &self.config,
        );
        self.store.upsert_sla(&record)?;
        debug!(
            "SLA {} {}: {:.3}% ({}), {} counted minutes",
            record.customer_id,
            month,
            record.sla_percentage,
            record.sla_status,
            record.counted_downtime_minutes
        );
        Ok(record)
    }

    /// Aggregate every customer; one customer's failure does not stop the rest
    pub fn aggregate_all(
        &self,
        customers: &[Customer],
        month: MonthYear,
        now: Timestamp,
    ) -> AggregationReport {
        let mut report = AggregationReport::default();
        for customer in customers {
            match self.aggregate(customer, month, now) {
                Ok(record) => report.records.push(record),
                Err(e) => {
                    error!(
                        "SLA aggregation failed for {} {}: {}",
                        customer.customer_id, month, e
                    );
                    report.failures += 1;
                }
            }
        }
        info!(
            "SLA aggregation for {}: {} records, {} breaches, {} failures",
            month,
            report.records.len(),
            report.breaches().count(),
            report.failures
        );
        report
    }
}
