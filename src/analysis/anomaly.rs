use crate::config::AnomalyConfig;
use crate::error::StoreError;
use crate::model::{Anomaly, AnomalyMetric, AnomalySeverity, Timestamp};
use crate::store::Store;
use chrono::Duration;
use log::{debug, error, warn};
use std::sync::Arc;

/// Severity for a value's ratio against its normal level
fn grade(ratio: f64, major: f64, critical: f64) -> Option<AnomalySeverity> {
    if ratio > critical {
        Some(AnomalySeverity::Critical)
    } else if ratio > major {
        Some(AnomalySeverity::Major)
    } else {
        None
    }
}

/// 0-100, reaching 100 at the critical threshold
fn score(ratio: f64, critical: f64) -> f64 {
    if critical <= 0.0 {
        return 100.0;
    }
    (ratio / critical * 100.0).clamp(0.0, 100.0)
}

/// Compares live aggregates against their baselines
///
/// The three checks are independent; a store error in one is logged and the
/// others still run.
pub struct AnomalyDetector {
    store: Arc<Store>,
    config: AnomalyConfig,
}

impl AnomalyDetector {
    pub fn new(store: Arc<Store>, config: AnomalyConfig) -> Self {
        Self { store, config }
    }

    pub fn run_at(&self, now: Timestamp) -> Vec<Anomaly> {
        let checks: [(&str, Result<Option<Anomaly>, StoreError>); 3] = [
            ("incident rate", self.check_incident_rate(now)),
            ("latency", self.check_latency(now)),
            ("packet loss", self.check_packet_loss(now)),
        ];

        let mut anomalies = Vec::new();
        for (name, result) in checks {
            match result {
                Ok(Some(anomaly)) => {
                    warn!(
                        "{} anomaly: {:.2} outside {:?} (score {:.0}, {})",
                        name,
                        anomaly.current_value,
                        anomaly.normal_range,
                        anomaly.anomaly_score,
                        anomaly.severity
                    );
                    anomalies.push(anomaly);
                }
                Ok(None) => debug!("{} within normal range", name),
                Err(e) => error!("{} check failed: {}", name, e),
            }
        }
        anomalies
    }

    /// Incidents opened in the last hour against the same hour on previous days
    pub fn check_incident_rate(&self, now: Timestamp) -> Result<Option<Anomaly>, StoreError> {
        let hour = Duration::hours(1);
        let current = f64::from(self.store.count_incidents_started(now - hour, now)?);

        let days = self.config.rate_lookback_days.max(1);
        let mut total = 0u32;
        for day in 1..=days {
            let end = now - Duration::days(i64::from(day));
            total += self.store.count_incidents_started(end - hour, end)?;
        }
        // a quiet history must not turn one incident into a spike
        let baseline = (f64::from(total) / f64::from(days)).max(1.0);
        let ratio = current / baseline;

        let c = &self.config;
        self.build(
            now,
            AnomalyMetric::IncidentRate,
            current,
            (0.0, baseline * c.rate_major_ratio),
            ratio,
            c.rate_major_ratio,
            c.rate_critical_ratio,
        )
    }

    /// Trailing-hour mean response time against the fixed baseline
    pub fn check_latency(&self, now: Timestamp) -> Result<Option<Anomaly>, StoreError> {
        let Some(mean) = self.store.mean_response_time(now - Duration::hours(1), now)? else {
            return Ok(None);
        };
        let c = &self.config;
        let increase = (mean - c.latency_baseline_ms) / c.latency_baseline_ms;
        self.build(
            now,
            AnomalyMetric::Latency,
            mean,
            (0.0, c.latency_baseline_ms * (1.0 + c.latency_major_increase)),
            increase,
            c.latency_major_increase,
            c.latency_critical_increase,
        )
    }

    /// Trailing-hour mean packet loss against the fixed baseline
    pub fn check_packet_loss(&self, now: Timestamp) -> Result<Option<Anomaly>, StoreError> {
        let Some(mean) = self.store.mean_packet_loss(now - Duration::hours(1), now)? else {
            return Ok(None);
        };
        let c = &self.config;
        let ratio = mean / c.packet_loss_baseline_percent;
        self.build(
            now,
            AnomalyMetric::PacketLoss,
            mean,
            (0.0, c.packet_loss_baseline_percent * c.loss_major_ratio),
            ratio,
            c.loss_major_ratio,
            c.loss_critical_ratio,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        now: Timestamp,
        metric: AnomalyMetric,
        value: f64,
        normal_range: (f64, f64),
        ratio: f64,
        major: f64,
        critical: f64,
    ) -> Result<Option<Anomaly>, StoreError> {
        let Some(severity) = grade(ratio, major, critical) else {
            return Ok(None);
        };
        Anomaly::new(now, metric, value, normal_range, score(ratio, critical), severity)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                table: "connection_logs",
                detail: e.to_string(),
            })
    }
}
