use super::{Job, JobName, JobReport};
use crate::alerts::{AlertRouter, EscalationLimiter, Escalator};
use crate::analysis::{AnomalyDetector, RootCauseAnalyzer};
use crate::collectors::{BandwidthCollector, LogWriter, PingCollector};
use crate::config::{AlertConfig, DatabaseConfig, RootCauseConfig};
use crate::incidents::{ExclusionEngine, IncidentDetector};
use crate::model::{
    Alert, AlertType, Anomaly, AnomalySeverity, ConnectionLogEntry, MonthYear, Timestamp,
};
use crate::sla::SlaAggregator;
use crate::store::{CustomerRegistry, Store};
use anyhow::Context;
use chrono::Duration;
use log::{debug, warn};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard};

fn write_entries(
    writer: &LogWriter,
    entries: Vec<ConnectionLogEntry>,
    kind: &str,
) -> anyhow::Result<JobReport> {
    let offline = entries.iter().filter(|e| e.is_offline()).count();
    let written = writer
        .write_cycle(&entries)
        .with_context(|| format!("writing {} {} samples", entries.len(), kind))?;
    Ok(JobReport::new(
        written,
        0,
        format!("{} {} samples, {} offline", written, kind, offline),
    ))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Routes an alert, logging rather than failing the job when delivery fails
fn notify(router: &AlertRouter, alert: &Alert, now: Timestamp) -> bool {
    match router.route_alert(alert, now) {
        Ok(_) => true,
        Err(e) => {
            warn!("Alert '{}' not delivered: {}", alert.title, e);
            false
        }
    }
}

/// ICMP reachability for static IP customers
pub struct PingJob {
    registry: Arc<dyn CustomerRegistry>,
    collector: PingCollector,
    writer: LogWriter,
}

impl PingJob {
    pub fn new(
        registry: Arc<dyn CustomerRegistry>,
        collector: PingCollector,
        writer: LogWriter,
    ) -> Self {
        Self {
            registry,
            collector,
            writer,
        }
    }
}

impl Job for PingJob {
    fn name(&self) -> JobName {
        JobName::Ping
    }

    fn run(&self, now: Timestamp) -> anyhow::Result<JobReport> {
        let customers = self
            .registry
            .active_customers()
            .context("loading active customers")?;
        write_entries(&self.writer, self.collector.collect(&customers, now), "ping")
    }
}

/// PPPoE session presence and counters, per device
pub struct BandwidthJob {
    registry: Arc<dyn CustomerRegistry>,
    collector: BandwidthCollector,
    writer: LogWriter,
}

impl BandwidthJob {
    pub fn new(
        registry: Arc<dyn CustomerRegistry>,
        collector: BandwidthCollector,
        writer: LogWriter,
    ) -> Self {
        Self {
            registry,
            collector,
            writer,
        }
    }
}

impl Job for BandwidthJob {
    fn name(&self) -> JobName {
        JobName::Bandwidth
    }

    fn run(&self, now: Timestamp) -> anyhow::Result<JobReport> {
        let customers = self
            .registry
            .active_customers()
            .context("loading active customers")?;
        write_entries(
            &self.writer,
            self.collector.collect(&customers, now),
            "session",
        )
    }
}

/// Detection, policy, analysis and the running month's SLA in one pass
pub struct SlaJob {
    registry: Arc<dyn CustomerRegistry>,
    detector: IncidentDetector,
    exclusion: ExclusionEngine,
    anomalies: AnomalyDetector,
    root_cause: RootCauseAnalyzer,
    escalator: Escalator,
    aggregator: SlaAggregator,
    router: Arc<AlertRouter>,
    summary_role: String,
    anomaly_limiter: Mutex<EscalationLimiter>,
    /// Critical incidents whose escalation has not been delivered yet
    pending_escalations: Mutex<Vec<i64>>,
}

impl SlaJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<dyn CustomerRegistry>,
        detector: IncidentDetector,
        exclusion: ExclusionEngine,
        anomalies: AnomalyDetector,
        root_cause: RootCauseAnalyzer,
        aggregator: SlaAggregator,
        router: Arc<AlertRouter>,
        root_cause_config: &RootCauseConfig,
        alerts: &AlertConfig,
    ) -> Self {
        Self {
            registry,
            detector,
            exclusion,
            anomalies,
            root_cause,
            escalator: Escalator::new(Arc::clone(&router), root_cause_config),
            aggregator,
            router,
            summary_role: alerts.summary_role.clone(),
            anomaly_limiter: Mutex::new(EscalationLimiter::with_cooldown_minutes(
                root_cause_config.escalation_cooldown_minutes,
            )),
            pending_escalations: Mutex::new(Vec::new()),
        }
    }

    fn anomaly_alert(&self, anomaly: &Anomaly) -> Option<Alert> {
        let alert_type = match anomaly.severity {
            AnomalySeverity::Critical => AlertType::Critical,
            AnomalySeverity::Major => AlertType::Warning,
        };
        let title = format!("{} anomaly: {}", anomaly.severity, anomaly.metric);
        let body = format!(
            "Current value {:.2} is outside the normal range {:.2} - {:.2} (score {:.0}).",
            anomaly.current_value,
            anomaly.normal_range.0,
            anomaly.normal_range.1,
            anomaly.anomaly_score
        );
        match Alert::to_role(alert_type, self.summary_role.as_str(), None, title, body) {
            Ok(alert) => Some(alert.with_metadata("metric", anomaly.metric.as_str())),
            Err(e) => {
                warn!("Cannot build anomaly alert: {}", e);
                None
            }
        }
    }

    fn report_anomalies(&self, anomalies: &[Anomaly], now: Timestamp) -> (usize, usize) {
        let mut sent = 0;
        let mut failed = 0;
        for anomaly in anomalies {
            let key = anomaly.metric.as_str();
            if !lock(&self.anomaly_limiter).can_send(key, now) {
                debug!("{} anomaly already reported within cooldown", key);
                continue;
            }
            let Some(alert) = self.anomaly_alert(anomaly) else {
                failed += 1;
                continue;
            };
            if notify(&self.router, &alert, now) {
                lock(&self.anomaly_limiter).record_at(key, now);
                sent += 1;
            } else {
                failed += 1;
            }
        }
        (sent, failed)
    }
}

impl Job for SlaJob {
    fn name(&self) -> JobName {
        JobName::Sla
    }

    fn run(&self, now: Timestamp) -> anyhow::Result<JobReport> {
        let detection = self.detector.run_at(now).context("incident detection")?;
        let policy = self.exclusion.run_at(now).context("exclusion policy")?;

        let anomalies = self.anomalies.run_at(now);
        let (anomaly_alerts, anomaly_failures) = self.report_anomalies(&anomalies, now);

        let excluded: HashSet<i64> = policy.excluded.iter().map(|i| i.id).collect();
        let fresh: Vec<_> = detection
            .opened
            .iter()
            .filter(|i| !excluded.contains(&i.id))
            .cloned()
            .collect();
        let mut analyses = self.root_cause.analyze_all(&fresh, now);
        let retry = std::mem::take(&mut *lock(&self.pending_escalations));
        if !retry.is_empty() {
            debug!("Retrying escalation for {} incidents", retry.len());
            analyses.extend(self.root_cause.reanalyze(&retry, now));
        }
        let escalation = self.escalator.escalate(&analyses, now);
        lock(&self.pending_escalations).extend(escalation.undelivered.iter().copied());

        let customers = self
            .registry
            .active_customers()
            .context("loading active customers")?;
        let month = MonthYear::containing(now);
        let sla = self.aggregator.aggregate_all(&customers, month, now);

        let failures = detection.failures
            + policy.failures
            + anomaly_failures
            + escalation.failed
            + sla.failures;
        Ok(JobReport::new(
            detection.opened.len() + detection.resolved.len() + policy.evaluated + sla.records.len(),
            failures,
            format!(
                "{} opened, {} resolved, {} excluded, {} anomalies ({} alerted), \
                 {} escalated, {} suppressed, {} SLA records for {} ({} breaches)",
                detection.opened.len(),
                detection.resolved.len(),
                policy.excluded.len(),
                anomalies.len(),
                anomaly_alerts,
                escalation.sent,
                escalation.suppressed,
                sla.records.len(),
                month,
                sla.breaches().count()
            ),
        ))
    }
}

/// Daily staff digest plus connection log retention
pub struct DailySummaryJob {
    store: Arc<Store>,
    router: Arc<AlertRouter>,
    summary_role: String,
    stats_window_hours: i64,
    retention_days: u32,
}

impl DailySummaryJob {
    pub fn new(
        store: Arc<Store>,
        router: Arc<AlertRouter>,
        alerts: &AlertConfig,
        database: &DatabaseConfig,
    ) -> Self {
        Self {
            store,
            router,
            summary_role: alerts.summary_role.clone(),
            stats_window_hours: alerts.stats_window_hours,
            retention_days: database.log_retention_days,
        }
    }
}

impl Job for DailySummaryJob {
    fn name(&self) -> JobName {
        JobName::DailySummary
    }

    fn run(&self, now: Timestamp) -> anyhow::Result<JobReport> {
        let counts = self
            .store
            .incident_counts_since(now - Duration::hours(24))
            .context("counting incidents")?;
        let stats = self
            .store
            .delivery_stats_since(now - Duration::hours(self.stats_window_hours))
            .context("reading delivery stats")?;
        let pruned = self
            .store
            .prune_logs(now - Duration::days(i64::from(self.retention_days)))
            .context("pruning connection logs")?;

        let mut body = format!(
            "Incidents in the last 24h: {} opened, {} resolved, {} excluded.\n\
             Currently ongoing: {}.\n\
             Alerts in the last {}h: {} sent, {} failed ({:.1}% delivered).\n",
            counts.opened,
            counts.resolved,
            counts.excluded,
            counts.ongoing,
            self.stats_window_hours,
            stats.sent,
            stats.failed,
            stats.success_rate()
        );
        for (channel, (sent, failed)) in &stats.by_channel {
            let _ = writeln!(body, "- {}: {} sent, {} failed", channel, sent, failed);
        }
        let _ = write!(body, "Pruned {} old connection log entries.", pruned);

        let alert = Alert::to_role(
            AlertType::Info,
            self.summary_role.as_str(),
            None,
            format!("Daily network summary {}", now.format("%Y-%m-%d")),
            body,
        )?;
        let delivered = notify(&self.router, &alert, now);
        Ok(JobReport::new(
            counts.opened as usize,
            usize::from(!delivered),
            format!(
                "{} opened, {} ongoing, {} log entries pruned, summary {}",
                counts.opened,
                counts.ongoing,
                pruned,
                if delivered { "sent" } else { "not delivered" }
            ),
        ))
    }
}

/// Closes out the previous month's SLA records
///
/// Runs daily; the records are recomputed every run, the staff summary is sent
/// once per month per process.
pub struct MonthlySlaJob {
    registry: Arc<dyn CustomerRegistry>,
    aggregator: SlaAggregator,
    router: Arc<AlertRouter>,
    summary_role: String,
    last_summarized: Mutex<Option<MonthYear>>,
}

impl MonthlySlaJob {
    pub fn new(
        registry: Arc<dyn CustomerRegistry>,
        aggregator: SlaAggregator,
        router: Arc<AlertRouter>,
        alerts: &AlertConfig,
    ) -> Self {
        Self {
            registry,
            aggregator,
            router,
            summary_role: alerts.summary_role.clone(),
            last_summarized: Mutex::new(None),
        }
    }
}

impl Job for MonthlySlaJob {
    fn name(&self) -> JobName {
        JobName::MonthlySla
    }

    fn run(&self, now: Timestamp) -> anyhow::Result<JobReport> {
        let month = MonthYear::containing(now).previous();
        let customers = self
            .registry
            .active_customers()
            .context("loading active customers")?;
        let report = self.aggregator.aggregate_all(&customers, month, now);

        let mut last = lock(&self.last_summarized);
        let mut failures = report.failures;
        if *last != Some(month) {
            let breaches: Vec<_> = report.breaches().collect();
            let total_discount: f64 = breaches.iter().map(|r| r.discount_amount).sum();
            let mut body = format!(
                "{} customers aggregated, {} breaches, total discount {:.2}.\n",
                report.records.len(),
                breaches.len(),
                total_discount
            );
            for record in &breaches {
                let _ = writeln!(
                    body,
                    "- {}: {:.3}% (target {:.1}%), {} incidents, discount {:.2}",
                    record.customer_id,
                    record.sla_percentage,
                    record.sla_target,
                    record.incident_count,
                    record.discount_amount
                );
            }
            let alert = Alert::to_role(
                if breaches.is_empty() {
                    AlertType::Info
                } else {
                    AlertType::Warning
                },
                self.summary_role.as_str(),
                None,
                format!("SLA report {}", month),
                body,
            )?;
            if notify(&self.router, &alert, now) {
                *last = Some(month);
            } else {
                failures += 1;
            }
        }

        Ok(JobReport::new(
            report.records.len(),
            failures,
            format!(
                "{}: {} records, {} breaches",
                month,
                report.records.len(),
                report.breaches().count()
            ),
        ))
    }
}
