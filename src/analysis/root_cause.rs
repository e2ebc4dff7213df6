//! Root-cause hypotheses for downtime incidents
//!
//! An incident is placed in an impact tier by how many customers behind the
//! same aggregation point went down with it. The tier fixes a base confidence
//! and the candidate causes, which are ranked by impact score.

use crate::config::RootCauseConfig;
use crate::error::{ModelError, StoreError};
use crate::model::{minutes_between, Alert, AlertType, Customer, Incident, Timestamp};
use crate::store::{CustomerRegistry, Store};
use chrono::Duration;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactTier {
    MassOutage,
    Infrastructure,
    IsolatedCustomer,
}

impl ImpactTier {
    pub fn classify(affected: usize) -> Self {
        match affected {
            n if n >= 10 => ImpactTier::MassOutage,
            n if n >= 2 => ImpactTier::Infrastructure,
            _ => ImpactTier::IsolatedCustomer,
        }
    }

    /// Base confidence in the tier itself
    pub fn confidence(affected: usize) -> f64 {
        match affected {
            n if n >= 10 => 0.90,
            n if n >= 5 => 0.80,
            n if n >= 2 => 0.70,
            _ => 0.95,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImpactTier::MassOutage => "mass outage",
            ImpactTier::Infrastructure => "infrastructure",
            ImpactTier::IsolatedCustomer => "isolated customer issue",
        }
    }
}

impl fmt::Display for ImpactTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cause {
    PowerLoss,
    FiberCut,
    DeviceFailure,
    Congestion,
    CustomerPremise,
}

impl Cause {
    pub fn describe(&self) -> &'static str {
        match self {
            Cause::PowerLoss => "Power loss at the distribution site",
            Cause::FiberCut => "Fiber cut on the feeder or drop cable",
            Cause::DeviceFailure => "Failure of the aggregation device",
            Cause::Congestion => "Upstream congestion",
            Cause::CustomerPremise => "Fault at the customer premises",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactSeverity {
    Minor,
    Major,
    Critical,
}

impl fmt::Display for ImpactSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImpactSeverity::Minor => "minor",
            ImpactSeverity::Major => "major",
            ImpactSeverity::Critical => "critical",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hypothesis {
    pub cause: Cause,
    pub confidence: f64,
    pub impact_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RootCauseAnalysis {
    pub incident_id: i64,
    pub customer_id: String,
    pub aggregation_point: Option<String>,
    pub service_area: Option<String>,
    pub affected_customers: usize,
    pub duration_minutes: i64,
    pub tier: ImpactTier,
    pub confidence: f64,
    pub severity: ImpactSeverity,
    /// Highest impact first
    pub hypotheses: Vec<Hypothesis>,
    pub recommended_actions: Vec<String>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Candidate causes per tier: (cause, likelihood, blast-radius weight)
fn candidates(tier: ImpactTier) -> &'static [(Cause, f64, f64)] {
    match tier {
        ImpactTier::MassOutage => &[
            (Cause::PowerLoss, 0.45, 100.0),
            (Cause::FiberCut, 0.35, 90.0),
            (Cause::DeviceFailure, 0.15, 85.0),
            (Cause::Congestion, 0.05, 40.0),
        ],
        ImpactTier::Infrastructure => &[
            (Cause::DeviceFailure, 0.40, 80.0),
            (Cause::FiberCut, 0.30, 75.0),
            (Cause::PowerLoss, 0.20, 70.0),
            (Cause::Congestion, 0.10, 35.0),
        ],
        ImpactTier::IsolatedCustomer => &[
            (Cause::CustomerPremise, 0.60, 30.0),
            (Cause::FiberCut, 0.25, 25.0),
            (Cause::Congestion, 0.15, 10.0),
        ],
    }
}

/// Ranked hypotheses for a tier
pub fn hypotheses(tier: ImpactTier, tier_confidence: f64) -> Vec<Hypothesis> {
    let mut ranked: Vec<Hypothesis> = candidates(tier)
        .iter()
        .map(|&(cause, likelihood, weight)| {
            let confidence = round2(likelihood * tier_confidence);
            Hypothesis {
                cause,
                confidence,
                impact_score: round2(weight * likelihood * tier_confidence),
            }
        })
        .collect();
    ranked.sort_by(|a, b| b.impact_score.total_cmp(&a.impact_score));
    ranked
}

pub fn recommended_actions(tier: ImpactTier, aggregation_point: Option<&str>) -> Vec<String> {
    let site = aggregation_point.unwrap_or("the serving site");
    match tier {
        ImpactTier::MassOutage => vec![
            format!("Check power and UPS status at {}", site),
            format!("Inspect the feeder fiber leaving {}", site),
            "Dispatch the field team on standby".to_string(),
            "Notify affected customers of a known outage".to_string(),
        ],
        ImpactTier::Infrastructure => vec![
            format!("Check device health and uplink at {}", site),
            "Verify optical levels on the affected ports".to_string(),
            "Review configuration changes from the last 24 hours".to_string(),
        ],
        ImpactTier::IsolatedCustomer => vec![
            "Contact the customer to confirm CPE power".to_string(),
            "Check drop cable and ONT signal levels".to_string(),
            "Schedule a technician visit if not restored".to_string(),
        ],
    }
}

/// Classifies incidents by shared infrastructure and proposes causes
pub struct RootCauseAnalyzer {
    store: Arc<Store>,
    registry: Arc<dyn CustomerRegistry>,
    config: RootCauseConfig,
}

impl RootCauseAnalyzer {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<dyn CustomerRegistry>,
        config: RootCauseConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Analyze several incidents sharing one snapshot of ongoing incidents
    pub fn analyze_all(&self, incidents: &[Incident], now: Timestamp) -> Vec<RootCauseAnalysis> {
        if incidents.is_empty() {
            return Vec::new();
        }
        let context = match self.context(now) {
            Ok(context) => context,
            Err(e) => {
                error!("Root-cause analysis skipped: {}", e);
                return Vec::new();
            }
        };
        incidents
            .iter()
            .map(|incident| self.analyze_with(incident, &context, now))
            .collect()
    }

    /// Reload incidents by id and analyze the ones still ongoing
    pub fn reanalyze(&self, incident_ids: &[i64], now: Timestamp) -> Vec<RootCauseAnalysis> {
        let mut still_down = Vec::new();
        for &id in incident_ids {
            match self.store.incident(id) {
                Ok(incident) if incident.is_ongoing() => still_down.push(incident),
                Ok(_) => debug!("Incident {} is no longer ongoing", id),
                Err(e) => warn!("Cannot reload incident {} for analysis: {}", id, e),
            }
        }
        self.analyze_all(&still_down, now)
    }

    pub fn analyze(
        &self,
        incident: &Incident,
        now: Timestamp,
    ) -> Result<RootCauseAnalysis, StoreError> {
        let context = self.context(now)?;
        Ok(self.analyze_with(incident, &context, now))
    }

    fn context(&self, now: Timestamp) -> Result<AnalysisContext, StoreError> {
        let customers: HashMap<String, Customer> = self
            .registry
            .active_customers()?
            .into_iter()
            .map(|c| (c.customer_id.clone(), c))
            .collect();
        let since = now - Duration::minutes(self.config.window_minutes as i64);
        let recent_down: Vec<Incident> = self
            .store
            .ongoing_incidents()?
            .into_iter()
            .filter(|i| i.start_time >= since)
            .collect();
        Ok(AnalysisContext {
            customers,
            recent_down,
        })
    }

    fn analyze_with(
        &self,
        incident: &Incident,
        context: &AnalysisContext,
        now: Timestamp,
    ) -> RootCauseAnalysis {
        let customer = context.customers.get(&incident.customer_id);
        let aggregation_point = customer.and_then(|c| c.aggregation_point.clone());
        let service_area = customer.and_then(|c| c.service_area.clone());

        let affected = match &aggregation_point {
            Some(point) => {
                let mut ids: Vec<&str> = context
                    .recent_down
                    .iter()
                    .filter(|i| {
                        context
                            .customers
                            .get(&i.customer_id)
                            .and_then(|c| c.aggregation_point.as_ref())
                            == Some(point)
                    })
                    .map(|i| i.customer_id.as_str())
                    .collect();
                ids.push(incident.customer_id.as_str());
                ids.sort_unstable();
                ids.dedup();
                ids.len()
            }
            None => 1,
        };

        let duration_minutes = minutes_between(incident.start_time, incident.effective_end(now));
        let tier = ImpactTier::classify(affected);
        let confidence = ImpactTier::confidence(affected);
        let severity = if affected >= self.config.critical_affected
            || duration_minutes >= self.config.critical_duration_minutes
        {
            ImpactSeverity::Critical
        } else if affected >= 2 {
            ImpactSeverity::Major
        } else {
            ImpactSeverity::Minor
        };

        debug!(
            "Incident {} ({}): {} affected behind {:?}, {} ({:.2}), {}",
            incident.id, incident.customer_id, affected, aggregation_point, tier, confidence, severity
        );
        if severity == ImpactSeverity::Critical {
            info!(
                "Critical incident {} for {}: {} with {} customers affected",
                incident.id, incident.customer_id, tier, affected
            );
        }

        RootCauseAnalysis {
            incident_id: incident.id,
            customer_id: incident.customer_id.clone(),
            recommended_actions: recommended_actions(tier, aggregation_point.as_deref()),
            aggregation_point,
            service_area,
            affected_customers: affected,
            duration_minutes,
            tier,
            confidence,
            severity,
            hypotheses: hypotheses(tier, confidence),
        }
    }
}

struct AnalysisContext {
    customers: HashMap<String, Customer>,
    recent_down: Vec<Incident>,
}

impl RootCauseAnalysis {
    /// Internal escalation for a critical analysis, `None` otherwise
    pub fn escalation_alert(&self, role: &str) -> Result<Option<Alert>, ModelError> {
        if self.severity != ImpactSeverity::Critical {
            return Ok(None);
        }
        let site = self.aggregation_point.as_deref().unwrap_or("unknown site");
        let title = format!(
            "CRITICAL: {} at {} ({} customers)",
            self.tier, site, self.affected_customers
        );

        let mut body = format!(
            "Incident #{} for {} has been down {} minutes.\nClassification: {} (confidence {:.2})\n\nTop hypotheses:\n",
            self.incident_id, self.customer_id, self.duration_minutes, self.tier, self.confidence
        );
        for (rank, hypothesis) in self.hypotheses.iter().take(3).enumerate() {
            body.push_str(&format!(
                "{}. {} (confidence {:.2}, impact {:.1})\n",
                rank + 1,
                hypothesis.cause.describe(),
                hypothesis.confidence,
                hypothesis.impact_score
            ));
        }
        body.push_str("\nRecommended actions:\n");
        for action in &self.recommended_actions {
            body.push_str(&format!("- {}\n", action));
        }

        let alert = Alert::to_role(AlertType::Critical, role, self.service_area.clone(), title, body)?
            .with_metadata("incident_id", self.incident_id.to_string())
            .with_metadata("tier", self.tier.as_str())
            .with_metadata("affected_customers", self.affected_customers.to_string())
            .with_metadata("aggregation_point", site);
        Ok(Some(alert))
    }
}
