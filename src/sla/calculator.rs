//! Pure SLA arithmetic
//!
//! No I/O here: the same incidents and settings always produce the same record.

use crate::config::SlaConfig;
use crate::model::{Incident, IncidentType, MonthYear, SlaRecord, SlaStatus};

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Availability percentage, floored at zero and rounded to three places
pub fn sla_percentage(total_minutes: f64, counted_downtime_minutes: f64) -> f64 {
    if total_minutes <= 0.0 {
        return 0.0;
    }
    let raw = (total_minutes - counted_downtime_minutes) / total_minutes * 100.0;
    round_to(raw.clamp(0.0, 100.0), 3)
}

/// `met` at or above target, `warning` strictly inside the margin, else `breach`
pub fn classify(percentage: f64, target: f64, warning_margin: f64) -> SlaStatus {
    if percentage >= target {
        SlaStatus::Met
    } else if percentage > target - warning_margin {
        SlaStatus::Warning
    } else {
        SlaStatus::Breach
    }
}

/// Credit owed on a breach: a fixed share of the fee per point of shortfall, capped
pub fn discount_amount(
    percentage: f64,
    target: f64,
    status: SlaStatus,
    monthly_fee: f64,
    config: &SlaConfig,
) -> f64 {
    if status != SlaStatus::Breach || monthly_fee <= 0.0 {
        return 0.0;
    }
    let shortfall = (target - percentage).max(0.0);
    let percent_off =
        (shortfall * config.discount_percent_per_point).min(config.max_discount_percent);
    round_to(monthly_fee * percent_off / 100.0, 2)
}

/// Build the record for one customer and month from the incidents touching it
///
/// Only downtime incidents count. Durations are taken as recorded, so an
/// incident still ongoing contributes nothing until it is closed.
pub fn compute(
    customer_id: &str,
    month: MonthYear,
    incidents: &[Incident],
    target: f64,
    monthly_fee: f64,
    config: &SlaConfig,
) -> SlaRecord {
    let total_minutes = month.total_minutes();
    let downtime: Vec<&Incident> = incidents
        .iter()
        .filter(|i| i.incident_type == IncidentType::Downtime)
        .collect();

    let downtime_minutes: f64 = downtime
        .iter()
        .map(|i| i.duration_minutes.max(0) as f64)
        .sum();
    let excluded_downtime_minutes: f64 = downtime
        .iter()
        .filter(|i| !i.is_counted_in_sla)
        .map(|i| i.duration_minutes.max(0) as f64)
        .sum();

    let percentage = sla_percentage(total_minutes, downtime_minutes - excluded_downtime_minutes);
    let status = classify(percentage, target, config.warning_margin);
    let discount = discount_amount(percentage, target, status, monthly_fee, config);

    SlaRecord::assemble(
        customer_id.to_string(),
        month,
        total_minutes,
        downtime_minutes,
        excluded_downtime_minutes,
        percentage,
        target,
        status,
        downtime.len() as u32,
        discount,
    )
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::model::{ExcludeReason, ServiceType};
    use chrono::{Duration, TimeZone, Utc};
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    /// A month's worth of closed downtime incidents, some excluded
    #[derive(Debug, Clone)]
    struct MonthIncidents(Vec<Incident>);

    impl Arbitrary for MonthIncidents {
        fn arbitrary(g: &mut Gen) -> Self {
            let count = usize::arbitrary(g) % 20;
            let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            let incidents = (0..count)
                .map(|_| {
                    let offset = i64::from(u16::arbitrary(g) % 40_000);
                    let minutes = i64::from(u16::arbitrary(g) % 600);
                    let start = base + Duration::minutes(offset);
                    let mut incident =
                        Incident::open_downtime("c1", ServiceType::StaticIp, start).unwrap();
                    incident.resolve(start + Duration::minutes(minutes)).unwrap();
                    if bool::arbitrary(g) {
                        incident.exclude(ExcludeReason::Maintenance, start).unwrap();
                    }
                    incident
                })
                .collect();
            MonthIncidents(incidents)
        }
    }

    #[quickcheck]
    fn prop_counted_plus_excluded_is_downtime(incidents: MonthIncidents) -> bool {
        let month = "2024-01".parse().unwrap();
        let record = compute("c1", month, &incidents.0, 99.5, 100.0, &SlaConfig::default());
        (record.counted_downtime_minutes + record.excluded_downtime_minutes
            - record.downtime_minutes)
            .abs()
            < 1e-9
    }

    #[quickcheck]
    fn prop_more_downtime_never_raises_percentage(a: u32, b: u32) -> bool {
        let total = 43_200.0;
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let low = f64::from(low % 50_000);
        let high = f64::from(high % 50_000).max(low);
        sla_percentage(total, high) <= sla_percentage(total, low)
    }

    #[quickcheck]
    fn prop_recompute_is_identical(incidents: MonthIncidents) -> bool {
        let month = "2024-01".parse().unwrap();
        let config = SlaConfig::default();
        compute("c1", month, &incidents.0, 99.5, 250.0, &config)
            == compute("c1", month, &incidents.0, 99.5, 250.0, &config)
    }

    #[quickcheck]
    fn prop_discount_grows_with_shortfall(a: u16, b: u16) -> bool {
        let config = SlaConfig::default();
        let p1 = 99.0 - f64::from(a % 1_000) / 100.0;
        let p2 = 99.0 - f64::from(b % 1_000) / 100.0;
        let (worse, better) = if p1 <= p2 { (p1, p2) } else { (p2, p1) };
        let d_worse = discount_amount(worse, 99.5, SlaStatus::Breach, 1_000.0, &config);
        let d_better = discount_amount(better, 99.5, SlaStatus::Breach, 1_000.0, &config);
        d_worse >= d_better && d_worse <= 1_000.0 * config.max_discount_percent / 100.0
    }
}
