//! TOML configuration for the engine
//!
//! Every section has defaults so a missing file, or a file that names only a
//! few keys, still yields a usable configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub probes: ProbeConfig,
    pub schedule: ScheduleConfig,
    pub detection: DetectionConfig,
    pub sla: SlaConfig,
    pub anomaly: AnomalyConfig,
    pub root_cause: RootCauseConfig,
    pub alerts: AlertConfig,
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    /// Connection log rows older than this are pruned by the daily job
    pub log_retention_days: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("slawatch.db"),
            log_retention_days: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub ping_command: String,
    pub ping_count: u32,
    pub ping_timeout_secs: u64,
    pub session_timeout_secs: u64,
    /// Upper bound on probes in flight against the device-management side
    pub workers: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ping_command: "ping".to_string(),
            ping_count: 3,
            ping_timeout_secs: 5,
            session_timeout_secs: 15,
            workers: 8,
        }
    }
}

impl ProbeConfig {
    /// Hard budget for one ping probe: every echo may use the full timeout
    pub fn ping_budget(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs * u64::from(self.ping_count.max(1)) + 1)
    }

    pub fn session_budget(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

/// Job cadences in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub ping: u64,
    pub bandwidth: u64,
    pub sla: u64,
    pub daily_summary: u64,
    pub monthly_sla: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            ping: 300,
            bandwidth: 900,
            sla: 300,
            daily_summary: 86_400,
            monthly_sla: 86_400,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Only keys with a log entry this recent are considered for new incidents
    pub lookback_minutes: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            lookback_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaConfig {
    pub default_target: f64,
    /// Percentage points below target still reported as `warning`
    pub warning_margin: f64,
    pub transient_minutes: i64,
    pub discount_percent_per_point: f64,
    pub max_discount_percent: f64,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            default_target: 99.5,
            warning_margin: 0.5,
            transient_minutes: 30,
            discount_percent_per_point: 10.0,
            max_discount_percent: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub rate_lookback_days: u32,
    pub rate_major_ratio: f64,
    pub rate_critical_ratio: f64,
    pub latency_baseline_ms: f64,
    /// Relative increase over baseline (0.5 = +50%)
    pub latency_major_increase: f64,
    pub latency_critical_increase: f64,
    pub packet_loss_baseline_percent: f64,
    pub loss_major_ratio: f64,
    pub loss_critical_ratio: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            rate_lookback_days: 7,
            rate_major_ratio: 3.0,
            rate_critical_ratio: 5.0,
            latency_baseline_ms: 50.0,
            latency_major_increase: 0.5,
            latency_critical_increase: 1.0,
            packet_loss_baseline_percent: 1.0,
            loss_major_ratio: 3.0,
            loss_critical_ratio: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RootCauseConfig {
    pub window_minutes: u64,
    pub critical_affected: usize,
    pub critical_duration_minutes: i64,
    pub escalation_role: String,
    pub escalation_cooldown_minutes: i64,
}

impl Default for RootCauseConfig {
    fn default() -> Self {
        Self {
            window_minutes: 120,
            critical_affected: 10,
            critical_duration_minutes: 240,
            escalation_role: "noc".to_string(),
            escalation_cooldown_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Role that receives anomaly warnings and the daily/monthly summaries
    pub summary_role: String,
    pub stats_window_hours: i64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            summary_role: "admin".to_string(),
            stats_window_hours: 24,
        }
    }
}

/// HTTP collaborators. An empty URL selects the log-only implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub staff_url: String,
    pub customer_url: String,
    pub device_api_url: String,
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            staff_url: String::new(),
            customer_url: String::new(),
            device_api_url: String::new(),
            token: None,
            timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load and validate a configuration file
    ///
    /// # Errors
    ///
    /// `ConfigError::ReadError` when the file cannot be read, `TomlError` when
    /// it is not valid TOML, `ValidationError` when a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.schedule;
        for (name, secs) in [
            ("schedule.ping", s.ping),
            ("schedule.bandwidth", s.bandwidth),
            ("schedule.sla", s.sla),
            ("schedule.daily_summary", s.daily_summary),
            ("schedule.monthly_sla", s.monthly_sla),
        ] {
            if secs == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        if self.probes.workers == 0 {
            return Err(ConfigError::ValidationError(
                "probes.workers must be at least 1".to_string(),
            ));
        }
        if self.probes.ping_timeout_secs == 0 || self.probes.session_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "probe timeouts must be greater than zero".to_string(),
            ));
        }

        let sla = &self.sla;
        if !(sla.default_target > 0.0 && sla.default_target <= 100.0) {
            return Err(ConfigError::ValidationError(format!(
                "sla.default_target must be in (0, 100], got {}",
                sla.default_target
            )));
        }
        if sla.warning_margin < 0.0 {
            return Err(ConfigError::ValidationError(
                "sla.warning_margin must not be negative".to_string(),
            ));
        }
        if sla.discount_percent_per_point < 0.0
            || !(0.0..=100.0).contains(&sla.max_discount_percent)
        {
            return Err(ConfigError::ValidationError(
                "discount settings must be non-negative and capped at 100%".to_string(),
            ));
        }

        let a = &self.anomaly;
        if a.latency_baseline_ms <= 0.0 || a.packet_loss_baseline_percent <= 0.0 {
            return Err(ConfigError::ValidationError(
                "anomaly baselines must be positive".to_string(),
            ));
        }
        if a.rate_major_ratio > a.rate_critical_ratio
            || a.latency_major_increase > a.latency_critical_increase
            || a.loss_major_ratio > a.loss_critical_ratio
        {
            return Err(ConfigError::ValidationError(
                "anomaly major thresholds must not exceed critical thresholds".to_string(),
            ));
        }

        if self.root_cause.escalation_role.trim().is_empty()
            || self.alerts.summary_role.trim().is_empty()
        {
            return Err(ConfigError::ValidationError(
                "alert roles must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [sla]
            default_target = 99.0

            [schedule]
            ping = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.sla.default_target, 99.0);
        assert_eq!(config.sla.warning_margin, 0.5);
        assert_eq!(config.schedule.ping, 60);
        assert_eq!(config.schedule.bandwidth, 900);
        assert_eq!(config.probes.workers, 8);
    }

    #[test]
    fn test_rejects_zero_cadence() {
        let err = Config::from_toml("[schedule]\nsla = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(msg) if msg.contains("schedule.sla")));
    }

    #[test]
    fn test_rejects_target_out_of_range() {
        assert!(Config::from_toml("[sla]\ndefault_target = 101.0\n").is_err());
        assert!(Config::from_toml("[sla]\ndefault_target = 0.0\n").is_err());
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let toml = "[anomaly]\nloss_major_ratio = 6.0\nloss_critical_ratio = 5.0\n";
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let err = Config::from_toml("[sla\n").unwrap_err();
        assert!(matches!(err, ConfigError::TomlError(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[database]\npath = \"/var/lib/slawatch/state.db\"").unwrap();
        writeln!(file, "[probes]\nworkers = 2").unwrap();
        file.flush().unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.database.path, PathBuf::from("/var/lib/slawatch/state.db"));
        assert_eq!(config.probes.workers, 2);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = Config::from_file(Path::new("/nonexistent/slawatch.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError(_)));
    }

    #[test]
    fn test_ping_budget_covers_every_echo() {
        let probes = ProbeConfig::default();
        assert_eq!(probes.ping_budget(), Duration::from_secs(16));
    }
}
