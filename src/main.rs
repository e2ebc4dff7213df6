use chrono::Utc;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use slawatch::admin::Admin;
use slawatch::alerts::{sender_for, AlertRouter};
use slawatch::analysis::{AnomalyDetector, RootCauseAnalyzer};
use slawatch::collectors::{
    BandwidthCollector, HttpSessionSource, LogWriter, PingCollector, SystemPing,
};
use slawatch::config::Config;
use slawatch::error::ConfigError;
use slawatch::gateway::HttpGateway;
use slawatch::incidents::{ExclusionEngine, IncidentDetector};
use slawatch::model::MonthYear;
use slawatch::scheduler::{
    BandwidthJob, DailySummaryJob, MonthlySlaJob, PingJob, Scheduler, SlaJob,
};
use slawatch::sla::SlaAggregator;
use slawatch::store::{CustomerRegistry, StaffDirectory, Store};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

/// Command-line arguments for the availability and SLA engine
#[derive(Parser)]
#[command(
    name = "slawatch",
    about = "Network availability and SLA compliance engine",
    long_about = "Probes customer connectivity, tracks downtime incidents, applies exclusion \
                  policy, computes monthly SLA compliance and routes alerts to staff and \
                  customers."
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", help = "Configuration file path (TOML format)")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable verbose logging output (sets RUST_LOG=debug)")]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until interrupted (default)
    Run,
    /// Run one job immediately
    Trigger {
        /// ping, bandwidth, sla, daily-summary or monthly-sla
        job: String,
    },
    /// List recent incidents for a customer
    Incidents {
        customer: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show SLA records for a customer
    Sla {
        customer: String,
        /// Month as YYYY-MM; all months when omitted
        #[arg(long)]
        month: Option<MonthYear>,
    },
    /// Exclude an incident from SLA accounting
    Exclude {
        incident: i64,
        #[arg(long, default_value = "cli")]
        actor: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// Approve the discount on a customer's monthly SLA record
    ApproveDiscount {
        customer: String,
        month: MonthYear,
        #[arg(long, default_value = "cli")]
        actor: String,
    },
    /// Alert delivery statistics over a trailing window
    AlertStats {
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
}

impl Cli {
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            // A missing file falls back to defaults in load_config
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }
                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

/// Load configuration from file or use defaults
///
/// An unreadable file falls back to defaults with a warning; an invalid one
/// is reported and also falls back.
fn load_config(config_path: Option<&PathBuf>) -> Result<Config, ConfigError> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            match Config::from_file(path) {
                Ok(config) => Ok(config),
                Err(ConfigError::ReadError(_)) => {
                    warn!(
                        "Configuration file '{}' not found or unreadable, using defaults",
                        path.display()
                    );
                    Ok(Config::default())
                }
                Err(e) => {
                    error!("Configuration error in '{}': {}", path.display(), e);
                    warn!("Using default configuration due to invalid config file");
                    Ok(Config::default())
                }
            }
        }
        None => {
            info!("Using default configuration");
            Ok(Config::default())
        }
    }
}

/// Owns the store, the wired jobs and the scheduler
struct Engine {
    config: Config,
    store: Arc<Store>,
    scheduler: Scheduler,
    shutdown_sender: Sender<()>,
    shutdown_receiver: Receiver<()>,
}

impl Engine {
    fn new(config: Config) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        info!("Initializing engine with store {}", config.database.path.display());
        let store = Arc::new(Store::open(&config.database.path)?);
        let registry = Arc::clone(&store) as Arc<dyn CustomerRegistry>;

        let gateway = match HttpGateway::new(&config.gateway) {
            Ok(gateway) => Some(Arc::new(gateway)),
            Err(e) => {
                error!("HTTP gateway unavailable, using log-only channels: {}", e);
                None
            }
        };
        let router = Arc::new(AlertRouter::new(
            Arc::clone(&store),
            Arc::clone(&store) as Arc<dyn StaffDirectory>,
            Arc::clone(&registry),
            sender_for(gateway.as_ref(), &config.gateway.staff_url, "staff"),
            sender_for(gateway.as_ref(), &config.gateway.customer_url, "customer"),
        ));
        let aggregator = || SlaAggregator::new(Arc::clone(&store), config.sla.clone());

        let mut scheduler = Scheduler::new();
        let every = |secs: u64| Duration::from_secs(secs);
        let probes = &config.probes;

        let ping_source = Arc::new(SystemPing::new(
            probes.ping_command.clone(),
            probes.ping_count,
            probes.ping_timeout_secs,
        ));
        scheduler.register(
            Arc::new(PingJob::new(
                Arc::clone(&registry),
                PingCollector::new(ping_source, probes),
                LogWriter::new(Arc::clone(&store)),
            )),
            every(config.schedule.ping),
        );

        match &gateway {
            Some(gateway) if !config.gateway.device_api_url.trim().is_empty() => {
                let sessions = Arc::new(HttpSessionSource::new(
                    Arc::clone(gateway),
                    config.gateway.device_api_url.clone(),
                ));
                scheduler.register(
                    Arc::new(BandwidthJob::new(
                        Arc::clone(&registry),
                        BandwidthCollector::new(sessions, probes),
                        LogWriter::new(Arc::clone(&store)),
                    )),
                    every(config.schedule.bandwidth),
                );
            }
            _ => warn!("No device API configured; PPPoE session collection disabled"),
        }

        scheduler.register(
            Arc::new(SlaJob::new(
                Arc::clone(&registry),
                IncidentDetector::new(Arc::clone(&store), &config.detection),
                ExclusionEngine::with_default_rules(Arc::clone(&store), &config.sla),
                AnomalyDetector::new(Arc::clone(&store), config.anomaly.clone()),
                RootCauseAnalyzer::new(
                    Arc::clone(&store),
                    Arc::clone(&registry),
                    config.root_cause.clone(),
                ),
                aggregator(),
                Arc::clone(&router),
                &config.root_cause,
                &config.alerts,
            )),
            every(config.schedule.sla),
        );
        scheduler.register(
            Arc::new(DailySummaryJob::new(
                Arc::clone(&store),
                Arc::clone(&router),
                &config.alerts,
                &config.database,
            )),
            every(config.schedule.daily_summary),
        );
        scheduler.register(
            Arc::new(MonthlySlaJob::new(
                Arc::clone(&registry),
                aggregator(),
                Arc::clone(&router),
                &config.alerts,
            )),
            every(config.schedule.monthly_sla),
        );

        let (shutdown_sender, shutdown_receiver) = mpsc::channel();
        Ok(Self {
            config,
            store,
            scheduler,
            shutdown_sender,
            shutdown_receiver,
        })
    }

    fn admin(&self) -> Admin {
        Admin::new(
            Arc::clone(&self.store),
            Arc::clone(&self.store) as Arc<dyn CustomerRegistry>,
            SlaAggregator::new(Arc::clone(&self.store), self.config.sla.clone()),
        )
    }

    /// Block until a shutdown signal arrives
    fn wait_for_shutdown(&self) {
        info!("Waiting for shutdown signal...");
        match self.shutdown_receiver.recv() {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Error waiting for shutdown: {}", e),
        }
    }
}

fn run(cli: Cli, config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut engine = Engine::new(config)?;
    let now = Utc::now();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            engine.scheduler.start()?;
            let shutdown_sender = engine.shutdown_sender.clone();
            ctrlc::set_handler(move || {
                info!("Received Ctrl+C, initiating graceful shutdown");
                if let Err(e) = shutdown_sender.send(()) {
                    error!("Failed to send shutdown signal: {}", e);
                }
            })?;
            engine.wait_for_shutdown();
            engine.scheduler.stop();
        }
        Command::Trigger { job } => {
            let report = engine.scheduler.trigger(&job)?;
            println!(
                "{}: {} processed, {} failures. {}",
                job, report.processed, report.failures, report.summary
            );
        }
        Command::Incidents { customer, limit } => {
            for incident in engine.admin().incidents(&customer, limit)? {
                println!(
                    "#{:<6} {} {:<9} {} -> {} {:>6} min{}",
                    incident.id,
                    incident.service_type,
                    incident.status.as_str(),
                    incident.start_time.format("%Y-%m-%d %H:%M"),
                    incident
                        .end_time
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "ongoing".to_string()),
                    incident.duration_minutes,
                    incident
                        .exclude_reason
                        .map(|r| format!(" (excluded: {})", r))
                        .unwrap_or_default()
                );
            }
        }
        Command::Sla { customer, month } => {
            for record in engine.admin().sla(&customer, month)? {
                println!("{}", serde_json::to_string_pretty(&record)?);
            }
        }
        Command::Exclude {
            incident,
            actor,
            note,
        } => {
            let excluded = engine
                .admin()
                .exclude_incident(incident, &actor, note.as_deref(), now)?;
            println!(
                "Incident {} excluded ({} minutes no longer counted)",
                excluded.id, excluded.duration_minutes
            );
        }
        Command::ApproveDiscount {
            customer,
            month,
            actor,
        } => {
            let record = engine.admin().approve_discount(&customer, month, &actor, now)?;
            println!(
                "Discount {:.2} approved for {} {}",
                record.discount_amount, customer, month
            );
        }
        Command::AlertStats { hours } => {
            let stats = engine.admin().alert_stats(hours, now)?;
            println!(
                "Last {}h: {} sent, {} failed ({:.1}% delivered)",
                hours,
                stats.sent,
                stats.failed,
                stats.success_rate()
            );
            for (channel, (sent, failed)) in &stats.by_channel {
                println!("  {}: {} sent, {} failed", channel, sent, failed);
            }
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cli, config) {
        error!("{}", e);
        std::process::exit(1);
    }
}
