//! Relational store backed by SQLite
//!
//! The store is the single source of truth for incidents and SLA records. All
//! access goes through one connection behind a mutex, and the schema carries a
//! partial unique index so that at most one incident per customer and service
//! can be `ongoing`, no matter how many detection passes race.

mod alerts;
mod incidents;
mod logs;
mod registry;
mod sla;

pub use alerts::DeliveryStats;
pub use incidents::IncidentCounts;
pub use registry::{CustomerRegistry, MaintenanceSchedule, StaffDirectory};
#[cfg(test)]
pub use registry::MockMaintenanceSchedule;

use crate::error::{ModelError, StoreError};
use crate::model::Timestamp;
use chrono::DateTime;
use log::{debug, info};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS connection_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id TEXT NOT NULL,
    service_type TEXT NOT NULL,
    ts INTEGER NOT NULL,
    status TEXT NOT NULL,
    response_time_ms REAL,
    packet_loss_percent REAL,
    bytes_in INTEGER,
    bytes_out INTEGER
);
CREATE INDEX IF NOT EXISTS idx_logs_key_ts ON connection_logs (customer_id, service_type, ts);
CREATE INDEX IF NOT EXISTS idx_logs_ts ON connection_logs (ts);

CREATE TABLE IF NOT EXISTS incidents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id TEXT NOT NULL,
    service_type TEXT NOT NULL,
    incident_type TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    duration_minutes INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    exclude_reason TEXT,
    is_counted_in_sla INTEGER NOT NULL DEFAULT 1,
    policy_checked INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_incidents_one_ongoing
    ON incidents (customer_id, service_type) WHERE status = 'ongoing';
CREATE INDEX IF NOT EXISTS idx_incidents_customer ON incidents (customer_id, start_time);

CREATE TABLE IF NOT EXISTS sla_records (
    customer_id TEXT NOT NULL,
    month_year TEXT NOT NULL,
    total_minutes REAL NOT NULL,
    downtime_minutes REAL NOT NULL,
    excluded_downtime_minutes REAL NOT NULL,
    counted_downtime_minutes REAL NOT NULL,
    sla_percentage REAL NOT NULL,
    sla_target REAL NOT NULL,
    sla_status TEXT NOT NULL,
    incident_count INTEGER NOT NULL,
    discount_amount REAL NOT NULL,
    discount_approved INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (customer_id, month_year)
);

CREATE TABLE IF NOT EXISTS alert_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    alert_type TEXT NOT NULL,
    recipient_type TEXT NOT NULL,
    channel TEXT NOT NULL,
    recipient_identifier TEXT NOT NULL,
    title TEXT NOT NULL,
    delivery_status TEXT NOT NULL,
    error TEXT,
    sent_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alert_logs_sent ON alert_logs (sent_at);

CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    actor TEXT NOT NULL,
    action TEXT NOT NULL,
    target TEXT NOT NULL,
    detail TEXT,
    at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS customers (
    customer_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    service_type TEXT NOT NULL,
    probe_address TEXT,
    device_id TEXT,
    session_name TEXT,
    aggregation_point TEXT,
    service_area TEXT,
    channel_id TEXT,
    sla_target REAL,
    monthly_fee REAL NOT NULL DEFAULT 0,
    isolated INTEGER NOT NULL DEFAULT 0,
    active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS maintenance_windows (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL,
    approved INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS maintenance_customers (
    window_id INTEGER NOT NULL REFERENCES maintenance_windows (id),
    customer_id TEXT NOT NULL,
    PRIMARY KEY (window_id, customer_id)
);

CREATE TABLE IF NOT EXISTS staff (
    channel_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    role TEXT NOT NULL,
    service_area TEXT,
    active INTEGER NOT NULL DEFAULT 1
);
"#;

/// Handle to the SQLite database
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database file and make sure the schema exists
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        info!("Opening store at {}", path.display());
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        debug!("Store schema ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Record a manual write performed by an authorized actor
    pub fn append_audit(
        &self,
        actor: &str,
        action: &str,
        target: &str,
        detail: Option<&str>,
        at: Timestamp,
    ) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO audit_log (actor, action, target, detail, at) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![actor, action, target, detail, at.timestamp()],
        )?;
        Ok(())
    }

    /// Audit trail for one target, oldest first: (actor, action, detail)
    pub fn audit_entries(
        &self,
        target: &str,
    ) -> Result<Vec<(String, String, Option<String>)>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT actor, action, detail FROM audit_log WHERE target = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([target], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn conversion_error(idx: usize, err: ModelError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

/// Read an epoch-seconds column as a UTC timestamp
fn ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Timestamp> {
    let secs: i64 = row.get(idx)?;
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            Box::new(ModelError::OutOfRange {
                field: "timestamp",
                value: secs as f64,
            }),
        )
    })
}

fn opt_ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Timestamp>> {
    let secs: Option<i64> = row.get(idx)?;
    match secs {
        Some(_) => ts_at(row, idx).map(Some),
        None => Ok(None),
    }
}

/// Read a text column into one of the model's text enums
fn text_at<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = ModelError>,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion_error(idx, e))
}

fn opt_text_at<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr<Err = ModelError>,
{
    let text: Option<String> = row.get(idx)?;
    text.map(|t| t.parse().map_err(|e| conversion_error(idx, e)))
        .transpose()
}
