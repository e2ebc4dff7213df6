use super::{text_at, ts_at, Store};
use crate::error::StoreError;
use crate::model::{ConnectionLogEntry, LinkStatus, ServiceType, Timestamp};
use rusqlite::{params, OptionalExtension, Row};

const LOG_COLUMNS: &str = "customer_id, service_type, ts, status, response_time_ms, \
                           packet_loss_percent, bytes_in, bytes_out";

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<ConnectionLogEntry> {
    let bytes_in: Option<i64> = row.get(6)?;
    let bytes_out: Option<i64> = row.get(7)?;
    Ok(ConnectionLogEntry {
        customer_id: row.get(0)?,
        service_type: text_at(row, 1)?,
        timestamp: ts_at(row, 2)?,
        status: text_at(row, 3)?,
        response_time_ms: row.get(4)?,
        packet_loss_percent: row.get(5)?,
        bytes_in: bytes_in.map(|b| b.max(0) as u64),
        bytes_out: bytes_out.map(|b| b.max(0) as u64),
    })
}

impl Store {
    /// Append one cycle's worth of probe results in a single transaction
    pub fn append_logs(&self, entries: &[ConnectionLogEntry]) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO connection_logs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                LOG_COLUMNS
            ))?;
            for entry in entries {
                stmt.execute(params![
                    entry.customer_id,
                    entry.service_type.as_str(),
                    entry.timestamp.timestamp(),
                    entry.status.as_str(),
                    entry.response_time_ms,
                    entry.packet_loss_percent,
                    entry.bytes_in.map(|b| b.min(i64::MAX as u64) as i64),
                    entry.bytes_out.map(|b| b.min(i64::MAX as u64) as i64),
                ])?;
            }
        }
        tx.commit()?;
        Ok(entries.len())
    }

    pub fn latest_log(
        &self,
        customer_id: &str,
        service_type: ServiceType,
    ) -> Result<Option<ConnectionLogEntry>, StoreError> {
        let conn = self.conn()?;
        let entry = conn
            .query_row(
                &format!(
                    "SELECT {} FROM connection_logs WHERE customer_id = ?1 AND service_type = ?2 \
                     ORDER BY ts DESC, id DESC LIMIT 1",
                    LOG_COLUMNS
                ),
                params![customer_id, service_type.as_str()],
                log_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    /// Timestamp of the first offline sample after the last online one
    pub fn outage_start(
        &self,
        customer_id: &str,
        service_type: ServiceType,
    ) -> Result<Option<Timestamp>, StoreError> {
        let conn = self.conn()?;
        let secs: Option<i64> = conn.query_row(
            "SELECT MIN(ts) FROM connection_logs \
             WHERE customer_id = ?1 AND service_type = ?2 AND status = ?3 \
               AND ts > COALESCE((SELECT MAX(ts) FROM connection_logs \
                                  WHERE customer_id = ?1 AND service_type = ?2 AND status = ?4), ?5)",
            params![
                customer_id,
                service_type.as_str(),
                LinkStatus::Offline.as_str(),
                LinkStatus::Online.as_str(),
                i64::MIN,
            ],
            |row| row.get(0),
        )?;
        Ok(secs.and_then(|s| chrono::DateTime::from_timestamp(s, 0)))
    }

    /// Distinct (customer, service) keys with at least one sample since `since`
    pub fn recent_log_keys(
        &self,
        since: Timestamp,
    ) -> Result<Vec<(String, ServiceType)>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT customer_id, service_type FROM connection_logs WHERE ts >= ?1 \
             ORDER BY customer_id, service_type",
        )?;
        let rows = stmt.query_map([since.timestamp()], |row| Ok((row.get(0)?, text_at(row, 1)?)))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn logs_for_customer(
        &self,
        customer_id: &str,
        since: Timestamp,
    ) -> Result<Vec<ConnectionLogEntry>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM connection_logs WHERE customer_id = ?1 AND ts >= ?2 ORDER BY ts, id",
            LOG_COLUMNS
        ))?;
        let rows = stmt.query_map(params![customer_id, since.timestamp()], log_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Mean response time of online samples in `[since, until)`
    pub fn mean_response_time(
        &self,
        since: Timestamp,
        until: Timestamp,
    ) -> Result<Option<f64>, StoreError> {
        self.mean_of("response_time_ms", since, until)
    }

    /// Mean packet loss of online samples in `[since, until)`
    pub fn mean_packet_loss(
        &self,
        since: Timestamp,
        until: Timestamp,
    ) -> Result<Option<f64>, StoreError> {
        self.mean_of("packet_loss_percent", since, until)
    }

    fn mean_of(
        &self,
        column: &'static str,
        since: Timestamp,
        until: Timestamp,
    ) -> Result<Option<f64>, StoreError> {
        let conn = self.conn()?;
        let mean = conn.query_row(
            &format!(
                "SELECT AVG({col}) FROM connection_logs \
                 WHERE status = ?1 AND ts >= ?2 AND ts < ?3 AND {col} IS NOT NULL",
                col = column
            ),
            params![LinkStatus::Online.as_str(), since.timestamp(), until.timestamp()],
            |row| row.get(0),
        )?;
        Ok(mean)
    }

    /// Retention pruning, the only deletion connection logs ever see
    pub fn prune_logs(&self, before: Timestamp) -> Result<usize, StoreError> {
        let removed = self
            .conn()?
            .execute("DELETE FROM connection_logs WHERE ts < ?1", [before.timestamp()])?;
        Ok(removed)
    }
}
