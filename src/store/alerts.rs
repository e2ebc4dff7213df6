use super::{opt_text_at, text_at, ts_at, Store};
use crate::error::StoreError;
use crate::model::{AlertLog, AlertType, DeliveryStatus, RecipientType, Timestamp};
use rusqlite::{params, Row};
use std::collections::BTreeMap;

fn alert_log_from_row(row: &Row<'_>) -> rusqlite::Result<AlertLog> {
    Ok(AlertLog {
        id: row.get(0)?,
        alert_type: text_at(row, 1)?,
        recipient_type: text_at(row, 2)?,
        channel: row.get(3)?,
        recipient_identifier: row.get(4)?,
        title: row.get(5)?,
        delivery_status: text_at(row, 6)?,
        error: row.get(7)?,
        sent_at: ts_at(row, 8)?,
    })
}

/// Sent/failed counts over a window, overall and per channel
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryStats {
    pub sent: u32,
    pub failed: u32,
    pub by_channel: BTreeMap<String, (u32, u32)>,
}

impl DeliveryStats {
    /// Share of attempts that were delivered, 100% when nothing was attempted
    pub fn success_rate(&self) -> f64 {
        let total = self.sent + self.failed;
        if total == 0 {
            100.0
        } else {
            f64::from(self.sent) * 100.0 / f64::from(total)
        }
    }
}

impl Store {
    /// Record one delivery attempt and return its row id
    #[allow(clippy::too_many_arguments)]
    pub fn append_alert_log(
        &self,
        alert_type: AlertType,
        recipient_type: RecipientType,
        channel: &str,
        recipient_identifier: &str,
        title: &str,
        delivery_status: DeliveryStatus,
        error: Option<&str>,
        sent_at: Timestamp,
    ) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO alert_logs (alert_type, recipient_type, channel, recipient_identifier, \
             title, delivery_status, error, sent_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                alert_type.as_str(),
                recipient_type.as_str(),
                channel,
                recipient_identifier,
                title,
                delivery_status.as_str(),
                error,
                sent_at.timestamp(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn alert_logs_since(&self, since: Timestamp) -> Result<Vec<AlertLog>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, alert_type, recipient_type, channel, recipient_identifier, title, \
             delivery_status, error, sent_at FROM alert_logs WHERE sent_at >= ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([since.timestamp()], alert_log_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn delivery_stats_since(&self, since: Timestamp) -> Result<DeliveryStats, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT channel, delivery_status, COUNT(*) FROM alert_logs WHERE sent_at >= ?1 \
             GROUP BY channel, delivery_status",
        )?;
        let rows = stmt.query_map([since.timestamp()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                opt_text_at::<DeliveryStatus>(row, 1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut stats = DeliveryStats::default();
        for row in rows {
            let (channel, status, count) = row?;
            let count = count as u32;
            let entry = stats.by_channel.entry(channel).or_insert((0, 0));
            match status {
                Some(DeliveryStatus::Sent) => {
                    stats.sent += count;
                    entry.0 += count;
                }
                _ => {
                    stats.failed += count;
                    entry.1 += count;
                }
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn log(store: &Store, channel: &str, status: DeliveryStatus, at: Timestamp) {
        store
            .append_alert_log(
                AlertType::Warning,
                RecipientType::Internal,
                channel,
                "staff-1",
                "Latency spike",
                status,
                (status == DeliveryStatus::Failed).then_some("gateway timeout"),
                at,
            )
            .unwrap();
    }

    #[test]
    fn test_stats_group_by_channel() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap();
        log(&store, "staff", DeliveryStatus::Sent, now);
        log(&store, "staff", DeliveryStatus::Failed, now);
        log(&store, "customer", DeliveryStatus::Sent, now);
        log(&store, "staff", DeliveryStatus::Sent, now - Duration::days(3));

        let stats = store.delivery_stats_since(now - Duration::hours(24)).unwrap();
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.by_channel["staff"], (1, 1));
        assert_eq!(stats.by_channel["customer"], (1, 0));
        assert!((stats.success_rate() - 66.666).abs() < 0.01);

        let logs = store.alert_logs_since(now - Duration::hours(1)).unwrap();
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[1].error.as_deref(), Some("gateway timeout"));
    }

    #[test]
    fn test_empty_window_is_fully_successful() {
        assert_eq!(DeliveryStats::default().success_rate(), 100.0);
    }
}
