use super::{opt_text_at, opt_ts_at, text_at, ts_at, Store};
use crate::error::StoreError;
use crate::model::{Incident, IncidentStatus, IncidentType, ServiceType, Timestamp};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

const INCIDENT_COLUMNS: &str = "id, customer_id, service_type, incident_type, start_time, end_time, \
                                duration_minutes, status, exclude_reason, is_counted_in_sla";

fn incident_from_row(row: &Row<'_>) -> rusqlite::Result<Incident> {
    Ok(Incident {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        service_type: text_at(row, 2)?,
        incident_type: text_at(row, 3)?,
        start_time: ts_at(row, 4)?,
        end_time: opt_ts_at(row, 5)?,
        duration_minutes: row.get(6)?,
        status: text_at(row, 7)?,
        exclude_reason: opt_text_at(row, 8)?,
        is_counted_in_sla: row.get(9)?,
    })
}

/// Incident activity over a window, for summaries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IncidentCounts {
    pub opened: u32,
    pub resolved: u32,
    pub excluded: u32,
    pub ongoing: u32,
}

impl Store {
    /// Insert an ongoing incident unless one already exists for its key
    ///
    /// The partial unique index turns the check-and-insert into one atomic
    /// statement. Returns the stored incident, or `None` when another pass
    /// got there first.
    pub fn insert_incident_if_absent(
        &self,
        incident: &Incident,
    ) -> Result<Option<Incident>, StoreError> {
        if incident.status != IncidentStatus::Ongoing {
            return Err(StoreError::InvalidTransition(format!(
                "new incidents must be ongoing, got {}",
                incident.status
            )));
        }
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO incidents (customer_id, service_type, incident_type, start_time, \
             duration_minutes, status, is_counted_in_sla, created_at) \
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7)",
            params![
                incident.customer_id,
                incident.service_type.as_str(),
                incident.incident_type.as_str(),
                incident.start_time.timestamp(),
                IncidentStatus::Ongoing.as_str(),
                incident.is_counted_in_sla,
                Utc::now().timestamp(),
            ],
        )?;
        if inserted == 0 {
            return Ok(None);
        }
        let mut stored = incident.clone();
        stored.id = conn.last_insert_rowid();
        Ok(Some(stored))
    }

    pub fn incident(&self, id: i64) -> Result<Incident, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM incidents WHERE id = ?1", INCIDENT_COLUMNS),
            [id],
            incident_from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("incident {}", id)))
    }

    pub fn ongoing_incident(
        &self,
        customer_id: &str,
        service_type: ServiceType,
    ) -> Result<Option<Incident>, StoreError> {
        let conn = self.conn()?;
        let incident = conn
            .query_row(
                &format!(
                    "SELECT {} FROM incidents WHERE customer_id = ?1 AND service_type = ?2 AND status = ?3",
                    INCIDENT_COLUMNS
                ),
                params![customer_id, service_type.as_str(), IncidentStatus::Ongoing.as_str()],
                incident_from_row,
            )
            .optional()?;
        Ok(incident)
    }

    pub fn ongoing_incidents(&self) -> Result<Vec<Incident>, StoreError> {
        self.query_incidents(
            &format!(
                "SELECT {} FROM incidents WHERE status = ?1 ORDER BY start_time, id",
                INCIDENT_COLUMNS
            ),
            params![IncidentStatus::Ongoing.as_str()],
        )
    }

    /// Latest end time of any closed incident for the key
    pub fn last_incident_end(
        &self,
        customer_id: &str,
        service_type: ServiceType,
    ) -> Result<Option<Timestamp>, StoreError> {
        let conn = self.conn()?;
        let secs: Option<i64> = conn.query_row(
            "SELECT MAX(end_time) FROM incidents WHERE customer_id = ?1 AND service_type = ?2",
            params![customer_id, service_type.as_str()],
            |row| row.get(0),
        )?;
        Ok(secs.and_then(|s| chrono::DateTime::from_timestamp(s, 0)))
    }

    /// Incidents the exclusion policy still has to look at: every ongoing
    /// incident plus resolved incidents not yet evaluated
    pub fn incidents_pending_policy(&self) -> Result<Vec<Incident>, StoreError> {
        self.query_incidents(
            &format!(
                "SELECT {} FROM incidents WHERE status = ?1 OR (status = ?2 AND policy_checked = 0) \
                 ORDER BY start_time, id",
                INCIDENT_COLUMNS
            ),
            params![
                IncidentStatus::Ongoing.as_str(),
                IncidentStatus::Resolved.as_str()
            ],
        )
    }

    /// Persist an ongoing -> resolved transition
    ///
    /// Returns `false` when the row was no longer ongoing.
    pub fn save_resolution(&self, incident: &Incident) -> Result<bool, StoreError> {
        if incident.status != IncidentStatus::Resolved {
            return Err(StoreError::InvalidTransition(format!(
                "incident {} is {}, not resolved",
                incident.id, incident.status
            )));
        }
        let updated = self.conn()?.execute(
            "UPDATE incidents SET status = ?1, end_time = ?2, duration_minutes = ?3 \
             WHERE id = ?4 AND status = ?5",
            params![
                IncidentStatus::Resolved.as_str(),
                incident.end_time.map(|t| t.timestamp()),
                incident.duration_minutes,
                incident.id,
                IncidentStatus::Ongoing.as_str(),
            ],
        )?;
        Ok(updated == 1)
    }

    /// Persist a transition into `excluded`
    ///
    /// Returns `false` when the row was already excluded; exclusion is terminal.
    pub fn save_exclusion(&self, incident: &Incident) -> Result<bool, StoreError> {
        if incident.status != IncidentStatus::Excluded {
            return Err(StoreError::InvalidTransition(format!(
                "incident {} is {}, not excluded",
                incident.id, incident.status
            )));
        }
        let updated = self.conn()?.execute(
            "UPDATE incidents SET status = ?1, exclude_reason = ?2, is_counted_in_sla = 0, \
             end_time = ?3, duration_minutes = ?4, policy_checked = 1 \
             WHERE id = ?5 AND status != ?1",
            params![
                IncidentStatus::Excluded.as_str(),
                incident.exclude_reason.map(|r| r.as_str()),
                incident.end_time.map(|t| t.timestamp()),
                incident.duration_minutes,
                incident.id,
            ],
        )?;
        Ok(updated == 1)
    }

    /// Mark a resolved incident as evaluated so the policy never revisits it
    pub fn mark_policy_checked(&self, id: i64) -> Result<(), StoreError> {
        self.conn()?.execute(
            "UPDATE incidents SET policy_checked = 1 WHERE id = ?1 AND status = ?2",
            params![id, IncidentStatus::Resolved.as_str()],
        )?;
        Ok(())
    }

    /// Most recent incidents for one customer, newest first
    pub fn incidents_for_customer(
        &self,
        customer_id: &str,
        limit: usize,
    ) -> Result<Vec<Incident>, StoreError> {
        self.query_incidents(
            &format!(
                "SELECT {} FROM incidents WHERE customer_id = ?1 ORDER BY start_time DESC, id DESC LIMIT ?2",
                INCIDENT_COLUMNS
            ),
            params![customer_id, limit as i64],
        )
    }

    /// Downtime incidents whose window touches `[start, end)`
    ///
    /// Open incidents are treated as reaching `now`.
    pub fn downtime_overlapping(
        &self,
        customer_id: &str,
        start: Timestamp,
        end: Timestamp,
        now: Timestamp,
    ) -> Result<Vec<Incident>, StoreError> {
        self.query_incidents(
            &format!(
                "SELECT {} FROM incidents WHERE customer_id = ?1 AND incident_type = ?2 \
                 AND start_time < ?3 AND COALESCE(end_time, ?4) > ?5 ORDER BY start_time, id",
                INCIDENT_COLUMNS
            ),
            params![
                customer_id,
                IncidentType::Downtime.as_str(),
                end.timestamp(),
                now.timestamp(),
                start.timestamp(),
            ],
        )
    }

    /// Number of incidents that started in `[since, until)`
    pub fn count_incidents_started(
        &self,
        since: Timestamp,
        until: Timestamp,
    ) -> Result<u32, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM incidents WHERE start_time >= ?1 AND start_time < ?2",
            params![since.timestamp(), until.timestamp()],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    pub fn incident_counts_since(&self, since: Timestamp) -> Result<IncidentCounts, StoreError> {
        let conn = self.conn()?;
        let count = |sql: &str, status: Option<IncidentStatus>| -> Result<u32, StoreError> {
            let n: i64 = match status {
                Some(status) => conn.query_row(sql, params![since.timestamp(), status.as_str()], |r| r.get(0))?,
                None => conn.query_row(sql, params![since.timestamp()], |r| r.get(0))?,
            };
            Ok(n as u32)
        };
        Ok(IncidentCounts {
            opened: count("SELECT COUNT(*) FROM incidents WHERE start_time >= ?1", None)?,
            resolved: count(
                "SELECT COUNT(*) FROM incidents WHERE end_time >= ?1 AND status = ?2",
                Some(IncidentStatus::Resolved),
            )?,
            excluded: count(
                "SELECT COUNT(*) FROM incidents WHERE COALESCE(end_time, start_time) >= ?1 AND status = ?2",
                Some(IncidentStatus::Excluded),
            )?,
            ongoing: {
                let n: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM incidents WHERE status = ?1",
                    [IncidentStatus::Ongoing.as_str()],
                    |r| r.get(0),
                )?;
                n as u32
            },
        })
    }

    fn query_incidents(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Incident>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, incident_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
