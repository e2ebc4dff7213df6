use super::{text_at, Store};
use crate::error::StoreError;
use crate::model::{MonthYear, SlaRecord};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

const SLA_COLUMNS: &str = "customer_id, month_year, total_minutes, downtime_minutes, \
                           excluded_downtime_minutes, counted_downtime_minutes, sla_percentage, \
                           sla_target, sla_status, incident_count, discount_amount, discount_approved";

fn sla_from_row(row: &Row<'_>) -> rusqlite::Result<SlaRecord> {
    Ok(SlaRecord {
        customer_id: row.get(0)?,
        month_year: text_at(row, 1)?,
        total_minutes: row.get(2)?,
        downtime_minutes: row.get(3)?,
        excluded_downtime_minutes: row.get(4)?,
        counted_downtime_minutes: row.get(5)?,
        sla_percentage: row.get(6)?,
        sla_target: row.get(7)?,
        sla_status: text_at(row, 8)?,
        incident_count: row.get(9)?,
        discount_amount: row.get(10)?,
        discount_approved: row.get(11)?,
    })
}

impl Store {
    /// Insert or replace the figures for (customer, month)
    ///
    /// Recomputation never clears an approval already granted.
    pub fn upsert_sla(&self, record: &SlaRecord) -> Result<(), StoreError> {
        self.conn()?.execute(
            &format!(
                "INSERT INTO sla_records ({}, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13) \
                 ON CONFLICT (customer_id, month_year) DO UPDATE SET \
                   total_minutes = excluded.total_minutes, \
                   downtime_minutes = excluded.downtime_minutes, \
                   excluded_downtime_minutes = excluded.excluded_downtime_minutes, \
                   counted_downtime_minutes = excluded.counted_downtime_minutes, \
                   sla_percentage = excluded.sla_percentage, \
                   sla_target = excluded.sla_target, \
                   sla_status = excluded.sla_status, \
                   incident_count = excluded.incident_count, \
                   discount_amount = excluded.discount_amount, \
                   updated_at = excluded.updated_at",
                SLA_COLUMNS
            ),
            params![
                record.customer_id,
                record.month_year.to_string(),
                record.total_minutes,
                record.downtime_minutes,
                record.excluded_downtime_minutes,
                record.counted_downtime_minutes,
                record.sla_percentage,
                record.sla_target,
                record.sla_status.as_str(),
                record.incident_count,
                record.discount_amount,
                record.discount_approved,
                Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    pub fn sla_record(
        &self,
        customer_id: &str,
        month: MonthYear,
    ) -> Result<Option<SlaRecord>, StoreError> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM sla_records WHERE customer_id = ?1 AND month_year = ?2",
                    SLA_COLUMNS
                ),
                params![customer_id, month.to_string()],
                sla_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Every stored month for one customer, newest first
    pub fn sla_history(&self, customer_id: &str) -> Result<Vec<SlaRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sla_records WHERE customer_id = ?1 ORDER BY month_year DESC",
            SLA_COLUMNS
        ))?;
        let rows = stmt.query_map([customer_id], sla_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn sla_records_for_month(&self, month: MonthYear) -> Result<Vec<SlaRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sla_records WHERE month_year = ?1 ORDER BY customer_id",
            SLA_COLUMNS
        ))?;
        let rows = stmt.query_map([month.to_string()], sla_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Flip the approval flag; `NotFound` when no record exists
    pub fn set_discount_approved(
        &self,
        customer_id: &str,
        month: MonthYear,
        approved: bool,
    ) -> Result<(), StoreError> {
        let updated = self.conn()?.execute(
            "UPDATE sla_records SET discount_approved = ?1 WHERE customer_id = ?2 AND month_year = ?3",
            params![approved, customer_id, month.to_string()],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!(
                "sla record {} {}",
                customer_id, month
            )));
        }
        Ok(())
    }
}
