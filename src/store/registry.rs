use super::{text_at, ts_at, Store};
use crate::error::StoreError;
use crate::model::{Customer, MaintenanceWindow, StaffMember, Timestamp};
use rusqlite::{params, OptionalExtension, Row};

/// Read access to the customer registry
pub trait CustomerRegistry: Send + Sync {
    fn active_customers(&self) -> Result<Vec<Customer>, StoreError>;

    fn customer(&self, customer_id: &str) -> Result<Option<Customer>, StoreError>;
}

/// Approved planned-maintenance windows
#[cfg_attr(test, mockall::automock)]
pub trait MaintenanceSchedule: Send + Sync {
    /// Windows covering `customer_id` that overlap `[start, end)`
    fn windows_overlapping(
        &self,
        customer_id: &str,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<MaintenanceWindow>, StoreError>;
}

/// Active staff reachable on the internal channel
pub trait StaffDirectory: Send + Sync {
    /// Staff holding `role`; with an area, only those assigned to it or to no area
    fn staff_for_role(&self, role: &str, area: Option<&str>)
        -> Result<Vec<StaffMember>, StoreError>;
}

const CUSTOMER_COLUMNS: &str = "customer_id, name, service_type, probe_address, device_id, \
                                session_name, aggregation_point, service_area, channel_id, \
                                sla_target, monthly_fee, isolated, active";

fn customer_from_row(row: &Row<'_>) -> rusqlite::Result<Customer> {
    Ok(Customer {
        customer_id: row.get(0)?,
        name: row.get(1)?,
        service_type: text_at(row, 2)?,
        probe_address: row.get(3)?,
        device_id: row.get(4)?,
        session_name: row.get(5)?,
        aggregation_point: row.get(6)?,
        service_area: row.get(7)?,
        channel_id: row.get(8)?,
        sla_target: row.get(9)?,
        monthly_fee: row.get(10)?,
        isolated: row.get(11)?,
        active: row.get(12)?,
    })
}

impl Store {
    pub fn upsert_customer(&self, customer: &Customer) -> Result<(), StoreError> {
        self.conn()?.execute(
            &format!(
                "INSERT OR REPLACE INTO customers ({}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                CUSTOMER_COLUMNS
            ),
            params![
                customer.customer_id,
                customer.name,
                customer.service_type.as_str(),
                customer.probe_address,
                customer.device_id,
                customer.session_name,
                customer.aggregation_point,
                customer.service_area,
                customer.channel_id,
                customer.sla_target,
                customer.monthly_fee,
                customer.isolated,
                customer.active,
            ],
        )?;
        Ok(())
    }

    /// Billing isolation flag, set and cleared by the billing side
    pub fn set_customer_isolated(&self, customer_id: &str, isolated: bool) -> Result<(), StoreError> {
        let updated = self.conn()?.execute(
            "UPDATE customers SET isolated = ?1 WHERE customer_id = ?2",
            params![isolated, customer_id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("customer {}", customer_id)));
        }
        Ok(())
    }

    /// Store an approved window and return it with its assigned id
    pub fn add_maintenance_window(
        &self,
        window: &MaintenanceWindow,
    ) -> Result<MaintenanceWindow, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO maintenance_windows (title, start_time, end_time) VALUES (?1, ?2, ?3)",
            params![window.title, window.start.timestamp(), window.end.timestamp()],
        )?;
        let id = tx.last_insert_rowid();
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO maintenance_customers (window_id, customer_id) VALUES (?1, ?2)",
            )?;
            for customer_id in &window.customer_ids {
                stmt.execute(params![id, customer_id])?;
            }
        }
        tx.commit()?;

        let mut stored = window.clone();
        stored.id = id;
        Ok(stored)
    }

    pub fn upsert_staff(&self, member: &StaffMember) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO staff (channel_id, name, role, service_area, active) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                member.channel_id,
                member.name,
                member.role,
                member.service_area,
                member.active
            ],
        )?;
        Ok(())
    }
}

impl CustomerRegistry for Store {
    fn active_customers(&self) -> Result<Vec<Customer>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM customers WHERE active = 1 ORDER BY customer_id",
            CUSTOMER_COLUMNS
        ))?;
        let rows = stmt.query_map([], customer_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn customer(&self, customer_id: &str) -> Result<Option<Customer>, StoreError> {
        let conn = self.conn()?;
        let customer = conn
            .query_row(
                &format!("SELECT {} FROM customers WHERE customer_id = ?1", CUSTOMER_COLUMNS),
                [customer_id],
                customer_from_row,
            )
            .optional()?;
        Ok(customer)
    }
}

impl MaintenanceSchedule for Store {
    fn windows_overlapping(
        &self,
        customer_id: &str,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<MaintenanceWindow>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT w.id, w.title, w.start_time, w.end_time FROM maintenance_windows w \
             JOIN maintenance_customers m ON m.window_id = w.id \
             WHERE m.customer_id = ?1 AND w.approved = 1 AND w.start_time < ?2 AND w.end_time > ?3 \
             ORDER BY w.start_time",
        )?;
        let rows = stmt.query_map(
            params![customer_id, end.timestamp(), start.timestamp()],
            |row| {
                Ok(MaintenanceWindow {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    start: ts_at(row, 2)?,
                    end: ts_at(row, 3)?,
                    customer_ids: vec![customer_id.to_string()],
                })
            },
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl StaffDirectory for Store {
    fn staff_for_role(
        &self,
        role: &str,
        area: Option<&str>,
    ) -> Result<Vec<StaffMember>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT name, role, service_area, channel_id, active FROM staff \
             WHERE role = ?1 AND active = 1 \
               AND (?2 IS NULL OR service_area IS NULL OR service_area = ?2) \
             ORDER BY channel_id",
        )?;
        let rows = stmt.query_map(params![role, area], |row| {
            Ok(StaffMember {
                name: row.get(0)?,
                role: row.get(1)?,
                service_area: row.get(2)?,
                channel_id: row.get(3)?,
                active: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
