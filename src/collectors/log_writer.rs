use crate::error::StoreError;
use crate::model::ConnectionLogEntry;
use crate::store::Store;
use log::{debug, error};
use std::sync::Arc;

/// Appends one collection cycle to the connection log
///
/// A failed write drops the cycle; detection re-reads the log, so the next
/// cycle's samples stand in for the lost ones.
pub struct LogWriter {
    store: Arc<Store>,
}

impl LogWriter {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn write_cycle(&self, entries: &[ConnectionLogEntry]) -> Result<usize, StoreError> {
        if entries.is_empty() {
            return Ok(0);
        }
        match self.store.append_logs(entries) {
            Ok(written) => {
                debug!("Wrote {} connection log entries", written);
                Ok(written)
            }
            Err(e) => {
                error!("Failed to write {} connection log entries: {}", entries.len(), e);
                Err(e)
            }
        }
    }
}
