use std::sync::{Arc, Mutex};

use rusqlite::{Connection, Transaction};
use thiserror::Error;

use crate::adapters::db;
use crate::adapters::db::{AlertFilter, DbError};
use crate::domain::models::{Alert, AuditEvent, Device, FaultRecord};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("database lock poisoned")]
    DbLockPoisoned,
    #[error("database operation failed: {0}")]
    Database(#[from] DbError),
}

pub trait StationQueryHandler {
    fn list_devices(&self) -> Result<Vec<Device>, ServiceError>;
    fn get_device(&self, device_id: &str) -> Result<Option<Device>, ServiceError>;
    fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>, ServiceError>;
    fn get_alert(&self, alert_id: &str) -> Result<Option<Alert>, ServiceError>;
    fn list_audit_events(&self, device_id: &str, limit: u32)
    -> Result<Vec<AuditEvent>, ServiceError>;
    fn list_faults(&self, device_id: &str, open_only: bool)
    -> Result<Vec<FaultRecord>, ServiceError>;
    fn get_schema_version(&self) -> Result<u32, ServiceError>;
}

/// Shared handle to the SQLite database. Every engine write goes through
/// [`SqliteStore::with_transaction`], so a status transition, its audit event
/// and its alert changes commit or roll back together.
#[derive(Clone)]
pub struct SqliteStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self { connection }
    }

    pub fn with_connection<T, E>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<ServiceError>,
    {
        let connection = self
            .connection
            .lock()
            .map_err(|_| ServiceError::DbLockPoisoned)?;
        op(&connection)
    }

    pub fn with_transaction<T, E>(
        &self,
        op: impl FnOnce(&Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<ServiceError>,
    {
        let mut connection = self
            .connection
            .lock()
            .map_err(|_| ServiceError::DbLockPoisoned)?;
        let transaction = connection
            .transaction()
            .map_err(|error| ServiceError::Database(DbError::from(error)))?;

        let value = op(&transaction)?;

        transaction
            .commit()
            .map_err(|error| ServiceError::Database(DbError::from(error)))?;
        Ok(value)
    }

    fn query<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, DbError>,
    ) -> Result<T, ServiceError> {
        self.with_connection(|connection| op(connection).map_err(ServiceError::from))
    }
}

impl StationQueryHandler for SqliteStore {
    fn list_devices(&self) -> Result<Vec<Device>, ServiceError> {
        self.query(db::list_devices)
    }

    fn get_device(&self, device_id: &str) -> Result<Option<Device>, ServiceError> {
        self.query(|connection| db::get_device(connection, device_id))
    }

    fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>, ServiceError> {
        self.query(|connection| db::list_alerts(connection, filter))
    }

    fn get_alert(&self, alert_id: &str) -> Result<Option<Alert>, ServiceError> {
        self.query(|connection| db::get_alert(connection, alert_id))
    }

    fn list_audit_events(
        &self,
        device_id: &str,
        limit: u32,
    ) -> Result<Vec<AuditEvent>, ServiceError> {
        self.query(|connection| db::list_audit_events(connection, device_id, limit))
    }

    fn list_faults(
        &self,
        device_id: &str,
        open_only: bool,
    ) -> Result<Vec<FaultRecord>, ServiceError> {
        self.query(|connection| db::list_faults(connection, device_id, open_only))
    }

    fn get_schema_version(&self) -> Result<u32, ServiceError> {
        self.query(db::schema_version)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{ServiceError, SqliteStore, StationQueryHandler};
    use crate::adapters::db::{self, DbError};
    use crate::domain::models::NewDevice;
    use crate::test_support::open_test_store;

    fn station(id: &str) -> NewDevice {
        NewDevice {
            id: id.to_string(),
            label: "Bay".to_string(),
            location: "Depot".to_string(),
            terminal_id: None,
        }
    }

    #[test]
    fn failed_transaction_rolls_back_every_write() {
        let store: SqliteStore = open_test_store("services-rollback");
        let now = Utc.with_ymd_and_hms(2026, 2, 20, 10, 0, 0).unwrap();

        let result: Result<(), ServiceError> = store.with_transaction(|tx| {
            db::upsert_device(tx, &station("st-1"), now)?;
            Err(ServiceError::Database(DbError::UnsupportedSchemaVersion {
                current: 9,
                latest: 2,
            }))
        });

        assert!(result.is_err());
        assert!(store.list_devices().expect("query should succeed").is_empty());
    }

    #[test]
    fn committed_transaction_is_visible_to_queries() {
        let store = open_test_store("services-commit");
        let now = Utc.with_ymd_and_hms(2026, 2, 20, 10, 0, 0).unwrap();

        store
            .with_transaction(|tx| db::upsert_device(tx, &station("st-1"), now).map_err(ServiceError::from))
            .expect("transaction should commit");

        let device = store
            .get_device("st-1")
            .expect("query should succeed")
            .expect("device should exist");
        assert_eq!(device.location, "Depot");
        assert_eq!(
            store.get_schema_version().expect("version should load"),
            db::LATEST_SCHEMA_VERSION
        );
    }
}
