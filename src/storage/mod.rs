//! SQLite storage for SMS, MMS and their conversation threads.
//!
//! All mutations go through [`MessageStore::write`], which opens an
//! IMMEDIATE transaction and hands out a [`UnitOfWork`]. Every row write
//! records its change on the unit of work, and the matching consistency
//! hook runs inside that same transaction.

mod consistency;
mod conversations;
mod migrations;
mod monitor;
pub mod query;
mod schema;
mod search;
mod threads;
mod writes;

use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, TransactionBehavior};
use tracing::{error, info};

use crate::address;
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};

use consistency::{Change, EngineOptions};

pub use conversations::{PendingFilter, ThreadFilter, ThreadRecipients, ThreadSort, ThreadSubject};
pub use migrations::{AutoIncrementTable, DeferredUpgrades, OLDEST_UPGRADABLE_VERSION};
pub use monitor::{spawn_storage_monitor, StorageState};
pub use query::{Column, Condition, Order, Source, SubQuery, UnifiedMessage, UnionQuery};
pub use schema::DATABASE_VERSION;
pub use search::SearchHit;
pub use threads::parse_thread_id;

/// Thread-safe message store backed by SQLite
pub struct MessageStore {
    conn: Arc<Mutex<Connection>>,
    options: EngineOptions,
    deferred: Arc<Mutex<DeferredUpgrades>>,
}

impl MessageStore {
    /// Open (creating or upgrading) the database at `config.db_path`.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&config.db_path)?;
        let store = Self::from_connection(conn, config)?;
        info!("Message store opened at {:?}", config.db_path);
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with(&StoreConfig::default())
    }

    pub fn open_in_memory_with(config: &StoreConfig) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, config)
    }

    /// Wrap an already-open connection, registering SQL functions and
    /// bringing the schema to the current version.
    pub fn from_connection(mut conn: Connection, config: &StoreConfig) -> Result<Self> {
        let options = EngineOptions::from(config);

        conn.busy_timeout(config.busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        address::register_functions(&conn, options.strict_phone)?;

        let deferred = migrations::prepare(&mut conn)?;
        if !deferred.is_empty() {
            info!("Schema upgrades deferred until storage recovers: {:?}", deferred);
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            options,
            deferred: Arc::new(Mutex::new(deferred)),
        })
    }

    /// Schema version currently stored in the database.
    pub fn version(&self) -> Result<i32> {
        self.read(schema::user_version)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn lock_deferred(&self) -> Result<MutexGuard<'_, DeferredUpgrades>> {
        self.deferred.lock().map_err(|_| StoreError::LockPoisoned)
    }

    pub(crate) fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` in one IMMEDIATE transaction; commit on success, roll back on error.
    ///
    /// Refused with [`StoreError::UpgradeDeferred`] while the upgrade chain is
    /// stopped short: legacy triggers may still be installed at that point.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&UnitOfWork<'_>) -> Result<T>) -> Result<T> {
        self.require_current_schema()?;
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let uow = UnitOfWork {
            conn: &tx,
            options: self.options,
        };
        match f(&uow) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                error!("Rolling back write: {}", err);
                tx.rollback()?;
                Err(err)
            }
        }
    }
}

impl Clone for MessageStore {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            options: self.options,
            deferred: Arc::clone(&self.deferred),
        }
    }
}

/// One write transaction in progress.
pub(crate) struct UnitOfWork<'a> {
    conn: &'a Connection,
    options: EngineOptions,
}

impl<'a> UnitOfWork<'a> {
    pub(crate) fn conn(&self) -> &'a Connection {
        self.conn
    }

    pub(crate) fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Apply the consistency hook for a row change written in this transaction.
    pub(crate) fn record(&self, change: Change) -> Result<()> {
        consistency::apply(self.conn, &self.options, change)
    }
}
