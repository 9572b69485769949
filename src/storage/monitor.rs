//! Storage-state listener that finishes deferred schema upgrades.

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};

use super::migrations::{self, DeferredUpgrades};
use super::MessageStore;

/// Device storage condition as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageState {
    Low,
    Ok,
}

impl MessageStore {
    /// True while some upgrade work is waiting for storage to recover.
    pub fn is_upgrade_pending(&self) -> bool {
        self.lock_deferred()
            .map(|deferred| !deferred.is_empty())
            .unwrap_or(false)
    }

    /// Fails with [`StoreError::UpgradeDeferred`] while the step chain is
    /// stopped short of the current version.
    pub fn require_current_schema(&self) -> Result<()> {
        match self.lock_deferred()?.chain_at {
            Some(version) => Err(StoreError::UpgradeDeferred { version }),
            None => Ok(()),
        }
    }

    pub fn deferred_upgrades(&self) -> DeferredUpgrades {
        self.lock_deferred()
            .map(|deferred| deferred.clone())
            .unwrap_or_default()
    }

    /// React to a storage-state notification.
    ///
    /// On [`StorageState::Ok`] the deferred items are retried. Returns true
    /// once nothing is left deferred.
    pub fn on_storage_state(&self, state: StorageState) -> Result<bool> {
        let mut deferred = self.lock_deferred()?;
        if deferred.is_empty() {
            return Ok(true);
        }
        if state == StorageState::Low {
            debug!("Storage still low; upgrades stay deferred");
            return Ok(false);
        }

        let mut conn = self.lock()?;
        migrations::retry_deferred(&mut conn, &mut deferred)?;
        if deferred.is_empty() {
            info!("Deferred schema upgrades complete");
        } else {
            warn!("Schema upgrades still deferred: {:?}", *deferred);
        }
        Ok(deferred.is_empty())
    }
}

/// Listen for storage-state events and retry deferred upgrades on recovery.
///
/// The task ends once everything is applied, or when the sender is dropped.
pub fn spawn_storage_monitor(
    store: MessageStore,
    mut states: mpsc::Receiver<StorageState>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if !store.is_upgrade_pending() {
            return;
        }
        info!("Storage monitor armed");

        while let Some(state) = states.recv().await {
            if state != StorageState::Ok {
                continue;
            }

            let retry = store.clone();
            match tokio::task::spawn_blocking(move || retry.on_storage_state(state)).await {
                Ok(Ok(true)) => break,
                Ok(Ok(false)) => debug!("Storage recovered but upgrades remain deferred"),
                Ok(Err(e)) => warn!("Deferred upgrade retry failed: {}", e),
                Err(e) => {
                    warn!("Storage monitor task failed: {}", e);
                    break;
                }
            }
        }
        debug!("Storage monitor stopped");
    })
}
