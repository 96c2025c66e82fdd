//! Per-instance operation lock.
//!
//! Backup, restore, delete and retention for the same instance never overlap.
//! Different instances proceed independently. An instance's entry lives only
//! while an operation holds or waits for it.

use crate::utils::errors::{BackupError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

type LockMap = HashMap<String, Arc<Mutex<()>>>;

/// Held for the duration of one operation; dropping it releases the instance.
#[derive(Debug)]
pub struct OperationGuard {
    guard: Option<OwnedMutexGuard<()>>,
    instance_id: String,
    locks: Arc<StdMutex<LockMap>>,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        // Release first so our own reference no longer counts.
        self.guard.take();

        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if map
            .get(&self.instance_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(&self.instance_id);
        }
    }
}

#[derive(Clone)]
pub struct OperationLocks {
    locks: Arc<StdMutex<LockMap>>,
    acquire_timeout: Duration,
}

impl Default for OperationLocks {
    fn default() -> Self {
        Self::new(DEFAULT_ACQUIRE_TIMEOUT)
    }
}

impl OperationLocks {
    pub fn new(acquire_timeout: Duration) -> Self {
        Self {
            locks: Arc::new(StdMutex::new(HashMap::new())),
            acquire_timeout,
        }
    }

    fn instance_lock(&self, instance_id: &str) -> Arc<Mutex<()>> {
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(instance_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Number of instances with an operation running or waiting.
    pub fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Wait up to the acquire timeout for exclusive access to `instance_id`.
    pub async fn acquire(&self, instance_id: &str) -> Result<OperationGuard> {
        let lock = self.instance_lock(instance_id);
        match tokio::time::timeout(self.acquire_timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(OperationGuard {
                guard: Some(guard),
                instance_id: instance_id.to_string(),
                locks: Arc::clone(&self.locks),
            }),
            Err(_) => {
                warn!(instance_id, "Another backup operation is still running");
                Err(BackupError::OperationInProgress(instance_id.to_string()))
            }
        }
    }
}
