//! StartGate - per-device in-flight guard for start attempts
//!
//! A device can hold at most one [`StartLease`]. The lease is released on
//! drop, so every exit path of a start attempt (success, error, timeout,
//! cancellation) clears the guard.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Per-device start guard
pub struct StartGate {
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl StartGate {
    pub fn new() -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
        }
    }

    /// Take the guard without waiting; `None` if a start is already in flight
    pub async fn try_acquire(&self, serial: &str) -> Option<StartLease> {
        let lock = self.get_or_create_lock(serial).await;

        match lock.try_lock_owned() {
            Ok(guard) => {
                tracing::debug!(serial = %serial, "Start guard acquired");
                Some(StartLease {
                    serial: serial.to_string(),
                    _guard: guard,
                })
            }
            Err(_) => {
                tracing::debug!(serial = %serial, "Start already in flight");
                None
            }
        }
    }

    /// Whether a start attempt currently holds the guard
    pub async fn is_in_flight(&self, serial: &str) -> bool {
        let locks = self.locks.read().await;
        match locks.get(serial) {
            Some(lock) => lock.try_lock().is_err(),
            None => false,
        }
    }

    /// Drop guards of devices that no longer exist
    pub async fn forget(&self, serial: &str) {
        self.locks.write().await.remove(serial);
    }

    async fn get_or_create_lock(&self, serial: &str) -> Arc<Mutex<()>> {
        {
            let locks = self.locks.read().await;
            if let Some(lock) = locks.get(serial) {
                return lock.clone();
            }
        }

        let mut locks = self.locks.write().await;
        locks
            .entry(serial.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl Default for StartGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Held for the duration of one start attempt
pub struct StartLease {
    serial: String,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for StartLease {
    fn drop(&mut self) {
        tracing::debug!(serial = %self.serial, "Start guard released");
    }
}
