//! Per-device serialization and login single-flight.
//!
//! The appliance permits exactly one active management session per device, and
//! its API misbehaves under concurrent calls on that session. [`DeviceGate`]
//! therefore provides two disciplines, both keyed by device address:
//!
//! - **Exclusive access** — all relay operations against one address run
//!   strictly one at a time, in arrival order. Different addresses are fully
//!   independent.
//! - **Login single-flight** — concurrent login calls for one address collapse
//!   into a single outbound attempt; late arrivals wait and receive the same
//!   outcome instead of racing a second device-side session into existence.
//!
//! Locks are created lazily per address and live for the process lifetime;
//! the set of devices an operator migrates from is small and bounded.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tracing::debug;

/// Address-partitioned mutual exclusion plus login single-flight.
///
/// Cloneable — all clones share the same lock and in-flight tables.
#[derive(Clone, Default)]
pub struct DeviceGate {
    /// One async mutex per device address. tokio mutexes queue waiters FIFO,
    /// which gives the arrival-order guarantee directly.
    locks: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
    /// In-flight login broadcast per address. Present only while a login
    /// attempt is executing.
    logins: Arc<StdMutex<HashMap<String, broadcast::Sender<LoginJoin>>>>,
}

/// Outcome shared with login calls that joined an in-flight attempt.
type LoginJoin = Arc<dyn std::any::Any + Send + Sync>;

impl DeviceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the exclusive slot for `address`.
    ///
    /// The returned guard must be held for the entire logical operation,
    /// including any nested retry, so no second operation for the address can
    /// start mid-sequence. Dropping the guard (normally or on error) releases
    /// the slot to the next waiter; a failed operation never wedges the queue.
    pub async fn lock(&self, address: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut locks = self.locks.lock().expect("gate lock table poisoned");
            locks
                .entry(address.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }

    /// Run `operation` as the single in-flight login for `address`.
    ///
    /// If a login for the address is already executing, this call does not run
    /// `operation` at all — it waits for the in-flight attempt and returns a
    /// clone of its outcome. Otherwise this call becomes the leader: it takes
    /// the exclusive slot, runs `operation` to completion, and publishes the
    /// outcome to every call that joined meanwhile.
    pub async fn single_flight_login<T, F, Fut>(&self, address: &str, operation: F) -> T
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let role = {
            let mut logins = self.logins.lock().expect("gate login table poisoned");
            if let Some(tx) = logins.get(address) {
                FlightRole::Follower(tx.subscribe())
            } else {
                let (tx, _) = broadcast::channel(1);
                logins.insert(address.to_string(), tx.clone());
                FlightRole::Leader(tx)
            }
        };

        match role {
            FlightRole::Follower(mut rx) => {
                debug!(address, "joining in-flight login");
                match rx.recv().await {
                    Ok(outcome) => outcome
                        .downcast_ref::<T>()
                        .cloned()
                        .expect("login outcome type mismatch"),
                    // Leader dropped without publishing (cancelled mid-flight).
                    // Retry as a fresh attempt rather than surfacing a phantom
                    // failure.
                    Err(_) => Box::pin(self.single_flight_login(address, operation)).await,
                }
            }
            FlightRole::Leader(tx) => {
                // Removes the in-flight entry even if this future is dropped
                // mid-attempt; followers then observe a closed channel and
                // retry as a fresh flight instead of waiting forever.
                let flight = FlightGuard {
                    gate: self,
                    address,
                };
                let guard = self.lock(address).await;
                let outcome = operation().await;
                drop(guard);
                drop(flight);
                let _ = tx.send(Arc::new(outcome.clone()));
                outcome
            }
        }
    }
}

enum FlightRole {
    Leader(broadcast::Sender<LoginJoin>),
    Follower(broadcast::Receiver<LoginJoin>),
}

/// Clears the in-flight login entry for one address on drop.
struct FlightGuard<'a> {
    gate: &'a DeviceGate,
    address: &'a str,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.gate
            .logins
            .lock()
            .expect("gate login table poisoned")
            .remove(self.address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_exclusive_access_serializes_one_address() {
        let gate = DeviceGate::new();
        let active = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = gate.clone();
            let active = active.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = gate.lock("10.0.0.1").await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_addresses_run_concurrently() {
        let gate = DeviceGate::new();
        let g1 = gate.lock("10.0.0.1").await;
        // Must not deadlock: a different address has its own slot.
        let g2 = tokio::time::timeout(Duration::from_millis(100), gate.lock("10.0.0.2"))
            .await
            .expect("second address blocked by first");
        drop(g1);
        drop(g2);
    }

    #[tokio::test]
    async fn test_failed_operation_releases_slot() {
        let gate = DeviceGate::new();
        {
            let _guard = gate.lock("10.0.0.1").await;
            // Guard dropped here, simulating an operation that errored out.
        }
        tokio::time::timeout(Duration::from_millis(100), gate.lock("10.0.0.1"))
            .await
            .expect("slot not released after failure");
    }

    #[tokio::test]
    async fn test_single_flight_collapses_concurrent_logins() {
        let gate = DeviceGate::new();
        let attempts = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let gate = gate.clone();
            let attempts = attempts.clone();
            handles.push(tokio::spawn(async move {
                gate.single_flight_login("10.0.0.1", || async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    "logged-in".to_string()
                })
                .await
            }));
        }

        let mut outcomes = Vec::new();
        for h in handles {
            outcomes.push(h.await.unwrap());
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(outcomes.iter().all(|o| o == "logged-in"));
    }

    #[tokio::test]
    async fn test_sequential_logins_each_execute() {
        let gate = DeviceGate::new();
        let attempts = Arc::new(AtomicU32::new(0));
        for _ in 0..3 {
            let attempts = attempts.clone();
            gate.single_flight_login("10.0.0.1", || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
