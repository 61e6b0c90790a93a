//! Wait strategies: what a transaction does when a lock it wants is held.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::error::{LockingError, LockingResult};
use super::object_lock::{LockConflict, LockListener, ObjectLock};
use crate::types::{Identity, TxId};

/// Blocking and deadlock policy used by [`ObjectLock`] acquisition.
pub trait LockWaitStrategy: Send + Sync {
    /// Called when `tx` cannot acquire `lock` because of `conflict`.
    ///
    /// Return `Ok(())` once it is worth retrying the acquisition, or an
    /// error to abandon it.
    fn wait_for_lock(&self, lock: &ObjectLock, tx: TxId, conflict: &LockConflict) -> LockingResult<()>;
}

/// Fails immediately instead of waiting.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWaitStrategy;

impl LockWaitStrategy for NoWaitStrategy {
    fn wait_for_lock(&self, lock: &ObjectLock, tx: TxId, conflict: &LockConflict) -> LockingResult<()> {
        Err(LockingError::Conflict {
            tx,
            identity: lock.identity().clone(),
            holders: conflict.holders.clone(),
        })
    }
}

/// Parks the waiting thread until a release or the timeout, refusing to
/// wait when that would deadlock.
///
/// The timeout bounds the whole acquisition: retries after a release only
/// get what is left of it, counted from the first conflict.
pub struct TimeoutWaitStrategy {
    timeout: Duration,
    graph: Arc<WaitsForGraph>,
}

impl TimeoutWaitStrategy {
    /// Create a strategy that waits at most `timeout` per acquisition.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            graph: Arc::new(WaitsForGraph::default()),
        }
    }

    /// Configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether `tx` is currently parked on some lock.
    pub fn is_waiting(&self, tx: TxId) -> bool {
        self.graph.edges.lock().contains_key(&tx)
    }
}

impl LockWaitStrategy for TimeoutWaitStrategy {
    fn wait_for_lock(&self, lock: &ObjectLock, tx: TxId, conflict: &LockConflict) -> LockingResult<()> {
        let identity = lock.identity();
        let remaining = self.timeout.saturating_sub(conflict.waiting_since.elapsed());
        if remaining.is_zero() {
            return Err(self.timed_out(tx, identity, conflict));
        }
        if !self.graph.start_waiting(tx, identity, &conflict.holders) {
            tracing::warn!(%tx, %identity, holders = ?conflict.holders, "deadlock detected");
            return Err(LockingError::Deadlock {
                tx,
                identity: identity.clone(),
                holders: conflict.holders.clone(),
            });
        }

        let listener: Arc<dyn LockListener> = self.graph.clone();
        for holder in &conflict.holders {
            lock.add_listener(*holder, Arc::clone(&listener));
        }

        let released = lock.await_release(conflict.generation, Some(remaining));
        self.graph.stop_waiting(tx);

        if released {
            Ok(())
        } else {
            Err(self.timed_out(tx, identity, conflict))
        }
    }
}

impl TimeoutWaitStrategy {
    fn timed_out(&self, tx: TxId, identity: &Identity, conflict: &LockConflict) -> LockingError {
        let waited_ms =
            u64::try_from(conflict.waiting_since.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::warn!(%tx, %identity, waited_ms, "lock wait timed out");
        LockingError::Timeout {
            tx,
            identity: identity.clone(),
            waited_ms,
        }
    }
}

/// Edge from a parked transaction to the holders it waits for.
struct WaitEdge {
    identity: Identity,
    holders: HashSet<TxId>,
}

/// Which transaction waits for which.
#[derive(Default)]
struct WaitsForGraph {
    edges: Mutex<HashMap<TxId, WaitEdge>>,
}

impl WaitsForGraph {
    /// Record that `tx` waits for `holders`. Returns `false`, recording
    /// nothing, if some holder already (transitively) waits for `tx`.
    fn start_waiting(&self, tx: TxId, identity: &Identity, holders: &[TxId]) -> bool {
        let mut edges = self.edges.lock();

        let mut stack: Vec<TxId> = holders.to_vec();
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == tx {
                return false;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(edge) = edges.get(&current) {
                stack.extend(edge.holders.iter().copied());
            }
        }

        edges.insert(
            tx,
            WaitEdge {
                identity: identity.clone(),
                holders: holders.iter().copied().collect(),
            },
        );
        true
    }

    fn stop_waiting(&self, tx: TxId) {
        self.edges.lock().remove(&tx);
    }
}

impl LockListener for WaitsForGraph {
    fn lock_released(&self, tx: TxId, identity: &Identity) {
        let mut edges = self.edges.lock();
        for edge in edges.values_mut() {
            if &edge.identity == identity {
                edge.holders.remove(&tx);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn conflict(holders: Vec<TxId>) -> LockConflict {
        LockConflict {
            holders,
            generation: 0,
            waiting_since: Instant::now(),
        }
    }

    #[test]
    fn test_no_wait_reports_holders() {
        let lock = ObjectLock::new(Identity::single("Order", "1"));
        let (tx1, tx2) = (TxId::new(), TxId::new());

        let err = NoWaitStrategy
            .wait_for_lock(&lock, tx2, &conflict(vec![tx1]))
            .unwrap_err();
        assert!(matches!(err, LockingError::Conflict { tx, .. } if tx == tx2));
    }

    #[test]
    fn test_timeout() {
        let lock = ObjectLock::new(Identity::single("Order", "1"));
        let strategy = TimeoutWaitStrategy::new(Duration::from_millis(30));
        let (tx1, tx2) = (TxId::new(), TxId::new());
        lock.write_lock(tx1, &NoWaitStrategy).unwrap();

        let err = lock.write_lock(tx2, &strategy).unwrap_err();
        assert!(matches!(err, LockingError::Timeout { waited_ms, .. } if waited_ms >= 30));
        assert!(!strategy.is_waiting(tx2));
    }

    #[test]
    fn test_timeout_spans_retries() {
        let lock = ObjectLock::new(Identity::single("Order", "1"));
        let strategy = TimeoutWaitStrategy::new(Duration::from_secs(1));
        let (tx1, tx2) = (TxId::new(), TxId::new());
        lock.write_lock(tx1, &NoWaitStrategy).unwrap();

        // a retry whose acquisition started before the budget ran out
        let stale = LockConflict {
            waiting_since: Instant::now().checked_sub(Duration::from_secs(2)).unwrap(),
            ..conflict(vec![tx1])
        };
        let started = Instant::now();
        let err = strategy.wait_for_lock(&lock, tx2, &stale).unwrap_err();

        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(matches!(err, LockingError::Timeout { waited_ms, .. } if waited_ms >= 2_000));
        assert!(!strategy.is_waiting(tx2));
    }

    #[test]
    fn test_wait_until_release() {
        let lock = Arc::new(ObjectLock::new(Identity::single("Order", "1")));
        let strategy = Arc::new(TimeoutWaitStrategy::new(Duration::from_secs(10)));
        let (tx1, tx2) = (TxId::new(), TxId::new());
        lock.write_lock(tx1, &NoWaitStrategy).unwrap();

        let waiter = {
            let lock = Arc::clone(&lock);
            let strategy = Arc::clone(&strategy);
            thread::spawn(move || lock.write_lock(tx2, strategy.as_ref()))
        };

        while !strategy.is_waiting(tx2) {
            thread::yield_now();
        }
        lock.release_lock(tx1);

        waiter.join().unwrap().unwrap();
        assert!(lock.is_writer(tx2));
    }

    #[test]
    fn test_cycle_detection() {
        let graph = WaitsForGraph::default();
        let a = Identity::single("Order", "a");
        let b = Identity::single("Order", "b");
        let (tx1, tx2, tx3) = (TxId::new(), TxId::new(), TxId::new());

        assert!(graph.start_waiting(tx1, &b, &[tx2]));
        assert!(graph.start_waiting(tx2, &a, &[tx3]));
        assert!(!graph.start_waiting(tx3, &a, &[tx1]));

        graph.stop_waiting(tx2);
        assert!(graph.start_waiting(tx3, &a, &[tx1]));
    }

    #[test]
    fn test_release_prunes_edges() {
        let graph = WaitsForGraph::default();
        let a = Identity::single("Order", "a");
        let (tx1, tx2) = (TxId::new(), TxId::new());

        assert!(graph.start_waiting(tx1, &a, &[tx2]));
        graph.lock_released(tx2, &a);

        // tx1 no longer waits for tx2, so tx2 may wait for tx1
        assert!(graph.start_waiting(tx2, &a, &[tx1]));
    }
}
