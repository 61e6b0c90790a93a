//! Lock manager - resolves locks per identity and applies per-class policy.
//!
//! The LockManager is the entry point of the locking layer. It handles:
//! - Lazy creation of [`ObjectLock`]s in the shared [`LockMap`]
//! - Choosing the isolation strategy from the object's runtime class
//! - Tracking which identities each transaction holds
//! - Releasing everything a transaction holds when it ends

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::error::LockingResult;
use super::isolation::IsolationFactory;
use super::object_lock::{LockType, ObjectLock};
use super::wait::LockWaitStrategy;
use crate::metadata::DescriptorRepository;
use crate::types::{Identity, TxId};

/// Identity → lock table shared by all transactions of a kit.
#[derive(Default)]
pub struct LockMap {
    locks: RwLock<HashMap<Identity, Arc<ObjectLock>>>,
}

impl LockMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock for `identity`, creating it on first request.
    pub fn get_or_create(&self, identity: &Identity) -> Arc<ObjectLock> {
        if let Some(lock) = self.locks.read().get(identity) {
            return Arc::clone(lock);
        }
        let mut locks = self.locks.write();
        Arc::clone(
            locks
                .entry(identity.clone())
                .or_insert_with(|| Arc::new(ObjectLock::new(identity.clone()))),
        )
    }

    /// Lock for `identity`, if one exists.
    pub fn get(&self, identity: &Identity) -> Option<Arc<ObjectLock>> {
        self.locks.read().get(identity).cloned()
    }

    /// Drop the lock for `identity` if nobody holds or references it.
    ///
    /// Handles are only handed out under the map's lock, so a reference
    /// count of one means no thread can be about to use this lock.
    pub fn remove_if_free(&self, identity: &Identity) -> bool {
        let mut locks = self.locks.write();
        let removable = locks
            .get(identity)
            .is_some_and(|lock| Arc::strong_count(lock) == 1 && lock.is_free());
        if removable {
            locks.remove(identity);
        }
        removable
    }

    /// Number of live locks.
    pub fn len(&self) -> usize {
        self.locks.read().len()
    }

    /// Whether the map holds no locks.
    pub fn is_empty(&self) -> bool {
        self.locks.read().is_empty()
    }
}

/// Coordinates object locks for every transaction of a kit.
///
/// Thread-safe: share it through an `Arc` (the [`crate::otm::Kit`] does).
pub struct LockManager {
    repository: Arc<DescriptorRepository>,
    strategy: Arc<dyn LockWaitStrategy>,
    default_isolation: u8,
    locks: LockMap,
    /// Identities each transaction holds an entry on.
    held: Mutex<HashMap<TxId, HashSet<Identity>>>,
}

impl LockManager {
    /// Create a lock manager.
    ///
    /// `default_isolation` is the ordinal used for classes whose metadata
    /// does not name a level.
    pub fn new(
        repository: Arc<DescriptorRepository>,
        strategy: Arc<dyn LockWaitStrategy>,
        default_isolation: u8,
    ) -> Self {
        Self {
            repository,
            strategy,
            default_isolation,
            locks: LockMap::new(),
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Make sure `tx` holds at least `lock_type` on `oid`.
    ///
    /// The isolation strategy is chosen from `runtime_class`, the concrete
    /// class of the object, which may be a subclass of the class named in
    /// the identity.
    pub fn ensure_lock(
        &self,
        oid: &Identity,
        tx: TxId,
        lock_type: LockType,
        runtime_class: &str,
    ) -> LockingResult<()> {
        if lock_type == LockType::None {
            return Ok(());
        }

        let ordinal = self
            .repository
            .isolation_ordinal(runtime_class, self.default_isolation)?;
        let isolation = IsolationFactory::get_isolation_level(ordinal)?;

        let lock = self.locks.get_or_create(oid);
        let result = match lock_type {
            LockType::Read => isolation.read_lock(tx, &lock, self.strategy.as_ref()),
            LockType::Write => isolation.write_lock(tx, &lock, self.strategy.as_ref()),
            LockType::None => Ok(()),
        };

        let registered = lock.is_reader(tx);
        if registered {
            self.held.lock().entry(tx).or_default().insert(oid.clone());
        }
        drop(lock);

        match &result {
            Ok(()) => {
                tracing::debug!(
                    %tx,
                    identity = %oid,
                    %lock_type,
                    isolation = %isolation.level(),
                    "lock granted"
                );
                // reads below repeatable read leave no entry to release later
                if !registered {
                    self.locks.remove_if_free(oid);
                }
            }
            Err(e) => {
                tracing::debug!(%tx, identity = %oid, %lock_type, error = %e, "lock refused");
                self.locks.remove_if_free(oid);
            }
        }
        result
    }

    /// Lock `tx` holds on `oid`.
    pub fn get_lock_held(&self, oid: &Identity, tx: TxId) -> LockType {
        self.locks
            .get(oid)
            .map(|lock| lock.lock_held(tx))
            .unwrap_or(LockType::None)
    }

    /// Release `tx`'s lock on `oid`. Returns `false` if it held none.
    pub fn release_lock(&self, oid: &Identity, tx: TxId) -> bool {
        let released = match self.locks.get(oid) {
            Some(lock) => lock.release_lock(tx),
            None => false,
        };
        if let Some(held) = self.held.lock().get_mut(&tx) {
            held.remove(oid);
        }
        if released {
            tracing::debug!(%tx, identity = %oid, "lock released");
            self.locks.remove_if_free(oid);
        }
        released
    }

    /// Release every lock `tx` holds. Returns how many were released.
    pub fn release_all(&self, tx: TxId) -> usize {
        let held = self.held.lock().remove(&tx).unwrap_or_default();
        let mut released = 0;
        for oid in &held {
            if let Some(lock) = self.locks.get(oid) {
                if lock.release_lock(tx) {
                    released += 1;
                }
            }
            self.locks.remove_if_free(oid);
        }
        if released > 0 {
            tracing::debug!(%tx, released, "released all locks");
        }
        released
    }

    /// Identities `tx` currently holds an entry on.
    pub fn locks_of(&self, tx: TxId) -> Vec<Identity> {
        self.held
            .lock()
            .get(&tx)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of live locks.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// The class metadata used for isolation lookups.
    pub fn repository(&self) -> &DescriptorRepository {
        &self.repository
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("lock_count", &self.lock_count())
            .field("default_isolation", &self.default_isolation)
            .finish()
    }
}
