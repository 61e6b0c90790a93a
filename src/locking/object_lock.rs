//! Per-identity reader/writer lock.
//!
//! All mutations of a lock (reader registration, writer claim, release) are
//! serialized on one mutex. Blocking is delegated to a
//! [`LockWaitStrategy`]: an acquire attempt that conflicts hands the
//! strategy a [`LockConflict`] and retries once the strategy returns. There
//! is no wait queue, so acquisition order among waiters is not fair.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};

use super::error::LockingResult;
use super::wait::LockWaitStrategy;
use crate::types::{Identity, TxId};

/// Callback fired when a transaction releases its entry on a lock.
pub trait LockListener: Send + Sync {
    /// `tx` released its lock on `identity`.
    fn lock_released(&self, tx: TxId, identity: &Identity);
}

/// The lock a transaction holds on an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockType {
    /// No lock held.
    None,
    /// Shared read lock.
    Read,
    /// Exclusive write lock (implies read).
    Write,
}

impl fmt::Display for LockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockType::None => write!(f, "NONE"),
            LockType::Read => write!(f, "READ"),
            LockType::Write => write!(f, "WRITE"),
        }
    }
}

/// Why an acquire attempt could not proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConflict {
    /// Transactions whose entries block the attempt.
    pub holders: Vec<TxId>,
    /// Release counter observed together with `holders`.
    pub generation: u64,
    /// When the acquisition first hit a conflict. Stays fixed across retries.
    pub waiting_since: Instant,
}

/// One transaction's entry on a lock.
struct LockEntry {
    acquired_at: DateTime<Utc>,
    listeners: Vec<Arc<dyn LockListener>>,
}

impl LockEntry {
    fn new() -> Self {
        Self {
            acquired_at: Utc::now(),
            listeners: Vec::new(),
        }
    }
}

#[derive(Default)]
struct LockState {
    writer: Option<TxId>,
    /// Every holder has an entry here, the writer included.
    readers: HashMap<TxId, LockEntry>,
    /// Bumped on every release; waiters sleep until it moves.
    generation: u64,
}

impl LockState {
    fn foreign_writer(&self, tx: TxId) -> Option<TxId> {
        self.writer.filter(|w| *w != tx)
    }

    fn foreign_readers(&self, tx: TxId) -> Vec<TxId> {
        self.readers.keys().copied().filter(|r| *r != tx).collect()
    }

    fn register_reader(&mut self, tx: TxId) {
        self.readers.entry(tx).or_insert_with(LockEntry::new);
    }

    fn conflict(&self, holders: Vec<TxId>, waiting_since: Instant) -> LockConflict {
        LockConflict {
            holders,
            generation: self.generation,
            waiting_since,
        }
    }
}

/// Reader/writer lock record for one persistent identity.
pub struct ObjectLock {
    identity: Identity,
    state: Mutex<LockState>,
    released: Condvar,
}

impl ObjectLock {
    /// Create a free lock for `identity`.
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            state: Mutex::new(LockState::default()),
            released: Condvar::new(),
        }
    }

    /// The identity this lock protects.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    // ==================== Acquisition ====================

    /// Register `tx` as a reader. Never blocks.
    pub fn read_lock(&self, tx: TxId) {
        self.state.lock().register_reader(tx);
    }

    /// Claim the writer slot for `tx`.
    ///
    /// Reentrant. Waits while another transaction is the writer; readers
    /// other than `tx` do not block the claim.
    pub fn write_lock(&self, tx: TxId, strategy: &dyn LockWaitStrategy) -> LockingResult<()> {
        self.acquire(tx, strategy, |state| {
            if state.writer == Some(tx) {
                return Ok(());
            }
            if let Some(writer) = state.writer {
                return Err(vec![writer]);
            }
            state.register_reader(tx);
            state.writer = Some(tx);
            Ok(())
        })
    }

    /// Claim the writer slot once no other transaction holds any entry.
    pub fn exclusive_lock(&self, tx: TxId, strategy: &dyn LockWaitStrategy) -> LockingResult<()> {
        self.acquire(tx, strategy, |state| {
            if let Some(writer) = state.foreign_writer(tx) {
                return Err(vec![writer]);
            }
            let readers = state.foreign_readers(tx);
            if !readers.is_empty() {
                return Err(readers);
            }
            state.register_reader(tx);
            state.writer = Some(tx);
            Ok(())
        })
    }

    /// Register `tx` as a reader once no other transaction is the writer.
    pub fn shared_lock(&self, tx: TxId, strategy: &dyn LockWaitStrategy) -> LockingResult<()> {
        self.acquire(tx, strategy, |state| {
            if let Some(writer) = state.foreign_writer(tx) {
                return Err(vec![writer]);
            }
            state.register_reader(tx);
            Ok(())
        })
    }

    /// Wait until no other transaction is the writer, without registering.
    pub fn wait_for_writer(&self, tx: TxId, strategy: &dyn LockWaitStrategy) -> LockingResult<()> {
        self.acquire(tx, strategy, |state| match state.foreign_writer(tx) {
            Some(writer) => Err(vec![writer]),
            None => Ok(()),
        })
    }

    /// Retry `attempt` under the lock's mutex until it succeeds, handing
    /// every conflict to the wait strategy in between.
    fn acquire<F>(&self, tx: TxId, strategy: &dyn LockWaitStrategy, mut attempt: F) -> LockingResult<()>
    where
        F: FnMut(&mut LockState) -> Result<(), Vec<TxId>>,
    {
        let mut waiting_since = None;
        loop {
            let conflict = {
                let mut state = self.state.lock();
                match attempt(&mut state) {
                    Ok(()) => return Ok(()),
                    Err(holders) => {
                        let since = *waiting_since.get_or_insert_with(Instant::now);
                        state.conflict(holders, since)
                    }
                }
            };
            tracing::trace!(
                %tx,
                identity = %self.identity,
                holders = ?conflict.holders,
                "lock conflict, waiting"
            );
            strategy.wait_for_lock(self, tx, &conflict)?;
        }
    }

    // ==================== Release ====================

    /// Drop `tx`'s entry (and the writer slot if it holds it), wake waiters
    /// and notify the entry's listeners.
    ///
    /// Returns `false` if `tx` held nothing.
    pub fn release_lock(&self, tx: TxId) -> bool {
        let listeners = {
            let mut state = self.state.lock();
            let entry = state.readers.remove(&tx);
            let was_writer = state.writer == Some(tx);
            if was_writer {
                state.writer = None;
            }
            if entry.is_none() && !was_writer {
                return false;
            }
            state.generation += 1;
            self.released.notify_all();
            entry.map(|e| e.listeners).unwrap_or_default()
        };

        for listener in &listeners {
            listener.lock_released(tx, &self.identity);
        }
        true
    }

    /// Block until a release happens after `generation`, or `timeout`
    /// elapses. Returns whether a release was observed.
    pub fn await_release(&self, generation: u64, timeout: Option<Duration>) -> bool {
        let mut state = self.state.lock();
        match timeout {
            None => {
                while state.generation == generation {
                    self.released.wait(&mut state);
                }
                true
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while state.generation == generation {
                    if self.released.wait_until(&mut state, deadline).timed_out() {
                        return state.generation != generation;
                    }
                }
                true
            }
        }
    }

    /// Register a listener on `tx`'s entry. The same listener instance is
    /// only registered once. Returns `false` if `tx` holds no entry.
    pub fn add_listener(&self, tx: TxId, listener: Arc<dyn LockListener>) -> bool {
        let mut state = self.state.lock();
        match state.readers.get_mut(&tx) {
            Some(entry) => {
                if !entry.listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
                    entry.listeners.push(listener);
                }
                true
            }
            None => false,
        }
    }

    // ==================== Queries ====================

    /// Current writer.
    pub fn writer(&self) -> Option<TxId> {
        self.state.lock().writer
    }

    /// Whether `tx` holds the writer slot.
    pub fn is_writer(&self, tx: TxId) -> bool {
        self.state.lock().writer == Some(tx)
    }

    /// Whether `tx` holds an entry (writers are readers too).
    pub fn is_reader(&self, tx: TxId) -> bool {
        self.state.lock().readers.contains_key(&tx)
    }

    /// Whether any transaction holds a read entry.
    pub fn does_reader_exist(&self) -> bool {
        !self.state.lock().readers.is_empty()
    }

    /// All transactions holding an entry.
    pub fn readers(&self) -> Vec<TxId> {
        self.state.lock().readers.keys().copied().collect()
    }

    /// Whether nobody holds the lock.
    pub fn is_free(&self) -> bool {
        let state = self.state.lock();
        state.writer.is_none() && state.readers.is_empty()
    }

    /// Lock held by `tx`.
    pub fn lock_held(&self, tx: TxId) -> LockType {
        let state = self.state.lock();
        if state.writer == Some(tx) {
            LockType::Write
        } else if state.readers.contains_key(&tx) {
            LockType::Read
        } else {
            LockType::None
        }
    }

    /// When `tx` acquired its entry.
    pub fn acquired_at(&self, tx: TxId) -> Option<DateTime<Utc>> {
        self.state.lock().readers.get(&tx).map(|e| e.acquired_at)
    }
}

impl fmt::Debug for ObjectLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ObjectLock")
            .field("identity", &self.identity)
            .field("writer", &state.writer)
            .field("readers", &state.readers.len())
            .finish()
    }
}
