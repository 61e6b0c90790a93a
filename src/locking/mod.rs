//! Pessimistic object locking.
//!
//! Every persistent identity gets an [`ObjectLock`] on first request. The
//! [`LockManager`] picks the isolation strategy for the object's class and
//! lets it decide which lock to take; conflicts are handed to a pluggable
//! [`LockWaitStrategy`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       LockManager                           │
//! │     (ensure_lock / get_lock_held / release_lock / all)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │  LockMap    │       │ Isolation   │       │    Wait     │
//!  │ (ObjectLock)│       │  Factory    │       │  Strategy   │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use ojb::locking::{LockManager, LockType, TimeoutWaitStrategy};
//!
//! let manager = LockManager::new(repository, Arc::new(TimeoutWaitStrategy::new(timeout)), 0);
//! manager.ensure_lock(&oid, tx, LockType::Write, "Book")?;
//! assert_eq!(manager.get_lock_held(&oid, tx), LockType::Write);
//! manager.release_all(tx);
//! ```

mod error;
mod isolation;
mod manager;
mod object_lock;
mod wait;

pub use error::{LockingError, LockingResult};
pub use isolation::{
    IsolationFactory, IsolationLevel, ReadCommittedIsolation, ReadUncommittedIsolation,
    RepeatableReadIsolation, SerializableIsolation, TransactionIsolation, UnknownIsolationError,
};
pub use manager::{LockManager, LockMap};
pub use object_lock::{LockConflict, LockListener, LockType, ObjectLock};
pub use wait::{LockWaitStrategy, NoWaitStrategy, TimeoutWaitStrategy};
