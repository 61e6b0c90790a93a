//! Object transaction manager.
//!
//! The [`Kit`] is the explicitly constructed entry point: it owns the
//! configuration, the class metadata and the [`LockManager`] every
//! [`Transaction`] locks through.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                           Kit                               │
//! │      (begin, active transactions, owns the LockManager)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │ Transaction │       │ LockManager │       │ Persistence │
//!  │ (Envelopes) │       │ (isolation) │       │   Broker    │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use ojb::otm::Kit;
//!
//! let kit = Kit::new(OjbConfig::default(), repository)?;
//!
//! let mut tx = kit.begin();
//! tx.make_persistent(Identity::single("Article", "1"), "Book", object)?;
//! tx.commit(&broker)?;  // or tx.rollback(&broker)?;
//! ```
//!
//! [`LockManager`]: crate::locking::LockManager

mod error;
mod kit;
mod transaction;

pub use error::{TransactionError, TransactionResult};
pub use kit::{Kit, TransactionMetadata};
pub use transaction::Transaction;
