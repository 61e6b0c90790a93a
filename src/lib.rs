//! OJB - object/relational transaction core
//!
//! This crate tracks the pending write intent of persistent objects, locks
//! object identities between concurrent transactions, and batches the
//! resulting DML in an order that respects foreign keys.
//!
//! - [`state`]: the modification state machine and per-transaction envelopes
//! - [`locking`]: object locks, isolation levels and wait strategies
//! - [`batch`]: deferred statements grouped into dependency-ordered batches
//! - [`otm`]: the [`Kit`](otm::Kit) and its transactions
//!
//! # Example
//!
//! ```ignore
//! use ojb::config::OjbConfig;
//! use ojb::metadata::{ClassDescriptor, DescriptorRepository};
//! use ojb::otm::Kit;
//! use ojb::types::Identity;
//!
//! let repository = DescriptorRepository::new()
//!     .with(ClassDescriptor::new("Article", "ARTICLE"))?;
//! let kit = Kit::new(OjbConfig::default(), repository)?;
//!
//! let mut tx = kit.begin();
//! tx.make_persistent(Identity::single("Article", "1"), "Article", json!({"name": "pen"}))?;
//! tx.commit(&broker)?;
//! ```

pub mod batch;
pub mod config;
pub mod locking;
pub mod metadata;
pub mod otm;
pub mod state;
pub mod types;
