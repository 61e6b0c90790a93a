//! Statement batching with referential-integrity ordering.
//!
//! DML prepared through a [`BatchConnection`] is deferred and grouped per
//! SQL text. Before a statement joins the queue, the connection checks the
//! [`ForeignKeyMap`] and flushes whatever could otherwise be reordered past
//! a dependency.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   execute_update   ┌──────────────────────┐
//! │  DeferredStatement   │ ─────────────────► │   BatchConnection    │
//! │ (recorded commands)  │                    │  next_executed()     │
//! └──────────────────────┘                    │  execute_batch()     │
//!                                             └──────────────────────┘
//!                                                 │             │
//!                                                 ▼             ▼
//!                                       ┌──────────────┐ ┌──────────────┐
//!                                       │ForeignKeyMap │ │  Connection  │
//!                                       │  (cached)    │ │   (driver)   │
//!                                       └──────────────┘ └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use ojb::batch::{BatchConnection, PreparedStatement};
//!
//! let conn = BatchConnection::new(driver, &repository)?;
//! let mut stmt = conn.prepare_statement("INSERT INTO ORDERS (ID) VALUES (?)")?;
//! stmt.set_int(1, 42)?;
//! stmt.execute_update()?; // queued
//! conn.commit()?;         // flushed in dependency order, then committed
//! ```

mod connection;
mod error;
mod foreign_keys;
mod prepared;
mod statement;

pub use connection::{BatchConnection, Connection, DEFAULT_MAX_COUNT};
pub use error::{BatchError, BatchResult};
pub use foreign_keys::ForeignKeyMap;
pub use prepared::{
    replay, DeferredStatement, DirectStatement, ParamValue, PreparedStatement, StatementCommand,
};
pub use statement::{DmlKind, DmlStatement};
