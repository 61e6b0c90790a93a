//! Transaction isolation levels and the locking strategy behind each.
//!
//! The level is a per-class attribute of the mapping metadata:
//! - ReadUncommitted: reads take no locks; writers are still exclusive
//! - ReadCommitted: reads wait out a foreign writer but hold nothing
//! - RepeatableRead: read locks are held until the transaction ends
//! - Serializable: like RepeatableRead, and a write also waits for foreign readers

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::error::LockingResult;
use super::object_lock::ObjectLock;
use super::wait::LockWaitStrategy;
use crate::types::TxId;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolationLevel {
    /// Dirty reads allowed. Default for classes without an explicit level.
    #[default]
    ReadUncommitted,
    /// Reads never observe an uncommitted write.
    ReadCommitted,
    /// Objects read stay unchanged until the reader ends.
    RepeatableRead,
    /// Full read/write exclusion.
    Serializable,
}

/// The isolation ordinal is outside `0..=3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown isolation level: {0}")]
pub struct UnknownIsolationError(pub u8);

impl IsolationLevel {
    /// All levels by ordinal.
    pub const ALL: [IsolationLevel; 4] = [
        IsolationLevel::ReadUncommitted,
        IsolationLevel::ReadCommitted,
        IsolationLevel::RepeatableRead,
        IsolationLevel::Serializable,
    ];

    /// Metadata ordinal of this level.
    pub fn ordinal(&self) -> u8 {
        match self {
            IsolationLevel::ReadUncommitted => 0,
            IsolationLevel::ReadCommitted => 1,
            IsolationLevel::RepeatableRead => 2,
            IsolationLevel::Serializable => 3,
        }
    }

    /// Level for a metadata ordinal.
    pub fn from_ordinal(ordinal: u8) -> Result<Self, UnknownIsolationError> {
        Self::ALL
            .get(ordinal as usize)
            .copied()
            .ok_or(UnknownIsolationError(ordinal))
    }

    /// Whether read locks are kept until the transaction ends.
    pub fn holds_read_locks(&self) -> bool {
        matches!(
            self,
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable
        )
    }

    /// Get a human-readable description of this isolation level.
    pub fn description(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "Reads take no locks and may see uncommitted writes",
            IsolationLevel::ReadCommitted => "Reads wait for writers but keep no lock",
            IsolationLevel::RepeatableRead => "Read locks are held until the transaction ends",
            IsolationLevel::Serializable => {
                "Read and write locks are held until the transaction ends; writers wait for readers"
            }
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolationLevel::ReadUncommitted => write!(f, "READ UNCOMMITTED"),
            IsolationLevel::ReadCommitted => write!(f, "READ COMMITTED"),
            IsolationLevel::RepeatableRead => write!(f, "REPEATABLE READ"),
            IsolationLevel::Serializable => write!(f, "SERIALIZABLE"),
        }
    }
}

/// Parse isolation level from string (SQL syntax).
impl std::str::FromStr for IsolationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "READ UNCOMMITTED" | "READ_UNCOMMITTED" | "READUNCOMMITTED" => {
                Ok(IsolationLevel::ReadUncommitted)
            }
            "READ COMMITTED" | "READ_COMMITTED" | "READCOMMITTED" => {
                Ok(IsolationLevel::ReadCommitted)
            }
            "REPEATABLE READ" | "REPEATABLE_READ" | "REPEATABLEREAD" => {
                Ok(IsolationLevel::RepeatableRead)
            }
            "SERIALIZABLE" => Ok(IsolationLevel::Serializable),
            _ => Err(format!("unknown isolation level: {}", s)),
        }
    }
}

// ==================== Strategies ====================

/// Locking behavior of one isolation level.
pub trait TransactionIsolation: Send + Sync {
    /// The level this strategy implements.
    fn level(&self) -> IsolationLevel;

    /// Lock `lock` for reading on behalf of `tx`.
    fn read_lock(&self, tx: TxId, lock: &ObjectLock, strategy: &dyn LockWaitStrategy) -> LockingResult<()>;

    /// Lock `lock` for writing on behalf of `tx`.
    fn write_lock(&self, tx: TxId, lock: &ObjectLock, strategy: &dyn LockWaitStrategy) -> LockingResult<()>;
}

/// Strategy for [`IsolationLevel::ReadUncommitted`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadUncommittedIsolation;

/// Strategy for [`IsolationLevel::ReadCommitted`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadCommittedIsolation;

/// Strategy for [`IsolationLevel::RepeatableRead`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RepeatableReadIsolation;

/// Strategy for [`IsolationLevel::Serializable`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SerializableIsolation;

impl TransactionIsolation for ReadUncommittedIsolation {
    fn level(&self) -> IsolationLevel {
        IsolationLevel::ReadUncommitted
    }

    fn read_lock(&self, _tx: TxId, _lock: &ObjectLock, _strategy: &dyn LockWaitStrategy) -> LockingResult<()> {
        Ok(())
    }

    fn write_lock(&self, tx: TxId, lock: &ObjectLock, strategy: &dyn LockWaitStrategy) -> LockingResult<()> {
        lock.write_lock(tx, strategy)
    }
}

impl TransactionIsolation for ReadCommittedIsolation {
    fn level(&self) -> IsolationLevel {
        IsolationLevel::ReadCommitted
    }

    fn read_lock(&self, tx: TxId, lock: &ObjectLock, strategy: &dyn LockWaitStrategy) -> LockingResult<()> {
        // the read lock would be released right away, so only the wait matters
        lock.wait_for_writer(tx, strategy)
    }

    fn write_lock(&self, tx: TxId, lock: &ObjectLock, strategy: &dyn LockWaitStrategy) -> LockingResult<()> {
        lock.write_lock(tx, strategy)
    }
}

impl TransactionIsolation for RepeatableReadIsolation {
    fn level(&self) -> IsolationLevel {
        IsolationLevel::RepeatableRead
    }

    fn read_lock(&self, tx: TxId, lock: &ObjectLock, strategy: &dyn LockWaitStrategy) -> LockingResult<()> {
        lock.shared_lock(tx, strategy)
    }

    fn write_lock(&self, tx: TxId, lock: &ObjectLock, strategy: &dyn LockWaitStrategy) -> LockingResult<()> {
        lock.write_lock(tx, strategy)
    }
}

impl TransactionIsolation for SerializableIsolation {
    fn level(&self) -> IsolationLevel {
        IsolationLevel::Serializable
    }

    fn read_lock(&self, tx: TxId, lock: &ObjectLock, strategy: &dyn LockWaitStrategy) -> LockingResult<()> {
        lock.shared_lock(tx, strategy)
    }

    fn write_lock(&self, tx: TxId, lock: &ObjectLock, strategy: &dyn LockWaitStrategy) -> LockingResult<()> {
        lock.exclusive_lock(tx, strategy)
    }
}

static READ_UNCOMMITTED: ReadUncommittedIsolation = ReadUncommittedIsolation;
static READ_COMMITTED: ReadCommittedIsolation = ReadCommittedIsolation;
static REPEATABLE_READ: RepeatableReadIsolation = RepeatableReadIsolation;
static SERIALIZABLE: SerializableIsolation = SerializableIsolation;

/// Maps isolation metadata to strategy instances.
pub struct IsolationFactory;

impl IsolationFactory {
    /// Strategy for a metadata ordinal.
    pub fn get_isolation_level(ordinal: u8) -> Result<&'static dyn TransactionIsolation, UnknownIsolationError> {
        IsolationLevel::from_ordinal(ordinal).map(Self::for_level)
    }

    /// Strategy for a level.
    pub fn for_level(level: IsolationLevel) -> &'static dyn TransactionIsolation {
        match level {
            IsolationLevel::ReadUncommitted => &READ_UNCOMMITTED,
            IsolationLevel::ReadCommitted => &READ_COMMITTED,
            IsolationLevel::RepeatableRead => &REPEATABLE_READ,
            IsolationLevel::Serializable => &SERIALIZABLE,
        }
    }
}
