//! The kit: entry point for object transactions.
//!
//! The Kit handles:
//! - Transaction creation
//! - Tracking active transactions
//! - Owning the lock manager every transaction locks through

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::error::TransactionResult;
use super::transaction::Transaction;
use crate::config::{ConfigResult, OjbConfig};
use crate::locking::LockManager;
use crate::metadata::DescriptorRepository;
use crate::state::PersistenceBroker;
use crate::types::TxId;

/// Metadata of an active transaction.
#[derive(Debug, Clone)]
pub struct TransactionMetadata {
    /// Transaction id.
    pub tx_id: TxId,
    /// When the transaction started.
    pub started_at: DateTime<Utc>,
}

/// Transaction kit.
///
/// Thread-safe: can be shared across threads via Clone (uses Arc internally).
#[derive(Clone)]
pub struct Kit {
    inner: Arc<KitInner>,
}

struct KitInner {
    config: OjbConfig,
    repository: Arc<DescriptorRepository>,
    lock_manager: LockManager,
    /// Active transactions tracked by ID.
    active: RwLock<HashMap<TxId, TransactionMetadata>>,
}

impl Kit {
    /// Create a kit over the given class metadata.
    pub fn new(
        config: OjbConfig,
        repository: impl Into<Arc<DescriptorRepository>>,
    ) -> ConfigResult<Self> {
        config.validate()?;
        let repository = repository.into();
        let lock_manager = LockManager::new(
            Arc::clone(&repository),
            config.build_wait_strategy(),
            config.default_isolation.ordinal(),
        );
        tracing::debug!(
            classes = repository.len(),
            default_isolation = %config.default_isolation,
            "kit created"
        );

        Ok(Self {
            inner: Arc::new(KitInner {
                config,
                repository,
                lock_manager,
                active: RwLock::new(HashMap::new()),
            }),
        })
    }

    /// Begin a new transaction.
    pub fn begin(&self) -> Transaction {
        let tx = Transaction::new(self.clone());
        self.inner.active.write().insert(
            tx.id(),
            TransactionMetadata {
                tx_id: tx.id(),
                started_at: tx.started_at(),
            },
        );
        tracing::debug!(tx = %tx.id(), "transaction started");
        tx
    }

    /// Run `f` inside a fresh transaction, committing on success and
    /// rolling back on error.
    pub fn with_transaction<B, T, F>(&self, broker: &B, f: F) -> TransactionResult<T>
    where
        B: PersistenceBroker + ?Sized,
        F: FnOnce(&mut Transaction) -> TransactionResult<T>,
    {
        let mut tx = self.begin();
        match f(&mut tx) {
            Ok(value) => {
                tx.commit(broker)?;
                Ok(value)
            }
            Err(e) => {
                let id = tx.id();
                if let Err(rollback) = tx.rollback(broker) {
                    tracing::warn!(tx = %id, error = %rollback, "rollback after failure failed");
                }
                Err(e)
            }
        }
    }

    /// Get the number of active transactions.
    pub fn active_count(&self) -> usize {
        self.inner.active.read().len()
    }

    /// Check if a transaction is active.
    pub fn is_active(&self, tx: TxId) -> bool {
        self.inner.active.read().contains_key(&tx)
    }

    /// List all active transaction IDs.
    pub fn active_transactions(&self) -> Vec<TxId> {
        self.inner.active.read().keys().copied().collect()
    }

    /// Get metadata for an active transaction.
    pub fn transaction_info(&self, tx: TxId) -> Option<TransactionMetadata> {
        self.inner.active.read().get(&tx).cloned()
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.inner.lock_manager
    }

    pub fn repository(&self) -> &DescriptorRepository {
        &self.inner.repository
    }

    pub fn config(&self) -> &OjbConfig {
        &self.inner.config
    }

    /// Called when a transaction commits, rolls back or is dropped.
    pub(crate) fn mark_completed(&self, tx: TxId) {
        self.inner.active.write().remove(&tx);
    }
}

impl std::fmt::Debug for Kit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kit")
            .field("active", &self.active_count())
            .field("lock_manager", &self.inner.lock_manager)
            .finish()
    }
}
