//! Object transactions.
//!
//! A [`Transaction`] registers the objects it works on, locks them through
//! the kit's [`LockManager`](crate::locking::LockManager), and flushes their
//! pending changes through a [`PersistenceBroker`] on checkpoint or commit.
//! Every lock it holds is released when it commits, rolls back or is
//! dropped.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::error::{TransactionError, TransactionResult};
use super::kit::Kit;
use crate::locking::LockType;
use crate::state::{Envelope, EnvelopeTable, ModificationState, PersistenceBroker};
use crate::types::{Identity, TxId};

/// A unit of work over persistent objects.
pub struct Transaction {
    id: TxId,
    kit: Kit,
    envelopes: EnvelopeTable,
    started_at: DateTime<Utc>,
    finished: bool,
}

impl Transaction {
    pub(crate) fn new(kit: Kit) -> Self {
        Self {
            id: TxId::new(),
            kit,
            envelopes: EnvelopeTable::new(),
            started_at: Utc::now(),
            finished: false,
        }
    }

    /// Get the transaction ID.
    pub fn id(&self) -> TxId {
        self.id
    }

    /// When the transaction started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Registered objects.
    pub fn envelopes(&self) -> &EnvelopeTable {
        &self.envelopes
    }

    /// State of a registered object.
    pub fn state_of(&self, identity: &Identity) -> Option<ModificationState> {
        self.envelopes.state_of(identity)
    }

    // ==================== Locking ====================

    /// Acquire `lock_type` on `identity`, choosing isolation by
    /// `runtime_class`.
    pub fn lock(
        &self,
        identity: &Identity,
        runtime_class: &str,
        lock_type: LockType,
    ) -> TransactionResult<()> {
        self.kit
            .lock_manager()
            .ensure_lock(identity, self.id, lock_type, runtime_class)?;
        Ok(())
    }

    /// Lock this transaction holds on `identity`.
    pub fn lock_held(&self, identity: &Identity) -> LockType {
        self.kit.lock_manager().get_lock_held(identity, self.id)
    }

    // ==================== Registration ====================

    /// Register a new object to be inserted.
    ///
    /// An object deleted earlier in this transaction is revived instead.
    pub fn make_persistent(
        &mut self,
        identity: Identity,
        runtime_class: &str,
        object: Value,
    ) -> TransactionResult<()> {
        if self
            .envelopes
            .state_of(&identity)
            .is_some_and(|state| state != ModificationState::NewDelete)
        {
            return Err(TransactionError::AlreadyRegistered(identity.to_string()));
        }
        self.lock(&identity, runtime_class, LockType::Write)?;

        if let Some(envelope) = self.envelopes.get_mut(&identity) {
            envelope.set_object(object);
            envelope.transition(ModificationState::mark_new);
            return Ok(());
        }

        let state = ModificationState::Transient.mark_new();
        self.envelopes
            .register(Envelope::new(identity, runtime_class, object, state));
        Ok(())
    }

    /// Register an object loaded from the database.
    pub fn register_clean(
        &mut self,
        identity: Identity,
        runtime_class: &str,
        object: Value,
    ) -> TransactionResult<()> {
        if self.envelopes.contains(&identity) {
            return Err(TransactionError::AlreadyRegistered(identity.to_string()));
        }
        self.lock(&identity, runtime_class, LockType::Read)?;

        let state = ModificationState::Transient.mark_new().mark_old();
        self.envelopes
            .register(Envelope::new(identity, runtime_class, object, state));
        Ok(())
    }

    /// Replace a registered object's payload and mark it dirty.
    pub fn mark_dirty(&mut self, identity: &Identity, object: Value) -> TransactionResult<()> {
        let runtime_class = self.registered_class(identity)?;
        self.lock(identity, &runtime_class, LockType::Write)?;

        let Some(envelope) = self.envelopes.get_mut(identity) else {
            return Err(TransactionError::NotRegistered(identity.to_string()));
        };
        if envelope.state() == ModificationState::Transient {
            return Err(TransactionError::InvalidOperation(format!(
                "{} is no longer persistent",
                identity
            )));
        }
        envelope.set_object(object);
        envelope.transition(ModificationState::mark_dirty);
        Ok(())
    }

    /// Mark a registered object for deletion.
    pub fn delete_persistent(&mut self, identity: &Identity) -> TransactionResult<()> {
        let runtime_class = self.registered_class(identity)?;
        self.lock(identity, &runtime_class, LockType::Write)?;

        if let Some(envelope) = self.envelopes.get_mut(identity) {
            envelope.transition(ModificationState::mark_delete);
        }
        Ok(())
    }

    fn registered_class(&self, identity: &Identity) -> TransactionResult<String> {
        self.envelopes
            .get(identity)
            .map(|e| e.class_name().to_string())
            .ok_or_else(|| TransactionError::NotRegistered(identity.to_string()))
    }

    // ==================== Completion ====================

    /// Flush pending changes and keep every lock.
    pub fn checkpoint<B>(&mut self, broker: &B) -> TransactionResult<()>
    where
        B: PersistenceBroker + ?Sized,
    {
        self.envelopes.checkpoint_all(broker)?;
        tracing::debug!(tx = %self.id, "checkpoint");
        Ok(())
    }

    /// Flush pending changes and end the transaction.
    ///
    /// On failure every envelope is rolled back from the state it had before
    /// the flush, so objects written before the failing one are evicted too.
    /// Locks are released either way.
    pub fn commit<B>(mut self, broker: &B) -> TransactionResult<()>
    where
        B: PersistenceBroker + ?Sized,
    {
        let saved = self.envelopes.states();
        if let Err(e) = self.envelopes.commit_all(broker) {
            tracing::warn!(tx = %self.id, error = %e, "commit failed, rolling back");
            if let Err(rollback) = self.envelopes.rollback_to(broker, &saved) {
                tracing::warn!(tx = %self.id, error = %rollback, "rollback failed");
            }
            self.finish();
            return Err(e.into());
        }
        self.finish();
        tracing::debug!(tx = %self.id, envelopes = self.envelopes.len(), "committed");
        Ok(())
    }

    /// Discard pending changes and end the transaction.
    ///
    /// Evicts changed objects from the cache; their in-memory field values
    /// are not restored.
    pub fn rollback<B>(mut self, broker: &B) -> TransactionResult<()>
    where
        B: PersistenceBroker + ?Sized,
    {
        let result = self.envelopes.rollback_all(broker);
        self.finish();
        tracing::debug!(tx = %self.id, "rolled back");
        result.map_err(TransactionError::from)
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let released = self.kit.lock_manager().release_all(self.id);
        self.kit.mark_completed(self.id);
        tracing::trace!(tx = %self.id, released, "transaction finished");
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                tx = %self.id,
                pending = self.envelopes.dirty_count(),
                "transaction dropped while active, releasing locks"
            );
            self.finish();
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("envelopes", &self.envelopes.len())
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use serde_json::json;

    use crate::batch::{BatchConnection, BatchResult, Connection, ParamValue};
    use crate::config::{OjbConfig, WaitStrategyKind};
    use crate::locking::{IsolationLevel, LockingError};
    use crate::metadata::{ClassDescriptor, DescriptorRepository};
    use crate::state::{PersistenceResult, RecordingBroker};

    fn repo() -> DescriptorRepository {
        DescriptorRepository::new()
            .with(ClassDescriptor::new("Article", "ARTICLE"))
            .unwrap()
            .with(ClassDescriptor::new("Book", "BOOK").extends("Article"))
            .unwrap()
            .with(
                ClassDescriptor::new("Account", "ACCOUNT")
                    .with_isolation(IsolationLevel::Serializable.ordinal()),
            )
            .unwrap()
    }

    fn kit_with(config: OjbConfig) -> Kit {
        Kit::new(config, repo()).unwrap()
    }

    fn kit() -> Kit {
        kit_with(OjbConfig::default())
    }

    fn article(id: &str) -> Identity {
        Identity::single("Article", id)
    }

    #[test]
    fn test_make_persistent_commit() {
        let kit = kit();
        let broker = RecordingBroker::default();
        let mut tx = kit.begin();

        tx.make_persistent(article("1"), "Book", json!({"title": "Dune"}))
            .unwrap();
        assert_eq!(tx.state_of(&article("1")), Some(ModificationState::NewClean));
        assert_eq!(tx.lock_held(&article("1")), LockType::Write);

        tx.commit(&broker).unwrap();
        assert_eq!(broker.calls(), vec!["insert Article{1}"]);
        assert_eq!(kit.lock_manager().lock_count(), 0);
    }

    #[test]
    fn test_register_clean_then_update() {
        let kit = kit();
        let broker = RecordingBroker::default();
        let mut tx = kit.begin();

        tx.register_clean(article("1"), "Article", json!({"price": 1}))
            .unwrap();
        assert_eq!(tx.state_of(&article("1")), Some(ModificationState::OldClean));
        // read uncommitted by default: reads take no lock
        assert_eq!(tx.lock_held(&article("1")), LockType::None);

        tx.mark_dirty(&article("1"), json!({"price": 2})).unwrap();
        assert_eq!(tx.state_of(&article("1")), Some(ModificationState::OldDirty));
        assert_eq!(tx.lock_held(&article("1")), LockType::Write);
        assert_eq!(
            tx.envelopes().get(&article("1")).unwrap().object(),
            &json!({"price": 2})
        );

        tx.commit(&broker).unwrap();
        assert_eq!(broker.calls(), vec!["update Article{1}"]);
    }

    #[test]
    fn test_delete_persistent() {
        let kit = kit();
        let broker = RecordingBroker::default();
        let mut tx = kit.begin();

        tx.register_clean(article("1"), "Article", json!({})).unwrap();
        tx.delete_persistent(&article("1")).unwrap();
        assert_eq!(tx.state_of(&article("1")), Some(ModificationState::OldDelete));

        tx.commit(&broker).unwrap();
        assert_eq!(broker.calls(), vec!["delete Article{1}", "evict Article{1}"]);
    }

    #[test]
    fn test_delete_new_object_never_inserted() {
        let kit = kit();
        let broker = RecordingBroker::default();
        let mut tx = kit.begin();

        tx.make_persistent(article("1"), "Article", json!({})).unwrap();
        tx.delete_persistent(&article("1")).unwrap();
        assert_eq!(tx.state_of(&article("1")), Some(ModificationState::NewDelete));

        tx.commit(&broker).unwrap();
        assert_eq!(broker.calls(), vec!["evict Article{1}"]);
    }

    #[test]
    fn test_revive_deleted_new_object() {
        let kit = kit();
        let mut tx = kit.begin();

        tx.make_persistent(article("1"), "Article", json!({})).unwrap();
        assert!(matches!(
            tx.make_persistent(article("1"), "Article", json!({})),
            Err(TransactionError::AlreadyRegistered(_))
        ));

        tx.delete_persistent(&article("1")).unwrap();
        tx.make_persistent(article("1"), "Article", json!({"v": 2}))
            .unwrap();
        assert_eq!(tx.state_of(&article("1")), Some(ModificationState::NewDirty));
    }

    #[test]
    fn test_unregistered_object() {
        let kit = kit();
        let mut tx = kit.begin();
        assert!(matches!(
            tx.mark_dirty(&article("9"), json!({})),
            Err(TransactionError::NotRegistered(_))
        ));
        assert!(matches!(
            tx.delete_persistent(&article("9")),
            Err(TransactionError::NotRegistered(_))
        ));
    }

    #[test]
    fn test_make_persistent_registered_object_takes_no_lock() {
        let kit = kit();
        let mut tx = kit.begin();

        // read-uncommitted reads hold nothing, so only a write would lock
        tx.register_clean(article("1"), "Article", json!({})).unwrap();
        assert_eq!(tx.lock_held(&article("1")), LockType::None);

        assert!(matches!(
            tx.make_persistent(article("1"), "Article", json!({})),
            Err(TransactionError::AlreadyRegistered(_))
        ));
        assert_eq!(tx.lock_held(&article("1")), LockType::None);
        assert_eq!(kit.lock_manager().lock_count(), 0);
    }

    #[test]
    fn test_checkpoint_keeps_locks() {
        let kit = kit();
        let broker = RecordingBroker::default();
        let mut tx = kit.begin();

        tx.make_persistent(article("1"), "Article", json!({})).unwrap();
        tx.checkpoint(&broker).unwrap();

        assert_eq!(tx.state_of(&article("1")), Some(ModificationState::OldClean));
        assert_eq!(tx.lock_held(&article("1")), LockType::Write);
        assert!(kit.is_active(tx.id()));

        // already flushed: commit runs no further DML
        tx.commit(&broker).unwrap();
        assert_eq!(broker.calls(), vec!["insert Article{1}"]);
    }

    #[test]
    fn test_commit_failure_rolls_back() {
        let kit = kit();
        let broker = RecordingBroker::default();
        *broker.fail_on.lock() = Some(article("2"));

        let mut tx = kit.begin();
        tx.make_persistent(article("1"), "Article", json!({})).unwrap();
        tx.make_persistent(article("2"), "Article", json!({})).unwrap();
        let id = tx.id();

        let err = tx.commit(&broker).unwrap_err();
        assert!(matches!(err, TransactionError::Persistence(_)));
        assert!(!err.is_retryable());

        // the insert of Article{1} is undone with the database transaction
        assert_eq!(
            broker.calls(),
            vec!["insert Article{1}", "evict Article{1}", "evict Article{2}"]
        );
        assert!(!kit.is_active(id));
        assert_eq!(kit.lock_manager().lock_count(), 0);
    }

    #[test]
    fn test_rollback_evicts_changed_objects() {
        let kit = kit();
        let broker = RecordingBroker::default();
        let mut tx = kit.begin();

        tx.register_clean(article("1"), "Article", json!({})).unwrap();
        tx.register_clean(article("2"), "Article", json!({})).unwrap();
        tx.mark_dirty(&article("2"), json!({"x": 1})).unwrap();

        tx.rollback(&broker).unwrap();
        assert_eq!(broker.calls(), vec!["evict Article{2}"]);
        assert_eq!(kit.active_count(), 0);
    }

    #[test]
    fn test_drop_releases_locks() {
        let kit = kit();
        {
            let mut tx = kit.begin();
            tx.make_persistent(article("1"), "Article", json!({})).unwrap();
            assert_eq!(kit.lock_manager().lock_count(), 1);
        }
        assert_eq!(kit.lock_manager().lock_count(), 0);
        assert_eq!(kit.active_count(), 0);
    }

    #[test]
    fn test_write_conflict_no_wait() {
        let kit = kit_with(OjbConfig::default().wait_strategy(WaitStrategyKind::NoWait));
        let mut tx1 = kit.begin();
        let mut tx2 = kit.begin();

        tx1.make_persistent(article("1"), "Article", json!({})).unwrap();
        let err = tx2
            .make_persistent(article("1"), "Article", json!({}))
            .unwrap_err();
        assert!(matches!(
            err,
            TransactionError::Locking(LockingError::Conflict { .. })
        ));
        assert!(err.is_retryable());
        assert!(tx2.envelopes().is_empty());
    }

    #[test]
    fn test_writer_waits_for_commit() {
        let kit = kit_with(OjbConfig::default().lock_timeout(Duration::from_secs(5)));
        let broker = Arc::new(RecordingBroker::default());

        let mut tx1 = kit.begin();
        tx1.make_persistent(article("1"), "Article", json!({})).unwrap();

        let handle = {
            let kit = kit.clone();
            let broker = Arc::clone(&broker);
            thread::spawn(move || {
                let mut tx2 = kit.begin();
                tx2.register_clean(article("1"), "Article", json!({})).unwrap();
                tx2.mark_dirty(&article("1"), json!({"v": 2})).unwrap();
                tx2.commit(broker.as_ref()).unwrap();
            })
        };

        thread::sleep(Duration::from_millis(50));
        tx1.commit(broker.as_ref()).unwrap();
        handle.join().unwrap();

        assert_eq!(broker.calls(), vec!["insert Article{1}", "update Article{1}"]);
        assert_eq!(kit.lock_manager().lock_count(), 0);
    }

    /// Driver that records each batch it is handed.
    #[derive(Default)]
    struct LogConnection {
        log: Vec<String>,
    }

    impl Connection for LogConnection {
        fn connection_id(&self) -> String {
            "otm-shop".into()
        }

        fn execute(&mut self, sql: &str, _params: &[ParamValue]) -> BatchResult<u64> {
            self.log.push(sql.to_string());
            Ok(1)
        }

        fn execute_batch(&mut self, sql: &str, rows: &[Vec<ParamValue>]) -> BatchResult<Vec<u64>> {
            self.log.push(format!("{} x{}", sql, rows.len()));
            Ok(vec![1; rows.len()])
        }

        fn commit(&mut self) -> BatchResult<()> {
            self.log.push("commit".into());
            Ok(())
        }

        fn rollback(&mut self) -> BatchResult<()> {
            self.log.push("rollback".into());
            Ok(())
        }
    }

    /// Broker writing through a batching connection.
    struct SqlBroker {
        conn: BatchConnection<LogConnection>,
        repository: DescriptorRepository,
    }

    impl SqlBroker {
        fn new(repository: &DescriptorRepository) -> Self {
            Self {
                conn: BatchConnection::new(LogConnection::default(), repository).unwrap(),
                repository: repository.clone(),
            }
        }

        fn run(&self, sql: String, identity: &Identity) -> PersistenceResult<()> {
            let mut stmt = self.conn.prepare_statement(&sql)?;
            stmt.set_string(1, &identity.key()[0])?;
            stmt.execute_update()?;
            Ok(())
        }

        fn log(&self) -> Vec<String> {
            self.conn.with_connection(|c| c.log.clone())
        }
    }

    impl PersistenceBroker for SqlBroker {
        fn insert(&self, class_name: &str, identity: &Identity, _object: &Value) -> PersistenceResult<()> {
            let table = &self.repository.get_descriptor_for(class_name)?.table;
            self.run(format!("INSERT INTO {table} (ID) VALUES (?)"), identity)
        }

        fn update(&self, class_name: &str, identity: &Identity, _object: &Value) -> PersistenceResult<()> {
            let table = &self.repository.get_descriptor_for(class_name)?.table;
            self.run(format!("UPDATE {table} SET VERSION = VERSION + 1 WHERE ID = ?"), identity)
        }

        fn delete(&self, class_name: &str, identity: &Identity) -> PersistenceResult<()> {
            let table = &self.repository.get_descriptor_for(class_name)?.table;
            self.run(format!("DELETE FROM {table} WHERE ID = ?"), identity)
        }

        fn evict(&self, _identity: &Identity) {}
    }

    fn shop() -> Kit {
        let repo = DescriptorRepository::new()
            .with(ClassDescriptor::new("Customer", "CUSTOMER"))
            .unwrap()
            .with(ClassDescriptor::new("Order", "ORDERS").with_reference("customer", "Customer"))
            .unwrap();
        Kit::new(OjbConfig::default(), repo).unwrap()
    }

    #[test]
    fn test_commit_through_batch_connection() {
        let kit = shop();
        let broker = SqlBroker::new(kit.repository());

        let mut tx = kit.begin();
        tx.make_persistent(Identity::single("Customer", "c1"), "Customer", json!({}))
            .unwrap();
        tx.make_persistent(Identity::single("Order", "o1"), "Order", json!({}))
            .unwrap();
        tx.make_persistent(Identity::single("Order", "o2"), "Order", json!({}))
            .unwrap();
        tx.commit(&broker).unwrap();
        assert!(broker.log().is_empty());

        broker.conn.commit().unwrap();
        assert_eq!(
            broker.log(),
            vec![
                "INSERT INTO CUSTOMER (ID) VALUES (?) x1".to_string(),
                "INSERT INTO ORDERS (ID) VALUES (?) x2".to_string(),
                "commit".to_string(),
            ]
        );
    }

    #[test]
    fn test_delete_order_through_batch_connection() {
        let kit = shop();
        let broker = SqlBroker::new(kit.repository());
        let customer = Identity::single("Customer", "c1");
        let order = Identity::single("Order", "o1");

        let mut tx = kit.begin();
        tx.register_clean(order.clone(), "Order", json!({})).unwrap();
        tx.register_clean(customer.clone(), "Customer", json!({})).unwrap();
        tx.delete_persistent(&order).unwrap();
        tx.delete_persistent(&customer).unwrap();
        tx.commit(&broker).unwrap();

        // ORDERS references CUSTOMER, so the customer delete waits for a flush
        assert_eq!(broker.log(), vec!["DELETE FROM ORDERS WHERE ID = ? x1".to_string()]);
        broker.conn.commit().unwrap();
        assert_eq!(broker.log()[1], "DELETE FROM CUSTOMER WHERE ID = ? x1");
    }

    #[test]
    fn test_serializable_read_blocks_writer() {
        let kit = kit_with(OjbConfig::default().wait_strategy(WaitStrategyKind::NoWait));
        let account = Identity::single("Account", "7");
        let mut reader = kit.begin();
        let mut writer = kit.begin();

        reader.register_clean(account.clone(), "Account", json!({})).unwrap();
        assert_eq!(reader.lock_held(&account), LockType::Read);

        writer.register_clean(account.clone(), "Account", json!({})).unwrap();
        assert!(writer.mark_dirty(&account, json!({"balance": 0})).is_err());

        let broker = RecordingBroker::default();
        reader.commit(&broker).unwrap();
        writer.mark_dirty(&account, json!({"balance": 0})).unwrap();
        assert_eq!(writer.lock_held(&account), LockType::Write);
    }
}
