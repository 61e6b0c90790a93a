//! Envelopes pair a persistent object with its modification state.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::error::PersistenceResult;
use super::modification::ModificationState;
use crate::types::Identity;

/// Hooks a [`ModificationState`] drives when it is flushed.
pub trait ObjectEnvelope {
    /// Identity of the wrapped object.
    fn identity(&self) -> &Identity;

    /// Current state.
    fn modification_state(&self) -> ModificationState;

    /// Replace the current state.
    fn set_modification_state(&mut self, state: ModificationState);

    /// Write the object as a new row.
    fn do_insert(&mut self) -> PersistenceResult<()>;

    /// Write the object's changed fields.
    fn do_update(&mut self) -> PersistenceResult<()>;

    /// Remove the object's row.
    fn do_delete(&mut self) -> PersistenceResult<()>;

    /// Drop the object from the second-level cache.
    fn do_evict_from_cache(&mut self);
}

/// The persistence broker the envelopes write through.
///
/// Implementations issue the actual statements (possibly through a
/// [`crate::batch::BatchConnection`]) and own the object cache.
pub trait PersistenceBroker {
    /// Insert a new object.
    fn insert(&self, class_name: &str, identity: &Identity, object: &Value) -> PersistenceResult<()>;

    /// Update an existing object.
    fn update(&self, class_name: &str, identity: &Identity, object: &Value) -> PersistenceResult<()>;

    /// Delete an object.
    fn delete(&self, class_name: &str, identity: &Identity) -> PersistenceResult<()>;

    /// Evict an object from the cache.
    fn evict(&self, identity: &Identity);
}

/// A registered object within a transaction.
#[derive(Debug, Clone)]
pub struct Envelope {
    identity: Identity,
    class_name: String,
    object: Value,
    state: ModificationState,
    registered_at: DateTime<Utc>,
}

impl Envelope {
    /// Wrap an object in the given state.
    ///
    /// `class_name` is the runtime class of the object, which may be a
    /// subclass of `identity.class()`.
    pub fn new(
        identity: Identity,
        class_name: impl Into<String>,
        object: Value,
        state: ModificationState,
    ) -> Self {
        Self {
            identity,
            class_name: class_name.into(),
            object,
            state,
            registered_at: Utc::now(),
        }
    }

    /// Identity of the object.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Runtime class of the object.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// The object payload.
    pub fn object(&self) -> &Value {
        &self.object
    }

    /// Replace the object payload.
    pub fn set_object(&mut self, object: Value) {
        self.object = object;
    }

    /// Current state.
    pub fn state(&self) -> ModificationState {
        self.state
    }

    /// Apply a transition.
    pub fn transition(&mut self, mark: impl FnOnce(ModificationState) -> ModificationState) {
        self.state = mark(self.state);
    }

    /// When the object was registered.
    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    /// Bind the envelope to a broker so a state action can run against it.
    pub fn bind<'a, B>(&'a mut self, broker: &'a B) -> BoundEnvelope<'a, B>
    where
        B: PersistenceBroker + ?Sized,
    {
        BoundEnvelope {
            envelope: self,
            broker,
        }
    }
}

/// An [`Envelope`] bound to the broker it is flushed through.
pub struct BoundEnvelope<'a, B: PersistenceBroker + ?Sized> {
    envelope: &'a mut Envelope,
    broker: &'a B,
}

impl<B: PersistenceBroker + ?Sized> BoundEnvelope<'_, B> {
    /// Run the current state's checkpoint action.
    pub fn checkpoint(&mut self) -> PersistenceResult<()> {
        self.envelope.state.checkpoint(self)
    }

    /// Run the current state's commit action.
    pub fn commit(&mut self) -> PersistenceResult<()> {
        self.envelope.state.commit(self)
    }

    /// Run the current state's rollback action.
    pub fn rollback(&mut self) -> PersistenceResult<()> {
        self.envelope.state.rollback(self)
    }
}

impl<B: PersistenceBroker + ?Sized> ObjectEnvelope for BoundEnvelope<'_, B> {
    fn identity(&self) -> &Identity {
        &self.envelope.identity
    }

    fn modification_state(&self) -> ModificationState {
        self.envelope.state
    }

    fn set_modification_state(&mut self, state: ModificationState) {
        tracing::trace!(
            identity = %self.envelope.identity,
            from = %self.envelope.state,
            to = %state,
            "state change"
        );
        self.envelope.state = state;
    }

    fn do_insert(&mut self) -> PersistenceResult<()> {
        let env = &*self.envelope;
        self.broker.insert(&env.class_name, &env.identity, &env.object)
    }

    fn do_update(&mut self) -> PersistenceResult<()> {
        let env = &*self.envelope;
        self.broker.update(&env.class_name, &env.identity, &env.object)
    }

    fn do_delete(&mut self) -> PersistenceResult<()> {
        let env = &*self.envelope;
        self.broker.delete(&env.class_name, &env.identity)
    }

    fn do_evict_from_cache(&mut self) {
        self.broker.evict(&self.envelope.identity);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    use crate::state::PersistenceError;

    /// Broker that records every call as `"<op> <identity>"`.
    #[derive(Default)]
    pub(crate) struct RecordingBroker {
        pub calls: Mutex<Vec<String>>,
        pub fail_on: Mutex<Option<Identity>>,
    }

    impl RecordingBroker {
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn record(&self, op: &'static str, identity: &Identity) -> PersistenceResult<()> {
            if self.fail_on.lock().as_ref() == Some(identity) {
                return Err(PersistenceError::dml(op, identity.to_string(), "rejected"));
            }
            self.calls.lock().push(format!("{op} {identity}"));
            Ok(())
        }
    }

    impl PersistenceBroker for RecordingBroker {
        fn insert(&self, _class: &str, identity: &Identity, _object: &Value) -> PersistenceResult<()> {
            self.record("insert", identity)
        }
        fn update(&self, _class: &str, identity: &Identity, _object: &Value) -> PersistenceResult<()> {
            self.record("update", identity)
        }
        fn delete(&self, _class: &str, identity: &Identity) -> PersistenceResult<()> {
            self.record("delete", identity)
        }
        fn evict(&self, identity: &Identity) {
            self.calls.lock().push(format!("evict {identity}"));
        }
    }

    #[test]
    fn test_bound_envelope_commit() {
        let broker = RecordingBroker::default();
        let mut env = Envelope::new(
            Identity::single("Article", "1"),
            "Book",
            json!({"title": "Dune"}),
            ModificationState::Transient.mark_new(),
        );

        env.bind(&broker).commit().unwrap();

        assert_eq!(broker.calls(), vec!["insert Article{1}"]);
        assert_eq!(env.state(), ModificationState::OldClean);
        assert_eq!(env.class_name(), "Book");
    }

    #[test]
    fn test_bound_envelope_delete_then_evict() {
        let broker = RecordingBroker::default();
        let mut env = Envelope::new(
            Identity::single("Article", "2"),
            "Article",
            json!({}),
            ModificationState::OldClean,
        );
        env.transition(ModificationState::mark_delete);

        env.bind(&broker).commit().unwrap();

        assert_eq!(broker.calls(), vec!["delete Article{2}", "evict Article{2}"]);
        assert_eq!(env.state(), ModificationState::Transient);
    }
}
