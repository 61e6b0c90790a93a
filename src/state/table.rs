//! Per-transaction registry of envelopes.

use std::collections::HashMap;

use super::envelope::{Envelope, PersistenceBroker};
use super::error::PersistenceResult;
use super::modification::ModificationState;
use crate::types::Identity;

/// Envelopes of one transaction, kept in registration order.
///
/// Flushing walks the envelopes in the order they were registered; the
/// statement layer is responsible for reordering writes against foreign
/// keys.
#[derive(Debug, Default)]
pub struct EnvelopeTable {
    envelopes: Vec<Envelope>,
    index: HashMap<Identity, usize>,
}

impl EnvelopeTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an envelope. Returns `false` if the identity is already
    /// registered, in which case the table is unchanged.
    pub fn register(&mut self, envelope: Envelope) -> bool {
        if self.index.contains_key(envelope.identity()) {
            return false;
        }
        self.index
            .insert(envelope.identity().clone(), self.envelopes.len());
        self.envelopes.push(envelope);
        true
    }

    /// Look up an envelope.
    pub fn get(&self, identity: &Identity) -> Option<&Envelope> {
        self.index.get(identity).map(|i| &self.envelopes[*i])
    }

    /// Look up an envelope mutably.
    pub fn get_mut(&mut self, identity: &Identity) -> Option<&mut Envelope> {
        match self.index.get(identity) {
            Some(i) => self.envelopes.get_mut(*i),
            None => None,
        }
    }

    /// Whether an identity is registered.
    pub fn contains(&self, identity: &Identity) -> bool {
        self.index.contains_key(identity)
    }

    /// Number of registered envelopes.
    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    /// Envelopes in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Envelope> {
        self.envelopes.iter()
    }

    /// Identities of all registered objects.
    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.envelopes.iter().map(Envelope::identity)
    }

    /// Number of envelopes with pending DML.
    pub fn dirty_count(&self) -> usize {
        self.envelopes
            .iter()
            .filter(|e| e.state().is_dirty())
            .count()
    }

    /// State of a registered object.
    pub fn state_of(&self, identity: &Identity) -> Option<ModificationState> {
        self.get(identity).map(Envelope::state)
    }

    /// Current state of every envelope, in registration order.
    pub fn states(&self) -> Vec<ModificationState> {
        self.envelopes.iter().map(Envelope::state).collect()
    }

    /// Flush pending DML while keeping every object registered.
    pub fn checkpoint_all<B>(&mut self, broker: &B) -> PersistenceResult<()>
    where
        B: PersistenceBroker + ?Sized,
    {
        for envelope in &mut self.envelopes {
            let result = envelope.bind(broker).checkpoint();
            if let Err(e) = &result {
                tracing::warn!(identity = %envelope.identity(), error = %e, "checkpoint failed");
            }
            result?;
        }
        tracing::debug!(envelopes = self.envelopes.len(), "checkpoint complete");
        Ok(())
    }

    /// Final flush. Stops at the first failing envelope.
    pub fn commit_all<B>(&mut self, broker: &B) -> PersistenceResult<()>
    where
        B: PersistenceBroker + ?Sized,
    {
        for envelope in &mut self.envelopes {
            let result = envelope.bind(broker).commit();
            if let Err(e) = &result {
                tracing::warn!(identity = %envelope.identity(), error = %e, "commit failed");
            }
            result?;
        }
        tracing::debug!(envelopes = self.envelopes.len(), "commit complete");
        Ok(())
    }

    /// Run every envelope's rollback action.
    pub fn rollback_all<B>(&mut self, broker: &B) -> PersistenceResult<()>
    where
        B: PersistenceBroker + ?Sized,
    {
        for envelope in &mut self.envelopes {
            envelope.bind(broker).rollback()?;
        }
        tracing::debug!(envelopes = self.envelopes.len(), "rollback complete");
        Ok(())
    }

    /// Run the rollback action of each envelope's `saved` state instead of
    /// its current one.
    ///
    /// Used after a failed `commit_all`: envelopes flushed before the
    /// failure already moved to a clean state, but their DML is undone with
    /// the database transaction and must still be evicted. Envelopes past
    /// the end of `saved` use their current state.
    pub fn rollback_to<B>(&mut self, broker: &B, saved: &[ModificationState]) -> PersistenceResult<()>
    where
        B: PersistenceBroker + ?Sized,
    {
        for (i, envelope) in self.envelopes.iter_mut().enumerate() {
            let state = saved.get(i).copied().unwrap_or_else(|| envelope.state());
            state.rollback(&mut envelope.bind(broker))?;
        }
        tracing::debug!(envelopes = self.envelopes.len(), "rollback to saved states complete");
        Ok(())
    }
}
