//! The modification state machine.
//!
//! Every registered object carries exactly one [`ModificationState`]. The
//! `mark_*` transitions are total: every state answers every mark with a
//! defined successor. The actions (`checkpoint`, `commit`, `rollback`)
//! decide which DML fires against the envelope.

use std::fmt;

use super::envelope::ObjectEnvelope;
use super::error::PersistenceResult;

/// Pending write intent of a persistent object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ModificationState {
    /// Not managed, or deleted and flushed.
    #[default]
    Transient,
    /// New object, unchanged since registration.
    NewClean,
    /// New object with changes.
    NewDirty,
    /// New object deleted before it was ever inserted.
    NewDelete,
    /// Persistent object, unchanged.
    OldClean,
    /// Persistent object with changes.
    OldDirty,
    /// Persistent object marked for deletion.
    OldDelete,
}

use ModificationState::*;

impl ModificationState {
    /// All states, in declaration order.
    pub const ALL: [ModificationState; 7] = [
        Transient, NewClean, NewDirty, NewDelete, OldClean, OldDirty, OldDelete,
    ];

    // ==================== Transitions ====================

    /// Successor after the object's changes were discarded or flushed.
    pub const fn mark_clean(self) -> Self {
        match self {
            NewDirty | NewDelete => NewClean,
            OldDirty | OldDelete => OldClean,
            Transient | NewClean | OldClean => self,
        }
    }

    /// Successor after the object was deleted.
    pub const fn mark_delete(self) -> Self {
        match self {
            NewClean | NewDirty => NewDelete,
            OldClean | OldDirty => OldDelete,
            Transient | NewDelete | OldDelete => self,
        }
    }

    /// Successor after a field of the object changed.
    pub const fn mark_dirty(self) -> Self {
        match self {
            NewClean => NewDirty,
            OldClean | OldDelete => OldDirty,
            // a deleted new object stays deleted
            Transient | NewDirty | NewDelete | OldDirty => self,
        }
    }

    /// Successor after the object was made persistent.
    pub const fn mark_new(self) -> Self {
        match self {
            Transient => NewClean,
            NewDelete => NewDirty,
            NewClean | NewDirty | OldClean | OldDirty | OldDelete => self,
        }
    }

    /// Successor after the object was found to exist in the database.
    pub const fn mark_old(self) -> Self {
        match self {
            NewClean => OldClean,
            NewDirty => OldDirty,
            NewDelete => OldDelete,
            Transient | OldClean | OldDirty | OldDelete => self,
        }
    }

    // ==================== Predicates ====================

    /// An INSERT is pending.
    pub const fn needs_insert(self) -> bool {
        matches!(self, NewClean | NewDirty)
    }

    /// An UPDATE is pending.
    pub const fn needs_update(self) -> bool {
        matches!(self, OldDirty)
    }

    /// A DELETE is pending.
    pub const fn needs_delete(self) -> bool {
        matches!(self, NewDelete | OldDelete)
    }

    /// Whether the object is registered as new in this transaction.
    pub const fn is_new(self) -> bool {
        matches!(self, NewClean | NewDirty | NewDelete)
    }

    /// Whether the object is marked for deletion.
    pub const fn is_deleted(self) -> bool {
        self.needs_delete()
    }

    /// Whether there is any pending write intent.
    pub const fn is_dirty(self) -> bool {
        self.needs_insert() || self.needs_update() || self.needs_delete()
    }

    // ==================== Actions ====================

    /// Flush pending DML in the middle of a transaction.
    ///
    /// Locks are untouched and the object stays managed. An `OldDirty`
    /// object stays dirty so it is written again on the next flush.
    pub fn checkpoint<E>(self, envelope: &mut E) -> PersistenceResult<()>
    where
        E: ObjectEnvelope + ?Sized,
    {
        match self {
            NewClean | NewDirty => {
                envelope.do_insert()?;
                envelope.set_modification_state(OldClean);
            }
            OldDirty => envelope.do_update()?,
            OldDelete => {
                envelope.do_delete()?;
                envelope.set_modification_state(Transient);
            }
            NewDelete | OldClean | Transient => {}
        }
        Ok(())
    }

    /// Final flush at transaction end.
    pub fn commit<E>(self, envelope: &mut E) -> PersistenceResult<()>
    where
        E: ObjectEnvelope + ?Sized,
    {
        match self {
            NewClean | NewDirty => {
                envelope.do_insert()?;
                envelope.set_modification_state(OldClean);
            }
            OldDirty => {
                envelope.do_update()?;
                envelope.set_modification_state(OldClean);
            }
            OldDelete => {
                envelope.do_delete()?;
                envelope.do_evict_from_cache();
                envelope.set_modification_state(Transient);
            }
            NewDelete => {
                envelope.do_evict_from_cache();
                envelope.set_modification_state(Transient);
            }
            OldClean | Transient => {}
        }
        Ok(())
    }

    /// Abandon pending work.
    ///
    /// Objects with pending DML are evicted so a stale cached copy is not
    /// handed out again. Field values of an `OldDirty` object are not
    /// restored; only the cached instance is dropped.
    pub fn rollback<E>(self, envelope: &mut E) -> PersistenceResult<()>
    where
        E: ObjectEnvelope + ?Sized,
    {
        match self {
            NewClean | NewDirty | NewDelete | OldDirty | OldDelete => {
                envelope.do_evict_from_cache();
            }
            OldClean | Transient => {}
        }
        Ok(())
    }

    /// Upper-case name used in logs.
    pub const fn name(self) -> &'static str {
        match self {
            Transient => "TRANSIENT",
            NewClean => "NEW_CLEAN",
            NewDirty => "NEW_DIRTY",
            NewDelete => "NEW_DELETE",
            OldClean => "OLD_CLEAN",
            OldDirty => "OLD_DIRTY",
            OldDelete => "OLD_DELETE",
        }
    }
}

impl fmt::Display for ModificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
