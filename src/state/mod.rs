//! Object modification tracking.
//!
//! A transaction registers each object it touches in an [`EnvelopeTable`].
//! The envelope pairs the object with its [`ModificationState`]; the state
//! decides at checkpoint, commit and rollback time which DML the
//! [`PersistenceBroker`] has to run.
//!
//! ```text
//!   EnvelopeTable ──► Envelope ──► ModificationState
//!                        │              │ checkpoint / commit / rollback
//!                        ▼              ▼
//!                 PersistenceBroker ◄── BoundEnvelope (ObjectEnvelope)
//! ```

mod envelope;
mod error;
mod modification;
mod table;

pub use envelope::{BoundEnvelope, Envelope, ObjectEnvelope, PersistenceBroker};
pub use error::{PersistenceError, PersistenceResult};
pub use modification::ModificationState;
pub use table::EnvelopeTable;

#[cfg(test)]
pub(crate) use envelope::tests::RecordingBroker;
