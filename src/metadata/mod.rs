//! Class metadata consumed by the locking and batching layers.
//!
//! Descriptors carry just what the core needs: the table a class maps to,
//! its base class, its isolation level ordinal, and the references and
//! collections from which foreign-key dependencies are derived.

mod descriptor;
mod error;
mod repository;

pub use descriptor::{ClassDescriptor, CollectionDescriptor, ReferenceDescriptor};
pub use error::{MetadataError, MetadataResult};
pub use repository::DescriptorRepository;
