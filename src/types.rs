//! Core identifier types shared by the state, locking and OTM layers.

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Transaction identifier.
///
/// Transactions are named with ULIDs so ids sort by creation time and can be
/// generated without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(Ulid);

impl TxId {
    /// Generate a fresh transaction id.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Wrap an existing ULID.
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// The underlying ULID.
    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for TxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx/{}", self.0.to_string().to_lowercase())
    }
}

/// Stable key of a persistent object across cache and lock lookups.
///
/// `class` is the top-level mapped class of the object; the primary key
/// values are kept in column order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    class: String,
    key: Vec<String>,
}

impl Identity {
    /// Create an identity from a class name and its primary key values.
    pub fn new<I, S>(class: impl Into<String>, key: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            class: class.into(),
            key: key.into_iter().map(Into::into).collect(),
        }
    }

    /// Identity with a single-column primary key.
    pub fn single(class: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new(class, [key.into()])
    }

    /// The top-level class this identity belongs to.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Primary key values.
    pub fn key(&self) -> &[String] {
        &self.key
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{{}}}", self.class, self.key.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_ids_are_unique() {
        let a = TxId::new();
        let b = TxId::new();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("tx/"));
    }

    #[test]
    fn test_identity_display() {
        let id = Identity::new("Order", ["42", "7"]);
        assert_eq!(id.to_string(), "Order{42,7}");
        assert_eq!(id.class(), "Order");
        assert_eq!(id.key().len(), 2);
    }

    #[test]
    fn test_identity_equality() {
        assert_eq!(Identity::single("Order", "1"), Identity::new("Order", ["1"]));
        assert_ne!(Identity::single("Order", "1"), Identity::single("Item", "1"));
    }
}
