//! Class, reference and collection descriptors.

use serde::{Deserialize, Serialize};

use super::error::{MetadataError, MetadataResult};

/// Mapping metadata for one persistent class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDescriptor {
    /// Fully qualified class name.
    pub class_name: String,
    /// Table the class is stored in.
    pub table: String,
    /// Mapped super class, if this class extends another mapped class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_class: Option<String>,
    /// Isolation level ordinal (0 = read uncommitted .. 3 = serializable).
    ///
    /// Kept raw so that a bad value is reported at the first lock request
    /// for the class rather than when the repository is loaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolation_level: Option<u8>,
    /// 1:1 references held by this class (this table carries the FK).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<ReferenceDescriptor>,
    /// Collections owned by this class.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collections: Vec<CollectionDescriptor>,
}

/// A reference from the owning class to another mapped class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceDescriptor {
    /// Field name on the owning class.
    pub name: String,
    /// Class of the referenced object.
    pub target_class: String,
}

/// A collection of mapped objects owned by a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDescriptor {
    /// Field name on the owning class.
    pub name: String,
    /// Class of the collection elements.
    pub element_class: String,
    /// Join table for m:n collections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indirection_table: Option<String>,
}

impl ClassDescriptor {
    /// Create a descriptor for `class_name` stored in `table`.
    pub fn new(class_name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            table: table.into(),
            base_class: None,
            isolation_level: None,
            references: Vec::new(),
            collections: Vec::new(),
        }
    }

    /// Set the mapped super class.
    pub fn extends(mut self, base: impl Into<String>) -> Self {
        self.base_class = Some(base.into());
        self
    }

    /// Set the isolation level ordinal.
    pub fn with_isolation(mut self, ordinal: u8) -> Self {
        self.isolation_level = Some(ordinal);
        self
    }

    /// Add a 1:1 reference.
    pub fn with_reference(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.references.push(ReferenceDescriptor {
            name: name.into(),
            target_class: target.into(),
        });
        self
    }

    /// Add a 1:n collection whose elements carry the FK.
    pub fn with_collection(mut self, name: impl Into<String>, element: impl Into<String>) -> Self {
        self.collections.push(CollectionDescriptor {
            name: name.into(),
            element_class: element.into(),
            indirection_table: None,
        });
        self
    }

    /// Add an m:n collection stored through a join table.
    pub fn with_indirect_collection(
        mut self,
        name: impl Into<String>,
        element: impl Into<String>,
        indirection_table: impl Into<String>,
    ) -> Self {
        self.collections.push(CollectionDescriptor {
            name: name.into(),
            element_class: element.into(),
            indirection_table: Some(indirection_table.into()),
        });
        self
    }

    /// Validate the descriptor itself.
    pub fn validate(&self) -> MetadataResult<()> {
        if self.class_name.trim().is_empty() {
            return Err(MetadataError::invalid("<unnamed>", "class name is empty"));
        }
        if self.table.trim().is_empty() {
            return Err(MetadataError::invalid(&self.class_name, "table name is empty"));
        }
        if self.base_class.as_deref() == Some(self.class_name.as_str()) {
            return Err(MetadataError::invalid(&self.class_name, "class extends itself"));
        }

        let mut seen = std::collections::HashSet::new();
        let names = self
            .references
            .iter()
            .map(|r| &r.name)
            .chain(self.collections.iter().map(|c| &c.name));
        for name in names {
            if !seen.insert(name) {
                return Err(MetadataError::invalid(
                    &self.class_name,
                    format!("duplicate field descriptor {name}"),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let cld = ClassDescriptor::new("Order", "ORDERS")
            .with_isolation(2)
            .with_reference("customer", "Customer")
            .with_collection("items", "OrderItem");

        assert_eq!(cld.isolation_level, Some(2));
        assert_eq!(cld.references.len(), 1);
        assert_eq!(cld.collections.len(), 1);
        assert!(cld.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let cld = ClassDescriptor::new("Order", "ORDERS")
            .with_reference("customer", "Customer")
            .with_collection("customer", "Customer");
        assert!(matches!(
            cld.validate(),
            Err(MetadataError::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_self_extension() {
        let cld = ClassDescriptor::new("Order", "ORDERS").extends("Order");
        assert!(cld.validate().is_err());
    }

    #[test]
    fn test_serde_defaults() {
        let cld: ClassDescriptor =
            serde_json::from_str(r#"{"class_name": "Customer", "table": "CUSTOMERS"}"#).unwrap();
        assert_eq!(cld.isolation_level, None);
        assert!(cld.references.is_empty());
        assert!(cld.base_class.is_none());
    }
}
