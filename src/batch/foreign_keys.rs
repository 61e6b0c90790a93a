//! Foreign-key dependencies between tables, derived from class metadata.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use super::statement::normalize_table;
use crate::metadata::{DescriptorRepository, MetadataResult};

/// Built maps, keyed by connection identity.
static CACHE: Lazy<RwLock<HashMap<String, Arc<ForeignKeyMap>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Which tables reference which, in both directions.
///
/// Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForeignKeyMap {
    /// table → tables it holds a foreign key to
    references: HashMap<String, HashSet<String>>,
    /// table → tables holding a foreign key to it
    referenced_by: HashMap<String, HashSet<String>>,
}

impl ForeignKeyMap {
    /// Derive the map from class metadata.
    ///
    /// - a reference makes the owner's table point at the target's table
    /// - a 1:n collection makes the element table point at the owner's table
    /// - an m:n join table points at both sides
    pub fn build(repository: &DescriptorRepository) -> MetadataResult<Self> {
        let mut map = Self::default();
        for cld in repository.descriptors() {
            for reference in &cld.references {
                let target = repository.get_descriptor_for(&reference.target_class)?;
                map.add(&cld.table, &target.table);
            }
            for collection in &cld.collections {
                let element = repository.get_descriptor_for(&collection.element_class)?;
                match &collection.indirection_table {
                    Some(join) => {
                        map.add(join, &cld.table);
                        map.add(join, &element.table);
                    }
                    None => map.add(&element.table, &cld.table),
                }
            }
        }
        tracing::debug!(tables = map.references.len(), "built foreign key map");
        Ok(map)
    }

    /// Map for `key`, built from `repository` on first use and shared by
    /// every later caller with the same key.
    pub fn cached(key: &str, repository: &DescriptorRepository) -> MetadataResult<Arc<Self>> {
        if let Some(map) = CACHE.read().get(key) {
            return Ok(Arc::clone(map));
        }
        let built = Arc::new(Self::build(repository)?);
        let mut cache = CACHE.write();
        Ok(Arc::clone(cache.entry(key.to_string()).or_insert(built)))
    }

    /// Record that `child` holds a foreign key to `parent`.
    pub fn add(&mut self, child: &str, parent: &str) {
        let (child, parent) = (normalize_table(child), normalize_table(parent));
        self.references
            .entry(child.clone())
            .or_default()
            .insert(parent.clone());
        self.referenced_by.entry(parent).or_default().insert(child);
    }

    /// Builder-style [`ForeignKeyMap::add`].
    pub fn with(mut self, child: &str, parent: &str) -> Self {
        self.add(child, parent);
        self
    }

    /// Tables `table` holds foreign keys to.
    pub fn referenced_tables(&self, table: &str) -> impl Iterator<Item = &String> {
        self.references.get(table).into_iter().flatten()
    }

    /// Tables holding foreign keys to `table`.
    pub fn referencing_tables(&self, table: &str) -> impl Iterator<Item = &String> {
        self.referenced_by.get(table).into_iter().flatten()
    }

    /// Whether `child` holds a foreign key to `parent`.
    pub fn references(&self, child: &str, parent: &str) -> bool {
        self.references
            .get(&normalize_table(child))
            .is_some_and(|set| set.contains(&normalize_table(parent)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ClassDescriptor, MetadataError};

    fn shop() -> DescriptorRepository {
        DescriptorRepository::new()
            .with(ClassDescriptor::new("Customer", "CUSTOMER"))
            .unwrap()
            .with(
                ClassDescriptor::new("Order", "ORDERS")
                    .with_reference("customer", "Customer")
                    .with_collection("items", "OrderItem"),
            )
            .unwrap()
            .with(ClassDescriptor::new("OrderItem", "ORDER_ITEM"))
            .unwrap()
            .with(ClassDescriptor::new("Tag", "TAG"))
            .unwrap()
            .with(
                ClassDescriptor::new("Product", "PRODUCT")
                    .with_indirect_collection("tags", "Tag", "PRODUCT_TAG"),
            )
            .unwrap()
    }

    #[test]
    fn test_build() {
        let map = ForeignKeyMap::build(&shop()).unwrap();

        assert!(map.references("ORDERS", "CUSTOMER"));
        assert!(map.references("ORDER_ITEM", "ORDERS"));
        assert!(map.references("PRODUCT_TAG", "PRODUCT"));
        assert!(map.references("PRODUCT_TAG", "TAG"));
        assert!(!map.references("CUSTOMER", "ORDERS"));

        let referencing: Vec<_> = map.referencing_tables("orders").collect();
        assert_eq!(referencing, vec!["order_item"]);
        assert_eq!(map.referenced_tables("customer").count(), 0);
    }

    #[test]
    fn test_build_unknown_target() {
        let repo = DescriptorRepository::new()
            .with(ClassDescriptor::new("Order", "ORDERS").with_reference("customer", "Customer"))
            .unwrap();
        assert!(matches!(
            ForeignKeyMap::build(&repo),
            Err(MetadataError::ClassNotFound(_))
        ));
    }

    #[test]
    fn test_cached_per_key() {
        let repo = shop();
        let a = ForeignKeyMap::cached("test_cached_per_key", &repo).unwrap();
        let b = ForeignKeyMap::cached("test_cached_per_key", &DescriptorRepository::new()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let other = ForeignKeyMap::cached("test_cached_per_key/other", &DescriptorRepository::new())
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &other));
        assert!(!other.references("ORDERS", "CUSTOMER"));
    }
}
