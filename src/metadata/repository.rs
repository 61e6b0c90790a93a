//! Descriptor repository: the registry of mapped classes.

use std::collections::BTreeMap;

use super::descriptor::ClassDescriptor;
use super::error::{MetadataError, MetadataResult};

/// Registry of class descriptors keyed by class name.
#[derive(Debug, Clone, Default)]
pub struct DescriptorRepository {
    classes: BTreeMap<String, ClassDescriptor>,
}

impl DescriptorRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a repository from a JSON array of class descriptors.
    pub fn from_json(json: &str) -> MetadataResult<Self> {
        let descriptors: Vec<ClassDescriptor> = serde_json::from_str(json)?;
        let mut repo = Self::new();
        for cld in descriptors {
            repo.register(cld)?;
        }
        Ok(repo)
    }

    /// Register a class descriptor.
    pub fn register(&mut self, descriptor: ClassDescriptor) -> MetadataResult<()> {
        descriptor.validate()?;
        if self.classes.contains_key(&descriptor.class_name) {
            return Err(MetadataError::DuplicateClass(descriptor.class_name));
        }
        self.classes.insert(descriptor.class_name.clone(), descriptor);
        Ok(())
    }

    /// Builder-style registration.
    pub fn with(mut self, descriptor: ClassDescriptor) -> MetadataResult<Self> {
        self.register(descriptor)?;
        Ok(self)
    }

    /// Look up the descriptor for a class.
    pub fn get_descriptor_for(&self, class_name: &str) -> MetadataResult<&ClassDescriptor> {
        self.classes
            .get(class_name)
            .ok_or_else(|| MetadataError::ClassNotFound(class_name.to_string()))
    }

    /// Check whether a class is mapped.
    pub fn has_descriptor_for(&self, class_name: &str) -> bool {
        self.classes.contains_key(class_name)
    }

    /// Walk `base_class` links up to the top-level mapped class.
    pub fn top_level_class<'a>(&'a self, class_name: &'a str) -> MetadataResult<&'a str> {
        let mut current = self.get_descriptor_for(class_name)?;
        let mut hops = 0;
        while let Some(base) = current.base_class.as_deref() {
            hops += 1;
            if hops > self.classes.len() {
                return Err(MetadataError::invalid(class_name, "cyclic class hierarchy"));
            }
            current = self.get_descriptor_for(base)?;
        }
        Ok(&current.class_name)
    }

    /// Isolation ordinal for a class.
    ///
    /// The class's own setting wins, then the nearest base class setting,
    /// then `default`.
    pub fn isolation_ordinal(&self, class_name: &str, default: u8) -> MetadataResult<u8> {
        let mut current = self.get_descriptor_for(class_name)?;
        let mut hops = 0;
        loop {
            if let Some(level) = current.isolation_level {
                return Ok(level);
            }
            match current.base_class.as_deref() {
                Some(base) => {
                    hops += 1;
                    if hops > self.classes.len() {
                        return Err(MetadataError::invalid(class_name, "cyclic class hierarchy"));
                    }
                    current = self.get_descriptor_for(base)?;
                }
                None => return Ok(default),
            }
        }
    }

    /// Iterate over all descriptors in class-name order.
    pub fn descriptors(&self) -> impl Iterator<Item = &ClassDescriptor> {
        self.classes.values()
    }

    /// Number of registered classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether no classes are registered.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DescriptorRepository {
        DescriptorRepository::new()
            .with(ClassDescriptor::new("Article", "ARTICLE").with_isolation(1))
            .unwrap()
            .with(ClassDescriptor::new("Book", "BOOK").extends("Article"))
            .unwrap()
            .with(
                ClassDescriptor::new("Cd", "CD")
                    .extends("Article")
                    .with_isolation(3),
            )
            .unwrap()
    }

    #[test]
    fn test_lookup() {
        let repo = sample();
        assert_eq!(repo.len(), 3);
        assert_eq!(repo.get_descriptor_for("Book").unwrap().table, "BOOK");
        assert!(matches!(
            repo.get_descriptor_for("Magazine"),
            Err(MetadataError::ClassNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_registration() {
        let mut repo = sample();
        let err = repo
            .register(ClassDescriptor::new("Book", "BOOK2"))
            .unwrap_err();
        assert!(matches!(err, MetadataError::DuplicateClass(name) if name == "Book"));
    }

    #[test]
    fn test_top_level_class() {
        let repo = sample();
        assert_eq!(repo.top_level_class("Book").unwrap(), "Article");
        assert_eq!(repo.top_level_class("Article").unwrap(), "Article");
    }

    #[test]
    fn test_isolation_inheritance() {
        let repo = sample();
        assert_eq!(repo.isolation_ordinal("Book", 0).unwrap(), 1);
        assert_eq!(repo.isolation_ordinal("Cd", 0).unwrap(), 3);

        let plain = DescriptorRepository::new()
            .with(ClassDescriptor::new("Note", "NOTE"))
            .unwrap();
        assert_eq!(plain.isolation_ordinal("Note", 2).unwrap(), 2);
    }

    #[test]
    fn test_cyclic_hierarchy_is_reported() {
        let repo = DescriptorRepository::new()
            .with(ClassDescriptor::new("A", "A").extends("B"))
            .unwrap()
            .with(ClassDescriptor::new("B", "B").extends("A"))
            .unwrap();
        assert!(repo.top_level_class("A").is_err());
        assert!(repo.isolation_ordinal("A", 0).is_err());
    }

    #[test]
    fn test_from_json() {
        let json = r#"[
            {"class_name": "Customer", "table": "CUSTOMER", "isolation_level": 2},
            {"class_name": "Order", "table": "ORDERS",
             "references": [{"name": "customer", "target_class": "Customer"}]}
        ]"#;
        let repo = DescriptorRepository::from_json(json).unwrap();
        assert_eq!(repo.len(), 2);
        assert_eq!(repo.get_descriptor_for("Order").unwrap().references.len(), 1);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            DescriptorRepository::from_json("{not json"),
            Err(MetadataError::Parse(_))
        ));
    }
}
