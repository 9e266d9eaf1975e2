//! Type Registry
//!
//! Two halves:
//! - the persisted registry rows (`node_types`, `relationship_types`) that bind
//!   a short type code to a typeclass path and a documentation-only schema
//! - the in-process [`ClassRegistry`], a startup-time map from typeclass path to
//!   a factory building the concrete Rust type
//!
//! Rehydration goes `type_code → node_types row → typeclass → factory`.

use std::any::Any;
use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::node::Attributes;
use crate::object::DefaultObject;
use crate::writer::SyncWriter;
use crate::{Error, Result};

static TYPE_CODE_PATTERN: OnceLock<Regex> = OnceLock::new();

/// Check that a type code is a short lowercase identifier.
pub fn validate_type_code(code: &str) -> Result<()> {
    let pattern = TYPE_CODE_PATTERN
        .get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]{0,99}$").expect("type code pattern is valid"));
    if pattern.is_match(code) {
        Ok(())
    } else {
        Err(Error::InvalidTypeCode(code.to_string()))
    }
}

// ========== Persisted registry rows ==========

/// A row of `node_types`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeType {
    pub id: i64,
    pub type_code: String,
    pub type_name: String,
    /// Full path of the implementing class (`module_path::classname`)
    pub typeclass: String,
    pub classname: String,
    pub module_path: String,
    pub description: Option<String>,
    /// Attribute schema description (documentation only, not enforced)
    pub schema_definition: Option<Value>,
    pub is_active: bool,
}

/// Insert payload for `node_types`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNodeType {
    pub type_code: String,
    pub type_name: String,
    pub typeclass: String,
    pub classname: String,
    pub module_path: String,
    pub description: Option<String>,
    pub schema_definition: Option<Value>,
}

impl NewNodeType {
    /// Build the registry row describing a registered class
    pub fn from_class(info: &ClassInfo) -> Self {
        Self {
            type_code: info.type_code.to_string(),
            type_name: info.type_name.to_string(),
            typeclass: info.typeclass(),
            classname: info.classname.to_string(),
            module_path: info.module_path.to_string(),
            description: None,
            schema_definition: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema_definition = Some(schema);
        self
    }
}

/// Partial update of a `node_types` row; `None` leaves a column unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeTypeUpdate {
    pub type_name: Option<String>,
    pub typeclass: Option<String>,
    pub classname: Option<String>,
    pub module_path: Option<String>,
    pub description: Option<String>,
    pub schema_definition: Option<Value>,
    pub is_active: Option<bool>,
}

/// A row of `relationship_types`.
///
/// `is_directed`, `is_symmetric` and `is_transitive` are advisory: nothing
/// creates the implied reverse or transitive edges automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipType {
    pub id: i64,
    pub type_code: String,
    pub type_name: String,
    pub typeclass: String,
    pub description: Option<String>,
    pub schema_definition: Option<Value>,
    pub is_directed: bool,
    pub is_symmetric: bool,
    pub is_transitive: bool,
    pub is_active: bool,
}

/// Insert payload for `relationship_types`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRelationshipType {
    pub type_code: String,
    pub type_name: String,
    pub typeclass: String,
    pub description: Option<String>,
    pub schema_definition: Option<Value>,
    pub is_directed: bool,
    pub is_symmetric: bool,
    pub is_transitive: bool,
}

impl NewRelationshipType {
    /// A directed, non-symmetric, non-transitive relationship type
    pub fn new(type_code: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            type_code: type_code.into(),
            type_name: type_name.into(),
            typeclass: "campusgraph::relationship::Relationship".to_string(),
            description: None,
            schema_definition: None,
            is_directed: true,
            is_symmetric: false,
            is_transitive: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema_definition = Some(schema);
        self
    }

    /// Mark the type symmetric (and therefore undirected)
    pub fn symmetric(mut self) -> Self {
        self.is_symmetric = true;
        self.is_directed = false;
        self
    }

    pub fn transitive(mut self) -> Self {
        self.is_transitive = true;
        self
    }
}

/// Partial update of a `relationship_types` row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipTypeUpdate {
    pub type_name: Option<String>,
    pub typeclass: Option<String>,
    pub description: Option<String>,
    pub schema_definition: Option<Value>,
    pub is_directed: Option<bool>,
    pub is_symmetric: Option<bool>,
    pub is_transitive: Option<bool>,
    pub is_active: Option<bool>,
}

/// Relationship types installed by `ModelManager::install_builtin_types`
pub fn builtin_relationship_types() -> Vec<NewRelationshipType> {
    vec![
        NewRelationshipType::new("contains", "Contains")
            .with_description("Container holds the target"),
        NewRelationshipType::new("owns", "Owns")
            .with_description("Source owns the target"),
        NewRelationshipType::new("exit", "Exit")
            .with_description("Passage from one location to another"),
        NewRelationshipType::new("friendship", "Friendship")
            .with_description("Mutual acquaintance")
            .symmetric(),
        NewRelationshipType::new("inherits", "Inherits")
            .with_description("Source inherits behaviour from the target")
            .transitive(),
    ]
}

// ========== Classes ==========

/// Static description of a Rust type that can be stored as a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassInfo {
    pub type_code: &'static str,
    pub type_name: &'static str,
    pub classname: &'static str,
    pub module_path: &'static str,
}

impl ClassInfo {
    /// Full typeclass path (`module_path::classname`)
    pub fn typeclass(&self) -> String {
        format!("{}::{}", self.module_path, self.classname)
    }
}

/// Any in-memory object backed by a node row.
///
/// Implementors wrap a [`DefaultObject`] handle; the `Any` plumbing lets
/// callers recover the concrete type from a rehydrated `Box<dyn Entity>`.
pub trait Entity: Any + Send + Sync {
    /// The shared identity + attribute bag of this object
    fn object(&self) -> &DefaultObject;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;
}

impl dyn Entity {
    /// Borrow the concrete type, if this entity is a `T`
    pub fn downcast_ref<T: Entity>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Check whether this entity is a `T`
    pub fn is<T: Entity>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Take the concrete type out of the box, if this entity is a `T`
    pub fn downcast<T: Entity>(self: Box<Self>) -> Option<T> {
        self.into_any().downcast::<T>().ok().map(|boxed| *boxed)
    }
}

impl std::fmt::Debug for dyn Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self.object(), f)
    }
}

/// A Rust type registered as a node class.
///
/// A class must be constructible from `(name, attributes)` alone: the
/// object handle built from those is all `from_object` receives.
pub trait NodeClass: Entity + Sized {
    const CLASS: ClassInfo;

    /// Attribute defaults the caller's attributes are merged over
    fn defaults() -> Attributes {
        Attributes::new()
    }

    /// Wrap an object handle that already carries this class's identity
    fn from_object(object: DefaultObject) -> Self;

    /// Construct a new object and schedule its first write-back
    fn create(name: &str, attributes: Attributes, writer: &SyncWriter) -> Result<Self> {
        DefaultObject::construct(Self::CLASS, Self::defaults(), name, attributes, Some(writer.clone()))
            .map(Self::from_object)
    }

    /// Construct a new object that is only persisted by explicit syncs
    fn create_detached(name: &str, attributes: Attributes) -> Result<Self> {
        DefaultObject::construct(Self::CLASS, Self::defaults(), name, attributes, None)
            .map(Self::from_object)
    }
}

fn instantiate<T: NodeClass>(object: DefaultObject) -> Box<dyn Entity> {
    Box::new(T::from_object(object))
}

/// Registry entry for one class
#[derive(Clone)]
pub struct ClassEntry {
    pub info: ClassInfo,
    defaults: fn() -> Attributes,
    factory: fn(DefaultObject) -> Box<dyn Entity>,
}

impl ClassEntry {
    fn of<T: NodeClass>() -> Self {
        Self {
            info: T::CLASS,
            defaults: T::defaults,
            factory: instantiate::<T>,
        }
    }

    pub fn typeclass(&self) -> String {
        self.info.typeclass()
    }

    /// The class's attribute defaults
    pub fn defaults(&self) -> Attributes {
        (self.defaults)()
    }

    /// Wrap an object handle in the concrete class
    pub fn instantiate(&self, object: DefaultObject) -> Box<dyn Entity> {
        (self.factory)(object)
    }

    /// Construct a brand-new instance of this class under `type_code`
    pub fn construct(
        &self,
        type_code: &str,
        name: &str,
        attributes: Attributes,
        writer: Option<SyncWriter>,
    ) -> Result<Box<dyn Entity>> {
        let object = DefaultObject::construct_as(
            type_code,
            &self.typeclass(),
            self.defaults(),
            name,
            attributes,
            writer,
        )?;
        Ok(self.instantiate(object))
    }
}

impl std::fmt::Debug for ClassEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassEntry").field("info", &self.info).finish()
    }
}

/// Map from typeclass path to class factory
#[derive(Debug, Default, Clone)]
pub struct ClassRegistry {
    classes: HashMap<String, ClassEntry>,
}

impl ClassRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class; re-registering the same typeclass replaces it
    pub fn register<T: NodeClass>(&mut self) {
        let entry = ClassEntry::of::<T>();
        self.classes.insert(entry.typeclass(), entry);
    }

    /// Look up a class by typeclass path
    pub fn get(&self, typeclass: &str) -> Option<&ClassEntry> {
        self.classes.get(typeclass)
    }

    /// Look up the class whose own type code is `type_code`
    pub fn find_by_type_code(&self, type_code: &str) -> Option<&ClassEntry> {
        self.classes.values().find(|e| e.info.type_code == type_code)
    }

    pub fn contains(&self, typeclass: &str) -> bool {
        self.classes.contains_key(typeclass)
    }

    /// All registered classes
    pub fn entries(&self) -> impl Iterator<Item = &ClassEntry> {
        self.classes.values()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// Create a registry with the built-in classes
pub fn default_registry() -> ClassRegistry {
    let mut registry = ClassRegistry::new();
    registry.register::<DefaultObject>();
    registry.register::<crate::account::DefaultAccount>();
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::DefaultAccount;

    #[test]
    fn test_type_code_validation() {
        assert!(validate_type_code("room").is_ok());
        assert!(validate_type_code("system_cmdset").is_ok());
        assert!(validate_type_code("Room").is_err());
        assert!(validate_type_code("").is_err());
        assert!(validate_type_code("9lives").is_err());
        assert!(validate_type_code("has space").is_err());
    }

    #[test]
    fn test_registry() {
        let registry = default_registry();

        let typeclass = DefaultAccount::CLASS.typeclass();
        assert_eq!(typeclass, "campusgraph::account::DefaultAccount");
        assert!(registry.contains(&typeclass));
        assert!(registry.get("campusgraph::missing::Thing").is_none());
        assert_eq!(
            registry.find_by_type_code("account").map(|e| e.info.classname),
            Some("DefaultAccount")
        );
    }

    #[test]
    fn test_factory_preserves_class() {
        let registry = default_registry();
        let entry = registry.find_by_type_code("account").unwrap();

        let entity = entry
            .construct("account", "alice", Attributes::new(), None)
            .unwrap();

        assert!(entity.is::<DefaultAccount>());
        assert!(!entity.is::<DefaultObject>());
        assert_eq!(entity.object().type_code(), "account");
        assert_eq!(entity.object().get_attribute("max_failed_attempts"), Some(5.into()));
    }

    #[test]
    fn test_builtin_relationship_types() {
        let types = builtin_relationship_types();
        let friendship = types.iter().find(|t| t.type_code == "friendship").unwrap();
        assert!(friendship.is_symmetric);
        assert!(!friendship.is_directed);
        for t in &types {
            assert!(validate_type_code(&t.type_code).is_ok());
        }
    }
}
