//! Model Manager - caching façade over the synchronizer
//!
//! Keeps two caches in front of the registry tables:
//! - `type_code → NodeType` / `type_code → RelationshipType`, loaded eagerly
//! - `type_code → class`, filled on first resolution
//!
//! Type CRUD through the manager does not touch the caches; call
//! [`ModelManager::refresh_type_caches`] after changing the registry.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::node::{Attributes, Node};
use crate::object::DefaultObject;
use crate::registry::{
    ClassEntry, Entity, NewNodeType, NewRelationshipType, NodeClass, NodeType, NodeTypeUpdate,
    RelationshipType, RelationshipTypeUpdate, builtin_relationship_types, default_registry,
};
use crate::relationship::Relationship;
use crate::storage::SqliteStore;
use crate::sync::{GraphSynchronizer, SyncStats};
use crate::writer::{DeadLetter, SyncWriter, WriterStats};
use crate::{Error, Result};

/// One entry of a batch creation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    /// Type code; `batch_create_nodes_by_type` overrides it
    #[serde(rename = "type", default)]
    pub type_code: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NodeConfig {
    pub fn new(name: impl Into<String>, type_code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_code: Some(type_code.into()),
            attributes: Attributes::new(),
            description: None,
            tags: Vec::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

/// Snapshot returned by [`ModelManager::get_statistics`]
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatistics {
    pub sync: SyncStats,
    pub node_types_count: usize,
    pub relationship_types_count: usize,
    pub class_cache_size: usize,
    pub writer: WriterStats,
    pub dead_letters: usize,
    pub timestamp: DateTime<Utc>,
}

pub struct ModelManager {
    sync: Arc<GraphSynchronizer>,
    writer: SyncWriter,
    node_types: RwLock<HashMap<String, NodeType>>,
    relationship_types: RwLock<HashMap<String, RelationshipType>>,
    class_cache: RwLock<HashMap<String, ClassEntry>>,
}

impl ModelManager {
    /// Build a manager over a running synchronizer and writer and load the
    /// type caches.
    pub fn new(sync: Arc<GraphSynchronizer>, writer: SyncWriter) -> Result<Self> {
        let manager = Self {
            sync,
            writer,
            node_types: RwLock::new(HashMap::new()),
            relationship_types: RwLock::new(HashMap::new()),
            class_cache: RwLock::new(HashMap::new()),
        };
        manager.refresh_type_caches()?;
        Ok(manager)
    }

    /// Open (or create) the configured database and start the writer
    pub fn open(config: &StoreConfig) -> Result<Self> {
        Self::with_store(SqliteStore::open(&config.database_path())?, config)
    }

    /// Open a database file with default settings
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::with_store(SqliteStore::open(path)?, &StoreConfig::default())
    }

    /// In-memory database with the built-in types installed
    pub fn in_memory() -> Result<Self> {
        let manager = Self::with_store(SqliteStore::open_in_memory()?, &StoreConfig::default())?;
        manager.install_builtin_types()?;
        Ok(manager)
    }

    pub fn with_store(store: SqliteStore, config: &StoreConfig) -> Result<Self> {
        let sync = Arc::new(
            GraphSynchronizer::new(store, default_registry()).with_search_limit(config.search_limit),
        );
        let writer = SyncWriter::spawn(Arc::clone(&sync), config.writer_config())?;
        Self::new(sync, writer)
    }

    /// Register the built-in classes and relationship types
    pub fn install_builtin_types(&self) -> Result<()> {
        self.sync.register_class_type::<DefaultObject>()?;
        self.sync.register_class_type::<crate::account::DefaultAccount>()?;
        for rel_type in builtin_relationship_types() {
            self.sync.ensure_relationship_type(&rel_type)?;
        }
        self.refresh_type_caches()
    }

    pub fn synchronizer(&self) -> &GraphSynchronizer {
        &self.sync
    }

    pub fn writer(&self) -> &SyncWriter {
        &self.writer
    }

    // ========== Type caches ==========

    /// Reload the type-row caches from the database and drop resolved classes
    pub fn refresh_type_caches(&self) -> Result<()> {
        let node_types: HashMap<String, NodeType> = self
            .sync
            .get_all_node_types(true)?
            .into_iter()
            .map(|t| (t.type_code.clone(), t))
            .collect();
        let relationship_types: HashMap<String, RelationshipType> = self
            .sync
            .get_all_relationship_types(true)?
            .into_iter()
            .map(|t| (t.type_code.clone(), t))
            .collect();

        debug!(
            node_types = node_types.len(),
            relationship_types = relationship_types.len(),
            "type caches loaded"
        );
        *self.node_types.write() = node_types;
        *self.relationship_types.write() = relationship_types;
        self.class_cache.write().clear();
        Ok(())
    }

    /// Register `T` and bind its own type code to it
    pub fn register_class<T: NodeClass>(&self) -> Result<NodeType> {
        let node_type = self.sync.register_class_type::<T>()?;
        self.node_types
            .write()
            .insert(node_type.type_code.clone(), node_type.clone());
        self.class_cache.write().remove(&node_type.type_code);
        Ok(node_type)
    }

    /// Cached node type row, loading it on a miss
    pub fn get_node_type(&self, type_code: &str) -> Result<Option<NodeType>> {
        if let Some(t) = self.node_types.read().get(type_code) {
            return Ok(Some(t.clone()));
        }
        let loaded = self.sync.get_node_type_by_code(type_code)?;
        if let Some(t) = loaded.as_ref().filter(|t| t.is_active) {
            self.node_types.write().insert(type_code.to_string(), t.clone());
        }
        Ok(loaded)
    }

    /// Cached relationship type row, loading it on a miss
    pub fn get_relationship_type(&self, type_code: &str) -> Result<Option<RelationshipType>> {
        if let Some(t) = self.relationship_types.read().get(type_code) {
            return Ok(Some(t.clone()));
        }
        let loaded = self.sync.get_relationship_type_by_code(type_code)?;
        if let Some(t) = loaded.as_ref().filter(|t| t.is_active) {
            self.relationship_types
                .write()
                .insert(type_code.to_string(), t.clone());
        }
        Ok(loaded)
    }

    /// Active relationship type row, from the cache when possible
    fn resolve_relationship_type(&self, type_code: &str) -> Result<RelationshipType> {
        match self.get_relationship_type(type_code)? {
            Some(t) if t.is_active => Ok(t),
            Some(_) => Err(Error::InactiveRelationshipType(type_code.to_string())),
            None => Err(Error::UnknownRelationshipType(type_code.to_string())),
        }
    }

    /// The class bound to `type_code`
    fn resolve_class(&self, type_code: &str) -> Result<ClassEntry> {
        if let Some(entry) = self.class_cache.read().get(type_code) {
            return Ok(entry.clone());
        }
        let node_type = match self.get_node_type(type_code)? {
            Some(t) if t.is_active => t,
            Some(_) => return Err(Error::InactiveNodeType(type_code.to_string())),
            None => return Err(Error::UnknownNodeType(type_code.to_string())),
        };
        let entry = self
            .sync
            .class_for_typeclass(&node_type.typeclass)
            .ok_or_else(|| Error::UnknownClass(node_type.typeclass.clone()))?;
        self.class_cache
            .write()
            .insert(type_code.to_string(), entry.clone());
        Ok(entry)
    }

    // ========== Creation ==========

    /// Construct a `T` under its own type code
    pub fn create<T: NodeClass>(&self, name: &str, attributes: Attributes) -> Result<T> {
        T::create(name, attributes, &self.writer)
    }

    /// Construct an instance of the class bound to `type_code`. The object
    /// schedules its own first write.
    pub fn create_node(&self, name: &str, type_code: &str, attributes: Attributes) -> Result<Box<dyn Entity>> {
        let entry = self.resolve_class(type_code)?;
        entry.construct(type_code, name, attributes, Some(self.writer.clone()))
    }

    /// Create every well-formed entry; failures are logged and skipped
    pub fn batch_create_nodes(&self, configs: Vec<NodeConfig>) -> Vec<Box<dyn Entity>> {
        let mut created = Vec::with_capacity(configs.len());
        for config in configs {
            if config.name.is_empty() {
                warn!("node config without a name; skipping");
                continue;
            }
            let Some(type_code) = config.type_code.as_deref() else {
                warn!(name = %config.name, "node config without a type; skipping");
                continue;
            };
            match self.create_node(&config.name, type_code, config.attributes.clone()) {
                Ok(entity) => {
                    let object = entity.object();
                    if let Some(description) = &config.description {
                        object.set_description(description);
                    }
                    if !config.tags.is_empty() {
                        object.set_tags(config.tags.iter().cloned());
                    }
                    created.push(entity);
                }
                Err(e) => warn!(name = %config.name, type_code, error = %e, "failed to create node"),
            }
        }
        info!(created = created.len(), "batch creation finished");
        created
    }

    /// Batch creation with every entry forced to `type_code`
    pub fn batch_create_nodes_by_type(&self, configs: Vec<NodeConfig>, type_code: &str) -> Vec<Box<dyn Entity>> {
        let typed = configs
            .into_iter()
            .map(|mut c| {
                c.type_code = Some(type_code.to_string());
                c
            })
            .collect();
        self.batch_create_nodes(typed)
    }

    // ========== Lookup & query ==========

    /// Object with `uuid`, active or not. `Ok(None)` only when there is no
    /// row; a row whose type cannot be resolved is an error.
    pub fn get_node_by_uuid(&self, uuid: &Uuid) -> Result<Option<Box<dyn Entity>>> {
        self.sync
            .get_node_by_uuid(uuid)?
            .map(|node| self.sync.rehydrate(&node))
            .transpose()
    }

    /// First active object named `name`; resolution errors as above
    pub fn get_node_by_name(&self, name: &str, type_code: Option<&str>) -> Result<Option<Box<dyn Entity>>> {
        self.sync
            .get_node_by_name(name, type_code)?
            .map(|node| self.sync.rehydrate(&node))
            .transpose()
    }

    pub fn get_nodes_by_type(&self, type_code: &str) -> Result<Vec<Box<dyn Entity>>> {
        let nodes = self.sync.get_nodes_by_type(type_code)?;
        Ok(self.sync.rehydrate_batch(&nodes))
    }

    pub fn get_active_nodes_by_type(&self, type_code: &str) -> Result<Vec<Box<dyn Entity>>> {
        let nodes = self.sync.get_active_nodes_by_type(type_code)?;
        Ok(self.sync.rehydrate_batch(&nodes))
    }

    pub fn find_nodes_by_attribute(
        &self,
        key: &str,
        value: &Value,
        type_code: Option<&str>,
    ) -> Result<Vec<Box<dyn Entity>>> {
        self.sync.find_objects_by_attribute(key, value, type_code)
    }

    pub fn find_nodes_by_tag(&self, tag: &str, type_code: Option<&str>) -> Result<Vec<Box<dyn Entity>>> {
        self.sync.find_objects_by_tag(tag, type_code)
    }

    pub fn search(&self, text: &str, type_code: Option<&str>) -> Result<Vec<Box<dyn Entity>>> {
        self.sync.search_objects(text, type_code)
    }

    // ========== Updates ==========

    /// Merge attributes into the object; written back by the writer
    pub fn update_node_attributes(&self, entity: &dyn Entity, attributes: Attributes) -> Result<()> {
        entity.object().update_attributes(attributes)
    }

    /// Replace the object's tag set
    pub fn update_node_tags(&self, entity: &dyn Entity, tags: Vec<String>) -> bool {
        entity.object().set_tags(tags)
    }

    /// Soft-delete the object and write it immediately
    pub fn delete_node(&self, entity: &dyn Entity) -> Result<bool> {
        let object = entity.object();
        if !object.is_active() {
            return Ok(false);
        }
        object.set_active(false);
        self.sync.sync_object_to_node(entity)?;
        Ok(true)
    }

    /// Write the object now instead of waiting for the writer
    pub fn sync_now(&self, entity: &dyn Entity) -> Result<Node> {
        self.sync.sync_object_to_node(entity)
    }

    // ========== Relationships ==========

    pub fn create_relationship(
        &self,
        source: &dyn Entity,
        target: &dyn Entity,
        type_code: &str,
        attributes: Attributes,
    ) -> Result<Relationship> {
        let rel_type = self.resolve_relationship_type(type_code)?;
        self.sync.create_typed_relationship(source, target, rel_type, attributes)
    }

    pub fn get_relationships(&self, entity: &dyn Entity, type_code: Option<&str>) -> Result<Vec<Relationship>> {
        self.sync.get_object_relationships(entity, type_code)
    }

    pub fn get_relationship_between(
        &self,
        source: &dyn Entity,
        target: &dyn Entity,
        type_code: &str,
    ) -> Result<Option<Relationship>> {
        self.sync.get_relationship_between(source, target, type_code)
    }

    pub fn remove_relationship(&self, source: &dyn Entity, target: &dyn Entity, type_code: &str) -> Result<bool> {
        self.sync.remove_relationship(source, target, type_code)
    }

    pub fn update_relationship(
        &self,
        id: i64,
        attributes: Attributes,
        weight: Option<i64>,
    ) -> Result<Option<Relationship>> {
        self.sync.update_relationship(id, attributes, weight)
    }

    pub fn delete_relationship(&self, id: i64) -> Result<bool> {
        self.sync.delete_relationship(id)
    }

    // ========== Type registry ==========

    pub fn create_node_type(&self, new: &NewNodeType) -> Result<NodeType> {
        self.sync.create_node_type(new)
    }

    /// Bind a new type code to the class of an existing type code
    pub fn create_node_type_like(&self, type_code: &str, type_name: &str, class_of: &str) -> Result<NodeType> {
        let base = self
            .get_node_type(class_of)?
            .ok_or_else(|| Error::UnknownNodeType(class_of.to_string()))?;
        self.sync.create_node_type(&NewNodeType {
            type_code: type_code.to_string(),
            type_name: type_name.to_string(),
            typeclass: base.typeclass,
            classname: base.classname,
            module_path: base.module_path,
            description: None,
            schema_definition: None,
        })
    }

    pub fn get_all_node_types(&self) -> Result<Vec<NodeType>> {
        self.sync.get_all_node_types(true)
    }

    pub fn update_node_type(&self, type_code: &str, update: &NodeTypeUpdate) -> Result<Option<NodeType>> {
        self.sync.update_node_type(type_code, update)
    }

    pub fn delete_node_type(&self, type_code: &str) -> Result<bool> {
        self.sync.delete_node_type(type_code)
    }

    pub fn create_relationship_type(&self, new: &NewRelationshipType) -> Result<RelationshipType> {
        self.sync.create_relationship_type(new)
    }

    pub fn get_all_relationship_types(&self) -> Result<Vec<RelationshipType>> {
        self.sync.get_all_relationship_types(true)
    }

    pub fn update_relationship_type(
        &self,
        type_code: &str,
        update: &RelationshipTypeUpdate,
    ) -> Result<Option<RelationshipType>> {
        self.sync.update_relationship_type(type_code, update)
    }

    pub fn delete_relationship_type(&self, type_code: &str) -> Result<bool> {
        self.sync.delete_relationship_type(type_code)
    }

    // ========== Maintenance ==========

    pub fn cleanup_orphaned_nodes(&self) -> Result<usize> {
        self.sync.cleanup_orphaned_nodes()
    }

    pub fn get_statistics(&self) -> Result<ManagerStatistics> {
        Ok(ManagerStatistics {
            sync: self.sync.get_sync_stats()?,
            node_types_count: self.node_types.read().len(),
            relationship_types_count: self.relationship_types.read().len(),
            class_cache_size: self.class_cache.read().len(),
            writer: self.writer.stats(),
            dead_letters: self.writer.dead_letters().len(),
            timestamp: Utc::now(),
        })
    }

    /// Objects whose write-back was abandoned
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.writer.dead_letters()
    }

    /// Block until every deferred write queued so far is durable
    pub fn flush(&self) -> Result<()> {
        self.writer.flush()
    }

    /// Flush and stop the writer; also run on drop
    pub fn shutdown(&self) {
        self.writer.shutdown();
    }
}

impl Drop for ModelManager {
    fn drop(&mut self) {
        self.writer.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::DefaultAccount;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_create_node_resolves_class() {
        let manager = ModelManager::in_memory().unwrap();

        let entity = manager.create_node("carol", "account", Attributes::new()).unwrap();
        let account = entity.downcast_ref::<DefaultAccount>().unwrap();
        assert_eq!(account.username(), "carol");

        assert!(matches!(
            manager.create_node("x", "spaceship", Attributes::new()),
            Err(Error::UnknownNodeType(_))
        ));
    }

    #[test]
    fn test_type_code_bound_to_existing_class() {
        let manager = ModelManager::in_memory().unwrap();
        manager.create_node_type_like("room", "Room", "object").unwrap();

        let hall = manager.create_node("hall", "room", attrs(json!({"capacity": 40}))).unwrap();
        manager.flush().unwrap();

        let back = manager.get_node_by_uuid(&hall.object().uuid()).unwrap().unwrap();
        assert!(back.is::<DefaultObject>());
        assert_eq!(back.object().type_code(), "room");
        assert_eq!(back.object().get_attribute("capacity"), Some(json!(40)));
    }

    #[test]
    fn test_batch_skips_bad_entries() {
        let manager = ModelManager::in_memory().unwrap();
        let configs: Vec<NodeConfig> = serde_json::from_value(json!([
            {"name": "a", "type": "object", "attributes": {"n": 1}, "tags": ["x"]},
            {"name": "b", "type": "nope"},
            {"name": "c"},
            {"name": "", "type": "object"},
        ]))
        .unwrap();

        let created = manager.batch_create_nodes(configs);
        assert_eq!(created.len(), 1);
        assert!(created[0].object().has_tag("x"));

        let forced = manager.batch_create_nodes_by_type(vec![NodeConfig::new("d", "nope")], "object");
        assert_eq!(forced.len(), 1);
        assert_eq!(forced[0].object().type_code(), "object");
    }

    #[test]
    fn test_delete_node_is_soft() {
        let manager = ModelManager::in_memory().unwrap();
        let obj: DefaultObject = manager.create("lamp", attrs(json!({"lit": true}))).unwrap();
        manager.flush().unwrap();

        assert!(manager.delete_node(&obj).unwrap());
        assert!(!manager.delete_node(&obj).unwrap());
        manager.flush().unwrap();

        assert!(manager.find_nodes_by_attribute("lit", &json!(true), None).unwrap().is_empty());
        let row = manager.get_node_by_uuid(&obj.uuid()).unwrap().unwrap();
        assert!(!row.object().is_active());
    }

    #[test]
    fn test_lookup_of_frozen_row_fails() {
        let manager = ModelManager::in_memory().unwrap();
        let lamp: DefaultObject = manager.create("lamp", Attributes::new()).unwrap();
        manager.flush().unwrap();

        assert!(manager.delete_node_type("object").unwrap());
        assert!(matches!(
            manager.get_node_by_uuid(&lamp.uuid()),
            Err(Error::InactiveNodeType(code)) if code == "object"
        ));
        assert!(manager.get_node_by_name("lamp", None).is_err_and(|e| e.is_resolution()));
        assert!(manager.get_node_by_uuid(&Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_relationship_types_come_from_cache() {
        let manager = ModelManager::in_memory().unwrap();
        let a: DefaultObject = manager.create("a", Attributes::new()).unwrap();
        let b: DefaultObject = manager.create("b", Attributes::new()).unwrap();

        assert!(matches!(
            manager.create_relationship(&a, &b, "teleport", Attributes::new()),
            Err(Error::UnknownRelationshipType(code)) if code == "teleport"
        ));

        assert!(manager.delete_relationship_type("owns").unwrap());
        assert!(manager.create_relationship(&a, &b, "owns", Attributes::new()).is_ok());

        manager.refresh_type_caches().unwrap();
        assert!(matches!(
            manager.create_relationship(&b, &a, "owns", Attributes::new()),
            Err(Error::InactiveRelationshipType(_))
        ));
    }

    #[test]
    fn test_type_mutations_need_refresh() {
        let manager = ModelManager::in_memory().unwrap();
        manager.create_node("warm", "object", Attributes::new()).unwrap();

        assert!(manager.delete_node_type("object").unwrap());
        assert!(manager.create_node("cached", "object", Attributes::new()).is_ok());

        manager.refresh_type_caches().unwrap();
        assert!(matches!(
            manager.create_node("fresh", "object", Attributes::new()),
            Err(Error::InactiveNodeType(_))
        ));
    }

    #[test]
    fn test_statistics() {
        let manager = ModelManager::in_memory().unwrap();
        manager.create_node("a", "object", Attributes::new()).unwrap();
        manager.create_node("b", "object", Attributes::new()).unwrap();
        manager.flush().unwrap();

        let stats = manager.get_statistics().unwrap();
        assert_eq!(stats.sync.total_nodes, 2);
        assert_eq!(stats.node_types_count, 2);
        assert_eq!(stats.relationship_types_count, builtin_relationship_types().len());
        assert_eq!(stats.writer.written, 2);
        assert_eq!(stats.dead_letters, 0);
    }
}
