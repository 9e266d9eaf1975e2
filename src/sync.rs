//! Graph Synchronizer - objects to rows and back
//!
//! Writes go object → `nodes` row, keyed by the object's UUID. Reads go the
//! other way: `type_code → node_types row → typeclass → class factory`.
//! Every public operation takes the store lock once, so a write and the
//! queries that depend on it never interleave with another writer.
//!
//! Objects are tracked by UUID while any handle to them is alive: rehydrating
//! a row whose object is already in memory returns that object, so every
//! caller mutates one shared state.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::node::{Attributes, Node};
use crate::object::{DefaultObject, WeakObject};
use crate::registry::{
    ClassEntry, ClassRegistry, Entity, NewNodeType, NewRelationshipType, NodeClass, NodeType,
    NodeTypeUpdate, RelationshipType, RelationshipTypeUpdate, validate_type_code,
};
use crate::relationship::{DEFAULT_WEIGHT, Relationship};
use crate::storage::sqlite::NewRelationship;
use crate::storage::{NewNode, SqliteStore};
use crate::writer::SyncWriter;
use crate::{Error, Result};

/// Default cap on `search_objects` results
pub const DEFAULT_SEARCH_LIMIT: usize = 100;

/// Size from which the live-object map drops dead entries
const LIVE_PRUNE_THRESHOLD: usize = 1024;

/// Row counts reported by [`GraphSynchronizer::get_sync_stats`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStats {
    pub total_nodes: usize,
    pub active_nodes: usize,
    pub total_relationships: usize,
    pub active_relationships: usize,
    pub sync_timestamp: DateTime<Utc>,
}

/// In-memory objects by UUID
#[derive(Default)]
struct LiveObjects {
    handles: HashMap<Uuid, WeakObject>,
}

impl LiveObjects {
    fn get(&self, uuid: &Uuid) -> Option<DefaultObject> {
        self.handles.get(uuid).and_then(WeakObject::upgrade)
    }

    /// Track `object` unless another live handle already holds its UUID
    fn track(&mut self, object: &DefaultObject) {
        if self.get(&object.uuid()).is_some() {
            return;
        }
        let len = self.handles.len();
        if len >= LIVE_PRUNE_THRESHOLD && len.is_power_of_two() {
            self.handles.retain(|_, handle| handle.is_alive());
        }
        self.handles.insert(object.uuid(), object.downgrade());
    }
}

pub struct GraphSynchronizer {
    store: Mutex<SqliteStore>,
    classes: RwLock<ClassRegistry>,
    live: Mutex<LiveObjects>,
    writer: OnceLock<SyncWriter>,
    search_limit: usize,
}

impl GraphSynchronizer {
    pub fn new(store: SqliteStore, classes: ClassRegistry) -> Self {
        Self {
            store: Mutex::new(store),
            classes: RwLock::new(classes),
            live: Mutex::new(LiveObjects::default()),
            writer: OnceLock::new(),
            search_limit: DEFAULT_SEARCH_LIMIT,
        }
    }

    pub fn with_search_limit(mut self, limit: usize) -> Self {
        self.search_limit = limit;
        self
    }

    pub fn search_limit(&self) -> usize {
        self.search_limit
    }

    /// Writer handed to every object this synchronizer rehydrates
    pub fn attach_writer(&self, writer: SyncWriter) {
        if self.writer.set(writer).is_err() {
            warn!("synchronizer already has a writer; ignoring the new one");
        }
    }

    pub fn writer(&self) -> Option<&SyncWriter> {
        self.writer.get()
    }

    /// Run `f` with exclusive access to the store
    pub fn with_store<R>(&self, f: impl FnOnce(&mut SqliteStore) -> R) -> R {
        f(&mut self.store.lock())
    }

    // ========== Classes ==========

    /// Add `T` to the class registry without touching `node_types`
    pub fn register_class<T: NodeClass>(&self) {
        self.classes.write().register::<T>();
    }

    /// Add `T` to the class registry and upsert its `node_types` row
    pub fn register_class_type<T: NodeClass>(&self) -> Result<NodeType> {
        validate_type_code(T::CLASS.type_code)?;
        self.register_class::<T>();
        self.store.lock().upsert_node_type(&NewNodeType::from_class(&T::CLASS))
    }

    pub fn class_for_typeclass(&self, typeclass: &str) -> Option<ClassEntry> {
        self.classes.read().get(typeclass).cloned()
    }

    pub fn registered_classes(&self) -> Vec<ClassEntry> {
        self.classes.read().entries().cloned().collect()
    }

    /// Resolve an active type code to its row and class
    pub fn resolve_class(&self, type_code: &str) -> Result<(NodeType, ClassEntry)> {
        let node_type = active_node_type(&self.store.lock(), type_code)?;
        let entry = self
            .class_for_typeclass(&node_type.typeclass)
            .ok_or_else(|| Error::UnknownClass(node_type.typeclass.clone()))?;
        Ok((node_type, entry))
    }

    // ========== Object → Row ==========

    /// Persist an object's current state. Used by the deferred writer.
    pub fn write_object(&self, object: &DefaultObject) -> Result<Node> {
        let store = self.store.lock();
        self.write_object_locked(&store, object)
    }

    /// Insert or overwrite the row for `entity`
    pub fn sync_object_to_node(&self, entity: &dyn Entity) -> Result<Node> {
        self.write_object(entity.object())
    }

    /// Best-effort sync; failures are logged and skipped
    pub fn sync_objects_batch(&self, entities: &[&dyn Entity]) -> Vec<Node> {
        let store = self.store.lock();
        entities
            .iter()
            .filter_map(|entity| {
                let object = entity.object();
                self.write_object_locked(&store, object)
                    .inspect_err(|e| warn!(uuid = %object.uuid(), error = %e, "batch sync skipped object"))
                    .ok()
            })
            .collect()
    }

    /// Write the row unless it already holds this handle's latest version.
    /// While a placement target has no row the slot is stored as NULL and
    /// the object stays `Stale`, so the next write tries again.
    fn write_object_locked(&self, store: &SqliteStore, object: &DefaultObject) -> Result<Node> {
        let snapshot = object.snapshot();
        let existing = store.get_node_by_uuid(&snapshot.uuid)?;

        if let Some(node) = &existing {
            if snapshot.version <= object.persisted_version() {
                return Ok(node.clone());
            }
        }

        let location_id = resolve_placement(store, snapshot.uuid, "location", snapshot.state.location)?;
        let home_id = resolve_placement(store, snapshot.uuid, "home", snapshot.state.home)?;
        let state = snapshot.state;
        let placed = location_id.is_some() == state.location.is_some() && home_id.is_some() == state.home.is_some();

        let (type_id, type_code, created_at) = match &existing {
            Some(current) => (current.type_id, current.type_code.clone(), current.created_at),
            None => {
                let node_type = active_node_type(store, &snapshot.type_code)?;
                (node_type.id, node_type.type_code, state.created_at)
            }
        };
        let row = NewNode {
            uuid: snapshot.uuid,
            type_id,
            type_code,
            name: state.name,
            description: state.description,
            is_active: state.is_active,
            is_public: state.is_public,
            access_level: state.access_level,
            location_id,
            home_id,
            attributes: state.attributes,
            tags: state.tags,
            created_at,
            updated_at: Utc::now(),
        };
        let node = match existing {
            Some(current) => store.update_node(current.id, &row)?,
            None => store.insert_node(&row)?,
        };

        if placed {
            object.mark_persisted(snapshot.version);
        } else {
            // row lags the object until the placement target is written
            object.mark_persisted(snapshot.version - 1);
        }
        self.live.lock().track(object);
        debug!(uuid = %node.uuid, type_code = %node.type_code, version = snapshot.version, placed, "node written");
        Ok(node)
    }

    // ========== Row → Object ==========

    /// Rebuild the row as a `T`. Fails if the row's type is unknown or
    /// inactive, or if `T` is not the class registered for it.
    pub fn sync_node_to_object<T: NodeClass>(&self, node: &Node) -> Result<T> {
        let node_type = active_node_type(&self.store.lock(), &node.type_code)?;
        let requested = T::CLASS.typeclass();
        if node_type.typeclass != requested {
            return Err(Error::ClassMismatch {
                type_code: node.type_code.clone(),
                registered: node_type.typeclass,
                requested,
            });
        }
        Ok(T::from_object(self.live_object(node, &requested)))
    }

    /// The in-memory object for the row, built from the row if none is alive
    fn live_object(&self, node: &Node, typeclass: &str) -> DefaultObject {
        let mut live = self.live.lock();
        if let Some(object) = live.get(&node.uuid).filter(|o| o.typeclass() == typeclass) {
            return object;
        }
        let object = DefaultObject::from_node(node, typeclass, self.writer.get().cloned());
        live.track(&object);
        object
    }

    /// Rebuild the row as whatever class its type is bound to
    pub fn rehydrate(&self, node: &Node) -> Result<Box<dyn Entity>> {
        let store = self.store.lock();
        self.rehydrate_locked(&store, node)
    }

    /// Best-effort rehydration; failures are logged and skipped
    pub fn rehydrate_batch(&self, nodes: &[Node]) -> Vec<Box<dyn Entity>> {
        let store = self.store.lock();
        self.rehydrate_all(&store, nodes.iter())
    }

    fn rehydrate_locked(&self, store: &SqliteStore, node: &Node) -> Result<Box<dyn Entity>> {
        let node_type = active_node_type(store, &node.type_code)?;
        let entry = self
            .class_for_typeclass(&node_type.typeclass)
            .ok_or_else(|| Error::UnknownClass(node_type.typeclass.clone()))?;
        let object = self.live_object(node, &node_type.typeclass);
        Ok(entry.instantiate(object))
    }

    fn rehydrate_all<'a>(
        &self,
        store: &SqliteStore,
        nodes: impl Iterator<Item = &'a Node>,
    ) -> Vec<Box<dyn Entity>> {
        nodes
            .filter_map(|node| {
                self.rehydrate_locked(store, node)
                    .inspect_err(|e| warn!(uuid = %node.uuid, type_code = %node.type_code, error = %e, "skipping node"))
                    .ok()
            })
            .collect()
    }

    // ========== Relationships ==========

    /// Create the edge `source -[type_code]-> target`, or merge `attributes`
    /// into the existing one. Both endpoints are written first.
    pub fn create_relationship(
        &self,
        source: &dyn Entity,
        target: &dyn Entity,
        type_code: &str,
        attributes: Attributes,
    ) -> Result<Relationship> {
        let store = self.store.lock();
        let rel_type = active_relationship_type(&store, type_code)?;
        self.create_relationship_locked(&store, source, target, rel_type, attributes)
    }

    /// [`create_relationship`](Self::create_relationship) with an already
    /// resolved type row
    pub fn create_typed_relationship(
        &self,
        source: &dyn Entity,
        target: &dyn Entity,
        rel_type: RelationshipType,
        attributes: Attributes,
    ) -> Result<Relationship> {
        let store = self.store.lock();
        self.create_relationship_locked(&store, source, target, rel_type, attributes)
    }

    fn create_relationship_locked(
        &self,
        store: &SqliteStore,
        source: &dyn Entity,
        target: &dyn Entity,
        rel_type: RelationshipType,
        attributes: Attributes,
    ) -> Result<Relationship> {
        let source_node = self.write_object_locked(store, source.object())?;
        let target_node = self.write_object_locked(store, target.object())?;

        match store.find_relationship(source_node.id, target_node.id, &rel_type.type_code)? {
            Some(existing) => {
                if existing.is_active {
                    debug!(id = existing.id, "relationship exists; merging attributes");
                } else {
                    debug!(id = existing.id, "reactivating removed relationship");
                }
                let mut merged = existing.attributes;
                merged.extend(attributes);
                store
                    .update_relationship(existing.id, &merged, existing.weight, true)?
                    .ok_or_else(|| rusqlite::Error::QueryReturnedNoRows.into())
            }
            None => store.insert_relationship(&NewRelationship {
                type_id: rel_type.id,
                type_code: rel_type.type_code,
                source_id: source_node.id,
                target_id: target_node.id,
                attributes,
                weight: DEFAULT_WEIGHT,
            }),
        }
    }

    /// Active edges where the object is source or target
    pub fn get_object_relationships(
        &self,
        entity: &dyn Entity,
        type_code: Option<&str>,
    ) -> Result<Vec<Relationship>> {
        let store = self.store.lock();
        let node = self.write_object_locked(&store, entity.object())?;
        store.get_relationships_for_node(node.id, type_code)
    }

    /// Active edges touching the node with `uuid`; empty if it has no row
    pub fn get_relationships_by_uuid(&self, uuid: &Uuid, type_code: Option<&str>) -> Result<Vec<Relationship>> {
        let store = self.store.lock();
        match store.node_id_for_uuid(uuid)? {
            Some(id) => store.get_relationships_for_node(id, type_code),
            None => Ok(Vec::new()),
        }
    }

    /// The active edge `source -[type_code]-> target`, if any
    pub fn get_relationship_between(
        &self,
        source: &dyn Entity,
        target: &dyn Entity,
        type_code: &str,
    ) -> Result<Option<Relationship>> {
        let store = self.store.lock();
        Ok(find_edge(&store, source, target, type_code)?.filter(|r| r.is_active))
    }

    /// Soft-remove the edge; `false` if there was no active one
    pub fn remove_relationship(&self, source: &dyn Entity, target: &dyn Entity, type_code: &str) -> Result<bool> {
        let store = self.store.lock();
        match find_edge(&store, source, target, type_code)? {
            Some(rel) if rel.is_active => store.deactivate_relationship(rel.id),
            _ => Ok(false),
        }
    }

    /// Merge attributes into edge `id` and optionally change its weight
    pub fn update_relationship(
        &self,
        id: i64,
        attributes: Attributes,
        weight: Option<i64>,
    ) -> Result<Option<Relationship>> {
        let store = self.store.lock();
        let Some(existing) = store.get_relationship(id)? else {
            return Ok(None);
        };
        let mut merged = existing.attributes;
        merged.extend(attributes);
        store.update_relationship(id, &merged, weight.unwrap_or(existing.weight), existing.is_active)
    }

    /// Soft-remove edge `id`
    pub fn delete_relationship(&self, id: i64) -> Result<bool> {
        self.store.lock().deactivate_relationship(id)
    }

    // ========== Queries ==========

    /// Active objects whose attribute `key` matches `value`. Values match
    /// when their text forms are equal: strings by content, everything else
    /// by its JSON text, so `"1"` finds a stored `1` and `"true"` a stored
    /// `true`.
    pub fn find_objects_by_attribute(
        &self,
        key: &str,
        value: &Value,
        type_code: Option<&str>,
    ) -> Result<Vec<Box<dyn Entity>>> {
        let store = self.store.lock();
        let nodes = store.find_nodes_with_attribute(key, type_code)?;
        let wanted = value_text(value);
        Ok(self.rehydrate_all(
            &store,
            nodes
                .iter()
                .filter(|n| n.get_attribute(key).is_some_and(|v| value_text(v) == wanted)),
        ))
    }

    /// Active objects carrying `tag`
    pub fn find_objects_by_tag(&self, tag: &str, type_code: Option<&str>) -> Result<Vec<Box<dyn Entity>>> {
        let store = self.store.lock();
        let nodes = store.find_nodes_by_tag(tag, type_code)?;
        Ok(self.rehydrate_all(&store, nodes.iter()))
    }

    /// Case-insensitive substring search over name, description and attributes
    pub fn search_objects(&self, text: &str, type_code: Option<&str>) -> Result<Vec<Box<dyn Entity>>> {
        let store = self.store.lock();
        let nodes = store.search_nodes(text, type_code, self.search_limit)?;
        Ok(self.rehydrate_all(&store, nodes.iter()))
    }

    pub fn get_node_by_uuid(&self, uuid: &Uuid) -> Result<Option<Node>> {
        self.store.lock().get_node_by_uuid(uuid)
    }

    pub fn get_node_by_name(&self, name: &str, type_code: Option<&str>) -> Result<Option<Node>> {
        self.store.lock().get_node_by_name(name, type_code)
    }

    /// All nodes of a type, active or not
    pub fn get_nodes_by_type(&self, type_code: &str) -> Result<Vec<Node>> {
        self.store.lock().get_nodes_by_type(type_code, false)
    }

    pub fn get_active_nodes_by_type(&self, type_code: &str) -> Result<Vec<Node>> {
        self.store.lock().get_nodes_by_type(type_code, true)
    }

    // ========== Maintenance ==========

    pub fn get_sync_stats(&self) -> Result<SyncStats> {
        let stats = self.store.lock().stats()?;
        Ok(SyncStats {
            total_nodes: stats.nodes,
            active_nodes: stats.active_nodes,
            total_relationships: stats.relationships,
            active_relationships: stats.active_relationships,
            sync_timestamp: Utc::now(),
        })
    }

    /// Soft-delete active nodes no active relationship touches
    pub fn cleanup_orphaned_nodes(&self) -> Result<usize> {
        let count = self.store.lock().deactivate_orphaned_nodes()?;
        info!(count, "deactivated orphaned nodes");
        Ok(count)
    }

    // ========== Node Type Registry ==========

    pub fn create_node_type(&self, new: &NewNodeType) -> Result<NodeType> {
        validate_type_code(&new.type_code)?;
        self.store.lock().insert_node_type(new)
    }

    pub fn get_node_type_by_code(&self, type_code: &str) -> Result<Option<NodeType>> {
        self.store.lock().get_node_type_by_code(type_code)
    }

    pub fn get_all_node_types(&self, active_only: bool) -> Result<Vec<NodeType>> {
        self.store.lock().get_all_node_types(active_only)
    }

    pub fn update_node_type(&self, type_code: &str, update: &NodeTypeUpdate) -> Result<Option<NodeType>> {
        self.store.lock().update_node_type(type_code, update)
    }

    /// Deactivate a node type; its nodes can no longer be rehydrated
    pub fn delete_node_type(&self, type_code: &str) -> Result<bool> {
        self.store.lock().set_node_type_active(type_code, false)
    }

    // ========== Relationship Type Registry ==========

    pub fn create_relationship_type(&self, new: &NewRelationshipType) -> Result<RelationshipType> {
        validate_type_code(&new.type_code)?;
        self.store.lock().insert_relationship_type(new)
    }

    /// Create the type unless its code is already registered
    pub fn ensure_relationship_type(&self, new: &NewRelationshipType) -> Result<RelationshipType> {
        validate_type_code(&new.type_code)?;
        self.store.lock().ensure_relationship_type(new)
    }

    pub fn get_relationship_type_by_code(&self, type_code: &str) -> Result<Option<RelationshipType>> {
        self.store.lock().get_relationship_type_by_code(type_code)
    }

    pub fn get_all_relationship_types(&self, active_only: bool) -> Result<Vec<RelationshipType>> {
        self.store.lock().get_all_relationship_types(active_only)
    }

    pub fn update_relationship_type(
        &self,
        type_code: &str,
        update: &RelationshipTypeUpdate,
    ) -> Result<Option<RelationshipType>> {
        self.store.lock().update_relationship_type(type_code, update)
    }

    pub fn delete_relationship_type(&self, type_code: &str) -> Result<bool> {
        self.store.lock().set_relationship_type_active(type_code, false)
    }
}

impl std::fmt::Debug for GraphSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphSynchronizer")
            .field("classes", &self.classes.read().len())
            .field("search_limit", &self.search_limit)
            .finish()
    }
}

fn active_node_type(store: &SqliteStore, type_code: &str) -> Result<NodeType> {
    match store.get_node_type_by_code(type_code)? {
        Some(t) if t.is_active => Ok(t),
        Some(_) => Err(Error::InactiveNodeType(type_code.to_string())),
        None => Err(Error::UnknownNodeType(type_code.to_string())),
    }
}

fn active_relationship_type(store: &SqliteStore, type_code: &str) -> Result<RelationshipType> {
    match store.get_relationship_type_by_code(type_code)? {
        Some(t) if t.is_active => Ok(t),
        Some(_) => Err(Error::InactiveRelationshipType(type_code.to_string())),
        None => Err(Error::UnknownRelationshipType(type_code.to_string())),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn resolve_placement(
    store: &SqliteStore,
    owner: Uuid,
    slot: &str,
    target: Option<Uuid>,
) -> Result<Option<i64>> {
    let Some(target) = target else {
        return Ok(None);
    };
    let id = store.node_id_for_uuid(&target)?;
    if id.is_none() {
        warn!(%owner, %target, "{} target has no row yet; storing NULL", slot);
    }
    Ok(id)
}

fn find_edge(
    store: &SqliteStore,
    source: &dyn Entity,
    target: &dyn Entity,
    type_code: &str,
) -> Result<Option<Relationship>> {
    let source_id = store.node_id_for_uuid(&source.object().uuid())?;
    let target_id = store.node_id_for_uuid(&target.object().uuid())?;
    match (source_id, target_id) {
        (Some(s), Some(t)) => store.find_relationship(s, t, type_code),
        _ => Ok(None),
    }
}
