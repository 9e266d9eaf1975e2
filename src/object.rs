//! DefaultObject - the shared entity façade
//!
//! A `DefaultObject` is a cheap, clonable handle to one in-memory object:
//! identity, attribute bag, tags, lifecycle flags and placement. Every
//! mutation bumps a per-object version and queues the object on the
//! deferred writer; the synchronizer records which version reached the
//! database, which is what [`SyncState`] reports.

use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::node::{Attributes, DEFAULT_ACCESS_LEVEL, Node};
use crate::registry::{ClassInfo, Entity, NodeClass};
use crate::writer::SyncWriter;
use crate::{Error, Result};

/// Keys backed by dedicated node columns; the attribute setters reject them
pub const RESERVED_KEYS: &[&str] = &[
    "name",
    "description",
    "is_active",
    "is_public",
    "access_level",
    "tags",
    "location_id",
    "home_id",
];

/// Where an object stands relative to its stored row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// No row written yet
    Unsynced,
    /// The row matches the latest in-memory version
    Synced,
    /// Mutated since the last write
    Stale,
    /// Soft-deleted; still queryable by UUID
    Inactive,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Unsynced => "unsynced",
            SyncState::Synced => "synced",
            SyncState::Stale => "stale",
            SyncState::Inactive => "inactive",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable part of an object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectState {
    pub name: String,
    pub description: String,
    pub attributes: Attributes,
    pub tags: Vec<String>,
    pub is_active: bool,
    pub is_public: bool,
    pub access_level: String,
    /// UUID of the containing object
    pub location: Option<Uuid>,
    pub home: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Consistent copy of an object taken for a write
#[derive(Debug, Clone)]
pub struct ObjectSnapshot {
    pub uuid: Uuid,
    pub type_code: String,
    pub version: u64,
    pub state: ObjectState,
}

struct ObjectInner {
    uuid: Uuid,
    type_code: String,
    typeclass: String,
    state: RwLock<ObjectState>,
    version: AtomicU64,
    persisted: AtomicU64,
    writer: Option<SyncWriter>,
}

/// Handle to an in-memory object; clones share state
#[derive(Clone)]
pub struct DefaultObject {
    inner: Arc<ObjectInner>,
}

/// Non-owning reference to a [`DefaultObject`]
#[derive(Clone)]
pub struct WeakObject(Weak<ObjectInner>);

impl WeakObject {
    pub fn upgrade(&self) -> Option<DefaultObject> {
        self.0.upgrade().map(|inner| DefaultObject { inner })
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl DefaultObject {
    /// Build a new object of `class`: fresh UUID, `defaults` overlaid with
    /// `attributes`. Schedules the first write when a writer is given.
    pub fn construct(
        class: ClassInfo,
        defaults: Attributes,
        name: &str,
        attributes: Attributes,
        writer: Option<SyncWriter>,
    ) -> Result<Self> {
        Self::construct_as(class.type_code, &class.typeclass(), defaults, name, attributes, writer)
    }

    /// Like [`construct`](Self::construct) for a type code bound to a class
    /// other than the class's own (several codes may share one class).
    pub fn construct_as(
        type_code: &str,
        typeclass: &str,
        defaults: Attributes,
        name: &str,
        attributes: Attributes,
        writer: Option<SyncWriter>,
    ) -> Result<Self> {
        check_reserved(attributes.keys())?;

        let mut merged = defaults;
        merged.extend(attributes);

        let now = Utc::now();
        let object = Self {
            inner: Arc::new(ObjectInner {
                uuid: Uuid::new_v4(),
                type_code: type_code.to_string(),
                typeclass: typeclass.to_string(),
                state: RwLock::new(ObjectState {
                    name: name.to_string(),
                    description: String::new(),
                    attributes: merged,
                    tags: Vec::new(),
                    is_active: true,
                    is_public: true,
                    access_level: DEFAULT_ACCESS_LEVEL.to_string(),
                    location: None,
                    home: None,
                    created_at: now,
                    updated_at: now,
                }),
                version: AtomicU64::new(1),
                persisted: AtomicU64::new(0),
                writer,
            }),
        };
        object.schedule_sync();
        Ok(object)
    }

    /// Rebuild an object from its stored row. Nothing is scheduled: the
    /// object starts out `Synced`.
    pub fn from_node(node: &Node, typeclass: &str, writer: Option<SyncWriter>) -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                uuid: node.uuid,
                type_code: node.type_code.clone(),
                typeclass: typeclass.to_string(),
                state: RwLock::new(ObjectState {
                    name: node.name.clone(),
                    description: node.description.clone(),
                    attributes: node.attributes.clone(),
                    tags: node.tags.clone(),
                    is_active: node.is_active,
                    is_public: node.is_public,
                    access_level: node.access_level.clone(),
                    location: node.location_uuid,
                    home: node.home_uuid,
                    created_at: node.created_at,
                    updated_at: node.updated_at,
                }),
                version: AtomicU64::new(1),
                persisted: AtomicU64::new(1),
                writer,
            }),
        }
    }

    // ========== Identity ==========

    pub fn uuid(&self) -> Uuid {
        self.inner.uuid
    }

    pub fn type_code(&self) -> &str {
        &self.inner.type_code
    }

    pub fn typeclass(&self) -> &str {
        &self.inner.typeclass
    }

    /// Whether two handles refer to the same object
    pub fn same_as(&self, other: &DefaultObject) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner.uuid == other.inner.uuid
    }

    /// Whether both handles share one in-memory state
    pub fn shares_state(&self, other: &DefaultObject) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn downgrade(&self) -> WeakObject {
        WeakObject(Arc::downgrade(&self.inner))
    }

    /// Address of the shared state; equal for clones of one handle
    pub(crate) fn handle_key(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    // ========== Write-back plumbing ==========

    /// Current in-memory version
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::SeqCst)
    }

    /// Highest version known to be stored (0 = never)
    pub fn persisted_version(&self) -> u64 {
        self.inner.persisted.load(Ordering::SeqCst)
    }

    /// Record that `version` reached the database
    pub fn mark_persisted(&self, version: u64) {
        self.inner.persisted.fetch_max(version, Ordering::SeqCst);
    }

    pub fn sync_state(&self) -> SyncState {
        let persisted = self.persisted_version();
        if persisted == 0 {
            SyncState::Unsynced
        } else if persisted < self.version() {
            SyncState::Stale
        } else if !self.is_active() {
            SyncState::Inactive
        } else {
            SyncState::Synced
        }
    }

    /// Copy the current state together with its version
    pub fn snapshot(&self) -> ObjectSnapshot {
        let state = self.inner.state.read();
        ObjectSnapshot {
            uuid: self.inner.uuid,
            type_code: self.inner.type_code.clone(),
            version: self.inner.version.load(Ordering::SeqCst),
            state: state.clone(),
        }
    }

    /// Queue this object on its writer, if it has one
    pub fn schedule_sync(&self) {
        if let Some(writer) = &self.inner.writer {
            writer.schedule(self.clone());
        }
    }

    pub fn writer(&self) -> Option<&SyncWriter> {
        self.inner.writer.as_ref()
    }

    /// Apply `f` to the state; when it reports a change, bump the version and
    /// `updated_at` and schedule a write.
    fn modify(&self, f: impl FnOnce(&mut ObjectState) -> bool) -> bool {
        let changed = {
            let mut state = self.inner.state.write();
            let changed = f(&mut state);
            if changed {
                state.updated_at = Utc::now();
                self.inner.version.fetch_add(1, Ordering::SeqCst);
            }
            changed
        };
        if changed {
            self.schedule_sync();
        }
        changed
    }

    fn read<R>(&self, f: impl FnOnce(&ObjectState) -> R) -> R {
        f(&self.inner.state.read())
    }

    // ========== Attributes ==========

    pub fn get_attribute(&self, key: &str) -> Option<Value> {
        self.read(|s| s.attributes.get(key).cloned())
    }

    /// Attribute value, or `default` if absent
    pub fn get_attribute_or(&self, key: &str, default: Value) -> Value {
        self.get_attribute(key).unwrap_or(default)
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.read(|s| s.attributes.contains_key(key))
    }

    pub fn set_attribute(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        check_reserved(std::iter::once(key))?;
        self.put_attribute(key, value.into());
        Ok(())
    }

    /// Set a key the caller knows is not reserved
    pub(crate) fn put_attribute(&self, key: &str, value: Value) {
        self.modify(|s| {
            s.attributes.insert(key.to_string(), value);
            true
        });
    }

    /// Remove an attribute, returning its old value
    pub fn remove_attribute(&self, key: &str) -> Option<Value> {
        let mut removed = None;
        self.modify(|s| {
            removed = s.attributes.remove(key);
            removed.is_some()
        });
        removed
    }

    /// Merge `attributes` into the bag as one mutation
    pub fn update_attributes(&self, attributes: Attributes) -> Result<()> {
        check_reserved(attributes.keys())?;
        self.merge_attributes(attributes);
        Ok(())
    }

    /// Merge keys the caller knows are not reserved
    pub(crate) fn merge_attributes(&self, attributes: Attributes) {
        if attributes.is_empty() {
            return;
        }
        self.modify(|s| {
            s.attributes.extend(attributes);
            true
        });
    }

    /// Copy of the whole attribute bag
    pub fn attributes(&self) -> Attributes {
        self.read(|s| s.attributes.clone())
    }

    // ========== Tags ==========

    pub fn add_tag(&self, tag: &str) -> bool {
        self.modify(|s| {
            if s.tags.iter().any(|t| t == tag) {
                false
            } else {
                s.tags.push(tag.to_string());
                true
            }
        })
    }

    pub fn remove_tag(&self, tag: &str) -> bool {
        self.modify(|s| {
            let before = s.tags.len();
            s.tags.retain(|t| t != tag);
            s.tags.len() != before
        })
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.read(|s| s.tags.iter().any(|t| t == tag))
    }

    pub fn tags(&self) -> Vec<String> {
        self.read(|s| s.tags.clone())
    }

    pub fn clear_tags(&self) -> bool {
        self.modify(|s| {
            let had_tags = !s.tags.is_empty();
            s.tags.clear();
            had_tags
        })
    }

    /// Replace the tag set (duplicates are dropped, first occurrence wins)
    pub fn set_tags<I, S>(&self, tags: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut deduped: Vec<String> = Vec::new();
        for tag in tags {
            let tag = tag.into();
            if !deduped.contains(&tag) {
                deduped.push(tag);
            }
        }
        self.modify(|s| {
            if s.tags == deduped {
                false
            } else {
                s.tags = deduped;
                true
            }
        })
    }

    // ========== Columns ==========

    pub fn name(&self) -> String {
        self.read(|s| s.name.clone())
    }

    pub fn set_name(&self, name: &str) {
        self.modify(|s| replace(&mut s.name, name.to_string()));
    }

    pub fn description(&self) -> String {
        self.read(|s| s.description.clone())
    }

    pub fn set_description(&self, description: &str) {
        self.modify(|s| replace(&mut s.description, description.to_string()));
    }

    pub fn is_active(&self) -> bool {
        self.read(|s| s.is_active)
    }

    pub fn set_active(&self, active: bool) {
        self.modify(|s| replace(&mut s.is_active, active));
    }

    pub fn is_public(&self) -> bool {
        self.read(|s| s.is_public)
    }

    pub fn set_public(&self, public: bool) {
        self.modify(|s| replace(&mut s.is_public, public));
    }

    pub fn access_level(&self) -> String {
        self.read(|s| s.access_level.clone())
    }

    pub fn set_access_level(&self, level: &str) {
        self.modify(|s| replace(&mut s.access_level, level.to_string()));
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.read(|s| s.created_at)
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.read(|s| s.updated_at)
    }

    // ========== Placement ==========

    /// UUID of the object this one is located in
    pub fn location(&self) -> Option<Uuid> {
        self.read(|s| s.location)
    }

    pub fn home(&self) -> Option<Uuid> {
        self.read(|s| s.home)
    }

    /// Place this object inside `target`. Refused for inactive targets and
    /// for the object itself.
    pub fn move_to(&self, target: &dyn Entity) -> bool {
        let Some(uuid) = self.placement_target(target) else {
            return false;
        };
        self.modify(|s| replace(&mut s.location, Some(uuid)));
        true
    }

    /// Set the home location, same rules as [`move_to`](Self::move_to)
    pub fn set_home(&self, target: &dyn Entity) -> bool {
        let Some(uuid) = self.placement_target(target) else {
            return false;
        };
        self.modify(|s| replace(&mut s.home, Some(uuid)));
        true
    }

    /// Move back home; `false` if no home is set
    pub fn go_home(&self) -> bool {
        let Some(home) = self.home() else {
            return false;
        };
        self.modify(|s| replace(&mut s.location, Some(home)));
        true
    }

    /// Take the object out of any location
    pub fn clear_location(&self) -> bool {
        self.modify(|s| s.location.take().is_some())
    }

    fn placement_target(&self, target: &dyn Entity) -> Option<Uuid> {
        let target = target.object();
        if target.uuid() == self.uuid() || !target.is_active() {
            return None;
        }
        Some(target.uuid())
    }

    // ========== Roles & permissions ==========

    /// A string-list attribute (non-string items are ignored)
    pub fn string_list(&self, key: &str) -> Vec<String> {
        self.read(|s| string_list(&s.attributes, key))
    }

    fn add_to_list(&self, key: &str, item: &str) -> bool {
        self.modify(|s| {
            let mut list = string_list(&s.attributes, key);
            if list.iter().any(|i| i == item) {
                return false;
            }
            list.push(item.to_string());
            s.attributes.insert(key.to_string(), Value::from(list));
            true
        })
    }

    fn remove_from_list(&self, key: &str, item: &str) -> bool {
        self.modify(|s| {
            let mut list = string_list(&s.attributes, key);
            let before = list.len();
            list.retain(|i| i != item);
            if list.len() == before {
                return false;
            }
            s.attributes.insert(key.to_string(), Value::from(list));
            true
        })
    }

    pub fn roles(&self) -> Vec<String> {
        self.string_list("roles")
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles().iter().any(|r| r == role)
    }

    pub fn add_role(&self, role: &str) -> bool {
        self.add_to_list("roles", role)
    }

    pub fn remove_role(&self, role: &str) -> bool {
        self.remove_from_list("roles", role)
    }

    pub fn permissions(&self) -> Vec<String> {
        self.string_list("permissions")
    }

    /// Exact permission membership
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions().iter().any(|p| p == permission)
    }

    pub fn add_permission(&self, permission: &str) -> bool {
        self.add_to_list("permissions", permission)
    }

    pub fn remove_permission(&self, permission: &str) -> bool {
        self.remove_from_list("permissions", permission)
    }

    /// Permission check with wildcards: `*` and `all` grant everything,
    /// `admin.*` grants `admin.users`, `admin.users.delete`, ...
    pub fn check_permission(&self, required: &str) -> bool {
        self.permissions().iter().any(|granted| {
            if granted == required || granted == "*" || granted == "all" {
                return true;
            }
            match granted.strip_suffix('*') {
                Some(prefix) if prefix.ends_with('.') => required.starts_with(prefix),
                _ => false,
            }
        })
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

fn check_reserved<K: AsRef<str>>(keys: impl IntoIterator<Item = K>) -> Result<()> {
    for key in keys {
        let key = key.as_ref();
        if RESERVED_KEYS.contains(&key) {
            return Err(Error::ReservedAttribute(key.to_string()));
        }
    }
    Ok(())
}

fn string_list(attributes: &Attributes, key: &str) -> Vec<String> {
    attributes
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

impl DefaultObject {
    /// JSON view of the object as API consumers see it
    pub fn to_json(&self) -> Value {
        let snapshot = self.snapshot();
        let state = snapshot.state;
        serde_json::json!({
            "uuid": snapshot.uuid,
            "type_code": snapshot.type_code,
            "typeclass": self.inner.typeclass,
            "name": state.name,
            "description": state.description,
            "attributes": state.attributes,
            "tags": state.tags,
            "is_active": state.is_active,
            "is_public": state.is_public,
            "access_level": state.access_level,
            "location": state.location,
            "home": state.home,
            "created_at": state.created_at,
            "updated_at": state.updated_at,
            "sync_state": self.sync_state(),
        })
    }
}

impl std::fmt::Debug for DefaultObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultObject")
            .field("uuid", &self.inner.uuid)
            .field("type_code", &self.inner.type_code)
            .field("name", &self.name())
            .field("version", &self.version())
            .finish()
    }
}

impl std::fmt::Display for DefaultObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}] {}", self.name(), self.inner.type_code, self.inner.uuid)
    }
}

impl Entity for DefaultObject {
    fn object(&self) -> &DefaultObject {
        self
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any + Send + Sync> {
        self
    }
}

impl NodeClass for DefaultObject {
    const CLASS: ClassInfo = ClassInfo {
        type_code: "object",
        type_name: "Object",
        classname: "DefaultObject",
        module_path: "campusgraph::object",
    };

    fn from_object(object: DefaultObject) -> Self {
        object
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap_or_default()
    }

    fn thing(name: &str) -> DefaultObject {
        DefaultObject::create_detached(name, Attributes::new()).unwrap()
    }

    #[test]
    fn test_construct_merges_defaults() {
        let obj = DefaultObject::construct_as(
            "room",
            "campusgraph::object::DefaultObject",
            attrs(json!({"capacity": 10, "lit": false})),
            "hall",
            attrs(json!({"lit": true})),
            None,
        )
        .unwrap();

        assert_eq!(obj.type_code(), "room");
        assert_eq!(obj.get_attribute("capacity"), Some(json!(10)));
        assert_eq!(obj.get_attribute("lit"), Some(json!(true)));
        assert_eq!(obj.sync_state(), SyncState::Unsynced);
    }

    #[test]
    fn test_reserved_keys_rejected() {
        let obj = thing("lamp");
        assert!(matches!(
            obj.set_attribute("name", "other"),
            Err(Error::ReservedAttribute(k)) if k == "name"
        ));
        assert!(obj.update_attributes(attrs(json!({"ok": 1, "tags": []}))).is_err());
        assert!(!obj.has_attribute("ok"));

        let result = DefaultObject::create_detached("x", attrs(json!({"is_active": false})));
        assert!(result.is_err());
    }

    #[test]
    fn test_versions_track_mutations() {
        let obj = thing("lamp");
        let v = obj.version();

        obj.set_attribute("lit", true).unwrap();
        assert_eq!(obj.version(), v + 1);

        assert!(obj.add_tag("light"));
        assert!(!obj.add_tag("light"));
        assert_eq!(obj.version(), v + 2);

        obj.set_name("lamp");
        assert_eq!(obj.version(), v + 2);

        obj.mark_persisted(obj.version());
        assert_eq!(obj.sync_state(), SyncState::Synced);
        obj.set_description("brass");
        assert_eq!(obj.sync_state(), SyncState::Stale);
        obj.mark_persisted(1);
        assert_eq!(obj.persisted_version(), v + 2);
    }

    #[test]
    fn test_weak_handle_follows_clones() {
        let obj = thing("lamp");
        let weak = obj.downgrade();
        let copy = obj.clone();

        assert!(weak.upgrade().is_some_and(|o| o.shares_state(&obj)));
        assert_eq!(obj.handle_key(), copy.handle_key());

        drop(obj);
        assert!(weak.is_alive());
        drop(copy);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_tags_are_a_set() {
        let obj = thing("box");
        assert!(obj.set_tags(["a", "b", "a"]));
        assert_eq!(obj.tags(), vec!["a", "b"]);
        assert!(!obj.set_tags(["a", "b"]));
        assert!(obj.remove_tag("a"));
        assert!(!obj.remove_tag("a"));
        assert!(obj.clear_tags());
        assert!(!obj.clear_tags());
    }

    #[test]
    fn test_placement_rules() {
        let room = thing("room");
        let home = thing("dorm");
        let item = thing("key");

        assert!(!item.move_to(&item));
        assert!(!item.go_home());

        assert!(item.move_to(&room));
        assert_eq!(item.location(), Some(room.uuid()));

        assert!(item.set_home(&home));
        assert!(item.go_home());
        assert_eq!(item.location(), Some(home.uuid()));

        room.set_active(false);
        assert!(!item.move_to(&room));
        assert_eq!(item.location(), Some(home.uuid()));
    }

    #[test]
    fn test_check_permission_wildcards() {
        let obj = thing("user");
        obj.add_permission("admin.*");
        obj.add_permission("read");

        assert!(obj.check_permission("read"));
        assert!(obj.check_permission("admin.users"));
        assert!(!obj.check_permission("administer"));
        assert!(!obj.check_permission("write"));

        obj.add_permission("*");
        assert!(obj.check_permission("write"));
        assert!(obj.remove_permission("*"));
        assert!(!obj.has_permission("*"));
    }

    #[test]
    fn test_roles() {
        let obj = thing("user");
        assert!(obj.add_role("builder"));
        assert!(!obj.add_role("builder"));
        assert!(obj.has_role("builder"));
        assert!(obj.remove_role("builder"));
        assert!(obj.roles().is_empty());
    }
}
