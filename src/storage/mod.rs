//! Storage Layer - SQLite-backed persistence
//!
//! System of record is SQLite with tables:
//! - node_types(type_code, type_name, typeclass, classname, module_path, ...)
//! - relationship_types(type_code, type_name, typeclass, is_directed, ...)
//! - nodes(uuid, type_id, type_code, name, attributes, tags, location_id, ...)
//! - relationships(uuid, type_id, type_code, source_id, target_id, attributes, weight, ...)

pub mod schema;
pub mod sqlite;

pub use sqlite::{DbStats, NewNode, NewRelationship, SqliteStore};
