//! # Campusgraph - Graph-backed object store
//!
//! Domain objects (accounts, rooms, buildings, ...) live in memory as
//! attribute-rich entities and are transparently persisted into one uniform
//! relational layout.
//!
//! Campusgraph provides:
//! - A fixed `nodes` / `relationships` schema plus a type registry
//!   (`node_types`, `relationship_types`) in SQLite
//! - A class registry that rehydrates every stored row into the exact Rust
//!   type that created it
//! - `DefaultObject` / `DefaultAccount` entity façades whose mutations are
//!   written back by a debounced background writer
//! - A synchronizer translating objects to rows and back
//! - A caching `ModelManager` exposing CRUD, batch creation and search

pub mod storage;
pub mod node;
pub mod relationship;
pub mod registry;
pub mod object;
pub mod account;
pub mod writer;
pub mod sync;
pub mod manager;
pub mod config;
pub mod server;
pub mod ui;


// Re-exports for convenient access
pub use node::{Attributes, Node};
pub use relationship::Relationship;
pub use registry::{ClassInfo, ClassRegistry, Entity, NodeClass, NodeType, RelationshipType};
pub use object::{DefaultObject, SyncState};
pub use account::DefaultAccount;
pub use writer::{SyncWriter, WriterConfig};
pub use sync::GraphSynchronizer;
pub use manager::{ModelManager, NodeConfig};
pub use storage::SqliteStore;

/// Result type alias for Campusgraph operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Campusgraph operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Node type is inactive: {0}")]
    InactiveNodeType(String),

    #[error("Unknown relationship type: {0}")]
    UnknownRelationshipType(String),

    #[error("Relationship type is inactive: {0}")]
    InactiveRelationshipType(String),

    #[error("No class registered for typeclass: {0}")]
    UnknownClass(String),

    #[error("Row of type '{type_code}' belongs to {registered}, not {requested}")]
    ClassMismatch {
        type_code: String,
        registered: String,
        requested: String,
    },

    #[error("Invalid type code: {0}")]
    InvalidTypeCode(String),

    #[error("Attribute '{0}' is reserved; use its dedicated accessor")]
    ReservedAttribute(String),

    #[error("Deferred writer is not running")]
    WriterClosed,
}

impl Error {
    /// Whether the failure is an I/O-class error worth retrying.
    ///
    /// Resolution and reflection errors will fail the same way every time.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::Io(_))
    }

    /// Whether the failure comes from resolving a type code.
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            Error::UnknownNodeType(_)
                | Error::InactiveNodeType(_)
                | Error::UnknownRelationshipType(_)
                | Error::InactiveRelationshipType(_)
        )
    }
}
