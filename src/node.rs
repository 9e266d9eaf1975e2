//! Node - the universal persisted entity
//!
//! Every domain object, whatever its Rust type, is stored as one row of the
//! `nodes` table. The fixed columns cover identity, classification, naming,
//! placement and lifecycle flags; everything else lives in `attributes`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Free-form attribute map stored in the `attributes` JSON column
pub type Attributes = serde_json::Map<String, Value>;

/// Default access level for new nodes
pub const DEFAULT_ACCESS_LEVEL: &str = "normal";

/// A row of the `nodes` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Storage-internal surrogate key
    pub id: i64,
    /// Stable external identity, assigned when the object was constructed
    pub uuid: Uuid,
    /// Foreign key into `node_types`
    pub type_id: i64,
    /// Denormalized copy of the registry's type code
    pub type_code: String,
    pub name: String,
    pub description: String,
    /// Soft-delete marker
    pub is_active: bool,
    pub is_public: bool,
    pub access_level: String,
    pub location_id: Option<i64>,
    pub home_id: Option<i64>,
    /// UUID of the node referenced by `location_id`
    pub location_uuid: Option<Uuid>,
    /// UUID of the node referenced by `home_id`
    pub home_uuid: Option<Uuid>,
    pub attributes: Attributes,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// Get an attribute value
    pub fn get_attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Check whether the node carries a tag
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}] {}", self.name, self.type_code, self.uuid)?;
        if !self.is_active {
            write!(f, " (inactive)")?;
        }
        Ok(())
    }
}
