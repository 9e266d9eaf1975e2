//! Relationship - a typed, directed edge between two nodes
//!
//! The triple `(source_id, target_id, type_code)` identifies an edge.
//! Creating the same triple twice updates the existing row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::node::Attributes;

/// Default weight of a new edge
pub const DEFAULT_WEIGHT: i64 = 1;

/// A row of the `relationships` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: i64,
    pub uuid: Uuid,
    /// Foreign key into `relationship_types`
    pub type_id: i64,
    pub type_code: String,
    pub source_id: i64,
    pub target_id: i64,
    pub attributes: Attributes,
    pub is_active: bool,
    pub weight: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Relationship {
    /// Get an edge attribute
    pub fn get_attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Check whether `node_id` is either endpoint
    pub fn touches(&self, node_id: i64) -> bool {
        self.source_id == node_id || self.target_id == node_id
    }

    /// The endpoint opposite to `node_id`, if `node_id` is an endpoint
    pub fn other_end(&self, node_id: i64) -> Option<i64> {
        if self.source_id == node_id {
            Some(self.target_id)
        } else if self.target_id == node_id {
            Some(self.source_id)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Relationship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -[{}]-> {}", self.source_id, self.type_code, self.target_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_edge(source_id: i64, target_id: i64) -> Relationship {
        let now = Utc::now();
        Relationship {
            id: 1,
            uuid: Uuid::new_v4(),
            type_id: 1,
            type_code: "exit".to_string(),
            source_id,
            target_id,
            attributes: Attributes::new(),
            is_active: true,
            weight: DEFAULT_WEIGHT,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_other_end() {
        let edge = sample_edge(3, 7);
        assert_eq!(edge.other_end(3), Some(7));
        assert_eq!(edge.other_end(7), Some(3));
        assert_eq!(edge.other_end(9), None);
        assert!(edge.touches(7));
        assert!(!edge.touches(9));
    }

    #[test]
    fn test_display() {
        let edge = sample_edge(1, 2);
        assert_eq!(edge.to_string(), "1 -[exit]-> 2");
    }
}
