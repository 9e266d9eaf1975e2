//! SQLite storage implementation

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use super::schema;
use crate::Result;
use crate::node::{Attributes, Node};
use crate::registry::{
    NewNodeType, NewRelationshipType, NodeType, NodeTypeUpdate, RelationshipType,
    RelationshipTypeUpdate,
};
use crate::relationship::Relationship;

const NODE_SELECT: &str = r#"
    SELECT n.id, n.uuid, n.type_id, n.type_code, n.name, n.description,
           n.is_active, n.is_public, n.access_level,
           n.location_id, n.home_id, loc.uuid, home.uuid,
           n.attributes, n.tags, n.created_at, n.updated_at
    FROM nodes n
    LEFT JOIN nodes loc ON loc.id = n.location_id
    LEFT JOIN nodes home ON home.id = n.home_id
"#;

const RELATIONSHIP_SELECT: &str = r#"
    SELECT id, uuid, type_id, type_code, source_id, target_id,
           attributes, is_active, weight, created_at, updated_at
    FROM relationships
"#;

const NODE_TYPE_SELECT: &str = r#"
    SELECT id, type_code, type_name, typeclass, classname, module_path,
           description, schema_definition, is_active
    FROM node_types
"#;

const RELATIONSHIP_TYPE_SELECT: &str = r#"
    SELECT id, type_code, type_name, typeclass, description, schema_definition,
           is_directed, is_symmetric, is_transitive, is_active
    FROM relationship_types
"#;

/// Column values written for a node row (insert and whole-record update)
#[derive(Debug, Clone)]
pub struct NewNode {
    pub uuid: Uuid,
    pub type_id: i64,
    pub type_code: String,
    pub name: String,
    pub description: String,
    pub is_active: bool,
    pub is_public: bool,
    pub access_level: String,
    pub location_id: Option<i64>,
    pub home_id: Option<i64>,
    pub attributes: Attributes,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Column values for a new relationship row
#[derive(Debug, Clone)]
pub struct NewRelationship {
    pub type_id: i64,
    pub type_code: String,
    pub source_id: i64,
    pub target_id: i64,
    pub attributes: Attributes,
    pub weight: i64,
}

/// SQLite-backed storage for the object graph
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Initialize the database schema
    fn initialize_schema(&self) -> Result<()> {
        for pragma in schema::PRAGMAS {
            self.conn.execute_batch(pragma)?;
        }
        for stmt in schema::all_schema_statements() {
            self.conn.execute(stmt, [])?;
        }
        Ok(())
    }

    /// Raw connection, for callers that need SQL this layer doesn't cover
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ========== Node Type Operations ==========

    /// Insert a node type; fails if the type code already exists
    pub fn insert_node_type(&self, new: &NewNodeType) -> Result<NodeType> {
        self.conn.execute(
            r#"
            INSERT INTO node_types (type_code, type_name, typeclass, classname, module_path, description, schema_definition, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)
            "#,
            params![
                new.type_code,
                new.type_name,
                new.typeclass,
                new.classname,
                new.module_path,
                new.description,
                json_opt(&new.schema_definition)?,
            ],
        )?;
        self.fetch_node_type(self.conn.last_insert_rowid())
    }

    /// Insert a node type, or overwrite and reactivate the existing row
    pub fn upsert_node_type(&self, new: &NewNodeType) -> Result<NodeType> {
        self.conn.execute(
            r#"
            INSERT INTO node_types (type_code, type_name, typeclass, classname, module_path, description, schema_definition, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)
            ON CONFLICT(type_code) DO UPDATE SET
                type_name = excluded.type_name,
                typeclass = excluded.typeclass,
                classname = excluded.classname,
                module_path = excluded.module_path,
                description = COALESCE(excluded.description, node_types.description),
                schema_definition = COALESCE(excluded.schema_definition, node_types.schema_definition),
                is_active = 1
            "#,
            params![
                new.type_code,
                new.type_name,
                new.typeclass,
                new.classname,
                new.module_path,
                new.description,
                json_opt(&new.schema_definition)?,
            ],
        )?;
        self.get_node_type_by_code(&new.type_code)?
            .ok_or_else(|| rusqlite::Error::QueryReturnedNoRows.into())
    }

    /// Get a node type by code, whatever its state
    pub fn get_node_type_by_code(&self, type_code: &str) -> Result<Option<NodeType>> {
        self.conn
            .query_row(
                &format!("{NODE_TYPE_SELECT} WHERE type_code = ?1"),
                [type_code],
                |row| self.row_to_node_type(row),
            )
            .optional()
            .map_err(Into::into)
    }

    /// List node types ordered by code
    pub fn get_all_node_types(&self, active_only: bool) -> Result<Vec<NodeType>> {
        let sql = if active_only {
            format!("{NODE_TYPE_SELECT} WHERE is_active = 1 ORDER BY type_code")
        } else {
            format!("{NODE_TYPE_SELECT} ORDER BY type_code")
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| self.row_to_node_type(row))?;
        Ok(collect_logged(rows, "node type"))
    }

    /// Apply a partial update; returns the updated row, `None` if no such code
    pub fn update_node_type(&self, type_code: &str, update: &NodeTypeUpdate) -> Result<Option<NodeType>> {
        let changed = self.conn.execute(
            r#"
            UPDATE node_types SET
                type_name = COALESCE(?2, type_name),
                typeclass = COALESCE(?3, typeclass),
                classname = COALESCE(?4, classname),
                module_path = COALESCE(?5, module_path),
                description = COALESCE(?6, description),
                schema_definition = COALESCE(?7, schema_definition),
                is_active = COALESCE(?8, is_active)
            WHERE type_code = ?1
            "#,
            params![
                type_code,
                update.type_name,
                update.typeclass,
                update.classname,
                update.module_path,
                update.description,
                json_opt(&update.schema_definition)?,
                update.is_active,
            ],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_node_type_by_code(type_code)
    }

    /// Flip `is_active` on a node type; `false` if no such code
    pub fn set_node_type_active(&self, type_code: &str, active: bool) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE node_types SET is_active = ?2 WHERE type_code = ?1",
            params![type_code, active],
        )?;
        Ok(changed > 0)
    }

    fn fetch_node_type(&self, id: i64) -> Result<NodeType> {
        self.conn
            .query_row(&format!("{NODE_TYPE_SELECT} WHERE id = ?1"), [id], |row| {
                self.row_to_node_type(row)
            })
            .map_err(Into::into)
    }

    fn row_to_node_type(&self, row: &rusqlite::Row) -> rusqlite::Result<NodeType> {
        Ok(NodeType {
            id: row.get(0)?,
            type_code: row.get(1)?,
            type_name: row.get(2)?,
            typeclass: row.get(3)?,
            classname: row.get(4)?,
            module_path: row.get(5)?,
            description: row.get(6)?,
            schema_definition: parse_json_opt(row, 7)?,
            is_active: row.get(8)?,
        })
    }

    // ========== Relationship Type Operations ==========

    /// Insert a relationship type; fails if the type code already exists
    pub fn insert_relationship_type(&self, new: &NewRelationshipType) -> Result<RelationshipType> {
        self.conn.execute(
            r#"
            INSERT INTO relationship_types (type_code, type_name, typeclass, description, schema_definition, is_directed, is_symmetric, is_transitive, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1)
            "#,
            params![
                new.type_code,
                new.type_name,
                new.typeclass,
                new.description,
                json_opt(&new.schema_definition)?,
                new.is_directed,
                new.is_symmetric,
                new.is_transitive,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row(&format!("{RELATIONSHIP_TYPE_SELECT} WHERE id = ?1"), [id], |row| {
                self.row_to_relationship_type(row)
            })
            .map_err(Into::into)
    }

    /// Insert a relationship type unless the code is already registered
    pub fn ensure_relationship_type(&self, new: &NewRelationshipType) -> Result<RelationshipType> {
        match self.get_relationship_type_by_code(&new.type_code)? {
            Some(existing) => Ok(existing),
            None => self.insert_relationship_type(new),
        }
    }

    /// Get a relationship type by code, whatever its state
    pub fn get_relationship_type_by_code(&self, type_code: &str) -> Result<Option<RelationshipType>> {
        self.conn
            .query_row(
                &format!("{RELATIONSHIP_TYPE_SELECT} WHERE type_code = ?1"),
                [type_code],
                |row| self.row_to_relationship_type(row),
            )
            .optional()
            .map_err(Into::into)
    }

    /// List relationship types ordered by code
    pub fn get_all_relationship_types(&self, active_only: bool) -> Result<Vec<RelationshipType>> {
        let sql = if active_only {
            format!("{RELATIONSHIP_TYPE_SELECT} WHERE is_active = 1 ORDER BY type_code")
        } else {
            format!("{RELATIONSHIP_TYPE_SELECT} ORDER BY type_code")
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| self.row_to_relationship_type(row))?;
        Ok(collect_logged(rows, "relationship type"))
    }

    /// Apply a partial update; returns the updated row, `None` if no such code
    pub fn update_relationship_type(
        &self,
        type_code: &str,
        update: &RelationshipTypeUpdate,
    ) -> Result<Option<RelationshipType>> {
        let changed = self.conn.execute(
            r#"
            UPDATE relationship_types SET
                type_name = COALESCE(?2, type_name),
                typeclass = COALESCE(?3, typeclass),
                description = COALESCE(?4, description),
                schema_definition = COALESCE(?5, schema_definition),
                is_directed = COALESCE(?6, is_directed),
                is_symmetric = COALESCE(?7, is_symmetric),
                is_transitive = COALESCE(?8, is_transitive),
                is_active = COALESCE(?9, is_active)
            WHERE type_code = ?1
            "#,
            params![
                type_code,
                update.type_name,
                update.typeclass,
                update.description,
                json_opt(&update.schema_definition)?,
                update.is_directed,
                update.is_symmetric,
                update.is_transitive,
                update.is_active,
            ],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_relationship_type_by_code(type_code)
    }

    /// Flip `is_active` on a relationship type; `false` if no such code
    pub fn set_relationship_type_active(&self, type_code: &str, active: bool) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE relationship_types SET is_active = ?2 WHERE type_code = ?1",
            params![type_code, active],
        )?;
        Ok(changed > 0)
    }

    fn row_to_relationship_type(&self, row: &rusqlite::Row) -> rusqlite::Result<RelationshipType> {
        Ok(RelationshipType {
            id: row.get(0)?,
            type_code: row.get(1)?,
            type_name: row.get(2)?,
            typeclass: row.get(3)?,
            description: row.get(4)?,
            schema_definition: parse_json_opt(row, 5)?,
            is_directed: row.get(6)?,
            is_symmetric: row.get(7)?,
            is_transitive: row.get(8)?,
            is_active: row.get(9)?,
        })
    }

    // ========== Node Operations ==========

    /// Insert a node row and return it as stored
    pub fn insert_node(&self, node: &NewNode) -> Result<Node> {
        self.conn.execute(
            r#"
            INSERT INTO nodes (uuid, type_id, type_code, name, description, is_active, is_public, access_level,
                               location_id, home_id, attributes, tags, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                node.uuid.to_string(),
                node.type_id,
                node.type_code,
                node.name,
                node.description,
                node.is_active,
                node.is_public,
                node.access_level,
                node.location_id,
                node.home_id,
                serde_json::to_string(&node.attributes)?,
                serde_json::to_string(&node.tags)?,
                node.created_at,
                node.updated_at,
            ],
        )?;
        self.fetch_node(self.conn.last_insert_rowid())
    }

    /// Overwrite the mutable columns of node `id`.
    ///
    /// `uuid`, `type_id`, `type_code` and `created_at` are never rewritten.
    pub fn update_node(&self, id: i64, node: &NewNode) -> Result<Node> {
        self.conn.execute(
            r#"
            UPDATE nodes SET
                name = ?2, description = ?3, is_active = ?4, is_public = ?5, access_level = ?6,
                location_id = ?7, home_id = ?8, attributes = ?9, tags = ?10, updated_at = ?11
            WHERE id = ?1
            "#,
            params![
                id,
                node.name,
                node.description,
                node.is_active,
                node.is_public,
                node.access_level,
                node.location_id,
                node.home_id,
                serde_json::to_string(&node.attributes)?,
                serde_json::to_string(&node.tags)?,
                node.updated_at,
            ],
        )?;
        self.fetch_node(id)
    }

    /// Get a node by surrogate id, whatever its state
    pub fn get_node(&self, id: i64) -> Result<Option<Node>> {
        self.conn
            .query_row(&format!("{NODE_SELECT} WHERE n.id = ?1"), [id], |row| {
                self.row_to_node(row)
            })
            .optional()
            .map_err(Into::into)
    }

    /// Get a node by UUID, whatever its state
    pub fn get_node_by_uuid(&self, uuid: &Uuid) -> Result<Option<Node>> {
        self.conn
            .query_row(
                &format!("{NODE_SELECT} WHERE n.uuid = ?1"),
                [uuid.to_string()],
                |row| self.row_to_node(row),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Resolve a UUID to its surrogate id
    pub fn node_id_for_uuid(&self, uuid: &Uuid) -> Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT id FROM nodes WHERE uuid = ?1",
                [uuid.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// First active node with the given name, oldest first
    pub fn get_node_by_name(&self, name: &str, type_code: Option<&str>) -> Result<Option<Node>> {
        self.conn
            .query_row(
                &format!(
                    "{NODE_SELECT} WHERE n.name = ?1 AND n.is_active = 1 AND (?2 IS NULL OR n.type_code = ?2) ORDER BY n.id LIMIT 1"
                ),
                params![name, type_code],
                |row| self.row_to_node(row),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Nodes of a type
    pub fn get_nodes_by_type(&self, type_code: &str, active_only: bool) -> Result<Vec<Node>> {
        let sql = if active_only {
            format!("{NODE_SELECT} WHERE n.type_code = ?1 AND n.is_active = 1 ORDER BY n.id")
        } else {
            format!("{NODE_SELECT} WHERE n.type_code = ?1 ORDER BY n.id")
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([type_code], |row| self.row_to_node(row))?;
        Ok(collect_logged(rows, "node"))
    }

    /// Active nodes whose attributes carry `key`
    pub fn find_nodes_with_attribute(&self, key: &str, type_code: Option<&str>) -> Result<Vec<Node>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"{NODE_SELECT}
            WHERE n.is_active = 1
              AND (?2 IS NULL OR n.type_code = ?2)
              AND EXISTS (SELECT 1 FROM json_each(n.attributes) WHERE json_each.key = ?1)
            ORDER BY n.id"#
        ))?;
        let rows = stmt.query_map(params![key, type_code], |row| self.row_to_node(row))?;
        Ok(collect_logged(rows, "node"))
    }

    /// Active nodes carrying `tag`
    pub fn find_nodes_by_tag(&self, tag: &str, type_code: Option<&str>) -> Result<Vec<Node>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"{NODE_SELECT}
            WHERE n.is_active = 1
              AND (?2 IS NULL OR n.type_code = ?2)
              AND EXISTS (SELECT 1 FROM json_each(n.tags) WHERE json_each.value = ?1)
            ORDER BY n.id"#
        ))?;
        let rows = stmt.query_map(params![tag, type_code], |row| self.row_to_node(row))?;
        Ok(collect_logged(rows, "node"))
    }

    /// Case-insensitive substring search over name, description and attributes
    pub fn search_nodes(&self, text: &str, type_code: Option<&str>, limit: usize) -> Result<Vec<Node>> {
        let pattern = format!("%{}%", escape_like(text));
        let mut stmt = self.conn.prepare(&format!(
            r#"{NODE_SELECT}
            WHERE n.is_active = 1
              AND (?2 IS NULL OR n.type_code = ?2)
              AND (n.name LIKE ?1 ESCAPE '\'
                   OR n.description LIKE ?1 ESCAPE '\'
                   OR n.attributes LIKE ?1 ESCAPE '\')
            ORDER BY n.id
            LIMIT ?3"#
        ))?;
        let rows = stmt.query_map(params![pattern, type_code, limit as i64], |row| {
            self.row_to_node(row)
        })?;
        Ok(collect_logged(rows, "node"))
    }

    /// Flip `is_active` on a node; `false` if no such UUID
    pub fn set_node_active(&self, uuid: &Uuid, active: bool) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE nodes SET is_active = ?2, updated_at = ?3 WHERE uuid = ?1",
            params![uuid.to_string(), active, Utc::now()],
        )?;
        Ok(changed > 0)
    }

    /// Soft-delete every active node that no active relationship touches
    pub fn deactivate_orphaned_nodes(&self) -> Result<usize> {
        let changed = self.conn.execute(
            r#"
            UPDATE nodes SET is_active = 0, updated_at = ?1
            WHERE is_active = 1
              AND NOT EXISTS (
                  SELECT 1 FROM relationships r
                  WHERE r.is_active = 1 AND (r.source_id = nodes.id OR r.target_id = nodes.id)
              )
            "#,
            [Utc::now()],
        )?;
        Ok(changed)
    }

    fn fetch_node(&self, id: i64) -> Result<Node> {
        self.get_node(id)?
            .ok_or_else(|| rusqlite::Error::QueryReturnedNoRows.into())
    }

    /// Helper to convert a row to a Node
    fn row_to_node(&self, row: &rusqlite::Row) -> rusqlite::Result<Node> {
        let description: Option<String> = row.get(5)?;
        let tags_str: String = row.get(14)?;
        let tags: Vec<String> = serde_json::from_str(&tags_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(14, Type::Text, Box::new(e)))?;

        Ok(Node {
            id: row.get(0)?,
            uuid: parse_uuid(row, 1)?,
            type_id: row.get(2)?,
            type_code: row.get(3)?,
            name: row.get(4)?,
            description: description.unwrap_or_default(),
            is_active: row.get(6)?,
            is_public: row.get(7)?,
            access_level: row.get(8)?,
            location_id: row.get(9)?,
            home_id: row.get(10)?,
            location_uuid: parse_uuid_opt(row, 11)?,
            home_uuid: parse_uuid_opt(row, 12)?,
            attributes: parse_attributes(row, 13)?,
            tags,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }

    // ========== Relationship Operations ==========

    /// Insert an active relationship row with a fresh UUID
    pub fn insert_relationship(&self, rel: &NewRelationship) -> Result<Relationship> {
        let now = Utc::now();
        self.conn.execute(
            r#"
            INSERT INTO relationships (uuid, type_id, type_code, source_id, target_id, attributes, is_active, weight, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8, ?8)
            "#,
            params![
                Uuid::new_v4().to_string(),
                rel.type_id,
                rel.type_code,
                rel.source_id,
                rel.target_id,
                serde_json::to_string(&rel.attributes)?,
                rel.weight,
                now,
            ],
        )?;
        self.fetch_relationship(self.conn.last_insert_rowid())
    }

    /// Get a relationship by id, whatever its state
    pub fn get_relationship(&self, id: i64) -> Result<Option<Relationship>> {
        self.conn
            .query_row(&format!("{RELATIONSHIP_SELECT} WHERE id = ?1"), [id], |row| {
                self.row_to_relationship(row)
            })
            .optional()
            .map_err(Into::into)
    }

    /// The row for a `(source, target, type)` triple, active or not
    pub fn find_relationship(&self, source_id: i64, target_id: i64, type_code: &str) -> Result<Option<Relationship>> {
        self.conn
            .query_row(
                &format!("{RELATIONSHIP_SELECT} WHERE source_id = ?1 AND target_id = ?2 AND type_code = ?3"),
                params![source_id, target_id, type_code],
                |row| self.row_to_relationship(row),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Active relationships where `node_id` is source or target
    pub fn get_relationships_for_node(&self, node_id: i64, type_code: Option<&str>) -> Result<Vec<Relationship>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"{RELATIONSHIP_SELECT}
            WHERE is_active = 1
              AND (source_id = ?1 OR target_id = ?1)
              AND (?2 IS NULL OR type_code = ?2)
            ORDER BY id"#
        ))?;
        let rows = stmt.query_map(params![node_id, type_code], |row| {
            self.row_to_relationship(row)
        })?;
        Ok(collect_logged(rows, "relationship"))
    }

    /// Rewrite attributes, weight and state of relationship `id`
    pub fn update_relationship(
        &self,
        id: i64,
        attributes: &Attributes,
        weight: i64,
        is_active: bool,
    ) -> Result<Option<Relationship>> {
        let changed = self.conn.execute(
            "UPDATE relationships SET attributes = ?2, weight = ?3, is_active = ?4, updated_at = ?5 WHERE id = ?1",
            params![id, serde_json::to_string(attributes)?, weight, is_active, Utc::now()],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_relationship(id)
    }

    /// Deactivate relationship `id`; `false` if none was active
    pub fn deactivate_relationship(&self, id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE relationships SET is_active = 0, updated_at = ?2 WHERE id = ?1 AND is_active = 1",
            params![id, Utc::now()],
        )?;
        Ok(changed > 0)
    }

    fn fetch_relationship(&self, id: i64) -> Result<Relationship> {
        self.get_relationship(id)?
            .ok_or_else(|| rusqlite::Error::QueryReturnedNoRows.into())
    }

    fn row_to_relationship(&self, row: &rusqlite::Row) -> rusqlite::Result<Relationship> {
        Ok(Relationship {
            id: row.get(0)?,
            uuid: parse_uuid(row, 1)?,
            type_id: row.get(2)?,
            type_code: row.get(3)?,
            source_id: row.get(4)?,
            target_id: row.get(5)?,
            attributes: parse_attributes(row, 6)?,
            is_active: row.get(7)?,
            weight: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    // ========== Bulk Operations ==========

    /// Begin a transaction for bulk operations
    pub fn begin_transaction(&mut self) -> Result<()> {
        self.conn.execute("BEGIN TRANSACTION", [])?;
        Ok(())
    }

    /// Commit a transaction
    pub fn commit(&mut self) -> Result<()> {
        self.conn.execute("COMMIT", [])?;
        Ok(())
    }

    /// Rollback a transaction
    pub fn rollback(&mut self) -> Result<()> {
        self.conn.execute("ROLLBACK", [])?;
        Ok(())
    }

    /// Run `f` inside a transaction, rolling back if it fails
    pub fn transaction<T>(&mut self, f: impl FnOnce(&SqliteStore) -> Result<T>) -> Result<T> {
        self.begin_transaction()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback() {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(e)
            }
        }
    }

    fn count(&self, sql: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        Ok(DbStats {
            nodes: self.count("SELECT COUNT(*) FROM nodes")?,
            active_nodes: self.count("SELECT COUNT(*) FROM nodes WHERE is_active = 1")?,
            relationships: self.count("SELECT COUNT(*) FROM relationships")?,
            active_relationships: self.count("SELECT COUNT(*) FROM relationships WHERE is_active = 1")?,
            node_types: self.count("SELECT COUNT(*) FROM node_types WHERE is_active = 1")?,
            relationship_types: self.count("SELECT COUNT(*) FROM relationship_types WHERE is_active = 1")?,
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct DbStats {
    pub nodes: usize,
    pub active_nodes: usize,
    pub relationships: usize,
    pub active_relationships: usize,
    /// Active node types
    pub node_types: usize,
    /// Active relationship types
    pub relationship_types: usize,
}

impl std::fmt::Display for DbStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Database Statistics:")?;
        writeln!(f, "  Nodes: {} ({} active)", self.nodes, self.active_nodes)?;
        writeln!(
            f,
            "  Relationships: {} ({} active)",
            self.relationships, self.active_relationships
        )?;
        writeln!(f, "  Node types: {}", self.node_types)?;
        writeln!(f, "  Relationship types: {}", self.relationship_types)
    }
}

fn collect_logged<T>(rows: impl Iterator<Item = rusqlite::Result<T>>, what: &str) -> Vec<T> {
    rows.filter_map(|r| match r {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "skipping unreadable {} row", what);
            None
        }
    })
    .collect()
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn json_opt(value: &Option<Value>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(Into::into)
}

fn parse_uuid(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_uuid_opt(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| {
        Uuid::parse_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn parse_attributes(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Attributes> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_json_opt(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<Value>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object_type() -> NewNodeType {
        NewNodeType {
            type_code: "object".to_string(),
            type_name: "Object".to_string(),
            typeclass: "campusgraph::object::DefaultObject".to_string(),
            classname: "DefaultObject".to_string(),
            module_path: "campusgraph::object".to_string(),
            description: None,
            schema_definition: None,
        }
    }

    fn sample_node(type_id: i64, name: &str, attributes: Value) -> NewNode {
        let now = Utc::now();
        NewNode {
            uuid: Uuid::new_v4(),
            type_id,
            type_code: "object".to_string(),
            name: name.to_string(),
            description: String::new(),
            is_active: true,
            is_public: true,
            access_level: "normal".to_string(),
            location_id: None,
            home_id: None,
            attributes: attributes.as_object().cloned().unwrap_or_default(),
            tags: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    fn store_with_type() -> (SqliteStore, NodeType) {
        let store = SqliteStore::open_in_memory().unwrap();
        let node_type = store.insert_node_type(&object_type()).unwrap();
        (store, node_type)
    }

    #[test]
    fn test_node_crud() {
        let (store, node_type) = store_with_type();

        let new = sample_node(node_type.id, "lamp", json!({"lit": true}));
        let inserted = store.insert_node(&new).unwrap();
        assert_eq!(inserted.uuid, new.uuid);
        assert_eq!(inserted.get_attribute("lit"), Some(&json!(true)));

        let mut changed = new.clone();
        changed.name = "brass lamp".to_string();
        changed.tags = vec!["light".to_string()];
        let updated = store.update_node(inserted.id, &changed).unwrap();
        assert_eq!(updated.name, "brass lamp");
        assert!(updated.has_tag("light"));

        let by_uuid = store.get_node_by_uuid(&new.uuid).unwrap().unwrap();
        assert_eq!(by_uuid.id, inserted.id);
    }

    #[test]
    fn test_placement_resolves_uuids() {
        let (store, node_type) = store_with_type();

        let room = store.insert_node(&sample_node(node_type.id, "hall", json!({}))).unwrap();
        let mut item = sample_node(node_type.id, "key", json!({}));
        item.location_id = Some(room.id);
        let item = store.insert_node(&item).unwrap();

        assert_eq!(item.location_uuid, Some(room.uuid));
        assert_eq!(item.home_uuid, None);
    }

    #[test]
    fn test_attribute_and_tag_queries_skip_inactive() {
        let (store, node_type) = store_with_type();

        let mut a = sample_node(node_type.id, "a", json!({"color": "red"}));
        a.tags = vec!["shiny".to_string()];
        let mut b = sample_node(node_type.id, "b", json!({"color": "blue"}));
        b.tags = vec!["shiny".to_string()];
        store.insert_node(&a).unwrap();
        store.insert_node(&b).unwrap();
        store.insert_node(&sample_node(node_type.id, "c", json!({}))).unwrap();

        assert_eq!(store.find_nodes_with_attribute("color", None).unwrap().len(), 2);
        assert_eq!(store.find_nodes_by_tag("shiny", Some("object")).unwrap().len(), 2);

        assert!(store.set_node_active(&b.uuid, false).unwrap());
        assert_eq!(store.find_nodes_with_attribute("color", None).unwrap().len(), 1);
        assert_eq!(store.find_nodes_by_tag("shiny", None).unwrap().len(), 1);
        assert!(!store.get_node_by_uuid(&b.uuid).unwrap().unwrap().is_active);
    }

    #[test]
    fn test_search_is_case_insensitive_and_literal() {
        let (store, node_type) = store_with_type();

        store.insert_node(&sample_node(node_type.id, "Main Library", json!({}))).unwrap();
        store.insert_node(&sample_node(node_type.id, "gym", json!({"note": "100% open"}))).unwrap();

        assert_eq!(store.search_nodes("library", None, 100).unwrap().len(), 1);
        assert_eq!(store.search_nodes("100%", None, 100).unwrap().len(), 1);
        assert_eq!(store.search_nodes("_", None, 100).unwrap().len(), 0);
    }

    #[test]
    fn test_relationship_unique_triple() {
        let (store, node_type) = store_with_type();
        let rel_type = store
            .insert_relationship_type(&NewRelationshipType::new("exit", "Exit"))
            .unwrap();

        let a = store.insert_node(&sample_node(node_type.id, "a", json!({}))).unwrap();
        let b = store.insert_node(&sample_node(node_type.id, "b", json!({}))).unwrap();

        let new = NewRelationship {
            type_id: rel_type.id,
            type_code: "exit".to_string(),
            source_id: a.id,
            target_id: b.id,
            attributes: Attributes::new(),
            weight: 1,
        };
        store.insert_relationship(&new).unwrap();
        assert!(store.insert_relationship(&new).is_err());

        assert_eq!(store.get_relationships_for_node(b.id, None).unwrap().len(), 1);
        assert_eq!(store.get_relationships_for_node(a.id, Some("owns")).unwrap().len(), 0);
    }

    #[test]
    fn test_node_type_soft_delete_and_upsert() {
        let (store, _) = store_with_type();

        assert!(store.set_node_type_active("object", false).unwrap());
        assert!(store.get_all_node_types(true).unwrap().is_empty());
        assert_eq!(store.get_all_node_types(false).unwrap().len(), 1);

        let revived = store.upsert_node_type(&object_type()).unwrap();
        assert!(revived.is_active);

        let updated = store
            .update_node_type(
                "object",
                &NodeTypeUpdate {
                    description: Some("Anything".to_string()),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.description.as_deref(), Some("Anything"));
        assert_eq!(updated.type_name, "Object");
        assert!(store.update_node_type("missing", &NodeTypeUpdate::default()).unwrap().is_none());
    }

    #[test]
    fn test_orphan_cleanup() {
        let (store, node_type) = store_with_type();
        let rel_type = store
            .insert_relationship_type(&NewRelationshipType::new("owns", "Owns"))
            .unwrap();

        let a = store.insert_node(&sample_node(node_type.id, "a", json!({}))).unwrap();
        let b = store.insert_node(&sample_node(node_type.id, "b", json!({}))).unwrap();
        store.insert_node(&sample_node(node_type.id, "lonely", json!({}))).unwrap();
        store
            .insert_relationship(&NewRelationship {
                type_id: rel_type.id,
                type_code: "owns".to_string(),
                source_id: a.id,
                target_id: b.id,
                attributes: Attributes::new(),
                weight: 1,
            })
            .unwrap();

        assert_eq!(store.deactivate_orphaned_nodes().unwrap(), 1);
        let stats = store.stats().unwrap();
        assert_eq!(stats.nodes, 3);
        assert_eq!(stats.active_nodes, 2);
    }
}
