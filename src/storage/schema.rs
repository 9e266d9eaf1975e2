//! Database schema definitions

/// Connection-level settings applied before any table is touched
pub const PRAGMAS: &[&str] = &[
    "PRAGMA foreign_keys = ON",
];

/// SQL to create the node type registry
pub const CREATE_NODE_TYPES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS node_types (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type_code TEXT NOT NULL UNIQUE,
    type_name TEXT NOT NULL,
    typeclass TEXT NOT NULL,
    classname TEXT NOT NULL,
    module_path TEXT NOT NULL,
    description TEXT,
    schema_definition TEXT,
    is_active INTEGER NOT NULL DEFAULT 1
)
"#;

/// SQL to create the relationship type registry
pub const CREATE_RELATIONSHIP_TYPES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS relationship_types (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type_code TEXT NOT NULL UNIQUE,
    type_name TEXT NOT NULL,
    typeclass TEXT NOT NULL,
    description TEXT,
    schema_definition TEXT,
    is_directed INTEGER NOT NULL DEFAULT 1,
    is_symmetric INTEGER NOT NULL DEFAULT 0,
    is_transitive INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1
)
"#;

/// SQL to create the nodes table
///
/// `attributes` holds a JSON object and `tags` a JSON array of strings.
pub const CREATE_NODES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE,
    type_id INTEGER NOT NULL REFERENCES node_types(id),
    type_code TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    is_public INTEGER NOT NULL DEFAULT 1,
    access_level TEXT NOT NULL DEFAULT 'normal',
    location_id INTEGER REFERENCES nodes(id),
    home_id INTEGER REFERENCES nodes(id),
    attributes TEXT NOT NULL DEFAULT '{}',
    tags TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create the relationships table
pub const CREATE_RELATIONSHIPS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS relationships (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE,
    type_id INTEGER NOT NULL REFERENCES relationship_types(id),
    type_code TEXT NOT NULL,
    source_id INTEGER NOT NULL REFERENCES nodes(id),
    target_id INTEGER NOT NULL REFERENCES nodes(id),
    attributes TEXT NOT NULL DEFAULT '{}',
    is_active INTEGER NOT NULL DEFAULT 1,
    weight INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(source_id, target_id, type_code)
)
"#;

/// SQL to create indexes
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_node_type ON nodes(type_code)",
    "CREATE INDEX IF NOT EXISTS idx_node_name ON nodes(name)",
    "CREATE INDEX IF NOT EXISTS idx_node_active ON nodes(is_active)",
    "CREATE INDEX IF NOT EXISTS idx_node_location ON nodes(location_id)",
    "CREATE INDEX IF NOT EXISTS idx_relationship_type ON relationships(type_code)",
    "CREATE INDEX IF NOT EXISTS idx_relationship_source ON relationships(source_id)",
    "CREATE INDEX IF NOT EXISTS idx_relationship_target ON relationships(target_id)",
    "CREATE INDEX IF NOT EXISTS idx_relationship_active ON relationships(is_active)",
];

/// All schema creation statements, registry tables first
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut stmts = vec![
        CREATE_NODE_TYPES_TABLE,
        CREATE_RELATIONSHIP_TYPES_TABLE,
        CREATE_NODES_TABLE,
        CREATE_RELATIONSHIPS_TABLE,
    ];
    stmts.extend(CREATE_INDEXES.iter().copied());
    stmts
}
