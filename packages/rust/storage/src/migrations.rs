//! SQL migration definitions for the eva3d database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: boms, bom_items, vendor_mappings",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per parsed bill of materials
CREATE TABLE IF NOT EXISTS boms (
    id         TEXT PRIMARY KEY,
    seq        INTEGER NOT NULL,
    namespace  TEXT NOT NULL,
    source     TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_boms_namespace ON boms(namespace);

-- Raw BOM rows; duplicates are kept and merged at aggregation time
CREATE TABLE IF NOT EXISTS bom_items (
    bom_id   TEXT NOT NULL REFERENCES boms(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    name     TEXT NOT NULL,
    material TEXT NOT NULL,
    quantity REAL NOT NULL,
    PRIMARY KEY (bom_id, position)
);

-- Per-vendor substitution tables, replaced wholesale on load
CREATE TABLE IF NOT EXISTS vendor_mappings (
    vendor           TEXT NOT NULL,
    eva_part_name    TEXT NOT NULL,
    eva_part_type    TEXT NOT NULL,
    vendor_part_name TEXT NOT NULL,
    vendor_sku       TEXT NOT NULL,
    vendor_ignore    INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (vendor, eva_part_name)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
