//! Versioned schema migrations.
//!
//! The schema version lives in `PRAGMA user_version` and is written inside
//! the same transaction as the step it describes, so a store is always at
//! exactly the version of its last committed step. Steps are additive only;
//! there are no down-migrations. Callers must hold exclusive access while
//! migrating.

use rusqlite::Connection;
use tracing::info;

use crate::error::{Result, StoreError};

pub struct Migration {
    pub version: i32,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: r#"
CREATE TABLE projects (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE assets (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    original_name TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    byte_size INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    storage_path TEXT NOT NULL,
    thumbnail_path TEXT,
    width INTEGER,
    height INTEGER,
    created_at TEXT NOT NULL,
    deleted_at TEXT
);

CREATE INDEX idx_assets_project ON assets(project_id);
-- Dedup is scoped to live assets: trashed content may be re-uploaded.
CREATE UNIQUE INDEX idx_assets_live_hash
    ON assets(project_id, content_hash) WHERE deleted_at IS NULL;

-- AI annotation queue and results, written by the caption worker.
CREATE TABLE asset_ai (
    asset_id TEXT PRIMARY KEY REFERENCES assets(id) ON DELETE CASCADE,
    caption TEXT,
    tags_json TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    model_version TEXT,
    updated_at TEXT NOT NULL
);

CREATE INDEX idx_asset_ai_status ON asset_ai(status);

-- Small app-wide state (e.g. last opened project).
CREATE TABLE app_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#,
    },
    Migration {
        version: 2,
        sql: r#"
CREATE TABLE canvas_objects (
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    id TEXT NOT NULL,
    kind TEXT NOT NULL,
    asset_id TEXT REFERENCES assets(id) ON DELETE SET NULL,
    x REAL NOT NULL DEFAULT 0,
    y REAL NOT NULL DEFAULT 0,
    scale_x REAL NOT NULL DEFAULT 1,
    scale_y REAL NOT NULL DEFAULT 1,
    rotation REAL NOT NULL DEFAULT 0,
    width REAL,
    height REAL,
    z_index INTEGER NOT NULL DEFAULT 0,
    props_json TEXT,
    PRIMARY KEY (project_id, id)
);

CREATE TABLE canvas_view (
    project_id TEXT PRIMARY KEY REFERENCES projects(id) ON DELETE CASCADE,
    world_x REAL NOT NULL DEFAULT 0,
    world_y REAL NOT NULL DEFAULT 0,
    zoom REAL NOT NULL DEFAULT 1
);

-- Revision counters. canvas_rev and view_rev evolve independently.
CREATE TABLE project_sync (
    project_id TEXT PRIMARY KEY REFERENCES projects(id) ON DELETE CASCADE,
    canvas_rev INTEGER NOT NULL DEFAULT 0,
    view_rev INTEGER NOT NULL DEFAULT 0,
    canvas_updated_at TEXT NOT NULL,
    view_updated_at TEXT NOT NULL
);
"#,
    },
    Migration {
        version: 3,
        sql: r#"
-- Derived lexical index; always reconstructible from assets + asset_ai.
CREATE VIRTUAL TABLE asset_search USING fts5(
    asset_id UNINDEXED,
    project_id UNINDEXED,
    original_name,
    caption,
    tags
);

CREATE TABLE asset_embeddings (
    asset_id TEXT PRIMARY KEY REFERENCES assets(id) ON DELETE CASCADE,
    model_name TEXT NOT NULL,
    embedding_dim INTEGER NOT NULL,
    embedding BLOB NOT NULL,
    updated_at TEXT NOT NULL
);
"#,
    },
    Migration {
        version: 4,
        sql: r#"
-- Per-tag segmentation overlays, cached independently of annotations.
CREATE TABLE asset_segments (
    asset_id TEXT NOT NULL REFERENCES assets(id) ON DELETE CASCADE,
    tag TEXT NOT NULL,
    svg TEXT,
    boxes_json TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (asset_id, tag)
);

ALTER TABLE assets ADD COLUMN trashed_storage_path TEXT;
ALTER TABLE assets ADD COLUMN trashed_thumbnail_path TEXT;
"#,
    },
];

pub fn schema_version(conn: &Connection) -> Result<i32> {
    let v: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(v)
}

/// Bring the store up to the current schema version.
///
/// Applies every step newer than the stored version, strictly in ascending
/// order, each in its own all-or-nothing transaction. Running against an
/// already-current store is a no-op. A failed step leaves the store pinned
/// at its last committed version.
pub fn migrate(conn: &Connection) -> Result<i32> {
    let mut current = schema_version(conn)?;
    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        let tx = conn.unchecked_transaction()?;
        let applied = tx
            .execute_batch(migration.sql)
            .and_then(|_| tx.pragma_update(None, "user_version", migration.version));
        match applied {
            Ok(()) => tx.commit()?,
            Err(e) => {
                drop(tx); // rolls back
                return Err(StoreError::Migration {
                    version: migration.version,
                    source: e,
                });
            }
        }
        info!(version = migration.version, "Applied schema migration");
        current = migration.version;
    }
    Ok(current)
}
