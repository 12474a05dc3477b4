//! The embedded store: one SQLite database per data directory.
//!
//! `Store` is an explicitly constructed handle owned by the process's
//! composition root. Operations are grouped by area across the files in this
//! module, all as `impl Store` blocks. Every multi-statement operation runs
//! in a single transaction; partial application is never observable.

pub mod annotations;
pub mod assets;
pub mod canvas;
pub mod embeddings;
pub mod migrations;
pub mod projects;
pub mod search;
pub mod segments;

use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::storage::Layout;

pub use annotations::{Annotation, AnnotationStatus, PendingJob};
pub use assets::{Asset, Ingested};
pub use canvas::{CanvasObject, ObjectKind, Snapshot, Viewport};
pub use embeddings::EmbeddingRecord;
pub use projects::Project;
pub use search::{AssetHit, HitSource, SearchMode};
pub use segments::Segment;

const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);
const DEFAULT_THUMBNAIL_DIM: u32 = 512;

pub struct Store {
    pub(crate) conn: Connection,
    pub(crate) layout: Layout,
    pub(crate) thumbnail_dim: u32,
}

impl Store {
    /// Open (or create) the store under `data_dir` and bring its schema up
    /// to date. A migration failure is fatal; callers must not proceed.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let layout = Layout::new(data_dir);
        std::fs::create_dir_all(data_dir)?;
        std::fs::create_dir_all(layout.tmp_dir())?;

        let conn = Connection::open(layout.db_path())?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_row| Ok(()))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::migrate(&conn)?;

        Ok(Self {
            conn,
            layout,
            thumbnail_dim: DEFAULT_THUMBNAIL_DIM,
        })
    }

    pub fn with_thumbnail_dimension(mut self, dim: u32) -> Self {
        self.thumbnail_dim = dim.max(16);
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    // ========================================================================
    // App-wide key/value state
    // ========================================================================

    pub fn get_state(&self, key: &str) -> Result<Option<String>> {
        let result = self.conn.query_row(
            "SELECT value FROM app_state WHERE key = ?",
            [key],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_state(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO app_state (key, value) VALUES (?, ?)",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }
}

/// Current UTC timestamp in the store's canonical text form.
pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
