//! Asset ingestion, listing, and the soft-delete (trash) lifecycle.
//!
//! Files are content-addressed under `assets/<project>/<hash>.<ext>`;
//! soft deletion moves them into a mirrored `trash/` subtree so restore is
//! a pure inverse. Database rows and files are reconciled in a fixed order:
//! file moves happen first, then one transaction applies the row changes.

use rusqlite::params;
use std::io::Read;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{now, search, Store};
use crate::error::{Result, StoreError};
use crate::storage::{extension_for, hashing, thumbnails};

#[derive(Debug, Clone)]
pub struct Asset {
    pub id: String,
    pub project_id: String,
    pub original_name: String,
    pub mime_type: String,
    pub byte_size: i64,
    pub content_hash: String,
    pub storage_path: String,
    pub thumbnail_path: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub created_at: String,
    pub deleted_at: Option<String>,
    pub trashed_storage_path: Option<String>,
    pub trashed_thumbnail_path: Option<String>,
}

/// Outcome of an ingest: the asset row, and whether it already existed.
#[derive(Debug, Clone)]
pub struct Ingested {
    pub asset: Asset,
    pub deduplicated: bool,
}

const ASSET_COLUMNS: &str = "id, project_id, original_name, mime_type, byte_size, content_hash, \
     storage_path, thumbnail_path, width, height, created_at, deleted_at, \
     trashed_storage_path, trashed_thumbnail_path";

pub(crate) fn asset_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Asset> {
    Ok(Asset {
        id: row.get(0)?,
        project_id: row.get(1)?,
        original_name: row.get(2)?,
        mime_type: row.get(3)?,
        byte_size: row.get(4)?,
        content_hash: row.get(5)?,
        storage_path: row.get(6)?,
        thumbnail_path: row.get(7)?,
        width: row.get(8)?,
        height: row.get(9)?,
        created_at: row.get(10)?,
        deleted_at: row.get(11)?,
        trashed_storage_path: row.get(12)?,
        trashed_thumbnail_path: row.get(13)?,
    })
}

impl Store {
    /// Ingest one file into a project.
    ///
    /// The stream is spooled to a temp file while hashing, so nothing is
    /// committed until the content is fully on disk. If a live asset with the
    /// same content already exists in the project, the upload is discarded
    /// and the existing row returned.
    pub fn ingest(
        &self,
        project_id: &str,
        reader: &mut dyn Read,
        original_name: &str,
        mime_type: &str,
    ) -> Result<Ingested> {
        let original_name = original_name.trim();
        if original_name.is_empty() {
            return Err(StoreError::Validation("original name is empty".into()));
        }
        if self.get_project(project_id)?.is_none() {
            return Err(StoreError::NotFound);
        }

        let tmp_rel = format!("tmp/{}.part", Uuid::new_v4());
        let tmp_abs = self.layout.absolute(&tmp_rel);
        let streamed = hashing::stream_to_file(reader, &tmp_abs)?;

        if let Some(existing) = self.live_asset_by_hash(project_id, &streamed.sha256)? {
            self.layout.remove_file(&tmp_rel)?;
            debug!(asset_id = %existing.id, hash = %streamed.sha256, "Ingest deduplicated");
            return Ok(Ingested {
                asset: existing,
                deduplicated: true,
            });
        }

        let ext = extension_for(mime_type, original_name);
        let storage_path = self.layout.asset_rel(project_id, &streamed.sha256, &ext);
        self.layout.move_file(&tmp_rel, &storage_path)?;

        let mut thumbnail_path = None;
        let mut width = None;
        let mut height = None;
        if thumbnails::is_image_mime(mime_type) {
            let thumb_rel = self.layout.thumbnail_rel(project_id, &streamed.sha256);
            match thumbnails::generate(
                &self.layout.absolute(&storage_path),
                &self.layout.absolute(&thumb_rel),
                self.thumbnail_dim,
            ) {
                Ok(info) => {
                    width = Some(info.width as i64);
                    height = Some(info.height as i64);
                    thumbnail_path = Some(thumb_rel);
                }
                Err(e) => {
                    warn!(name = %original_name, error = %e, "Thumbnail generation failed");
                }
            }
        }

        let asset = Asset {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            original_name: original_name.to_string(),
            mime_type: mime_type.to_string(),
            byte_size: streamed.byte_size,
            content_hash: streamed.sha256,
            storage_path,
            thumbnail_path,
            width,
            height,
            created_at: now(),
            deleted_at: None,
            trashed_storage_path: None,
            trashed_thumbnail_path: None,
        };

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            r#"
            INSERT INTO assets
                (id, project_id, original_name, mime_type, byte_size, content_hash,
                 storage_path, thumbnail_path, width, height, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                asset.id,
                asset.project_id,
                asset.original_name,
                asset.mime_type,
                asset.byte_size,
                asset.content_hash,
                asset.storage_path,
                asset.thumbnail_path,
                asset.width,
                asset.height,
                asset.created_at,
            ],
        )?;
        if thumbnails::is_image_mime(mime_type) {
            tx.execute(
                "INSERT INTO asset_ai (asset_id, status, updated_at) VALUES (?, 'pending', ?)",
                params![asset.id, asset.created_at],
            )?;
        }
        search::refresh_search_row(&tx, &asset.id)?;
        tx.commit()?;
        self.touch_project(project_id)?;

        Ok(Ingested {
            asset,
            deduplicated: false,
        })
    }

    fn live_asset_by_hash(&self, project_id: &str, content_hash: &str) -> Result<Option<Asset>> {
        let sql = format!(
            "SELECT {ASSET_COLUMNS} FROM assets
             WHERE project_id = ? AND content_hash = ? AND deleted_at IS NULL"
        );
        let result = self
            .conn
            .query_row(&sql, params![project_id, content_hash], asset_from_row);
        match result {
            Ok(a) => Ok(Some(a)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch a live asset. Trashed assets are invisible here.
    pub fn get_asset(&self, asset_id: &str) -> Result<Option<Asset>> {
        let sql =
            format!("SELECT {ASSET_COLUMNS} FROM assets WHERE id = ? AND deleted_at IS NULL");
        let result = self.conn.query_row(&sql, [asset_id], asset_from_row);
        match result {
            Ok(a) => Ok(Some(a)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch an asset regardless of trash state.
    pub fn get_asset_any(&self, asset_id: &str) -> Result<Option<Asset>> {
        let sql = format!("SELECT {ASSET_COLUMNS} FROM assets WHERE id = ?");
        let result = self.conn.query_row(&sql, [asset_id], asset_from_row);
        match result {
            Ok(a) => Ok(Some(a)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_assets(&self, project_id: &str) -> Result<Vec<Asset>> {
        let sql = format!(
            "SELECT {ASSET_COLUMNS} FROM assets
             WHERE project_id = ? AND deleted_at IS NULL
             ORDER BY created_at DESC, id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let assets = stmt
            .query_map([project_id], asset_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(assets)
    }

    pub fn list_trashed(&self, project_id: &str) -> Result<Vec<Asset>> {
        let sql = format!(
            "SELECT {ASSET_COLUMNS} FROM assets
             WHERE project_id = ? AND deleted_at IS NOT NULL
             ORDER BY deleted_at DESC, id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let assets = stmt
            .query_map([project_id], asset_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(assets)
    }

    /// Soft-delete an asset: move its files into the trash subtree, then mark
    /// the row. Canvas objects referencing it are left alone; they resolve to
    /// a missing asset until restore or purge. Returns false when the asset
    /// is absent or already trashed.
    pub fn delete_asset(&self, asset_id: &str) -> Result<bool> {
        let Some(asset) = self.get_asset(asset_id)? else {
            return Ok(false);
        };

        let trashed_storage = self
            .layout
            .trash_rel(&asset.project_id, &asset.storage_path);
        self.layout.move_file(&asset.storage_path, &trashed_storage)?;

        let trashed_thumbnail = match &asset.thumbnail_path {
            Some(rel) => {
                let to = self.layout.trash_rel(&asset.project_id, rel);
                self.layout.move_file(rel, &to)?;
                Some(to)
            }
            None => None,
        };

        let marked = (|| -> Result<()> {
            let tx = self.conn.unchecked_transaction()?;
            tx.execute(
                r#"
                UPDATE assets
                SET deleted_at = ?, trashed_storage_path = ?, trashed_thumbnail_path = ?
                WHERE id = ?
                "#,
                params![now(), trashed_storage, trashed_thumbnail, asset_id],
            )?;
            // Trashed assets never match searches.
            tx.execute("DELETE FROM asset_search WHERE asset_id = ?", [asset_id])?;
            tx.commit()?;
            Ok(())
        })();
        if let Err(e) = marked {
            // The row is still live, so the files must come back out of the
            // trash before surfacing the error.
            if let Err(undo) = self.layout.move_file(&trashed_storage, &asset.storage_path) {
                warn!(asset_id = %asset.id, error = %undo, "Failed to undo trash move");
            }
            if let (Some(from), Some(to)) = (&trashed_thumbnail, &asset.thumbnail_path) {
                if let Err(undo) = self.layout.move_file(from, to) {
                    warn!(asset_id = %asset.id, error = %undo, "Failed to undo thumbnail move");
                }
            }
            return Err(e);
        }
        self.touch_project(&asset.project_id)?;
        Ok(true)
    }

    /// Undo a soft delete. Restoring an asset that is already live is a
    /// no-op; the call only fails when the project has since re-ingested the
    /// same content as a new live asset.
    pub fn restore_asset(&self, asset_id: &str) -> Result<Asset> {
        let asset = self.get_asset_any(asset_id)?.ok_or(StoreError::NotFound)?;
        if asset.deleted_at.is_none() {
            return Ok(asset);
        }
        if self
            .live_asset_by_hash(&asset.project_id, &asset.content_hash)?
            .is_some()
        {
            return Err(StoreError::Validation(
                "a live asset with the same content already exists".into(),
            ));
        }

        if let Some(from) = &asset.trashed_storage_path {
            self.layout.move_file(from, &asset.storage_path)?;
        }
        if let (Some(from), Some(to)) = (&asset.trashed_thumbnail_path, &asset.thumbnail_path) {
            if let Err(e) = self.layout.move_file(from, to) {
                warn!(asset_id = %asset.id, error = %e, "Thumbnail restore failed");
            }
        }

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            r#"
            UPDATE assets
            SET deleted_at = NULL, trashed_storage_path = NULL, trashed_thumbnail_path = NULL
            WHERE id = ?
            "#,
            [asset_id],
        )?;
        search::refresh_search_row(&tx, asset_id)?;
        tx.commit()?;
        self.touch_project(&asset.project_id)?;

        self.get_asset(asset_id)?.ok_or(StoreError::NotFound)
    }

    /// Permanently remove a trashed asset: its rows, its derived data, and
    /// its files. Only trashed assets can be purged.
    pub fn purge_asset(&self, asset_id: &str) -> Result<()> {
        let asset = self.get_asset_any(asset_id)?.ok_or(StoreError::NotFound)?;
        if asset.deleted_at.is_none() {
            return Err(StoreError::Validation(
                "only trashed assets can be purged".into(),
            ));
        }

        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM asset_search WHERE asset_id = ?", [asset_id])?;
        tx.execute("DELETE FROM asset_segments WHERE asset_id = ?", [asset_id])?;
        tx.execute("DELETE FROM asset_embeddings WHERE asset_id = ?", [asset_id])?;
        tx.execute("DELETE FROM asset_ai WHERE asset_id = ?", [asset_id])?;
        // canvas_objects.asset_id is ON DELETE SET NULL; placeholders survive.
        tx.execute("DELETE FROM assets WHERE id = ?", [asset_id])?;
        tx.commit()?;

        if let Some(rel) = &asset.trashed_storage_path {
            if let Err(e) = self.layout.remove_file(rel) {
                warn!(asset_id = %asset.id, error = %e, "Failed to remove purged file");
            }
        }
        if let Some(rel) = &asset.trashed_thumbnail_path {
            if let Err(e) = self.layout.remove_file(rel) {
                warn!(asset_id = %asset.id, error = %e, "Failed to remove purged thumbnail");
            }
        }
        Ok(())
    }

    /// Purge everything in a project's trash. Returns the number of assets
    /// removed.
    pub fn empty_trash(&self, project_id: &str) -> Result<usize> {
        let trashed = self.list_trashed(project_id)?;
        for asset in &trashed {
            self.purge_asset(&asset.id)?;
        }
        Ok(trashed.len())
    }

    /// Bytes currently held in a project's trash subtree.
    pub fn trash_size(&self, project_id: &str) -> u64 {
        self.layout.trash_size(project_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testutil::open_temp;

    fn ingest_bytes(t: &crate::db::testutil::TestStore, project: &str, bytes: &[u8]) -> Asset {
        let mut reader: &[u8] = bytes;
        t.store
            .ingest(project, &mut reader, "file.txt", "text/plain")
            .unwrap()
            .asset
    }

    #[test]
    fn ingest_writes_content_addressed_file() {
        let t = open_temp();
        let p = t.store.create_project("P").unwrap();
        let asset = ingest_bytes(&t, &p.id, b"payload");

        assert_eq!(asset.byte_size, 7);
        assert!(asset.storage_path.starts_with(&format!("assets/{}/", p.id)));
        assert!(asset.storage_path.contains(&asset.content_hash));
        let on_disk = std::fs::read(t.store.layout.absolute(&asset.storage_path)).unwrap();
        assert_eq!(on_disk, b"payload");
    }

    #[test]
    fn text_ingest_is_immediately_searchable_without_annotation() {
        let t = open_temp();
        let p = t.store.create_project("P").unwrap();
        let mut reader: &[u8] = b"0123456789";
        let asset = t
            .store
            .ingest(&p.id, &mut reader, "hello.txt", "text/plain")
            .unwrap()
            .asset;

        assert_eq!(asset.byte_size, 10);
        assert!(t.store.get_annotation(&asset.id).unwrap().is_none());
        assert!(t.store.layout.absolute(&asset.storage_path).exists());
        let hits = t.store.search_lexical(&p.id, "hello", None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].asset.id, asset.id);
    }

    #[test]
    fn ingest_deduplicates_on_live_content() {
        let t = open_temp();
        let p = t.store.create_project("P").unwrap();
        let first = ingest_bytes(&t, &p.id, b"same bytes");

        let mut reader: &[u8] = b"same bytes";
        let second = t
            .store
            .ingest(&p.id, &mut reader, "different-name.txt", "text/plain")
            .unwrap();
        assert!(second.deduplicated);
        assert_eq!(second.asset.id, first.id);
        assert_eq!(t.store.list_assets(&p.id).unwrap().len(), 1);
        // Spooled temp file was discarded.
        let tmp_entries: Vec<_> = std::fs::read_dir(t.store.layout.tmp_dir())
            .unwrap()
            .collect();
        assert!(tmp_entries.is_empty());
    }

    #[test]
    fn dedup_is_scoped_per_project() {
        let t = open_temp();
        let a = t.store.create_project("A").unwrap();
        let b = t.store.create_project("B").unwrap();
        let first = ingest_bytes(&t, &a.id, b"shared");
        let second = ingest_bytes(&t, &b.id, b"shared");
        assert_ne!(first.id, second.id);
        assert_eq!(first.content_hash, second.content_hash);
    }

    #[test]
    fn ingest_into_missing_project_is_not_found() {
        let t = open_temp();
        let mut reader: &[u8] = b"x";
        assert!(matches!(
            t.store.ingest("ghost", &mut reader, "a.txt", "text/plain"),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn delete_moves_file_to_trash_and_restore_brings_it_back() {
        let t = open_temp();
        let p = t.store.create_project("P").unwrap();
        let asset = ingest_bytes(&t, &p.id, b"precious");

        t.store.delete_asset(&asset.id).unwrap();
        assert!(t.store.get_asset(&asset.id).unwrap().is_none());
        assert!(!t.store.layout.absolute(&asset.storage_path).exists());
        let trashed = t.store.get_asset_any(&asset.id).unwrap().unwrap();
        let trash_abs = t
            .store
            .layout
            .absolute(trashed.trashed_storage_path.as_deref().unwrap());
        assert_eq!(std::fs::read(trash_abs).unwrap(), b"precious");
        assert!(t.store.trash_size(&p.id) > 0);

        let restored = t.store.restore_asset(&asset.id).unwrap();
        assert!(restored.deleted_at.is_none());
        assert_eq!(
            std::fs::read(t.store.layout.absolute(&restored.storage_path)).unwrap(),
            b"precious"
        );
        assert_eq!(t.store.trash_size(&p.id), 0);
    }

    #[test]
    fn deleting_twice_is_a_no_op() {
        let t = open_temp();
        let p = t.store.create_project("P").unwrap();
        let asset = ingest_bytes(&t, &p.id, b"once");
        assert!(t.store.delete_asset(&asset.id).unwrap());
        assert!(!t.store.delete_asset(&asset.id).unwrap());
        assert!(!t.store.delete_asset("ghost").unwrap());
    }

    #[test]
    fn failed_delete_leaves_the_asset_and_its_files_live() {
        let t = open_temp();
        let p = t.store.create_project("P").unwrap();
        let asset = ingest_bytes(&t, &p.id, b"contended");

        // A second writer holds the write lock so the row update cannot
        // commit within the (shortened) busy timeout.
        t.store
            .conn
            .busy_timeout(std::time::Duration::from_millis(50))
            .unwrap();
        let blocker = rusqlite::Connection::open(t.store.layout.db_path()).unwrap();
        blocker.execute_batch("BEGIN IMMEDIATE").unwrap();

        assert!(matches!(
            t.store.delete_asset(&asset.id),
            Err(StoreError::Busy)
        ));
        blocker.execute_batch("ROLLBACK").unwrap();

        // The asset is still live and its file is back in place.
        assert!(t.store.get_asset(&asset.id).unwrap().is_some());
        assert_eq!(
            std::fs::read(t.store.layout.absolute(&asset.storage_path)).unwrap(),
            b"contended"
        );
        assert_eq!(t.store.trash_size(&p.id), 0);

        // With the lock released the delete goes through normally.
        assert!(t.store.delete_asset(&asset.id).unwrap());
    }

    #[test]
    fn restoring_a_live_asset_is_a_noop() {
        let t = open_temp();
        let p = t.store.create_project("P").unwrap();
        let asset = ingest_bytes(&t, &p.id, b"still live");

        let restored = t.store.restore_asset(&asset.id).unwrap();
        assert_eq!(restored.id, asset.id);
        assert!(restored.deleted_at.is_none());
        assert_eq!(
            std::fs::read(t.store.layout.absolute(&restored.storage_path)).unwrap(),
            b"still live"
        );
    }

    #[test]
    fn trashed_content_can_be_reingested_and_then_blocks_restore() {
        let t = open_temp();
        let p = t.store.create_project("P").unwrap();
        let original = ingest_bytes(&t, &p.id, b"duplicate me");
        t.store.delete_asset(&original.id).unwrap();

        // Re-upload of the same bytes creates a fresh live asset.
        let replacement = ingest_bytes(&t, &p.id, b"duplicate me");
        assert_ne!(replacement.id, original.id);

        // The trashed original can no longer come back.
        assert!(matches!(
            t.store.restore_asset(&original.id),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn purge_removes_rows_and_files() {
        let t = open_temp();
        let p = t.store.create_project("P").unwrap();
        let asset = ingest_bytes(&t, &p.id, b"gone for good");
        t.store.delete_asset(&asset.id).unwrap();

        // Purging a live asset is rejected.
        let live = ingest_bytes(&t, &p.id, b"still here");
        assert!(matches!(
            t.store.purge_asset(&live.id),
            Err(StoreError::Validation(_))
        ));

        t.store.purge_asset(&asset.id).unwrap();
        assert!(t.store.get_asset_any(&asset.id).unwrap().is_none());
        assert_eq!(t.store.trash_size(&p.id), 0);
    }

    #[test]
    fn empty_trash_purges_all_trashed_assets() {
        let t = open_temp();
        let p = t.store.create_project("P").unwrap();
        let a = ingest_bytes(&t, &p.id, b"one");
        let b = ingest_bytes(&t, &p.id, b"two");
        let kept = ingest_bytes(&t, &p.id, b"three");
        t.store.delete_asset(&a.id).unwrap();
        t.store.delete_asset(&b.id).unwrap();

        assert_eq!(t.store.empty_trash(&p.id).unwrap(), 2);
        assert!(t.store.list_trashed(&p.id).unwrap().is_empty());
        assert!(t.store.get_asset(&kept.id).unwrap().is_some());
    }
}
