//! AI annotation queue: per-asset caption/tag state driven by the worker.
//!
//! Rows move pending -> processing -> done | failed. A retry simply flips
//! the row back to pending; the worker claims the oldest pending row it can
//! find. Result writes refresh the asset's search row in the same
//! transaction, so new captions become searchable atomically.

use rusqlite::params;
use serde::{Deserialize, Serialize};

use super::{now, search, Store};
use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl AnnotationStatus {
    pub fn as_str(&self) -> &str {
        match self {
            AnnotationStatus::Pending => "pending",
            AnnotationStatus::Processing => "processing",
            AnnotationStatus::Done => "done",
            AnnotationStatus::Failed => "failed",
        }
    }

    fn from_db(s: &str) -> Self {
        match s {
            "processing" => AnnotationStatus::Processing,
            "done" => AnnotationStatus::Done,
            "failed" => AnnotationStatus::Failed,
            _ => AnnotationStatus::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Annotation {
    pub asset_id: String,
    pub caption: Option<String>,
    pub tags: Vec<String>,
    pub status: AnnotationStatus,
    pub model_version: Option<String>,
    pub updated_at: String,
}

/// A claimed unit of work: enough for the worker to read the file and call
/// the caption provider.
#[derive(Debug, Clone)]
pub struct PendingJob {
    pub asset_id: String,
    pub project_id: String,
    pub storage_path: String,
    pub mime_type: String,
    pub original_name: String,
}

fn tags_from_json(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

impl Store {
    pub fn get_annotation(&self, asset_id: &str) -> Result<Option<Annotation>> {
        let result = self.conn.query_row(
            r#"
            SELECT asset_id, caption, tags_json, status, model_version, updated_at
            FROM asset_ai WHERE asset_id = ?
            "#,
            [asset_id],
            |row| {
                let status: String = row.get(3)?;
                Ok(Annotation {
                    asset_id: row.get(0)?,
                    caption: row.get(1)?,
                    tags: tags_from_json(row.get(2)?),
                    status: AnnotationStatus::from_db(&status),
                    model_version: row.get(4)?,
                    updated_at: row.get(5)?,
                })
            },
        );
        match result {
            Ok(a) => Ok(Some(a)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Claim the oldest pending annotation across all projects, flipping it
    /// to `processing`. Returns `None` when the queue is empty. Trashed and
    /// non-image assets are skipped; only images can be captioned.
    pub fn next_pending_annotation(&self) -> Result<Option<PendingJob>> {
        let tx = self.conn.unchecked_transaction()?;
        let result = tx.query_row(
            r#"
            SELECT a.id, a.project_id, a.storage_path, a.mime_type, a.original_name
            FROM asset_ai ai
            JOIN assets a ON a.id = ai.asset_id
            WHERE ai.status = 'pending' AND a.deleted_at IS NULL
              AND a.mime_type LIKE 'image/%'
            ORDER BY ai.updated_at, a.id
            LIMIT 1
            "#,
            [],
            |row| {
                Ok(PendingJob {
                    asset_id: row.get(0)?,
                    project_id: row.get(1)?,
                    storage_path: row.get(2)?,
                    mime_type: row.get(3)?,
                    original_name: row.get(4)?,
                })
            },
        );
        let job = match result {
            Ok(job) => job,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        tx.execute(
            "UPDATE asset_ai SET status = 'processing', updated_at = ? WHERE asset_id = ?",
            params![now(), job.asset_id],
        )?;
        tx.commit()?;
        Ok(Some(job))
    }

    /// Record a successful annotation and make it searchable.
    pub fn write_annotation_result(
        &self,
        asset_id: &str,
        caption: &str,
        tags: &[String],
        model_version: &str,
    ) -> Result<()> {
        let tags_json = serde_json::to_string(tags)
            .map_err(|e| StoreError::Validation(format!("unserializable tags: {e}")))?;
        let tx = self.conn.unchecked_transaction()?;
        let changed = tx.execute(
            r#"
            UPDATE asset_ai
            SET caption = ?, tags_json = ?, status = 'done', model_version = ?, updated_at = ?
            WHERE asset_id = ?
            "#,
            params![caption, tags_json, model_version, now(), asset_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        search::refresh_search_row(&tx, asset_id)?;
        tx.commit()?;
        Ok(())
    }

    /// Mark an annotation attempt as failed. Earlier results are kept so a
    /// stale caption beats no caption.
    pub fn mark_annotation_failed(&self, asset_id: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE asset_ai SET status = 'failed', updated_at = ? WHERE asset_id = ?",
            params![now(), asset_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Queue one asset for (re-)annotation regardless of its current state.
    pub fn retry_annotation(&self, asset_id: &str) -> Result<()> {
        if self.get_asset(asset_id)?.is_none() {
            return Err(StoreError::NotFound);
        }
        self.conn.execute(
            r#"
            INSERT INTO asset_ai (asset_id, status, updated_at) VALUES (?, 'pending', ?)
            ON CONFLICT(asset_id) DO UPDATE SET status = 'pending', updated_at = excluded.updated_at
            "#,
            params![asset_id, now()],
        )?;
        Ok(())
    }

    /// Re-queue every failed annotation in one project.
    pub fn retry_failed_annotations(&self, project_id: &str) -> Result<usize> {
        let changed = self.conn.execute(
            r#"
            UPDATE asset_ai SET status = 'pending', updated_at = ?
            WHERE status = 'failed'
              AND asset_id IN (SELECT id FROM assets WHERE project_id = ? AND deleted_at IS NULL)
            "#,
            params![now(), project_id],
        )?;
        Ok(changed)
    }

    /// Re-queue failed rows, plus `processing` rows orphaned by a previous
    /// crash. Returns the number of rows flipped back to pending.
    pub fn retry_stalled_annotations(&self) -> Result<usize> {
        let changed = self.conn.execute(
            r#"
            UPDATE asset_ai SET status = 'pending', updated_at = ?
            WHERE status IN ('failed', 'processing')
            "#,
            [now()],
        )?;
        Ok(changed)
    }

    pub fn count_annotations_by_status(&self, status: AnnotationStatus) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM asset_ai WHERE status = ?",
            [status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
