//! Cached segmentation overlays, keyed by (asset, tag).

use rusqlite::params;

use super::{now, Store};
use crate::error::{Result, StoreError};

#[derive(Debug, Clone)]
pub struct Segment {
    pub asset_id: String,
    pub tag: String,
    pub svg: Option<String>,
    pub boxes_json: Option<String>,
    pub updated_at: String,
}

impl Store {
    pub fn store_segment(
        &self,
        asset_id: &str,
        tag: &str,
        svg: Option<&str>,
        boxes_json: Option<&str>,
    ) -> Result<()> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(StoreError::Validation("segment tag is empty".into()));
        }
        if self.get_asset(asset_id)?.is_none() {
            return Err(StoreError::NotFound);
        }
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO asset_segments (asset_id, tag, svg, boxes_json, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
            params![asset_id, tag, svg, boxes_json, now()],
        )?;
        Ok(())
    }

    pub fn get_segment(&self, asset_id: &str, tag: &str) -> Result<Option<Segment>> {
        let result = self.conn.query_row(
            r#"
            SELECT asset_id, tag, svg, boxes_json, updated_at
            FROM asset_segments WHERE asset_id = ? AND tag = ?
            "#,
            params![asset_id, tag.trim()],
            |row| {
                Ok(Segment {
                    asset_id: row.get(0)?,
                    tag: row.get(1)?,
                    svg: row.get(2)?,
                    boxes_json: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            },
        );
        match result {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_segments(&self, asset_id: &str) -> Result<Vec<Segment>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT asset_id, tag, svg, boxes_json, updated_at
            FROM asset_segments WHERE asset_id = ? ORDER BY tag
            "#,
        )?;
        let segments = stmt
            .query_map([asset_id], |row| {
                Ok(Segment {
                    asset_id: row.get(0)?,
                    tag: row.get(1)?,
                    svg: row.get(2)?,
                    boxes_json: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(segments)
    }

    pub fn delete_segments(&self, asset_id: &str) -> Result<usize> {
        let changed = self
            .conn
            .execute("DELETE FROM asset_segments WHERE asset_id = ?", [asset_id])?;
        Ok(changed)
    }
}
