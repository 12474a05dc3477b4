//! Canvas and viewport documents with revision-counted writes.
//!
//! Each project carries two independently versioned documents: the canvas
//! (the full set of placed objects) and the viewport (camera position).
//! Writes replace the whole document. A caller that passes its base
//! revision gets first-writer-wins semantics; passing `None` is an
//! unconditional last-writer-wins save, used by background flushes that
//! have already merged.

use rusqlite::params;
use serde::{Deserialize, Serialize};

use super::{now, Store};
use crate::error::{Result, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Image,
    Text,
    Shape,
    Group,
    /// Kinds written by newer clients round-trip untouched.
    #[serde(untagged)]
    Other(String),
}

impl ObjectKind {
    pub fn as_str(&self) -> &str {
        match self {
            ObjectKind::Image => "image",
            ObjectKind::Text => "text",
            ObjectKind::Shape => "shape",
            ObjectKind::Group => "group",
            ObjectKind::Other(s) => s,
        }
    }

    fn from_db(s: String) -> Self {
        match s.as_str() {
            "image" => ObjectKind::Image,
            "text" => ObjectKind::Text,
            "shape" => ObjectKind::Shape,
            "group" => ObjectKind::Group,
            _ => ObjectKind::Other(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasObject {
    pub id: String,
    pub kind: ObjectKind,
    pub asset_id: Option<String>,
    pub x: f64,
    pub y: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub rotation: f64,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub z_index: i64,
    pub props_json: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub world_x: f64,
    pub world_y: f64,
    pub zoom: f64,
}

/// A versioned read or write result: the document plus the revision and
/// timestamp it was observed (or committed) at.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    pub data: T,
    pub rev: i64,
    pub updated_at: String,
}

fn check_finite(name: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(StoreError::Validation(format!("{name} is not finite")))
    }
}

impl Store {
    /// Read the canvas document and its revision as one snapshot; the pair
    /// always corresponds to a single commit point.
    pub fn get_canvas(&self, project_id: &str) -> Result<Snapshot<Vec<CanvasObject>>> {
        let tx = self.conn.unchecked_transaction()?;
        let (rev, updated_at) = sync_row_tx(&tx, project_id, "canvas_rev", "canvas_updated_at")?;

        let objects = {
            let mut stmt = tx.prepare(
                r#"
                SELECT id, kind, asset_id, x, y, scale_x, scale_y, rotation,
                       width, height, z_index, props_json
                FROM canvas_objects
                WHERE project_id = ?
                ORDER BY z_index, id
                "#,
            )?;
            let objects: Vec<CanvasObject> = stmt.query_map([project_id], |row| {
                Ok(CanvasObject {
                    id: row.get(0)?,
                    kind: ObjectKind::from_db(row.get(1)?),
                    asset_id: row.get(2)?,
                    x: row.get(3)?,
                    y: row.get(4)?,
                    scale_x: row.get(5)?,
                    scale_y: row.get(6)?,
                    rotation: row.get(7)?,
                    width: row.get(8)?,
                    height: row.get(9)?,
                    z_index: row.get(10)?,
                    props_json: row.get(11)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
            objects
        };
        tx.commit()?;

        Ok(Snapshot {
            data: objects,
            rev,
            updated_at,
        })
    }

    /// Replace the canvas document.
    ///
    /// With `expected_rev`, the write only lands if the stored revision
    /// still matches; otherwise the current revision comes back in the
    /// `Conflict` error and nothing changes.
    pub fn write_canvas(
        &self,
        project_id: &str,
        objects: &[CanvasObject],
        expected_rev: Option<i64>,
    ) -> Result<Snapshot<()>> {
        for (i, obj) in objects.iter().enumerate() {
            if obj.id.trim().is_empty() {
                return Err(StoreError::Validation(format!("object {i} has an empty id")));
            }
            check_finite("x", obj.x)?;
            check_finite("y", obj.y)?;
            check_finite("scale_x", obj.scale_x)?;
            check_finite("scale_y", obj.scale_y)?;
            check_finite("rotation", obj.rotation)?;
            if objects[..i].iter().any(|o| o.id == obj.id) {
                return Err(StoreError::Validation(format!(
                    "duplicate object id {}",
                    obj.id
                )));
            }
        }

        let tx = self.conn.unchecked_transaction()?;
        let (current_rev, updated_at) =
            sync_row_tx(&tx, project_id, "canvas_rev", "canvas_updated_at")?;
        if let Some(expected) = expected_rev {
            if expected != current_rev {
                return Err(StoreError::Conflict {
                    current_rev,
                    updated_at,
                });
            }
        }

        tx.execute("DELETE FROM canvas_objects WHERE project_id = ?", [project_id])?;
        {
            let mut insert = tx.prepare(
                r#"
                INSERT INTO canvas_objects
                    (project_id, id, kind, asset_id, x, y, scale_x, scale_y,
                     rotation, width, height, z_index, props_json)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )?;
            for obj in objects {
                insert.execute(params![
                    project_id,
                    obj.id,
                    obj.kind.as_str(),
                    obj.asset_id,
                    obj.x,
                    obj.y,
                    obj.scale_x,
                    obj.scale_y,
                    obj.rotation,
                    obj.width,
                    obj.height,
                    obj.z_index,
                    obj.props_json,
                ])?;
            }
        }

        let new_rev = current_rev + 1;
        let stamp = now();
        tx.execute(
            "UPDATE project_sync SET canvas_rev = ?, canvas_updated_at = ? WHERE project_id = ?",
            params![new_rev, stamp, project_id],
        )?;
        tx.commit()?;

        Ok(Snapshot {
            data: (),
            rev: new_rev,
            updated_at: stamp,
        })
    }

    pub fn get_viewport(&self, project_id: &str) -> Result<Snapshot<Viewport>> {
        let tx = self.conn.unchecked_transaction()?;
        let (rev, updated_at) = sync_row_tx(&tx, project_id, "view_rev", "view_updated_at")?;
        let viewport = tx.query_row(
            "SELECT world_x, world_y, zoom FROM canvas_view WHERE project_id = ?",
            [project_id],
            |row| {
                Ok(Viewport {
                    world_x: row.get(0)?,
                    world_y: row.get(1)?,
                    zoom: row.get(2)?,
                })
            },
        )?;
        tx.commit()?;
        Ok(Snapshot {
            data: viewport,
            rev,
            updated_at,
        })
    }

    pub fn write_viewport(
        &self,
        project_id: &str,
        viewport: &Viewport,
        expected_rev: Option<i64>,
    ) -> Result<Snapshot<()>> {
        check_finite("world_x", viewport.world_x)?;
        check_finite("world_y", viewport.world_y)?;
        if !viewport.zoom.is_finite() || viewport.zoom <= 0.0 {
            return Err(StoreError::Validation("zoom must be positive".into()));
        }

        let tx = self.conn.unchecked_transaction()?;
        let (current_rev, updated_at) =
            sync_row_tx(&tx, project_id, "view_rev", "view_updated_at")?;
        if let Some(expected) = expected_rev {
            if expected != current_rev {
                return Err(StoreError::Conflict {
                    current_rev,
                    updated_at,
                });
            }
        }

        tx.execute(
            "UPDATE canvas_view SET world_x = ?, world_y = ?, zoom = ? WHERE project_id = ?",
            params![viewport.world_x, viewport.world_y, viewport.zoom, project_id],
        )?;
        let new_rev = current_rev + 1;
        let stamp = now();
        tx.execute(
            "UPDATE project_sync SET view_rev = ?, view_updated_at = ? WHERE project_id = ?",
            params![new_rev, stamp, project_id],
        )?;
        tx.commit()?;

        Ok(Snapshot {
            data: (),
            rev: new_rev,
            updated_at: stamp,
        })
    }

}

fn sync_row_tx(
    conn: &rusqlite::Connection,
    project_id: &str,
    rev_col: &str,
    stamp_col: &str,
) -> Result<(i64, String)> {
    // Column names come from the two call sites, never from input.
    let sql = format!("SELECT {rev_col}, {stamp_col} FROM project_sync WHERE project_id = ?");
    let result = conn.query_row(&sql, [project_id], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    });
    match result {
        Ok(pair) => Ok(pair),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::NotFound),
        Err(e) => Err(e.into()),
    }
}
