//! Project CRUD and cascading deletion.

use rusqlite::params;
use tracing::warn;
use uuid::Uuid;

use super::{now, Store};
use crate::error::{Result, StoreError};

#[derive(Debug, Clone)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Store {
    pub fn create_project(&self, name: &str) -> Result<Project> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Validation("project name is empty".into()));
        }

        let project = Project {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: now(),
            updated_at: now(),
        };

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO projects (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)",
            params![project.id, project.name, project.created_at, project.updated_at],
        )?;
        // Companion rows exist for the project's whole lifetime, so document
        // reads never have to special-case a missing row.
        tx.execute(
            r#"
            INSERT INTO project_sync (project_id, canvas_rev, view_rev, canvas_updated_at, view_updated_at)
            VALUES (?, 0, 0, ?, ?)
            "#,
            params![project.id, project.created_at, project.created_at],
        )?;
        tx.execute(
            "INSERT INTO canvas_view (project_id, world_x, world_y, zoom) VALUES (?, 0, 0, 1)",
            params![project.id],
        )?;
        tx.commit()?;

        Ok(project)
    }

    pub fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        let result = self.conn.query_row(
            "SELECT id, name, created_at, updated_at FROM projects WHERE id = ?",
            [project_id],
            |row| {
                Ok(Project {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            },
        );
        match result {
            Ok(p) => Ok(Some(p)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, created_at, updated_at FROM projects ORDER BY updated_at DESC",
        )?;
        let projects = stmt
            .query_map([], |row| {
                Ok(Project {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(projects)
    }

    pub fn rename_project(&self, project_id: &str, name: &str) -> Result<bool> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Validation("project name is empty".into()));
        }
        let changed = self.conn.execute(
            "UPDATE projects SET name = ?, updated_at = ? WHERE id = ?",
            params![name, now(), project_id],
        )?;
        Ok(changed > 0)
    }

    pub(crate) fn touch_project(&self, project_id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE projects SET updated_at = ? WHERE id = ?",
            params![now(), project_id],
        )?;
        Ok(())
    }

    /// Permanently delete a project and everything it owns, trash included.
    ///
    /// Rows are removed in fixed dependency order inside one transaction;
    /// file cleanup follows after commit and is best-effort.
    pub fn delete_project(&self, project_id: &str) -> Result<bool> {
        if self.get_project(project_id)?.is_none() {
            return Ok(false);
        }

        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM asset_search WHERE project_id = ?", [project_id])?;
        tx.execute(
            "DELETE FROM asset_segments WHERE asset_id IN (SELECT id FROM assets WHERE project_id = ?)",
            [project_id],
        )?;
        tx.execute(
            "DELETE FROM asset_embeddings WHERE asset_id IN (SELECT id FROM assets WHERE project_id = ?)",
            [project_id],
        )?;
        tx.execute(
            "DELETE FROM asset_ai WHERE asset_id IN (SELECT id FROM assets WHERE project_id = ?)",
            [project_id],
        )?;
        tx.execute("DELETE FROM canvas_objects WHERE project_id = ?", [project_id])?;
        tx.execute("DELETE FROM canvas_view WHERE project_id = ?", [project_id])?;
        tx.execute("DELETE FROM project_sync WHERE project_id = ?", [project_id])?;
        tx.execute("DELETE FROM assets WHERE project_id = ?", [project_id])?;
        tx.execute("DELETE FROM projects WHERE id = ?", [project_id])?;
        tx.commit()?;

        for dir in self.layout.project_dirs(project_id) {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(dir = %dir.display(), error = %e, "Failed to remove project directory");
                }
            }
        }
        Ok(true)
    }
}
