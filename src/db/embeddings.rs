//! Embedding persistence for semantic search.
//!
//! Vectors are stored normalized as little-endian f32 blobs, one row per
//! asset, tagged with the model that produced them. Ranking only ever
//! compares vectors from the same model, so a dot product over normalized
//! vectors is the cosine similarity.

use rusqlite::params;

use super::{now, Store};
use crate::error::{Result, StoreError};

#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub asset_id: String,
    pub model_name: String,
    pub vector: Vec<f32>,
}

impl Store {
    /// Store (or replace) the embedding for an asset. The vector is
    /// normalized on write.
    pub fn store_embedding(&self, asset_id: &str, model_name: &str, vector: &[f32]) -> Result<()> {
        if vector.is_empty() {
            return Err(StoreError::Validation("embedding vector is empty".into()));
        }
        let normalized = normalize(vector);
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO asset_embeddings
                (asset_id, model_name, embedding_dim, embedding, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
            params![
                asset_id,
                model_name,
                normalized.len() as i64,
                to_bytes(&normalized),
                now()
            ],
        )?;
        Ok(())
    }

    pub fn get_embedding(&self, asset_id: &str) -> Result<Option<EmbeddingRecord>> {
        let result = self.conn.query_row(
            "SELECT asset_id, model_name, embedding FROM asset_embeddings WHERE asset_id = ?",
            [asset_id],
            |row| {
                let bytes: Vec<u8> = row.get(2)?;
                Ok(EmbeddingRecord {
                    asset_id: row.get(0)?,
                    model_name: row.get(1)?,
                    vector: from_bytes(&bytes),
                })
            },
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Embeddings for a project's live assets, restricted to one model.
    pub fn embeddings_for_project(
        &self,
        project_id: &str,
        model_name: &str,
    ) -> Result<Vec<EmbeddingRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT e.asset_id, e.model_name, e.embedding
            FROM asset_embeddings e
            JOIN assets a ON a.id = e.asset_id
            WHERE a.project_id = ? AND a.deleted_at IS NULL AND e.model_name = ?
            "#,
        )?;
        let records = stmt
            .query_map(params![project_id, model_name], |row| {
                let bytes: Vec<u8> = row.get(2)?;
                Ok(EmbeddingRecord {
                    asset_id: row.get(0)?,
                    model_name: row.get(1)?,
                    vector: from_bytes(&bytes),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }

    /// Live image assets that have no embedding for the given model yet.
    pub fn assets_missing_embeddings(
        &self,
        project_id: &str,
        model_name: &str,
        limit: usize,
    ) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT a.id
            FROM assets a
            LEFT JOIN asset_embeddings e
                ON e.asset_id = a.id AND e.model_name = ?
            WHERE a.project_id = ? AND a.deleted_at IS NULL
              AND a.mime_type LIKE 'image/%' AND e.asset_id IS NULL
            ORDER BY a.created_at
            LIMIT ?
            "#,
        )?;
        let ids = stmt
            .query_map(params![model_name, project_id, limit as i64], |row| {
                row.get(0)
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }
}

pub(crate) fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vector.to_vec();
    }
    vector.iter().map(|x| x / norm).collect()
}

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for &val in vector {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

fn from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let mut arr = [0u8; 4];
            arr.copy_from_slice(chunk);
            f32::from_le_bytes(arr)
        })
        .collect()
}
