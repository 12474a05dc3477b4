//! Hybrid asset search: FTS5 prefix matching plus optional vector ranking.
//!
//! The lexical index is derived state. Every mutation that changes what a
//! live asset looks like (ingest, annotation, trash, restore) refreshes that
//! asset's single FTS row inside the same transaction, so the index never
//! disagrees with the base tables.

use rusqlite::{params, Connection};
use tracing::{debug, warn};

use super::assets::{asset_from_row, Asset};
use super::{embeddings, Store};
use crate::embed::Embedder;
use crate::error::Result;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 200;

/// How a search request should rank: one path, or vector-first hybrid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    Lexical,
    /// Vector ranking, falling back to lexical when it yields nothing.
    Vector,
    #[default]
    Hybrid,
}

/// Which path produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitSource {
    Lexical,
    Vector,
}

#[derive(Debug, Clone)]
pub struct AssetHit {
    pub asset: Asset,
    pub score: f64,
    pub source: HitSource,
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// Reduce free text to an FTS5 prefix query. Everything outside
/// `[A-Za-z0-9_]` is a separator, so user input can never inject FTS syntax.
fn fts_query(raw: &str) -> Option<String> {
    let tokens: Vec<String> = raw
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| format!("{}*", t.to_lowercase()))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" "))
    }
}

/// Rewrite the FTS row for one asset from the base tables. Trashed or
/// missing assets end up with no row. Callers run this inside the same
/// transaction as the change that made the row stale.
pub(crate) fn refresh_search_row(conn: &Connection, asset_id: &str) -> Result<()> {
    conn.execute("DELETE FROM asset_search WHERE asset_id = ?", [asset_id])?;

    let row = conn.query_row(
        r#"
        SELECT a.project_id, a.original_name, COALESCE(ai.caption, ''), ai.tags_json
        FROM assets a
        LEFT JOIN asset_ai ai ON ai.asset_id = a.id
        WHERE a.id = ? AND a.deleted_at IS NULL
        "#,
        [asset_id],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        },
    );
    let (project_id, original_name, caption, tags_json) = match row {
        Ok(values) => values,
        Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    // The index holds the tags as plain space-joined text, not their JSON
    // encoding.
    let tags = tags_json
        .and_then(|s| serde_json::from_str::<Vec<String>>(&s).ok())
        .unwrap_or_default()
        .join(" ");
    conn.execute(
        r#"
        INSERT INTO asset_search (asset_id, project_id, original_name, caption, tags)
        VALUES (?, ?, ?, ?, ?)
        "#,
        params![asset_id, project_id, original_name, caption, tags],
    )?;
    Ok(())
}

impl Store {
    /// Search a project's live assets in the requested mode.
    ///
    /// `Hybrid` ranks vector hits first and fills the remainder lexically;
    /// `Vector` returns the vector ranking alone, dropping back to lexical
    /// only when it yields nothing. The vector path needs an embedder; when
    /// it is absent or fails, results degrade to lexical, never to an error.
    /// An effectively-empty query lists recent assets.
    pub fn search(
        &self,
        project_id: &str,
        query: &str,
        limit: Option<usize>,
        mode: SearchMode,
        embedder: Option<&dyn Embedder>,
    ) -> Result<Vec<AssetHit>> {
        let limit = clamp_limit(limit);
        if mode == SearchMode::Lexical {
            return self.search_lexical(project_id, query, Some(limit));
        }

        let vector_hits = match embedder {
            Some(embedder) => self.search_vector(project_id, query, limit, embedder)?,
            None => Vec::new(),
        };

        if mode == SearchMode::Vector {
            if vector_hits.is_empty() {
                return self.search_lexical(project_id, query, Some(limit));
            }
            return Ok(vector_hits);
        }

        let mut hits = vector_hits;
        for hit in self.search_lexical(project_id, query, Some(limit))? {
            if hits.len() >= limit {
                break;
            }
            if hits.iter().any(|h| h.asset.id == hit.asset.id) {
                continue;
            }
            hits.push(hit);
        }
        hits.truncate(limit);
        Ok(hits)
    }

    pub fn search_lexical(
        &self,
        project_id: &str,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<AssetHit>> {
        let limit = clamp_limit(limit);
        let Some(match_expr) = fts_query(query) else {
            // Nothing searchable in the query; fall back to recency.
            let recent = self.list_assets(project_id)?;
            return Ok(recent
                .into_iter()
                .take(limit)
                .map(|asset| AssetHit {
                    asset,
                    score: 0.0,
                    source: HitSource::Lexical,
                })
                .collect());
        };

        let mut stmt = self.conn.prepare(
            r#"
            SELECT a.id, a.project_id, a.original_name, a.mime_type, a.byte_size,
                   a.content_hash, a.storage_path, a.thumbnail_path, a.width, a.height,
                   a.created_at, a.deleted_at, a.trashed_storage_path, a.trashed_thumbnail_path,
                   asset_search.rank
            FROM asset_search
            JOIN assets a ON a.id = asset_search.asset_id
            WHERE asset_search.project_id = ? AND asset_search MATCH ? AND a.deleted_at IS NULL
            ORDER BY asset_search.rank, a.id
            LIMIT ?
            "#,
        )?;
        let hits = stmt
            .query_map(params![project_id, match_expr, limit as i64], |row| {
                let asset = asset_from_row(row)?;
                let rank: f64 = row.get(14)?;
                Ok(AssetHit {
                    asset,
                    // FTS5 rank is negative (better = more negative); flip it
                    // so bigger means better like the vector side.
                    score: -rank,
                    source: HitSource::Lexical,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(hits)
    }

    /// Vector ranking over stored embeddings. Degrades to an empty result
    /// set instead of failing: embedding outages must never break search.
    pub fn search_vector(
        &self,
        project_id: &str,
        query: &str,
        limit: usize,
        embedder: &dyn Embedder,
    ) -> Result<Vec<AssetHit>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query_embedding = match embedder.embed(query) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "Query embedding failed; falling back to lexical search");
                return Ok(Vec::new());
            }
        };

        let records =
            self.embeddings_for_project(project_id, &query_embedding.model)?;
        if records.is_empty() {
            debug!(project_id, "No embeddings for model; vector search skipped");
            return Ok(Vec::new());
        }

        let mut scored: Vec<(String, f64)> = records
            .iter()
            .filter(|r| r.vector.len() == query_embedding.vector.len())
            .map(|r| {
                (
                    r.asset_id.clone(),
                    embeddings::dot(&r.vector, &query_embedding.vector) as f64,
                )
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit);

        let mut hits = Vec::with_capacity(scored.len());
        for (asset_id, score) in scored {
            if let Some(asset) = self.get_asset(&asset_id)? {
                hits.push(AssetHit {
                    asset,
                    score,
                    source: HitSource::Vector,
                });
            }
        }
        Ok(hits)
    }

    /// Rebuild a project's whole lexical index from the base tables.
    pub fn rebuild_search_index(&self, project_id: &str) -> Result<usize> {
        let assets = self.list_assets(project_id)?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM asset_search WHERE project_id = ?", [project_id])?;
        for asset in &assets {
            refresh_search_row(&tx, &asset.id)?;
        }
        tx.commit()?;
        Ok(assets.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testutil::open_temp;
    use crate::embed::QueryEmbedding;

    struct FixedEmbedder {
        model: String,
        vector: Vec<f32>,
    }

    impl Embedder for FixedEmbedder {
        fn embed(&self, _text: &str) -> anyhow::Result<QueryEmbedding> {
            Ok(QueryEmbedding {
                model: self.model.clone(),
                vector: self.vector.clone(),
            })
        }
    }

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn embed(&self, _text: &str) -> anyhow::Result<QueryEmbedding> {
            anyhow::bail!("embedding endpoint unreachable")
        }
    }

    fn ingest_named(t: &crate::db::testutil::TestStore, project: &str, name: &str) -> Asset {
        let mut reader: &[u8] = name.as_bytes();
        t.store
            .ingest(project, &mut reader, name, "text/plain")
            .unwrap()
            .asset
    }

    #[test]
    fn fts_query_strips_operators() {
        assert_eq!(fts_query("sunset beach"), Some("sunset* beach*".into()));
        assert_eq!(fts_query("NEAR(\"x\")"), Some("near* x*".into()));
        assert_eq!(fts_query("  --  "), None);
        assert_eq!(fts_query(""), None);
    }

    #[test]
    fn lexical_search_matches_name_prefix() {
        let t = open_temp();
        let p = t.store.create_project("P").unwrap();
        let sunset = ingest_named(&t, &p.id, "sunset-beach.txt");
        ingest_named(&t, &p.id, "city-night.txt");

        let hits = t.store.search_lexical(&p.id, "suns", None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].asset.id, sunset.id);
    }

    #[test]
    fn empty_query_lists_recent_assets() {
        let t = open_temp();
        let p = t.store.create_project("P").unwrap();
        ingest_named(&t, &p.id, "a.txt");
        ingest_named(&t, &p.id, "b.txt");

        let hits = t
            .store
            .search(&p.id, "   ", None, SearchMode::Hybrid, None)
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn indexed_tags_are_plain_joined_text() {
        let t = open_temp();
        let p = t.store.create_project("P").unwrap();
        let mut reader: &[u8] = b"img";
        let asset = t
            .store
            .ingest(&p.id, &mut reader, "pic.png", "image/png")
            .unwrap()
            .asset;
        t.store.next_pending_annotation().unwrap().unwrap();
        t.store
            .write_annotation_result(&asset.id, "a cat", &["cat".into(), "animal".into()], "m")
            .unwrap();

        let stored: String = t
            .store
            .conn
            .query_row(
                "SELECT tags FROM asset_search WHERE asset_id = ?",
                [&asset.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(stored, "cat animal");
        assert_eq!(t.store.search_lexical(&p.id, "animal", None).unwrap().len(), 1);
    }

    #[test]
    fn trashed_assets_never_match() {
        let t = open_temp();
        let p = t.store.create_project("P").unwrap();
        let asset = ingest_named(&t, &p.id, "findme.txt");

        t.store.delete_asset(&asset.id).unwrap();
        assert!(t.store.search_lexical(&p.id, "findme", None).unwrap().is_empty());

        t.store.restore_asset(&asset.id).unwrap();
        assert_eq!(t.store.search_lexical(&p.id, "findme", None).unwrap().len(), 1);
    }

    #[test]
    fn embedder_failure_degrades_to_lexical() {
        let t = open_temp();
        let p = t.store.create_project("P").unwrap();
        ingest_named(&t, &p.id, "degrade.txt");

        for mode in [SearchMode::Vector, SearchMode::Hybrid] {
            let hits = t
                .store
                .search(&p.id, "degrade", None, mode, Some(&FailingEmbedder))
                .unwrap();
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].source, HitSource::Lexical);
        }
    }

    #[test]
    fn vector_mode_without_embedder_falls_back_to_lexical() {
        let t = open_temp();
        let p = t.store.create_project("P").unwrap();
        ingest_named(&t, &p.id, "fallback.txt");

        let hits = t
            .store
            .search(&p.id, "fallback", None, SearchMode::Vector, None)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, HitSource::Lexical);
    }

    #[test]
    fn vector_mode_returns_only_vector_hits_when_present() {
        let t = open_temp();
        let p = t.store.create_project("P").unwrap();
        let embedded = ingest_named(&t, &p.id, "match-embedded.txt");
        ingest_named(&t, &p.id, "match-lexical-only.txt");
        t.store
            .store_embedding(&embedded.id, "m", &[1.0, 0.0])
            .unwrap();

        let embedder = FixedEmbedder {
            model: "m".into(),
            vector: vec![1.0, 0.0],
        };
        let hits = t
            .store
            .search(&p.id, "match", None, SearchMode::Vector, Some(&embedder))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].asset.id, embedded.id);
        assert_eq!(hits[0].source, HitSource::Vector);
    }

    #[test]
    fn vector_hits_rank_ahead_of_lexical_without_duplicates() {
        let t = open_temp();
        let p = t.store.create_project("P").unwrap();
        let close = ingest_named(&t, &p.id, "query-near.txt");
        let far = ingest_named(&t, &p.id, "query-far.txt");

        t.store
            .store_embedding(&close.id, "m", &[1.0, 0.0])
            .unwrap();
        t.store.store_embedding(&far.id, "m", &[0.0, 1.0]).unwrap();

        let embedder = FixedEmbedder {
            model: "m".into(),
            vector: vec![1.0, 0.0],
        };
        let hits = t
            .store
            .search(&p.id, "query", None, SearchMode::Hybrid, Some(&embedder))
            .unwrap();
        // Both assets also match lexically; each appears once.
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].asset.id, close.id);
        assert_eq!(hits[0].source, HitSource::Vector);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn hybrid_fills_lexical_only_hits_after_vector_hits() {
        let t = open_temp();
        let p = t.store.create_project("P").unwrap();
        let embedded = ingest_named(&t, &p.id, "paint-embedded.txt");
        let lexical_only = ingest_named(&t, &p.id, "paint-plain.txt");
        t.store
            .store_embedding(&embedded.id, "m", &[1.0, 0.0])
            .unwrap();

        let embedder = FixedEmbedder {
            model: "m".into(),
            vector: vec![1.0, 0.0],
        };
        let hits = t
            .store
            .search(&p.id, "paint", None, SearchMode::Hybrid, Some(&embedder))
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].asset.id, embedded.id);
        assert_eq!(hits[0].source, HitSource::Vector);
        assert_eq!(hits[1].asset.id, lexical_only.id);
        assert_eq!(hits[1].source, HitSource::Lexical);
        // No duplicates.
        assert_ne!(hits[0].asset.id, hits[1].asset.id);
    }

    #[test]
    fn mismatched_model_embeddings_are_ignored() {
        let t = open_temp();
        let p = t.store.create_project("P").unwrap();
        let asset = ingest_named(&t, &p.id, "other-model.txt");
        t.store
            .store_embedding(&asset.id, "old-model", &[1.0, 0.0])
            .unwrap();

        let embedder = FixedEmbedder {
            model: "new-model".into(),
            vector: vec![1.0, 0.0],
        };
        let hits = t
            .store
            .search_vector(&p.id, "anything", 10, &embedder)
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn limit_is_clamped() {
        assert_eq!(clamp_limit(None), 50);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(10_000)), 200);
    }
}
