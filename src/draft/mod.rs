//! Client-side draft queue for canvas and viewport saves.
//!
//! Edits land here first: patches merge into one per-project draft, the
//! draft debounces, and a single flush pushes the merged document to the
//! store. At most one flush is in flight per project; edits arriving during
//! a flush re-dirty the draft so exactly one follow-up flush happens.
//! Drafts are mirrored to small JSON files so an unflushed edit survives a
//! crash and can be replayed on the next start.
//!
//! Time is passed in by the caller, so debounce behavior is testable
//! without sleeping.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::db::{CanvasObject, Store, Viewport};
use crate::error::Result;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(400);

/// A partial edit: only the documents it names are touched.
#[derive(Debug, Clone, Default)]
pub struct DraftPatch {
    pub canvas: Option<Vec<CanvasObject>>,
    pub viewport: Option<Viewport>,
}

/// The merged, not-yet-flushed state for one project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftDoc {
    pub canvas: Option<Vec<CanvasObject>>,
    pub viewport: Option<Viewport>,
}

impl DraftDoc {
    fn apply(&mut self, patch: DraftPatch) {
        if let Some(canvas) = patch.canvas {
            self.canvas = Some(canvas);
        }
        if let Some(viewport) = patch.viewport {
            self.viewport = Some(viewport);
        }
    }

    /// Fill fields this draft does not set from an older draft.
    fn backfill(&mut self, older: DraftDoc) {
        if self.canvas.is_none() {
            self.canvas = older.canvas;
        }
        if self.viewport.is_none() {
            self.viewport = older.viewport;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.canvas.is_none() && self.viewport.is_none()
    }
}

#[derive(Debug, Default)]
struct DraftState {
    doc: DraftDoc,
    dirty: bool,
    flushing: bool,
    last_change: Option<Instant>,
    hydrated: bool,
}

pub struct DraftQueue {
    cache_dir: PathBuf,
    debounce: Duration,
    drafts: HashMap<String, DraftState>,
}

impl DraftQueue {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            debounce: DEFAULT_DEBOUNCE,
            drafts: HashMap::new(),
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    fn cache_path(&self, project_id: &str) -> PathBuf {
        self.cache_dir.join(format!("{project_id}.draft.json"))
    }

    /// Merge an edit into the project's draft. The draft becomes (or stays)
    /// dirty and its debounce window restarts.
    pub fn submit(&mut self, project_id: &str, patch: DraftPatch, now: Instant) -> Result<()> {
        self.hydrate(project_id)?;
        let state = self.drafts.entry(project_id.to_string()).or_default();
        state.doc.apply(patch);
        state.dirty = true;
        state.last_change = Some(now);

        let path = self.cache_path(project_id);
        if let Err(e) = write_cache(&path, &self.drafts[project_id].doc) {
            // The in-memory draft is still authoritative; only crash
            // recovery degrades.
            warn!(project_id, error = %e, "Draft cache write failed");
        }
        Ok(())
    }

    /// Whether the project's draft has settled long enough to flush.
    pub fn ready(&self, project_id: &str, now: Instant) -> bool {
        match self.drafts.get(project_id) {
            Some(s) => {
                s.dirty
                    && !s.flushing
                    && s.last_change
                        .map(|t| now.duration_since(t) >= self.debounce)
                        .unwrap_or(false)
            }
            None => false,
        }
    }

    /// Take the draft for flushing. Returns `None` when there is nothing
    /// dirty or a flush is already in flight. The draft stays cached until
    /// the flush is confirmed.
    pub fn begin_flush(&mut self, project_id: &str) -> Option<DraftDoc> {
        let state = self.drafts.get_mut(project_id)?;
        if !state.dirty || state.flushing {
            return None;
        }
        state.dirty = false;
        state.flushing = true;
        Some(state.doc.clone())
    }

    /// Confirm a flush. A failed flush re-dirties the draft; a successful
    /// one drops the crash cache unless new edits arrived mid-flight.
    /// Returns whether another flush is needed.
    pub fn finish_flush(&mut self, project_id: &str, success: bool) -> bool {
        let Some(state) = self.drafts.get_mut(project_id) else {
            return false;
        };
        state.flushing = false;
        if !success {
            state.dirty = true;
        }
        if state.dirty {
            return true;
        }
        debug!(project_id, "Draft flushed");
        let path = self.cache_path(project_id);
        if let Err(e) = remove_cache(&path) {
            warn!(project_id, error = %e, "Draft cache removal failed");
        }
        self.drafts.remove(project_id);
        false
    }

    /// Load a crash-cached draft from disk, once per project. Fields already
    /// edited in this session win over the cached ones.
    pub fn hydrate(&mut self, project_id: &str) -> Result<Option<DraftDoc>> {
        let path = self.cache_path(project_id);
        let state = self.drafts.entry(project_id.to_string()).or_default();
        if state.hydrated {
            return Ok(None);
        }
        state.hydrated = true;

        let cached = match read_cache(&path) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(project_id, error = %e, "Discarding unreadable draft cache");
                let _ = remove_cache(&path);
                None
            }
        };
        let Some(cached) = cached else {
            return Ok(None);
        };

        state.doc.backfill(cached.clone());
        state.dirty = true;
        Ok(Some(cached))
    }

    /// Flush every settled draft to the store with unconditional writes
    /// (the draft already merged everything newer). Returns how many
    /// projects flushed cleanly; failed flushes stay queued.
    pub fn flush_ready(&mut self, store: &Store, now: Instant) -> usize {
        let mut flushed = 0;
        for project_id in self.dirty_projects() {
            if !self.ready(&project_id, now) {
                continue;
            }
            let Some(doc) = self.begin_flush(&project_id) else {
                continue;
            };

            let mut ok = true;
            if let Some(canvas) = &doc.canvas {
                if let Err(e) = store.write_canvas(&project_id, canvas, None) {
                    warn!(project_id, error = %e, "Canvas flush failed");
                    ok = false;
                }
            }
            if ok {
                if let Some(viewport) = &doc.viewport {
                    if let Err(e) = store.write_viewport(&project_id, viewport, None) {
                        warn!(project_id, error = %e, "Viewport flush failed");
                        ok = false;
                    }
                }
            }
            self.finish_flush(&project_id, ok);
            if ok {
                flushed += 1;
            }
        }
        flushed
    }

    /// Projects with a dirty draft, for the flush scheduler.
    pub fn dirty_projects(&self) -> Vec<String> {
        self.drafts
            .iter()
            .filter(|(_, s)| s.dirty)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

fn write_cache(path: &Path, doc: &DraftDoc) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string(doc)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, json)?;
    Ok(())
}

fn read_cache(path: &Path) -> Result<Option<DraftDoc>> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let doc = serde_json::from_str(&text)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            Ok(Some(doc))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn remove_cache(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ObjectKind;

    fn obj(id: &str) -> CanvasObject {
        CanvasObject {
            id: id.to_string(),
            kind: ObjectKind::Shape,
            asset_id: None,
            x: 0.0,
            y: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            rotation: 0.0,
            width: None,
            height: None,
            z_index: 0,
            props_json: None,
        }
    }

    fn view(zoom: f64) -> Viewport {
        Viewport {
            world_x: 0.0,
            world_y: 0.0,
            zoom,
        }
    }

    fn queue(dir: &Path) -> DraftQueue {
        DraftQueue::new(dir).with_debounce(Duration::from_millis(100))
    }

    #[test]
    fn patches_merge_and_debounce() {
        let tmp = tempfile::tempdir().unwrap();
        let mut q = queue(tmp.path());
        let t0 = Instant::now();

        q.submit(
            "p1",
            DraftPatch {
                canvas: Some(vec![obj("a")]),
                viewport: None,
            },
            t0,
        )
        .unwrap();
        q.submit(
            "p1",
            DraftPatch {
                canvas: None,
                viewport: Some(view(2.0)),
            },
            t0 + Duration::from_millis(50),
        )
        .unwrap();

        // Second edit restarted the window.
        assert!(!q.ready("p1", t0 + Duration::from_millis(120)));
        assert!(q.ready("p1", t0 + Duration::from_millis(160)));

        let doc = q.begin_flush("p1").unwrap();
        assert_eq!(doc.canvas.as_ref().unwrap().len(), 1);
        assert_eq!(doc.viewport.unwrap().zoom, 2.0);
    }

    #[test]
    fn at_most_one_flush_in_flight() {
        let tmp = tempfile::tempdir().unwrap();
        let mut q = queue(tmp.path());
        let t0 = Instant::now();
        q.submit("p1", DraftPatch::default(), t0).unwrap();

        assert!(q.begin_flush("p1").is_some());
        assert!(q.begin_flush("p1").is_none());

        // An edit during the flush queues exactly one follow-up.
        q.submit(
            "p1",
            DraftPatch {
                viewport: Some(view(3.0)),
                ..Default::default()
            },
            t0 + Duration::from_millis(10),
        )
        .unwrap();
        assert!(q.finish_flush("p1", true));
        let doc = q.begin_flush("p1").unwrap();
        assert_eq!(doc.viewport.unwrap().zoom, 3.0);
        assert!(!q.finish_flush("p1", true));
        assert!(q.begin_flush("p1").is_none());
    }

    #[test]
    fn failed_flush_keeps_the_draft() {
        let tmp = tempfile::tempdir().unwrap();
        let mut q = queue(tmp.path());
        q.submit(
            "p1",
            DraftPatch {
                viewport: Some(view(1.5)),
                ..Default::default()
            },
            Instant::now(),
        )
        .unwrap();

        q.begin_flush("p1").unwrap();
        assert!(q.finish_flush("p1", false));
        let doc = q.begin_flush("p1").unwrap();
        assert_eq!(doc.viewport.unwrap().zoom, 1.5);
    }

    #[test]
    fn unflushed_draft_survives_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let t0 = Instant::now();
        {
            let mut q = queue(tmp.path());
            q.submit(
                "p1",
                DraftPatch {
                    canvas: Some(vec![obj("saved")]),
                    viewport: Some(view(4.0)),
                },
                t0,
            )
            .unwrap();
            // Crash: no flush.
        }

        let mut q = queue(tmp.path());
        let cached = q.hydrate("p1").unwrap().unwrap();
        assert_eq!(cached.viewport.unwrap().zoom, 4.0);
        let doc = q.begin_flush("p1").unwrap();
        assert_eq!(doc.canvas.as_ref().unwrap()[0].id, "saved");

        // Confirmed flush clears the cache; nothing to hydrate next time.
        assert!(!q.finish_flush("p1", true));
        let mut q2 = queue(tmp.path());
        assert!(q2.hydrate("p1").unwrap().is_none());
    }

    #[test]
    fn session_edits_win_over_cached_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let t0 = Instant::now();
        {
            let mut q = queue(tmp.path());
            q.submit(
                "p1",
                DraftPatch {
                    canvas: Some(vec![obj("old")]),
                    viewport: Some(view(1.0)),
                },
                t0,
            )
            .unwrap();
        }

        let mut q = queue(tmp.path());
        // New session edits the canvas before hydrating.
        q.submit(
            "p1",
            DraftPatch {
                canvas: Some(vec![obj("new")]),
                ..Default::default()
            },
            t0,
        )
        .unwrap();
        let doc = q.begin_flush("p1").unwrap();
        assert_eq!(doc.canvas.as_ref().unwrap()[0].id, "new");
        // But the viewport only existed in the cache and is kept.
        assert_eq!(doc.viewport.unwrap().zoom, 1.0);
    }

    #[test]
    fn flush_ready_pushes_settled_drafts_to_the_store() {
        let t = crate::db::testutil::open_temp();
        let p = t.store.create_project("P").unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let mut q = queue(tmp.path());
        let t0 = Instant::now();

        q.submit(
            &p.id,
            DraftPatch {
                canvas: Some(vec![obj("flushed")]),
                viewport: Some(view(2.5)),
            },
            t0,
        )
        .unwrap();

        // Within the debounce window nothing moves.
        assert_eq!(q.flush_ready(&t.store, t0 + Duration::from_millis(10)), 0);
        assert_eq!(t.store.get_canvas(&p.id).unwrap().rev, 0);

        assert_eq!(q.flush_ready(&t.store, t0 + Duration::from_millis(200)), 1);
        let canvas = t.store.get_canvas(&p.id).unwrap();
        assert_eq!(canvas.rev, 1);
        assert_eq!(canvas.data[0].id, "flushed");
        assert_eq!(t.store.get_viewport(&p.id).unwrap().data.zoom, 2.5);
        assert!(q.dirty_projects().is_empty());
    }

    #[test]
    fn failed_store_flush_stays_queued() {
        let t = crate::db::testutil::open_temp();
        let p = t.store.create_project("P").unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let mut q = queue(tmp.path());
        let t0 = Instant::now();

        // Invalid zoom makes the store reject the write.
        q.submit(
            &p.id,
            DraftPatch {
                viewport: Some(view(-1.0)),
                ..Default::default()
            },
            t0,
        )
        .unwrap();
        assert_eq!(q.flush_ready(&t.store, t0 + Duration::from_millis(200)), 0);
        assert_eq!(q.dirty_projects(), vec![p.id.clone()]);
    }

    #[test]
    fn hydrate_runs_once_per_project() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let mut q = queue(tmp.path());
            q.submit(
                "p1",
                DraftPatch {
                    viewport: Some(view(2.0)),
                    ..Default::default()
                },
                Instant::now(),
            )
            .unwrap();
        }

        let mut q = queue(tmp.path());
        assert!(q.hydrate("p1").unwrap().is_some());
        // Second call is a no-op even though the cache file still exists.
        assert!(q.hydrate("p1").unwrap().is_none());
        assert_eq!(q.dirty_projects(), vec!["p1".to_string()]);
    }

    #[test]
    fn corrupt_cache_is_discarded() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("p1.draft.json"), b"{not json").unwrap();
        let mut q = queue(tmp.path());
        assert!(q.hydrate("p1").unwrap().is_none());
        assert!(!tmp.path().join("p1.draft.json").exists());
    }
}
