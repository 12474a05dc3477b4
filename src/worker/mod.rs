//! Background annotation worker.
//!
//! Drains the pending annotation queue one asset at a time: caption the
//! file, persist the result, and (when semantic search is on) store an
//! embedding of the caption. Each claimed job ends in `done` or `failed`;
//! nothing is retried implicitly within a run.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use crate::caption::CaptionProvider;
use crate::db::Store;
use crate::embed::Embedder;

pub struct Worker<'a> {
    store: &'a Store,
    provider: Box<dyn CaptionProvider>,
    embedder: Option<Box<dyn Embedder>>,
}

impl<'a> Worker<'a> {
    pub fn new(
        store: &'a Store,
        provider: Box<dyn CaptionProvider>,
        embedder: Option<Box<dyn Embedder>>,
    ) -> Self {
        Self {
            store,
            provider,
            embedder,
        }
    }

    /// Process at most one queued annotation. Returns whether a job was
    /// claimed, so callers can drain eagerly and only sleep when idle.
    pub fn run_once(&self) -> Result<bool> {
        let Some(job) = self.store.next_pending_annotation()? else {
            return Ok(false);
        };

        let image_path = self.store.layout().absolute(&job.storage_path);
        match self.provider.annotate(&image_path, &job.mime_type) {
            Ok(result) => {
                self.store.write_annotation_result(
                    &job.asset_id,
                    &result.caption,
                    &result.tags,
                    &result.model_version,
                )?;
                info!(
                    asset_id = %job.asset_id,
                    provider = self.provider.name(),
                    tags = result.tags.len(),
                    "Annotated asset"
                );
                if let Some(embedder) = &self.embedder {
                    let text = format!("{} {}", job.original_name, result.caption);
                    match embedder.embed(&text) {
                        Ok(embedding) => {
                            self.store.store_embedding(
                                &job.asset_id,
                                &embedding.model,
                                &embedding.vector,
                            )?;
                        }
                        Err(e) => {
                            // The caption is already saved; the embedding can
                            // be backfilled on a later pass.
                            warn!(asset_id = %job.asset_id, error = %e, "Embedding failed");
                        }
                    }
                }
            }
            Err(e) => {
                warn!(asset_id = %job.asset_id, error = %e, "Annotation failed");
                self.store.mark_annotation_failed(&job.asset_id)?;
            }
        }
        Ok(true)
    }

    /// Poll the queue until `stop` is raised. Store-level errors are logged
    /// and retried after the poll interval; they never kill the loop.
    pub fn run_loop(&self, poll: Duration, stop: &AtomicBool) {
        while !stop.load(Ordering::Relaxed) {
            match self.run_once() {
                Ok(true) => continue,
                Ok(false) => std::thread::sleep(poll),
                Err(e) => {
                    warn!(error = %e, "Worker pass failed");
                    std::thread::sleep(poll);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caption::CaptionResult;
    use crate::db::testutil::open_temp;
    use crate::db::AnnotationStatus;
    use crate::embed::QueryEmbedding;
    use std::path::Path;

    struct StubProvider {
        fail: bool,
    }

    impl CaptionProvider for StubProvider {
        fn annotate(&self, _image_path: &Path, _mime_type: &str) -> Result<CaptionResult> {
            if self.fail {
                anyhow::bail!("station offline")
            }
            Ok(CaptionResult {
                caption: "a stub caption".into(),
                tags: vec!["stub".into()],
                model_version: "stub-1".into(),
            })
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    struct StubEmbedder;

    impl Embedder for StubEmbedder {
        fn embed(&self, _text: &str) -> Result<QueryEmbedding> {
            Ok(QueryEmbedding {
                model: "stub-embed".into(),
                vector: vec![1.0, 0.0],
            })
        }
    }

    fn ingest_image(t: &crate::db::testutil::TestStore, project: &str, bytes: &[u8]) -> String {
        let mut reader: &[u8] = bytes;
        t.store
            .ingest(project, &mut reader, "pic.png", "image/png")
            .unwrap()
            .asset
            .id
    }

    #[test]
    fn idle_queue_reports_no_work() {
        let t = open_temp();
        let worker = Worker::new(&t.store, Box::new(StubProvider { fail: false }), None);
        assert!(!worker.run_once().unwrap());
    }

    #[test]
    fn successful_pass_writes_caption_and_embedding() {
        let t = open_temp();
        let p = t.store.create_project("P").unwrap();
        let id = ingest_image(&t, &p.id, b"img");

        let worker = Worker::new(
            &t.store,
            Box::new(StubProvider { fail: false }),
            Some(Box::new(StubEmbedder)),
        );
        assert!(worker.run_once().unwrap());

        let annotation = t.store.get_annotation(&id).unwrap().unwrap();
        assert_eq!(annotation.status, AnnotationStatus::Done);
        assert_eq!(annotation.caption.as_deref(), Some("a stub caption"));
        let embedding = t.store.get_embedding(&id).unwrap().unwrap();
        assert_eq!(embedding.model_name, "stub-embed");
    }

    #[test]
    fn provider_failure_marks_job_failed() {
        let t = open_temp();
        let p = t.store.create_project("P").unwrap();
        let id = ingest_image(&t, &p.id, b"img");

        let worker = Worker::new(&t.store, Box::new(StubProvider { fail: true }), None);
        assert!(worker.run_once().unwrap());
        assert_eq!(
            t.store.get_annotation(&id).unwrap().unwrap().status,
            AnnotationStatus::Failed
        );
        // The failed job is not reclaimed.
        assert!(!worker.run_once().unwrap());
    }
}
