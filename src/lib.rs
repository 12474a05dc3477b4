//! Easel: the local-first data layer for a visual asset organizer.
//!
//! One SQLite database plus a content-addressed file tree per data
//! directory. The [`db::Store`] handle carries all persistent operations:
//! projects, asset ingest and trash, versioned canvas documents, hybrid
//! search, and the AI annotation queue. Network calls (captioning,
//! embeddings) live behind traits so the store itself stays offline.

pub mod caption;
pub mod config;
pub mod db;
pub mod draft;
pub mod embed;
pub mod error;
pub mod logging;
pub mod storage;
pub mod worker;

pub use db::Store;
pub use error::{Result, StoreError};
