//! Text embedding client for semantic search.
//!
//! The store never talks to the network itself; it takes an `Embedder` at
//! the call site. The HTTP implementation speaks the OpenAI-style
//! `/v1/embeddings` contract, which both the local station and hosted
//! endpoints serve.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::AiConfig;
use crate::db::embeddings::normalize;

#[derive(Debug, Clone)]
pub struct QueryEmbedding {
    pub model: String,
    pub vector: Vec<f32>,
}

pub trait Embedder {
    fn embed(&self, text: &str) -> Result<QueryEmbedding>;

    /// Model identity, used to pair query vectors with stored ones.
    fn model(&self) -> &str {
        "unknown"
    }
}

pub struct HttpEmbedder {
    agent: ureq::Agent,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(endpoint: &str, api_key: Option<&str>, model: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(30))
            .build();
        Self {
            agent,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.map(str::to_string),
            model: model.to_string(),
        }
    }
}

impl Embedder for HttpEmbedder {
    fn embed(&self, text: &str) -> Result<QueryEmbedding> {
        let url = format!("{}/v1/embeddings", self.endpoint);
        let mut request = self.agent.post(&url).set("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            request = request.set("Authorization", &format!("Bearer {key}"));
        }

        let response: EmbeddingsResponse = request
            .send_json(ureq::json!({
                "model": self.model,
                "input": text,
            }))
            .with_context(|| format!("embedding request to {url} failed"))?
            .into_json()
            .context("malformed embeddings response")?;

        let item = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("embeddings response contained no vectors"))?;
        if item.embedding.is_empty() {
            return Err(anyhow!("embeddings response contained an empty vector"));
        }
        debug!(model = %self.model, dim = item.embedding.len(), "Embedded query text");

        Ok(QueryEmbedding {
            model: self.model.clone(),
            vector: normalize(&item.embedding),
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Build the embedder the configuration calls for, or `None` when semantic
/// search is switched off.
pub fn create_embedder(ai: &AiConfig) -> Option<Box<dyn Embedder>> {
    if !ai.semantic_search {
        return None;
    }
    Some(Box::new(HttpEmbedder::new(
        &ai.endpoint,
        ai.api_key.as_deref(),
        &ai.embedding_model,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedder_is_absent_when_semantic_search_is_off() {
        let ai = AiConfig::default();
        assert!(create_embedder(&ai).is_none());

        let mut on = AiConfig::default();
        on.semantic_search = true;
        let embedder = create_embedder(&on).unwrap();
        assert_eq!(embedder.model(), "nomic-embed-text");
    }

    #[test]
    fn endpoint_trailing_slash_is_normalized() {
        let e = HttpEmbedder::new("http://localhost:2020/", None, "m");
        assert_eq!(e.endpoint, "http://localhost:2020");
    }
}
