//! Caption providers: turn an image file into a caption plus tags.
//!
//! Two wire contracts are supported. The local caption station exposes a
//! single `/v1/caption` route and returns a bare caption; tags are derived
//! from it. OpenAI-compatible endpoints get a combined prompt and encode
//! tags on a trailing `TAGS:` line of the completion.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use crate::config::{AiConfig, AiProviderType};

const MAX_TAGS: usize = 25;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct CaptionResult {
    pub caption: String,
    pub tags: Vec<String>,
    pub model_version: String,
}

pub trait CaptionProvider {
    fn annotate(&self, image_path: &Path, mime_type: &str) -> Result<CaptionResult>;

    fn name(&self) -> &str;
}

fn agent() -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build()
}

fn data_url(image_path: &Path, mime_type: &str) -> Result<String> {
    let bytes = std::fs::read(image_path)
        .with_context(|| format!("reading image {}", image_path.display()))?;
    Ok(format!("data:{};base64,{}", mime_type, BASE64.encode(bytes)))
}

/// Fallback tags when the provider only returns prose: significant words of
/// the caption, deduplicated and bounded.
fn derive_tags(caption: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    caption
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.len() >= 4)
        .filter(|w| seen.insert(w.clone()))
        .take(MAX_TAGS)
        .collect()
}

/// Split a completion into caption text and the tags from its `TAGS:` line.
fn parse_tagged_completion(text: &str) -> (String, Vec<String>) {
    let mut caption_lines = Vec::new();
    let mut tags = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed
            .strip_prefix("TAGS:")
            .or_else(|| trimmed.strip_prefix("Tags:"))
            .or_else(|| trimmed.strip_prefix("tags:"))
        {
            for tag in rest.split(',') {
                let tag = tag.trim().to_lowercase();
                if !tag.is_empty() && !tags.contains(&tag) && tags.len() < MAX_TAGS {
                    tags.push(tag);
                }
            }
        } else if !trimmed.is_empty() {
            caption_lines.push(trimmed);
        }
    }
    (caption_lines.join(" "), tags)
}

// ============================================================================
// Local caption station
// ============================================================================

pub struct LocalStationProvider {
    agent: ureq::Agent,
    endpoint: String,
    model: String,
}

#[derive(Deserialize)]
struct StationResponse {
    caption: String,
    #[serde(default)]
    model: Option<String>,
}

impl LocalStationProvider {
    pub fn new(endpoint: &str, model: &str) -> Self {
        Self {
            agent: agent(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }
}

impl CaptionProvider for LocalStationProvider {
    fn annotate(&self, image_path: &Path, mime_type: &str) -> Result<CaptionResult> {
        let url = format!("{}/v1/caption", self.endpoint);
        let response: StationResponse = self
            .agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_json(ureq::json!({
                "image_url": data_url(image_path, mime_type)?,
                "length": "normal",
            }))
            .with_context(|| format!("caption request to {url} failed"))?
            .into_json()
            .context("malformed caption response")?;

        let caption = response.caption.trim().to_string();
        if caption.is_empty() {
            return Err(anyhow!("caption station returned an empty caption"));
        }
        let tags = derive_tags(&caption);
        Ok(CaptionResult {
            caption,
            tags,
            model_version: response.model.unwrap_or_else(|| self.model.clone()),
        })
    }

    fn name(&self) -> &str {
        "local-station"
    }
}

// ============================================================================
// OpenAI-compatible chat endpoint
// ============================================================================

pub struct OpenAiCompatibleProvider {
    agent: ureq::Agent,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(endpoint: &str, api_key: Option<&str>, model: &str) -> Self {
        Self {
            agent: agent(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.map(str::to_string),
            model: model.to_string(),
        }
    }
}

const CAPTION_PROMPT: &str = "Describe this image in one or two sentences for a searchable \
     asset library. Then on a final line write TAGS: followed by up to ten \
     comma-separated lowercase keywords.";

impl CaptionProvider for OpenAiCompatibleProvider {
    fn annotate(&self, image_path: &Path, mime_type: &str) -> Result<CaptionResult> {
        let url = format!("{}/v1/chat/completions", self.endpoint);
        let mut request = self.agent.post(&url).set("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            request = request.set("Authorization", &format!("Bearer {key}"));
        }

        let response: ChatResponse = request
            .send_json(ureq::json!({
                "model": self.model,
                "messages": [{
                    "role": "user",
                    "content": [
                        { "type": "text", "text": CAPTION_PROMPT },
                        { "type": "image_url",
                          "image_url": { "url": data_url(image_path, mime_type)? } },
                    ],
                }],
                "max_tokens": 300,
            }))
            .with_context(|| format!("caption request to {url} failed"))?
            .into_json()
            .context("malformed chat completion response")?;

        let content = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow!("chat completion contained no choices"))?;

        let (caption, mut tags) = parse_tagged_completion(&content);
        if caption.is_empty() {
            return Err(anyhow!("chat completion contained no caption text"));
        }
        if tags.is_empty() {
            tags = derive_tags(&caption);
        }
        Ok(CaptionResult {
            caption,
            tags,
            model_version: self.model.clone(),
        })
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}

/// Build the provider the configuration calls for.
pub fn create_provider(ai: &AiConfig) -> Box<dyn CaptionProvider> {
    match ai.provider {
        AiProviderType::LocalStation => {
            Box::new(LocalStationProvider::new(&ai.endpoint, &ai.model))
        }
        AiProviderType::OpenAiCompatible => Box::new(OpenAiCompatibleProvider::new(
            &ai.endpoint,
            ai.api_key.as_deref(),
            &ai.model,
        )),
    }
}
