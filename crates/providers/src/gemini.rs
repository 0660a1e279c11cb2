use crate::labels::{parse_labels, DEFAULT_MAX_LABELS, LABEL_PROMPT};
use crate::{mime_for_path, CategoryTable, ClassificationResult, ProviderError, Recognizer};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_labels: usize,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_labels: DEFAULT_MAX_LABELS,
        }
    }
}

/// Recognizer backed by Gemini `generateContent` with inline image data.
#[derive(Clone)]
pub struct GeminiRecognizer {
    client: Client,
    cfg: Arc<GeminiConfig>,
    categories: CategoryTable,
    concurrency: usize,
}

impl GeminiRecognizer {
    pub fn new(cfg: GeminiConfig, categories: CategoryTable) -> Self {
        Self {
            client: Client::new(),
            cfg: Arc::new(cfg),
            categories,
            concurrency: 4,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.cfg.base_url.trim_end_matches('/'),
            self.cfg.model
        )
    }
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    Inline { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

fn reply_text(resp: GenerateResponse) -> Option<String> {
    let text: Vec<String> = resp
        .candidates
        .into_iter()
        .next()?
        .content?
        .parts
        .into_iter()
        .filter_map(|p| p.text)
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text.join("\n"))
    }
}

#[async_trait::async_trait]
impl Recognizer for GeminiRecognizer {
    fn name(&self) -> &str {
        "gemini"
    }

    fn categories(&self) -> &CategoryTable {
        &self.categories
    }

    fn batch_concurrency(&self) -> usize {
        self.concurrency
    }

    async fn analyze_image(&self, image_path: &Path) -> Result<ClassificationResult, ProviderError> {
        let bytes = tokio::fs::read(image_path).await?;
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text {
                        text: LABEL_PROMPT.to_string(),
                    },
                    Part::Inline {
                        inline_data: InlineData {
                            mime_type: mime_for_path(image_path).to_string(),
                            data: STANDARD.encode(&bytes),
                        },
                    },
                ],
            }],
        };

        let resp = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.cfg.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        let text = reply_text(parsed)
            .ok_or_else(|| ProviderError::InvalidResponse("no text in Gemini response".into()))?;

        let labels = parse_labels(&text, self.cfg.max_labels);
        let category = self.categories.categorize(&labels);
        tracing::debug!(provider = "gemini", path = %image_path.display(), %category, labels = labels.len(), "image analyzed");
        Ok(ClassificationResult::new(category, labels))
    }
}
