use crate::labels::{parse_labels, DEFAULT_MAX_LABELS, LABEL_PROMPT};
use crate::{mime_for_path, CategoryTable, ClassificationResult, ProviderError, Recognizer};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_labels: usize,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_labels: DEFAULT_MAX_LABELS,
        }
    }
}

/// Vision recognizer over an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct OpenAiRecognizer {
    client: Client,
    cfg: Arc<OpenAiConfig>,
    categories: CategoryTable,
    concurrency: usize,
}

impl OpenAiRecognizer {
    pub fn new(cfg: OpenAiConfig, categories: CategoryTable) -> Self {
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
        format!("{}/v1/chat/completions", self.cfg.base_url.trim_end_matches('/'))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessageResp,
}

#[derive(Deserialize)]
struct ChatMessageResp {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait::async_trait]
impl Recognizer for OpenAiRecognizer {
    fn name(&self) -> &str {
        "openai"
    }

    fn categories(&self) -> &CategoryTable {
        &self.categories
    }

    fn batch_concurrency(&self) -> usize {
        self.concurrency
    }

    async fn analyze_image(&self, image_path: &Path) -> Result<ClassificationResult, ProviderError> {
        let bytes = tokio::fs::read(image_path).await?;
        let data_url = format!("data:{};base64,{}", mime_for_path(image_path), STANDARD.encode(&bytes));

        let body = ChatRequest {
            model: &self.cfg.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: LABEL_PROMPT.to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                ],
            }],
            max_tokens: 200,
        };

        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("no choices in completion".into()))?;

        let labels = parse_labels(&content, self.cfg.max_labels);
        let category = self.categories.categorize(&labels);
        tracing::debug!(provider = "openai", path = %image_path.display(), %category, labels = labels.len(), "image analyzed");
        Ok(ClassificationResult::new(category, labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_content_parts() {
        let body = ChatRequest {
            model: "m",
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: "hi".into() },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: "data:image/png;base64,AA==".into(),
                        },
                    },
                ],
            }],
            max_tokens: 10,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["content"][0]["type"], "text");
        assert_eq!(json["messages"][0]["content"][1]["type"], "image_url");
        assert_eq!(
            json["messages"][0]["content"][1]["image_url"]["url"],
            "data:image/png;base64,AA=="
        );
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let mut cfg = OpenAiConfig::new("k");
        cfg.base_url = "http://localhost:8080/".into();
        let recognizer = OpenAiRecognizer::new(cfg, CategoryTable::default());
        assert_eq!(recognizer.endpoint(), "http://localhost:8080/v1/chat/completions");
    }

    #[tokio::test]
    async fn missing_image_is_an_io_error() {
        let recognizer = OpenAiRecognizer::new(OpenAiConfig::new("k"), CategoryTable::default());
        let err = recognizer
            .analyze_image(Path::new("/definitely/not/here.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Io(_)));
    }
}
