use crate::http::build_client;
use crate::models::ProductCopy;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::time::{Duration, sleep};
use tracing::warn;

const DEFAULT_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const MAX_RETRIES: usize = 5;

const SYSTEM_PROMPT: &str = "You are an e-commerce catalog copywriter. For the given product \
name, write an ultra-concise, search-optimized description (30 words or fewer, no line breaks), \
infer a short category label, and guess the brand when it is obvious from the name. \
Respond with strict JSON only.";

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_url: String,
    pub api_keys: Vec<String>,
    pub model: String,
}

impl LlmConfig {
    pub fn from_env() -> Option<Self> {
        let api_keys: Vec<String> = std::env::var("GENAI_API_KEYS")
            .ok()?
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .collect();
        if api_keys.is_empty() {
            return None;
        }
        Some(Self {
            api_url: std::env::var("GENAI_API_URL")
                .unwrap_or_else(|_| DEFAULT_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_keys,
            model: std::env::var("GENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
        })
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("all {0} generative api keys exhausted")]
    KeysExhausted(usize),
    #[error("gave up after {0} attempts: {1}")]
    RetriesExhausted(usize, String),
}

/// Generative-text capability: one product name in, structured copy out.
/// Quota responses rotate to the next key; transient failures retry with
/// exponential backoff and jitter.
#[derive(Debug)]
pub struct DescriptionClient {
    http: Client,
    config: LlmConfig,
    key_index: AtomicUsize,
}

impl DescriptionClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: build_client(),
            config,
            key_index: AtomicUsize::new(0),
        }
    }

    pub fn from_env() -> Option<Self> {
        LlmConfig::from_env().map(Self::new)
    }

    pub async fn describe(&self, product_name: &str) -> Result<ProductCopy, LlmError> {
        let body = build_request(product_name);
        let mut last_error = String::new();

        for attempt in 0..MAX_RETRIES {
            let key_index = self.key_index.load(Ordering::Relaxed);
            let Some(key) = self.config.api_keys.get(key_index) else {
                return Err(LlmError::KeysExhausted(self.config.api_keys.len()));
            };
            let url = format!(
                "{base}/models/{model}:generateContent?key={key}",
                base = self.config.api_url,
                model = self.config.model,
            );

            let response = match self.http.post(&url).json(&body).send().await {
                Ok(response) => response,
                Err(err) => {
                    last_error = err.to_string();
                    warn!(
                        target = "catalogr.llm",
                        attempt,
                        error = %last_error,
                        "generate request failed; backing off",
                    );
                    backoff_pause(attempt).await;
                    continue;
                }
            };

            let status = response.status();
            if status.as_u16() == 429 {
                warn!(
                    target = "catalogr.llm",
                    key_index,
                    "rate limited; rotating generative key",
                );
                self.key_index.store(key_index + 1, Ordering::Relaxed);
                continue;
            }
            // Other client errors (bad request, invalid key) will not
            // improve with retries.
            if status.is_client_error() {
                return Err(LlmError::Http(format!("HTTP {status}")));
            }
            if !status.is_success() {
                last_error = format!("HTTP {status}");
                backoff_pause(attempt).await;
                continue;
            }

            let payload: GenerateResponse = response
                .json()
                .await
                .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;
            let text = payload
                .candidates
                .into_iter()
                .next()
                .and_then(|candidate| candidate.content.parts.into_iter().next())
                .map(|part| part.text)
                .ok_or_else(|| LlmError::InvalidResponse("missing candidate text".into()))?;
            return parse_copy(&text);
        }

        Err(LlmError::RetriesExhausted(MAX_RETRIES, last_error))
    }
}

fn build_request(product_name: &str) -> GenerateRequest {
    GenerateRequest {
        contents: vec![Content {
            parts: vec![Part {
                text: format!("Product name: {product_name}"),
            }],
        }],
        system_instruction: Content {
            parts: vec![Part {
                text: SYSTEM_PROMPT.to_string(),
            }],
        },
        generation_config: GenerationConfig {
            response_mime_type: "application/json".to_string(),
            response_schema: json!({
                "type": "OBJECT",
                "properties": {
                    "description": {"type": "STRING"},
                    "category": {"type": "STRING"},
                    "brand": {"type": "STRING"}
                },
                "required": ["description", "category"]
            }),
        },
    }
}

fn parse_copy(text: &str) -> Result<ProductCopy, LlmError> {
    let cleaned = strip_markdown_fence(text);
    let copy: ProductCopy = serde_json::from_str(&cleaned)
        .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;
    if copy.description.trim().is_empty() || copy.category.trim().is_empty() {
        return Err(LlmError::InvalidResponse(
            "empty description or category".into(),
        ));
    }
    Ok(copy)
}

fn strip_markdown_fence(input: &str) -> String {
    let trimmed = input.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut body = Vec::new();
    for line in trimmed.lines().skip(1) {
        if line.trim_start().starts_with("```") {
            break;
        }
        body.push(line);
    }
    body.join("\n")
}

async fn backoff_pause(attempt: usize) {
    let jitter: u64 = rand::random_range(0..500);
    sleep(Duration::from_millis((1 << attempt.min(4)) as u64 * 1000 + jitter)).await;
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "systemInstruction")]
    system_instruction: Content,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
    #[serde(rename = "responseSchema")]
    response_schema: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_json_is_unfenced_before_parsing() {
        let text = "```json\n{\"description\": \"Antiseptic liquid for first aid\", \
            \"category\": \"Personal Care\", \"brand\": \"Dettol\"}\n```";
        let copy = parse_copy(text).unwrap();
        assert_eq!(copy.brand, "Dettol");
        assert_eq!(copy.category, "Personal Care");
    }

    #[test]
    fn plain_json_parses_without_brand() {
        let copy =
            parse_copy(r#"{"description": "Instant noodles", "category": "Food"}"#).unwrap();
        assert!(copy.brand.is_empty());
    }

    #[test]
    fn empty_description_is_an_invalid_response() {
        let err =
            parse_copy(r#"{"description": " ", "category": "Food", "brand": "X"}"#).unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }

    #[test]
    fn response_payload_shape_matches_generate_content() {
        let raw = r#"{
            "candidates": [{
                "content": {
                    "parts": [{"text": "{\"description\":\"d\",\"category\":\"c\"}"}],
                    "role": "model"
                },
                "finishReason": "STOP"
            }]
        }"#;
        let payload: GenerateResponse = serde_json::from_str(raw).unwrap();
        let text = &payload.candidates[0].content.parts[0].text;
        let copy = parse_copy(text).unwrap();
        assert_eq!(copy.description, "d");
    }

    #[test]
    fn request_uses_json_schema_and_product_name() {
        let request = build_request("Dettol Antiseptic Liquid");
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert!(
            value["contents"][0]["parts"][0]["text"]
                .as_str()
                .unwrap()
                .contains("Dettol Antiseptic Liquid")
        );
        assert!(value["systemInstruction"]["parts"][0]["text"].is_string());
    }
}
