use crate::http::build_client;
use crate::models::CandidateImage;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::{Duration, sleep};
use tracing::{info, warn};

const DEFAULT_API_URL: &str = "https://customsearch.googleapis.com/customsearch/v1";

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub api_url: String,
    pub api_keys: Vec<String>,
    pub engine_id: String,
    pub candidates: usize,
}

impl SearchConfig {
    /// `None` when keys or the engine id are absent; the caller decides
    /// whether that is fatal.
    pub fn from_env() -> Option<Self> {
        let api_keys: Vec<String> = std::env::var("SEARCH_API_KEYS")
            .ok()?
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .collect();
        if api_keys.is_empty() {
            return None;
        }
        let engine_id = std::env::var("SEARCH_ENGINE_ID").ok()?;
        Some(Self {
            api_url: std::env::var("SEARCH_API_URL")
                .unwrap_or_else(|_| DEFAULT_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_keys,
            engine_id,
            candidates: std::env::var("IMAGE_CANDIDATES")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v| *v >= 1)
                .unwrap_or(5),
        })
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("empty product name")]
    EmptyQuery,
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
    #[error("all {0} search api keys exhausted")]
    KeysExhausted(usize),
}

/// Image-search capability. One query in, a ranked list of candidate image
/// URLs out; quota errors rotate to the next configured key.
#[derive(Debug, Clone)]
pub struct ImageSearchClient {
    http: Client,
    config: SearchConfig,
}

impl ImageSearchClient {
    pub fn new(config: SearchConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }

    pub fn from_env() -> Option<Self> {
        SearchConfig::from_env().map(Self::new)
    }

    pub async fn search(&self, product_name: &str) -> Result<Vec<CandidateImage>, SearchError> {
        let query = product_name.trim();
        if query.is_empty() {
            return Err(SearchError::EmptyQuery);
        }

        for (attempt, key) in self.config.api_keys.iter().enumerate() {
            let url = format!(
                "{base}?key={key}&cx={cx}&q={q}&searchType=image&num={num}&fileType=jpg%7Cjpeg%7Cpng&safe=active",
                base = self.config.api_url,
                cx = urlencoding::encode(&self.config.engine_id),
                q = urlencoding::encode(query),
                num = self.config.candidates,
            );
            let response = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|err| SearchError::Request(err.to_string()))?;

            let status = response.status();
            if status.as_u16() == 429 || status.as_u16() == 403 {
                warn!(
                    target = "catalogr.search",
                    key_index = attempt,
                    status = status.as_u16(),
                    "search key rejected; rotating",
                );
                backoff_pause(attempt).await;
                continue;
            }
            if !status.is_success() {
                return Err(SearchError::Request(format!("HTTP {status}")));
            }

            let payload: SearchResponse = response
                .json()
                .await
                .map_err(|err| SearchError::Deserialize(err.to_string()))?;
            let hits: Vec<CandidateImage> = payload
                .items
                .into_iter()
                .map(|item| CandidateImage::new(item.link))
                .collect();
            info!(
                target = "catalogr.search",
                query = %query,
                hits = hits.len(),
                "image search complete",
            );
            return Ok(hits);
        }

        Err(SearchError::KeysExhausted(self.config.api_keys.len()))
    }
}

async fn backoff_pause(attempt: usize) {
    let jitter: u64 = rand::random_range(0..250);
    sleep(Duration::from_millis((1 << attempt.min(4)) as u64 * 500 + jitter)).await;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    link: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parses_ranked_links() {
        let raw = r#"{
            "kind": "customsearch#search",
            "items": [
                {"link": "https://cdn.example/one.jpg", "mime": "image/jpeg"},
                {"link": "https://cdn.example/two.png", "mime": "image/png"}
            ]
        }"#;
        let payload: SearchResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.items.len(), 2);
        assert_eq!(payload.items[0].link, "https://cdn.example/one.jpg");
    }

    #[test]
    fn missing_items_means_no_results_not_an_error() {
        let payload: SearchResponse =
            serde_json::from_str(r#"{"kind": "customsearch#search"}"#).unwrap();
        assert!(payload.items.is_empty());
    }

    #[tokio::test]
    async fn empty_query_is_rejected_before_any_request() {
        let client = ImageSearchClient::new(SearchConfig {
            api_url: DEFAULT_API_URL.to_string(),
            api_keys: vec!["k".to_string()],
            engine_id: "cx".to_string(),
            candidates: 5,
        });
        let err = client.search("   ").await.unwrap_err();
        assert!(matches!(err, SearchError::EmptyQuery));
    }
}
