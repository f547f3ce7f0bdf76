use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One completed catalog entry. Immutable once appended to the output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub name: String,
    pub description: String,
    pub image_url: String,
    pub category: String,
    #[serde(default)]
    pub price: String,
    pub brand: String,
}

/// Structured copy returned by the generative-text service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductCopy {
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub brand: String,
}

/// A candidate image as it moves through one product's run: search fills
/// `source_url`, fetch fills `bytes` and `valid`. Discarded once the
/// product settles.
#[derive(Debug, Clone)]
pub struct CandidateImage {
    pub source_url: String,
    pub bytes: Vec<u8>,
    pub valid: bool,
}

impl CandidateImage {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            bytes: Vec::new(),
            valid: false,
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

/// Per-product state, advanced by the orchestrator as stages complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductState {
    Pending,
    ImageFetched,
    ImagePersisted,
    Described,
    Done,
    Skipped,
}

/// Per-product transcript: the state the product reached and the timed
/// stage reports collected on the way there.
#[derive(Debug, Clone, Serialize)]
pub struct ProductOutcome {
    pub name: String,
    pub state: ProductState,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedProduct {
    pub name: String,
    pub stage: String,
    pub reason: String,
}

/// What the batch loop hands back: which names finished this run, which were
/// gated out by the progress store, which failed and why, and the stage
/// transcript for every product that was actually attempted.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunSummary {
    pub completed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<FailedProduct>,
    pub transcripts: Vec<ProductOutcome>,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}
