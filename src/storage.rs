use crate::http::build_client;
use crate::images::sanitize_name;
use reqwest::Client;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("upload failed: {0}")]
    Request(String),
}

/// Optional remote-storage capability: authorized PUT of image bytes to an
/// object key, public URL back. Absent configuration means the pipeline
/// falls back to local file references.
#[derive(Debug, Clone)]
pub struct StorageClient {
    endpoint: String,
    bucket: String,
    access_key: String,
    public_base: Option<String>,
    prefix: String,
    http: Client,
}

impl StorageClient {
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("STORAGE_ENDPOINT").ok()?;
        let bucket = std::env::var("STORAGE_BUCKET").ok()?;
        let access_key = std::env::var("STORAGE_ACCESS_KEY").ok()?;
        Some(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket,
            access_key,
            public_base: std::env::var("STORAGE_PUBLIC_BASE_URL")
                .ok()
                .map(|base| base.trim_end_matches('/').to_string()),
            prefix: std::env::var("STORAGE_PREFIX")
                .unwrap_or_default()
                .trim_matches('/')
                .to_string(),
            http: build_client(),
        })
    }

    /// Collision-free key under the configured prefix.
    pub fn object_key(&self, product_name: &str) -> String {
        let slug = sanitize_name(product_name);
        let unique = Uuid::new_v4().simple();
        if self.prefix.is_empty() {
            format!("{slug}-{unique}.jpeg")
        } else {
            format!("{}/{slug}-{unique}.jpeg", self.prefix)
        }
    }

    pub async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
        let url = format!("{}/{}/{}", self.endpoint, self.bucket, key);
        let response = self
            .http
            .put(&url)
            .header("Authorization", format!("Bearer {}", self.access_key))
            .header("Content-Type", "image/jpeg")
            .body(bytes)
            .send()
            .await
            .map_err(|err| StorageError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StorageError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }
        let public = match &self.public_base {
            Some(base) => format!("{base}/{key}"),
            None => url,
        };
        info!(target = "catalogr.storage", url = %public, "image uploaded");
        Ok(public)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(prefix: &str, public_base: Option<&str>) -> StorageClient {
        StorageClient {
            endpoint: "https://objects.example.com".to_string(),
            bucket: "catalog".to_string(),
            access_key: "secret".to_string(),
            public_base: public_base.map(str::to_string),
            prefix: prefix.to_string(),
            http: build_client(),
        }
    }

    #[test]
    fn object_keys_are_slugged_and_unique() {
        let client = client("products", None);
        let first = client.object_key("Dettol Antiseptic Liquid");
        let second = client.object_key("Dettol Antiseptic Liquid");
        assert!(first.starts_with("products/dettol_antiseptic_liquid-"));
        assert!(first.ends_with(".jpeg"));
        assert_ne!(first, second);
    }

    #[test]
    fn empty_prefix_puts_keys_at_bucket_root() {
        let client = client("", None);
        let key = client.object_key("Lux Soap");
        assert!(key.starts_with("lux_soap-"));
        assert!(!key.contains('/'));
    }
}
