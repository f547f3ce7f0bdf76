use crate::models::ProductRecord;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// The output artifact: an ordered JSON array of `ProductRecord`. Append-only
/// during a run. Every append rewrites the file through a temp-and-rename so
/// an interrupt never leaves a half-written array behind.
#[derive(Debug)]
pub struct OutputCatalog {
    path: PathBuf,
    records: Vec<ProductRecord>,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("could not read catalog {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("catalog {path} is not a JSON array of product records: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("could not write catalog {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl OutputCatalog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref().to_path_buf();
        let records = match fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|source| CatalogError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(err) if err.kind() == ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(CatalogError::Read { path, source }),
        };
        info!(
            target = "catalogr.catalog",
            path = %path.display(),
            entries = records.len(),
            "catalog loaded",
        );
        Ok(Self { path, records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.iter().any(|record| record.name == name)
    }

    pub fn records(&self) -> &[ProductRecord] {
        &self.records
    }

    pub fn append(&mut self, record: ProductRecord) -> Result<(), CatalogError> {
        self.records.push(record);
        if let Err(err) = self.flush() {
            self.records.pop();
            return Err(err);
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), CatalogError> {
        let body = serde_json::to_vec_pretty(&self.records).map_err(|source| {
            CatalogError::Parse {
                path: self.path.clone(),
                source,
            }
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &body).map_err(|source| CatalogError::Write {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| CatalogError::Write {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str) -> ProductRecord {
        ProductRecord {
            name: name.to_string(),
            description: "A product".to_string(),
            image_url: "https://example.com/a.jpeg".to_string(),
            category: "Household".to_string(),
            price: String::new(),
            brand: "Acme".to_string(),
        }
    }

    #[test]
    fn append_persists_and_reloads_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let mut catalog = OutputCatalog::load(&path).unwrap();
        catalog.append(sample("First")).unwrap();
        catalog.append(sample("Second")).unwrap();

        let reloaded = OutputCatalog::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.records()[0].name, "First");
        assert_eq!(reloaded.records()[1].name, "Second");
        assert!(reloaded.contains("Second"));
    }

    #[test]
    fn file_is_a_plain_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let mut catalog = OutputCatalog::load(&path).unwrap();
        catalog.append(sample("Only")).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let entries = value.as_array().expect("top-level array");
        assert_eq!(entries.len(), 1);
        for field in ["name", "description", "image_url", "category", "price", "brand"] {
            assert!(entries[0].get(field).is_some(), "missing field {field}");
        }
    }

    #[test]
    fn malformed_catalog_is_an_error_not_an_empty_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, "{\"not\": \"an array\"").unwrap();
        let err = OutputCatalog::load(&path).unwrap_err();
        assert!(matches!(err, CatalogError::Parse { .. }));
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let mut catalog = OutputCatalog::load(&path).unwrap();
        catalog.append(sample("Only")).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }
}
