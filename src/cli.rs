use clap::Parser;
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Resumable product-catalog builder: image search, validation, optional
/// upload and generated copy per product, appended to a JSON catalog.
#[derive(Debug, Parser)]
#[command(name = "catalogr", version)]
pub struct CliOptions {
    /// Product list: a JSON array (strings, or objects with a `name` field,
    /// optionally under a `menu`/`items`/`products` key) or one name per line.
    pub input: Option<PathBuf>,

    /// Extra product names, appended after the input file.
    #[arg(long = "name", value_name = "NAME")]
    pub names: Vec<String>,

    /// Catalog file to append records to.
    #[arg(long, value_name = "PATH", default_value = "catalog.json", env = "CATALOG_PATH")]
    pub catalog: PathBuf,

    /// Progress file that gates reruns.
    #[arg(
        long,
        value_name = "PATH",
        default_value = "processed_items.txt",
        env = "PROGRESS_PATH"
    )]
    pub progress: PathBuf,

    /// Directory for downloaded review images.
    #[arg(
        long = "images-dir",
        value_name = "DIR",
        default_value = "product_images",
        env = "IMAGES_DIR"
    )]
    pub images_dir: PathBuf,

    /// Stop after this many not-yet-done products.
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,

    /// Clear the images directory before the run (exits if no products
    /// are given).
    #[arg(long)]
    pub tidy: bool,

    /// Print every product already marked done plus a done/total count,
    /// then exit.
    #[arg(long = "print-progress")]
    pub print_progress: bool,

    /// Verbose logging.
    #[arg(long, env = "CATALOGR_DEBUG")]
    pub debug: bool,
}

#[derive(Debug, Error)]
pub enum InputError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path} is not valid JSON: {detail}")]
    Json { path: PathBuf, detail: String },
    #[error("{path}: expected an array of names or objects with a `name` field")]
    Shape { path: PathBuf },
}

/// Reads product names from `path`. JSON documents accept an array of
/// strings, an array of objects carrying `name`, or an object wrapping such
/// an array under `menu`, `items` or `products`. Anything else is treated as
/// plain text, one name per line, `#` lines ignored.
pub fn load_names(path: &Path) -> Result<Vec<String>, InputError> {
    let raw = std::fs::read_to_string(path).map_err(|source| InputError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let trimmed = raw.trim_start();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        let value: Value = serde_json::from_str(&raw).map_err(|err| InputError::Json {
            path: path.to_path_buf(),
            detail: err.to_string(),
        })?;
        return names_from_json(&value).ok_or_else(|| InputError::Shape {
            path: path.to_path_buf(),
        });
    }

    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn names_from_json(value: &Value) -> Option<Vec<String>> {
    let array = match value {
        Value::Array(items) => items,
        Value::Object(map) => ["menu", "items", "products"]
            .iter()
            .find_map(|key| map.get(*key))
            .and_then(Value::as_array)?,
        _ => return None,
    };

    let mut names = Vec::new();
    for item in array {
        let name = match item {
            Value::String(name) => name.as_str(),
            Value::Object(map) => map.get("name").and_then(Value::as_str)?,
            _ => return None,
        };
        let name = name.trim();
        if !name.is_empty() {
            names.push(name.to_string());
        }
    }
    Some(names)
}
