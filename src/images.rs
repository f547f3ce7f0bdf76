use crate::http::build_client;
use crate::models::CandidateImage;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageReader, imageops::FilterType};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("download failed: {0}")]
    Download(String),
    #[error("non-image content type: {0}")]
    ContentType(String),
    #[error("could not re-encode image: {0}")]
    Encode(String),
    #[error("could not write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Downloads candidate bytes over HTTP. Separate from validation so the
/// orchestrator can be exercised without a network.
#[derive(Debug, Clone)]
pub struct ImageFetcher {
    http: Client,
}

impl ImageFetcher {
    pub fn new() -> Self {
        Self {
            http: build_client(),
        }
    }

    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, ImageError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| ImageError::Download(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ImageError::Download(format!("HTTP {}", response.status())));
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !content_type.is_empty() && !content_type.starts_with("image/") {
            return Err(ImageError::ContentType(content_type));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ImageError::Download(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

impl Default for ImageFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// A candidate is usable when it has bytes and those bytes sniff as a known
/// raster format. Sets and returns `valid`.
pub fn validate(candidate: &mut CandidateImage) -> bool {
    candidate.valid =
        !candidate.bytes.is_empty() && image::guess_format(&candidate.bytes).is_ok();
    if !candidate.valid {
        debug!(
            target = "catalogr.images",
            url = %candidate.source_url,
            bytes = candidate.bytes.len(),
            "candidate rejected",
        );
    }
    candidate.valid
}

/// Heuristic ranking: prefer a larger minimum side, penalize aspect ratios
/// far from square or 4:3. Undecodable bytes score zero.
pub fn score(bytes: &[u8]) -> f64 {
    let Some((width, height)) = dimensions(bytes) else {
        return 0.0;
    };
    if height == 0 || width == 0 {
        return 0.0;
    }
    let min_side = width.min(height) as f64;
    let aspect = width as f64 / height as f64;
    let aspect_penalty = (aspect - 1.0)
        .abs()
        .min((aspect - 4.0 / 3.0).abs())
        .min((aspect - 3.0 / 4.0).abs());
    min_side - aspect_penalty * 50.0
}

fn dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Re-encodes as JPEG under `max_kb`, stepping quality down first and the
/// dimensions after, so the review directory stays small enough to eyeball
/// in bulk.
pub fn compress_to_budget(bytes: &[u8], max_kb: usize) -> Result<Vec<u8>, ImageError> {
    let decoded = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| ImageError::Encode(err.to_string()))?
        .decode()
        .map_err(|err| ImageError::Encode(err.to_string()))?;
    // JPEG has no alpha channel.
    let mut working = DynamicImage::ImageRgb8(decoded.to_rgb8());

    let max_bytes = max_kb * 1024;
    let mut quality: u8 = 90;
    let mut best: Option<Vec<u8>> = None;

    loop {
        let encoded = encode_jpeg(&working, quality)?;
        let fits = encoded.len() <= max_bytes;
        if best
            .as_ref()
            .map(|current| encoded.len() < current.len())
            .unwrap_or(true)
        {
            best = Some(encoded);
        }
        if fits {
            break;
        }
        if quality > 25 {
            quality -= 5;
            continue;
        }
        let (width, height) = (working.width(), working.height());
        if width.min(height) < 300 {
            warn!(
                target = "catalogr.images",
                size_kb = best.as_ref().map(|b| b.len() / 1024).unwrap_or(0),
                budget_kb = max_kb,
                "image left over budget; cannot shrink further",
            );
            break;
        }
        let new_width = (width as f64 * 0.8) as u32;
        let new_height = (height as f64 * 0.8) as u32;
        working = working.resize(new_width.max(1), new_height.max(1), FilterType::Lanczos3);
        quality = 80;
    }

    best.ok_or_else(|| ImageError::Encode("empty encode result".to_string()))
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .encode_image(image)
        .map_err(|err| ImageError::Encode(err.to_string()))?;
    Ok(out)
}

/// Product name to a filesystem-safe slug.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let slug = cleaned.trim().replace(' ', "_").to_lowercase();
    if slug.is_empty() {
        "product".to_string()
    } else {
        slug
    }
}

/// Writes the accepted JPEG into a per-product subdirectory, uniquifying the
/// filename. The directory is the human review surface; files stay on disk
/// after the run on purpose.
pub fn persist_local(
    images_dir: &Path,
    product_name: &str,
    jpeg: &[u8],
) -> Result<PathBuf, ImageError> {
    let slug = sanitize_name(product_name);
    let dir = images_dir.join(&slug);
    std::fs::create_dir_all(&dir).map_err(|source| ImageError::Io {
        path: dir.clone(),
        source,
    })?;

    let mut path = dir.join(format!("{slug}.jpeg"));
    let mut counter = 1;
    while path.exists() {
        path = dir.join(format!("{slug}_{counter}.jpeg"));
        counter += 1;
    }
    std::fs::write(&path, jpeg).map_err(|source| ImageError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Removes every file directly under `dir` (used by `--tidy`). Missing dir is
/// fine. Subdirectories are cleared one level deep to match the per-product
/// layout.
pub fn clear_images_dir(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let gone = if path.is_dir() {
            std::fs::remove_dir_all(&path).is_ok()
        } else {
            std::fs::remove_file(&path).is_ok()
        };
        if gone {
            removed += 1;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn validate_rejects_empty_bytes() {
        let mut candidate = CandidateImage::new("https://example.com/a.jpg");
        assert!(!validate(&mut candidate));
        assert!(!candidate.valid);
    }

    #[test]
    fn validate_rejects_unrecognized_format() {
        let mut candidate = CandidateImage::new("https://example.com/a.jpg");
        candidate.bytes = b"<html>not an image</html>".to_vec();
        assert!(!validate(&mut candidate));
    }

    #[test]
    fn validate_accepts_png_bytes() {
        let mut candidate = CandidateImage::new("https://example.com/a.png");
        candidate.bytes = png_bytes(8, 8);
        assert!(validate(&mut candidate));
        assert!(candidate.valid);
    }

    #[test]
    fn score_prefers_larger_images() {
        let small = png_bytes(16, 16);
        let large = png_bytes(64, 64);
        assert!(score(&large) > score(&small));
    }

    #[test]
    fn score_penalizes_extreme_aspect_ratios() {
        let square = png_bytes(64, 64);
        let banner = png_bytes(64, 8);
        assert!(score(&square) > score(&banner));
    }

    #[test]
    fn compress_fits_budget_for_small_images() {
        let png = png_bytes(64, 64);
        let jpeg = compress_to_budget(&png, 30).unwrap();
        assert!(jpeg.len() <= 30 * 1024);
        assert_eq!(image::guess_format(&jpeg).unwrap(), image::ImageFormat::Jpeg);
    }

    #[test]
    fn sanitize_strips_punctuation_and_spaces() {
        assert_eq!(
            sanitize_name("Dettol Antiseptic Liquid"),
            "dettol_antiseptic_liquid"
        );
        assert_eq!(sanitize_name("Maggi 2-Minute (Masala)!"), "maggi_2-minute_masala");
        assert_eq!(sanitize_name("!!!"), "product");
    }

    #[test]
    fn persist_uniquifies_filenames() {
        let dir = tempfile::tempdir().unwrap();
        let jpeg = compress_to_budget(&png_bytes(8, 8), 30).unwrap();
        let first = persist_local(dir.path(), "Lux Soap", &jpeg).unwrap();
        let second = persist_local(dir.path(), "Lux Soap", &jpeg).unwrap();
        assert_ne!(first, second);
        assert!(first.ends_with("lux_soap/lux_soap.jpeg"));
        assert!(second.ends_with("lux_soap/lux_soap_1.jpeg"));
    }

    #[test]
    fn clear_images_dir_removes_product_folders() {
        let dir = tempfile::tempdir().unwrap();
        let jpeg = compress_to_budget(&png_bytes(8, 8), 30).unwrap();
        persist_local(dir.path(), "Lux Soap", &jpeg).unwrap();
        persist_local(dir.path(), "Dove Soap", &jpeg).unwrap();
        assert_eq!(clear_images_dir(dir.path()), 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
