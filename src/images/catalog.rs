//! Builds image references from a directory of photographs
//!
//! File name tokens carry the metadata a reviewer would otherwise supply:
//! `front_left_01.jpg` gets the `front_left` angle, `interior_dash.jpg` the
//! interior category, `vin_plate.png` the document category, and
//! `closeup` / `detail` mark close-ups.

use super::store::ImageStoreError;
use crate::domain::{Angle, ImageCategory, ImageRef};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::debug;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

const INTERIOR_TOKENS: &[&str] = &["interior", "cabin", "dashboard", "dash", "seat", "airbag"];
const DOCUMENT_TOKENS: &[&str] = &[
    "vin",
    "document",
    "doc",
    "registration",
    "odometer",
    "license",
    "licence",
];
const CLOSEUP_TOKENS: &[&str] = &["closeup", "close", "detail", "zoom"];

/// Hex SHA-256 of the image bytes.
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn tokens(stem: &str) -> Vec<String> {
    stem.to_lowercase()
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Longest angle spelled by adjacent tokens, so `front_left` beats `front`.
fn infer_angle(tokens: &[String]) -> Option<Angle> {
    for window in tokens.windows(2) {
        if let Some(angle) = Angle::parse(&format!("{}{}", window[0], window[1])) {
            return Some(angle);
        }
    }
    tokens.iter().find_map(|t| match t.as_str() {
        "side" => None,
        t => Angle::parse(t),
    })
}

fn infer_category(tokens: &[String]) -> ImageCategory {
    if tokens.iter().any(|t| DOCUMENT_TOKENS.contains(&t.as_str())) {
        ImageCategory::Document
    } else if tokens.iter().any(|t| INTERIOR_TOKENS.contains(&t.as_str())) {
        ImageCategory::Interior
    } else {
        ImageCategory::Exterior
    }
}

/// Describes one file. The id is the file name; the URL is a `file://` URL.
pub fn describe_file(path: &Path, data: &[u8]) -> ImageRef {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let id = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(stem)
        .to_string();
    let toks = tokens(stem);
    let category = infer_category(&toks);

    let mut image = ImageRef::new(
        id,
        format!("file://{}", path.display()),
        content_hash(data),
    )
    .with_category(category);

    if category == ImageCategory::Exterior {
        if let Some(angle) = infer_angle(&toks) {
            image = image.with_angle(angle);
        }
    }
    if toks.iter().any(|t| CLOSEUP_TOKENS.contains(&t.as_str())) {
        image = image.closeup();
    }
    image
}

/// Lists supported image files in `dir` (non-recursive), sorted by name.
pub fn scan_directory(dir: &Path) -> Result<Vec<ImageRef>, ImageStoreError> {
    let io_err = |source| ImageStoreError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .map_err(io_err)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    let mut images = Vec::with_capacity(paths.len());
    for path in paths {
        let data = std::fs::read(&path).map_err(|source| ImageStoreError::Io {
            path: path.clone(),
            source,
        })?;
        let image = describe_file(&path, &data);
        debug!(
            id = %image.id,
            category = image.category.as_str(),
            angle = ?image.angle,
            "Catalogued image"
        );
        images.push(image);
    }
    Ok(images)
}
