//! Screenshot naming, persistence and tile image decoding.

use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};

use crate::types::{ChallengeError, ChallengeResult};

/// Directory name of diagnostic screenshots, next to the style-scoped caches.
pub const SCREENSHOT_DIR: &str = "captcha_screenshot";

/// Collisions beyond this many get overwritten.
const MAX_NAME_SEQUENCE: u32 = 1000;

/// Milliseconds since the Unix epoch.
pub fn timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Directory for screenshots of a session whose cache is `cache_dir`.
pub fn screenshot_dir(cache_dir: &Path) -> PathBuf {
    cache_dir
        .parent()
        .unwrap_or(cache_dir)
        .join(SCREENSHOT_DIR)
}

/// Timestamp-qualified file name: `<millis>.<parts joined by '.'>.png`.
pub fn screenshot_name(parts: &[&str]) -> String {
    let mut name = timestamp_millis().to_string();
    for part in parts.iter().filter(|p| !p.is_empty()) {
        name.push('.');
        name.push_str(&sanitize(part));
    }
    name.push_str(".png");
    name
}

/// First path under `dir` for `name` that does not exist yet.
pub fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem, format!(".{ext}")),
        None => (name, String::new()),
    };
    for seq in 1..MAX_NAME_SEQUENCE {
        let next = dir.join(format!("{stem}-{seq}{ext}"));
        if !next.exists() {
            return next;
        }
    }
    candidate
}

/// Write screenshot bytes under `dir`, creating it as needed.
pub fn save_screenshot(dir: &Path, name: &str, bytes: &[u8]) -> ChallengeResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = unique_path(dir, name);
    std::fs::write(&path, bytes)?;
    Ok(path)
}

/// Decode a tile screenshot.
pub fn decode_tile(bytes: &[u8]) -> ChallengeResult<DynamicImage> {
    if bytes.is_empty() {
        return Err(ChallengeError::Model("Empty tile screenshot".to_string()));
    }
    let img = match image::guess_format(bytes) {
        Ok(fmt @ (ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::WebP)) => {
            image::load_from_memory_with_format(bytes, fmt)?
        }
        _ => image::load_from_memory(bytes)?,
    };
    Ok(img)
}

/// Keep file names portable: path separators and whitespace become `_`.
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}
