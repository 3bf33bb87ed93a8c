//! §4.G `ProcessImage`: memoized read-or-transcode of an on-disk image.
//!
//! Grounded on the teacher's `updater/native/image.rs` re-encoding path
//! (`JpegEncoder::new_with_quality`), simplified: the spec calls for a
//! format transcode, not the teacher's additional resize-to-600px step.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::ImageReader;

pub struct ImageCache {
    compress: bool,
    cache: RefCell<HashMap<String, Option<(Vec<u8>, String, String)>>>,
}

impl ImageCache {
    pub fn new(compress: bool) -> Self {
        Self {
            compress,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
    }

    /// `rel` is a path relative to `base_dir` (typically `images/...`).
    /// Returns `(bytes, mime, new_rel)`, or `None` if the source file is
    /// missing or empty.
    pub fn process_image(&self, base_dir: &Path, rel: &str) -> Option<(Vec<u8>, String, String)> {
        if let Some(cached) = self.cache.borrow().get(rel) {
            return cached.clone();
        }
        let result = self.process_uncached(base_dir, rel);
        self.cache.borrow_mut().insert(rel.to_string(), result.clone());
        result
    }

    fn process_uncached(&self, base_dir: &Path, rel: &str) -> Option<(Vec<u8>, String, String)> {
        let path = base_dir.join(rel);
        let bytes = std::fs::read(&path).ok().filter(|b| !b.is_empty())?;

        if !self.compress {
            let mime = mime_from_extension(rel);
            return Some((bytes, mime, rel.to_string()));
        }

        match transcode_to_jpeg(&bytes) {
            Ok(jpeg_bytes) => {
                let new_rel = replace_extension(rel, "jpg");
                Some((jpeg_bytes, "image/jpeg".to_string(), new_rel))
            }
            Err(_) => Some((bytes, mime_from_extension(rel), rel.to_string())),
        }
    }
}

fn transcode_to_jpeg(bytes: &[u8]) -> image::ImageResult<Vec<u8>> {
    let decoded = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()?;
    let mut buffer = Vec::new();
    decoded.write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, 75))?;
    Ok(buffer)
}

fn mime_from_extension(rel: &str) -> String {
    let ext = rel.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
    .to_string()
}

fn replace_extension(rel: &str, new_ext: &str) -> String {
    match rel.rfind('.') {
        Some(dot) => format!("{}.{new_ext}", &rel[..dot]),
        None => format!("{rel}.{new_ext}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_none_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ImageCache::new(false);
        assert!(cache.process_image(dir.path(), "images/missing.jpg").is_none());
    }

    #[test]
    fn uncompressed_mode_derives_mime_from_extension_and_keeps_bytes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("images")).unwrap();
        std::fs::write(dir.path().join("images/a.png"), b"not really a png").unwrap();
        let cache = ImageCache::new(false);
        let (bytes, mime, new_rel) = cache.process_image(dir.path(), "images/a.png").unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(new_rel, "images/a.png");
        assert_eq!(bytes, b"not really a png");
    }

    #[test]
    fn compressed_mode_falls_back_to_original_on_decode_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("images")).unwrap();
        std::fs::write(dir.path().join("images/a.png"), b"not really a png").unwrap();
        let cache = ImageCache::new(true);
        let (bytes, mime, new_rel) = cache.process_image(dir.path(), "images/a.png").unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(new_rel, "images/a.png");
        assert_eq!(bytes, b"not really a png");
    }

    #[test]
    fn memoizes_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("images")).unwrap();
        std::fs::write(dir.path().join("images/a.png"), b"bytes").unwrap();
        let cache = ImageCache::new(false);
        let first = cache.process_image(dir.path(), "images/a.png");
        std::fs::remove_file(dir.path().join("images/a.png")).unwrap();
        let second = cache.process_image(dir.path(), "images/a.png");
        assert_eq!(first, second);
    }
}
