//! The Books Index (spec §3/§6/§8-21): an ordered, duplicate-free list of
//! novel folder slugs persisted as `books.json`, grounded on the teacher's
//! `dirs::home_dir()` + `serde_json` persistence idiom (`cache.rs`).

use std::path::PathBuf;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Default)]
struct BooksFile {
    slugs: Vec<String>,
}

pub struct BooksIndex {
    path: PathBuf,
}

impl BooksIndex {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `books.json` under the user's config/data directory, the way the
    /// teacher locates its own cache file relative to `dirs::home_dir()`.
    pub fn in_default_location() -> Result<Self> {
        let base = dirs::data_dir().ok_or_else(|| eyre::eyre!("no data directory for this platform"))?;
        Ok(Self::new(base.join("hakodl").join("books.json")))
    }

    fn read(&self) -> Result<BooksFile> {
        match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).wrap_err("parsing books.json"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BooksFile::default()),
            Err(e) => Err(e).wrap_err("reading books.json"),
        }
    }

    fn write(&self, file: &BooksFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).wrap_err("creating books.json directory")?;
        }
        let json = serde_json::to_string_pretty(file).wrap_err("serializing books.json")?;
        std::fs::write(&self.path, json).wrap_err("writing books.json")
    }

    /// Property 21: re-reads before appending so a second `Add(x)` for a
    /// slug already present is a no-op, preserving concurrent-append safety.
    pub fn add(&self, slug: &str) -> Result<()> {
        let mut file = self.read()?;
        if !file.slugs.iter().any(|s| s == slug) {
            file.slugs.push(slug.to_string());
            self.write(&file)?;
        }
        Ok(())
    }

    pub fn read_all(&self) -> Result<Vec<String>> {
        Ok(self.read()?.slugs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_read_contains_slug() {
        let dir = tempfile::tempdir().unwrap();
        let index = BooksIndex::new(dir.path().join("books.json"));
        index.add("some_novel").unwrap();
        assert_eq!(index.read_all().unwrap(), vec!["some_novel".to_string()]);
    }

    #[test]
    fn adding_twice_keeps_a_single_entry() {
        let dir = tempfile::tempdir().unwrap();
        let index = BooksIndex::new(dir.path().join("books.json"));
        index.add("some_novel").unwrap();
        index.add("some_novel").unwrap();
        assert_eq!(index.read_all().unwrap(), vec!["some_novel".to_string()]);
    }

    #[test]
    fn preserves_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let index = BooksIndex::new(dir.path().join("books.json"));
        index.add("b").unwrap();
        index.add("a").unwrap();
        assert_eq!(index.read_all().unwrap(), vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn read_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = BooksIndex::new(dir.path().join("books.json"));
        assert!(index.read_all().unwrap().is_empty());
    }
}
