//! Chapter Acquisition & Cache (§4.F): per-chapter acquisition, cache
//! validation against on-disk images, and deterministic image naming.
//!
//! Grounded on the teacher's `updater/native/cache.rs` (existence/size
//! cache checks before re-downloading) and `updater/book.rs` (per-volume
//! persistence), generalized to the canonical on-disk layout of §6.

mod record;

pub use record::{MaterializedChapter, NovelRecord, VolumeDescriptor, VolumeRecord};

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use eyre::{Context, Result};
use lazy_regex::regex;
use scraper::Html;

use crate::catalog::{ChapterRef, Novel, Volume};
use crate::content;
use crate::net::NetworkFabric;
use crate::slug::slug;

fn sniff_extension(url: &str) -> &'static str {
    if url.contains(".png") {
        "png"
    } else if url.contains(".gif") {
        "gif"
    } else if url.contains(".webp") {
        "webp"
    } else {
        "jpg"
    }
}

pub struct ChapterDownloader<'a> {
    catalog: &'a Novel,
    base_dir: PathBuf,
    fabric: &'a NetworkFabric,
}

impl<'a> ChapterDownloader<'a> {
    pub fn new(catalog: &'a Novel, base_dir: impl Into<PathBuf>, fabric: &'a NetworkFabric) -> Self {
        Self {
            catalog,
            base_dir: base_dir.into(),
            fabric,
        }
    }

    /// §4.F `CreateMetadataFile`.
    pub fn create_metadata_file(&self) -> Result<NovelRecord> {
        std::fs::create_dir_all(self.base_dir.join("images")).wrap_err("creating base/images directories")?;

        let cover_image_local = self.download_cover(&self.catalog.main_cover, "images/main_cover".to_string());

        let volumes = self
            .catalog
            .volumes
            .iter()
            .enumerate()
            .map(|(i, volume)| VolumeDescriptor {
                order: (i + 1) as u32,
                name: volume.name.clone(),
                filename: format!("{}.json", slug(&volume.name)),
                url: volume.url.clone(),
            })
            .collect();

        let record = NovelRecord {
            novel_name: self.catalog.name.clone(),
            author: self.catalog.author.clone(),
            tags: self.catalog.tags.clone(),
            summary: self.catalog.summary.clone(),
            cover_image_local,
            url: self.catalog.url.clone(),
            volumes,
        };

        let json = serde_json::to_string_pretty(&record).wrap_err("serializing metadata.json")?;
        std::fs::write(self.base_dir.join("metadata.json"), json).wrap_err("writing metadata.json")?;
        Ok(record)
    }

    fn download_cover(&self, url: &str, rel_stem: String) -> String {
        if url.is_empty() {
            return String::new();
        }
        let rel = format!("{rel_stem}.{}", sniff_extension(url));
        let path = self.base_dir.join(&rel);
        if self.fabric.download_to_file(url, &path) {
            rel
        } else {
            String::new()
        }
    }

    /// §4.F `DownloadVolume`, idempotent per volume.
    pub fn download_volume(
        &self,
        volume: &Volume,
        mut progress: Option<&mut dyn FnMut(usize, usize)>,
    ) -> Result<VolumeRecord> {
        let display_slug = slug(&volume.name);
        let json_path = self.base_dir.join(format!("{display_slug}.json"));
        let vol_slug = display_slug.to_lowercase();

        let existing: Option<VolumeRecord> = std::fs::read(&json_path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok());

        let mut materialized = Vec::with_capacity(volume.chapters.len());
        let mut to_download = Vec::new();
        for (i, chapter) in volume.chapters.iter().enumerate() {
            let cached = existing.as_ref().and_then(|r| r.chapter_by_url(&chapter.url));
            match cached {
                Some(cached) if validate_cached(&self.base_dir, cached) => {
                    let mut restamped = cached.clone();
                    restamped.index = i as u32;
                    materialized.push(restamped);
                }
                _ => to_download.push((i, chapter)),
            }
        }

        let total = to_download.len();
        for (done, (i, chapter)) in to_download.into_iter().enumerate() {
            if let Some(result) = process_chapter(self.fabric, &self.base_dir, i as u32, chapter, &vol_slug) {
                materialized.push(result);
            }
            if let Some(cb) = progress.as_deref_mut() {
                cb(done + 1, total);
            }
            thread::sleep(Duration::from_millis(500));
        }

        materialized.sort_by_key(|c| c.index);

        let cover_image_local =
            self.download_cover(&volume.cover_img, format!("images/vol_cover_{display_slug}"));

        let record = VolumeRecord {
            volume_name: volume.name.clone(),
            volume_url: volume.url.clone(),
            cover_image_local,
            chapters: materialized,
        };

        let json = serde_json::to_string_pretty(&record).wrap_err("serializing volume record")?;
        std::fs::write(&json_path, json).wrap_err("writing volume record")?;
        Ok(record)
    }
}

/// §4.F `ValidateCached`.
pub fn validate_cached(base_dir: &Path, cached: &MaterializedChapter) -> bool {
    if cached.content.chars().count() < 50 {
        return false;
    }
    for src in referenced_images(&cached.content) {
        let Some(rel) = src.strip_prefix("images/") else {
            continue;
        };
        match std::fs::metadata(base_dir.join("images").join(rel)) {
            Ok(metadata) if metadata.is_file() && metadata.len() > 0 => {}
            _ => return false,
        }
    }
    true
}

fn referenced_images(html: &str) -> Vec<String> {
    let fragment = Html::parse_fragment(html);
    fragment
        .select(&content::selector("img[src]"))
        .filter_map(|el| el.value().attr("src").map(str::to_string))
        .filter(|src| src.starts_with("images/"))
        .collect()
}

/// §4.F `ProcessChapter`. Returns `None` (not fatal) when `#chapter-content`
/// is absent.
pub fn process_chapter(
    fabric: &NetworkFabric,
    base_dir: &Path,
    i: u32,
    chapter: &ChapterRef,
    vol_slug: &str,
) -> Option<MaterializedChapter> {
    let response = fabric.fetch_with_retry(&chapter.url, None, None).ok()?;
    let body = String::from_utf8_lossy(&response.body).into_owned();
    let document = Html::parse_document(&body);
    let content_el = document.select(&content::selector("#chapter-content")).next()?;
    let content_html = content_el.inner_html();

    let mut fragment = Html::parse_fragment(&content_html);
    content::strip_ad_noise(&mut fragment);
    let after_noise = fragment.html();

    let with_images = process_images(&after_noise, fabric, base_dir, i, vol_slug);

    let mut fragment2 = Html::parse_fragment(&with_images);
    content::strip_empty_text_containers(&mut fragment2);
    let structural = fragment2.html();

    let slug = format!("{vol_slug}_ch{i}");
    let with_footnotes = content::process_footnotes(&structural, &slug);
    let collapsed = regex!(r"\n{3,}").replace_all(&with_footnotes, "\n\n").into_owned();

    Some(MaterializedChapter {
        title: chapter.name.clone(),
        url: chapter.url.clone(),
        content: collapsed,
        index: i,
    })
}

/// §4.F step 3: per-image download, deterministic renaming, and dropped
/// images falling out of the DOM. Image `src`/`style`/`onclick` rewriting
/// happens at the string level (the same register `SanitizeXhtml` already
/// operates in) to avoid re-serializing synthesized attribute trees.
fn process_images(html: &str, fabric: &NetworkFabric, base_dir: &Path, i: u32, vol_slug: &str) -> String {
    let mut fragment = Html::parse_fragment(html);
    let mut to_drop = Vec::new();
    let mut kept_new_src: Vec<String> = Vec::new();
    let mut m: u32 = 0;

    for img in fragment.select(&content::selector("img")) {
        let src = img.value().attr("src").unwrap_or("").to_string();
        if src.is_empty() || src.contains("chapter-banners") {
            to_drop.push(img.id());
            continue;
        }
        let index = m;
        m += 1;
        let rel = format!("images/{vol_slug}_chap_{i}_img_{index}.{}", sniff_extension(&src));
        let path = base_dir.join(&rel);
        if fabric.download_to_file(&src, &path) {
            kept_new_src.push(rel);
        } else {
            to_drop.push(img.id());
        }
    }

    content::detach_all(&mut fragment, to_drop);
    let pruned = fragment.html();

    let mut next = 0usize;
    regex!(r"(?is)<img\b[^>]*>")
        .replace_all(&pruned, |caps: &regex::Captures<'_>| {
            let new_src = kept_new_src.get(next).cloned().unwrap_or_default();
            next += 1;
            rewrite_img_tag(&caps[0], &new_src)
        })
        .into_owned()
}

fn rewrite_img_tag(tag: &str, new_src: &str) -> String {
    let without_style = regex!(r#"(?is)\s+style\s*=\s*"[^"]*""#).replace_all(tag, "");
    let without_onclick = regex!(r#"(?is)\s+onclick\s*=\s*"[^"]*""#).replace_all(&without_style, "");
    regex!(r#"(?is)\bsrc\s*=\s*"[^"]*""#)
        .replace(&without_onclick, format!(r#"src="{new_src}""#))
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_cached_rejects_short_content() {
        let dir = tempfile::tempdir().unwrap();
        let chapter = MaterializedChapter {
            title: "t".to_string(),
            url: "u".to_string(),
            content: "short".to_string(),
            index: 0,
        };
        assert!(!validate_cached(dir.path(), &chapter));
    }

    #[test]
    fn validate_cached_accepts_long_content_without_images() {
        let dir = tempfile::tempdir().unwrap();
        let content = "x".repeat(140);
        let chapter = MaterializedChapter {
            title: "t".to_string(),
            url: "u".to_string(),
            content,
            index: 0,
        };
        assert!(validate_cached(dir.path(), &chapter));
    }

    #[test]
    fn validate_cached_rejects_missing_referenced_image() {
        let dir = tempfile::tempdir().unwrap();
        let content = format!("{}<img src=\"images/missing.jpg\">", "x".repeat(140));
        let chapter = MaterializedChapter {
            title: "t".to_string(),
            url: "u".to_string(),
            content,
            index: 0,
        };
        assert!(!validate_cached(dir.path(), &chapter));
    }

    #[test]
    fn validate_cached_accepts_when_referenced_image_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("images")).unwrap();
        std::fs::write(dir.path().join("images/present.jpg"), b"bytes").unwrap();
        let content = format!("{}<img src=\"images/present.jpg\">", "x".repeat(140));
        let chapter = MaterializedChapter {
            title: "t".to_string(),
            url: "u".to_string(),
            content,
            index: 0,
        };
        assert!(validate_cached(dir.path(), &chapter));
    }

    #[test]
    fn sniff_extension_matches_known_suffixes() {
        assert_eq!(sniff_extension("a.png"), "png");
        assert_eq!(sniff_extension("a.gif?x=1"), "gif");
        assert_eq!(sniff_extension("a.webp"), "webp");
        assert_eq!(sniff_extension("a.jpeg"), "jpg");
    }

    #[test]
    fn rewrite_img_tag_drops_style_and_onclick_but_keeps_other_attrs() {
        let tag = r#"<img src="old.jpg" alt="x" style="color:red" onclick="bad()">"#;
        let rewritten = rewrite_img_tag(tag, "images/new.jpg");
        assert!(rewritten.contains(r#"src="images/new.jpg""#));
        assert!(rewritten.contains(r#"alt="x""#));
        assert!(!rewritten.contains("style"));
        assert!(!rewritten.contains("onclick"));
    }
}
