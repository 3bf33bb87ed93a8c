//! The Packager (§4.G): canonical on-disk form → e-book container.
//!
//! Grounded on the teacher's `updater/native/epub.rs` writer pipeline,
//! generalized to two entry points (`build_merged`, `build_volume`) and to
//! base64-inlined images instead of container image resources.

mod container;
mod image;
mod record;

pub use record::PackagerConfig;

use std::path::{Path, PathBuf};

use base64::Engine;
use eyre::{Context, Result};
use lazy_regex::regex;

use crate::downloader::{MaterializedChapter, NovelRecord, VolumeRecord};
use crate::slug::slug;
use image::ImageCache;
use record::{BookPlan, Document, NavNode};

pub struct Packager {
    base_dir: PathBuf,
    config: PackagerConfig,
    images: ImageCache,
}

impl Packager {
    pub fn new(base_dir: impl Into<PathBuf>, config: PackagerConfig) -> Self {
        let images = ImageCache::new(config.compress_images);
        Self {
            base_dir: base_dir.into(),
            config,
            images,
        }
    }

    pub fn clear_cache(&self) {
        self.images.clear_cache();
    }

    fn load_metadata(&self) -> Result<NovelRecord> {
        let bytes = std::fs::read(self.base_dir.join("metadata.json")).wrap_err("reading metadata.json")?;
        serde_json::from_slice(&bytes).wrap_err("parsing metadata.json")
    }

    fn load_volume(&self, filename: &str) -> Result<VolumeRecord> {
        let bytes = std::fs::read(self.base_dir.join(filename)).wrap_err("reading volume record")?;
        serde_json::from_slice(&bytes).wrap_err("parsing volume record")
    }

    /// §4.G `BuildMerged`.
    pub fn build_merged(&self, volume_record_filenames: &[String]) -> Result<PathBuf> {
        let metadata = self.load_metadata()?;

        let mut ordered: Vec<&String> = volume_record_filenames.iter().collect();
        ordered.sort_by_key(|filename| {
            metadata
                .volumes
                .iter()
                .find(|v| &v.filename == *filename)
                .map_or(u32::MAX, |v| v.order)
        });

        let mut documents = vec![self.intro_document(&metadata)];
        let mut nav = Vec::new();

        for (i, filename) in ordered.into_iter().enumerate() {
            let record = self.load_volume(filename)?;
            let sep_id = format!("vol{i}_sep");
            let sep_href = format!("text/{sep_id}.xhtml");
            documents.push(Document {
                id: sep_id,
                href: sep_href.clone(),
                title: record.volume_name.clone(),
                body_html: self.volume_separator_html(&record),
            });

            let mut children = Vec::new();
            for chapter in &record.chapters {
                let ch_id = format!("vol{i}_ch{}", chapter.index);
                let ch_href = format!("text/{ch_id}.xhtml");
                documents.push(Document {
                    id: ch_id,
                    href: ch_href.clone(),
                    title: chapter.title.clone(),
                    body_html: self.chapter_html(chapter),
                });
                children.push(NavNode {
                    title: chapter.title.clone(),
                    href: ch_href,
                    children: Vec::new(),
                });
            }
            nav.push(NavNode {
                title: record.volume_name,
                href: sep_href,
                children,
            });
        }

        let plan = BookPlan {
            title: metadata.novel_name.clone(),
            author: metadata.author.clone(),
            summary: metadata.summary.clone(),
            documents,
            nav,
        };

        let filename = format!("{}.epub", slug(&format!("{} Full", metadata.novel_name)));
        let output_path = if self.config.compress_images {
            self.config
                .output_dir
                .join(slug(&metadata.novel_name))
                .join("compressed")
                .join(&filename)
        } else {
            self.config.output_dir.join(&filename)
        };
        container::write_epub(&plan, &output_path)?;
        Ok(output_path)
    }

    /// §4.G `BuildVolume`.
    pub fn build_volume(&self, volume_record_filename: &str) -> Result<PathBuf> {
        let metadata = self.load_metadata()?;
        let record = self.load_volume(volume_record_filename)?;
        let book_title = format!("{} - {}", record.volume_name, metadata.novel_name);

        let mut documents = vec![Document {
            id: "title".to_string(),
            href: "text/title.xhtml".to_string(),
            title: book_title.clone(),
            body_html: self.volume_title_html(&book_title, &metadata, &record),
        }];
        let mut nav = Vec::new();
        for chapter in &record.chapters {
            let ch_id = format!("ch{}", chapter.index);
            let ch_href = format!("text/{ch_id}.xhtml");
            documents.push(Document {
                id: ch_id,
                href: ch_href.clone(),
                title: chapter.title.clone(),
                body_html: self.chapter_html(chapter),
            });
            nav.push(NavNode {
                title: chapter.title.clone(),
                href: ch_href,
                children: Vec::new(),
            });
        }

        let plan = BookPlan {
            title: book_title,
            author: metadata.author.clone(),
            summary: metadata.summary.clone(),
            documents,
            nav,
        };

        let filename = format!("{}.epub", slug(&record.volume_name));
        let variant = if self.config.compress_images { "compressed" } else { "original" };
        let output_path = self
            .config
            .output_dir
            .join(slug(&metadata.novel_name))
            .join(variant)
            .join(&filename);
        container::write_epub(&plan, &output_path)?;
        Ok(output_path)
    }

    fn intro_document(&self, metadata: &NovelRecord) -> Document {
        let cover = self.cover_html(&metadata.cover_image_local, "cover");
        let tags = metadata.tags.join(", ");
        let body_html = format!(
            "{cover}<h1 class=\"title\">{}</h1><h2 class=\"author\">{}</h2>\
             <p class=\"tags\">{tags}</p><div class=\"summary\">{}</div>",
            metadata.novel_name, metadata.author, metadata.summary,
        );
        Document {
            id: "title".to_string(),
            href: "text/title.xhtml".to_string(),
            title: metadata.novel_name.clone(),
            body_html,
        }
    }

    fn volume_title_html(&self, book_title: &str, metadata: &NovelRecord, record: &VolumeRecord) -> String {
        let cover = self.cover_html(&record.cover_image_local, "cover");
        format!(
            "{cover}<h1 class=\"title\">{book_title}</h1><h2 class=\"author\">{}</h2>",
            metadata.author
        )
    }

    fn volume_separator_html(&self, record: &VolumeRecord) -> String {
        let cover = self.cover_html(&record.cover_image_local, "volume-cover");
        format!("{cover}<h1 class=\"volume-title\">{}</h1>", record.volume_name)
    }

    fn chapter_html(&self, chapter: &MaterializedChapter) -> String {
        let embedded = self.embed_images(&chapter.content);
        format!("<h2 class=\"chapter-title\">{}</h2>{embedded}", chapter.title)
    }

    fn cover_html(&self, rel: &str, class: &str) -> String {
        if rel.is_empty() {
            return String::new();
        }
        match self.images.process_image(&self.base_dir, rel) {
            Some((bytes, mime, _)) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                format!(r#"<img class="{class}" src="data:{mime};base64,{encoded}" alt="cover"/>"#)
            }
            None => String::new(),
        }
    }

    /// Rewrites every `<img src>` to a base64 data URI via `ProcessImage`;
    /// images that fail to process are dropped.
    fn embed_images(&self, html: &str) -> String {
        regex!(r"(?is)<img\b[^>]*>")
            .replace_all(html, |caps: &regex::Captures<'_>| {
                let tag = &caps[0];
                let Some(src) = extract_src(tag) else {
                    return String::new();
                };
                match self.images.process_image(&self.base_dir, &src) {
                    Some((bytes, mime, _)) => {
                        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                        rewrite_src(tag, &format!("data:{mime};base64,{encoded}"))
                    }
                    None => String::new(),
                }
            })
            .into_owned()
    }
}

fn extract_src(tag: &str) -> Option<String> {
    regex!(r#"(?is)\bsrc\s*=\s*"([^"]*)""#)
        .captures(tag)
        .map(|caps| caps[1].to_string())
}

fn rewrite_src(tag: &str, new_src: &str) -> String {
    regex!(r#"(?is)\bsrc\s*=\s*"[^"]*""#)
        .replace(tag, format!(r#"src="{new_src}""#))
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::{NovelRecord, VolumeDescriptor};

    fn write_sample_novel(dir: &Path) {
        std::fs::create_dir_all(dir.join("images")).unwrap();
        let metadata = NovelRecord {
            novel_name: "Test Novel".to_string(),
            author: "Author".to_string(),
            tags: vec!["Action".to_string()],
            summary: "A summary".to_string(),
            cover_image_local: String::new(),
            url: "https://docln.net/truyen/1".to_string(),
            volumes: vec![VolumeDescriptor {
                order: 1,
                name: "Volume 1".to_string(),
                filename: "Volume_1.json".to_string(),
                url: String::new(),
            }],
        };
        std::fs::write(
            dir.join("metadata.json"),
            serde_json::to_string_pretty(&metadata).unwrap(),
        )
        .unwrap();

        let record = VolumeRecord {
            volume_name: "Volume 1".to_string(),
            volume_url: String::new(),
            cover_image_local: String::new(),
            chapters: vec![MaterializedChapter {
                title: "Chapter 1".to_string(),
                url: "https://docln.net/ch/1".to_string(),
                content: "<p>hello</p>".to_string(),
                index: 0,
            }],
        };
        std::fs::write(dir.join("Volume_1.json"), serde_json::to_string_pretty(&record).unwrap()).unwrap();
    }

    #[test]
    fn build_merged_produces_one_output_file() {
        let base = tempfile::tempdir().unwrap();
        write_sample_novel(base.path());
        let out = tempfile::tempdir().unwrap();
        let packager = Packager::new(
            base.path(),
            PackagerConfig {
                compress_images: false,
                output_dir: out.path().to_path_buf(),
            },
        );
        let path = packager.build_merged(&["Volume_1.json".to_string()]).unwrap();
        assert!(path.exists());
        assert!(path.to_string_lossy().ends_with(".epub"));
    }

    #[test]
    fn build_volume_produces_an_output_file_per_call() {
        let base = tempfile::tempdir().unwrap();
        write_sample_novel(base.path());
        let out = tempfile::tempdir().unwrap();
        let packager = Packager::new(
            base.path(),
            PackagerConfig {
                compress_images: false,
                output_dir: out.path().to_path_buf(),
            },
        );
        let path = packager.build_volume("Volume_1.json").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn embed_images_drops_images_that_fail_to_process() {
        let base = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(base.path().join("images")).unwrap();
        let packager = Packager::new(
            base.path(),
            PackagerConfig {
                compress_images: false,
                output_dir: base.path().to_path_buf(),
            },
        );
        let out = packager.embed_images(r#"<p>x</p><img src="images/missing.jpg"><p>y</p>"#);
        assert!(!out.contains("<img"));
        assert!(out.contains("<p>x</p>"));
        assert!(out.contains("<p>y</p>"));
    }

    #[test]
    fn extract_src_reads_attribute() {
        assert_eq!(
            extract_src(r#"<img src="images/a.jpg" alt="x">"#).as_deref(),
            Some("images/a.jpg")
        );
    }
}
