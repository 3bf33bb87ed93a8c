//! The Unpackager (§4.H): e-book container → canonical on-disk form.
//!
//! The spec's manifest/spine/nested-TOC walk goes beyond what
//! `epub::doc::EpubDoc` exposes in the teacher's own usage (`.mdata()`,
//! `.resources`, spine-order `.go_next()` in `updater/native/book.rs`), so
//! this module reads the container directly with `zip` and scrapes the
//! package document / navigation document with `scraper`, mirroring the
//! Packager's own container writer. See DESIGN.md for the dependency note.

mod nav;

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use eyre::{eyre, Context, Result};
use lazy_regex::regex;
use scraper::{ElementRef, Html};

use crate::content;
use crate::downloader::{MaterializedChapter, NovelRecord, VolumeDescriptor, VolumeRecord};
use crate::slug::slug;
use nav::NavEntry;

pub struct UnpackagerOptions {
    pub output_dir: PathBuf,
    pub clean_volume_name: Option<Box<dyn Fn(&str) -> String>>,
}

struct ManifestItem {
    href: String,
    media_type: String,
    properties: String,
}

struct Package {
    opf_dir: String,
    manifest: HashMap<String, ManifestItem>,
    spine: Vec<String>,
    toc_idref: Option<String>,
    title: String,
    author: String,
    summary: String,
    tags: Vec<String>,
    source_url: String,
    cover_meta_id: Option<String>,
}

struct Volume {
    name: String,
    order: usize,
    hrefs: Vec<String>,
    titles_by_href: HashMap<String, String>,
}

/// §4.H steps 1-7.
pub fn unpack(container_path: &Path, options: &UnpackagerOptions) -> Result<NovelRecord> {
    let file = std::fs::File::open(container_path).wrap_err("opening container")?;
    let mut archive = zip::ZipArchive::new(file).wrap_err("reading container as zip")?;

    let opf_path = read_opf_path(&mut archive)?;
    let opf_xml = read_entry_string(&mut archive, &opf_path)?;
    let package = parse_package(&opf_xml, &opf_path)?;

    let nav_entries = load_nav_tree(&mut archive, &package)?;
    let mut volumes = build_volume_definitions(&nav_entries, &package.title);
    if volumes.is_empty() {
        volumes.push(spine_fallback_volume(&package));
    }

    std::fs::create_dir_all(options.output_dir.join("images")).wrap_err("creating base/images directories")?;

    let mut descriptors = Vec::new();
    for (i, volume) in volumes.iter().enumerate() {
        let chapters = materialize_volume_chapters(&mut archive, &package, volume, i, &options.output_dir)?;
        let display_name = options
            .clean_volume_name
            .as_ref()
            .map_or_else(|| volume.name.clone(), |f| f(&volume.name));
        let record = VolumeRecord {
            volume_name: display_name.clone(),
            volume_url: String::new(),
            cover_image_local: String::new(),
            chapters,
        };
        let filename = format!("{}.json", slug(&display_name));
        let json = serde_json::to_string_pretty(&record).wrap_err("serializing unpacked volume record")?;
        std::fs::write(options.output_dir.join(&filename), json).wrap_err("writing unpacked volume record")?;

        descriptors.push(VolumeDescriptor {
            order: (i + 1) as u32,
            name: display_name,
            filename,
            url: String::new(),
        });
    }

    let cover_image_local = extract_main_cover(&mut archive, &package, &options.output_dir)?;

    let metadata = NovelRecord {
        novel_name: package.title,
        author: package.author,
        tags: package.tags,
        summary: package.summary,
        cover_image_local,
        url: package.source_url,
        volumes: descriptors,
    };
    let json = serde_json::to_string_pretty(&metadata).wrap_err("serializing unpacked metadata.json")?;
    std::fs::write(options.output_dir.join("metadata.json"), json).wrap_err("writing unpacked metadata.json")?;

    Ok(metadata)
}

fn read_entry_string(archive: &mut zip::ZipArchive<std::fs::File>, path: &str) -> Result<String> {
    let mut entry = archive
        .by_name(path)
        .map_err(|_| eyre!("container is missing entry {path}"))?;
    let mut buf = String::new();
    entry.read_to_string(&mut buf).wrap_err("reading container entry")?;
    Ok(buf)
}

fn read_entry_bytes(archive: &mut zip::ZipArchive<std::fs::File>, path: &str) -> Option<Vec<u8>> {
    let mut entry = archive.by_name(path).ok()?;
    let mut buf = Vec::new();
    entry.read_to_end(&mut buf).ok()?;
    Some(buf)
}

fn read_opf_path(archive: &mut zip::ZipArchive<std::fs::File>) -> Result<String> {
    let container_xml = read_entry_string(archive, "META-INF/container.xml")?;
    let doc = Html::parse_document(&container_xml);
    doc.select(&content::selector("rootfile"))
        .next()
        .and_then(|el| el.value().attr("full-path"))
        .map(str::to_string)
        .ok_or_else(|| eyre!("container.xml has no rootfile"))
}

fn dirname(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

fn join_relative(base_dir: &str, relative: &str) -> String {
    if base_dir.is_empty() {
        relative.to_string()
    } else {
        format!("{base_dir}/{relative}")
    }
}

fn text_of(el: &ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn parse_package(xml: &str, opf_path: &str) -> Result<Package> {
    let doc = Html::parse_document(xml);

    let title = doc
        .select(&content::selector(r"dc\:title"))
        .next()
        .map(|el| text_of(&el))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Unknown".to_string());
    let author = doc
        .select(&content::selector(r"dc\:creator"))
        .next()
        .map(|el| text_of(&el))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Unknown".to_string());
    let summary = doc
        .select(&content::selector(r"dc\:description"))
        .next()
        .map(|el| text_of(&el))
        .unwrap_or_default();
    let source_url = doc
        .select(&content::selector(r"dc\:source"))
        .next()
        .map(|el| text_of(&el))
        .unwrap_or_default();
    let tags = doc
        .select(&content::selector(r"dc\:subject"))
        .map(|el| text_of(&el))
        .filter(|s| !s.is_empty())
        .collect();

    let mut manifest = HashMap::new();
    for item in doc.select(&content::selector("manifest item")) {
        let Some(id) = item.value().attr("id") else { continue };
        manifest.insert(
            id.to_string(),
            ManifestItem {
                href: item.value().attr("href").unwrap_or_default().to_string(),
                media_type: item.value().attr("media-type").unwrap_or_default().to_string(),
                properties: item.value().attr("properties").unwrap_or_default().to_string(),
            },
        );
    }

    let spine = doc
        .select(&content::selector("spine itemref"))
        .filter_map(|el| el.value().attr("idref").map(str::to_string))
        .collect();
    let toc_idref = doc
        .select(&content::selector("spine"))
        .next()
        .and_then(|el| el.value().attr("toc"))
        .map(str::to_string);

    let cover_meta_id = doc
        .select(&content::selector(r#"meta[name="cover"]"#))
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(str::to_string);

    Ok(Package {
        opf_dir: dirname(opf_path),
        manifest,
        spine,
        toc_idref,
        title,
        author,
        summary,
        tags,
        source_url,
        cover_meta_id,
    })
}

/// Locates the nav document (`application/xhtml+xml` item whose href
/// contains `nav`) or, failing that, the NCX referenced by the spine's
/// `toc` attribute, and parses whichever exists into a `NavEntry` tree.
fn load_nav_tree(archive: &mut zip::ZipArchive<std::fs::File>, package: &Package) -> Result<Vec<NavEntry>> {
    if let Some(item) = package
        .manifest
        .values()
        .find(|item| item.media_type == "application/xhtml+xml" && item.href.contains("nav"))
    {
        let path = join_relative(&package.opf_dir, &item.href);
        let xhtml = read_entry_string(archive, &path)?;
        return Ok(nav::parse_nav_document(&xhtml));
    }

    if let Some(ncx_item) = package.toc_idref.as_ref().and_then(|id| package.manifest.get(id)) {
        let path = join_relative(&package.opf_dir, &ncx_item.href);
        let ncx = read_entry_string(archive, &path)?;
        return Ok(nav::parse_ncx_document(&ncx));
    }

    Ok(Vec::new())
}

/// §4.H step 5.
fn build_volume_definitions(nav_entries: &[NavEntry], novel_title: &str) -> Vec<Volume> {
    let with_children: Vec<&NavEntry> = nav_entries.iter().filter(|e| !e.children.is_empty()).collect();

    if !with_children.is_empty() {
        return with_children
            .into_iter()
            .enumerate()
            .map(|(order, entry)| {
                let mut titles_by_href = HashMap::new();
                let hrefs = entry
                    .children
                    .iter()
                    .map(|child| {
                        let href = strip_fragment(&child.href);
                        titles_by_href.insert(href.clone(), child.title.clone());
                        href
                    })
                    .collect();
                Volume {
                    name: entry.title.clone(),
                    order,
                    hrefs,
                    titles_by_href,
                }
            })
            .collect();
    }

    let mut titles_by_href = HashMap::new();
    let mut hrefs = Vec::new();
    collect_all_hrefs(nav_entries, &mut hrefs, &mut titles_by_href);
    if !hrefs.is_empty() {
        return vec![Volume {
            name: novel_title.to_string(),
            order: 0,
            hrefs,
            titles_by_href,
        }];
    }

    Vec::new()
}

fn collect_all_hrefs(entries: &[NavEntry], hrefs: &mut Vec<String>, titles: &mut HashMap<String, String>) {
    for entry in entries {
        let href = strip_fragment(&entry.href);
        if !href.is_empty() && !hrefs.contains(&href) {
            titles.insert(href.clone(), entry.title.clone());
            hrefs.push(href);
        }
        collect_all_hrefs(&entry.children, hrefs, titles);
    }
}

fn strip_fragment(href: &str) -> String {
    href.split('#').next().unwrap_or("").to_string()
}

/// Builds the spine-fallback volume when the TOC yields nothing at all.
fn spine_fallback_volume(package: &Package) -> Volume {
    let hrefs = package
        .spine
        .iter()
        .filter_map(|id| package.manifest.get(id))
        .filter(|item| item.media_type == "application/xhtml+xml")
        .map(|item| item.href.clone())
        .collect();
    Volume {
        name: package.title.clone(),
        order: 0,
        hrefs,
        titles_by_href: HashMap::new(),
    }
}

fn materialize_volume_chapters(
    archive: &mut zip::ZipArchive<std::fs::File>,
    package: &Package,
    volume: &Volume,
    vol_index: usize,
    output_dir: &Path,
) -> Result<Vec<MaterializedChapter>> {
    let spine_hrefs: Vec<String> = package
        .spine
        .iter()
        .filter_map(|id| package.manifest.get(id))
        .map(|item| item.href.clone())
        .collect();

    let mut order: Vec<String> = spine_hrefs
        .into_iter()
        .filter(|href| volume.hrefs.contains(href))
        .collect();
    if order.is_empty() {
        order = volume.hrefs.clone();
    }

    let vol_slug_base = if volume.order == 0 && volume.hrefs.is_empty() {
        slug(&package.title)
    } else {
        slug(&volume.name)
    };
    let vol_slug = vol_slug_base.to_lowercase();

    let mut chapters = Vec::new();
    for (i, href) in order.iter().enumerate() {
        let Some(chapter) = materialize_chapter(archive, package, volume, href, vol_index, i, &vol_slug, output_dir)?
        else {
            continue;
        };
        chapters.push(chapter);
    }

    for (i, chapter) in chapters.iter_mut().enumerate() {
        chapter.index = i as u32;
    }
    Ok(chapters)
}

#[allow(clippy::too_many_arguments)]
fn materialize_chapter(
    archive: &mut zip::ZipArchive<std::fs::File>,
    package: &Package,
    volume: &Volume,
    href: &str,
    _vol_index: usize,
    i: usize,
    vol_slug: &str,
    output_dir: &Path,
) -> Result<Option<MaterializedChapter>> {
    let path = join_relative(&package.opf_dir, href);
    let Some(xhtml) = read_entry_bytes(archive, &path).map(|b| String::from_utf8_lossy(&b).into_owned()) else {
        return Ok(None);
    };
    let doc = Html::parse_document(&xhtml);

    let title = volume
        .titles_by_href
        .get(href)
        .cloned()
        .unwrap_or_else(|| doc.select(&content::selector("title")).next().map(|el| text_of(&el)).unwrap_or_default());

    let body_el = doc.select(&content::selector("body")).next();
    let body_html = body_el.map(|el| el.inner_html()).unwrap_or_else(|| xhtml.clone());
    let text_len = body_el
        .map(|el| el.text().collect::<String>().trim().chars().count())
        .unwrap_or(0);

    let title_lower = title.to_lowercase();
    if text_len < 100 && title_lower.contains("cover") {
        return Ok(None);
    }
    if text_len < 50 && (title_lower.contains("toc") || title_lower.contains("contents") || title_lower.contains("mục lục"))
    {
        return Ok(None);
    }

    let doc_dir = dirname(&path);
    let with_images = rewrite_chapter_images(archive, package, &body_html, &doc_dir, vol_slug, i as u32, output_dir);

    let slug_for_notes = format!("{vol_slug}_chap_{i}");
    let with_footnotes = content::process_footnotes(&with_images, &slug_for_notes);
    let cleaned = content::clean_html(&with_footnotes);

    Ok(Some(MaterializedChapter {
        title,
        url: String::new(),
        content: cleaned,
        index: i as u32,
    }))
}

fn rewrite_chapter_images(
    archive: &mut zip::ZipArchive<std::fs::File>,
    package: &Package,
    html: &str,
    doc_dir: &str,
    vol_slug: &str,
    chapter_index: u32,
    output_dir: &Path,
) -> String {
    let tags: Vec<String> = regex!(r"(?is)<img\b[^>]*>")
        .find_iter(html)
        .map(|m| m.as_str().to_string())
        .collect();

    let mut m = 0u32;
    let mut rewritten_tags = Vec::with_capacity(tags.len());
    for tag in &tags {
        let Some(src) = extract_src(tag) else {
            rewritten_tags.push(String::new());
            continue;
        };
        let resolved = normalize_path(&join_relative(doc_dir, &src));
        let opf_relative = normalize_path(&join_relative(&package.opf_dir, &src));
        let bytes = read_entry_bytes(archive, &resolved)
            .or_else(|| read_entry_bytes(archive, &opf_relative))
            .or_else(|| find_by_basename(archive, package, &resolved));
        let Some(bytes) = bytes else {
            rewritten_tags.push(String::new());
            continue;
        };

        let ext = ext_from_path_or_mime(&resolved, package, &opf_relative);
        let index = m;
        m += 1;
        let rel = format!("images/{vol_slug}_chap_{chapter_index}_img_{index}.{ext}");
        if std::fs::write(output_dir.join(&rel), &bytes).is_err() {
            rewritten_tags.push(String::new());
            continue;
        }
        rewritten_tags.push(format!("<img src=\"{rel}\">"));
    }

    let mut out = String::with_capacity(html.len());
    let mut last_end = 0;
    for (m, replacement) in regex!(r"(?is)<img\b[^>]*>").find_iter(html).zip(rewritten_tags) {
        out.push_str(&html[last_end..m.start()]);
        out.push_str(&replacement);
        last_end = m.end();
    }
    out.push_str(&html[last_end..]);
    out
}

fn extract_src(tag: &str) -> Option<String> {
    regex!(r#"(?is)\bsrc\s*=\s*"([^"]*)""#).captures(tag).map(|c| c[1].to_string())
}

fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

fn find_by_basename(archive: &mut zip::ZipArchive<std::fs::File>, package: &Package, resolved: &str) -> Option<Vec<u8>> {
    let basename = resolved.rsplit('/').next().unwrap_or(resolved);
    let item = package
        .manifest
        .values()
        .find(|item| item.media_type.starts_with("image") && item.href.rsplit('/').next() == Some(basename))?;
    let path = join_relative(&package.opf_dir, &item.href);
    read_entry_bytes(archive, &path)
}

fn ext_from_path_or_mime(resolved: &str, package: &Package, candidate_opf_relative: &str) -> String {
    let mime = package
        .manifest
        .values()
        .find(|item| {
            join_relative(&package.opf_dir, &item.href) == candidate_opf_relative
                || item.href == resolved
                || item.href.rsplit('/').next() == resolved.rsplit('/').next()
        })
        .map(|item| item.media_type.as_str());
    match mime {
        Some("image/png") => "png",
        Some("image/gif") => "gif",
        Some("image/webp") => "webp",
        _ => match resolved.rsplit('.').next() {
            Some("png") => "png",
            Some("gif") => "gif",
            Some("webp") => "webp",
            _ => "jpg",
        },
    }
    .to_string()
}

fn extract_main_cover(
    archive: &mut zip::ZipArchive<std::fs::File>,
    package: &Package,
    output_dir: &Path,
) -> Result<String> {
    let cover_item = package
        .cover_meta_id
        .as_ref()
        .and_then(|id| package.manifest.get(id))
        .or_else(|| package.manifest.values().find(|item| item.properties.contains("cover-image")));

    let Some(item) = cover_item else {
        return Ok(String::new());
    };
    let path = join_relative(&package.opf_dir, &item.href);
    let Some(bytes) = read_entry_bytes(archive, &path) else {
        return Ok(String::new());
    };
    let ext = match item.media_type.as_str() {
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "jpg",
    };
    let rel = format!("images/main_cover.{ext}");
    std::fs::write(output_dir.join(&rel), bytes).wrap_err("writing unpacked main cover")?;
    Ok(rel)
}
