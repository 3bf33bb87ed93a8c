//! Packager configuration and the in-memory document/nav plan shared by
//! `BuildMerged` and `BuildVolume`.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct PackagerConfig {
    pub compress_images: bool,
    pub output_dir: PathBuf,
}

/// One spine document (title page, volume separator, or chapter).
pub struct Document {
    pub id: String,
    pub href: String,
    pub title: String,
    pub body_html: String,
}

/// One node of the navigation tree; `href` is empty for a volume heading
/// that has no document of its own (merged-pack volume separators always
/// have one, so this is mostly a hook for future flat packs).
pub struct NavNode {
    pub title: String,
    pub href: String,
    pub children: Vec<NavNode>,
}

pub struct BookPlan {
    pub title: String,
    pub author: String,
    pub summary: String,
    pub documents: Vec<Document>,
    pub nav: Vec<NavNode>,
}
