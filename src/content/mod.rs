//! The Content Engine (§4.E): HTML scrubbing and footnote rewriting.

mod footnotes;

pub use footnotes::{
    convert_footnote_markers, extract_footnote_definitions, generate_footnote_asides, process_footnotes,
    FootnoteMap,
};

use lazy_regex::regex;
use scraper::{ElementRef, Html, Node, Selector};

const HIDDEN_CLASSES: &str = ".d-none, .d-md-block, .flex, .note-content";
const EMPTY_CANDIDATES: &str = "p, div, span";

pub(crate) fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|_| Selector::parse("x-never-matches").expect("literal selector is valid"))
}

/// §4.E `CleanHtml`: strips comments, `target="_blank"`/`"__blank"`
/// elements, the known ad/hidden classes, and empty text-only containers.
pub fn clean_html(html: &str) -> String {
    let mut fragment = Html::parse_fragment(html);
    strip_ad_noise(&mut fragment);
    strip_empty_text_containers(&mut fragment);
    fragment.html()
}

/// `CleanHtml` steps 1-3: comments, `target="_blank"`/`"__blank"`, and the
/// known ad/hidden classes. Split out from step 4 (empty-container removal)
/// because the Chapter Downloader interleaves image processing between
/// them (§4.F step 2 vs step 4).
pub(crate) fn strip_ad_noise(fragment: &mut Html) {
    remove_comments(fragment);
    remove_matching(fragment, r#"[target="_blank"], [target="__blank"]"#);
    remove_matching(fragment, HIDDEN_CLASSES);
}

pub(crate) fn strip_empty_text_containers(fragment: &mut Html) {
    let ids: Vec<_> = fragment
        .select(&selector(EMPTY_CANDIDATES))
        .filter(|el| is_empty_of_text_and_image(el))
        .map(|el| el.id())
        .collect();
    detach_all(fragment, ids);
}

fn remove_comments(fragment: &mut Html) {
    let ids: Vec<_> = fragment
        .tree
        .nodes()
        .filter(|n| matches!(n.value(), Node::Comment(_)))
        .map(|n| n.id())
        .collect();
    detach_all(fragment, ids);
}

fn remove_matching(fragment: &mut Html, css: &str) {
    let ids: Vec<_> = fragment.select(&selector(css)).map(|el| el.id()).collect();
    detach_all(fragment, ids);
}

fn is_empty_of_text_and_image(el: &ElementRef<'_>) -> bool {
    let has_text = !el.text().collect::<String>().trim().is_empty();
    let has_img = el.select(&selector("img")).next().is_some();
    !has_text && !has_img
}

pub(crate) fn detach_all(fragment: &mut Html, ids: Vec<ego_tree::NodeId>) {
    for id in ids {
        if let Some(mut node) = fragment.tree.get_mut(id) {
            node.detach();
        }
    }
}

/// §4.E `SanitizeXhtml`: string-level passes, order matters.
pub fn sanitize_xhtml(html: &str) -> String {
    let step1 = html.replace("&nbsp;", "&#160;");
    let step2 = regex!(r"(?is)<p[^>]*>(?:\s|&nbsp;|&#160;|<br[^>]*/?>)*</p>").replace_all(&step1, "");
    let step3 = regex!(r"(?is)(?:<br[^>]*/?>\s*){3,}").replace_all(&step2, "<br/><br/>");
    let step4 = regex!(r"\n{3,}").replace_all(&step3, "\n\n");
    step4.trim().to_string()
}

/// `SanitizeXhtml(ProcessFootnotes(CleanHtml(html), slug))`.
pub fn process_content(html: &str, slug: &str) -> String {
    let cleaned = clean_html(html);
    let with_footnotes = process_footnotes(&cleaned, slug);
    sanitize_xhtml(&with_footnotes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_comments() {
        let out = clean_html("<div><!-- ad --><p>hi</p></div>");
        assert!(!out.contains("ad"));
        assert!(out.contains("hi"));
    }

    #[test]
    fn removes_target_blank_elements() {
        let out = clean_html(r#"<div><a target="_blank">gone</a><p>stay</p></div>"#);
        assert!(!out.contains("gone"));
        assert!(out.contains("stay"));
    }

    #[test]
    fn removes_hidden_classes() {
        let out = clean_html(r#"<div class="d-none">hidden</div><p>visible</p>"#);
        assert!(!out.contains("hidden"));
        assert!(out.contains("visible"));
    }

    #[test]
    fn removes_empty_text_only_containers_but_keeps_images() {
        let out = clean_html(r#"<p>   </p><div><img src="a.jpg"/></div><span>keep</span>"#);
        assert!(out.contains("img"));
        assert!(out.contains("keep"));
    }

    #[test]
    fn sanitize_collapses_empty_paragraphs_and_breaks() {
        let html = "<p>&nbsp;</p><p><br/></p>text<br/><br/><br/><br/>end";
        let out = sanitize_xhtml(html);
        assert!(!out.contains("<p>"));
        assert_eq!(out.matches("<br/>").count(), 2);
    }

    #[test]
    fn sanitize_collapses_newlines_and_trims() {
        let out = sanitize_xhtml("  \n\n\n\nhello\n\n\n\nworld\n\n\n  ");
        assert_eq!(out, "hello\n\nworld");
    }
}
