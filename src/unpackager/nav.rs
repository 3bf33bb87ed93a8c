//! Parses a nav document's `<nav><ol><li>` tree or an NCX's `navMap`
//! `navPoint` tree into a common shape the unpack pipeline walks.

use scraper::{ElementRef, Html};

use crate::content;

#[derive(Debug, Clone, Default)]
pub struct NavEntry {
    pub title: String,
    pub href: String,
    pub children: Vec<NavEntry>,
}

fn direct_children<'a>(el: &ElementRef<'a>, tag: &str) -> Vec<ElementRef<'a>> {
    el.children()
        .filter_map(ElementRef::wrap)
        .filter(|c| c.value().name() == tag)
        .collect()
}

fn text_of(el: &ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

pub fn parse_nav_document(xhtml: &str) -> Vec<NavEntry> {
    let doc = Html::parse_document(xhtml);
    let Some(nav_el) = pick_toc_nav(&doc) else {
        return Vec::new();
    };
    let Some(top_ol) = direct_children(&nav_el, "ol").into_iter().next() else {
        return Vec::new();
    };
    direct_children(&top_ol, "li").iter().map(parse_nav_li).collect()
}

/// Prefers a `<nav epub:type="toc">`; falls back to the first `<nav>` at all,
/// since `epub:type` attribute-namespace handling is inconsistent across
/// lenient parsers and most single-nav documents only carry the TOC anyway.
fn pick_toc_nav(doc: &Html) -> Option<ElementRef<'_>> {
    doc.select(&content::selector("nav"))
        .find(|el| el.value().attr("epub:type").map(|v| v.contains("toc")).unwrap_or(false))
        .or_else(|| doc.select(&content::selector("nav")).next())
}

fn parse_nav_li(li: &ElementRef<'_>) -> NavEntry {
    let a = direct_children(li, "a").into_iter().next();
    let (title, href) = match a {
        Some(a) => (text_of(&a), a.value().attr("href").unwrap_or("").to_string()),
        None => (String::new(), String::new()),
    };
    let children = direct_children(li, "ol")
        .into_iter()
        .next()
        .map(|ol| direct_children(&ol, "li").iter().map(parse_nav_li).collect())
        .unwrap_or_default();
    NavEntry { title, href, children }
}

pub fn parse_ncx_document(ncx: &str) -> Vec<NavEntry> {
    let doc = Html::parse_document(ncx);
    let Some(nav_map) = doc.select(&content::selector("navmap")).next() else {
        return Vec::new();
    };
    direct_children(&nav_map, "navpoint").iter().map(parse_ncx_navpoint).collect()
}

fn parse_ncx_navpoint(np: &ElementRef<'_>) -> NavEntry {
    let title = direct_children(np, "navlabel")
        .into_iter()
        .next()
        .and_then(|label| direct_children(&label, "text").into_iter().next().map(|t| text_of(&t)))
        .unwrap_or_default();
    let href = direct_children(np, "content")
        .into_iter()
        .next()
        .and_then(|c| c.value().attr("src").map(str::to_string))
        .unwrap_or_default();
    let children = direct_children(np, "navpoint").iter().map(parse_ncx_navpoint).collect();
    NavEntry { title, href, children }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_nav_toc() {
        let xhtml = r#"<html><body><nav epub:type="toc"><ol>
            <li><a href="text/vol1_sep.xhtml">Volume 1</a><ol>
                <li><a href="text/vol1_ch0.xhtml">Chapter 1</a></li>
                <li><a href="text/vol1_ch1.xhtml">Chapter 2</a></li>
            </ol></li>
        </ol></nav></body></html>"#;
        let entries = parse_nav_document(xhtml);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "Volume 1");
        assert_eq!(entries[0].children.len(), 2);
        assert_eq!(entries[0].children[0].href, "text/vol1_ch0.xhtml");
    }

    #[test]
    fn parses_flat_nav_toc() {
        let xhtml = r#"<html><body><nav epub:type="toc"><ol>
            <li><a href="text/ch0.xhtml">Chapter 1</a></li>
            <li><a href="text/ch1.xhtml">Chapter 2</a></li>
        </ol></nav></body></html>"#;
        let entries = parse_nav_document(xhtml);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.children.is_empty()));
    }

    #[test]
    fn parses_ncx_navmap() {
        let ncx = r#"<ncx><navMap>
            <navPoint id="np1"><navLabel><text>Volume 1</text></navLabel><content src="text/vol1_sep.xhtml"/>
                <navPoint id="np2"><navLabel><text>Chapter 1</text></navLabel><content src="text/vol1_ch0.xhtml"/></navPoint>
            </navPoint>
        </navMap></ncx>"#;
        let entries = parse_ncx_document(ncx);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "Volume 1");
        assert_eq!(entries[0].children[0].title, "Chapter 1");
    }
}
