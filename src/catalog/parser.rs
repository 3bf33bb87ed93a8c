//! Catalog Parser (§4.D): HTML → catalog record.

use lazy_regex::regex;
use scraper::{Html, Selector};
use url::Url;

use crate::error::CatalogError;
use crate::net::NetworkFabric;

use super::{ChapterRef, Novel, Volume};

/// Validates `url` against the primary host list, fetches it through
/// `fabric`, and parses the result into a [`Novel`].
pub fn parse(fabric: &NetworkFabric, url: &str, primary_hosts: &[String]) -> Result<Novel, CatalogError> {
    let parsed = Url::parse(url).map_err(|_| CatalogError::InvalidUrl)?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(CatalogError::InvalidUrl);
    }
    let host = parsed.host_str().ok_or(CatalogError::InvalidUrl)?;
    if !primary_hosts
        .iter()
        .any(|d| host == d || host.ends_with(&format!(".{d}")))
    {
        return Err(CatalogError::InvalidDomain {
            host: host.to_string(),
            primaries: primary_hosts.join(", "),
        });
    }

    let response = fabric.fetch_with_retry(url, None, None)?;
    let body = String::from_utf8_lossy(&response.body).into_owned();
    parse_html(&body, &parsed, primary_hosts)
}

fn parse_html(body: &str, base: &Url, primary_hosts: &[String]) -> Result<Novel, CatalogError> {
    let document = Html::parse_document(body);
    let canonical_host = canonical_host(base, primary_hosts);

    let name = Novel::unknown_if_empty(&text_of(&document, "span.series-name"));
    let author = extract_author(&document);
    let summary = extract_summary(&document);
    let main_cover = extract_main_cover(&document);
    let tags = extract_tags(&document);
    let volumes = extract_volumes(&document, base, &canonical_host);

    Ok(Novel {
        name,
        url: base.to_string(),
        author,
        summary,
        main_cover,
        tags,
        volumes,
    })
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|_| Selector::parse("x-never-matches").expect("literal selector is valid"))
}

fn text_of(document: &Html, css: &str) -> String {
    document
        .select(&selector(css))
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

fn extract_author(document: &Html) -> String {
    let items = selector("div.series-information > div.info-item");
    let name_sel = selector("span.info-name");
    let value_sel = selector("span.info-value");

    for item in document.select(&items) {
        let Some(name) = item.select(&name_sel).next() else {
            continue;
        };
        if name.text().collect::<String>().contains("Tác giả") {
            if let Some(value) = item.select(&value_sel).next() {
                return value.text().collect::<String>().trim().to_string();
            }
        }
    }
    String::new()
}

const SUMMARY_NOISE: &[&str] = &[
    "a.see-more",
    "div.less-state",
    "div.more-state",
    "span.see-more",
    "span.less-state",
    "span.more-state",
];

fn extract_summary(document: &Html) -> String {
    let Some(summary_el) = document.select(&selector("div.summary-content")).next() else {
        return String::new();
    };
    let inner_html = summary_el.inner_html();
    let mut fragment = Html::parse_fragment(&inner_html);
    for css in SUMMARY_NOISE {
        let ids: Vec<_> = fragment.select(&selector(css)).map(|el| el.id()).collect();
        for id in ids {
            if let Some(mut node) = fragment.tree.get_mut(id) {
                node.detach();
            }
        }
    }
    fragment.html().trim().to_string()
}

fn extract_main_cover(document: &Html) -> String {
    let Some(el) = document
        .select(&selector("div.series-cover div.img-in-ratio"))
        .next()
    else {
        return String::new();
    };
    let Some(style) = el.value().attr("style") else {
        return String::new();
    };
    extract_url_from_style(style).unwrap_or_default()
}

fn extract_url_from_style(style: &str) -> Option<String> {
    let captures = regex!(r#"url\(['"]?([^'")\s]+)"#).captures(style)?;
    Some(captures.get(1)?.as_str().to_string())
}

fn extract_tags(document: &Html) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    document
        .select(&selector("div.series-gernes a, div.series-genres a"))
        .filter_map(|el| {
            let text = el.text().collect::<String>().trim().to_string();
            (!text.is_empty()).then_some(text)
        })
        .filter(|text| seen.insert(text.clone()))
        .collect()
}

fn extract_volumes(document: &Html, base: &Url, canonical_host: &str) -> Vec<Volume> {
    document
        .select(&selector("section.volume-list"))
        .map(|section| {
            let name = Volume::unknown_if_empty(&text_of_el(&section, "span.sect-title"));
            let cover_href = section
                .select(&selector("div.volume-cover a[href]"))
                .next()
                .and_then(|el| el.value().attr("href"))
                .map(|href| resolve_href(base, canonical_host, href))
                .unwrap_or_default();
            let cover_img = section
                .select(&selector("div.volume-cover div.img-in-ratio"))
                .next()
                .and_then(|el| el.value().attr("style"))
                .and_then(extract_url_from_style)
                .unwrap_or_default();
            let chapters = section
                .select(&selector("ul.list-chapters li a"))
                .map(|el| ChapterRef {
                    name: el.text().collect::<String>().trim().to_string(),
                    url: el
                        .value()
                        .attr("href")
                        .map(|href| resolve_href(base, canonical_host, href))
                        .unwrap_or_default(),
                })
                .collect();
            Volume {
                url: cover_href,
                name,
                cover_img,
                chapters,
            }
        })
        .collect()
}

fn text_of_el(el: &scraper::ElementRef<'_>, css: &str) -> String {
    el.select(&selector(css))
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

fn canonical_host(base: &Url, primary_hosts: &[String]) -> String {
    let base_str = base.as_str();
    primary_hosts
        .iter()
        .find(|d| base_str.contains(d.as_str()))
        .cloned()
        .or_else(|| primary_hosts.first().cloned())
        .unwrap_or_default()
}

fn resolve_href(base: &Url, canonical_host: &str, href: &str) -> String {
    match base.join(href) {
        Ok(mut resolved) => {
            let _ = resolved.set_host(Some(canonical_host));
            resolved.to_string()
        }
        Err(_) => href.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_NO_VOLUMES: &str = r#"
        <html><body>
        <span class="series-name">T</span>
        <div class="series-information">
          <div class="info-item"><span class="info-name">Tác giả</span><span class="info-value">A</span></div>
        </div>
        </body></html>
    "#;

    #[test]
    fn parses_title_and_author_with_no_volumes() {
        let base = Url::parse("https://docln.net/truyen/5").unwrap();
        let novel = parse_html(SAMPLE_NO_VOLUMES, &base, &["docln.net".to_string()]).unwrap();
        assert_eq!(novel.name, "T");
        assert_eq!(novel.author, "A");
        assert!(novel.volumes.is_empty());
    }

    #[test]
    fn missing_title_falls_back_to_unknown() {
        let base = Url::parse("https://docln.net/truyen/5").unwrap();
        let novel = parse_html("<html><body></body></html>", &base, &["docln.net".to_string()]).unwrap();
        assert_eq!(novel.name, "Unknown");
    }

    #[test]
    fn rejects_non_hako_domain() {
        let result = parse(
            &NetworkFabric::new(crate::config::FabricConfig::default(), None),
            "https://example.com/x",
            &["docln.net".to_string()],
        );
        assert!(matches!(result, Err(CatalogError::InvalidDomain { .. })));
    }

    #[test]
    fn extracts_cover_url_from_style_attribute() {
        let style = "background-image: url('https://i.docln.net/cover.jpg');";
        assert_eq!(
            extract_url_from_style(style).as_deref(),
            Some("https://i.docln.net/cover.jpg")
        );
    }

    #[test]
    fn extracts_tags_in_document_order() {
        let html = r#"<div class="series-genres"><a>Action</a><a>  </a><a>Drama</a></div>"#;
        let document = Html::parse_document(html);
        assert_eq!(extract_tags(&document), vec!["Action", "Drama"]);
    }

    #[test]
    fn extract_tags_dedups_across_mirrored_blocks() {
        let html = r#"
            <div class="series-gernes"><a>Action</a><a>Drama</a></div>
            <div class="series-genres"><a>Drama</a><a>Comedy</a></div>
        "#;
        let document = Html::parse_document(html);
        assert_eq!(extract_tags(&document), vec!["Action", "Drama", "Comedy"]);
    }
}
