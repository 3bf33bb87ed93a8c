//! Footnote extraction and cross-document marker rewriting (§4.E).

use lazy_regex::regex;
use scraper::Html;

use super::selector;

/// An ordered, duplicate-free `id → content` map. Footnote counts per
/// chapter are small, so a linear scan beats the bookkeeping of a hash map
/// while still preserving insertion order for `includeUnused`.
#[derive(Debug, Clone, Default)]
pub struct FootnoteMap(Vec<(String, String)>);

impl FootnoteMap {
    fn insert_if_absent(&mut self, id: String, content: String) {
        if !self.0.iter().any(|(existing, _)| existing == &id) {
            self.0.push((id, content));
        }
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == id).map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn note_id(raw: &str) -> bool {
    regex!(r"^note\d+$").is_match(raw)
}

/// §4.E `ExtractFootnoteDefinitions`, read-only.
pub fn extract_footnote_definitions(html: &str) -> FootnoteMap {
    let fragment = Html::parse_fragment(html);
    let mut map = FootnoteMap::default();
    collect_definitions(&fragment, &mut map);
    map
}

fn collect_definitions(fragment: &Html, map: &mut FootnoteMap) {
    let real_content = selector("span.note-content_real");
    for div in fragment.select(&selector("div[id]")) {
        let Some(id) = div.value().attr("id") else {
            continue;
        };
        if !note_id(id) {
            continue;
        }
        let content = div
            .select(&real_content)
            .next()
            .map(|el| el.text().collect::<String>())
            .unwrap_or_else(|| div.text().collect::<String>());
        let trimmed = content.trim().to_string();
        if !trimmed.is_empty() {
            map.insert_if_absent(id.to_string(), trimmed);
        }
    }
}

/// §4.E `ConvertFootnoteMarkers`. Returns the rewritten HTML and the
/// ordered, duplicate-free list of footnote ids actually referenced.
pub fn convert_footnote_markers(html: &str, map: &FootnoteMap, slug: &str) -> (String, Vec<String>) {
    let mut used: Vec<String> = Vec::new();
    let mut counter: u32 = 1;

    let pattern_one = regex!(r"(\(\d+\)|\[\d+\])?\s*\[(note\d+)\]");
    let after_one = pattern_one.replace_all(html, |caps: &regex::Captures<'_>| {
        let id = &caps[2];
        if !map.contains(id) {
            return caps[0].to_string();
        }
        mark_used(&mut used, id);
        let preceding = caps.get(1).map(|m| m.as_str().trim()).filter(|s| !s.is_empty());
        let label = label_for(preceding, &mut counter);
        render_noteref(slug, id, &label)
    });

    let pattern_two = regex!(r#"<a[^>]*href=["']#(note\d+)["'][^>]*>([^<]*)</a>"#);
    let after_two = pattern_two.replace_all(&after_one, |caps: &regex::Captures<'_>| {
        let id = &caps[1];
        if !map.contains(id) {
            return caps[0].to_string();
        }
        mark_used(&mut used, id);
        let text = caps.get(2).map(|m| m.as_str().trim()).filter(|s| !s.is_empty());
        let label = label_for(text, &mut counter);
        render_noteref(slug, id, &label)
    });

    (after_two.into_owned(), used)
}

fn mark_used(used: &mut Vec<String>, id: &str) {
    if !used.iter().any(|u| u == id) {
        used.push(id.to_string());
    }
}

fn label_for(explicit: Option<&str>, counter: &mut u32) -> String {
    match explicit {
        Some(text) => text.to_string(),
        None => {
            let label = format!("[{counter}]");
            *counter += 1;
            label
        }
    }
}

fn render_noteref(slug: &str, id: &str, label: &str) -> String {
    format!(r#"<a epub:type="noteref" href="#{slug}_{id}" class="footnote-link">{label}</a>"#)
}

/// §4.E `GenerateFootnoteAsides`.
pub fn generate_footnote_asides(used: &[String], map: &FootnoteMap, slug: &str, include_unused: bool) -> String {
    let mut out = String::new();
    for id in used {
        if let Some(content) = map.get(id) {
            out.push_str(&render_aside(slug, id, content, "Ghi chú:"));
        }
    }
    if include_unused {
        for (id, content) in map.iter() {
            if used.iter().any(|u| u == id) {
                continue;
            }
            out.push_str(&render_aside(slug, id, content, "Ghi chú (Thêm):"));
        }
    }
    out
}

fn render_aside(slug: &str, id: &str, content: &str, header: &str) -> String {
    format!(
        "<aside id=\"{slug}_{id}\" epub:type=\"footnote\" class=\"footnote-content\">\n  \
         <div class=\"note-header\">{header}</div>\n  <p>{content}</p>\n</aside>"
    )
}

/// §4.E `ProcessFootnotes`: extracts definitions (removing the matched
/// divs and any `.note-reg` container), rewrites markers, and appends the
/// generated asides.
pub fn process_footnotes(html: &str, slug: &str) -> String {
    let mut fragment = Html::parse_fragment(html);
    let mut map = FootnoteMap::default();
    collect_definitions(&fragment, &mut map);

    let note_div_ids: Vec<_> = fragment
        .select(&selector("div[id]"))
        .filter(|div| div.value().attr("id").is_some_and(note_id))
        .map(|el| el.id())
        .collect();
    let note_reg_ids: Vec<_> = fragment.select(&selector(".note-reg")).map(|el| el.id()).collect();
    super::detach_all(&mut fragment, note_div_ids);
    super::detach_all(&mut fragment, note_reg_ids);

    let stripped = fragment.html();
    let (rewritten, used) = convert_footnote_markers(&stripped, &map, slug);
    let asides = generate_footnote_asides(&used, &map, slug, true);
    format!("{rewritten}{asides}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_definitions_from_note_content_real() {
        let html = r#"<div id="note1"><span class="note-content_real"> defn </span></div>"#;
        let map = extract_footnote_definitions(html);
        assert_eq!(map.get("note1"), Some("defn"));
    }

    #[test]
    fn extracts_definitions_falling_back_to_div_text() {
        let html = r#"<div id="note2"> plain text </div>"#;
        let map = extract_footnote_definitions(html);
        assert_eq!(map.get("note2"), Some("plain text"));
    }

    #[test]
    fn ignores_divs_with_non_matching_ids() {
        let html = r#"<div id="other">x</div>"#;
        assert!(extract_footnote_definitions(html).is_empty());
    }

    #[test]
    fn converts_bracket_marker_with_counter_label() {
        let mut map = FootnoteMap::default();
        map.insert_if_absent("note1".to_string(), "defn".to_string());
        let (out, used) = convert_footnote_markers("hello [note1] world", &map, "ch1");
        assert!(out.contains(r#"href="#ch1_note1""#));
        assert!(out.contains(">[1]<"));
        assert_eq!(used, vec!["note1".to_string()]);
    }

    #[test]
    fn preserves_preceding_number_as_label() {
        let mut map = FootnoteMap::default();
        map.insert_if_absent("note3".to_string(), "defn".to_string());
        let (out, _used) = convert_footnote_markers("text(5) [note3] more", &map, "ch1");
        assert!(out.contains(">(5)<"));
    }

    #[test]
    fn leaves_unmapped_markers_untouched() {
        let map = FootnoteMap::default();
        let (out, used) = convert_footnote_markers("hello [note9] world", &map, "ch1");
        assert!(out.contains("[note9]"));
        assert!(used.is_empty());
    }

    #[test]
    fn converts_anchor_markers_using_link_text() {
        let mut map = FootnoteMap::default();
        map.insert_if_absent("note1".to_string(), "defn".to_string());
        let (out, used) = convert_footnote_markers(r#"<a href="#note1">2</a>"#, &map, "ch1");
        assert!(out.contains(">2<"));
        assert_eq!(used, vec!["note1".to_string()]);
    }

    #[test]
    fn generates_aside_for_used_and_unused_with_distinct_headers() {
        let mut map = FootnoteMap::default();
        map.insert_if_absent("note1".to_string(), "used defn".to_string());
        map.insert_if_absent("note2".to_string(), "unused defn".to_string());
        let out = generate_footnote_asides(&["note1".to_string()], &map, "ch1", true);
        assert!(out.contains("ch1_note1"));
        assert!(out.contains("Ghi chú:"));
        assert!(out.contains("ch1_note2"));
        assert!(out.contains("Ghi chú (Thêm):"));
    }

    #[test]
    fn process_footnotes_end_to_end() {
        let html = r#"<div><p>hello [note1]</p><div id="note1"><span class="note-content_real">defn</span></div></div>"#;
        let out = process_footnotes(html, "ch1");
        assert!(out.contains(r#"href="#ch1_note1""#));
        assert!(out.contains("aside id=\"ch1_note1\""));
        assert!(!out.contains("[note1]"));
    }

    #[test]
    fn aside_ids_are_scoped_and_unique_within_a_slug() {
        let mut map = FootnoteMap::default();
        map.insert_if_absent("note1".to_string(), "a".to_string());
        map.insert_if_absent("note2".to_string(), "b".to_string());
        let used = vec!["note1".to_string(), "note2".to_string()];
        let out = generate_footnote_asides(&used, &map, "ch7", false);
        let ids: Vec<&str> = out
            .split("aside id=\"")
            .skip(1)
            .map(|s| s.split('"').next().unwrap_or(""))
            .collect();
        assert!(ids.iter().all(|id| id.starts_with("ch7_")));
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len());
    }
}
