//! The catalog data model (§3) and its parser (§4.D).

mod parser;

pub use parser::parse;

use serde::{Deserialize, Serialize};

/// A parsed novel landing page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Novel {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default, rename = "mainCover")]
    pub main_cover: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    pub url: String,
    pub name: String,
    #[serde(default, rename = "coverImg")]
    pub cover_img: String,
    #[serde(default)]
    pub chapters: Vec<ChapterRef>,
}

/// A chapter as referenced from the catalog, before materialization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChapterRef {
    pub name: String,
    pub url: String,
}

impl Novel {
    pub fn unknown_if_empty(name: &str) -> String {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            "Unknown".to_string()
        } else {
            trimmed.to_string()
        }
    }
}

impl Volume {
    pub fn unknown_if_empty(name: &str) -> String {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            "Unknown Volume".to_string()
        } else {
            trimmed.to_string()
        }
    }
}

#[cfg(test)]
mod round_trip_tests {
    use super::*;

    fn sample() -> Novel {
        Novel {
            name: "T".to_string(),
            url: "https://docln.net/truyen/5".to_string(),
            author: "A".to_string(),
            summary: "<p>hi</p>".to_string(),
            main_cover: "https://i.docln.net/cover.jpg".to_string(),
            tags: vec!["Action".to_string(), "Drama".to_string()],
            volumes: vec![Volume {
                url: "https://docln.net/vol/1".to_string(),
                name: "Volume 1".to_string(),
                cover_img: String::new(),
                chapters: vec![ChapterRef {
                    name: "Chapter 1".to_string(),
                    url: "https://docln.net/ch/1".to_string(),
                }],
            }],
        }
    }

    #[test]
    fn serialize_deserialize_round_trips() {
        let novel = sample();
        let json = serde_json::to_string_pretty(&novel).unwrap();
        let restored: Novel = serde_json::from_str(&json).unwrap();
        assert_eq!(novel, restored);
        let json_again = serde_json::to_string_pretty(&restored).unwrap();
        assert_eq!(json, json_again);
    }

    #[test]
    fn deserialize_defaults_missing_optional_fields() {
        let minimal = r#"{"name":"T","url":"https://docln.net/truyen/5","volumes":[]}"#;
        let novel: Novel = serde_json::from_str(minimal).unwrap();
        assert_eq!(novel.author, "");
        assert_eq!(novel.summary, "");
        assert!(novel.tags.is_empty());
    }
}
