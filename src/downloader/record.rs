//! Persisted shapes (§3 "Volume Record"/"Novel Record", §6 JSON schemas).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeDescriptor {
    pub order: u32,
    pub name: String,
    pub filename: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NovelRecord {
    #[serde(rename = "novelName")]
    pub novel_name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default, rename = "coverImageLocal")]
    pub cover_image_local: String,
    pub url: String,
    #[serde(default)]
    pub volumes: Vec<VolumeDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MaterializedChapter {
    pub title: String,
    pub url: String,
    pub content: String,
    pub index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VolumeRecord {
    #[serde(rename = "volumeName")]
    pub volume_name: String,
    #[serde(default, rename = "volumeUrl")]
    pub volume_url: String,
    #[serde(default, rename = "coverImageLocal")]
    pub cover_image_local: String,
    #[serde(default)]
    pub chapters: Vec<MaterializedChapter>,
}

impl VolumeRecord {
    pub fn chapter_by_url(&self, url: &str) -> Option<&MaterializedChapter> {
        self.chapters.iter().find(|c| c.url == url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_round_trips_every_listed_field() {
        let record = NovelRecord {
            novel_name: "T".to_string(),
            author: "A".to_string(),
            tags: vec!["Action".to_string()],
            summary: "s".to_string(),
            cover_image_local: "images/main_cover.jpg".to_string(),
            url: "https://docln.net/truyen/5".to_string(),
            volumes: vec![VolumeDescriptor {
                order: 1,
                name: "Volume 1".to_string(),
                filename: "Volume_1.json".to_string(),
                url: "https://docln.net/vol/1".to_string(),
            }],
        };
        let json = serde_json::to_value(&record).unwrap();
        for field in ["novelName", "author", "tags", "summary", "coverImageLocal", "url", "volumes"] {
            assert!(json.get(field).is_some(), "missing field {field}");
        }
        let restored: NovelRecord = serde_json::from_value(json).unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn volume_record_round_trips() {
        let record = VolumeRecord {
            volume_name: "Volume 1".to_string(),
            volume_url: String::new(),
            cover_image_local: String::new(),
            chapters: vec![MaterializedChapter {
                title: "Chapter 1".to_string(),
                url: "https://docln.net/ch/1".to_string(),
                content: "<p>hi</p>".to_string(),
                index: 0,
            }],
        };
        let json = serde_json::to_string_pretty(&record).unwrap();
        let restored: VolumeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, record);
    }
}
