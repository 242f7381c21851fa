//! BeatSaver map payloads

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapMetadata {
    #[serde(default)]
    pub bpm: f64,
    /// Seconds
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub song_name: String,
    #[serde(default)]
    pub song_sub_name: String,
    #[serde(default)]
    pub song_author_name: String,
    #[serde(default)]
    pub level_author_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapVersion {
    pub hash: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(rename = "downloadURL", default)]
    pub download_url: String,
    #[serde(rename = "coverURL", default)]
    pub cover_url: String,
    #[serde(rename = "previewURL", default)]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapUploader {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapDetail {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub uploader: Option<MapUploader>,
    #[serde(default)]
    pub metadata: MapMetadata,
    #[serde(default)]
    pub versions: Vec<MapVersion>,
    #[serde(default)]
    pub ranked: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl MapDetail {
    /// Lower-cased hash of the latest version, the detail's cache key
    pub fn primary_hash(&self) -> Option<String> {
        self.versions.first().map(|v| v.hash.to_lowercase())
    }

    pub fn download_url(&self) -> Option<&str> {
        self.versions
            .first()
            .map(|v| v.download_url.as_str())
            .filter(|url| !url.is_empty())
    }

    /// Folder a downloaded map is extracted into
    pub fn folder_name(&self) -> String {
        let raw = format!(
            "{} ({} - {})",
            self.id, self.metadata.song_name, self.metadata.level_author_name
        );
        raw.chars()
            .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
            .filter(|c| !c.is_control())
            .collect::<String>()
            .trim_end_matches(['.', ' '])
            .to_string()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    #[serde(rename = "Latest")]
    Latest,
    #[serde(rename = "Relevance")]
    Relevance,
    #[serde(rename = "Rating")]
    Rating,
    #[serde(rename = "Curated")]
    Curated,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Latest => "Latest",
            SortOrder::Relevance => "Relevance",
            SortOrder::Rating => "Rating",
            SortOrder::Curated => "Curated",
        }
    }
}

/// Text search request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub sort_order: SortOrder,
    #[serde(default)]
    pub ranked: Option<bool>,
    #[serde(default)]
    pub min_bpm: Option<f64>,
    #[serde(default)]
    pub max_bpm: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub docs: Vec<MapDetail>,
}

/// Body of a remote call together with its HTTP status; `data` is only
/// present for successful responses.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    pub status: u16,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: 200,
            data: Some(data),
        }
    }

    pub fn failed(status: u16) -> Self {
        Self { status, data: None }
    }

    /// Data of a 200 response
    pub fn into_ok(self) -> Option<T> {
        if self.status == 200 {
            self.data
        } else {
            None
        }
    }
}

impl<T> From<stream_dl::JsonResponse<T>> for ApiResponse<T> {
    fn from(response: stream_dl::JsonResponse<T>) -> Self {
        Self {
            status: response.status,
            data: response.data,
        }
    }
}
