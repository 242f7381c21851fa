//! Remote map API

use std::collections::HashMap;

use async_trait::async_trait;
use log::debug;
use serde::de::DeserializeOwned;
use stream_dl::HttpClient;

use super::types::{ApiResponse, MapDetail, SearchPage, SearchParams};
use crate::error::{SyncError, SyncResult};

/// Remote map catalogue. A non-200 status is returned as a response, not an error.
#[async_trait]
pub trait MapsApi: Send + Sync {
    /// Details keyed by requested hash; unknown hashes map to `None`
    async fn fetch_by_hashes(&self, hashes: &[String]) -> SyncResult<ApiResponse<HashMap<String, Option<MapDetail>>>>;

    async fn fetch_by_id(&self, id: &str) -> SyncResult<ApiResponse<MapDetail>>;

    async fn search(&self, params: &SearchParams) -> SyncResult<ApiResponse<SearchPage>>;
}

/// BeatSaver over HTTP
#[derive(Debug, Clone)]
pub struct BeatSaverApi {
    client: HttpClient,
    base_url: String,
}

impl BeatSaverApi {
    pub fn new(client: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn search_url(&self, params: &SearchParams) -> String {
        let mut url = format!(
            "{}/search/text/{}?q={}&sortOrder={}",
            self.base_url,
            params.page,
            urlencoding::encode(&params.query),
            params.sort_order.as_str()
        );
        if let Some(ranked) = params.ranked {
            url.push_str(&format!("&ranked={}", ranked));
        }
        if let Some(min_bpm) = params.min_bpm {
            url.push_str(&format!("&minBpm={}", min_bpm));
        }
        if let Some(max_bpm) = params.max_bpm {
            url.push_str(&format!("&maxBpm={}", max_bpm));
        }
        url
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> SyncResult<ApiResponse<T>> {
        debug!("GET {}", url);
        let response = self.client.get_json_with_status::<T>(url).await?;
        Ok(response.into())
    }
}

#[async_trait]
impl MapsApi for BeatSaverApi {
    async fn fetch_by_hashes(&self, hashes: &[String]) -> SyncResult<ApiResponse<HashMap<String, Option<MapDetail>>>> {
        if hashes.is_empty() {
            return Ok(ApiResponse::ok(HashMap::new()));
        }
        let joined = hashes
            .iter()
            .map(|hash| urlencoding::encode(hash).into_owned())
            .collect::<Vec<_>>()
            .join(",");
        let url = format!("{}/maps/hash/{}", self.base_url, joined);

        let response = self.get::<serde_json::Value>(&url).await?;
        let Some(body) = response.data else {
            return Ok(ApiResponse::failed(response.status));
        };

        // A single hash is answered with the bare detail
        let details = if let [hash] = hashes {
            let detail: MapDetail = decode(&url, body)?;
            HashMap::from([(hash.clone(), Some(detail))])
        } else {
            decode(&url, body)?
        };
        Ok(ApiResponse {
            status: response.status,
            data: Some(details),
        })
    }

    async fn fetch_by_id(&self, id: &str) -> SyncResult<ApiResponse<MapDetail>> {
        let url = format!("{}/maps/id/{}", self.base_url, urlencoding::encode(id));
        self.get(&url).await
    }

    async fn search(&self, params: &SearchParams) -> SyncResult<ApiResponse<SearchPage>> {
        self.get(&self.search_url(params)).await
    }
}

fn decode<T: DeserializeOwned>(url: &str, body: serde_json::Value) -> SyncResult<T> {
    serde_json::from_value(body).map_err(|e| SyncError::Api(format!("{}: {}", url, e)))
}
