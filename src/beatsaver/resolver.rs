//! Map details lookups through an append-only cache

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::RwLock;

use super::api::MapsApi;
use super::types::{MapDetail, SearchParams};
use crate::config::DEFAULT_BATCH_SIZE;

#[derive(Default)]
struct DetailsCache {
    by_hash: HashMap<String, MapDetail>,
    by_id: HashMap<String, MapDetail>,
}

impl DetailsCache {
    fn insert(&mut self, detail: &MapDetail) {
        if let Some(hash) = detail.primary_hash() {
            self.by_hash.insert(hash, detail.clone());
        }
        self.by_id.insert(detail.id.to_lowercase(), detail.clone());
    }
}

/// Resolves map details by hash or id, asking the remote API only for misses.
///
/// Entries live for the lifetime of the resolver.
pub struct MapDetailsResolver {
    api: Arc<dyn MapsApi>,
    batch_size: usize,
    cache: RwLock<DetailsCache>,
}

impl MapDetailsResolver {
    pub fn new(api: Arc<dyn MapsApi>, batch_size: usize) -> Self {
        Self {
            api,
            batch_size: if batch_size == 0 { DEFAULT_BATCH_SIZE } else { batch_size },
            cache: RwLock::new(DetailsCache::default()),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Cache hits first, in input order, then fetched details chunk by chunk.
    /// A failed chunk is skipped and its hashes are simply missing from the result.
    pub async fn resolve_by_hashes(&self, keys: &[String]) -> Vec<MapDetail> {
        let mut seen = HashSet::new();
        let keys: Vec<String> = keys
            .iter()
            .map(|key| key.trim().to_lowercase())
            .filter(|key| !key.is_empty() && seen.insert(key.clone()))
            .collect();

        let (mut details, missing) = {
            let cache = self.cache.read().await;
            let mut hits = Vec::new();
            let mut missing = Vec::new();
            for key in keys {
                match cache.by_hash.get(&key) {
                    Some(detail) => hits.push(detail.clone()),
                    None => missing.push(key),
                }
            }
            (hits, missing)
        };
        debug!(
            "resolve_by_hashes: {} cached, {} to fetch",
            details.len(),
            missing.len()
        );

        for chunk in missing.chunks(self.batch_size) {
            let response = match self.api.fetch_by_hashes(chunk).await {
                Ok(response) => response,
                Err(err) => {
                    warn!("skipping chunk of {} hashes: {}", chunk.len(), err);
                    continue;
                }
            };
            let status = response.status;
            let Some(mut found) = response.into_ok() else {
                warn!("skipping chunk of {} hashes: status {}", chunk.len(), status);
                continue;
            };

            let mut fetched: Vec<MapDetail> = chunk
                .iter()
                .filter_map(|hash| found.remove(hash).flatten())
                .collect();
            fetched.extend(found.into_values().flatten());

            let mut cache = self.cache.write().await;
            for detail in &fetched {
                cache.insert(detail);
            }
            drop(cache);
            details.extend(fetched);
        }

        details
    }

    pub async fn get_by_id(&self, id: &str) -> Option<MapDetail> {
        let key = id.trim().to_lowercase();
        if let Some(detail) = self.cache.read().await.by_id.get(&key) {
            return Some(detail.clone());
        }

        match self.api.fetch_by_id(id).await {
            Ok(response) => {
                let detail = response.into_ok()?;
                self.cache.write().await.insert(&detail);
                Some(detail)
            }
            Err(err) => {
                warn!("get_by_id {}: {}", id, err);
                None
            }
        }
    }

    /// Search results are not cached; a failed search is an empty page
    pub async fn search(&self, params: &SearchParams) -> Vec<MapDetail> {
        match self.api.search(params).await {
            Ok(response) => response.into_ok().map(|page| page.docs).unwrap_or_default(),
            Err(err) => {
                warn!("search {:?}: {}", params.query, err);
                Vec::new()
            }
        }
    }

    pub async fn cached(&self, hash: &str) -> Option<MapDetail> {
        self.cache.read().await.by_hash.get(&hash.to_lowercase()).cloned()
    }

    pub async fn cache_len(&self) -> usize {
        self.cache.read().await.by_hash.len()
    }
}
