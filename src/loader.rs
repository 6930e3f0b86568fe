//! Dataset loading.
//!
//! The loader orchestrates one dataset request end to end: build the
//! upstream request parameters, consult the response cache, fetch on miss,
//! decode. It is the only place in the core that touches the network.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::{event, Level};
use url::Url;

use crate::decode;
use crate::dimension;
use crate::error::StatboardError;
use crate::metrics;
use crate::models::{DatasetTable, DimensionSpec, Filters};
use crate::response_cache::{RequestParams, ResponseCache};

/// Loads and decodes datasets from the dissemination API, with caching.
pub struct DatasetLoader {
    client: Client,
    base_url: Url,
    cache: ResponseCache,
}

impl DatasetLoader {
    /// Return a new DatasetLoader.
    ///
    /// # Arguments
    ///
    /// * `base_url`: Dissemination API base, e.g.
    ///   `https://ec.europa.eu/eurostat/api/dissemination/statistics/1.0/data`
    /// * `cache`: Response cache to consult before fetching
    /// * `request_timeout`: Bound on each upstream request; timeouts surface
    ///   as [StatboardError::RemoteRequest]
    pub fn new(base_url: Url, cache: ResponseCache, request_timeout: Duration) -> Self {
        assert!(
            !base_url.cannot_be_a_base(),
            "base URL must be a hierarchical URL"
        );
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("failed to create HTTP client");
        Self {
            client,
            base_url,
            cache,
        }
    }

    /// Fetch the raw JSON response for a dataset, via the cache.
    #[tracing::instrument(level = "DEBUG", skip(self, params))]
    pub async fn fetch_raw(
        &self,
        dataset: &str,
        params: &RequestParams,
    ) -> Result<Value, StatboardError> {
        if let Some(raw) = self.cache.get(dataset, params) {
            event!(Level::DEBUG, "response cache hit for dataset {}", dataset);
            metrics::CACHE_HITS.with_label_values(&[dataset]).inc();
            return Ok(raw);
        }

        metrics::UPSTREAM_FETCHES.with_label_values(&[dataset]).inc();
        let pairs: Vec<(&str, &str)> = params
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v.as_str())))
            .collect();
        let response = self
            .client
            .get(self.dataset_url(dataset))
            .query(&pairs)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StatboardError::RemoteFetch {
                dataset: dataset.to_string(),
                status,
            });
        }
        let raw: Value = response.json().await.map_err(|error| {
            if error.is_decode() {
                StatboardError::malformed("response body is not valid JSON")
            } else {
                StatboardError::RemoteRequest(error)
            }
        })?;

        self.cache.put(dataset, params, &raw)?;
        Ok(raw)
    }

    /// Load a dataset as a fully materialised table.
    ///
    /// `filters` maps dimension names to requested category codes or
    /// periods; None requests all categories.
    pub async fn load_table(
        &self,
        dataset: &str,
        filters: Option<&Filters>,
    ) -> Result<DatasetTable, StatboardError> {
        let params = request_params(filters);
        let raw = self.fetch_raw(dataset, &params).await?;
        decode::decode_response(&raw)
    }

    /// Ordered dimension metadata for a dataset, independent of row filters.
    ///
    /// Used to build interactive filter descriptors.
    pub async fn dimensions(&self, dataset: &str) -> Result<Vec<DimensionSpec>, StatboardError> {
        let raw = self.fetch_raw(dataset, &request_params(None)).await?;
        dimension::parse_dimensions(&raw)
    }

    fn dataset_url(&self, dataset: &str) -> Url {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .expect("base URL must be a hierarchical URL")
            .pop_if_empty()
            .push(dataset);
        url
    }
}

/// Upstream request parameters for a filter set: always `format=json`, plus
/// one parameter per filtered dimension.
fn request_params(filters: Option<&Filters>) -> RequestParams {
    let mut params = RequestParams::new();
    params.insert("format".to_string(), vec!["json".to_string()]);
    if let Some(filters) = filters {
        for (dimension, codes) in filters {
            params.insert(dimension.clone(), codes.clone());
        }
    }
    params
}
