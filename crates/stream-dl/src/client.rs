//! Shared HTTP client with the fixed identifying header and IPv4-only resolution

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use log::{error, warn};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::error::TransferError;

/// Options used to build an [`HttpClient`]
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Value of the `User-Agent` header sent with every request
    pub user_agent: String,
    /// Bind outbound sockets to `0.0.0.0` so every request resolves over IPv4
    pub force_ipv4: bool,
    pub connect_timeout: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(env!("CARGO_PKG_VERSION")),
            force_ipv4: true,
            connect_timeout: Some(Duration::from_secs(15)),
        }
    }
}

/// Build the identifying user agent, e.g. `BSManager/1.4.0 (linux x86_64)`
pub fn default_user_agent(app_version: &str) -> String {
    format!(
        "BSManager/{} ({} {})",
        app_version,
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// JSON body together with the status it was served with.
///
/// `data` is only decoded for 2xx responses.
#[derive(Debug, Clone)]
pub struct JsonResponse<T> {
    pub status: u16,
    pub data: Option<T>,
}

impl<T> JsonResponse<T> {
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status) && self.data.is_some()
    }
}

/// Cheaply cloneable HTTP client used by every outbound call
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
}

impl HttpClient {
    pub fn new(options: ClientOptions) -> Result<Self, TransferError> {
        let mut builder = Client::builder().user_agent(options.user_agent);
        if options.force_ipv4 {
            builder = builder.local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        }
        if let Some(timeout) = options.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let inner = builder
            .build()
            .map_err(|e| TransferError::Client(e.to_string()))?;
        Ok(Self { inner })
    }

    pub(crate) fn get(&self, url: &str) -> RequestBuilder {
        self.inner.get(url)
    }

    /// Fetch and decode a JSON document. Any non-2xx response is a hard failure.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, TransferError> {
        let response = self
            .get(url)
            .send()
            .await
            .map_err(|e| TransferError::request(url, e))
            .inspect_err(|e| error!("get_json: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let err = TransferError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            };
            error!("get_json: {}", err);
            return Err(err);
        }

        decode_body(url, response).await
    }

    /// Fetch a JSON document and hand the status back to the caller instead of
    /// failing on non-2xx responses.
    pub async fn get_json_with_status<T: DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<JsonResponse<T>, TransferError> {
        let response = self
            .get(url)
            .send()
            .await
            .map_err(|e| TransferError::request(url, e))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            warn!("get_json_with_status: {} responded with {}", url, status);
            return Ok(JsonResponse { status, data: None });
        }

        let data = decode_body(url, response).await?;
        Ok(JsonResponse {
            status,
            data: Some(data),
        })
    }
}

async fn decode_body<T: DeserializeOwned>(
    url: &str,
    response: reqwest::Response,
) -> Result<T, TransferError> {
    let body = response
        .bytes()
        .await
        .map_err(|e| TransferError::request(url, e))?;
    serde_json::from_slice(&body).map_err(|e| TransferError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })
}
