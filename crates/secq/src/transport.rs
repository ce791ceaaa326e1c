//! The network seam.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// A fully read HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code
    pub status: u16,
    /// Headers, names lowercased
    pub headers: BTreeMap<String, String>,
    /// Response body
    pub body: String,
}

/// Failure to obtain any response.
#[derive(Debug, Error)]
pub enum TransportError {
    /// reqwest error (DNS, connect, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Connection-level failure reported by a custom transport
    #[error("Connection error: {0}")]
    Connection(String),
}

/// Performs a single GET request. Implementations do not retry.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Issue a GET for `url` and read the whole body.
    async fn get(&self, url: &Url) -> Result<RawResponse, TransportError>;
}

/// reqwest-backed [`Transport`] sending a fixed User-Agent.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport.
    ///
    /// # Arguments
    /// * `user_agent` - sent with every request; SEC requires a contact address
    /// * `timeout` - overall per-request timeout, `None` for reqwest's default
    pub fn new(user_agent: &str, timeout: Option<Duration>) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder().user_agent(user_agent);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Wrap an existing reqwest client.
    pub const fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &Url) -> Result<RawResponse, TransportError> {
        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, "*/*")
            .send()
            .await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}
