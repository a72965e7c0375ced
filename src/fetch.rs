//! Network access used by the strategy handlers and background sync.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::http::{Request, Response};

/// Performs a single network fetch.
///
/// An `Err` means the fetch itself failed (offline, DNS, timeout). HTTP error
/// statuses are successful fetches and come back as `Ok`.
pub trait Fetcher: Send + Sync {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

/// Fetcher backed by a reqwest client.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  /// Create a fetcher. `timeout` bounds each request; `None` waits indefinitely.
  pub fn new(timeout: Option<Duration>) -> Result<Self> {
    let mut builder =
      reqwest::Client::builder().user_agent(concat!("swcache/", env!("CARGO_PKG_VERSION")));
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }

    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    debug!(method = %request.method, url = %request.url, "network fetch");

    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?
      .to_vec();

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}
