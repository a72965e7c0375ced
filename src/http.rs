//! Request and response values passed between the controller, the cache and the network.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::Serialize;
use url::Url;

pub const CONTENT_TYPE: &str = "Content-Type";

/// What the page intends to do with a fetched resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Destination {
  /// Full page navigation
  Document,
  Image,
  Script,
  Style,
  Font,
  /// Anything the platform leaves unclassified (fetch(), XHR, manifests)
  #[default]
  Other,
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn get(url: Url, destination: Destination) -> Self {
    Self {
      method: Method::GET,
      url,
      destination,
      headers: Vec::new(),
      body: None,
    }
  }

  /// Build a POST carrying `payload` as a JSON body.
  pub fn post_json<T: Serialize>(url: Url, payload: &T) -> Result<Self> {
    let body =
      serde_json::to_vec(payload).map_err(|e| eyre!("Failed to serialize request body: {}", e))?;

    Ok(Self {
      method: Method::POST,
      url,
      destination: Destination::Other,
      headers: vec![(CONTENT_TYPE.to_string(), "application/json".to_string())],
      body: Some(body),
    })
  }

  pub fn is_get(&self) -> bool {
    self.method == Method::GET
  }

  pub fn path(&self) -> &str {
    self.url.path()
  }
}

/// A response, either from the network, from a cache partition, or synthesized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: Vec::new(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = body.into();
    self
  }

  /// True for 2xx statuses. Only these are ever written to a partition.
  pub fn ok(&self) -> bool {
    (200..=299).contains(&self.status)
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Empty 404 returned when an image or static asset can't be fetched.
  pub fn not_found() -> Self {
    Self::new(404)
  }

  /// JSON 503 returned for API calls with neither network nor cache.
  pub fn network_unavailable() -> Self {
    let body = serde_json::json!({ "error": "Network unavailable" }).to_string();
    Self::new(503)
      .with_header(CONTENT_TYPE, "application/json")
      .with_body(body)
  }

  /// Plain-text 503 returned for navigations when no offline document is cached.
  pub fn offline() -> Self {
    Self::new(503)
      .with_header(CONTENT_TYPE, "text/plain")
      .with_body("Offline")
  }
}
