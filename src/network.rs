//! Network access for the interceptor.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderValue, CACHE_CONTROL, PRAGMA};

use crate::http::{CacheMode, Request, Response};

/// Something that can turn a request into a response over the network.
///
/// An `Err` means the request never produced a response (offline, DNS, timeout).
/// HTTP error statuses are successful fetches.
#[async_trait]
pub trait Network: Send + Sync + 'static {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Network backed by a shared reqwest client.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("swcache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let mut headers = request.headers().clone();
    if request.cache_mode() == CacheMode::NoCache {
      headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
      headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    }

    let response = self
      .client
      .request(request.method().clone(), request.url().clone())
      .headers(headers)
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url(), e))?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url(), e))?;

    Ok(Response::new(status, headers, Some(body)))
  }
}

/// Network that is never reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineNetwork;

#[async_trait]
impl Network for OfflineNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    Err(eyre!("Network unavailable: {}", request.url()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_offline_network_always_fails() {
    let request = Request::parse("https://example.com/index.html").unwrap();
    let err = OfflineNetwork.fetch(&request).await.unwrap_err();
    assert!(err.to_string().contains("index.html"));
  }
}
