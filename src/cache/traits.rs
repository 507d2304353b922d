//! Core types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use sha2::{Digest, Sha256};
use url::Url;

use crate::http::{Request, Response};

/// Identity of a stored response: method plus URL without its fragment.
///
/// Only GET requests have a cache identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestKey {
  url: Url,
}

impl RequestKey {
  pub fn for_request(request: &Request) -> Result<Self> {
    if request.method() != Method::GET {
      return Err(eyre!(
        "Only GET requests can be cached, got {}",
        request.method()
      ));
    }
    Ok(Self::for_url(request.url()))
  }

  pub fn for_url(url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self { url }
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  /// Stable, fixed-length hash used as the storage key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"GET ");
    hasher.update(self.url.as_str().as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A response read back from a store.
#[derive(Debug)]
pub struct CachedResponse {
  pub response: Response,
  /// When the response was written
  pub cached_at: DateTime<Utc>,
}

/// A response handed back to the host, with where it came from.
#[derive(Debug)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
  /// When the response was stored (if it came from a store)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Served {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: ResponseSource::Cache,
      cached_at: Some(cached.cached_at),
    }
  }

  /// Network failed and a stored response stood in for the requested one.
  pub fn offline(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: ResponseSource::Offline,
      cached_at: Some(cached.cached_at),
    }
  }

  pub fn synthetic(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Synthetic,
      cached_at: None,
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh response from the network
  Network,
  /// Stored response for this exact request
  Cache,
  /// Offline mode - network unavailable, serving a stored fallback document
  Offline,
  /// Generated locally because neither network nor cache could answer
  Synthetic,
}

impl std::fmt::Display for ResponseSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Offline => "offline fallback",
      Self::Synthetic => "synthetic",
    };
    f.write_str(name)
  }
}
