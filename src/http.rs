//! Request and response value types passed between the host, the interceptor and the network.

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::{Method, StatusCode};
use url::Url;

/// How the request was initiated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level document load
  Navigate,
  /// Anything a page loads on its own (scripts, media, JSON)
  #[default]
  Subresource,
}

/// Whether intermediate HTTP caches may answer the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
  #[default]
  Default,
  /// Ask every intermediate cache to revalidate with the origin
  NoCache,
}

/// An intercepted request. The engine reads it but never changes it.
#[derive(Debug, Clone)]
pub struct Request {
  method: Method,
  url: Url,
  headers: HeaderMap,
  mode: RequestMode,
  cache: CacheMode,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: HeaderMap::new(),
      mode: RequestMode::default(),
      cache: CacheMode::default(),
    }
  }

  /// A plain GET for `url`.
  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// Parse `url` and build a GET for it.
  #[allow(dead_code)]
  pub fn parse(url: &str) -> Result<Self> {
    let url = Url::parse(url).map_err(|e| eyre!("Invalid request URL '{}': {}", url, e))?;
    Ok(Self::get(url))
  }

  pub fn with_mode(mut self, mode: RequestMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn with_cache_mode(mut self, cache: CacheMode) -> Self {
    self.cache = cache;
    self
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
    let name = HeaderName::from_bytes(name.as_bytes())
      .map_err(|e| eyre!("Invalid header name '{}': {}", name, e))?;
    let value =
      HeaderValue::from_str(value).map_err(|e| eyre!("Invalid header value '{}': {}", value, e))?;
    self.headers.append(name, value);
    Ok(self)
  }

  pub fn method(&self) -> &Method {
    &self.method
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  pub fn headers(&self) -> &HeaderMap {
    &self.headers
  }

  pub fn mode(&self) -> RequestMode {
    self.mode
  }

  pub fn cache_mode(&self) -> CacheMode {
    self.cache
  }

  /// True if any `Accept` header asks for an HTML document.
  pub fn accepts_html(&self) -> bool {
    self
      .headers
      .get_all(ACCEPT)
      .iter()
      .filter_map(|v| v.to_str().ok())
      .any(|v| v.contains("text/html"))
  }
}

/// A response produced by the network, the cache, or synthesized locally.
///
/// Responses are immutable. The body is reference-counted, so [`Response::duplicate`]
/// hands out an independent copy without copying bytes. One copy goes back to the
/// caller and the other goes into the store.
#[derive(Debug, PartialEq, Eq)]
pub struct Response {
  status: StatusCode,
  status_text: String,
  headers: HeaderMap,
  body: Option<Bytes>,
}

impl Response {
  pub fn new(status: StatusCode, headers: HeaderMap, body: Option<Bytes>) -> Self {
    Self {
      status,
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body,
    }
  }

  /// A locally generated response with no headers.
  pub fn synthetic(status: StatusCode, status_text: &str, body: Option<Bytes>) -> Self {
    Self {
      status,
      status_text: status_text.to_string(),
      headers: HeaderMap::new(),
      body,
    }
  }

  /// `503 Service Unavailable` with an empty body.
  pub fn service_unavailable() -> Self {
    Self::synthetic(
      StatusCode::SERVICE_UNAVAILABLE,
      "Service Unavailable",
      Some(Bytes::new()),
    )
  }

  /// `503 Offline` carrying the text `Offline`.
  pub fn offline() -> Self {
    Self::synthetic(
      StatusCode::SERVICE_UNAVAILABLE,
      "Offline",
      Some(Bytes::from_static(b"Offline")),
    )
  }

  /// `404` with no body at all.
  pub fn not_found() -> Self {
    Self::synthetic(StatusCode::NOT_FOUND, "", None)
  }

  pub fn with_status_text(mut self, status_text: impl Into<String>) -> Self {
    self.status_text = status_text.into();
    self
  }

  pub fn status(&self) -> StatusCode {
    self.status
  }

  pub fn status_text(&self) -> &str {
    &self.status_text
  }

  pub fn headers(&self) -> &HeaderMap {
    &self.headers
  }

  pub fn body(&self) -> Option<&Bytes> {
    self.body.as_ref()
  }

  pub fn body_len(&self) -> usize {
    self.body.as_ref().map(Bytes::len).unwrap_or(0)
  }

  /// Only a plain `200 OK` is ever written to a store.
  pub fn is_cacheable(&self) -> bool {
    self.status == StatusCode::OK
  }

  /// Produce a second, independently consumable copy.
  pub fn duplicate(&self) -> Self {
    Self {
      status: self.status,
      status_text: self.status_text.clone(),
      headers: self.headers.clone(),
      body: self.body.clone(),
    }
  }

  /// Consume this copy and take its body.
  #[allow(dead_code)]
  pub fn into_body(self) -> Option<Bytes> {
    self.body
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_accepts_html() {
    let req = Request::parse("https://example.com/")
      .unwrap()
      .with_header("accept", "text/html,application/xhtml+xml")
      .unwrap();
    assert!(req.accepts_html());

    let req = Request::parse("https://example.com/playlist.json")
      .unwrap()
      .with_header("accept", "application/json")
      .unwrap();
    assert!(!req.accepts_html());
  }

  #[test]
  fn test_duplicate_shares_body() {
    let original = Response::new(
      StatusCode::OK,
      HeaderMap::new(),
      Some(Bytes::from_static(b"abc")),
    );
    let copy = original.duplicate();
    assert_eq!(copy, original);
    assert_eq!(original.into_body().unwrap(), Bytes::from_static(b"abc"));
    assert_eq!(copy.body_len(), 3);
  }

  #[test]
  fn test_synthetic_responses() {
    let unavailable = Response::service_unavailable();
    assert_eq!(unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(unavailable.status_text(), "Service Unavailable");
    assert_eq!(unavailable.body_len(), 0);

    let offline = Response::offline();
    assert_eq!(offline.status_text(), "Offline");
    assert_eq!(offline.body().unwrap().as_ref(), b"Offline");

    let missing = Response::not_found();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    assert!(missing.body().is_none());
    assert!(!missing.is_cacheable());
  }
}
