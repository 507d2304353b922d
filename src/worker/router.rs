use reqwest::Method;

use crate::http::{Request, RequestMode};

/// Which strategy answers a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
  /// Audio files: cache-first, stored on first successful fetch
  Media,
  /// Documents: network-first, offline fallback to the document root
  Navigation,
  /// Everything else: cache-first, refreshed from the network on a miss
  Static,
}

/// Classify a request. `None` means the request is not intercepted at all.
pub fn classify(request: &Request, media_suffixes: &[String]) -> Option<ResourceClass> {
  if request.method() != Method::GET {
    return None;
  }

  let path = request.url().path();
  if media_suffixes.iter().any(|suffix| path.ends_with(suffix.as_str())) {
    return Some(ResourceClass::Media);
  }

  if request.mode() == RequestMode::Navigate || request.accepts_html() {
    return Some(ResourceClass::Navigation);
  }

  Some(ResourceClass::Static)
}
