//! The request interceptor: lifecycle, routing and caching strategies for one cache generation.

mod lifecycle;
mod router;
mod strategy;

use color_eyre::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;
use url::Url;

use crate::cache::{CacheLayer, CacheStorage, Served};
use crate::config::Config;
use crate::http::Request;
use crate::network::Network;

pub use lifecycle::{InstallReport, LifecycleState};
pub use router::{classify, ResourceClass};

/// Everything the interceptor needs to know about the deployed site.
#[derive(Debug, Clone)]
pub struct Settings {
  /// Store name of the current generation
  pub cache_name: String,
  pub shell: Vec<Url>,
  pub document_root: Url,
  pub media_suffixes: Vec<String>,
}

impl Settings {
  pub fn from_config(config: &Config) -> Result<Self> {
    Ok(Self {
      cache_name: config.cache_name(),
      shell: config.shell_urls()?,
      document_root: config.document_root_url()?,
      media_suffixes: config.media_suffixes.clone(),
    })
  }
}

/// Intercepts GET requests for one cache generation.
///
/// The interceptor owns the store named by [`Settings::cache_name`]. Lifecycle events
/// create and seed that store and remove every other one. Fetch events are routed to
/// one of three strategies, each of which always produces a response.
pub struct Interceptor<S: CacheStorage, N: Network> {
  settings: Settings,
  caches: CacheLayer<S>,
  network: N,
  state: Mutex<LifecycleState>,
  skip_waiting: AtomicBool,
  clients_claimed: AtomicBool,
}

impl<S: CacheStorage, N: Network> Interceptor<S, N> {
  pub fn new(settings: Settings, storage: Arc<S>, network: N) -> Self {
    Self {
      settings,
      caches: CacheLayer::from_shared(storage),
      network,
      state: Mutex::new(LifecycleState::Uninstalled),
      skip_waiting: AtomicBool::new(false),
      clients_claimed: AtomicBool::new(false),
    }
  }

  #[allow(dead_code)]
  pub fn caches(&self) -> &CacheLayer<S> {
    &self.caches
  }

  /// Whether install asked to activate without waiting for older instances.
  pub fn skip_waiting_requested(&self) -> bool {
    self.skip_waiting.load(Ordering::SeqCst)
  }

  /// Whether activation took control of already-open clients.
  #[allow(dead_code)]
  pub fn clients_claimed(&self) -> bool {
    self.clients_claimed.load(Ordering::SeqCst)
  }

  /// Answer an intercepted request.
  ///
  /// Returns `None` for requests that are not intercepted (anything but GET); those
  /// must go through default network handling.
  pub async fn handle_fetch(&self, request: &Request) -> Option<Served> {
    let class = classify(request, &self.settings.media_suffixes)?;
    debug!(url = %request.url(), ?class, "intercepted");

    let served = match class {
      ResourceClass::Media => self.serve_media(request).await,
      ResourceClass::Navigation => self.serve_navigation(request).await,
      ResourceClass::Static => self.serve_static(request).await,
    };

    debug!(
      url = %request.url(),
      status = served.response.status().as_u16(),
      source = %served.source,
      "responded"
    );
    Some(served)
  }

  /// Wait for background cache writes to finish.
  pub async fn settle(&self) {
    self.caches.settle().await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStorage, ResponseSource};
  use crate::testing::{settings, FakeNetwork};
  use reqwest::{Method, StatusCode};

  #[tokio::test]
  async fn test_post_is_not_intercepted() {
    let network = FakeNetwork::new();
    network.serve("https://example.com/app/api", StatusCode::OK, "created");
    let interceptor = Interceptor::new(settings(), Arc::new(MemoryStorage::new()), network);

    let url = Url::parse("https://example.com/app/api").unwrap();
    let request = Request::new(Method::POST, url);
    assert!(interceptor.handle_fetch(&request).await.is_none());
  }

  #[tokio::test]
  async fn test_routes_by_class() {
    let network = FakeNetwork::new();
    network.set_online(false);
    let interceptor = Interceptor::new(settings(), Arc::new(MemoryStorage::new()), network);

    let media = Request::parse("https://example.com/app/audio/rain.mp3").unwrap();
    let served = interceptor.handle_fetch(&media).await.unwrap();
    assert_eq!(served.response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(served.response.status_text(), "Service Unavailable");

    let page = Request::parse("https://example.com/app/")
      .unwrap()
      .with_mode(crate::http::RequestMode::Navigate);
    let served = interceptor.handle_fetch(&page).await.unwrap();
    assert_eq!(served.response.status_text(), "Offline");

    let asset = Request::parse("https://example.com/app/playlist.json").unwrap();
    let served = interceptor.handle_fetch(&asset).await.unwrap();
    assert_eq!(served.response.status(), StatusCode::NOT_FOUND);
    assert_eq!(served.source, ResponseSource::Synthetic);
  }
}
