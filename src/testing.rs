//! Fakes shared by the unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

use crate::cache::{CacheStorage, CachedResponse, RequestKey};
use crate::http::{Request, Response};
use crate::network::Network;
use crate::worker::{Interceptor, Settings};

/// Settings for a site deployed under `https://example.com/app/`.
pub fn settings() -> Settings {
  let origin = Url::parse("https://example.com/app/").unwrap();
  Settings {
    cache_name: "meditate-v1".to_string(),
    shell: vec![
      origin.join("/").unwrap(),
      origin.join("index.html").unwrap(),
      origin.join("playlist.json").unwrap(),
    ],
    document_root: origin.join("index.html").unwrap(),
    media_suffixes: vec![".mp3".to_string()],
  }
}

pub fn interceptor<S: CacheStorage>(
  storage: Arc<S>,
  network: FakeNetwork,
) -> Interceptor<S, FakeNetwork> {
  Interceptor::new(settings(), storage, network)
}

/// Scripted network that counts every fetch and can be switched offline.
#[derive(Clone, Default)]
pub struct FakeNetwork {
  inner: Arc<FakeNetworkInner>,
}

#[derive(Default)]
struct FakeNetworkInner {
  routes: Mutex<HashMap<String, (StatusCode, String)>>,
  offline: AtomicBool,
  calls: AtomicUsize,
  requests: Mutex<Vec<Request>>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn response(status: StatusCode, body: &str) -> Response {
    Response::new(status, HeaderMap::new(), Some(Bytes::from(body.to_string())))
  }

  /// Answer `url` with `status` and `body` from now on. Unknown URLs get a 404.
  pub fn serve(&self, url: &str, status: StatusCode, body: &str) {
    self
      .inner
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), (status, body.to_string()));
  }

  pub fn set_online(&self, online: bool) {
    self.inner.offline.store(!online, Ordering::SeqCst);
  }

  /// Number of fetches attempted, including ones that failed because we were offline.
  pub fn calls(&self) -> usize {
    self.inner.calls.load(Ordering::SeqCst)
  }

  pub fn requests(&self) -> Vec<Request> {
    self.inner.requests.lock().unwrap().clone()
  }
}

#[async_trait]
impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.inner.calls.fetch_add(1, Ordering::SeqCst);
    self.inner.requests.lock().unwrap().push(request.clone());

    if self.inner.offline.load(Ordering::SeqCst) {
      return Err(eyre!("offline"));
    }

    let routes = self.inner.routes.lock().unwrap();
    Ok(match routes.get(request.url().as_str()) {
      Some((status, body)) => Self::response(*status, body),
      None => Self::response(StatusCode::NOT_FOUND, "not found"),
    })
  }
}

/// Storage wrapper whose writes always fail, as if the quota were exhausted.
pub struct FailingWrites<S> {
  inner: S,
  attempted: AtomicUsize,
}

impl<S: CacheStorage> FailingWrites<S> {
  pub fn new(inner: S) -> Self {
    Self {
      inner,
      attempted: AtomicUsize::new(0),
    }
  }

  pub fn attempted_writes(&self) -> usize {
    self.attempted.load(Ordering::SeqCst)
  }
}

impl<S: CacheStorage> CacheStorage for FailingWrites<S> {
  fn open(&self, cache_name: &str) -> Result<()> {
    self.inner.open(cache_name)
  }

  fn has(&self, cache_name: &str) -> Result<bool> {
    self.inner.has(cache_name)
  }

  fn keys(&self) -> Result<Vec<String>> {
    self.inner.keys()
  }

  fn delete(&self, cache_name: &str) -> Result<bool> {
    self.inner.delete(cache_name)
  }

  fn match_request(&self, cache_name: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    self.inner.match_request(cache_name, key)
  }

  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedResponse>> {
    self.inner.match_any(key)
  }

  fn put(&self, _cache_name: &str, _key: &RequestKey, _response: &Response) -> Result<()> {
    self.attempted.fetch_add(1, Ordering::SeqCst);
    Err(eyre!("quota exceeded"))
  }

  fn entry_count(&self, cache_name: &str) -> Result<usize> {
    self.inner.entry_count(cache_name)
  }
}
