//! Cache layer over a storage backend: the set of named stores plus handles to single stores.

use color_eyre::Result;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use super::storage::CacheStorage;
use super::traits::{CachedResponse, RequestKey};
use crate::http::{Request, Response};

/// Namespace of named stores sharing one storage backend.
///
/// Writes issued through any [`Cache`] opened from this layer run in the background and
/// are tracked here, so a host can wait for them with [`CacheLayer::settle`].
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  writes: TaskTracker,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  #[allow(dead_code)]
  pub fn new(storage: S) -> Self {
    Self::from_shared(Arc::new(storage))
  }

  pub fn from_shared(storage: Arc<S>) -> Self {
    Self {
      storage,
      writes: TaskTracker::new(),
    }
  }

  #[allow(dead_code)]
  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  /// Open (create if absent) the named store.
  pub fn open(&self, cache_name: &str) -> Result<Cache<S>> {
    self.storage.open(cache_name)?;
    Ok(self.handle(cache_name))
  }

  /// Open the named store, falling back to an unopened handle if the backend fails.
  ///
  /// Lookups and writes through such a handle fail on their own and are treated as
  /// misses and dropped writes.
  pub fn open_or_detached(&self, cache_name: &str) -> Cache<S> {
    match self.open(cache_name) {
      Ok(cache) => cache,
      Err(e) => {
        warn!(cache = cache_name, error = %e, "failed to open cache");
        self.handle(cache_name)
      }
    }
  }

  fn handle(&self, cache_name: &str) -> Cache<S> {
    Cache {
      name: Arc::from(cache_name),
      storage: Arc::clone(&self.storage),
      writes: self.writes.clone(),
    }
  }

  pub async fn has(&self, cache_name: &str) -> Result<bool> {
    let cache_name = cache_name.to_string();
    blocking(&self.storage, move |storage| storage.has(&cache_name)).await
  }

  pub async fn keys(&self) -> Result<Vec<String>> {
    blocking(&self.storage, |storage| storage.keys()).await
  }

  pub async fn delete(&self, cache_name: &str) -> Result<bool> {
    let cache_name = cache_name.to_string();
    blocking(&self.storage, move |storage| storage.delete(&cache_name)).await
  }

  /// Look a request up across every store, newest first. Errors count as a miss.
  pub async fn match_any(&self, key: &RequestKey) -> Option<CachedResponse> {
    let lookup_key = key.clone();
    match blocking(&self.storage, move |storage| storage.match_any(&lookup_key)).await {
      Ok(found) => found,
      Err(e) => {
        debug!(url = %key.url(), error = %e, "cache lookup failed");
        None
      }
    }
  }

  /// Wait until every background write issued so far has finished.
  pub async fn settle(&self) {
    self.writes.close();
    self.writes.wait().await;
    self.writes.reopen();
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      writes: self.writes.clone(),
    }
  }
}

/// Handle to one named store.
pub struct Cache<S: CacheStorage> {
  name: Arc<str>,
  storage: Arc<S>,
  writes: TaskTracker,
}

impl<S: CacheStorage> Cache<S> {
  /// Look the request up in this store. Errors count as a miss.
  pub async fn lookup(&self, request: &Request) -> Option<CachedResponse> {
    let key = RequestKey::for_request(request).ok()?;
    let name = Arc::clone(&self.name);
    let lookup_key = key.clone();
    let found = blocking(&self.storage, move |storage| {
      storage.match_request(&name, &lookup_key)
    })
    .await;
    match found {
      Ok(found) => found,
      Err(e) => {
        debug!(cache = %self.name, url = %key.url(), error = %e, "cache lookup failed");
        None
      }
    }
  }

  /// Write a response for the request and wait for the result.
  pub async fn put(&self, request: &Request, response: Response) -> Result<()> {
    let key = RequestKey::for_request(request)?;
    let name = Arc::clone(&self.name);
    blocking(&self.storage, move |storage| storage.put(&name, &key, &response)).await
  }

  /// Write a response in the background. Failures are logged and otherwise ignored.
  pub fn persist(&self, request: &Request, response: Response) {
    let key = match RequestKey::for_request(request) {
      Ok(key) => key,
      Err(e) => {
        debug!(error = %e, "not persisting response");
        return;
      }
    };
    let storage = Arc::clone(&self.storage);
    let name = Arc::clone(&self.name);

    self.writes.spawn_blocking(move || {
      if let Err(e) = storage.put(&name, &key, &response) {
        debug!(cache = %name, url = %key.url(), error = %e, "cache write failed");
      }
    });
  }
}

/// Run a storage call on the blocking pool. Backends hold a lock for the whole call.
async fn blocking<S, T, F>(storage: &Arc<S>, f: F) -> Result<T>
where
  S: CacheStorage,
  T: Send + 'static,
  F: FnOnce(&S) -> Result<T> + Send + 'static,
{
  let storage = Arc::clone(storage);
  tokio::task::spawn_blocking(move || f(&storage)).await?
}
