//! Request fulfilment strategies. Every strategy returns a response; network errors are
//! turned into cached or synthetic answers and cache failures never reach the caller.

use tracing::debug;

use super::Interceptor;
use crate::cache::{CacheStorage, CachedResponse, RequestKey, Served};
use crate::http::{Request, Response};
use crate::network::Network;

impl<S: CacheStorage, N: Network> Interceptor<S, N> {
  /// Media: cache-first, stored on the first successful fetch and never revalidated.
  pub(super) async fn serve_media(&self, request: &Request) -> Served {
    self
      .cache_first(request, Response::service_unavailable)
      .await
  }

  /// Other static assets: cache-first, refreshed from the network on a miss.
  pub(super) async fn serve_static(&self, request: &Request) -> Served {
    self.cache_first(request, Response::not_found).await
  }

  /// Documents: network-first so online loads keep the stored copy fresh.
  pub(super) async fn serve_navigation(&self, request: &Request) -> Served {
    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_cacheable() {
          let cache = self.caches.open_or_detached(&self.settings.cache_name);
          cache.persist(request, response.duplicate());
        }
        Served::from_network(response)
      }
      Err(e) => {
        debug!(url = %request.url(), error = %e, "navigation fetch failed, using stored document");
        match self.stored_document().await {
          Some(cached) => Served::offline(cached),
          None => Served::synthetic(Response::offline()),
        }
      }
    }
  }

  /// The document root from the current store. Other stores only exist if cleanup
  /// failed, and are consulted newest first.
  async fn stored_document(&self) -> Option<CachedResponse> {
    let root = Request::get(self.settings.document_root.clone());
    let cache = self.caches.open_or_detached(&self.settings.cache_name);
    if let Some(cached) = cache.lookup(&root).await {
      return Some(cached);
    }
    self.caches.match_any(&RequestKey::for_url(root.url())).await
  }

  async fn cache_first(&self, request: &Request, unavailable: fn() -> Response) -> Served {
    let cache = self.caches.open_or_detached(&self.settings.cache_name);

    if let Some(cached) = cache.lookup(request).await {
      return Served::from_cache(cached);
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_cacheable() {
          cache.persist(request, response.duplicate());
        }
        Served::from_network(response)
      }
      Err(e) => {
        debug!(url = %request.url(), error = %e, "fetch failed with nothing cached");
        Served::synthetic(unavailable())
      }
    }
  }
}
