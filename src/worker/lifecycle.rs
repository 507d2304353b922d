//! Install and activate: creating, seeding and superseding cache generations.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::sync::atomic::Ordering;
use tracing::{info, warn};
use url::Url;

use super::Interceptor;
use crate::cache::{Cache, CacheStorage};
use crate::http::{CacheMode, Request};
use crate::network::Network;

/// Where an interceptor is in its lifecycle. Only an `Active` interceptor answers fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Uninstalled,
  Installing,
  /// Installed and waiting to take over from the previous generation
  Installed,
  Activating,
  Active,
}

/// Outcome of seeding the shell resources.
#[derive(Debug, Default)]
pub struct InstallReport {
  pub cached: Vec<Url>,
  pub failed: Vec<Url>,
}

impl<S: CacheStorage, N: Network> Interceptor<S, N> {
  pub fn state(&self) -> LifecycleState {
    *self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub fn is_active(&self) -> bool {
    self.state() == LifecycleState::Active
  }

  fn set_state(&self, state: LifecycleState) {
    *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
  }

  fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<()> {
    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
    if *state != from {
      return Err(eyre!("Cannot move to {:?} from {:?}", to, *state));
    }
    *state = to;
    Ok(())
  }

  /// Create the current generation's store and seed it with the shell resources.
  ///
  /// Seeding is best-effort: each resource is fetched and stored on its own, and
  /// failures are logged. Install itself only fails when called out of order.
  pub async fn install(&self) -> Result<InstallReport> {
    self.transition(LifecycleState::Uninstalled, LifecycleState::Installing)?;
    self.skip_waiting.store(true, Ordering::SeqCst);

    let cache_name = &self.settings.cache_name;
    let report = match self.caches.open(cache_name) {
      Ok(cache) => self.precache_shell(&cache).await,
      Err(e) => {
        warn!(cache = %cache_name, error = %e, "pre-cache shell failed");
        InstallReport {
          cached: Vec::new(),
          failed: self.settings.shell.clone(),
        }
      }
    };

    info!(
      cache = %cache_name,
      cached = report.cached.len(),
      failed = report.failed.len(),
      "installed"
    );
    self.set_state(LifecycleState::Installed);
    Ok(report)
  }

  async fn precache_shell(&self, cache: &Cache<S>) -> InstallReport {
    let results = join_all(
      self
        .settings
        .shell
        .iter()
        .map(|url| self.precache(cache, url)),
    )
    .await;

    let mut report = InstallReport::default();
    for (url, result) in self.settings.shell.iter().zip(results) {
      match result {
        Ok(()) => report.cached.push(url.clone()),
        Err(e) => {
          warn!(url = %url, error = %e, "pre-cache shell resource failed");
          report.failed.push(url.clone());
        }
      }
    }
    report
  }

  /// Fetch one shell resource past any HTTP cache and store it if it came back 200.
  async fn precache(&self, cache: &Cache<S>, url: &Url) -> Result<()> {
    let request = Request::get(url.clone()).with_cache_mode(CacheMode::NoCache);
    let response = self.network.fetch(&request).await?;
    if !response.is_cacheable() {
      return Err(eyre!("Unexpected status {}", response.status()));
    }

    cache.put(&request, response).await
  }

  /// Delete every store that does not belong to the current generation, then claim clients.
  ///
  /// Returns the names that were deleted.
  pub async fn activate(&self) -> Result<Vec<String>> {
    self.transition(LifecycleState::Installed, LifecycleState::Activating)?;

    let deleted = self.delete_stale_caches().await;

    self.clients_claimed.store(true, Ordering::SeqCst);
    self.set_state(LifecycleState::Active);
    info!(cache = %self.settings.cache_name, deleted = deleted.len(), "activated");
    Ok(deleted)
  }

  async fn delete_stale_caches(&self) -> Vec<String> {
    let names = match self.caches.keys().await {
      Ok(names) => names,
      Err(e) => {
        warn!(error = %e, "failed to list caches");
        return Vec::new();
      }
    };

    let stale: Vec<String> = names
      .into_iter()
      .filter(|name| *name != self.settings.cache_name)
      .collect();
    let results = join_all(stale.iter().map(|name| self.caches.delete(name))).await;

    stale
      .into_iter()
      .zip(results)
      .filter_map(|(name, result)| match result {
        Ok(_) => {
          info!(cache = %name, "deleted stale cache");
          Some(name)
        }
        Err(e) => {
          warn!(cache = %name, error = %e, "failed to delete stale cache");
          None
        }
      })
      .collect()
  }

  /// Pick up an already-installed generation without installing it again.
  ///
  /// Stores left behind by an interrupted activation are deleted before the interceptor
  /// goes active. Returns false, leaving the state untouched, when the current store
  /// does not exist yet and a full install is needed.
  pub async fn resume(&self) -> Result<bool> {
    if !self.caches.has(&self.settings.cache_name).await? {
      return Ok(false);
    }
    self.transition(LifecycleState::Uninstalled, LifecycleState::Activating)?;

    let deleted = self.delete_stale_caches().await;

    self.clients_claimed.store(true, Ordering::SeqCst);
    self.set_state(LifecycleState::Active);
    info!(cache = %self.settings.cache_name, deleted = deleted.len(), "resumed");
    Ok(true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStorage, RequestKey};
  use crate::testing::{interceptor, FakeNetwork};
  use reqwest::StatusCode;
  use std::sync::Arc;

  const ROOT: &str = "https://example.com/";
  const INDEX: &str = "https://example.com/app/index.html";
  const PLAYLIST: &str = "https://example.com/app/playlist.json";

  fn key(url: &str) -> RequestKey {
    RequestKey::for_url(&Url::parse(url).unwrap())
  }

  #[tokio::test]
  async fn test_install_seeds_shell() {
    let network = FakeNetwork::new();
    network.serve(ROOT, StatusCode::OK, "<html>root</html>");
    network.serve(INDEX, StatusCode::OK, "<html>index</html>");
    network.serve(PLAYLIST, StatusCode::OK, "[]");
    let storage = Arc::new(MemoryStorage::new());
    let interceptor = interceptor(Arc::clone(&storage), network.clone());

    let report = interceptor.install().await.unwrap();
    assert_eq!(report.cached.len(), 3);
    assert!(report.failed.is_empty());
    assert_eq!(interceptor.state(), LifecycleState::Installed);
    assert!(interceptor.skip_waiting_requested());

    assert_eq!(storage.entry_count("meditate-v1").unwrap(), 3);
    for url in [ROOT, INDEX, PLAYLIST] {
      assert!(storage
        .match_request("meditate-v1", &key(url))
        .unwrap()
        .is_some());
    }
    assert!(network
      .requests()
      .iter()
      .all(|r| r.cache_mode() == CacheMode::NoCache));
  }

  #[tokio::test]
  async fn test_install_tolerates_missing_shell_resource() {
    let network = FakeNetwork::new();
    network.serve(ROOT, StatusCode::OK, "<html>root</html>");
    network.serve(INDEX, StatusCode::OK, "<html>index</html>");
    // playlist.json is not deployed
    let storage = Arc::new(MemoryStorage::new());
    let interceptor = interceptor(Arc::clone(&storage), network);

    let report = interceptor.install().await.unwrap();
    assert_eq!(report.cached.len(), 2);
    assert_eq!(report.failed, vec![Url::parse(PLAYLIST).unwrap()]);
    assert_eq!(interceptor.state(), LifecycleState::Installed);
    assert_eq!(storage.entry_count("meditate-v1").unwrap(), 2);
  }

  #[tokio::test]
  async fn test_install_offline_still_completes() {
    let network = FakeNetwork::new();
    network.set_online(false);
    let storage = Arc::new(MemoryStorage::new());
    let interceptor = interceptor(Arc::clone(&storage), network);

    let report = interceptor.install().await.unwrap();
    assert!(report.cached.is_empty());
    assert_eq!(report.failed.len(), 3);
    assert!(storage.has("meditate-v1").unwrap());
    assert_eq!(interceptor.state(), LifecycleState::Installed);
  }

  #[tokio::test]
  async fn test_activate_removes_other_generations() {
    let storage = Arc::new(MemoryStorage::new());
    storage.open("meditate-v0").unwrap();
    storage.open("other-app").unwrap();
    let interceptor = interceptor(Arc::clone(&storage), FakeNetwork::new());

    interceptor.install().await.unwrap();
    let deleted = interceptor.activate().await.unwrap();

    assert_eq!(deleted, vec!["meditate-v0", "other-app"]);
    assert_eq!(storage.keys().unwrap(), vec!["meditate-v1"]);
    assert!(interceptor.is_active());
    assert!(interceptor.clients_claimed());
  }

  #[tokio::test]
  async fn test_activate_leaves_current_generation_unchanged() {
    let storage = Arc::new(MemoryStorage::new());
    storage.open("app-v1").unwrap();
    storage.open("app-v2").unwrap();
    let seeded = FakeNetwork::response(StatusCode::OK, "keep");
    storage.put("app-v2", &key(INDEX), &seeded).unwrap();

    let mut settings = crate::testing::settings();
    settings.cache_name = "app-v2".to_string();
    settings.shell.clear();
    let interceptor = Interceptor::new(settings, Arc::clone(&storage), FakeNetwork::new());

    interceptor.install().await.unwrap();
    interceptor.activate().await.unwrap();

    assert!(!storage.has("app-v1").unwrap());
    assert_eq!(storage.keys().unwrap(), vec!["app-v2"]);
    let kept = storage.match_request("app-v2", &key(INDEX)).unwrap().unwrap();
    assert_eq!(kept.response, seeded);
    assert_eq!(storage.entry_count("app-v2").unwrap(), 1);
  }

  #[tokio::test]
  async fn test_lifecycle_order_is_enforced() {
    let interceptor = interceptor(Arc::new(MemoryStorage::new()), FakeNetwork::new());
    assert!(interceptor.activate().await.is_err());

    interceptor.install().await.unwrap();
    assert!(interceptor.install().await.is_err());

    interceptor.activate().await.unwrap();
    assert!(interceptor.activate().await.is_err());
  }

  #[tokio::test]
  async fn test_resume_requires_existing_generation() {
    let storage = Arc::new(MemoryStorage::new());
    let interceptor = interceptor(Arc::clone(&storage), FakeNetwork::new());
    assert!(!interceptor.resume().await.unwrap());
    assert_eq!(interceptor.state(), LifecycleState::Uninstalled);

    storage.open("meditate-v1").unwrap();
    assert!(interceptor.resume().await.unwrap());
    assert!(interceptor.is_active());
  }

  #[tokio::test]
  async fn test_resume_finishes_interrupted_activation() {
    let storage = Arc::new(MemoryStorage::new());
    storage.open("meditate-v0").unwrap();
    storage.open("meditate-v1").unwrap();
    let interceptor = interceptor(Arc::clone(&storage), FakeNetwork::new());

    assert!(interceptor.resume().await.unwrap());
    assert_eq!(storage.keys().unwrap(), vec!["meditate-v1"]);
    assert!(interceptor.clients_claimed());
  }
}
