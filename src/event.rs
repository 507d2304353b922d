use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::cache::{CacheStorage, Served};
use crate::http::Request;
use crate::network::Network;
use crate::worker::{InstallReport, Interceptor};

/// Events delivered to the interceptor. Each carries the channel its result goes back on.
#[derive(Debug)]
pub enum Event {
  /// New generation deployed; resolves once the shell is seeded
  Install(oneshot::Sender<Result<InstallReport>>),
  /// Take over from older generations; resolves with the deleted store names
  Activate(oneshot::Sender<Result<Vec<String>>>),
  /// A page issued a request
  Fetch {
    request: Request,
    respond_with: oneshot::Sender<FetchOutcome>,
  },
}

/// The answer to a fetch event.
#[derive(Debug)]
pub enum FetchOutcome {
  /// The interceptor produced this response
  Respond(Served),
  /// Not intercepted; the host must use default network handling
  Passthrough,
}

/// What happened when the dispatcher started.
#[derive(Debug)]
pub enum Startup {
  /// The current generation was already installed and is active again
  Resumed,
  /// A fresh install ran. `deleted` is `None` if activation is still pending.
  Installed {
    report: InstallReport,
    deleted: Option<Vec<String>>,
  },
}

/// Delivers events to an interceptor, each as its own task.
///
/// Events are queued on an unbounded channel and every one is spawned as soon as it is
/// received, so slow fetches never hold up others.
pub struct Dispatcher<S: CacheStorage, N: Network> {
  tx: mpsc::UnboundedSender<Event>,
  interceptor: Arc<Interceptor<S, N>>,
}

impl<S: CacheStorage, N: Network> Dispatcher<S, N> {
  /// Spawn the dispatch loop for `interceptor`. Must be called inside a tokio runtime.
  pub fn spawn(interceptor: Arc<Interceptor<S, N>>) -> Self {
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

    let worker = Arc::clone(&interceptor);
    tokio::spawn(async move {
      while let Some(event) = rx.recv().await {
        let worker = Arc::clone(&worker);
        tokio::spawn(dispatch(worker, event));
      }
    });

    Self { tx, interceptor }
  }

  #[allow(dead_code)]
  pub fn interceptor(&self) -> &Arc<Interceptor<S, N>> {
    &self.interceptor
  }

  async fn send<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Event) -> Result<T> {
    let (done, rx) = oneshot::channel();
    self
      .tx
      .send(make(done))
      .map_err(|_| eyre!("Dispatcher has shut down"))?;
    rx.await
      .map_err(|_| eyre!("Event handler ended without answering"))
  }

  pub async fn install(&self) -> Result<InstallReport> {
    self.send(Event::Install).await?
  }

  pub async fn activate(&self) -> Result<Vec<String>> {
    self.send(Event::Activate).await?
  }

  pub async fn fetch(&self, request: Request) -> Result<FetchOutcome> {
    self
      .send(|respond_with| Event::Fetch {
        request,
        respond_with,
      })
      .await
  }

  /// Bring the interceptor up the way a platform would when a page loads.
  ///
  /// An already-installed generation is resumed. Otherwise it is installed, and
  /// activated straight away if install asked to skip waiting.
  pub async fn start(&self) -> Result<Startup> {
    if self.interceptor.resume().await? {
      return Ok(Startup::Resumed);
    }

    let report = self.install().await?;
    let deleted = if self.interceptor.skip_waiting_requested() {
      Some(self.activate().await?)
    } else {
      None
    };

    Ok(Startup::Installed { report, deleted })
  }

  /// Wait for background cache writes started by earlier fetches.
  pub async fn settle(&self) {
    self.interceptor.settle().await;
  }
}

async fn dispatch<S: CacheStorage, N: Network>(interceptor: Arc<Interceptor<S, N>>, event: Event) {
  // Send failures mean the host stopped waiting; the work itself is already done.
  match event {
    Event::Install(done) => {
      let _ = done.send(interceptor.install().await);
    }
    Event::Activate(done) => {
      let _ = done.send(interceptor.activate().await);
    }
    Event::Fetch {
      request,
      respond_with,
    } => {
      let outcome = if interceptor.is_active() {
        match interceptor.handle_fetch(&request).await {
          Some(served) => FetchOutcome::Respond(served),
          None => FetchOutcome::Passthrough,
        }
      } else {
        debug!(url = %request.url(), state = ?interceptor.state(), "not controlling, passing through");
        FetchOutcome::Passthrough
      };
      let _ = respond_with.send(outcome);
    }
  }
}
