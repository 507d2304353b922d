mod cache;
mod config;
mod event;
mod http;
mod network;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use cache::{CacheStorage, MemoryStorage, SqliteStorage};
use config::Config;
use event::{Dispatcher, FetchOutcome, Startup};
use http::{Request, RequestMode, Response};
use network::{HttpNetwork, Network, OfflineNetwork};
use worker::{Interceptor, Settings};

#[derive(Parser, Debug)]
#[command(name = "swcache")]
#[command(about = "Offline-first request interceptor for small static web apps")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./swcache.yaml or $XDG_CONFIG_HOME/swcache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Override the cache generation tag from the config file
  #[arg(long, global = true)]
  version_tag: Option<String>,

  /// Keep caches in memory for this run only
  #[arg(long, global = true)]
  in_memory: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the current generation and activate it, removing older ones
  Install,
  /// Send one request through the interceptor
  Fetch {
    /// Absolute URL, or a path relative to the configured origin
    url: String,
    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Mark the request as a top-level navigation
    #[arg(long)]
    navigate: bool,
    /// Accept header to send
    #[arg(long)]
    accept: Option<String>,
    /// Pretend the network is unreachable
    #[arg(long)]
    offline: bool,
    /// Write the response body to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// List cache generations and their entry counts
  Caches,
}

fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override version if specified on command line
  let config = if let Some(version) = args.version_tag.clone() {
    Config { version, ..config }
  } else {
    config
  };

  let _log_guard = init_tracing(&config)?;

  let runtime = tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()?;

  if args.in_memory {
    runtime.block_on(run(args, config, MemoryStorage::new()))
  } else {
    let storage = SqliteStorage::open(config.storage.path.as_deref())?;
    runtime.block_on(run(args, config, storage))
  }
}

/// Log to `log.file` when configured, otherwise to stderr.
fn init_tracing(config: &Config) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(config.log.filter.as_deref().unwrap_or("info")))
    .map_err(|e| eyre!("Invalid log filter: {}", e))?;

  match &config.log.file {
    Some(path) => {
      let dir = path.parent().unwrap_or_else(|| Path::new("."));
      let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("Log file path has no file name: {}", path.display()))?;
      let appender = tracing_appender::rolling::never(dir, file_name);
      let (writer, guard) = tracing_appender::non_blocking(appender);

      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      Ok(None)
    }
  }
}

async fn run<S: CacheStorage>(args: Args, config: Config, storage: S) -> Result<()> {
  let storage = Arc::new(storage);

  match args.command {
    Command::Install => {
      let dispatcher = dispatcher(&config, storage, HttpNetwork::new()?)?;
      let report = dispatcher.install().await?;
      let deleted = dispatcher.activate().await?;

      println!("installed {}", config.cache_name());
      for url in &report.cached {
        println!("  cached  {}", url);
      }
      for url in &report.failed {
        println!("  failed  {}", url);
      }
      for name in &deleted {
        println!("  deleted {}", name);
      }
    }
    Command::Fetch {
      url,
      method,
      navigate,
      accept,
      offline,
      output,
    } => {
      let request = build_request(&config, &url, &method, navigate, accept.as_deref())?;
      if offline {
        fetch(&config, storage, OfflineNetwork, request, output.as_deref()).await?;
      } else {
        fetch(&config, storage, HttpNetwork::new()?, request, output.as_deref()).await?;
      }
    }
    Command::Caches => {
      let current = config.cache_name();
      for name in storage.keys()? {
        let marker = if name == current { "*" } else { " " };
        println!("{} {} ({} entries)", marker, name, storage.entry_count(&name)?);
      }
    }
  }

  Ok(())
}

fn dispatcher<S: CacheStorage, N: Network>(
  config: &Config,
  storage: Arc<S>,
  network: N,
) -> Result<Dispatcher<S, N>> {
  let settings = Settings::from_config(config)?;
  Ok(Dispatcher::spawn(Arc::new(Interceptor::new(
    settings, storage, network,
  ))))
}

fn build_request(
  config: &Config,
  url: &str,
  method: &str,
  navigate: bool,
  accept: Option<&str>,
) -> Result<Request> {
  let url = config.resolve(url)?;
  let method = method
    .to_uppercase()
    .parse::<Method>()
    .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;

  let mut request = Request::new(method, url);
  if navigate {
    request = request.with_mode(RequestMode::Navigate);
  }
  if let Some(accept) = accept {
    request = request.with_header("accept", accept)?;
  }
  Ok(request)
}

async fn fetch<S: CacheStorage, N: Network + Clone>(
  config: &Config,
  storage: Arc<S>,
  network: N,
  request: Request,
  output: Option<&Path>,
) -> Result<()> {
  let dispatcher = dispatcher(config, storage, network.clone())?;

  match dispatcher.start().await? {
    Startup::Resumed => {}
    Startup::Installed { report, deleted } => {
      eprintln!(
        "installed {} ({} cached, {} failed, {} stale caches deleted)",
        config.cache_name(),
        report.cached.len(),
        report.failed.len(),
        deleted.map(|d| d.len()).unwrap_or(0)
      );
    }
  }

  let (response, source) = match dispatcher.fetch(request.clone()).await? {
    FetchOutcome::Respond(served) => {
      let source = match served.cached_at {
        Some(at) => format!("{}, stored {}", served.source, at.to_rfc3339()),
        None => served.source.to_string(),
      };
      (served.response, source)
    }
    // Default handling: straight to the network, no caching involved
    FetchOutcome::Passthrough => (network.fetch(&request).await?, "passthrough".to_string()),
  };

  dispatcher.settle().await;
  report(&response, &source, output)
}

fn report(response: &Response, source: &str, output: Option<&Path>) -> Result<()> {
  println!(
    "{} {} ({}, {} bytes)",
    response.status().as_u16(),
    response.status_text(),
    source,
    response.body_len()
  );

  if let (Some(path), Some(body)) = (output, response.body()) {
    std::fs::write(path, body)
      .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config() -> Config {
    Config::from_yaml("origin: https://example.com/app").unwrap()
  }

  #[test]
  fn test_build_request_resolves_relative_urls() {
    let request = build_request(&config(), "audio/rain.mp3", "get", false, None).unwrap();
    assert_eq!(request.url().as_str(), "https://example.com/app/audio/rain.mp3");
    assert_eq!(request.method(), Method::GET);
    assert_eq!(request.mode(), RequestMode::Subresource);
  }

  #[test]
  fn test_build_request_navigation() {
    let request = build_request(
      &config(),
      "https://example.com/app/",
      "GET",
      true,
      Some("text/html"),
    )
    .unwrap();
    assert_eq!(request.mode(), RequestMode::Navigate);
    assert!(request.accepts_html());
  }

  #[test]
  fn test_build_request_rejects_bad_method() {
    assert!(build_request(&config(), "index.html", "NOT A METHOD", false, None).is_err());
  }
}
