use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use rookery_coordination::{CoordinationStore, EtcdCoordination, InMemoryCoordination};
use rookery_coordinator::{Coordinator, CoordinatorConfig};
use rookery_metadata::InMemoryMetadata;
use rookery_provider::{
  MemoryOfflineStore, MemoryOnlineStore, Provider, StaticProviderResolver,
};
use rookery_runner::MemoryJobSpawner;

/// Rookery - a feature-store control plane coordinator
#[derive(Parser)]
#[command(name = "rookery")]
#[command(version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the coordinator against an etcd coordination service
  Serve {
    /// etcd endpoints
    #[arg(long, default_value = "localhost:2379")]
    etcd: Vec<String>,

    #[command(flatten)]
    tuning: Tuning,
  },

  /// Run the coordinator with in-process backends, for local development
  Standalone {
    #[command(flatten)]
    tuning: Tuning,
  },
}

#[derive(Args)]
struct Tuning {
  /// Cap on concurrently executing jobs
  #[arg(long, default_value_t = 32)]
  max_concurrent_jobs: usize,

  /// Attempts a job may accumulate before it is written off as failed
  #[arg(long, default_value_t = 1)]
  max_job_attempts: u32,

  /// Per-job lock lease TTL in seconds
  #[arg(long, default_value_t = 1)]
  lock_ttl_secs: u64,

  /// How long to wait for upstream sources, in seconds
  #[arg(long, default_value_t = 300)]
  dependency_timeout_secs: u64,
}

impl Tuning {
  fn into_config(self) -> CoordinatorConfig {
    CoordinatorConfig {
      max_job_attempts: self.max_job_attempts,
      max_concurrent_jobs: self.max_concurrent_jobs,
      lock_ttl: Duration::from_secs(self.lock_ttl_secs),
      dependency_timeout: Duration::from_secs(self.dependency_timeout_secs),
      ..CoordinatorConfig::default()
    }
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .init();

  let cli = Cli::parse();

  match cli.command {
    Some(Commands::Serve { etcd, tuning }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(async {
        let store = EtcdCoordination::connect(&etcd)
          .await
          .context("failed to connect to etcd")?;
        serve(Arc::new(store), tuning.into_config()).await
      })?;
    }
    Some(Commands::Standalone { tuning }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(async {
        serve(Arc::new(InMemoryCoordination::new()), tuning.into_config()).await
      })?;
    }
    None => {
      println!("rookery - use --help to see available commands");
    }
  }

  Ok(())
}

async fn serve(store: Arc<dyn CoordinationStore>, config: CoordinatorConfig) -> Result<()> {
  // The metadata service and the concrete store integrations live behind
  // the gateway; this binary wires in-memory stand-ins.
  let metadata = Arc::new(InMemoryMetadata::new());
  let offline: Arc<MemoryOfflineStore> = Arc::new(MemoryOfflineStore::new());
  let online: Arc<MemoryOnlineStore> = Arc::new(MemoryOnlineStore::new());
  let resolver = Arc::new(
    StaticProviderResolver::new()
      .register(Provider::offline("MEMORY_OFFLINE", offline))
      .register(Provider::online("MEMORY_ONLINE", online)),
  );
  let spawner = Arc::new(MemoryJobSpawner::new(resolver.clone()));

  let coordinator = Arc::new(Coordinator::new(
    metadata, store, resolver, spawner, config,
  ));

  let cancel = CancellationToken::new();
  let shutdown = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      info!("shutdown_requested");
      shutdown.cancel();
    }
  });

  coordinator
    .watch_for_new_jobs(cancel)
    .await
    .context("coordinator exited")
}
