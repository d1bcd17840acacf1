//! The coordinator: job discovery, per-job locking, and workflow dispatch.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use rookery_coordination::{CoordinationError, CoordinationStore, HeldLock, WatchEvent};
use rookery_metadata::{
  CoordinatorJob, JOB_PREFIX, MetadataClient, NameVariant, ResourceId, ResourceKind,
  ResourceStatus, SourceDefinition, lock_key,
};
use rookery_provider::{
  OfflineResourceId, OfflineResourceType, OfflineStore, ProviderResolver, TransformationConfig,
  TrainingSetDef,
};
use rookery_runner::{
  JobKind, JobSpawner, MaterializeRunner, Runner, TrainingSetRunnerConfig,
};

use crate::config::CoordinatorConfig;
use crate::error::CoordinatorError;
use crate::template::template_replace;

/// One coordinator instance.
///
/// Any number of instances may run against the same coordination service;
/// per-job leases decide which instance executes which job. Within an
/// instance each discovered job runs as its own task, capped by
/// `max_concurrent_jobs`.
pub struct Coordinator {
  metadata: Arc<dyn MetadataClient>,
  store: Arc<dyn CoordinationStore>,
  resolver: Arc<dyn ProviderResolver>,
  spawner: Arc<dyn JobSpawner>,
  config: CoordinatorConfig,
  job_permits: Arc<Semaphore>,
  fatal: CancellationToken,
  instance_id: String,
}

impl Coordinator {
  pub fn new(
    metadata: Arc<dyn MetadataClient>,
    store: Arc<dyn CoordinationStore>,
    resolver: Arc<dyn ProviderResolver>,
    spawner: Arc<dyn JobSpawner>,
    config: CoordinatorConfig,
  ) -> Self {
    let job_permits = Arc::new(Semaphore::new(config.max_concurrent_jobs));
    Self {
      metadata,
      store,
      resolver,
      spawner,
      config,
      job_permits,
      fatal: CancellationToken::new(),
      instance_id: uuid::Uuid::new_v4().to_string(),
    }
  }

  /// Discover and execute jobs until cancelled.
  ///
  /// Scans the job prefix once to catch up on records enqueued while no
  /// watcher was listening, then subscribes to the change feed. Only
  /// key-creation events schedule work; updates (attempt increments) and
  /// deletions are ignored. Returns an error only on subscription failure
  /// or an instance-fatal condition, either of which means this instance
  /// must restart.
  pub async fn watch_for_new_jobs(
    self: &Arc<Self>,
    cancel: CancellationToken,
  ) -> Result<(), CoordinatorError> {
    info!(instance = %self.instance_id, "coordinator_started");

    let existing = self.store.list_prefix(JOB_PREFIX).await?;
    for (key, _) in existing {
      debug!(job_key = %key, "job_found_in_scan");
      self.spawn_execution(key).await;
    }

    let mut events = self.store.watch_prefix(JOB_PREFIX).await?;
    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!(instance = %self.instance_id, "coordinator_stopping");
          return Ok(());
        }
        _ = self.fatal.cancelled() => {
          return Err(CoordinatorError::Fatal {
            reason: "a job lock could not be released".to_string(),
          });
        }
        event = events.recv() => match event {
          Some(WatchEvent::Created { key, .. }) => {
            debug!(job_key = %key, "job_created");
            self.spawn_execution(key).await;
          }
          Some(WatchEvent::Updated { .. }) | Some(WatchEvent::Deleted { .. }) => {}
          None => {
            return Err(CoordinatorError::Coordination(CoordinationError::WatchClosed {
              prefix: JOB_PREFIX.to_string(),
              message: "job change feed ended".to_string(),
            }));
          }
        }
      }
    }
  }

  /// Schedule one execution attempt as an independent task, bounded by the
  /// concurrency cap.
  async fn spawn_execution(self: &Arc<Self>, job_key: String) {
    let Ok(permit) = self.job_permits.clone().acquire_owned().await else {
      return;
    };
    let this = self.clone();
    tokio::spawn(async move {
      let _permit = permit;
      match this.execute_job(&job_key).await {
        Ok(()) => {}
        // A racer completed the job between the event and our lock.
        Err(
          e @ (CoordinatorError::JobNotFound { .. } | CoordinatorError::JobAlreadyDeleted { .. }),
        ) => {
          debug!(job_key = %job_key, error = %e, "job_gone");
        }
        Err(e) if e.is_fatal() => {
          error!(job_key = %job_key, error = %e, "job_fatal");
          this.fatal.cancel();
        }
        Err(e) => {
          warn!(job_key = %job_key, error = %e, "job_failed");
        }
      }
    });
  }

  /// Execute one attempt of the job stored under `job_key`.
  ///
  /// Acquires the job's lease-bound lock for the duration of the attempt.
  /// The lock is released on every exit path; a release failure leaves the
  /// session ambiguous and is fatal to this instance.
  #[instrument(name = "execute_job", skip(self), fields(job_key = %job_key))]
  pub async fn execute_job(&self, job_key: &str) -> Result<(), CoordinatorError> {
    let lock = self
      .store
      .lock(&lock_key(job_key), self.config.lock_ttl)
      .await?;

    let result = self.execute_job_locked(lock.as_ref(), job_key).await;

    if let Err(source) = lock.release().await {
      error!(job_key = %job_key, error = %source, "lock_release_failed");
      return Err(CoordinatorError::LockReleaseFailed {
        key: job_key.to_string(),
        source,
      });
    }
    result
  }

  async fn execute_job_locked(
    &self,
    lock: &dyn HeldLock,
    job_key: &str,
  ) -> Result<(), CoordinatorError> {
    let mut job = self.get_job(lock, job_key).await?;

    if job.attempts > self.config.max_job_attempts {
      warn!(
        resource = %job.resource,
        attempts = job.attempts,
        "job_attempts_exhausted"
      );
      self
        .metadata
        .set_status(&job.resource, ResourceStatus::Failed.as_str())
        .await?;
      return self.delete_job(lock, job_key).await;
    }

    // Persisted before any side effect, so a crash mid-workflow shows up as
    // a higher attempt count on retry.
    self.increment_attempts(lock, &mut job, job_key).await?;

    let resource = job.resource.clone();
    info!(resource = %resource, attempt = job.attempts, "job_started");

    match resource.kind {
      ResourceKind::Source => {
        self
          .run_workflow("source", &resource, self.run_register_source_job(&resource))
          .await?;
      }
      ResourceKind::Feature => {
        self
          .run_workflow(
            "feature",
            &resource,
            self.run_feature_materialize_job(&resource),
          )
          .await?;
      }
      ResourceKind::TrainingSet => {
        self
          .run_workflow("training set", &resource, self.run_training_set_job(&resource))
          .await?;
      }
      ResourceKind::Label | ResourceKind::Entity | ResourceKind::Provider => {
        return Err(CoordinatorError::UnsupportedResourceType {
          kind: resource.kind.as_str(),
        });
      }
    }

    self.delete_job(lock, job_key).await?;
    info!(resource = %resource, "job_completed");
    Ok(())
  }

  /// Run one workflow body. On failure the stringified error is written
  /// into the resource's status field, the job record is left for
  /// re-discovery, and the error propagates wrapped with the job kind.
  /// A terminal status is never overwritten.
  async fn run_workflow(
    &self,
    kind: &'static str,
    resource: &ResourceId,
    body: impl Future<Output = Result<(), CoordinatorError>>,
  ) -> Result<(), CoordinatorError> {
    match body.await {
      Ok(()) => Ok(()),
      Err(err) => {
        if !matches!(err, CoordinatorError::AlreadyTerminal { .. }) {
          let diagnostic = err.to_string();
          if let Err(status_err) = self.metadata.set_status(resource, &diagnostic).await {
            error!(resource = %resource, error = %status_err, "status_write_failed");
          }
        }
        Err(CoordinatorError::WorkflowExecution {
          kind,
          name: resource.name.clone(),
          variant: resource.variant.clone(),
          source: Box::new(err),
        })
      }
    }
  }

  // --- job record management -----------------------------------------------

  async fn get_job(
    &self,
    lock: &dyn HeldLock,
    job_key: &str,
  ) -> Result<CoordinatorJob, CoordinatorError> {
    let bytes = lock
      .get(job_key)
      .await?
      .ok_or_else(|| CoordinatorError::JobNotFound {
        key: job_key.to_string(),
      })?;
    CoordinatorJob::deserialize(&bytes).map_err(|e| CoordinatorError::Serialization {
      key: job_key.to_string(),
      message: e.to_string(),
    })
  }

  async fn increment_attempts(
    &self,
    lock: &dyn HeldLock,
    job: &mut CoordinatorJob,
    job_key: &str,
  ) -> Result<(), CoordinatorError> {
    job.attempts += 1;
    let bytes = job
      .serialize()
      .map_err(|e| CoordinatorError::Serialization {
        key: job_key.to_string(),
        message: e.to_string(),
      })?;
    lock.put(job_key, &bytes).await?;
    Ok(())
  }

  async fn delete_job(&self, lock: &dyn HeldLock, job_key: &str) -> Result<(), CoordinatorError> {
    if !lock.delete(job_key).await? {
      return Err(CoordinatorError::JobAlreadyDeleted {
        key: job_key.to_string(),
      });
    }
    Ok(())
  }

  /// Whether a job record exists for this resource. Used by the
  /// resource-creation path to avoid duplicate enqueue.
  pub async fn has_job(&self, id: &ResourceId) -> Result<bool, CoordinatorError> {
    let keys = self.store.list_prefix(&id.job_key()).await?;
    Ok(!keys.is_empty())
  }

  /// Enqueue a job record for a resource unless one already exists.
  /// Returns whether a record was created.
  pub async fn enqueue_job(&self, id: &ResourceId) -> Result<bool, CoordinatorError> {
    if self.has_job(id).await? {
      debug!(resource = %id, "job_already_enqueued");
      return Ok(false);
    }
    let job = CoordinatorJob::new(id.clone());
    let key = id.job_key();
    let bytes = job.serialize().map_err(|e| CoordinatorError::Serialization {
      key: key.clone(),
      message: e.to_string(),
    })?;
    self.store.put(&key, &bytes).await?;
    Ok(true)
  }

  // --- source registration workflow ----------------------------------------

  async fn run_register_source_job(&self, res: &ResourceId) -> Result<(), CoordinatorError> {
    let source = self.metadata.get_source_variant(&res.name_variant()).await?;
    let provider_entry = self.metadata.get_provider(&source.provider).await?;
    let provider = self.resolver.resolve(
      &provider_entry.provider_type,
      &provider_entry.serialized_config,
    )?;
    let offline = provider.as_offline_store()?;

    match &source.definition {
      SourceDefinition::SqlTransformation { query, sources } => {
        self
          .run_sql_transformation_job(res, query, sources, offline)
          .await
      }
      SourceDefinition::PrimaryTable { table_name } => {
        self.run_primary_table_job(res, table_name, offline).await
      }
    }
  }

  async fn run_sql_transformation_job(
    &self,
    res: &ResourceId,
    query: &str,
    sources: &[NameVariant],
    offline: Arc<dyn OfflineStore>,
  ) -> Result<(), CoordinatorError> {
    debug!(resource = %res, sources = sources.len(), "transformation_started");
    self.await_source_dependencies(sources).await?;

    let table_map = self.map_name_variants_to_tables(sources).await?;
    let resolved = template_replace(query, &table_map)?;

    let target = OfflineResourceId::new(
      res.name.clone(),
      res.variant.clone(),
      OfflineResourceType::Transformation,
    );
    offline
      .create_transformation(TransformationConfig {
        target,
        query: resolved,
      })
      .await?;

    self
      .metadata
      .set_status(res, ResourceStatus::Ready.as_str())
      .await?;
    Ok(())
  }

  async fn run_primary_table_job(
    &self,
    res: &ResourceId,
    table_name: &str,
    offline: Arc<dyn OfflineStore>,
  ) -> Result<(), CoordinatorError> {
    if table_name.is_empty() {
      return Err(CoordinatorError::MissingSourceName {
        name: res.name.clone(),
        variant: res.variant.clone(),
      });
    }
    let id = OfflineResourceId::new(
      res.name.clone(),
      res.variant.clone(),
      OfflineResourceType::Primary,
    );
    offline
      .register_primary_from_source_table(&id, table_name)
      .await?;

    self
      .metadata
      .set_status(res, ResourceStatus::Ready.as_str())
      .await?;
    Ok(())
  }

  /// Poll metadata until every upstream source is READY.
  ///
  /// Aborts immediately if any source reaches FAILED, and gives up after
  /// the configured timeout so a dead upstream surfaces to the caller
  /// instead of spinning forever.
  async fn await_source_dependencies(
    &self,
    sources: &[NameVariant],
  ) -> Result<(), CoordinatorError> {
    let started = Instant::now();
    loop {
      let variants = self.metadata.get_source_variants(sources).await?;
      let mut ready = 0;
      for variant in &variants {
        match variant.status() {
          ResourceStatus::Ready => ready += 1,
          ResourceStatus::Failed => {
            return Err(CoordinatorError::DependencyFailed {
              name: variant.name.clone(),
              variant: variant.variant.clone(),
            });
          }
          ResourceStatus::Created | ResourceStatus::Pending => {}
        }
      }
      if ready == variants.len() {
        return Ok(());
      }
      if started.elapsed() >= self.config.dependency_timeout {
        return Err(CoordinatorError::DependencyTimeout {
          waited_secs: started.elapsed().as_secs(),
        });
      }
      tokio::time::sleep(self.config.dependency_poll_interval).await;
    }
  }

  /// Build the `name.variant` to backing-table mapping for a
  /// transformation's upstream sources.
  async fn map_name_variants_to_tables(
    &self,
    sources: &[NameVariant],
  ) -> Result<HashMap<String, String>, CoordinatorError> {
    let mut table_map = HashMap::with_capacity(sources.len());
    for nv in sources {
      let source = self.metadata.get_source_variant(nv).await?;
      if source.status() != ResourceStatus::Ready {
        return Err(CoordinatorError::DependencyNotReady {
          name: nv.name.clone(),
          variant: nv.variant.clone(),
        });
      }
      let resource_type = match &source.definition {
        SourceDefinition::SqlTransformation { .. } => OfflineResourceType::Transformation,
        SourceDefinition::PrimaryTable { .. } => OfflineResourceType::Primary,
      };
      let table =
        OfflineResourceId::new(nv.name.clone(), nv.variant.clone(), resource_type).table_name();
      table_map.insert(nv.to_string(), table);
    }
    Ok(table_map)
  }

  // --- feature materialization workflow ------------------------------------

  /// Only entered for online features; offline features need no
  /// materialization.
  async fn run_feature_materialize_job(&self, res: &ResourceId) -> Result<(), CoordinatorError> {
    let feature = self.metadata.get_feature_variant(&res.name_variant()).await?;

    let status = feature.status();
    if status.is_terminal() {
      return Err(CoordinatorError::AlreadyTerminal {
        kind: "feature",
        name: res.name.clone(),
        variant: res.variant.clone(),
        status: status.to_string(),
      });
    }
    self
      .metadata
      .set_status(res, ResourceStatus::Pending.as_str())
      .await?;

    let source = self.metadata.get_source_variant(&feature.source).await?;
    if source.status() != ResourceStatus::Ready {
      return Err(CoordinatorError::DependencyNotReady {
        name: source.name.clone(),
        variant: source.variant.clone(),
      });
    }

    let source_provider = self.metadata.get_provider(&source.provider).await?;
    let offline = self
      .resolver
      .resolve(
        &source_provider.provider_type,
        &source_provider.serialized_config,
      )?
      .as_offline_store()?;

    let feature_provider = self.metadata.get_provider(&feature.provider).await?;
    let online = self
      .resolver
      .resolve(
        &feature_provider.provider_type,
        &feature_provider.serialized_config,
      )?
      .as_online_store()?;

    let runner = MaterializeRunner {
      offline,
      online,
      id: OfflineResourceId::new(
        res.name.clone(),
        res.variant.clone(),
        OfflineResourceType::Feature,
      ),
    };
    runner.run().await?.wait().await?;

    self
      .metadata
      .set_status(res, ResourceStatus::Ready.as_str())
      .await?;
    Ok(())
  }

  // --- training set workflow ------------------------------------------------

  async fn run_training_set_job(&self, res: &ResourceId) -> Result<(), CoordinatorError> {
    let ts = self
      .metadata
      .get_training_set_variant(&res.name_variant())
      .await?;

    let status = ts.status();
    if status.is_terminal() {
      return Err(CoordinatorError::AlreadyTerminal {
        kind: "training set",
        name: res.name.clone(),
        variant: res.variant.clone(),
        status: status.to_string(),
      });
    }
    self
      .metadata
      .set_status(res, ResourceStatus::Pending.as_str())
      .await?;

    let provider_entry = self.metadata.get_provider(&ts.provider).await?;
    let provider = self.resolver.resolve(
      &provider_entry.provider_type,
      &provider_entry.serialized_config,
    )?;
    let offline = provider.as_offline_store()?;

    let ts_id = OfflineResourceId::new(
      res.name.clone(),
      res.variant.clone(),
      OfflineResourceType::TrainingSet,
    );
    match offline.get_training_set(&ts_id).await {
      Ok(()) => {
        return Err(CoordinatorError::AlreadyExists {
          name: res.name.clone(),
          variant: res.variant.clone(),
        });
      }
      Err(rookery_provider::ProviderError::NotFound { .. }) => {}
      Err(e) => return Err(e.into()),
    }

    let label = self.metadata.get_label_variant(&ts.label).await?;
    let features = ts
      .features
      .iter()
      .map(|nv| {
        OfflineResourceId::new(nv.name.clone(), nv.variant.clone(), OfflineResourceType::Feature)
      })
      .collect();

    let def = TrainingSetDef {
      id: ts_id,
      label: OfflineResourceId::new(
        label.name.clone(),
        label.variant.clone(),
        OfflineResourceType::Label,
      ),
      features,
    };
    let runner_config = TrainingSetRunnerConfig {
      offline_type: provider_entry.provider_type.clone(),
      offline_config: provider_entry.serialized_config.clone(),
      def,
    };
    let serialized = runner_config.serialize()?;

    let runner = self
      .spawner
      .get_job_runner(JobKind::CreateTrainingSet, &serialized)?;
    runner.run().await?.wait().await?;

    self
      .metadata
      .set_status(res, ResourceStatus::Ready.as_str())
      .await?;
    Ok(())
  }
}
