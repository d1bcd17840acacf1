//! Integration tests for the coordinator using in-memory backends.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use rookery_coordination::{CoordinationStore, InMemoryCoordination};
use rookery_coordinator::{Coordinator, CoordinatorConfig, CoordinatorError};
use rookery_metadata::{
  CoordinatorJob, FeatureVariant, InMemoryMetadata, LabelVariant, NameVariant, ProviderEntry,
  ResourceId, ResourceKind, ResourceStatus, SourceDefinition, SourceVariant, TrainingSetVariant,
};
use rookery_provider::{
  FeatureRow, MemoryOfflineStore, MemoryOnlineStore, OfflineResourceId, OfflineResourceType,
  OnlineStore, Provider, StaticProviderResolver, TrainingSetDef,
};
use rookery_runner::MemoryJobSpawner;

const OFFLINE_PROVIDER: &str = "offline";
const ONLINE_PROVIDER: &str = "online";

struct TestWorld {
  coordinator: Arc<Coordinator>,
  metadata: Arc<InMemoryMetadata>,
  coordination: InMemoryCoordination,
  offline: Arc<MemoryOfflineStore>,
  online: Arc<MemoryOnlineStore>,
}

fn test_config() -> CoordinatorConfig {
  CoordinatorConfig {
    max_job_attempts: 1,
    dependency_poll_interval: Duration::from_millis(10),
    dependency_timeout: Duration::from_millis(500),
    max_concurrent_jobs: 8,
    lock_ttl: Duration::from_secs(5),
  }
}

async fn world() -> TestWorld {
  let metadata = Arc::new(InMemoryMetadata::new());
  let coordination = InMemoryCoordination::new();
  let offline = Arc::new(MemoryOfflineStore::new());
  let online = Arc::new(MemoryOnlineStore::new());

  metadata
    .create_provider(ProviderEntry {
      name: OFFLINE_PROVIDER.to_string(),
      provider_type: "MEMORY_OFFLINE".to_string(),
      serialized_config: Vec::new(),
    })
    .await;
  metadata
    .create_provider(ProviderEntry {
      name: ONLINE_PROVIDER.to_string(),
      provider_type: "MEMORY_ONLINE".to_string(),
      serialized_config: Vec::new(),
    })
    .await;

  let resolver = Arc::new(
    StaticProviderResolver::new()
      .register(Provider::offline("MEMORY_OFFLINE", offline.clone()))
      .register(Provider::online("MEMORY_ONLINE", online.clone())),
  );
  let spawner = Arc::new(MemoryJobSpawner::new(resolver.clone()));
  let coordinator = Arc::new(Coordinator::new(
    metadata.clone(),
    Arc::new(coordination.clone()),
    resolver,
    spawner,
    test_config(),
  ));

  TestWorld {
    coordinator,
    metadata,
    coordination,
    offline,
    online,
  }
}

fn primary_source(name: &str, variant: &str, table: &str) -> SourceVariant {
  SourceVariant {
    name: name.to_string(),
    variant: variant.to_string(),
    definition: SourceDefinition::PrimaryTable {
      table_name: table.to_string(),
    },
    provider: OFFLINE_PROVIDER.to_string(),
    status: ResourceStatus::Created.as_str().to_string(),
  }
}

fn transformation_source(
  name: &str,
  variant: &str,
  query: &str,
  sources: &[NameVariant],
) -> SourceVariant {
  SourceVariant {
    name: name.to_string(),
    variant: variant.to_string(),
    definition: SourceDefinition::SqlTransformation {
      query: query.to_string(),
      sources: sources.to_vec(),
    },
    provider: OFFLINE_PROVIDER.to_string(),
    status: ResourceStatus::Created.as_str().to_string(),
  }
}

fn feature(name: &str, variant: &str, source: NameVariant) -> FeatureVariant {
  FeatureVariant {
    name: name.to_string(),
    variant: variant.to_string(),
    source,
    provider: ONLINE_PROVIDER.to_string(),
    entity: "user".to_string(),
    status: ResourceStatus::Created.as_str().to_string(),
  }
}

fn row(entity: &str, value: i64, secs: i64) -> FeatureRow {
  FeatureRow {
    entity: entity.to_string(),
    value: json!(value),
    timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
  }
}

async fn enqueue_and_execute(
  world: &TestWorld,
  id: &ResourceId,
) -> Result<(), CoordinatorError> {
  assert!(world.coordinator.enqueue_job(id).await.unwrap());
  world.coordinator.execute_job(&id.job_key()).await
}

async fn stored_status(world: &TestWorld, id: &ResourceId) -> String {
  world.metadata.stored_status(id).await.expect("resource exists")
}

#[tokio::test]
async fn registers_primary_source_end_to_end() {
  let world = world().await;
  world
    .metadata
    .create_source_variant(primary_source("raw", "v1", "raw_tbl"))
    .await;

  let id = ResourceId::new("raw", "v1", ResourceKind::Source);
  enqueue_and_execute(&world, &id).await.unwrap();

  let offline_id = OfflineResourceId::new("raw", "v1", OfflineResourceType::Primary);
  assert_eq!(
    world.offline.primary_source_table(&offline_id).as_deref(),
    Some("raw_tbl")
  );
  assert_eq!(stored_status(&world, &id).await, "READY");
  assert!(!world.coordinator.has_job(&id).await.unwrap());
}

#[tokio::test]
async fn transformation_resolves_dependencies_and_query() {
  let world = world().await;
  world
    .metadata
    .create_source_variant(primary_source("raw", "v1", "raw_tbl"))
    .await;
  let raw_id = ResourceId::new("raw", "v1", ResourceKind::Source);
  enqueue_and_execute(&world, &raw_id).await.unwrap();

  world
    .metadata
    .create_source_variant(transformation_source(
      "agg",
      "v1",
      "SELECT * FROM {{ raw.v1 }}",
      &[NameVariant::new("raw", "v1")],
    ))
    .await;
  let agg_id = ResourceId::new("agg", "v1", ResourceKind::Source);
  enqueue_and_execute(&world, &agg_id).await.unwrap();

  let target = OfflineResourceId::new("agg", "v1", OfflineResourceType::Transformation);
  assert_eq!(
    world.offline.transformation_query(&target).as_deref(),
    Some("SELECT * FROM rookery_primary__raw__v1")
  );
  assert_eq!(stored_status(&world, &agg_id).await, "READY");
}

#[tokio::test]
async fn transformation_aborts_when_dependency_failed() {
  let world = world().await;
  let mut failed = primary_source("raw", "v1", "raw_tbl");
  failed.status = ResourceStatus::Failed.as_str().to_string();
  world.metadata.create_source_variant(failed).await;

  world
    .metadata
    .create_source_variant(transformation_source(
      "agg",
      "v1",
      "SELECT * FROM {{ raw.v1 }}",
      &[NameVariant::new("raw", "v1")],
    ))
    .await;
  let agg_id = ResourceId::new("agg", "v1", ResourceKind::Source);
  let err = enqueue_and_execute(&world, &agg_id).await.unwrap_err();

  assert!(matches!(err, CoordinatorError::WorkflowExecution { .. }));
  assert_eq!(world.offline.transformation_calls(), 0);
  assert!(stored_status(&world, &agg_id).await.contains("failed"));
  // Failed jobs stay enqueued for re-discovery.
  assert!(world.coordinator.has_job(&agg_id).await.unwrap());
}

#[tokio::test]
async fn dependency_wait_times_out() {
  let world = world().await;
  // Never leaves CREATED, so the poll loop must give up.
  world
    .metadata
    .create_source_variant(primary_source("raw", "v1", "raw_tbl"))
    .await;
  world
    .metadata
    .create_source_variant(transformation_source(
      "agg",
      "v1",
      "SELECT * FROM {{ raw.v1 }}",
      &[NameVariant::new("raw", "v1")],
    ))
    .await;

  let agg_id = ResourceId::new("agg", "v1", ResourceKind::Source);
  enqueue_and_execute(&world, &agg_id).await.unwrap_err();

  assert_eq!(world.offline.transformation_calls(), 0);
  assert!(stored_status(&world, &agg_id).await.contains("not ready"));
}

#[tokio::test]
async fn feature_materialization_fails_when_source_not_ready() {
  let world = world().await;
  world
    .metadata
    .create_source_variant(primary_source("agg", "v1", "agg_tbl"))
    .await;
  world
    .metadata
    .create_feature_variant(feature("f", "v1", NameVariant::new("agg", "v1")))
    .await;

  let id = ResourceId::new("f", "v1", ResourceKind::Feature);
  enqueue_and_execute(&world, &id).await.unwrap_err();

  let status = stored_status(&world, &id).await;
  assert!(status.contains("not ready"), "status was: {status}");
  assert_ne!(status, "READY");
  assert!(world.online.is_empty());
  assert!(world.coordinator.has_job(&id).await.unwrap());
}

#[tokio::test]
async fn feature_workflow_is_noop_when_already_terminal() {
  let world = world().await;
  world
    .metadata
    .create_source_variant(primary_source("agg", "v1", "agg_tbl"))
    .await;
  let mut ready = feature("f", "v1", NameVariant::new("agg", "v1"));
  ready.status = ResourceStatus::Ready.as_str().to_string();
  world.metadata.create_feature_variant(ready).await;

  let id = ResourceId::new("f", "v1", ResourceKind::Feature);
  let err = enqueue_and_execute(&world, &id).await.unwrap_err();

  assert!(matches!(err, CoordinatorError::WorkflowExecution { .. }));
  assert!(world.online.is_empty());
  // A terminal status is never overwritten.
  assert_eq!(stored_status(&world, &id).await, "READY");
}

#[tokio::test]
async fn materializes_latest_values_per_entity() {
  let world = world().await;
  let mut source = primary_source("agg", "v1", "agg_tbl");
  source.status = ResourceStatus::Ready.as_str().to_string();
  world.metadata.create_source_variant(source).await;
  world
    .metadata
    .create_feature_variant(feature("f", "v1", NameVariant::new("agg", "v1")))
    .await;
  world.offline.seed_feature_rows(
    "f",
    "v1",
    vec![
      row("user-1", 1, 100),
      row("user-1", 5, 300),
      row("user-2", 2, 100),
      row("user-2", 8, 50),
    ],
  );

  let id = ResourceId::new("f", "v1", ResourceKind::Feature);
  enqueue_and_execute(&world, &id).await.unwrap();

  assert_eq!(world.online.get("f", "v1", "user-1").await.unwrap(), json!(5));
  assert_eq!(world.online.get("f", "v1", "user-2").await.unwrap(), json!(2));
  assert_eq!(stored_status(&world, &id).await, "READY");
  assert!(!world.coordinator.has_job(&id).await.unwrap());
}

#[tokio::test]
async fn creates_training_set_end_to_end() {
  let world = world().await;
  world
    .metadata
    .create_label_variant(LabelVariant {
      name: "churned".to_string(),
      variant: "v1".to_string(),
      source: NameVariant::new("agg", "v1"),
      status: ResourceStatus::Ready.as_str().to_string(),
    })
    .await;
  world
    .metadata
    .create_training_set_variant(TrainingSetVariant {
      name: "churn_model".to_string(),
      variant: "v1".to_string(),
      provider: OFFLINE_PROVIDER.to_string(),
      label: NameVariant::new("churned", "v1"),
      features: vec![NameVariant::new("f", "v1"), NameVariant::new("g", "v2")],
      status: ResourceStatus::Created.as_str().to_string(),
    })
    .await;

  let id = ResourceId::new("churn_model", "v1", ResourceKind::TrainingSet);
  enqueue_and_execute(&world, &id).await.unwrap();

  let ts_id = OfflineResourceId::new("churn_model", "v1", OfflineResourceType::TrainingSet);
  let def = world.offline.training_set(&ts_id).expect("training set created");
  assert_eq!(
    def.label,
    OfflineResourceId::new("churned", "v1", OfflineResourceType::Label)
  );
  assert_eq!(
    def.features,
    vec![
      OfflineResourceId::new("f", "v1", OfflineResourceType::Feature),
      OfflineResourceId::new("g", "v2", OfflineResourceType::Feature),
    ]
  );
  assert_eq!(stored_status(&world, &id).await, "READY");
}

#[tokio::test]
async fn existing_training_set_fails_the_workflow() {
  let world = world().await;
  world
    .metadata
    .create_training_set_variant(TrainingSetVariant {
      name: "dup".to_string(),
      variant: "v1".to_string(),
      provider: OFFLINE_PROVIDER.to_string(),
      label: NameVariant::new("churned", "v1"),
      features: vec![],
      status: ResourceStatus::Created.as_str().to_string(),
    })
    .await;
  world.offline.seed_training_set(TrainingSetDef {
    id: OfflineResourceId::new("dup", "v1", OfflineResourceType::TrainingSet),
    label: OfflineResourceId::new("churned", "v1", OfflineResourceType::Label),
    features: vec![],
  });

  let id = ResourceId::new("dup", "v1", ResourceKind::TrainingSet);
  enqueue_and_execute(&world, &id).await.unwrap_err();

  assert!(stored_status(&world, &id).await.contains("already exists"));
  assert!(world.coordinator.has_job(&id).await.unwrap());
}

#[tokio::test]
async fn exhausted_attempts_mark_resource_failed() {
  let world = world().await;
  world
    .metadata
    .create_source_variant(primary_source("raw", "v1", "raw_tbl"))
    .await;

  let id = ResourceId::new("raw", "v1", ResourceKind::Source);
  let job = CoordinatorJob {
    resource: id.clone(),
    attempts: 2,
  };
  world
    .coordination
    .put(&id.job_key(), &job.serialize().unwrap())
    .await
    .unwrap();

  world.coordinator.execute_job(&id.job_key()).await.unwrap();

  assert_eq!(stored_status(&world, &id).await, "FAILED");
  assert_eq!(world.offline.register_primary_calls(), 0);
  assert!(!world.coordinator.has_job(&id).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_executions_invoke_store_once() {
  let world = world().await;
  world
    .metadata
    .create_source_variant(primary_source("raw", "v1", "raw_tbl"))
    .await;

  let id = ResourceId::new("raw", "v1", ResourceKind::Source);
  assert!(world.coordinator.enqueue_job(&id).await.unwrap());

  let mut handles = Vec::new();
  for _ in 0..4 {
    let coordinator = world.coordinator.clone();
    let key = id.job_key();
    handles.push(tokio::spawn(
      async move { coordinator.execute_job(&key).await },
    ));
  }

  let mut successes = 0;
  for handle in handles {
    match handle.await.unwrap() {
      Ok(()) => successes += 1,
      // Losers find the record already consumed.
      Err(CoordinatorError::JobNotFound { .. }) => {}
      Err(other) => panic!("unexpected error: {other}"),
    }
  }

  assert_eq!(successes, 1);
  assert_eq!(world.offline.register_primary_calls(), 1);
  assert_eq!(stored_status(&world, &id).await, "READY");
}

#[tokio::test]
async fn watcher_executes_jobs_from_scan_and_change_feed() {
  let world = world().await;
  world
    .metadata
    .create_source_variant(primary_source("before", "v1", "tbl_a"))
    .await;
  world
    .metadata
    .create_source_variant(primary_source("after", "v1", "tbl_b"))
    .await;

  let before = ResourceId::new("before", "v1", ResourceKind::Source);
  let after = ResourceId::new("after", "v1", ResourceKind::Source);

  // Enqueued before the watcher starts: picked up by the initial scan.
  assert!(world.coordinator.enqueue_job(&before).await.unwrap());

  let cancel = CancellationToken::new();
  let coordinator = world.coordinator.clone();
  let watch_cancel = cancel.clone();
  let watcher =
    tokio::spawn(async move { coordinator.watch_for_new_jobs(watch_cancel).await });

  // Enqueued after: picked up by the change feed.
  tokio::time::sleep(Duration::from_millis(50)).await;
  assert!(world.coordinator.enqueue_job(&after).await.unwrap());

  for id in [&before, &after] {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
      if stored_status(&world, id).await == "READY" {
        break;
      }
      assert!(
        tokio::time::Instant::now() < deadline,
        "{id} never became READY"
      );
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
  }

  cancel.cancel();
  watcher.await.unwrap().unwrap();
}

#[tokio::test]
async fn duplicate_enqueue_is_skipped() {
  let world = world().await;
  let id = ResourceId::new("raw", "v1", ResourceKind::Source);
  assert!(world.coordinator.enqueue_job(&id).await.unwrap());
  assert!(!world.coordinator.enqueue_job(&id).await.unwrap());
}

#[tokio::test]
async fn failed_attempt_is_recorded_on_the_job_record() {
  let world = world().await;
  // Source with an empty table name fails the primary workflow.
  world
    .metadata
    .create_source_variant(primary_source("raw", "v1", ""))
    .await;

  let id = ResourceId::new("raw", "v1", ResourceKind::Source);
  enqueue_and_execute(&world, &id).await.unwrap_err();

  let records = world.coordination.list_prefix(&id.job_key()).await.unwrap();
  assert_eq!(records.len(), 1);
  let job = CoordinatorJob::deserialize(&records[0].1).unwrap();
  assert_eq!(job.attempts, 1);
  assert!(stored_status(&world, &id).await.contains("no source table name"));
}
