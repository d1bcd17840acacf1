//! etcd-backed coordination store.

use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{
  Client, Compare, CompareOp, EventType, GetOptions, LockOptions, Txn, TxnOp, TxnOpResponse,
  WatchOptions,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{CoordinationError, CoordinationStore, HeldLock, WatchEvent};

impl From<etcd_client::Error> for CoordinationError {
  fn from(err: etcd_client::Error) -> Self {
    Self::Backend {
      message: err.to_string(),
    }
  }
}

/// [`CoordinationStore`] backed by an etcd cluster.
///
/// The client is cheap to clone; every operation works on its own clone so
/// the store can be shared behind an `Arc`.
#[derive(Clone)]
pub struct EtcdCoordination {
  client: Client,
}

impl EtcdCoordination {
  /// Connect to the given etcd endpoints.
  pub async fn connect(endpoints: &[String]) -> Result<Self, CoordinationError> {
    let client = Client::connect(endpoints, None).await?;
    Ok(Self { client })
  }
}

#[async_trait]
impl CoordinationStore for EtcdCoordination {
  async fn put(&self, key: &str, value: &[u8]) -> Result<(), CoordinationError> {
    let mut client = self.client.clone();
    client.put(key, value, None).await?;
    Ok(())
  }

  async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, CoordinationError> {
    let mut client = self.client.clone();
    let resp = client
      .get(prefix, Some(GetOptions::new().with_prefix()))
      .await?;
    resp
      .kvs()
      .iter()
      .map(|kv| {
        let key = kv
          .key_str()
          .map_err(|e| CoordinationError::Backend {
            message: format!("non-utf8 key: {e}"),
          })?
          .to_string();
        Ok((key, kv.value().to_vec()))
      })
      .collect()
  }

  async fn watch_prefix(
    &self,
    prefix: &str,
  ) -> Result<mpsc::Receiver<WatchEvent>, CoordinationError> {
    let mut client = self.client.clone();
    let (watcher, mut stream) = client
      .watch(prefix, Some(WatchOptions::new().with_prefix()))
      .await?;
    let (tx, rx) = mpsc::channel(64);
    let prefix = prefix.to_string();

    tokio::spawn(async move {
      // Dropping the watcher cancels the subscription, so it lives here.
      let _watcher = watcher;
      loop {
        let resp = match stream.message().await {
          Ok(Some(resp)) => resp,
          Ok(None) => {
            warn!(prefix = %prefix, "watch_stream_ended");
            break;
          }
          Err(e) => {
            warn!(prefix = %prefix, error = %e, "watch_stream_failed");
            break;
          }
        };
        for event in resp.events() {
          let Some(kv) = event.kv() else { continue };
          let Ok(key) = kv.key_str() else { continue };
          let watch_event = match event.event_type() {
            EventType::Put if kv.create_revision() == kv.mod_revision() => WatchEvent::Created {
              key: key.to_string(),
              value: kv.value().to_vec(),
            },
            EventType::Put => WatchEvent::Updated {
              key: key.to_string(),
            },
            EventType::Delete => WatchEvent::Deleted {
              key: key.to_string(),
            },
          };
          if tx.send(watch_event).await.is_err() {
            return;
          }
        }
      }
      // Sender drops here; the receiver observes the closed stream.
    });

    Ok(rx)
  }

  async fn lock(&self, key: &str, ttl: Duration) -> Result<Box<dyn HeldLock>, CoordinationError> {
    let mut client = self.client.clone();

    let lease = client.lease_grant(ttl.as_secs().max(1) as i64, None).await?;
    let lease_id = lease.id();

    // Session: keep the lease alive until released. If this task dies with
    // the process, the lease expires and the lock frees itself.
    let keepalive_cancel = CancellationToken::new();
    let session_cancel = keepalive_cancel.clone();
    let mut session_client = self.client.clone();
    tokio::spawn(async move {
      let (mut keeper, mut responses) = match session_client.lease_keep_alive(lease_id).await {
        Ok(pair) => pair,
        Err(e) => {
          warn!(lease_id, error = %e, "lease_keepalive_failed");
          return;
        }
      };
      let mut tick = tokio::time::interval(ttl.div_f32(3.0).max(Duration::from_millis(100)));
      loop {
        tokio::select! {
          _ = session_cancel.cancelled() => return,
          _ = tick.tick() => {
            if let Err(e) = keeper.keep_alive().await {
              warn!(lease_id, error = %e, "lease_renewal_failed");
              return;
            }
            if let Ok(Some(resp)) = responses.message().await {
              if resp.ttl() <= 0 {
                warn!(lease_id, "lease_expired");
                return;
              }
            }
          }
        }
      }
    });

    let resp = client
      .lock(key, Some(LockOptions::new().with_lease(lease_id)))
      .await
      .map_err(|e| {
        keepalive_cancel.cancel();
        CoordinationError::LockAcquisition {
          key: key.to_string(),
          message: e.to_string(),
        }
      })?;

    debug!(key = %key, lease_id, "lock_acquired");
    Ok(Box::new(EtcdLock {
      client: self.client.clone(),
      name: key.to_string(),
      owner_key: resp.key().to_vec(),
      lease_id,
      keepalive_cancel,
    }))
  }
}

/// A held etcd mutex. `owner_key` is the session-unique key etcd created for
/// this holder; its continued existence is the ownership condition for every
/// guarded transaction.
struct EtcdLock {
  client: Client,
  name: String,
  owner_key: Vec<u8>,
  lease_id: i64,
  keepalive_cancel: CancellationToken,
}

impl EtcdLock {
  fn is_owner(&self) -> Compare {
    Compare::create_revision(self.owner_key.clone(), CompareOp::Greater, 0)
  }

  async fn guarded(&self, op: TxnOp) -> Result<TxnOpResponse, CoordinationError> {
    let mut client = self.client.clone();
    let txn = Txn::new().when(vec![self.is_owner()]).and_then(vec![op]);
    let resp = client.txn(txn).await?;
    if !resp.succeeded() {
      return Err(CoordinationError::NotOwner {
        key: self.name.clone(),
      });
    }
    resp
      .op_responses()
      .into_iter()
      .next()
      .ok_or_else(|| CoordinationError::Backend {
        message: "guarded transaction returned no responses".to_string(),
      })
  }
}

#[async_trait]
impl HeldLock for EtcdLock {
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoordinationError> {
    match self.guarded(TxnOp::get(key, None)).await? {
      TxnOpResponse::Get(resp) => Ok(resp.kvs().first().map(|kv| kv.value().to_vec())),
      _ => Err(CoordinationError::Backend {
        message: "unexpected response to guarded get".to_string(),
      }),
    }
  }

  async fn put(&self, key: &str, value: &[u8]) -> Result<(), CoordinationError> {
    match self.guarded(TxnOp::put(key, value, None)).await? {
      TxnOpResponse::Put(_) => Ok(()),
      _ => Err(CoordinationError::Backend {
        message: "unexpected response to guarded put".to_string(),
      }),
    }
  }

  async fn delete(&self, key: &str) -> Result<bool, CoordinationError> {
    match self.guarded(TxnOp::delete(key, None)).await? {
      TxnOpResponse::Delete(resp) => Ok(resp.deleted() > 0),
      _ => Err(CoordinationError::Backend {
        message: "unexpected response to guarded delete".to_string(),
      }),
    }
  }

  async fn release(&self) -> Result<(), CoordinationError> {
    self.keepalive_cancel.cancel();
    let mut client = self.client.clone();
    client
      .unlock(self.owner_key.clone())
      .await
      .map_err(|e| CoordinationError::ReleaseFailed {
        key: self.name.clone(),
        message: e.to_string(),
      })?;
    if let Err(e) = client.lease_revoke(self.lease_id).await {
      // The lock key is already gone; the lease will lapse on its own.
      warn!(lease_id = self.lease_id, error = %e, "lease_revoke_failed");
    }
    debug!(key = %self.name, "lock_released");
    Ok(())
  }
}
