//! In-memory coordination store for tests.
//!
//! Emulates the backend contract inside one process: blocking lease-bound
//! locks with fencing tokens, guarded operations that fail once a lease has
//! lapsed, and prefix watches. Production deployments use
//! [`EtcdCoordination`](crate::EtcdCoordination); a process-local lock table
//! cannot coordinate multiple coordinator replicas.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::{CoordinationError, CoordinationStore, HeldLock, WatchEvent};

struct LockState {
  token: String,
  expires_at: Instant,
}

#[derive(Default)]
struct Inner {
  kv: BTreeMap<String, Vec<u8>>,
  locks: HashMap<String, LockState>,
  watchers: Vec<(String, mpsc::UnboundedSender<WatchEvent>)>,
}

impl Inner {
  /// Fan an event out to matching watchers. The senders are unbounded, so
  /// this never blocks while the state lock is held; backpressure lives in
  /// the per-watcher forwarding task.
  fn notify(&mut self, event: WatchEvent) {
    let key = match &event {
      WatchEvent::Created { key, .. } | WatchEvent::Updated { key } | WatchEvent::Deleted { key } => {
        key.clone()
      }
    };
    self
      .watchers
      .retain(|(prefix, tx)| !key.starts_with(prefix.as_str()) || tx.send(event.clone()).is_ok());
  }

  fn write(&mut self, key: &str, value: &[u8]) {
    let event = if self.kv.insert(key.to_string(), value.to_vec()).is_none() {
      WatchEvent::Created {
        key: key.to_string(),
        value: value.to_vec(),
      }
    } else {
      WatchEvent::Updated {
        key: key.to_string(),
      }
    };
    self.notify(event);
  }
}

/// An in-memory [`CoordinationStore`].
#[derive(Clone, Default)]
pub struct InMemoryCoordination {
  inner: Arc<Mutex<Inner>>,
}

impl InMemoryCoordination {
  pub fn new() -> Self {
    Self::default()
  }

  /// Force a held lock's lease to lapse, as if its holder stalled past the
  /// TTL. Test hook for the crash-recovery path.
  pub async fn expire_lock(&self, key: &str) {
    let mut inner = self.inner.lock().await;
    if let Some(state) = inner.locks.get_mut(key) {
      state.expires_at = Instant::now() - Duration::from_millis(1);
    }
  }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordination {
  async fn put(&self, key: &str, value: &[u8]) -> Result<(), CoordinationError> {
    let mut inner = self.inner.lock().await;
    inner.write(key, value);
    Ok(())
  }

  async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, CoordinationError> {
    let inner = self.inner.lock().await;
    Ok(
      inner
        .kv
        .range(prefix.to_string()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect(),
    )
  }

  async fn watch_prefix(
    &self,
    prefix: &str,
  ) -> Result<mpsc::Receiver<WatchEvent>, CoordinationError> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
      while let Some(event) = event_rx.recv().await {
        if tx.send(event).await.is_err() {
          return;
        }
      }
    });
    let mut inner = self.inner.lock().await;
    inner.watchers.push((prefix.to_string(), event_tx));
    Ok(rx)
  }

  async fn lock(&self, key: &str, ttl: Duration) -> Result<Box<dyn HeldLock>, CoordinationError> {
    loop {
      {
        let mut inner = self.inner.lock().await;
        let free = match inner.locks.get(key) {
          Some(state) => state.expires_at <= Instant::now(),
          None => true,
        };
        if free {
          let token = Uuid::new_v4().to_string();
          inner.locks.insert(
            key.to_string(),
            LockState {
              token: token.clone(),
              expires_at: Instant::now() + ttl,
            },
          );
          return Ok(Box::new(MemoryLock {
            inner: self.inner.clone(),
            key: key.to_string(),
            token,
            ttl,
          }));
        }
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
  }
}

/// A held in-memory lock, identified by a fencing token.
struct MemoryLock {
  inner: Arc<Mutex<Inner>>,
  key: String,
  token: String,
  ttl: Duration,
}

impl MemoryLock {
  /// Verify ownership and renew the lease, as a live session would.
  fn check_owner(&self, inner: &mut Inner) -> Result<(), CoordinationError> {
    match inner.locks.get_mut(&self.key) {
      Some(state) if state.token == self.token && state.expires_at > Instant::now() => {
        state.expires_at = Instant::now() + self.ttl;
        Ok(())
      }
      _ => Err(CoordinationError::NotOwner {
        key: self.key.clone(),
      }),
    }
  }
}

#[async_trait]
impl HeldLock for MemoryLock {
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoordinationError> {
    let mut inner = self.inner.lock().await;
    self.check_owner(&mut inner)?;
    Ok(inner.kv.get(key).cloned())
  }

  async fn put(&self, key: &str, value: &[u8]) -> Result<(), CoordinationError> {
    let mut inner = self.inner.lock().await;
    self.check_owner(&mut inner)?;
    inner.write(key, value);
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<bool, CoordinationError> {
    let mut inner = self.inner.lock().await;
    self.check_owner(&mut inner)?;
    let existed = inner.kv.remove(key).is_some();
    if existed {
      inner.notify(WatchEvent::Deleted {
        key: key.to_string(),
      });
    }
    Ok(existed)
  }

  async fn release(&self) -> Result<(), CoordinationError> {
    let mut inner = self.inner.lock().await;
    if let Some(state) = inner.locks.get(&self.key) {
      if state.token == self.token {
        inner.locks.remove(&self.key);
      }
    }
    Ok(())
  }
}
