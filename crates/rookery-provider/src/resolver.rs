//! Provider capability resolution.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ProviderError;
use crate::{OfflineStore, OnlineStore};

/// A resolved provider: a handle to a backing store exposing zero or more
/// capabilities.
#[derive(Clone)]
pub struct Provider {
  provider_type: String,
  offline: Option<Arc<dyn OfflineStore>>,
  online: Option<Arc<dyn OnlineStore>>,
}

impl std::fmt::Debug for Provider {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Provider")
      .field("provider_type", &self.provider_type)
      .field("offline", &self.offline.is_some())
      .field("online", &self.online.is_some())
      .finish()
  }
}

impl Provider {
  pub fn offline(provider_type: impl Into<String>, store: Arc<dyn OfflineStore>) -> Self {
    Self {
      provider_type: provider_type.into(),
      offline: Some(store),
      online: None,
    }
  }

  pub fn online(provider_type: impl Into<String>, store: Arc<dyn OnlineStore>) -> Self {
    Self {
      provider_type: provider_type.into(),
      offline: None,
      online: Some(store),
    }
  }

  pub fn provider_type(&self) -> &str {
    &self.provider_type
  }

  /// The provider's offline capability, if it has one.
  pub fn as_offline_store(&self) -> Result<Arc<dyn OfflineStore>, ProviderError> {
    self
      .offline
      .clone()
      .ok_or_else(|| ProviderError::Capability {
        provider_type: self.provider_type.clone(),
        capability: "offline store",
      })
  }

  /// The provider's online capability, if it has one.
  pub fn as_online_store(&self) -> Result<Arc<dyn OnlineStore>, ProviderError> {
    self.online.clone().ok_or_else(|| ProviderError::Capability {
      provider_type: self.provider_type.clone(),
      capability: "online store",
    })
  }
}

/// Resolves a provider type plus serialized config into a [`Provider`].
///
/// This is the boundary to the concrete store integrations; the coordinator
/// only ever sees the capability traits.
pub trait ProviderResolver: Send + Sync {
  fn resolve(&self, provider_type: &str, serialized_config: &[u8])
  -> Result<Provider, ProviderError>;
}

/// A resolver over a fixed set of pre-built providers, keyed by type.
///
/// Used by tests and standalone mode, where the store instances are shared
/// with the harness so their effects can be observed.
#[derive(Default)]
pub struct StaticProviderResolver {
  providers: HashMap<String, Provider>,
}

impl StaticProviderResolver {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(mut self, provider: Provider) -> Self {
    self
      .providers
      .insert(provider.provider_type().to_string(), provider);
    self
  }
}

impl ProviderResolver for StaticProviderResolver {
  fn resolve(
    &self,
    provider_type: &str,
    _serialized_config: &[u8],
  ) -> Result<Provider, ProviderError> {
    self
      .providers
      .get(provider_type)
      .cloned()
      .ok_or_else(|| ProviderError::UnknownType {
        provider_type: provider_type.to_string(),
      })
  }
}
