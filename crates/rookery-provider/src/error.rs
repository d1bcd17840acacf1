//! Provider errors.

/// Errors from provider resolution and store operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
  /// The provider type is not registered with the resolver.
  #[error("unknown provider type '{provider_type}'")]
  UnknownType { provider_type: String },

  /// The provider exists but does not expose the requested capability.
  #[error("provider type '{provider_type}' has no {capability} capability")]
  Capability {
    provider_type: String,
    capability: &'static str,
  },

  /// The serialized provider config could not be parsed. Raised by the
  /// concrete store integrations behind [`ProviderResolver`](crate::ProviderResolver), which live
  /// outside this crate; the static resolver never reads the config.
  #[error("invalid provider config: {message}")]
  Config { message: String },

  /// The requested table or resource does not exist in the store.
  #[error("{what} '{name}' not found in store")]
  NotFound { what: &'static str, name: String },

  /// The resource already exists in the store.
  #[error("{what} '{name}' already exists in store")]
  AlreadyExists { what: &'static str, name: String },

  /// The backing store failed. Raised by the concrete SQL store
  /// integrations; the in-memory stores cannot fail this way.
  #[error("store error: {message}")]
  Storage { message: String },
}
