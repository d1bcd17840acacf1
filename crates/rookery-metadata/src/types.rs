//! Core resource types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of a tracked resource.
///
/// The coordinator matches on this exhaustively when dispatching jobs, so
/// adding a kind here is a compile error until every dispatch site handles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
  Source,
  Feature,
  Label,
  TrainingSet,
  Entity,
  Provider,
}

impl ResourceKind {
  /// Stable identifier used in coordination-service keys.
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Source => "SOURCE_VARIANT",
      Self::Feature => "FEATURE_VARIANT",
      Self::Label => "LABEL_VARIANT",
      Self::TrainingSet => "TRAINING_SET_VARIANT",
      Self::Entity => "ENTITY",
      Self::Provider => "PROVIDER",
    }
  }
}

impl fmt::Display for ResourceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A name plus variant, identifying one version of a named resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NameVariant {
  pub name: String,
  pub variant: String,
}

impl NameVariant {
  pub fn new(name: impl Into<String>, variant: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      variant: variant.into(),
    }
  }
}

impl fmt::Display for NameVariant {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.name, self.variant)
  }
}

/// Fully qualified resource identity. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId {
  pub name: String,
  pub variant: String,
  pub kind: ResourceKind,
}

impl ResourceId {
  pub fn new(name: impl Into<String>, variant: impl Into<String>, kind: ResourceKind) -> Self {
    Self {
      name: name.into(),
      variant: variant.into(),
      kind,
    }
  }

  pub fn name_variant(&self) -> NameVariant {
    NameVariant::new(self.name.clone(), self.variant.clone())
  }
}

impl fmt::Display for ResourceId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}.{}", self.kind, self.name, self.variant)
  }
}

/// Resource lifecycle status.
///
/// The status field in metadata is stored as a string so that a workflow
/// failure can overwrite it with the diagnostic text of the error. Any
/// string that is not one of the four lifecycle values is therefore treated
/// as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceStatus {
  Created,
  Pending,
  Ready,
  Failed,
}

impl ResourceStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Created => "CREATED",
      Self::Pending => "PENDING",
      Self::Ready => "READY",
      Self::Failed => "FAILED",
    }
  }

  /// Parse a stored status string. Free-text error strings map to `Failed`.
  pub fn from_stored(raw: &str) -> Self {
    match raw {
      "CREATED" => Self::Created,
      "PENDING" => Self::Pending,
      "READY" => Self::Ready,
      _ => Self::Failed,
    }
  }

  /// True once the resource has reached a state no workflow may leave.
  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Ready | Self::Failed)
  }
}

impl fmt::Display for ResourceStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// What a source variant actually is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceDefinition {
  /// A SQL transformation over other sources, referenced in the query text
  /// as `{{ name.variant }}` escapes.
  SqlTransformation {
    query: String,
    sources: Vec<NameVariant>,
  },
  /// A registration of an existing table in the backing store.
  PrimaryTable { table_name: String },
}

/// A source variant as stored in metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceVariant {
  pub name: String,
  pub variant: String,
  pub definition: SourceDefinition,
  /// Name of the provider entry hosting this source's data.
  pub provider: String,
  pub status: String,
}

impl SourceVariant {
  pub fn name_variant(&self) -> NameVariant {
    NameVariant::new(self.name.clone(), self.variant.clone())
  }

  pub fn resource_id(&self) -> ResourceId {
    ResourceId::new(self.name.clone(), self.variant.clone(), ResourceKind::Source)
  }

  pub fn status(&self) -> ResourceStatus {
    ResourceStatus::from_stored(&self.status)
  }

  pub fn is_sql_transformation(&self) -> bool {
    matches!(self.definition, SourceDefinition::SqlTransformation { .. })
  }
}

/// A feature variant as stored in metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVariant {
  pub name: String,
  pub variant: String,
  /// The source this feature's values are computed from.
  pub source: NameVariant,
  /// Name of the provider entry hosting the online store.
  pub provider: String,
  pub entity: String,
  pub status: String,
}

impl FeatureVariant {
  pub fn resource_id(&self) -> ResourceId {
    ResourceId::new(
      self.name.clone(),
      self.variant.clone(),
      ResourceKind::Feature,
    )
  }

  pub fn status(&self) -> ResourceStatus {
    ResourceStatus::from_stored(&self.status)
  }
}

/// A label variant as stored in metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelVariant {
  pub name: String,
  pub variant: String,
  pub source: NameVariant,
  pub status: String,
}

impl LabelVariant {
  pub fn name_variant(&self) -> NameVariant {
    NameVariant::new(self.name.clone(), self.variant.clone())
  }
}

/// A training set variant as stored in metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSetVariant {
  pub name: String,
  pub variant: String,
  /// Name of the provider entry hosting the output training set.
  pub provider: String,
  pub label: NameVariant,
  pub features: Vec<NameVariant>,
  pub status: String,
}

impl TrainingSetVariant {
  pub fn resource_id(&self) -> ResourceId {
    ResourceId::new(
      self.name.clone(),
      self.variant.clone(),
      ResourceKind::TrainingSet,
    )
  }

  pub fn status(&self) -> ResourceStatus {
    ResourceStatus::from_stored(&self.status)
  }
}

/// A registered provider: a named backing store plus its serialized config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEntry {
  pub name: String,
  pub provider_type: String,
  pub serialized_config: Vec<u8>,
}
