//! Store-side resource identity and the ephemeral task configs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a store-side resource is backing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineResourceType {
  Primary,
  Transformation,
  Feature,
  Label,
  TrainingSet,
}

/// Identity of a resource inside a backing store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OfflineResourceId {
  pub name: String,
  pub variant: String,
  pub resource_type: OfflineResourceType,
}

impl OfflineResourceId {
  pub fn new(
    name: impl Into<String>,
    variant: impl Into<String>,
    resource_type: OfflineResourceType,
  ) -> Self {
    Self {
      name: name.into(),
      variant: variant.into(),
      resource_type,
    }
  }

  /// The table name backing this resource in the store.
  pub fn table_name(&self) -> String {
    let prefix = match self.resource_type {
      OfflineResourceType::Primary => "primary",
      OfflineResourceType::Transformation => "transformation",
      OfflineResourceType::Feature => "feature",
      OfflineResourceType::Label => "label",
      OfflineResourceType::TrainingSet => "trainingset",
    };
    format!("rookery_{}__{}__{}", prefix, self.name, self.variant)
  }
}

/// What to run to produce a transformation table.
///
/// `query` has already had every `{{ name.variant }}` escape resolved to a
/// concrete table name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationConfig {
  pub target: OfflineResourceId,
  pub query: String,
}

/// A training set: one label joined against an ordered feature list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSetDef {
  pub id: OfflineResourceId,
  pub label: OfflineResourceId,
  pub features: Vec<OfflineResourceId>,
}

/// One entity's feature value at a point in time, as read from an offline
/// store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
  pub entity: String,
  pub value: serde_json::Value,
  pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn table_names_are_namespaced_by_resource_type() {
    let primary = OfflineResourceId::new("raw", "v1", OfflineResourceType::Primary);
    assert_eq!(primary.table_name(), "rookery_primary__raw__v1");

    let transformation = OfflineResourceId::new("agg", "v1", OfflineResourceType::Transformation);
    assert_eq!(transformation.table_name(), "rookery_transformation__agg__v1");
  }
}
