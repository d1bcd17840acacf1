//! Rookery Metadata
//!
//! This crate provides the resource model shared across the control plane:
//! named, versioned resources (sources, features, labels, training sets),
//! their lifecycle status, and the durable job record that drives the
//! coordinator.
//!
//! The [`MetadataClient`] trait is the contract against the authoritative
//! metadata service. The coordinator only consumes it; the service itself
//! lives behind the gateway. [`InMemoryMetadata`] implements the contract
//! for tests and standalone mode.

mod client;
mod job;
mod memory;
mod types;

pub use client::{MetadataClient, MetadataError};
pub use job::{CoordinatorJob, JOB_PREFIX, lock_key};
pub use memory::InMemoryMetadata;
pub use types::{
  FeatureVariant, LabelVariant, NameVariant, ProviderEntry, ResourceId, ResourceKind,
  ResourceStatus, SourceDefinition, SourceVariant, TrainingSetVariant,
};
