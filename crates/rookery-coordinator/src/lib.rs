//! Rookery Coordinator
//!
//! The control-plane core. Turns declarative resource registrations into
//! executed data-pipeline work: a prefix watch discovers durable job
//! records, a lease-bound distributed lock serializes each job across
//! coordinator replicas, and a workflow dispatcher runs the registration,
//! materialization, or training-set workflow for the job's resource and
//! manages its status lifecycle.
//!
//! Crash recovery comes from the coordination service, not from in-process
//! state: a crashed holder's lease expires and its job record, never
//! deleted on failure, is re-discovered by the next watcher pass.

mod config;
mod coordinator;
mod error;
mod template;

pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use error::CoordinatorError;
pub use template::{discover_sources, template_replace};
