//! Knowledge lifecycle coordination for a code repository.
//!
//! Captured facts land in an intake queue, get reconciled into a markdown
//! knowledge store, are periodically audited against the codebase, and any
//! judgment calls go through reviews that a human answers and the applier
//! carries out.

pub mod apply;
pub mod audit;
pub mod category;
mod config;
pub mod coordinator;
pub mod error;
pub mod index;
pub mod lock;
pub mod queue;
pub mod reasoning;
pub mod reconcile;
pub mod store;
#[cfg(test)]
mod test_support;
pub mod util;

pub use apply::{Applier, ApplyReport, Clarification};
pub use audit::{Auditor, SkipReason, SweepOutcome, SweepReport};
pub use config::{
    config_schema_json, load_config, parse_config, AuditConfig, Config, IntakeConfig, PathsConfig,
    ReasoningConfig, ReasoningSettings, Settings, DEFAULT_AUDIT_CONCURRENCY,
    DEFAULT_STALE_PROCESSING_SECS, MAX_AUDIT_CONCURRENCY,
};
pub use coordinator::{
    AuditSpawner, CaptureRequest, Coordinator, DetachedSpawner, DrainTrigger, GitRevisionProbe,
    RevisionProbe, TriggerReport,
};
pub use error::{CaptureError, ReasoningError, StoreError};
pub use reasoning::{CommandReasoner, ReasoningFunction, ReasoningRequest, ReasoningResponse};
pub use reconcile::{DrainReport, Reconciler};
pub use store::{KnowledgeEntry, KnowledgeStore};
