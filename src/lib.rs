//! changeset-apply - apply SQLite session changesets with conflict resolution

pub mod applier;
pub mod config;
pub mod db;
pub mod error;
pub mod schema;
pub mod session;
pub mod types;
pub mod util;

// Re-export main public types
pub use applier::{ApplyOutcome, Applier, Finish};
pub use config::ApplyConfig;
pub use db::Database;
pub use error::{Error, ErrorCode, Result};
pub use schema::{SchemaCache, TableInfo};
pub use types::Value;

// Re-export session types
pub use session::{
    apply_changeset, ApplyStats, ChangeOp, ChangeRecord, ChangesetIter, ChangesetWriter,
    ConflictAction, ConflictEvent, ConflictPolicy, ConflictType, FixedPolicy, InteractivePolicy,
    ScriptedPolicy,
};
