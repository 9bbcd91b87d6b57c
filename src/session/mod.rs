//! SQLite session changesets: decoding, encoding, conflicts and application

pub mod apply;
pub mod changeset;
pub mod conflict;
pub mod policy;
pub mod report;
pub mod writer;

pub use apply::{apply_changeset, ApplyStats};
pub use changeset::{ChangeOp, ChangeRecord, ChangesetFormat, ChangesetIter};
pub use conflict::{Choices, ConflictAction, ConflictEvent, ConflictSubject, ConflictType, FkViolation};
pub use policy::{ConflictPolicy, FixedPolicy, InteractivePolicy, ScriptedPolicy};
pub use report::{render_report, write_report};
pub use writer::ChangesetWriter;
