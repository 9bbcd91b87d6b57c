//! Transactional application with reporting and resolution
//!
//! Everything a changeset does happens inside one `BEGIN IMMEDIATE`
//! transaction, so the target either receives the whole changeset (minus
//! omitted records) or nothing at all.

use std::io::Write;
use std::rc::Rc;

use tracing::{error, info};

use crate::config::ApplyConfig;
use crate::db::Database;
use crate::error::Result;
use crate::schema::{SchemaCache, TableInfo};
use crate::session::apply::{apply_changeset, ApplyStats};
use crate::session::policy::ConflictPolicy;
use crate::session::report::write_report;

/// How a successful run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finish {
    Committed,
    /// Dry run: everything was applied, then rolled back
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub finish: Finish,
    pub stats: ApplyStats,
}

impl ApplyOutcome {
    /// Final status line
    pub fn summary(&self) -> &'static str {
        match self.finish {
            Finish::Committed => "changeset applied",
            Finish::RolledBack => "dry-run complete (rolled back)",
        }
    }
}

/// Applies changesets to one database, reporting each conflict to `out`
/// and letting `policy` resolve it
pub struct Applier<'db, P, W> {
    db: &'db Database,
    policy: P,
    out: W,
    config: ApplyConfig,
    schema: SchemaCache,
}

impl<'db, P: ConflictPolicy, W: Write> Applier<'db, P, W> {
    pub fn new(db: &'db Database, policy: P, out: W) -> Self {
        Self {
            db,
            policy,
            out,
            config: ApplyConfig::default(),
            schema: SchemaCache::new(),
        }
    }

    pub fn with_config(mut self, config: ApplyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn into_parts(self) -> (P, W) {
        (self.policy, self.out)
    }

    /// Apply `changeset` in a single transaction.
    ///
    /// Commits unless this is a dry run; any failure, including an Abort
    /// resolution, rolls everything back and is returned as an error.
    pub fn apply(&mut self, changeset: &[u8]) -> Result<ApplyOutcome> {
        let Self {
            db,
            policy,
            out,
            config,
            schema,
        } = self;
        let db: &Database = db;
        let schema: &SchemaCache = schema;
        let config: &ApplyConfig = config;

        db.begin()?;
        let applied = (|| {
            if config.defer_foreign_keys {
                db.defer_foreign_keys()?;
            }
            let conn = db.connection();
            apply_changeset(conn, schema, changeset, |_| true, |event| {
                let info = match event.change() {
                    Some(change) => schema.table(conn, change.table()),
                    None => Rc::new(TableInfo::default()),
                };
                write_report(&mut *out, event, &info)?;
                policy.decide(event)
            })
        })();

        match applied {
            Ok(stats) if config.dry_run => {
                db.rollback()?;
                info!(records = stats.records, "dry run rolled back");
                Ok(ApplyOutcome {
                    finish: Finish::RolledBack,
                    stats,
                })
            }
            Ok(stats) => match db.commit() {
                Ok(()) => {
                    info!(records = stats.records, "committed");
                    Ok(ApplyOutcome {
                        finish: Finish::Committed,
                        stats,
                    })
                }
                Err(err) => {
                    error!(error = %err, "commit failed");
                    db.rollback_quietly();
                    Err(err)
                }
            },
            Err(err) => {
                info!(error = %err, "rolling back");
                db.rollback_quietly();
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::session::conflict::ConflictAction;
    use crate::session::policy::{FixedPolicy, ScriptedPolicy};
    use crate::session::writer::ChangesetWriter;
    use crate::types::Value;

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.enable_foreign_keys().unwrap();
        db.connection()
            .execute_batch(
                "CREATE TABLE parent(id INTEGER PRIMARY KEY);
                 CREATE TABLE child(id INTEGER PRIMARY KEY, pid REFERENCES parent(id));
                 INSERT INTO parent VALUES(1);",
            )
            .unwrap();
        db
    }

    fn count(db: &Database, table: &str) -> i64 {
        db.connection()
            .query_row(&format!("SELECT count(*) FROM {}", table), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_child_before_parent_is_not_a_conflict() {
        let db = db();
        let mut writer = ChangesetWriter::new();
        writer
            .table("child", &[true, false])
            .unwrap()
            .insert(&[Value::Integer(1), Value::Integer(2)])
            .unwrap();
        writer
            .table("parent", &[true])
            .unwrap()
            .insert(&[Value::Integer(2)])
            .unwrap();
        let mut applier = Applier::new(&db, ScriptedPolicy::default(), Vec::new());
        let outcome = applier.apply(&writer.finish()).unwrap();
        assert_eq!(outcome.finish, Finish::Committed);
        assert_eq!(outcome.stats.applied, 2);
        assert_eq!(count(&db, "child"), 1);
        let (policy, out) = applier.into_parts();
        assert!(policy.seen().is_empty());
        assert!(out.is_empty());
    }

    #[test]
    fn test_dangling_foreign_key_omit_then_commit_fails() {
        let db = db();
        let mut writer = ChangesetWriter::new();
        writer
            .table("child", &[true, false])
            .unwrap()
            .insert(&[Value::Integer(1), Value::Integer(99)])
            .unwrap();
        let mut applier = Applier::new(&db, FixedPolicy::new(ConflictAction::Omit), Vec::new());
        let err = applier.apply(&writer.finish()).unwrap_err();
        assert_eq!(err.code, ErrorCode::Constraint);
        assert!(err.to_string().starts_with("COMMIT: "));
        assert!(!db.in_transaction());
        assert_eq!(count(&db, "child"), 0);

        let (_, out) = applier.into_parts();
        let report = String::from_utf8(out).unwrap();
        assert!(report.contains("=== Conflict: FOREIGN_KEY | 1 violation(s) ==="));
        assert!(report.contains("child rowid=1 -> parent (fk 0)"));
    }

    #[test]
    fn test_dry_run_rolls_back() {
        let db = db();
        let mut writer = ChangesetWriter::new();
        writer
            .table("parent", &[true])
            .unwrap()
            .insert(&[Value::Integer(5)])
            .unwrap();
        let mut applier = Applier::new(&db, ScriptedPolicy::default(), Vec::new())
            .with_config(ApplyConfig::dry_run());
        let outcome = applier.apply(&writer.finish()).unwrap();
        assert_eq!(outcome.summary(), "dry-run complete (rolled back)");
        assert_eq!(outcome.stats.applied, 1);
        assert_eq!(count(&db, "parent"), 1);
        assert!(!db.in_transaction());
    }

    #[test]
    fn test_begin_failure_is_fatal() {
        let db = db();
        db.begin().unwrap();
        let mut applier = Applier::new(&db, ScriptedPolicy::default(), Vec::new());
        let err = applier.apply(&[]).unwrap_err();
        assert!(err.to_string().starts_with("BEGIN: "));
        db.rollback().unwrap();
    }
}
