//! Changeset application (sqlite3changeset_apply)
//!
//! Records are replayed in stream order. A record whose target row is not in
//! the state the changeset expects becomes a conflict and is handed to the
//! caller's resolver, which answers Omit, Replace or Abort.
//!
//! | op     | row lookup            | conflict                         |
//! |--------|-----------------------|----------------------------------|
//! | INSERT | -                     | CONFLICT (key exists), CONSTRAINT |
//! | UPDATE | by PK, pre-image test | NOTFOUND, DATA, CONSTRAINT       |
//! | DELETE | by PK, pre-image test | NOTFOUND, DATA, CONSTRAINT       |
//!
//! Foreign keys are checked once after the last record.

use std::collections::HashSet;

use rusqlite::{params_from_iter, Connection};
use tracing::{debug, info, trace, warn};

use crate::db::{fk_violations, foreign_keys_enabled, quote_ident, with_savepoint};
use crate::error::{Error, ErrorCode, Result};
use crate::schema::{SchemaCache, TableInfo};
use crate::types::Value;

use super::changeset::{ChangeOp, ChangeRecord, ChangesetIter};
use super::conflict::{ConflictAction, ConflictEvent, ConflictType, FkViolation};

/// Counters for one application
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    /// Records decoded
    pub records: usize,
    /// Applied as recorded
    pub applied: usize,
    /// Skipped by an Omit resolution
    pub omitted: usize,
    /// Forced through by a Replace resolution
    pub replaced: usize,
    /// Filtered out or not matching the live table
    pub skipped: usize,
    /// Conflicts raised, including repeated ones for the same record
    pub conflicts: usize,
}

enum Flow {
    Continue,
    Abort,
}

/// Apply `changeset` to `conn`.
///
/// `filter` is asked once per record with the table name; records it rejects
/// are skipped. `conflict` resolves every conflict. Returning
/// [`ConflictAction::Abort`] stops at once with an `Abort` error; the caller
/// owns the transaction and is expected to roll back.
///
/// A Replace for a conflict kind that does not allow it is treated as Abort.
pub fn apply_changeset<F, C>(
    conn: &Connection,
    schema: &SchemaCache,
    changeset: &[u8],
    mut filter: F,
    mut conflict: C,
) -> Result<ApplyStats>
where
    F: FnMut(&str) -> bool,
    C: FnMut(&ConflictEvent<'_>) -> Result<ConflictAction>,
{
    let check_fks = foreign_keys_enabled(conn)?;
    let baseline: HashSet<FkViolation> = if check_fks {
        fk_violations(conn)?.into_iter().collect()
    } else {
        HashSet::new()
    };

    let mut stats = ApplyStats::default();
    for change in ChangesetIter::new(changeset) {
        let change = change?;
        stats.records += 1;

        if !filter(change.table()) {
            trace!(table = change.table(), "filtered out");
            stats.skipped += 1;
            continue;
        }
        let info = schema.table(conn, change.table());
        if let Err(reason) = info.check_compatible(&change) {
            warn!(
                table = change.table(),
                offset = change.offset(),
                %reason,
                "skipping change for incompatible table"
            );
            stats.skipped += 1;
            continue;
        }

        debug!(
            table = change.table(),
            op = change.op().name(),
            offset = change.offset(),
            "applying change"
        );
        let target = Target {
            conn,
            info: &info,
            change: &change,
        };
        if let Flow::Abort = apply_one(&target, &mut conflict, &mut stats)? {
            info!(table = change.table(), offset = change.offset(), "aborted by conflict resolution");
            return Err(aborted());
        }
    }

    if check_fks {
        let introduced: Vec<FkViolation> = fk_violations(conn)?
            .into_iter()
            .filter(|violation| !baseline.contains(violation))
            .collect();
        if !introduced.is_empty() {
            stats.conflicts += 1;
            let event = ConflictEvent::foreign_keys(&introduced);
            match resolve(&event, &mut conflict)? {
                ConflictAction::Abort => {
                    info!(violations = introduced.len(), "aborted on foreign key violations");
                    return Err(aborted());
                }
                _ => warn!(
                    violations = introduced.len(),
                    "keeping changes with unresolved foreign keys"
                ),
            }
        }
    }

    info!(
        records = stats.records,
        applied = stats.applied,
        omitted = stats.omitted,
        replaced = stats.replaced,
        skipped = stats.skipped,
        conflicts = stats.conflicts,
        "changeset replayed"
    );
    Ok(stats)
}

fn aborted() -> Error {
    Error::with_message(ErrorCode::Abort, "changeset application aborted")
}

/// Ask the resolver, refusing choices the conflict kind does not allow
fn resolve<C>(event: &ConflictEvent<'_>, conflict: &mut C) -> Result<ConflictAction>
where
    C: FnMut(&ConflictEvent<'_>) -> Result<ConflictAction>,
{
    let action = conflict(event)?;
    if event.choices().allows(action) {
        debug!(kind = %event.kind, %action, "conflict resolved");
        Ok(action)
    } else {
        warn!(kind = %event.kind, %action, "resolution not allowed, aborting");
        Ok(ConflictAction::Abort)
    }
}

fn apply_one<C>(target: &Target<'_, '_>, conflict: &mut C, stats: &mut ApplyStats) -> Result<Flow>
where
    C: FnMut(&ConflictEvent<'_>) -> Result<ConflictAction>,
{
    let change = target.change;
    let key = change.key()?;

    let (kind, current) = match change.op() {
        ChangeOp::Insert => match target.insert() {
            Ok(()) => {
                stats.applied += 1;
                return Ok(Flow::Continue);
            }
            Err(err) if err.is_constraint() => {
                let current = target.select_row(&key)?;
                let kind = if current.is_some() {
                    ConflictType::Conflict
                } else {
                    ConflictType::Constraint
                };
                (kind, current)
            }
            Err(err) => return Err(err),
        },
        ChangeOp::Update | ChangeOp::Delete => match target.select_row(&key)? {
            None => (ConflictType::NotFound, None),
            Some(current) if !target.preimage_matches(&current)? => (ConflictType::Data, Some(current)),
            Some(current) => {
                let written = match change.op() {
                    ChangeOp::Update => target.update(&key),
                    _ => target.delete(&key),
                };
                match written {
                    Ok(()) => {
                        stats.applied += 1;
                        return Ok(Flow::Continue);
                    }
                    Err(err) if err.is_constraint() => (ConflictType::Constraint, Some(current)),
                    Err(err) => return Err(err),
                }
            }
        },
    };

    let mut pending = (kind, current);
    loop {
        let (kind, current) = pending;
        stats.conflicts += 1;
        let event = ConflictEvent::row(kind, change, current.as_deref());
        match resolve(&event, conflict)? {
            ConflictAction::Omit => {
                stats.omitted += 1;
                return Ok(Flow::Continue);
            }
            ConflictAction::Abort => return Ok(Flow::Abort),
            ConflictAction::Replace => match target.replace(kind, &key) {
                Ok(()) => {
                    stats.replaced += 1;
                    return Ok(Flow::Continue);
                }
                Err(err) if err.is_constraint() => {
                    debug!(error = %err, "replace hit a constraint");
                    pending = (ConflictType::Constraint, target.select_row(&key)?);
                }
                Err(err) => return Err(err),
            },
        }
    }
}

/// One record bound to its live table
struct Target<'t, 'a> {
    conn: &'t Connection,
    info: &'t TableInfo,
    change: &'t ChangeRecord<'a>,
}

impl Target<'_, '_> {
    fn table(&self) -> String {
        quote_ident(self.change.table())
    }

    fn column(&self, i: usize) -> String {
        quote_ident(&self.info.columns[i])
    }

    /// `"a" IS ?n AND "b" IS ?n+1 ...`, numbering from `first`
    fn key_clause(&self, key: &[(usize, Value)], first: usize) -> String {
        key.iter()
            .enumerate()
            .map(|(n, (column, _))| format!("{} IS ?{}", self.column(*column), first + n))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Defined post-image values, by column
    fn new_values(&self) -> Result<Vec<(usize, Value)>> {
        let mut values = Vec::new();
        for i in 0..self.change.column_count() {
            if let Some(value) = self.change.new(i)? {
                values.push((i, value));
            }
        }
        Ok(values)
    }

    /// Current row for `key`, limited to the changeset's columns
    fn select_row(&self, key: &[(usize, Value)]) -> Result<Option<Vec<Value>>> {
        let n_col = self.change.column_count();
        let columns: Vec<String> = (0..n_col).map(|i| self.column(i)).collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            columns.join(", "),
            self.table(),
            self.key_clause(key, 1)
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let mut rows = stmt.query(params_from_iter(key.iter().map(|(_, value)| value)))?;
        match rows.next()? {
            Some(row) => {
                let mut values = Vec::with_capacity(n_col);
                for i in 0..n_col {
                    values.push(Value::from(row.get_ref(i)?));
                }
                Ok(Some(values))
            }
            None => Ok(None),
        }
    }

    /// Every defined old value equals the current one
    fn preimage_matches(&self, current: &[Value]) -> Result<bool> {
        for (i, current) in current.iter().enumerate() {
            if let Some(old) = self.change.old(i)? {
                if !old.matches(current) {
                    trace!(column = i, "pre-image differs");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn insert(&self) -> Result<()> {
        let values = self.new_values()?;
        let columns: Vec<String> = values.iter().map(|(i, _)| self.column(*i)).collect();
        let params: Vec<String> = (1..=values.len()).map(|n| format!("?{}", n)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table(),
            columns.join(", "),
            params.join(", ")
        );
        self.conn
            .prepare_cached(&sql)?
            .execute(params_from_iter(values.iter().map(|(_, value)| value)))?;
        Ok(())
    }

    /// Write the defined new values to the row at `key`
    fn update(&self, key: &[(usize, Value)]) -> Result<()> {
        let values = self.new_values()?;
        if values.is_empty() {
            return Ok(());
        }
        let assignments: Vec<String> = values
            .iter()
            .enumerate()
            .map(|(n, (i, _))| format!("{} = ?{}", self.column(*i), n + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            self.table(),
            assignments.join(", "),
            self.key_clause(key, values.len() + 1)
        );
        let params = values.iter().chain(key).map(|(_, value)| value);
        self.conn.prepare_cached(&sql)?.execute(params_from_iter(params))?;
        Ok(())
    }

    fn delete(&self, key: &[(usize, Value)]) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE {}", self.table(), self.key_clause(key, 1));
        self.conn
            .prepare_cached(&sql)?
            .execute(params_from_iter(key.iter().map(|(_, value)| value)))?;
        Ok(())
    }

    /// Force the change through after a Replace resolution
    fn replace(&self, kind: ConflictType, key: &[(usize, Value)]) -> Result<()> {
        match (kind, self.change.op()) {
            (ConflictType::Data, ChangeOp::Update) => self.update(key),
            (ConflictType::Data, ChangeOp::Delete) => self.delete(key),
            (ConflictType::Conflict, ChangeOp::Insert) => {
                with_savepoint(self.conn, "changeset_replace", || {
                    self.delete(key)?;
                    self.insert()
                })
            }
            (kind, op) => Err(Error::with_message(
                ErrorCode::Misuse,
                format!("cannot replace {} conflict on {}", kind, op.name()),
            )),
        }
    }
}
