//! Target database handle and transaction control

use std::path::Path;

use rusqlite::{Connection, OpenFlags};
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::session::conflict::FkViolation;

/// Connection to the database a changeset is applied to
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open an existing database read-write. The file is never created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path.as_ref(), flags)?;
        debug!(path = %path.as_ref().display(), "opened database");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// `PRAGMA foreign_keys = ON`
    pub fn enable_foreign_keys(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON")?;
        Ok(())
    }

    pub fn foreign_keys_enabled(&self) -> Result<bool> {
        foreign_keys_enabled(&self.conn)
    }

    /// `PRAGMA defer_foreign_keys = ON`, reset by the next COMMIT or ROLLBACK
    pub fn defer_foreign_keys(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA defer_foreign_keys = ON")?;
        Ok(())
    }

    /// `BEGIN IMMEDIATE`: take the write lock before anything is read
    pub fn begin(&self) -> Result<()> {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|err| prefixed("BEGIN", err))
    }

    pub fn commit(&self) -> Result<()> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|err| prefixed("COMMIT", err))
    }

    pub fn rollback(&self) -> Result<()> {
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|err| prefixed("ROLLBACK", err))
    }

    /// Roll back if a transaction is still open. Failures are logged.
    pub fn rollback_quietly(&self) {
        if !self.in_transaction() {
            return;
        }
        if let Err(err) = self.rollback() {
            error!(error = %err, "rollback failed");
        }
    }

    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }
}

fn prefixed(what: &str, err: rusqlite::Error) -> Error {
    let err = Error::from(err);
    let detail = err.to_string();
    Error::with_message(err.code, format!("{}: {}", what, detail))
}

/// Quote an identifier for use in SQL text
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn foreign_keys_enabled(conn: &Connection) -> Result<bool> {
    let on: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
    Ok(on != 0)
}

/// Every row of `PRAGMA foreign_key_check`
pub(crate) fn fk_violations(conn: &Connection) -> Result<Vec<FkViolation>> {
    let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
    let rows = stmt.query_map([], |row| {
        Ok(FkViolation {
            table: row.get(0)?,
            rowid: row.get(1)?,
            parent: row.get(2)?,
            fk_index: row.get(3)?,
        })
    })?;
    let mut violations = Vec::new();
    for row in rows {
        violations.push(row?);
    }
    Ok(violations)
}

/// Run `f` inside `SAVEPOINT name`, undoing its writes if it fails
pub(crate) fn with_savepoint<T>(
    conn: &Connection,
    name: &str,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let name = quote_ident(name);
    conn.execute_batch(&format!("SAVEPOINT {}", name))?;
    match f() {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {}", name))?;
            Ok(value)
        }
        Err(err) => {
            conn.execute_batch(&format!("ROLLBACK TO {0}; RELEASE {0}", name))?;
            Err(err)
        }
    }
}
