//! Error types and Result aliases
//!
//! Errors carry a SQLite-style primary result code so the CLI can report
//! failures the same way the storage engine does (`rc=N (description)`).

/// Primary result codes (subset of SQLite's `SQLITE_*` codes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Generic error
    Error = 1,
    /// Internal logic error
    Internal = 2,
    /// Callback requested an abort
    Abort = 4,
    /// Database file is locked
    Busy = 5,
    /// Out of memory
    NoMem = 7,
    /// Attempt to write a readonly database
    ReadOnly = 8,
    /// Disk I/O error
    IoErr = 10,
    /// Malformed input (database image or changeset)
    Corrupt = 11,
    /// Unable to open the database file
    CantOpen = 14,
    /// Schema changed or incompatible
    Schema = 17,
    /// Constraint violation
    Constraint = 19,
    /// Data type mismatch
    Mismatch = 20,
    /// Library used incorrectly
    Misuse = 21,
    /// Column index out of range
    Range = 25,
    /// File is not a database
    NotADb = 26,
}

impl ErrorCode {
    /// Numeric result code
    pub fn code(self) -> i32 {
        self as i32
    }

    /// English description of the code (`sqlite3_errstr`)
    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::Error => "SQL logic error",
            ErrorCode::Internal => "internal error",
            ErrorCode::Abort => "query aborted",
            ErrorCode::Busy => "database is locked",
            ErrorCode::NoMem => "out of memory",
            ErrorCode::ReadOnly => "attempt to write a readonly database",
            ErrorCode::IoErr => "disk I/O error",
            ErrorCode::Corrupt => "database disk image is malformed",
            ErrorCode::CantOpen => "unable to open database file",
            ErrorCode::Schema => "database schema has changed",
            ErrorCode::Constraint => "constraint failed",
            ErrorCode::Mismatch => "datatype mismatch",
            ErrorCode::Misuse => "bad parameter or other API misuse",
            ErrorCode::Range => "column index out of range",
            ErrorCode::NotADb => "file is not a database",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Crate error: a result code plus an optional detail message
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", describe(.code, .message))]
pub struct Error {
    pub code: ErrorCode,
    pub message: Option<String>,
}

fn describe<'a>(code: &ErrorCode, message: &'a Option<String>) -> &'a str {
    match message {
        Some(message) => message,
        None => code.description(),
    }
}

impl Error {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: None,
        }
    }

    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    /// Malformed changeset at `offset`
    pub fn corrupt(offset: usize, message: impl Into<String>) -> Self {
        Self::with_message(
            ErrorCode::Corrupt,
            format!("corrupt changeset at offset {}: {}", offset, message.into()),
        )
    }

    pub fn is_constraint(&self) -> bool {
        self.code == ErrorCode::Constraint
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ffi::ErrorCode as Sqlite;

        let code = match &err {
            rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
                Sqlite::InternalMalfunction => ErrorCode::Internal,
                Sqlite::OperationAborted => ErrorCode::Abort,
                Sqlite::DatabaseBusy | Sqlite::DatabaseLocked => ErrorCode::Busy,
                Sqlite::OutOfMemory => ErrorCode::NoMem,
                Sqlite::ReadOnly => ErrorCode::ReadOnly,
                Sqlite::SystemIoFailure | Sqlite::DiskFull => ErrorCode::IoErr,
                Sqlite::DatabaseCorrupt => ErrorCode::Corrupt,
                Sqlite::CannotOpen => ErrorCode::CantOpen,
                Sqlite::SchemaChanged => ErrorCode::Schema,
                Sqlite::ConstraintViolation => ErrorCode::Constraint,
                Sqlite::TypeMismatch => ErrorCode::Mismatch,
                Sqlite::ApiMisuse => ErrorCode::Misuse,
                Sqlite::ParameterOutOfRange => ErrorCode::Range,
                Sqlite::NotADatabase => ErrorCode::NotADb,
                _ => ErrorCode::Error,
            },
            rusqlite::Error::InvalidColumnIndex(_) => ErrorCode::Range,
            rusqlite::Error::InvalidColumnType(..) => ErrorCode::Mismatch,
            _ => ErrorCode::Error,
        };
        Error::with_message(code, err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::with_message(ErrorCode::IoErr, err.to_string())
    }
}

/// Result type alias for changeset operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_falls_back_to_description() {
        let err = Error::new(ErrorCode::Abort);
        assert_eq!(err.to_string(), "query aborted");
        assert_eq!(err.code.code(), 4);

        let err = Error::with_message(ErrorCode::Corrupt, "bad op");
        assert_eq!(err.to_string(), "bad op");
    }

    #[test]
    fn test_constraint_failure_maps_to_constraint() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t(id INTEGER PRIMARY KEY); INSERT INTO t VALUES(1);")
            .unwrap();
        let err: Error = conn
            .execute("INSERT INTO t VALUES(1)", [])
            .unwrap_err()
            .into();
        assert!(err.is_constraint());
    }
}
