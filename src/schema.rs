//! Per-table column layout, looked up once per table and memoized

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::session::changeset::ChangeRecord;

/// Column names and primary-key flags of one table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableInfo {
    pub columns: Vec<String>,
    pub pk: Vec<bool>,
}

impl TableInfo {
    /// `false` for unknown tables (no columns were found)
    pub fn exists(&self) -> bool {
        !self.columns.is_empty()
    }

    /// Name of column `i`, `col<i>` past the end of the known columns
    pub fn column_name(&self, i: usize) -> String {
        self.columns
            .get(i)
            .cloned()
            .unwrap_or_else(|| format!("col{}", i))
    }

    /// Check that `change` can be applied to this table.
    ///
    /// The table may have extra trailing columns, but the changeset's key
    /// layout has to match exactly. Records without a key cannot address a
    /// row and are rejected.
    pub fn check_compatible(&self, change: &ChangeRecord<'_>) -> std::result::Result<(), String> {
        if !self.exists() {
            return Err("no such table".to_string());
        }
        let n_col = change.column_count();
        if self.columns.len() < n_col {
            return Err(format!(
                "changeset has {} columns, table has {}",
                n_col,
                self.columns.len()
            ));
        }
        if !(0..n_col).any(|i| change.is_pk(i)) {
            return Err("changeset has no primary key columns".to_string());
        }
        let key_matches = self
            .pk
            .iter()
            .enumerate()
            .all(|(i, &is_pk)| is_pk == (i < n_col && change.is_pk(i)));
        if !key_matches {
            return Err("primary key layout differs".to_string());
        }
        Ok(())
    }
}

/// Memoized `PRAGMA table_info` lookups
///
/// Shared by the apply engine and the conflict reporter within one call
/// stack, hence the `RefCell`.
#[derive(Debug, Default)]
pub struct SchemaCache {
    tables: RefCell<HashMap<String, Rc<TableInfo>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layout of `table`. Unknown tables and introspection failures yield an
    /// empty entry, which is cached like any other.
    pub fn table(&self, conn: &Connection, table: &str) -> Rc<TableInfo> {
        if let Some(info) = self.tables.borrow().get(table) {
            return Rc::clone(info);
        }

        let info = match load_table_info(conn, table) {
            Ok(info) => {
                if !info.exists() {
                    warn!(table, "table not found in schema");
                }
                info
            }
            Err(err) => {
                warn!(table, error = %err, "table_info failed");
                TableInfo::default()
            }
        };
        debug!(table, columns = info.columns.len(), "cached table layout");
        let info = Rc::new(info);
        self.tables
            .borrow_mut()
            .insert(table.to_string(), Rc::clone(&info));
        info
    }

    /// Ordered column names of `table`, empty when it is unknown
    pub fn columns_of(&self, conn: &Connection, table: &str) -> Vec<String> {
        self.table(conn, table).columns.clone()
    }

    pub fn len(&self) -> usize {
        self.tables.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.borrow().is_empty()
    }
}

fn load_table_info(conn: &Connection, table: &str) -> rusqlite::Result<TableInfo> {
    let mut stmt = conn.prepare("SELECT name, pk FROM pragma_table_info(?1) ORDER BY cid")?;
    let rows = stmt.query_map([table], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? > 0))
    })?;
    let mut info = TableInfo::default();
    for row in rows {
        let (name, is_pk) = row?;
        info.columns.push(name);
        info.pk.push(is_pk);
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t(id INTEGER PRIMARY KEY, name TEXT);
             CREATE TABLE pair(a, b, c, PRIMARY KEY(b, a));
             CREATE TABLE \"odd \"\"name\"(x PRIMARY KEY);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_columns_and_pk_flags() {
        let conn = conn();
        let cache = SchemaCache::new();
        let info = cache.table(&conn, "t");
        assert_eq!(info.columns, vec!["id", "name"]);
        assert_eq!(info.pk, vec![true, false]);
        assert_eq!(cache.table(&conn, "pair").pk, vec![true, true, false]);
        assert_eq!(cache.columns_of(&conn, "odd \"name"), vec!["x"]);
    }

    #[test]
    fn test_lookups_are_memoized() {
        let conn = conn();
        let cache = SchemaCache::new();
        assert_eq!(cache.columns_of(&conn, "t").len(), 2);
        conn.execute_batch("DROP TABLE t").unwrap();
        assert_eq!(cache.columns_of(&conn, "t").len(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_unknown_table_is_empty() {
        let conn = conn();
        let cache = SchemaCache::new();
        let info = cache.table(&conn, "missing");
        assert!(!info.exists());
        assert_eq!(info.column_name(3), "col3");
        assert_eq!(cache.len(), 1);
    }
}
