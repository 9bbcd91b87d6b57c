//! Human-readable conflict reports
//!
//! ```text
//! === Conflict: DATA | UPDATE on t (indirect:0) ===
//!
//!   pk column               | DB                 | OLD                | NEW
//!   ----------------------------------------------------------------
//!   *  id                   | 1                  | 1                  | -
//!      name                 | "a"                | "b"                | "c"
//! ```

use std::io::Write;

use crate::error::Result;
use crate::schema::TableInfo;
use crate::types::render;

use super::conflict::{ConflictEvent, ConflictSubject, FkViolation};

const RULE_WIDTH: usize = 64;

/// Render `event` as text, naming columns from `info`
pub fn render_report(event: &ConflictEvent<'_>, info: &TableInfo) -> Result<String> {
    let mut text = String::new();
    match event.subject {
        ConflictSubject::Row { change, .. } => {
            text.push_str(&format!(
                "\n=== Conflict: {} | {} on {} (indirect:{}) ===\n",
                event.kind.name(),
                change.op().name(),
                change.table(),
                u8::from(change.is_indirect())
            ));
            text.push_str(&format!(
                "\n  {:<2} {:<20} | {:<18} | {:<18} | {:<18}\n",
                "pk", "column", "DB", "OLD", "NEW"
            ));
            text.push_str(&format!("  {}\n", "-".repeat(RULE_WIDTH)));
            for i in 0..change.column_count() {
                let old = change.old(i)?;
                let new = change.new(i)?;
                text.push_str(&format!(
                    "  {:<2} {:<20} | {:<18} | {:<18} | {:<18}\n",
                    if change.is_pk(i) { "*" } else { "" },
                    info.column_name(i),
                    render(event.current(i)),
                    render(old.as_ref()),
                    render(new.as_ref())
                ));
            }
        }
        ConflictSubject::ForeignKeys(violations) => {
            text.push_str(&format!(
                "\n=== Conflict: {} | {} violation(s) ===\n",
                event.kind.name(),
                violations.len()
            ));
            for violation in violations {
                text.push_str(&format!("  {}\n", describe_violation(violation)));
            }
        }
    }
    Ok(text)
}

/// Write the report for `event` to `out`
pub fn write_report<W: Write>(out: &mut W, event: &ConflictEvent<'_>, info: &TableInfo) -> Result<()> {
    let text = render_report(event, info)?;
    out.write_all(text.as_bytes())?;
    out.flush()?;
    Ok(())
}

fn describe_violation(violation: &FkViolation) -> String {
    let rowid = violation
        .rowid
        .map_or_else(|| "-".to_string(), |rowid| rowid.to_string());
    format!(
        "{} rowid={} -> {} (fk {})",
        violation.table, rowid, violation.parent, violation.fk_index
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::changeset::ChangesetIter;
    use crate::session::conflict::ConflictType;
    use crate::session::writer::ChangesetWriter;
    use crate::types::Value;

    #[test]
    fn test_data_conflict_report() {
        let mut writer = ChangesetWriter::new();
        writer
            .table("t", &[true, false])
            .unwrap()
            .update(
                &[Some(Value::Integer(1)), Some(Value::from("b"))],
                &[None, Some(Value::from("c"))],
            )
            .unwrap();
        let data = writer.finish();
        let change = ChangesetIter::new(&data).next().unwrap().unwrap();
        let current = vec![Value::Integer(1), Value::from("a")];
        let event = ConflictEvent::row(ConflictType::Data, &change, Some(&current));

        let info = TableInfo {
            columns: vec!["id".to_string()],
            pk: vec![true],
        };
        let text = render_report(&event, &info).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "=== Conflict: DATA | UPDATE on t (indirect:0) ===");
        assert_eq!(
            lines[3],
            "  pk column               | DB                 | OLD                | NEW               "
        );
        assert_eq!(lines[4], format!("  {}", "-".repeat(64)));
        assert_eq!(
            lines[5],
            "  *  id                   | 1                  | 1                  | -                 "
        );
        assert_eq!(
            lines[6],
            "     col1                 | \"a\"                | \"b\"                | \"c\"               "
        );
    }

    #[test]
    fn test_not_found_renders_absent_current_values() {
        let mut writer = ChangesetWriter::new();
        writer
            .table("t", &[true])
            .unwrap()
            .indirect(true)
            .delete(&[Value::Integer(9)])
            .unwrap();
        let data = writer.finish();
        let change = ChangesetIter::new(&data).next().unwrap().unwrap();
        let event = ConflictEvent::row(ConflictType::NotFound, &change, None);

        let text = render_report(&event, &TableInfo::default()).unwrap();
        assert!(text.contains("=== Conflict: NOTFOUND | DELETE on t (indirect:1) ==="));
        assert!(text.contains("  *  col0                 | -                  | 9                  | -"));
    }

    #[test]
    fn test_foreign_key_report() {
        let violations = vec![
            FkViolation {
                table: "child".into(),
                rowid: Some(4),
                parent: "parent".into(),
                fk_index: 0,
            },
            FkViolation {
                table: "pairs".into(),
                rowid: None,
                parent: "parent".into(),
                fk_index: 1,
            },
        ];
        let event = ConflictEvent::foreign_keys(&violations);
        let mut out = Vec::new();
        write_report(&mut out, &event, &TableInfo::default()).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "\n=== Conflict: FOREIGN_KEY | 2 violation(s) ===\n  child rowid=4 -> parent (fk 0)\n  pairs rowid=- -> parent (fk 1)\n"
        );
    }
}
