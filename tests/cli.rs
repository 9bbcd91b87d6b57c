//! Drives the `changeset-apply` binary

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use changeset_apply::{ChangesetWriter, Value};
use tempfile::{tempdir, TempDir};

struct Fixture {
    _dir: TempDir,
    db: PathBuf,
    changeset: PathBuf,
}

/// Target holding (1, 'a') and a changeset that expects 'b' and writes 'c'
fn fixture() -> Fixture {
    let dir = tempdir().unwrap();
    let db = dir.path().join("target.db");
    rusqlite::Connection::open(&db)
        .unwrap()
        .execute_batch(
            "CREATE TABLE t(id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO t VALUES(1, 'a');",
        )
        .unwrap();

    let mut writer = ChangesetWriter::new();
    writer
        .table("t", &[true, false])
        .unwrap()
        .update(
            &[Some(Value::Integer(1)), Some(Value::from("b"))],
            &[None, Some(Value::from("c"))],
        )
        .unwrap();
    let changeset = dir.path().join("change.bin");
    std::fs::write(&changeset, writer.finish()).unwrap();

    Fixture {
        _dir: dir,
        db,
        changeset,
    }
}

fn run(args: &[&Path], extra: &[&str], stdin: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_changeset-apply"))
        .args(args)
        .args(extra)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(stdin.as_bytes())
        .unwrap();
    child.wait_with_output().unwrap()
}

fn name_of_row_1(db: &Path) -> String {
    rusqlite::Connection::open(db)
        .unwrap()
        .query_row("SELECT name FROM t WHERE id = 1", [], |row| row.get(0))
        .unwrap()
}

#[test]
fn test_interactive_omit() {
    let f = fixture();
    let output = run(&[&f.db, &f.changeset], &[], "o\n");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(output.status.code(), Some(0));
    assert!(stdout.contains("=== Conflict: DATA | UPDATE on t (indirect:0) ==="));
    assert!(stdout.contains("Choose: [o]mit, [r]eplace, [a]bort > "));
    assert!(stdout.ends_with("changeset applied\n"));
    assert_eq!(name_of_row_1(&f.db), "a");
}

#[test]
fn test_interactive_replace_after_invalid_choice() {
    let f = fixture();
    let output = run(&[&f.db, &f.changeset], &[], "\nx\nR\n");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout.matches("Invalid choice.").count(), 1);
    assert_eq!(name_of_row_1(&f.db), "c");
}

#[test]
fn test_interactive_abort() {
    let f = fixture();
    let output = run(&[&f.db, &f.changeset], &[], "a\n");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr.contains("apply: rc=4 (query aborted)"));
    assert_eq!(name_of_row_1(&f.db), "a");
}

#[test]
fn test_end_of_input_aborts() {
    let f = fixture();
    let output = run(&[&f.db, &f.changeset], &[], "");
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(name_of_row_1(&f.db), "a");
}

#[test]
fn test_dry_run_leaves_database_untouched() {
    let f = fixture();
    let output = run(&[&f.db, &f.changeset], &["--dry-run"], "r\n");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(output.status.code(), Some(0));
    assert!(stdout.ends_with("dry-run complete (rolled back)\n"));
    assert_eq!(name_of_row_1(&f.db), "a");
}

#[test]
fn test_on_conflict_flag_skips_prompt() {
    let f = fixture();
    let output = run(&[&f.db, &f.changeset], &["--on-conflict", "replace"], "");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(output.status.code(), Some(0));
    assert!(!stdout.contains("Choose:"));
    assert_eq!(name_of_row_1(&f.db), "c");
}

#[test]
fn test_missing_database() {
    let f = fixture();
    let missing = f.db.with_file_name("nope.db");
    let output = run(&[&missing, &f.changeset], &[], "");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr.starts_with("open db: "));
    assert!(!missing.exists());
}

#[test]
fn test_missing_changeset() {
    let f = fixture();
    let missing = f.changeset.with_file_name("nope.bin");
    let output = run(&[&f.db, &missing], &[], "");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr.starts_with("cannot open: "));
}

#[test]
fn test_usage_error() {
    let f = fixture();
    let output = run(&[&f.db], &[], "");
    assert_eq!(output.status.code(), Some(2));
}
