//! changeset-apply - replay a SQLite changeset, resolving conflicts at a prompt
//!
//! Usage: changeset-apply <DATABASE> <CHANGESET> [--dry-run]
//!
//! Conflict reports and prompts go to stdout; diagnostics and logs go to
//! stderr.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};
use tracing::Level;

use changeset_apply::{
    Applier, ApplyConfig, ConflictAction, ConflictPolicy, Database, FixedPolicy,
    InteractivePolicy,
};

/// Apply a SQLite session changeset, asking how to resolve each conflict
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Existing database to apply the changeset to
    database: PathBuf,

    /// Changeset (or patchset) file
    changeset: PathBuf,

    /// Apply everything, then roll back
    #[arg(long)]
    dry_run: bool,

    /// Leave foreign key enforcement off
    #[arg(long)]
    no_foreign_keys: bool,

    /// Resolve every conflict this way instead of prompting
    #[arg(long, value_enum, value_name = "ACTION")]
    on_conflict: Option<OnConflict>,

    /// More log output on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OnConflict {
    Omit,
    Replace,
    Abort,
}

impl From<OnConflict> for ConflictAction {
    fn from(value: OnConflict) -> Self {
        match value {
            OnConflict::Omit => ConflictAction::Omit,
            OnConflict::Replace => ConflictAction::Replace,
            OnConflict::Abort => ConflictAction::Abort,
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(level)
        .with_target(false)
        .init();
}

fn run(args: Args) -> i32 {
    let config = ApplyConfig {
        dry_run: args.dry_run,
        foreign_keys: !args.no_foreign_keys,
        ..ApplyConfig::default()
    };

    let db = match Database::open(&args.database) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("open db: {}", e);
            return 1;
        }
    };

    if config.foreign_keys {
        if let Err(e) = db.enable_foreign_keys() {
            eprintln!("pragma: {}", e);
        }
    }

    let changeset = match fs::read(&args.changeset) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("cannot open: {}: {}", args.changeset.display(), e);
            return 1;
        }
    };

    let policy: Box<dyn ConflictPolicy> = match args.on_conflict {
        Some(action) => Box::new(FixedPolicy::new(action.into())),
        None => Box::new(InteractivePolicy::new(io::stdin().lock(), io::stdout())),
    };

    let mut applier = Applier::new(&db, policy, io::stdout()).with_config(config);
    match applier.apply(&changeset) {
        Ok(outcome) => {
            println!("{}", outcome.summary());
            0
        }
        Err(e) => {
            let _ = io::stdout().flush();
            match &e.message {
                Some(detail) => eprintln!(
                    "apply: rc={} ({}): {}",
                    e.code.code(),
                    e.code.description(),
                    detail
                ),
                None => eprintln!("apply: rc={} ({})", e.code.code(), e.code.description()),
            }
            1
        }
    }
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);
    let code = run(args);
    process::exit(code);
}
