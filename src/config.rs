//! Run configuration

/// Options for one changeset application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyConfig {
    /// Apply everything, then roll back regardless of the outcome
    pub dry_run: bool,

    /// Turn on `PRAGMA foreign_keys` when opening the target
    pub foreign_keys: bool,

    /// Check foreign keys once at the end of the changeset instead of per
    /// statement
    pub defer_foreign_keys: bool,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            foreign_keys: true,
            defer_foreign_keys: true,
        }
    }
}

impl ApplyConfig {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }
}
