//! Conflict kinds, resolutions, and the event handed to a resolver

use bitflags::bitflags;

use crate::types::Value;

use super::changeset::ChangeRecord;

/// Why a change could not be applied as recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictType {
    /// Row exists but its values differ from the recorded pre-image
    Data,
    /// No row with the recorded primary key
    NotFound,
    /// INSERT collides with an existing primary key
    Conflict,
    /// Any other constraint failure
    Constraint,
    /// Foreign keys left dangling once every change was applied
    ForeignKey,
}

impl ConflictType {
    pub fn name(self) -> &'static str {
        match self {
            ConflictType::Data => "DATA",
            ConflictType::NotFound => "NOTFOUND",
            ConflictType::Conflict => "CONFLICT",
            ConflictType::Constraint => "CONSTRAINT",
            ConflictType::ForeignKey => "FOREIGN_KEY",
        }
    }

    /// Resolutions the apply engine accepts for this kind
    pub fn choices(self) -> Choices {
        match self {
            ConflictType::Data | ConflictType::Conflict => Choices::all(),
            ConflictType::NotFound | ConflictType::Constraint | ConflictType::ForeignKey => {
                Choices::OMIT | Choices::ABORT
            }
        }
    }
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolution returned for a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictAction {
    /// Skip this change and keep going
    Omit,
    /// Force the change onto the database
    Replace,
    /// Stop and roll everything back
    Abort,
}

impl ConflictAction {
    pub fn flag(self) -> Choices {
        match self {
            ConflictAction::Omit => Choices::OMIT,
            ConflictAction::Replace => Choices::REPLACE,
            ConflictAction::Abort => Choices::ABORT,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ConflictAction::Omit => "omit",
            ConflictAction::Replace => "replace",
            ConflictAction::Abort => "abort",
        }
    }
}

impl std::fmt::Display for ConflictAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Set of resolutions legal for a given conflict
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Choices: u8 {
        const OMIT = 0x01;
        const REPLACE = 0x02;
        const ABORT = 0x04;
    }
}

impl Choices {
    pub fn allows(self, action: ConflictAction) -> bool {
        self.contains(action.flag())
    }
}

/// A foreign key left unsatisfied (one row of `PRAGMA foreign_key_check`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FkViolation {
    /// Child table holding the dangling reference
    pub table: String,
    /// Child row, `None` for WITHOUT ROWID tables
    pub rowid: Option<i64>,
    /// Referenced table
    pub parent: String,
    /// Index of the foreign key within the child table
    pub fk_index: i64,
}

/// What a conflict is about
#[derive(Debug, Clone, Copy)]
pub enum ConflictSubject<'e> {
    Row {
        change: &'e ChangeRecord<'e>,
        /// Current database row, when one exists
        current: Option<&'e [Value]>,
    },
    ForeignKeys(&'e [FkViolation]),
}

/// A conflict presented to a resolver
#[derive(Debug, Clone, Copy)]
pub struct ConflictEvent<'e> {
    pub kind: ConflictType,
    pub subject: ConflictSubject<'e>,
}

impl<'e> ConflictEvent<'e> {
    pub fn row(kind: ConflictType, change: &'e ChangeRecord<'e>, current: Option<&'e [Value]>) -> Self {
        Self {
            kind,
            subject: ConflictSubject::Row { change, current },
        }
    }

    pub fn foreign_keys(violations: &'e [FkViolation]) -> Self {
        Self {
            kind: ConflictType::ForeignKey,
            subject: ConflictSubject::ForeignKeys(violations),
        }
    }

    pub fn choices(&self) -> Choices {
        self.kind.choices()
    }

    pub fn change(&self) -> Option<&'e ChangeRecord<'e>> {
        match self.subject {
            ConflictSubject::Row { change, .. } => Some(change),
            ConflictSubject::ForeignKeys(_) => None,
        }
    }

    /// Current database value of `column`
    pub fn current(&self, column: usize) -> Option<&'e Value> {
        match self.subject {
            ConflictSubject::Row { current, .. } => current.and_then(|row| row.get(column)),
            ConflictSubject::ForeignKeys(_) => None,
        }
    }

    pub fn is_indirect(&self) -> bool {
        self.change().is_some_and(|change| change.is_indirect())
    }
}
