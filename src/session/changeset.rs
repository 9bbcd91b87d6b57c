//! Changeset decoding (sqlite3changeset_start / sqlite3changeset_next)
//!
//! A changeset is a sequence of table sections. Each section starts with a
//! header naming the table and its primary-key layout, followed by any number
//! of change records for that table:
//!
//! ```text
//! header := marker('T' | 'P') varint(nCol) pk[nCol] name NUL
//! record := op(18 | 23 | 9) indirect values...
//! value  := 0 (undefined) | 1 i64be | 2 f64be | 3 varint(n) utf8[n]
//!         | 4 varint(n) bytes[n] | 5 (NULL)
//! ```
//!
//! Records are scanned once to validate their structure and remember where
//! each column value starts; the values themselves are decoded only when a
//! caller asks for them.

use rusqlite::types::ValueRef;

use crate::error::{Error, ErrorCode, Result};
use crate::types::Value;
use crate::util::varint::get_varint;

pub const TABLE_CHANGESET: u8 = b'T';
pub const TABLE_PATCHSET: u8 = b'P';

pub const OP_INSERT: u8 = 18;
pub const OP_UPDATE: u8 = 23;
pub const OP_DELETE: u8 = 9;

pub const VALUE_UNDEFINED: u8 = 0;
pub const VALUE_INTEGER: u8 = 1;
pub const VALUE_REAL: u8 = 2;
pub const VALUE_TEXT: u8 = 3;
pub const VALUE_BLOB: u8 = 4;
pub const VALUE_NULL: u8 = 5;

/// Number of bytes shown in corruption messages
const EXCERPT_LEN: usize = 8;

/// Change operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl ChangeOp {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            OP_INSERT => Some(ChangeOp::Insert),
            OP_UPDATE => Some(ChangeOp::Update),
            OP_DELETE => Some(ChangeOp::Delete),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            ChangeOp::Insert => OP_INSERT,
            ChangeOp::Update => OP_UPDATE,
            ChangeOp::Delete => OP_DELETE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ChangeOp::Insert => "INSERT",
            ChangeOp::Update => "UPDATE",
            ChangeOp::Delete => "DELETE",
        }
    }
}

/// Wire flavour of a table section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangesetFormat {
    /// Full pre-images for UPDATE and DELETE
    Changeset,
    /// Primary key only for DELETE, key plus new values for UPDATE
    Patchset,
}

impl ChangesetFormat {
    pub fn marker(self) -> u8 {
        match self {
            ChangesetFormat::Changeset => TABLE_CHANGESET,
            ChangesetFormat::Patchset => TABLE_PATCHSET,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TableHeader<'a> {
    name: &'a str,
    pk: &'a [u8],
    format: ChangesetFormat,
}

/// One decoded change.
///
/// Borrows the changeset buffer; column values are decoded on demand from
/// the offsets recorded while scanning.
#[derive(Debug, Clone)]
pub struct ChangeRecord<'a> {
    data: &'a [u8],
    offset: usize,
    table: &'a str,
    pk: &'a [u8],
    format: ChangesetFormat,
    op: ChangeOp,
    indirect: bool,
    old: Vec<Option<usize>>,
    new: Vec<Option<usize>>,
}

impl<'a> ChangeRecord<'a> {
    pub fn table(&self) -> &'a str {
        self.table
    }

    pub fn op(&self) -> ChangeOp {
        self.op
    }

    pub fn column_count(&self) -> usize {
        self.pk.len()
    }

    pub fn is_indirect(&self) -> bool {
        self.indirect
    }

    pub fn format(&self) -> ChangesetFormat {
        self.format
    }

    /// Byte offset of the record's op byte within the changeset
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_pk(&self, column: usize) -> bool {
        self.pk.get(column).is_some_and(|&flag| flag != 0)
    }

    /// Indices of the primary-key columns, in column order
    pub fn pk_columns(&self) -> impl Iterator<Item = usize> + '_ {
        self.pk
            .iter()
            .enumerate()
            .filter(|(_, &flag)| flag != 0)
            .map(|(column, _)| column)
    }

    /// Pre-image value of `column` (`sqlite3changeset_old`).
    ///
    /// `None` when the record carries no old value for the column: INSERTs,
    /// undefined UPDATE slots and non-key columns of patchset records.
    pub fn old(&self, column: usize) -> Result<Option<Value>> {
        self.slot(&self.old, column)
    }

    /// Post-image value of `column` (`sqlite3changeset_new`)
    pub fn new(&self, column: usize) -> Result<Option<Value>> {
        self.slot(&self.new, column)
    }

    /// Primary-key values identifying the target row.
    ///
    /// Taken from the new image for INSERT and from the old image otherwise.
    pub fn key(&self) -> Result<Vec<(usize, Value)>> {
        let slots = match self.op {
            ChangeOp::Insert => &self.new,
            ChangeOp::Update | ChangeOp::Delete => &self.old,
        };
        let mut key = Vec::new();
        for column in self.pk_columns() {
            let value = self.slot(slots, column)?.ok_or_else(|| {
                Error::corrupt(self.offset, format!("primary key column {} undefined", column))
            })?;
            key.push((column, value));
        }
        Ok(key)
    }

    fn slot(&self, slots: &[Option<usize>], column: usize) -> Result<Option<Value>> {
        if column >= self.column_count() {
            return Err(Error::with_message(
                ErrorCode::Range,
                format!(
                    "column {} out of range for {} ({} columns)",
                    column,
                    self.table,
                    self.column_count()
                ),
            ));
        }
        match slots.get(column).copied().flatten() {
            Some(offset) => {
                let mut pos = offset;
                Ok(read_value(self.data, &mut pos)?.map(Value::from))
            }
            None => Ok(None),
        }
    }
}

/// Forward-only iterator over the records of a changeset or patchset.
///
/// Yields `Err` once on malformed input and nothing afterwards.
pub struct ChangesetIter<'a> {
    data: &'a [u8],
    pos: usize,
    header: Option<TableHeader<'a>>,
    failed: bool,
}

impl<'a> ChangesetIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            header: None,
            failed: false,
        }
    }

    fn next_record(&mut self) -> Result<Option<ChangeRecord<'a>>> {
        loop {
            let Some(&byte) = self.data.get(self.pos) else {
                return Ok(None);
            };
            if byte == TABLE_CHANGESET || byte == TABLE_PATCHSET {
                self.header = Some(read_table_header(self.data, &mut self.pos)?);
                continue;
            }

            let header = self
                .header
                .ok_or_else(|| corrupt_at(self.data, self.pos, "change record before table header"))?;
            let offset = self.pos;
            let op = ChangeOp::from_byte(byte).ok_or_else(|| {
                corrupt_at(self.data, offset, &format!("invalid operation byte 0x{:02x}", byte))
            })?;
            let indirect = *self
                .data
                .get(offset + 1)
                .ok_or_else(|| corrupt_at(self.data, offset, "truncated change record"))?;
            self.pos = offset + 2;

            let (old, new) = self.read_images(&header, op, offset)?;
            return Ok(Some(ChangeRecord {
                data: self.data,
                offset,
                table: header.name,
                pk: header.pk,
                format: header.format,
                op,
                indirect: indirect != 0,
                old,
                new,
            }));
        }
    }

    fn read_images(
        &mut self,
        header: &TableHeader<'a>,
        op: ChangeOp,
        offset: usize,
    ) -> Result<(Vec<Option<usize>>, Vec<Option<usize>>)> {
        let n_col = header.pk.len();
        let is_pk = |column: usize| header.pk[column] != 0;

        let (old, new) = match (header.format, op) {
            (_, ChangeOp::Insert) => (Vec::new(), self.read_values(n_col, |_| true)?),
            (ChangesetFormat::Changeset, ChangeOp::Delete) => {
                (self.read_values(n_col, |_| true)?, Vec::new())
            }
            (ChangesetFormat::Patchset, ChangeOp::Delete) => (self.read_values(n_col, is_pk)?, Vec::new()),
            (ChangesetFormat::Changeset, ChangeOp::Update) => {
                let old = self.read_values(n_col, |_| true)?;
                let new = self.read_values(n_col, |_| true)?;
                (old, new)
            }
            (ChangesetFormat::Patchset, ChangeOp::Update) => {
                // A single record: key columns describe the old row, the rest are new values
                let values = self.read_values(n_col, |_| true)?;
                let mut old = vec![None; n_col];
                let mut new = vec![None; n_col];
                for (column, slot) in values.into_iter().enumerate() {
                    if is_pk(column) {
                        old[column] = slot;
                    } else {
                        new[column] = slot;
                    }
                }
                (old, new)
            }
        };

        match op {
            ChangeOp::Insert => {
                if let Some(column) = new.iter().position(Option::is_none) {
                    return Err(corrupt_at(
                        self.data,
                        offset,
                        &format!("INSERT with undefined value for column {}", column),
                    ));
                }
            }
            ChangeOp::Update | ChangeOp::Delete => {
                let required = |column: usize| match (header.format, op) {
                    (ChangesetFormat::Changeset, ChangeOp::Delete) => true,
                    _ => is_pk(column),
                };
                if let Some(column) = (0..n_col).find(|&c| required(c) && old[c].is_none()) {
                    return Err(corrupt_at(
                        self.data,
                        offset,
                        &format!("{} with undefined old value for column {}", op.name(), column),
                    ));
                }
            }
        }

        Ok((old, new))
    }

    /// Scan `n_col` value slots; columns rejected by `present` are not on the
    /// wire and come back as `None`.
    fn read_values(
        &mut self,
        n_col: usize,
        present: impl Fn(usize) -> bool,
    ) -> Result<Vec<Option<usize>>> {
        let mut slots = Vec::with_capacity(n_col);
        for column in 0..n_col {
            if !present(column) {
                slots.push(None);
                continue;
            }
            let start = self.pos;
            let defined = read_value(self.data, &mut self.pos)?.is_some();
            slots.push(defined.then_some(start));
        }
        Ok(slots)
    }
}

impl<'a> Iterator for ChangesetIter<'a> {
    type Item = Result<ChangeRecord<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_record() {
            Ok(record) => record.map(Ok),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

fn read_table_header<'a>(data: &'a [u8], pos: &mut usize) -> Result<TableHeader<'a>> {
    let start = *pos;
    let format = if data[start] == TABLE_PATCHSET {
        ChangesetFormat::Patchset
    } else {
        ChangesetFormat::Changeset
    };
    *pos += 1;

    let (n_col, consumed) = data
        .get(*pos..)
        .and_then(get_varint)
        .ok_or_else(|| corrupt_at(data, start, "truncated table header"))?;
    *pos += consumed;
    let n_col = usize::try_from(n_col)
        .ok()
        .filter(|&n| n <= data.len() - *pos)
        .ok_or_else(|| corrupt_at(data, start, &format!("column count {} exceeds input", n_col)))?;
    let pk = &data[*pos..*pos + n_col];
    *pos += n_col;

    let rest = &data[*pos..];
    let name_len = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| corrupt_at(data, start, "unterminated table name"))?;
    let name = std::str::from_utf8(&rest[..name_len])
        .map_err(|_| corrupt_at(data, *pos, "table name is not valid UTF-8"))?;
    *pos += name_len + 1;

    Ok(TableHeader { name, pk, format })
}

/// Read one value starting at `pos`. Undefined slots come back as `None`.
fn read_value<'a>(data: &'a [u8], pos: &mut usize) -> Result<Option<ValueRef<'a>>> {
    let start = *pos;
    let tag = *data
        .get(start)
        .ok_or_else(|| corrupt_at(data, start, "truncated value"))?;
    *pos += 1;
    match tag {
        VALUE_UNDEFINED => Ok(None),
        VALUE_NULL => Ok(Some(ValueRef::Null)),
        VALUE_INTEGER | VALUE_REAL => {
            let bytes: [u8; 8] = data
                .get(*pos..*pos + 8)
                .and_then(|slice| slice.try_into().ok())
                .ok_or_else(|| corrupt_at(data, start, "truncated numeric value"))?;
            *pos += 8;
            if tag == VALUE_INTEGER {
                Ok(Some(ValueRef::Integer(i64::from_be_bytes(bytes))))
            } else {
                Ok(Some(ValueRef::Real(f64::from_bits(u64::from_be_bytes(bytes)))))
            }
        }
        VALUE_TEXT | VALUE_BLOB => {
            let (len, consumed) = data
                .get(*pos..)
                .and_then(get_varint)
                .ok_or_else(|| corrupt_at(data, start, "truncated length"))?;
            *pos += consumed;
            let bytes = usize::try_from(len)
                .ok()
                .and_then(|len| data.get(*pos..pos.checked_add(len)?))
                .ok_or_else(|| corrupt_at(data, start, &format!("value length {} exceeds input", len)))?;
            *pos += bytes.len();
            if tag == VALUE_TEXT {
                std::str::from_utf8(bytes)
                    .map_err(|_| corrupt_at(data, start, "text value is not valid UTF-8"))?;
                Ok(Some(ValueRef::Text(bytes)))
            } else {
                Ok(Some(ValueRef::Blob(bytes)))
            }
        }
        other => Err(corrupt_at(data, start, &format!("unknown value type {}", other))),
    }
}

fn corrupt_at(data: &[u8], pos: usize, what: &str) -> Error {
    let end = data.len().min(pos.saturating_add(EXCERPT_LEN));
    let excerpt = data.get(pos..end).map(hex::encode).unwrap_or_default();
    Error::corrupt(pos, format!("{} [{}]", what, excerpt))
}
