//! Changeset encoding
//!
//! Produces byte streams in the same format `sqlite3session_changeset` and
//! `sqlite3session_patchset` emit. Used to build changesets by hand.

use crate::error::{Error, ErrorCode, Result};
use crate::types::Value;
use crate::util::varint::put_varint;

use super::changeset::{
    ChangeOp, ChangesetFormat, VALUE_BLOB, VALUE_INTEGER, VALUE_NULL, VALUE_REAL, VALUE_TEXT,
    VALUE_UNDEFINED,
};

/// Builder for changeset and patchset buffers
#[derive(Debug)]
pub struct ChangesetWriter {
    buf: Vec<u8>,
    format: ChangesetFormat,
    /// Primary-key flags of the table currently being written
    pk: Option<Vec<bool>>,
    current: Option<String>,
    indirect: bool,
}

impl ChangesetWriter {
    pub fn new() -> Self {
        Self::with_format(ChangesetFormat::Changeset)
    }

    pub fn patchset() -> Self {
        Self::with_format(ChangesetFormat::Patchset)
    }

    pub fn with_format(format: ChangesetFormat) -> Self {
        Self {
            buf: Vec::new(),
            format,
            pk: None,
            current: None,
            indirect: false,
        }
    }

    /// Start (or continue) the section for `name`.
    ///
    /// A header is only written when the table or its key layout changes.
    pub fn table(&mut self, name: &str, pk: &[bool]) -> Result<&mut Self> {
        if name.as_bytes().contains(&0) {
            return Err(Error::with_message(
                ErrorCode::Misuse,
                "table name contains NUL",
            ));
        }
        if self.current.as_deref() == Some(name) && self.pk.as_deref() == Some(pk) {
            return Ok(self);
        }

        self.buf.push(self.format.marker());
        put_varint(&mut self.buf, pk.len() as u64);
        self.buf.extend(pk.iter().map(|&flag| u8::from(flag)));
        self.buf.extend_from_slice(name.as_bytes());
        self.buf.push(0);

        self.current = Some(name.to_string());
        self.pk = Some(pk.to_vec());
        Ok(self)
    }

    /// Mark subsequent records as indirect
    pub fn indirect(&mut self, indirect: bool) -> &mut Self {
        self.indirect = indirect;
        self
    }

    pub fn insert(&mut self, new: &[Value]) -> Result<&mut Self> {
        self.check_width(new.len())?;
        self.record_header(ChangeOp::Insert);
        for value in new {
            write_value(&mut self.buf, Some(value));
        }
        Ok(self)
    }

    /// Append a DELETE. Patchsets only carry the key columns of `old`.
    pub fn delete(&mut self, old: &[Value]) -> Result<&mut Self> {
        let pk = self.check_width(old.len())?;
        self.record_header(ChangeOp::Delete);
        for (value, is_pk) in old.iter().zip(pk) {
            if self.format == ChangesetFormat::Changeset || is_pk {
                write_value(&mut self.buf, Some(value));
            }
        }
        Ok(self)
    }

    /// Append an UPDATE. `None` marks an undefined slot.
    ///
    /// Patchsets are written as one record holding the key from `old` and
    /// everything else from `new`.
    pub fn update(&mut self, old: &[Option<Value>], new: &[Option<Value>]) -> Result<&mut Self> {
        let pk = self.check_width(old.len())?;
        self.check_width(new.len())?;
        self.record_header(ChangeOp::Update);
        match self.format {
            ChangesetFormat::Changeset => {
                for value in old.iter().chain(new) {
                    write_value(&mut self.buf, value.as_ref());
                }
            }
            ChangesetFormat::Patchset => {
                for ((old, new), is_pk) in old.iter().zip(new).zip(pk) {
                    let value = if is_pk { old } else { new };
                    write_value(&mut self.buf, value.as_ref());
                }
            }
        }
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    fn check_width(&self, len: usize) -> Result<Vec<bool>> {
        let pk = self
            .pk
            .as_ref()
            .ok_or_else(|| Error::with_message(ErrorCode::Misuse, "record written before table"))?;
        if pk.len() != len {
            return Err(Error::with_message(
                ErrorCode::Mismatch,
                format!("expected {} values, got {}", pk.len(), len),
            ));
        }
        Ok(pk.clone())
    }

    fn record_header(&mut self, op: ChangeOp) {
        self.buf.push(op.to_byte());
        self.buf.push(u8::from(self.indirect));
    }
}

impl Default for ChangesetWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn write_value(buf: &mut Vec<u8>, value: Option<&Value>) {
    match value {
        None => buf.push(VALUE_UNDEFINED),
        Some(Value::Null) => buf.push(VALUE_NULL),
        Some(Value::Integer(i)) => {
            buf.push(VALUE_INTEGER);
            buf.extend_from_slice(&i.to_be_bytes());
        }
        Some(Value::Real(f)) => {
            buf.push(VALUE_REAL);
            buf.extend_from_slice(&f.to_bits().to_be_bytes());
        }
        Some(Value::Text(s)) => {
            buf.push(VALUE_TEXT);
            put_varint(buf, s.len() as u64);
            buf.extend_from_slice(s);
        }
        Some(Value::Blob(b)) => {
            buf.push(VALUE_BLOB);
            put_varint(buf, b.len() as u64);
            buf.extend_from_slice(b);
        }
    }
}
