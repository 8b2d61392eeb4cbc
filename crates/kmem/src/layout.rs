//! Typed access to fields of target records.
//!
//! Record layouts are never compiled in. A [`FieldSpec`] names a field and the
//! width the caller expects; the session resolves it against the target's
//! metadata once and reads it on demand.

use alloc::format;

use crate::{ByteOrder, Error, Result, Session, Target};

/// Expected width of a field, used when the metadata does not record one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    /// One target pointer.
    Word,
    /// A fixed number of bytes.
    Bytes(usize),
}

/// A named field of a named record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub record: &'static str,
    pub field: &'static str,
    pub width: Width,
}

impl FieldSpec {
    /// A pointer-sized field.
    pub const fn word(record: &'static str, field: &'static str) -> Self {
        Self {
            record,
            field,
            width: Width::Word,
        }
    }

    /// A field of `width` bytes.
    pub const fn bytes(record: &'static str, field: &'static str, width: usize) -> Self {
        Self {
            record,
            field,
            width: Width::Bytes(width),
        }
    }
}

/// A field resolved against a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub offset: u64,
    pub width: usize,
}

impl<T: Target> Session<T> {
    /// Resolves `spec` against the target's metadata.
    ///
    /// The width recorded in the metadata wins over the expected width.
    pub fn field(&self, spec: &FieldSpec) -> Result<Field> {
        if let Some(field) = self.fields.read().get(&(spec.record, spec.field)) {
            return Ok(*field);
        }

        let info = self
            .target()
            .field(spec.record, spec.field)
            .ok_or_else(|| Error::unavailable(format!("{}.{}", spec.record, spec.field)))?;
        let width = match (info.size, spec.width) {
            (Some(size), _) => size,
            (None, Width::Bytes(width)) => width,
            (None, Width::Word) => self.target().pointer_size(),
        };
        if !matches!(width, 1 | 2 | 4 | 8) {
            return Err(Error::invalid(
                format!("{}.{}", spec.record, spec.field),
                "field width is not 1, 2, 4 or 8 bytes",
            ));
        }

        let field = Field {
            offset: info.offset,
            width,
        };
        log::trace!(
            "resolved {}.{} at offset {:#x}, {} bytes",
            spec.record,
            spec.field,
            field.offset,
            field.width
        );
        self.fields.write().insert((spec.record, spec.field), field);
        Ok(field)
    }

    /// Reads an unsigned integer of `width` bytes in the target's byte order.
    pub fn read_uint(&self, address: u64, width: usize) -> Result<u64> {
        let mut bytes = [0u8; 8];
        if !matches!(width, 1 | 2 | 4 | 8) {
            return Err(Error::invalid("read width", "must be 1, 2, 4 or 8 bytes"));
        }

        Ok(match self.target().byte_order() {
            ByteOrder::Little => {
                self.target().read(address, &mut bytes[..width])?;
                u64::from_le_bytes(bytes)
            }
            ByteOrder::Big => {
                self.target().read(address, &mut bytes[8 - width..])?;
                u64::from_be_bytes(bytes)
            }
        })
    }

    /// Reads a pointer-sized word.
    pub fn read_word(&self, address: u64) -> Result<u64> {
        self.read_uint(address, self.target().pointer_size())
    }

    /// Reads the field described by `spec` from the record at `record`.
    pub fn read_field(&self, record: u64, spec: &FieldSpec) -> Result<u64> {
        let field = self.field(spec)?;
        self.read_uint(record.wrapping_add(field.offset), field.width)
    }
}
