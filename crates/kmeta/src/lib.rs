#![cfg_attr(not(test), no_std)]

//! Kernel metadata tables.
//!
//! A metadata table is a flat binary file holding the subset of a kernel
//! build's debug information that `kmem` needs: constants and enumerators,
//! global symbol addresses, record sizes and field offsets. It is produced
//! offline by the `kmeta` tool and read back without parsing or copying.
//!
//! The file is laid out as a [`Header`], a table of [`Entry`] records and a
//! string pool. All integers are in the byte order of the machine that wrote
//! the file.

extern crate alloc;

mod builder;
pub mod vmcoreinfo;

use alloc::vec::Vec;
use core::mem::size_of;

use kmem::{ByteOrder, Enumerator, FieldInfo, Metadata};

pub use builder::TableBuilder;

const MAGIC: &[u8; 6] = b"KMETA\0";

/// Errors that can occur when opening a metadata table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("data too small for header")]
    TooSmall,
    #[error("invalid magic number")]
    BadMagic,
    #[error("{0} extends beyond data")]
    OutOfBounds(&'static str),
    #[error("invalid UTF-8 in string pool")]
    InvalidUtf8,
    #[error("unknown entry kind {0}")]
    UnknownKind(u32),
}

/// Header at the start of a metadata table.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Header {
    magic: [u8; 6],
    byte_order: u8,
    pointer_size: u8,
    entries_offset: u64,
    entries_size: u64,
    string_pool_offset: u64,
    string_pool_size: u64,
}

impl Header {
    pub fn new(
        byte_order: ByteOrder,
        pointer_size: u8,
        entries_offset: u64,
        entries_size: u64,
        string_pool_offset: u64,
        string_pool_size: u64,
    ) -> Self {
        Self {
            magic: *MAGIC,
            byte_order: match byte_order {
                ByteOrder::Little => 0,
                ByteOrder::Big => 1,
            },
            pointer_size,
            entries_offset,
            entries_size,
            string_pool_offset,
            string_pool_size,
        }
    }
}

/// What an [`Entry`] describes.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntryKind {
    /// A named constant: `value` is its value.
    Constant = 0,
    /// A global variable: `value` is its address.
    Symbol = 1,
    /// A record field: `group` is the record, `value` the offset and `extra`
    /// the size in bytes, or 0 if unknown.
    Field = 2,
    /// A record: `value` is its size in bytes.
    Record = 3,
    /// An enumerator: `group` is the enumeration and `value` its value.
    Enumerator = 4,
}

impl TryFrom<u32> for EntryKind {
    type Error = TableError;

    fn try_from(value: u32) -> Result<Self, TableError> {
        Ok(match value {
            0 => Self::Constant,
            1 => Self::Symbol,
            2 => Self::Field,
            3 => Self::Record,
            4 => Self::Enumerator,
            other => return Err(TableError::UnknownKind(other)),
        })
    }
}

/// Entry in the entry table.
///
/// Sorted by kind, group and name for binary search, except that the
/// enumerators of one enumeration stay in declaration order.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Entry {
    pub kind: u32,
    _padding: u32,
    pub group: StringRef,
    pub name: StringRef,
    pub value: u64,
    pub extra: u64,
}

impl Entry {
    pub fn new(kind: EntryKind, group: StringRef, name: StringRef, value: u64, extra: u64) -> Self {
        Self {
            kind: kind as u32,
            _padding: 0,
            group,
            name,
            value,
            extra,
        }
    }
}

/// Reference to a string in the string pool.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringRef {
    pub offset: u64,
    pub length: u64,
}

impl StringRef {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }
}

/// An entry with its strings resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryRef<'a> {
    pub kind: EntryKind,
    pub group: &'a str,
    pub name: &'a str,
    pub value: u64,
    pub extra: u64,
}

/// Zero-copy view of a metadata table.
pub struct MetadataTable<'a> {
    header: Header,
    entries: &'a [u8],
    string_pool: &'a str,
}

impl<'a> MetadataTable<'a> {
    /// Opens a metadata table stored in `data`.
    ///
    /// Validates the header, the bounds of every section, and every entry's
    /// kind and strings, so later lookups cannot fail.
    pub fn from_bytes(data: &'a [u8]) -> Result<Self, TableError> {
        if data.len() < size_of::<Header>() {
            return Err(TableError::TooSmall);
        }
        // Header is plain old data and the length was checked above.
        let header = unsafe { core::ptr::read_unaligned(data.as_ptr() as *const Header) };
        if &header.magic != MAGIC {
            return Err(TableError::BadMagic);
        }

        let entries = section(data, header.entries_offset, header.entries_size)
            .ok_or(TableError::OutOfBounds("entry table"))?;
        let pool = section(data, header.string_pool_offset, header.string_pool_size)
            .ok_or(TableError::OutOfBounds("string pool"))?;
        let string_pool = core::str::from_utf8(pool).map_err(|_| TableError::InvalidUtf8)?;

        let table = Self {
            header,
            entries,
            string_pool,
        };
        for index in 0..table.len() {
            let entry = table.raw_entry(index);
            EntryKind::try_from(entry.kind)?;
            if table.resolve(&entry.group).is_none() || table.resolve(&entry.name).is_none() {
                return Err(TableError::OutOfBounds("string reference"));
            }
        }
        Ok(table)
    }

    /// Number of entries in the table.
    pub fn len(&self) -> usize {
        self.entries.len() / size_of::<Entry>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over every entry in table order.
    pub fn entries(&self) -> impl Iterator<Item = EntryRef<'_>> + '_ {
        (0..self.len()).map(|index| self.entry(index))
    }

    /// Finds the entry of `kind` named `name` within `group`.
    pub fn find(&self, kind: EntryKind, group: &str, name: &str) -> Option<EntryRef<'_>> {
        let key = (kind, group, name);
        let index = self.partition_point(|entry| (entry.kind, entry.group, entry.name) < key);
        let entry = self.entry(index.min(self.len().checked_sub(1)?));
        ((entry.kind, entry.group, entry.name) == key).then_some(entry)
    }

    /// Returns the enumerators of `enumeration` in declaration order.
    pub fn enumeration(&self, enumeration: &str) -> impl Iterator<Item = EntryRef<'_>> + '_ {
        let key = (EntryKind::Enumerator, enumeration);
        let start = self.partition_point(|entry| (entry.kind, entry.group) < key);
        let end = self.partition_point(|entry| (entry.kind, entry.group) <= key);
        (start..end).map(|index| self.entry(index))
    }

    /// Finds the first index for which `before` is false.
    ///
    /// `before` must be true for a prefix of the table and false after it.
    fn partition_point(&self, before: impl Fn(&EntryRef<'_>) -> bool) -> usize {
        let (mut low, mut high) = (0, self.len());
        while low < high {
            let mid = low + (high - low) / 2;
            if before(&self.entry(mid)) {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        low
    }

    fn raw_entry(&self, index: usize) -> Entry {
        let offset = index * size_of::<Entry>();
        let bytes = &self.entries[offset..offset + size_of::<Entry>()];
        // Entry is plain old data and the slice holds exactly one.
        unsafe { core::ptr::read_unaligned(bytes.as_ptr() as *const Entry) }
    }

    fn entry(&self, index: usize) -> EntryRef<'_> {
        let entry = self.raw_entry(index);
        // Kinds and strings were validated when the table was opened.
        EntryRef {
            kind: EntryKind::try_from(entry.kind).unwrap_or(EntryKind::Constant),
            group: self.resolve(&entry.group).unwrap_or_default(),
            name: self.resolve(&entry.name).unwrap_or_default(),
            value: entry.value,
            extra: entry.extra,
        }
    }

    fn resolve(&self, string_ref: &StringRef) -> Option<&str> {
        let start = usize::try_from(string_ref.offset).ok()?;
        let end = start.checked_add(usize::try_from(string_ref.length).ok()?)?;
        self.string_pool.get(start..end)
    }
}

fn section(data: &[u8], offset: u64, size: u64) -> Option<&[u8]> {
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(usize::try_from(size).ok()?)?;
    data.get(start..end)
}

impl Metadata for MetadataTable<'_> {
    fn constant(&self, name: &str) -> Option<u64> {
        self.find(EntryKind::Constant, "", name).map(|e| e.value)
    }

    fn symbol(&self, name: &str) -> Option<u64> {
        self.find(EntryKind::Symbol, "", name).map(|e| e.value)
    }

    fn field(&self, record: &str, field: &str) -> Option<FieldInfo> {
        self.find(EntryKind::Field, record, field).map(|e| {
            let size = usize::try_from(e.extra).ok().filter(|&size| size != 0);
            FieldInfo::new(e.value, size)
        })
    }

    fn record_size(&self, record: &str) -> Option<u64> {
        self.find(EntryKind::Record, "", record).map(|e| e.value)
    }

    fn enumerators(&self, enumeration: &str) -> Option<Vec<Enumerator>> {
        let enumerators: Vec<Enumerator> = self
            .enumeration(enumeration)
            .map(|e| Enumerator::new(e.name, e.value))
            .collect();
        (!enumerators.is_empty()).then_some(enumerators)
    }

    fn byte_order(&self) -> ByteOrder {
        match self.header.byte_order {
            1 => ByteOrder::Big,
            _ => ByteOrder::Little,
        }
    }

    fn pointer_size(&self) -> usize {
        usize::from(self.header.pointer_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut builder = TableBuilder::new();
        builder
            .add_constant("PAGE_SHIFT", 12)
            .add_constant("PG_head", 6)
            .add_symbol("vmemmap_base", 0xffff_ffff_8260_0000)
            .add_record("page", 64)
            .add_field("page", "flags", 0, Some(8))
            .add_field("page", "compound_head", 8, None)
            .add_enumeration("pageflags", &[("PG_locked", 0), ("PG_waiters", 7), ("PG_head", 6)])
            .add_enumeration("zone_type", &[("ZONE_DMA", 0), ("ZONE_NORMAL", 2)]);
        builder.build()
    }

    #[test]
    fn answers_metadata_queries() {
        let data = sample();
        let table = MetadataTable::from_bytes(&data).unwrap();

        assert_eq!(table.constant("PAGE_SHIFT"), Some(12));
        assert_eq!(table.constant("PG_head"), Some(6));
        assert_eq!(table.constant("PAGE_OFFSET"), None);
        assert_eq!(table.symbol("vmemmap_base"), Some(0xffff_ffff_8260_0000));
        assert_eq!(table.symbol("PAGE_SHIFT"), None);
        assert_eq!(table.record_size("page"), Some(64));
        assert_eq!(table.field("page", "flags"), Some(FieldInfo::new(0, Some(8))));
        assert_eq!(table.field("page", "compound_head"), Some(FieldInfo::new(8, None)));
        assert_eq!(table.field("page", "lru"), None);
        assert_eq!(table.byte_order(), ByteOrder::Little);
        assert_eq!(table.pointer_size(), 8);
    }

    #[test]
    fn enumerators_keep_declaration_order() {
        let data = sample();
        let table = MetadataTable::from_bytes(&data).unwrap();
        let names: Vec<String> = table
            .enumerators("pageflags")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["PG_locked", "PG_waiters", "PG_head"]);
        assert_eq!(table.enumerators("zone_type").map(|e| e.len()), Some(2));
        assert_eq!(table.enumerators("migratetype"), None);
    }

    #[test]
    fn entries_are_sorted() {
        let data = sample();
        let table = MetadataTable::from_bytes(&data).unwrap();
        let keys: Vec<_> = table
            .entries()
            .filter(|e| e.kind != EntryKind::Enumerator)
            .map(|e| (e.kind, e.group, e.name))
            .collect();
        assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(table.len(), 11);
    }

    #[test]
    fn empty_table() {
        let data = TableBuilder::new().build();
        let table = MetadataTable::from_bytes(&data).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.constant("PAGE_SHIFT"), None);
        assert_eq!(table.enumerators("pageflags"), None);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut data = sample();
        data[0] = b'X';
        assert_eq!(MetadataTable::from_bytes(&data).err(), Some(TableError::BadMagic));
    }

    #[test]
    fn rejects_truncated_data() {
        let data = sample();
        assert_eq!(MetadataTable::from_bytes(&data[..16]).err(), Some(TableError::TooSmall));
        assert_eq!(
            MetadataTable::from_bytes(&data[..data.len() - 1]).err(),
            Some(TableError::OutOfBounds("string pool"))
        );
    }

    #[test]
    fn reads_unaligned_data() {
        let mut data = alloc::vec![0u8];
        data.extend(sample());
        let table = MetadataTable::from_bytes(&data[1..]).unwrap();
        assert_eq!(table.constant("PAGE_SHIFT"), Some(12));
    }
}
