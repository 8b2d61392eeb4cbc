use alloc::collections::{BTreeMap, BTreeSet};
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::mem::size_of;

use kmem::ByteOrder;

use crate::{Entry, EntryKind, Header, StringRef};

struct PendingEntry {
    kind: EntryKind,
    group: String,
    name: String,
    value: u64,
    extra: u64,
}

impl PendingEntry {
    /// Sort key. Enumerators sort by enumeration only, so that a stable sort
    /// keeps them in declaration order.
    fn key(&self) -> (EntryKind, &str, &str) {
        match self.kind {
            EntryKind::Enumerator => (self.kind, self.group.as_str(), ""),
            kind => (kind, self.group.as_str(), self.name.as_str()),
        }
    }
}

/// Builder for constructing a metadata table.
///
/// Accumulates entries, then builds a binary metadata table. When the same
/// name is added twice, the first value wins.
pub struct TableBuilder {
    entries: Vec<PendingEntry>,
    enumerations: BTreeSet<String>,
    byte_order: ByteOrder,
    pointer_size: u8,
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TableBuilder {
    /// Creates an empty builder for a little-endian, 64-bit target.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            enumerations: BTreeSet::new(),
            byte_order: ByteOrder::Little,
            pointer_size: 8,
        }
    }

    pub fn set_byte_order(&mut self, byte_order: ByteOrder) -> &mut Self {
        self.byte_order = byte_order;
        self
    }

    pub fn set_pointer_size(&mut self, pointer_size: u8) -> &mut Self {
        self.pointer_size = pointer_size;
        self
    }

    /// Number of entries added so far, duplicates included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn add_constant(&mut self, name: &str, value: u64) -> &mut Self {
        self.push(EntryKind::Constant, "", name, value, 0)
    }

    pub fn add_symbol(&mut self, name: &str, address: u64) -> &mut Self {
        self.push(EntryKind::Symbol, "", name, address, 0)
    }

    pub fn add_record(&mut self, record: &str, size: u64) -> &mut Self {
        self.push(EntryKind::Record, "", record, size, 0)
    }

    /// Adds a field of `record`. A `size` of `None` records an unknown size.
    pub fn add_field(&mut self, record: &str, field: &str, offset: u64, size: Option<u64>) -> &mut Self {
        self.push(EntryKind::Field, record, field, offset, size.unwrap_or(0))
    }

    /// Adds the enumerators of an enumeration, in declaration order.
    ///
    /// Ignored if an enumeration of that name was already added.
    pub fn add_enumeration<S: AsRef<str>>(&mut self, name: &str, enumerators: &[(S, u64)]) -> &mut Self {
        if !self.enumerations.insert(name.to_string()) {
            return self;
        }
        for (enumerator, value) in enumerators {
            self.push(EntryKind::Enumerator, name, enumerator.as_ref(), *value, 0);
        }
        self
    }

    fn push(&mut self, kind: EntryKind, group: &str, name: &str, value: u64, extra: u64) -> &mut Self {
        self.entries.push(PendingEntry {
            kind,
            group: group.to_string(),
            name: name.to_string(),
            value,
            extra,
        });
        self
    }

    /// Builds the final binary metadata table.
    pub fn build(mut self) -> Vec<u8> {
        self.entries.sort_by(|a, b| a.key().cmp(&b.key()));
        self.entries
            .dedup_by(|later, earlier| later.kind != EntryKind::Enumerator && later.key() == earlier.key());

        let mut strings = StringPool::default();
        let entries: Vec<Entry> = self
            .entries
            .iter()
            .map(|entry| {
                let group = strings.intern(&entry.group);
                let name = strings.intern(&entry.name);
                Entry::new(entry.kind, group, name, entry.value, entry.extra)
            })
            .collect();

        let header_size = size_of::<Header>();

        let entries_offset = header_size;
        let entries_size = entries.len() * size_of::<Entry>();

        let string_pool_offset = entries_offset + entries_size;
        let string_pool_size = strings.data.len();

        let header = Header::new(
            self.byte_order,
            self.pointer_size,
            entries_offset as u64,
            entries_size as u64,
            string_pool_offset as u64,
            string_pool_size as u64,
        );

        let mut output = Vec::with_capacity(string_pool_offset + string_pool_size);

        output.extend_from_slice(unsafe {
            core::slice::from_raw_parts(&header as *const Header as *const u8, header_size)
        });

        output.extend_from_slice(unsafe {
            core::slice::from_raw_parts(entries.as_ptr() as *const u8, entries_size)
        });

        output.extend_from_slice(&strings.data);

        output
    }
}

#[derive(Default)]
struct StringPool {
    data: Vec<u8>,
    cache: BTreeMap<String, StringRef>,
}

impl StringPool {
    fn intern(&mut self, s: &str) -> StringRef {
        if let Some(existing) = self.cache.get(s) {
            return *existing;
        }

        let string_ref = StringRef::new(self.data.len() as u64, s.len() as u64);
        self.data.extend_from_slice(s.as_bytes());
        self.cache.insert(s.to_string(), string_ref);
        string_ref
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MetadataTable;
    use kmem::Metadata;

    #[test]
    fn first_value_wins() {
        let mut builder = TableBuilder::new();
        builder
            .add_symbol("vmemmap_base", 0x1000)
            .add_symbol("vmemmap_base", 0x2000)
            .add_constant("vmemmap_base", 7);
        let data = builder.build();
        let table = MetadataTable::from_bytes(&data).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.symbol("vmemmap_base"), Some(0x1000));
        assert_eq!(table.constant("vmemmap_base"), Some(7));
    }

    #[test]
    fn repeated_enumeration_is_ignored() {
        let mut builder = TableBuilder::new();
        builder
            .add_enumeration("pageflags", &[("PG_locked", 0)])
            .add_enumeration("pageflags", &[("PG_locked", 0), ("PG_head", 6)]);
        let data = builder.build();
        let table = MetadataTable::from_bytes(&data).unwrap();
        assert_eq!(table.enumerators("pageflags").map(|e| e.len()), Some(1));
    }

    #[test]
    fn strings_are_interned() {
        let mut builder = TableBuilder::new();
        builder
            .add_field("page", "flags", 0, None)
            .add_field("page", "compound_head", 8, None)
            .add_record("page", 64);
        let data = builder.build();
        assert!(data.ends_with(b"pagecompound_headflags"));
    }

    #[test]
    fn records_target_shape() {
        let mut builder = TableBuilder::new();
        builder.set_byte_order(ByteOrder::Big).set_pointer_size(4);
        let data = builder.build();
        let table = MetadataTable::from_bytes(&data).unwrap();
        assert_eq!(table.byte_order(), ByteOrder::Big);
        assert_eq!(table.pointer_size(), 4);
    }
}
