//! Software-emulated target for testing and development.
//!
//! [`EmulatedTarget`] implements [`Metadata`], [`Memory`] and [`VirtualMemory`]
//! entirely in host memory. Metadata is a set of maps filled in by the caller;
//! memory is sparse and byte-addressed, so any byte that was never written reads
//! as a fault, just like an unmapped range on a real target. Memory can be
//! rewritten through a shared reference to model a live, changing kernel.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use spin::Mutex;

use crate::{ByteOrder, Enumerator, Fault, FieldInfo, Memory, Metadata, VirtualMemory};

/// `enum pageflags` of a 6.x x86-64 kernel, including its aliases.
const PAGEFLAGS: &[(&str, u64)] = &[
    ("PG_locked", 0),
    ("PG_writeback", 1),
    ("PG_referenced", 2),
    ("PG_uptodate", 3),
    ("PG_dirty", 4),
    ("PG_lru", 5),
    ("PG_head", 6),
    ("PG_waiters", 7),
    ("PG_active", 8),
    ("PG_workingset", 9),
    ("PG_error", 10),
    ("PG_slab", 11),
    ("PG_owner_priv_1", 12),
    ("PG_arch_1", 13),
    ("PG_reserved", 14),
    ("PG_private", 15),
    ("PG_private_2", 16),
    ("PG_mappedtodisk", 17),
    ("PG_reclaim", 18),
    ("PG_swapbacked", 19),
    ("PG_unevictable", 20),
    ("PG_mlocked", 21),
    ("__NR_PAGEFLAGS", 22),
    ("PG_readahead", 18),
    ("PG_checked", 12),
    ("PG_swapcache", 12),
    ("PG_fscache", 16),
    ("PG_pinned", 12),
    ("PG_savepinned", 4),
    ("PG_foreign", 12),
    ("PG_xen_remapped", 12),
    ("PG_isolated", 18),
    ("PG_reported", 3),
    ("PG_vmemmap_self_hosted", 12),
];

/// An in-memory kernel target.
#[derive(Default)]
pub struct EmulatedTarget {
    constants: BTreeMap<String, u64>,
    symbols: BTreeMap<String, u64>,
    fields: BTreeMap<(String, String), FieldInfo>,
    records: BTreeMap<String, u64>,
    enums: BTreeMap<String, Vec<Enumerator>>,
    byte_order: ByteOrder,
    memory: Mutex<BTreeMap<u64, u8>>,
    faults: Mutex<BTreeSet<(u64, u64)>>,
    user: Mutex<BTreeMap<(u64, u64), u8>>,
}

impl EmulatedTarget {
    /// Start of the virtually mapped page descriptor array.
    pub const VMEMMAP_START: u64 = 0xffff_ea00_0000_0000;
    /// Offset of the direct mapping of physical memory.
    pub const PAGE_OFFSET: u64 = 0xffff_8880_0000_0000;
    /// Size of `struct page`.
    pub const PAGE_DESCRIPTOR_SIZE: u64 = 64;
    /// Address of the first global variable.
    pub const DATA_BASE: u64 = 0xffff_ffff_8260_0000;

    const VMEMMAP_BASE: u64 = Self::DATA_BASE;
    const MIN_LOW_PFN: u64 = Self::DATA_BASE + 0x8;
    const MAX_PFN: u64 = Self::DATA_BASE + 0x10;
    const TOTALRAM_PAGES: u64 = Self::DATA_BASE + 0x18;
    /// Address of `contig_page_data` on flat-memory targets.
    pub const CONTIG_PAGE_DATA: u64 = Self::DATA_BASE + 0x1000;

    /// Creates an empty target with no metadata and no readable memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a little-endian 64-bit Linux target using a virtually mapped
    /// page descriptor array at [`Self::VMEMMAP_START`].
    ///
    /// Page frames `[0, 16)` are populated and the descriptor array is left
    /// unwritten, so every descriptor read faults until the test writes it.
    pub fn linux_vmemmap() -> Self {
        let mut target = Self::linux_common();
        target.define_symbol("vmemmap_base", Self::VMEMMAP_BASE);
        target.write_word(Self::VMEMMAP_BASE, Self::VMEMMAP_START);
        target
    }

    /// Creates a little-endian 64-bit Linux target using the flat memory
    /// model, with a single node whose `node_mem_map` starts at
    /// `node_mem_map` and describes frames from `node_start_pfn` onwards.
    pub fn linux_flatmem(node_mem_map: u64, node_start_pfn: u64) -> Self {
        let mut target = Self::linux_common();
        target
            .define_symbol("contig_page_data", Self::CONTIG_PAGE_DATA)
            .define_field("pglist_data", "node_mem_map", 0x18c0, Some(8))
            .define_field("pglist_data", "node_start_pfn", 0x18c8, Some(8));
        target.write_word(Self::CONTIG_PAGE_DATA + 0x18c0, node_mem_map);
        target.write_word(Self::CONTIG_PAGE_DATA + 0x18c8, node_start_pfn);
        target
    }

    fn linux_common() -> Self {
        let mut target = Self::new();
        target
            .define_constant("PAGE_SHIFT", 12)
            .define_constant("PAGE_SIZE", 4096)
            .define_constant("PAGE_OFFSET", Self::PAGE_OFFSET)
            .define_record("page", Self::PAGE_DESCRIPTOR_SIZE)
            .define_field("page", "flags", 0, Some(8))
            .define_field("page", "compound_head", 8, Some(8))
            .define_field("page", "compound_order", 0x28, Some(1))
            .define_field("mm_struct", "pgd", 0x50, Some(8))
            .define_field("mm_struct", "arg_start", 0x120, Some(8))
            .define_field("mm_struct", "arg_end", 0x128, Some(8))
            .define_field("mm_struct", "env_start", 0x130, Some(8))
            .define_field("mm_struct", "env_end", 0x138, Some(8))
            .define_field("task_struct", "mm", 0x898, Some(8))
            .define_symbol("min_low_pfn", Self::MIN_LOW_PFN)
            .define_symbol("max_pfn", Self::MAX_PFN)
            .define_symbol("_totalram_pages", Self::TOTALRAM_PAGES)
            .define_enum("pageflags", PAGEFLAGS);
        for (name, value) in PAGEFLAGS {
            target.define_constant(name, *value);
        }
        target.set_pfn_range(0, 16);
        target.write_word(Self::TOTALRAM_PAGES, 16);
        target
    }

    /// Defines a named constant.
    pub fn define_constant(&mut self, name: &str, value: u64) -> &mut Self {
        self.constants.insert(name.to_string(), value);
        self
    }

    /// Removes a named constant.
    pub fn remove_constant(&mut self, name: &str) -> &mut Self {
        self.constants.remove(name);
        self
    }

    /// Defines the address of a global variable.
    pub fn define_symbol(&mut self, name: &str, address: u64) -> &mut Self {
        self.symbols.insert(name.to_string(), address);
        self
    }

    /// Removes a global variable.
    pub fn remove_symbol(&mut self, name: &str) -> &mut Self {
        self.symbols.remove(name);
        self
    }

    /// Defines the location of a field within a record.
    pub fn define_field(
        &mut self,
        record: &str,
        field: &str,
        offset: u64,
        size: Option<usize>,
    ) -> &mut Self {
        self.fields.insert(
            (record.to_string(), field.to_string()),
            FieldInfo::new(offset, size),
        );
        self
    }

    /// Removes a field definition.
    pub fn remove_field(&mut self, record: &str, field: &str) -> &mut Self {
        self.fields.remove(&(record.to_string(), field.to_string()));
        self
    }

    /// Defines the size of a record.
    pub fn define_record(&mut self, record: &str, size: u64) -> &mut Self {
        self.records.insert(record.to_string(), size);
        self
    }

    /// Defines an enumeration. Enumerators keep the given order.
    pub fn define_enum(&mut self, name: &str, enumerators: &[(&str, u64)]) -> &mut Self {
        let enumerators = enumerators
            .iter()
            .map(|(name, value)| Enumerator::new(*name, *value))
            .collect();
        self.enums.insert(name.to_string(), enumerators);
        self
    }

    /// Sets the byte order used for multi-byte reads and writes.
    pub fn set_byte_order(&mut self, byte_order: ByteOrder) -> &mut Self {
        self.byte_order = byte_order;
        self
    }

    /// Writes raw bytes into the kernel address space.
    pub fn write_bytes(&self, address: u64, bytes: &[u8]) {
        let mut memory = self.memory.lock();
        for (i, byte) in bytes.iter().enumerate() {
            memory.insert(address.wrapping_add(i as u64), *byte);
        }
    }

    /// Writes an unsigned value of `width` bytes in the target's byte order.
    pub fn write_uint(&self, address: u64, width: usize, value: u64) {
        let bytes = match self.byte_order {
            ByteOrder::Little => value.to_le_bytes()[..width].to_vec(),
            ByteOrder::Big => value.to_be_bytes()[8 - width..].to_vec(),
        };
        self.write_bytes(address, &bytes);
    }

    /// Writes a pointer-sized word.
    pub fn write_word(&self, address: u64, value: u64) {
        self.write_uint(address, 8, value);
    }

    /// Writes a zeroed page descriptor with the given `flags` and
    /// `compound_head` words.
    pub fn write_descriptor(&self, address: u64, flags: u64, compound_head: u64) {
        self.write_bytes(address, &[0; Self::PAGE_DESCRIPTOR_SIZE as usize]);
        self.write_word(address, flags);
        self.write_word(address + 8, compound_head);
    }

    /// Sets the range of populated page frames, `[min, max)`.
    pub fn set_pfn_range(&self, min: u64, max: u64) {
        self.write_word(Self::MIN_LOW_PFN, min);
        self.write_word(Self::MAX_PFN, max);
    }

    /// Makes every read touching `[address, address + length)` fault, even if
    /// the bytes were written.
    pub fn fault_range(&self, address: u64, length: u64) {
        self.faults.lock().insert((address, address + length));
    }

    /// Writes raw bytes into the user address space rooted at `pgd`.
    pub fn write_user(&self, pgd: u64, address: u64, bytes: &[u8]) {
        let mut user = self.user.lock();
        for (i, byte) in bytes.iter().enumerate() {
            user.insert((pgd, address.wrapping_add(i as u64)), *byte);
        }
    }

    fn is_faulted(&self, address: u64, length: usize) -> bool {
        let end = address.saturating_add(length as u64);
        self.faults
            .lock()
            .iter()
            .any(|&(start, stop)| address < stop && start < end)
    }
}

impl Metadata for EmulatedTarget {
    fn constant(&self, name: &str) -> Option<u64> {
        self.constants.get(name).copied()
    }

    fn symbol(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).copied()
    }

    fn field(&self, record: &str, field: &str) -> Option<FieldInfo> {
        self.fields
            .get(&(record.to_string(), field.to_string()))
            .copied()
    }

    fn record_size(&self, record: &str) -> Option<u64> {
        self.records.get(record).copied()
    }

    fn enumerators(&self, enumeration: &str) -> Option<Vec<Enumerator>> {
        self.enums.get(enumeration).cloned()
    }

    fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }
}

impl Memory for EmulatedTarget {
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), Fault> {
        let fault = Fault::new(address, buf.len());
        if self.is_faulted(address, buf.len()) {
            return Err(fault);
        }

        let memory = self.memory.lock();
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = *memory
                .get(&address.wrapping_add(i as u64))
                .ok_or(fault)?;
        }
        Ok(())
    }
}

impl VirtualMemory for EmulatedTarget {
    fn read_virtual(&self, pgd: u64, address: u64, buf: &mut [u8]) -> Result<(), Fault> {
        let fault = Fault::new(address, buf.len());
        let user = self.user.lock();
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = *user
                .get(&(pgd, address.wrapping_add(i as u64)))
                .ok_or(fault)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritten_memory_faults() {
        let target = EmulatedTarget::new();
        let mut buf = [0u8; 4];
        assert_eq!(target.read(0x1000, &mut buf), Err(Fault::new(0x1000, 4)));
    }

    #[test]
    fn partially_written_range_faults() {
        let target = EmulatedTarget::new();
        target.write_bytes(0x1000, &[1, 2]);
        let mut buf = [0u8; 4];
        assert!(target.read(0x1000, &mut buf).is_err());
    }

    #[test]
    fn words_round_trip_in_both_byte_orders() {
        let mut target = EmulatedTarget::new();
        target.write_word(0x1000, 0x0102_0304_0506_0708);
        let mut buf = [0u8; 8];
        target.read(0x1000, &mut buf).unwrap();
        assert_eq!(buf, [8, 7, 6, 5, 4, 3, 2, 1]);

        target.set_byte_order(ByteOrder::Big);
        target.write_word(0x2000, 0x0102_0304_0506_0708);
        target.read(0x2000, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn fault_ranges_override_written_memory() {
        let target = EmulatedTarget::new();
        target.write_word(0x1000, 7);
        target.fault_range(0x1004, 1);
        let mut buf = [0u8; 8];
        assert!(target.read(0x1000, &mut buf).is_err());
        let mut low = [0u8; 4];
        assert!(target.read(0x1000, &mut low).is_ok());
    }

    #[test]
    fn user_memory_is_per_address_space() {
        let target = EmulatedTarget::new();
        target.write_user(0x1000, 0x40_0000, b"abc");
        let mut buf = [0u8; 3];
        target.read_virtual(0x1000, 0x40_0000, &mut buf).unwrap();
        assert_eq!(&buf, b"abc");
        assert!(target.read_virtual(0x2000, 0x40_0000, &mut buf).is_err());
    }

    #[test]
    fn linux_presets_expose_metadata() {
        let target = EmulatedTarget::linux_vmemmap();
        assert_eq!(target.constant("PAGE_SHIFT"), Some(12));
        assert_eq!(target.constant("PG_head"), Some(6));
        assert!(target.symbol("vmemmap_base").is_some());
        assert!(target.symbol("contig_page_data").is_none());
        assert_eq!(
            target.field("page", "compound_head"),
            Some(FieldInfo::new(8, Some(8)))
        );

        let flat = EmulatedTarget::linux_flatmem(0xffff_8880_0100_0000, 0x100);
        assert!(flat.symbol("vmemmap_base").is_none());
        assert!(flat.symbol("contig_page_data").is_some());
    }
}
