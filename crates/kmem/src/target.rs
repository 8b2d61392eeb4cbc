//! Interfaces to the target kernel being inspected.
//!
//! Everything `kmem` knows about a target comes through two traits:
//!
//! - [`Metadata`] answers questions about the target build: constants,
//!   enumerators, symbol addresses and record layouts.
//! - [`Memory`] reads raw bytes from the target's kernel address space.
//!
//! [`VirtualMemory`] is a third, optional capability used only by the process
//! memory helpers: reading through a specific page-table root.

use alloc::string::String;
use alloc::vec::Vec;

use crate::Fault;

/// Byte order of the target machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

/// Location of a field within a record, as described by the target's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    /// Offset of the field from the start of the record, in bytes.
    pub offset: u64,
    /// Size of the field in bytes, when the metadata records it.
    pub size: Option<usize>,
}

impl FieldInfo {
    pub const fn new(offset: u64, size: Option<usize>) -> Self {
        Self { offset, size }
    }
}

/// A single named value of an enumeration in the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enumerator {
    pub name: String,
    pub value: u64,
}

impl Enumerator {
    pub fn new(name: impl Into<String>, value: u64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Resolves names against the target's debug metadata.
///
/// Every method returns `None` when the name is not present in this build of
/// the target, which is a normal outcome for configuration-dependent entries.
pub trait Metadata {
    /// Returns the value of a named constant or enumerator.
    fn constant(&self, name: &str) -> Option<u64>;

    /// Returns the address of a named global variable.
    fn symbol(&self, name: &str) -> Option<u64>;

    /// Returns the location of `field` within `record`.
    fn field(&self, record: &str, field: &str) -> Option<FieldInfo>;

    /// Returns the size of `record` in bytes.
    fn record_size(&self, record: &str) -> Option<u64>;

    /// Returns the enumerators of the named enumeration, in declaration order.
    fn enumerators(&self, enumeration: &str) -> Option<Vec<Enumerator>>;

    /// Returns the byte order of the target.
    fn byte_order(&self) -> ByteOrder {
        ByteOrder::Little
    }

    /// Returns the size of a pointer on the target, in bytes.
    fn pointer_size(&self) -> usize {
        8
    }
}

/// Reads bytes from the target's kernel address space.
pub trait Memory {
    /// Fills `buf` with the bytes at `address`.
    ///
    /// Fails with a [`Fault`] if any part of the range cannot be read.
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), Fault>;
}

/// Reads bytes through the address space rooted at a page-table base.
pub trait VirtualMemory {
    /// Fills `buf` with the bytes at `address` in the address space whose
    /// top-level page table is at `pgd`.
    fn read_virtual(&self, pgd: u64, address: u64, buf: &mut [u8]) -> Result<(), Fault>;
}

/// A target that can both resolve metadata and read memory.
pub trait Target: Metadata + Memory {}

impl<T: Metadata + Memory + ?Sized> Target for T {}

impl<M: Metadata + ?Sized> Metadata for &M {
    fn constant(&self, name: &str) -> Option<u64> {
        (**self).constant(name)
    }

    fn symbol(&self, name: &str) -> Option<u64> {
        (**self).symbol(name)
    }

    fn field(&self, record: &str, field: &str) -> Option<FieldInfo> {
        (**self).field(record, field)
    }

    fn record_size(&self, record: &str) -> Option<u64> {
        (**self).record_size(record)
    }

    fn enumerators(&self, enumeration: &str) -> Option<Vec<Enumerator>> {
        (**self).enumerators(enumeration)
    }

    fn byte_order(&self) -> ByteOrder {
        (**self).byte_order()
    }

    fn pointer_size(&self) -> usize {
        (**self).pointer_size()
    }
}

impl<M: Memory + ?Sized> Memory for &M {
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), Fault> {
        (**self).read(address, buf)
    }
}

impl<V: VirtualMemory + ?Sized> VirtualMemory for &V {
    fn read_virtual(&self, pgd: u64, address: u64, buf: &mut [u8]) -> Result<(), Fault> {
        (**self).read_virtual(pgd, address, buf)
    }
}
