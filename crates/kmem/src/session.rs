//! Per-target analysis sessions.
//!
//! A [`Session`] binds a [`Target`] to the values derived from it that never
//! change while the target is selected: architecture constants, the page
//! descriptor array base, flag bit numbers and record layouts. Each is resolved
//! on first use and kept for the lifetime of the session. Descriptor contents
//! are never cached.

use alloc::collections::BTreeMap;
use alloc::string::String;

use spin::{Once, RwLock};

use crate::flags::FlagNames;
use crate::layout::Field;
use crate::page_array::PageArray;
use crate::{ByteOrder, Error, Result, Target};

/// Architecture constants of a target, as resolved by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchConstants {
    /// log2 of the page size.
    pub page_shift: u32,
    /// Offset between physical addresses and their direct mapping.
    pub direct_map_offset: u64,
    /// Size of one page descriptor (`struct page`) in bytes.
    pub descriptor_size: u64,
    /// Byte order of the target.
    pub byte_order: ByteOrder,
    /// Size of a pointer on the target, in bytes.
    pub pointer_size: usize,
}

impl ArchConstants {
    /// Page size in bytes.
    pub const fn page_size(&self) -> u64 {
        1 << self.page_shift
    }
}

/// An analysis session over a single target.
///
/// Sessions hold no global state, so any number of targets can be inspected at
/// once. A session is `Sync` whenever its target is; the caches are write-once.
pub struct Session<T> {
    target: T,
    pub(crate) page_shift: Once<u32>,
    pub(crate) direct_map_offset: Once<u64>,
    pub(crate) descriptor_size: Once<u64>,
    pub(crate) page_array: Once<PageArray>,
    pub(crate) flag_bits: RwLock<BTreeMap<String, Option<u32>>>,
    pub(crate) flag_names: Once<FlagNames>,
    pub(crate) fields: RwLock<BTreeMap<(&'static str, &'static str), Field>>,
}

impl<T> Session<T> {
    /// Creates a session for `target`. Nothing is read until first use.
    pub fn new(target: T) -> Self {
        Self {
            target,
            page_shift: Once::new(),
            direct_map_offset: Once::new(),
            descriptor_size: Once::new(),
            page_array: Once::new(),
            flag_bits: RwLock::new(BTreeMap::new()),
            flag_names: Once::new(),
            fields: RwLock::new(BTreeMap::new()),
        }
    }

    /// Returns the target this session reads from.
    pub fn target(&self) -> &T {
        &self.target
    }

    /// Ends the session, returning the target.
    pub fn into_target(self) -> T {
        self.target
    }
}

impl<T: Target> Session<T> {
    /// Returns the value of a global: a metadata constant of that name if there
    /// is one, otherwise the pointer-sized value stored at the symbol of that
    /// name. Returns `None` if the target has neither.
    pub fn global(&self, name: &str) -> Result<Option<u64>> {
        if let Some(value) = self.target.constant(name) {
            return Ok(Some(value));
        }
        match self.target.symbol(name) {
            Some(address) => self.read_word(address).map(Some),
            None => Ok(None),
        }
    }

    /// Like [`Session::global`], but a missing global is an error.
    pub fn require_global(&self, name: &str) -> Result<u64> {
        self.global(name)?.ok_or_else(|| Error::unavailable(name))
    }

    /// Returns the first of `names` that the target defines, with its value.
    pub(crate) fn first_global<'n>(&self, names: &[&'n str]) -> Result<Option<(&'n str, u64)>> {
        for &name in names {
            if let Some(value) = self.global(name)? {
                return Ok(Some((name, value)));
            }
        }
        Ok(None)
    }

    /// Resolves all architecture constants.
    pub fn arch(&self) -> Result<ArchConstants> {
        Ok(ArchConstants {
            page_shift: self.page_shift()?,
            direct_map_offset: self.direct_map_offset()?,
            descriptor_size: self.descriptor_size()?,
            byte_order: self.target.byte_order(),
            pointer_size: self.target.pointer_size(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EmulatedTarget;

    #[test]
    fn globals_prefer_constants() {
        let mut target = EmulatedTarget::linux_vmemmap();
        target.define_constant("max_pfn", 99);
        let session = Session::new(target);
        assert_eq!(session.global("max_pfn"), Ok(Some(99)));
    }

    #[test]
    fn globals_fall_back_to_symbol_values() {
        let session = Session::new(EmulatedTarget::linux_vmemmap());
        assert_eq!(session.global("max_pfn"), Ok(Some(16)));
        assert_eq!(session.global("no_such_global"), Ok(None));
        assert_eq!(
            session.require_global("no_such_global"),
            Err(Error::MetadataUnavailable("no_such_global".into()))
        );
    }

    #[test]
    fn unreadable_global_is_a_fault() {
        let mut target = EmulatedTarget::linux_vmemmap();
        target.define_symbol("unmapped_global", 0xdead_0000);
        let session = Session::new(target);
        assert!(session.global("unmapped_global").unwrap_err().is_fault());
    }

    #[test]
    fn first_global_picks_in_order() {
        let session = Session::new(EmulatedTarget::linux_vmemmap());
        assert_eq!(
            session.first_global(&["missing", "max_pfn", "min_low_pfn"]),
            Ok(Some(("max_pfn", 16)))
        );
    }

    #[test]
    fn arch_constants() {
        let session = Session::new(EmulatedTarget::linux_vmemmap());
        let arch = session.arch().unwrap();
        assert_eq!(arch.page_shift, 12);
        assert_eq!(arch.page_size(), 4096);
        assert_eq!(arch.direct_map_offset, EmulatedTarget::PAGE_OFFSET);
        assert_eq!(arch.descriptor_size, 64);
        assert_eq!(arch.byte_order, ByteOrder::Little);
        assert_eq!(arch.pointer_size, 8);
    }

    #[test]
    fn sessions_share_a_borrowed_target() {
        let target = EmulatedTarget::linux_vmemmap();
        let a = Session::new(&target);
        let b = Session::new(&target);
        assert_eq!(a.arch(), b.arch());
    }
}
