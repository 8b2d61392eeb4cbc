//! Page descriptors.
//!
//! A page descriptor is the target's `struct page` for one page frame. `kmem`
//! only ever holds the descriptor's address; the fields it needs are read fresh
//! from the target each time, since a live kernel may change them at any moment.

use core::fmt;

use crate::layout::FieldSpec;
use crate::{Result, Session, TaggedAddress, Target, VirtualAddress};

pub(crate) const FLAGS: FieldSpec = FieldSpec::word("page", "flags");
pub(crate) const COMPOUND_HEAD: FieldSpec = FieldSpec::word("page", "compound_head");
pub(crate) const COMPOUND_ORDER: FieldSpec = FieldSpec::bytes("page", "compound_order", 1);
pub(crate) const FOLIO_ORDER: FieldSpec = FieldSpec::bytes("folio", "_folio_order", 1);

/// The address of a page descriptor (`struct page *`) in the target.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Page(VirtualAddress);

impl Page {
    /// Creates a page descriptor reference from its address.
    #[inline]
    pub const fn new(address: VirtualAddress) -> Self {
        Self(address)
    }

    /// Returns the descriptor's address.
    #[inline]
    pub const fn address(self) -> VirtualAddress {
        self.0
    }

    /// Returns the descriptor's address as a raw value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0.as_u64()
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page({:#x})", self.0.as_u64())
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0.as_u64())
    }
}

impl From<u64> for Page {
    fn from(address: u64) -> Self {
        Self(VirtualAddress::new(address))
    }
}

impl<T: Target> Session<T> {
    /// Returns the descriptor `n` slots after `page`.
    pub fn nth_page(&self, page: Page, n: u64) -> Result<Page> {
        let stride = self.descriptor_size()?;
        Ok(Page::new(page.address() + n.wrapping_mul(stride)))
    }

    /// Reads the descriptor's flags word.
    pub fn page_flags_word(&self, page: Page) -> Result<u64> {
        self.read_field(page.as_u64(), &FLAGS)
    }

    /// Reads the descriptor's `compound_head` word.
    pub fn compound_head_word(&self, page: Page) -> Result<TaggedAddress> {
        self.read_field(page.as_u64(), &COMPOUND_HEAD)
            .map(TaggedAddress::from_word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EmulatedTarget;

    #[test]
    fn formatting() {
        let page = Page::from(0xffff_ea00_0000_0040);
        assert_eq!(alloc::format!("{page}"), "0xffffea0000000040");
        assert_eq!(alloc::format!("{page:?}"), "Page(0xffffea0000000040)");
    }

    #[test]
    fn nth_page_uses_descriptor_stride() {
        let session = Session::new(EmulatedTarget::linux_vmemmap());
        let page = Page::from(EmulatedTarget::VMEMMAP_START);
        assert_eq!(
            session.nth_page(page, 3).unwrap().as_u64(),
            EmulatedTarget::VMEMMAP_START + 3 * 64
        );
    }

    #[test]
    fn reads_descriptor_words() {
        let target = EmulatedTarget::linux_vmemmap();
        let page = EmulatedTarget::VMEMMAP_START;
        target.write_descriptor(page, 1 << 5, page - 64 + 1);
        let session = Session::new(target);

        assert_eq!(session.page_flags_word(Page::from(page)), Ok(1 << 5));
        let head = session.compound_head_word(Page::from(page)).unwrap();
        assert!(head.is_tagged);
        assert_eq!(head.payload, page - 64);
    }

    #[test]
    fn unreadable_descriptor_faults() {
        let session = Session::new(EmulatedTarget::linux_vmemmap());
        let err = session
            .page_flags_word(Page::from(EmulatedTarget::VMEMMAP_START))
            .unwrap_err();
        assert!(err.is_fault());
    }
}
