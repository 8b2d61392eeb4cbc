//! Conversions between page frame numbers, physical addresses, directly mapped
//! virtual addresses and page descriptors.
//!
//! All conversions are arithmetic on session constants. The only reads are the
//! ones needed to resolve those constants the first time they are used.

use crate::{Error, Page, PhysicalAddress, Pfn, Result, Session, Target, VirtualAddress};

impl<T: Target> Session<T> {
    /// Returns log2 of the target's page size.
    ///
    /// Taken from `PAGE_SHIFT`, or derived from `PAGE_SIZE`.
    pub fn page_shift(&self) -> Result<u32> {
        self.page_shift
            .try_call_once(|| {
                if let Some(shift) = self.target().constant("PAGE_SHIFT") {
                    if shift >= 64 {
                        return Err(Error::invalid("PAGE_SHIFT", "shift is not below 64"));
                    }
                    return Ok(shift as u32);
                }
                let size = self
                    .target()
                    .constant("PAGE_SIZE")
                    .ok_or_else(|| Error::unavailable("PAGE_SHIFT"))?;
                if !size.is_power_of_two() {
                    return Err(Error::invalid("PAGE_SIZE", "not a power of two"));
                }
                Ok(size.trailing_zeros())
            })
            .copied()
    }

    /// Returns the target's page size in bytes.
    pub fn page_size(&self) -> Result<u64> {
        Ok(1 << self.page_shift()?)
    }

    /// Returns the offset of the kernel's direct mapping of physical memory.
    ///
    /// Taken from `PAGE_OFFSET`, or from `page_offset_base` on kernels that
    /// randomize the direct mapping.
    pub fn direct_map_offset(&self) -> Result<u64> {
        self.direct_map_offset
            .try_call_once(|| {
                let (name, offset) = self
                    .first_global(&["PAGE_OFFSET", "page_offset_base"])?
                    .ok_or_else(|| Error::unavailable("PAGE_OFFSET"))?;
                log::debug!("direct map offset {:#x} (from {})", offset, name);
                Ok(offset)
            })
            .copied()
    }

    /// Returns the size of one page descriptor in bytes.
    pub fn descriptor_size(&self) -> Result<u64> {
        self.descriptor_size
            .try_call_once(|| {
                let size = self
                    .target()
                    .record_size("page")
                    .ok_or_else(|| Error::unavailable("sizeof(struct page)"))?;
                if size == 0 {
                    return Err(Error::invalid("sizeof(struct page)", "descriptor size is zero"));
                }
                Ok(size)
            })
            .copied()
    }

    /// Returns the physical address of the start of a page frame.
    pub fn pfn_to_phys(&self, pfn: Pfn) -> Result<PhysicalAddress> {
        Ok(PhysicalAddress::new(pfn.as_u64() << self.page_shift()?))
    }

    /// Returns the page frame containing a physical address.
    pub fn phys_to_pfn(&self, addr: PhysicalAddress) -> Result<Pfn> {
        Ok(Pfn::new(addr.as_u64() >> self.page_shift()?))
    }

    /// Returns the directly mapped virtual address of a physical address.
    pub fn phys_to_virt(&self, addr: PhysicalAddress) -> Result<VirtualAddress> {
        Ok(VirtualAddress::new(addr.as_u64()) + self.direct_map_offset()?)
    }

    /// Returns the physical address behind a directly mapped virtual address.
    pub fn virt_to_phys(&self, addr: VirtualAddress) -> Result<PhysicalAddress> {
        Ok(PhysicalAddress::new((addr - self.direct_map_offset()?).as_u64()))
    }

    /// Returns the descriptor of a page frame.
    pub fn pfn_to_page(&self, pfn: Pfn) -> Result<Page> {
        let base = self.page_array_base()?;
        self.nth_page(base, pfn.as_u64())
    }

    /// Returns the page frame described by a descriptor.
    pub fn page_to_pfn(&self, page: Page) -> Result<Pfn> {
        let base = self.page_array_base()?;
        let stride = self.descriptor_size()?;
        Ok(Pfn::new((page.address() - base.address()) / stride))
    }

    /// Returns the physical address of the frame described by a descriptor.
    pub fn page_to_phys(&self, page: Page) -> Result<PhysicalAddress> {
        self.pfn_to_phys(self.page_to_pfn(page)?)
    }

    /// Returns the directly mapped address of the frame described by a descriptor.
    pub fn page_to_virt(&self, page: Page) -> Result<VirtualAddress> {
        self.pfn_to_virt(self.page_to_pfn(page)?)
    }

    /// Returns the directly mapped address of a page frame.
    pub fn pfn_to_virt(&self, pfn: Pfn) -> Result<VirtualAddress> {
        self.phys_to_virt(self.pfn_to_phys(pfn)?)
    }

    /// Returns the descriptor of the frame containing a physical address.
    pub fn phys_to_page(&self, addr: PhysicalAddress) -> Result<Page> {
        self.pfn_to_page(self.phys_to_pfn(addr)?)
    }

    /// Returns the descriptor of the frame containing a directly mapped address.
    pub fn virt_to_page(&self, addr: VirtualAddress) -> Result<Page> {
        self.pfn_to_page(self.virt_to_pfn(addr)?)
    }

    /// Returns the page frame containing a directly mapped address.
    pub fn virt_to_pfn(&self, addr: VirtualAddress) -> Result<Pfn> {
        self.phys_to_pfn(self.virt_to_phys(addr)?)
    }
}
