//! Resolution of the page descriptor array.
//!
//! Every translation between page frames and descriptors is relative to the
//! address that the descriptor of frame 0 would have. How to find that address
//! depends on the kernel's memory model:
//!
//! - With a virtually mapped array (`CONFIG_SPARSEMEM_VMEMMAP`), the array base
//!   is a global, `vmemmap` (or `vmemmap_base` when randomized).
//! - With flat memory (`CONFIG_FLATMEM`), node 0's `node_mem_map` describes
//!   frames from `node_start_pfn` onwards, so frame 0 sits `node_start_pfn`
//!   descriptors before it.
//!
//! Classic sparse memory keeps one array per section with no common base and is
//! reported as [`Error::UnsupportedMemoryModel`].

use core::fmt;

use crate::layout::FieldSpec;
use crate::{Error, Page, Result, Session, Target, VirtualAddress};

const VMEMMAP_GLOBALS: &[&str] = &["vmemmap", "vmemmap_base"];
const NODE_MEM_MAP: FieldSpec = FieldSpec::word("pglist_data", "node_mem_map");
const NODE_START_PFN: FieldSpec = FieldSpec::word("pglist_data", "node_start_pfn");

/// How the target lays out its page descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryModel {
    /// One virtually contiguous descriptor array.
    Vmemmap,
    /// A single node's descriptor array.
    Flat,
}

impl fmt::Display for MemoryModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vmemmap => write!(f, "sparse (vmemmap)"),
            Self::Flat => write!(f, "flat"),
        }
    }
}

/// The resolved descriptor array of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PageArray {
    pub(crate) model: MemoryModel,
    pub(crate) base: Page,
}

impl<T: Target> Session<T> {
    /// Returns the address of the descriptor for page frame 0.
    ///
    /// Resolved once per session; failures are not cached.
    pub fn page_array_base(&self) -> Result<Page> {
        Ok(self.page_array()?.base)
    }

    /// Returns the memory model the target uses for its descriptors.
    pub fn memory_model(&self) -> Result<MemoryModel> {
        Ok(self.page_array()?.model)
    }

    fn page_array(&self) -> Result<PageArray> {
        self.page_array
            .try_call_once(|| {
                let array = match self.vmemmap_array() {
                    Err(Error::MetadataUnavailable(_)) => self.flat_array(),
                    other => other,
                }?;
                log::debug!(
                    "page descriptor array: {} memory model, frame 0 at {}",
                    array.model,
                    array.base
                );
                Ok(array)
            })
            .copied()
    }

    fn vmemmap_array(&self) -> Result<PageArray> {
        let (name, base) = self
            .first_global(VMEMMAP_GLOBALS)?
            .ok_or_else(|| Error::unavailable("vmemmap"))?;
        log::trace!("vmemmap base {:#x} (from {})", base, name);
        Ok(PageArray {
            model: MemoryModel::Vmemmap,
            base: Page::from(base),
        })
    }

    fn flat_array(&self) -> Result<PageArray> {
        // Sparse kernels have `mem_section`, and may still have a single
        // `contig_page_data` node, but no `node_mem_map` for it.
        if self.target().symbol("mem_section").is_some() {
            log::warn!("target uses sparse memory without vmemmap, which is not supported");
            return Err(Error::UnsupportedMemoryModel);
        }
        let Some(node) = self.target().symbol("contig_page_data") else {
            return Err(Error::UnsupportedMemoryModel);
        };

        let mem_map = match self.read_field(node, &NODE_MEM_MAP) {
            Err(Error::MetadataUnavailable(_)) => {
                log::warn!("node 0 has no node_mem_map, so memory is not flat");
                return Err(Error::UnsupportedMemoryModel);
            }
            other => other?,
        };
        let start_pfn = self.read_field(node, &NODE_START_PFN)?;
        let stride = self.descriptor_size()?;
        let base = VirtualAddress::new(mem_map) - start_pfn.wrapping_mul(stride);
        log::trace!(
            "node_mem_map {:#x} starts at frame {:#x}",
            mem_map,
            start_pfn
        );
        Ok(PageArray {
            model: MemoryModel::Flat,
            base: Page::new(base),
        })
    }
}
