#![cfg_attr(not(test), no_std)]

//! # Kernel Memory (kmem)
//!
//! `kmem` is the address-translation and page-state-decoding core of a kernel
//! memory introspection toolkit. Given read access to a target kernel (a running
//! system or a crash dump) and the target's own debug metadata, it provides:
//!
//! - Conversions between page frame numbers, physical addresses, directly mapped
//!   virtual addresses and `struct page` descriptors.
//! - Resolution of the page descriptor array for the vmemmap and flat memory models.
//! - Compound page classification, including HugeTLB vmemmap "fake head" pages.
//! - Page flag decoding using the target's own flag numbering.
//! - Lazy enumeration of every page descriptor in the target.
//!
//! Nothing here knows a kernel's struct layout or flag numbering ahead of time.
//! Everything is resolved per [`Session`] through the [`Metadata`] and [`Memory`]
//! traits, and descriptor contents are re-read on every query.

extern crate alloc;

mod address;
mod compound;
#[cfg(any(test, feature = "software-emulation"))]
mod emulated;
mod enumerate;
mod error;
mod flags;
mod layout;
mod numbers;
mod page;
mod page_array;
mod process;
mod session;
mod stats;
mod tagged;
mod target;
mod translate;

pub use address::{PhysicalAddress, VirtualAddress};
pub use compound::PageKind;
#[cfg(any(test, feature = "software-emulation"))]
pub use emulated::EmulatedTarget;
pub use enumerate::PageIter;
pub use error::{Error, Fault, Result};
pub use flags::{PageFlag, PageFlags};
pub use layout::{Field, FieldSpec, Width};
pub use numbers::Pfn;
pub use page::Page;
pub use page_array::MemoryModel;
pub use session::{ArchConstants, Session};
pub use tagged::TaggedAddress;
pub use target::{ByteOrder, Enumerator, FieldInfo, Memory, Metadata, Target, VirtualMemory};
