//! Enumeration of every page descriptor of a target.

use core::iter::FusedIterator;

use crate::{Page, Pfn, Result, Session, Target, VirtualAddress};

/// A lazy iterator over the descriptors of a range of page frames.
///
/// Produced by [`Session::for_each_page`]. Yielding a descriptor never reads
/// the target, so descriptors of absent or offline frames are yielded too;
/// reading them is where the fault shows up.
#[derive(Debug, Clone)]
pub struct PageIter {
    next: u64,
    end: u64,
    base: VirtualAddress,
    stride: u64,
}

impl PageIter {
    /// The frame whose descriptor will be yielded next.
    pub fn next_pfn(&self) -> Pfn {
        Pfn::new(self.next)
    }

    fn page(&self, pfn: u64) -> Page {
        Page::new(self.base + pfn.wrapping_mul(self.stride))
    }
}

impl Iterator for PageIter {
    type Item = Page;

    fn next(&mut self) -> Option<Page> {
        if self.next >= self.end {
            return None;
        }
        let page = self.page(self.next);
        self.next += 1;
        Some(page)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.saturating_sub(self.next);
        match usize::try_from(remaining) {
            Ok(n) => (n, Some(n)),
            Err(_) => (usize::MAX, None),
        }
    }

    fn nth(&mut self, n: usize) -> Option<Page> {
        self.next = self.next.saturating_add(n as u64).min(self.end);
        self.next()
    }
}

impl DoubleEndedIterator for PageIter {
    fn next_back(&mut self) -> Option<Page> {
        if self.next >= self.end {
            return None;
        }
        self.end -= 1;
        Some(self.page(self.end))
    }
}

impl FusedIterator for PageIter {}

impl<T: Target> Session<T> {
    /// Returns the first and one-past-last populated page frame numbers,
    /// `min_low_pfn` and `max_pfn`.
    pub fn pfn_range(&self) -> Result<(Pfn, Pfn)> {
        let min = self.require_global("min_low_pfn")?;
        let max = self.require_global("max_pfn")?;
        Ok((Pfn::new(min), Pfn::new(max)))
    }

    /// Returns an iterator over the descriptor of every populated page frame.
    ///
    /// The bounds and the descriptor array are resolved here; iteration
    /// itself does no I/O. Call again to start over.
    pub fn for_each_page(&self) -> Result<PageIter> {
        let (min, max) = self.pfn_range()?;
        let base = self.page_array_base()?;
        let stride = self.descriptor_size()?;
        log::debug!("enumerating page frames {}..{}", min, max);
        Ok(PageIter {
            next: min.as_u64(),
            end: max.as_u64(),
            base: base.address(),
            stride,
        })
    }
}
