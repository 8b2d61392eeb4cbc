//! Compound page classification.
//!
//! A compound page is a power-of-two run of page frames managed as one unit. Its
//! first descriptor (the head) has `PG_head` set and stores the allocation order
//! in the descriptor that follows it. Every other descriptor (a tail) stores
//! `head | 1` in `compound_head`.
//!
//! HugeTLB vmemmap optimization maps several tail descriptors of a huge page
//! onto the same physical page, so descriptors past the first few are copies of
//! the head and carry `PG_head` too. Such a "fake head" is recognised by its
//! successor: that descriptor is a tail pointing at a *different* head.
//!
//! Classification never looks further than a descriptor and its successor, and
//! re-reads both on every call.

use core::fmt;

use crate::page::{COMPOUND_ORDER, FOLIO_ORDER};
use crate::{Error, Page, Result, Session, Target};

/// The role a descriptor plays in a compound page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// Not part of a compound page.
    Standalone,
    /// First page of a compound page.
    Head,
    /// Any other page of a compound page, including fake heads.
    Tail,
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standalone => write!(f, "standalone"),
            Self::Head => write!(f, "head"),
            Self::Tail => write!(f, "tail"),
        }
    }
}

impl<T: Target> Session<T> {
    fn has_head_flag(&self, page: Page) -> Result<bool> {
        let bit = self
            .flag_bit("PG_head")
            .ok_or_else(|| Error::unavailable("PG_head"))?;
        let flags = self.page_flags_word(page)?;
        Ok(flags.checked_shr(bit).unwrap_or(0) & 1 != 0)
    }

    /// Returns whether `page` carries `PG_head` only because its descriptor is
    /// a vmemmap-optimized copy of a real head.
    ///
    /// Reads the successor's `compound_head`. A tagged word pointing back at
    /// `page` itself is a genuine head whose first tail is intact.
    pub fn is_fake_head(&self, page: Page) -> Result<bool> {
        let next = self.compound_head_word(self.nth_page(page, 1)?)?;
        Ok(next.is_tagged && next.payload != page.as_u64())
    }

    /// Returns whether `page` is the head of a compound page.
    pub fn is_head(&self, page: Page) -> Result<bool> {
        Ok(self.has_head_flag(page)? && !self.is_fake_head(page)?)
    }

    /// Returns whether `page` is a tail of a compound page.
    pub fn is_tail(&self, page: Page) -> Result<bool> {
        if self.compound_head_word(page)?.is_tagged {
            return Ok(true);
        }
        if self.has_head_flag(page)? {
            return self.is_fake_head(page);
        }
        Ok(false)
    }

    /// Returns whether `page` is part of a compound page.
    pub fn is_compound(&self, page: Page) -> Result<bool> {
        Ok(self.has_head_flag(page)? || self.compound_head_word(page)?.is_tagged)
    }

    /// Classifies `page` as standalone, head or tail.
    pub fn classify(&self, page: Page) -> Result<PageKind> {
        if self.is_tail(page)? {
            Ok(PageKind::Tail)
        } else if self.is_head(page)? {
            Ok(PageKind::Head)
        } else {
            Ok(PageKind::Standalone)
        }
    }

    /// Returns the head of the compound page containing `page`, or `page`
    /// itself if it is not a tail.
    pub fn compound_head(&self, page: Page) -> Result<Page> {
        if let Some(head) = self.compound_head_word(page)?.tagged_payload() {
            return Ok(Page::from(head));
        }
        if self.has_head_flag(page)? {
            let next = self.compound_head_word(self.nth_page(page, 1)?)?;
            if let Some(head) = next.tagged_payload() {
                return Ok(Page::from(head));
            }
        }
        Ok(page)
    }

    /// Returns the allocation order of `page`: 0 unless it is a head.
    pub fn compound_order(&self, page: Page) -> Result<u32> {
        if !self.is_head(page)? {
            return Ok(0);
        }

        // Older kernels keep the order in the first tail's descriptor; folio
        // kernels describe it relative to the head.
        let order = match self.field(&COMPOUND_ORDER) {
            Ok(field) => {
                let first_tail = self.nth_page(page, 1)?;
                self.read_uint(first_tail.as_u64().wrapping_add(field.offset), field.width)?
            }
            Err(Error::MetadataUnavailable(_)) => self
                .read_field(page.as_u64(), &FOLIO_ORDER)
                .map_err(|err| match err {
                    Error::MetadataUnavailable(_) => Error::unavailable("page.compound_order"),
                    other => other,
                })?,
            Err(err) => return Err(err),
        };
        if order >= 64 {
            return Err(Error::invalid("page.compound_order", "order is not below 64"));
        }
        Ok(order as u32)
    }

    /// Returns the number of page frames in the compound page headed by `page`.
    pub fn compound_nr(&self, page: Page) -> Result<u64> {
        Ok(1 << self.compound_order(page)?)
    }

    /// Returns the size in bytes of the compound page headed by `page`.
    pub fn compound_size(&self, page: Page) -> Result<u64> {
        let order = self.compound_order(page)?;
        Ok(self.page_size()? << order)
    }
}
