//! Page frame numbers.

use core::fmt;

/// A physical page frame number (PFN).
///
/// The PFN of a physical address is the address shifted right by the target's
/// page shift. Converting between the two needs session constants, so that lives
/// on [`Session`](crate::Session) rather than here.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Pfn(u64);

impl Pfn {
    /// Creates a new page frame number.
    #[inline]
    pub const fn new(number: u64) -> Self {
        Self(number)
    }

    /// Returns the raw page frame number.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pfn({:#x})", self.0)
    }
}

impl fmt::Display for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for Pfn {
    #[inline]
    fn from(number: u64) -> Self {
        Self(number)
    }
}
