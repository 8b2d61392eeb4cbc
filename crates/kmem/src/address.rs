//! Address types for the target's physical and virtual address spaces.
//!
//! These wrap raw target addresses so physical and virtual values cannot be mixed
//! up. They are always 64 bits wide regardless of the host, and arithmetic wraps
//! the way address arithmetic in the target kernel does.

use core::fmt;
use core::ops::{Add, Sub};

/// Macro to define common address type functionality.
///
/// This macro generates the basic structure and methods common to both physical
/// and virtual address types, reducing code duplication.
macro_rules! impl_address_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new address.
            #[inline]
            pub const fn new(addr: u64) -> Self {
                Self(addr)
            }

            /// Returns the raw address value.
            #[inline]
            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl fmt::LowerHex for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::LowerHex::fmt(&self.0, f)
            }
        }

        impl From<u64> for $name {
            #[inline]
            fn from(addr: u64) -> Self {
                Self(addr)
            }
        }

        impl From<$name> for u64 {
            #[inline]
            fn from(addr: $name) -> Self {
                addr.0
            }
        }

        impl Add<u64> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: u64) -> Self::Output {
                Self(self.0.wrapping_add(rhs))
            }
        }

        impl Sub<u64> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: u64) -> Self::Output {
                Self(self.0.wrapping_sub(rhs))
            }
        }

        impl Sub<$name> for $name {
            type Output = u64;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0.wrapping_sub(rhs.0)
            }
        }
    };
}

impl_address_common!(
    PhysicalAddress,
    "A physical address in the target machine.\n\n\
     Produced from page frame numbers by shifting with the target's page shift, and\n\
     from directly mapped virtual addresses by removing the direct map offset."
);

impl_address_common!(
    VirtualAddress,
    "A virtual address in the target kernel's address space.\n\n\
     Page descriptors and directly mapped memory both live at kernel virtual\n\
     addresses."
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_hex() {
        assert_eq!(
            alloc::format!("{}", PhysicalAddress::new(0x10_0000)),
            "0x100000"
        );
        assert_eq!(
            alloc::format!("{:?}", VirtualAddress::new(0xffff_8880_0000_0000)),
            "VirtualAddress(0xffff888000000000)"
        );
    }

    #[test]
    fn arithmetic_wraps() {
        let high = VirtualAddress::new(u64::MAX - 1);
        assert_eq!((high + 3).as_u64(), 1);
        assert_eq!((PhysicalAddress::new(0) - 1).as_u64(), u64::MAX);
    }

    #[test]
    fn difference_between_addresses() {
        let a = VirtualAddress::new(0x2000);
        let b = VirtualAddress::new(0x1000);
        assert_eq!(a - b, 0x1000);
    }
}
