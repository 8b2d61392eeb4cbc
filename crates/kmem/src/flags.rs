//! Page flags.
//!
//! Flag bit numbers are not fixed: they depend on the kernel version, its
//! configuration and the architecture. Every bit is looked up by name in the
//! target's own metadata, and a flag the target does not define is simply
//! never set.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

use crate::{Error, Page, Result, Session, Target};

macro_rules! page_flags {
    ($($(#[$meta:meta])* $variant:ident => $name:literal,)*) => {
        /// Well-known page flags.
        ///
        /// Any flag name can be queried with [`Session::has_flag`]; these are
        /// the ones common enough to deserve a name on the Rust side.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum PageFlag {
            $($(#[$meta])* $variant,)*
        }

        impl PageFlag {
            /// Every well-known flag.
            pub const ALL: &'static [PageFlag] = &[$(PageFlag::$variant,)*];

            /// The flag's name in the kernel's `enum pageflags`.
            pub const fn name(self) -> &'static str {
                match self {
                    $(PageFlag::$variant => $name,)*
                }
            }
        }
    };
}

page_flags! {
    Active => "PG_active",
    Checked => "PG_checked",
    Dirty => "PG_dirty",
    DoubleMap => "PG_double_map",
    Error => "PG_error",
    Foreign => "PG_foreign",
    HasHwpoisoned => "PG_has_hwpoisoned",
    /// First page of a compound page.
    Head => "PG_head",
    Hwpoison => "PG_hwpoison",
    Idle => "PG_idle",
    Isolated => "PG_isolated",
    Locked => "PG_locked",
    Lru => "PG_lru",
    MappedToDisk => "PG_mappedtodisk",
    Mlocked => "PG_mlocked",
    OwnerPriv1 => "PG_owner_priv_1",
    Pinned => "PG_pinned",
    Private => "PG_private",
    Private2 => "PG_private_2",
    Readahead => "PG_readahead",
    Reclaim => "PG_reclaim",
    Referenced => "PG_referenced",
    Reported => "PG_reported",
    Reserved => "PG_reserved",
    SavePinned => "PG_savepinned",
    SkipKasanPoison => "PG_skip_kasan_poison",
    Slab => "PG_slab",
    SlobFree => "PG_slob_free",
    SwapBacked => "PG_swapbacked",
    Uncached => "PG_uncached",
    Unevictable => "PG_unevictable",
    Uptodate => "PG_uptodate",
    VmemmapSelfHosted => "PG_vmemmap_self_hosted",
    Waiters => "PG_waiters",
    Workingset => "PG_workingset",
    Writeback => "PG_writeback",
    XenRemapped => "PG_xen_remapped",
    Young => "PG_young",
}

impl AsRef<str> for PageFlag {
    fn as_ref(&self) -> &str {
        self.name()
    }
}

impl fmt::Display for PageFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The target's bit-to-name table for `enum pageflags`.
#[derive(Debug)]
pub(crate) struct FlagNames {
    /// Number of low bits of the flags word that hold flags.
    count: u32,
    /// Every name of each bit, in declaration order.
    names: BTreeMap<u32, Vec<String>>,
}

impl FlagNames {
    fn mask(&self) -> u64 {
        match self.count {
            64 => u64::MAX,
            count => (1 << count) - 1,
        }
    }
}

/// The decoded flags of one page descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFlags {
    raw: u64,
    names: Vec<String>,
    residual: u64,
}

impl PageFlags {
    /// The full flags word as read, including bits above the flags (zone,
    /// node and section numbers).
    pub fn raw(&self) -> u64 {
        self.raw
    }

    /// Names of the set flags, in ascending bit order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Set flag bits the target has no name for.
    pub fn residual(&self) -> u64 {
        self.residual
    }

    /// Returns whether a flag of this name is set.
    pub fn contains(&self, name: impl AsRef<str>) -> bool {
        self.names.iter().any(|n| n == name.as_ref())
    }

    /// Returns whether no flag bit is set.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.residual == 0
    }
}

/// Formats as `PG_a|PG_b`, with unnamed bits appended in hex and `0` when no
/// flag is set.
impl fmt::Display for PageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("0");
        }
        let mut separator = "";
        for name in &self.names {
            write!(f, "{separator}{name}")?;
            separator = "|";
        }
        if self.residual != 0 {
            write!(f, "{separator}{:#x}", self.residual)?;
        }
        Ok(())
    }
}

impl<T: Target> Session<T> {
    /// Returns the bit number of the page flag `name`, or `None` if the target
    /// does not define it.
    ///
    /// Each name is looked up once per session, whether or not it is found.
    pub fn flag_bit(&self, name: &str) -> Option<u32> {
        if let Some(bit) = self.flag_bits.read().get(name) {
            return *bit;
        }

        let bit = self
            .target()
            .constant(name)
            .and_then(|value| u32::try_from(value).ok())
            .filter(|&bit| bit < 64);
        match bit {
            Some(bit) => log::trace!("page flag {} is bit {}", name, bit),
            None => log::debug!("page flag {} is not defined by the target", name),
        }
        self.flag_bits.write().insert(name.to_string(), bit);
        bit
    }

    /// Returns whether `page` has the flag `flag` set.
    ///
    /// A flag the target does not define is never set, and the descriptor is
    /// not read in that case.
    pub fn has_flag(&self, page: Page, flag: impl AsRef<str>) -> Result<bool> {
        let Some(bit) = self.flag_bit(flag.as_ref()) else {
            return Ok(false);
        };
        Ok(self.page_flags_word(page)? >> bit & 1 != 0)
    }

    /// Decodes every flag set on `page` using the target's own flag numbering.
    ///
    /// Bits above `__NR_PAGEFLAGS` hold other data and are ignored. Where the
    /// kernel gives one bit several names, every name is listed, in
    /// declaration order.
    pub fn decode_page_flags(&self, page: Page) -> Result<PageFlags> {
        let table = self.flag_names()?;
        let raw = self.page_flags_word(page)?;

        let mut remaining = raw & table.mask();
        let mut names = Vec::new();
        for (&bit, aliases) in &table.names {
            if remaining & (1 << bit) != 0 {
                names.extend(aliases.iter().cloned());
                remaining &= !(1 << bit);
            }
        }
        Ok(PageFlags {
            raw,
            names,
            residual: remaining,
        })
    }

    fn flag_names(&self) -> Result<&FlagNames> {
        self.flag_names.try_call_once(|| {
            let count = self
                .target()
                .constant("__NR_PAGEFLAGS")
                .ok_or_else(|| Error::unavailable("__NR_PAGEFLAGS"))?;
            if count > 64 {
                return Err(Error::invalid(
                    "__NR_PAGEFLAGS",
                    "more flags than bits in a word",
                ));
            }
            let enumerators = self
                .target()
                .enumerators("pageflags")
                .ok_or_else(|| Error::unavailable("enum pageflags"))?;

            let mut names: BTreeMap<u32, Vec<String>> = BTreeMap::new();
            for enumerator in enumerators {
                if enumerator.value >= count {
                    continue;
                }
                let aliases = names.entry(enumerator.value as u32).or_default();
                if !aliases.contains(&enumerator.name) {
                    aliases.push(enumerator.name);
                }
            }
            log::debug!("{} page flags, {} named", count, names.len());
            Ok(FlagNames {
                count: count as u32,
                names,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EmulatedTarget;

    const PAGE: u64 = EmulatedTarget::VMEMMAP_START;

    fn session_with_flags(flags: u64) -> Session<EmulatedTarget> {
        let target = EmulatedTarget::linux_vmemmap();
        target.write_descriptor(PAGE, flags, 0);
        Session::new(target)
    }

    mod lookup {
        use super::*;

        #[test]
        fn flag_bits_come_from_the_target() {
            let session = Session::new(EmulatedTarget::linux_vmemmap());
            assert_eq!(session.flag_bit("PG_locked"), Some(0));
            assert_eq!(session.flag_bit("PG_head"), Some(6));
            assert_eq!(session.flag_bit("PG_readahead"), Some(18));
            assert_eq!(session.flag_bit("PG_young"), None);
        }

        #[test]
        fn absence_is_cached() {
            let session = Session::new(EmulatedTarget::linux_vmemmap());
            assert_eq!(session.flag_bit("PG_idle"), None);
            assert_eq!(session.flag_bits.read().get("PG_idle"), Some(&None));
        }

        #[test]
        fn out_of_range_bit_is_absent() {
            let mut target = EmulatedTarget::linux_vmemmap();
            target.define_constant("PG_bogus", 64);
            assert_eq!(Session::new(target).flag_bit("PG_bogus"), None);
        }

        #[test]
        fn has_flag() {
            let session = session_with_flags(1 << 5 | 1 << 8);
            let page = Page::from(PAGE);
            assert_eq!(session.has_flag(page, PageFlag::Lru), Ok(true));
            assert_eq!(session.has_flag(page, PageFlag::Active), Ok(true));
            assert_eq!(session.has_flag(page, "PG_dirty"), Ok(false));
        }

        #[test]
        fn absent_flag_is_never_set() {
            let session = session_with_flags(u64::MAX);
            assert_eq!(session.has_flag(Page::from(PAGE), PageFlag::Young), Ok(false));
        }

        #[test]
        fn absent_flag_does_not_read() {
            let session = Session::new(EmulatedTarget::linux_vmemmap());
            assert_eq!(session.has_flag(Page::from(PAGE), PageFlag::Idle), Ok(false));
            assert!(session.has_flag(Page::from(PAGE), PageFlag::Lru).unwrap_err().is_fault());
        }

        #[test]
        fn well_known_names() {
            assert!(PageFlag::ALL.iter().all(|flag| flag.name().starts_with("PG_")));
            assert!(PageFlag::ALL.contains(&PageFlag::Head));
            assert_eq!(alloc::format!("{}", PageFlag::OwnerPriv1), "PG_owner_priv_1");
        }
    }

    mod decode {
        use super::*;

        #[test]
        fn names_in_bit_order() {
            // lru, mlocked, swapbacked, unevictable
            let session = session_with_flags(1 << 5 | 1 << 19 | 1 << 20 | 1 << 21);
            let flags = session.decode_page_flags(Page::from(PAGE)).unwrap();
            assert_eq!(
                flags.names(),
                ["PG_lru", "PG_swapbacked", "PG_unevictable", "PG_mlocked"]
            );
            assert_eq!(
                alloc::format!("{flags}"),
                "PG_lru|PG_swapbacked|PG_unevictable|PG_mlocked"
            );
        }

        #[test]
        fn every_alias_of_a_bit_is_listed() {
            let session = session_with_flags(1 << 4 | 1 << 18);
            let page = Page::from(PAGE);
            let flags = session.decode_page_flags(page).unwrap();
            assert_eq!(
                flags.names(),
                ["PG_dirty", "PG_savepinned", "PG_reclaim", "PG_readahead", "PG_isolated"]
            );
            assert_eq!(
                alloc::format!("{flags}"),
                "PG_dirty|PG_savepinned|PG_reclaim|PG_readahead|PG_isolated"
            );
            for name in ["PG_readahead", "PG_isolated", "PG_savepinned"] {
                assert_eq!(session.has_flag(page, name), Ok(true));
                assert!(flags.contains(name));
            }
        }

        #[test]
        fn repeated_enumerators_are_listed_once() {
            let mut target = EmulatedTarget::linux_vmemmap();
            target
                .define_enum(
                    "pageflags",
                    &[("PG_locked", 0), ("PG_lru", 1), ("PG_locked", 0), ("__NR_PAGEFLAGS", 2)],
                )
                .define_constant("__NR_PAGEFLAGS", 2);
            target.write_descriptor(PAGE, 0b11, 0);
            let flags = Session::new(target)
                .decode_page_flags(Page::from(PAGE))
                .unwrap();
            assert_eq!(flags.names(), ["PG_locked", "PG_lru"]);
        }

        #[test]
        fn high_bits_are_masked() {
            let raw = 0x0017_ff80_0000_0000 | 1 << 14;
            let session = session_with_flags(raw);
            let flags = session.decode_page_flags(Page::from(PAGE)).unwrap();
            assert_eq!(flags.raw(), raw);
            assert_eq!(flags.names(), ["PG_reserved"]);
            assert_eq!(flags.residual(), 0);
        }

        #[test]
        fn unnamed_bits_are_residual() {
            let mut target = EmulatedTarget::linux_vmemmap();
            target
                .define_enum("pageflags", &[("PG_locked", 0), ("PG_lru", 2), ("__NR_PAGEFLAGS", 4)])
                .define_constant("__NR_PAGEFLAGS", 4);
            target.write_descriptor(PAGE, 0b1111, 0);
            let flags = Session::new(target)
                .decode_page_flags(Page::from(PAGE))
                .unwrap();

            assert_eq!(flags.names(), ["PG_locked", "PG_lru"]);
            assert_eq!(flags.residual(), 0b1010);
            assert_eq!(alloc::format!("{flags}"), "PG_locked|PG_lru|0xa");
        }

        #[test]
        fn target_numbering_is_used() {
            let mut target = EmulatedTarget::linux_vmemmap();
            target
                .define_enum(
                    "pageflags",
                    &[("PG_locked", 0), ("PG_referenced", 1), ("PG_lru", 2), ("__NR_PAGEFLAGS", 3)],
                )
                .define_constant("__NR_PAGEFLAGS", 3);
            target.write_descriptor(PAGE, 1 << 2, 0);
            let flags = Session::new(target)
                .decode_page_flags(Page::from(PAGE))
                .unwrap();
            assert_eq!(flags.names(), ["PG_lru"]);
        }

        #[test]
        fn no_flags() {
            let session = session_with_flags(0x0017_ff80_0000_0000);
            let flags = session.decode_page_flags(Page::from(PAGE)).unwrap();
            assert!(flags.is_empty());
            assert_eq!(alloc::format!("{flags}"), "0");
        }

        #[test]
        fn decoding_is_stable() {
            let session = session_with_flags(0x1f_ffff);
            let first = session.decode_page_flags(Page::from(PAGE)).unwrap();
            let second = session.decode_page_flags(Page::from(PAGE)).unwrap();
            assert_eq!(first, second);
            // 21 flags, 11 of them with aliases below bit 21
            assert_eq!(first.names().len(), 32);
            for name in first.names() {
                assert!(session.flag_bit(name).is_some());
            }
        }

        #[test]
        fn flag_count_is_required() {
            let mut target = EmulatedTarget::linux_vmemmap();
            target.remove_constant("__NR_PAGEFLAGS");
            target.write_descriptor(PAGE, 1, 0);
            assert_eq!(
                Session::new(target).decode_page_flags(Page::from(PAGE)),
                Err(Error::MetadataUnavailable("__NR_PAGEFLAGS".into()))
            );
        }

        #[test]
        fn unreadable_descriptor_faults() {
            let session = Session::new(EmulatedTarget::linux_vmemmap());
            let err = session.decode_page_flags(Page::from(PAGE)).unwrap_err();
            assert!(err.is_fault());
        }
    }
}
