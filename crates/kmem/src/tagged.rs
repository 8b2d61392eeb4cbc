//! Pointer words with a tag in the low bit.
//!
//! The kernel stores some pointers with bit 0 set to mark them as something other
//! than a plain pointer. `struct page::compound_head` is the main example: a tail
//! page stores `head | 1` there. Pointers to descriptors are at least word
//! aligned, so the bit is otherwise always clear.

/// A pointer-sized word split into its tag bit and the address it carries.
///
/// ```
/// use kmem::TaggedAddress;
///
/// let tail = TaggedAddress::from_word(0xffff_ea00_0000_0101);
/// assert_eq!(tail.tagged_payload(), Some(0xffff_ea00_0000_0100));
/// assert_eq!(TaggedAddress::from_word(0x40).tagged_payload(), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaggedAddress {
    /// Whether bit 0 of the word was set.
    pub is_tagged: bool,
    /// The word with the tag bit cleared.
    pub payload: u64,
}

impl TaggedAddress {
    const TAG: u64 = 1;

    /// Splits a raw word read from the target.
    #[inline]
    pub const fn from_word(word: u64) -> Self {
        Self {
            is_tagged: word & Self::TAG != 0,
            payload: word & !Self::TAG,
        }
    }

    /// Returns the carried address if the word is tagged.
    #[inline]
    pub const fn tagged_payload(self) -> Option<u64> {
        if self.is_tagged {
            Some(self.payload)
        } else {
            None
        }
    }

    /// Reassembles the raw word.
    #[inline]
    pub const fn to_word(self) -> u64 {
        if self.is_tagged {
            self.payload | Self::TAG
        } else {
            self.payload
        }
    }
}

impl From<u64> for TaggedAddress {
    fn from(word: u64) -> Self {
        Self::from_word(word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_word() {
        let tagged = TaggedAddress::from_word(0xffff_ea00_0000_1000);
        assert!(!tagged.is_tagged);
        assert_eq!(tagged.payload, 0xffff_ea00_0000_1000);
        assert_eq!(tagged.tagged_payload(), None);
    }

    #[test]
    fn tagged_word() {
        let tagged = TaggedAddress::from_word(0xffff_ea00_0000_1001);
        assert!(tagged.is_tagged);
        assert_eq!(tagged.payload, 0xffff_ea00_0000_1000);
        assert_eq!(tagged.tagged_payload(), Some(0xffff_ea00_0000_1000));
    }

    #[test]
    fn zero_is_untagged() {
        assert_eq!(
            TaggedAddress::from_word(0),
            TaggedAddress {
                is_tagged: false,
                payload: 0
            }
        );
    }

    #[test]
    fn reassembles_word() {
        for word in [0, 1, 0x1000, 0x1001, u64::MAX] {
            assert_eq!(TaggedAddress::from_word(word).to_word(), word);
        }
    }
}
