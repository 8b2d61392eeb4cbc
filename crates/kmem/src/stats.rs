//! Memory statistics kept by the target kernel.

use crate::{Error, Result, Session, Target};

impl<T: Target> Session<T> {
    /// Returns the number of page frames the target kernel manages.
    ///
    /// Recent kernels keep the count in the atomic `_totalram_pages`, whose
    /// counter is its first word; older ones in a plain `totalram_pages`.
    pub fn totalram_pages(&self) -> Result<u64> {
        if let Some(address) = self.target().symbol("_totalram_pages") {
            return self.read_word(address);
        }
        self.global("totalram_pages")?
            .ok_or_else(|| Error::unavailable("_totalram_pages"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EmulatedTarget;

    #[test]
    fn atomic_counter() {
        let session = Session::new(EmulatedTarget::linux_vmemmap());
        assert_eq!(session.totalram_pages(), Ok(16));
    }

    #[test]
    fn plain_counter_on_older_kernels() {
        let mut target = EmulatedTarget::linux_vmemmap();
        target
            .remove_symbol("_totalram_pages")
            .define_symbol("totalram_pages", EmulatedTarget::DATA_BASE + 0x28);
        target.write_word(EmulatedTarget::DATA_BASE + 0x28, 0x4_0000);
        assert_eq!(Session::new(target).totalram_pages(), Ok(0x4_0000));
    }

    #[test]
    fn missing_counter() {
        let mut target = EmulatedTarget::linux_vmemmap();
        target.remove_symbol("_totalram_pages");
        assert_eq!(
            Session::new(target).totalram_pages(),
            Err(Error::MetadataUnavailable("_totalram_pages".into()))
        );
    }

    #[test]
    fn counter_is_read_fresh() {
        let target = EmulatedTarget::linux_vmemmap();
        let session = Session::new(&target);
        assert_eq!(session.totalram_pages(), Ok(16));
        target.write_word(EmulatedTarget::DATA_BASE + 0x18, 12);
        assert_eq!(session.totalram_pages(), Ok(12));
    }
}
