//! Reading the user memory of target processes.
//!
//! Translating user addresses needs the process's page tables, which only a
//! [`VirtualMemory`] implementation knows how to walk. What this module adds is
//! finding those page tables and the interesting ranges from the kernel's
//! task and address-space records.

use alloc::vec;
use alloc::vec::Vec;

use crate::layout::FieldSpec;
use crate::{Error, Fault, Result, Session, Target, VirtualMemory};

const TASK_MM: FieldSpec = FieldSpec::word("task_struct", "mm");
const MM_PGD: FieldSpec = FieldSpec::word("mm_struct", "pgd");
const MM_ARG_START: FieldSpec = FieldSpec::word("mm_struct", "arg_start");
const MM_ARG_END: FieldSpec = FieldSpec::word("mm_struct", "arg_end");
const MM_ENV_START: FieldSpec = FieldSpec::word("mm_struct", "env_start");
const MM_ENV_END: FieldSpec = FieldSpec::word("mm_struct", "env_end");

/// Longest argument or environment area read from a process. Far above what
/// `execve` accepts with a default stack limit.
const MAX_STRINGS_LEN: usize = 8 << 20;

impl<T: Target + VirtualMemory> Session<T> {
    /// Reads `len` bytes at `address` in the address space `mm`
    /// (`struct mm_struct *`).
    pub fn access_remote_vm(&self, mm: u64, address: u64, len: usize) -> Result<Vec<u8>> {
        let pgd = self.read_field(mm, &MM_PGD)?;
        let mut buf = vec![0; len];
        self.target().read_virtual(pgd, address, &mut buf)?;
        Ok(buf)
    }

    /// Reads `len` bytes at `address` in the address space of `task`
    /// (`struct task_struct *`).
    ///
    /// Kernel threads have no address space of their own; reading from one is
    /// a fault at `address`.
    pub fn access_process_vm(&self, task: u64, address: u64, len: usize) -> Result<Vec<u8>> {
        let mm = self.read_field(task, &TASK_MM)?;
        if mm == 0 {
            return Err(Fault::new(address, len).into());
        }
        self.access_remote_vm(mm, address, len)
    }

    /// Returns the command line arguments of `task`.
    ///
    /// Empty for kernel threads.
    pub fn cmdline(&self, task: u64) -> Result<Vec<Vec<u8>>> {
        self.user_strings(task, &MM_ARG_START, &MM_ARG_END)
    }

    /// Returns the environment of `task` as `NAME=value` entries.
    ///
    /// Empty for kernel threads.
    pub fn environ(&self, task: u64) -> Result<Vec<Vec<u8>>> {
        self.user_strings(task, &MM_ENV_START, &MM_ENV_END)
    }

    fn user_strings(&self, task: u64, start: &FieldSpec, end: &FieldSpec) -> Result<Vec<Vec<u8>>> {
        let mm = self.read_field(task, &TASK_MM)?;
        if mm == 0 {
            return Ok(Vec::new());
        }

        let first = self.read_field(mm, start)?;
        let last = self.read_field(mm, end)?;
        let len = last
            .checked_sub(first)
            .and_then(|len| usize::try_from(len).ok())
            .ok_or_else(|| Error::invalid(end.field, "range ends before it starts"))?;
        if len > MAX_STRINGS_LEN {
            return Err(Error::invalid(end.field, "range is implausibly long"));
        }

        let data = self.access_remote_vm(mm, first, len)?;
        let mut strings: Vec<Vec<u8>> = data.split(|&b| b == 0).map(<[u8]>::to_vec).collect();
        // Whatever follows the last terminator is not a complete string.
        strings.pop();
        Ok(strings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EmulatedTarget;

    const TASK: u64 = 0xffff_8880_0400_0000;
    const MM: u64 = 0xffff_8880_0500_0000;
    const PGD: u64 = 0xffff_8880_0600_0000;
    const STACK: u64 = 0x7ffd_1000;

    fn process(args: &[u8], env: &[u8]) -> EmulatedTarget {
        let target = EmulatedTarget::linux_vmemmap();
        target.write_word(TASK + 0x898, MM);
        target.write_word(MM + 0x50, PGD);
        target.write_word(MM + 0x120, STACK);
        target.write_word(MM + 0x128, STACK + args.len() as u64);
        let env_start = STACK + 0x800;
        target.write_word(MM + 0x130, env_start);
        target.write_word(MM + 0x138, env_start + env.len() as u64);
        target.write_user(PGD, STACK, args);
        target.write_user(PGD, env_start, env);
        target
    }

    #[test]
    fn command_line() {
        let session = Session::new(process(b"/bin/sh\0-c\0true\0", b""));
        assert_eq!(
            session.cmdline(TASK),
            Ok(vec![b"/bin/sh".to_vec(), b"-c".to_vec(), b"true".to_vec()])
        );
    }

    #[test]
    fn environment() {
        let session = Session::new(process(b"init\0", b"HOME=/\0TERM=linux\0"));
        assert_eq!(
            session.environ(TASK),
            Ok(vec![b"HOME=/".to_vec(), b"TERM=linux".to_vec()])
        );
    }

    #[test]
    fn unterminated_tail_is_dropped() {
        let session = Session::new(process(b"sleep\0100", b""));
        assert_eq!(session.cmdline(TASK), Ok(vec![b"sleep".to_vec()]));
    }

    #[test]
    fn empty_ranges() {
        let session = Session::new(process(b"", b""));
        assert_eq!(session.cmdline(TASK), Ok(Vec::new()));
        assert_eq!(session.environ(TASK), Ok(Vec::new()));
    }

    #[test]
    fn kernel_thread_has_no_command_line() {
        let target = process(b"init\0", b"");
        target.write_word(TASK + 0x898, 0);
        let session = Session::new(target);
        assert_eq!(session.cmdline(TASK), Ok(Vec::new()));
        assert!(session.access_process_vm(TASK, STACK, 4).unwrap_err().is_fault());
    }

    #[test]
    fn reads_through_the_address_space() {
        let session = Session::new(process(b"init\0", b""));
        assert_eq!(session.access_process_vm(TASK, STACK, 4), Ok(b"init".to_vec()));
        assert_eq!(session.access_remote_vm(MM, STACK + 1, 2), Ok(b"ni".to_vec()));
    }

    #[test]
    fn unmapped_user_memory_faults() {
        let session = Session::new(process(b"init\0", b""));
        let err = session.access_process_vm(TASK, STACK + 0x10_0000, 8).unwrap_err();
        assert_eq!(err, Error::Fault(Fault::new(STACK + 0x10_0000, 8)));
    }

    #[test]
    fn inverted_range_is_invalid() {
        let target = process(b"init\0", b"");
        target.write_word(MM + 0x128, STACK - 1);
        assert!(matches!(
            Session::new(target).cmdline(TASK),
            Err(Error::InvalidMetadata { .. })
        ));
    }

    #[test]
    fn oversized_range_is_invalid() {
        let target = process(b"init\0", b"");
        target.write_word(MM + 0x120, 0x1000);
        target.write_word(MM + 0x128, 0x8000_0000_0000_1000);
        assert_eq!(
            Session::new(target).cmdline(TASK),
            Err(Error::invalid("arg_end", "range is implausibly long"))
        );
    }

    #[test]
    fn range_just_over_the_limit_is_invalid() {
        let target = process(b"init\0", b"");
        target.write_word(MM + 0x128, STACK + MAX_STRINGS_LEN as u64 + 1);
        assert!(matches!(
            Session::new(target).cmdline(TASK),
            Err(Error::InvalidMetadata { .. })
        ));
    }
}
