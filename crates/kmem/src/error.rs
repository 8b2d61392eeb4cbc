//! Error types for kernel memory introspection.

use alloc::string::String;

/// A read from the target failed because the address range is unmapped or
/// otherwise inaccessible.
///
/// Faults are expected while walking every page of a target, since some page
/// frames may be offline. They are reported per read and never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("could not read {length} bytes at {address:#x}")]
pub struct Fault {
    /// Start of the range that could not be read.
    pub address: u64,
    /// Number of bytes requested.
    pub length: usize,
}

impl Fault {
    /// Creates a fault for the given range.
    pub const fn new(address: u64, length: usize) -> Self {
        Self { address, length }
    }
}

/// Errors that can occur while translating addresses or decoding page state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A required constant, symbol, or layout entry is absent from the
    /// target's debug metadata.
    #[error("`{0}` is not available in the target's metadata")]
    MetadataUnavailable(String),
    /// The target lays out its page descriptors in a way that is not
    /// supported (a sparse model without a virtually mapped array).
    #[error("unsupported memory model: page descriptors are not virtually contiguous")]
    UnsupportedMemoryModel,
    /// A read from the target faulted.
    #[error(transparent)]
    Fault(#[from] Fault),
    /// Metadata was found but its value cannot be used.
    #[error("invalid metadata `{name}`: {reason}")]
    InvalidMetadata {
        /// Name of the offending metadata entry.
        name: String,
        /// What is wrong with it.
        reason: &'static str,
    },
}

impl Error {
    pub(crate) fn unavailable(name: impl Into<String>) -> Self {
        Self::MetadataUnavailable(name.into())
    }

    pub(crate) fn invalid(name: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidMetadata {
            name: name.into(),
            reason,
        }
    }

    /// Returns true if this error is a read fault.
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault(_))
    }
}

/// Result type used throughout the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;
