use std::io::{Read, Seek};

use kmem::{ByteOrder, Enumerator, Fault, FieldInfo, Memory, Metadata};
use kmeta::MetadataTable;

use crate::core_file::CoreFile;

/// A kernel described by a metadata table, whose memory is read from a core
/// file.
pub struct KernelTarget<'a, R> {
    metadata: MetadataTable<'a>,
    memory: CoreFile<R>,
}

impl<'a, R> KernelTarget<'a, R> {
    pub fn new(metadata: MetadataTable<'a>, memory: CoreFile<R>) -> Self {
        Self { metadata, memory }
    }
}

impl<R> Metadata for KernelTarget<'_, R> {
    fn constant(&self, name: &str) -> Option<u64> {
        self.metadata.constant(name)
    }

    fn symbol(&self, name: &str) -> Option<u64> {
        self.metadata.symbol(name)
    }

    fn field(&self, record: &str, field: &str) -> Option<FieldInfo> {
        self.metadata.field(record, field)
    }

    fn record_size(&self, record: &str) -> Option<u64> {
        self.metadata.record_size(record)
    }

    fn enumerators(&self, enumeration: &str) -> Option<Vec<Enumerator>> {
        self.metadata.enumerators(enumeration)
    }

    fn byte_order(&self) -> ByteOrder {
        self.metadata.byte_order()
    }

    fn pointer_size(&self) -> usize {
        self.metadata.pointer_size()
    }
}

impl<R: Read + Seek> Memory for KernelTarget<'_, R> {
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), Fault> {
        self.memory.read(address, buf)
    }
}
