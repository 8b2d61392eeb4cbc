//! Kernel memory backed by an ELF core file.
//!
//! Both `/proc/kcore` and kdump's `/proc/vmcore` describe kernel memory as
//! `PT_LOAD` segments whose virtual addresses are kernel addresses. A read is
//! served from whichever segments cover it; bytes past a segment's file image
//! but inside its memory size read as zero.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{Context, Result, bail};
use elf::ElfStream;
use elf::abi::{ET_CORE, PT_LOAD};
use elf::endian::AnyEndian;
use kmem::{Fault, Memory};
use spin::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    start: u64,
    file_size: u64,
    memory_size: u64,
    offset: u64,
}

impl Segment {
    fn contains(&self, address: u64) -> bool {
        address >= self.start && address - self.start < self.memory_size
    }

    fn end(&self) -> u64 {
        self.start.saturating_add(self.memory_size)
    }

    /// Drops the first `len` bytes of the segment.
    fn skip(&mut self, len: u64) {
        self.start += len;
        self.offset += len.min(self.file_size);
        self.file_size = self.file_size.saturating_sub(len);
        self.memory_size -= len;
    }
}

/// Where sorted segments overlap, the earlier one keeps the shared addresses
/// and the later one is cut to start where the earlier ends.
fn clip_overlaps(sorted: Vec<Segment>) -> Vec<Segment> {
    let mut clipped: Vec<Segment> = Vec::with_capacity(sorted.len());
    for mut segment in sorted {
        if let Some(previous) = clipped.last() {
            let overlap = previous.end().saturating_sub(segment.start);
            if overlap >= segment.memory_size {
                continue;
            }
            segment.skip(overlap);
        }
        clipped.push(segment);
    }
    clipped
}

pub struct CoreFile<R = File> {
    reader: Mutex<R>,
    segments: Vec<Segment>,
}

impl CoreFile<File> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        Self::from_reader(file).with_context(|| format!("reading {}", path.display()))
    }
}

impl<R: Read + Seek> CoreFile<R> {
    /// Reads the program headers of a core file from `reader`.
    pub fn from_reader(mut reader: R) -> Result<Self> {
        let mut segments = {
            let stream = ElfStream::<AnyEndian, _>::open_stream(&mut reader)
                .context("parsing ELF headers")?;
            if stream.ehdr.e_type != ET_CORE {
                bail!("not an ELF core file (type {})", stream.ehdr.e_type);
            }
            stream
                .segments()
                .iter()
                .filter(|phdr| phdr.p_type == PT_LOAD && phdr.p_memsz != 0)
                .map(|phdr| Segment {
                    start: phdr.p_vaddr,
                    file_size: phdr.p_filesz.min(phdr.p_memsz),
                    memory_size: phdr.p_memsz,
                    offset: phdr.p_offset,
                })
                .collect::<Vec<_>>()
        };
        if segments.is_empty() {
            bail!("core file has no loadable segments");
        }

        segments.sort_by_key(|segment| segment.start);
        let segments = clip_overlaps(segments);
        log::debug!("core file has {} loadable segments", segments.len());

        Ok(Self {
            reader: Mutex::new(reader),
            segments,
        })
    }

    /// Number of distinct loadable segments.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn segment_containing(&self, address: u64) -> Option<&Segment> {
        let index = self
            .segments
            .partition_point(|segment| segment.start <= address);
        let segment = self.segments.get(index.checked_sub(1)?)?;
        segment.contains(address).then_some(segment)
    }
}

impl<R: Read + Seek> Memory for CoreFile<R> {
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), Fault> {
        let fault = Fault::new(address, buf.len());
        let mut reader = self.reader.lock();

        let mut done = 0;
        while done < buf.len() {
            let current = address.checked_add(done as u64).ok_or(fault)?;
            let Some(segment) = self.segment_containing(current) else {
                log::trace!("{current:#x} is not covered by the core file");
                return Err(fault);
            };

            let within = current - segment.start;
            let available = usize::try_from(segment.memory_size - within).unwrap_or(usize::MAX);
            let remaining = buf.len() - done;
            let chunk = &mut buf[done..done + available.min(remaining)];
            let from_file = usize::try_from(segment.file_size.saturating_sub(within))
                .unwrap_or(usize::MAX)
                .min(chunk.len());

            if from_file > 0 {
                reader
                    .seek(SeekFrom::Start(segment.offset + within))
                    .and_then(|_| reader.read_exact(&mut chunk[..from_file]))
                    .map_err(|error| {
                        log::debug!("reading {current:#x} from the core file: {error}");
                        fault
                    })?;
            }
            chunk[from_file..].fill(0);
            done += chunk.len();
        }
        Ok(())
    }
}
