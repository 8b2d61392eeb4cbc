//! Parser for the kernel's `vmcoreinfo` note.
//!
//! The running kernel publishes a small text note describing itself for crash
//! dump tools, one `KEY=value` per line:
//!
//! ```text
//! OSRELEASE=6.8.0
//! PAGESIZE=4096
//! SYMBOL(mem_section)=ffff9b8f7fdd2000
//! SIZE(page)=64
//! OFFSET(page.flags)=0
//! NUMBER(PG_head_mask)=65536
//! KERNELOFFSET=1c000000
//! ```
//!
//! Symbol addresses and the kernel offset are hexadecimal without a prefix;
//! everything else is decimal and `NUMBER` values may be negative. Since the
//! note is produced by the running kernel, its symbol addresses already include
//! any randomization.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

/// Errors in a `vmcoreinfo` note.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmcoreinfoError {
    #[error("line {line}: expected KEY=value")]
    MissingValue { line: usize },
    #[error("line {line}: invalid number `{value}`")]
    InvalidNumber { line: usize, value: String },
    #[error("line {line}: expected `record.field` in OFFSET")]
    InvalidField { line: usize },
}

/// One piece of information from a `vmcoreinfo` note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    /// `PAGESIZE`, `NUMBER(name)` and `LENGTH(name)`.
    Constant { name: String, value: u64 },
    /// `SYMBOL(name)`.
    Symbol { name: String, address: u64 },
    /// `SIZE(record)`.
    RecordSize { record: String, size: u64 },
    /// `OFFSET(record.field)`.
    FieldOffset { record: String, field: String, offset: u64 },
}

/// A parsed `vmcoreinfo` note.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vmcoreinfo {
    /// Kernel release, from `OSRELEASE`.
    pub release: Option<String>,
    /// Offset the kernel image was loaded at relative to its link address,
    /// from `KERNELOFFSET`.
    pub kernel_offset: u64,
    /// Everything else that maps onto metadata, in note order.
    pub items: Vec<Item>,
}

impl Vmcoreinfo {
    /// Parses the text of a `vmcoreinfo` note.
    ///
    /// Unknown keys are skipped, as are trailing NUL bytes left over from the
    /// note's padding.
    pub fn parse(text: &str) -> Result<Self, VmcoreinfoError> {
        let mut info = Self::default();

        for (index, line) in text.lines().enumerate() {
            let line_number = index + 1;
            let line = line.trim_end_matches('\0').trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or(VmcoreinfoError::MissingValue { line: line_number })?;

            let decimal = || parse_decimal(value, line_number);
            if key == "OSRELEASE" {
                info.release = Some(value.to_string());
            } else if key == "PAGESIZE" {
                info.items.push(Item::Constant {
                    name: "PAGE_SIZE".to_string(),
                    value: decimal()?,
                });
            } else if key == "KERNELOFFSET" {
                info.kernel_offset = parse_hex(value, line_number)?;
            } else if let Some(name) = wrapped(key, "SYMBOL") {
                info.items.push(Item::Symbol {
                    name: name.to_string(),
                    address: parse_hex(value, line_number)?,
                });
            } else if let Some(record) = wrapped(key, "SIZE") {
                info.items.push(Item::RecordSize {
                    record: record.to_string(),
                    size: decimal()?,
                });
            } else if let Some(path) = wrapped(key, "OFFSET") {
                let (record, field) = path
                    .split_once('.')
                    .ok_or(VmcoreinfoError::InvalidField { line: line_number })?;
                info.items.push(Item::FieldOffset {
                    record: record.to_string(),
                    field: field.to_string(),
                    offset: decimal()?,
                });
            } else if let Some(name) = wrapped(key, "NUMBER").or_else(|| wrapped(key, "LENGTH")) {
                info.items.push(Item::Constant {
                    name: name.to_string(),
                    value: decimal()?,
                });
            }
        }

        Ok(info)
    }
}

/// Returns `inner` if `key` is `prefix(inner)`.
fn wrapped<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    key.strip_prefix(prefix)?.strip_prefix('(')?.strip_suffix(')')
}

fn parse_hex(value: &str, line: usize) -> Result<u64, VmcoreinfoError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(digits, 16).map_err(|_| VmcoreinfoError::InvalidNumber {
        line,
        value: value.to_string(),
    })
}

/// Parses a decimal value. Negative values wrap, as the kernel prints them
/// from signed longs.
fn parse_decimal(value: &str, line: usize) -> Result<u64, VmcoreinfoError> {
    let invalid = || VmcoreinfoError::InvalidNumber {
        line,
        value: value.to_string(),
    };
    match value.strip_prefix('-') {
        Some(magnitude) => magnitude
            .parse::<u64>()
            .map(|m| m.wrapping_neg())
            .map_err(|_| invalid()),
        None => value.parse::<u64>().map_err(|_| invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTE: &str = "OSRELEASE=6.8.0-45-generic
BUILD-ID=0d5f6b3a
PAGESIZE=4096
SYMBOL(init_uts_ns)=ffffffff9d215380
SYMBOL(vmemmap_base)=ffffffff9ce1e598
SIZE(page)=64
SIZE(pglist_data)=174336
OFFSET(page.flags)=0
OFFSET(page.compound_head)=8
OFFSET(pglist_data.node_start_pfn)=172352
LENGTH(zone.free_area)=11
NUMBER(PG_head_mask)=65536
NUMBER(PAGE_BUDDY_MAPCOUNT_VALUE)=-129
KERNELOFFSET=1b000000
CRASHTIME=1718101234
\0\0\0";

    #[test]
    fn parses_a_note() {
        let info = Vmcoreinfo::parse(NOTE).unwrap();
        assert_eq!(info.release.as_deref(), Some("6.8.0-45-generic"));
        assert_eq!(info.kernel_offset, 0x1b00_0000);
        assert_eq!(info.items.len(), 11);

        assert_eq!(
            info.items[0],
            Item::Constant {
                name: "PAGE_SIZE".into(),
                value: 4096
            }
        );
        assert!(info.items.contains(&Item::Symbol {
            name: "vmemmap_base".into(),
            address: 0xffff_ffff_9ce1_e598
        }));
        assert!(info.items.contains(&Item::RecordSize {
            record: "page".into(),
            size: 64
        }));
        assert!(info.items.contains(&Item::FieldOffset {
            record: "pglist_data".into(),
            field: "node_start_pfn".into(),
            offset: 172352
        }));
        assert!(info.items.contains(&Item::Constant {
            name: "zone.free_area".into(),
            value: 11
        }));
    }

    #[test]
    fn negative_numbers_wrap() {
        let info = Vmcoreinfo::parse("NUMBER(PAGE_BUDDY_MAPCOUNT_VALUE)=-129\n").unwrap();
        assert_eq!(
            info.items,
            [Item::Constant {
                name: "PAGE_BUDDY_MAPCOUNT_VALUE".into(),
                value: (-129i64) as u64
            }]
        );
    }

    #[test]
    fn missing_value() {
        assert_eq!(
            Vmcoreinfo::parse("PAGESIZE=4096\nOSRELEASE\n"),
            Err(VmcoreinfoError::MissingValue { line: 2 })
        );
    }

    #[test]
    fn invalid_numbers() {
        assert_eq!(
            Vmcoreinfo::parse("SIZE(page)=sixty-four"),
            Err(VmcoreinfoError::InvalidNumber {
                line: 1,
                value: "sixty-four".into()
            })
        );
        assert!(Vmcoreinfo::parse("SYMBOL(x)=zz").is_err());
    }

    #[test]
    fn offset_needs_a_field() {
        assert_eq!(
            Vmcoreinfo::parse("OFFSET(page)=0"),
            Err(VmcoreinfoError::InvalidField { line: 1 })
        );
    }
}
