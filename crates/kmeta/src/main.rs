use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use elf::ElfBytes;
use elf::endian::AnyEndian;
use elf::file::Class;
use gimli::{Dwarf, EndianSlice, RunTimeEndian};
use rayon::prelude::*;
use std::fs;
use std::path::PathBuf;

use kmem::ByteOrder;
use kmeta::vmcoreinfo::{Item, Vmcoreinfo};
use kmeta::{EntryKind, EntryRef, MetadataTable, TableBuilder};

type Slice<'a> = EndianSlice<'a, RunTimeEndian>;

#[derive(Parser)]
#[command(name = "kmeta")]
#[command(about = "Kernel metadata table generation and lookup tool")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a metadata table from a kernel image and its vmcoreinfo
    Generate {
        /// Kernel ELF image (vmlinux), ideally with DWARF debug info
        #[arg(long)]
        vmlinux: PathBuf,

        /// vmcoreinfo note of the running kernel, e.g. from /sys/kernel/vmcoreinfo
        #[arg(long)]
        vmcoreinfo: Option<PathBuf>,

        /// Extra constant, as NAME=VALUE (decimal or 0x-prefixed hexadecimal)
        #[arg(short = 'D', long = "define", value_parser = parse_definition)]
        defines: Vec<(String, u64)>,

        /// Output metadata table file
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Look up a name in a metadata table
    Lookup {
        /// Metadata table file
        #[arg(short, long)]
        table: PathBuf,

        /// Constant, symbol, record, enumeration or `record.field` to look up
        name: String,
    },
}

fn parse_definition(definition: &str) -> Result<(String, u64), String> {
    let (name, value) = definition
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{definition}`"))?;
    let value = parse_number(value).ok_or_else(|| format!("invalid value `{value}`"))?;
    Ok((name.to_string(), value))
}

fn parse_number(value: &str) -> Option<u64> {
    match value.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

/// The members of one DWARF enumeration type, in declaration order.
struct Enumeration {
    name: Option<String>,
    enumerators: Vec<(String, u64)>,
}

fn load_dwarf<'a>(elf: &ElfBytes<'a, AnyEndian>, endian: RunTimeEndian) -> Result<Dwarf<Slice<'a>>> {
    Dwarf::load(|id: gimli::SectionId| -> Result<Slice<'a>> {
        let data = match elf.section_header_by_name(id.name())? {
            Some(header) => {
                let (data, compression) = elf.section_data(&header)?;
                if compression.is_some() {
                    bail!("{} is compressed, which is not supported", id.name());
                }
                data
            }
            None => &[],
        };
        Ok(EndianSlice::new(data, endian))
    })
}

fn collect_enumerations(dwarf: &Dwarf<Slice<'_>>) -> Result<Vec<Enumeration>> {
    let mut unit_headers = Vec::new();
    let mut units = dwarf.units();
    while let Some(header) = units.next()? {
        unit_headers.push(header);
    }

    let per_unit: Vec<Vec<Enumeration>> = unit_headers
        .par_iter()
        .map(|header| -> gimli::Result<Vec<Enumeration>> {
            let unit = dwarf.unit(*header)?;
            let mut tree = unit.entries_tree(None)?;
            let mut found = Vec::new();
            walk_entries(dwarf, &unit, tree.root()?, &mut found)?;
            Ok(found)
        })
        .collect::<gimli::Result<_>>()?;

    Ok(per_unit.into_iter().flatten().collect())
}

fn walk_entries<'d>(
    dwarf: &Dwarf<Slice<'d>>,
    unit: &gimli::Unit<Slice<'d>>,
    node: gimli::EntriesTreeNode<'_, '_, '_, Slice<'d>>,
    found: &mut Vec<Enumeration>,
) -> gimli::Result<()> {
    let mut children = node.children();
    while let Some(child) = children.next()? {
        if child.entry().tag() != gimli::DW_TAG_enumeration_type {
            walk_entries(dwarf, unit, child, found)?;
            continue;
        }

        let name = entry_name(dwarf, unit, child.entry());
        let mut enumerators = Vec::new();
        let mut members = child.children();
        while let Some(member) = members.next()? {
            let entry = member.entry();
            if entry.tag() != gimli::DW_TAG_enumerator {
                continue;
            }
            if let (Some(name), Some(value)) = (entry_name(dwarf, unit, entry), const_value(entry)) {
                enumerators.push((name, value));
            }
        }
        if !enumerators.is_empty() {
            found.push(Enumeration { name, enumerators });
        }
    }
    Ok(())
}

fn entry_name<'d>(
    dwarf: &Dwarf<Slice<'d>>,
    unit: &gimli::Unit<Slice<'d>>,
    entry: &gimli::DebuggingInformationEntry<'_, '_, Slice<'d>>,
) -> Option<String> {
    let mut attrs = entry.attrs();
    while let Ok(Some(attr)) = attrs.next() {
        if attr.name() == gimli::DW_AT_name {
            let name = dwarf.attr_string(unit, attr.value()).ok()?;
            return Some(name.to_string_lossy().into_owned());
        }
    }
    None
}

fn const_value(entry: &gimli::DebuggingInformationEntry<'_, '_, Slice<'_>>) -> Option<u64> {
    let mut attrs = entry.attrs();
    while let Ok(Some(attr)) = attrs.next() {
        if attr.name() == gimli::DW_AT_const_value {
            // Negative enumerators wrap, as the kernel's unsigned flag words do.
            return attr
                .udata_value()
                .or_else(|| attr.sdata_value().map(|value| value as u64));
        }
    }
    None
}

/// Adds every data object in the image's symbol table, shifted by the
/// kernel's load offset. Returns how many were added.
fn add_symbols(builder: &mut TableBuilder, elf: &ElfBytes<'_, AnyEndian>, offset: u64) -> Result<usize> {
    let Some((symbols, strings)) = elf.symbol_table()? else {
        bail!("image has no symbol table");
    };

    let mut count = 0;
    for symbol in symbols.iter() {
        if symbol.st_symtype() != elf::abi::STT_OBJECT || symbol.is_undefined() {
            continue;
        }
        let name = strings.get(symbol.st_name as usize)?;
        if name.is_empty() {
            continue;
        }
        builder.add_symbol(name, symbol.st_value.wrapping_add(offset));
        count += 1;
    }
    Ok(count)
}

fn add_vmcoreinfo(builder: &mut TableBuilder, info: &Vmcoreinfo) {
    for item in &info.items {
        match item {
            Item::Constant { name, value } => builder.add_constant(name, *value),
            Item::Symbol { name, address } => builder.add_symbol(name, *address),
            Item::RecordSize { record, size } => builder.add_record(record, *size),
            Item::FieldOffset {
                record,
                field,
                offset,
            } => builder.add_field(record, field, *offset, None),
        };
    }
}

fn generate(
    vmlinux: PathBuf,
    vmcoreinfo: Option<PathBuf>,
    defines: Vec<(String, u64)>,
    output: PathBuf,
) -> Result<()> {
    let file_data = fs::read(&vmlinux).with_context(|| format!("reading {}", vmlinux.display()))?;
    let elf = ElfBytes::<AnyEndian>::minimal_parse(&file_data)
        .with_context(|| format!("parsing {}", vmlinux.display()))?;

    let (byte_order, endian) = match elf.ehdr.endianness {
        AnyEndian::Little => (ByteOrder::Little, RunTimeEndian::Little),
        AnyEndian::Big => (ByteOrder::Big, RunTimeEndian::Big),
    };
    let pointer_size = match elf.ehdr.class {
        Class::ELF32 => 4,
        Class::ELF64 => 8,
    };

    let mut builder = TableBuilder::new();
    builder.set_byte_order(byte_order).set_pointer_size(pointer_size);

    // Earlier sources take precedence: explicit definitions, then what the
    // running kernel reported, then the image.
    for (name, value) in &defines {
        builder.add_constant(name, *value);
    }

    let mut kernel_offset = 0;
    if let Some(path) = vmcoreinfo {
        let text = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let info = Vmcoreinfo::parse(&text).with_context(|| format!("parsing {}", path.display()))?;
        if let Some(release) = &info.release {
            eprintln!("vmcoreinfo for kernel {release}");
        }
        kernel_offset = info.kernel_offset;
        add_vmcoreinfo(&mut builder, &info);
    }

    let dwarf = load_dwarf(&elf, endian)?;
    let enumerations = collect_enumerations(&dwarf).context("reading DWARF debug info")?;
    if enumerations.is_empty() {
        eprintln!("warning: no enumerations found; is {} built with debug info?", vmlinux.display());
    }
    for enumeration in &enumerations {
        if let Some(name) = &enumeration.name {
            builder.add_enumeration(name, &enumeration.enumerators);
        }
        for (name, value) in &enumeration.enumerators {
            builder.add_constant(name, *value);
        }
    }

    let symbols = add_symbols(&mut builder, &elf, kernel_offset)?;
    eprintln!(
        "{} enumerations, {} symbols (load offset {:#x})",
        enumerations.len(),
        symbols,
        kernel_offset
    );

    let output_data = builder.build();
    fs::write(&output, &output_data).with_context(|| format!("writing {}", output.display()))?;

    let table = MetadataTable::from_bytes(&output_data)?;
    println!("wrote {} entries to {}", table.len(), output.display());
    Ok(())
}

fn print_entry(entry: &EntryRef<'_>) {
    match entry.kind {
        EntryKind::Constant => println!("constant {} = {:#x} ({})", entry.name, entry.value, entry.value),
        EntryKind::Symbol => println!("symbol {} at {:#x}", entry.name, entry.value),
        EntryKind::Record => println!("record {}: {} bytes", entry.name, entry.value),
        EntryKind::Field if entry.extra != 0 => println!(
            "field {}.{}: offset {:#x}, {} bytes",
            entry.group, entry.name, entry.value, entry.extra
        ),
        EntryKind::Field => println!("field {}.{}: offset {:#x}", entry.group, entry.name, entry.value),
        EntryKind::Enumerator => println!("  {} = {}", entry.name, entry.value),
    }
}

fn lookup(table_path: PathBuf, name: String) -> Result<()> {
    let data = fs::read(&table_path).with_context(|| format!("reading {}", table_path.display()))?;
    let table = MetadataTable::from_bytes(&data).context("failed to load metadata table")?;

    let mut found = false;
    if let Some((record, field)) = name.split_once('.') {
        if let Some(entry) = table.find(EntryKind::Field, record, field) {
            print_entry(&entry);
            found = true;
        }
    }
    for entry in table.entries().filter(|e| e.kind != EntryKind::Enumerator && e.name == name) {
        print_entry(&entry);
        found = true;
    }
    let mut enumerators = table.enumeration(&name).peekable();
    if enumerators.peek().is_some() {
        println!("enum {name}:");
        enumerators.for_each(|entry| print_entry(&entry));
        found = true;
    }
    let fields: Vec<_> = table
        .entries()
        .filter(|e| e.kind == EntryKind::Field && e.group == name)
        .collect();
    for entry in &fields {
        print_entry(entry);
        found = true;
    }

    if !found {
        println!("{name}: <not found>");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Generate {
            vmlinux,
            vmcoreinfo,
            defines,
            output,
        } => generate(vmlinux, vmcoreinfo, defines, output),
        Command::Lookup { table, name } => lookup(table, name),
    }
}
