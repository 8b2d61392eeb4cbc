// cSpell:ignore kcore vmcore kdump
mod commands;
mod console;
mod core_file;
mod target;

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, ArgGroup, Parser, Subcommand};
use kmem::{Page, Pfn, PhysicalAddress, Session, VirtualAddress};
use kmeta::MetadataTable;

use crate::commands::{Location, ScanOptions};
use crate::console::Console;
use crate::core_file::CoreFile;
use crate::target::KernelTarget;

#[derive(Parser)]
#[command(name = "kinspect")]
#[command(about = "Inspects the page frames of a running kernel or a kernel crash dump")]
struct Args {
    /// ELF core file holding kernel memory: /proc/kcore or a kdump vmcore
    #[arg(long, default_value = "/proc/kcore")]
    core: PathBuf,

    /// Metadata table for the kernel, produced by `kmeta generate`
    #[arg(short, long)]
    metadata: PathBuf,

    /// Log more detail; repeat for more
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert between page frame numbers, addresses and page descriptors
    #[command(group(ArgGroup::new("location").required(true)))]
    Translate {
        /// Page frame number
        #[arg(long, group = "location", value_parser = parse_number)]
        pfn: Option<u64>,

        /// Physical address
        #[arg(long, group = "location", value_parser = parse_number)]
        phys: Option<u64>,

        /// Directly mapped kernel virtual address
        #[arg(long, group = "location", value_parser = parse_number)]
        virt: Option<u64>,

        /// Address of a page descriptor
        #[arg(long, group = "location", value_parser = parse_number)]
        page: Option<u64>,
    },
    /// Show the compound page state and flags of a page descriptor
    Page {
        /// Address of the page descriptor
        #[arg(value_parser = parse_number, required_unless_present = "pfn", conflicts_with = "pfn")]
        descriptor: Option<u64>,

        /// Describe the descriptor of this page frame instead
        #[arg(long, value_parser = parse_number)]
        pfn: Option<u64>,
    },
    /// Walk every page descriptor, listing those that match
    Scan {
        /// Only list pages with this flag set, e.g. `PG_lru` or `lru`
        #[arg(long)]
        flag: Option<String>,

        /// List at most this many pages
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show the bit number of each well-known page flag
    Flags,
    /// Show the memory layout and size of the kernel
    Stats,
}

/// Parses a decimal or `0x`-prefixed hexadecimal number.
fn parse_number(value: &str) -> Result<u64, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => value.replace('_', "").parse(),
    };
    parsed.map_err(|err| format!("invalid number `{value}`: {err}"))
}

fn location(pfn: Option<u64>, phys: Option<u64>, virt: Option<u64>, page: Option<u64>) -> Option<Location> {
    pfn.map(|pfn| Location::Pfn(Pfn::new(pfn)))
        .or_else(|| phys.map(|addr| Location::Physical(PhysicalAddress::new(addr))))
        .or_else(|| virt.map(|addr| Location::Virtual(VirtualAddress::new(addr))))
        .or_else(|| page.map(|addr| Location::Page(Page::from(addr))))
}

fn main() -> Result<()> {
    let args = Args::parse();
    Console::init(args.verbose);

    let table_data =
        fs::read(&args.metadata).with_context(|| format!("reading {}", args.metadata.display()))?;
    let table = MetadataTable::from_bytes(&table_data)
        .with_context(|| format!("loading metadata table {}", args.metadata.display()))?;
    log::info!("loaded {} metadata entries", table.len());

    let core = CoreFile::open(&args.core)?;
    log::info!(
        "{} has {} loadable segments",
        args.core.display(),
        core.segment_count()
    );

    let session = Session::new(KernelTarget::new(table, core));
    let mut out = io::stdout().lock();

    match args.command {
        Command::Translate {
            pfn,
            phys,
            virt,
            page,
        } => {
            let location = location(pfn, phys, virt, page).context("no location given")?;
            commands::translate(&session, location, &mut out)?;
        }
        Command::Page { descriptor, pfn } => {
            let page = match (descriptor, pfn) {
                (Some(address), _) => Page::from(address),
                (None, Some(pfn)) => session.pfn_to_page(Pfn::new(pfn))?,
                (None, None) => anyhow::bail!("no page descriptor given"),
            };
            commands::describe_page(&session, page, &mut out)?;
        }
        Command::Scan { flag, limit } => {
            commands::scan(&session, &ScanOptions { flag, limit }, &mut out)?;
        }
        Command::Flags => commands::list_flags(&session, &mut out)?,
        Command::Stats => commands::stats(&session, &mut out)?,
    }

    out.flush()?;
    Ok(())
}
