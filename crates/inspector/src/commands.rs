//! The inspector's commands, run against any target.
//!
//! Each command writes its report to `out` and leaves logging to the caller's
//! logger, so the same code serves live systems, crash dumps and tests.

use std::io::Write;

use anyhow::{Context, Result, bail};
use kmem::{Error, Page, PageFlag, PageKind, Pfn, PhysicalAddress, Session, Target, VirtualAddress};

/// A location in the target, in any of the forms a session can translate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Pfn(Pfn),
    Physical(PhysicalAddress),
    Virtual(VirtualAddress),
    Page(Page),
}

/// Prints every representation of `location`.
///
/// Physical and virtual addresses keep their offset within the page; the other
/// forms refer to the start of the page.
pub fn translate<T: Target>(session: &Session<T>, location: Location, out: &mut impl Write) -> Result<()> {
    let (pfn, phys) = match location {
        Location::Pfn(pfn) => (pfn, session.pfn_to_phys(pfn)?),
        Location::Physical(addr) => (session.phys_to_pfn(addr)?, addr),
        Location::Virtual(addr) => (session.virt_to_pfn(addr)?, session.virt_to_phys(addr)?),
        Location::Page(page) => {
            let pfn = session.page_to_pfn(page)?;
            (pfn, session.pfn_to_phys(pfn)?)
        }
    };
    let virt = session.phys_to_virt(phys)?;
    let page = session.pfn_to_page(pfn)?;

    writeln!(out, "pfn    {pfn}")?;
    writeln!(out, "phys   {phys}")?;
    writeln!(out, "virt   {virt}")?;
    writeln!(out, "page   {page}")?;
    Ok(())
}

/// Prints the compound page state and flags of one descriptor.
pub fn describe_page<T: Target>(session: &Session<T>, page: Page, out: &mut impl Write) -> Result<()> {
    let pfn = session.page_to_pfn(page)?;
    let kind = session
        .classify(page)
        .with_context(|| format!("classifying page descriptor {page}"))?;
    let flags = session
        .decode_page_flags(page)
        .with_context(|| format!("decoding flags of page descriptor {page}"))?;

    writeln!(out, "page   {page}")?;
    writeln!(out, "pfn    {pfn}")?;
    writeln!(out, "kind   {kind}")?;
    if kind != PageKind::Standalone {
        let head = session.compound_head(page)?;
        writeln!(out, "head   {head}")?;
        writeln!(out, "order  {}", session.compound_order(head)?)?;
        writeln!(out, "pages  {}", session.compound_nr(head)?)?;
        writeln!(out, "size   {}", session.compound_size(head)?)?;
    }
    writeln!(out, "flags  {flags} ({:#x})", flags.raw())?;
    Ok(())
}

/// Options of [`scan`].
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Only report pages with this flag set. The `PG_` prefix is optional.
    pub flag: Option<String>,
    /// Stop printing after this many pages. Counting continues.
    pub limit: Option<usize>,
}

/// Totals of a [`scan`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub scanned: u64,
    pub matched: u64,
    pub unreadable: u64,
}

/// Walks every page descriptor, printing those that match `options`.
///
/// Descriptors that cannot be read are counted and skipped.
pub fn scan<T: Target>(session: &Session<T>, options: &ScanOptions, out: &mut impl Write) -> Result<ScanSummary> {
    let bit = match options.flag.as_deref().map(flag_name) {
        Some(flag) => match session.flag_bit(&flag) {
            Some(bit) => Some(bit),
            None => bail!("the target does not define page flag {flag}"),
        },
        None => None,
    };

    let mut summary = ScanSummary::default();
    let mut printed = 0;
    let mut pages = session.for_each_page()?;
    loop {
        let pfn = pages.next_pfn();
        let Some(page) = pages.next() else {
            break;
        };
        summary.scanned += 1;

        let flags = match session.decode_page_flags(page) {
            Ok(flags) => flags,
            Err(Error::Fault(fault)) => {
                log::trace!("skipping pfn {pfn}: {fault}");
                summary.unreadable += 1;
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        // Tested by bit so that every alias of a flag matches.
        if bit.is_some_and(|bit| flags.raw() >> bit & 1 == 0) {
            continue;
        }

        summary.matched += 1;
        if options.limit.is_none_or(|limit| printed < limit) {
            writeln!(out, "{:>12} {page} {flags}", pfn.to_string())?;
            printed += 1;
        }
    }

    writeln!(
        out,
        "{} pages scanned, {} matched, {} unreadable",
        summary.scanned, summary.matched, summary.unreadable
    )?;
    Ok(summary)
}

/// Prints the bit number of every well-known page flag in the target.
pub fn list_flags<T: Target>(session: &Session<T>, out: &mut impl Write) -> Result<()> {
    for flag in PageFlag::ALL {
        match session.flag_bit(flag.name()) {
            Some(bit) => writeln!(out, "{:>3} {flag}", bit)?,
            None => writeln!(out, "  - {flag}")?,
        }
    }
    Ok(())
}

/// Prints the target's memory layout and size.
pub fn stats<T: Target>(session: &Session<T>, out: &mut impl Write) -> Result<()> {
    let arch = session.arch()?;
    let (min, max) = session.pfn_range()?;

    writeln!(out, "memory model     {}", session.memory_model()?)?;
    writeln!(out, "page shift       {}", arch.page_shift)?;
    writeln!(out, "page size        {}", arch.page_size())?;
    writeln!(out, "descriptor size  {}", arch.descriptor_size)?;
    writeln!(out, "direct map       {:#x}", arch.direct_map_offset)?;
    writeln!(out, "page array       {}", session.page_array_base()?)?;
    writeln!(out, "page frames      {min}..{max}")?;
    match session.totalram_pages() {
        Ok(pages) => writeln!(
            out,
            "total ram        {} pages ({} KiB)",
            pages,
            pages.saturating_mul(arch.page_size()) / 1024
        )?,
        Err(Error::MetadataUnavailable(name)) => writeln!(out, "total ram        unknown ({name} is unavailable)")?,
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

/// Adds the `PG_` prefix to a flag name if it lacks one.
fn flag_name(name: &str) -> String {
    if name.starts_with("PG_") {
        name.to_string()
    } else {
        format!("PG_{name}")
    }
}
