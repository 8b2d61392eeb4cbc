//! Defines the console logger that writes log records to standard error.

use std::io::Write;

use log::LevelFilter;
use spin::{Mutex, Once};

pub struct Console {
    stderr: Mutex<std::io::Stderr>,
}

static DEFAULT: Once<Console> = Once::new();

impl Console {
    /// Installs the console as the global logger.
    ///
    /// `verbosity` raises the level above the build's default by one step per
    /// count, up to `Trace`.
    pub fn init(verbosity: u8) -> &'static Self {
        let console = Self::default();
        console.install(verbosity);
        console
    }

    pub fn default() -> &'static Self {
        DEFAULT.call_once(|| Console {
            stderr: Mutex::new(std::io::stderr()),
        })
    }

    pub fn install(&'static self, verbosity: u8) {
        // A logger may already be installed when running under a test harness.
        if log::set_logger(self).is_ok() {
            log::set_max_level(level_for(verbosity));
        }
    }
}

#[cfg(debug_assertions)]
const BASE_LEVEL: LevelFilter = LevelFilter::Info;

#[cfg(not(debug_assertions))]
const BASE_LEVEL: LevelFilter = LevelFilter::Warn;

fn level_for(verbosity: u8) -> LevelFilter {
    LevelFilter::iter()
        .skip_while(|level| *level != BASE_LEVEL)
        .nth(usize::from(verbosity))
        .unwrap_or(LevelFilter::Trace)
}

impl log::Log for Console {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // Nowhere left to report a failure to write to stderr.
        let _ = write_log_entry_to(&mut *self.stderr.lock(), record);
    }

    fn flush(&self) {
        let _ = self.stderr.lock().flush();
    }
}

fn write_log_entry_to(writer: &mut impl Write, record: &log::Record) -> std::io::Result<()> {
    #[cfg(any(debug_assertions, feature = "detailed-logging"))]
    return writeln!(
        writer,
        "[{} {}:{} {}] {}",
        record.level(),
        record.file().unwrap_or("unknown"),
        record.line().unwrap_or(0),
        record.target(),
        record.args()
    );
    #[cfg(not(any(debug_assertions, feature = "detailed-logging")))]
    return writeln!(writer, "[{:5}] {}", record.level(), record.args());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_the_level() {
        assert_eq!(level_for(0), BASE_LEVEL);
        assert!(level_for(1) > BASE_LEVEL);
        assert_eq!(level_for(10), LevelFilter::Trace);
    }

    #[test]
    fn entries_end_with_the_message() {
        let mut output = Vec::new();
        write_log_entry_to(
            &mut output,
            &log::Record::builder()
                .level(log::Level::Warn)
                .target("kmem::page_array")
                .args(format_args!("flat memory model"))
                .build(),
        )
        .unwrap();
        let line = String::from_utf8(output).unwrap();
        assert!(line.starts_with("[WARN"));
        assert!(line.ends_with("] flat memory model\n"));
    }
}
