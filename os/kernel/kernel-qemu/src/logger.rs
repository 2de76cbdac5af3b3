use crate::qemu_trace;
use core::fmt;
use kernel_sync::SyncOnceCell;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

static LOGGER: SyncOnceCell<QemuLogger> = SyncOnceCell::new();

/// `log` backend writing to the QEMU debug port.
pub struct QemuLogger {
    max_level: LevelFilter,
}

impl QemuLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    /// Install the logger. Call once during early init.
    ///
    /// # Errors
    /// [`SetLoggerError`] if a logger is already installed.
    pub fn init(self) -> Result<(), SetLoggerError> {
        let max_level = self.max_level;
        let logger = match LOGGER.set(self) {
            Ok(logger) => logger,
            // Already installed; let `log` report it.
            Err(_) => LOGGER.get_or_init(|| Self::new(max_level)),
        };
        log::set_logger(logger)?;
        log::set_max_level(max_level);
        Ok(())
    }
}

/// Render `record` as one log line.
fn write_record(out: &mut impl fmt::Write, record: &Record) -> fmt::Result {
    writeln!(out, "[{}] {}: {}", record.level(), record.target(), record.args())
}

impl Log for QemuLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        qemu_trace!("{}", LogLine(record));
    }

    fn flush(&self) {}
}

struct LogLine<'a, 'r>(&'a Record<'r>);

impl fmt::Display for LogLine<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_record(f, self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn line_format() {
        let mut out = String::new();
        write_record(
            &mut out,
            &Record::builder()
                .level(Level::Info)
                .target("kernel_alloc::ram")
                .args(format_args!("{} regions", 2))
                .build(),
        )
        .unwrap();
        assert_eq!(out, "[INFO] kernel_alloc::ram: 2 regions\n");
    }

    #[test]
    fn level_filter() {
        let logger = QemuLogger::new(LevelFilter::Debug);
        let debug = Metadata::builder().level(Level::Debug).build();
        let trace = Metadata::builder().level(Level::Trace).build();
        assert!(logger.enabled(&debug));
        assert!(!logger.enabled(&trace));
    }
}
