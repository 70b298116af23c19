//! `log` backend writing to the console

use core::sync::atomic::{AtomicBool, Ordering};
use log::{Level, LevelFilter, Log, Metadata, Record};

struct SimpleLogger;

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let color = match record.level() {
                Level::Error => 31,
                Level::Warn => 93,
                Level::Info => 34,
                Level::Debug => 32,
                Level::Trace => 90,
            };
            crate::println!(
                "\u{1B}[{}m[{:>5}] {}: {}\u{1B}[0m",
                color,
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

static LOGGER: SimpleLogger = SimpleLogger;
static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Parse a level name as accepted in the `LOG` build variable
pub fn parse_level(level: &str) -> LevelFilter {
    match level {
        "ERROR" => LevelFilter::Error,
        "WARN" => LevelFilter::Warn,
        "INFO" => LevelFilter::Info,
        "DEBUG" => LevelFilter::Debug,
        "TRACE" => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

/// Install the console logger.
///
/// The level comes from `LOG` at build time. Calling this more than once, or
/// after another logger has been installed, is harmless.
pub fn init() {
    if INSTALLED.swap(true, Ordering::AcqRel) {
        return;
    }
    let _ = log::set_logger(&LOGGER).map(|()| {
        log::set_max_level(match option_env!("LOG") {
            Some(level) => parse_level(level),
            None => LevelFilter::Off,
        });
    });
}

/// Override the maximum level at runtime
pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}
