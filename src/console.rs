//! Console output for diagnostic messages
//!
//! The crate does not own any output hardware. Messages go to a sink the
//! embedding kernel installs with [`set_sink`]; the tail of everything written
//! is also kept in a small backlog so tests and post-mortem dumps can read it.

use core::fmt::{self, Write};
use spin::Mutex;

/// Bytes of console output retained in the backlog
pub const CONSOLE_BACKLOG: usize = 1024;

/// Destination for console text
pub trait ConsoleSink: Sync {
    /// Emit a string; must not block or allocate
    fn write_str(&self, s: &str);
}

/// Console writer state
pub struct Console {
    sink: Option<&'static dyn ConsoleSink>,
    backlog: heapless::String<CONSOLE_BACKLOG>,
}

impl Console {
    /// Create a new console with no sink attached
    pub const fn new() -> Self {
        Console {
            sink: None,
            backlog: heapless::String::new(),
        }
    }

    /// Write a string to the sink and the backlog
    pub fn write_str(&mut self, s: &str) {
        if let Some(sink) = self.sink {
            sink.write_str(s);
        }

        for c in s.chars() {
            if self.backlog.push(c).is_err() {
                self.drop_oldest_half();
                let _ = self.backlog.push(c);
            }
        }
    }

    /// Backlog full: discard the older half, keeping the newest text
    fn drop_oldest_half(&mut self) {
        let mut cut = self.backlog.len() / 2;
        while !self.backlog.is_char_boundary(cut) {
            cut += 1;
        }
        let mut tail = heapless::String::new();
        // The tail is shorter than the backlog it came from
        let _ = tail.push_str(&self.backlog[cut..]);
        self.backlog = tail;
    }

    /// Drop everything held in the backlog
    pub fn clear(&mut self) {
        self.backlog.clear();
    }
}

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        Console::write_str(self, s);
        Ok(())
    }
}

/// Global console instance
static CONSOLE: Mutex<Console> = Mutex::new(Console::new());

/// Install the output sink
pub fn set_sink(sink: &'static dyn ConsoleSink) {
    CONSOLE.lock().sink = Some(sink);
}

/// Print formatted text to console
pub fn print(args: fmt::Arguments) {
    // Console::write_str never fails
    let _ = CONSOLE.lock().write_fmt(args);
}

/// Copy of the retained console output
pub fn backlog() -> heapless::String<CONSOLE_BACKLOG> {
    CONSOLE.lock().backlog.clone()
}

/// Discard the retained console output
pub fn clear_backlog() {
    CONSOLE.lock().clear();
}

/// Sink writing to the host's standard error
#[cfg(feature = "std")]
pub struct StderrSink;

#[cfg(feature = "std")]
impl ConsoleSink for StderrSink {
    fn write_str(&self, s: &str) {
        std::eprint!("{}", s);
    }
}

/// Print macro for diagnostic output
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::console::print(format_args!($($arg)*));
    };
}

/// Print with newline macro
#[macro_export]
macro_rules! println {
    () => {
        $crate::print!("\n");
    };
    ($($arg:tt)*) => {
        $crate::console::print(format_args!("{}\n", format_args!($($arg)*)))
    };
}
