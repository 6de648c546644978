//! Defines the kernel console: everything environments write through `cputs`, plus the kernel's
//! own diagnostics.
//!
//! The emulated machine has no display, so the console keeps a transcript that tests and the host
//! can inspect, and forwards each line to the `log` facade.

use alloc::string::String;
use core::fmt::{self, Write};

use spin::Mutex;

pub struct Console {
    transcript: Mutex<String>,
}

impl Console {
    pub const fn new() -> Self {
        Self {
            transcript: Mutex::new(String::new()),
        }
    }

    /// Appends `text` verbatim.
    pub fn write_str(&self, text: &str) {
        self.transcript.lock().push_str(text);
        for line in text.lines().filter(|line| !line.is_empty()) {
            log::info!(target: "console", "{}", line);
        }
    }

    /// Appends formatted text. Used for kernel diagnostics.
    pub fn print(&self, args: fmt::Arguments<'_>) {
        let mut line = String::new();
        // Formatting into a String cannot fail.
        let _ = line.write_fmt(args);
        self.write_str(&line);
    }

    /// Returns a copy of everything written so far.
    pub fn transcript(&self) -> String {
        self.transcript.lock().clone()
    }

    /// Returns true if the transcript contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.transcript.lock().contains(needle)
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console")
            .field("len", &self.transcript.lock().len())
            .finish()
    }
}

/// Writes a formatted line to a [`Console`].
macro_rules! kprintln {
    ($console:expr, $($arg:tt)*) => {
        $console.print(format_args!("{}\n", format_args!($($arg)*)))
    };
}

pub(crate) use kprintln;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_transcript() {
        let console = Console::new();
        console.write_str("hello ");
        kprintln!(console, "[{:08x}] world", 0x1000);
        assert_eq!(console.transcript(), "hello [00001000] world\n");
        assert!(console.contains("world"));
        assert!(!console.contains("goodbye"));
    }
}
