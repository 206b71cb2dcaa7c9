//! Centralized logging configuration for the emulator.
//!
//! # Architecture
//!
//! - **LogConfig**: Thread-safe global configuration using atomic operations
//! - **LogLevel**: Hierarchical log levels (Off < Error < Warn < Info < Debug < Trace)
//! - **LogCategory**: Emulator components (CPU, Bus, Interrupts, IdleLoop, Media, SaveState, Stubs)
//! - **log()**: Common logging function for all output with async file I/O
//! - **apply_filter()**: `"warn,bus=debug,idle=trace"` style configuration for frontends
//!
//! Messages are built lazily and only when the category is enabled, so a
//! disabled category costs one atomic load. File output goes through a
//! background thread so emulation never blocks on I/O.
//!
//! # Usage
//!
//! ```rust
//! use emu_core::logging::{log, LogLevel, LogCategory};
//!
//! log(LogCategory::Bus, LogLevel::Debug, || {
//!     format!("unmapped read at {:06X}", 0xA13000)
//! });
//! ```

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Log level for controlling verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    /// Parse log level from string (case-insensitive)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "err" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    fn to_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(val: u8) -> Self {
        match val {
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            5 => LogLevel::Trace,
            _ => LogLevel::Off,
        }
    }
}

const CATEGORY_COUNT: usize = 7;

/// Log category for different emulator components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    /// Instruction execution, resets, STOP
    CPU,
    /// Memory map resolution, unmapped and read-only accesses
    Bus,
    /// Raise / acknowledge / delivery
    Interrupts,
    /// Spin-loop detection and patching
    IdleLoop,
    /// Image classification, firmware lookup, disc slots
    Media,
    /// Save-state stream and chunk framing
    SaveState,
    /// Unimplemented features/stubs
    Stubs,
}

impl LogCategory {
    pub const ALL: [LogCategory; CATEGORY_COUNT] = [
        LogCategory::CPU,
        LogCategory::Bus,
        LogCategory::Interrupts,
        LogCategory::IdleLoop,
        LogCategory::Media,
        LogCategory::SaveState,
        LogCategory::Stubs,
    ];

    fn index(self) -> usize {
        match self {
            LogCategory::CPU => 0,
            LogCategory::Bus => 1,
            LogCategory::Interrupts => 2,
            LogCategory::IdleLoop => 3,
            LogCategory::Media => 4,
            LogCategory::SaveState => 5,
            LogCategory::Stubs => 6,
        }
    }

    /// Parse a category name as used in filter strings (case-insensitive)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cpu" => Some(LogCategory::CPU),
            "bus" | "mem" => Some(LogCategory::Bus),
            "irq" | "int" | "interrupts" => Some(LogCategory::Interrupts),
            "idle" | "idleloop" => Some(LogCategory::IdleLoop),
            "media" | "cd" => Some(LogCategory::Media),
            "state" | "savestate" => Some(LogCategory::SaveState),
            "stubs" | "stub" => Some(LogCategory::Stubs),
            _ => None,
        }
    }
}

/// Errors produced while parsing a filter string
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("unknown log category: {0}")]
    UnknownCategory(String),
    #[error("unknown log level: {0}")]
    UnknownLevel(String),
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One-second message budget of a category
#[derive(Debug, Clone, Copy, Default)]
struct Window {
    start: Option<Instant>,
    count: usize,
    dropped: usize,
}

/// Per-category message budget. Messages over the budget are counted and
/// reported with the first message of the next window.
struct RateLimiter {
    per_second: AtomicUsize,
    windows: Mutex<[Window; CATEGORY_COUNT]>,
}

impl RateLimiter {
    fn new(per_second: usize) -> Self {
        Self {
            per_second: AtomicUsize::new(per_second),
            windows: Mutex::new([Window::default(); CATEGORY_COUNT]),
        }
    }

    /// `(allowed, dropped)`: `dropped` carries the count lost in the
    /// previous window, once.
    fn admit(&self, category: LogCategory) -> (bool, Option<usize>) {
        let now = Instant::now();
        let mut windows = lock(&self.windows);
        let w = &mut windows[category.index()];

        let mut dropped = None;
        let expired = w
            .start
            .map_or(true, |start| now.duration_since(start) >= Duration::from_secs(1));
        if expired {
            dropped = (w.dropped > 0).then_some(w.dropped);
            *w = Window {
                start: Some(now),
                ..Window::default()
            };
        }

        if w.count < self.per_second.load(Ordering::Relaxed) {
            w.count += 1;
            (true, dropped)
        } else {
            w.dropped += 1;
            (false, dropped)
        }
    }
}

/// Global logging configuration
pub struct LogConfig {
    /// Applies to every category whose own level is Off
    global_level: AtomicU8,
    category_levels: [AtomicU8; CATEGORY_COUNT],
    /// Background file writer, stderr when `None`
    log_sender: Mutex<Option<Sender<String>>>,
    rate_limiter: RateLimiter,
}

impl LogConfig {
    /// All logging disabled, 60 logs/second per category
    fn new() -> Self {
        Self {
            global_level: AtomicU8::new(LogLevel::Off as u8),
            category_levels: std::array::from_fn(|_| AtomicU8::new(LogLevel::Off as u8)),
            log_sender: Mutex::new(None),
            rate_limiter: RateLimiter::new(60),
        }
    }

    /// Get the global singleton instance
    pub fn global() -> &'static Self {
        use std::sync::OnceLock;
        static INSTANCE: OnceLock<LogConfig> = OnceLock::new();
        INSTANCE.get_or_init(LogConfig::new)
    }

    pub fn set_global_level(&self, level: LogLevel) {
        self.global_level.store(level.to_u8(), Ordering::Relaxed);
    }

    pub fn get_global_level(&self) -> LogLevel {
        LogLevel::from_u8(self.global_level.load(Ordering::Relaxed))
    }

    pub fn set_level(&self, category: LogCategory, level: LogLevel) {
        self.category_levels[category.index()].store(level.to_u8(), Ordering::Relaxed);
    }

    pub fn get_level(&self, category: LogCategory) -> LogLevel {
        LogLevel::from_u8(self.category_levels[category.index()].load(Ordering::Relaxed))
    }

    /// A category with its own level uses it; otherwise the global level decides.
    pub fn should_log(&self, category: LogCategory, level: LogLevel) -> bool {
        let category_level = self.get_level(category);
        if category_level != LogLevel::Off {
            level <= category_level
        } else {
            level <= self.get_global_level()
        }
    }

    /// Reset all logging to Off
    pub fn reset(&self) {
        self.set_global_level(LogLevel::Off);
        for category in LogCategory::ALL {
            self.set_level(category, LogLevel::Off);
        }
    }

    /// Apply a comma separated filter such as `"warn,bus=debug,idle=trace"`.
    ///
    /// A bare level sets the global level, `category=level` sets one category.
    /// Nothing is applied if any entry fails to parse.
    pub fn apply_filter(&self, filter: &str) -> Result<(), FilterError> {
        let mut global = None;
        let mut per_category = Vec::new();

        for entry in filter.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            match entry.split_once('=') {
                Some((cat, lvl)) => {
                    let category = LogCategory::from_str(cat.trim())
                        .ok_or_else(|| FilterError::UnknownCategory(cat.trim().to_string()))?;
                    let level = LogLevel::from_str(lvl.trim())
                        .ok_or_else(|| FilterError::UnknownLevel(lvl.trim().to_string()))?;
                    per_category.push((category, level));
                }
                None => {
                    global = Some(
                        LogLevel::from_str(entry)
                            .ok_or_else(|| FilterError::UnknownLevel(entry.to_string()))?,
                    );
                }
            }
        }

        if let Some(level) = global {
            self.set_global_level(level);
        }
        for (category, level) in per_category {
            self.set_level(category, level);
        }
        Ok(())
    }

    /// Messages per second allowed through each category
    pub fn set_rate_limit(&self, per_second: usize) {
        self.rate_limiter.per_second.store(per_second, Ordering::Relaxed);
    }

    /// Append log output to `path` from a background thread. A file set
    /// earlier is closed once its queue drains.
    pub fn set_log_file(&self, path: PathBuf) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let (sender, receiver) = channel::<String>();
        thread::Builder::new()
            .name("log-writer".to_string())
            .spawn(move || {
                for line in receiver {
                    if writeln!(file, "{}", line).is_err() {
                        break;
                    }
                }
                let _ = file.flush();
            })?;
        *lock(&self.log_sender) = Some(sender);
        Ok(())
    }

    fn write_message(&self, message: String) {
        let unsent = match lock(&self.log_sender).as_ref() {
            Some(sender) => sender.send(message).err().map(|e| e.0),
            None => Some(message),
        };
        if let Some(message) = unsent {
            eprintln!("{}", message);
        }
    }
}

/// Log a message with the specified category and level
///
/// The closure only runs when the category is enabled at `level` and the
/// per-category rate limit (60/s by default) has room. Dropped messages are
/// summarized once per second.
///
/// ```rust
/// use emu_core::logging::{log, LogCategory, LogLevel};
///
/// log(LogCategory::IdleLoop, LogLevel::Info, || {
///     format!("patched idle loop at {:06X}", 0x000345)
/// });
/// ```
pub fn log<F>(category: LogCategory, level: LogLevel, message_fn: F)
where
    F: FnOnce() -> String,
{
    let config = LogConfig::global();
    if !config.should_log(category, level) {
        return;
    }
    let (allowed, dropped) = config.rate_limiter.admit(category);
    if let Some(n) = dropped {
        config.write_message(format!("[{:?}] {} message(s) over the rate limit dropped", category, n));
    }
    if allowed {
        config.write_message(format!("[{:?}] {}", category, message_fn()));
    }
}
