//! Session logger: a `log` backend writing to one file per run.
//!
//! The file is **truncated at each start**, so it only holds the most recent
//! session. Without an explicit path the log goes to
//!   Windows:  `%APPDATA%\PaintFE\paintfe-tiles.log`
//!   Linux:    `~/.local/share/PaintFE/paintfe-tiles.log`
//!   macOS:    `~/Library/Application Support/PaintFE/paintfe-tiles.log`
//!
//! Library code only uses the `log` macros; the binary calls [`init`] once,
//! before reading its settings, and [`set_level`] once they are known.
//! Warnings and errors are echoed to stderr as well.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;

static LOGGER: OnceLock<SessionLogger> = OnceLock::new();

struct SessionLogger {
    file: Mutex<File>,
    path: PathBuf,
    level: AtomicUsize,
}

impl SessionLogger {
    /// Write a line. I/O errors are ignored so that logging never crashes
    /// the process.
    fn write_line(&self, line: &str) {
        let mut file = self.file.lock();
        let _ = writeln!(file, "{}", line);
    }

    fn level(&self) -> LevelFilter {
        LevelFilter::iter()
            .nth(self.level.load(Ordering::Relaxed))
            .unwrap_or(LevelFilter::Trace)
    }

    fn set_level(&self, level: LevelFilter) {
        self.level.store(level as usize, Ordering::Relaxed);
    }
}

impl Log for SessionLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "[{}] [{}] {}: {}",
            timestamp(),
            record.level(),
            record.target(),
            record.args()
        );
        if record.level() <= log::Level::Warn {
            eprintln!("{}", line);
        }
        self.write_line(&line);
    }

    fn flush(&self) {
        let _ = self.file.lock().flush();
    }
}

/// Returns the path of the current session log, if [`init`] succeeded.
pub fn log_path() -> Option<&'static Path> {
    LOGGER.get().map(|l| l.path.as_path())
}

/// Initialise the session logger. Only the first call has any effect.
///
/// * Creates (or truncates) the log file at `path`, or at the default
///   location when `None`.
/// * Installs itself as the `log` backend at `level`.
/// * Installs a panic hook that writes the panic message to the log before
///   running the previous hook.
///
/// Failing to open the file is not fatal; the error is printed and the
/// process runs without a log.
pub fn init(path: Option<&Path>, level: LevelFilter) {
    if LOGGER.get().is_some() {
        return;
    }
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_log_path);

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        let _ = fs::create_dir_all(parent);
    }

    let file = match OpenOptions::new().create(true).write(true).truncate(true).open(&path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("[logger] Failed to open log file {:?}: {}", path, e);
            return;
        }
    };

    let logger = LOGGER.get_or_init(|| SessionLogger {
        file: Mutex::new(file),
        path: path.clone(),
        level: AtomicUsize::new(level as usize),
    });
    if log::set_logger(logger).is_err() {
        // Another backend (e.g. a test harness) got there first.
        return;
    }
    log::set_max_level(level);

    logger.write_line(&format!("=== paintfe-tiles session started {} ===", human_timestamp()));
    logger.write_line(&format!("Log file: {}", path.display()));
    logger.write_line("");

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if let Some(logger) = LOGGER.get() {
            logger.write_line(&format!("[{}] [PANIC] {}", timestamp(), info));
            logger.flush();
        }
        prev(info);
    }));
}

/// Change the level of the installed logger, e.g. once the settings file
/// has been read.
pub fn set_level(level: LevelFilter) {
    if let Some(logger) = LOGGER.get() {
        logger.set_level(level);
    }
    log::set_max_level(level);
}

fn default_log_path() -> PathBuf {
    data_dir().join("PaintFE").join("paintfe-tiles.log")
}

/// Platform data directory (without the app sub-folder).
fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library").join("Application Support");
        }
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from(".")
}

/// `HH:MM:SS` (UTC) of the current time.
fn timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => format_clock(d.as_secs()),
        Err(_) => "??:??:??".to_string(),
    }
}

fn format_clock(secs: u64) -> String {
    let h = (secs % 86400) / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    format!("{:02}:{:02}:{:02}", h, m, s)
}

fn human_timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => format!("(unix {})", d.as_secs()),
        Err(_) => "(unknown time)".to_string(),
    }
}
