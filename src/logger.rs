// Unified logging: coloured console output plus an optional plain-text log file.
//
// The binary installs one global logger at start-up. Library code and unit tests log through the
// same functions and macros; without an installed logger they fall back to stdout/stderr.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Mutex, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Success,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Success => "SUCCESS",
        }
    }

    fn color_code(&self) -> &'static str {
        match self {
            LogLevel::Debug => "\x1b[37m",
            LogLevel::Info => "\x1b[36m",
            LogLevel::Warn => "\x1b[33m",
            LogLevel::Error => "\x1b[31m",
            LogLevel::Success => "\x1b[32m",
        }
    }
}

pub struct Logger {
    file_writer: Option<Mutex<File>>,
    console_level: LogLevel,
    file_level: LogLevel,
}

impl Logger {
    /// Creates a logger writing to the console and, if given, appending to `log_file_path`.
    /// Missing parent directories are created.
    pub fn new(log_file_path: Option<&str>) -> io::Result<Self> {
        let file_writer = match log_file_path {
            Some(path) => {
                if let Some(parent_dir) = Path::new(path).parent() {
                    fs::create_dir_all(parent_dir)?;
                }
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Some(Mutex::new(file))
            }
            None => None,
        };

        Ok(Logger {
            file_writer,
            console_level: LogLevel::Info,
            file_level: LogLevel::Debug,
        })
    }

    /// Lets debug messages through to the console as well.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.console_level = if verbose { LogLevel::Debug } else { LogLevel::Info };
    }

    pub fn has_file(&self) -> bool {
        self.file_writer.is_some()
    }

    fn timestamp() -> String {
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        let timestamp = Self::timestamp();
        let level_str = level.as_str();

        if level >= self.console_level {
            let color = level.color_code();
            let reset = "\x1b[0m";
            println!("{color}[{timestamp}] {level_str}: {message}{reset}");
        }

        if level >= self.file_level {
            if let Some(file_writer) = &self.file_writer {
                if let Ok(mut file) = file_writer.lock() {
                    let _ = writeln!(file, "[{}] {}: {}", timestamp, level_str, message);
                    let _ = file.flush();
                }
            }
        }
    }

    /// Writes `message` without timestamp or level, e.g. banners and tables.
    pub fn raw(&self, message: &str) {
        println!("{}", message);
        if let Some(file_writer) = &self.file_writer {
            if let Ok(mut file) = file_writer.lock() {
                let _ = writeln!(file, "{}", message);
                let _ = file.flush();
            }
        }
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn success(&self, message: &str) {
        self.log(LogLevel::Success, message);
    }

    pub fn log_fmt(&self, level: LogLevel, args: std::fmt::Arguments) {
        self.log(level, &args.to_string());
    }
}

static GLOBAL_LOGGER: OnceLock<Logger> = OnceLock::new();

/// Installs the global logger. If the log file cannot be opened the logger
/// falls back to console-only output; the returned flag says whether a file is
/// attached.
pub fn init_logger(log_file_path: Option<&str>, verbose: bool) -> io::Result<bool> {
    let mut logger = Logger::new(log_file_path).or_else(|_| Logger::new(None))?;
    logger.set_verbose(verbose);
    let has_file = logger.has_file();
    GLOBAL_LOGGER
        .set(logger)
        .map_err(|_| io::Error::new(io::ErrorKind::AlreadyExists, "Logger already initialized"))?;
    Ok(has_file)
}

pub fn get_logger() -> Option<&'static Logger> {
    GLOBAL_LOGGER.get()
}

macro_rules! generate_global_log_fn {
    ($fn_name:ident, $method:ident, $level:literal, $fallback:ident) => {
        pub fn $fn_name(message: &str) {
            if let Some(logger) = get_logger() {
                logger.$method(message);
            } else {
                $fallback!("{}: {}", $level, message);
            }
        }
    };
    ($fn_name:ident, $method:ident, $fallback:ident) => {
        pub fn $fn_name(message: &str) {
            if let Some(logger) = get_logger() {
                logger.$method(message);
            } else {
                $fallback!("{}", message);
            }
        }
    };
}

generate_global_log_fn!(log_debug, debug, "DEBUG", eprintln);
generate_global_log_fn!(log_info, info, println);
generate_global_log_fn!(log_warn, warn, "WARNING", eprintln);
generate_global_log_fn!(log_error, error, "ERROR", eprintln);
generate_global_log_fn!(log_success, success, println);
generate_global_log_fn!(log_raw, raw, println);

/// Logs a `====` framed section title.
pub fn log_banner(title: &str) {
    let rule = "=".repeat(60);
    log_raw("");
    log_raw(&rule);
    log_raw(title);
    log_raw(&rule);
}

#[macro_export]
macro_rules! log_debug_fmt {
    ($($arg:tt)*) => {
        if let Some(logger) = $crate::logger::get_logger() {
            logger.log_fmt($crate::logger::LogLevel::Debug, format_args!($($arg)*));
        } else {
            eprintln!("DEBUG: {}", format!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_info_fmt {
    ($($arg:tt)*) => {
        if let Some(logger) = $crate::logger::get_logger() {
            logger.log_fmt($crate::logger::LogLevel::Info, format_args!($($arg)*));
        } else {
            println!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_warn_fmt {
    ($($arg:tt)*) => {
        if let Some(logger) = $crate::logger::get_logger() {
            logger.log_fmt($crate::logger::LogLevel::Warn, format_args!($($arg)*));
        } else {
            eprintln!("WARNING: {}", format!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_error_fmt {
    ($($arg:tt)*) => {
        if let Some(logger) = $crate::logger::get_logger() {
            logger.log_fmt($crate::logger::LogLevel::Error, format_args!($($arg)*));
        } else {
            eprintln!("ERROR: {}", format!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_success_fmt {
    ($($arg:tt)*) => {
        if let Some(logger) = $crate::logger::get_logger() {
            logger.log_fmt($crate::logger::LogLevel::Success, format_args!($($arg)*));
        } else {
            println!($($arg)*);
        }
    };
}
