use std::{
    fs::{File, OpenOptions},
    io::Write as _,
    sync::OnceLock,
};

use colored::Colorize;
use log::{Level, Log, Metadata, Record};
use parking_lot::Mutex;
use time::{OffsetDateTime, macros::format_description};

pub use log::{LevelFilter as LogLevelFilter, debug, error, info, trace, warn};

pub struct Logger {
    file: Option<Mutex<File>>,
}

static INSTANCE: OnceLock<Logger> = OnceLock::new();

impl Logger {
    /// Returns the global logger, creating it on first call. `write_to_file`
    /// additionally appends plain-text records to `<name>.log` in the cwd.
    pub fn instance(name: &str, write_to_file: bool) -> &'static Self {
        INSTANCE.get_or_init(|| {
            let file = if write_to_file {
                OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(format!("{name}.log"))
                    .ok()
                    .map(Mutex::new)
            } else {
                None
            };

            Self { file }
        })
    }

    fn timestamp() -> String {
        let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]");

        OffsetDateTime::now_utc()
            .format(format)
            .unwrap_or_else(|_| String::from("?"))
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = format!(
            "[{}] [{}] - {}",
            Self::timestamp(),
            record.level(),
            record.args()
        );

        let colored = match record.level() {
            Level::Error => line.bright_red(),
            Level::Warn => line.yellow(),
            Level::Info => line.cyan(),
            Level::Debug => line.normal(),
            Level::Trace => line.dimmed(),
        };

        if record.level() <= Level::Warn {
            eprintln!("{colored}");
        } else {
            println!("{colored}");
        }

        if let Some(file) = &self.file {
            let _ = writeln!(file.lock(), "{line}");
        }
    }

    fn flush(&self) {}
}

/// Reads the log level from the given environment variable. Returns the
/// default (`Info`) when the variable is unset, and `None` when it is set to
/// something unrecognized.
pub fn get_log_level(env_var: &str) -> Option<LogLevelFilter> {
    let Ok(value) = std::env::var(env_var) else {
        return Some(LogLevelFilter::Info);
    };

    match value.to_lowercase().as_str() {
        "trace" => Some(LogLevelFilter::Trace),
        "debug" => Some(LogLevelFilter::Debug),
        "info" => Some(LogLevelFilter::Info),
        "warn" => Some(LogLevelFilter::Warn),
        "error" => Some(LogLevelFilter::Error),
        "none" | "off" => Some(LogLevelFilter::Off),
        _ => None,
    }
}
