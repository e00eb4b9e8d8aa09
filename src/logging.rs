/*
 * Process-wide logger setup. Messages go to the terminal and, optionally, are
 * appended to a log file. Library code only uses the `log` macros; an
 * application calls `init_logging` once at startup.
 */
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, TermLogger,
    TerminalMode, WriteLogger,
};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::core::config::{APP_NAME, BidsConfig};
use crate::core::path_utils;

const LOG_FILE_NAME: &str = "bidsio.log";

#[derive(Debug)]
pub enum LoggingError {
    Io(io::Error),
    SetLogger(log::SetLoggerError),
}

impl From<io::Error> for LoggingError {
    fn from(err: io::Error) -> Self {
        LoggingError::Io(err)
    }
}

impl From<log::SetLoggerError> for LoggingError {
    fn from(err: log::SetLoggerError) -> Self {
        LoggingError::SetLogger(err)
    }
}

impl std::fmt::Display for LoggingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoggingError::Io(e) => write!(f, "Could not open log file: {e}"),
            LoggingError::SetLogger(e) => write!(f, "Logger already initialized: {e}"),
        }
    }
}

impl std::error::Error for LoggingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoggingError::Io(e) => Some(e),
            LoggingError::SetLogger(e) => Some(e),
        }
    }
}

/* Parses a level name such as `debug`; `None` for unknown names. */
pub fn level_from_name(level: &str) -> Option<LevelFilter> {
    level.trim().parse().ok()
}

/* Like `level_from_name`, falling back to `Info`. */
pub fn parse_level(level: &str) -> LevelFilter {
    level_from_name(level).unwrap_or(LevelFilter::Info)
}

pub fn init_logging(level: LevelFilter, log_file: Option<&Path>) -> Result<(), LoggingError> {
    let config = ConfigBuilder::new()
        .set_target_level(LevelFilter::Error)
        .set_thread_level(LevelFilter::Off)
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        config.clone(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];

    if let Some(path) = log_file {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        loggers.push(WriteLogger::new(level, config, file));
    }

    CombinedLogger::init(loggers)?;
    log::debug!("Logging: Initialized at level {level}");
    Ok(())
}

/* `bidsio.log` in the per-user log directory, if that directory is available. */
pub fn default_log_path() -> Option<PathBuf> {
    path_utils::get_log_dir(APP_NAME).map(|dir| dir.join(LOG_FILE_NAME))
}

/* Initializes logging from the `log_level` and `log_file` settings. */
pub fn init_from_config(config: &BidsConfig) -> Result<(), LoggingError> {
    init_logging(parse_level(&config.log_level), config.log_file.as_deref())?;
    if level_from_name(&config.log_level).is_none() {
        log::warn!(
            "Logging: Unknown log level {:?}, using 'info'",
            config.log_level
        );
    }
    Ok(())
}
