use std::error::Error;
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::exit;

use log::{LevelFilter, SetLoggerError};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    ThreadLogMode, WriteLogger,
};

#[derive(Debug)]
pub enum LoggingError {
    Io(PathBuf, io::Error),
    Init(SetLoggerError),
}

impl fmt::Display for LoggingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            LoggingError::Io(ref path, ref err) => write!(f, "can't open {:?}: {}", path, err),
            LoggingError::Init(ref err) => write!(f, "logger already set: {}", err),
        }
    }
}

impl Error for LoggingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            LoggingError::Io(_, ref err) => Some(err),
            LoggingError::Init(ref err) => Some(err),
        }
    }
}

impl From<SetLoggerError> for LoggingError {
    fn from(err: SetLoggerError) -> LoggingError {
        LoggingError::Init(err)
    }
}

/// Where log records go: `-` on the command line is the terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    File(PathBuf),
}

impl LogTarget {
    pub fn parse(arg: &str) -> Self {
        match arg {
            "-" | "" => LogTarget::Stderr,
            path => LogTarget::File(PathBuf::from(path)),
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == LogTarget::Stderr
    }
}

/// Debug records carry the worker's thread name (`tokenizer-3`).
fn log_config() -> simplelog::Config {
    ConfigBuilder::new()
        .set_thread_level(LevelFilter::Debug)
        .set_thread_mode(ThreadLogMode::Names)
        .set_location_level(LevelFilter::Trace)
        .build()
}

fn open_log_file(path: &Path) -> Result<std::fs::File, LoggingError> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|err| LoggingError::Io(path.to_path_buf(), err))
}

pub fn set_logger(target: &LogTarget, level: LevelFilter) -> Result<(), LoggingError> {
    let logger: Box<dyn SharedLogger> = match *target {
        LogTarget::Stderr => {
            TermLogger::new(level, log_config(), TerminalMode::Stderr, ColorChoice::Auto)
        }
        LogTarget::File(ref path) => WriteLogger::new(level, log_config(), open_log_file(path)?),
    };
    CombinedLogger::init(vec![logger])?;
    Ok(())
}

pub fn set_logger_or_exit(target: &LogTarget, level: LevelFilter) {
    if let Err(err) = set_logger(target, level) {
        let _ = writeln!(io::stderr().lock(), "can't start logging: {}", err);
        exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dash_means_terminal() {
        assert_eq!(LogTarget::parse("-"), LogTarget::Stderr);
        assert!(LogTarget::parse("-").is_terminal());
        let file = LogTarget::parse("run.log");
        assert_eq!(file, LogTarget::File(PathBuf::from("run.log")));
        assert!(!file.is_terminal());
    }

    #[test]
    fn unopenable_log_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("run.log");
        match open_log_file(&path) {
            Err(err @ LoggingError::Io(..)) => {
                assert!(err.to_string().contains("run.log"));
                assert!(err.source().is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
