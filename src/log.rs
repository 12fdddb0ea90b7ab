//! Logging setup.
//!
//! The orchestrator process logs to stderr, a file, or syslog depending
//! on [`Config`]. Worker processes inherit the same setup so that
//! diagnostics from e.g. the rsync worker end up in the same sink as
//! everything else, tagged with the worker's name.

use std::path::Path;
use log::LevelFilter;
use crate::config::{Config, LogTarget};
use crate::error::Fatal;

/// Initializes logging as configured.
///
/// Must be called exactly once, early in `main`, before any worker is
/// forked -- children inherit the dispatcher since `fern` installs a
/// global logger.
pub fn init(config: &Config) -> Result<(), Fatal> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] {} {}",
                record.target(),
                record.level(),
                message
            ))
        })
        .level(config.verbose);

    dispatch = match &config.log_target {
        LogTarget::Stderr => dispatch.chain(std::io::stderr()),
        LogTarget::File(path) => {
            dispatch.chain(open_log_file(path)?)
        }
        #[cfg(unix)]
        LogTarget::Syslog => dispatch.chain(open_syslog()?),
    };

    dispatch.apply().map_err(|_| Fatal::Config)
}

fn open_log_file(path: &Path) -> Result<std::fs::File, Fatal> {
    fern::log_file(path).map_err(|err| {
        eprintln!("Failed to open log file {}: {}", path.display(), err);
        Fatal::Config
    })
}

#[cfg(unix)]
fn open_syslog() -> Result<syslog::Logger<syslog::LoggerBackend, syslog::Formatter3164>, Fatal> {
    let formatter = syslog::Formatter3164 {
        facility: syslog::Facility::LOG_DAEMON,
        hostname: None,
        process: "rpki-client".into(),
        pid: std::process::id(),
    };
    syslog::unix(formatter).map_err(|err| {
        eprintln!("Failed to connect to syslog: {}", err);
        Fatal::Config
    })
}

/// Returns the level filter for a given verbosity count and quiet flag.
pub fn level_for(verbose: u64, quiet: u64) -> LevelFilter {
    if quiet > 0 {
        return LevelFilter::Error
    }
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Logs a non-fatal cryptographic or parse diagnostic.
///
/// Mirrors the source tool's `cryptowarnx`: always non-fatal, always
/// formatted with context about which object triggered it.
#[macro_export]
macro_rules! cryptowarnx {
    ($($arg:tt)*) => {
        log::warn!($($arg)*)
    }
}

/// Logs a fatal cryptographic diagnostic before the caller maps it to a
/// process exit. Mirrors the source tool's `cryptoerrx`.
#[macro_export]
macro_rules! cryptoerrx {
    ($($arg:tt)*) => {
        log::error!($($arg)*)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_mapping() {
        assert_eq!(level_for(0, 0), LevelFilter::Warn);
        assert_eq!(level_for(2, 0), LevelFilter::Debug);
        assert_eq!(level_for(5, 1), LevelFilter::Error);
    }
}
