//! Configuration.
//!
//! A [`Config`] is assembled from three layers, later ones overriding
//! earlier ones: built-in defaults, an optional TOML config file, and
//! command line arguments. This mirrors how the TAL directory, cache
//! directory, and output settings all get their values in practice.

use std::{fs, io};
use std::path::{Path, PathBuf};
use std::time::Duration;
use clap::{App, Arg, ArgMatches};
use log::LevelFilter;
use serde::Deserialize;
use crate::error::Fatal;
use crate::log::level_for;

//------------ Config ---------------------------------------------------------

/// The assembled runtime configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory holding the local repository cache.
    pub cache_dir: PathBuf,

    /// Directory holding the trust anchor locators.
    pub tal_dir: PathBuf,

    /// Directory the validated output is written to.
    pub output_dir: PathBuf,

    /// Optional RFC 8416 local exceptions (SLURM) file.
    pub exceptions: Option<PathBuf>,

    /// Where to send log output.
    pub log_target: LogTarget,

    /// The log level filter.
    pub verbose: LevelFilter,

    /// Bitmask of output formats to produce. See [`OutputFormat`].
    pub outformats: OutputFormats,

    /// Reject objects that don't strictly conform to the RFCs.
    pub strict: bool,

    /// How to deal with stale manifests and CRLs.
    pub stale: FilterPolicy,

    /// How to deal with manifest entries of an unknown type.
    pub unknown_objects: FilterPolicy,

    /// Wall-clock budget for a single repository's synchronization.
    pub repository_timeout: Duration,

    /// Number of parser worker processes.
    ///
    /// The specification describes a single parser worker; this allows
    /// running several in round-robin for throughput while keeping each
    /// one single-threaded and stateless.
    pub parser_workers: usize,

    /// Whether to leave the cache untouched after a dry run.
    pub dirty: bool,

    /// Path to the rsync client binary.
    pub rsync_command: PathBuf,

    /// Extra arguments passed to the rsync client.
    pub rsync_args: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        let base = default_base_dir();
        Config {
            cache_dir: base.join("cache"),
            tal_dir: base.join("tals"),
            output_dir: base.join("output"),
            exceptions: None,
            log_target: LogTarget::Stderr,
            verbose: LevelFilter::Warn,
            outformats: OutputFormats::from_bits(OutputFormat::Json as u8),
            strict: false,
            stale: FilterPolicy::Reject,
            unknown_objects: FilterPolicy::Warn,
            repository_timeout: Duration::from_secs(300),
            parser_workers: 1,
            dirty: false,
            rsync_command: PathBuf::from("rsync"),
            rsync_args: vec![
                "--update".into(), "--times".into(), "--recursive".into(),
            ],
        }
    }
}

impl Config {
    /// Adds the command line arguments understood by `Config` to `app`.
    pub fn config_args<'a: 'b, 'b>(app: App<'a, 'b>) -> App<'a, 'b> {
        app
            .arg(Arg::with_name("config")
                .short("c").long("config").value_name("FILE")
                .help("Path to a TOML config file")
                .takes_value(true))
            .arg(Arg::with_name("cache-dir")
                .long("cache-dir").value_name("DIR")
                .help("Directory for the local repository cache")
                .takes_value(true))
            .arg(Arg::with_name("tal-dir")
                .long("tal-dir").value_name("DIR")
                .help("Directory containing trust anchor locators")
                .takes_value(true))
            .arg(Arg::with_name("output-dir")
                .long("output-dir").value_name("DIR")
                .help("Directory validated output is written to")
                .takes_value(true))
            .arg(Arg::with_name("exceptions")
                .short("x").long("exceptions").value_name("FILE")
                .help("RFC 8416 local exceptions file")
                .takes_value(true))
            .arg(Arg::with_name("strict")
                .long("strict")
                .help("Reject objects that don't strictly conform to RFCs"))
            .arg(Arg::with_name("syslog")
                .long("syslog")
                .help("Log to syslog instead of stderr"))
            .arg(Arg::with_name("verbose")
                .short("v").long("verbose")
                .multiple(true)
                .help("Increase log verbosity, may be repeated"))
            .arg(Arg::with_name("quiet")
                .short("q").long("quiet")
                .help("Only log errors"))
            .arg(Arg::with_name("outformat")
                .short("f").long("outformat").value_name("FORMAT")
                .possible_values(&[
                    "openbgpd", "bird1v4", "bird1v6", "bird2", "csv", "json",
                ])
                .multiple(true)
                .help("Output format(s) to produce"))
    }

    /// Builds a config from defaults, an optional file, and CLI matches.
    pub fn from_arg_matches(matches: &ArgMatches) -> Result<Self, Fatal> {
        let mut config = match matches.value_of("config") {
            Some(path) => Self::from_file(Path::new(path))?,
            None => Config::default(),
        };

        if let Some(dir) = matches.value_of("cache-dir") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Some(dir) = matches.value_of("tal-dir") {
            config.tal_dir = PathBuf::from(dir);
        }
        if let Some(dir) = matches.value_of("output-dir") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(path) = matches.value_of("exceptions") {
            config.exceptions = Some(PathBuf::from(path));
        }
        if matches.is_present("strict") {
            config.strict = true;
        }
        if matches.is_present("syslog") {
            config.log_target = LogTarget::Syslog;
        }
        let verbose = matches.occurrences_of("verbose");
        let quiet = if matches.is_present("quiet") { 1 } else { 0 };
        config.verbose = level_for(verbose, quiet);
        if let Some(values) = matches.values_of("outformat") {
            let mut bits = 0u8;
            for value in values {
                bits |= OutputFormat::from_name(value).ok_or(Fatal::Config)? as u8;
            }
            config.outformats = OutputFormats::from_bits(bits);
        }

        Ok(config)
    }

    /// Loads a config from a TOML file, overriding [`Default::default`].
    pub fn from_file(path: &Path) -> Result<Self, Fatal> {
        let text = fs::read_to_string(path).map_err(|err| {
            log::error!("Failed to read config file {}: {}", path.display(), err);
            Fatal::Config
        })?;
        let file: ConfigFile = toml::from_str(&text).map_err(|err| {
            log::error!("Failed to parse config file {}: {}", path.display(), err);
            Fatal::Config
        })?;
        Ok(file.into_config(Config::default()))
    }

    /// Ensures the cache, TAL, and output directories exist.
    pub fn ensure_dirs(&self) -> Result<(), Fatal> {
        for dir in [&self.cache_dir, &self.tal_dir, &self.output_dir] {
            create_dir_all_friendly(dir)?;
        }
        Ok(())
    }
}

fn create_dir_all_friendly(dir: &Path) -> Result<(), Fatal> {
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(err) => {
            log::error!("Cannot create directory {}: {}", dir.display(), err);
            Err(Fatal::Config)
        }
    }
}

fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".rpki-client")
}

//------------ ConfigFile -----------------------------------------------------

/// The subset of [`Config`] that can be set from a TOML file.
#[derive(Deserialize, Default)]
struct ConfigFile {
    cache_dir: Option<PathBuf>,
    tal_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    exceptions: Option<PathBuf>,
    strict: Option<bool>,
    repository_timeout_secs: Option<u64>,
    parser_workers: Option<usize>,
    rsync_command: Option<PathBuf>,
}

impl ConfigFile {
    fn into_config(self, mut config: Config) -> Config {
        if let Some(v) = self.cache_dir { config.cache_dir = v; }
        if let Some(v) = self.tal_dir { config.tal_dir = v; }
        if let Some(v) = self.output_dir { config.output_dir = v; }
        if self.exceptions.is_some() { config.exceptions = self.exceptions; }
        if let Some(v) = self.strict { config.strict = v; }
        if let Some(v) = self.repository_timeout_secs {
            config.repository_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.parser_workers { config.parser_workers = v; }
        if let Some(v) = self.rsync_command { config.rsync_command = v; }
        config
    }
}

//------------ LogTarget ------------------------------------------------------

#[derive(Clone, Debug)]
pub enum LogTarget {
    Stderr,
    File(PathBuf),
    Syslog,
}

//------------ FilterPolicy ---------------------------------------------------

/// How to treat an object that is technically acceptable but suspicious.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterPolicy {
    /// Process it but log a warning.
    Warn,

    /// Drop it and count it as failed.
    Reject,
}

//------------ OutputFormat ---------------------------------------------------

/// A single selectable output format.
///
/// Values are individual bits so several can be combined in the
/// `outformats` bitmask, matching the source tool's `-f` flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    OpenBgpd = 0x01,
    Bird1V4 = 0x02,
    Bird1V6 = 0x04,
    Bird2 = 0x08,
    Csv = 0x10,
    Json = 0x20,
}

impl OutputFormat {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "openbgpd" => OutputFormat::OpenBgpd,
            "bird1v4" => OutputFormat::Bird1V4,
            "bird1v6" => OutputFormat::Bird1V6,
            "bird2" => OutputFormat::Bird2,
            "csv" => OutputFormat::Csv,
            "json" => OutputFormat::Json,
            _ => return None,
        })
    }
}

/// A bitmask of [`OutputFormat`] values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OutputFormats(u8);

impl OutputFormats {
    pub fn from_bits(bits: u8) -> Self {
        OutputFormats(bits)
    }

    pub fn contains(self, format: OutputFormat) -> bool {
        self.0 & (format as u8) != 0
    }

    pub fn iter(self) -> impl Iterator<Item = OutputFormat> {
        const ALL: [OutputFormat; 6] = [
            OutputFormat::OpenBgpd, OutputFormat::Bird1V4,
            OutputFormat::Bird1V6, OutputFormat::Bird2,
            OutputFormat::Csv, OutputFormat::Json,
        ];
        ALL.iter().copied().filter(move |f| self.contains(*f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outformats_bitmask_round_trips() {
        let bits = OutputFormat::Csv as u8 | OutputFormat::Json as u8;
        let formats = OutputFormats::from_bits(bits);
        assert!(formats.contains(OutputFormat::Csv));
        assert!(formats.contains(OutputFormat::Json));
        assert!(!formats.contains(OutputFormat::Bird2));
        assert_eq!(formats.iter().count(), 2);
    }

    #[test]
    fn default_config_has_sane_dirs() {
        let config = Config::default();
        assert!(config.cache_dir.ends_with("cache"));
        assert!(config.tal_dir.ends_with("tals"));
    }
}
