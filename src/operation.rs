//! The commands this binary understands.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::Command;
use clap::{App, Arg, ArgMatches, SubCommand};
use log::{error, info, warn};
use tempfile::NamedTempFile;
use crate::config::Config;
use crate::error::{ExitError, Fatal};
use crate::orchestrator::Orchestrator;
use crate::output;
use crate::slurm::LocalExceptions;

//------------ Orders ---------------------------------------------------------

/// The config and the command to run with it, bundled together the way
/// the source tool's `main` wants them.
pub struct Orders {
    config: Config,
    operation: Operation,
}

impl Orders {
    pub fn from_args<'a: 'b, 'b>(app: App<'a, 'b>) -> Result<Self, Fatal> {
        let matches = Operation::config_args(Config::config_args(app)).get_matches();
        Ok(Orders {
            config: Config::from_arg_matches(&matches)?,
            operation: Operation::from_arg_matches(&matches),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn run(self) -> Result<(), ExitError> {
        self.operation.run(self.config)
    }
}

//------------ Operation -------------------------------------------------------

/// The subcommand to run.
pub enum Operation {
    /// Fetch and validate, writing formatted output to `output_dir`.
    Update,

    /// Fetch and validate, printing one format to stdout or a file.
    Vrps {
        output: Option<PathBuf>,
        format: CliFormat,
    },

    /// Shows the man page.
    Man,
}

#[derive(Clone, Copy)]
pub enum CliFormat {
    Csv,
    Json,
    Openbgpd,
    Bird1V4,
    Bird1V6,
    Bird2,
}

impl Operation {
    pub fn config_args<'a: 'b, 'b>(app: App<'a, 'b>) -> App<'a, 'b> {
        app
            .subcommand(
                SubCommand::with_name("update")
                    .about("Fetches and validates, writing all configured output formats"),
            )
            .subcommand(
                SubCommand::with_name("vrps")
                    .about("Prints validated ROA prefixes in one format")
                    .arg(
                        Arg::with_name("output")
                            .short("o").long("output").value_name("FILE")
                            .help("Output file, '-' or omitted for stdout")
                            .default_value("-")
                            .takes_value(true),
                    )
                    .arg(
                        Arg::with_name("format")
                            .short("f").long("format").value_name("FORMAT")
                            .possible_values(&[
                                "csv", "json", "openbgpd", "bird1v4", "bird1v6", "bird2",
                            ])
                            .default_value("csv")
                            .takes_value(true),
                    ),
            )
            .subcommand(SubCommand::with_name("man").about("Shows the man page"))
    }

    pub fn from_arg_matches(matches: &ArgMatches) -> Self {
        match matches.subcommand() {
            ("update", _) => Operation::Update,
            ("vrps", Some(matches)) => Operation::Vrps {
                output: match matches.value_of("output").unwrap() {
                    "-" => None,
                    path => Some(PathBuf::from(path)),
                },
                format: match matches.value_of("format").unwrap() {
                    "csv" => CliFormat::Csv,
                    "json" => CliFormat::Json,
                    "openbgpd" => CliFormat::Openbgpd,
                    "bird1v4" => CliFormat::Bird1V4,
                    "bird1v6" => CliFormat::Bird1V6,
                    "bird2" => CliFormat::Bird2,
                    _ => unreachable!("clap restricts this to the possible_values list"),
                },
            },
            ("man", _) => Operation::Man,
            _ => Operation::Update,
        }
    }

    pub fn run(self, config: Config) -> Result<(), ExitError> {
        match self {
            Operation::Man => Self::man().map_err(|_| Fatal::Config.into()),
            Operation::Update => Self::update(config),
            Operation::Vrps { output, format } => Self::vrps(config, output, format),
        }
    }

    fn man() -> io::Result<()> {
        let mut file = NamedTempFile::new()?;
        file.write_all(MAN_PAGE)?;
        let status = Command::new("man").arg(file.path()).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::Other, "man exited with an error"))
        }
    }

    fn update(config: Config) -> Result<(), ExitError> {
        config.ensure_dirs()?;
        let exceptions = load_exceptions(&config)?;
        let mut orchestrator = Orchestrator::new(config.clone())?;
        let metrics = orchestrator.run()?;

        let mut store_copy = clone_store(&orchestrator.engine().vrps);
        exceptions.apply(&mut store_copy);

        output::write_selected(config.outformats, &store_copy, &metrics, &config.output_dir)
            .map_err(|err| {
                error!("Failed to write output: {}", err);
                Fatal::Config
            })?;

        log_summary(&metrics);
        if metrics.produced_any_vrps() {
            Ok(())
        } else {
            Err(ExitError::NoVrps)
        }
    }

    fn vrps(
        config: Config,
        output: Option<PathBuf>,
        format: CliFormat,
    ) -> Result<(), ExitError> {
        config.ensure_dirs()?;
        let exceptions = load_exceptions(&config)?;
        let mut orchestrator = Orchestrator::new(config.clone())?;
        let metrics = orchestrator.run()?;

        let mut store_copy = clone_store(&orchestrator.engine().vrps);
        exceptions.apply(&mut store_copy);

        let mut target: Box<dyn Write> = match &output {
            Some(path) => Box::new(std::fs::File::create(path).map_err(|err| {
                error!("Failed to create {}: {}", path.display(), err);
                Fatal::Config
            })?),
            None => Box::new(io::stdout()),
        };

        let result = match format {
            CliFormat::Csv => write_one(&output::CsvFormat, &store_copy, &metrics, &mut target),
            CliFormat::Json => write_one(&output::JsonFormat, &store_copy, &metrics, &mut target),
            CliFormat::Openbgpd => {
                write_one(&output::OpenBgpdFormat, &store_copy, &metrics, &mut target)
            }
            CliFormat::Bird1V4 => write_one(
                &output::Bird1Format::v4(),
                &store_copy,
                &metrics,
                &mut target,
            ),
            CliFormat::Bird1V6 => write_one(
                &output::Bird1Format::v6(),
                &store_copy,
                &metrics,
                &mut target,
            ),
            CliFormat::Bird2 => write_one(&output::Bird2Format, &store_copy, &metrics, &mut target),
        };
        result.map_err(|err| {
            error!("Failed to write VRPs: {}", err);
            ExitError::from(Fatal::Config)
        })?;

        log_summary(&metrics);
        if metrics.produced_any_vrps() {
            Ok(())
        } else {
            Err(ExitError::NoVrps)
        }
    }
}

fn write_one<F: output::OutputFormat>(
    format: &F,
    store: &crate::store::VrpStore,
    metrics: &crate::metrics::Metrics,
    target: &mut dyn Write,
) -> io::Result<()> {
    output::write_vrps(format, store, metrics, target)
}

fn clone_store(store: &crate::store::VrpStore) -> crate::store::VrpStore {
    let mut copy = crate::store::VrpStore::new();
    for vrp in store.iter() {
        copy.insert(vrp.key, &vrp.tal, vrp.expires);
    }
    copy
}

fn load_exceptions(config: &Config) -> Result<LocalExceptions, Fatal> {
    match &config.exceptions {
        Some(path) => LocalExceptions::from_file(path).map_err(|err| {
            error!("Failed to load exceptions file {}: {}", path.display(), err);
            Fatal::Config
        }),
        None => Ok(LocalExceptions::empty()),
    }
}

fn log_summary(metrics: &crate::metrics::Metrics) {
    info!(
        "{} VRPs from {} unique entries across {} TALs in {:?}",
        metrics.vrps, metrics.uniqs, metrics.tals.len(), metrics.wall_time,
    );
    if metrics.rsync_fails > 0 || metrics.rrdp_fails > 0 {
        warn!(
            "{} rsync failures, {} RRDP failures during this run",
            metrics.rsync_fails, metrics.rrdp_fails,
        );
    }
}

const MAN_PAGE: &[u8] = b".TH RPKI-CLIENT-RS 1\n\
.SH NAME\n\
rpki-client-rs \\- RPKI relying party validator\n\
.SH SYNOPSIS\n\
.B rpki-client-rs\n\
[update|vrps|man]\n\
.SH DESCRIPTION\n\
Fetches and validates RPKI signed objects starting from a set of trust\n\
anchor locators and produces Validated ROA Payloads.\n";
