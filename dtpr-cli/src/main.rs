//! dtpr CLI
//!
//! Inspects, dumps and analyzes drift-tube ntuple partitions through a YAML
//! run configuration.
#![allow(clippy::uninlined_format_args)]

use clap::{Args, Parser, Subcommand, ValueEnum};

use dtpr_algorithms::{classify, Class, ConfusionConfig, ConfusionMatrix, LocationMode};
use dtpr_core::{Event, Value, DEFAULT_CHUNK_SIZE};
use dtpr_io::{load_run_config, EventWriter, NTuple, DEFAULT_EXTENSION};
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("{0}")]
    DtprIo(#[from] dtpr_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] dtpr_core::Error),

    #[error("invalid argument: {0}")]
    Argument(String),
}

/// Chambers classified by `showers`.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Shower chambers plus chambers crossed by matched muons
    Traversed,
    /// Only chambers holding a found or a true shower
    Showers,
    /// Every chamber with raw hits
    Hits,
}

impl From<Mode> for LocationMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Traversed => LocationMode::Traversed,
            Mode::Showers => LocationMode::Showers,
            Mode::Hits => LocationMode::Hits,
        }
    }
}

/// Drift-tube ntuple analysis.
#[derive(Parser)]
#[command(name = "dtpr")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Where events come from.
#[derive(Args)]
struct Input {
    /// Input partition file(s) or directories
    #[arg(short, long, required = true)]
    inpath: Vec<PathBuf>,

    /// Run configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Maximum number of partition files
    #[arg(long)]
    maxfiles: Option<usize>,

    /// Maximum number of events
    #[arg(long)]
    maxevents: Option<usize>,

    /// Partition file extension
    #[arg(long, default_value = DEFAULT_EXTENSION)]
    extension: String,
}

impl Input {
    fn open(&self) -> Result<NTuple> {
        let config = load_run_config(&self.config)?;
        let mut builder = NTuple::builder(config)
            .extension(self.extension.clone())
            .max_files(self.maxfiles)
            .max_events(self.maxevents);
        for path in &self.inpath {
            builder = builder.input(path);
        }
        Ok(builder.build()?)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print one event or a slice of events
    Inspect {
        #[command(flatten)]
        input: Input,

        /// Event index, or a slice `start:stop:step`
        #[arg(short, long, default_value = "0", allow_hyphen_values = true)]
        event: String,

        /// Look the event up by event number instead of index
        #[arg(long, conflicts_with = "event")]
        number: Option<i64>,

        /// Particle types to list in full
        #[arg(short, long)]
        particles: Vec<String>,

        /// Attribute constraints `key=value` on the listed particles
        #[arg(short, long)]
        filter: Vec<String>,
    },

    /// Write accepted events as JSON lines
    Dump {
        #[command(flatten)]
        input: Input,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Per-wheel shower confusion matrix over all events
    Showers {
        #[command(flatten)]
        input: Input,

        /// Locations to classify
        #[arg(long, value_enum, default_value = "traversed")]
        mode: Mode,

        /// Restrict to one station
        #[arg(long)]
        station: Option<i64>,

        /// Found shower collection
        #[arg(long, default_value = "fwshowers")]
        found: String,

        /// True shower collection
        #[arg(long, default_value = "realshowers")]
        truth: String,

        /// Events per parallel work unit
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect {
            input,
            event,
            number,
            particles,
            filter,
        } => {
            let ntuple = input.open()?;
            let constraints = filter
                .iter()
                .map(String::as_str)
                .map(parse_constraint)
                .collect::<Result<Vec<_>>>()?;
            let events = ntuple.events();

            if let Some(number) = number {
                match events.find_by_number(number)? {
                    Some(ev) => print_event(&ev, &particles, &constraints)?,
                    None => println!("Event {} not found or rejected", number),
                }
                return Ok(());
            }

            let selected: Vec<Option<Event>> = match parse_slice(&event)? {
                Selection::Index(index) => vec![events.get(index)?],
                Selection::Slice(start, stop, step) => events
                    .slice(start, stop, step)?
                    .collect::<dtpr_core::Result<_>>()?,
            };
            for ev in selected {
                match ev {
                    Some(ev) => print_event(&ev, &particles, &constraints)?,
                    None => println!("Event does not pass the selection"),
                }
            }
        }

        Commands::Dump { input, output } => {
            let start = Instant::now();
            let ntuple = input.open()?;
            let mut writer = EventWriter::create(&output)?;
            let mut rejected = 0usize;
            for ev in ntuple.events() {
                match ev? {
                    Some(ev) => writer.write_event(&ev)?,
                    None => rejected += 1,
                }
            }
            writer.flush()?;

            println!(
                "Wrote {} events to {} in {:.2}s",
                writer.written(),
                output.display(),
                start.elapsed().as_secs_f64()
            );
            println!("Rejected: {}", rejected);
        }

        Commands::Showers {
            input,
            mode,
            station,
            found,
            truth,
            chunk_size,
        } => {
            let start = Instant::now();
            let ntuple = input.open()?;
            let config = ConfusionConfig {
                found,
                truth,
                mode: mode.into(),
                station,
                ..ConfusionConfig::default()
            };

            let (matrix, errors) = ntuple.par_fold(
                chunk_size,
                || (ConfusionMatrix::new(), Vec::new()),
                |(mut matrix, mut errors), ev| {
                    if let Some(ev) = ev {
                        match classify(&ev, &config) {
                            Ok(classified) => matrix.extend(&classified),
                            Err(e) => errors.push(format!("event {}: {}", ev.number, e)),
                        }
                    }
                    (matrix, errors)
                },
                |(a, mut ea), (b, eb)| {
                    ea.extend(eb);
                    (a.merge(b), ea)
                },
            )?;
            if let Some(first) = errors.first() {
                return Err(CliError::Argument(format!(
                    "{} events could not be classified; first: {}",
                    errors.len(),
                    first
                )));
            }

            println!("{}", matrix);
            for wheel in matrix.wheels() {
                if let Some(eff) = matrix.efficiency(wheel) {
                    println!("Wheel {:>2}: efficiency {:.3}", wheel, eff);
                }
            }
            println!(
                "Total: TP {} FP {} TN {} FN {}",
                matrix.total(Class::TruePositive),
                matrix.total(Class::FalsePositive),
                matrix.total(Class::TrueNegative),
                matrix.total(Class::FalseNegative)
            );
            println!(
                "Processed {} events in {:.2}s",
                ntuple.len(),
                start.elapsed().as_secs_f64()
            );
        }
    }

    Ok(())
}

fn print_event(ev: &Event, types: &[String], constraints: &[(String, Value)]) -> Result<()> {
    print!("{}", ev);
    let constraints: Vec<(&str, Value)> = constraints
        .iter()
        .map(|(k, v)| (k.as_str(), v.clone()))
        .collect();
    for name in types {
        let particles = ev.filter_particles(name, &constraints)?;
        println!("  {} ({} selected)", name, particles.len());
        for p in particles {
            println!("    {}", p);
        }
    }
    Ok(())
}

enum Selection {
    Index(isize),
    Slice(Option<isize>, Option<isize>, Option<isize>),
}

fn parse_slice(text: &str) -> Result<Selection> {
    let bound = |part: &str| -> Result<Option<isize>> {
        let part = part.trim();
        if part.is_empty() {
            return Ok(None);
        }
        part.parse()
            .map(Some)
            .map_err(|_| CliError::Argument(format!("invalid event selection '{}'", text)))
    };
    let parts: Vec<&str> = text.split(':').collect();
    match parts.as_slice() {
        [index] => bound(index)?
            .map(Selection::Index)
            .ok_or_else(|| CliError::Argument("empty event selection".into())),
        [start, stop] => Ok(Selection::Slice(bound(start)?, bound(stop)?, None)),
        [start, stop, step] => Ok(Selection::Slice(bound(start)?, bound(stop)?, bound(step)?)),
        _ => Err(CliError::Argument(format!(
            "invalid event selection '{}'",
            text
        ))),
    }
}

fn parse_constraint(text: &str) -> Result<(String, Value)> {
    let (key, raw) = text
        .split_once('=')
        .ok_or_else(|| CliError::Argument(format!("expected key=value, got '{}'", text)))?;
    let value = if let Ok(v) = raw.parse::<i64>() {
        Value::from(v)
    } else if let Ok(v) = raw.parse::<f64>() {
        Value::from(v)
    } else {
        match raw {
            "true" | "True" => Value::from(true),
            "false" | "False" => Value::from(false),
            s => Value::from(s),
        }
    };
    Ok((key.trim().to_string(), value))
}
