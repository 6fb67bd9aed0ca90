//! GTFS Logbook CLI Application
//!
//! Command-line front-end for the gtfs-logbook library:
//! - `logify`: build a logbook from a directory of raw GTFS-Realtime
//!   snapshot files and write it as CSV or GTFS `stop_times.txt`
//! - `merge`: join logbook CSVs built from adjacent time windows
//!
//! Cleaning (`cut_cancellations` followed by `discard_partial_logs`) is on
//! by default and disabled with `--no-clean`.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use gtfs_logbook::{Logbook, LogbookTimestamps};

/// GTFS Logbook - reconstruct transit trip histories from GTFS-Realtime streams
#[derive(Parser, Debug)]
#[command(name = "gtfs-logbook")]
#[command(about = "Build and merge trip logbooks from GTFS-Realtime snapshots", long_about = None)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a logbook from a directory of raw snapshot files
    Logify {
        /// Directory of GTFS-RT snapshot files, consumed in filename order
        input_dir: PathBuf,

        /// Output file
        output: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
        to: OutputFormat,

        /// Skip cleaning the logbook before writing it to disk
        #[arg(long)]
        no_clean: bool,

        /// Also write the timestamp log (needed later for merging)
        #[arg(long)]
        include_timestamp_log: bool,

        /// Also write the parse-error log
        #[arg(long)]
        include_error_log: bool,

        /// Threshold factor for the cancellation-trimming heuristic
        #[arg(long, default_value_t = gtfs_logbook::DEFAULT_CANCELLATION_THRESHOLD)]
        cancellation_threshold: f64,
    },

    /// Merge logbook CSVs from adjacent time windows into one
    Merge {
        /// Input logbook CSVs in ascending window order, followed by the
        /// output file
        #[arg(required = true, num_args = 2..)]
        files: Vec<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
        to: OutputFormat,

        /// Skip cleaning the merged logbook before writing it to disk
        #[arg(long)]
        no_clean: bool,

        /// Threshold factor for the cancellation-trimming heuristic
        #[arg(long, default_value_t = gtfs_logbook::DEFAULT_CANCELLATION_THRESHOLD)]
        cancellation_threshold: f64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// The stable logbook CSV schema
    Csv,
    /// GTFS stop_times.txt
    Gtfs,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    log::info!(
        "gtfs-logbook CLI v{} (library v{})",
        env!("CARGO_PKG_VERSION"),
        gtfs_logbook::VERSION
    );

    match args.command {
        Command::Logify {
            input_dir,
            output,
            to,
            no_clean,
            include_timestamp_log,
            include_error_log,
            cancellation_threshold,
        } => run_logify(
            &input_dir,
            &output,
            to,
            no_clean,
            include_timestamp_log,
            include_error_log,
            cancellation_threshold,
        ),
        Command::Merge {
            files,
            to,
            no_clean,
            cancellation_threshold,
        } => run_merge(&files, to, no_clean, cancellation_threshold),
    }
}

#[allow(clippy::too_many_arguments)]
fn run_logify(
    input_dir: &Path,
    output: &Path,
    to: OutputFormat,
    no_clean: bool,
    include_timestamp_log: bool,
    include_error_log: bool,
    cancellation_threshold: f64,
) -> Result<()> {
    let snapshots = read_snapshot_dir(input_dir)?;
    log::info!(
        "read {} snapshots from {}",
        snapshots.len(),
        input_dir.display()
    );

    let outcome = gtfs_logbook::logify_bytes(snapshots)
        .with_context(|| format!("building logbook from {}", input_dir.display()))?;
    log::info!(
        "built {} trips ({} parse errors)",
        outcome.logbook.len(),
        outcome.errors.len()
    );
    for error in &outcome.errors {
        log::debug!("elided: {}", error);
    }

    if include_error_log {
        let path = sibling(output, "errors.log");
        let mut file = File::create(&path)
            .with_context(|| format!("creating error log {}", path.display()))?;
        for error in &outcome.errors {
            writeln!(file, "{}", error)?;
        }
        log::info!("wrote error log to {}", path.display());
    }
    if include_timestamp_log {
        let path = sibling(output, "timestamps.csv");
        let writer = BufWriter::new(
            File::create(&path)
                .with_context(|| format!("creating timestamp log {}", path.display()))?,
        );
        gtfs_logbook::io::write_timestamps_csv(&outcome.timestamps, writer)?;
        log::info!("wrote timestamp log to {}", path.display());
    }

    let logbook = if no_clean {
        outcome.logbook
    } else {
        clean(outcome.logbook, &outcome.timestamps, cancellation_threshold)
    };

    write_logbook(&logbook, output, to)
}

fn run_merge(
    files: &[PathBuf],
    to: OutputFormat,
    no_clean: bool,
    cancellation_threshold: f64,
) -> Result<()> {
    let Some((output, inputs)) = files.split_last() else {
        bail!("merge needs at least one input logbook and an output path");
    };

    let mut pairs: Vec<(Logbook, LogbookTimestamps)> = Vec::with_capacity(inputs.len());
    for input in inputs {
        let reader = BufReader::new(
            File::open(input).with_context(|| format!("opening {}", input.display()))?,
        );
        let logbook = gtfs_logbook::from_csv(reader)
            .with_context(|| format!("parsing logbook {}", input.display()))?;

        // Use the sibling timestamp log when the logify run kept it; fall
        // back to the information times recorded in the logbook itself.
        let timestamps_path = sibling(input, "timestamps.csv");
        let timestamps = if timestamps_path.is_file() {
            let reader = BufReader::new(File::open(&timestamps_path)?);
            gtfs_logbook::io::read_timestamps_csv(reader)
                .with_context(|| format!("parsing {}", timestamps_path.display()))?
        } else {
            log::debug!(
                "no timestamp log for {}, deriving from the logbook",
                input.display()
            );
            gtfs_logbook::io::derive_timestamps(&logbook)
        };

        log::info!("loaded {} trips from {}", logbook.len(), input.display());
        pairs.push((logbook, timestamps));
    }

    let (merged, timestamps) =
        gtfs_logbook::merge_logbooks(pairs).context("merging logbooks")?;
    log::info!("merged into {} trips", merged.len());

    let merged = if no_clean {
        merged
    } else {
        clean(merged, &timestamps, cancellation_threshold)
    };

    write_logbook(&merged, output, to)
}

/// The standard cleaning pipeline: trim cancellation stubs, then drop logs
/// that are partial with respect to the observation window.
fn clean(
    logbook: Logbook,
    timestamps: &LogbookTimestamps,
    cancellation_threshold: f64,
) -> Logbook {
    let before = logbook.len();
    let logbook = gtfs_logbook::cut_cancellations(logbook, timestamps, cancellation_threshold);
    let logbook = gtfs_logbook::discard_partial_logs(logbook, timestamps);
    log::info!("cleaning kept {} of {} trips", logbook.len(), before);
    logbook
}

fn write_logbook(logbook: &Logbook, output: &Path, to: OutputFormat) -> Result<()> {
    let writer = BufWriter::new(
        File::create(output).with_context(|| format!("creating {}", output.display()))?,
    );
    match to {
        OutputFormat::Csv => gtfs_logbook::to_csv(logbook, writer)?,
        OutputFormat::Gtfs => gtfs_logbook::to_gtfs_stop_times(logbook, writer)?,
    }
    log::info!("wrote {} trips to {}", logbook.len(), output.display());
    Ok(())
}

/// Read every file in the snapshot directory, in filename order.
fn read_snapshot_dir(input_dir: &Path) -> Result<Vec<Vec<u8>>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(input_dir)
        .with_context(|| format!("reading directory {}", input_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect();
    if paths.is_empty() {
        bail!("no snapshot files found in {}", input_dir.display());
    }
    paths.sort();

    let mut snapshots = Vec::with_capacity(paths.len());
    for path in &paths {
        let bytes =
            fs::read(path).with_context(|| format!("reading snapshot {}", path.display()))?;
        snapshots.push(bytes);
    }
    Ok(snapshots)
}

/// `out.csv` → `out.<suffix>` (e.g. `out.timestamps.csv`), next to the
/// original path.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    path.with_extension(suffix)
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
