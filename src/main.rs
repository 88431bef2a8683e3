use anyhow::{Context, Result};
use clap::Parser;
use dicomxml::config::MAX_WORKERS;
use dicomxml::models::{BulkDataMode, TaskOutcome};
use dicomxml::report::BatchReport;
use dicomxml::scheduler::BatchScheduler;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "dicomxml")]
#[command(about = "Convert DICOM files into Native DICOM Model XML")]
struct Cli {
    /// DICOM files to convert (.dcm, or .bz2 compressed)
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Number of concurrent workers (clamped to 1..=10)
    #[arg(short = 'c', long, default_value_t = 1)]
    workers: usize,

    /// Root directory for per-file output directories
    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,

    /// Write every value into the XML instead of side files
    #[arg(long)]
    inline: bool,

    /// Write a JSON summary of the batch to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Show a progress bar
    #[arg(long)]
    progress: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn run(cli: Cli) -> Result<()> {
    let bulk_data = if cli.inline {
        BulkDataMode::Inline
    } else {
        BulkDataMode::Uri
    };
    let scheduler = BatchScheduler::new(&cli.output_dir)
        .with_parallelism(cli.workers)
        .with_bulk_data(bulk_data)
        .with_progress(cli.progress);

    info!(
        files = cli.files.len(),
        workers = BatchScheduler::effective_parallelism(cli.workers, cli.files.len()),
        max_workers = MAX_WORKERS,
        "Starting conversion"
    );
    let start = Instant::now();
    let outcomes = scheduler
        .run(&cli.files)
        .with_context(|| format!("Failed to prepare output directory: {:?}", cli.output_dir))?;
    let elapsed = start.elapsed();

    for outcome in &outcomes {
        match outcome {
            TaskOutcome::Success(result) => {
                println!("{} -> {}", result.input.display(), result.xml_file.display());
            }
            TaskOutcome::Failure { input, error } => {
                eprintln!("{}: {}", input.display(), error);
            }
        }
    }

    let report = BatchReport::from_outcomes(&outcomes);
    if let Some(path) = &cli.report {
        report.write_json(path)?;
    }

    println!();
    println!("=== Summary ===");
    println!("Converted:  {}", report.succeeded);
    println!("Failed:     {}", report.failed);
    println!("Total time: {:.2}s", elapsed.as_secs_f64());
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
    }

    match run(cli) {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
