mod batch;
mod binning;
mod classify;
mod cli;
mod error;
mod io;
mod kmer;
mod model;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::fs::File;
use std::io::Write;
use std::time::{Duration, Instant};

use crate::batch::{BatchConfig, BatchDriver};
use crate::cli::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging, every line prefixed with the elapsed run time
    let started = Instant::now();
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    });
    builder.format(move |buf, record| {
        let secs = started.elapsed().as_secs();
        writeln!(
            buf,
            "[{:02}:{:02}:{:02}] {} {}: {}",
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60,
            record.level(),
            record.target(),
            record.args()
        )
    });
    if let Some(log_file) = &cli.log_file {
        let file = File::create(log_file)
            .with_context(|| format!("Failed to create log file: {}", log_file.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();

    // Set up parallel processing
    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to initialize thread pool")?;
    }

    info!(
        "called with input files {:?}, output folder {}, classifier {:?}",
        cli.input_fastq,
        cli.output_folder.display(),
        cli.classifier
    );

    let cores = cli
        .cores
        .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
        .unwrap_or(1);

    let config = BatchConfig {
        report_folder: cli.output_folder.clone(),
        database: cli.database.clone(),
        classifier: cli.classifier.into(),
        executable: cli.classifier_bin.clone(),
        db_type: cli.db_type.into(),
        cores,
        dry_run: cli.dry_run,
        timeout: cli.timeout.map(Duration::from_secs),
        max_open_bins: cli.max_open_bins,
        ignore_ambiguous: !cli.keep_ambiguous,
        count_total: !cli.skip_count,
        chunk_size: cli.chunk_size.max(1),
        show_progress: !cli.no_progress && cli.log_file.is_none(),
    };

    let driver = BatchDriver::new(config).context("Invalid configuration")?;
    let summary = driver.run(&cli.input_fastq);
    summary.log();

    if let Some(path) = &cli.summary_json {
        summary.write_json(path)?;
        info!("Summary written to {}", path.display());
    }

    if !summary.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
