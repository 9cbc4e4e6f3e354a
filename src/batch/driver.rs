use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, error, info, warn};

use super::summary::{BatchSummary, FailedFile, FileSummary};
use crate::binning::{BinningContext, BinningPipeline};
use crate::classify::{Classifier, ClassifierDispatcher, DbType, DispatchConfig, DispatchTarget};
use crate::error::BinError;
use crate::kmer::FeatureExtractor;
use crate::model::{load_model, LoadedModel};

/// Settings of one batch, resolved from the command line
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub report_folder: PathBuf,
    pub database: PathBuf,
    pub classifier: Classifier,
    pub executable: Option<PathBuf>,
    pub db_type: DbType,
    pub cores: usize,
    pub dry_run: bool,
    pub timeout: Option<Duration>,
    pub max_open_bins: usize,
    pub ignore_ambiguous: bool,
    pub count_total: bool,
    pub chunk_size: usize,
    pub show_progress: bool,
}

/// Bins and classifies a list of input files, one after the other.
///
/// Configuration is checked once in [`BatchDriver::new`]; after that a
/// failure on one file is logged and the batch moves to the next file.
pub struct BatchDriver {
    config: BatchConfig,
    param: String,
    model: Option<LoadedModel>,
    dispatcher: ClassifierDispatcher,
}

impl BatchDriver {
    pub fn new(config: BatchConfig) -> Result<Self, BinError> {
        if !config.report_folder.is_dir() {
            return Err(BinError::config(format!(
                "output folder is not a directory: {}",
                config.report_folder.display()
            )));
        }
        if !config.database.is_dir() {
            return Err(BinError::config(format!(
                "database folder not found: {}",
                config.database.display()
            )));
        }

        let param = database_param(&config.database)?;
        info!("Assuming parameters are: {}", param);

        let (model, database_root) = match config.db_type {
            DbType::Bins => {
                let model = load_model(&config.database)?;
                let root = config.classifier.bins_root(&config.database);
                if !root.is_dir() {
                    return Err(BinError::config(format!(
                        "folder of per-bin {} databases not found: {}",
                        config.classifier,
                        root.display()
                    )));
                }
                (Some(model), root)
            }
            DbType::Full => (None, config.database.clone()),
        };

        let dispatcher = ClassifierDispatcher::new(DispatchConfig {
            classifier: config.classifier,
            executable: config.executable.clone(),
            database_root,
            report_folder: config.report_folder.clone(),
            param: param.clone(),
            cores: config.cores,
            dry_run: config.dry_run,
            timeout: config.timeout,
        });

        Ok(BatchDriver {
            config,
            param,
            model,
            dispatcher,
        })
    }

    /// Process every file; never stops early on a failing file.
    pub fn run(&self, inputs: &[PathBuf]) -> BatchSummary {
        info!("let's classify reads! {} input files", inputs.len());
        let mut summary = BatchSummary::default();

        for (i, input) in inputs.iter().enumerate() {
            let key = file_key(i, input);
            info!("Opening fastq file ({}/{}) {}", i + 1, inputs.len(), input.display());

            match self.process_file(&key, input) {
                Ok(file) => summary.files.push(file),
                Err(e) => {
                    error!("{:#}", e);
                    warn!("processing failed for file: {}", input.display());
                    summary.failed.push(FailedFile {
                        key,
                        input: input.clone(),
                        error: format!("{:#}", e),
                    });
                }
            }
        }
        summary
    }

    fn process_file(&self, key: &str, input: &Path) -> Result<FileSummary> {
        let start = Instant::now();
        if !input.is_file() {
            return Err(BinError::InputNotFound(input.to_path_buf()).into());
        }

        let mut summary = FileSummary {
            key: key.to_string(),
            input: input.to_path_buf(),
            db_type: self.config.db_type,
            reads_seen: None,
            reads_binned: None,
            reads_dropped: 0,
            bin_counts: Default::default(),
            bin_folder: None,
            previous_bin_folder: None,
            binning_secs: None,
            classify_secs: 0.0,
            jobs: Vec::new(),
        };

        let binned = match &self.model {
            Some(loaded) => {
                let extractor = FeatureExtractor::new(
                    loaded.k,
                    self.config.ignore_ambiguous,
                    loaded.model.normalization,
                );
                let mut pipeline = BinningPipeline::new(BinningContext {
                    input: input.to_path_buf(),
                    param: self.param.clone(),
                    extractor,
                    predictor: &loaded.model,
                    max_open: self.config.max_open_bins,
                    chunk_size: self.config.chunk_size,
                    count_total: self.config.count_total,
                    show_progress: self.config.show_progress,
                });
                let result = pipeline.run();
                debug!("binning of {} ended in state {}", input.display(), pipeline.state());
                let outcome = result.with_context(|| format!("Failed to bin reads of {}", input.display()))?;
                summary.reads_seen = Some(outcome.reads_seen);
                summary.reads_binned = Some(outcome.reads_binned());
                summary.reads_dropped = outcome.dropped.total();
                summary.bin_counts = outcome.registry.counts().clone();
                summary.bin_folder = Some(outcome.folder.clone());
                summary.previous_bin_folder = outcome.renamed_previous.clone();
                summary.binning_secs = Some(start.elapsed().as_secs_f64());
                Some(outcome)
            }
            None => None,
        };

        let classify_start = Instant::now();
        let target = match &binned {
            Some(outcome) => DispatchTarget::Bins(&outcome.registry),
            None => DispatchTarget::Full,
        };
        summary.jobs = self
            .dispatcher
            .classify(input, target)
            .with_context(|| format!("Failed to classify reads of {}", input.display()))?;
        summary.classify_secs = classify_start.elapsed().as_secs_f64();

        Ok(summary)
    }
}

/// Name of the database folder, used as the parameter-set name
fn database_param(database: &Path) -> Result<String, BinError> {
    database
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| BinError::config(format!("cannot name parameter set from {}", database.display())))
}

fn file_key(index: usize, input: &Path) -> String {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}-{}", index, name)
}
