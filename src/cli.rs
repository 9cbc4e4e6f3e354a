use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Bin reads by k-mer composition, then classify each bin against its own sub-database"
)]
pub struct Cli {
    /// Folder for output reports
    pub output_folder: PathBuf,

    /// Database folder: the complete classifier database (full), or a folder named after the
    /// parameter set holding "model_<name>_<k>mer_<...>.json" and "<classifier>_hash/<bin id>/" (bins)
    pub database: PathBuf,

    /// Metagenomics classifier to use
    #[arg(short, long, value_enum, default_value = "kraken2")]
    pub classifier: ClassifierArg,

    /// Use the standard full database or the binned one
    #[arg(short = 't', long, value_enum, default_value = "bins")]
    pub db_type: DbTypeArg,

    /// Input files in FASTQ/FASTA format, space separated
    #[arg(short, long, required = true, num_args = 1..)]
    pub input_fastq: Vec<PathBuf>,

    /// Cores handed to the classifier (defaults to all available)
    #[arg(long)]
    pub cores: Option<usize>,

    /// Classifier executable, if not the default one on PATH
    #[arg(long)]
    pub classifier_bin: Option<PathBuf>,

    /// Log the classifier commands without running them
    #[arg(long)]
    pub dry_run: bool,

    /// Seconds after which a classifier job is killed and marked failed
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Bin files kept open at once (0 opens and closes the file for every read)
    #[arg(long, default_value = "0")]
    pub max_open_bins: usize,

    /// Fail reads with non-ACGT bases instead of skipping the affected k-mer windows
    #[arg(long)]
    pub keep_ambiguous: bool,

    /// Skip the counting pass used for the progress bar
    #[arg(long)]
    pub skip_count: bool,

    /// Reads whose features are computed together in parallel
    #[arg(long, default_value = "1024")]
    pub chunk_size: usize,

    /// Write the batch summary as JSON
    #[arg(long)]
    pub summary_json: Option<PathBuf>,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Number of threads for feature extraction
    #[arg(long)]
    pub threads: Option<usize>,

    /// Path to log file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum ClassifierArg {
    Kraken2,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum DbTypeArg {
    Full,
    Bins,
}

impl From<ClassifierArg> for crate::classify::Classifier {
    fn from(arg: ClassifierArg) -> Self {
        match arg {
            ClassifierArg::Kraken2 => Self::Kraken2,
        }
    }
}

impl From<DbTypeArg> for crate::classify::DbType {
    fn from(arg: DbTypeArg) -> Self {
        match arg {
            DbTypeArg::Full => Self::Full,
            DbTypeArg::Bins => Self::Bins,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_arguments() {
        let cli = Cli::try_parse_from([
            "readbin", "reports", "db/miniKM_4mer_s10000", "-t", "full", "-i", "a.fastq", "b.fastq", "--dry-run",
        ])
        .unwrap();
        assert_eq!(cli.db_type, DbTypeArg::Full);
        assert_eq!(cli.classifier, ClassifierArg::Kraken2);
        assert_eq!(cli.input_fastq.len(), 2);
        assert!(cli.dry_run);
        assert_eq!(cli.max_open_bins, 0);
    }

    #[test]
    fn test_unknown_db_type_rejected() {
        let res = Cli::try_parse_from(["readbin", "reports", "db", "-t", "binned", "-i", "a.fastq"]);
        assert!(res.is_err());
    }

    #[test]
    fn test_enum_conversion() {
        assert!(matches!(
            DbTypeArg::Bins.into(),
            crate::classify::DbType::Bins
        ));
        assert!(matches!(
            ClassifierArg::Kraken2.into(),
            crate::classify::Classifier::Kraken2
        ));
    }
}
