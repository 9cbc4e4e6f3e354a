use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

use crate::error::BinError;
use crate::model::BinId;

/// Which reference database layout to classify against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    /// One complete database, no binning
    Full,
    /// One sub-database per bin, reads binned first
    Bins,
}

impl DbType {
    pub fn label(&self) -> &'static str {
        match self {
            DbType::Full => "full",
            DbType::Bins => "bins",
        }
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for DbType {
    type Err = BinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(DbType::Full),
            "bins" => Ok(DbType::Bins),
            other => Err(BinError::config(format!(
                "database type is either full or bins, got '{}'",
                other
            ))),
        }
    }
}

/// Supported external classifiers, each with a fixed invocation contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classifier {
    Kraken2,
}

impl Classifier {
    pub fn name(&self) -> &'static str {
        match self {
            Classifier::Kraken2 => "kraken2",
        }
    }

    /// Default executable looked up on PATH
    pub fn program(&self) -> &'static str {
        match self {
            Classifier::Kraken2 => "kraken2",
        }
    }

    /// Database file whose size is reported for each job
    pub fn database_file(&self) -> &'static str {
        match self {
            Classifier::Kraken2 => "hash.k2d",
        }
    }

    /// Folder holding the per-bin sub-databases inside a binned database
    pub fn bins_root(&self, database: &Path) -> PathBuf {
        database.join(format!("{}_hash", self.name()))
    }

    /// Arguments for one run: cores, database, input, per-read calls, report
    pub fn args(&self, cores: usize, job: &ClassifierJob) -> Vec<OsString> {
        match self {
            Classifier::Kraken2 => vec![
                "--threads".into(),
                cores.to_string().into(),
                "--db".into(),
                job.database.clone().into_os_string(),
                job.input.clone().into_os_string(),
                "--output".into(),
                job.calls_path.clone().into_os_string(),
                "--report".into(),
                job.report_path.clone().into_os_string(),
            ],
        }
    }
}

impl fmt::Display for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One classifier invocation: input reads against one database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifierJob {
    /// `bin-<id>` or `full`
    pub label: String,
    pub bin_id: Option<BinId>,
    pub input: PathBuf,
    pub database: PathBuf,
    /// Per-read classification calls
    pub calls_path: PathBuf,
    /// Hierarchical summary report
    pub report_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    DryRun,
    Failed(String),
}

/// What happened to a job, with what is needed for the batch summary
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub job: ClassifierJob,
    pub command: String,
    pub status: JobStatus,
    /// Size of the database file the job loads, 0 when absent
    pub database_bytes: u64,
    pub elapsed_secs: f64,
}

impl JobOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, JobStatus::Failed(_))
    }
}
