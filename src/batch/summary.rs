use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;

use crate::classify::{DbType, JobOutcome};
use crate::model::BinId;

/// Checkpoints and counts of one successfully processed input file
#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    /// `<index>-<file name>`
    pub key: String,
    pub input: PathBuf,
    pub db_type: DbType,
    /// Reads parsed from the input, binned or dropped
    pub reads_seen: Option<u64>,
    pub reads_binned: Option<u64>,
    pub reads_dropped: u64,
    pub bin_counts: BTreeMap<BinId, u64>,
    pub bin_folder: Option<PathBuf>,
    /// Earlier output of the same parameter set, moved aside before binning
    pub previous_bin_folder: Option<PathBuf>,
    /// start -> post-binning, absent in full mode
    pub binning_secs: Option<f64>,
    /// post-binning (or start) -> post-classify
    pub classify_secs: f64,
    pub jobs: Vec<JobOutcome>,
}

impl FileSummary {
    pub fn database_bytes(&self) -> u64 {
        self.jobs.iter().map(|j| j.database_bytes).sum()
    }

    pub fn failed_jobs(&self) -> Vec<&str> {
        self.jobs
            .iter()
            .filter(|j| j.is_failed())
            .map(|j| j.job.label.as_str())
            .collect()
    }
}

/// An input file whose processing stopped with an error
#[derive(Debug, Clone, Serialize)]
pub struct FailedFile {
    pub key: String,
    pub input: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub files: Vec<FileSummary>,
    pub failed: Vec<FailedFile>,
}

impl BatchSummary {
    pub fn total_reads_binned(&self) -> u64 {
        self.files.iter().filter_map(|f| f.reads_binned).sum()
    }

    pub fn total_database_bytes(&self) -> u64 {
        self.files.iter().map(FileSummary::database_bytes).sum()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Human-readable lines, one block per file
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for file in &self.files {
            match (file.binning_secs, file.reads_binned) {
                (Some(binning), Some(reads)) => {
                    lines.push(format!(
                        "timings for file {} / binning : {}, for {} reads ({} dropped of {} seen)",
                        file.key,
                        format_hms(binning),
                        reads,
                        file.reads_dropped,
                        file.reads_seen.unwrap_or(reads + file.reads_dropped)
                    ));
                    lines.push(format!(
                        "timings for file {} / classify: {}, {} bins, total size of {:.2} GB",
                        file.key,
                        format_hms(file.classify_secs),
                        file.jobs.len(),
                        file.database_bytes() as f64 / 1e9
                    ));
                }
                _ => lines.push(format!(
                    "timings for file {} / classify: {}",
                    file.key,
                    format_hms(file.classify_secs)
                )),
            }
            let failed = file.failed_jobs();
            if !failed.is_empty() {
                lines.push(format!("failed jobs for file {}: {}", file.key, failed.join(", ")));
            }
        }
        for file in &self.failed {
            lines.push(format!("FAILED file {}: {}", file.key, file.error));
        }
        lines.push(format!(
            "Batch ended, {} files processed, {} failed, {} reads binned, {:.2} GB of databases",
            self.files.len(),
            self.failed.len(),
            self.total_reads_binned(),
            self.total_database_bytes() as f64 / 1e9
        ));
        lines
    }

    pub fn log(&self) {
        for line in self.lines() {
            if line.starts_with("FAILED") || line.starts_with("failed") {
                warn!("{}", line);
            } else {
                info!("{}", line);
            }
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create summary file: {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("Failed to write summary to {}", path.display()))?;
        Ok(())
    }
}

/// Seconds as `h:mm:ss.ss`
pub fn format_hms(secs: f64) -> String {
    let centis = (secs.max(0.0) * 100.0).round() as u64;
    let hours = centis / 360_000;
    let minutes = centis / 6_000 % 60;
    let rest = centis % 6_000;
    format!("{}:{:02}:{:02}.{:02}", hours, minutes, rest / 100, rest % 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_format_hms() {
        assert_eq!(format_hms(0.0), "0:00:00.00");
        assert_eq!(format_hms(65.5), "0:01:05.50");
        assert_eq!(format_hms(3723.0), "1:02:03.00");
        assert_eq!(format_hms(59.996), "0:01:00.00");
        assert_eq!(format_hms(3599.999), "1:00:00.00");
    }

    #[test]
    fn test_binning_line_accounts_for_every_read() {
        let summary = BatchSummary {
            files: vec![FileSummary {
                key: "0-a.fastq".to_string(),
                input: PathBuf::from("a.fastq"),
                db_type: DbType::Bins,
                reads_seen: Some(20),
                reads_binned: Some(18),
                reads_dropped: 2,
                bin_counts: BTreeMap::new(),
                bin_folder: None,
                previous_bin_folder: None,
                binning_secs: Some(59.996),
                classify_secs: 1.0,
                jobs: vec![],
            }],
            failed: vec![],
        };
        let lines = summary.lines();
        assert_eq!(
            lines[0],
            "timings for file 0-a.fastq / binning : 0:01:00.00, for 18 reads (2 dropped of 20 seen)"
        );
    }

    #[test]
    fn test_lines_report_failures() {
        let summary = BatchSummary {
            files: vec![FileSummary {
                key: "0-a.fastq".to_string(),
                input: PathBuf::from("a.fastq"),
                db_type: DbType::Full,
                reads_seen: None,
                reads_binned: None,
                reads_dropped: 0,
                bin_counts: BTreeMap::new(),
                bin_folder: None,
                previous_bin_folder: None,
                binning_secs: None,
                classify_secs: 2.0,
                jobs: vec![],
            }],
            failed: vec![FailedFile {
                key: "1-b.fastq".to_string(),
                input: PathBuf::from("b.fastq"),
                error: "input file not found: b.fastq".to_string(),
            }],
        };
        let lines = summary.lines();
        assert_eq!(lines[0], "timings for file 0-a.fastq / classify: 0:00:02.00");
        assert_eq!(lines[1], "FAILED file 1-b.fastq: input file not found: b.fastq");
        assert!(lines[2].starts_with("Batch ended, 1 files processed, 1 failed"));
        assert!(!summary.is_success());
    }
}
