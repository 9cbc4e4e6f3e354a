use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use needletail::parse_fastx_file;

use crate::error::{BinError, Result};

/// One parsed read. The header is split at the first whitespace into id and description.
#[derive(Debug, Clone, PartialEq)]
pub struct FastxRecord {
    pub id: String,
    pub description: String,
    pub seq: Vec<u8>,
    pub qual: Option<Vec<u8>>,
}

impl FastxRecord {
    pub fn from_header(header: &[u8], seq: Vec<u8>, qual: Option<Vec<u8>>) -> Self {
        let header = String::from_utf8_lossy(header);
        let (id, description) = match header.split_once(char::is_whitespace) {
            Some((id, rest)) => (id.to_string(), rest.trim_start().to_string()),
            None => (header.to_string(), String::new()),
        };
        FastxRecord {
            id,
            description,
            seq,
            qual,
        }
    }
}

/// Streaming FASTA/FASTQ reader over a single input file
pub struct FastxReader {
    path: PathBuf,
}

impl FastxReader {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FastxReader {
            path: path.as_ref().to_owned(),
        }
    }

    fn is_empty(&self) -> Result<bool> {
        let meta = fs::metadata(&self.path)
            .map_err(|e| BinError::io(&self.path, "reading metadata", e))?;
        Ok(meta.len() == 0)
    }

    fn parse_error(&self, err: impl std::fmt::Display) -> BinError {
        BinError::Parse {
            path: self.path.clone(),
            message: err.to_string(),
        }
    }

    /// Process each record of the file in order; the callback may stop the scan with an error.
    pub fn process_all<F>(&self, mut callback: F) -> Result<usize>
    where
        F: FnMut(FastxRecord) -> Result<()>,
    {
        if self.is_empty()? {
            info!("{} is empty, no reads to process", self.path.display());
            return Ok(0);
        }

        let mut reader = parse_fastx_file(&self.path).map_err(|e| self.parse_error(e))?;
        let mut num_sequences = 0;

        while let Some(record) = reader.next() {
            let record = record.map_err(|e| self.parse_error(e))?;
            let read = FastxRecord::from_header(
                record.id(),
                record.seq().into_owned(),
                record.qual().map(|q| q.to_vec()),
            );
            callback(read)?;
            num_sequences += 1;
        }

        debug!("Processed {} sequences from {}", num_sequences, self.path.display());
        Ok(num_sequences)
    }

    /// Count records without keeping them, for progress reporting.
    pub fn count_records(&self) -> Result<u64> {
        if self.is_empty()? {
            return Ok(0);
        }
        let mut reader = parse_fastx_file(&self.path).map_err(|e| self.parse_error(e))?;
        let mut total = 0u64;
        while let Some(record) = reader.next() {
            record.map_err(|e| self.parse_error(e))?;
            total += 1;
        }
        Ok(total)
    }
}
