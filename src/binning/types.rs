use std::fmt;
use std::path::PathBuf;

use crate::error::FeatureError;
use crate::io::{BinRegistry, FastxRecord};
use crate::kmer::ScaledFeature;
use crate::model::BinId;

/// A read together with the bin it was assigned to and the vector that decided it
#[derive(Debug, Clone)]
pub struct BinnedRead {
    pub read: FastxRecord,
    pub bin_id: BinId,
    pub feature: ScaledFeature,
}

/// Lifecycle of one binning run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    CountingTotal,
    Binning,
    Done,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Init => write!(f, "init"),
            PipelineState::CountingTotal => write!(f, "counting"),
            PipelineState::Binning => write!(f, "binning"),
            PipelineState::Done => write!(f, "done"),
            PipelineState::Failed => write!(f, "failed"),
        }
    }
}

/// Reads that were not written to any bin, by cause
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DroppedReads {
    /// Shorter than k, or no window free of ambiguous bases
    pub degenerate: u64,
    /// Ambiguous base met while ambiguous windows are not skipped
    pub ambiguous: u64,
}

impl DroppedReads {
    pub fn record(&mut self, err: &FeatureError) {
        match err {
            FeatureError::Degenerate { .. } => self.degenerate += 1,
            FeatureError::AmbiguousBase { .. } => self.ambiguous += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.degenerate + self.ambiguous
    }
}

/// Result of binning one input file
#[derive(Debug, Clone)]
pub struct BinningOutcome {
    pub folder: PathBuf,
    /// Previous output folder of the same parameter set, if one was moved aside
    pub renamed_previous: Option<PathBuf>,
    pub registry: BinRegistry,
    pub reads_seen: u64,
    pub dropped: DroppedReads,
}

impl BinningOutcome {
    pub fn reads_binned(&self) -> u64 {
        self.registry.total_reads()
    }
}
