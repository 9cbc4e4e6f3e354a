use serde::{Deserialize, Serialize};

use crate::error::{BinError, Result};
use crate::kmer::{kmer_space, Normalization};

/// Integer cluster label; the set of labels is only known once reads are seen.
pub type BinId = u32;

/// A fitted, immutable model mapping a scaled k-mer vector to a bin id.
///
/// Implementations must be deterministic: equal vectors give equal bins.
pub trait BinPredictor: Send + Sync {
    fn predict(&self, features: &[f64]) -> BinId;
}

impl<F> BinPredictor for F
where
    F: Fn(&[f64]) -> BinId + Send + Sync,
{
    fn predict(&self, features: &[f64]) -> BinId {
        self(features)
    }
}

/// Nearest-centroid model, the serialized form of a fitted k-means.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentroidModel {
    pub centroids: Vec<Vec<f64>>,
    /// Bin id of each centroid; centroid index when absent
    #[serde(default)]
    pub labels: Option<Vec<BinId>>,
    #[serde(default)]
    pub normalization: Normalization,
}

impl CentroidModel {
    /// Check the model shape against the k-mer size parsed from its file name
    pub fn validate(&self, k: usize) -> Result<()> {
        if self.centroids.is_empty() {
            return Err(BinError::config("model has no centroids"));
        }
        let expected = kmer_space(k);
        if let Some((i, c)) = self
            .centroids
            .iter()
            .enumerate()
            .find(|(_, c)| c.len() != expected)
        {
            return Err(BinError::config(format!(
                "centroid {} has {} features, expected 4^{} = {}",
                i,
                c.len(),
                k,
                expected
            )));
        }
        if let Some(labels) = &self.labels {
            if labels.len() != self.centroids.len() {
                return Err(BinError::config(format!(
                    "model has {} labels for {} centroids",
                    labels.len(),
                    self.centroids.len()
                )));
            }
        }
        Ok(())
    }

    pub fn n_bins(&self) -> usize {
        self.centroids.len()
    }
}

impl BinPredictor for CentroidModel {
    fn predict(&self, features: &[f64]) -> BinId {
        let mut best = 0usize;
        let mut best_dist = f64::INFINITY;
        for (i, centroid) in self.centroids.iter().enumerate() {
            let dist: f64 = centroid
                .iter()
                .zip(features)
                .map(|(c, x)| (c - x) * (c - x))
                .sum();
            // strict comparison keeps the lowest index on ties
            if dist < best_dist {
                best = i;
                best_dist = dist;
            }
        }
        match &self.labels {
            Some(labels) => labels[best],
            None => best as BinId,
        }
    }
}
