use crate::error::FeatureError;

use super::types::{encode_base, kmer_space, KmerCounts, Normalization, ScaledFeature};

/// Turns a nucleotide sequence into a fixed-length scaled k-mer vector.
///
/// Holds only immutable parameters, so one instance can be shared across
/// rayon workers.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    k: usize,
    ignore_ambiguous: bool,
    normalization: Normalization,
}

impl FeatureExtractor {
    /// Create an extractor for k-mers of size `k` (1..=MAX_K, checked by the caller)
    pub fn new(k: usize, ignore_ambiguous: bool, normalization: Normalization) -> Self {
        FeatureExtractor {
            k,
            ignore_ambiguous,
            normalization,
        }
    }

    /// Length of every vector this extractor produces
    pub fn dimension(&self) -> usize {
        kmer_space(self.k)
    }

    /// Count k-mers with a stride-1 window, skipping windows with non-ACGT bases
    /// when ambiguous bases are ignored.
    pub fn count(&self, sequence: &[u8]) -> Result<KmerCounts, FeatureError> {
        let k = self.k;
        let mask = kmer_space(k) - 1;
        let mut counts = vec![0u32; kmer_space(k)];
        let mut valid_windows = 0usize;

        // Rolling 2-bit code and number of canonical bases since the last ambiguous one
        let mut code = 0usize;
        let mut run = 0usize;

        for (position, &base) in sequence.iter().enumerate() {
            match encode_base(base) {
                Some(bits) => {
                    code = ((code << 2) | bits) & mask;
                    run += 1;
                    if run >= k {
                        counts[code] += 1;
                        valid_windows += 1;
                    }
                }
                None if self.ignore_ambiguous => {
                    code = 0;
                    run = 0;
                }
                None => {
                    return Err(FeatureError::AmbiguousBase {
                        base: base as char,
                        position,
                    })
                }
            }
        }

        Ok(KmerCounts {
            k,
            counts,
            valid_windows,
        })
    }

    /// Count and normalize; reads without a single valid window are degenerate.
    pub fn extract(&self, sequence: &[u8]) -> Result<ScaledFeature, FeatureError> {
        let counts = self.count(sequence)?;
        if counts.valid_windows == 0 {
            return Err(FeatureError::Degenerate {
                k: self.k,
                len: sequence.len(),
            });
        }

        let windows = counts.valid_windows as f64;
        let factor = match self.normalization {
            Normalization::PerWindow => 1.0 / windows,
            Normalization::PerWindowAndK => kmer_space(self.k) as f64 / windows,
        };

        Ok(ScaledFeature {
            values: counts.counts.iter().map(|&c| c as f64 * factor).collect(),
            valid_windows: counts.valid_windows,
        })
    }
}
