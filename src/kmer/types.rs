use serde::{Deserialize, Serialize};

/// Largest supported k-mer size; 4^12 features per read is already 16M floats.
pub const MAX_K: usize = 12;

/// Number of distinct k-mers over {A,C,G,T}.
pub fn kmer_space(k: usize) -> usize {
    1usize << (2 * k)
}

/// 2-bit code of a canonical base, lower case accepted.
#[inline]
pub fn encode_base(base: u8) -> Option<usize> {
    match base {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' => Some(3),
        _ => None,
    }
}

/// How raw k-mer counts are scaled before prediction.
///
/// Must match the basis the loaded model was trained on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// count / valid_windows
    PerWindow,
    /// count * 4^k / valid_windows
    #[default]
    PerWindowAndK,
}

/// Raw k-mer counts of one sequence, indexed by 2-bit encoded k-mer.
#[derive(Debug, Clone, PartialEq)]
pub struct KmerCounts {
    pub k: usize,
    pub counts: Vec<u32>,
    pub valid_windows: usize,
}

impl KmerCounts {
    #[cfg(test)]
    pub fn get(&self, kmer: &str) -> Option<u32> {
        let mut index = 0usize;
        if kmer.len() != self.k {
            return None;
        }
        for &b in kmer.as_bytes() {
            index = (index << 2) | encode_base(b)?;
        }
        self.counts.get(index).copied()
    }
}

/// Length-normalized k-mer vector of one read.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaledFeature {
    pub values: Vec<f64>,
    pub valid_windows: usize,
}

impl ScaledFeature {
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}
