pub(crate) mod counter;
pub(crate) mod types;

pub use counter::FeatureExtractor;
pub use types::{kmer_space, Normalization, ScaledFeature, MAX_K};
