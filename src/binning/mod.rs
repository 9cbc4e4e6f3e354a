pub(crate) mod pipeline;
pub(crate) mod types;

pub use pipeline::{BinningContext, BinningPipeline};
