pub(crate) mod loader;
pub(crate) mod predictor;

pub use loader::{load_model, LoadedModel};
pub use predictor::{BinId, BinPredictor};
