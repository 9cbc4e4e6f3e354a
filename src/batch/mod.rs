pub(crate) mod driver;
pub(crate) mod summary;

pub use driver::{BatchConfig, BatchDriver};
