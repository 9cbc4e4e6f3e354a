pub(crate) mod reader;
pub(crate) mod writer;

pub use reader::{FastxReader, FastxRecord};
pub use writer::{BinRegistry, BinWriter};
