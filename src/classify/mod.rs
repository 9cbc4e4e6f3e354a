pub(crate) mod dispatcher;
pub(crate) mod types;

pub use dispatcher::{ClassifierDispatcher, DispatchConfig, DispatchTarget};
pub use types::{Classifier, DbType, JobOutcome};
