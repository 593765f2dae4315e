pub mod batch;
pub mod dispatcher;

// Re-export common types
pub use batch::{start_batch, BatchContext, BatchError, BatchMode};
pub use dispatcher::{Dispatcher, DispatcherStats};
