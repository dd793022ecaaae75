//! Job execution plumbing shared by both orchestrators: keyed locks, retries,
//! progress reporting and the job archive.

pub mod locks;
pub mod progress;
pub mod registry;
pub mod retry;

pub use locks::KeyedLocks;
pub use progress::{ProgressCallback, ProgressTicker, ProgressTracker};
pub use registry::JobRegistry;
pub use retry::RetryExecutor;
