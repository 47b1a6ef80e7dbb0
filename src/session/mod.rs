pub mod lifecycle;
pub mod progress;

pub use lifecycle::{CompletionMetrics, LifecycleError, LifecycleManager, Transition};
pub use progress::{ProgressAggregator, ProgressSink};
