//! Execution of filter updates and streamed runs.
//!
//! - [`executor`]: multithreaded generation over one region
//! - [`splitter`]: decomposition of a region into streamed pieces
//! - [`streaming`]: the whole-image streaming driver and its sinks
//! - [`progress`]: progress events and cancellation

pub mod executor;
pub mod progress;
pub mod splitter;
pub mod streaming;

pub use executor::{partition, ThreadedExecutor};
pub use progress::{ProgressCallback, ProgressTracker, ProgressUpdate};
pub use splitter::{StreamingMode, StreamingSplitter};
pub use streaming::{stream, MemorySink, RegionSink, StreamingOptions, StreamingReport};
