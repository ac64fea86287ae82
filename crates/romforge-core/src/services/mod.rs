//! Long-running operations with progress reporting and cancellation

pub mod cancel;
pub mod create;
pub mod progress;
pub mod rebuild;
pub mod scan;

pub use cancel::CancellationToken;
pub use create::{CreateOptions, CreateResults, DatabaseCreator};
pub use progress::{CreateEvent, OperationStatus, Progress, ProgressSink, RebuildEvent, ScanEvent};
pub use rebuild::{RebuildEngine, RebuildOptions, RebuildResults};
pub use scan::{ScanEngine, ScanOptions, ScanResults};
