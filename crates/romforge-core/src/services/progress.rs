use crate::services::create::CreateResults;
use crate::services::rebuild::RebuildResults;
use crate::services::scan::ScanResults;
use serde::Serialize;

/// Phase of a long-running operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Hashing,
    Scanning,
    Rebuilding,
    Creating,
    Completed,
    Canceled,
}

impl OperationStatus {
    /// Completed and Canceled end an operation; nothing is emitted after them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }
}

/// One progress report.
///
/// `results` holds only what this step produced; consumers accumulate.
#[derive(Debug, Clone, Serialize)]
pub struct Progress<R> {
    pub status: OperationStatus,
    pub percent: f64,
    pub current: Option<String>,
    pub results: R,
}

impl<R: Default> Progress<R> {
    pub fn status(status: OperationStatus, percent: f64, current: Option<String>) -> Self {
        Self {
            status,
            percent,
            current,
            results: R::default(),
        }
    }

    pub fn with_results(status: OperationStatus, percent: f64, results: R) -> Self {
        Self {
            status,
            percent,
            current: None,
            results,
        }
    }

    /// The terminal sentinel: 100% and an empty slice.
    pub fn completed() -> Self {
        Self::status(OperationStatus::Completed, 100.0, None)
    }

    pub fn canceled(percent: f64) -> Self {
        Self::status(OperationStatus::Canceled, percent, None)
    }
}

/// Events emitted while scanning a collection
pub type ScanEvent = Progress<ScanResults>;

/// Events emitted while rebuilding into a target folder
pub type RebuildEvent = Progress<RebuildResults>;

/// Events emitted while creating a database from a folder
pub type CreateEvent = Progress<CreateResults>;

/// Percentage of `done` out of `total`, 100 for an empty job.
pub fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        done as f64 * 100.0 / total as f64
    }
}

pub trait ProgressSink<E>: Send + Sync + 'static {
    fn emit(&self, event: E);
}

impl<E> ProgressSink<E> for ()
where
    E: Send,
{
    fn emit(&self, _event: E) {}
}

impl<E, F> ProgressSink<E> for F
where
    E: Send,
    F: Fn(E) + Send + Sync + 'static,
{
    fn emit(&self, event: E) {
        (self)(event);
    }
}
