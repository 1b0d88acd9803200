use chrono::{DateTime, Utc};

use crate::cancel::CancelToken;
use crate::model::TimeQuantum;

/// Per-query execution options.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Default timestamp for `SetBit()` calls that carry none.
    pub timestamp: Option<DateTime<Utc>>,
    /// Time views written alongside the standard view by timestamped bits.
    pub quantum: TimeQuantum,
    /// The query is a sub-execution delegated by another node.
    pub remote: bool,
    pub cancel: CancelToken,
}

impl ExecOptions {
    /// Options for a sub-execution on behalf of another node.
    pub fn remote() -> Self {
        Self { remote: true, ..Self::default() }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>, quantum: TimeQuantum) -> Self {
        self.timestamp = Some(timestamp);
        self.quantum = quantum;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}
