use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::SessionState;

/// Statistics about a translation session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub state: SessionState,

    /// When the session started translating
    pub started_at: Option<DateTime<Utc>>,

    /// Total duration in seconds since start
    pub duration_secs: f64,

    /// Chunks admitted to the processing queue
    pub chunks_submitted: usize,

    /// Chunks that made it through the remote pipeline
    pub chunks_processed: usize,

    /// Chunks dropped because the queue was full
    pub chunks_dropped: usize,

    /// Transcript entries accumulated so far
    pub transcript_entries: usize,
}

/// One original/translated pair produced from a single non-silent chunk.
/// Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub original: String,
    pub translated: String,

    /// When this entry was produced
    pub timestamp: DateTime<Utc>,
}
