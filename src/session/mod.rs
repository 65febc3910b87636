pub mod config;
pub mod session;
pub mod stats;

pub use config::{SessionConfig, StartupMode};
pub use session::{SessionEvent, SessionState, TranslationSession};
pub use stats::{SessionStats, TranscriptEntry};
