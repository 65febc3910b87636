pub mod audio;
pub mod config;
pub mod pipeline;
pub mod session;

pub use audio::{
    AudioBackend, AudioBackendFactory, AudioFile, AudioFrame, AudioSource, CaptureConfig,
    ChunkAccumulator, ChunkFormat, EncodedChunk, PlaybackController, VolumeMonitor, VolumeSample,
};
pub use config::Config;
pub use pipeline::{BackendError, HttpBackend, TranslationBackend, TranslationPipeline};
pub use session::{
    SessionConfig, SessionEvent, SessionState, SessionStats, StartupMode, TranscriptEntry,
    TranslationSession,
};
