pub mod processor;
pub mod remote;

pub use processor::{ChunkOutcome, PipelineError, TranslationPipeline};
pub use remote::{BackendError, HttpBackend, TranscriptData, TranslationBackend};
