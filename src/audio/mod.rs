pub mod backend;
pub mod capture;
pub mod chunk;
pub mod file;
pub mod playback;
pub mod volume;

pub use backend::{AudioBackend, AudioBackendFactory, AudioFrame, AudioSource, CaptureConfig};
pub use capture::MicrophoneBackend;
pub use chunk::{ChunkAccumulator, ChunkFormat, EncodedChunk};
pub use file::{AudioFile, FileBackend};
pub use playback::{AudioSink, NullSink, PlaybackController, RodioSink};
pub use volume::{Analyser, VolumeMonitor, VolumeSample, SPEAKING_THRESHOLD};
