use crate::error::ScoringError;
use crate::types::{Posteriorgram, ProsodyTrack, Waveform};

/// Runs the acoustic model on zero-mean/unit-variance audio at the model rate.
pub trait AcousticBackend: Send + Sync {
    fn infer(&self, normalized_audio: &[f32]) -> Result<Posteriorgram, ScoringError>;

    fn device_label(&self) -> String;
}

/// Full-utterance speech-to-text, used for WER only.
pub trait Transcriber: Send + Sync {
    fn transcribe(&self, waveform: &Waveform) -> Result<String, ScoringError>;
}

/// Frame-rate pitch, intensity and voicing analysis.
pub trait ProsodyExtractor: Send + Sync {
    fn extract(&self, waveform: &Waveform) -> Result<ProsodyTrack, ScoringError>;
}
