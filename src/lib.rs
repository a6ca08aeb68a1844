//! Pronunciation assessment of a learner recording against a reference.
//!
//! A wav2vec2 CTC model turns each waveform into a phoneme posteriorgram and
//! spans; PER, PPG, GOP, WER and prosodic similarities compare the two
//! recordings; a small trained regressor fuses PER, PPG and Energy into a
//! 1-5 star rating.

pub mod acoustic;
pub mod alignment;
pub mod audio;
pub mod config;
pub mod ctc;
pub mod error;
pub mod metrics;
mod model;
pub mod pipeline;
pub mod prosody;
pub mod rating;
pub mod types;

pub use acoustic::{CtcTranscriber, ModelRegistry, PhonemeVocab, PosteriorExtractor};
pub use audio::load_waveform;
pub use config::{
    AcousticModelConfig, AudioConfig, MetricsConfig, PpgDistance, PredictorConfig,
    RatingModelKind, RuntimeKind, ScorerConfig,
};
pub use error::ScoringError;
pub use pipeline::builder::PronunciationScorerBuilder;
pub use pipeline::scorer::{Capabilities, DecodedRecording, PronunciationScorer};
pub use pipeline::traits::{AcousticBackend, ProsodyExtractor, Transcriber};
pub use prosody::AutocorrelationPitchTracker;
pub use rating::{ModelInfo, RatingFeatures, RatingPredictor, StandardScaler};
pub use types::{
    Confidence, GopEntry, Metric, PhonemeSpan, Posteriorgram, ProsodyTrack, RatingPrediction,
    ScoreSheet, Waveform,
};
