//! Acoustic posterior extraction: backends, the device-keyed model registry
//! and the phoneme vocabulary.

mod backend;
mod extractor;
mod registry;
mod transcriber;
mod vocab;

#[cfg(feature = "onnx")]
pub use backend::OnnxAcousticBackend;
pub use backend::CandleAcousticBackend;
pub use extractor::PosteriorExtractor;
pub use registry::ModelRegistry;
pub use transcriber::CtcTranscriber;
pub use vocab::PhonemeVocab;

#[cfg(test)]
pub(crate) use extractor::tests::{sign_vocab, SignBackend};
