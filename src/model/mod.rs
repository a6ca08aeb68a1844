mod wav2vec2;

pub(crate) use wav2vec2::Wav2Vec2Ctc;
