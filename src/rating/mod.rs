//! Learned 1-5 star rating from the PER, PPG and Energy similarities.

mod model;
mod predictor;
mod scaler;

pub use predictor::{
    ModelInfo, RatingFeatures, RatingPredictor, MAX_RATING, MIN_RATING, RATING_METRICS,
};
pub use scaler::StandardScaler;

#[cfg(test)]
pub(crate) use predictor::tests::linear_predictor;
