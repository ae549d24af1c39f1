//! Prediction and inference
//!
//! Load trained model sets and produce calibrated forecasts.

pub mod inference;

pub use inference::{format_forecast, CalibratedPredictor, ModelSet};
