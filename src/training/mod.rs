//! Model training
//!
//! Walk-forward validation, out-of-fold calibration and the final per-target
//! fits that become persisted artifacts.

pub mod artifact;
pub mod calibration;
pub mod folds;
pub mod metrics;
pub mod residuals;
pub mod trainer;

use serde::{Deserialize, Serialize};

use crate::model::ModelParams;
use crate::{ForecastError, Result};

pub use artifact::ModelArtifact;
pub use calibration::{CalibrationMap, CalibrationMethod};
pub use folds::{Fold, SplitBoundary, ValidationPolicy, WindowPolicy};
pub use metrics::Metrics;
pub use residuals::ResidualSummary;
pub use trainer::{OutOfFoldCollector, TrainingOutcome, TrainingReport, WalkForwardTrainer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Folds (and the final fit) need at least this many training games
    pub min_train_games: usize,
    /// Seasons that must precede the first evaluation season
    pub min_history_seasons: usize,
    /// Train each fold on only this many prior seasons; unset = all of them
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trailing_seasons: Option<usize>,
    /// Central coverage of margin/total intervals
    pub interval_confidence: f64,
    pub calibration: CalibrationMethod,
    /// Fit folds on the rayon pool
    pub parallel: bool,
    pub model: ModelParams,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            min_train_games: 50,
            min_history_seasons: 1,
            trailing_seasons: None,
            interval_confidence: 0.8,
            calibration: CalibrationMethod::Isotonic,
            parallel: true,
            model: ModelParams::default(),
        }
    }
}

impl TrainingConfig {
    pub fn validation_policy(&self) -> ValidationPolicy {
        ValidationPolicy::WalkForward {
            window: match self.trailing_seasons {
                Some(n) => WindowPolicy::Trailing(n),
                None => WindowPolicy::Expanding,
            },
            min_history_seasons: self.min_history_seasons,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.interval_confidence > 0.0 && self.interval_confidence < 1.0) {
            return Err(ForecastError::Config(format!(
                "training.interval_confidence must be in (0, 1), got {}",
                self.interval_confidence
            )));
        }
        if self.trailing_seasons == Some(0) {
            return Err(ForecastError::Config(
                "training.trailing_seasons must be at least 1".to_string(),
            ));
        }
        if self.model.ridge_alpha < 0.0 || self.model.logistic_l2 < 0.0 {
            return Err(ForecastError::Config(
                "regularization strengths must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}
