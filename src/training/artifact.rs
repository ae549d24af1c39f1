//! Persistable model bundle for one target

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::features::FeatureSpec;
use crate::model::{Target, TargetModel};
use crate::training::calibration::CalibrationMap;
use crate::training::residuals::ResidualSummary;
use crate::{ForecastError, League, Result, SeasonRange};

/// Bumped whenever the serialized layout changes
pub const FORMAT_VERSION: u32 = 1;

pub const CRATE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything needed to serve one target's predictions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub crate_version: String,
    pub league: League,
    pub seasons: SeasonRange,
    pub target: Target,
    pub model: TargetModel,
    /// Win probability only
    pub calibration: Option<CalibrationMap>,
    /// Margin and total only
    pub residuals: Option<ResidualSummary>,
    pub feature_spec: FeatureSpec,
    pub oof_samples: usize,
    pub train_samples: usize,
    pub trained_at: DateTime<Utc>,
}

impl ModelArtifact {
    /// Reject bundles written by another format or crate version, or
    /// whose parts do not agree with each other
    pub fn check_compatible(&self) -> Result<()> {
        if self.format_version != FORMAT_VERSION {
            return Err(ForecastError::IncompatibleArtifact(format!(
                "format version {} (expected {})",
                self.format_version, FORMAT_VERSION
            )));
        }
        if self.crate_version != CRATE_VERSION {
            return Err(ForecastError::IncompatibleArtifact(format!(
                "written by gridiron {} (running {})",
                self.crate_version, CRATE_VERSION
            )));
        }
        if self.model.target() != self.target {
            return Err(ForecastError::IncompatibleArtifact(format!(
                "{} artifact holds a {} model",
                self.target,
                self.model.target()
            )));
        }
        if self.model.input_dim() != self.feature_spec.names.len() {
            return Err(ForecastError::IncompatibleArtifact(format!(
                "model expects {} features, spec lists {}",
                self.model.input_dim(),
                self.feature_spec.names.len()
            )));
        }
        let complete = if self.target.is_probability() {
            self.calibration.is_some()
        } else {
            self.residuals.is_some()
        };
        if !complete {
            return Err(ForecastError::IncompatibleArtifact(format!(
                "{} artifact is missing its calibration data",
                self.target
            )));
        }
        Ok(())
    }

    /// Calibrated prediction for one feature row
    pub fn predict_row(&self, features: &[f64]) -> f64 {
        let raw = self.model.predict_row(features);
        match &self.calibration {
            Some(map) => map.apply(raw),
            None => raw,
        }
    }
}
