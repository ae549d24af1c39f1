//! Prediction targets and the model trained for each

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use super::{LinearModel, LogisticModel, ModelParams, Regressor};
use crate::{ForecastError, Result};

/// Quantity a model predicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// Home score minus away score
    Margin,
    /// Combined points
    Total,
    /// Probability the home team wins
    WinProbability,
}

impl Target {
    pub const ALL: [Target; 3] = [Target::Margin, Target::Total, Target::WinProbability];

    pub fn name(&self) -> &'static str {
        match self {
            Target::Margin => "margin",
            Target::Total => "total",
            Target::WinProbability => "win_probability",
        }
    }

    pub fn is_probability(&self) -> bool {
        matches!(self, Target::WinProbability)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Target {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "margin" | "spread" => Ok(Target::Margin),
            "total" => Ok(Target::Total),
            "win_probability" | "win" | "moneyline" => Ok(Target::WinProbability),
            other => Err(ForecastError::Parse(format!("unknown target: {other}"))),
        }
    }
}

/// A fitted model tagged with the target it serves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetModel {
    Margin(LinearModel),
    Total(LinearModel),
    WinProbability(LogisticModel),
}

impl TargetModel {
    pub fn fit(target: Target, x: &Array2<f64>, y: &Array1<f64>, params: &ModelParams) -> Result<Self> {
        Ok(match target {
            Target::Margin => TargetModel::Margin(LinearModel::fit(x, y, params)?),
            Target::Total => TargetModel::Total(LinearModel::fit(x, y, params)?),
            Target::WinProbability => TargetModel::WinProbability(LogisticModel::fit(x, y, params)?),
        })
    }

    pub fn target(&self) -> Target {
        match self {
            TargetModel::Margin(_) => Target::Margin,
            TargetModel::Total(_) => Target::Total,
            TargetModel::WinProbability(_) => Target::WinProbability,
        }
    }

    /// Uncalibrated prediction for one row
    pub fn predict_row(&self, features: &[f64]) -> f64 {
        match self {
            TargetModel::Margin(m) | TargetModel::Total(m) => m.predict_row(features),
            TargetModel::WinProbability(m) => m.predict_row(features),
        }
    }

    pub fn predict(&self, x: &Array2<f64>) -> Vec<f64> {
        match self {
            TargetModel::Margin(m) | TargetModel::Total(m) => m.predict(x),
            TargetModel::WinProbability(m) => m.predict(x),
        }
    }

    /// Number of input features the model expects
    pub fn input_dim(&self) -> usize {
        match self {
            TargetModel::Margin(m) | TargetModel::Total(m) => m.scaler.dim(),
            TargetModel::WinProbability(m) => m.scaler.dim(),
        }
    }
}
