//! Least-squares regression for continuous targets

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use super::{check_shapes, solve_spd, ModelParams, Regressor, Standardizer};
use crate::Result;

/// Linear model on standardized features.
///
/// Solves `(Z'Z + αI) w = Z'(y - ȳ)`; the intercept is the label mean and is
/// not penalised. A small α keeps constant columns (zero after centering)
/// solvable without changing the fit elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub scaler: Standardizer,
    pub weights: Vec<f64>,
    pub intercept: f64,
}

impl LinearModel {
    /// Coefficients on the original feature scale: (intercept, slopes)
    pub fn raw_coefficients(&self) -> (f64, Vec<f64>) {
        let slopes: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.scaler.scales)
            .map(|(w, s)| w / s)
            .collect();
        let shift: f64 = slopes
            .iter()
            .zip(&self.scaler.means)
            .map(|(b, m)| b * m)
            .sum();
        (self.intercept - shift, slopes)
    }
}

impl Regressor for LinearModel {
    fn fit(x: &Array2<f64>, y: &Array1<f64>, params: &ModelParams) -> Result<Self> {
        check_shapes(x, y)?;
        let scaler = Standardizer::fit(x);
        let z = scaler.transform(x);
        let y_mean = y.mean().unwrap_or(0.0);
        let centered = y.mapv(|v| v - y_mean);

        let mut gram = z.t().dot(&z);
        let alpha = params.ridge_alpha.max(1e-8);
        for i in 0..gram.nrows() {
            gram[[i, i]] += alpha;
        }
        let rhs = z.t().dot(&centered);
        let weights = solve_spd(&gram, &rhs)?;

        Ok(LinearModel {
            scaler,
            weights: weights.to_vec(),
            intercept: y_mean,
        })
    }

    fn predict_row(&self, features: &[f64]) -> f64 {
        let z = self.scaler.transform_row(features);
        self.intercept + z.iter().zip(&self.weights).map(|(v, w)| v * w).sum::<f64>()
    }
}
