//! Regression models
//!
//! Ridge-stabilised least squares for margin and total, L2 logistic
//! regression for win probability, behind a shared fit/predict trait.

pub mod linear;
pub mod logistic;
pub mod target;

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::{ForecastError, Result};

pub use linear::LinearModel;
pub use logistic::LogisticModel;
pub use target::{Target, TargetModel};

/// Fitting hyperparameters shared by all targets
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    /// L2 penalty for the least-squares targets (standardized features)
    pub ridge_alpha: f64,
    /// L2 penalty for the logistic target
    pub logistic_l2: f64,
    /// Newton iteration cap for the logistic fit
    pub max_iterations: usize,
    /// Stop when the largest coefficient step falls below this
    pub tolerance: f64,
}

impl Default for ModelParams {
    fn default() -> Self {
        ModelParams {
            ridge_alpha: 1e-3,
            logistic_l2: 1.0,
            max_iterations: 50,
            tolerance: 1e-8,
        }
    }
}

/// Capability shared by every target model
pub trait Regressor: Sized {
    fn fit(x: &Array2<f64>, y: &Array1<f64>, params: &ModelParams) -> Result<Self>;

    /// Prediction for one feature row
    fn predict_row(&self, features: &[f64]) -> f64;

    fn predict(&self, x: &Array2<f64>) -> Vec<f64> {
        x.rows()
            .into_iter()
            .map(|row| self.predict_row(&row.to_vec()))
            .collect()
    }
}

/// Per-column centering and scaling learned from training rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
}

impl Standardizer {
    pub fn fit(x: &Array2<f64>) -> Self {
        let means = x
            .mean_axis(Axis(0))
            .map(|m| m.to_vec())
            .unwrap_or_else(|| vec![0.0; x.ncols()]);
        let scales = x
            .std_axis(Axis(0), 0.0)
            .iter()
            .map(|s| if *s < 1e-12 { 1.0 } else { *s })
            .collect();
        Standardizer { means, scales }
    }

    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut z = x.clone();
        for mut row in z.rows_mut() {
            for (j, value) in row.iter_mut().enumerate() {
                *value = (*value - self.means[j]) / self.scales[j];
            }
        }
        z
    }

    pub fn transform_row(&self, features: &[f64]) -> Vec<f64> {
        features
            .iter()
            .enumerate()
            .map(|(j, v)| (v - self.means[j]) / self.scales[j])
            .collect()
    }

    pub fn dim(&self) -> usize {
        self.means.len()
    }
}

pub(crate) fn check_shapes(x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
    if x.nrows() != y.len() {
        return Err(ForecastError::Model(format!(
            "dimension mismatch: {} rows, {} labels",
            x.nrows(),
            y.len()
        )));
    }
    if x.nrows() == 0 {
        return Err(ForecastError::Model("no training rows".to_string()));
    }
    if let Some(row) = x.rows().into_iter().position(|r| r.iter().any(|v| !v.is_finite())) {
        return Err(ForecastError::Model(format!("non-finite feature in row {}", row)));
    }
    if let Some(row) = y.iter().position(|v| !v.is_finite()) {
        return Err(ForecastError::Model(format!("non-finite label in row {}", row)));
    }
    Ok(())
}

/// Solve `a * x = b` for symmetric positive definite `a` (Cholesky)
pub(crate) fn solve_spd(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));

    // A = L * L^T
    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 || !diag.is_finite() {
                    return Err(ForecastError::Model(
                        "matrix is not positive definite".to_string(),
                    ));
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // L * z = b
    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * z[j];
        }
        z[i] = (b[i] - sum) / l[[i, i]];
    }

    // L^T * x = z
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (z[i] - sum) / l[[i, i]];
    }
    Ok(x)
}
