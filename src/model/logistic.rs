//! L2-regularised logistic regression for the home-win probability

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use super::{check_shapes, solve_spd, ModelParams, Regressor, Standardizer};
use crate::Result;

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Logistic model fitted by Newton (IRLS) steps.
///
/// Labels may be fractional (ties carry 0.5). The intercept is not penalised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub scaler: Standardizer,
    pub weights: Vec<f64>,
    pub intercept: f64,
    /// Newton iterations used by the fit
    pub iterations: usize,
}

impl LogisticModel {
    /// Log-odds of a home win for one feature row
    pub fn decision_row(&self, features: &[f64]) -> f64 {
        let z = self.scaler.transform_row(features);
        self.intercept + z.iter().zip(&self.weights).map(|(v, w)| v * w).sum::<f64>()
    }
}

impl Regressor for LogisticModel {
    fn fit(x: &Array2<f64>, y: &Array1<f64>, params: &ModelParams) -> Result<Self> {
        check_shapes(x, y)?;
        let scaler = Standardizer::fit(x);
        let z = scaler.transform(x);
        let (n, d) = z.dim();

        // Column 0 is the intercept
        let mut design = Array2::<f64>::ones((n, d + 1));
        for i in 0..n {
            for j in 0..d {
                design[[i, j + 1]] = z[[i, j]];
            }
        }

        let lambda = params.logistic_l2.max(0.0);
        let mut beta = Array1::<f64>::zeros(d + 1);
        let mut iterations = 0;

        for _ in 0..params.max_iterations.max(1) {
            iterations += 1;
            let eta = design.dot(&beta);
            let p = eta.mapv(sigmoid);
            let w = p.mapv(|pi| (pi * (1.0 - pi)).max(1e-10));

            let mut gradient = design.t().dot(&(&p - y));
            let mut weighted = design.clone();
            for (i, mut row) in weighted.rows_mut().into_iter().enumerate() {
                row *= w[i];
            }
            let mut hessian = design.t().dot(&weighted);
            hessian[[0, 0]] += 1e-8;
            for j in 1..=d {
                gradient[j] += lambda * beta[j];
                hessian[[j, j]] += lambda.max(1e-8);
            }

            let step = solve_spd(&hessian, &gradient)?;
            beta = &beta - &step;

            let largest = step.iter().fold(0.0_f64, |m, s| m.max(s.abs()));
            if largest < params.tolerance {
                break;
            }
        }

        if beta.iter().any(|b| !b.is_finite()) {
            return Err(crate::ForecastError::Model(
                "logistic fit diverged".to_string(),
            ));
        }
        log::debug!("Logistic fit converged after {} iterations", iterations);

        Ok(LogisticModel {
            scaler,
            weights: beta.iter().skip(1).copied().collect(),
            intercept: beta[0],
            iterations,
        })
    }

    fn predict_row(&self, features: &[f64]) -> f64 {
        sigmoid(self.decision_row(features))
    }
}
