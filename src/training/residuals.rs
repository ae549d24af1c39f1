//! Empirical residual quantiles for prediction intervals

use serde::{Deserialize, Serialize};

use crate::{ForecastError, Interval, Result};

/// Out-of-fold residual distribution (actual minus predicted)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualSummary {
    /// Central coverage, e.g. 0.8 for the 10th..90th percentiles
    pub confidence: f64,
    pub lower_offset: f64,
    pub upper_offset: f64,
    pub count: usize,
    pub mean_abs: f64,
}

impl ResidualSummary {
    pub fn fit(residuals: &[f64], confidence: f64) -> Result<Self> {
        if !(confidence > 0.0 && confidence < 1.0) {
            return Err(ForecastError::Config(format!(
                "interval confidence must be in (0, 1), got {confidence}"
            )));
        }
        if residuals.is_empty() {
            return Err(ForecastError::InsufficientData {
                subject: "residual intervals".to_string(),
                available: 0,
                required: 1,
            });
        }

        let mut sorted = residuals.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let tail = (1.0 - confidence) / 2.0;

        Ok(ResidualSummary {
            confidence,
            lower_offset: quantile(&sorted, tail),
            upper_offset: quantile(&sorted, 1.0 - tail),
            count: sorted.len(),
            mean_abs: sorted.iter().map(|r| r.abs()).sum::<f64>() / sorted.len() as f64,
        })
    }

    pub fn interval(&self, point: f64) -> Interval {
        Interval {
            lower: point + self.lower_offset,
            upper: point + self.upper_offset,
        }
    }
}

/// Linear-interpolated quantile of sorted data
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            let frac = pos - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}
