//! Probability calibration fitted on out-of-fold predictions

use serde::{Deserialize, Serialize};

use crate::model::logistic::sigmoid;
use crate::model::{LogisticModel, ModelParams, Regressor};
use crate::{ForecastError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMethod {
    Isotonic,
    Platt,
    /// Pass raw probabilities through unchanged
    None,
}

/// Monotone map from raw to calibrated home-win probability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalibrationMap {
    Identity,
    /// Step function: `values[i]` applies from `breakpoints[i]` up to the
    /// next breakpoint. Breakpoints strictly increase, values never decrease.
    Isotonic {
        breakpoints: Vec<f64>,
        values: Vec<f64>,
    },
    /// `sigmoid(slope * logit(p) + intercept)` with `slope >= 0`
    Platt { slope: f64, intercept: f64 },
}

impl CalibrationMap {
    pub fn fit(method: CalibrationMethod, raw: &[f64], outcomes: &[f64]) -> Result<Self> {
        if raw.len() != outcomes.len() {
            return Err(ForecastError::Model(format!(
                "calibration needs paired inputs: {} predictions, {} outcomes",
                raw.len(),
                outcomes.len()
            )));
        }
        if raw.is_empty() {
            return Err(ForecastError::InsufficientData {
                subject: "probability calibration".to_string(),
                available: 0,
                required: 1,
            });
        }
        match method {
            CalibrationMethod::None => Ok(CalibrationMap::Identity),
            CalibrationMethod::Isotonic => Ok(fit_isotonic(raw, outcomes)),
            CalibrationMethod::Platt => fit_platt(raw, outcomes),
        }
    }

    pub fn apply(&self, raw: f64) -> f64 {
        if raw.is_nan() {
            return 0.5;
        }
        let p = match self {
            CalibrationMap::Identity => raw,
            CalibrationMap::Isotonic {
                breakpoints,
                values,
            } => {
                // Rightmost breakpoint <= raw
                match breakpoints.binary_search_by(|bp| bp.total_cmp(&raw)) {
                    Ok(idx) => values[idx],
                    Err(0) => values.first().copied().unwrap_or(raw),
                    Err(idx) => values[idx - 1],
                }
            }
            CalibrationMap::Platt { slope, intercept } => sigmoid(slope * logit(raw) + intercept),
        };
        p.clamp(0.0, 1.0)
    }

    pub fn name(&self) -> &'static str {
        match self {
            CalibrationMap::Identity => "identity",
            CalibrationMap::Isotonic { .. } => "isotonic",
            CalibrationMap::Platt { .. } => "platt",
        }
    }
}

fn logit(p: f64) -> f64 {
    let p = p.clamp(1e-6, 1.0 - 1e-6);
    (p / (1.0 - p)).ln()
}

/// Pool-adjacent-violators on (raw, outcome) pairs.
///
/// Equal raw values are pooled first so they can never straddle a step.
fn fit_isotonic(raw: &[f64], outcomes: &[f64]) -> CalibrationMap {
    let mut pairs: Vec<(f64, f64)> = raw.iter().copied().zip(outcomes.iter().copied()).collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    // (start raw value, label sum, weight)
    let mut blocks: Vec<(f64, f64, f64)> = Vec::with_capacity(pairs.len());
    for (x, y) in pairs {
        match blocks.last_mut() {
            Some(last) if last.0 == x => {
                last.1 += y;
                last.2 += 1.0;
            }
            _ => blocks.push((x, y, 1.0)),
        }
    }

    let mut merged: Vec<(f64, f64, f64)> = Vec::with_capacity(blocks.len());
    for block in blocks {
        merged.push(block);
        while merged.len() > 1 {
            let n = merged.len();
            let (prev, cur) = (merged[n - 2], merged[n - 1]);
            if prev.1 / prev.2 <= cur.1 / cur.2 {
                break;
            }
            merged[n - 2] = (prev.0, prev.1 + cur.1, prev.2 + cur.2);
            merged.pop();
        }
    }

    CalibrationMap::Isotonic {
        breakpoints: merged.iter().map(|b| b.0).collect(),
        values: merged.iter().map(|b| (b.1 / b.2).clamp(0.0, 1.0)).collect(),
    }
}

/// One-feature logistic fit on the raw log-odds
fn fit_platt(raw: &[f64], outcomes: &[f64]) -> Result<CalibrationMap> {
    let x = ndarray::Array2::from_shape_vec((raw.len(), 1), raw.iter().map(|p| logit(*p)).collect())
        .map_err(|e| ForecastError::Model(e.to_string()))?;
    let y = ndarray::Array1::from(outcomes.to_vec());
    let params = ModelParams {
        logistic_l2: 1e-6,
        ..ModelParams::default()
    };
    let fitted = LogisticModel::fit(&x, &y, &params)?;

    let slope = fitted.weights[0] / fitted.scaler.scales[0];
    let intercept = fitted.intercept - slope * fitted.scaler.means[0];
    if slope < 0.0 {
        // Anti-correlated raw scores: fall back to the base rate
        let base = outcomes.iter().sum::<f64>() / outcomes.len() as f64;
        return Ok(CalibrationMap::Platt {
            slope: 0.0,
            intercept: logit(base),
        });
    }
    Ok(CalibrationMap::Platt { slope, intercept })
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;

    fn assert_monotone(map: &CalibrationMap) {
        let mut previous = map.apply(0.0);
        for i in 1..=1000 {
            let p = map.apply(i as f64 / 1000.0);
            assert!(p >= previous, "not monotone at {i}: {p} < {previous}");
            assert!((0.0..=1.0).contains(&p));
            previous = p;
        }
    }

    #[test]
    fn test_isotonic_pools_violators() {
        let raw = [0.1, 0.2, 0.3, 0.4];
        let outcomes = [0.0, 1.0, 0.0, 1.0];
        let map = CalibrationMap::fit(CalibrationMethod::Isotonic, &raw, &outcomes).unwrap();
        match &map {
            CalibrationMap::Isotonic {
                breakpoints,
                values,
            } => {
                assert_eq!(breakpoints, &vec![0.1, 0.2, 0.4]);
                assert_eq!(values, &vec![0.0, 0.5, 1.0]);
            }
            other => panic!("unexpected map {other:?}"),
        }
        assert_eq!(map.apply(0.05), 0.0);
        assert_eq!(map.apply(0.25), 0.5);
        assert_eq!(map.apply(0.3), 0.5);
        assert_eq!(map.apply(0.9), 1.0);
        assert_monotone(&map);
    }

    #[test]
    fn test_isotonic_ties_share_a_value() {
        // Same raw value with opposite outcomes
        let raw = [0.2, 0.5, 0.5, 0.5, 0.8];
        let outcomes = [0.0, 1.0, 0.0, 0.0, 1.0];
        let map = CalibrationMap::fit(CalibrationMethod::Isotonic, &raw, &outcomes).unwrap();
        if let CalibrationMap::Isotonic { breakpoints, values } = &map {
            assert_eq!(breakpoints.iter().filter(|b| **b == 0.5).count(), 1);
            let idx = breakpoints.iter().position(|b| *b == 0.5).unwrap();
            assert_abs_diff_eq!(values[idx], 1.0 / 3.0, epsilon = 1e-12);
        } else {
            panic!("expected isotonic map");
        }
        assert_monotone(&map);
    }

    #[test]
    fn test_isotonic_random_is_monotone() {
        let mut rng = StdRng::seed_from_u64(11);
        let raw: Vec<f64> = (0..500).map(|_| (rng.gen_range(0..20) as f64) / 20.0).collect();
        let outcomes: Vec<f64> = raw
            .iter()
            .map(|p| if rng.gen::<f64>() < *p { 1.0 } else { 0.0 })
            .collect();
        let map = CalibrationMap::fit(CalibrationMethod::Isotonic, &raw, &outcomes).unwrap();
        assert_monotone(&map);
        if let CalibrationMap::Isotonic { breakpoints, .. } = &map {
            assert!(breakpoints.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_platt_is_monotone() {
        let mut rng = StdRng::seed_from_u64(5);
        let raw: Vec<f64> = (0..400).map(|_| rng.gen_range(0.05..0.95)).collect();
        // Overconfident raw probabilities
        let outcomes: Vec<f64> = raw
            .iter()
            .map(|p| {
                let truth = 0.5 + (p - 0.5) * 0.5;
                if rng.gen::<f64>() < truth { 1.0 } else { 0.0 }
            })
            .collect();
        let map = CalibrationMap::fit(CalibrationMethod::Platt, &raw, &outcomes).unwrap();
        if let CalibrationMap::Platt { slope, .. } = map {
            assert!(slope >= 0.0 && slope < 1.0);
        } else {
            panic!("expected platt map");
        }
        assert_monotone(&map);
    }

    #[test]
    fn test_identity_and_errors() {
        let map = CalibrationMap::fit(CalibrationMethod::None, &[0.3], &[1.0]).unwrap();
        assert_eq!(map.apply(0.37), 0.37);
        assert_eq!(map.apply(1.2), 1.0);
        assert!(CalibrationMap::fit(CalibrationMethod::Isotonic, &[], &[]).is_err());
        assert!(CalibrationMap::fit(CalibrationMethod::Isotonic, &[0.1], &[]).is_err());
    }

    #[test]
    fn test_serialized_map() {
        let map = CalibrationMap::fit(CalibrationMethod::Isotonic, &[0.2, 0.7], &[0.0, 1.0]).unwrap();
        let json = serde_json::to_string(&map).unwrap();
        assert!(json.contains("\"kind\":\"isotonic\""));
        let back: CalibrationMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }
}
