//! Out-of-fold evaluation metrics

use serde::{Deserialize, Serialize};
use std::fmt;

/// Metrics accumulated over predicted games
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Games seen
    pub count: usize,
    pub margin_abs_sum: f64,
    pub margin_sq_sum: f64,
    pub total_abs_sum: f64,
    pub total_sq_sum: f64,
    /// Correct winner picks among games that were not tied
    pub correct_wins: usize,
    pub decided_games: usize,
    pub brier_sum: f64,
    pub log_loss_sum: f64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one game's predictions against its result
    pub fn update(
        &mut self,
        margin_pred: f64,
        margin: f64,
        total_pred: f64,
        total: f64,
        home_prob: f64,
        outcome: f64,
    ) {
        self.count += 1;

        let margin_err = margin_pred - margin;
        self.margin_abs_sum += margin_err.abs();
        self.margin_sq_sum += margin_err * margin_err;

        let total_err = total_pred - total;
        self.total_abs_sum += total_err.abs();
        self.total_sq_sum += total_err * total_err;

        if outcome != 0.5 {
            self.decided_games += 1;
            if (home_prob > 0.5) == (outcome > 0.5) {
                self.correct_wins += 1;
            }
        }

        self.brier_sum += (home_prob - outcome).powi(2);
        let p = home_prob.clamp(1e-15, 1.0 - 1e-15);
        self.log_loss_sum -= outcome * p.ln() + (1.0 - outcome) * (1.0 - p).ln();
    }

    fn mean(&self, sum: f64) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            sum / self.count as f64
        }
    }

    pub fn margin_mae(&self) -> f64 {
        self.mean(self.margin_abs_sum)
    }

    pub fn margin_rmse(&self) -> f64 {
        self.mean(self.margin_sq_sum).sqrt()
    }

    pub fn total_mae(&self) -> f64 {
        self.mean(self.total_abs_sum)
    }

    pub fn total_rmse(&self) -> f64 {
        self.mean(self.total_sq_sum).sqrt()
    }

    /// Get win prediction accuracy
    pub fn accuracy(&self) -> f64 {
        if self.decided_games == 0 {
            0.0
        } else {
            self.correct_wins as f64 / self.decided_games as f64
        }
    }

    pub fn brier(&self) -> f64 {
        self.mean(self.brier_sum)
    }

    pub fn log_loss(&self) -> f64 {
        self.mean(self.log_loss_sum)
    }

    /// Merge another metrics instance
    pub fn merge(&mut self, other: &Metrics) {
        self.count += other.count;
        self.margin_abs_sum += other.margin_abs_sum;
        self.margin_sq_sum += other.margin_sq_sum;
        self.total_abs_sum += other.total_abs_sum;
        self.total_sq_sum += other.total_sq_sum;
        self.correct_wins += other.correct_wins;
        self.decided_games += other.decided_games;
        self.brier_sum += other.brier_sum;
        self.log_loss_sum += other.log_loss_sum;
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n={} | Margin MAE: {:.2} RMSE: {:.2} | Total MAE: {:.2} RMSE: {:.2} | Acc: {:.2}% | Brier: {:.4} | LogLoss: {:.4}",
            self.count,
            self.margin_mae(),
            self.margin_rmse(),
            self.total_mae(),
            self.total_rmse(),
            self.accuracy() * 100.0,
            self.brier(),
            self.log_loss()
        )
    }
}
