//! Simple Rating System
//!
//! A team's SRS is its average scoring margin plus the average SRS of the
//! opponents it played, in points. The fixed point is found by damped
//! iteration and centred on zero, so a rating reads as points better than
//! an average team on a neutral field.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::features::elo::{RatingsSnapshot, SnapshotRating};
use crate::{Game, TeamId};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SrsConfig {
    /// Credit margins for schedule strength; off means plain average margin
    pub opponent_adjustment: bool,
    pub max_iterations: usize,
    /// Stop once no rating moves by more than this many points
    pub tolerance: f64,
}

impl Default for SrsConfig {
    fn default() -> Self {
        SrsConfig {
            opponent_adjustment: true,
            max_iterations: 200,
            tolerance: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct TeamResults {
    margin_sum: f64,
    opponents: Vec<TeamId>,
    last_game: Option<NaiveDate>,
}

/// Season results accumulated game by game, solved on demand
#[derive(Debug, Clone)]
pub struct SrsTracker {
    config: SrsConfig,
    teams: HashMap<TeamId, TeamResults>,
}

impl SrsTracker {
    pub fn new(config: SrsConfig) -> Self {
        SrsTracker {
            config,
            teams: HashMap::new(),
        }
    }

    /// Fold in a completed game; unscored games are ignored
    pub fn add_game(&mut self, game: &Game) {
        let Some(margin) = game.margin() else {
            return;
        };
        for (team, opponent, signed) in [
            (&game.home_team, &game.away_team, margin),
            (&game.away_team, &game.home_team, -margin),
        ] {
            let results = self.teams.entry(team.clone()).or_default();
            results.margin_sum += signed;
            results.opponents.push(opponent.clone());
            results.last_game = Some(game.date);
        }
    }

    pub fn games_played(&self, team: &TeamId) -> u32 {
        self.teams
            .get(team)
            .map_or(0, |r| r.opponents.len() as u32)
    }

    /// Current rating of every team that has played
    pub fn ratings(&self) -> HashMap<TeamId, f64> {
        // Sorted so the float sums do not depend on hash order
        let mut ids: Vec<&TeamId> = self.teams.keys().collect();
        ids.sort();
        let index: HashMap<&TeamId, usize> = ids.iter().enumerate().map(|(i, t)| (*t, i)).collect();

        let results: Vec<&TeamResults> = ids.iter().map(|t| &self.teams[*t]).collect();
        let average: Vec<f64> = results
            .iter()
            .map(|r| r.margin_sum / r.opponents.len() as f64)
            .collect();
        let opponents: Vec<Vec<usize>> = results
            .iter()
            .map(|r| r.opponents.iter().map(|o| index[o]).collect())
            .collect();

        let mut ratings = average.clone();
        if self.config.opponent_adjustment {
            for _ in 0..self.config.max_iterations {
                let mut next: Vec<f64> = (0..ratings.len())
                    .map(|i| {
                        let schedule = opponents[i].iter().map(|&j| ratings[j]).sum::<f64>()
                            / opponents[i].len() as f64;
                        // Damped: plain iteration oscillates on two-coloured schedules
                        0.5 * ratings[i] + 0.5 * (average[i] + schedule)
                    })
                    .collect();
                center(&mut next);
                let delta = next
                    .iter()
                    .zip(&ratings)
                    .map(|(a, b)| (a - b).abs())
                    .fold(0.0, f64::max);
                ratings = next;
                if delta < self.config.tolerance {
                    break;
                }
            }
        }

        ids.into_iter().cloned().zip(ratings).collect()
    }

    /// Ratings labelled as of `as_of`; teams without a game read as 0
    pub fn snapshot(&self, as_of: NaiveDate) -> RatingsSnapshot {
        let mut snapshot = RatingsSnapshot::new(as_of, 0.0);
        for (team, rating) in self.ratings() {
            let results = &self.teams[&team];
            snapshot.insert(
                team,
                SnapshotRating {
                    rating,
                    games_count: results.opponents.len() as u32,
                    last_game: results.last_game,
                },
            );
        }
        snapshot
    }
}

fn center(values: &mut [f64]) {
    if values.is_empty() {
        return;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    for v in values.iter_mut() {
        *v -= mean;
    }
}
