//! Football outcome forecasting
//!
//! Season-scoped Elo ratings feed walk-forward trained margin, total and
//! win-probability models whose outputs are calibrated against
//! out-of-fold predictions.

pub mod data;
pub mod features;
pub mod model;
pub mod predict;
pub mod service;
pub mod training;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::features::elo::EloConfig;
use crate::features::FeatureConfig;
use crate::model::Target;
use crate::training::TrainingConfig;

/// Unique identifier for a team
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamId(pub String);

impl TeamId {
    pub fn new(id: impl Into<String>) -> Self {
        TeamId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// League a game is played in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum League {
    #[serde(rename = "NFL")]
    Nfl,
    #[serde(rename = "NCAA")]
    Ncaa,
}

impl League {
    pub fn code(&self) -> &'static str {
        match self {
            League::Nfl => "NFL",
            League::Ncaa => "NCAA",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_uppercase().as_str() {
            "NFL" => Some(League::Nfl),
            "NCAA" | "NCAAF" => Some(League::Ncaa),
            _ => None,
        }
    }
}

impl fmt::Display for League {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::str::FromStr for League {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        League::from_code(s).ok_or_else(|| format!("Unknown league: {}. Use NFL or NCAA.", s))
    }
}

/// A scheduled or completed game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub game_id: String,
    pub league: League,
    pub season: i32,
    pub week: u32,
    pub date: NaiveDate,
    pub home_team: TeamId,
    pub away_team: TeamId,
    pub home_score: Option<u32>,
    pub away_score: Option<u32>,
    pub completed: bool,
    #[serde(default)]
    pub neutral_site: bool,
}

impl Game {
    /// Final score as (home, away); only for completed games with both scores
    pub fn final_score(&self) -> Option<(u32, u32)> {
        if !self.completed {
            return None;
        }
        self.home_score.zip(self.away_score)
    }

    /// Whether this game may contribute to ratings and training
    pub fn is_scored(&self) -> bool {
        self.final_score().is_some()
    }

    /// Score margin (positive = home win)
    pub fn margin(&self) -> Option<f64> {
        self.final_score()
            .map(|(home, away)| home as f64 - away as f64)
    }

    /// Combined points
    pub fn total(&self) -> Option<f64> {
        self.final_score().map(|(home, away)| (home + away) as f64)
    }

    /// Outcome for the home side: 1 = win, 0.5 = tie, 0 = loss
    pub fn home_outcome(&self) -> Option<f64> {
        self.final_score()
            .map(|(home, away)| match home.cmp(&away) {
                std::cmp::Ordering::Greater => 1.0,
                std::cmp::Ordering::Less => 0.0,
                std::cmp::Ordering::Equal => 0.5,
            })
    }

    /// Check if a team plays in this game
    pub fn involves(&self, team: &TeamId) -> bool {
        &self.home_team == team || &self.away_team == team
    }
}

/// Closed range of seasons, both ends inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeasonRange {
    pub first: i32,
    pub last: i32,
}

impl SeasonRange {
    pub fn new(first: i32, last: i32) -> Self {
        SeasonRange {
            first: first.min(last),
            last: first.max(last),
        }
    }

    pub fn contains(&self, season: i32) -> bool {
        season >= self.first && season <= self.last
    }

    pub fn seasons(&self) -> impl Iterator<Item = i32> {
        self.first..=self.last
    }
}

impl fmt::Display for SeasonRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.first, self.last)
    }
}

/// Lower/upper bounds around a point estimate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub lower: f64,
    pub upper: f64,
}

impl Interval {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Non-fatal annotations attached to a forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ForecastWarning {
    /// A team had fewer prior games than the configured minimum
    LowConfidence {
        team: TeamId,
        games: u32,
        required: u32,
    },
}

impl fmt::Display for ForecastWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForecastWarning::LowConfidence {
                team,
                games,
                required,
            } => write!(
                f,
                "low confidence: {} has {} prior games (minimum {})",
                team, games, required
            ),
        }
    }
}

/// Model output for a single game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub game_id: String,
    pub home_team: TeamId,
    pub away_team: TeamId,
    pub margin: f64,
    pub margin_interval: Interval,
    pub total: f64,
    pub total_interval: Interval,
    pub home_win_probability: f64,
    pub warnings: Vec<ForecastWarning>,
}

impl Forecast {
    /// Away probability is always the complement of the home probability
    pub fn away_win_probability(&self) -> f64 {
        1.0 - self.home_win_probability
    }

    /// Team with the higher win probability (home on exact 50%)
    pub fn predicted_winner(&self) -> &TeamId {
        if self.home_win_probability >= 0.5 {
            &self.home_team
        } else {
            &self.away_team
        }
    }

    /// Implied home and away points from margin and total
    pub fn implied_scores(&self) -> (f64, f64) {
        (
            (self.total + self.margin) / 2.0,
            (self.total - self.margin) / 2.0,
        )
    }

    pub fn is_low_confidence(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, ForecastWarning::LowConfidence { .. }))
    }
}

/// Application-wide errors
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("Games out of chronological order: {game_id} on {date} follows a game on {previous}")]
    Ordering {
        game_id: String,
        date: NaiveDate,
        previous: NaiveDate,
    },

    #[error("Game {game_id} is marked completed but is missing a score")]
    DataIntegrity { game_id: String },

    #[error("Unknown team '{team}' referenced by game {game_id}")]
    UnknownTeam { team: String, game_id: String },

    #[error("Insufficient data for {subject}: has {available}, need {required}")]
    InsufficientData {
        subject: String,
        available: usize,
        required: usize,
    },

    #[error("No trained {target} model for {league} {seasons} - run `gridiron train` first")]
    ModelNotFound {
        league: League,
        seasons: String,
        target: Target,
    },

    #[error("Feature leakage for game {game_id}: {detail}")]
    Leakage { game_id: String, detail: String },

    #[error("Incompatible model artifact: {0}")]
    IncompatibleArtifact(String),

    #[error("No rating for {team} in {league} season {season} before {as_of}")]
    RatingNotFound {
        league: League,
        team: TeamId,
        season: i32,
        as_of: NaiveDate,
    },

    #[error("Game not found: {0}")]
    GameNotFound(String),

    #[error("Model fitting failed: {0}")]
    Model(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, ForecastError>;

/// Application configuration loaded from config.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub elo: EloConfig,
    pub features: FeatureConfig,
    pub training: TrainingConfig,
    pub data: DataConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub database_path: String,
    pub model_dir: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            database_path: "data/gridiron.db".to_string(),
            model_dir: "models".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ForecastError::Config(format!("Failed to read config file {}: {}", path, e))
        })?;
        toml::from_str(&content)
            .map_err(|e| ForecastError::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ForecastError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_game_outcome() {
        let win = game("g1", 2023, date(2023, 9, 10), "KC", "DET", Some((21, 20)));
        assert_eq!(win.home_outcome(), Some(1.0));
        assert_eq!(win.margin(), Some(1.0));
        assert_eq!(win.total(), Some(41.0));

        let tie = game("g2", 2023, date(2023, 9, 10), "KC", "DET", Some((17, 17)));
        assert_eq!(tie.home_outcome(), Some(0.5));

        let upcoming = game("g3", 2023, date(2023, 9, 17), "KC", "DET", None);
        assert!(!upcoming.is_scored());
        assert_eq!(upcoming.margin(), None);
    }

    #[test]
    fn test_completed_without_score_is_not_scored() {
        let mut g = game("g1", 2023, date(2023, 9, 10), "KC", "DET", Some((21, 20)));
        g.away_score = None;
        assert!(g.completed);
        assert!(!g.is_scored());
    }

    #[test]
    fn test_league_codes() {
        assert_eq!(League::from_code("nfl"), Some(League::Nfl));
        assert_eq!(League::from_code("NCAAF"), Some(League::Ncaa));
        assert_eq!(League::from_code("CFL"), None);
        assert_eq!("NCAA".parse::<League>(), Ok(League::Ncaa));
    }

    #[test]
    fn test_forecast_complement() {
        let forecast = Forecast {
            game_id: "g1".to_string(),
            home_team: TeamId::new("KC"),
            away_team: TeamId::new("DET"),
            margin: 3.0,
            margin_interval: Interval {
                lower: -7.0,
                upper: 13.0,
            },
            total: 47.0,
            total_interval: Interval {
                lower: 35.0,
                upper: 60.0,
            },
            home_win_probability: 0.6,
            warnings: vec![],
        };
        assert!((forecast.away_win_probability() - 0.4).abs() < 1e-12);
        assert_eq!(forecast.predicted_winner(), &TeamId::new("KC"));
        assert_eq!(forecast.implied_scores(), (25.0, 22.0));
        assert!(!forecast.is_low_confidence());
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.elo, config.elo);
        assert_eq!(parsed.features, config.features);
        assert_eq!(parsed.data.model_dir, "models");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: Config = toml::from_str("[elo]\nk_factor = 25.0\n").unwrap();
        assert_eq!(parsed.elo.k_factor, 25.0);
        assert_eq!(parsed.elo.base_rating, 1500.0);
        assert_eq!(parsed.data.database_path, "data/gridiron.db");
    }
}
