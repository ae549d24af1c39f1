//! Pre-game feature vectors
//!
//! Every field is derived from state dated strictly before the game. Snapshots
//! that carry anything from the game's own date (or later) are rejected.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::features::elo::{EloConfig, EloRatingEngine, RatingsSnapshot, SeasonState, SnapshotRating};
use crate::features::srs::{SrsConfig, SrsTracker};
use crate::features::team_stats::{FormSummary, RollingStatistics, StatsSnapshot, TeamForm};
use crate::{ForecastError, Game, Result, TeamId};

/// Field names, in vector order, with Elo as the rating source
pub const FEATURE_NAMES: [&str; FeatureVector::DIM] = [
    "elo_diff",
    "point_diff_diff",
    "points_for_diff",
    "points_against_diff",
    "home_field",
    "home_history_ok",
    "away_history_ok",
];

/// Field names for a rating source; only the first field differs
pub fn feature_names(source: RatingSource) -> [&'static str; FeatureVector::DIM] {
    let mut names = FEATURE_NAMES;
    if source == RatingSource::Srs {
        names[0] = "srs_diff";
    }
    names
}

/// Team strength measure behind the first feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingSource {
    /// Season Elo plus the home-advantage offset
    #[default]
    Elo,
    /// Simple Rating System in points; home edge is left to `home_field`
    Srs,
}

/// What to do with a game whose team has too few prior games
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColdStartPolicy {
    /// Drop the game from training and refuse to predict it
    Exclude,
    /// Substitute league-average form and flag the game
    LeagueAverage,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Prior games a team needs before its own form is trusted
    pub min_games: u32,
    /// Number of recent games in the rolling averages
    pub rolling_window: usize,
    pub cold_start: ColdStartPolicy,
    pub rating_source: RatingSource,
    /// Used when `rating_source` is `srs`
    pub srs: SrsConfig,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        FeatureConfig {
            min_games: 3,
            rolling_window: 8,
            cold_start: ColdStartPolicy::LeagueAverage,
            rating_source: RatingSource::Elo,
            srs: SrsConfig::default(),
        }
    }
}

/// Everything that determines feature values; persisted with each model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub names: Vec<String>,
    pub elo: EloConfig,
    pub features: FeatureConfig,
}

impl FeatureSpec {
    pub fn new(elo: EloConfig, features: FeatureConfig) -> Self {
        FeatureSpec {
            names: feature_names(features.rating_source)
                .iter()
                .map(|n| n.to_string())
                .collect(),
            elo,
            features,
        }
    }
}

/// Fixed-width numeric features for one game
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    values: [f64; FeatureVector::DIM],
    source: RatingSource,
}

impl FeatureVector {
    pub const DIM: usize = 7;

    pub fn from_values(values: [f64; FeatureVector::DIM]) -> Self {
        FeatureVector {
            values,
            source: RatingSource::Elo,
        }
    }

    pub fn with_source(mut self, source: RatingSource) -> Self {
        self.source = source;
        self
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        feature_names(self.source)
            .iter()
            .position(|n| *n == name)
            .map(|i| self.values[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        feature_names(self.source)
            .into_iter()
            .zip(self.values.iter().copied())
    }
}

/// Season state behind the builder's snapshots: Elo (always kept, it vets
/// every game), rolling form and SRS when that is the rating source
#[derive(Debug, Clone)]
pub struct PregameState {
    elo: SeasonState,
    stats: RollingStatistics,
    srs: Option<SrsTracker>,
}

impl PregameState {
    pub fn new(elo: SeasonState, config: &FeatureConfig) -> Self {
        let srs = match config.rating_source {
            RatingSource::Elo => None,
            RatingSource::Srs => Some(SrsTracker::new(config.srs)),
        };
        PregameState {
            elo,
            stats: RollingStatistics::new(config.rolling_window),
            srs,
        }
    }

    pub fn check_references(&self, game: &Game) -> Result<()> {
        self.elo.check_references(game)
    }

    /// Apply one game everywhere; `Ok(false)` for games not yet completed
    pub fn apply(&mut self, game: &Game) -> Result<bool> {
        let applied = self.elo.apply(game)?;
        if applied {
            self.stats.add_game(game);
            if let Some(srs) = &mut self.srs {
                srs.add_game(game);
            }
        }
        Ok(applied)
    }

    /// Ratings from the configured source, labelled as of `as_of`
    pub fn ratings(&self, as_of: NaiveDate) -> RatingsSnapshot {
        match &self.srs {
            Some(srs) => srs.snapshot(as_of),
            None => self.elo.snapshot(as_of),
        }
    }

    pub fn stats(&self, as_of: NaiveDate) -> StatsSnapshot {
        self.stats.snapshot(as_of)
    }
}

/// A team that fell below the minimum-games threshold
#[derive(Debug, Clone, PartialEq)]
pub struct ColdStartTeam {
    pub team: TeamId,
    pub games: u32,
    pub required: u32,
}

/// Builder output: the vector plus any cold-start substitutions made
#[derive(Debug, Clone)]
pub struct BuiltFeatures {
    pub vector: FeatureVector,
    pub cold_start: Vec<ColdStartTeam>,
}

impl BuiltFeatures {
    pub fn is_cold_start(&self) -> bool {
        !self.cold_start.is_empty()
    }
}

/// Converts a game plus pre-game snapshots into a [`FeatureVector`]
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    elo: EloConfig,
    config: FeatureConfig,
}

impl FeatureBuilder {
    pub fn new(elo: EloConfig, config: FeatureConfig) -> Self {
        FeatureBuilder { elo, config }
    }

    pub fn from_spec(spec: &FeatureSpec) -> Self {
        Self::new(spec.elo, spec.features)
    }

    pub fn spec(&self) -> FeatureSpec {
        FeatureSpec::new(self.elo, self.config)
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Empty pre-game state for a season pass under these settings
    pub fn start_season(&self, engine: &EloRatingEngine) -> PregameState {
        PregameState::new(engine.start_season(), &self.config)
    }

    pub fn build(
        &self,
        game: &Game,
        ratings: &RatingsSnapshot,
        stats: &StatsSnapshot,
    ) -> Result<BuiltFeatures> {
        check_cutoff(game, "ratings snapshot", ratings.as_of)?;
        check_cutoff(game, "stats snapshot", stats.as_of)?;
        if let Some(latest) = stats.league_latest() {
            check_source(game, "league averages", latest)?;
        }

        let home_rating = ratings.get(&game.home_team);
        let away_rating = ratings.get(&game.away_team);
        check_rating(game, &game.home_team, &home_rating)?;
        check_rating(game, &game.away_team, &away_rating)?;

        let home_form = stats.form(&game.home_team);
        let away_form = stats.form(&game.away_team);
        check_form(game, &game.home_team, &home_form)?;
        check_form(game, &game.away_team, &away_form)?;

        let mut cold_start = Vec::new();
        for (team, form) in [(&game.home_team, &home_form), (&game.away_team, &away_form)] {
            if form.games_played < self.config.min_games {
                cold_start.push(ColdStartTeam {
                    team: team.clone(),
                    games: form.games_played,
                    required: self.config.min_games,
                });
            }
        }

        if self.config.cold_start == ColdStartPolicy::Exclude {
            if let Some(cold) = cold_start.first() {
                return Err(ForecastError::InsufficientData {
                    subject: format!("{} in game {}", cold.team, game.game_id),
                    available: cold.games as usize,
                    required: cold.required as usize,
                });
            }
        }

        let placeholder = FormSummary::league_average(stats.league_points_per_game().unwrap_or(0.0));
        let summarize = |team: &TeamId, form: &TeamForm| {
            let is_cold = cold_start.iter().any(|c| &c.team == team);
            if is_cold {
                placeholder
            } else {
                form.summary().unwrap_or(placeholder)
            }
        };
        let home = summarize(&game.home_team, &home_form);
        let away = summarize(&game.away_team, &away_form);

        let history_ok = |team: &TeamId| {
            if cold_start.iter().any(|c| &c.team == team) {
                0.0
            } else {
                1.0
            }
        };

        let rating_diff = match self.config.rating_source {
            RatingSource::Elo => {
                home_rating.rating + self.elo.home_offset(game.neutral_site) - away_rating.rating
            }
            RatingSource::Srs => home_rating.rating - away_rating.rating,
        };
        let vector = FeatureVector::from_values([
            rating_diff,
            home.avg_margin - away.avg_margin,
            home.avg_points_for - away.avg_points_for,
            home.avg_points_against - away.avg_points_against,
            if game.neutral_site { 0.0 } else { 1.0 },
            history_ok(&game.home_team),
            history_ok(&game.away_team),
        ])
        .with_source(self.config.rating_source);

        Ok(BuiltFeatures { vector, cold_start })
    }
}

fn leakage(game: &Game, detail: String) -> ForecastError {
    ForecastError::Leakage {
        game_id: game.game_id.clone(),
        detail,
    }
}

fn check_cutoff(game: &Game, what: &str, as_of: NaiveDate) -> Result<()> {
    if as_of > game.date {
        return Err(leakage(
            game,
            format!("{} taken as of {} is after game date {}", what, as_of, game.date),
        ));
    }
    Ok(())
}

fn check_source(game: &Game, what: &str, dated: NaiveDate) -> Result<()> {
    if dated >= game.date {
        return Err(leakage(
            game,
            format!("{} include a game on {} (game date {})", what, dated, game.date),
        ));
    }
    Ok(())
}

fn check_rating(game: &Game, team: &TeamId, rating: &SnapshotRating) -> Result<()> {
    match rating.last_game {
        Some(dated) => check_source(game, &format!("rating of {}", team), dated),
        None => Ok(()),
    }
}

fn check_form(game: &Game, team: &TeamId, form: &TeamForm) -> Result<()> {
    for line in &form.recent {
        check_source(game, &format!("form of {}", team), line.date)?;
    }
    Ok(())
}
