//! Calibrated forecasts from trained artifacts

use std::collections::HashSet;

use crate::data::feed::ensure_chronological;
use crate::data::ArtifactStore;
use crate::features::{EloRatingEngine, FeatureBuilder, FeatureSpec, RatingsSnapshot, StatsSnapshot};
use crate::model::Target;
use crate::training::ModelArtifact;
use crate::{
    Forecast, ForecastError, ForecastWarning, Game, League, Result, SeasonRange, TeamId,
};

/// Margin, total and win-probability artifacts from one training run
#[derive(Debug, Clone)]
pub struct ModelSet {
    margin: ModelArtifact,
    total: ModelArtifact,
    win: ModelArtifact,
}

impl ModelSet {
    /// Assemble a set; every target must be present and agree on league,
    /// seasons and feature spec
    pub fn from_artifacts(artifacts: Vec<ModelArtifact>) -> Result<Self> {
        let (league, seasons) = match artifacts.first() {
            Some(a) => (a.league, a.seasons),
            None => {
                return Err(ForecastError::IncompatibleArtifact(
                    "empty artifact set".to_string(),
                ))
            }
        };

        let (mut margin, mut total, mut win) = (None, None, None);
        for artifact in artifacts {
            artifact.check_compatible()?;
            let slot = match artifact.target {
                Target::Margin => &mut margin,
                Target::Total => &mut total,
                Target::WinProbability => &mut win,
            };
            if slot.is_some() {
                return Err(ForecastError::IncompatibleArtifact(format!(
                    "more than one {} artifact for {} {}",
                    artifact.target, artifact.league, artifact.seasons
                )));
            }
            *slot = Some(artifact);
        }
        let missing = |target| ForecastError::ModelNotFound {
            league,
            seasons: seasons.to_string(),
            target,
        };
        let set = ModelSet {
            margin: margin.ok_or_else(|| missing(Target::Margin))?,
            total: total.ok_or_else(|| missing(Target::Total))?,
            win: win.ok_or_else(|| missing(Target::WinProbability))?,
        };

        for other in [&set.total, &set.win] {
            if other.league != set.margin.league || other.seasons != set.margin.seasons {
                return Err(ForecastError::IncompatibleArtifact(format!(
                    "{} model is for {} {}, margin model for {} {}",
                    other.target, other.league, other.seasons, set.margin.league, set.margin.seasons
                )));
            }
            if other.feature_spec != set.margin.feature_spec {
                return Err(ForecastError::IncompatibleArtifact(format!(
                    "{} and margin models were trained on different features",
                    other.target
                )));
            }
        }
        Ok(set)
    }

    pub fn load(store: &ArtifactStore, league: League, seasons: SeasonRange) -> Result<Self> {
        let artifacts = Target::ALL
            .iter()
            .map(|target| store.load(league, seasons, *target))
            .collect::<Result<Vec<_>>>()?;
        Self::from_artifacts(artifacts)
    }

    pub fn feature_spec(&self) -> &FeatureSpec {
        &self.margin.feature_spec
    }

    pub fn league(&self) -> League {
        self.margin.league
    }

    pub fn seasons(&self) -> SeasonRange {
        self.margin.seasons
    }

    pub fn artifact(&self, target: Target) -> &ModelArtifact {
        match target {
            Target::Margin => &self.margin,
            Target::Total => &self.total,
            Target::WinProbability => &self.win,
        }
    }

    /// Short identifier recorded next to served forecasts
    pub fn version_tag(&self) -> String {
        format!(
            "{} {} v{} ({})",
            self.league(),
            self.seasons(),
            self.margin.crate_version,
            self.margin.trained_at.format("%Y-%m-%d %H:%M")
        )
    }
}

/// Produces calibrated forecasts for single games
pub struct CalibratedPredictor {
    models: ModelSet,
    builder: FeatureBuilder,
    engine: EloRatingEngine,
    known_teams: Option<HashSet<TeamId>>,
}

impl CalibratedPredictor {
    /// `spec` is how the caller builds features; it must match training
    pub fn new(models: ModelSet, spec: &FeatureSpec) -> Result<Self> {
        if spec != models.feature_spec() {
            return Err(ForecastError::IncompatibleArtifact(format!(
                "models for {} {} were trained with different feature settings",
                models.league(),
                models.seasons()
            )));
        }
        Ok(Self::from_models(models))
    }

    /// Use the feature settings stored with the models
    pub fn from_models(models: ModelSet) -> Self {
        let spec = models.feature_spec().clone();
        CalibratedPredictor {
            builder: FeatureBuilder::from_spec(&spec),
            engine: EloRatingEngine::new(spec.elo),
            models,
            known_teams: None,
        }
    }

    pub fn with_known_teams(mut self, teams: impl IntoIterator<Item = TeamId>) -> Self {
        let roster: HashSet<TeamId> = teams.into_iter().collect();
        self.engine = self.engine.with_known_teams(roster.iter().cloned());
        self.known_teams = Some(roster);
        self
    }

    pub fn models(&self) -> &ModelSet {
        &self.models
    }

    /// Forecast from snapshots taken before the game
    pub fn predict(
        &self,
        game: &Game,
        ratings: &RatingsSnapshot,
        stats: &StatsSnapshot,
    ) -> Result<Forecast> {
        if let Some(roster) = &self.known_teams {
            for team in [&game.home_team, &game.away_team] {
                if !roster.contains(team) {
                    return Err(ForecastError::UnknownTeam {
                        team: team.to_string(),
                        game_id: game.game_id.clone(),
                    });
                }
            }
        }

        let built = self.builder.build(game, ratings, stats)?;
        let row = built.vector.values();

        let margin = self.models.margin.predict_row(row);
        let total = self.models.total.predict_row(row);
        let home_win_probability = self.models.win.predict_row(row).clamp(0.0, 1.0);

        let warnings = built
            .cold_start
            .iter()
            .map(|cold| ForecastWarning::LowConfidence {
                team: cold.team.clone(),
                games: cold.games,
                required: cold.required,
            })
            .collect();

        Ok(Forecast {
            game_id: game.game_id.clone(),
            home_team: game.home_team.clone(),
            away_team: game.away_team.clone(),
            margin,
            margin_interval: interval(&self.models.margin, margin)?,
            total,
            total_interval: interval(&self.models.total, total)?,
            home_win_probability,
            warnings,
        })
    }

    /// Replay the game's season up to the day before it, then forecast
    pub fn forecast_game(&self, season_games: &[Game], game: &Game) -> Result<Forecast> {
        ensure_chronological(season_games)?;

        let mut state = self.builder.start_season(&self.engine);
        for prior in season_games
            .iter()
            .filter(|g| g.season == game.season)
            .take_while(|g| g.date < game.date)
        {
            if let Err(e) = state.apply(prior) {
                log::warn!("Skipping game {}: {}", prior.game_id, e);
            }
        }

        self.predict(game, &state.ratings(game.date), &state.stats(game.date))
    }
}

fn interval(artifact: &ModelArtifact, point: f64) -> Result<crate::Interval> {
    artifact
        .residuals
        .as_ref()
        .map(|r| r.interval(point))
        .ok_or_else(|| {
            ForecastError::IncompatibleArtifact(format!(
                "{} artifact has no residual summary",
                artifact.target
            ))
        })
}

/// Format a forecast for display
pub fn format_forecast(forecast: &Forecast) -> String {
    let winner = forecast.predicted_winner();
    let win_prob = forecast
        .home_win_probability
        .max(forecast.away_win_probability());
    let (home_pts, away_pts) = forecast.implied_scores();

    let mut out = format!(
        r#"
┌─────────────────────────────────────────────────┐
│  {} vs {}  ({})
├─────────────────────────────────────────────────┤
│  Win probability:  {} {:.1}%
│  Margin (home):    {:+.1}  [{:+.1}, {:+.1}]
│  Total points:     {:.1}  [{:.1}, {:.1}]
│  Implied score:    {} {:.0} - {} {:.0}
"#,
        forecast.home_team,
        forecast.away_team,
        forecast.game_id,
        winner,
        win_prob * 100.0,
        forecast.margin,
        forecast.margin_interval.lower,
        forecast.margin_interval.upper,
        forecast.total,
        forecast.total_interval.lower,
        forecast.total_interval.upper,
        forecast.home_team,
        home_pts,
        forecast.away_team,
        away_pts,
    );
    for warning in &forecast.warnings {
        out.push_str(&format!("│  Warning: {}\n", warning));
    }
    out.push_str("└─────────────────────────────────────────────────┘\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::GameDataset;
    use crate::features::{ColdStartPolicy, EloConfig, FeatureConfig};
    use crate::test_support::{date, game, synthetic_league};
    use crate::training::{TrainingConfig, WalkForwardTrainer};

    fn train(features: FeatureConfig) -> (Vec<Vec<Game>>, ModelSet) {
        let builder = FeatureBuilder::new(EloConfig::default(), features);
        let seasons = synthetic_league(2019..=2022, 9);
        let dataset = GameDataset::from_seasons(&seasons, &EloRatingEngine::default(), &builder);
        let config = TrainingConfig {
            min_train_games: 20,
            ..TrainingConfig::default()
        };
        let outcome = WalkForwardTrainer::new(config, builder.spec())
            .fit(League::Nfl, SeasonRange::new(2019, 2022), &dataset.samples)
            .unwrap();
        (seasons, ModelSet::from_artifacts(outcome.artifacts).unwrap())
    }

    #[test]
    fn test_forecast_is_coherent() {
        let (seasons, models) = train(FeatureConfig::default());
        let predictor = CalibratedPredictor::from_models(models);
        let season = &seasons[3];
        let target = &season[season.len() - 1];

        let forecast = predictor.forecast_game(season, target).unwrap();
        assert!((0.0..=1.0).contains(&forecast.home_win_probability));
        assert!((forecast.home_win_probability + forecast.away_win_probability() - 1.0).abs() < 1e-12);
        assert!(forecast.margin_interval.contains(forecast.margin));
        assert!(forecast.total_interval.contains(forecast.total));
        assert!(forecast.margin_interval.width() > 0.0);
        assert!(forecast.warnings.is_empty());
        assert!(format_forecast(&forecast).contains(&target.game_id));
    }

    #[test]
    fn test_strong_home_team_is_favoured() {
        let (seasons, models) = train(FeatureConfig::default());
        let predictor = CalibratedPredictor::from_models(models);
        let season = &seasons[3];
        let late = date(2022, 12, 31);
        let strong = game("x1", 2022, late, "T0", "T7", None);
        let weak = game("x2", 2022, late, "T7", "T0", None);

        let strong = predictor.forecast_game(season, &strong).unwrap();
        let weak = predictor.forecast_game(season, &weak).unwrap();
        assert!(strong.home_win_probability > weak.home_win_probability);
        assert!(strong.margin > weak.margin);
        assert!(strong.margin > 0.0);
    }

    #[test]
    fn test_persisted_models_give_identical_forecasts() {
        let (seasons, models) = train(FeatureConfig::default());
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        for target in Target::ALL {
            store.save(models.artifact(target)).unwrap();
        }
        let reloaded = ModelSet::load(&store, League::Nfl, SeasonRange::new(2019, 2022)).unwrap();

        let before = CalibratedPredictor::from_models(models);
        let after = CalibratedPredictor::from_models(reloaded);
        for g in seasons[3].iter().step_by(9) {
            assert_eq!(
                before.forecast_game(&seasons[3], g).unwrap(),
                after.forecast_game(&seasons[3], g).unwrap()
            );
        }
    }

    #[test]
    fn test_cold_start_warning() {
        let (seasons, models) = train(FeatureConfig::default());
        let predictor = CalibratedPredictor::from_models(models);
        // Opening week: nobody has history yet
        let opener = &seasons[3][0];
        let forecast = predictor.forecast_game(&seasons[3], opener).unwrap();
        assert!(forecast.is_low_confidence());
        assert_eq!(forecast.warnings.len(), 2);
    }

    #[test]
    fn test_cold_start_refused_under_exclude() {
        let features = FeatureConfig {
            cold_start: ColdStartPolicy::Exclude,
            ..FeatureConfig::default()
        };
        let (seasons, models) = train(features);
        let predictor = CalibratedPredictor::from_models(models);
        let opener = &seasons[3][0];
        let err = predictor.forecast_game(&seasons[3], opener).unwrap_err();
        assert!(matches!(err, ForecastError::InsufficientData { .. }));
    }

    #[test]
    fn test_feature_spec_mismatch() {
        let (_, models) = train(FeatureConfig::default());
        let other = FeatureSpec::new(
            EloConfig {
                k_factor: 32.0,
                ..EloConfig::default()
            },
            FeatureConfig::default(),
        );
        let err = CalibratedPredictor::new(models.clone(), &other).err().unwrap();
        assert!(matches!(err, ForecastError::IncompatibleArtifact(_)));
        assert!(CalibratedPredictor::new(models.clone(), &models.feature_spec().clone()).is_ok());
    }

    #[test]
    fn test_missing_target() {
        let (_, models) = train(FeatureConfig::default());
        let partial = vec![
            models.artifact(Target::Margin).clone(),
            models.artifact(Target::Total).clone(),
        ];
        let err = ModelSet::from_artifacts(partial).unwrap_err();
        assert!(matches!(
            err,
            ForecastError::ModelNotFound {
                target: Target::WinProbability,
                ..
            }
        ));
    }

    #[test]
    fn test_duplicate_target_is_rejected() {
        let (_, models) = train(FeatureConfig::default());
        let doubled = vec![
            models.artifact(Target::Margin).clone(),
            models.artifact(Target::Total).clone(),
            models.artifact(Target::WinProbability).clone(),
            models.artifact(Target::Margin).clone(),
        ];
        let err = ModelSet::from_artifacts(doubled).unwrap_err();
        assert!(matches!(err, ForecastError::IncompatibleArtifact(ref msg) if msg.contains("margin")));

        // Order does not matter when each target appears once
        let shuffled = vec![
            models.artifact(Target::WinProbability).clone(),
            models.artifact(Target::Margin).clone(),
            models.artifact(Target::Total).clone(),
        ];
        let set = ModelSet::from_artifacts(shuffled).unwrap();
        for target in Target::ALL {
            assert_eq!(set.artifact(target).target, target);
        }
    }

    #[test]
    fn test_srs_models_forecast() {
        let features = FeatureConfig {
            rating_source: crate::features::RatingSource::Srs,
            ..FeatureConfig::default()
        };
        let (seasons, models) = train(features);
        assert_eq!(models.feature_spec().names[0], "srs_diff");
        let predictor = CalibratedPredictor::from_models(models);
        let late = date(2022, 12, 31);
        let strong = predictor
            .forecast_game(&seasons[3], &game("x1", 2022, late, "T0", "T7", None))
            .unwrap();
        let weak = predictor
            .forecast_game(&seasons[3], &game("x2", 2022, late, "T7", "T0", None))
            .unwrap();
        assert!(strong.margin > weak.margin);
        assert!(strong.home_win_probability > weak.home_win_probability);
    }

    #[test]
    fn test_unknown_team_with_roster() {
        let (seasons, models) = train(FeatureConfig::default());
        let roster: Vec<TeamId> = (0..8).map(|i| TeamId::new(format!("T{i}"))).collect();
        let predictor = CalibratedPredictor::from_models(models).with_known_teams(roster);
        let stranger = game("x", 2022, date(2022, 12, 31), "T0", "EXP", None);
        let err = predictor.forecast_game(&seasons[3], &stranger).unwrap_err();
        assert!(matches!(err, ForecastError::UnknownTeam { team, .. } if team == "EXP"));
    }
}
