//! Training samples built from season passes
//!
//! Each season is walked in date order. All games on a date are featurized
//! from the state left by earlier dates, then applied, so a sample never sees
//! its own result or anything played the same day.

use chrono::NaiveDate;
use ndarray::{Array1, Array2};
use rayon::prelude::*;

use crate::features::{EloRatingEngine, FeatureBuilder, FeatureVector};
use crate::model::Target;
use crate::{ForecastError, Game};

/// One completed game with its pre-game features and labels
#[derive(Debug, Clone)]
pub struct Sample {
    pub game_id: String,
    pub season: i32,
    pub date: NaiveDate,
    pub features: FeatureVector,
    pub margin: f64,
    pub total: f64,
    /// Home outcome: 1 = win, 0.5 = tie, 0 = loss
    pub outcome: f64,
    /// Built with league-average placeholders for an under-history team
    pub cold_start: bool,
}

impl Sample {
    pub fn label(&self, target: Target) -> f64 {
        match target {
            Target::Margin => self.margin,
            Target::Total => self.total,
            Target::WinProbability => self.outcome,
        }
    }
}

/// Samples plus the games that could not become samples
#[derive(Debug, Default)]
pub struct GameDataset {
    pub samples: Vec<Sample>,
    /// Integrity/reference problems and cold-start exclusions
    pub excluded: Vec<ForecastError>,
}

impl GameDataset {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Build one season; `games` must already be in date order
    pub fn from_season(games: &[Game], engine: &EloRatingEngine, builder: &FeatureBuilder) -> Self {
        let mut state = builder.start_season(engine);
        let mut dataset = GameDataset::default();

        for day in games.chunk_by(|a, b| a.date == b.date) {
            let date = day[0].date;
            let rating_snapshot = state.ratings(date);
            let stats_snapshot = state.stats(date);

            for game in day.iter().filter(|g| g.is_scored()) {
                // Rejected again when applied below, which records the error
                if state.check_references(game).is_err() {
                    continue;
                }
                match builder.build(game, &rating_snapshot, &stats_snapshot) {
                    Ok(built) => dataset.samples.push(Sample {
                        game_id: game.game_id.clone(),
                        season: game.season,
                        date: game.date,
                        features: built.vector,
                        margin: game.margin().unwrap_or_default(),
                        total: game.total().unwrap_or_default(),
                        outcome: game.home_outcome().unwrap_or_default(),
                        cold_start: built.is_cold_start(),
                    }),
                    Err(e) => {
                        log::debug!("Excluding game {}: {}", game.game_id, e);
                        dataset.excluded.push(e);
                    }
                }
            }

            for game in day {
                if let Err(e) = state.apply(game) {
                    log::warn!("Skipping game {}: {}", game.game_id, e);
                    dataset.excluded.push(e);
                }
            }
        }
        dataset
    }

    /// Build several seasons in parallel; output keeps the input season order
    pub fn from_seasons(
        seasons: &[Vec<Game>],
        engine: &EloRatingEngine,
        builder: &FeatureBuilder,
    ) -> Self {
        let parts: Vec<GameDataset> = seasons
            .par_iter()
            .map(|games| Self::from_season(games, engine, builder))
            .collect();

        let mut dataset = GameDataset::default();
        for part in parts {
            dataset.samples.extend(part.samples);
            dataset.excluded.extend(part.excluded);
        }
        log::info!(
            "Created dataset with {} samples ({} games excluded)",
            dataset.samples.len(),
            dataset.excluded.len()
        );
        dataset
    }
}

/// Feature matrix for a set of samples
pub fn feature_matrix(samples: &[&Sample]) -> Array2<f64> {
    let mut x = Array2::zeros((samples.len(), FeatureVector::DIM));
    for (i, sample) in samples.iter().enumerate() {
        for (j, value) in sample.features.values().iter().enumerate() {
            x[[i, j]] = *value;
        }
    }
    x
}

/// Label vector for one target
pub fn label_vector(samples: &[&Sample], target: Target) -> Array1<f64> {
    samples.iter().map(|s| s.label(target)).collect()
}

#[cfg(test)]
mod tests {
    use chrono::Datelike;

    use super::*;
    use crate::features::{ColdStartPolicy, EloConfig, FeatureConfig, RatingSource};
    use crate::TeamId;
    use crate::test_support::{date, game};

    fn builder(policy: ColdStartPolicy, min_games: u32) -> FeatureBuilder {
        FeatureBuilder::new(
            EloConfig::default(),
            FeatureConfig {
                min_games,
                rolling_window: 4,
                cold_start: policy,
                ..FeatureConfig::default()
            },
        )
    }

    fn season() -> Vec<Game> {
        vec![
            game("g1", 2023, date(2023, 9, 10), "A", "B", Some((21, 14))),
            game("g2", 2023, date(2023, 9, 10), "C", "D", Some((10, 13))),
            game("g3", 2023, date(2023, 9, 17), "A", "C", Some((24, 24))),
            game("g4", 2023, date(2023, 9, 17), "B", "D", Some((7, 27))),
            game("g5", 2023, date(2023, 9, 24), "D", "A", None),
        ]
    }

    #[test]
    fn test_same_day_games_do_not_see_each_other() {
        let dataset = GameDataset::from_season(
            &season(),
            &EloRatingEngine::default(),
            &builder(ColdStartPolicy::LeagueAverage, 0),
        );
        assert_eq!(dataset.len(), 4);

        // Opening-day games are built from base ratings only
        for sample in &dataset.samples[..2] {
            assert_eq!(sample.features.get("elo_diff"), Some(55.0));
            assert_eq!(sample.features.get("point_diff_diff"), Some(0.0));
        }
        // Week two reflects week one only
        let g3 = &dataset.samples[2];
        assert_eq!(g3.game_id, "g3");
        assert!(g3.features.get("elo_diff").unwrap() > 55.0);
        assert_eq!(g3.outcome, 0.5);
        assert_eq!(g3.margin, 0.0);
        assert_eq!(g3.total, 48.0);
    }

    #[test]
    fn test_exclude_policy_drops_cold_start_games() {
        let dataset = GameDataset::from_season(
            &season(),
            &EloRatingEngine::default(),
            &builder(ColdStartPolicy::Exclude, 1),
        );
        // Week one teams have no prior games
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.excluded.len(), 2);
        assert!(dataset.samples.iter().all(|s| !s.cold_start));
    }

    #[test]
    fn test_integrity_problems_are_recorded() {
        let mut games = season();
        games[1].home_score = None;
        let dataset = GameDataset::from_season(
            &games,
            &EloRatingEngine::default(),
            &builder(ColdStartPolicy::LeagueAverage, 0),
        );
        assert_eq!(dataset.len(), 3);
        assert!(dataset
            .excluded
            .iter()
            .any(|e| matches!(e, ForecastError::DataIntegrity { game_id } if game_id == "g2")));
    }

    #[test]
    fn test_matrix_shapes() {
        let dataset = GameDataset::from_season(
            &season(),
            &EloRatingEngine::default(),
            &builder(ColdStartPolicy::LeagueAverage, 0),
        );
        let refs: Vec<&Sample> = dataset.samples.iter().collect();
        let x = feature_matrix(&refs);
        assert_eq!(x.dim(), (4, FeatureVector::DIM));
        let y = label_vector(&refs, Target::Total);
        assert_eq!(y[0], 35.0);
        assert_eq!(x[[0, 0]], 55.0);
    }

    #[test]
    fn test_seasons_keep_order() {
        let mut next = season();
        for g in &mut next {
            g.season = 2024;
            g.game_id = format!("n{}", g.game_id);
            g.date = g.date.with_year(2024).unwrap();
        }
        let dataset = GameDataset::from_seasons(
            &[season(), next],
            &EloRatingEngine::default(),
            &builder(ColdStartPolicy::LeagueAverage, 0),
        );
        assert_eq!(dataset.len(), 8);
        assert_eq!(dataset.samples[0].season, 2023);
        assert_eq!(dataset.samples[7].season, 2024);
        // Ratings reset for the new season
        assert_eq!(dataset.samples[4].features.get("elo_diff"), Some(55.0));
    }

    #[test]
    fn test_unknown_team_game_is_not_a_sample() {
        let games = vec![
            game("g1", 2023, date(2023, 9, 10), "A", "B", Some((21, 7))),
            game("g2", 2023, date(2023, 9, 17), "A", "ZZ", Some((10, 3))),
        ];
        let engine = EloRatingEngine::default().with_known_teams([TeamId::new("A"), TeamId::new("B")]);
        let dataset = GameDataset::from_season(
            &games,
            &engine,
            &builder(ColdStartPolicy::LeagueAverage, 0),
        );

        let ids: Vec<&str> = dataset.samples.iter().map(|s| s.game_id.as_str()).collect();
        assert_eq!(ids, ["g1"]);
        assert_eq!(dataset.excluded.len(), 1);
        assert!(matches!(
            &dataset.excluded[0],
            ForecastError::UnknownTeam { team, game_id } if team == "ZZ" && game_id == "g2"
        ));
    }

    #[test]
    fn test_srs_source_dataset() {
        let srs = FeatureBuilder::new(
            EloConfig::default(),
            FeatureConfig {
                min_games: 0,
                rating_source: RatingSource::Srs,
                ..FeatureConfig::default()
            },
        );
        let dataset = GameDataset::from_season(&season(), &EloRatingEngine::default(), &srs);
        assert_eq!(dataset.len(), 4);
        // Nobody has played on opening day
        assert_eq!(dataset.samples[0].features.get("srs_diff"), Some(0.0));
        // Week two: A (+7 over B) hosts C (-3 against D)
        let g3 = &dataset.samples[2];
        assert_eq!(g3.game_id, "g3");
        assert!(g3.features.get("srs_diff").unwrap() > 0.0);
        assert_eq!(g3.features.get("elo_diff"), None);
    }
}
