//! External entry points over the game store and artifact store

use chrono::NaiveDate;

use crate::data::{ensure_chronological, ArtifactStore, Database, GameDataset, GameFeed};
use crate::features::{EloRatingEngine, FeatureBuilder, SeasonRatings, SrsTracker, TeamRating};
use crate::predict::{CalibratedPredictor, ModelSet};
use crate::training::{TrainingOutcome, ValidationPolicy, WalkForwardTrainer};
use crate::{Config, Forecast, ForecastError, Game, League, Result, SeasonRange, TeamId};

/// Which games to forecast
#[derive(Debug, Clone, PartialEq)]
pub enum GameSelector {
    Id(String),
    Week { league: League, season: i32, week: u32 },
}

pub struct ForecastService {
    config: Config,
    db: Database,
    store: ArtifactStore,
}

impl ForecastService {
    pub fn new(config: Config, db: Database, store: ArtifactStore) -> Self {
        ForecastService { config, db, store }
    }

    /// Open the database and model directory named in the config
    pub fn open(config: Config) -> Result<Self> {
        config.training.validate()?;
        let db = Database::open(&config.data.database_path)?;
        let store = ArtifactStore::new(&config.data.model_dir);
        Ok(Self::new(config, db, store))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.store
    }

    fn roster(&self, league: League) -> Result<Option<Vec<TeamId>>> {
        let teams = self.db.known_teams(league)?;
        Ok(if teams.is_empty() { None } else { Some(teams) })
    }

    fn engine(&self, league: League) -> Result<EloRatingEngine> {
        let engine = EloRatingEngine::new(self.config.elo);
        Ok(match self.roster(league)? {
            Some(teams) => engine.with_known_teams(teams),
            None => engine,
        })
    }

    fn builder(&self) -> FeatureBuilder {
        FeatureBuilder::new(self.config.elo, self.config.features)
    }

    /// Accept a date-ordered batch of games into the store
    pub fn supply(&self, games: &[Game]) -> Result<usize> {
        ensure_chronological(games)?;
        for game in games.iter().filter(|g| g.completed && !g.is_scored()) {
            log::warn!(
                "{}",
                ForecastError::DataIntegrity {
                    game_id: game.game_id.clone()
                }
            );
        }
        self.db.upsert_games(games)
    }

    /// A team's rating from games played strictly before `as_of`
    pub fn get_rating(
        &self,
        league: League,
        team: &TeamId,
        season: i32,
        as_of: NaiveDate,
    ) -> Result<TeamRating> {
        let games = self.db.supply(league, season)?;
        self.engine(league)?
            .timeline(&games)
            .rating_as_of(team, as_of)
            .ok_or_else(|| ForecastError::RatingNotFound {
                league,
                team: team.clone(),
                season,
                as_of,
            })
    }

    /// Run a full season pass and store the final ratings
    pub fn compute_ratings(&self, league: League, season: i32) -> Result<SeasonRatings> {
        let games = self.db.supply(league, season)?;
        let ratings = self.engine(league)?.process_season(&games);
        let rows: Vec<TeamRating> = ratings.ranked().into_iter().cloned().collect();
        self.db.upsert_ratings(league, &rows)?;
        log::info!(
            "Computed {} {} ratings for {} teams from {} games",
            league,
            season,
            rows.len(),
            ratings.games_processed
        );
        Ok(ratings)
    }

    /// Season SRS from every valid completed game, strongest first
    pub fn srs_ratings(&self, league: League, season: i32) -> Result<Vec<(TeamId, f64)>> {
        let games = self.db.supply(league, season)?;
        let mut state = self.engine(league)?.start_season();
        let mut srs = SrsTracker::new(self.config.features.srs);
        for game in &games {
            match state.apply(game) {
                Ok(true) => srs.add_game(game),
                Ok(false) => {}
                Err(e) => log::warn!("Skipping game {}: {}", game.game_id, e),
            }
        }
        let mut ranked: Vec<(TeamId, f64)> = srs.ratings().into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(ranked)
    }

    pub fn stored_ratings(&self, league: League, season: i32) -> Result<Vec<TeamRating>> {
        self.db.get_ratings(league, season)
    }

    /// Training samples for every season in the range
    pub fn build_dataset(&self, league: League, seasons: SeasonRange) -> Result<GameDataset> {
        let games = seasons
            .seasons()
            .map(|season| self.db.supply(league, season))
            .collect::<Result<Vec<_>>>()?;
        Ok(GameDataset::from_seasons(&games, &self.engine(league)?, &self.builder()))
    }

    /// Train and persist one artifact per target
    pub fn train(
        &self,
        league: League,
        seasons: SeasonRange,
        policy: Option<ValidationPolicy>,
    ) -> Result<TrainingOutcome> {
        let dataset = self.build_dataset(league, seasons)?;
        let trainer = WalkForwardTrainer::new(self.config.training.clone(), self.builder().spec());
        let policy = policy.unwrap_or_else(|| self.config.training.validation_policy());
        let outcome = trainer.fit_with_policy(league, seasons, &dataset.samples, &policy)?;
        for artifact in &outcome.artifacts {
            self.store.save(artifact)?;
        }
        Ok(outcome)
    }

    fn predictor(&self, league: League, seasons: Option<SeasonRange>) -> Result<CalibratedPredictor> {
        let seasons = match seasons {
            Some(range) => range,
            None => self.store.latest_range(league)?,
        };
        let models = ModelSet::load(&self.store, league, seasons)?;
        let predictor = CalibratedPredictor::new(models, &self.builder().spec())?;
        Ok(match self.roster(league)? {
            Some(teams) => predictor.with_known_teams(teams),
            None => predictor,
        })
    }

    /// Forecast the selected games and record each successful forecast.
    ///
    /// `seasons` picks the trained model range; the newest one by default.
    /// Per-game failures (e.g. a refused cold start) are returned in place.
    pub fn predict(
        &self,
        selector: &GameSelector,
        seasons: Option<SeasonRange>,
    ) -> Result<Vec<Result<Forecast>>> {
        let games = match selector {
            GameSelector::Id(id) => vec![self.db.get_game(id)?],
            GameSelector::Week {
                league,
                season,
                week,
            } => {
                let games = self.db.week_games(*league, *season, *week)?;
                if games.is_empty() {
                    return Err(ForecastError::GameNotFound(format!(
                        "{} {} week {}",
                        league, season, week
                    )));
                }
                games
            }
        };

        // A selector never spans seasons
        let (league, season) = (games[0].league, games[0].season);
        let predictor = self.predictor(league, seasons)?;
        let version = predictor.models().version_tag();
        let season_games = self.db.supply(league, season)?;

        let mut forecasts = Vec::with_capacity(games.len());
        for game in &games {
            let forecast = predictor.forecast_game(&season_games, game);
            match &forecast {
                Ok(f) => {
                    self.db.record_forecast(f, &version)?;
                }
                Err(e) => log::warn!("No forecast for {}: {}", game.game_id, e),
            }
            forecasts.push(forecast);
        }
        Ok(forecasts)
    }
}
