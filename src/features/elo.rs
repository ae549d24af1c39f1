//! Elo rating system for team strength estimation
//!
//! Ratings are season-scoped: every team starts a season at the base rating
//! and is updated once per completed game, in date order. Stored ratings never
//! include the home-advantage offset; it is applied only when computing the
//! expected score.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{ForecastError, Game, Result, TeamId};

/// Elo rating configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EloConfig {
    /// K-factor: how much ratings change per game
    pub k_factor: f64,
    /// Home advantage in rating points
    pub home_advantage: f64,
    /// Rating every team starts each season with
    pub base_rating: f64,
}

impl Default for EloConfig {
    fn default() -> Self {
        EloConfig {
            k_factor: 20.0,
            home_advantage: 55.0,
            base_rating: 1500.0,
        }
    }
}

impl EloConfig {
    /// Rating offset granted to the home side (none at a neutral site)
    pub fn home_offset(&self, neutral_site: bool) -> f64 {
        if neutral_site {
            0.0
        } else {
            self.home_advantage
        }
    }

    /// Compute expected score (0-1) for the home team
    pub fn expected_home(&self, home_rating: f64, away_rating: f64, neutral_site: bool) -> f64 {
        let home = home_rating + self.home_offset(neutral_site);
        1.0 / (1.0 + 10.0_f64.powf((away_rating - home) / 400.0))
    }
}

/// Rating state for one team during a season pass
#[derive(Debug, Clone, PartialEq)]
pub struct TeamRatingState {
    pub team_id: TeamId,
    pub season: i32,
    pub current_rating: f64,
    pub games_count: u32,
    pub last_game: Option<NaiveDate>,
}

impl TeamRatingState {
    fn new(team_id: TeamId, season: i32, base_rating: f64) -> Self {
        TeamRatingState {
            team_id,
            season,
            current_rating: base_rating,
            games_count: 0,
            last_game: None,
        }
    }

    fn reset(&mut self, season: i32, base_rating: f64) {
        self.season = season;
        self.current_rating = base_rating;
        self.games_count = 0;
        self.last_game = None;
    }

    /// Freeze the state into a snapshot
    pub fn snapshot(&self, as_of_date: Option<NaiveDate>) -> TeamRating {
        TeamRating {
            team_id: self.team_id.clone(),
            season: self.season,
            rating: self.current_rating,
            games_count: self.games_count,
            as_of_date,
        }
    }
}

/// Frozen rating of a team at a point in a season
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRating {
    pub team_id: TeamId,
    pub season: i32,
    pub rating: f64,
    pub games_count: u32,
    /// Date of the last game applied in the pass, or the cutoff when one was given
    pub as_of_date: Option<NaiveDate>,
}

/// Pre-game rating of one team inside a [`RatingsSnapshot`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotRating {
    pub rating: f64,
    pub games_count: u32,
    /// Date of the most recent game folded into this rating
    pub last_game: Option<NaiveDate>,
}

/// Ratings of every team as they stood before a date
#[derive(Debug, Clone)]
pub struct RatingsSnapshot {
    pub as_of: NaiveDate,
    base_rating: f64,
    ratings: HashMap<TeamId, SnapshotRating>,
}

impl RatingsSnapshot {
    pub fn new(as_of: NaiveDate, base_rating: f64) -> Self {
        RatingsSnapshot {
            as_of,
            base_rating,
            ratings: HashMap::new(),
        }
    }

    pub fn insert(&mut self, team: TeamId, rating: SnapshotRating) {
        self.ratings.insert(team, rating);
    }

    /// Rating for a team; teams without a game yet sit at the base rating
    pub fn get(&self, team: &TeamId) -> SnapshotRating {
        self.ratings.get(team).copied().unwrap_or(SnapshotRating {
            rating: self.base_rating,
            games_count: 0,
            last_game: None,
        })
    }

    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }
}

/// Mutable rating state owned by a single season pass
#[derive(Debug, Clone)]
pub struct SeasonState {
    config: EloConfig,
    known_teams: Option<HashSet<TeamId>>,
    teams: HashMap<TeamId, TeamRatingState>,
    /// Season of the most recent game applied or team registered
    season: Option<i32>,
    last_applied: Option<NaiveDate>,
}

impl SeasonState {
    pub fn new(config: EloConfig) -> Self {
        SeasonState {
            config,
            known_teams: None,
            teams: HashMap::new(),
            season: None,
            last_applied: None,
        }
    }

    /// Restrict updates to a roster; games naming other teams are rejected
    pub fn with_known_teams(mut self, teams: HashSet<TeamId>) -> Self {
        self.known_teams = Some(teams);
        self
    }

    /// Drop all team state; the next game starts everyone from the base rating
    pub fn reset(&mut self) {
        self.teams.clear();
        self.season = None;
        self.last_applied = None;
    }

    /// Current state of a team, if it has appeared in this pass
    pub fn team(&self, team: &TeamId) -> Option<&TeamRatingState> {
        self.teams.get(team)
    }

    /// Date of the last game applied
    pub fn last_applied(&self) -> Option<NaiveDate> {
        self.last_applied
    }

    /// Register a team at the base rating without playing a game
    pub fn register(&mut self, team: &TeamId, season: i32) {
        self.team_mut(team, season);
        self.season = Some(season);
    }

    fn team_mut(&mut self, team: &TeamId, season: i32) -> &mut TeamRatingState {
        let base = self.config.base_rating;
        let state = self
            .teams
            .entry(team.clone())
            .or_insert_with(|| TeamRatingState::new(team.clone(), season, base));
        if state.season != season {
            state.reset(season, base);
        }
        state
    }

    /// Reject a game naming a blank team or one outside the roster
    pub fn check_references(&self, game: &Game) -> Result<()> {
        self.check_reference(&game.home_team, game)?;
        self.check_reference(&game.away_team, game)
    }

    fn check_reference(&self, team: &TeamId, game: &Game) -> Result<()> {
        let known = self
            .known_teams
            .as_ref()
            .map_or(true, |roster| roster.contains(team));
        if team.as_str().trim().is_empty() || !known {
            return Err(ForecastError::UnknownTeam {
                team: team.to_string(),
                game_id: game.game_id.clone(),
            });
        }
        Ok(())
    }

    /// Apply one game. Returns `Ok(false)` for games that are not completed.
    pub fn apply(&mut self, game: &Game) -> Result<bool> {
        if !game.completed {
            return Ok(false);
        }
        let home_actual = game.home_outcome().ok_or_else(|| ForecastError::DataIntegrity {
            game_id: game.game_id.clone(),
        })?;
        self.check_references(game)?;

        let home_rating = self.team_mut(&game.home_team, game.season).current_rating;
        let away_rating = self.team_mut(&game.away_team, game.season).current_rating;
        let home_expected = self
            .config
            .expected_home(home_rating, away_rating, game.neutral_site);

        let k = self.config.k_factor;
        let home_new = home_rating + k * (home_actual - home_expected);
        let away_new = away_rating + k * ((1.0 - home_actual) - (1.0 - home_expected));

        for (team, rating) in [(&game.home_team, home_new), (&game.away_team, away_new)] {
            let state = self.team_mut(team, game.season);
            state.current_rating = rating;
            state.games_count += 1;
            state.last_game = Some(game.date);
        }
        self.season = Some(game.season);
        self.last_applied = Some(game.date);
        Ok(true)
    }

    /// Ratings as they stand now, labelled as of `as_of`. Teams last seen in
    /// an earlier season are left out and read back at the base rating.
    pub fn snapshot(&self, as_of: NaiveDate) -> RatingsSnapshot {
        let mut snapshot = RatingsSnapshot::new(as_of, self.config.base_rating);
        let current = |state: &&TeamRatingState| self.season.map_or(true, |s| state.season == s);
        for (team, state) in self.teams.iter().filter(|(_, state)| current(state)) {
            snapshot.insert(
                team.clone(),
                SnapshotRating {
                    rating: state.current_rating,
                    games_count: state.games_count,
                    last_game: state.last_game,
                },
            );
        }
        snapshot
    }

    fn into_ratings(self, as_of_date: Option<NaiveDate>) -> HashMap<TeamId, TeamRating> {
        self.teams
            .into_iter()
            .map(|(team, state)| (team, state.snapshot(as_of_date)))
            .collect()
    }
}

/// Result of processing one season
#[derive(Debug, Default)]
pub struct SeasonRatings {
    pub ratings: HashMap<TeamId, TeamRating>,
    /// Games that were skipped, with the reason
    pub issues: Vec<ForecastError>,
    pub games_processed: usize,
}

impl SeasonRatings {
    pub fn get(&self, team: &TeamId) -> Option<&TeamRating> {
        self.ratings.get(team)
    }

    /// Ratings sorted from strongest to weakest
    pub fn ranked(&self) -> Vec<&TeamRating> {
        let mut ranked: Vec<_> = self.ratings.values().collect();
        ranked.sort_by(|a, b| {
            b.rating
                .total_cmp(&a.rating)
                .then_with(|| a.team_id.cmp(&b.team_id))
        });
        ranked
    }
}

/// Season-pass driver
#[derive(Debug, Clone, Default)]
pub struct EloRatingEngine {
    config: EloConfig,
    known_teams: Option<HashSet<TeamId>>,
}

impl EloRatingEngine {
    pub fn new(config: EloConfig) -> Self {
        EloRatingEngine {
            config,
            known_teams: None,
        }
    }

    /// Known-team roster; unknown references become errors instead of new teams
    pub fn with_known_teams(mut self, teams: impl IntoIterator<Item = TeamId>) -> Self {
        self.known_teams = Some(teams.into_iter().collect());
        self
    }

    pub fn config(&self) -> &EloConfig {
        &self.config
    }

    /// Fresh state for one season pass
    pub fn start_season(&self) -> SeasonState {
        let state = SeasonState::new(self.config);
        match &self.known_teams {
            Some(roster) => state.with_known_teams(roster.clone()),
            None => state,
        }
    }

    /// Process a date-ordered season and return final ratings
    pub fn process_season(&self, games: &[Game]) -> SeasonRatings {
        self.run(games, None)
    }

    /// Process only games dated strictly before `cutoff`
    pub fn process_season_until(&self, games: &[Game], cutoff: NaiveDate) -> SeasonRatings {
        self.run(games, Some(cutoff))
    }

    /// Independent season passes, run in parallel
    pub fn process_seasons(&self, seasons: &[Vec<Game>]) -> Vec<SeasonRatings> {
        seasons
            .par_iter()
            .map(|games| self.process_season(games))
            .collect()
    }

    fn run(&self, games: &[Game], cutoff: Option<NaiveDate>) -> SeasonRatings {
        let mut state = self.start_season();
        let mut issues = Vec::new();
        let mut games_processed = 0;

        let before_cutoff = |game: &&Game| cutoff.map_or(true, |c| game.date < c);
        for game in games.iter().take_while(before_cutoff) {
            match state.apply(game) {
                Ok(true) => games_processed += 1,
                Ok(false) => {}
                Err(e) => {
                    log::warn!("Skipping game {}: {}", game.game_id, e);
                    issues.push(e);
                }
            }
        }

        // Teams named anywhere in the season (and the roster) report a rating,
        // even without a completed game.
        if let Some(season) = games.first().map(|g| g.season) {
            for team in self.season_teams(games) {
                if state.team(&team).is_none() {
                    state.register(&team, season);
                }
            }
        }

        let as_of_date = cutoff.or(state.last_applied());
        log::debug!(
            "Season pass applied {} games ({} skipped)",
            games_processed,
            issues.len()
        );
        SeasonRatings {
            ratings: state.into_ratings(as_of_date),
            issues,
            games_processed,
        }
    }

    /// Referenced teams that pass the roster, plus the roster itself
    fn season_teams(&self, games: &[Game]) -> Vec<TeamId> {
        let mut teams: Vec<TeamId> = games
            .iter()
            .flat_map(|g| [&g.home_team, &g.away_team])
            .filter(|t| !t.as_str().trim().is_empty())
            .filter(|t| self.known_teams.as_ref().map_or(true, |r| r.contains(*t)))
            .cloned()
            .collect();
        teams.extend(self.known_teams.iter().flatten().cloned());
        teams.sort();
        teams.dedup();
        teams
    }

    /// Full season pass that keeps every post-game state
    pub fn timeline(&self, games: &[Game]) -> RatingTimeline {
        let mut state = self.start_season();
        let mut timeline = RatingTimeline {
            base_rating: self.config.base_rating,
            season: games.first().map(|g| g.season),
            entries: HashMap::new(),
        };
        for team in self.season_teams(games) {
            timeline.entries.insert(team, Vec::new());
        }

        for game in games {
            match state.apply(game) {
                Ok(true) => {
                    for team in [&game.home_team, &game.away_team] {
                        if let Some(s) = state.team(team) {
                            timeline.entries.entry(team.clone()).or_default().push(TimelineEntry {
                                date: game.date,
                                rating: s.current_rating,
                                games_count: s.games_count,
                            });
                        }
                    }
                }
                Ok(false) => {}
                Err(e) => log::warn!("Skipping game {}: {}", game.game_id, e),
            }
        }
        timeline
    }
}

/// A team's rating right after one of its games
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelineEntry {
    pub date: NaiveDate,
    pub rating: f64,
    pub games_count: u32,
}

/// Every post-game rating of a season, per team, in date order
#[derive(Debug, Clone)]
pub struct RatingTimeline {
    base_rating: f64,
    season: Option<i32>,
    entries: HashMap<TeamId, Vec<TimelineEntry>>,
}

impl RatingTimeline {
    /// Rating from games played strictly before `date`.
    ///
    /// `None` when the team never appears in the season.
    pub fn rating_as_of(&self, team: &TeamId, date: NaiveDate) -> Option<TeamRating> {
        let season = self.season?;
        let entries = self.entries.get(team)?;
        let played = entries.partition_point(|e| e.date < date);
        let (rating, games_count) = match played.checked_sub(1).map(|i| entries[i]) {
            Some(entry) => (entry.rating, entry.games_count),
            None => (self.base_rating, 0),
        };
        Some(TeamRating {
            team_id: team.clone(),
            season,
            rating,
            games_count,
            as_of_date: Some(date),
        })
    }

    pub fn history(&self, team: &TeamId) -> &[TimelineEntry] {
        self.entries.get(team).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn teams(&self) -> impl Iterator<Item = &TeamId> {
        self.entries.keys()
    }
}
