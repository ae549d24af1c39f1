//! Team statistics computation
//!
//! Rolling scoring and defensive form for teams within a season.

use std::collections::{HashMap, VecDeque};

use chrono::NaiveDate;

use crate::{Game, TeamId};

/// One team's line from a completed game
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GameLine {
    pub date: NaiveDate,
    pub points_for: f64,
    pub points_against: f64,
}

impl GameLine {
    pub fn margin(&self) -> f64 {
        self.points_for - self.points_against
    }
}

/// Averages over a window of games
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FormSummary {
    pub avg_points_for: f64,
    pub avg_points_against: f64,
    pub avg_margin: f64,
}

impl FormSummary {
    /// Summary where a team scores and allows the same average
    pub fn league_average(points_per_game: f64) -> Self {
        FormSummary {
            avg_points_for: points_per_game,
            avg_points_against: points_per_game,
            avg_margin: 0.0,
        }
    }

    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a GameLine>) -> Option<Self> {
        let mut count = 0usize;
        let mut points_for = 0.0;
        let mut points_against = 0.0;
        for line in lines {
            count += 1;
            points_for += line.points_for;
            points_against += line.points_against;
        }
        if count == 0 {
            return None;
        }
        let n = count as f64;
        Some(FormSummary {
            avg_points_for: points_for / n,
            avg_points_against: points_against / n,
            avg_margin: (points_for - points_against) / n,
        })
    }
}

/// A team's season so far: games played plus the most recent lines
#[derive(Debug, Clone, Default)]
pub struct TeamForm {
    /// Completed games this season
    pub games_played: u32,
    /// Most recent games, oldest first, capped at the rolling window
    pub recent: VecDeque<GameLine>,
}

impl TeamForm {
    pub fn summary(&self) -> Option<FormSummary> {
        FormSummary::from_lines(self.recent.iter())
    }

    /// Date of the most recent game in the window
    pub fn latest(&self) -> Option<NaiveDate> {
        self.recent.back().map(|l| l.date)
    }
}

/// Rolling form of every team as it stood before a date
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub as_of: NaiveDate,
    teams: HashMap<TeamId, TeamForm>,
    league_points: f64,
    league_team_games: u32,
    league_latest: Option<NaiveDate>,
}

impl StatsSnapshot {
    pub fn empty(as_of: NaiveDate) -> Self {
        StatsSnapshot {
            as_of,
            teams: HashMap::new(),
            league_points: 0.0,
            league_team_games: 0,
            league_latest: None,
        }
    }

    /// Form for a team (empty if it has not played)
    pub fn form(&self, team: &TeamId) -> TeamForm {
        self.teams.get(team).cloned().unwrap_or_default()
    }

    pub fn insert(&mut self, team: TeamId, form: TeamForm) {
        self.teams.insert(team, form);
    }

    /// Points per team per game across all prior games
    pub fn league_points_per_game(&self) -> Option<f64> {
        if self.league_team_games == 0 {
            None
        } else {
            Some(self.league_points / self.league_team_games as f64)
        }
    }

    /// Date of the latest game folded into the league average
    pub fn league_latest(&self) -> Option<NaiveDate> {
        self.league_latest
    }
}

/// Compute rolling statistics with a limited window
#[derive(Debug, Clone)]
pub struct RollingStatistics {
    /// Window size (number of recent games)
    window: usize,
    teams: HashMap<TeamId, TeamForm>,
    league_points: f64,
    league_team_games: u32,
    league_latest: Option<NaiveDate>,
}

impl RollingStatistics {
    /// Create new rolling statistics with given window size
    pub fn new(window: usize) -> Self {
        RollingStatistics {
            window: window.max(1),
            teams: HashMap::new(),
            league_points: 0.0,
            league_team_games: 0,
            league_latest: None,
        }
    }

    /// Add a completed game to both teams' windows
    pub fn add_game(&mut self, game: &Game) {
        let Some((home_score, away_score)) = game.final_score() else {
            return;
        };
        let (home_score, away_score) = (home_score as f64, away_score as f64);

        self.push(&game.home_team, game.date, home_score, away_score);
        self.push(&game.away_team, game.date, away_score, home_score);

        self.league_points += home_score + away_score;
        self.league_team_games += 2;
        self.league_latest = Some(game.date);
    }

    fn push(&mut self, team: &TeamId, date: NaiveDate, points_for: f64, points_against: f64) {
        let form = self.teams.entry(team.clone()).or_default();
        form.games_played += 1;
        form.recent.push_back(GameLine {
            date,
            points_for,
            points_against,
        });
        if form.recent.len() > self.window {
            form.recent.pop_front();
        }
    }

    /// Get number of games played by a team
    pub fn games_played(&self, team: &TeamId) -> u32 {
        self.teams.get(team).map(|f| f.games_played).unwrap_or(0)
    }

    /// Current form of every team, labelled as of `as_of`
    pub fn snapshot(&self, as_of: NaiveDate) -> StatsSnapshot {
        StatsSnapshot {
            as_of,
            teams: self.teams.clone(),
            league_points: self.league_points,
            league_team_games: self.league_team_games,
            league_latest: self.league_latest,
        }
    }
}
