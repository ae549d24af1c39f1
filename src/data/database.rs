//! SQLite storage for games, ratings and forecasts

use crate::features::TeamRating;
use crate::{ForecastError, Forecast, Game, League, Result, TeamId};
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Database connection and operations
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS teams (
                league TEXT NOT NULL,
                team_id TEXT NOT NULL,
                name TEXT,
                PRIMARY KEY (league, team_id)
            );

            CREATE TABLE IF NOT EXISTS games (
                game_id TEXT PRIMARY KEY,
                league TEXT NOT NULL,
                season INTEGER NOT NULL,
                week INTEGER NOT NULL,
                date TEXT NOT NULL,
                home_team TEXT NOT NULL,
                away_team TEXT NOT NULL,
                home_score INTEGER,
                away_score INTEGER,
                completed INTEGER NOT NULL DEFAULT 0,
                neutral_site INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS team_ratings (
                league TEXT NOT NULL,
                team_id TEXT NOT NULL,
                season INTEGER NOT NULL,
                rating REAL NOT NULL,
                games_count INTEGER NOT NULL,
                as_of_date TEXT,
                PRIMARY KEY (league, team_id, season)
            );

            CREATE TABLE IF NOT EXISTS forecasts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                game_id TEXT NOT NULL,
                margin REAL NOT NULL,
                margin_lower REAL NOT NULL,
                margin_upper REAL NOT NULL,
                total REAL NOT NULL,
                total_lower REAL NOT NULL,
                total_upper REAL NOT NULL,
                home_win_prob REAL NOT NULL,
                warnings TEXT NOT NULL DEFAULT '[]',
                model_version TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_games_season ON games(league, season, date);
            CREATE INDEX IF NOT EXISTS idx_forecasts_game ON forecasts(game_id);
            "#,
        )?;
        Ok(())
    }

    // ==================== Team Operations ====================

    /// Add a team to a league roster
    pub fn upsert_team(&self, league: League, team: &TeamId, name: Option<&str>) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO teams (league, team_id, name) VALUES (?1, ?2, ?3)
            ON CONFLICT(league, team_id) DO UPDATE SET name = COALESCE(excluded.name, name)
            "#,
            params![league.code(), team.as_str(), name],
        )?;
        Ok(())
    }

    /// Roster for a league; empty when none was imported
    pub fn league_teams(&self, league: League) -> Result<Vec<TeamId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT team_id FROM teams WHERE league = ?1 ORDER BY team_id")?;
        let teams = stmt
            .query_map(params![league.code()], |row| Ok(TeamId(row.get(0)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(teams)
    }

    // ==================== Game Operations ====================

    /// Insert or update a game by id
    pub fn upsert_game(&self, game: &Game) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO games (game_id, league, season, week, date, home_team, away_team,
                               home_score, away_score, completed, neutral_site)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(game_id) DO UPDATE SET
                league = excluded.league,
                season = excluded.season,
                week = excluded.week,
                date = excluded.date,
                home_team = excluded.home_team,
                away_team = excluded.away_team,
                home_score = COALESCE(excluded.home_score, home_score),
                away_score = COALESCE(excluded.away_score, away_score),
                completed = MAX(completed, excluded.completed),
                neutral_site = excluded.neutral_site
            "#,
            params![
                game.game_id,
                game.league.code(),
                game.season,
                game.week,
                game.date.format(DATE_FORMAT).to_string(),
                game.home_team.as_str(),
                game.away_team.as_str(),
                game.home_score,
                game.away_score,
                game.completed,
                game.neutral_site,
            ],
        )?;
        Ok(())
    }

    /// Insert multiple games in one transaction
    pub fn upsert_games(&self, games: &[Game]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut count = 0;
        for game in games {
            self.upsert_game(game)?;
            count += 1;
        }
        tx.commit()?;
        Ok(count)
    }

    pub fn get_game(&self, game_id: &str) -> Result<Game> {
        self.conn
            .query_row(
                &format!("{} WHERE game_id = ?1", Self::GAME_SELECT),
                params![game_id],
                Self::row_to_game,
            )
            .optional()?
            .ok_or_else(|| ForecastError::GameNotFound(game_id.to_string()))
    }

    /// All games of a season in chronological order
    pub fn season_games(&self, league: League, season: i32) -> Result<Vec<Game>> {
        self.games_query(
            &format!(
                "{} WHERE league = ?1 AND season = ?2 ORDER BY date, game_id",
                Self::GAME_SELECT
            ),
            params![league.code(), season],
        )
    }

    /// Games scheduled in one week of a season
    pub fn week_games(&self, league: League, season: i32, week: u32) -> Result<Vec<Game>> {
        self.games_query(
            &format!(
                "{} WHERE league = ?1 AND season = ?2 AND week = ?3 ORDER BY date, game_id",
                Self::GAME_SELECT
            ),
            params![league.code(), season, week],
        )
    }

    /// Seasons with at least one stored game, ascending
    pub fn league_seasons(&self, league: League) -> Result<Vec<i32>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT season FROM games WHERE league = ?1 ORDER BY season")?;
        let seasons = stmt
            .query_map(params![league.code()], |row| row.get(0))?
            .collect::<std::result::Result<Vec<i32>, _>>()?;
        Ok(seasons)
    }

    const GAME_SELECT: &'static str = "SELECT game_id, league, season, week, date, home_team, away_team,
                home_score, away_score, completed, neutral_site
         FROM games";

    fn games_query(&self, query: &str, params: impl rusqlite::Params) -> Result<Vec<Game>> {
        let mut stmt = self.conn.prepare(query)?;
        let games = stmt
            .query_map(params, Self::row_to_game)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(games)
    }

    fn row_to_game(row: &rusqlite::Row) -> rusqlite::Result<Game> {
        let league_code: String = row.get(1)?;
        let league = League::from_code(&league_code).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                Type::Text,
                Box::new(ForecastError::Parse(format!("unknown league {league_code}"))),
            )
        })?;
        let date_str: String = row.get(4)?;

        Ok(Game {
            game_id: row.get(0)?,
            league,
            season: row.get(2)?,
            week: row.get(3)?,
            date: parse_date(4, &date_str)?,
            home_team: TeamId(row.get(5)?),
            away_team: TeamId(row.get(6)?),
            home_score: row.get(7)?,
            away_score: row.get(8)?,
            completed: row.get(9)?,
            neutral_site: row.get(10)?,
        })
    }

    // ==================== Rating Operations ====================

    /// Store end-of-pass ratings for a league season
    pub fn upsert_ratings(&self, league: League, ratings: &[TeamRating]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        for rating in ratings {
            self.conn.execute(
                r#"
                INSERT INTO team_ratings (league, team_id, season, rating, games_count, as_of_date)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(league, team_id, season) DO UPDATE SET
                    rating = excluded.rating,
                    games_count = excluded.games_count,
                    as_of_date = excluded.as_of_date
                "#,
                params![
                    league.code(),
                    rating.team_id.as_str(),
                    rating.season,
                    rating.rating,
                    rating.games_count,
                    rating.as_of_date.map(|d| d.format(DATE_FORMAT).to_string()),
                ],
            )?;
        }
        tx.commit()?;
        Ok(ratings.len())
    }

    /// Stored ratings for a season, strongest first
    pub fn get_ratings(&self, league: League, season: i32) -> Result<Vec<TeamRating>> {
        let mut stmt = self.conn.prepare(
            "SELECT team_id, season, rating, games_count, as_of_date
             FROM team_ratings
             WHERE league = ?1 AND season = ?2
             ORDER BY rating DESC, team_id",
        )?;
        let ratings = stmt
            .query_map(params![league.code(), season], |row| {
                let as_of: Option<String> = row.get(4)?;
                Ok(TeamRating {
                    team_id: TeamId(row.get(0)?),
                    season: row.get(1)?,
                    rating: row.get(2)?,
                    games_count: row.get(3)?,
                    as_of_date: as_of.map(|s| parse_date(4, &s)).transpose()?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ratings)
    }

    // ==================== Forecast Operations ====================

    /// Record a served forecast
    pub fn record_forecast(&self, forecast: &Forecast, model_version: &str) -> Result<i64> {
        let warnings = serde_json::to_string(&forecast.warnings)?;
        self.conn.execute(
            r#"
            INSERT INTO forecasts (game_id, margin, margin_lower, margin_upper, total,
                                   total_lower, total_upper, home_win_prob, warnings, model_version)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                forecast.game_id,
                forecast.margin,
                forecast.margin_interval.lower,
                forecast.margin_interval.upper,
                forecast.total,
                forecast.total_interval.lower,
                forecast.total_interval.upper,
                forecast.home_win_probability,
                warnings,
                model_version,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Home win probabilities recorded for a game, oldest first
    pub fn forecast_history(&self, game_id: &str) -> Result<Vec<f64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT home_win_prob FROM forecasts WHERE game_id = ?1 ORDER BY id")?;
        let probs = stmt
            .query_map(params![game_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<f64>, _>>()?;
        Ok(probs)
    }

    // ==================== Statistics ====================

    /// Get database statistics
    pub fn get_stats(&self) -> Result<DatabaseStats> {
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };

        let min_date: Option<String> = self
            .conn
            .query_row("SELECT MIN(date) FROM games", [], |row| row.get(0))
            .optional()?
            .flatten();

        let max_date: Option<String> = self
            .conn
            .query_row("SELECT MAX(date) FROM games", [], |row| row.get(0))
            .optional()?
            .flatten();

        Ok(DatabaseStats {
            team_count: count("SELECT COUNT(*) FROM teams")?,
            game_count: count("SELECT COUNT(*) FROM games")?,
            completed_games: count("SELECT COUNT(*) FROM games WHERE completed = 1")?,
            rating_count: count("SELECT COUNT(*) FROM team_ratings")?,
            forecast_count: count("SELECT COUNT(*) FROM forecasts")?,
            earliest_game: min_date.and_then(|s| NaiveDate::parse_from_str(&s, DATE_FORMAT).ok()),
            latest_game: max_date.and_then(|s| NaiveDate::parse_from_str(&s, DATE_FORMAT).ok()),
        })
    }
}

fn parse_date(column: usize, text: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

/// Database statistics
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub team_count: usize,
    pub game_count: usize,
    pub completed_games: usize,
    pub rating_count: usize,
    pub forecast_count: usize,
    pub earliest_game: Option<NaiveDate>,
    pub latest_game: Option<NaiveDate>,
}
