//! Game supply: ordered season feeds and JSON import

use std::path::Path;

use serde::Deserialize;

use crate::data::database::Database;
use crate::{ForecastError, Game, League, Result, TeamId};

/// Source of season game lists, in the order they were played
pub trait GameFeed {
    /// Games of one league season, chronologically ordered
    fn supply(&self, league: League, season: i32) -> Result<Vec<Game>>;

    /// Seasons available for a league, ascending
    fn seasons(&self, league: League) -> Result<Vec<i32>>;

    /// League roster; empty means every referenced team is accepted
    fn known_teams(&self, league: League) -> Result<Vec<TeamId>>;
}

impl GameFeed for Database {
    fn supply(&self, league: League, season: i32) -> Result<Vec<Game>> {
        let games = self.season_games(league, season)?;
        ensure_chronological(&games)?;
        Ok(games)
    }

    fn seasons(&self, league: League) -> Result<Vec<i32>> {
        self.league_seasons(league)
    }

    fn known_teams(&self, league: League) -> Result<Vec<TeamId>> {
        self.league_teams(league)
    }
}

/// Reject a game list whose dates ever go backwards
pub fn ensure_chronological(games: &[Game]) -> Result<()> {
    for pair in games.windows(2) {
        if pair[1].date < pair[0].date {
            return Err(ForecastError::Ordering {
                game_id: pair[1].game_id.clone(),
                date: pair[1].date,
                previous: pair[0].date,
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeamEntry {
    pub league: League,
    pub id: TeamId,
    #[serde(default)]
    pub name: Option<String>,
}

/// Contents of an import file
#[derive(Debug, Default)]
pub struct GameImport {
    pub teams: Vec<TeamEntry>,
    pub games: Vec<Game>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ImportFile {
    Games(Vec<Game>),
    Full {
        #[serde(default)]
        teams: Vec<TeamEntry>,
        games: Vec<Game>,
    },
}

impl GameImport {
    /// Parse either a bare game array or `{"teams": [...], "games": [...]}`
    pub fn from_json(text: &str) -> Result<Self> {
        let file: ImportFile = serde_json::from_str(text)?;
        Ok(match file {
            ImportFile::Games(games) => GameImport {
                teams: Vec::new(),
                games,
            },
            ImportFile::Full { teams, games } => GameImport { teams, games },
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Write teams and games into the store; returns the game count.
    ///
    /// The games must already be in date order.
    pub fn store(&self, db: &Database) -> Result<usize> {
        ensure_chronological(&self.games)?;
        for team in &self.teams {
            db.upsert_team(team.league, &team.id, team.name.as_deref())?;
        }
        let count = db.upsert_games(&self.games)?;
        log::info!(
            "Imported {} games and {} roster entries",
            count,
            self.teams.len()
        );
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{date, game};

    #[test]
    fn test_ensure_chronological() {
        let mut games = vec![
            game("g1", 2023, date(2023, 9, 10), "A", "B", None),
            game("g2", 2023, date(2023, 9, 10), "C", "D", None),
            game("g3", 2023, date(2023, 9, 17), "A", "C", None),
        ];
        assert!(ensure_chronological(&games).is_ok());

        games.swap(1, 2);
        let err = ensure_chronological(&games).unwrap_err();
        assert!(matches!(
            err,
            ForecastError::Ordering { game_id, .. } if game_id == "g2"
        ));
    }

    #[test]
    fn test_import_bare_array() {
        let json = r#"[{
            "game_id": "NFL_2024_1_KC_BAL",
            "league": "NFL",
            "season": 2024,
            "week": 1,
            "date": "2024-09-05",
            "home_team": "KC",
            "away_team": "BAL",
            "home_score": 27,
            "away_score": 20,
            "completed": true
        }]"#;
        let import = GameImport::from_json(json).unwrap();
        assert!(import.teams.is_empty());
        assert_eq!(import.games.len(), 1);
        assert_eq!(import.games[0].final_score(), Some((27, 20)));
        assert!(!import.games[0].neutral_site);
    }

    #[test]
    fn test_import_with_roster_into_store() {
        let json = r#"{
            "teams": [
                {"league": "NCAA", "id": "UGA", "name": "Georgia"},
                {"league": "NCAA", "id": "CLEM"}
            ],
            "games": [{
                "game_id": "NCAA_2024_1_UGA_CLEM",
                "league": "NCAA",
                "season": 2024,
                "week": 1,
                "date": "2024-08-31",
                "home_team": "UGA",
                "away_team": "CLEM",
                "home_score": null,
                "away_score": null,
                "completed": false,
                "neutral_site": true
            }]
        }"#;
        let import = GameImport::from_json(json).unwrap();
        let db = Database::in_memory().unwrap();
        assert_eq!(import.store(&db).unwrap(), 1);

        assert_eq!(db.known_teams(League::Ncaa).unwrap().len(), 2);
        let games = db.supply(League::Ncaa, 2024).unwrap();
        assert!(games[0].neutral_site);
        assert_eq!(db.seasons(League::Ncaa).unwrap(), vec![2024]);
    }

    #[test]
    fn test_import_rejects_unordered_games() {
        let import = GameImport {
            teams: Vec::new(),
            games: vec![
                game("g2", 2023, date(2023, 9, 17), "A", "B", Some((10, 7))),
                game("g1", 2023, date(2023, 9, 10), "B", "A", Some((3, 0))),
            ],
        };
        let db = Database::in_memory().unwrap();
        assert!(matches!(
            import.store(&db),
            Err(ForecastError::Ordering { .. })
        ));
        assert_eq!(db.get_stats().unwrap().game_count, 0);
    }

    #[test]
    fn test_import_rejects_garbage() {
        assert!(GameImport::from_json("{\"games\": 5}").is_err());
    }
}
