//! Gridiron CLI
//!
//! Usage:
//!   gridiron data import games.json
//!   gridiron ratings compute --league nfl --season 2023
//!   gridiron ratings srs --league nfl --season 2023
//!   gridiron train --league nfl --first 2018 --last 2023
//!   gridiron predict --league nfl --season 2024 --week 5

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use gridiron::{Config, League, Result};

#[derive(Parser)]
#[command(name = "gridiron")]
#[command(about = "Football forecasting from Elo ratings and walk-forward trained models")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Data management commands
    Data {
        #[command(subcommand)]
        action: DataCommands,
    },

    /// Team rating commands
    Ratings {
        #[command(subcommand)]
        action: RatingsCommands,
    },

    /// Train margin, total and win probability models
    Train {
        /// League code (nfl or ncaa)
        #[arg(short, long)]
        league: League,

        /// First season of the training range
        #[arg(long)]
        first: i32,

        /// Last season of the training range
        #[arg(long)]
        last: i32,

        /// Train each fold on only the N most recent seasons
        #[arg(long)]
        trailing: Option<usize>,

        /// Single split: validate on games from this date onward (YYYY-MM-DD)
        #[arg(long, conflicts_with_all = ["split_fraction", "trailing"])]
        split_date: Option<NaiveDate>,

        /// Single split: train on this fraction of the games
        #[arg(long, conflicts_with = "trailing")]
        split_fraction: Option<f64>,
    },

    /// Forecast a game or a week of games
    Predict {
        /// Game id
        #[arg(long, conflicts_with_all = ["league", "season", "week"])]
        game_id: Option<String>,

        /// League code (with --season and --week)
        #[arg(short, long, requires_all = ["season", "week"])]
        league: Option<League>,

        #[arg(short, long)]
        season: Option<i32>,

        #[arg(short, long)]
        week: Option<u32>,

        /// First season of the model range (newest trained range by default)
        #[arg(long, requires = "last")]
        first: Option<i32>,

        /// Last season of the model range
        #[arg(long, requires = "first")]
        last: Option<i32>,
    },

    /// Write a default config file
    Init,
}

#[derive(Subcommand)]
enum DataCommands {
    /// Import games (and optionally teams) from a JSON file
    Import {
        /// JSON file: a game array or {"teams": [...], "games": [...]}
        path: String,
    },
    /// Show database status
    Status,
}

#[derive(Subcommand)]
enum RatingsCommands {
    /// Run a season pass and store the final ratings
    Compute {
        #[arg(short, long)]
        league: League,

        #[arg(short, long)]
        season: i32,
    },
    /// Simple Rating System standings for a season
    Srs {
        #[arg(short, long)]
        league: League,

        #[arg(short, long)]
        season: i32,
    },
    /// Show stored ratings, or one team's rating before a date
    Show {
        #[arg(short, long)]
        league: League,

        #[arg(short, long)]
        season: i32,

        /// Team id
        #[arg(short, long, requires = "as_of")]
        team: Option<String>,

        /// Only games strictly before this date count (YYYY-MM-DD)
        #[arg(long, requires = "team")]
        as_of: Option<NaiveDate>,
    },
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let config = if std::path::Path::new(&cli.config).exists() {
        match Config::load(&cli.config) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    let result = match cli.command {
        Commands::Data { action } => match action {
            DataCommands::Import { path } => commands::data_import(config, &path),
            DataCommands::Status => commands::data_status(config),
        },
        Commands::Ratings { action } => match action {
            RatingsCommands::Compute { league, season } => {
                commands::ratings_compute(config, league, season)
            }
            RatingsCommands::Srs { league, season } => commands::ratings_srs(config, league, season),
            RatingsCommands::Show {
                league,
                season,
                team,
                as_of,
            } => commands::ratings_show(config, league, season, team, as_of),
        },
        Commands::Train {
            league,
            first,
            last,
            trailing,
            split_date,
            split_fraction,
        } => commands::train(config, league, first, last, trailing, split_date, split_fraction),
        Commands::Predict {
            game_id,
            league,
            season,
            week,
            first,
            last,
        } => commands::predict(config, game_id, league, season, week, first, last),
        Commands::Init => commands::init(&cli.config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

mod commands {
    use super::*;
    use gridiron::data::GameImport;
    use gridiron::predict::format_forecast;
    use gridiron::service::{ForecastService, GameSelector};
    use gridiron::training::{SplitBoundary, ValidationPolicy};
    use gridiron::{ForecastError, SeasonRange, TeamId};

    const RULE: &str = "───────────────────────────────";

    pub fn init(config_path: &str) -> Result<()> {
        let config = Config::default();
        config.save(config_path)?;
        println!("Created default config at {}", config_path);

        let service = ForecastService::open(config)?;
        std::fs::create_dir_all(service.artifacts().dir())?;
        println!(
            "Created database {} and model directory {}",
            service.config().data.database_path,
            service.artifacts().dir().display()
        );

        println!("\nNext steps:");
        println!("  1. Edit {} to customize settings", config_path);
        println!("  2. Run 'gridiron data import games.json' to load games");
        println!("  3. Run 'gridiron train --league nfl --first 2018 --last 2023'");
        println!("  4. Run 'gridiron predict --league nfl --season 2024 --week 1'");

        Ok(())
    }

    pub fn data_import(config: Config, path: &str) -> Result<()> {
        let service = ForecastService::open(config)?;
        let import = GameImport::load(path)?;
        let count = import.store(service.database())?;
        println!(
            "Imported {} games and {} teams from {}",
            count,
            import.teams.len(),
            path
        );
        Ok(())
    }

    pub fn data_status(config: Config) -> Result<()> {
        let service = ForecastService::open(config)?;
        let stats = service.database().get_stats()?;

        println!("Database Status");
        println!("{}", RULE);
        println!("Teams:     {}", stats.team_count);
        println!(
            "Games:     {} ({} completed)",
            stats.game_count, stats.completed_games
        );
        println!("Ratings:   {}", stats.rating_count);
        println!("Forecasts: {}", stats.forecast_count);
        if let (Some(first), Some(last)) = (stats.earliest_game, stats.latest_game) {
            println!("Range:     {} to {}", first, last);
        }

        for league in [League::Nfl, League::Ncaa] {
            let seasons = service.database().league_seasons(league)?;
            if let (Some(first), Some(last)) = (seasons.first(), seasons.last()) {
                println!("{}:       seasons {}-{}", league, first, last);
            }
            let trained = service.artifacts().trained_ranges(league)?;
            if !trained.is_empty() {
                let ranges: Vec<String> = trained.iter().map(|r| r.to_string()).collect();
                println!("{} models: {}", league, ranges.join(", "));
            }
        }

        Ok(())
    }

    pub fn ratings_compute(config: Config, league: League, season: i32) -> Result<()> {
        let service = ForecastService::open(config)?;
        let ratings = service.compute_ratings(league, season)?;

        println!("{} {} ratings ({} games)", league, season, ratings.games_processed);
        println!("{}", RULE);
        for (rank, rating) in ratings.ranked().iter().enumerate() {
            println!(
                "{:>3}. {:<8} {:>7.1}  ({} games)",
                rank + 1,
                rating.team_id,
                rating.rating,
                rating.games_count
            );
        }
        for issue in &ratings.issues {
            println!("  skipped: {}", issue);
        }
        Ok(())
    }

    pub fn ratings_srs(config: Config, league: League, season: i32) -> Result<()> {
        let service = ForecastService::open(config)?;
        let ranked = service.srs_ratings(league, season)?;

        println!("{} {} SRS (points vs average)", league, season);
        println!("{}", RULE);
        for (rank, (team, rating)) in ranked.iter().enumerate() {
            println!("{:>3}. {:<8} {:>+6.1}", rank + 1, team, rating);
        }
        Ok(())
    }

    pub fn ratings_show(
        config: Config,
        league: League,
        season: i32,
        team: Option<String>,
        as_of: Option<NaiveDate>,
    ) -> Result<()> {
        let service = ForecastService::open(config)?;

        if let (Some(team), Some(as_of)) = (team, as_of) {
            let rating = service.get_rating(league, &TeamId::new(team), season, as_of)?;
            println!(
                "{} {}: {:.1} after {} games (before {})",
                league, rating.team_id, rating.rating, rating.games_count, as_of
            );
            return Ok(());
        }

        let ratings = service.stored_ratings(league, season)?;
        if ratings.is_empty() {
            println!(
                "No stored ratings for {} {}. Run 'gridiron ratings compute' first.",
                league, season
            );
            return Ok(());
        }
        println!("{} {} ratings", league, season);
        println!("{}", RULE);
        for (rank, rating) in ratings.iter().enumerate() {
            println!(
                "{:>3}. {:<8} {:>7.1}  ({} games)",
                rank + 1,
                rating.team_id,
                rating.rating,
                rating.games_count
            );
        }
        Ok(())
    }

    pub fn train(
        config: Config,
        league: League,
        first: i32,
        last: i32,
        trailing: Option<usize>,
        split_date: Option<NaiveDate>,
        split_fraction: Option<f64>,
    ) -> Result<()> {
        if first > last {
            return Err(ForecastError::Config(format!(
                "--first {} is after --last {}",
                first, last
            )));
        }
        let mut config = config;
        if trailing.is_some() {
            config.training.trailing_seasons = trailing;
        }
        let policy = match (split_date, split_fraction) {
            (Some(date), _) => Some(ValidationPolicy::SingleSplit(SplitBoundary::Date(date))),
            (None, Some(fraction)) => {
                Some(ValidationPolicy::SingleSplit(SplitBoundary::Fraction(fraction)))
            }
            (None, None) => None,
        };

        let service = ForecastService::open(config)?;
        let seasons = SeasonRange::new(first, last);
        println!("Training {} models on {}...", league, seasons);
        let outcome = service.train(league, seasons, policy)?;

        println!("{}", RULE);
        println!("{}", outcome.report);
        println!("{}", RULE);
        for artifact in &outcome.artifacts {
            println!(
                "Saved {} model: {}",
                artifact.target,
                service
                    .artifacts()
                    .path(league, seasons, artifact.target)
                    .display()
            );
        }
        Ok(())
    }

    pub fn predict(
        config: Config,
        game_id: Option<String>,
        league: Option<League>,
        season: Option<i32>,
        week: Option<u32>,
        first: Option<i32>,
        last: Option<i32>,
    ) -> Result<()> {
        let selector = match (game_id, league, season, week) {
            (Some(id), _, _, _) => GameSelector::Id(id),
            (None, Some(league), Some(season), Some(week)) => GameSelector::Week {
                league,
                season,
                week,
            },
            _ => {
                return Err(ForecastError::Config(
                    "predict needs --game-id or --league, --season and --week".to_string(),
                ))
            }
        };
        let seasons = match (first, last) {
            (Some(first), Some(last)) => Some(SeasonRange::new(first, last)),
            _ => None,
        };

        let service = ForecastService::open(config)?;
        let forecasts = service.predict(&selector, seasons)?;

        let mut failed = 0;
        for forecast in &forecasts {
            match forecast {
                Ok(f) => println!("{}", format_forecast(f)),
                Err(e) => {
                    failed += 1;
                    println!("Skipped: {}", e);
                }
            }
        }
        println!(
            "{} forecasts, {} skipped",
            forecasts.len() - failed,
            failed
        );
        Ok(())
    }
}
