//! Model artifacts on disk, one JSON file per (league, seasons, target)

use std::fs;
use std::path::{Path, PathBuf};

use crate::model::Target;
use crate::training::ModelArtifact;
use crate::{ForecastError, League, Result, SeasonRange};

pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        ArtifactStore {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(league: League, seasons: SeasonRange, target: Target) -> String {
        format!("{}_{}_{}.json", league.code().to_lowercase(), seasons, target)
    }

    pub fn path(&self, league: League, seasons: SeasonRange, target: Target) -> PathBuf {
        self.dir.join(Self::file_name(league, seasons, target))
    }

    /// Write an artifact, replacing any previous one with the same key
    pub fn save(&self, artifact: &ModelArtifact) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path(artifact.league, artifact.seasons, artifact.target);
        let json = serde_json::to_string_pretty(artifact)?;
        fs::write(&path, json)?;
        log::info!("Saved {} model to {}", artifact.target, path.display());
        Ok(path)
    }

    pub fn load(&self, league: League, seasons: SeasonRange, target: Target) -> Result<ModelArtifact> {
        let path = self.path(league, seasons, target);
        if !path.exists() {
            return Err(ForecastError::ModelNotFound {
                league,
                seasons: seasons.to_string(),
                target,
            });
        }
        let text = fs::read_to_string(&path)?;
        let artifact: ModelArtifact = serde_json::from_str(&text).map_err(|e| {
            ForecastError::IncompatibleArtifact(format!("{}: {}", path.display(), e))
        })?;
        artifact.check_compatible()?;
        if artifact.league != league || artifact.seasons != seasons || artifact.target != target {
            return Err(ForecastError::IncompatibleArtifact(format!(
                "{} holds {} {} {}",
                path.display(),
                artifact.league,
                artifact.seasons,
                artifact.target
            )));
        }
        Ok(artifact)
    }

    /// Season ranges with a stored artifact for every target, newest last
    pub fn trained_ranges(&self, league: League) -> Result<Vec<SeasonRange>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let prefix = format!("{}_", league.code().to_lowercase());
        let mut ranges = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            let Some(rest) = name.strip_prefix(&prefix) else {
                continue;
            };
            let Some(range) = rest.split('_').next().and_then(parse_range) else {
                continue;
            };
            if !ranges.contains(&range)
                && Target::ALL
                    .iter()
                    .all(|t| self.path(league, range, *t).exists())
            {
                ranges.push(range);
            }
        }
        ranges.sort_by_key(|r| (r.last, r.first));
        Ok(ranges)
    }

    /// Most recent fully trained range for a league
    pub fn latest_range(&self, league: League) -> Result<SeasonRange> {
        self.trained_ranges(league)?
            .pop()
            .ok_or_else(|| ForecastError::ModelNotFound {
                league,
                seasons: "any".to_string(),
                target: Target::Margin,
            })
    }
}

fn parse_range(text: &str) -> Option<SeasonRange> {
    let (first, last) = text.split_once('-')?;
    Some(SeasonRange::new(first.parse().ok()?, last.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::GameDataset;
    use crate::features::{EloRatingEngine, FeatureBuilder};
    use crate::test_support::synthetic_league;
    use crate::training::{TrainingConfig, WalkForwardTrainer};

    fn trained(range: SeasonRange) -> Vec<ModelArtifact> {
        let builder = FeatureBuilder::new(Default::default(), Default::default());
        let seasons = synthetic_league(range.first..=range.last, 3);
        let dataset = GameDataset::from_seasons(&seasons, &EloRatingEngine::default(), &builder);
        let config = TrainingConfig {
            min_train_games: 20,
            ..TrainingConfig::default()
        };
        WalkForwardTrainer::new(config, builder.spec())
            .fit(League::Nfl, range, &dataset.samples)
            .unwrap()
            .artifacts
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let range = SeasonRange::new(2020, 2022);
        for artifact in trained(range) {
            let path = store.save(&artifact).unwrap();
            assert!(path.ends_with(format!("nfl_2020-2022_{}.json", artifact.target)));
            let loaded = store.load(League::Nfl, range, artifact.target).unwrap();
            assert_eq!(loaded, artifact);
        }
        assert_eq!(store.trained_ranges(League::Nfl).unwrap(), vec![range]);
        assert_eq!(store.latest_range(League::Nfl).unwrap(), range);
    }

    #[test]
    fn test_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("nothing-here"));
        let err = store
            .load(League::Ncaa, SeasonRange::new(2020, 2023), Target::Total)
            .unwrap_err();
        assert!(matches!(err, ForecastError::ModelNotFound { target: Target::Total, .. }));
        assert!(store.trained_ranges(League::Ncaa).unwrap().is_empty());
        assert!(store.latest_range(League::Ncaa).is_err());
    }

    #[test]
    fn test_version_mismatch_is_incompatible() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let range = SeasonRange::new(2020, 2022);
        let mut artifact = trained(range).remove(0);
        artifact.format_version += 1;
        store.save(&artifact).unwrap();
        let err = store.load(League::Nfl, range, artifact.target).unwrap_err();
        assert!(matches!(err, ForecastError::IncompatibleArtifact(_)));

        artifact.format_version -= 1;
        artifact.crate_version = "0.0.0-old".to_string();
        store.save(&artifact).unwrap();
        assert!(store.load(League::Nfl, range, artifact.target).is_err());
    }

    #[test]
    fn test_corrupt_file_is_incompatible() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let range = SeasonRange::new(2020, 2022);
        std::fs::write(store.path(League::Nfl, range, Target::Margin), "{\"format_version\": 1}").unwrap();
        let err = store.load(League::Nfl, range, Target::Margin).unwrap_err();
        assert!(matches!(err, ForecastError::IncompatibleArtifact(_)));
    }

    #[test]
    fn test_latest_range_needs_every_target() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        for artifact in trained(SeasonRange::new(2019, 2021)) {
            store.save(&artifact).unwrap();
        }
        // Only one target for the newer range
        let newer = trained(SeasonRange::new(2020, 2022));
        store.save(&newer[0]).unwrap();
        assert_eq!(store.latest_range(League::Nfl).unwrap(), SeasonRange::new(2019, 2021));
    }
}
