//! Time-ordered train/test partitions

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::data::dataset::Sample;
use crate::{ForecastError, Result, SeasonRange};

/// Which earlier seasons a walk-forward fold trains on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowPolicy {
    /// Every season before the test season
    Expanding,
    /// Only the last `n` seasons before the test season
    Trailing(usize),
}

/// Where a single split cuts the sample timeline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SplitBoundary {
    /// Games before the date train, games on or after it test
    Date(NaiveDate),
    /// Roughly this share of games (by date order) trains
    Fraction(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ValidationPolicy {
    WalkForward {
        window: WindowPolicy,
        min_history_seasons: usize,
    },
    SingleSplit(SplitBoundary),
}

/// One train/test partition, as indices into the sample slice
#[derive(Debug, Clone, PartialEq)]
pub struct Fold {
    pub index: usize,
    pub train_seasons: Vec<i32>,
    pub test_seasons: Vec<i32>,
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl Fold {
    /// Every training game must precede every test game
    fn check_ordering(&self, samples: &[Sample]) -> Result<()> {
        let last_train = self.train.iter().map(|&i| samples[i].date).max();
        let first_test = self
            .test
            .iter()
            .map(|&i| &samples[i])
            .min_by_key(|s| s.date);
        if let (Some(last_train), Some(first_test)) = (last_train, first_test) {
            if last_train >= first_test.date {
                return Err(ForecastError::Leakage {
                    game_id: first_test.game_id.clone(),
                    detail: format!(
                        "fold {} trains on a game dated {} but tests from {}",
                        self.index, last_train, first_test.date
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Partition samples for the seasons in `range`
pub fn plan_folds(
    samples: &[Sample],
    range: SeasonRange,
    policy: &ValidationPolicy,
) -> Result<Vec<Fold>> {
    let folds = match policy {
        ValidationPolicy::WalkForward {
            window,
            min_history_seasons,
        } => walk_forward(samples, range, *window, *min_history_seasons),
        ValidationPolicy::SingleSplit(boundary) => single_split(samples, range, *boundary)?,
    };

    for fold in &folds {
        fold.check_ordering(samples)?;
    }
    Ok(folds)
}

fn walk_forward(
    samples: &[Sample],
    range: SeasonRange,
    window: WindowPolicy,
    min_history_seasons: usize,
) -> Vec<Fold> {
    let seasons: Vec<i32> = range.seasons().collect();
    let start = min_history_seasons.max(1);

    (start..seasons.len())
        .enumerate()
        .map(|(index, pos)| {
            let test_season = seasons[pos];
            let earliest = match window {
                WindowPolicy::Expanding => 0,
                WindowPolicy::Trailing(n) => pos.saturating_sub(n.max(1)),
            };
            let train_seasons = seasons[earliest..pos].to_vec();
            let train = indices_where(samples, |s| train_seasons.contains(&s.season));
            let test = indices_where(samples, |s| s.season == test_season);
            Fold {
                index,
                train_seasons,
                test_seasons: vec![test_season],
                train,
                test,
            }
        })
        .collect()
}

fn single_split(samples: &[Sample], range: SeasonRange, boundary: SplitBoundary) -> Result<Vec<Fold>> {
    let in_range = indices_where(samples, |s| range.contains(s.season));
    let mut dates: Vec<NaiveDate> = in_range.iter().map(|&i| samples[i].date).collect();
    dates.sort();

    let cutoff = match boundary {
        SplitBoundary::Date(date) => date,
        SplitBoundary::Fraction(fraction) => {
            if !(fraction > 0.0 && fraction < 1.0) {
                return Err(ForecastError::Config(format!(
                    "split fraction must be in (0, 1), got {fraction}"
                )));
            }
            let cut = ((dates.len() as f64) * fraction).floor() as usize;
            match dates.get(cut) {
                Some(date) => *date,
                None => return Ok(Vec::new()),
            }
        }
    };

    let train: Vec<usize> = in_range
        .iter()
        .copied()
        .filter(|&i| samples[i].date < cutoff)
        .collect();
    let test: Vec<usize> = in_range
        .iter()
        .copied()
        .filter(|&i| samples[i].date >= cutoff)
        .collect();

    let seasons_of = |idx: &[usize]| -> Vec<i32> {
        idx.iter()
            .map(|&i| samples[i].season)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    };

    Ok(vec![Fold {
        index: 0,
        train_seasons: seasons_of(&train),
        test_seasons: seasons_of(&test),
        train,
        test,
    }])
}

fn indices_where(samples: &[Sample], pred: impl Fn(&Sample) -> bool) -> Vec<usize> {
    samples
        .iter()
        .enumerate()
        .filter(|(_, s)| pred(s))
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureVector;
    use crate::test_support::date;

    fn sample(id: &str, season: i32, d: NaiveDate) -> Sample {
        Sample {
            game_id: id.to_string(),
            season,
            date: d,
            features: FeatureVector::from_values([0.0; FeatureVector::DIM]),
            margin: 0.0,
            total: 0.0,
            outcome: 0.5,
            cold_start: false,
        }
    }

    fn samples() -> Vec<Sample> {
        let mut out = Vec::new();
        for season in 2019..=2022 {
            for week in 0..3u32 {
                let d = date(season, 9, 10 + week * 7);
                out.push(sample(&format!("{season}_{week}"), season, d));
            }
        }
        out
    }

    #[test]
    fn test_expanding_folds() {
        let samples = samples();
        let policy = ValidationPolicy::WalkForward {
            window: WindowPolicy::Expanding,
            min_history_seasons: 1,
        };
        let folds = plan_folds(&samples, SeasonRange::new(2019, 2022), &policy).unwrap();
        assert_eq!(folds.len(), 3);
        assert_eq!(folds[0].train_seasons, vec![2019]);
        assert_eq!(folds[0].test_seasons, vec![2020]);
        assert_eq!(folds[2].train_seasons, vec![2019, 2020, 2021]);
        assert_eq!(folds[2].train.len(), 9);
        assert_eq!(folds[2].test.len(), 3);
        for fold in &folds {
            assert!(fold.train.iter().all(|i| !fold.test.contains(i)));
        }
    }

    #[test]
    fn test_trailing_window() {
        let samples = samples();
        let policy = ValidationPolicy::WalkForward {
            window: WindowPolicy::Trailing(1),
            min_history_seasons: 2,
        };
        let folds = plan_folds(&samples, SeasonRange::new(2019, 2022), &policy).unwrap();
        assert_eq!(folds.len(), 2);
        assert_eq!(folds[0].train_seasons, vec![2020]);
        assert_eq!(folds[0].test_seasons, vec![2021]);
        assert_eq!(folds[1].train_seasons, vec![2021]);
    }

    #[test]
    fn test_range_limits_seasons() {
        let samples = samples();
        let policy = ValidationPolicy::WalkForward {
            window: WindowPolicy::Expanding,
            min_history_seasons: 1,
        };
        let folds = plan_folds(&samples, SeasonRange::new(2020, 2021), &policy).unwrap();
        assert_eq!(folds.len(), 1);
        assert_eq!(folds[0].train_seasons, vec![2020]);
        assert!(folds[0].train.iter().all(|&i| samples[i].season == 2020));
    }

    #[test]
    fn test_season_without_games_gives_empty_test() {
        let samples: Vec<Sample> = samples().into_iter().filter(|s| s.season != 2021).collect();
        let policy = ValidationPolicy::WalkForward {
            window: WindowPolicy::Expanding,
            min_history_seasons: 1,
        };
        let folds = plan_folds(&samples, SeasonRange::new(2019, 2022), &policy).unwrap();
        assert!(folds[1].test.is_empty());
    }

    #[test]
    fn test_single_split_by_date() {
        let samples = samples();
        let policy = ValidationPolicy::SingleSplit(SplitBoundary::Date(date(2021, 1, 1)));
        let folds = plan_folds(&samples, SeasonRange::new(2019, 2022), &policy).unwrap();
        assert_eq!(folds.len(), 1);
        assert_eq!(folds[0].train.len(), 6);
        assert_eq!(folds[0].test_seasons, vec![2021, 2022]);
    }

    #[test]
    fn test_single_split_fraction_never_splits_a_date() {
        let mut samples = samples();
        // Two games on the cut date
        samples.push(sample("extra", 2020, date(2020, 9, 17)));
        samples.sort_by_key(|s| s.date);
        let policy = ValidationPolicy::SingleSplit(SplitBoundary::Fraction(0.35));
        let folds = plan_folds(&samples, SeasonRange::new(2019, 2022), &policy).unwrap();
        let fold = &folds[0];
        let last_train = fold.train.iter().map(|&i| samples[i].date).max().unwrap();
        let first_test = fold.test.iter().map(|&i| samples[i].date).min().unwrap();
        assert!(last_train < first_test);
        assert_eq!(fold.train.len() + fold.test.len(), samples.len());
    }

    #[test]
    fn test_out_of_order_seasons_are_rejected() {
        let mut samples = samples();
        // A 2019 sample dated after the 2020 season opener
        samples[0].date = date(2020, 12, 1);
        let policy = ValidationPolicy::WalkForward {
            window: WindowPolicy::Expanding,
            min_history_seasons: 1,
        };
        let err = plan_folds(&samples, SeasonRange::new(2019, 2022), &policy).unwrap_err();
        assert!(matches!(err, ForecastError::Leakage { .. }));
    }

    #[test]
    fn test_bad_fraction() {
        let policy = ValidationPolicy::SingleSplit(SplitBoundary::Fraction(1.5));
        assert!(plan_folds(&samples(), SeasonRange::new(2019, 2022), &policy).is_err());
    }
}
