//! Walk-forward training loop

use std::collections::HashSet;
use std::fmt;

use chrono::Utc;
use rayon::prelude::*;

use crate::data::dataset::{feature_matrix, label_vector, Sample};
use crate::features::FeatureSpec;
use crate::model::{ModelParams, Target, TargetModel};
use crate::training::artifact::{ModelArtifact, CRATE_VERSION, FORMAT_VERSION};
use crate::training::calibration::CalibrationMap;
use crate::training::folds::{plan_folds, Fold, ValidationPolicy};
use crate::training::metrics::Metrics;
use crate::training::residuals::ResidualSummary;
use crate::training::TrainingConfig;
use crate::{ForecastError, League, Result, SeasonRange};

/// A test game's predictions from a model that never saw it
#[derive(Debug, Clone, PartialEq)]
pub struct OofPrediction {
    pub game_id: String,
    pub season: i32,
    pub fold: usize,
    pub margin_pred: f64,
    pub total_pred: f64,
    pub raw_probability: f64,
    pub margin: f64,
    pub total: f64,
    pub outcome: f64,
}

/// Accumulates out-of-fold predictions across folds
#[derive(Debug, Default)]
pub struct OutOfFoldCollector {
    predictions: Vec<OofPrediction>,
    seen: HashSet<String>,
}

impl OutOfFoldCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A game can only be held out once
    pub fn extend(&mut self, predictions: Vec<OofPrediction>) -> Result<()> {
        for prediction in predictions {
            if !self.seen.insert(prediction.game_id.clone()) {
                return Err(ForecastError::Leakage {
                    game_id: prediction.game_id,
                    detail: "predicted out-of-fold more than once".to_string(),
                });
            }
            self.predictions.push(prediction);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    pub fn predictions(&self) -> &[OofPrediction] {
        &self.predictions
    }

    pub fn raw_probabilities(&self) -> Vec<f64> {
        self.predictions.iter().map(|p| p.raw_probability).collect()
    }

    pub fn outcomes(&self) -> Vec<f64> {
        self.predictions.iter().map(|p| p.outcome).collect()
    }

    pub fn margin_residuals(&self) -> Vec<f64> {
        self.predictions.iter().map(|p| p.margin - p.margin_pred).collect()
    }

    pub fn total_residuals(&self) -> Vec<f64> {
        self.predictions.iter().map(|p| p.total - p.total_pred).collect()
    }

    /// Pooled metrics; `calibration` is applied to the probabilities if given
    pub fn metrics(&self, calibration: Option<&CalibrationMap>) -> Metrics {
        let mut metrics = Metrics::new();
        for p in &self.predictions {
            let prob = calibration.map_or(p.raw_probability, |c| c.apply(p.raw_probability));
            metrics.update(p.margin_pred, p.margin, p.total_pred, p.total, prob, p.outcome);
        }
        metrics
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    TooFewTrainingGames { available: usize, required: usize },
    EmptyTestSet,
    /// A target model could not be fitted on the fold's training rows
    FitFailed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::TooFewTrainingGames {
                available,
                required,
            } => write!(f, "{} training games (need {})", available, required),
            SkipReason::EmptyTestSet => write!(f, "no completed games to evaluate"),
            SkipReason::FitFailed(detail) => write!(f, "fit failed: {}", detail),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SkippedFold {
    pub index: usize,
    pub test_seasons: Vec<i32>,
    pub reason: SkipReason,
}

#[derive(Debug, Clone)]
pub struct FoldReport {
    pub index: usize,
    pub train_seasons: Vec<i32>,
    pub test_seasons: Vec<i32>,
    pub train_games: usize,
    pub test_games: usize,
    /// Uncalibrated fold metrics
    pub metrics: Metrics,
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub league: League,
    pub seasons: SeasonRange,
    pub folds: Vec<FoldReport>,
    pub skipped: Vec<SkippedFold>,
    /// Pooled out-of-fold metrics before calibration
    pub oof: Metrics,
    /// Pooled out-of-fold Brier score after calibration
    pub calibrated_brier: f64,
    pub calibration: String,
    pub final_samples: usize,
}

impl fmt::Display for TrainingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Training report: {} {}", self.league, self.seasons)?;
        for fold in &self.folds {
            writeln!(
                f,
                "  Fold {} (test {:?}, {} train / {} test): {}",
                fold.index, fold.test_seasons, fold.train_games, fold.test_games, fold.metrics
            )?;
        }
        for skipped in &self.skipped {
            writeln!(
                f,
                "  Fold {} (test {:?}) skipped: {}",
                skipped.index, skipped.test_seasons, skipped.reason
            )?;
        }
        writeln!(f, "  Out-of-fold: {}", self.oof)?;
        write!(
            f,
            "  Calibration: {} (Brier {:.4} -> {:.4}), final fit on {} games",
            self.calibration,
            self.oof.brier(),
            self.calibrated_brier,
            self.final_samples
        )
    }
}

/// Artifacts for every target plus the validation report
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub artifacts: Vec<ModelArtifact>,
    pub report: TrainingReport,
}

impl TrainingOutcome {
    pub fn artifact(&self, target: Target) -> Option<&ModelArtifact> {
        self.artifacts.iter().find(|a| a.target == target)
    }
}

/// One model per target, fitted on the same rows
struct FittedModels {
    margin: TargetModel,
    total: TargetModel,
    win: TargetModel,
}

impl FittedModels {
    fn fit(samples: &[&Sample], params: &ModelParams) -> Result<Self> {
        let x = feature_matrix(samples);
        let fit = |target| TargetModel::fit(target, &x, &label_vector(samples, target), params);
        Ok(FittedModels {
            margin: fit(Target::Margin)?,
            total: fit(Target::Total)?,
            win: fit(Target::WinProbability)?,
        })
    }
}

enum FoldOutcome {
    Completed(FoldReport, Vec<OofPrediction>),
    Skipped(SkippedFold),
}

/// Trains margin, total and win-probability models with walk-forward
/// validation and out-of-fold calibration
pub struct WalkForwardTrainer {
    config: TrainingConfig,
    spec: FeatureSpec,
}

impl WalkForwardTrainer {
    pub fn new(config: TrainingConfig, spec: FeatureSpec) -> Self {
        WalkForwardTrainer { config, spec }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train with the configured walk-forward policy
    pub fn fit(&self, league: League, seasons: SeasonRange, samples: &[Sample]) -> Result<TrainingOutcome> {
        self.fit_with_policy(league, seasons, samples, &self.config.validation_policy())
    }

    pub fn fit_with_policy(
        &self,
        league: League,
        seasons: SeasonRange,
        samples: &[Sample],
        policy: &ValidationPolicy,
    ) -> Result<TrainingOutcome> {
        self.config.validate()?;
        let folds = plan_folds(samples, seasons, policy)?;
        log::info!(
            "Training {} {} on {} samples across {} folds",
            league,
            seasons,
            samples.len(),
            folds.len()
        );

        let results: Vec<Result<FoldOutcome>> = if self.config.parallel {
            folds.par_iter().map(|fold| self.run_fold(fold, samples)).collect()
        } else {
            folds.iter().map(|fold| self.run_fold(fold, samples)).collect()
        };

        // Merge in fold order
        let mut collector = OutOfFoldCollector::new();
        let mut fold_reports = Vec::new();
        let mut skipped = Vec::new();
        for result in results {
            match result? {
                FoldOutcome::Completed(report, predictions) => {
                    log::info!(
                        "Fold {} (test {:?}): {}",
                        report.index,
                        report.test_seasons,
                        report.metrics
                    );
                    collector.extend(predictions)?;
                    fold_reports.push(report);
                }
                FoldOutcome::Skipped(fold) => {
                    log::warn!(
                        "Skipping fold {} (test {:?}): {}",
                        fold.index,
                        fold.test_seasons,
                        fold.reason
                    );
                    skipped.push(fold);
                }
            }
        }

        if collector.is_empty() {
            return Err(ForecastError::InsufficientData {
                subject: format!("walk-forward validation of {} {}", league, seasons),
                available: 0,
                required: 1,
            });
        }

        let calibration = CalibrationMap::fit(
            self.config.calibration,
            &collector.raw_probabilities(),
            &collector.outcomes(),
        )?;
        let confidence = self.config.interval_confidence;
        let margin_residuals = ResidualSummary::fit(&collector.margin_residuals(), confidence)?;
        let total_residuals = ResidualSummary::fit(&collector.total_residuals(), confidence)?;

        let final_rows: Vec<&Sample> = samples.iter().filter(|s| seasons.contains(s.season)).collect();
        if final_rows.len() < self.config.min_train_games {
            return Err(ForecastError::InsufficientData {
                subject: format!("final fit of {} {}", league, seasons),
                available: final_rows.len(),
                required: self.config.min_train_games,
            });
        }
        let models = FittedModels::fit(&final_rows, &self.config.model)?;

        let oof = collector.metrics(None);
        let calibrated_brier = collector.metrics(Some(&calibration)).brier();
        let report = TrainingReport {
            league,
            seasons,
            folds: fold_reports,
            skipped,
            oof,
            calibrated_brier,
            calibration: calibration.name().to_string(),
            final_samples: final_rows.len(),
        };
        log::info!("Out-of-fold: {}", report.oof);

        let artifact = |model: TargetModel,
                        calibration: Option<CalibrationMap>,
                        residuals: Option<ResidualSummary>| ModelArtifact {
            format_version: FORMAT_VERSION,
            crate_version: CRATE_VERSION.to_string(),
            league,
            seasons,
            target: model.target(),
            model,
            calibration,
            residuals,
            feature_spec: self.spec.clone(),
            oof_samples: collector.len(),
            train_samples: final_rows.len(),
            trained_at: Utc::now(),
        };
        let artifacts = vec![
            artifact(models.margin, None, Some(margin_residuals)),
            artifact(models.total, None, Some(total_residuals)),
            artifact(models.win, Some(calibration), None),
        ];

        Ok(TrainingOutcome { artifacts, report })
    }

    fn run_fold(&self, fold: &Fold, samples: &[Sample]) -> Result<FoldOutcome> {
        let skip = |reason| -> Result<FoldOutcome> {
            Ok(FoldOutcome::Skipped(SkippedFold {
                index: fold.index,
                test_seasons: fold.test_seasons.clone(),
                reason,
            }))
        };
        if fold.test.is_empty() {
            return skip(SkipReason::EmptyTestSet);
        }
        if fold.train.len() < self.config.min_train_games {
            return skip(SkipReason::TooFewTrainingGames {
                available: fold.train.len(),
                required: self.config.min_train_games,
            });
        }

        let train: Vec<&Sample> = fold.train.iter().map(|&i| &samples[i]).collect();
        let models = match FittedModels::fit(&train, &self.config.model) {
            Ok(models) => models,
            Err(ForecastError::Model(detail)) => {
                log::warn!("Fold {} fit failed: {}", fold.index, detail);
                return skip(SkipReason::FitFailed(detail));
            }
            Err(e) => return Err(e),
        };

        let mut metrics = Metrics::new();
        let predictions: Vec<OofPrediction> = fold
            .test
            .iter()
            .map(|&i| {
                let sample = &samples[i];
                let row = sample.features.values();
                let prediction = OofPrediction {
                    game_id: sample.game_id.clone(),
                    season: sample.season,
                    fold: fold.index,
                    margin_pred: models.margin.predict_row(row),
                    total_pred: models.total.predict_row(row),
                    raw_probability: models.win.predict_row(row),
                    margin: sample.margin,
                    total: sample.total,
                    outcome: sample.outcome,
                };
                metrics.update(
                    prediction.margin_pred,
                    prediction.margin,
                    prediction.total_pred,
                    prediction.total,
                    prediction.raw_probability,
                    prediction.outcome,
                );
                prediction
            })
            .collect();

        Ok(FoldOutcome::Completed(
            FoldReport {
                index: fold.index,
                train_seasons: fold.train_seasons.clone(),
                test_seasons: fold.test_seasons.clone(),
                train_games: train.len(),
                test_games: predictions.len(),
                metrics,
            },
            predictions,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::GameDataset;
    use crate::features::{EloRatingEngine, FeatureBuilder, FeatureVector};
    use crate::test_support::{date, synthetic_league};
    use crate::training::calibration::CalibrationMethod;
    use crate::training::folds::SplitBoundary;

    fn dataset() -> (GameDataset, FeatureBuilder) {
        let builder = FeatureBuilder::new(Default::default(), Default::default());
        let seasons = synthetic_league(2019..=2023, 42);
        let dataset = GameDataset::from_seasons(&seasons, &EloRatingEngine::default(), &builder);
        (dataset, builder)
    }

    fn trainer(builder: &FeatureBuilder, config: TrainingConfig) -> WalkForwardTrainer {
        WalkForwardTrainer::new(config, builder.spec())
    }

    fn small_config() -> TrainingConfig {
        TrainingConfig {
            min_train_games: 20,
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn test_walk_forward_produces_all_targets() {
        let (dataset, builder) = dataset();
        let outcome = trainer(&builder, small_config())
            .fit(League::Nfl, SeasonRange::new(2019, 2023), &dataset.samples)
            .unwrap();

        assert_eq!(outcome.artifacts.len(), 3);
        for target in Target::ALL {
            let artifact = outcome.artifact(target).unwrap();
            artifact.check_compatible().unwrap();
            assert_eq!(artifact.feature_spec, builder.spec());
        }
        assert!(outcome.artifact(Target::WinProbability).unwrap().calibration.is_some());
        assert!(outcome.artifact(Target::Margin).unwrap().residuals.is_some());

        let report = &outcome.report;
        assert_eq!(report.folds.len(), 4);
        assert!(report.skipped.is_empty());
        let oof_games: usize = dataset.samples.iter().filter(|s| s.season >= 2020).count();
        assert_eq!(report.oof.count, oof_games);
        assert_eq!(report.final_samples, dataset.len());
        // Strong synthetic signal
        assert!(report.oof.accuracy() > 0.55);
    }

    #[test]
    fn test_folds_train_on_earlier_seasons_only() {
        let (dataset, builder) = dataset();
        let outcome = trainer(&builder, small_config())
            .fit(League::Nfl, SeasonRange::new(2019, 2023), &dataset.samples)
            .unwrap();
        for fold in &outcome.report.folds {
            let test = fold.test_seasons[0];
            assert!(fold.train_seasons.iter().all(|s| *s < test));
        }
    }

    #[test]
    fn test_small_folds_are_skipped_with_reason() {
        let (dataset, builder) = dataset();
        let per_season = dataset.samples.iter().filter(|s| s.season == 2019).count();
        let config = TrainingConfig {
            min_train_games: per_season + 1,
            ..TrainingConfig::default()
        };
        let outcome = trainer(&builder, config)
            .fit(League::Nfl, SeasonRange::new(2019, 2023), &dataset.samples)
            .unwrap();
        assert_eq!(outcome.report.skipped.len(), 1);
        assert_eq!(
            outcome.report.skipped[0].reason,
            SkipReason::TooFewTrainingGames {
                available: per_season,
                required: per_season + 1
            }
        );
        assert_eq!(outcome.report.folds.len(), 3);
        assert!(outcome.report.to_string().contains("skipped"));
    }

    #[test]
    fn test_no_surviving_fold_is_an_error() {
        let (dataset, builder) = dataset();
        let err = trainer(&builder, small_config())
            .fit(League::Nfl, SeasonRange::new(2019, 2019), &dataset.samples)
            .unwrap_err();
        assert!(matches!(err, ForecastError::InsufficientData { .. }));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let (dataset, builder) = dataset();
        let range = SeasonRange::new(2019, 2023);
        let parallel = trainer(&builder, small_config())
            .fit(League::Nfl, range, &dataset.samples)
            .unwrap();
        let sequential = trainer(
            &builder,
            TrainingConfig {
                parallel: false,
                ..small_config()
            },
        )
        .fit(League::Nfl, range, &dataset.samples)
        .unwrap();

        assert_eq!(parallel.report.oof, sequential.report.oof);
        for (a, b) in parallel.artifacts.iter().zip(&sequential.artifacts) {
            assert_eq!(a.model, b.model);
            assert_eq!(a.calibration, b.calibration);
            assert_eq!(a.residuals, b.residuals);
        }
    }

    #[test]
    fn test_single_split_and_platt() {
        let (dataset, builder) = dataset();
        let config = TrainingConfig {
            calibration: CalibrationMethod::Platt,
            ..small_config()
        };
        let policy = ValidationPolicy::SingleSplit(SplitBoundary::Date(date(2022, 1, 1)));
        let outcome = trainer(&builder, config)
            .fit_with_policy(League::Nfl, SeasonRange::new(2019, 2023), &dataset.samples, &policy)
            .unwrap();
        assert_eq!(outcome.report.folds.len(), 1);
        assert_eq!(outcome.report.folds[0].test_seasons, vec![2022, 2023]);
        assert_eq!(outcome.report.calibration, "platt");
    }

    #[test]
    fn test_collector_rejects_duplicates() {
        let prediction = OofPrediction {
            game_id: "g1".to_string(),
            season: 2020,
            fold: 0,
            margin_pred: 1.0,
            total_pred: 40.0,
            raw_probability: 0.6,
            margin: 3.0,
            total: 41.0,
            outcome: 1.0,
        };
        let mut collector = OutOfFoldCollector::new();
        collector.extend(vec![prediction.clone()]).unwrap();
        assert_eq!(collector.margin_residuals(), vec![2.0]);
        assert!(collector.extend(vec![prediction]).is_err());
        assert_eq!(collector.len(), 1);
    }

    #[test]
    fn test_fold_that_cannot_be_fitted_is_skipped() {
        let (mut dataset, builder) = dataset();
        let train: Vec<usize> = (0..dataset.len())
            .filter(|&i| dataset.samples[i].season == 2019)
            .collect();
        let test: Vec<usize> = (0..dataset.len())
            .filter(|&i| dataset.samples[i].season == 2020)
            .collect();
        for &i in &train {
            dataset.samples[i].features = FeatureVector::from_values([f64::NAN; FeatureVector::DIM]);
        }
        let fold = Fold {
            index: 3,
            train_seasons: vec![2019],
            test_seasons: vec![2020],
            train,
            test,
        };

        let outcome = trainer(&builder, small_config())
            .run_fold(&fold, &dataset.samples)
            .unwrap();
        let FoldOutcome::Skipped(skipped) = outcome else {
            panic!("fold with non-finite rows was not skipped");
        };
        assert_eq!(skipped.index, 3);
        assert_eq!(skipped.test_seasons, vec![2020]);
        assert!(matches!(skipped.reason, SkipReason::FitFailed(_)));
        assert!(skipped.reason.to_string().starts_with("fit failed"));
    }
}
