//! Feature extraction
//!
//! Elo and SRS ratings, rolling team form and the pre-game feature vector
//! built from them.

pub mod builder;
pub mod elo;
pub mod srs;
pub mod team_stats;

pub use builder::{
    feature_names, BuiltFeatures, ColdStartPolicy, FeatureBuilder, FeatureConfig, FeatureSpec,
    FeatureVector, PregameState, RatingSource, FEATURE_NAMES,
};
pub use elo::{
    EloConfig, EloRatingEngine, RatingTimeline, RatingsSnapshot, SeasonRatings, SeasonState,
    TeamRating, TimelineEntry,
};
pub use srs::{SrsConfig, SrsTracker};
pub use team_stats::{RollingStatistics, StatsSnapshot};
