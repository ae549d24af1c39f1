//! Data ingestion and storage
//!
//! SQLite game store, season feeds, training samples and model artifacts.

pub mod artifact_store;
pub mod database;
pub mod dataset;
pub mod feed;

pub use artifact_store::ArtifactStore;
pub use database::Database;
pub use dataset::{GameDataset, Sample};
pub use feed::{ensure_chronological, GameFeed, GameImport};
