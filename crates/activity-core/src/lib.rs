//! # Ecosystem Activity Core
//!
//! Shared, runtime-free logic for Ecosystem Activity: data models, the
//! bot classifier, first/last bound arithmetic, and the storage trait
//! with an in-memory implementation.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies. The SQLite
//! backend and the GitHub client live in the `ecosystem-activity` crate.

pub mod bots;
pub mod bounds;
pub mod models;
pub mod store;

pub use bots::BotClassifier;
pub use bounds::Bounds;
pub use store::{ActivityStore, DuplicateRowError};
