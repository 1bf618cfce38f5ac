//! # Ecosystem Activity
//!
//! Tracks developer commit activity across a set of GitHub repositories.
//!
//! A long-running collector polls every configured repository for commits
//! authored since its watermark and reconciles them into SQLite: an
//! append-only commit ledger plus first/last bounds per repository and per
//! author. A sorted projection of the ledger is rebuilt on its own
//! schedule.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  GitHub API │──▶│  Collector  │──▶│    SQLite    │
//! │   (remote)  │   │  (cycles)   │   │ repos/users/ │
//! └─────────────┘   └─────────────┘   │   commits    │
//!                                     └──────┬───────┘
//!                      ┌─────────────────────┤
//!                      ▼                     ▼
//!                ┌──────────┐         ┌─────────────┐
//!                │  Sorter  │         │ CLI (stats, │
//!                │(rebuild) │         │ delete-bots)│
//!                └──────────┘         └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! activity init                 # create database
//! activity collect              # one pass over all repositories
//! activity sort                 # rebuild the sorted projection
//! activity serve                # collector + sorter + health endpoint
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the store trait |
//! | [`remote`] | Hosting API abstraction |
//! | [`github`] | GitHub REST client |
//! | [`repo_list`] | Repository list assembly |
//! | [`collector`] | Incremental ingestion cycles |
//! | [`sorter`] | Sorted projection rebuild |
//! | [`cleanup`] | Bot cleanup |
//! | [`backfill`] | Bound backfill from the ledger |
//! | [`import`] | CSV batch import |
//! | [`stats`] | Database statistics |
//! | [`server`] | Long-running service and health endpoints |
//! | [`logging`] | Tracing subscriber setup |

pub mod backfill;
pub mod cleanup;
pub mod collector;
pub mod config;
pub mod db;
pub mod github;
pub mod import;
pub mod logging;
pub mod migrate;
pub mod remote;
pub mod repo_list;
pub mod server;
pub mod sorter;
pub mod sqlite_store;
pub mod stats;
