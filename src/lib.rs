//! # pic-rater
//!
//! A gallery backend that helps a human rate a large image folder.
//!
//! Images are registered from a directory tree, picked at random with a bias
//! toward the least-rated ones, found by path, filename, or embedded tags,
//! and rated. Once an image has enough ratings its rounded average is written
//! back into the file's own metadata.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌────────────┐
//! │  Gallery    │──▶│  Reindex /   │──▶│   SQLite   │
//! │  (on disk)  │   │  Tag sync    │   │ FTS5 + tags│
//! └─────────────┘   └──────────────┘   └─────┬──────┘
//!                                            │
//!                        ┌───────────────────┤
//!                        ▼                   ▼
//!                   ┌──────────┐       ┌──────────┐
//!                   │   CLI    │       │   HTTP   │
//!                   │(picrater)│       │  (axum)  │
//!                   └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! picrater init                      # create database
//! picrater reindex                   # register gallery files
//! picrater sync-tags                 # pull embedded subjects
//! picrater pick --cat landscape      # least-rated landscape
//! picrater rate landscape/a.jpg 4
//! picrater serve                     # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`error`] | Shared error type |
//! | [`models`] | Core data types |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`gallery`] | Directory walking and id derivation |
//! | [`metadata`] | Embedded tag read and rating write-back |
//! | [`reindex`] | Registry reconciliation |
//! | [`tags`] | Tag sync |
//! | [`fts`] | Full-text index maintenance |
//! | [`search`] | Tag and path search |
//! | [`select`] | Biased random selection |
//! | [`rate`] | Rating aggregation |
//! | [`stats`] | Stats, leaderboard, and health |
//! | [`server`] | HTTP server |

pub mod config;
pub mod db;
pub mod error;
pub mod fts;
pub mod gallery;
pub mod metadata;
pub mod migrate;
pub mod models;
pub mod rate;
pub mod reindex;
pub mod search;
pub mod select;
pub mod server;
pub mod stats;
pub mod tags;
