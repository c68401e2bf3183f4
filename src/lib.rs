//! Feed acquisition and synchronization engine for the Tumbleweed podcast
//! and RSS reader.
//!
//! - [`storage`] - SQLite persistence of feeds and episodes
//! - [`feed`] - Fetching, streaming parse, deduplication, OPML
//! - [`app`] - Observable application state driving the engine
//! - [`config`] - `config.toml` loading
//! - [`util`] - URL validation

pub mod app;
pub mod config;
pub mod feed;
pub mod storage;
pub mod util;
