//! Tilewarmer - WMTS tile-cache pre-warming
//!
//! This library pre-warms a WMTS tile cache by issuing one HTTP GET per
//! (zoom, column, row, layer) combination across configured geographic
//! bounding boxes, forcing the backing cache to render and store every tile
//! in a region before end users request it.
//!
//! # Architecture
//!
//! ```text
//! config ──► TaskGenerator ──► RequestDispatcher ──► TileFetcher
//!               (coord)            │    ▲               (+ TokenProvider)
//!                                  ▼    │
//!                             ProgressTracker ──► status output
//! ```
//!
//! Task generation is a fast synchronous producer; the dispatcher holds at
//! most `workers` fetches in flight; fetched tile bodies are discarded, the
//! request alone makes the server cache the tile.

pub mod auth;
pub mod config;
pub mod coord;
pub mod dispatch;
pub mod fetch;
pub mod progress;
pub mod run;
pub mod task;

pub use auth::{AuthError, OAuthTokenFetcher, TokenFetcher, TokenProvider};
pub use config::{
    load_config_file, scan_config_dir, CacheArea, ConfigError, ConfigFile, Overrides, Protocol,
    RunOptions,
};
pub use coord::{tile_range, BoundingBox, CoordError, TileRange};
pub use dispatch::{DispatchSummary, RequestDispatcher};
pub use fetch::{FetchError, FetchOutcome, HttpTileFetcher, TileFetcher};
pub use progress::{ProgressReport, ProgressTracker};
pub use run::{count_tasks, run_config, RunError, RunReport};
pub use task::{Task, TaskGenerator};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
