//! Per-configuration run orchestration.
//!
//! A run over one configuration file is two passes:
//!
//! 1. **Counting pass** — walks every cache area's task enumeration purely
//!    arithmetically to fix each area's total and the grand total. No
//!    network I/O; count-only mode stops here.
//! 2. **Dispatch pass** — for each cache area in order, builds a progress
//!    tracker (denominator = that area's total, computed once and never
//!    recomputed mid-run), an optional token provider, and dispatches every
//!    task through the shared fetcher.

use thiserror::Error;
use tracing::info;

use crate::auth::{AuthError, OAuthTokenFetcher, TokenProvider};
use crate::config::{ConfigFile, RunOptions};
use crate::coord::CoordError;
use crate::dispatch::RequestDispatcher;
use crate::fetch::{FetchError, HttpTileFetcher};
use crate::progress::ProgressTracker;
use crate::task::TaskGenerator;

/// Errors that abort a configuration run before or during dispatch.
///
/// Per-task failures never surface here; they are classified outcomes.
#[derive(Debug, Error)]
pub enum RunError {
    /// Tile math rejected a zoom level or bounding box.
    #[error(transparent)]
    Coord(#[from] CoordError),

    /// The HTTP fetcher could not be constructed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The token client could not be constructed.
    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Accounting for one configuration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Task count per cache area, in configuration order.
    pub area_totals: Vec<u64>,
    /// Sum of all area totals.
    pub grand_total: u64,
    /// Tasks completed (failures included); zero in count-only mode.
    pub completed: u64,
    /// Tasks that did not succeed.
    pub failed: u64,
}

/// Counts the tasks a configuration would generate, without dispatching.
pub fn count_tasks(config: &ConfigFile) -> Result<RunReport, RunError> {
    let mut area_totals = Vec::with_capacity(config.cache_areas.len());
    for area in &config.cache_areas {
        let total = TaskGenerator::new(area).count()?;
        info!(
            server = %area.server_name,
            zoom_start = area.start_zoom,
            zoom_stop = area.stop_zoom,
            tiles = total,
            "counted cache area"
        );
        area_totals.push(total);
    }
    let grand_total = area_totals.iter().sum();
    Ok(RunReport {
        area_totals,
        grand_total,
        completed: 0,
        failed: 0,
    })
}

/// Runs one loaded configuration to completion.
///
/// In count-only mode this reduces to the counting pass. Otherwise each
/// cache area is dispatched in order through one shared fetcher.
pub async fn run_config(config: &ConfigFile, options: &RunOptions) -> Result<RunReport, RunError> {
    let mut report = count_tasks(config)?;
    info!(grand_total = report.grand_total, "grand tile total");

    if options.count_only {
        return Ok(report);
    }

    let fetcher = HttpTileFetcher::new(options)?;
    let dispatcher = RequestDispatcher::new(fetcher, options.workers);

    for (area, &total) in config.cache_areas.iter().zip(&report.area_totals) {
        let generator = TaskGenerator::new(area);
        let tracker = ProgressTracker::new(total, options.report_interval);

        let mut provider = match area.auth_settings() {
            Some(settings) => Some(TokenProvider::new(
                OAuthTokenFetcher::new(options.socket_timeout)?,
                settings,
            )),
            None => None,
        };

        info!(
            server = %area.server_name,
            tiles = total,
            workers = options.workers,
            "dispatching cache area"
        );

        let summary = dispatcher
            .run(generator.tasks()?, provider.as_mut(), &tracker)
            .await;

        info!(
            server = %area.server_name,
            completed = summary.completed,
            failed = summary.failed,
            "cache area finished"
        );

        report.completed += summary.completed;
        report.failed += summary.failed;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_file;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(contents: &str) -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("areas.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        (dir, path)
    }

    fn two_area_config() -> &'static str {
        r#"{
            "cacheareas": [
                {
                    "servername": "a.example.com",
                    "serverport": 80,
                    "stylename": "default",
                    "format": "image/png",
                    "tilematrixset": "EPSG:3857",
                    "startzoomlevel": 0,
                    "stopzoomlevel": 1,
                    "bounds": { "minx": -180, "miny": -85, "maxx": 180, "maxy": 85 },
                    "layernames": ["roads"]
                },
                {
                    "servername": "b.example.com",
                    "serverport": 80,
                    "stylename": "default",
                    "format": "image/png",
                    "tilematrixset": "EPSG:3857",
                    "startzoomlevel": 2,
                    "stopzoomlevel": 2,
                    "bounds": { "minx": -180, "miny": -85, "maxx": 180, "maxy": 85 },
                    "layernames": ["roads", "water"]
                }
            ]
        }"#
    }

    #[test]
    fn test_count_tasks_per_area_and_grand_total() {
        let (_dir, path) = write_config(two_area_config());
        let config = load_config_file(&path).unwrap();

        let report = count_tasks(&config).unwrap();
        // Area A: zoom 0 (1 tile) + zoom 1 (4 tiles), one layer.
        // Area B: zoom 2 (16 tiles), two layers.
        assert_eq!(report.area_totals, vec![5, 32]);
        assert_eq!(report.grand_total, 37);
        assert_eq!(report.completed, 0);
    }

    #[tokio::test]
    async fn test_count_only_run_dispatches_nothing() {
        let (_dir, path) = write_config(two_area_config());
        let config = load_config_file(&path).unwrap();

        let options = RunOptions::default().with_count_only(true);
        let report = run_config(&config, &options).await.unwrap();

        assert_eq!(report.grand_total, 37);
        assert_eq!(report.completed, 0);
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn test_count_tasks_surfaces_zoom_errors() {
        let (_dir, path) = write_config(two_area_config());
        let mut config = load_config_file(&path).unwrap();
        config.cache_areas[0].stop_zoom = 31;

        assert!(matches!(
            count_tasks(&config),
            Err(RunError::Coord(CoordError::InvalidZoom(31)))
        ));
    }
}
