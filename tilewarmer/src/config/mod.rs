//! Cache-area configuration loading.
//!
//! Configuration files are JSON documents listing one or more cache areas,
//! each describing a server, a WMTS layer set, a zoom range and a bounding
//! box. The field names match the legacy tool's format so existing config
//! files keep working:
//!
//! ```json
//! {
//!     "cacheareas": [
//!         {
//!             "servername": "tiles.example.com",
//!             "serverport": 443,
//!             "serverprotocol": "https",
//!             "stylename": "default",
//!             "format": "image/png",
//!             "tilematrixset": "EPSG:3857",
//!             "startzoomlevel": 0,
//!             "stopzoomlevel": 10,
//!             "bounds": { "minx": -180, "miny": -85, "maxx": 180, "maxy": 85 },
//!             "layernames": ["roads", "buildings"]
//!         }
//!     ]
//! }
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::coord::{BoundingBox, CoordError};

/// Default number of concurrent fetch workers.
pub const DEFAULT_WORKERS: usize = 10;

/// Default socket timeout in seconds.
pub const DEFAULT_SOCKET_TIMEOUT_SECS: u64 = 120;

/// Errors raised while loading or validating configuration.
///
/// A configuration error is fatal to the one affected file only; batch
/// processing of a config directory continues with the remaining files.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a config file or directory.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid JSON or misses required fields.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A cache area violates a structural invariant.
    #[error("invalid cache area '{area}': {reason}")]
    Validation { area: String, reason: String },

    /// Bounding box validation failure.
    #[error("invalid cache area '{area}': {source}")]
    Bounds {
        area: String,
        #[source]
        source: CoordError,
    },
}

/// Wire protocol used to reach the tile server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => write!(f, "http"),
            Protocol::Https => write!(f, "https"),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            other => Err(format!("unknown protocol '{other}' (expected http or https)")),
        }
    }
}

/// A loaded configuration file: an ordered list of cache areas.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    #[serde(rename = "cacheareas")]
    pub cache_areas: Vec<CacheArea>,
}

/// One configured region to pre-warm.
///
/// Immutable once loaded (command-line overrides are applied before
/// validation); owned by the run.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheArea {
    /// Tile server host name.
    #[serde(rename = "servername")]
    pub server_name: String,

    /// Tile server port.
    #[serde(rename = "serverport")]
    pub server_port: u16,

    /// Protocol, defaulting to plain HTTP as the legacy tool did.
    #[serde(rename = "serverprotocol", default)]
    pub server_protocol: Protocol,

    /// WMTS STYLE parameter.
    #[serde(rename = "stylename")]
    pub style_name: String,

    /// WMTS FORMAT parameter, e.g. `image/png`.
    pub format: String,

    /// WMTS TILEMATRIXSET parameter.
    #[serde(rename = "tilematrixset")]
    pub tile_matrix_set: String,

    /// First zoom level to request (inclusive).
    #[serde(rename = "startzoomlevel")]
    pub start_zoom: u8,

    /// Last zoom level to request (inclusive).
    #[serde(rename = "stopzoomlevel")]
    pub stop_zoom: u8,

    /// Geographic region to cover.
    pub bounds: BoundingBox,

    /// Ordered list of WMTS LAYER names; one request per tile per layer.
    #[serde(rename = "layernames")]
    pub layer_names: Vec<String>,

    /// Whether requests carry an OAuth2 bearer token.
    #[serde(rename = "useauth", default)]
    pub use_auth: bool,

    /// Token endpoint URL (required when `use_auth`).
    #[serde(rename = "authurl", default)]
    pub auth_url: Option<String>,

    /// OAuth2 client id (required when `use_auth`).
    #[serde(rename = "clientid", default)]
    pub client_id: Option<String>,

    /// OAuth2 client secret (required when `use_auth`).
    #[serde(rename = "clientsecret", default)]
    pub client_secret: Option<String>,

    /// Token refresh cadence: refresh every N-th task (sequence % N == 0).
    #[serde(rename = "refreshtokeninterval", default)]
    pub refresh_token_interval: Option<u64>,

    /// Skip TLS certificate verification for this area's requests.
    #[serde(rename = "nocertificatecheck", default)]
    pub no_certificate_check: bool,
}

/// Resolved auth settings for a cache area with `use_auth` enabled.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub auth_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_interval: u64,
}

impl CacheArea {
    /// Validates the area's structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let area = self.server_name.clone();

        self.bounds.validate().map_err(|source| ConfigError::Bounds {
            area: area.clone(),
            source,
        })?;

        if self.start_zoom > self.stop_zoom {
            return Err(ConfigError::Validation {
                area,
                reason: format!(
                    "startzoomlevel {} exceeds stopzoomlevel {}",
                    self.start_zoom, self.stop_zoom
                ),
            });
        }
        if self.layer_names.is_empty() {
            return Err(ConfigError::Validation {
                area,
                reason: "layernames must not be empty".to_string(),
            });
        }
        if self.use_auth {
            for (field, value) in [
                ("authurl", &self.auth_url),
                ("clientid", &self.client_id),
                ("clientsecret", &self.client_secret),
            ] {
                if value.as_deref().map_or(true, str::is_empty) {
                    return Err(ConfigError::Validation {
                        area,
                        reason: format!("useauth requires {field}"),
                    });
                }
            }
            if self.refresh_token_interval.map_or(true, |i| i < 1) {
                return Err(ConfigError::Validation {
                    area,
                    reason: "refreshtokeninterval must be >= 1".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Returns the auth settings when auth is enabled.
    ///
    /// Call after [`CacheArea::validate`]; returns `None` both when auth is
    /// disabled and when the auth block is incomplete.
    pub fn auth_settings(&self) -> Option<AuthSettings> {
        if !self.use_auth {
            return None;
        }
        Some(AuthSettings {
            auth_url: self.auth_url.clone()?,
            client_id: self.client_id.clone()?,
            client_secret: self.client_secret.clone()?,
            refresh_interval: self.refresh_token_interval?,
        })
    }
}

/// Command-line overrides applied to every cache area before a run.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub start_zoom: Option<u8>,
    pub stop_zoom: Option<u8>,
    pub server_name: Option<String>,
    pub server_port: Option<u16>,
    pub server_protocol: Option<Protocol>,
    pub layer_names: Option<Vec<String>>,
}

impl Overrides {
    /// Applies the overrides to one cache area.
    ///
    /// The result is not revalidated here; callers validate after applying.
    pub fn apply(&self, area: &mut CacheArea) {
        if let Some(zoom) = self.start_zoom {
            area.start_zoom = zoom;
        }
        if let Some(zoom) = self.stop_zoom {
            area.stop_zoom = zoom;
        }
        if let Some(ref name) = self.server_name {
            area.server_name = name.clone();
        }
        if let Some(port) = self.server_port {
            area.server_port = port;
        }
        if let Some(protocol) = self.server_protocol {
            area.server_protocol = protocol;
        }
        if let Some(ref layers) = self.layer_names {
            area.layer_names = layers.clone();
        }
    }
}

/// Resolved runtime options for a warming run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum number of requests concurrently in flight.
    pub workers: usize,

    /// Count tiles without issuing any requests.
    pub count_only: bool,

    /// Emit a status line every N completions; `None` selects
    /// `min(1000, total)` per cache area.
    pub report_interval: Option<u64>,

    /// Reuse connections across requests. Off by default, matching the
    /// legacy tool: each request pays connection setup but the server sees
    /// no long-lived sockets.
    pub connection_pooling: bool,

    /// Per-request socket timeout.
    pub socket_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            count_only: false,
            report_interval: None,
            connection_pooling: false,
            socket_timeout: Duration::from_secs(DEFAULT_SOCKET_TIMEOUT_SECS),
        }
    }
}

impl RunOptions {
    /// Sets the worker count (minimum 1).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets count-only mode.
    pub fn with_count_only(mut self, count_only: bool) -> Self {
        self.count_only = count_only;
        self
    }

    /// Sets the progress report interval.
    pub fn with_report_interval(mut self, interval: Option<u64>) -> Self {
        self.report_interval = interval;
        self
    }

    /// Enables or disables connection pooling.
    pub fn with_connection_pooling(mut self, pooling: bool) -> Self {
        self.connection_pooling = pooling;
        self
    }

    /// Sets the socket timeout in seconds.
    pub fn with_socket_timeout_secs(mut self, secs: u64) -> Self {
        self.socket_timeout = Duration::from_secs(secs);
        self
    }
}

/// Loads and validates a single configuration file.
pub fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: ConfigFile = serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    for area in &config.cache_areas {
        area.validate()?;
    }
    Ok(config)
}

/// Lists the `.json` configuration files in a directory, sorted by name.
pub fn scan_config_dir(dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let entries = fs::read_dir(dir).map_err(|source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file() && path.extension().map(|ext| ext == "json").unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn sample_json() -> &'static str {
        r#"{
            "cacheareas": [
                {
                    "servername": "tiles.example.com",
                    "serverport": 8080,
                    "serverprotocol": "https",
                    "stylename": "default",
                    "format": "image/png",
                    "tilematrixset": "EPSG:3857",
                    "startzoomlevel": 2,
                    "stopzoomlevel": 5,
                    "bounds": { "minx": -10.0, "miny": -5.0, "maxx": 10.0, "maxy": 5.0 },
                    "layernames": ["roads", "water"],
                    "nocertificatecheck": true
                }
            ]
        }"#
    }

    fn write_config(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn sample_area() -> CacheArea {
        let config: ConfigFile = serde_json::from_str(sample_json()).unwrap();
        config.cache_areas.into_iter().next().unwrap()
    }

    #[test]
    fn test_load_config_file_maps_legacy_field_names() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "areas.json", sample_json());

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.cache_areas.len(), 1);

        let area = &config.cache_areas[0];
        assert_eq!(area.server_name, "tiles.example.com");
        assert_eq!(area.server_port, 8080);
        assert_eq!(area.server_protocol, Protocol::Https);
        assert_eq!(area.tile_matrix_set, "EPSG:3857");
        assert_eq!(area.bounds.min_lon, -10.0);
        assert_eq!(area.layer_names, vec!["roads", "water"]);
        assert!(area.no_certificate_check);
        assert!(!area.use_auth);
    }

    #[test]
    fn test_protocol_defaults_to_http() {
        let json = sample_json().replace("\"serverprotocol\": \"https\",", "");
        let config: ConfigFile = serde_json::from_str(&json).unwrap();
        assert_eq!(config.cache_areas[0].server_protocol, Protocol::Http);
    }

    #[test]
    fn test_load_config_file_missing() {
        let result = load_config_file(Path::new("/nonexistent/config.json"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_load_config_file_malformed() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "broken.json", "{ not json");
        let result = load_config_file(&path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_validate_rejects_reversed_zoom_range() {
        let mut area = sample_area();
        area.start_zoom = 6;
        area.stop_zoom = 3;
        let err = area.validate().unwrap_err();
        assert!(err.to_string().contains("startzoomlevel"));
    }

    #[test]
    fn test_validate_rejects_empty_layers() {
        let mut area = sample_area();
        area.layer_names.clear();
        assert!(area.validate().is_err());
    }

    #[test]
    fn test_validate_requires_auth_fields() {
        let mut area = sample_area();
        area.use_auth = true;
        assert!(area.validate().is_err());

        area.auth_url = Some("https://uaa.example.com/oauth/token".to_string());
        area.client_id = Some("warmup".to_string());
        area.client_secret = Some("secret".to_string());
        area.refresh_token_interval = Some(0);
        let err = area.validate().unwrap_err();
        assert!(err.to_string().contains("refreshtokeninterval"));

        area.refresh_token_interval = Some(500);
        assert!(area.validate().is_ok());

        let auth = area.auth_settings().unwrap();
        assert_eq!(auth.client_id, "warmup");
        assert_eq!(auth.refresh_interval, 500);
    }

    #[test]
    fn test_auth_settings_none_without_auth() {
        assert!(sample_area().auth_settings().is_none());
    }

    #[test]
    fn test_scan_config_dir_filters_json() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, "b.json", "{}");
        write_config(&dir, "a.json", "{}");
        write_config(&dir, "notes.txt", "ignore me");

        let files = scan_config_dir(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.json", "b.json"]);
    }

    #[test]
    fn test_overrides_apply() {
        let mut area = sample_area();
        let overrides = Overrides {
            start_zoom: Some(1),
            stop_zoom: Some(3),
            server_name: Some("other.example.com".to_string()),
            server_port: Some(9000),
            server_protocol: Some(Protocol::Http),
            layer_names: Some(vec!["parks".to_string()]),
        };
        overrides.apply(&mut area);

        assert_eq!(area.start_zoom, 1);
        assert_eq!(area.stop_zoom, 3);
        assert_eq!(area.server_name, "other.example.com");
        assert_eq!(area.server_port, 9000);
        assert_eq!(area.server_protocol, Protocol::Http);
        assert_eq!(area.layer_names, vec!["parks"]);
    }

    #[test]
    fn test_overrides_default_is_noop() {
        let mut area = sample_area();
        let before = format!("{area:?}");
        Overrides::default().apply(&mut area);
        assert_eq!(format!("{area:?}"), before);
    }

    #[test]
    fn test_protocol_from_str() {
        assert_eq!("http".parse::<Protocol>().unwrap(), Protocol::Http);
        assert_eq!("HTTPS".parse::<Protocol>().unwrap(), Protocol::Https);
        assert!("gopher".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_run_options_builders() {
        let options = RunOptions::default()
            .with_workers(0)
            .with_count_only(true)
            .with_report_interval(Some(250))
            .with_connection_pooling(true)
            .with_socket_timeout_secs(30);

        assert_eq!(options.workers, 1, "worker count is clamped to >= 1");
        assert!(options.count_only);
        assert_eq!(options.report_interval, Some(250));
        assert!(options.connection_pooling);
        assert_eq!(options.socket_timeout, Duration::from_secs(30));
    }
}
