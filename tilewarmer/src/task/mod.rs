//! Fetch-task generation.
//!
//! A [`TaskGenerator`] expands one cache area into a finite, deterministically
//! ordered sequence of [`Task`] values: zoom levels ascending, then tile
//! columns ascending, then tile rows ascending, then layers in configured
//! order. The same traversal backs both the counting pass (no allocation of
//! tasks, pure arithmetic) and the generation pass, so the pre-computed total
//! always matches the number of tasks generated.

use std::borrow::Cow;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use crate::config::{CacheArea, Protocol};
use crate::coord::{tile_range, BoundingBox, CoordError, TileRange};

/// Characters percent-encoded in WMTS query values.
///
/// Matches the legacy tool's `encodeURI` behavior: unreserved characters and
/// URI punctuation pass through untouched, everything else is escaped.
const QUERY_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

fn encode_value(value: &str) -> Cow<'_, str> {
    utf8_percent_encode(value, QUERY_VALUE).into()
}

/// One tile-fetch unit.
///
/// Created by [`TaskGenerator`], consumed exactly once by the dispatcher,
/// then discarded. The TLS flag travels with the task so certificate
/// verification is a per-request decision, never ambient process state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Protocol of the target server.
    pub protocol: Protocol,

    /// Target host name.
    pub host: String,

    /// Target port.
    pub port: u16,

    /// Fully-built request path including the WMTS query string.
    pub path: String,

    /// Position in generation order within the cache area, starting at 0.
    /// Increases by exactly 1 per task; the token-refresh cadence keys off it.
    pub sequence: u64,

    /// Whether the request must carry a bearer token.
    pub use_auth: bool,

    /// Whether TLS certificate verification is skipped for this request.
    pub skip_tls_verify: bool,
}

impl Task {
    /// The full request URL.
    pub fn url(&self) -> String {
        format!("{}://{}:{}{}", self.protocol, self.host, self.port, self.path)
    }
}

/// Expands a cache area into fetch tasks.
pub struct TaskGenerator {
    protocol: Protocol,
    host: String,
    port: u16,
    path_prefix: String,
    start_zoom: u8,
    stop_zoom: u8,
    bounds: BoundingBox,
    layers: Vec<String>,
    use_auth: bool,
    skip_tls_verify: bool,
}

impl TaskGenerator {
    /// Creates a generator for one cache area.
    ///
    /// The WMTS preamble shared by every request is built once here.
    pub fn new(area: &CacheArea) -> Self {
        let path_prefix = format!(
            "/maps?SERVICE=WMTS&REQUEST=GetTile&VERSION=1.0.0&STYLE={}&FORMAT={}&TILEMATRIXSET={}",
            encode_value(&area.style_name),
            encode_value(&area.format),
            encode_value(&area.tile_matrix_set),
        );
        Self {
            protocol: area.server_protocol,
            host: area.server_name.clone(),
            port: area.server_port,
            path_prefix,
            start_zoom: area.start_zoom,
            stop_zoom: area.stop_zoom,
            bounds: area.bounds,
            layers: area.layer_names.clone(),
            use_auth: area.use_auth,
            skip_tls_verify: area.no_certificate_check,
        }
    }

    /// Tile ranges per zoom level, in ascending zoom order.
    fn zoom_ranges(&self) -> Result<Vec<(u8, TileRange)>, CoordError> {
        (self.start_zoom..=self.stop_zoom)
            .map(|zoom| tile_range(zoom, &self.bounds).map(|range| (zoom, range)))
            .collect()
    }

    /// Counts the tasks this generator will produce, without producing them.
    ///
    /// Walks the same per-zoom ranges as [`TaskGenerator::tasks`]; the two
    /// always agree.
    pub fn count(&self) -> Result<u64, CoordError> {
        let layers = self.layers.len() as u64;
        Ok(self
            .zoom_ranges()?
            .iter()
            .map(|(_, range)| range.tile_count() * layers)
            .sum())
    }

    /// Enumerates the tasks in generation order.
    ///
    /// The sequence index increases by exactly 1 per task.
    pub fn tasks(&self) -> Result<impl Iterator<Item = Task> + '_, CoordError> {
        let ranges = self.zoom_ranges()?;
        let iter = ranges
            .into_iter()
            .flat_map(move |(zoom, range)| {
                (range.x_min..=range.x_max).flat_map(move |x| {
                    (range.y_min..=range.y_max).flat_map(move |y| {
                        self.layers
                            .iter()
                            .map(move |layer| (zoom, x, y, layer.as_str()))
                    })
                })
            })
            .enumerate()
            .map(move |(sequence, (zoom, x, y, layer))| {
                self.build_task(sequence as u64, zoom, x, y, layer)
            });
        Ok(iter)
    }

    fn build_task(&self, sequence: u64, zoom: u8, x: u32, y: u32, layer: &str) -> Task {
        let path = format!(
            "{}&TILEMATRIX={}&TILECOL={}&TILEROW={}&LAYER={}",
            self.path_prefix,
            zoom,
            x,
            y,
            encode_value(layer),
        );
        Task {
            protocol: self.protocol,
            host: self.host.clone(),
            port: self.port,
            path,
            sequence,
            use_auth: self.use_auth,
            skip_tls_verify: self.skip_tls_verify,
        }
    }
}
