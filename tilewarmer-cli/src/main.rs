//! Tilewarmer CLI - pre-warm a WMTS tile cache over configured bounding boxes.
//!
//! Reads one JSON configuration file (or every `.json` file in a directory)
//! and issues a GET for each (zoom, column, row, layer) combination. A
//! malformed file aborts only that file's run; the batch continues.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgGroup, Parser};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tilewarmer::config::{self, Overrides, Protocol, RunOptions};
use tilewarmer::run;

#[derive(Debug, Parser)]
#[command(
    name = "tilewarmer",
    version,
    about = "Makes WMTS requests to a server over a set of bounding boxes",
    group(ArgGroup::new("source").required(true).args(["config_file", "config_dir"]))
)]
struct Cli {
    /// JSON file containing the caching definitions.
    #[arg(short = 'c', long)]
    config_file: Option<PathBuf>,

    /// Directory of JSON config files, processed one after another.
    #[arg(short = 'd', long)]
    config_dir: Option<PathBuf>,

    /// Number of simultaneous requests in flight.
    #[arg(short = 'w', long, default_value_t = config::DEFAULT_WORKERS)]
    workers: usize,

    /// Only count tiles, do not make any requests.
    #[arg(short = 'o', long)]
    count_only: bool,

    /// Report progress every N requests (default: min(1000, total)).
    #[arg(short = 'r', long)]
    report_interval: Option<u64>,

    /// Reuse connections across requests instead of one socket per request.
    #[arg(short = 'p', long)]
    connection_pooling: bool,

    /// Socket timeout in seconds.
    #[arg(short = 's', long, default_value_t = config::DEFAULT_SOCKET_TIMEOUT_SECS)]
    socket_timeout: u64,

    /// Override the start zoom level for every cache area.
    #[arg(long, value_name = "ZOOM")]
    zoom_start_override: Option<u8>,

    /// Override the stop zoom level for every cache area.
    #[arg(long, value_name = "ZOOM")]
    zoom_stop_override: Option<u8>,

    /// Override the server name for every cache area.
    #[arg(long, value_name = "HOST")]
    server_name_override: Option<String>,

    /// Override the server port for every cache area.
    #[arg(long, value_name = "PORT")]
    server_port_override: Option<u16>,

    /// Override the protocol (http or https) for every cache area.
    #[arg(long, value_name = "PROTOCOL")]
    server_protocol_override: Option<Protocol>,

    /// Override the layer list, e.g. "roads,water" or "[roads,water]".
    #[arg(short = 'm', long, value_name = "LAYERS")]
    layers_override: Option<String>,

    /// Increase log verbosity (-v: debug, -vv: trace).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            start_zoom: self.zoom_start_override,
            stop_zoom: self.zoom_stop_override,
            server_name: self.server_name_override.clone(),
            server_port: self.server_port_override,
            server_protocol: self.server_protocol_override,
            layer_names: self.layers_override.as_deref().map(parse_layers),
        }
    }

    fn run_options(&self) -> RunOptions {
        RunOptions::default()
            .with_workers(self.workers)
            .with_count_only(self.count_only)
            .with_report_interval(self.report_interval)
            .with_connection_pooling(self.connection_pooling)
            .with_socket_timeout_secs(self.socket_timeout)
    }
}

/// Parses a layer override: comma-separated names, optionally bracketed
/// in the legacy `[a,b,c]` style.
fn parse_layers(raw: &str) -> Vec<String> {
    raw.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|layer| layer.trim().to_string())
        .filter(|layer| !layer.is_empty())
        .collect()
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tilewarmer={default_level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let files = match &cli.config_dir {
        Some(dir) => match config::scan_config_dir(dir) {
            Ok(files) => files,
            Err(e) => {
                error!(error = %e, "failed to read config directory");
                return ExitCode::FAILURE;
            }
        },
        // The arg group guarantees one of the two is present.
        None => cli.config_file.iter().cloned().collect(),
    };

    if files.is_empty() {
        error!("no configuration files found");
        return ExitCode::FAILURE;
    }

    let overrides = cli.overrides();
    let options = cli.run_options();

    let mut succeeded = 0usize;
    for path in &files {
        match process_file(path, &overrides, &options).await {
            Ok(()) => succeeded += 1,
            Err(e) => error!(file = %path.display(), error = %e, "skipping config file"),
        }
    }

    if succeeded == 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn process_file(
    path: &std::path::Path,
    overrides: &Overrides,
    options: &RunOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = config::load_config_file(path)?;

    for area in &mut config.cache_areas {
        overrides.apply(area);
        area.validate()?;
    }

    info!(file = %path.display(), areas = config.cache_areas.len(), "processing config file");

    let report = run::run_config(&config, options).await?;

    if options.count_only {
        println!("{}, grand tile total = {}", path.display(), report.grand_total);
    } else {
        println!(
            "{}: {} tiles requested, {} failed (of {} total)",
            path.display(),
            report.completed,
            report.failed,
            report.grand_total
        );
    }
    Ok(())
}
