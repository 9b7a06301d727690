//! CLI entry point for the metro validator.
//!
//! Provides subcommands for validating a transit extract end to end and for
//! listing the entrances that belong to no stop area.

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use metro_validator::{
    cache::ExportCache,
    config::{Config, Mode},
    fetch::{BasicClient, load_source},
    output::{append_record, print_json, write_bytes, write_export, write_json},
    parser::parse_elements,
    pipeline,
    registry::Registry,
};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "metro_validator")]
#[command(about = "Validate rail transit data and export routing graphs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate an extract and export every valid system
    Process {
        /// Path to an Overpass JSON file or URL to fetch
        #[arg(value_name = "FILE_OR_URL")]
        source: String,

        /// CSV registry of expected systems
        #[arg(short, long)]
        registry: Option<PathBuf>,

        /// Where to write the validation log
        #[arg(short, long, default_value = "validation.json")]
        log: PathBuf,

        /// Directory for routing graphs and GeoJSON files
        #[arg(short, long, default_value = "export")]
        output_dir: PathBuf,

        /// Gzip the export files
        #[arg(long, default_value_t = false)]
        gzip: bool,

        /// CSV file to append one summary row per system to
        #[arg(long)]
        summary: Option<String>,

        /// Optional: write entrances outside stop areas as GeoJSON
        #[arg(long)]
        unused_entrances: Option<PathBuf>,

        /// Log each system summary as pretty-printed JSON
        #[arg(long, default_value_t = false)]
        print: bool,

        /// Cache of the last good exports; invalid systems are served from it
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Only export the registry system with this name or id
        #[arg(short, long)]
        system: Option<String>,

        #[command(flatten)]
        settings: Settings,
    },
    /// Write entrances outside stop areas as GeoJSON
    Entrances {
        /// Path to an Overpass JSON file or URL to fetch
        #[arg(value_name = "FILE_OR_URL")]
        source: String,

        /// GeoJSON file to write
        #[arg(short, long, default_value = "unused_entrances.geojson")]
        output: PathBuf,

        #[command(flatten)]
        settings: Settings,
    },
}

/// Config file plus command-line overrides.
#[derive(Args)]
struct Settings {
    /// JSON config file; missing fields keep their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum station-to-track distance in metres
    #[arg(long)]
    gap_tolerance: Option<f64>,

    /// Entrance and platform search radius in metres
    #[arg(long)]
    entrance_radius: Option<f64>,

    /// Minimum distinct stations per route
    #[arg(long)]
    min_stops: Option<usize>,

    /// Modes to process (repeatable): subway, light_rail, monorail, train
    #[arg(long = "mode", value_parser = parse_mode)]
    modes: Vec<Mode>,

    /// Only export systems that match a registry entry
    #[arg(long, default_value_t = false)]
    matched_only: bool,

    /// Draw route lines from stop to stop instead of along the tracks
    #[arg(long, default_value_t = false)]
    crude: bool,
}

impl Settings {
    fn resolve(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(v) = self.gap_tolerance {
            config.gap_tolerance_m = v;
        }
        if let Some(v) = self.entrance_radius {
            config.entrance_radius_m = v;
        }
        if let Some(v) = self.min_stops {
            config.min_stops = v;
        }
        if !self.modes.is_empty() {
            config.modes = self.modes.iter().copied().collect();
        }
        if self.matched_only {
            config.include_unmatched = false;
        }
        if self.crude {
            config.crude_geometry = true;
        }
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn parse_mode(value: &str) -> Result<Mode, String> {
    Mode::from_tag(value).ok_or_else(|| format!("unknown mode {value:?}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/metro_validator.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("metro_validator.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Process {
            source,
            registry,
            log,
            output_dir,
            gzip,
            summary,
            unused_entrances,
            print,
            cache,
            system,
            settings,
        } => {
            let mut config = settings.resolve()?;
            let mut registry = match registry {
                Some(path) => Registry::load(&path)?,
                None => {
                    warn!("No registry given; every system will be unidentified");
                    Registry::default()
                }
            };
            if let Some(name) = &system {
                registry = registry.select(name);
                if registry.is_empty() {
                    bail!("No registry system named {name:?}");
                }
                config.include_unmatched = false;
                info!(system = %name, "Processing a single system");
            }
            let mut export_cache = match &cache {
                Some(path) => Some(ExportCache::load(path)?),
                None => None,
            };

            let client = BasicClient::new()?;
            let bytes = load_source(&client, &source).await?;

            let (outcome, export_cache) = tokio::task::spawn_blocking(
                move || -> Result<(pipeline::Outcome, Option<ExportCache>)> {
                    let store = parse_elements(&bytes)?;
                    let outcome = match export_cache.as_mut() {
                        Some(c) => pipeline::run_cached(&store, &registry, &config, c)?,
                        None => pipeline::run(&store, &registry, &config)?,
                    };
                    Ok((outcome, export_cache))
                },
            )
            .await??;

            if let (Some(path), Some(c)) = (&cache, &export_cache) {
                c.save(path)?;
            }

            write_json(&log, &outcome.log)?;
            for export in &outcome.exports {
                write_export(&output_dir, export, gzip)?;
            }
            if let Some(path) = &summary {
                for stats in &outcome.stats {
                    append_record(path, stats)?;
                }
            }
            if print {
                for stats in &outcome.stats {
                    print_json(stats)?;
                }
            }
            if let Some(path) = &unused_entrances {
                write_bytes(path, &outcome.unused_entrances, false)?;
            }

            info!(
                log = %log.display(),
                output_dir = %output_dir.display(),
                systems = outcome.log.systems.len(),
                valid = outcome.log.valid_systems(),
                exported = outcome.exports.len(),
                recovered = outcome.recovered.len(),
                "Done"
            );
        }
        Commands::Entrances {
            source,
            output,
            settings,
        } => {
            let config = settings.resolve()?;
            let client = BasicClient::new()?;
            let bytes = load_source(&client, &source).await?;

            let geojson = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
                let store = parse_elements(&bytes)?;
                pipeline::entrances_only(&store, &config)
            })
            .await??;

            write_bytes(&output, &geojson, false)?;
            info!(output = %output.display(), "Unused entrances written");
        }
    }

    Ok(())
}
