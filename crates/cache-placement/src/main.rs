//! Cache Placement CLI
//!
//! Selects cache satellites for one constellation over its orbital cycle.
//!
//! Usage:
//!   place-caches --parameters data/parameters.csv \
//!                --gateways data/gateways.json \
//!                --cities data/cities.txt \
//!                --data-centers data/data_centers.txt \
//!                --delay-root data/delays \
//!                --output data/placement.json

use anyhow::{Context, Result};
use cache_placement::{
    run_placement, ConstellationParameters, GoodLpBackend, JsonDelayStore, NodeLayout,
    PlacementConfig, PlacementInputs,
};
use clap::Parser;
use ground_assets::{
    fallback_weights, gateway_backhaul, load_cities, load_data_centers, load_gateways,
    nearest_ground_station,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "place-caches",
    about = "Select cache satellites maximising worst-case city coverage"
)]
struct Args {
    /// Constellation parameter file (comma-separated, one column per constellation)
    #[arg(short, long, default_value = "data/parameters.csv")]
    parameters: PathBuf,

    /// Gateway JSON file
    #[arg(short, long, default_value = "data/gateways.json")]
    gateways: PathBuf,

    /// City table (tab-separated)
    #[arg(short, long, default_value = "data/cities.txt")]
    cities: PathBuf,

    /// Data-center table; fallback weights are zero without it
    #[arg(long)]
    data_centers: Option<PathBuf>,

    /// Root of the per-constellation delay matrices
    #[arg(long, default_value = "data/delays")]
    delay_root: PathBuf,

    /// Constellation name; the first column of the parameter file when unset
    #[arg(long)]
    constellation: Option<String>,

    /// Placement config JSON; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    deploy_num: Option<usize>,

    /// Per-satellite capacity; pass `inf` to disable
    #[arg(long)]
    capacity: Option<f64>,

    #[arg(long)]
    lambda: Option<f64>,

    /// Instants between sampled epochs
    #[arg(long)]
    stride: Option<usize>,

    /// LP wall-clock budget; 0 disables the limit
    #[arg(long)]
    time_limit_secs: Option<u64>,

    /// Output JSON report
    #[arg(short, long, default_value = "data/placement.json")]
    output: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn placement_config(&self) -> Result<PlacementConfig> {
        let mut config = match &self.config {
            Some(path) => PlacementConfig::from_json_file(path)?,
            None => PlacementConfig::default(),
        };
        if let Some(d) = self.deploy_num {
            config.deploy_num = d;
        }
        if let Some(cap) = self.capacity {
            config.satellite_capacity = cap;
        }
        if let Some(lambda) = self.lambda {
            config.lambda = lambda;
        }
        if let Some(stride) = self.stride {
            config.epoch_stride = stride;
        }
        if let Some(secs) = self.time_limit_secs {
            config.time_limit_secs = (secs > 0).then_some(secs);
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("{}", "=".repeat(60));
    info!("Satellite Cache Placement");
    info!("{}", "=".repeat(60));

    let config = args.placement_config()?;
    let constellation = ConstellationParameters::load(&args.parameters, args.constellation.as_deref())?;
    info!(
        "Constellation {}: {} satellites, cycle {}, bound {}",
        constellation.name,
        constellation.satellites,
        constellation.cycle,
        config.effective_bound(&constellation)
    );

    let gateways = load_gateways(&args.gateways)?;
    let cities = load_cities(&args.cities)?;
    let data_centers = match &args.data_centers {
        Some(path) => load_data_centers(path)?,
        None => Vec::new(),
    };

    for backhaul in gateway_backhaul(&gateways, &data_centers) {
        debug!(
            "Gateway {} -> data center {}: {:.0} km, {:.2} ms",
            backhaul.ground_station, backhaul.data_center, backhaul.distance_km, backhaul.delay_ms
        );
    }
    let gateway_km: Vec<f64> = cities
        .iter()
        .filter_map(|c| nearest_ground_station(c, &gateways).map(|(_, km)| km))
        .collect();
    if !gateway_km.is_empty() {
        info!(
            "Mean city-to-gateway distance {:.0} km (max {:.0} km)",
            gateway_km.iter().sum::<f64>() / gateway_km.len() as f64,
            gateway_km.iter().copied().fold(0.0, f64::max)
        );
    }

    let layout = NodeLayout::new(constellation.satellites, gateways.len(), cities.len());
    let inputs = PlacementInputs::new(
        cities.iter().map(|c| c.density).collect(),
        fallback_weights(&cities, &data_centers),
    );
    let source = JsonDelayStore::new(&args.delay_root, constellation.name.clone());

    let report = run_placement(
        &config,
        &constellation,
        layout,
        &source,
        &inputs,
        &GoodLpBackend::new(),
    )
    .with_context(|| format!("placement for {} failed", constellation.name))?;

    info!("\nWriting report to {:?}", args.output);
    let file = File::create(&args.output)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, &report)?;

    info!("\n{}", "=".repeat(60));
    info!("SUMMARY");
    info!("{}", "=".repeat(60));
    info!("Run {}", report.run_id);
    info!("LP status {:?}, d = {:.3}", report.status, report.objective);
    info!("Selected {} satellites: {:?}", report.selected.len(), report.selected);
    for (instant, covered) in report.epochs.iter().zip(&report.covered_cities) {
        debug!("  instant {}: {} / {} cities covered", instant, covered, cities.len());
    }

    Ok(())
}
