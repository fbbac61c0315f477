mod pnm_api;
mod pnm_config;
mod pnm_controllers;
mod pnm_gui;
mod pnm_map;
mod pnm_models;
mod pnm_registry;
mod pnm_stop_list;
mod pnm_timetable;
mod pnm_views;

use anyhow::{anyhow, Context};
use clap::Parser;
use log::info;
use pnm_api::{NominatimGeocoder, PtvClient};
use pnm_config::{Cli, Config};
use pnm_controllers::PNMControllers;
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    // Set up panic hook for better error messages
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\n{}", "═".repeat(70));
        eprintln!("❌ APPLICATION PANIC");
        eprintln!("{}", "═".repeat(70));
        eprintln!("\nPTV Near Me hit an unexpected error:");
        eprintln!("{}", panic_info);
        eprintln!("\n💡 Troubleshooting:");
        eprintln!("  • Check that PTV_DEVID and PTV_SECKEY are set");
        eprintln!("  • Check your internet connection");
        eprintln!("  • Run with RUST_LOG=debug for request details");
        eprintln!("\n{}", "═".repeat(70));
    }));

    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Config::from_cli(&cli).context("Invalid configuration")?;
    info!(
        "Starting with devid {}, time zone {}, {} departure(s) per stop",
        config.dev_id, config.timezone, config.max_departures
    );

    let api = PtvClient::new(&config).context("Could not set up the PTV client")?;

    if cli.health_check {
        return PNMControllers::run_health_check(&api).context("Health check failed");
    }

    let geocoder = NominatimGeocoder::new(&config).context("Could not set up the geocoder")?;

    if cli.console {
        PNMControllers::run_console(&config, &api, &geocoder);
        return Ok(());
    }

    pnm_gui::run_gui(config, Arc::new(api), Arc::new(geocoder))
        .map_err(|e| anyhow!("Window closed with an error: {}", e))
}
