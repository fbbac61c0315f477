// Command-line and environment configuration
use crate::pnm_models::{Coordinates, PNMError, Result};
use crate::pnm_registry::ModePolicy;
use crate::pnm_timetable::TimetableRenderer;
use chrono_tz::Tz;
use clap::Parser;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "pnm", version, about = "PTV Near Me - nearby stops and live departures")]
pub struct Cli {
    /// PTV developer id
    #[arg(long, env = "PTV_DEVID", default_value_t = Config::DEFAULT_DEV_ID)]
    pub devid: u32,

    /// Key used to sign PTV requests
    #[arg(long = "secret-key", env = "PTV_SECKEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    #[arg(long, env = "PTV_BASE_URL", default_value = Config::DEFAULT_BASE_URL)]
    pub base_url: String,

    #[arg(long, env = "PNM_GEOCODER_URL", default_value = Config::DEFAULT_GEOCODER_URL)]
    pub geocoder_url: String,

    /// Time zone used to display departure times
    #[arg(long, env = "PNM_TIMEZONE", default_value = "Australia/Melbourne")]
    pub timezone: String,

    /// Departures fetched per stop
    #[arg(long, default_value_t = TimetableRenderer::DEFAULT_MAX_DEPARTURES)]
    pub max_departures: u32,

    /// Also show v/Line regional train and coach stops
    #[arg(long)]
    pub show_regional: bool,

    /// Start latitude
    #[arg(long, allow_hyphen_values = true, requires = "lng")]
    pub lat: Option<f64>,

    /// Start longitude
    #[arg(long, allow_hyphen_values = true, requires = "lat")]
    pub lng: Option<f64>,

    /// Start address, looked up before the first discovery
    #[arg(long)]
    pub address: Option<String>,

    /// Run the text interface instead of the window
    #[arg(long)]
    pub console: bool,

    /// Query the PTV health check endpoint and exit
    #[arg(long)]
    pub health_check: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub dev_id: u32,
    pub secret_key: Option<String>,
    pub base_url: String,
    pub geocoder_url: String,
    pub timezone: Tz,
    pub max_departures: u32,
    pub mode_policy: ModePolicy,
    pub start_location: Option<Coordinates>,
    pub start_address: Option<String>,
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dev_id: Self::DEFAULT_DEV_ID,
            secret_key: None,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            geocoder_url: Self::DEFAULT_GEOCODER_URL.to_string(),
            timezone: chrono_tz::Australia::Melbourne,
            max_departures: TimetableRenderer::DEFAULT_MAX_DEPARTURES,
            mode_policy: ModePolicy::ExcludeRegional,
            start_location: None,
            start_address: None,
            request_timeout: Duration::from_secs(Self::REQUEST_TIMEOUT_SECS),
        }
    }
}

impl Config {
    pub const DEFAULT_DEV_ID: u32 = 1000770;
    pub const DEFAULT_BASE_URL: &'static str = "http://timetableapi.ptv.vic.gov.au";
    pub const DEFAULT_GEOCODER_URL: &'static str = "https://nominatim.openstreetmap.org";
    /// Melbourne CBD
    pub const DEFAULT_LOCATION: Coordinates = Coordinates::new(-37.814, 144.963);
    pub const DEFAULT_ZOOM: f64 = 17.0;
    const REQUEST_TIMEOUT_SECS: u64 = 15;

    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let timezone = cli
            .timezone
            .parse::<Tz>()
            .map_err(|e| PNMError::ConfigError(format!("Unknown time zone '{}': {}", cli.timezone, e)))?;

        let start_location = match (cli.lat, cli.lng) {
            (Some(lat), Some(lng)) => {
                if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
                    return Err(PNMError::ConfigError(format!(
                        "Start position ({}, {}) is not a valid coordinate",
                        lat, lng
                    )));
                }
                Some(Coordinates::new(lat, lng))
            }
            _ => None,
        };

        Ok(Config {
            dev_id: cli.devid,
            secret_key: cli.secret_key.clone().filter(|key| !key.is_empty()),
            base_url: cli.base_url.trim_end_matches('/').to_string(),
            geocoder_url: cli.geocoder_url.trim_end_matches('/').to_string(),
            timezone,
            max_departures: cli.max_departures.max(1),
            mode_policy: if cli.show_regional {
                ModePolicy::ShowAll
            } else {
                ModePolicy::ExcludeRegional
            },
            start_location,
            start_address: cli.address.clone().filter(|a| !a.trim().is_empty()),
            ..Config::default()
        })
    }

    /// Where the user is, as far as the configuration knows.
    pub fn locate(&self) -> Result<Coordinates> {
        self.start_location.ok_or(PNMError::GeolocationUnavailable)
    }
}
