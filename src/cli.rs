use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eg4_battery::{
    config::{DeviceConfig, DEFAULT_ATTEMPTS},
    home_assistant::{self, LogPublisher, Publisher},
    prelude::*,
    quantity::KilowattHours,
    temperature::TemperatureUnit,
};
use reqwest::Url;

#[derive(Parser)]
#[command(author, version, about, propagate_version = true)]
#[must_use]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List the batteries advertising nearby.
    Scan(ScanArgs),

    /// Read the battery once and print its sensors.
    Read(DeviceArgs),

    /// Poll the battery and publish its sensors until interrupted.
    Run(RunArgs),

    /// Zero the «energy charged» and «energy discharged» counters.
    ResetEnergy(StateFileArgs),
}

#[derive(Parser)]
pub struct ScanArgs {
    #[clap(long, env = "SCAN_DURATION", default_value = "10s")]
    pub duration: humantime::Duration,
}

#[derive(Parser)]
pub struct StateFileArgs {
    /// Where the energy counters are kept between restarts.
    #[clap(long, env = "STATE_FILE", default_value = "eg4-battery.toml")]
    pub state_file: PathBuf,
}

#[derive(Parser)]
pub struct DeviceArgs {
    /// Advertised BLE name of the battery. Without it, the first EG4 battery found is used.
    #[clap(long, env = "BLE_NAME")]
    pub ble_name: Option<String>,

    /// Name shown in Home Assistant. Defaults to the BLE name.
    #[clap(long, env = "DEVICE_NAME")]
    pub device_name: Option<String>,

    /// Usable battery capacity.
    #[clap(long = "capacity-kwh", env = "BATTERY_CAPACITY_KWH", default_value = "5.12")]
    pub capacity: KilowattHours,

    #[clap(long, env = "TEMPERATURE_UNIT", value_enum, ignore_case = true, default_value = "C")]
    pub temperature_unit: TemperatureUnit,

    #[clap(long, env = "POLLING_INTERVAL", default_value = "15s")]
    pub polling_interval: humantime::Duration,

    /// Connection attempts per poll.
    #[clap(long, env = "CONNECTION_ATTEMPTS", default_value_t = DEFAULT_ATTEMPTS)]
    pub attempts: u32,

    /// Longer gaps between polls are not integrated into the energy counters.
    #[clap(long, env = "MAX_INTEGRATION_GAP", default_value = "5min")]
    pub max_integration_gap: humantime::Duration,

    #[clap(flatten)]
    pub state: StateFileArgs,
}

impl DeviceArgs {
    pub fn config(&self) -> Result<DeviceConfig> {
        let name = self
            .device_name
            .clone()
            .or_else(|| self.ble_name.clone())
            .unwrap_or_else(|| DeviceConfig::default().name);
        DeviceConfig {
            name,
            ble_name: self.ble_name.clone(),
            capacity: self.capacity,
            temperature_unit: self.temperature_unit,
            polling_interval: self.polling_interval.into(),
            attempts: self.attempts,
            max_integration_gap: self.max_integration_gap.into(),
            state_file: self.state.state_file.clone(),
        }
        .validate()
    }
}

#[derive(Parser)]
pub struct RunArgs {
    #[clap(flatten)]
    pub device: DeviceArgs,

    #[clap(flatten)]
    pub home_assistant: HomeAssistantArgs,
}

#[derive(Parser)]
pub struct HomeAssistantArgs {
    /// Home Assistant API base URL. For example: `http://localhost:8123/api`.
    ///
    /// Without it, the states are only logged.
    #[clap(long = "home-assistant-api-base-url", env = "HOME_ASSISTANT_API_BASE_URL")]
    pub base_url: Option<Url>,

    /// Home Assistant long-lived access token.
    #[clap(
        long = "home-assistant-access-token",
        env = "HOME_ASSISTANT_ACCESS_TOKEN",
        requires = "base_url"
    )]
    pub access_token: Option<String>,
}

impl HomeAssistantArgs {
    pub fn publisher(&self) -> Result<Box<dyn Publisher>> {
        match (&self.base_url, &self.access_token) {
            (Some(base_url), Some(access_token)) => {
                Ok(Box::new(home_assistant::Api::try_new(access_token, base_url.clone())?))
            }
            (Some(_), None) => bail!("Home Assistant access token is required"),
            (None, _) => {
                warn!("Home Assistant is not configured, only logging the states");
                Ok(Box::new(LogPublisher))
            }
        }
    }
}
