//! Read telemetry from EG4 LiFePO4 batteries over Bluetooth Low Energy and publish it to Home Assistant.
//!
//! The battery management system exposes a Modbus RTU interface tunnelled through a pair of GATT
//! characteristics: requests are written to one, and the response frame arrives as one or more
//! notifications on the other.
//!
//! The following data is available:
//!
//! - Pack voltage (V) and current (A)
//! - State of charge (%)
//! - Cell voltages (V), their minimum, maximum and spread
//! - PCB and cell temperatures
//! - Charging, discharging, idle or protection state, including the active protections
//!
//! On top of that, the crate integrates the battery power into «energy charged» and «energy
//! discharged» counters, which survive restarts.
//!
//! # Example
//!
//! ```no_run
//! # use eg4_battery::{BatteryClient, Coordinator, config::DeviceConfig};
//! #
//! # #[tokio::main]
//! # pub async fn main() -> anyhow::Result<()> {
//!     let config = DeviceConfig::default();
//!     let client = BatteryClient::discover(None).await?;
//!     let mut coordinator = Coordinator::try_new(client, config)?;
//!     let snapshot = coordinator.refresh().await?;
//!     println!("{:?}", snapshot.battery);
//!     coordinator.into_link().stop().await?;
//! #   Ok(())
//! # }
//! ```

pub mod battery_client;
pub mod battery_state;
pub mod config;
pub mod coordinator;
pub mod energy;
pub mod entity;
pub mod home_assistant;
pub mod message;
pub mod prelude;
pub mod quantity;
pub mod status;
pub mod temperature;

pub use battery_client::BatteryClient;
pub use battery_state::BatteryState;
pub use coordinator::Coordinator;
