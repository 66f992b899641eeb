mod cli;

use clap::{crate_version, Parser};
use eg4_battery::{
    battery_client::{self, BatteryClient},
    coordinator::Coordinator,
    energy::EnergyTotals,
    entity,
    prelude::*,
};

use crate::cli::{Args, Command, DeviceArgs, RunArgs};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().without_time().compact().init();
    info!(version = crate_version!(), "starting…");

    let args = Args::parse();

    match args.command {
        Command::Scan(args) => {
            let batteries = battery_client::scan(args.duration.into()).await?;
            if batteries.is_empty() {
                warn!("no batteries found");
            }
            for battery in batteries {
                println!(
                    "{}\t{:?}\trssi={}",
                    battery.name.as_deref().unwrap_or("<unnamed>"),
                    battery.device.id(),
                    battery.rssi.map_or_else(|| "?".to_owned(), |rssi| rssi.to_string()),
                );
            }
        }
        Command::Read(args) => {
            read(&args).await?;
        }
        Command::Run(args) => {
            run(&args).await?;
        }
        Command::ResetEnergy(args) => {
            let previous = EnergyTotals::reset(&args.state_file)?;
            println!("charged: {}, discharged: {}", previous.charged, previous.discharged);
        }
    }

    info!("done!");
    Ok(())
}

async fn read(args: &DeviceArgs) -> Result {
    let config = args.config()?;
    let client = BatteryClient::discover(config.ble_name.as_deref()).await?;
    let mut coordinator = Coordinator::try_new(client, config.clone())?;
    let result = coordinator.refresh().await;
    coordinator.into_link().stop().await?;
    for state in entity::render(&config, &result?) {
        println!("{}\t{}", state.entity_id, state.state);
    }
    Ok(())
}

async fn run(args: &RunArgs) -> Result {
    let config = args.device.config()?;
    let publisher = args.home_assistant.publisher()?;
    let client = BatteryClient::discover(config.ble_name.as_deref()).await?;
    let mut coordinator = Coordinator::try_new(client, config)?;
    let result = coordinator.run(publisher.as_ref()).await;
    coordinator.into_link().stop().await?;
    result
}
