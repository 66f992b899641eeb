use std::{fmt::Display, future::Future};

use async_trait::async_trait;
use bluest::{Adapter, AdvertisingDevice, Characteristic, Device, Uuid};
use futures_util::{Stream, StreamExt};
use tokio::time::{sleep, timeout, timeout_at, Duration, Instant};

use crate::{
    coordinator::BatteryLink,
    message::{starts_frame, try_parse_msg, TryParseMessageResult},
    prelude::*,
};

const SERVICE_ID: Uuid = Uuid::from_u128(0x0000_1000_0000_1000_8000_0080_5f9b_34fb);
const WRITE_CHARACTERISTIC_ID: Uuid = Uuid::from_u128(0x0000_1001_0000_1000_8000_0080_5f9b_34fb);
const NOTIFY_CHARACTERISTIC_ID: Uuid = Uuid::from_u128(0x0000_1002_0000_1000_8000_0080_5f9b_34fb);

/// How long to look for the device before giving up
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// The BMS drops requests sent right after the link comes up
const CONNECTION_SETTLE_TIME: Duration = Duration::from_secs(1);
const SUBSCRIPTION_SETTLE_TIME: Duration = Duration::from_millis(500);
/// How long to wait for the complete response frame
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// A battery seen while scanning.
#[derive(Debug)]
pub struct DiscoveredBattery {
    pub device: Device,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

/// Whether an advertisement looks like an EG4 battery.
pub fn is_candidate(name: Option<&str>, services: &[Uuid]) -> bool {
    services.contains(&SERVICE_ID)
        || name.is_some_and(|name| name.contains("EG4") || name.contains("Battery"))
}

/// List the batteries advertising nearby within the given time.
#[instrument(skip_all, fields(duration = ?duration))]
pub async fn scan(duration: Duration) -> Result<Vec<DiscoveredBattery>> {
    let adapter = default_adapter().await?;
    let mut adapter_events = adapter.scan(&[]).await?;
    let deadline = Instant::now() + duration;
    let mut batteries: Vec<DiscoveredBattery> = Vec::new();
    while let Ok(Some(advertisement)) = timeout_at(deadline, adapter_events.next()).await {
        let name = advertisement.adv_data.local_name.clone();
        if !is_candidate(name.as_deref(), &advertisement.adv_data.services) {
            continue;
        }
        if batteries.iter().any(|battery| battery.device.id() == advertisement.device.id()) {
            continue;
        }
        info!(?name, id = ?advertisement.device.id(), rssi = ?advertisement.rssi, "found a battery");
        batteries.push(DiscoveredBattery {
            device: advertisement.device,
            name,
            rssi: advertisement.rssi,
        });
    }
    Ok(batteries)
}

async fn default_adapter() -> Result<Adapter> {
    let adapter = Adapter::default().await.ok_or_else(|| anyhow!("Default adapter not found"))?;
    adapter.wait_available().await?;
    Ok(adapter)
}

/// A connection-per-request client for the battery's Modbus-over-GATT interface.
pub struct BatteryClient {
    adapter: Adapter,
    device: Device,
}

impl BatteryClient {
    /// Create a new `BatteryClient`, which includes attempting to discover the device.
    ///
    /// Without a name, the first advertising device that looks like an EG4 battery is used.
    #[instrument(skip_all, fields(ble_name = ble_name))]
    pub async fn discover(ble_name: Option<&str>) -> Result<Self> {
        let adapter = default_adapter().await?;
        let device = timeout(DISCOVERY_TIMEOUT, Self::discover_device(ble_name, &adapter))
            .await
            .map_err(|_| anyhow!("Device not found"))??;
        info!(name = ?device.adv_data.local_name, id = ?device.device.id(), "discovered the battery");
        Ok(Self { adapter, device: device.device })
    }

    async fn discover_device(
        ble_name: Option<&str>,
        adapter: &Adapter,
    ) -> Result<AdvertisingDevice> {
        let mut adapter_events = adapter.scan(&[]).await?;
        while let Some(advertisement) = adapter_events.next().await {
            let name = advertisement.adv_data.local_name.as_deref();
            let is_match = match ble_name {
                Some(ble_name) => name == Some(ble_name),
                None => is_candidate(name, &advertisement.adv_data.services),
            };
            if is_match {
                return Ok(advertisement);
            }
        }

        bail!("Device not found")
    }

    /// Disconnect from the battery
    pub async fn stop(self) -> Result {
        if self.device.is_connected().await {
            self.adapter.disconnect_device(&self.device).await?;
        }
        Ok(())
    }

    async fn try_connect(&self) -> Result {
        if !self.device.is_connected().await {
            timeout(CONNECT_TIMEOUT, self.adapter.connect_device(&self.device))
                .await
                .map_err(|_| anyhow!("timed out connecting to the battery"))??;
            sleep(CONNECTION_SETTLE_TIME).await;
        }
        Ok(())
    }

    /// Characteristics have to be looked up again after every reconnection.
    async fn characteristics(&self) -> Result<(Characteristic, Characteristic)> {
        let service = self
            .device
            .discover_services_with_uuid(SERVICE_ID)
            .await?
            .first()
            .ok_or_else(|| anyhow!("The device does not expose the battery service {SERVICE_ID}"))?
            .clone();
        let write = service
            .discover_characteristics_with_uuid(WRITE_CHARACTERISTIC_ID)
            .await?
            .first()
            .ok_or_else(|| anyhow!("The device does not support the write characteristic"))?
            .clone();
        let notify = service
            .discover_characteristics_with_uuid(NOTIFY_CHARACTERISTIC_ID)
            .await?
            .first()
            .ok_or_else(|| anyhow!("The device does not support the notify characteristic"))?
            .clone();
        Ok((write, notify))
    }

    async fn request_response(&self, rq: &[u8]) -> Result<Vec<u8>> {
        let (write, notify) = self.characteristics().await?;
        let reader = notify.notify().await?;
        sleep(SUBSCRIPTION_SETTLE_TIME).await;

        debug!(request = %hex::encode(rq), "TX");
        write.write(rq).await?;

        read_message(reader, RESPONSE_TIMEOUT).await
    }
}

#[async_trait(?Send)]
impl BatteryLink for BatteryClient {
    async fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        exchange_then_disconnect(
            self.try_connect(),
            self.request_response(request),
            self.adapter.disconnect_device(&self.device),
        )
        .await
    }
}

/// Connect, exchange, and disconnect afterwards, also when the connection itself failed.
async fn exchange_then_disconnect<T, E: Display>(
    connect: impl Future<Output = Result>,
    exchange: impl Future<Output = Result<T>>,
    disconnect: impl Future<Output = Result<(), E>>,
) -> Result<T> {
    let result = match connect.await {
        Ok(()) => exchange.await,
        Err(error) => Err(error),
    };
    if let Err(error) = disconnect.await {
        warn!("failed to disconnect: {error:#}");
    }
    result
}

/// Collect notifications until they form a complete, valid response frame.
///
/// A response may be split over several notifications. Corrupted or duplicated
/// notifications make the buffer invalid, in which case it is dropped and collection
/// restarts at the next notification that begins with a frame header.
async fn read_message<T, E>(mut reader: T, response_timeout: Duration) -> Result<Vec<u8>>
where
    T: Stream<Item = Result<Vec<u8>, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    let deadline = Instant::now() + response_timeout;
    let mut msg = Vec::<u8>::new();
    loop {
        match timeout_at(deadline, reader.next()).await {
            Err(_) => {
                let h_msg = hex::encode(&msg);
                bail!("timed out waiting for the response, received: {h_msg}");
            }
            Ok(None) => bail!("end of notification stream"),
            Ok(Some(Err(err))) => return Err(err.into()),
            Ok(Some(Ok(data))) => {
                debug!(notification = %hex::encode(&data), "RX");
                msg.extend_from_slice(&data);
                if let TryParseMessageResult::Invalid(reason) = try_parse_msg(&msg) {
                    debug!(reason, msg = %hex::encode(&msg), "dropping the invalid message");
                    msg.clear();
                    if starts_frame(&data) {
                        msg.extend_from_slice(&data);
                    }
                }
                match try_parse_msg(&msg) {
                    TryParseMessageResult::Ok(payload) => return Ok(payload),
                    TryParseMessageResult::Incomplete => {}
                    TryParseMessageResult::Invalid(_) => msg.clear(),
                }
            }
        }
    }
}
