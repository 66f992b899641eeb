//! Polls the battery and keeps the energy counters up to date.

use std::future::Future;

use async_trait::async_trait;
use chrono::Local;
use tokio::time::{interval, sleep, Duration, Interval, MissedTickBehavior};

use crate::{
    battery_state::BatteryState,
    config::DeviceConfig,
    energy::{EnergyAccumulator, EnergyReport, EnergyTotals},
    entity,
    home_assistant::Publisher,
    message::{telemetry_request, RegistersMessage},
    prelude::*,
};

/// One request-response exchange with the battery.
///
/// Implementations own the radio link for the duration of the exchange and release it
/// before returning.
#[async_trait(?Send)]
pub trait BatteryLink {
    /// Send the request and return the payload of the validated response frame.
    async fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>>;
}

/// Everything published after a successful refresh.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub battery: BatteryState,
    pub energy: EnergyReport,
}

pub struct Coordinator<L> {
    link: L,
    config: DeviceConfig,
    accumulator: EnergyAccumulator,
}

impl<L: BatteryLink> Coordinator<L> {
    /// Create a coordinator, restoring the energy counters from the state file.
    pub fn try_new(link: L, config: DeviceConfig) -> Result<Self> {
        let totals = EnergyTotals::read_from(&config.state_file);
        let accumulator =
            EnergyAccumulator::new(config.capacity, config.max_integration_gap()?, totals);
        Ok(Self { link, config, accumulator })
    }

    pub fn into_link(self) -> L {
        self.link
    }

    /// Fetch, decode and account for one telemetry frame.
    #[instrument(skip_all, fields(device = %self.config.name))]
    pub async fn refresh(&mut self) -> Result<Snapshot> {
        let payload = self.fetch_payload().await?;
        let message = RegistersMessage::new(payload)?;
        let battery = BatteryState::from_message(&message, Local::now());
        info!(
            voltage = battery.total_voltage_v,
            current = battery.current_a,
            soc = ?battery.state_of_charge_pct,
            state = %battery.status,
            "fetched the battery state",
        );
        let energy = self.accumulator.update(
            battery.measured_at,
            battery.power(),
            battery.state_of_charge_pct,
        );
        if let Err(error) = self.accumulator.totals().write_to(&self.config.state_file) {
            warn!("failed to save the energy totals: {error:#}");
        }
        Ok(Snapshot { battery, energy })
    }

    /// Try the exchange up to the configured number of times, backing off linearly.
    async fn fetch_payload(&mut self) -> Result<Vec<u8>> {
        let request = telemetry_request();
        let mut last_error = None;
        for attempt in 0..self.config.attempts {
            debug!(attempt = attempt + 1, of = self.config.attempts, "connecting…");
            match self.link.exchange(&request).await {
                Ok(payload) => return Ok(payload),
                Err(error) => {
                    warn!(attempt = attempt + 1, "exchange failed: {error:#}");
                    last_error = Some(error);
                    if attempt + 1 < self.config.attempts {
                        sleep(backoff(attempt)).await;
                    }
                }
            }
        }
        let last_error =
            last_error.map_or_else(|| "no attempts made".to_owned(), |error| format!("{error:#}"));
        bail!("failed after {} attempts: {last_error}", self.config.attempts)
    }

    /// Poll at the configured interval and publish every outcome until interrupted.
    pub async fn run(&mut self, publisher: &dyn Publisher) -> Result {
        self.run_until(publisher, tokio::signal::ctrl_c()).await
    }

    /// Poll until the shutdown future resolves, which interrupts a refresh in progress.
    pub async fn run_until<F>(&mut self, publisher: &dyn Publisher, shutdown: F) -> Result
    where
        F: Future<Output = std::io::Result<()>>,
    {
        let mut interval = interval(self.config.polling_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = &mut shutdown => {
                    result?;
                    info!("interrupted");
                    return Ok(());
                }
                () = self.poll(&mut interval, publisher) => {}
            }
        }
    }

    async fn poll(&mut self, interval: &mut Interval, publisher: &dyn Publisher) {
        interval.tick().await;
        let states = match self.refresh().await {
            Ok(snapshot) => entity::render(&self.config, &snapshot),
            Err(error) => {
                error!("refresh failed: {error:#}");
                entity::unavailable(&self.config)
            }
        };
        if let Err(error) = publisher.publish(&states).await {
            warn!("failed to publish: {error:#}");
        }
    }
}

/// The delay after a failed attempt, counted from zero.
fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(2 * u64::from(attempt + 1))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::home_assistant::LogPublisher;
    use crate::message::registers_message::tests::DISCHARGING_FRAME;
    use crate::message::{try_parse_msg, TryParseMessageResult};

    struct ScriptedLink {
        responses: VecDeque<Result<Vec<u8>>>,
        requests: Vec<Vec<u8>>,
    }

    impl ScriptedLink {
        fn new(responses: Vec<Result<Vec<u8>>>) -> Self {
            Self { responses: responses.into_iter().collect(), requests: Vec::new() }
        }
    }

    #[async_trait(?Send)]
    impl BatteryLink for ScriptedLink {
        async fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>> {
            self.requests.push(request.to_vec());
            self.responses.pop_front().unwrap_or_else(|| Err(anyhow!("no more responses")))
        }
    }

    /// A link whose exchange never completes, like a battery that stopped answering.
    struct StalledLink;

    #[async_trait(?Send)]
    impl BatteryLink for StalledLink {
        async fn exchange(&mut self, _request: &[u8]) -> Result<Vec<u8>> {
            std::future::pending().await
        }
    }

    fn payload() -> Vec<u8> {
        let frame = hex::decode(DISCHARGING_FRAME).unwrap();
        let TryParseMessageResult::Ok(payload) = try_parse_msg(&frame) else {
            panic!("the test frame must be valid");
        };
        payload
    }

    fn config(name: &str) -> DeviceConfig {
        let state_file = std::env::temp_dir()
            .join(format!("eg4-battery-coordinator-{name}-{}.toml", std::process::id()));
        let _ = std::fs::remove_file(&state_file);
        DeviceConfig { state_file, ..DeviceConfig::default() }
    }

    #[test]
    fn test_backoff() {
        assert_eq!(backoff(0), Duration::from_secs(2));
        assert_eq!(backoff(1), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_happy() -> Result {
        let config = config("happy");
        let state_file = config.state_file.clone();
        let mut coordinator = Coordinator::try_new(ScriptedLink::new(vec![Ok(payload())]), config)?;

        let snapshot = coordinator.refresh().await?;
        assert_eq!(snapshot.battery.state_of_charge_pct, Some(87));
        assert_eq!(snapshot.energy.stored.map(|stored| stored.0), Some(5.12 * 0.87));
        assert!(state_file.is_file());

        let link = coordinator.into_link();
        assert_eq!(link.requests, vec![telemetry_request().to_vec()]);
        std::fs::remove_file(state_file)?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_retries_with_backoff() -> Result {
        let config = config("retries");
        let state_file = config.state_file.clone();
        let link = ScriptedLink::new(vec![
            Err(anyhow!("connection refused")),
            Err(anyhow!("timed out")),
            Ok(payload()),
        ]);
        let mut coordinator = Coordinator::try_new(link, config)?;

        let started_at = tokio::time::Instant::now();
        coordinator.refresh().await?;
        assert_eq!(started_at.elapsed(), Duration::from_secs(2 + 4));
        assert_eq!(coordinator.into_link().requests.len(), 3);
        std::fs::remove_file(state_file)?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_gives_up() -> Result {
        let link = ScriptedLink::new(vec![
            Err(anyhow!("one")),
            Err(anyhow!("two")),
            Err(anyhow!("three")),
            Ok(payload()),
        ]);
        let mut coordinator = Coordinator::try_new(link, config("gives-up"))?;

        let error = coordinator.refresh().await.unwrap_err();
        assert_eq!(error.to_string(), "failed after 3 attempts: three");
        assert_eq!(coordinator.into_link().responses.len(), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_payload_fails_refresh() -> Result {
        let link = ScriptedLink::new(vec![Ok(vec![0; 10])]);
        let mut coordinator = Coordinator::try_new(link, config("short"))?;
        assert!(coordinator.refresh().await.is_err());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_save_keeps_the_snapshot() -> Result {
        let state_file = std::env::temp_dir()
            .join(format!("eg4-battery-missing-{}", std::process::id()))
            .join("state.toml");
        let config = DeviceConfig { state_file, ..DeviceConfig::default() };
        let mut coordinator =
            Coordinator::try_new(ScriptedLink::new(vec![Ok(payload())]), config)?;

        let snapshot = coordinator.refresh().await?;
        assert_eq!(snapshot.battery.state_of_charge_pct, Some(87));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_refresh() -> Result {
        let mut coordinator = Coordinator::try_new(StalledLink, config("stalled"))?;
        let shutdown = async {
            sleep(Duration::from_secs(1)).await;
            Ok::<_, std::io::Error>(())
        };

        let started_at = tokio::time::Instant::now();
        coordinator.run_until(&LogPublisher, shutdown).await?;
        assert_eq!(started_at.elapsed(), Duration::from_secs(1));
        Ok(())
    }
}
