//! Cumulative energy counters integrated from instantaneous power.

use std::{fmt::Debug, fs, path::Path};

use chrono::{DateTime, Local, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::{
    prelude::*,
    quantity::{KilowattHours, Kilowatts},
};

/// A power sample the next interval is integrated from.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PowerSample {
    pub measured_at: DateTime<Local>,

    #[serde(rename = "power_kilowatts")]
    pub power: Kilowatts,
}

/// Energy moved through the battery since the last reset.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyTotals {
    #[serde(rename = "charged_kilowatt_hours")]
    pub charged: KilowattHours,

    #[serde(rename = "discharged_kilowatt_hours")]
    pub discharged: KilowattHours,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sample: Option<PowerSample>,
}

impl EnergyTotals {
    /// Read the totals, starting from zero if the file is missing or unreadable.
    #[instrument(name = "Reading the energy totals…")]
    pub fn read_from<P: AsRef<Path> + Debug>(path: P) -> Self {
        Self::read_fallibly_from(path).unwrap_or_else(|error| {
            error!("failed to load the energy totals, starting from zero: {error:#}");
            Self::default()
        })
    }

    fn read_fallibly_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.is_file() {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read `{}`", path.display()))?;
            Ok(toml::from_str(&text)
                .with_context(|| format!("failed to parse `{}`", path.display()))?)
        } else {
            Ok(Self::default())
        }
    }

    /// Replace the file in one step, so that a crash never leaves it half-written.
    #[instrument(skip(self), level = "debug", name = "Writing the energy totals…")]
    pub fn write_to<P: AsRef<Path> + Debug>(&self, path: P) -> Result {
        let path = path.as_ref();
        let mut temporary_path = path.as_os_str().to_owned();
        temporary_path.push(".tmp");
        let temporary_path = Path::new(&temporary_path);
        fs::write(temporary_path, toml::to_string(self)?)
            .with_context(|| format!("failed to write `{}`", temporary_path.display()))?;
        fs::rename(temporary_path, path)
            .with_context(|| format!("failed to replace `{}`", path.display()))?;
        Ok(())
    }

    /// Zero the persisted counters and forget the baseline sample, returning what was there.
    pub fn reset<P: AsRef<Path> + Debug>(path: P) -> Result<Self> {
        let previous = Self::read_from(&path);
        info!(charged = %previous.charged, discharged = %previous.discharged, "resetting");
        Self::default().write_to(&path)?;
        Ok(previous)
    }
}

/// Energy values published alongside the telemetry.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EnergyReport {
    /// Energy currently held in the battery, if the state of charge is known.
    pub stored: Option<KilowattHours>,
    pub charged: KilowattHours,
    pub discharged: KilowattHours,
}

pub struct EnergyAccumulator {
    capacity: KilowattHours,
    max_gap: TimeDelta,
    totals: EnergyTotals,
}

impl EnergyAccumulator {
    pub const fn new(capacity: KilowattHours, max_gap: TimeDelta, totals: EnergyTotals) -> Self {
        Self { capacity, max_gap, totals }
    }

    pub const fn totals(&self) -> &EnergyTotals {
        &self.totals
    }

    /// Integrate the interval since the previous sample and report the current totals.
    pub fn update(
        &mut self,
        measured_at: DateTime<Local>,
        power: Kilowatts,
        state_of_charge_pct: Option<u16>,
    ) -> EnergyReport {
        let sample = PowerSample { measured_at, power };
        if let Some(previous) = self.totals.last_sample {
            let interval = measured_at - previous.measured_at;
            if interval <= TimeDelta::zero() || interval > self.max_gap {
                warn!(
                    interval_secs = interval.num_seconds(),
                    max_gap_secs = self.max_gap.num_seconds(),
                    "not integrating across the gap",
                );
            } else {
                let (charged, discharged) = integrate(previous.power, power, interval);
                self.totals.charged += charged;
                self.totals.discharged += discharged;
            }
        }
        self.totals.last_sample = Some(sample);
        debug!(
            charged = %self.totals.charged,
            discharged = %self.totals.discharged,
            "updated the energy totals",
        );
        self.report(state_of_charge_pct)
    }

    pub fn report(&self, state_of_charge_pct: Option<u16>) -> EnergyReport {
        EnergyReport {
            stored: state_of_charge_pct.map(|soc| self.capacity * (f64::from(soc) / 100.0)),
            charged: self.totals.charged,
            discharged: self.totals.discharged,
        }
    }
}

/// Trapezoidal integration of a linear power ramp, split into charged and discharged energy.
///
/// When the ramp crosses zero, the interval is split at the crossing so that each side
/// only contributes to its own counter.
fn integrate(from: Kilowatts, to: Kilowatts, interval: TimeDelta) -> (KilowattHours, KilowattHours) {
    let (p0, p1) = (from.0, to.0);
    if p0 >= 0.0 && p1 >= 0.0 {
        (Kilowatts((p0 + p1) / 2.0) * interval, KilowattHours::ZERO)
    } else if p0 <= 0.0 && p1 <= 0.0 {
        (KilowattHours::ZERO, Kilowatts(-(p0 + p1) / 2.0) * interval)
    } else {
        let crossing = p0 / (p0 - p1);
        let first = Kilowatts(p0.abs() / 2.0) * interval * crossing;
        let second = Kilowatts(p1.abs() / 2.0) * interval * (1.0 - crossing);
        if p0 > 0.0 { (first, second) } else { (second, first) }
    }
}
