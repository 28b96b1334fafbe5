//! Simulated supply driving a scripted cell
//!
//! The cell is any function from the supply's present state to a terminal voltage. Every call made
//! on the supply is recorded so a caller can check afterwards what the process control asked for,
//! e.g. that the voltage ceiling came back up after an aborted refine.
//!
//! Time is read from `tokio::time`, so under a paused test clock a phase lasting hours completes
//! instantly while still seeing the same elapsed times it would in a real run.

use std::time::Duration;
use tokio::time::Instant;
use crate::{
    devices::{ InstrumentPort, Reading },
    error::Result,
    units::{ Ampere, Volt },
};

/// What the cell sees at the instant of a measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellState
{
    /// Current forced through the cell, zero while the output is off
    pub current: f64,
    /// Time since the supply was created
    pub elapsed: Duration,
    /// Time since the output was last switched off, `None` while it is on
    pub open_for: Option<Duration>,
}

/// A call made on the simulated supply
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SupplyEvent
{
    Enable,
    Disable,
    SetCurrent(f64),
    SetVoltage(f64),
    Measure,
}

pub struct SimulatedSupply
{
    cell: Box<dyn FnMut(&CellState) -> f64 + Send>,
    started: Instant,
    enabled: bool,
    setpoint: f64,
    ceiling: f64,
    opened_at: Instant,
    latency: Duration,
    events: Vec<SupplyEvent>,
}

impl SimulatedSupply
{
    pub fn new<F>(cell: F) -> Self
        where F: FnMut(&CellState) -> f64 + Send + 'static
    {
        let now = Instant::now();

        Self {
            cell: Box::new(cell),
            started: now,
            enabled: false,
            setpoint: 0.0,
            ceiling: f64::INFINITY,
            opened_at: now,
            latency: Duration::from_millis(100),
            events: Vec::new(),
        }
    }

    /// Time a measurement takes to come back. Defaults to 100 ms.
    pub fn latency(mut self, latency: Duration) -> Self
    {
        self.latency = latency;
        self
    }

    /// A copper refining cell: ohmic drop plus a concentration overpotential which climbs steeply
    /// near the limiting current, a film resistance that slowly builds over hours, and an
    /// exponential relaxation towards the rest potential once the output is off.
    pub fn electrolytic_cell() -> Self
    {
        const REST: f64 = 0.05;
        const LIMITING_CURRENT: f64 = 75.0;

        Self::new(|state: &CellState| {
            match state.open_for {
                Some(open_for) => REST + 0.25 * (-open_for.as_secs_f64() / 20.0).exp(),
                None => {
                    let hours = state.elapsed.as_secs_f64() / 3600.0;
                    let film = 0.004 * hours.powi(3);
                    let loading = (state.current / LIMITING_CURRENT).min(0.999);
                    REST + state.current * (0.012 + film) - 0.08 * (1.0 - loading).ln()
                }
            }
        })
    }

    pub fn events(&self) -> &[SupplyEvent]
    {
        &self.events
    }

    pub fn is_enabled(&self) -> bool
    {
        self.enabled
    }

    pub fn setpoint(&self) -> Ampere
    {
        Ampere::from_f64_base(self.setpoint)
    }

    pub fn voltage_ceiling(&self) -> Volt
    {
        Volt::from_f64_base(self.ceiling)
    }
}

impl InstrumentPort for SimulatedSupply
{
    async fn enable(&mut self) -> Result<()>
    {
        self.events.push(SupplyEvent::Enable);
        self.enabled = true;
        Ok(())
    }

    async fn disable(&mut self) -> Result<()>
    {
        self.events.push(SupplyEvent::Disable);

        if self.enabled {
            self.opened_at = Instant::now();
        }
        self.enabled = false;
        Ok(())
    }

    async fn set_current(&mut self, amps: Ampere) -> Result<()>
    {
        self.events.push(SupplyEvent::SetCurrent(amps.as_f64_base()));
        self.setpoint = amps.as_f64_base();
        Ok(())
    }

    async fn set_voltage(&mut self, volts: Volt) -> Result<()>
    {
        self.events.push(SupplyEvent::SetVoltage(volts.as_f64_base()));
        self.ceiling = volts.as_f64_base();
        Ok(())
    }

    async fn measure(&mut self) -> Result<Reading>
    {
        self.events.push(SupplyEvent::Measure);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let now = Instant::now();
        let mut current = if self.enabled { self.setpoint } else { 0.0 };
        let state = CellState {
            current: current,
            elapsed: now - self.started,
            open_for: if self.enabled { None } else { Some(now - self.opened_at) },
        };

        let mut voltage = (self.cell)(&state);

        // past the ceiling the supply falls back to constant voltage and the current drops with it
        if self.enabled && voltage > self.ceiling {
            current *= self.ceiling / voltage;
            voltage = self.ceiling;
        }

        Ok(Reading::new(Ampere::from_f64_base(current), Volt::from_f64_base(voltage)))
    }
}

#[cfg(test)]
mod tests
{
    use super::{ SimulatedSupply, SupplyEvent };
    use crate::{ devices::InstrumentPort, units::{ Ampere, Volt } };

    #[tokio::test(start_paused = true)]
    async fn disabled_output_reads_zero_current()
    {
        let mut psu = SimulatedSupply::new(|state| 1.0 + state.current);
        psu.set_current(Ampere::from_f64_base(5.0)).await.unwrap();

        let reading = psu.measure().await.unwrap();
        assert_eq!(reading.current, Ampere::from_f64_base(0.0));
        assert_eq!(reading.resistance(), None);

        psu.enable().await.unwrap();
        let reading = psu.measure().await.unwrap();
        assert_eq!(reading.current, Ampere::from_f64_base(5.0));
        assert_eq!(reading.voltage, Volt::from_f64_base(6.0));
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_clamps_loaded_voltage()
    {
        let mut psu = SimulatedSupply::new(|state| 10.0 * state.current);
        psu.set_voltage(Volt::from_f64_base(2.0)).await.unwrap();
        psu.set_current(Ampere::from_f64_base(1.0)).await.unwrap();
        psu.enable().await.unwrap();

        let reading = psu.measure().await.unwrap();
        assert_eq!(reading.voltage, Volt::from_f64_base(2.0));
        assert_eq!(reading.current, Ampere::from_f64_base(0.2));
        assert_eq!(
            psu.events(),
            &[
                SupplyEvent::SetVoltage(2.0),
                SupplyEvent::SetCurrent(1.0),
                SupplyEvent::Enable,
                SupplyEvent::Measure,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn open_time_counts_from_disable()
    {
        let mut psu = SimulatedSupply::new(|state| {
            state.open_for.map_or(-1.0, |open| open.as_secs_f64())
        });
        psu.enable().await.unwrap();
        assert_eq!(psu.measure().await.unwrap().voltage, Volt::from_f64_base(-1.0));

        psu.disable().await.unwrap();
        let reading = psu.measure().await.unwrap();
        assert_eq!(reading.voltage, Volt::from_f64_base(0.1));
    }
}
