//! Constant current refining
//!
//! Holds the cell at one current for a fixed period, logging a reading every sample period. The
//! load resistance is computed from every reading and watched: once it has stayed at or above the
//! tolerance for the whole hold time without a single reading below it, the phase is cut short and
//! the output switched off. That is the normal way for a run to end, the anode is spent.
//!
//! # Voltage Ceiling
//! While refining the supply's voltage ceiling is lowered so that a starving cell cannot be driven
//! into side reactions. The ceiling is put back to the supply maximum on every way out of
//! [`refine`], including a transport error part way through.

use std::time::Duration;
use chrono::Local;
use tokio::time::{ Instant, MissedTickBehavior };
use tracing::{ debug, info, warn };
use crate::{
    datalog::{ finish_time, RunLog, Sample },
    devices::InstrumentPort,
    error::Result,
    units::{ Ampere, Ohm, Volt },
};

/// How a refining phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefineOutcome
{
    /// The full period elapsed. The output is still on.
    Succeeded,
    /// Resistance stayed high for the hold time. The output is off.
    AbortedHighResistance,
}

impl RefineOutcome
{
    pub fn succeeded(&self) -> bool
    {
        *self == Self::Succeeded
    }
}

/// Where the resistance watch stands after a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState
{
    Clear,
    /// High since the given instant
    Armed { since: Instant },
    Tripped,
}

/// Debounced over-resistance detector
///
/// Any reading below the tolerance disarms the watch completely. There is no partial credit for
/// time spent high before the dip.
#[derive(Debug, Clone)]
pub struct ResistanceWatch
{
    tolerance: Ohm,
    hold: Duration,
    high_since: Option<Instant>,
}

impl ResistanceWatch
{
    pub fn new(tolerance: Ohm, hold: Duration) -> Self
    {
        Self {
            tolerance: tolerance,
            hold: hold,
            high_since: None,
        }
    }

    /// Feeds one resistance reading taken at `now`
    ///
    /// An undefined resistance (no current flowing, or a garbled reading) says nothing about the
    /// cell, so the watch is left as it was and cannot trip on it.
    pub fn observe(&mut self, resistance: Option<Ohm>, now: Instant) -> WatchState
    {
        let resistance = match resistance {
            Some(ohms) => ohms,
            None => return self.state(),
        };

        if resistance < self.tolerance {
            self.high_since = None;
            return WatchState::Clear;
        }

        let since = *self.high_since.get_or_insert(now);

        if now.saturating_duration_since(since) >= self.hold {
            WatchState::Tripped
        }
        else {
            WatchState::Armed { since: since }
        }
    }

    fn state(&self) -> WatchState
    {
        match self.high_since {
            Some(since) => WatchState::Armed { since: since },
            None => WatchState::Clear,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefineParams
{
    pub current: Ampere,
    pub period: Duration,
    pub sample_period: Duration,
    pub resistance_tolerance: Ohm,
    pub resistance_time: Duration,
    /// Ceiling while refining
    pub refine_ceiling: Volt,
    /// Ceiling restored afterwards
    pub supply_ceiling: Volt,
    /// Bracket the phase with zero rows in the refining log
    pub zero_pad: bool,
}

/// Runs one refining phase
///
/// # Implementation Notes
/// Samples are paced by a `tokio` interval which delays rather than bursts after a slow reading,
/// so a supply that stalls for a while does not get hammered with catch-up queries.
pub async fn refine<P, L>(psu: &mut P, log: &mut L, params: &RefineParams) -> Result<RefineOutcome>
    where P: InstrumentPort, L: RunLog
{
    info!(
        current = %params.current,
        minutes = params.period.as_secs_f64() / 60.0,
        ends = %finish_time(params.period),
        "refining"
    );

    if params.zero_pad {
        log.refine_marker(Local::now())?;
    }

    let held = match psu.set_voltage(params.refine_ceiling).await {
        Ok(()) => hold_current(psu, log, params).await,
        Err(err) => Err(err),
    };
    let restored = psu.set_voltage(params.supply_ceiling).await;

    let outcome = match (held, restored) {
        (Ok(outcome), Ok(())) => outcome,
        (Ok(_), Err(err)) => return Err(err),
        (Err(err), restored) => {
            if let Err(restore_err) = restored {
                warn!(error = %restore_err, "could not restore voltage ceiling");
            }
            return Err(err);
        },
    };

    if params.zero_pad {
        log.refine_marker(Local::now())?;
    }

    match outcome {
        RefineOutcome::Succeeded => info!("refining period complete"),
        RefineOutcome::AbortedHighResistance => {
            warn!(tolerance = %params.resistance_tolerance, "resistance stayed high, output disabled")
        },
    }

    Ok(outcome)
}

async fn hold_current<P, L>(psu: &mut P, log: &mut L, params: &RefineParams) -> Result<RefineOutcome>
    where P: InstrumentPort, L: RunLog
{
    psu.enable().await?;
    psu.set_current(params.current).await?;

    let started = Instant::now();
    let mut watch = ResistanceWatch::new(params.resistance_tolerance, params.resistance_time);
    let mut ticker = tokio::time::interval(params.sample_period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        if started.elapsed() >= params.period {
            return Ok(RefineOutcome::Succeeded);
        }

        let reading = psu.measure().await?;
        log.refine_sample(&Sample::now(reading))?;

        let resistance = reading.resistance();
        debug!(
            current = %reading.current,
            voltage = %reading.voltage,
            resistance = ?resistance.map(|ohms| ohms.as_f64_base()),
            "refining sample"
        );

        match watch.observe(resistance, Instant::now()) {
            WatchState::Tripped => {
                psu.disable().await?;
                return Ok(RefineOutcome::AbortedHighResistance);
            },
            WatchState::Armed { since } => {
                debug!(high_for = ?since.elapsed(), "resistance above tolerance");
            },
            WatchState::Clear => {},
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::{
        datalog::MemoryLog,
        error::Error,
        devices::Reading,
        sim::{ SimulatedSupply, SupplyEvent },
    };

    fn params(tolerance: f64, hold_secs: u64) -> RefineParams
    {
        RefineParams {
            current: Ampere::from_f64_base(10.0),
            period: Duration::from_secs(30 * 60),
            sample_period: Duration::from_secs(1),
            resistance_tolerance: Ohm::from_f64_base(tolerance),
            resistance_time: Duration::from_secs(hold_secs),
            refine_ceiling: Volt::from_f64_base(2.0),
            supply_ceiling: Volt::from_f64_base(12.5),
            zero_pad: true,
        }
    }

    fn ohms(value: f64) -> Option<Ohm>
    {
        Some(Ohm::from_f64_base(value))
    }

    #[test]
    fn one_low_reading_resets_hold()
    {
        let t0 = Instant::now();
        let at = |secs: u64| t0 + Duration::from_secs(secs);
        let mut watch = ResistanceWatch::new(Ohm::from_f64_base(1.0), Duration::from_secs(60));

        assert_eq!(watch.observe(ohms(1.5), at(0)), WatchState::Armed { since: at(0) });
        assert_eq!(watch.observe(ohms(1.5), at(59)), WatchState::Armed { since: at(0) });
        assert_eq!(watch.observe(ohms(0.5), at(60)), WatchState::Clear);
        assert_eq!(watch.observe(ohms(1.0), at(61)), WatchState::Armed { since: at(61) });
        assert_eq!(watch.observe(ohms(2.0), at(120)), WatchState::Armed { since: at(61) });
        assert_eq!(watch.observe(ohms(2.0), at(121)), WatchState::Tripped);
    }

    #[test]
    fn undefined_resistance_leaves_watch_alone()
    {
        let t0 = Instant::now();
        let at = |secs: u64| t0 + Duration::from_secs(secs);
        let mut watch = ResistanceWatch::new(Ohm::from_f64_base(1.0), Duration::from_secs(10));

        assert_eq!(watch.observe(None, at(0)), WatchState::Clear);
        assert_eq!(watch.observe(ohms(3.0), at(1)), WatchState::Armed { since: at(1) });
        assert_eq!(watch.observe(None, at(20)), WatchState::Armed { since: at(1) });
        assert_eq!(watch.observe(ohms(3.0), at(21)), WatchState::Tripped);
    }

    #[test]
    fn zero_hold_trips_immediately()
    {
        let mut watch = ResistanceWatch::new(Ohm::from_f64_base(1.0), Duration::ZERO);
        assert_eq!(watch.observe(ohms(1.0), Instant::now()), WatchState::Tripped);
    }

    #[tokio::test(start_paused = true)]
    async fn full_period_succeeds_and_restores_ceiling()
    {
        let mut psu = SimulatedSupply::new(|_| 0.5);
        let mut log = MemoryLog::new();
        let started = Instant::now();

        let outcome = refine(&mut psu, &mut log, &params(1.0, 60)).await.unwrap();

        assert_eq!(outcome, RefineOutcome::Succeeded);
        assert!(started.elapsed() >= Duration::from_secs(30 * 60));
        assert!(psu.is_enabled());
        assert_eq!(psu.voltage_ceiling(), Volt::from_f64_base(12.5));
        assert_eq!(
            &psu.events()[..3],
            &[SupplyEvent::SetVoltage(2.0), SupplyEvent::Enable, SupplyEvent::SetCurrent(10.0)]
        );

        assert!(log.refining.first().unwrap().is_marker());
        assert!(log.refining.last().unwrap().is_marker());
        assert!(log.refining.len() > 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_high_resistance_aborts()
    {
        // 0.5 Ω cell held at the 2 V ceiling, only 4 of the 10 A flow
        let mut psu = SimulatedSupply::new(|_| 5.0);
        let mut log = MemoryLog::new();
        let started = Instant::now();

        let outcome = refine(&mut psu, &mut log, &params(0.1, 60)).await.unwrap();

        assert_eq!(outcome, RefineOutcome::AbortedHighResistance);
        assert!(!outcome.succeeded());
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert!(started.elapsed() < Duration::from_secs(65));
        assert!(!psu.is_enabled());
        assert_eq!(psu.voltage_ceiling(), Volt::from_f64_base(12.5));
        assert_eq!(
            &psu.events()[psu.events().len() - 2..],
            &[SupplyEvent::Disable, SupplyEvent::SetVoltage(12.5)]
        );
        assert!(log.refining.last().unwrap().is_marker());
    }

    #[tokio::test(start_paused = true)]
    async fn dip_restarts_the_hold()
    {
        let mut psu = SimulatedSupply::new(|state| {
            let secs = state.elapsed.as_secs_f64();
            if (40.0..41.0).contains(&secs) { 0.5 } else { 5.0 }
        });
        let mut log = MemoryLog::new();
        let started = Instant::now();

        let outcome = refine(&mut psu, &mut log, &params(0.1, 60)).await.unwrap();

        assert_eq!(outcome, RefineOutcome::AbortedHighResistance);
        assert!(started.elapsed() >= Duration::from_secs(101));
    }

    #[tokio::test(start_paused = true)]
    async fn no_zero_rows_without_padding()
    {
        let mut psu = SimulatedSupply::new(|_| 0.5);
        let mut log = MemoryLog::new();
        let mut short = params(1.0, 60);
        short.period = Duration::from_secs(10);
        short.zero_pad = false;

        refine(&mut psu, &mut log, &short).await.unwrap();

        assert!(!log.refining.is_empty());
        assert!(log.refining.iter().all(|sample| !sample.is_marker()));
    }

    /// Drops the connection after a number of readings
    struct FailingSupply
    {
        inner: SimulatedSupply,
        readings_left: usize,
    }

    impl InstrumentPort for FailingSupply
    {
        async fn enable(&mut self) -> Result<()>
        {
            self.inner.enable().await
        }

        async fn disable(&mut self) -> Result<()>
        {
            self.inner.disable().await
        }

        async fn set_current(&mut self, amps: Ampere) -> Result<()>
        {
            self.inner.set_current(amps).await
        }

        async fn set_voltage(&mut self, volts: Volt) -> Result<()>
        {
            self.inner.set_voltage(volts).await
        }

        async fn measure(&mut self) -> Result<Reading>
        {
            if self.readings_left == 0 {
                return Err(Error::Disconnected);
            }
            self.readings_left -= 1;
            self.inner.measure().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_still_restores_ceiling()
    {
        let mut psu = FailingSupply {
            inner: SimulatedSupply::new(|_| 0.5),
            readings_left: 3,
        };
        let mut log = MemoryLog::new();

        let result = refine(&mut psu, &mut log, &params(1.0, 60)).await;

        assert!(matches!(result, Err(Error::Disconnected)));
        assert_eq!(psu.inner.voltage_ceiling(), Volt::from_f64_base(12.5));
        assert_eq!(log.refining.len(), 4);
    }
}
