//! Current sweep
//!
//! Steps the supply from a starting current up to a limit, holds each step for a fixed time, and
//! averages several readings at the end of the hold. The averaged pairs go to the analyzer.
//!
//! # Step Schedule
//! Steps advance by a fixed increment. The step that would overshoot the limit is pulled back to
//! land on the limit exactly, and the schedule ends after it, so both endpoints are always
//! measured. With a start of 0, a limit of 60 and an increment of 9 the steps are
//! `0, 9, 18, 27, 36, 45, 54, 60`.

use std::time::Duration;
use chrono::Local;
use tracing::{ debug, info };
use crate::{
    analysis::{ DerivativeMode, SweepResult },
    datalog::{ RunLog, Sample },
    devices::{ InstrumentPort, Reading },
    error::Result,
    units::{ Ampere, Volt },
};

/// Iterator over the currents of one sweep
///
/// An increment that is not positive would never reach the limit. Configuration rejects it, and
/// should one get through anyway the schedule goes straight from the start to the limit.
#[derive(Debug, Clone)]
pub struct StepSchedule
{
    next: Option<f64>,
    limit: f64,
    step: f64,
}

impl StepSchedule
{
    pub fn new(start: f64, limit: f64, step: f64) -> Self
    {
        Self {
            next: Some(start.min(limit)),
            limit: limit,
            step: step,
        }
    }
}

impl Iterator for StepSchedule
{
    type Item = f64;

    fn next(&mut self) -> Option<f64>
    {
        let current = self.next?;

        self.next = if current >= self.limit {
            None
        }
        else if self.step > 0.0 {
            let stepped = current + self.step;

            // accumulated rounding must not leave a sliver step just below the limit
            if stepped >= self.limit - self.step * 1e-9 {
                Some(self.limit)
            }
            else {
                Some(stepped)
            }
        }
        else {
            Some(self.limit)
        };

        Some(current)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepParams
{
    pub starting_current: Ampere,
    pub sweep_limit: Ampere,
    pub step_magnitude: Ampere,
    pub step_duration: Duration,
    /// Readings averaged per step
    pub sample_count: u32,
    pub mode: DerivativeMode,
}

impl SweepParams
{
    pub fn schedule(&self) -> StepSchedule
    {
        StepSchedule::new(
            self.starting_current.as_f64_base(),
            self.sweep_limit.as_f64_base(),
            self.step_magnitude.as_f64_base(),
        )
    }

    /// Number of steps the sweep will take, `1 + ceil(range / increment)`
    pub fn steps(&self) -> u32
    {
        let range = self.sweep_limit.as_f64_base() - self.starting_current.as_f64_base();
        let step = self.step_magnitude.as_f64_base();

        if range <= 0.0 || step <= 0.0 {
            return 1 + u32::from(range > 0.0);
        }

        1 + (range / step).ceil() as u32
    }

    /// Time spent holding steps. Reading time is not included.
    pub fn eta(&self) -> Duration
    {
        self.step_duration * self.steps()
    }
}

/// Runs one sweep and analyzes it
///
/// Every individual reading is logged as it arrives and the averaged pairs are logged once the
/// sweep completes. The output is left on at the final step current.
pub async fn run_sweep<P, L>(psu: &mut P, log: &mut L, params: &SweepParams) -> Result<SweepResult>
    where P: InstrumentPort, L: RunLog
{
    info!(
        from = %params.starting_current,
        to = %params.sweep_limit,
        step = %params.step_magnitude,
        eta_secs = params.eta().as_secs(),
        "starting sweep"
    );

    psu.set_current(params.starting_current).await?;
    psu.enable().await?;

    let sample_count = params.sample_count.max(1);
    let mut currents = Vec::new();
    let mut voltages = Vec::new();

    for target in params.schedule() {
        psu.set_current(Ampere::from_f64_base(target)).await?;
        tokio::time::sleep(params.step_duration).await;

        let mut total_current = 0.0;
        let mut total_voltage = 0.0;

        for _ in 0..sample_count {
            let reading = psu.measure().await?;
            log.sweep_sample(&Sample::now(reading))?;

            total_current += reading.current.as_f64_base();
            total_voltage += reading.voltage.as_f64_base();
        }

        let average = Reading::new(
            Ampere::from_f64_base(total_current / f64::from(sample_count)),
            Volt::from_f64_base(total_voltage / f64::from(sample_count)),
        );
        debug!(target_current = target, current = %average.current, voltage = %average.voltage, "sweep step");

        currents.push(average.current.as_f64_base());
        voltages.push(average.voltage.as_f64_base());
    }

    log.sweep_summary(Local::now(), &currents, &voltages)?;

    let result = SweepResult::analyze(currents, voltages, params.mode);
    info!(
        inflection = result.max_second_derivative_x,
        curvature = result.max_second_derivative_y,
        max_slope = result.max_first_derivative,
        "sweep complete"
    );

    Ok(result)
}
