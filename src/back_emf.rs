//! Open-circuit relaxation ("back EMF")
//!
//! Switches the output off and records the cell voltage as it relaxes. Sampling runs as fast as the
//! supply answers, never faster than once a millisecond, unless a sample period is given. One
//! voltage is singled out for the operator: the first one read at or after the print time.

use std::time::Duration;
use chrono::Local;
use tokio::time::{ Instant, MissedTickBehavior };
use tracing::{ debug, info };
use crate::{
    datalog::{ finish_time, RunLog },
    devices::InstrumentPort,
    error::Result,
    units::Volt,
};

/// Written in place of a voltage that was never captured
pub const NOT_CAPTURED: f64 = -1.0;

/// Shortest gap between two readings
const MIN_PACE: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq)]
pub struct BackEmfParams
{
    /// How long to record
    pub period: Duration,
    /// Elapsed time of the voltage to report
    pub print_time: Duration,
    /// Pace between readings, `None` for back to back
    pub sample_period: Option<Duration>,
}

/// One recorded relaxation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackEmfTrace
{
    /// Seconds since the output went off, one per reading
    pub elapsed: Vec<f64>,
    pub voltages: Vec<f64>,
    /// First voltage read at or after the print time
    pub captured: Option<Volt>,
}

impl BackEmfTrace
{
    /// The captured voltage, or [`NOT_CAPTURED`]
    pub fn captured_or_sentinel(&self) -> f64
    {
        self.captured.map_or(NOT_CAPTURED, |volts| volts.as_f64_base())
    }
}

pub async fn record_back_emf<P, L>(psu: &mut P, log: &mut L, params: &BackEmfParams) -> Result<BackEmfTrace>
    where P: InstrumentPort, L: RunLog
{
    info!(
        seconds = params.period.as_secs(),
        ends = %finish_time(params.period),
        "recording back EMF"
    );

    psu.disable().await?;

    let started = Instant::now();
    let stamp = Local::now();
    // back to back readings are still spaced by at least MIN_PACE
    let pace = params.sample_period.unwrap_or(MIN_PACE).max(MIN_PACE);
    let mut ticker = tokio::time::interval(pace);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut trace = BackEmfTrace::default();

    loop {
        ticker.tick().await;

        if started.elapsed() >= params.period {
            break;
        }

        let reading = psu.measure().await?;
        let elapsed = started.elapsed();

        trace.elapsed.push(elapsed.as_secs_f64());
        trace.voltages.push(reading.voltage.as_f64_base());

        if trace.captured.is_none() && elapsed >= params.print_time {
            debug!(voltage = %reading.voltage, elapsed = ?elapsed, "back EMF captured");
            trace.captured = Some(reading.voltage);
        }
    }

    log.back_emf_trace(stamp, &trace.elapsed, &trace.voltages)?;

    match trace.captured {
        Some(volts) => {
            let shown = format!("{:.1}", view!(volts, Milli));
            info!(at_secs = params.print_time.as_secs(), voltage = %shown, "back EMF");
        },
        None => info!(voltage = NOT_CAPTURED, "back EMF not captured within the recording period"),
    }

    Ok(trace)
}
