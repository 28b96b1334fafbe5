//! Run sequencing
//!
//! A run is an optional opening sweep followed by cycles of
//!
//! ```text
//! refine ──aborted──▶ end of run
//!   │
//!   succeeded
//!   ▼
//! back EMF ──▶ sweep ──▶ next refining current ──▶ refine ...
//! ```
//!
//! There is no cycle limit. A run ends when refining aborts on high resistance, or on the first
//! error from the supply or the logs. Either way the output is switched off before [`Sequencer::run`]
//! returns.
//!
//! # Next Refining Current
//! A sweep with a usable inflection sets the current to `inflection * operating_percentage +
//! operating_offset`. A linear or invalid sweep says nothing new about the cell, so the present
//! current decays by `decay_factor`, or `first_current` is used if nothing has been refined yet.
//! The result is kept within `0 ..= sweep_limit`.

use std::{ fmt, path::PathBuf, time::Duration };
use tracing::{ info, warn };
use crate::{
    back_emf::record_back_emf,
    config::Prefs,
    datalog::RunLog,
    devices::InstrumentPort,
    error::Result,
    refine::refine,
    sweep::run_sweep,
    units::{ Ampere, Volt },
    validate::{ classify, SweepClass },
};

/// What the sequencer knows between phases
#[derive(Debug, Clone, PartialEq)]
pub struct RunState
{
    pub refining_current: Ampere,
    pub last_refine_succeeded: bool,
    /// `None` until a back EMF is captured, and after one that was not
    pub last_back_emf_voltage: Option<Volt>,
    /// Refining phases started so far
    pub cycles: u32,
    pub last_sweep: Option<SweepClass>,
}

impl RunState
{
    pub fn new(first_current: Ampere) -> Self
    {
        Self {
            refining_current: first_current,
            last_refine_succeeded: true,
            last_back_emf_voltage: None,
            cycles: 0,
            last_sweep: None,
        }
    }
}

/// A phase about to start
#[derive(Debug, Clone, PartialEq)]
pub enum Phase
{
    Sweep { from: Ampere, to: Ampere, eta: Duration },
    Refine { current: Ampere, period: Duration },
    BackEmf { period: Duration },
}

impl fmt::Display for Phase
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::Sweep { from, to, eta } => {
                write!(f, "sweep from {:.3} to {:.3}, about {:.1} minutes", from, to, eta.as_secs_f64() / 60.0)
            },
            Self::Refine { current, period } => {
                write!(f, "refine at {:.3} for {:.1} minutes", current, period.as_secs_f64() / 60.0)
            },
            Self::BackEmf { period } => {
                write!(f, "record back EMF for {} seconds", period.as_secs())
            },
        }
    }
}

/// Checkpoint passed before every phase starts
///
/// The unit type passes straight through. A `Vec<Phase>` records the phases in order.
#[allow(async_fn_in_trait)]
pub trait PhaseGate
{
    async fn enter(&mut self, phase: &Phase) -> Result<()>;
}

impl PhaseGate for ()
{
    async fn enter(&mut self, _phase: &Phase) -> Result<()>
    {
        Ok(())
    }
}

impl PhaseGate for Vec<Phase>
{
    async fn enter(&mut self, phase: &Phase) -> Result<()>
    {
        self.push(phase.clone());
        Ok(())
    }
}

/// Picks the refining current following a sweep
pub fn next_refining_current(state: &RunState, class: &SweepClass, prefs: &Prefs) -> Ampere
{
    let proposed = match class.operating_point() {
        Some(inflection) => inflection * prefs.operating_percentage + prefs.operating_offset,
        None if state.cycles == 0 => prefs.first_current,
        None => state.refining_current.as_f64_base() * prefs.decay_factor,
    };

    let limit = prefs.sweep_limit.max(0.0);
    let clamped = if proposed.is_nan() { 0.0 } else { proposed.clamp(0.0, limit) };

    if clamped != proposed {
        warn!(proposed, used = clamped, "refining current out of range, clamped");
    }

    Ampere::from_f64_base(clamped)
}

pub struct Sequencer<P, L, G = ()>
{
    psu: P,
    log: L,
    prefs: Prefs,
    prefs_path: Option<PathBuf>,
    gate: G,
    state: RunState,
}

impl <P, L> Sequencer<P, L>
    where P: InstrumentPort, L: RunLog
{
    pub fn new(psu: P, log: L, prefs: Prefs) -> Self
    {
        Self {
            state: RunState::new(Ampere::from_f64_base(prefs.first_current)),
            psu: psu,
            log: log,
            prefs: prefs,
            prefs_path: None,
            gate: (),
        }
    }
}

impl <P, L, G> Sequencer<P, L, G>
    where P: InstrumentPort, L: RunLog, G: PhaseGate
{
    /// Re-read preferences from `path` before every phase
    pub fn reload_from(mut self, path: impl Into<PathBuf>) -> Self
    {
        self.prefs_path = Some(path.into());
        self
    }

    /// Pass every phase through `gate` before starting it
    pub fn gate<H: PhaseGate>(self, gate: H) -> Sequencer<P, L, H>
    {
        Sequencer {
            psu: self.psu,
            log: self.log,
            prefs: self.prefs,
            prefs_path: self.prefs_path,
            gate: gate,
            state: self.state,
        }
    }

    pub fn state(&self) -> &RunState
    {
        &self.state
    }

    pub fn prefs(&self) -> &Prefs
    {
        &self.prefs
    }

    pub fn into_parts(self) -> (P, L, G)
    {
        (self.psu, self.log, self.gate)
    }

    /// Picks up edits to the preferences file, keeping the present preferences if it is unusable
    fn refresh(&mut self)
    {
        let path = match &self.prefs_path {
            Some(path) => path,
            None => return,
        };

        match Prefs::load_from(path) {
            Ok(prefs) => {
                if prefs != self.prefs {
                    info!(path = %path.display(), "preferences changed");
                }
                self.prefs = prefs;
            },
            Err(err) => warn!(error = %err, "keeping previous preferences"),
        }
    }

    /// Runs cycles until refining aborts
    ///
    /// The output is off when this returns, whether the run ended normally or on an error.
    pub async fn run(&mut self) -> Result<RunState>
    {
        let result = self.cycle().await;

        if let Err(err) = self.psu.disable().await {
            warn!(error = %err, "could not disable output at end of run");
            result?;
            return Err(err);
        }
        result?;

        info!(cycles = self.state.cycles, "run complete");
        Ok(self.state.clone())
    }

    async fn cycle(&mut self) -> Result<()>
    {
        self.refresh();
        if self.prefs.sweep_first {
            self.sweep_and_decide().await?;
        }

        loop {
            self.refresh();
            let params = self.prefs.refine_params(self.state.refining_current);
            self.gate.enter(&Phase::Refine { current: params.current, period: params.period }).await?;

            self.state.cycles += 1;
            let outcome = refine(&mut self.psu, &mut self.log, &params).await?;
            self.state.last_refine_succeeded = outcome.succeeded();

            if !outcome.succeeded() {
                warn!(cycles = self.state.cycles, "resistance too high, ending run");
                return Ok(());
            }

            self.refresh();
            let params = self.prefs.back_emf_params();
            self.gate.enter(&Phase::BackEmf { period: params.period }).await?;

            let trace = record_back_emf(&mut self.psu, &mut self.log, &params).await?;
            self.state.last_back_emf_voltage = trace.captured;

            self.refresh();
            self.sweep_and_decide().await?;
        }
    }

    async fn sweep_and_decide(&mut self) -> Result<()>
    {
        let params = self.prefs.sweep_params();
        self.gate.enter(&Phase::Sweep {
            from: params.starting_current,
            to: params.sweep_limit,
            eta: params.eta(),
        }).await?;

        let result = run_sweep(&mut self.psu, &mut self.log, &params).await?;
        let class = classify(&result, self.prefs.linearity_threshold);
        let current = next_refining_current(&self.state, &class, &self.prefs);

        info!(sweep = %class, next_current = %current, "sweep classified");

        self.state.refining_current = current;
        self.state.last_sweep = Some(class);
        Ok(())
    }
}

#[cfg(test)]
mod tests
{
    use super::{ next_refining_current, Phase, RunState };
    use crate::{
        config::Prefs,
        units::Ampere,
        validate::{ InvalidReason, SweepClass },
    };
    use approx::assert_relative_eq;
    use std::time::Duration;

    fn after_cycles(current: f64, cycles: u32) -> RunState
    {
        let mut state = RunState::new(Ampere::from_f64_base(current));
        state.cycles = cycles;
        state
    }

    #[test]
    fn inflection_sets_operating_point()
    {
        let prefs = Prefs { operating_percentage: 0.9, operating_offset: 1.0, ..Prefs::default() };
        let class = SweepClass::Inflection { current: 30.0, curvature: 0.2 };

        let next = next_refining_current(&after_cycles(10.0, 3), &class, &prefs);
        assert_relative_eq!(next.as_f64_base(), 28.0);
    }

    #[test]
    fn linear_sweep_decays_current()
    {
        let prefs = Prefs::default();
        let next = next_refining_current(&after_cycles(20.0, 2), &SweepClass::Linear, &prefs);
        assert_relative_eq!(next.as_f64_base(), 15.0);
    }

    #[test]
    fn invalid_sweep_decays_like_linear()
    {
        let prefs = Prefs::default();
        let class = SweepClass::Invalid(InvalidReason::NonMonotonic { min_step: -1.0 });
        let next = next_refining_current(&after_cycles(20.0, 2), &class, &prefs);
        assert_relative_eq!(next.as_f64_base(), 15.0);
    }

    #[test]
    fn uninformative_opening_sweep_uses_first_current()
    {
        let prefs = Prefs { first_current: 12.0, ..Prefs::default() };
        let next = next_refining_current(&after_cycles(12.0, 0), &SweepClass::Linear, &prefs);
        assert_eq!(next, Ampere::from_f64_base(12.0));
    }

    #[test]
    fn recommendation_is_clamped_to_sweep_limit()
    {
        let prefs = Prefs { sweep_limit: 60.0, operating_offset: 20.0, ..Prefs::default() };
        let class = SweepClass::Inflection { current: 55.0, curvature: 1.0 };

        let next = next_refining_current(&after_cycles(10.0, 1), &class, &prefs);
        assert_eq!(next, Ampere::from_f64_base(60.0));

        let prefs = Prefs { operating_offset: -100.0, ..Prefs::default() };
        let next = next_refining_current(&after_cycles(10.0, 1), &class, &prefs);
        assert_eq!(next, Ampere::from_f64_base(0.0));
    }

    #[test]
    fn phase_narration()
    {
        let phase = Phase::Refine { current: Ampere::from_f64_base(12.5), period: Duration::from_secs(1800) };
        assert_eq!(phase.to_string(), "refine at 12.500 A for 30.0 minutes");

        let phase = Phase::BackEmf { period: Duration::from_secs(90) };
        assert_eq!(phase.to_string(), "record back EMF for 90 seconds");
    }
}
