//! **A**synchronous-Rust **R**emote **C**ontrol for **S**upply-driven **E**lectro**R**efining
//!
//! Drives a programmable DC supply through unattended refining runs: hold a constant current until
//! the cell's resistance says the anode is spent, let the cell relax and record its back EMF, then
//! sweep the current to find where the voltage curve bends and refine just below that.
//!
//! ```no_run
//! use arcs_er::{ config::Prefs, datalog::CsvLog, devices::PowerSupply, sequencer::Sequencer };
//!
//! # async fn run() -> arcs_er::error::Result<()> {
//! let prefs = Prefs::load_from("prefs.yaml".as_ref())?;
//! let psu = PowerSupply::connect(&prefs.supply_settings()).await?;
//! let log = CsvLog::new(prefs.log_paths());
//!
//! let state = Sequencer::new(psu, log, prefs).reload_from("prefs.yaml").run().await?;
//! println!("refined for {} cycles", state.cycles);
//! # Ok(())
//! # }
//! ```

#[macro_use]
pub mod units;
pub mod cmd;
pub mod executor;
pub mod devices;
pub mod sim;
pub mod error;
pub mod config;
pub mod datalog;
pub mod analysis;
pub mod validate;
pub mod sweep;
pub mod refine;
pub mod back_emf;
pub mod sequencer;

pub use devices::{ InstrumentPort, PowerSupply, Reading };
pub use error::{ Error, Result };
pub use sequencer::{ RunState, Sequencer };
pub use sim::SimulatedSupply;
