//! Run preferences
//!
//! Loaded from a YAML file, `prefs.yaml` unless told otherwise. Every key is optional and falls
//! back to the value listed in [`Prefs::default`]. The file is re-read before each phase of a run,
//! so a running experiment can be re-tuned by editing it.
//!
//! ```yaml
//! psu_address: 10.2.115.225
//! first_current: 10.0
//! refining_period: 30      # minutes
//! resistance_tolerance: 1.0
//! resistance_time: 60      # seconds
//! sweep_limit: 60.0
//! step_magnitude: 5.0
//! derivative_mode: smoothed
//! ```

use std::{
    path::{ Path, PathBuf },
    time::Duration,
};
use serde::{ Deserialize, Serialize };
use thiserror::Error;
use crate::{
    analysis::DerivativeMode,
    back_emf::BackEmfParams,
    datalog::LogPaths,
    devices::SupplySettings,
    refine::RefineParams,
    sweep::SweepParams,
    units::{ Ampere, Ohm, Volt },
    validate::DEFAULT_LINEARITY_THRESHOLD,
};

#[derive(Error, Debug)]
pub enum ConfigError
{
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("failed to parse preferences: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid preferences: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Prefs
{
    // supply
    pub psu_address: String,
    pub psu_port: u16,
    /// Seconds to wait for a reply before re-sending
    pub psu_timeout: f64,
    /// Re-sends allowed per request, absent to retry forever
    pub psu_retries: Option<u32>,
    /// Ceiling outside of refining, volts
    #[serde(alias = "max_voltage")]
    pub max_psu_voltage: f64,
    /// Ceiling while refining, volts
    pub max_refine_voltage: f64,

    // run
    /// Refining current until a sweep says otherwise, amps
    pub first_current: f64,
    /// Sweep before the first refine
    pub sweep_first: bool,

    // refining
    /// Minutes
    pub refining_period: f64,
    /// Seconds between refining readings
    pub sample_period: f64,
    /// Ohms
    pub resistance_tolerance: f64,
    /// Seconds the resistance must stay high before aborting
    pub resistance_time: f64,
    pub zero_pad_data: bool,

    // back EMF
    /// Seconds
    pub back_emf_period: f64,
    /// Seconds after the output goes off of the voltage to report
    pub back_emf_print_time: f64,
    /// Seconds between readings, absent to read back to back
    pub back_emf_sample_period: Option<f64>,

    // sweep
    /// Seconds held at each step
    pub step_duration: f64,
    /// Amps
    pub step_magnitude: f64,
    /// Amps
    pub starting_current: f64,
    /// Amps
    pub sweep_limit: f64,
    /// Readings averaged per step
    pub sweep_sample_amount: u32,
    pub derivative_mode: DerivativeMode,

    // operating point
    pub operating_percentage: f64,
    /// Amps
    pub operating_offset: f64,
    /// V/A²
    pub linearity_threshold: f64,
    /// Applied to the refining current when a sweep gives no usable inflection
    pub decay_factor: f64,

    // logs
    pub data_csv_path: PathBuf,
    pub sweeps_csv_path: PathBuf,
    pub sweep_samples_csv_path: PathBuf,
    pub back_emf_csv_path: PathBuf,
}

impl Default for Prefs
{
    fn default() -> Self
    {
        Self {
            psu_address: "10.2.115.225".to_string(),
            psu_port: 5025,
            psu_timeout: 5.0,
            psu_retries: None,
            max_psu_voltage: 12.5,
            max_refine_voltage: 2.0,
            first_current: 10.0,
            sweep_first: true,
            refining_period: 30.0,
            sample_period: 1.0,
            resistance_tolerance: 1.0,
            resistance_time: 60.0,
            zero_pad_data: true,
            back_emf_period: 90.0,
            back_emf_print_time: 45.0,
            back_emf_sample_period: None,
            step_duration: 10.0,
            step_magnitude: 5.0,
            starting_current: 0.0,
            sweep_limit: 60.0,
            sweep_sample_amount: 5,
            derivative_mode: DerivativeMode::Raw,
            operating_percentage: 0.9,
            operating_offset: 0.0,
            linearity_threshold: DEFAULT_LINEARITY_THRESHOLD,
            decay_factor: 0.75,
            data_csv_path: PathBuf::from("data.csv"),
            sweeps_csv_path: PathBuf::from("sweeps.csv"),
            sweep_samples_csv_path: PathBuf::from("sweep_samples.csv"),
            back_emf_csv_path: PathBuf::from("back_emf.csv"),
        }
    }
}

/// Seconds to a duration, negative or non-finite values give zero
fn secs(value: f64) -> Duration
{
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl Prefs
{
    /// Reads, parses, and validates a preferences file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError>
    {
        let text = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Read { path: path.to_path_buf(), source: err })?;

        Self::parse(&text)
    }

    /// Parses and validates preferences from YAML text
    ///
    /// An empty document gives the defaults.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError>
    {
        let prefs: Self = if yaml.trim().is_empty() {
            Self::default()
        }
        else {
            serde_yaml::from_str(yaml)?
        };

        prefs.validate()?;
        Ok(prefs)
    }

    /// Rejects preferences that would make a phase misbehave, e.g. a sweep that never ends
    pub fn validate(&self) -> Result<(), ConfigError>
    {
        let finite = [
            ("psu_timeout", self.psu_timeout),
            ("max_psu_voltage", self.max_psu_voltage),
            ("max_refine_voltage", self.max_refine_voltage),
            ("first_current", self.first_current),
            ("refining_period", self.refining_period),
            ("sample_period", self.sample_period),
            ("resistance_tolerance", self.resistance_tolerance),
            ("resistance_time", self.resistance_time),
            ("back_emf_period", self.back_emf_period),
            ("back_emf_print_time", self.back_emf_print_time),
            ("step_duration", self.step_duration),
            ("step_magnitude", self.step_magnitude),
            ("starting_current", self.starting_current),
            ("sweep_limit", self.sweep_limit),
            ("operating_percentage", self.operating_percentage),
            ("operating_offset", self.operating_offset),
            ("linearity_threshold", self.linearity_threshold),
            ("decay_factor", self.decay_factor),
        ];

        for (key, value) in finite.iter() {
            if !value.is_finite() {
                return Err(ConfigError::Invalid(format!("{} must be a finite number", key)));
            }
        }

        let non_negative = [
            ("psu_timeout", self.psu_timeout),
            ("refining_period", self.refining_period),
            ("sample_period", self.sample_period),
            ("resistance_time", self.resistance_time),
            ("back_emf_period", self.back_emf_period),
            ("back_emf_print_time", self.back_emf_print_time),
            ("back_emf_sample_period", self.back_emf_sample_period.unwrap_or(0.0)),
            ("step_duration", self.step_duration),
            ("starting_current", self.starting_current),
            ("first_current", self.first_current),
        ];

        for (key, value) in non_negative.iter() {
            if *value < 0.0 || value.is_nan() {
                return Err(ConfigError::Invalid(format!("{} must not be negative, got {}", key, value)));
            }
        }

        if self.psu_timeout == 0.0 {
            return Err(ConfigError::Invalid("psu_timeout must be positive".to_string()));
        }

        if self.step_magnitude <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "step_magnitude must be positive, got {}", self.step_magnitude
            )));
        }

        if self.sweep_limit < self.starting_current {
            return Err(ConfigError::Invalid(format!(
                "sweep_limit {} is below starting_current {}", self.sweep_limit, self.starting_current
            )));
        }

        if self.sweep_sample_amount == 0 {
            return Err(ConfigError::Invalid("sweep_sample_amount must be at least 1".to_string()));
        }

        if self.max_refine_voltage > self.max_psu_voltage {
            return Err(ConfigError::Invalid(format!(
                "max_refine_voltage {} exceeds max_psu_voltage {}", self.max_refine_voltage, self.max_psu_voltage
            )));
        }

        if self.resistance_tolerance <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "resistance_tolerance must be positive, got {}", self.resistance_tolerance
            )));
        }

        Ok(())
    }

    pub fn supply_settings(&self) -> SupplySettings
    {
        SupplySettings {
            address: self.psu_address.clone(),
            port: self.psu_port,
            timeout: secs(self.psu_timeout),
            retries: self.psu_retries,
            max_voltage: Volt::from_f64_base(self.max_psu_voltage),
        }
    }

    pub fn sweep_params(&self) -> SweepParams
    {
        SweepParams {
            starting_current: Ampere::from_f64_base(self.starting_current),
            sweep_limit: Ampere::from_f64_base(self.sweep_limit),
            step_magnitude: Ampere::from_f64_base(self.step_magnitude),
            step_duration: secs(self.step_duration),
            sample_count: self.sweep_sample_amount,
            mode: self.derivative_mode,
        }
    }

    pub fn refine_params(&self, current: Ampere) -> RefineParams
    {
        RefineParams {
            current: current,
            period: secs(self.refining_period * 60.0),
            sample_period: secs(self.sample_period),
            resistance_tolerance: Ohm::from_f64_base(self.resistance_tolerance),
            resistance_time: secs(self.resistance_time),
            refine_ceiling: Volt::from_f64_base(self.max_refine_voltage),
            supply_ceiling: Volt::from_f64_base(self.max_psu_voltage),
            zero_pad: self.zero_pad_data,
        }
    }

    pub fn back_emf_params(&self) -> BackEmfParams
    {
        BackEmfParams {
            period: secs(self.back_emf_period),
            print_time: secs(self.back_emf_print_time),
            sample_period: self.back_emf_sample_period.map(secs),
        }
    }

    pub fn log_paths(&self) -> LogPaths
    {
        LogPaths {
            data: self.data_csv_path.clone(),
            sweeps: self.sweeps_csv_path.clone(),
            sweep_samples: self.sweep_samples_csv_path.clone(),
            back_emf: self.back_emf_csv_path.clone(),
        }
    }
}
