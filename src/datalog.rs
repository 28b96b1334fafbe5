//! Append-only run logs
//!
//! Four streams are kept, each one a CSV file in the original layout so existing analysis sheets
//! keep working:
//!
//! - **data**: one `timestamp,current,voltage` row per refining sample. Rows of `timestamp,0.0,0.0`
//!   bracket every refining phase so that integrating `current * dt` over the whole file credits
//!   no charge to the time spent sweeping or relaxing.
//! - **sweep samples**: every individual measurement taken during a sweep, same row layout.
//! - **sweeps**: a pair of rows per sweep,
//!
//!   ```text
//!   +-----------+-----------+-----------+-----
//!   |  (blank)  | current_0 | current_1 | ...
//!   | timestamp | voltage_0 | voltage_1 | ...
//!   +-----------+-----------+-----------+-----
//!   ```
//! - **back EMF**: a pair of rows per relaxation, elapsed seconds over voltage, in the same shape.
//!
//! Files are opened, appended to, and closed for every write. Nothing is buffered across calls, so
//! a run killed mid-phase loses at most the row being written.

use std::{
    fs::OpenOptions,
    io::{ self, Write },
    path::PathBuf,
    time::Duration,
};
use chrono::{ DateTime, Local };
use crate::{
    devices::Reading,
    units::{ Ampere, Volt },
};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Wall-clock time `after` from now, formatted like the log timestamps
pub fn finish_time(after: Duration) -> String
{
    let now = Local::now();
    let end = chrono::Duration::from_std(after)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(now);

    end.format(TIMESTAMP_FORMAT).to_string()
}

/// A reading stamped with the wall-clock time it was taken
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample
{
    pub timestamp: DateTime<Local>,
    pub current: Ampere,
    pub voltage: Volt,
}

impl Sample
{
    pub fn now(reading: Reading) -> Self
    {
        Self {
            timestamp: Local::now(),
            current: reading.current,
            voltage: reading.voltage,
        }
    }

    /// The zero row that brackets a refining phase
    pub fn marker(timestamp: DateTime<Local>) -> Self
    {
        Self {
            timestamp: timestamp,
            current: Ampere::default(),
            voltage: Volt::default(),
        }
    }

    pub fn is_marker(&self) -> bool
    {
        self.current.as_f64_base() == 0.0 && self.voltage.as_f64_base() == 0.0
    }
}

/// Destination for everything a run measures
pub trait RunLog
{
    fn refine_sample(&mut self, sample: &Sample) -> io::Result<()>;

    fn refine_marker(&mut self, timestamp: DateTime<Local>) -> io::Result<()>
    {
        self.refine_sample(&Sample::marker(timestamp))
    }

    fn sweep_sample(&mut self, sample: &Sample) -> io::Result<()>;

    fn sweep_summary(&mut self, timestamp: DateTime<Local>, currents: &[f64], voltages: &[f64]) -> io::Result<()>;

    fn back_emf_trace(&mut self, timestamp: DateTime<Local>, elapsed: &[f64], voltages: &[f64]) -> io::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPaths
{
    pub data: PathBuf,
    pub sweeps: PathBuf,
    pub sweep_samples: PathBuf,
    pub back_emf: PathBuf,
}

/// CSV files on disk
#[derive(Debug, Clone)]
pub struct CsvLog
{
    paths: LogPaths,
}

impl CsvLog
{
    pub fn new(paths: LogPaths) -> Self
    {
        Self { paths: paths }
    }

    pub fn paths(&self) -> &LogPaths
    {
        &self.paths
    }

    fn append(path: &PathBuf, rows: &[String]) -> io::Result<()>
    {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut text = String::new();

        for row in rows {
            text.push_str(row);
            text.push('\n');
        }

        file.write_all(text.as_bytes())
    }
}

fn sample_row(sample: &Sample) -> String
{
    if sample.is_marker() {
        format!("{},0.0,0.0", sample.timestamp.format(TIMESTAMP_FORMAT))
    }
    else {
        format!(
            "{},{},{}",
            sample.timestamp.format(TIMESTAMP_FORMAT),
            sample.current.as_f64_base(),
            sample.voltage.as_f64_base(),
        )
    }
}

/// Builds a row starting with `head` followed by every value
fn series_row(head: &str, values: &[f64]) -> String
{
    let mut row = head.to_string();

    for value in values {
        row.push(',');
        row.push_str(&value.to_string());
    }

    row
}

impl RunLog for CsvLog
{
    fn refine_sample(&mut self, sample: &Sample) -> io::Result<()>
    {
        Self::append(&self.paths.data, &[sample_row(sample)])
    }

    fn sweep_sample(&mut self, sample: &Sample) -> io::Result<()>
    {
        Self::append(&self.paths.sweep_samples, &[sample_row(sample)])
    }

    fn sweep_summary(&mut self, timestamp: DateTime<Local>, currents: &[f64], voltages: &[f64]) -> io::Result<()>
    {
        let stamp = timestamp.format(TIMESTAMP_FORMAT).to_string();
        Self::append(&self.paths.sweeps, &[series_row("", currents), series_row(&stamp, voltages)])
    }

    fn back_emf_trace(&mut self, timestamp: DateTime<Local>, elapsed: &[f64], voltages: &[f64]) -> io::Result<()>
    {
        let stamp = timestamp.format(TIMESTAMP_FORMAT).to_string();
        Self::append(&self.paths.back_emf, &[series_row("", elapsed), series_row(&stamp, voltages)])
    }
}

/// Keeps every stream in memory, for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct MemoryLog
{
    pub refining: Vec<Sample>,
    pub sweep_samples: Vec<Sample>,
    /// `(currents, voltages)` per sweep
    pub sweeps: Vec<(Vec<f64>, Vec<f64>)>,
    /// `(elapsed seconds, voltages)` per relaxation
    pub back_emf: Vec<(Vec<f64>, Vec<f64>)>,
}

impl MemoryLog
{
    pub fn new() -> Self
    {
        Self::default()
    }
}

impl RunLog for MemoryLog
{
    fn refine_sample(&mut self, sample: &Sample) -> io::Result<()>
    {
        self.refining.push(*sample);
        Ok(())
    }

    fn sweep_sample(&mut self, sample: &Sample) -> io::Result<()>
    {
        self.sweep_samples.push(*sample);
        Ok(())
    }

    fn sweep_summary(&mut self, _timestamp: DateTime<Local>, currents: &[f64], voltages: &[f64]) -> io::Result<()>
    {
        self.sweeps.push((currents.to_vec(), voltages.to_vec()));
        Ok(())
    }

    fn back_emf_trace(&mut self, _timestamp: DateTime<Local>, elapsed: &[f64], voltages: &[f64]) -> io::Result<()>
    {
        self.back_emf.push((elapsed.to_vec(), voltages.to_vec()));
        Ok(())
    }
}

impl <L: RunLog> RunLog for &mut L
{
    fn refine_sample(&mut self, sample: &Sample) -> io::Result<()>
    {
        (**self).refine_sample(sample)
    }

    fn sweep_sample(&mut self, sample: &Sample) -> io::Result<()>
    {
        (**self).sweep_sample(sample)
    }

    fn sweep_summary(&mut self, timestamp: DateTime<Local>, currents: &[f64], voltages: &[f64]) -> io::Result<()>
    {
        (**self).sweep_summary(timestamp, currents, voltages)
    }

    fn back_emf_trace(&mut self, timestamp: DateTime<Local>, elapsed: &[f64], voltages: &[f64]) -> io::Result<()>
    {
        (**self).back_emf_trace(timestamp, elapsed, voltages)
    }
}

#[cfg(test)]
mod tests
{
    use super::{ CsvLog, LogPaths, RunLog, Sample };
    use crate::{ devices::Reading, units::{ Ampere, Volt } };
    use chrono::{ Local, TimeZone };

    fn paths_in(dir: &std::path::Path) -> LogPaths
    {
        LogPaths {
            data: dir.join("data.csv"),
            sweeps: dir.join("sweeps.csv"),
            sweep_samples: dir.join("sweep_samples.csv"),
            back_emf: dir.join("back_emf.csv"),
        }
    }

    #[test]
    fn refining_rows_are_appended_in_order()
    {
        let dir = tempfile::tempdir().unwrap();
        let mut log = CsvLog::new(paths_in(dir.path()));
        let at = Local.with_ymd_and_hms(2024, 3, 1, 12, 0, 5).unwrap();

        log.refine_marker(at).unwrap();
        log.refine_sample(&Sample {
            timestamp: at,
            current: Ampere::from_f64_base(12.5),
            voltage: Volt::from_f64_base(0.75),
        }).unwrap();
        log.refine_marker(at).unwrap();

        let text = std::fs::read_to_string(dir.path().join("data.csv")).unwrap();
        assert_eq!(
            text,
            "2024-03-01 12:00:05,0.0,0.0\n2024-03-01 12:00:05,12.5,0.75\n2024-03-01 12:00:05,0.0,0.0\n"
        );
    }

    #[test]
    fn sweep_summary_is_a_row_pair()
    {
        let dir = tempfile::tempdir().unwrap();
        let mut log = CsvLog::new(paths_in(dir.path()));
        let at = Local.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        assert_eq!(log.paths().sweeps, dir.path().join("sweeps.csv"));

        log.sweep_summary(at, &[0.0, 9.0, 18.0], &[0.1, 0.4, 0.9]).unwrap();
        log.sweep_summary(at, &[0.0], &[0.2]).unwrap();

        let text = std::fs::read_to_string(dir.path().join("sweeps.csv")).unwrap();
        assert_eq!(
            text,
            ",0,9,18\n2024-03-01 08:30:00,0.1,0.4,0.9\n,0\n2024-03-01 08:30:00,0.2\n"
        );
    }

    #[test]
    fn sample_keeps_reading()
    {
        let reading = Reading::new(Ampere::from_f64_base(3.0), Volt::from_f64_base(1.5));
        let sample = Sample::now(reading);
        assert_eq!(sample.current, reading.current);
        assert_eq!(sample.voltage, reading.voltage);
        assert!(!sample.is_marker());
    }
}
