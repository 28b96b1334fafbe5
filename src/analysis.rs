//! Sweep analysis
//!
//! Turns the `(current, voltage)` pairs of one sweep into derivative estimates of the voltage with
//! respect to current and picks out the current where the curvature peaks.
//!
//! # Degenerate Data
//! Sweeps come off real hardware. Two steps may land on the same current, readings may be noisy,
//! and a reading may even be missing. None of this is an error here: any quotient whose denominator
//! is zero, or which comes out non-finite, is replaced by `0.0`. No `NaN` or infinity ever reaches
//! the reported maxima.

use serde::{ Deserialize, Serialize };

/// How the second derivative is estimated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DerivativeMode
{
    /// Repeated finite differences. `n - 2` entries for an `n` point sweep, entry `i` centred on
    /// `currents[i + 1]`.
    #[default]
    Raw,
    /// 5 point cubic smoothing kernel. `n` entries, zero where the window does not fit.
    Smoothed,
}

/// Width of the smoothing window
const WINDOW: usize = 5;

/// `num / den`, or zero when that is not a finite number
fn guarded(num: f64, den: f64) -> f64
{
    if den == 0.0 {
        return 0.0;
    }

    let quotient = num / den;

    if quotient.is_finite() {
        quotient
    }
    else {
        0.0
    }
}

/// `dV/dI[i] = (V[i+1] - V[i]) / (I[i+1] - I[i])`
pub fn first_derivative(currents: &[f64], voltages: &[f64]) -> Vec<f64>
{
    currents.windows(2)
        .zip(voltages.windows(2))
        .map(|(i, v)| guarded(v[1] - v[0], i[1] - i[0]))
        .collect()
}

/// `d²V/dI²[i] = (dV/dI[i+1] - dV/dI[i]) / (I[i+1] - I[i])`
pub fn second_derivative_raw(currents: &[f64], voltages: &[f64]) -> Vec<f64>
{
    let first = first_derivative(currents, voltages);

    first.windows(2)
        .zip(currents.windows(2))
        .map(|(d, i)| guarded(d[1] - d[0], i[1] - i[0]))
        .collect()
}

/// Second derivative through a 5 point cubic smoothing kernel
///
/// `Y''[i] = (2y[i-2] - y[i-1] - 2y[i] - y[i+1] + 2y[i+2]) / (7 dx²)` with `dx = I[i] - I[i-1]`,
/// for `2 <= i <= n - 3`. Every other entry is zero.
pub fn second_derivative_smoothed(currents: &[f64], voltages: &[f64]) -> Vec<f64>
{
    let n = currents.len().min(voltages.len());
    let mut out = vec![0.0; n];

    if n < WINDOW {
        return out;
    }

    for i in 2..n - 2 {
        let y = &voltages[i - 2..=i + 2];
        let dx = currents[i] - currents[i - 1];
        let num = 2.0 * y[0] - y[1] - 2.0 * y[2] - y[3] + 2.0 * y[4];

        out[i] = guarded(num, 7.0 * dx * dx);
    }

    out
}

/// Index and value of the largest entry, first one on ties
///
/// `NaN` entries are skipped. Returns `None` for an empty slice.
pub fn argmax(values: &[f64]) -> Option<(usize, f64)>
{
    let mut best: Option<(usize, f64)> = None;

    for (index, &value) in values.iter().enumerate() {
        if value.is_nan() {
            continue;
        }

        match best {
            Some((_, top)) if value <= top => {},
            _ => best = Some((index, value)),
        }
    }

    best
}

/// Smallest step between consecutive currents, `0.0` for a single point
pub fn min_step(currents: &[f64]) -> f64
{
    currents.windows(2)
        .map(|pair| pair[1] - pair[0])
        .reduce(f64::min)
        .unwrap_or(0.0)
}

/// Everything learned from one completed sweep
#[derive(Debug, Clone, PartialEq)]
pub struct SweepResult
{
    pub currents: Vec<f64>,
    pub voltages: Vec<f64>,
    pub first_derivative: Vec<f64>,
    pub second_derivative: Vec<f64>,
    pub mode: DerivativeMode,
    /// Largest raw `dV/dI`, whichever mode was used for the second derivative
    pub max_first_derivative: f64,
    /// Current at which the second derivative peaks
    pub max_second_derivative_x: f64,
    /// The peak second derivative
    pub max_second_derivative_y: f64,
    pub min_step: f64,
}

impl SweepResult
{
    /// Analyzes a sweep
    ///
    /// A sweep too short to have any second derivative reports its curvature peak as zero at the
    /// first current, which classifies as linear.
    pub fn analyze(currents: Vec<f64>, voltages: Vec<f64>, mode: DerivativeMode) -> Self
    {
        let first = first_derivative(&currents, &voltages);
        let (second, centre_offset) = match mode {
            DerivativeMode::Raw => (second_derivative_raw(&currents, &voltages), 1),
            DerivativeMode::Smoothed => (second_derivative_smoothed(&currents, &voltages), 0),
        };

        let max_first_derivative = argmax(&first).map_or(0.0, |(_, value)| value);
        let first_current = currents.first().copied().unwrap_or(0.0);

        let (max_second_derivative_x, max_second_derivative_y) = match argmax(&second) {
            Some((index, value)) => {
                let x = currents.get(index + centre_offset).copied().unwrap_or(first_current);
                (x, value)
            },
            None => (first_current, 0.0),
        };

        Self {
            min_step: min_step(&currents),
            currents: currents,
            voltages: voltages,
            first_derivative: first,
            second_derivative: second,
            mode: mode,
            max_first_derivative: max_first_derivative,
            max_second_derivative_x: max_second_derivative_x,
            max_second_derivative_y: max_second_derivative_y,
        }
    }

    pub fn len(&self) -> usize
    {
        self.currents.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.currents.is_empty()
    }
}
