//! Sweep validation
//!
//! Decides whether a finished sweep can be trusted to pick the next refining current. Rules are
//! checked in order and the first that matches wins:
//!
//! 1. a negative step anywhere in the currents makes the sweep invalid
//! 2. a curvature peak at a current numerically above the steepest slope makes it invalid
//! 3. a curvature peak no higher than the linearity threshold makes it linear
//! 4. anything else has a usable inflection

use std::fmt;
use crate::analysis::SweepResult;

/// Curvature below which a sweep is considered a straight line, in V/A²
pub const DEFAULT_LINEARITY_THRESHOLD: f64 = 0.015;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InvalidReason
{
    /// The currents went backwards somewhere
    NonMonotonic { min_step: f64 },
    /// The curvature peak sits past the steepest part of the curve
    InflectionBeyondSlope { inflection: f64, max_slope: f64 },
}

impl fmt::Display for InvalidReason
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::NonMonotonic { min_step } => {
                write!(f, "current stepped backwards by {}", -min_step)
            },
            Self::InflectionBeyondSlope { inflection, max_slope } => {
                write!(f, "inflection at {} exceeds steepest slope {}", inflection, max_slope)
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SweepClass
{
    Invalid(InvalidReason),
    /// No usable inflection
    Linear,
    /// Curvature peaks at `current`
    Inflection { current: f64, curvature: f64 },
}

impl SweepClass
{
    /// The recommended operating current, if the sweep gave one
    pub fn operating_point(&self) -> Option<f64>
    {
        match self {
            Self::Inflection { current, .. } => Some(*current),
            _ => None,
        }
    }

    pub fn is_valid(&self) -> bool
    {
        !matches!(self, Self::Invalid(_))
    }
}

impl fmt::Display for SweepClass
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::Invalid(reason) => write!(f, "invalid ({})", reason),
            Self::Linear => f.write_str("linear"),
            Self::Inflection { current, curvature } => {
                write!(f, "inflection at {} A (curvature {})", current, curvature)
            },
        }
    }
}

pub fn classify(result: &SweepResult, linearity_threshold: f64) -> SweepClass
{
    if result.min_step < 0.0 {
        return SweepClass::Invalid(InvalidReason::NonMonotonic { min_step: result.min_step });
    }

    if result.max_second_derivative_x > result.max_first_derivative {
        return SweepClass::Invalid(InvalidReason::InflectionBeyondSlope {
            inflection: result.max_second_derivative_x,
            max_slope: result.max_first_derivative,
        });
    }

    if result.max_second_derivative_y <= linearity_threshold {
        SweepClass::Linear
    }
    else {
        SweepClass::Inflection {
            current: result.max_second_derivative_x,
            curvature: result.max_second_derivative_y,
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::{ classify, InvalidReason, SweepClass, DEFAULT_LINEARITY_THRESHOLD };
    use crate::analysis::{ DerivativeMode, SweepResult };
    use proptest::prelude::*;

    fn result(min_step: f64, slope: f64, x: f64, y: f64) -> SweepResult
    {
        SweepResult {
            currents: vec![0.0, 1.0],
            voltages: vec![0.0, 1.0],
            first_derivative: vec![slope],
            second_derivative: vec![],
            mode: DerivativeMode::Raw,
            max_first_derivative: slope,
            max_second_derivative_x: x,
            max_second_derivative_y: y,
            min_step: min_step,
        }
    }

    #[test]
    fn straight_line_is_linear()
    {
        let currents = vec![0.0, 1.0, 2.0, 3.0, 4.0];
        let voltages = currents.iter().map(|i| 2.0 * i + 0.5).collect();
        let sweep = SweepResult::analyze(currents, voltages, DerivativeMode::Raw);

        let class = classify(&sweep, DEFAULT_LINEARITY_THRESHOLD);
        assert_eq!(class, SweepClass::Linear);
        assert!(class.is_valid());
        assert_eq!(class.operating_point(), None);
    }

    #[test]
    fn square_law_has_inflection()
    {
        let sweep = SweepResult::analyze(vec![0.0, 1.0, 2.0, 3.0], vec![0.0, 1.0, 4.0, 9.0], DerivativeMode::Raw);
        let class = classify(&sweep, DEFAULT_LINEARITY_THRESHOLD);

        assert_eq!(class, SweepClass::Inflection { current: 1.0, curvature: 2.0 });
        assert_eq!(class.operating_point(), Some(1.0));
        assert!(class.is_valid());
    }

    #[test]
    fn inflection_past_slope_is_invalid()
    {
        let class = classify(&result(5.0, 0.02, 40.0, 0.5), DEFAULT_LINEARITY_THRESHOLD);
        assert!(matches!(class, SweepClass::Invalid(InvalidReason::InflectionBeyondSlope { .. })));
        assert!(!class.is_valid());
        assert_eq!(class.operating_point(), None);
    }

    #[test]
    fn threshold_is_inclusive()
    {
        assert_eq!(classify(&result(1.0, 5.0, 1.0, 0.015), 0.015), SweepClass::Linear);
        assert!(matches!(classify(&result(1.0, 5.0, 1.0, 0.016), 0.015), SweepClass::Inflection { .. }));
    }

    proptest!
    {
        #[test]
        fn reversed_step_is_always_invalid(
            min_step in -100.0f64..-1e-9,
            slope in -100.0f64..100.0,
            x in -100.0f64..100.0,
            y in -100.0f64..100.0
        )
        {
            let class = classify(&result(min_step, slope, x, y), DEFAULT_LINEARITY_THRESHOLD);
            prop_assert_eq!(class, SweepClass::Invalid(InvalidReason::NonMonotonic { min_step: min_step }));
        }
    }
}
