//! Electrical quantities exchanged with the supply
//!
//! Values are stored in base units as `f64`. The supply speaks decimal ASCII and the analysis works
//! on plain floats, so these wrappers mostly exist to keep amps and volts from being swapped at call
//! sites and to give the wire and narration code a single place to format them.

use std::{
    fmt::{ self, Write },
    ops::{ Add, Sub, Mul },
    cmp::{ PartialEq, PartialOrd, Ordering },
};

/// Defines a scalar prefix type for displaying units without changing the underlying value e.g.
/// "milli-" or "kilo-"
pub trait Scalar
{
    /// Return the power of 10 of this scalar
    ///
    /// For example, a prefix of "milli-" should return -3.
    fn magnitude() -> i32;

    /// Return this scalar's written shorthand notation
    ///
    /// For example, a prefix of "kilo-" should return "k"
    fn notation() -> &'static str;
}

macro_rules! impl_prefix
{
    { $name:ident, $magnitude:literal, $notation:literal } => {
        pub struct $name {}

        impl $name
        {
            pub const MAGNITUDE: i32 = $magnitude;
            pub const NOTATION: &'static str = $notation;
        }

        impl Scalar for $name
        {
            fn magnitude() -> i32
            {
                Self::MAGNITUDE
            }

            fn notation() -> &'static str
            {
                Self::NOTATION
            }
        }
    }
}

impl_prefix!{ Milli, -3, "m" }
impl_prefix!{ Base, 0, "" }

/// Formats a quantity scaled to a prefix
///
/// Honors the formatter's precision, e.g. `{:.3}`. Without one, the shortest representation that
/// round-trips is written.
pub struct UnitDisplay
{
    symbol: &'static str,
    notation: &'static str,
    scaled: f64,
    hide_unit: bool,
}

impl fmt::Display for UnitDisplay
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        if let Some(precision) = f.precision() {
            write!(f, "{:.*}", precision, self.scaled)?;
        }
        else {
            write!(f, "{}", self.scaled)?;
        }

        if self.hide_unit {
            Ok(())
        }
        else {
            if !self.notation.is_empty() || !self.symbol.is_empty() {
                f.write_char(' ')?;
            }
            f.write_str(self.notation)?;
            f.write_str(self.symbol)
        }
    }
}

/// An electrical current
#[derive(Debug, Clone, Copy, Default)]
pub struct Ampere
{
    value: f64,
}

/// A resistance
#[derive(Debug, Clone, Copy, Default)]
pub struct Ohm
{
    value: f64,
}

/// A potential difference
#[derive(Debug, Clone, Copy, Default)]
pub struct Volt
{
    value: f64,
}

macro_rules! impl_unit
{
    { $u:ty, $symbol:literal } => {
        impl $u
        {
            /// The written shorthand symbol
            pub const SYMBOL: &'static str = $symbol;

            /// Constructs a new value from a floating point number of base units
            pub const fn from_f64_base(num: f64) -> Self
            {
                Self { value: num }
            }

            /// Constructs a new value from a number expressed with the given prefix
            ///
            /// `Ampere::from_f64::<Milli>(250.0)` is a quarter of an amp.
            pub fn from_f64<S: Scalar>(num: f64) -> Self
            {
                Self { value: num * 10f64.powi(S::magnitude()) }
            }

            /// This value in base units
            pub const fn as_f64_base(&self) -> f64
            {
                self.value
            }

            /// This value expressed with the given prefix
            pub fn as_f64<S: Scalar>(&self) -> f64
            {
                self.value / 10f64.powi(S::magnitude())
            }

            pub fn is_finite(&self) -> bool
            {
                self.value.is_finite()
            }

            /// Displays the unit with a given scalar prefix
            pub fn display<S: Scalar>(&self) -> UnitDisplay
            {
                UnitDisplay {
                    symbol: Self::SYMBOL,
                    notation: S::notation(),
                    scaled: self.as_f64::<S>(),
                    hide_unit: false,
                }
            }

            /// Displays the unit with a given scalar prefix but hides the symbol and prefix in the
            /// output
            pub fn display_anon<S: Scalar>(&self) -> UnitDisplay
            {
                UnitDisplay {
                    symbol: Self::SYMBOL,
                    notation: S::notation(),
                    scaled: self.as_f64::<S>(),
                    hide_unit: true,
                }
            }

            /// Displays the unit with no scalar prefix and with its symbol
            pub fn display_base(&self) -> UnitDisplay
            {
                self.display::<Base>()
            }

            /// Displays the unit with no scalar prefix and hides the symbol in the output
            pub fn display_anon_base(&self) -> UnitDisplay
            {
                self.display_anon::<Base>()
            }
        }

        impl Add for $u
        {
            type Output = Self;

            fn add(self, rhs: Self) -> Self
            {
                Self { value: self.value + rhs.value }
            }
        }

        impl Sub for $u
        {
            type Output = Self;

            fn sub(self, rhs: Self) -> Self
            {
                Self { value: self.value - rhs.value }
            }
        }

        impl Mul<f64> for $u
        {
            type Output = Self;

            fn mul(self, rhs: f64) -> Self
            {
                Self { value: self.value * rhs }
            }
        }

        impl PartialEq for $u
        {
            fn eq(&self, rhs: &Self) -> bool
            {
                self.value == rhs.value
            }
        }

        impl PartialOrd for $u
        {
            fn partial_cmp(&self, rhs: &Self) -> Option<Ordering>
            {
                self.value.partial_cmp(&rhs.value)
            }
        }

        impl fmt::Display for $u
        {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
            {
                fmt::Display::fmt(&self.display_base(), f)
            }
        }
    }
}

impl_unit!{ Ampere, "A" }
impl_unit!{ Ohm, "Ω" }
impl_unit!{ Volt, "V" }

impl Volt
{
    /// Ohm's law, `R = V / I`
    ///
    /// Returns `None` when the resistance is undefined: a current of exactly zero, or a reading
    /// which is not a finite number.
    pub fn over(self, current: Ampere) -> Option<Ohm>
    {
        if current.value == 0.0 {
            return None;
        }

        let ohms = self.value / current.value;

        if ohms.is_finite() {
            Some(Ohm { value: ohms })
        }
        else {
            None
        }
    }
}

macro_rules! view
{
    ( $u:expr ) => {
        $u.display_base()
    };
    ( $u:expr, $prefix:ident ) => {
        $u.display::<$crate::units::$prefix>()
    };
}

macro_rules! view_anon
{
    ( $u:expr ) => {
        $u.display_anon_base()
    };
    ( $u:expr, $prefix:ident ) => {
        $u.display_anon::<$crate::units::$prefix>()
    };
}

#[cfg(test)]
mod tests
{
    use super::{ Ampere, Volt, Ohm, Milli };

    #[test]
    fn precision_rounds()
    {
        assert_eq!(&format!("{:.2}", Volt::from_f64_base(12.346).display_anon_base()), "12.35");
    }

    #[test]
    fn precision_zero_extends()
    {
        assert_eq!(&format!("{:.4}", view_anon!(Ampere::from_f64_base(1.5))), "1.5000");
    }

    #[test]
    fn no_precision_prints_shortest()
    {
        assert_eq!(&format!("{}", Ampere::from_f64_base(0.25)), "0.25 A");
    }

    #[test]
    fn format_unit_prefixed()
    {
        let amp = Ampere::from_f64::<Milli>(12345.5);
        assert_eq!(&format!("{:.1}", view!(amp, Milli)), "12345.5 mA");
        assert_eq!(&format!("{:.4}", view!(amp)), "12.3455 A");
    }

    #[test]
    fn ohms_law()
    {
        let ohms = Volt::from_f64_base(3.0).over(Ampere::from_f64_base(1.5));
        assert_eq!(ohms, Some(Ohm::from_f64_base(2.0)));
    }

    #[test]
    fn zero_current_has_no_resistance()
    {
        assert_eq!(Volt::from_f64_base(3.0).over(Ampere::from_f64_base(0.0)), None);
        assert_eq!(Volt::from_f64_base(0.0).over(Ampere::from_f64_base(0.0)), None);
    }

    #[test]
    fn nan_reading_has_no_resistance()
    {
        assert_eq!(Volt::from_f64_base(f64::NAN).over(Ampere::from_f64_base(2.0)), None);
    }
}
