//! Supply command definition and serialization
//!
//! The supply speaks SCPI over a raw socket. Every command is sent behind an operation-complete
//! query (`*OPC?;`), so the supply answers each line once it has actually applied it. Setters are
//! answered with a bare `1`, queries with `1;<value>`.

use std::fmt;
use crate::units::{ Ampere, Volt };

#[derive(Debug, Clone, PartialEq)]
pub enum CmdSet
{
    /// Program the output current
    ///
    /// Command: `CURR <amps>`
    SetCurrent(Ampere),
    /// Program the voltage ceiling. The supply runs in constant current mode as long as the load
    /// needs less than this.
    ///
    /// Command: `VOLT <volts>`
    SetVoltage(Volt),
    /// Enable or disable the output
    ///
    /// Command: `OUTP <ON|OFF>`
    Output(bool),
    /// Command: `MEAS:CURR?`
    MeasureCurrent,
    /// Command: `MEAS:VOLT?`
    MeasureVoltage,
    /// Clear the status registers and output queue
    ///
    /// Command: `*CLS`
    ClearStatus,
    /// Operator supplied text, passed through untouched
    Raw(String),
}

impl CmdSet
{
    /// Whether the supply answers this command with a value in addition to the completion flag
    pub fn is_query(&self) -> bool
    {
        match self {
            Self::MeasureCurrent | Self::MeasureVoltage => true,
            Self::Raw(text) => text.trim_end().ends_with('?'),
            _ => false,
        }
    }

    /// Wraps the command so the supply reports completion
    pub fn with_opc(&self) -> OpcDisplay<'_>
    {
        OpcDisplay { cmd: self }
    }
}

impl fmt::Display for CmdSet
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::SetCurrent(amps) => write!(f, "CURR {:.4}", view_anon!(amps)),
            Self::SetVoltage(volts) => write!(f, "VOLT {:.3}", view_anon!(volts)),
            Self::Output(on) => write!(f, "OUTP {}", if *on { "ON" } else { "OFF" }),
            Self::MeasureCurrent => write!(f, "MEAS:CURR?"),
            Self::MeasureVoltage => write!(f, "MEAS:VOLT?"),
            Self::ClearStatus => write!(f, "*CLS"),
            Self::Raw(text) => f.write_str(text.trim()),
        }
    }
}

pub struct OpcDisplay<'a>
{
    cmd: &'a CmdSet,
}

impl fmt::Display for OpcDisplay<'_>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self.cmd {
            // *CLS flushes the output queue, an *OPC? in front of it would be thrown away with it
            CmdSet::ClearStatus => write!(f, "{}", self.cmd),
            _ => write!(f, "*OPC?;{}", self.cmd),
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::CmdSet;
    use crate::units::{ Ampere, Volt };

    #[test]
    fn serialize_setters()
    {
        assert_eq!(&format!("{}", CmdSet::SetCurrent(Ampere::from_f64_base(12.5))), "CURR 12.5000");
        assert_eq!(&format!("{}", CmdSet::SetVoltage(Volt::from_f64_base(2.0))), "VOLT 2.000");
        assert_eq!(&format!("{}", CmdSet::Output(true)), "OUTP ON");
        assert_eq!(&format!("{}", CmdSet::Output(false)), "OUTP OFF");
    }

    #[test]
    fn serialize_queries()
    {
        assert_eq!(&format!("{}", CmdSet::MeasureCurrent), "MEAS:CURR?");
        assert_eq!(&format!("{}", CmdSet::MeasureVoltage), "MEAS:VOLT?");
        assert!(CmdSet::MeasureVoltage.is_query());
        assert!(!CmdSet::Output(true).is_query());
    }

    #[test]
    fn serialize_with_opc()
    {
        assert_eq!(&format!("{}", CmdSet::Output(true).with_opc()), "*OPC?;OUTP ON");
        assert_eq!(&format!("{}", CmdSet::MeasureCurrent.with_opc()), "*OPC?;MEAS:CURR?");
        assert_eq!(&format!("{}", CmdSet::ClearStatus.with_opc()), "*CLS");
    }

    #[test]
    fn raw_passthrough()
    {
        let cmd = CmdSet::Raw("SYST:ERR? \n".to_string());
        assert!(cmd.is_query());
        assert_eq!(&format!("{}", cmd.with_opc()), "*OPC?;SYST:ERR?");
    }
}
