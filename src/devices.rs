//! Supply definition and APIs
//!
//! # Purpose
//! The process control code only needs five things from a supply: switch the output on and off,
//! program a current, program a voltage ceiling, and read back what is actually flowing. Those are
//! captured by [`InstrumentPort`]. [`PowerSupply`] implements them for a networked SCPI supply and
//! [`SimulatedSupply`](crate::sim::SimulatedSupply) for a scripted cell.
//!
//! # Cancel Safety
//! **The supply RPCs are not cancel safe,** i.e. they should not be used in a `tokio::select!` call.
//! Each RPC has both a write and a read, so cancelling after a write but before a read misaligns the
//! replies with the requests. Timeouts are handled inside the executor, which keeps the stream
//! aligned by re-sending.
//!
//! # Dropping
//! Dropping a handle does not switch the output off, there is no way to await that from `Drop`.
//! The sequencer disables the output itself when a run ends.

use std::time::Duration;
use tokio::{
    io::{ AsyncReadExt, AsyncWriteExt },
    net::TcpStream,
};
use tracing::info;
use crate::{
    cmd::CmdSet,
    error::Result,
    executor::Executor,
    units::{ Ampere, Ohm, Volt },
};

/// One simultaneous read of the output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading
{
    pub current: Ampere,
    pub voltage: Volt,
}

impl Reading
{
    pub fn new(current: Ampere, voltage: Volt) -> Self
    {
        Self {
            current: current,
            voltage: voltage,
        }
    }

    /// Load resistance seen by the supply, undefined while no current flows
    pub fn resistance(&self) -> Option<Ohm>
    {
        self.voltage.over(self.current)
    }
}

/// The capabilities of a programmable DC supply that the process control relies on
///
/// Implementations retry transient read failures themselves. An `Err` from any of these means the
/// instrument is gone, not that a single read was lost.
#[allow(async_fn_in_trait)]
pub trait InstrumentPort
{
    /// Switch the output on. Idempotent.
    async fn enable(&mut self) -> Result<()>;

    /// Switch the output off. Idempotent.
    async fn disable(&mut self) -> Result<()>;

    async fn set_current(&mut self, amps: Ampere) -> Result<()>;

    /// Program the voltage ceiling (compliance)
    async fn set_voltage(&mut self, volts: Volt) -> Result<()>;

    async fn measure(&mut self) -> Result<Reading>;
}

/// Where and how to reach a networked supply
#[derive(Debug, Clone)]
pub struct SupplySettings
{
    pub address: String,
    pub port: u16,
    pub timeout: Duration,
    /// Re-sends allowed after a timeout. `None` retries forever.
    pub retries: Option<u32>,
    /// Ceiling programmed at connect, which puts the supply in constant current mode
    pub max_voltage: Volt,
}

pub struct PowerSupply<T>
{
    io_handle: Executor<T>,
}

impl PowerSupply<TcpStream>
{
    /// Open a raw SCPI socket to the supply
    pub async fn connect(settings: &SupplySettings) -> Result<Self>
    {
        let stream = TcpStream::connect((settings.address.as_str(), settings.port)).await?;
        stream.set_nodelay(true)?;
        info!(address = %settings.address, port = settings.port, "connected to supply");

        Self::with(stream, settings).await
    }
}

impl <T> PowerSupply<T>
    where T: AsyncReadExt + AsyncWriteExt + Unpin + Send
{
    /// Construct a new supply handle from an async I/O stream
    ///
    /// Creating I/O handles is not handled here so that the supply is not tied to one transport.
    /// The supply operates at whichever of the set current or set voltage needs less power, so the
    /// ceiling is raised to `max_voltage` straight away to keep it in constant current mode.
    pub async fn with(io_handle: T, settings: &SupplySettings) -> Result<Self>
    {
        let mut supply = Self {
            io_handle: Executor::with(io_handle, settings.timeout).retries(settings.retries),
        };
        supply.io_handle.exec_all(&[CmdSet::ClearStatus, CmdSet::SetVoltage(settings.max_voltage)]).await?;

        Ok(supply)
    }

    /// Send operator text unchanged and return the supply's reply line
    pub async fn raw(&mut self, text: &str) -> Result<String>
    {
        self.io_handle.query(CmdSet::Raw(text.to_string())).await
    }
}

impl <T> InstrumentPort for PowerSupply<T>
    where T: AsyncReadExt + AsyncWriteExt + Unpin + Send
{
    async fn enable(&mut self) -> Result<()>
    {
        self.io_handle.exec_cmd(CmdSet::Output(true)).await
    }

    async fn disable(&mut self) -> Result<()>
    {
        self.io_handle.exec_cmd(CmdSet::Output(false)).await
    }

    async fn set_current(&mut self, amps: Ampere) -> Result<()>
    {
        self.io_handle.exec_cmd(CmdSet::SetCurrent(amps)).await
    }

    async fn set_voltage(&mut self, volts: Volt) -> Result<()>
    {
        self.io_handle.exec_cmd(CmdSet::SetVoltage(volts)).await
    }

    async fn measure(&mut self) -> Result<Reading>
    {
        let current = self.io_handle.query_f64(CmdSet::MeasureCurrent).await?;
        let voltage = self.io_handle.query_f64(CmdSet::MeasureVoltage).await?;

        Ok(Reading::new(Ampere::from_f64_base(current), Volt::from_f64_base(voltage)))
    }
}
