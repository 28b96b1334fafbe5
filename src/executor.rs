//! Line protocol handling and command execution
//!
//! # Timeouts
//! A reply that does not arrive within the configured timeout is not an error for the caller. The
//! same request is written again and the wait starts over, for as long as the retry budget allows.
//! Without a budget this retries forever, which is what an unattended run wants from a supply that
//! occasionally drops a query.
//!
//! A request that was only slow gets answered once per copy sent. The first answer is returned and
//! the rest are read off the stream before the next request goes out, so replies stay paired with
//! their requests.

use std::{ io, time::Duration };
use tokio::io::{ AsyncWriteExt, AsyncReadExt };
use tracing::{ debug, warn };
use crate::{
    cmd::CmdSet,
    error::{ Error, Result },
};

pub struct Executor<T>
{
    line_ending: &'static str,
    io_handle: T,
    read_buf: Vec<u8>,
    timeout: Duration,
    retries: Option<u32>,
}

impl <T> Executor<T>
    where T: AsyncReadExt + AsyncWriteExt + Unpin + Send
{
    pub fn with(io_handle: T, timeout: Duration) -> Self
    {
        Self {
            line_ending: "\n",
            io_handle: io_handle,
            read_buf: Vec::with_capacity(128),
            timeout: timeout,
            retries: None,
        }
    }

    /// Limit how many times a request is re-sent after a timeout. `None` retries forever.
    pub fn retries(mut self, retries: Option<u32>) -> Self
    {
        self.retries = retries;
        self
    }

    /// Drops the first `n` bytes from the read buffer
    ///
    /// Drops all bytes if `n >= self.read_buf.len()`
    fn drop_first(&mut self, n: usize)
    {
        if n >= self.read_buf.len() {
            self.read_buf.clear();
        }
        else {
            self.read_buf.drain(..n);
            self.read_buf.shrink_to(128);
        }
    }

    /// Returns the index of the first linefeed in the read buffer if any, starting the search at the
    /// suggested index
    fn find_line_ending(&self, start_hint: usize) -> Option<usize>
    {
        self.read_buf.iter()
            .skip(start_hint)
            .position(|byte| *byte == 0x0A)
            .map(|offset| offset + start_hint)
    }

    /// Reads a line (series of bytes terminated by `LF` / 0x0A) into the read buffer and returns
    /// how many bytes are in the line
    ///
    /// # Cancel Safety
    /// This function is cancel safe e.g. when wrapped in `tokio::time::timeout`. It never destroys
    /// contents of the read buffer, only appends.
    async fn read_line(&mut self) -> io::Result<usize>
    {
        let mut searched = 0;

        loop {
            if let Some(index) = self.find_line_ending(searched) {
                return Ok(index + 1);
            }
            searched = self.read_buf.len();

            let mut temp_buf = [0u8; 64];
            let bytes_read = self.io_handle.read(&mut temp_buf[..]).await?;

            if bytes_read == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
            }
            self.read_buf.extend_from_slice(&temp_buf[..bytes_read]);
        }
    }

    /// Removes the first `size` bytes from the buffer and returns them as text without the line
    /// terminator
    fn take_line(&mut self, size: usize) -> String
    {
        let line = String::from_utf8_lossy(&self.read_buf[..size])
            .trim_end_matches(['\r', '\n'])
            .to_string();
        self.drop_first(size);
        line
    }

    async fn send(&mut self, request: &str) -> Result<()>
    {
        let serialized = format!("{}{}", request, self.line_ending);

        match self.io_handle.write_all(serialized.as_bytes()).await {
            Err(err) if is_disconnect(&err) => Err(Error::Disconnected),
            other => Ok(other?),
        }
    }

    /// Writes the request and waits for one reply line, re-sending on timeout
    async fn transact(&mut self, request: &str) -> Result<String>
    {
        let mut attempts = 0;

        loop {
            attempts += 1;
            self.send(request).await?;

            match tokio::time::timeout(self.timeout, self.read_line()).await {
                Ok(Ok(size)) => {
                    let reply = self.take_line(size);
                    debug!(request, reply = %reply, "supply replied");
                    self.discard_late_replies(request, attempts - 1).await?;
                    return Ok(reply);
                }
                Ok(Err(err)) if is_disconnect(&err) => return Err(Error::Disconnected),
                Ok(Err(err)) => return Err(err.into()),
                Err(_elapsed) => {
                    if let Some(budget) = self.retries {
                        if attempts > budget {
                            return Err(Error::NoReply { request: request.to_string(), attempts: attempts });
                        }
                    }
                    warn!(request, attempts, timeout = ?self.timeout, "supply timed out, re-sending");
                }
            }
        }
    }

    /// Reads and drops up to `extra` reply lines owed to re-sent copies of `request`
    ///
    /// Each re-send of a request that was only answered late gets answered too. Left on the stream,
    /// that answer would be taken as the reply to the next request and every reply after it would
    /// be off by one. A copy still unanswered after one timeout is taken as lost.
    async fn discard_late_replies(&mut self, request: &str, extra: u32) -> Result<()>
    {
        for _ in 0..extra {
            match tokio::time::timeout(self.timeout, self.read_line()).await {
                Ok(Ok(size)) => {
                    let stale = self.take_line(size);
                    debug!(request, reply = %stale, "dropped reply to a re-sent request");
                }
                Ok(Err(err)) if is_disconnect(&err) => return Err(Error::Disconnected),
                Ok(Err(err)) => return Err(err.into()),
                Err(_elapsed) => break,
            }
        }

        Ok(())
    }

    /// Executes the given command and waits until the supply reports it complete
    pub async fn exec_cmd(&mut self, cmd: CmdSet) -> Result<()>
    {
        let request = cmd.with_opc().to_string();

        if cmd == CmdSet::ClearStatus {
            return self.send(&request).await;
        }

        let reply = self.transact(&request).await?;

        if reply.starts_with('1') {
            Ok(())
        }
        else {
            Err(Error::BadReply { request: request, reply: reply })
        }
    }

    pub async fn exec_all(&mut self, cmds: &[CmdSet]) -> Result<()>
    {
        for cmd in cmds.iter() {
            self.exec_cmd(cmd.clone()).await?;
        }

        Ok(())
    }

    /// Sends a command and returns the complete reply line
    pub async fn query(&mut self, cmd: CmdSet) -> Result<String>
    {
        let request = cmd.with_opc().to_string();
        self.transact(&request).await
    }

    /// Sends a query and parses the value which follows the completion flag
    pub async fn query_f64(&mut self, cmd: CmdSet) -> Result<f64>
    {
        let request = cmd.with_opc().to_string();
        let reply = self.transact(&request).await?;

        parse_value(&reply).ok_or_else(|| Error::BadReply { request: request, reply: reply.clone() })
    }
}

fn is_disconnect(err: &io::Error) -> bool
{
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}

/// Extracts the number from a `1;<value>` reply
///
/// The supply formats numbers like `+1.234560E+00`, which `f64::from_str` accepts as is.
fn parse_value(reply: &str) -> Option<f64>
{
    reply.rsplit(';')
        .next()
        .and_then(|token| token.trim().parse::<f64>().ok())
}

#[cfg(test)]
mod tests
{
    use super::parse_value;

    #[test]
    fn parse_value_after_opc()
    {
        assert_eq!(parse_value("1;+1.234560E+00"), Some(1.23456));
        assert_eq!(parse_value("1;-5.000000E-03"), Some(-0.005));
    }

    #[test]
    fn parse_value_without_opc()
    {
        assert_eq!(parse_value(" 12.5 "), Some(12.5));
    }

    #[test]
    fn parse_value_rejects_garbage()
    {
        assert_eq!(parse_value("1;"), None);
        assert_eq!(parse_value("1;ERR"), None);
    }
}
