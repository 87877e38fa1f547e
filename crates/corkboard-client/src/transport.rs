//! One-shot connection handling and WAN delay emulation.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use rand::Rng;
use tracing::trace;

use crate::{ClientError, ClientResult};

/// Uniform random sleep applied before every outbound transmission.
///
/// Used to emulate WAN latency in experiments. Disabled by default; not
/// part of the correctness contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayEmulation {
    min: Duration,
    max: Duration,
}

impl DelayEmulation {
    /// No delay (the production default).
    pub const fn disabled() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Sleep a uniform random duration in `min_ms..=max_ms` before each
    /// send. `max_ms` is raised to `min_ms` if given smaller.
    pub fn uniform_ms(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min: Duration::from_millis(min_ms),
            max: Duration::from_millis(max_ms.max(min_ms)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.max.is_zero()
    }

    /// Sleeps once, if enabled.
    pub fn apply(&self) {
        if !self.is_enabled() {
            return;
        }
        let delay = if self.min == self.max {
            self.min
        } else {
            rand::thread_rng().gen_range(self.min..=self.max)
        };
        std::thread::sleep(delay);
    }
}

impl Default for DelayEmulation {
    fn default() -> Self {
        Self::disabled()
    }
}

/// One-shot frame transport: connect, send, read one reply, close.
///
/// The connection and socket timeouts default to 10 seconds so a dead peer
/// fails a write instead of hanging a worker. Exchanges that legitimately
/// block server-side (the RYW token wait) use [`Transport::blocking`].
#[derive(Debug, Clone)]
pub struct Transport {
    delay: DelayEmulation,
    timeout: Option<Duration>,
}

impl Transport {
    pub fn new() -> Self {
        Self {
            delay: DelayEmulation::disabled(),
            timeout: Some(Duration::from_secs(10)),
        }
    }

    pub fn with_delay(mut self, delay: DelayEmulation) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// A copy of this transport with timeouts removed, for exchanges whose
    /// reply may be held back indefinitely by the peer.
    pub fn blocking(&self) -> Self {
        Self {
            delay: self.delay,
            timeout: None,
        }
    }

    pub fn delay(&self) -> DelayEmulation {
        self.delay
    }

    /// The connect/read/write timeout applied to exchanges.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Sends one line and reads one reply line.
    pub fn exchange(&self, addr: SocketAddr, line: &str) -> ClientResult<String> {
        let stream = self.send(addr, &[line], false)?;
        read_reply_line(stream)
    }

    /// Sends several lines (no terminator) and reads one reply line.
    ///
    /// Used for the RYW unlock: `UNLOCK` followed by the update frame.
    pub fn exchange_lines(&self, addr: SocketAddr, lines: &[&str]) -> ClientResult<String> {
        let stream = self.send(addr, lines, false)?;
        read_reply_line(stream)
    }

    /// Sends a blank-line-terminated batch of frames and reads one reply
    /// line. This is the shape of every update push: a coordinator fan-out
    /// leg, a sync broadcast, and a replica-to-replica transfer.
    pub fn push_batch(&self, addr: SocketAddr, lines: &[String]) -> ClientResult<String> {
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let stream = self.send(addr, &refs, true)?;
        read_reply_line(stream)
    }

    /// Sends one line and reads reply lines until a blank line or EOF.
    ///
    /// This is the shape of `READ` and `SEND_UPDATES` responses.
    pub fn exchange_batch(&self, addr: SocketAddr, line: &str) -> ClientResult<Vec<String>> {
        let stream = self.send(addr, &[line], false)?;
        let mut reader = BufReader::new(stream);
        let mut lines = Vec::new();
        loop {
            let mut buf = String::new();
            let n = reader.read_line(&mut buf)?;
            let trimmed = buf.trim_end_matches(['\n', '\r']);
            if n == 0 || trimmed.is_empty() {
                break;
            }
            lines.push(trimmed.to_string());
        }
        Ok(lines)
    }

    fn send(
        &self,
        addr: SocketAddr,
        lines: &[&str],
        terminate: bool,
    ) -> ClientResult<TcpStream> {
        let stream = match self.timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
            None => TcpStream::connect(addr)?,
        };
        stream.set_read_timeout(self.timeout)?;
        stream.set_write_timeout(self.timeout)?;
        eprintln!(
            "DEBUG[{:?}]: client send: local={:?} lines={lines:?} terminate={terminate}",
            std::thread::current().id(),
            stream.local_addr()
        );

        self.delay.apply();

        let mut payload = String::new();
        for line in lines {
            payload.push_str(line);
            payload.push('\n');
        }
        if terminate {
            payload.push('\n');
        }
        trace!(%addr, bytes = payload.len(), "sending frame(s)");

        let mut stream = stream;
        stream.write_all(payload.as_bytes())?;
        stream.flush()?;
        Ok(stream)
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

fn read_reply_line(stream: TcpStream) -> ClientResult<String> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let n = reader.read_line(&mut line)?;
    if n == 0 {
        return Err(ClientError::ConnectionClosed);
    }
    Ok(line.trim_end_matches(['\n', '\r']).to_string())
}
