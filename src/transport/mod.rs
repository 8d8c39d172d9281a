//! Point-to-point connections to balances.
//!
//! A [`Connector`] knows how to reach devices (real serial ports or simulated
//! balances) and returns a raw byte stream. [`PortManager`] wraps a connector,
//! enforces that each identifier is held by at most one open [`Transport`] at
//! a time, and hands out transports that speak the line protocol:
//!
//! - `send(command)` writes the command followed by CR LF
//! - `read_line(timeout)` returns the next newline-terminated line, or `None`
//!   on timeout
//! - `close()` releases the port and never fails
//!
//! # Example
//!
//! ```rust,ignore
//! let ports = PortManager::new(Arc::new(SerialConnector::new(9600)));
//! let mut transport = ports.open("/dev/ttyUSB0").await?;
//! transport.send("O8").await?;
//! let line = transport.read_line(Duration::from_secs(2)).await?;
//! transport.close().await;
//! ```

pub mod serial;
pub mod simulated;

use crate::device::PortInfo;
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, trace};

pub use serial::SerialConnector;
pub use simulated::{BalanceBehavior, SimulatedConnector};

/// Line terminator appended to every command.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Longest time spent discarding stale input, however fast bytes arrive.
const DISCARD_WINDOW: Duration = Duration::from_millis(20);

/// Most bytes discarded in one call.
const DISCARD_LIMIT: usize = 4096;

/// Trait alias for async serial port I/O.
///
/// Implemented by `tokio_serial::SerialStream` and by `tokio::io::DuplexStream`.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Source of device connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open and configure the connection to `identifier`, with input and
    /// output buffers cleared.
    async fn connect(&self, identifier: &str) -> AppResult<DynSerial>;

    /// Enumerate the devices this connector can reach.
    fn list_ports(&self) -> AppResult<Vec<PortInfo>>;
}

/// Opens transports and tracks which identifiers are in use.
#[derive(Clone)]
pub struct PortManager {
    connector: Arc<dyn Connector>,
    held: Arc<Mutex<HashSet<String>>>,
}

impl PortManager {
    /// Creates a manager over `connector`.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            held: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Open a transport to `identifier`.
    ///
    /// # Errors
    /// `DaqError::Connection` if the identifier is already held by another
    /// transport or the connector cannot reach it.
    pub async fn open(&self, identifier: &str) -> AppResult<Transport> {
        let lease = self.lease(identifier)?;
        let stream = self.connector.connect(identifier).await?;
        debug!(port = identifier, "Opened transport");

        Ok(Transport {
            identifier: identifier.to_string(),
            stream: BufReader::new(stream),
            pending: Vec::new(),
            _lease: lease,
        })
    }

    /// Whether a transport to `identifier` is currently open.
    pub fn is_open(&self, identifier: &str) -> bool {
        self.held.lock().contains(identifier)
    }

    /// Enumerate reachable devices.
    pub fn list_ports(&self) -> AppResult<Vec<PortInfo>> {
        self.connector.list_ports()
    }

    fn lease(&self, identifier: &str) -> AppResult<PortLease> {
        let mut held = self.held.lock();
        if !held.insert(identifier.to_string()) {
            return Err(DaqError::connection(identifier, "port is already open"));
        }
        Ok(PortLease {
            identifier: identifier.to_string(),
            held: Arc::clone(&self.held),
        })
    }
}

/// Exclusive claim on an identifier, released on drop.
struct PortLease {
    identifier: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.held.lock().remove(&self.identifier);
    }
}

/// An open connection to one device.
pub struct Transport {
    identifier: String,
    stream: BufReader<DynSerial>,
    /// Bytes of a line that was still incomplete when a read timed out.
    pending: Vec<u8>,
    _lease: PortLease,
}

impl Transport {
    /// Identifier this transport was opened for.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Write `command` followed by CR LF.
    pub async fn send(&mut self, command: &str) -> AppResult<()> {
        let frame = format!("{command}{LINE_TERMINATOR}");
        trace!(port = %self.identifier, command = %frame.escape_default(), "Sending");

        let port = self.stream.get_mut();
        port.write_all(frame.as_bytes())
            .await
            .map_err(|e| DaqError::connection(&self.identifier, e))?;
        port.flush()
            .await
            .map_err(|e| DaqError::connection(&self.identifier, e))
    }

    /// Read the next line, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` if no complete line arrived in time. The returned
    /// text has trailing whitespace (including CR LF) removed.
    ///
    /// # Errors
    /// `DaqError::Connection` on an I/O failure or if the device closed the
    /// connection without sending anything.
    pub async fn read_line(&mut self, timeout: Duration) -> AppResult<Option<String>> {
        let read = tokio::time::timeout(
            timeout,
            self.stream.read_until(b'\n', &mut self.pending),
        )
        .await;

        match read {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(DaqError::connection(&self.identifier, e)),
            Ok(Ok(0)) if self.pending.is_empty() => Err(DaqError::connection(
                &self.identifier,
                "unexpected EOF from device",
            )),
            Ok(Ok(_)) => {
                let line = String::from_utf8_lossy(&self.pending)
                    .trim_end()
                    .to_string();
                self.pending.clear();
                trace!(port = %self.identifier, line = %line.escape_default(), "Received");
                Ok(Some(line))
            }
        }
    }

    /// Throw away input received and not yet read.
    ///
    /// Bounded by a 20 ms window and a 4 KiB cap, so a device that prints
    /// continuously cannot hold the caller here. Returns the number of bytes
    /// discarded.
    pub async fn discard_input(&mut self) -> usize {
        let mut total = self.pending.len() + self.stream.buffer().len();
        self.pending.clear();
        let buffered = self.stream.buffer().len();
        self.stream.consume(buffered);

        let port = self.stream.get_mut();
        let mut scratch = [0u8; 256];
        let drain = async {
            while total < DISCARD_LIMIT {
                match port.read(&mut scratch).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => total += n,
                }
            }
        };
        let _ = tokio::time::timeout(DISCARD_WINDOW, drain).await;

        if total > 0 {
            debug!(port = %self.identifier, bytes = total, "Discarded stale input");
        }
        total
    }

    /// Close the connection. Errors are ignored.
    pub async fn close(mut self) {
        let _ = self.stream.get_mut().shutdown().await;
        debug!(port = %self.identifier, "Closed transport");
    }
}
