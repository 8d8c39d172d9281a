//! Simulated balances for testing without physical hardware.
//!
//! Each simulated balance lives behind a `tokio::io::duplex` pair: the
//! application side is handed out as a [`DynSerial`], the device side is
//! served by a small task that answers `O8` / `S` the way a real balance does.
//!
//! # Example
//!
//! ```rust,ignore
//! let connector = SimulatedConnector::new()
//!     .with_balance("sim0", BalanceBehavior::Weighing(12.5))
//!     .with_balance("sim1", BalanceBehavior::Unplugged);
//! let ports = PortManager::new(Arc::new(connector));
//! ```

use super::{Connector, DynSerial};
use crate::device::PortInfo;
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

const DUPLEX_CAPACITY: usize = 1024;

/// How a simulated balance reacts to output commands.
#[derive(Debug, Clone, PartialEq)]
pub enum BalanceBehavior {
    /// Answers every command with this weight in grams.
    Weighing(f64),
    /// Answers with `grams` plus uniform relative noise of up to `noise`
    /// (0.01 is ±1%).
    Noisy {
        /// Nominal weight.
        grams: f64,
        /// Largest relative deviation.
        noise: f64,
    },
    /// Prints `grams` every `period` whatever it is sent, like a balance
    /// left in continuous print mode.
    Streaming {
        /// Printed weight.
        grams: f64,
        /// Time between lines.
        period: Duration,
    },
    /// Accepts commands but never answers.
    Silent,
    /// Answers every command with this raw line.
    Garbled(String),
    /// Opens, then behaves like a pulled cable: writes fail, reads hit EOF.
    Unplugged,
}

#[derive(Debug, Clone)]
struct SimulatedBalance {
    behavior: BalanceBehavior,
    connections: usize,
}

/// Connector serving in-memory balances.
#[derive(Clone, Default)]
pub struct SimulatedConnector {
    balances: Arc<RwLock<HashMap<String, SimulatedBalance>>>,
}

impl SimulatedConnector {
    /// Creates a connector with no balances.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a balance reachable as `identifier`.
    pub fn with_balance(self, identifier: &str, behavior: BalanceBehavior) -> Self {
        self.set_behavior(identifier, behavior);
        self
    }

    /// Changes how `identifier` behaves on its next connection.
    pub fn set_behavior(&self, identifier: &str, behavior: BalanceBehavior) {
        self.balances
            .write()
            .entry(identifier.to_string())
            .and_modify(|b| b.behavior = behavior.clone())
            .or_insert(SimulatedBalance {
                behavior,
                connections: 0,
            });
    }

    /// Number of times `identifier` has been connected.
    pub fn connections(&self, identifier: &str) -> usize {
        self.balances
            .read()
            .get(identifier)
            .map_or(0, |b| b.connections)
    }
}

#[async_trait]
impl Connector for SimulatedConnector {
    async fn connect(&self, identifier: &str) -> AppResult<DynSerial> {
        let behavior = {
            let mut balances = self.balances.write();
            let balance = balances
                .get_mut(identifier)
                .ok_or_else(|| DaqError::connection(identifier, "no such device"))?;
            balance.connections += 1;
            balance.behavior.clone()
        };

        let (host, device) = tokio::io::duplex(DUPLEX_CAPACITY);
        match behavior {
            BalanceBehavior::Unplugged => drop(device),
            BalanceBehavior::Streaming { grams, period } => {
                tokio::spawn(serve_streaming(device, grams, period));
            }
            behavior => {
                tokio::spawn(serve_balance(device, behavior));
            }
        }
        Ok(Box::new(host))
    }

    fn list_ports(&self) -> AppResult<Vec<PortInfo>> {
        let mut ports: Vec<PortInfo> = self
            .balances
            .read()
            .keys()
            .map(|id| PortInfo::new(id.clone(), "Simulated balance"))
            .collect();
        ports.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        Ok(ports)
    }
}

/// Format a weight the way balances print it: sign, padded magnitude, unit.
pub fn format_weight_line(grams: f64) -> String {
    let sign = if grams < 0.0 { '-' } else { '+' };
    format!("{sign}{:>10.2} g\r\n", grams.abs())
}

async fn serve_balance(device: DuplexStream, behavior: BalanceBehavior) {
    let mut device = BufReader::new(device);
    let mut line = String::new();

    loop {
        line.clear();
        match device.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let reply = match (line.trim(), &behavior) {
            ("O8" | "S", BalanceBehavior::Weighing(grams)) => format_weight_line(*grams),
            ("O8" | "S", BalanceBehavior::Noisy { grams, noise }) => {
                let jitter = if *noise > 0.0 {
                    rand::thread_rng().gen_range(-noise..*noise)
                } else {
                    0.0
                };
                format_weight_line(grams * (1.0 + jitter))
            }
            ("O8" | "S", BalanceBehavior::Garbled(raw)) => format!("{raw}\r\n"),
            _ => continue,
        };

        if device.get_mut().write_all(reply.as_bytes()).await.is_err() {
            break;
        }
    }
}

async fn serve_streaming(device: DuplexStream, grams: f64, period: Duration) {
    let (reader, mut writer) = tokio::io::split(device);
    let mut reader = BufReader::new(reader);
    let mut ticker = tokio::time::interval(period);
    let mut line = String::new();
    let reply = format_weight_line(grams);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if writer.write_all(reply.as_bytes()).await.is_err() {
                    break;
                }
            }
            read = reader.read_line(&mut line) => match read {
                Ok(0) | Err(_) => break,
                // Commands are ignored.
                Ok(_) => line.clear(),
            },
        }
    }
}
