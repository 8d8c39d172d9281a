//! The acquisition loop.
//!
//! # State Machine
//!
//! ```text
//! Idle ──start──> Running ──stop──> Stopping ──teardown──> Idle
//!                    │                                      ▲
//!                    └──────── log file failure ────────────┘
//! ```
//!
//! On entry the loop opens one transport per device (a device that fails to
//! open is reported and written as `Error` for the rest of the run), wakes
//! each balance with one command, writes the log header and lets the
//! balances settle. Each tick then polls every device in the configured
//! order, appends one row and sleeps for the interval. A stop request is
//! honored at the next tick boundary; a tick in progress always completes.

use crate::command::OutputCommand;
use crate::device::Device;
use crate::error::AppResult;
use crate::poller;
use crate::reading::Reading;
use crate::storage::{LogWriter, Row};
use crate::transport::{PortManager, Transport};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

/// Lifecycle state of the acquisition loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No run active.
    Idle,
    /// Ticking.
    Running,
    /// Stop requested; finishing the current tick and closing transports.
    Stopping,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Running => write!(f, "running"),
            RunState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Status messages published while a run progresses.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// Header written, ticking is about to begin.
    Started {
        /// Log file path.
        path: PathBuf,
        /// Number of configured devices.
        devices: usize,
    },
    /// A device could not be opened and will not be polled this run.
    DeviceExcluded {
        /// Device display name.
        device: String,
        /// Why the open failed.
        reason: String,
    },
    /// The wake-up command could not be sent to a device.
    WakeFailed {
        /// Device display name.
        device: String,
        /// Why the write failed.
        reason: String,
    },
    /// One device was polled.
    Measured {
        /// Device display name.
        device: String,
        /// What it returned.
        reading: Reading,
    },
    /// A row reached the log file.
    RowWritten {
        /// 1-based tick number.
        tick: u64,
        /// The row as written.
        row: Row,
    },
    /// The run ended because of an unrecoverable error.
    Failed {
        /// Error text.
        reason: String,
    },
    /// Stop requested.
    Stopping,
    /// Teardown finished.
    Stopped {
        /// Rows written during the run.
        rows: u64,
    },
}

impl fmt::Display for RunEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunEvent::Started { .. } => write!(f, "Starting measurements..."),
            RunEvent::DeviceExcluded { device, reason } => {
                write!(f, "Warning: Could not open {device}: {reason}")
            }
            RunEvent::WakeFailed { device, reason } => {
                write!(f, "Warning: Could not pre-ping {device}: {reason}")
            }
            RunEvent::Measured {
                device,
                reading: Reading::Error(msg),
            } => write!(f, "Error reading {device}: {msg}"),
            RunEvent::Measured { device, reading } => {
                write!(f, "Measured {device}: {}", reading.cell())
            }
            RunEvent::RowWritten { tick, .. } => write!(f, "Wrote row {tick}"),
            RunEvent::Failed { reason } => write!(f, "Error: {reason}"),
            RunEvent::Stopping => write!(f, "Stopping measurements..."),
            RunEvent::Stopped { rows } => write!(f, "Recording stopped after {rows} rows"),
        }
    }
}

/// Everything the loop needs for one run. The device list is frozen here.
#[derive(Debug, Clone)]
pub struct RunPlan {
    /// Devices in column order.
    pub devices: Vec<Device>,
    /// Sleep between ticks.
    pub interval: Duration,
    /// Output command sent at every exchange.
    pub command: OutputCommand,
    /// Log file to create.
    pub path: PathBuf,
    /// Deadline for one measurement exchange.
    pub measure_timeout: Duration,
    /// Pause after each wake-up command.
    pub wake_delay: Duration,
    /// Pause after the header is written, before the first tick.
    pub settle_delay: Duration,
}

/// Result of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Log file path.
    pub path: PathBuf,
    /// Rows appended (equals completed ticks).
    pub rows: u64,
    /// Why the run ended early, if it did.
    pub error: Option<String>,
}

enum Slot {
    Open(Transport),
    Excluded(String),
}

/// A prepared run: transports open, header written.
pub struct AcquisitionLoop {
    plan: RunPlan,
    slots: Vec<Slot>,
    writer: LogWriter,
    events: broadcast::Sender<RunEvent>,
    rows: u64,
}

impl AcquisitionLoop {
    /// Open transports, wake the balances and create the log file.
    ///
    /// # Errors
    /// Any log file error; all transports are closed before returning it.
    pub async fn prepare(
        ports: &PortManager,
        plan: RunPlan,
        events: broadcast::Sender<RunEvent>,
    ) -> AppResult<Self> {
        let mut slots = Vec::with_capacity(plan.devices.len());

        for device in &plan.devices {
            match ports.open(&device.identifier).await {
                Ok(mut transport) => {
                    if let Err(e) = transport.send(plan.command.wire()).await {
                        warn!(device = %device.name, error = %e, "Wake-up command failed");
                        let _ = events.send(RunEvent::WakeFailed {
                            device: device.name.clone(),
                            reason: e.to_string(),
                        });
                    }
                    tokio::time::sleep(plan.wake_delay).await;
                    slots.push(Slot::Open(transport));
                }
                Err(e) => {
                    warn!(device = %device.name, error = %e, "Excluding device from run");
                    let _ = events.send(RunEvent::DeviceExcluded {
                        device: device.name.clone(),
                        reason: e.to_string(),
                    });
                    slots.push(Slot::Excluded(e.to_string()));
                }
            }
        }

        let writer = match LogWriter::create(&plan.path, &plan.devices) {
            Ok(w) => w,
            Err(e) => {
                close_all(slots).await;
                return Err(e);
            }
        };

        tokio::time::sleep(plan.settle_delay).await;

        info!(path = %plan.path.display(), devices = plan.devices.len(), "Acquisition prepared");
        let _ = events.send(RunEvent::Started {
            path: plan.path.clone(),
            devices: plan.devices.len(),
        });

        Ok(Self {
            plan,
            slots,
            writer,
            events,
            rows: 0,
        })
    }

    /// Rows written so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Poll every device once, in order, and assemble the row.
    pub async fn poll_all(&mut self) -> Row {
        let mut row = Row::now();
        let command = self.plan.command.wire();

        for (device, slot) in self.plan.devices.iter().zip(self.slots.iter_mut()) {
            let reading = match slot {
                Slot::Open(transport) => {
                    poller::measure(transport, command, self.plan.measure_timeout).await
                }
                Slot::Excluded(reason) => Reading::Error(format!("not connected: {reason}")),
            };

            let _ = self.events.send(RunEvent::Measured {
                device: device.name.clone(),
                reading: reading.clone(),
            });
            row.readings.push((device.name.clone(), reading));
        }

        row
    }

    /// Run one tick: poll, then append the row.
    ///
    /// # Errors
    /// Log file failures, which are fatal to the run.
    pub async fn tick(&mut self) -> AppResult<Row> {
        let row = self.poll_all().await;
        self.writer.append(&row)?;
        self.rows += 1;
        let _ = self.events.send(RunEvent::RowWritten {
            tick: self.rows,
            row: row.clone(),
        });
        Ok(row)
    }

    /// Tick until `running` turns false or the log file fails, then close
    /// every transport.
    pub async fn run(mut self, mut running: watch::Receiver<bool>) -> RunSummary {
        let mut failure = None;

        while *running.borrow_and_update() {
            if let Err(e) = self.tick().await {
                error!(error = %e, "Log write failed, ending run");
                let _ = self.events.send(RunEvent::Failed {
                    reason: e.to_string(),
                });
                failure = Some(e.to_string());
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.plan.interval) => {}
                changed = running.changed() => {
                    // Sender dropped counts as a stop request.
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.shutdown(failure).await
    }

    async fn shutdown(self, error: Option<String>) -> RunSummary {
        close_all(self.slots).await;
        info!(rows = self.rows, "Acquisition stopped");
        let _ = self.events.send(RunEvent::Stopped { rows: self.rows });

        RunSummary {
            path: self.plan.path,
            rows: self.rows,
            error,
        }
    }
}

async fn close_all(slots: Vec<Slot>) {
    for slot in slots {
        if let Slot::Open(transport) = slot {
            transport.close().await;
        }
    }
}

/// Drive a full run and keep `state` current. Used by the run controller's
/// worker task.
pub(crate) async fn run_to_completion(
    ports: PortManager,
    plan: RunPlan,
    events: broadcast::Sender<RunEvent>,
    state: Arc<watch::Sender<RunState>>,
    running: watch::Receiver<bool>,
) -> RunSummary {
    let path = plan.path.clone();

    let summary = match AcquisitionLoop::prepare(&ports, plan, events.clone()).await {
        Ok(acquisition) => acquisition.run(running).await,
        Err(e) => {
            error!(error = %e, "Could not start acquisition");
            let _ = events.send(RunEvent::Failed {
                reason: e.to_string(),
            });
            RunSummary {
                path,
                rows: 0,
                error: Some(e.to_string()),
            }
        }
    };

    state.send_replace(RunState::Idle);
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{BalanceBehavior, SimulatedConnector};
    use tempfile::tempdir;
    use tokio::time::Instant;

    fn plan(devices: Vec<Device>, path: PathBuf) -> RunPlan {
        RunPlan {
            devices,
            interval: Duration::from_secs(1),
            command: OutputCommand::Continuous,
            path,
            measure_timeout: poller::MEASURE_TIMEOUT,
            wake_delay: Duration::ZERO,
            settle_delay: Duration::ZERO,
        }
    }

    fn ports(behaviors: &[(&str, BalanceBehavior)]) -> PortManager {
        let mut connector = SimulatedConnector::new();
        for (id, behavior) in behaviors {
            connector = connector.with_balance(id, behavior.clone());
        }
        PortManager::new(Arc::new(connector))
    }

    #[tokio::test(start_paused = true)]
    async fn failing_device_does_not_disturb_others() {
        let dir = tempdir().unwrap();
        let ports = ports(&[
            ("a", BalanceBehavior::Weighing(10.0)),
            ("b", BalanceBehavior::Unplugged),
            ("c", BalanceBehavior::Weighing(30.0)),
        ]);
        let devices = vec![
            Device::new("a", None),
            Device::new("b", None),
            Device::new("c", None),
        ];
        let (events, _rx) = broadcast::channel(64);

        let mut acquisition =
            AcquisitionLoop::prepare(&ports, plan(devices, dir.path().join("t.csv")), events)
                .await
                .unwrap();

        let start = Instant::now();
        let row = acquisition.tick().await.unwrap();
        assert!(start.elapsed() <= Duration::from_secs(6));

        assert_eq!(row.readings[0], ("a".to_string(), Reading::Numeric(10.0)));
        assert!(matches!(row.readings[1].1, Reading::Error(_)));
        assert_eq!(row.readings[2], ("c".to_string(), Reading::Numeric(30.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn unopenable_device_keeps_its_column() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.csv");
        let ports = ports(&[("a", BalanceBehavior::Weighing(1.0))]);
        let devices = vec![Device::new("a", None), Device::new("ghost", Some("g"))];
        let (events, mut rx) = broadcast::channel(64);

        let mut acquisition = AcquisitionLoop::prepare(&ports, plan(devices, path.clone()), events)
            .await
            .unwrap();
        acquisition.tick().await.unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            RunEvent::DeviceExcluded { ref device, .. } if device == "g"
        ));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "Timestamp,a_Weight,g_Weight");
        assert!(lines[1].ends_with(",1,Error"));
    }

    #[tokio::test(start_paused = true)]
    async fn header_failure_closes_transports() {
        let dir = tempdir().unwrap();
        let ports = ports(&[("a", BalanceBehavior::Weighing(1.0))]);
        let bad_path = dir.path().join("missing/t.csv");
        let (events, _rx) = broadcast::channel(64);

        let result =
            AcquisitionLoop::prepare(&ports, plan(vec![Device::new("a", None)], bad_path), events)
                .await;
        assert!(result.is_err());
        assert!(!ports.is_open("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_at_tick_boundary_and_releases_ports() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.csv");
        let ports = ports(&[("a", BalanceBehavior::Weighing(5.0))]);
        let (events, mut rx) = broadcast::channel(64);
        let (stop_tx, stop_rx) = watch::channel(true);

        let acquisition =
            AcquisitionLoop::prepare(&ports, plan(vec![Device::new("a", None)], path.clone()), events)
                .await
                .unwrap();
        let handle = tokio::spawn(acquisition.run(stop_rx));

        let mut written = 0;
        while written < 2 {
            if let RunEvent::RowWritten { tick, .. } = rx.recv().await.unwrap() {
                written = tick;
            }
        }
        stop_tx.send(false).unwrap();

        let summary = handle.await.unwrap();
        assert_eq!(summary.rows, 2);
        assert!(summary.error.is_none());
        assert!(!ports.is_open("a"));
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 3);
    }

    #[test]
    fn event_messages() {
        let measured = RunEvent::Measured {
            device: "left".into(),
            reading: Reading::Numeric(2.5),
        };
        assert_eq!(measured.to_string(), "Measured left: 2.5");

        let missing = RunEvent::Measured {
            device: "left".into(),
            reading: Reading::Unavailable,
        };
        assert_eq!(missing.to_string(), "Measured left: NA");

        let failed = RunEvent::Measured {
            device: "left".into(),
            reading: Reading::Error("broken pipe".into()),
        };
        assert_eq!(failed.to_string(), "Error reading left: broken pipe");
        assert_eq!(RunEvent::Stopping.to_string(), "Stopping measurements...");
    }
}
