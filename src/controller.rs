//! Run controller: the control surface used by the CLI (or any other front end).
//!
//! The controller owns the configured [`RunRequest`], validates it on
//! [`RunController::start`], and spawns the acquisition loop on a dedicated
//! tokio task. Callers never block on device I/O: `start`, `stop` and
//! `status` only touch channels, and progress comes back as [`RunEvent`]s on
//! a broadcast channel.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut controller = RunController::new(ports, &settings);
//! let mut events = controller.subscribe();
//! controller.configure(devices, 10, OutputCommand::Continuous, "bench_a");
//! controller.start()?;
//! // ...
//! controller.stop();
//! let summary = controller.join().await;
//! ```

use crate::acquisition::{self, RunEvent, RunPlan, RunState, RunSummary};
use crate::command::OutputCommand;
use crate::config::{AcquisitionConfig, Settings};
use crate::device::Device;
use crate::error::{AppResult, DaqError};
use crate::poller;
use crate::reading::Reading;
use crate::transport::PortManager;
use crate::validation;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::info;

/// Extension given to every log file.
pub const LOG_EXTENSION: &str = "csv";

const EVENT_CAPACITY: usize = 256;

/// What the caller wants recorded next.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    /// Balances in column order.
    pub devices: Vec<Device>,
    /// Seconds between ticks.
    pub interval_secs: u64,
    /// Output command.
    pub command: OutputCommand,
    /// Log filename without extension.
    pub filename: String,
}

struct ActiveRun {
    running: watch::Sender<bool>,
    handle: JoinHandle<RunSummary>,
}

/// Starts, stops and reports on acquisition runs.
pub struct RunController {
    ports: PortManager,
    acquisition: AcquisitionConfig,
    request: Option<RunRequest>,
    state: Arc<watch::Sender<RunState>>,
    events: broadcast::Sender<RunEvent>,
    active: Option<ActiveRun>,
}

impl RunController {
    /// Creates an idle controller using `settings` for data directory and
    /// timing.
    pub fn new(ports: PortManager, settings: &Settings) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            ports,
            acquisition: settings.acquisition.clone(),
            request: None,
            state: Arc::new(state),
            events,
            active: None,
        }
    }

    /// Receive status events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Set up the next run. Has no effect on a run already in progress.
    pub fn configure(
        &mut self,
        devices: Vec<Device>,
        interval_secs: u64,
        command: OutputCommand,
        filename: &str,
    ) {
        self.request = Some(RunRequest {
            devices,
            interval_secs,
            command,
            filename: filename.trim().to_string(),
        });
    }

    /// Replace the configured filename, e.g. after `FileExists`.
    pub fn set_filename(&mut self, filename: &str) -> AppResult<()> {
        let request = self.request.as_mut().ok_or_else(not_configured)?;
        request.filename = filename.trim().to_string();
        Ok(())
    }

    /// The configured request, if any.
    pub fn request(&self) -> Option<&RunRequest> {
        self.request.as_ref()
    }

    /// Current lifecycle state.
    pub fn status(&self) -> RunState {
        *self.state.borrow()
    }

    /// Validate the configured request and start recording.
    ///
    /// Returns the log file path.
    ///
    /// # Errors
    /// - `AlreadyRunning` if a run is active or still stopping
    /// - `Validation` for a missing request, empty or repeated device list,
    ///   zero interval or bad filename
    /// - `FileExists` if the log file is already there
    /// - `FileSystem` if the data directory cannot be created
    ///
    /// All of these are reported before any device is opened.
    pub fn start(&mut self) -> AppResult<PathBuf> {
        if self.status() != RunState::Idle {
            return Err(DaqError::AlreadyRunning);
        }
        let request = self.request.as_ref().ok_or_else(not_configured)?;

        if request.devices.is_empty() {
            return Err(DaqError::Validation("No balances configured".to_string()));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = request
            .devices
            .iter()
            .find(|d| !seen.insert(d.identifier.as_str()))
        {
            return Err(DaqError::Validation(format!(
                "Balance '{}' is selected more than once",
                dup.identifier
            )));
        }
        validation::is_valid_interval(request.interval_secs)
            .map_err(|e| DaqError::Validation(e.to_string()))?;
        validation::is_valid_filename(&request.filename)
            .map_err(|e| DaqError::Validation(e.to_string()))?;

        let path = self.resolve_path(&request.filename);
        if path.exists() {
            return Err(DaqError::FileExists(path));
        }

        std::fs::create_dir_all(&self.acquisition.data_dir).map_err(|e| {
            DaqError::FileSystem(format!(
                "Could not create data folder '{}': {}",
                self.acquisition.data_dir.display(),
                e
            ))
        })?;

        let plan = RunPlan {
            devices: request.devices.clone(),
            interval: std::time::Duration::from_secs(request.interval_secs),
            command: request.command,
            path: path.clone(),
            measure_timeout: self.acquisition.measure_timeout(),
            wake_delay: self.acquisition.wake_delay(),
            settle_delay: self.acquisition.settle_delay(),
        };

        let (running, running_rx) = watch::channel(true);
        self.state.send_replace(RunState::Running);
        let handle = tokio::spawn(acquisition::run_to_completion(
            self.ports.clone(),
            plan,
            self.events.clone(),
            Arc::clone(&self.state),
            running_rx,
        ));
        self.active = Some(ActiveRun { running, handle });

        info!(path = %path.display(), "Recording started");
        Ok(path)
    }

    /// Ask the running loop to stop after its current tick. No-op when idle.
    pub fn stop(&mut self) {
        let Some(active) = &self.active else {
            return;
        };

        let requested = self.state.send_if_modified(|state| {
            if *state == RunState::Running {
                *state = RunState::Stopping;
                true
            } else {
                false
            }
        });

        if requested {
            info!("Stop requested");
            let _ = self.events.send(RunEvent::Stopping);
            let _ = active.running.send(false);
        }
    }

    /// Wait for the current run (if any) to finish and return its summary.
    pub async fn join(&mut self) -> Option<RunSummary> {
        let active = self.active.take()?;
        match active.handle.await {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::error!(error = %e, "Acquisition task ended abnormally");
                self.state.send_replace(RunState::Idle);
                None
            }
        }
    }

    /// Check one balance on a short-lived connection.
    ///
    /// A balance held by the running loop is reported as an `Error` reading.
    pub async fn probe(&self, identifier: &str) -> Reading {
        let command = self
            .request
            .as_ref()
            .map_or(self.acquisition.command, |r| r.command);
        poller::probe(
            &self.ports,
            identifier,
            command.wire(),
            self.acquisition.probe_timeout(),
        )
        .await
    }

    /// Log path for `filename`.
    pub fn resolve_path(&self, filename: &str) -> PathBuf {
        self.acquisition
            .data_dir
            .join(format!("{filename}.{LOG_EXTENSION}"))
    }
}

fn not_configured() -> DaqError {
    DaqError::Validation("Run has not been configured".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{BalanceBehavior, SimulatedConnector};

    fn controller(data_dir: &std::path::Path) -> RunController {
        let connector =
            SimulatedConnector::new().with_balance("sim0", BalanceBehavior::Weighing(1.0));
        let mut settings = Settings::default();
        settings.acquisition.data_dir = data_dir.to_path_buf();
        RunController::new(PortManager::new(Arc::new(connector)), &settings)
    }

    #[tokio::test]
    async fn start_requires_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = controller(dir.path());
        assert!(matches!(controller.start(), Err(DaqError::Validation(_))));
        assert!(controller.set_filename("x").is_err());
    }

    #[tokio::test]
    async fn rejects_empty_device_list_and_zero_interval() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = controller(dir.path());

        controller.configure(vec![], 1, OutputCommand::Continuous, "run");
        assert!(matches!(controller.start(), Err(DaqError::Validation(_))));

        controller.configure(
            vec![Device::new("sim0", None)],
            0,
            OutputCommand::Continuous,
            "run",
        );
        assert!(matches!(controller.start(), Err(DaqError::Validation(_))));
        assert_eq!(controller.status(), RunState::Idle);
    }

    #[tokio::test]
    async fn rejects_repeated_identifier_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = controller(dir.path());

        controller.configure(
            vec![Device::new("sim0", Some("left")), Device::new("sim0", Some("right"))],
            1,
            OutputCommand::Continuous,
            "run",
        );
        match controller.start() {
            Err(DaqError::Validation(msg)) => assert!(msg.contains("sim0")),
            other => panic!("expected Validation, got {other:?}"),
        }
        assert_eq!(controller.status(), RunState::Idle);
        assert!(!controller.ports.is_open("sim0"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn stop_when_idle_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = controller(dir.path());
        controller.stop();
        controller.stop();
        assert_eq!(controller.status(), RunState::Idle);
        assert!(controller.join().await.is_none());
    }

    #[test]
    fn resolves_csv_path_in_data_dir() {
        let controller = controller(std::path::Path::new("/srv/data"));
        assert_eq!(
            controller.resolve_path("bench_a"),
            PathBuf::from("/srv/data/bench_a.csv")
        );
    }
}
