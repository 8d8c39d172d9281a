//! CSV log writer.
//!
//! The log is an append-only CSV file: a `Timestamp,<Name>_Weight,...` header
//! written once at creation, then one row per tick. Each append opens the
//! file, writes the fully serialized row with a single write, syncs and
//! closes it again, so no file handle outlives a tick and a crash can never
//! leave half a row behind.

use crate::device::Device;
use crate::error::{AppResult, DaqError};
use crate::reading::Reading;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// First header cell.
pub const TIMESTAMP_COLUMN: &str = "Timestamp";

/// Timestamp format used in every row (local time).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One tick's worth of readings.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Local time the tick started, formatted with [`TIMESTAMP_FORMAT`].
    pub timestamp: String,
    /// Readings in device order, keyed by device name.
    pub readings: Vec<(String, Reading)>,
}

impl Row {
    /// Creates an empty row stamped with the current local time.
    pub fn now() -> Self {
        Self {
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
            readings: Vec::new(),
        }
    }

    /// Cells in header order.
    pub fn record(&self) -> Vec<String> {
        std::iter::once(self.timestamp.clone())
            .chain(self.readings.iter().map(|(_, r)| r.cell()))
            .collect()
    }
}

/// Header cells for `devices`.
pub fn header(devices: &[Device]) -> Vec<String> {
    std::iter::once(TIMESTAMP_COLUMN.to_string())
        .chain(devices.iter().map(Device::column_name))
        .collect()
}

/// Owner of one log file for the life of a run.
#[derive(Debug)]
pub struct LogWriter {
    path: PathBuf,
    columns: usize,
}

impl LogWriter {
    /// Create `path` and write the header for `devices`.
    ///
    /// # Errors
    /// `DaqError::FileExists` if the path is taken, `DaqError::FileSystem` if
    /// it cannot be created or written.
    pub fn create(path: &Path, devices: &[Device]) -> AppResult<Self> {
        let cells = header(devices);

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => DaqError::FileExists(path.to_path_buf()),
                _ => DaqError::FileSystem(format!(
                    "Failed to create '{}': {}",
                    path.display(),
                    e
                )),
            })?;

        let bytes = serialize(&cells)?;
        file.write_all(&bytes)
            .and_then(|_| file.sync_all())
            .map_err(|e| {
                DaqError::FileSystem(format!(
                    "Failed to write header to '{}': {}",
                    path.display(),
                    e
                ))
            })?;

        info!(path = %path.display(), columns = cells.len(), "Created log file");
        Ok(Self {
            path: path.to_path_buf(),
            columns: cells.len(),
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of columns fixed by the header.
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Append one row.
    ///
    /// # Errors
    /// `DaqError::FileSystem` if the row does not match the header or the
    /// file cannot be written. Nothing is written in either case.
    pub fn append(&self, row: &Row) -> AppResult<()> {
        let cells = row.record();
        if cells.len() != self.columns {
            return Err(DaqError::FileSystem(format!(
                "Row has {} columns but the header has {}",
                cells.len(),
                self.columns
            )));
        }

        let bytes = serialize(&cells)?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                DaqError::FileSystem(format!("Failed to open '{}': {}", self.path.display(), e))
            })?;
        file.write_all(&bytes)
            .and_then(|_| file.sync_data())
            .map_err(|e| {
                DaqError::FileSystem(format!(
                    "Failed to append to '{}': {}",
                    self.path.display(),
                    e
                ))
            })?;

        debug!(path = %self.path.display(), timestamp = %row.timestamp, "Appended row");
        Ok(())
    }
}

/// Serialize one CSV record, terminator included.
fn serialize(cells: &[String]) -> AppResult<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());
    writer
        .write_record(cells)
        .map_err(|e| DaqError::FileSystem(e.to_string()))?;
    writer
        .into_inner()
        .map_err(|e| DaqError::FileSystem(e.to_string()))
}
