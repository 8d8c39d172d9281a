//! # Balance Logger Core Library
//!
//! Unattended weight logging from several serial laboratory balances into one
//! CSV file. The library holds everything except the command-line front end,
//! so the same run controller can be driven from `main.rs`, tests, or any
//! other surface.
//!
//! ## Crate Structure
//!
//! - **`transport`**: Byte-stream access to balances. A [`transport::Connector`]
//!   opens streams (real serial ports or simulated balances) and the
//!   [`transport::PortManager`] guarantees at most one open stream per port.
//! - **`reading`**: The [`reading::Reading`] value type and the response line
//!   parser.
//! - **`command`**: Output commands understood by the balances.
//! - **`device`**: Configured balances, port labels and column names.
//! - **`poller`**: One command/response exchange with a deadline, plus probing.
//! - **`storage`**: Append-only CSV log writer.
//! - **`acquisition`**: The tick loop and its state machine.
//! - **`controller`**: Start/stop/status control surface around the loop.
//! - **`config`**: Figment-based settings (`config/default.toml` + env).
//! - **`logging`**: `tracing` subscriber setup.
//! - **`error`**: The crate-wide [`error::DaqError`].
//! - **`validation`**: Parameter checks shared by config and controller.

pub mod acquisition;
pub mod command;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod logging;
pub mod poller;
pub mod reading;
pub mod storage;
pub mod transport;
pub mod validation;

pub use acquisition::{RunEvent, RunState, RunSummary};
pub use command::OutputCommand;
pub use controller::RunController;
pub use device::Device;
pub use error::{AppResult, DaqError};
pub use reading::Reading;
