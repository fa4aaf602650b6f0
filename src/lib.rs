//! # AlbaEM RS
//!
//! Acquisition controller for the AlbaEM# four channel electrometer, used by a scan engine
//! as a counter/timer unit.
//!
//! The controller exposes five channels: channel 1 is the timer and reports the
//! configured integration time, channels 2 to 5 report the currents of the four inputs.
//! It sequences every acquisition through configure, arm, start and readout, confirming each
//! state transition with the device instead of assuming it.
//!
//! ## Features
//!
//! - **Attribute protocol**: `Name?` reads and `Name value` writes over TCP or a serial line
//! - **Fault containment**: device faults are logged and reported as [`Outcome::Reported`],
//!   so one bad read never aborts a scan
//! - **Bounded start**: the start sequence gives up after a configurable timeout
//! - **Layered configuration**: defaults, a TOML file and `ALBAEM_*` environment variables
//!   via `figment`
//!
//! ## Examples
//!
//! ### One acquisition
//!
//! ```rust,no_run
//! use albaem_rs::{ControllerConfig, EmController, LogicalState, Outcome};
//!
//! fn report<T>(outcome: Outcome<T>) -> bool {
//!     match outcome {
//!         Outcome::Done(_) => true,
//!         Outcome::Reported(diagnostic) => {
//!             eprintln!("{}", diagnostic);
//!             false
//!         }
//!     }
//! }
//!
//! let config = ControllerConfig::load(None)?;
//! let mut controller = EmController::connect(config)?;
//! for axis in 1..=EmController::MAX_DEVICE {
//!     controller.add_channel(axis)?;
//! }
//!
//! report(controller.load_one(1, 0.1)?);
//! report(controller.pre_start_all()?);
//! for axis in 1..=EmController::MAX_DEVICE {
//!     controller.pre_start_one(axis)?;
//! }
//!
//! if report(controller.start_all()?) {
//!     while controller.state_all()? == Outcome::Done(LogicalState::Acquiring) {
//!         std::thread::sleep(std::time::Duration::from_millis(10));
//!     }
//!     if report(controller.read_all()?) {
//!         for axis in 2..=EmController::MAX_DEVICE {
//!             println!("channel {}: {}", axis, controller.read_one(axis)?);
//!         }
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Parsing measurement payloads
//!
//! ```rust
//! use albaem_rs::measurement;
//!
//! let values = measurement::extract_all("[['CHAN01', '1.5e-9'], ['CHAN02', '-2.0']]");
//! assert_eq!(values, vec![1.5e-9, -2.0]);
//!
//! assert_eq!(measurement::extract_last("[1.0, 2.0, 3.0]").unwrap(), 3.0);
//! ```

pub mod attribute_channel;
pub mod channel_registry;
pub mod channel_settings;
pub mod config;
pub mod em_connector;
pub mod em_controller;
pub mod em_terminal;
pub mod fault_barrier;
pub mod measurement;
pub mod sequencer;
pub mod state_tracker;
pub mod trigger_config;

#[cfg(test)]
mod mock_device;

// Re-export the main types for convenience
pub use attribute_channel::{AttributeChannel, CommFailure};

pub use channel_registry::{ChannelId, ChannelRegistry, RegistryError};

pub use channel_settings::ChannelSetting;

pub use config::{ConfigError, ControllerConfig};

pub use em_connector::{DeviceAddress, EmConnector, EmConnectorError};

pub use em_controller::EmController;

pub use em_terminal::EmTerminal;

pub use fault_barrier::{Diagnostic, FaultBarrier, FaultKind, Outcome};

pub use measurement::{ExtractionStrategy, MeasurementBuffer};

pub use sequencer::{AcquisitionError, AcquisitionSequencer};

pub use state_tracker::{LogicalState, StateSnapshot};

pub use trigger_config::{AcquisitionConfig, TriggerMode};
