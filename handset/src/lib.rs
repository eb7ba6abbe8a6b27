//! Mobile device driver over a companion-process RPC channel.
//!
//! `handset` drives a phone or simulator through a companion process that
//! runs next to it: taps and text, app install and removal, container
//! transfers, and screen recording. Every remote operation goes through a
//! [`Session`] that reconnects once and retries once when the companion
//! drops the connection.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use handset::{CompanionDevice, Device, RemoteCompanion};
//!
//! let runner = Arc::new(RemoteCompanion::new(
//!     "127.0.0.1:10882".parse().expect("valid endpoint"),
//! ));
//! let device = CompanionDevice::new(None, runner).expect("companion is up");
//!
//! device.uninstall("com.example.app").expect("uninstall");
//! device.tap(195, 722).expect("tap");
//! device.input("hello").expect("type");
//! device.close();
//! ```

mod channel;
mod config;
mod device;
mod driver;
mod element;
mod error;
#[cfg(all(test, unix))]
mod fake;
mod hid;
mod record;
mod runner;
mod session;
mod stream;
mod transfer;

pub use channel::{Channel, Endpoint};
pub use config::{DEFAULT_CHUNK_SIZE, DriverConfig, MAX_CHUNK_SIZE, Timing};
pub use device::{Device, DeviceInfo};
pub use driver::CompanionDevice;
pub use element::{Element, Frame};
pub use error::{Error, Result};
pub use handset_proto::{Code, Status, TargetDescription};
pub use hid::{InputSequence, Step, button_for_name, key_for_name};
pub use record::{Recording, RecordingState, Sink};
pub use runner::{CompanionRunner, LocalCompanion, LocalCompanionBuilder, RemoteCompanion, ping};
pub use session::Session;
pub use transfer::{BundleSource, CONTAINER_DIRS};
