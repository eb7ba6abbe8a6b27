//! The device capability surface.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::element::Element;
use crate::error::{Error, Result};
use crate::record::{Recording, Sink};
use crate::transfer::BundleSource;

/// Screen geometry of the target, fetched fresh on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Screen width in pixels.
    pub width_pixels: u64,
    /// Screen height in pixels.
    pub height_pixels: u64,
    /// Screen width in points.
    pub width_points: u64,
    /// Screen height in points.
    pub height_points: u64,
}

/// A device that can be tapped, typed into, have apps installed and
/// removed, and be screen-recorded.
///
/// Capabilities a backend cannot provide return [`Error::Unsupported`];
/// the default implementations below do exactly that.
pub trait Device: Send + Sync {
    /// Identity of the target device, if one was named.
    fn device_id(&self) -> Option<&str>;

    /// Establishes the connection, surfacing connection problems early.
    fn open(&self) -> Result<()>;

    /// Releases the connection.
    fn close(&self);

    /// Returns `true` if the connection (not the device) is shut down.
    fn is_shutdown(&self) -> bool;

    /// Screen geometry.
    fn device_info(&self) -> Result<DeviceInfo>;

    /// Snapshot of the accessibility tree.
    fn content_descriptor(&self) -> Result<Element>;

    /// Taps at `(x, y)`.
    fn tap(&self, x: i32, y: i32) -> Result<()>;

    /// Presses at `(x, y)` for `duration`.
    fn long_press(&self, x: i32, y: i32, duration: Duration) -> Result<()>;

    /// Types `text` into the focused element.
    fn input(&self, text: &str) -> Result<()>;

    /// Installs an app from a gzip-compressed bundle archive.
    fn install(&self, bundle: &mut dyn BundleSource) -> Result<()>;

    /// Uninstalls an app. Succeeds if the app is not installed.
    fn uninstall(&self, bundle_id: &str) -> Result<()>;

    /// Copies the app's data container into the directory `dst`.
    fn pull_app_state(&self, bundle_id: &str, dst: &Path) -> Result<()>;

    /// Copies a file, or a directory's entries, into the app's container.
    fn push_app_state(&self, bundle_id: &str, src: &Path) -> Result<()>;

    /// Stops the app and resets its data container.
    fn clear_app_state(&self, bundle_id: &str) -> Result<()>;

    /// Wipes the device keychain.
    fn clear_keychain(&self) -> Result<()>;

    /// Launches an app with launch arguments and an optional session id.
    fn launch(
        &self,
        bundle_id: &str,
        arguments: &BTreeMap<String, serde_json::Value>,
        session_id: Option<&str>,
    ) -> Result<()>;

    /// Terminates an app.
    fn stop(&self, bundle_id: &str) -> Result<()>;

    /// Opens a URL or deep link.
    fn open_link(&self, link: &str) -> Result<()>;

    /// Starts recording the screen into `sink`.
    fn start_screen_recording(&self, sink: Sink) -> Result<Recording>;

    /// Simulates a geolocation.
    fn set_location(&self, latitude: f64, longitude: f64) -> Result<()>;

    /// Taps twice in quick succession at `(x, y)`.
    fn double_tap(&self, _x: i32, _y: i32) -> Result<()> {
        Err(Error::Unsupported {
            operation: "double_tap",
        })
    }

    /// Swipes from start to end over `duration` seconds.
    fn scroll(
        &self,
        _x_start: f64,
        _y_start: f64,
        _x_end: f64,
        _y_end: f64,
        _duration: f64,
    ) -> Result<()> {
        Err(Error::Unsupported {
            operation: "scroll",
        })
    }

    /// Deletes `count` characters before the cursor.
    fn erase_text(&self, _count: usize) -> Result<()> {
        Err(Error::Unsupported {
            operation: "erase_text",
        })
    }

    /// Presses a keyboard key by name.
    fn press_key(&self, _name: &str) -> Result<()> {
        Err(Error::Unsupported {
            operation: "press_key",
        })
    }

    /// Presses a hardware button by name.
    fn press_button(&self, _name: &str) -> Result<()> {
        Err(Error::Unsupported {
            operation: "press_button",
        })
    }

    /// Writes a screenshot into `out`.
    fn take_screenshot(&self, _out: &mut dyn Write, _compressed: bool) -> Result<()> {
        Err(Error::Unsupported {
            operation: "take_screenshot",
        })
    }

    /// Returns `true` if the screen did not change between two captures.
    fn is_screen_static(&self) -> Result<bool> {
        Err(Error::Unsupported {
            operation: "is_screen_static",
        })
    }

    /// Grants or revokes app permissions.
    fn set_permissions(&self, _bundle_id: &str, _permissions: &BTreeMap<String, String>) -> Result<()> {
        Err(Error::Unsupported {
            operation: "set_permissions",
        })
    }
}
