//! Driver configuration and JSON persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};

use serde::{Deserialize, Serialize};

use crate::channel::Endpoint;

/// Upload chunk size: 3 MiB, safely under a 4 MiB per-message read limit.
pub const DEFAULT_CHUNK_SIZE: usize = 3 * 1024 * 1024;

/// Largest chunk that still fits in one frame with its envelope.
pub const MAX_CHUNK_SIZE: usize = handset_proto::MAX_FRAME as usize - 64 * 1024;

/// Pacing and sizing knobs.
///
/// These must stay close to what the companion expects: input sent faster
/// than the defaults tends to be dropped or reordered on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Hold between touch down and up for a tap, in milliseconds.
    pub tap_hold_ms: u64,
    /// Delay after each typed character, in milliseconds.
    pub keystroke_delay_ms: u64,
    /// Pause between stopping an app and wiping its container, in milliseconds.
    pub clear_state_settle_ms: u64,
    /// Pause between the two taps of a double tap, in milliseconds.
    pub double_tap_gap_ms: u64,
    /// Maximum payload bytes per upload message.
    pub chunk_size: usize,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            tap_hold_ms: 50,
            keystroke_delay_ms: 75,
            clear_state_settle_ms: 1500,
            double_tap_gap_ms: 100,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Timing {
    /// Tap hold as a duration.
    pub const fn tap_hold(&self) -> Duration {
        Duration::from_millis(self.tap_hold_ms)
    }

    /// Per-character typing delay as a duration.
    pub const fn keystroke_delay(&self) -> Duration {
        Duration::from_millis(self.keystroke_delay_ms)
    }

    /// Clear-state settle delay as a duration.
    pub const fn clear_state_settle(&self) -> Duration {
        Duration::from_millis(self.clear_state_settle_ms)
    }

    /// Double-tap gap as a duration.
    pub const fn double_tap_gap(&self) -> Duration {
        Duration::from_millis(self.double_tap_gap_ms)
    }

    /// Chunk size, never zero and never larger than [`MAX_CHUNK_SIZE`].
    pub const fn chunk_size(&self) -> usize {
        if self.chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else if self.chunk_size > MAX_CHUNK_SIZE {
            MAX_CHUNK_SIZE
        } else {
            self.chunk_size
        }
    }
}

/// Persistent driver settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Target device; `None` for the companion's only device.
    pub device_id: Option<String>,
    /// Companion endpoint to attach to or to launch on.
    pub endpoint: Option<Endpoint>,
    /// Companion executable to launch; attach-only when `None`.
    pub companion: Option<PathBuf>,
    /// Pacing and sizing knobs.
    pub timing: Timing,
}

impl DriverConfig {
    /// Loads settings from a JSON file.
    pub fn load(path: &Path) -> io::Result<Self> {
        let data = fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Loads settings from `path`, or defaults if the file does not exist.
    pub fn load_or_default(path: &Path) -> io::Result<Self> {
        match Self::load(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            other => other,
        }
    }

    /// Persists settings to a JSON file.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }
}
