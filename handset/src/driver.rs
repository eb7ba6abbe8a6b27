//! [`Device`] implementation backed by a companion process.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use handset_proto::{
    Call, LaunchRequest, LaunchResponse, Location, Request, Response, SESSION_ENV, Status,
    TargetDescription,
};

use crate::channel::{Channel, Endpoint};
use crate::config::{DriverConfig, Timing};
use crate::device::{Device, DeviceInfo};
use crate::element::Element;
use crate::error::{Error, Result};
use crate::hid::{self, InputSequence};
use crate::record::{self, Recording, Sink};
use crate::runner::{CompanionRunner, LocalCompanion, RemoteCompanion};
use crate::session::Session;
use crate::stream::{Ack, RequestStream};
use crate::transfer::{self, BundleSource};

/// Drives one device through its companion.
///
/// Every remote operation runs through [`Session::run`], so a single
/// transport failure costs one reconnect and one retry.
#[derive(Debug)]
pub struct CompanionDevice {
    /// Target device, if named.
    device_id: Option<String>,
    /// Channel owner.
    session: Session,
    /// Pacing and sizing knobs.
    timing: Timing,
}

impl CompanionDevice {
    /// Starts a session through `runner`.
    pub fn new(device_id: Option<String>, runner: Arc<dyn CompanionRunner>) -> Result<Self> {
        Ok(Self {
            device_id,
            session: Session::start(runner)?,
            timing: Timing::default(),
        })
    }

    /// Replaces the default timing.
    #[must_use]
    pub const fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Launches or attaches to a companion as `config` describes.
    ///
    /// With `companion` set, the executable is spawned for the device;
    /// otherwise the driver attaches to `endpoint` (default
    /// `127.0.0.1:10882`).
    pub fn from_config(config: &DriverConfig) -> Result<Self> {
        let runner: Arc<dyn CompanionRunner> = match &config.companion {
            Some(program) => {
                let mut builder = LocalCompanion::builder(program);
                if let Some(id) = &config.device_id {
                    builder = builder.device_id(id.clone());
                }
                if let Some(endpoint) = &config.endpoint {
                    builder = builder.endpoint(endpoint.clone());
                }
                Arc::new(builder.build())
            }
            None => {
                let endpoint = config.endpoint.clone().unwrap_or_else(|| {
                    Endpoint::Tcp(([127, 0, 0, 1], handset_proto::DEFAULT_PORT).into())
                });
                Arc::new(RemoteCompanion::new(endpoint))
            }
        };
        Ok(Self::new(config.device_id.clone(), runner)?.with_timing(config.timing))
    }

    /// The session, for restart statistics.
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Pacing and sizing knobs in use.
    pub const fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Full target description, including name and OS version.
    pub fn describe(&self) -> Result<TargetDescription> {
        self.session.run(|ch| match ch.unary(Request::Describe)? {
            Response::Description(desc) => Ok(desc),
            other => Err(Error::Protocol(format!("expected Description, got {other:?}"))),
        })
    }

    /// Like [`Device::clear_app_state`], but fails if any container
    /// directory could not be recreated.
    pub fn clear_app_state_strict(&self, bundle_id: &str) -> Result<()> {
        let failed =
            transfer::clear_app_state(&self.session, bundle_id, self.timing.clear_state_settle())?;
        if failed.is_empty() {
            return Ok(());
        }
        Err(Error::Incomplete {
            operation: "clear_app_state",
            failures: failed
                .into_iter()
                .map(|(dir, e)| format!("mkdir {dir}: {e}"))
                .collect(),
        })
    }

    /// Plays `seq` over a fresh `Hid` call, retrying once on transport
    /// failure.
    fn play(&self, seq: &InputSequence) -> Result<()> {
        self.session.run(|ch| seq.play(ch))
    }
}

/// Returns `true` if an uninstall failed only because the app is absent.
///
/// The companion reports this as `"<id> is not installed"`; the status code
/// alone is not enough, since `NotFound` also covers a missing device.
fn is_not_installed(status: &Status, bundle_id: &str) -> bool {
    status.message == format!("{bundle_id} is not installed")
}

/// Flattens launch arguments into `key=value` strings. String values are
/// used as-is; anything else is rendered as JSON.
fn launch_args(arguments: &BTreeMap<String, serde_json::Value>) -> Vec<String> {
    arguments
        .iter()
        .map(|(key, value)| match value {
            serde_json::Value::String(s) => format!("{key}={s}"),
            other => format!("{key}={other}"),
        })
        .collect()
}

/// Sends a launch request and waits for the companion to confirm it.
fn send_launch(channel: &Channel, request: LaunchRequest) -> Result<()> {
    let conn = channel.open(&Call::Launch)?;
    let mut stream: RequestStream<LaunchRequest, ()> =
        RequestStream::spawn::<LaunchResponse, _>(conn, Ack::new("launch"))?;
    stream.send(request)?;
    stream.complete()
}

impl Device for CompanionDevice {
    fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    fn open(&self) -> Result<()> {
        self.describe().map(|_| ())
    }

    fn close(&self) {
        self.session.close();
    }

    fn is_shutdown(&self) -> bool {
        self.session.is_shutdown()
    }

    fn device_info(&self) -> Result<DeviceInfo> {
        let screen = self.describe()?.screen;
        Ok(DeviceInfo {
            width_pixels: screen.width,
            height_pixels: screen.height,
            width_points: screen.width_points,
            height_points: screen.height_points,
        })
    }

    fn content_descriptor(&self) -> Result<Element> {
        let json = self.session.run(|ch| match ch.unary(Request::AccessibilityInfo)? {
            Response::AccessibilityInfo { json } => Ok(json),
            other => Err(Error::Protocol(format!(
                "expected AccessibilityInfo, got {other:?}"
            ))),
        })?;
        Ok(Element::from_json(&json)?)
    }

    fn tap(&self, x: i32, y: i32) -> Result<()> {
        self.play(&InputSequence::press(
            f64::from(x),
            f64::from(y),
            self.timing.tap_hold(),
        ))
    }

    fn long_press(&self, x: i32, y: i32, duration: Duration) -> Result<()> {
        self.play(&InputSequence::press(f64::from(x), f64::from(y), duration))
    }

    fn double_tap(&self, x: i32, y: i32) -> Result<()> {
        self.play(&InputSequence::double_tap(
            f64::from(x),
            f64::from(y),
            self.timing.tap_hold(),
            self.timing.double_tap_gap(),
        ))
    }

    fn input(&self, text: &str) -> Result<()> {
        self.play(&InputSequence::text(text, self.timing.keystroke_delay()))
    }

    fn erase_text(&self, count: usize) -> Result<()> {
        self.play(&InputSequence::erase(count, self.timing.keystroke_delay()))
    }

    fn press_key(&self, name: &str) -> Result<()> {
        let action = hid::key_for_name(name).ok_or(Error::Unsupported {
            operation: "press_key",
        })?;
        self.play(&InputSequence::stroke(action))
    }

    fn press_button(&self, name: &str) -> Result<()> {
        let action = hid::button_for_name(name).ok_or(Error::Unsupported {
            operation: "press_button",
        })?;
        self.play(&InputSequence::stroke(action))
    }

    fn install(&self, bundle: &mut dyn BundleSource) -> Result<()> {
        let start = bundle.stream_position()?;
        let chunk_size = self.timing.chunk_size();
        self.session
            .run(|ch| transfer::install(ch, &mut *bundle, start, chunk_size))
    }

    fn uninstall(&self, bundle_id: &str) -> Result<()> {
        self.session.run(|ch| {
            match ch.unary_ok(Request::Uninstall {
                bundle_id: bundle_id.into(),
            }) {
                Err(Error::Status(status)) if is_not_installed(&status, bundle_id) => {
                    tracing::debug!(bundle_id, "app not installed, nothing to uninstall");
                    Ok(())
                }
                other => other,
            }
        })
    }

    fn pull_app_state(&self, bundle_id: &str, dst: &Path) -> Result<()> {
        self.session.run(|ch| transfer::pull(ch, bundle_id, dst))
    }

    fn push_app_state(&self, bundle_id: &str, src: &Path) -> Result<()> {
        self.session.run(|ch| transfer::push(ch, bundle_id, src))
    }

    fn clear_app_state(&self, bundle_id: &str) -> Result<()> {
        let failed =
            transfer::clear_app_state(&self.session, bundle_id, self.timing.clear_state_settle())?;
        if !failed.is_empty() {
            tracing::warn!(
                bundle_id,
                failed = failed.len(),
                "app state cleared, some container directories are missing"
            );
        }
        Ok(())
    }

    fn clear_keychain(&self) -> Result<()> {
        self.session.run(|ch| ch.unary_ok(Request::ClearKeychain))
    }

    fn launch(
        &self,
        bundle_id: &str,
        arguments: &BTreeMap<String, serde_json::Value>,
        session_id: Option<&str>,
    ) -> Result<()> {
        let env: BTreeMap<String, String> = session_id
            .map(|id| (SESSION_ENV.to_owned(), id.to_owned()))
            .into_iter()
            .collect();
        let request = LaunchRequest::Start {
            bundle_id: bundle_id.into(),
            env,
            app_args: launch_args(arguments),
            foreground_if_running: false,
        };
        self.session.run(|ch| send_launch(ch, request.clone()))
    }

    fn stop(&self, bundle_id: &str) -> Result<()> {
        self.session.run(|ch| transfer::terminate(ch, bundle_id))
    }

    fn open_link(&self, link: &str) -> Result<()> {
        self.session
            .run(|ch| ch.unary_ok(Request::OpenUrl { url: link.into() }))
    }

    fn start_screen_recording(&self, sink: Sink) -> Result<Recording> {
        let conn = self.session.run(record::open)?;
        Recording::spawn(conn, sink)
    }

    fn set_location(&self, latitude: f64, longitude: f64) -> Result<()> {
        self.session.run(|ch| {
            ch.unary_ok(Request::SetLocation(Location {
                latitude,
                longitude,
            }))
        })
    }
}
