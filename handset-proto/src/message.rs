//! Protocol message types for driver↔companion communication.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Default TCP port a companion listens on.
pub const DEFAULT_PORT: u16 = 10882;

/// Launch environment key carrying the driver's session identifier.
pub const SESSION_ENV: &str = "MAESTRO_SESSION_ID";

/// First frame of every connection: selects the RPC method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Call {
    /// Single request, single response.
    Unary(Request),
    /// Client-streaming app installation ([`InstallRequest`] frames).
    Install,
    /// Client-streaming file push into a container ([`PushRequest`] frames).
    Push,
    /// Server-streaming file pull out of a container.
    Pull(PullRequest),
    /// Bidirectional input event stream ([`HidEvent`] frames).
    Hid,
    /// Bidirectional app launch ([`LaunchRequest`] frames).
    Launch,
    /// Terminates a running app; acknowledged with a trailer.
    Terminate(TerminateRequest),
    /// Bidirectional screen recording ([`RecordRequest`] frames).
    Record,
}

impl Call {
    /// Short method name used in logs.
    pub const fn method(&self) -> &'static str {
        match self {
            Self::Unary(req) => req.method(),
            Self::Install => "install",
            Self::Push => "push",
            Self::Pull(_) => "pull",
            Self::Hid => "hid",
            Self::Launch => "launch",
            Self::Terminate(_) => "terminate",
            Self::Record => "record",
        }
    }
}

/// Unary request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Request {
    /// Health-check ping.
    Ping,
    /// Ask the companion process to exit.
    Shutdown,
    /// Describe the target device.
    Describe,
    /// Dump the accessibility tree of the foreground app as JSON.
    AccessibilityInfo,
    /// Uninstall an app.
    Uninstall {
        /// Bundle identifier of the app.
        bundle_id: String,
    },
    /// Wipe the device keychain.
    ClearKeychain,
    /// Simulate a geolocation.
    SetLocation(Location),
    /// Open a URL (deep link or web page).
    OpenUrl {
        /// URL to open.
        url: String,
    },
    /// Recursively remove paths inside a container.
    Rm {
        /// Container the paths are resolved against.
        container: FileContainer,
        /// Paths relative to the container root.
        paths: Vec<String>,
    },
    /// Create a directory (and parents) inside a container.
    Mkdir {
        /// Container the path is resolved against.
        container: FileContainer,
        /// Path relative to the container root.
        path: String,
    },
}

impl Request {
    /// Short method name used in logs.
    pub const fn method(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Shutdown => "shutdown",
            Self::Describe => "describe",
            Self::AccessibilityInfo => "accessibility_info",
            Self::Uninstall { .. } => "uninstall",
            Self::ClearKeychain => "clear_keychain",
            Self::SetLocation(_) => "set_location",
            Self::OpenUrl { .. } => "open_url",
            Self::Rm { .. } => "rm",
            Self::Mkdir { .. } => "mkdir",
        }
    }
}

/// Unary response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Response {
    /// Reply to [`Request::Ping`].
    Pong {
        /// Companion version string.
        version: String,
    },
    /// Reply to [`Request::Describe`].
    Description(TargetDescription),
    /// Reply to [`Request::AccessibilityInfo`].
    AccessibilityInfo {
        /// Accessibility tree serialized as JSON.
        json: String,
    },
    /// Acknowledgment for requests without a payload.
    Ok,
}

/// Description of the target device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDescription {
    /// Device identifier.
    pub udid: String,
    /// Human-readable device name.
    pub name: String,
    /// OS version string.
    pub os_version: String,
    /// Screen geometry.
    pub screen: ScreenDimensions,
}

/// Screen geometry in pixels and points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenDimensions {
    /// Width in pixels.
    pub width: u64,
    /// Height in pixels.
    pub height: u64,
    /// Pixel density (pixels per point).
    pub density: f64,
    /// Width in points.
    pub width_points: u64,
    /// Height in points.
    pub height_points: u64,
}

/// Geographic coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

/// A sandboxed storage area on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum FileContainer {
    /// An application's data container, `"/"` being its root.
    Application {
        /// Bundle identifier of the owning app.
        bundle_id: String,
    },
}

impl FileContainer {
    /// Data container of the app with the given bundle identifier.
    pub fn application(bundle_id: impl Into<String>) -> Self {
        Self::Application {
            bundle_id: bundle_id.into(),
        }
    }
}

/// Compression scheme applied to payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Compression {
    /// Raw bytes.
    #[default]
    None,
    /// The whole stream is one gzip member; chunks are not independently
    /// decodable.
    Gzip,
}

/// Bytes or a reference to bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Payload {
    /// Inline bytes.
    Data(Vec<u8>),
    /// Path readable by the companion.
    FilePath(String),
}

/// Kind of artifact being installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Destination {
    /// Application bundle.
    App,
}

/// Frame of the [`Call::Install`] stream.
///
/// The first frame is always [`InstallRequest::Meta`]; every following frame
/// is a [`InstallRequest::Payload`] chunk, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum InstallRequest {
    /// Stream metadata; carries no payload bytes.
    Meta {
        /// Artifact kind.
        destination: Destination,
        /// Compression of the concatenated payload bytes.
        compression: Compression,
    },
    /// One chunk of the artifact.
    Payload(Payload),
}

/// Progress or result of an install.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallResponse {
    /// Progress in `0.0..=1.0`.
    pub progress: f64,
    /// Installed bundle identifier, once known.
    pub name: String,
}

/// Frame of the [`Call::Push`] stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum PushRequest {
    /// Selects the destination; always the first frame.
    Inner {
        /// Destination container.
        container: FileContainer,
        /// Directory inside the container.
        dst_path: String,
    },
    /// A file to copy into the destination.
    Payload(Payload),
}

/// Acknowledgment of a completed push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse;

/// Request for [`Call::Pull`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Source container.
    pub container: FileContainer,
    /// Path inside the container.
    pub src_path: String,
    /// Destination directory on the companion's host.
    pub dst_path: String,
}

/// Progress message of a pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Path materialized by the companion.
    pub path: String,
}

/// Point in device coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

/// Press phase of an input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Direction {
    /// Finger/key goes down.
    Down,
    /// Finger/key goes up.
    Up,
}

/// Hardware button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ButtonKind {
    /// Apple Pay button.
    ApplePay,
    /// Home button.
    Home,
    /// Lock / power button.
    Lock,
    /// Side button.
    SideButton,
    /// Siri.
    Siri,
}

/// What is being pressed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum PressAction {
    /// Touch at a screen point.
    Touch(Point),
    /// Keyboard key by HID usage code.
    Key(u32),
    /// Hardware button.
    Button(ButtonKind),
}

/// One low-level input event on the [`Call::Hid`] stream.
///
/// Events are only meaningful in stream order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum HidEvent {
    /// Press or release.
    Press {
        /// Target of the press.
        action: PressAction,
        /// Down or up.
        direction: Direction,
    },
    /// A typed character, resolved to key strokes by the companion.
    Character(char),
}

/// Acknowledgment of a completed input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HidResponse;

/// Frame of the [`Call::Launch`] stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum LaunchRequest {
    /// Launch an app.
    Start {
        /// Bundle identifier.
        bundle_id: String,
        /// Environment variables for the app process.
        env: BTreeMap<String, String>,
        /// Launch arguments.
        app_args: Vec<String>,
        /// Bring an already-running app to the foreground instead of
        /// relaunching it.
        foreground_if_running: bool,
    },
}

/// Launch acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchResponse {
    /// Process ID of the launched app.
    pub pid: u64,
}

/// Request for [`Call::Terminate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminateRequest {
    /// Bundle identifier of the app to terminate.
    pub bundle_id: String,
}

/// Acknowledgment of a terminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminateResponse;

/// Frame of the [`Call::Record`] stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum RecordRequest {
    /// Begin capturing.
    Start,
    /// Stop capturing; the companion drains and sends the trailer.
    Stop,
}

/// A fragment of recorded video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordResponse {
    /// Compression of `data`.
    pub compression: Compression,
    /// Video bytes.
    pub data: Vec<u8>,
}

/// Client-to-companion frame on a streaming call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientFrame<T> {
    /// A message of the call's request type.
    Msg(T),
    /// Half-close: the client sends nothing more.
    Close,
}

/// Companion-to-client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerFrame<T> {
    /// A message of the call's response type.
    Msg(T),
    /// Final status; always the last frame of a call.
    Trailer(Status),
}

/// Status code of a completed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Code {
    /// Success.
    Ok,
    /// Cancelled by the caller.
    Cancelled,
    /// Unclassified failure.
    Unknown,
    /// Malformed request.
    InvalidArgument,
    /// Target does not exist.
    NotFound,
    /// Target already exists.
    AlreadyExists,
    /// Not permitted.
    PermissionDenied,
    /// Device not in a state that allows the operation.
    FailedPrecondition,
    /// Method not implemented by this companion.
    Unimplemented,
    /// Companion-side bug.
    Internal,
    /// The companion cannot currently serve calls.
    Unavailable,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "OK",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
        })
    }
}

/// Final status of a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Status code.
    pub code: Code,
    /// Human-readable detail; empty on success.
    pub message: String,
}

impl Status {
    /// Successful status.
    pub const fn ok() -> Self {
        Self {
            code: Code::Ok,
            message: String::new(),
        }
    }

    /// Status with the given code and message.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Returns `true` for [`Code::Ok`].
    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}
