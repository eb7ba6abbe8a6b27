//! Wire protocol between the handset driver and a device companion.
//!
//! Every RPC call runs on its own connection. The first frame is a
//! [`Call`] naming the method (and carrying the request for unary and
//! server-streaming methods). Client-streaming and bidirectional calls then
//! send [`ClientFrame`]s, terminated by [`ClientFrame::Close`]. The companion
//! answers with zero or more [`ServerFrame::Msg`] followed by exactly one
//! [`ServerFrame::Trailer`] carrying the call's final [`Status`].
//!
//! Frames are serialized with [`postcard`] and prefixed with a 4-byte
//! big-endian length, suitable for any reliable byte stream (Unix socket,
//! TCP).

mod codec;
mod message;

pub use codec::{MAX_FRAME, decode, encode};
pub use message::{
    ButtonKind, Call, ClientFrame, Code, Compression, Destination, Direction, FileContainer,
    HidEvent, HidResponse, InstallRequest, InstallResponse, LaunchRequest, LaunchResponse,
    Location, Payload, Point, PressAction, PullRequest, PullResponse, PushRequest, PushResponse,
    RecordRequest, RecordResponse, Request, Response, ScreenDimensions, ServerFrame, Status,
    TargetDescription, TerminateRequest, TerminateResponse, DEFAULT_PORT, SESSION_ENV,
};
