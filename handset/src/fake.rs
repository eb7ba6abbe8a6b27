//! In-process companion for tests.
//!
//! Serves every call on a Unix socket in a temp directory, records each
//! opener and client message with its arrival time, and can drop the next N
//! connections right after reading their opener.

use std::collections::{BTreeSet, HashMap};
use std::io::{self, Read};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use handset_proto::{
    Call, ClientFrame, Code, HidEvent, HidResponse, InstallRequest, InstallResponse,
    LaunchRequest, LaunchResponse, PullResponse, PushRequest, PushResponse, RecordRequest,
    RecordResponse, Request, Response, ScreenDimensions, ServerFrame, Status, TargetDescription,
    TerminateResponse, decode, encode,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::TempDir;

use crate::channel::{Channel, Endpoint};
use crate::error::Result;
use crate::runner::CompanionRunner;

/// Accessibility payload served for `AccessibilityInfo`.
pub(crate) const TREE_JSON: &str = r#"[{"attributes":{"AXLabel":"Login","type":"Button"},"frame":{"X":10,"Y":20,"Width":100,"Height":40}}]"#;

/// A client message, tagged by call.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Message {
    Install(InstallRequest),
    Push(PushRequest),
    Hid(HidEvent),
    Launch(LaunchRequest),
    Record(RecordRequest),
}

/// One connection as seen by the fake.
#[derive(Debug, Clone)]
pub(crate) struct Recorded {
    /// The opener.
    pub(crate) call: Call,
    /// `true` if the connection was dropped without an answer.
    pub(crate) dropped: bool,
    /// Client messages with arrival times.
    pub(crate) messages: Vec<(Instant, Message)>,
}

/// Shared between the accept loop, connection handlers, and the test.
#[derive(Default)]
struct State {
    calls: Mutex<Vec<Recorded>>,
    drop_next: AtomicUsize,
    installed: Mutex<BTreeSet<String>>,
    failures: Mutex<HashMap<&'static str, Status>>,
    record_frames: Mutex<Vec<RecordResponse>>,
    frames_sent: AtomicBool,
}

impl State {
    fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn push_call(&self, call: Call, dropped: bool) -> usize {
        let mut calls = Self::lock(&self.calls);
        calls.push(Recorded {
            call,
            dropped,
            messages: Vec::new(),
        });
        calls.len() - 1
    }

    fn push_message(&self, idx: usize, msg: Message) {
        Self::lock(&self.calls)[idx]
            .messages
            .push((Instant::now(), msg));
    }

    fn take_drop(&self) -> bool {
        self.drop_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn failure(&self, method: &str) -> Option<Status> {
        Self::lock(&self.failures).get(method).cloned()
    }
}

/// A running fake companion. Stops accepting when dropped.
pub(crate) struct FakeCompanion {
    endpoint: Endpoint,
    state: Arc<State>,
    stop: Arc<AtomicBool>,
    accept: Option<JoinHandle<()>>,
    _dir: TempDir,
}

impl FakeCompanion {
    pub(crate) fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("companion.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let state = Arc::new(State::default());
        let stop = Arc::new(AtomicBool::new(false));

        let accept = {
            let state = Arc::clone(&state);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                for conn in listener.incoming() {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let Ok(conn) = conn else { continue };
                    let state = Arc::clone(&state);
                    thread::spawn(move || {
                        let _ = serve(&state, conn);
                    });
                }
            })
        };

        Self {
            endpoint: Endpoint::Unix(path),
            state,
            stop,
            accept: Some(accept),
            _dir: dir,
        }
    }

    pub(crate) fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    /// Drops the next `n` connections after reading their opener.
    pub(crate) fn drop_next(&self, n: usize) {
        self.state.drop_next.store(n, Ordering::SeqCst);
    }

    /// Marks `bundle_id` installed so uninstall succeeds once.
    pub(crate) fn install_app(&self, bundle_id: &str) {
        State::lock(&self.state.installed).insert(bundle_id.into());
    }

    pub(crate) fn is_installed(&self, bundle_id: &str) -> bool {
        State::lock(&self.state.installed).contains(bundle_id)
    }

    /// Ends every call of `method` with `status` instead of OK.
    pub(crate) fn fail(&self, method: &'static str, status: Status) {
        State::lock(&self.state.failures).insert(method, status);
    }

    /// Frames to send on the next recording, right after `Start`.
    pub(crate) fn record_frames(&self, frames: Vec<RecordResponse>) {
        *State::lock(&self.state.record_frames) = frames;
    }

    /// Returns `true` once every configured recording frame was written.
    pub(crate) fn frames_sent(&self) -> bool {
        self.state.frames_sent.load(Ordering::SeqCst)
    }

    /// Every connection except readiness pings, in arrival order.
    pub(crate) fn calls(&self) -> Vec<Recorded> {
        State::lock(&self.state.calls)
            .iter()
            .filter(|r| r.call != Call::Unary(Request::Ping))
            .cloned()
            .collect()
    }

    /// The single recorded call with `method`.
    pub(crate) fn only(&self, method: &str) -> Recorded {
        let mut found: Vec<_> = self
            .calls()
            .into_iter()
            .filter(|r| r.call.method() == method && !r.dropped)
            .collect();
        assert_eq!(found.len(), 1, "expected one answered {method} call");
        found.remove(0)
    }
}

impl Drop for FakeCompanion {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Endpoint::Unix(path) = &self.endpoint {
            let _ = UnixStream::connect(path);
        }
        if let Some(handle) = self.accept.take() {
            let _ = handle.join();
        }
    }
}

/// Runner that attaches without pinging and counts starts.
pub(crate) struct FakeRunner {
    endpoint: Endpoint,
    pub(crate) starts: AtomicUsize,
}

impl FakeRunner {
    pub(crate) fn new(fake: &FakeCompanion) -> Arc<Self> {
        Arc::new(Self {
            endpoint: fake.endpoint(),
            starts: AtomicUsize::new(0),
        })
    }

    pub(crate) fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl CompanionRunner for FakeRunner {
    fn start(&self) -> Result<Channel> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(Channel::new(self.endpoint.clone()))
    }

    fn stop(&self, channel: &Channel) {
        channel.shutdown();
    }
}

/// Handles one connection.
fn serve(state: &State, mut conn: UnixStream) -> io::Result<()> {
    let call: Call = decode(&mut conn)?;
    if state.take_drop() {
        state.push_call(call, true);
        return Ok(());
    }
    let idx = state.push_call(call.clone(), false);
    let failure = state.failure(call.method());

    match call {
        Call::Unary(req) => {
            let reply = match failure {
                Some(status) => Err(status),
                None => unary(state, req),
            };
            match reply {
                Ok(resp) => {
                    encode(&mut conn, &ServerFrame::Msg(resp))?;
                    encode(&mut conn, &ServerFrame::<Response>::Trailer(Status::ok()))
                }
                Err(status) => encode(&mut conn, &ServerFrame::<Response>::Trailer(status)),
            }
        }
        Call::Install => {
            read_client(state, idx, &mut conn, Message::Install)?;
            let reply = InstallResponse {
                progress: 1.0,
                name: "com.example.app".into(),
            };
            respond(&mut conn, Some(reply), failure)
        }
        Call::Push => {
            read_client(state, idx, &mut conn, Message::Push)?;
            respond(&mut conn, None::<PushResponse>, failure)
        }
        Call::Pull(req) => {
            let reply = PullResponse { path: req.dst_path };
            respond(&mut conn, Some(reply), failure)
        }
        Call::Terminate(_) => respond(&mut conn, None::<TerminateResponse>, failure),
        Call::Hid => {
            read_client(state, idx, &mut conn, Message::Hid)?;
            respond(&mut conn, Some(HidResponse), failure)
        }
        Call::Launch => {
            read_client(state, idx, &mut conn, Message::Launch)?;
            respond(&mut conn, Some(LaunchResponse { pid: 4242 }), failure)
        }
        Call::Record => {
            let start: ClientFrame<RecordRequest> = decode(&mut conn)?;
            if let ClientFrame::Msg(msg) = start {
                state.push_message(idx, Message::Record(msg));
            }
            let frames = std::mem::take(&mut *State::lock(&state.record_frames));
            for frame in frames {
                encode(&mut conn, &ServerFrame::Msg(frame))?;
            }
            state.frames_sent.store(true, Ordering::SeqCst);
            read_client(state, idx, &mut conn, Message::Record)?;
            respond(&mut conn, None::<RecordResponse>, failure)
        }
        _ => encode(
            &mut conn,
            &ServerFrame::<Response>::Trailer(Status::new(Code::Unimplemented, "unknown call")),
        ),
    }
}

fn unary(state: &State, req: Request) -> std::result::Result<Response, Status> {
    Ok(match req {
        Request::Ping => Response::Pong {
            version: "fake".into(),
        },
        Request::Describe => Response::Description(TargetDescription {
            udid: "FAKE-UDID".into(),
            name: "Fake Phone".into(),
            os_version: "17.4".into(),
            screen: ScreenDimensions {
                width: 1170,
                height: 2532,
                density: 3.0,
                width_points: 390,
                height_points: 844,
            },
        }),
        Request::AccessibilityInfo => Response::AccessibilityInfo {
            json: TREE_JSON.into(),
        },
        Request::Uninstall { bundle_id } => {
            if !State::lock(&state.installed).remove(&bundle_id) {
                return Err(Status::new(
                    Code::NotFound,
                    format!("{bundle_id} is not installed"),
                ));
            }
            Response::Ok
        }
        _ => Response::Ok,
    })
}

/// Records client messages until `Close` or end of stream.
fn read_client<T, F>(state: &State, idx: usize, conn: &mut impl Read, wrap: F) -> io::Result<()>
where
    T: DeserializeOwned,
    F: Fn(T) -> Message,
{
    loop {
        match decode::<ClientFrame<T>>(conn) {
            Ok(ClientFrame::Msg(msg)) => state.push_message(idx, wrap(msg)),
            Ok(ClientFrame::Close) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

/// Sends an optional message and the trailer.
fn respond<T: Serialize>(
    conn: &mut UnixStream,
    msg: Option<T>,
    failure: Option<Status>,
) -> io::Result<()> {
    if let Some(status) = failure {
        return encode(conn, &ServerFrame::<T>::Trailer(status));
    }
    if let Some(msg) = msg {
        encode(conn, &ServerFrame::Msg(msg))?;
    }
    encode(conn, &ServerFrame::<T>::Trailer(Status::ok()))
}

/// Polls `cond` until it holds or `timeout` elapses.
pub(crate) fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}
