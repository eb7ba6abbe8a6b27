//! Blocking adapter over streaming calls.
//!
//! A streaming call gets a reader thread that feeds incoming messages to a
//! [`StreamObserver`] and, when the trailer arrives or the connection breaks,
//! resolves a one-shot [`Completion`]. The calling thread keeps the request
//! side, sends its messages in order, and finally blocks on the completion.

use std::marker::PhantomData;
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use handset_proto::ServerFrame;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::channel::Connection;
use crate::error::{Error, Result};

/// How long a failed write waits for an already-sent trailer.
const EARLY_TRAILER_GRACE: Duration = Duration::from_millis(200);

/// Receives the response side of a streaming call on the reader thread.
pub(crate) trait StreamObserver<T>: Send + 'static {
    /// Value handed to the waiter on success.
    type Output: Send + 'static;

    /// Called for each message, in arrival order. An error aborts the call.
    fn on_next(&mut self, msg: T) -> Result<()>;

    /// Called once after an OK trailer.
    fn on_completed(self) -> Result<Self::Output>;

    /// Called once on failure; returns the error to surface to the waiter.
    fn on_error(self, err: Error) -> Error;
}

/// Observer that only waits for the trailer.
#[derive(Debug)]
pub(crate) struct Ack<T> {
    /// Method name for logs.
    method: &'static str,
    /// Messages seen so far.
    received: usize,
    /// Response type marker.
    _msg: PhantomData<fn(T)>,
}

impl<T> Ack<T> {
    /// Creates an acknowledgment observer for `method`.
    pub(crate) const fn new(method: &'static str) -> Self {
        Self {
            method,
            received: 0,
            _msg: PhantomData,
        }
    }
}

impl<T: Send + 'static> StreamObserver<T> for Ack<T> {
    type Output = ();

    fn on_next(&mut self, _msg: T) -> Result<()> {
        self.received += 1;
        Ok(())
    }

    fn on_completed(self) -> Result<()> {
        tracing::debug!(method = self.method, messages = self.received, "call completed");
        Ok(())
    }

    fn on_error(self, err: Error) -> Error {
        tracing::debug!(method = self.method, error = %err, "call failed");
        err
    }
}

/// Creates a linked resolver/waiter pair.
pub(crate) fn completion<T>() -> (Resolver<T>, Completion<T>) {
    let (tx, rx) = mpsc::sync_channel(1);
    (
        Resolver {
            tx: Mutex::new(Some(tx)),
        },
        Completion { rx },
    )
}

/// Resolving half of a one-shot completion. Resolves at most once.
#[derive(Debug)]
pub(crate) struct Resolver<T> {
    /// Taken on first resolution.
    tx: Mutex<Option<SyncSender<Result<T>>>>,
}

impl<T> Resolver<T> {
    /// Resolves the completion. Returns `false` if it was already resolved.
    pub(crate) fn resolve(&self, value: Result<T>) -> bool {
        let tx = self.tx.lock().map_or(None, |mut g| g.take());
        match tx {
            // Capacity 1 and a single send: never blocks.
            Some(tx) => {
                let _ = tx.send(value);
                true
            }
            None => false,
        }
    }
}

/// Waiting half of a one-shot completion.
#[derive(Debug)]
pub(crate) struct Completion<T> {
    /// Receives the single resolution.
    rx: Receiver<Result<T>>,
}

impl<T> Completion<T> {
    /// Blocks until resolved. A resolver dropped without resolving (the
    /// reader thread died) counts as a transport failure.
    pub(crate) fn wait(self) -> Result<T> {
        self.rx
            .recv()
            .unwrap_or_else(|_| Err(Error::transport("stream reader exited without a result")))
    }
}

/// Request side of a streaming call whose responses are handled by an
/// observer on a reader thread.
#[derive(Debug)]
pub(crate) struct RequestStream<Req, Out> {
    /// Write half of the connection.
    writer: Connection,
    /// Resolved by the reader thread; taken by the waiter.
    done: Option<Completion<Out>>,
    /// The reader thread.
    reader: Option<JoinHandle<()>>,
    /// Request type marker.
    _req: PhantomData<fn(Req)>,
}

impl<Req: Serialize, Out: Send + 'static> RequestStream<Req, Out> {
    /// Starts the reader thread for an opened connection.
    pub(crate) fn spawn<Resp, O>(conn: Connection, observer: O) -> Result<Self>
    where
        Resp: DeserializeOwned + Send + 'static,
        O: StreamObserver<Resp, Output = Out>,
    {
        let (writer, reader) = conn.split()?;
        let (resolver, done) = completion();
        let handle = thread::Builder::new()
            .name("handset-stream".into())
            .spawn(move || {
                resolver.resolve(read_until_trailer(reader, observer));
            })
            .map_err(Error::Io)?;
        Ok(Self {
            writer,
            done: Some(done),
            reader: Some(handle),
            _req: PhantomData,
        })
    }

    /// Sends one request message. Messages arrive in send order.
    pub(crate) fn send(&mut self, msg: Req) -> Result<()> {
        self.writer.send(msg).map_err(|e| self.early_failure(e))
    }

    /// Half-closes the request side.
    pub(crate) fn close_send(&mut self) -> Result<()> {
        self.writer
            .close_send::<Req>()
            .map_err(|e| self.early_failure(e))
    }

    /// Prefers the companion's own error over a broken-pipe write failure
    /// when the companion ended the call before we finished sending.
    fn early_failure(&mut self, write_err: Error) -> Error {
        let Some(done) = &self.done else {
            return write_err;
        };
        match done.rx.recv_timeout(EARLY_TRAILER_GRACE) {
            Ok(Err(status_err)) => {
                self.done = None;
                status_err
            }
            _ => write_err,
        }
    }

    /// Half-closes and blocks until the observer has seen the trailer.
    pub(crate) fn complete(mut self) -> Result<Out> {
        self.close_send()?;
        self.await_result()
    }

    /// Blocks until the reader thread resolves the call.
    pub(crate) fn await_result(mut self) -> Result<Out> {
        let result = self
            .done
            .take()
            .map_or_else(|| Err(Error::transport("call already awaited")), Completion::wait);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        result
    }
}

impl<Req, Out> Drop for RequestStream<Req, Out> {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.take() {
            // Abandoned mid-call: unblock the reader and let it run its
            // observer's error path.
            self.writer.abort();
            let _ = handle.join();
        }
    }
}

/// Runs a server-streaming call to completion on the current thread.
pub(crate) fn drain<Resp, O>(conn: Connection, observer: O) -> Result<O::Output>
where
    Resp: DeserializeOwned,
    O: StreamObserver<Resp>,
{
    read_until_trailer(conn, observer)
}

/// Reads frames into `observer` until the trailer or a failure.
fn read_until_trailer<Resp, O>(mut conn: Connection, mut observer: O) -> Result<O::Output>
where
    Resp: DeserializeOwned,
    O: StreamObserver<Resp>,
{
    loop {
        let frame = match conn.recv::<Resp>() {
            Ok(frame) => frame,
            Err(e) => return Err(observer.on_error(e)),
        };
        match frame {
            ServerFrame::Msg(msg) => {
                if let Err(e) = observer.on_next(msg) {
                    conn.abort();
                    return Err(observer.on_error(e));
                }
            }
            ServerFrame::Trailer(status) if status.is_ok() => return observer.on_completed(),
            ServerFrame::Trailer(status) => return Err(observer.on_error(Error::from_status(status))),
        }
    }
}
