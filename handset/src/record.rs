//! Screen recording sessions.
//!
//! Frames either arrive raw, and are written to the sink as they come, or as
//! slices of one gzip stream, which cannot be decoded frame by frame. Those
//! are staged in memory and decoded once, after the companion ends the
//! stream.

use std::fmt;
use std::io::{self, Write};

use flate2::read::GzDecoder;
use handset_proto::{Call, Compression, RecordRequest, RecordResponse};

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::stream::{RequestStream, StreamObserver};

/// Destination of recorded video.
pub type Sink = Box<dyn Write + Send>;

/// Lifecycle of a [`Recording`] once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum RecordingState {
    /// Capturing frames.
    Recording,
    /// Stop sent; waiting for the companion to drain.
    Stopping,
    /// Stream drained and sink finished.
    Closed,
}

/// Opens a `Record` call and sends the start message.
///
/// Only this part is safe to retry; once frames may have reached the sink,
/// the call is no longer restartable.
pub(crate) fn open(channel: &Channel) -> Result<crate::channel::Connection> {
    let mut conn = channel.open(&Call::Record)?;
    conn.send(RecordRequest::Start)?;
    Ok(conn)
}

/// A running screen recording.
///
/// Call [`Recording::close`] (or [`Recording::stop`]) to stop it and wait
/// until every frame is in the sink. Dropping a running recording stops it
/// too, discarding errors.
pub struct Recording {
    /// Request side of the `Record` call.
    stream: Option<RequestStream<RecordRequest, Sink>>,
    /// Current lifecycle state.
    state: RecordingState,
}

impl fmt::Debug for Recording {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recording")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Recording {
    /// Starts consuming frames from an opened `Record` call into `sink`.
    pub(crate) fn spawn(conn: crate::channel::Connection, sink: Sink) -> Result<Self> {
        let stream = RequestStream::spawn::<RecordResponse, _>(conn, FrameWriter::new(sink))?;
        tracing::debug!("screen recording started");
        Ok(Self {
            stream: Some(stream),
            state: RecordingState::Recording,
        })
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> RecordingState {
        self.state
    }

    /// Stops capturing and blocks until the stream has drained and the sink
    /// has been finished. Returns the sink.
    pub fn close(mut self) -> Result<Sink> {
        self.stop()
    }

    /// Sends stop, half-closes, and waits for the finish step. Returns the
    /// sink the first time and [`Error::Recording`] after that.
    pub fn stop(&mut self) -> Result<Sink> {
        let Some(mut stream) = self.stream.take() else {
            return Err(Error::Recording("recording is already closed".into()));
        };
        self.state = RecordingState::Stopping;
        let result = stream
            .send(RecordRequest::Stop)
            .and_then(|()| stream.complete());
        self.state = RecordingState::Closed;
        tracing::debug!(ok = result.is_ok(), "screen recording closed");
        result
    }
}

impl Drop for Recording {
    fn drop(&mut self) {
        if self.stream.is_some() {
            let _ = self.stop();
        }
    }
}

/// Reader-side observer: routes frames to the sink or the staging buffer.
struct FrameWriter {
    /// Destination of decoded video.
    sink: Sink,
    /// Compressed bytes awaiting a single decode at the end.
    staged: Vec<u8>,
    /// Frames received.
    frames: usize,
}

impl FrameWriter {
    /// Wraps `sink`.
    fn new(sink: Sink) -> Self {
        Self {
            sink,
            staged: Vec::new(),
            frames: 0,
        }
    }

    /// Decodes staged bytes into the sink, or flushes it. Runs exactly once
    /// because it consumes the writer.
    fn finish(mut self) -> io::Result<Sink> {
        tracing::debug!(frames = self.frames, staged = self.staged.len(), "finishing recording");
        if !self.staged.is_empty() {
            let mut decoder = GzDecoder::new(self.staged.as_slice());
            io::copy(&mut decoder, &mut self.sink)?;
        }
        self.sink.flush()?;
        Ok(self.sink)
    }
}

impl StreamObserver<RecordResponse> for FrameWriter {
    type Output = Sink;

    fn on_next(&mut self, msg: RecordResponse) -> Result<()> {
        self.frames += 1;
        match msg.compression {
            Compression::Gzip => self.staged.extend_from_slice(&msg.data),
            _ => self.sink.write_all(&msg.data)?,
        }
        Ok(())
    }

    fn on_completed(self) -> Result<Sink> {
        Ok(self.finish()?)
    }

    fn on_error(self, err: Error) -> Error {
        if let Err(e) = self.finish() {
            tracing::warn!(error = %e, "could not finish recording after stream failure");
        }
        err
    }
}
