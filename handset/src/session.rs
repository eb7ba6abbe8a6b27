//! Channel ownership and run-with-reconnect.
//!
//! A [`Session`] is the only owner of the active [`Channel`]. Every remote
//! operation goes through [`Session::run`], which rebuilds the channel once
//! on a transport failure and retries the operation once.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::runner::CompanionRunner;

/// The active channel to a companion, plus the means to replace it.
pub struct Session {
    /// Starts and stops channels.
    runner: Arc<dyn CompanionRunner>,
    /// The one active channel; `None` after [`Session::close`] or a failed
    /// restart.
    channel: Mutex<Option<Channel>>,
    /// Set by [`Session::close`] only.
    closed: AtomicBool,
    /// Number of completed restarts.
    restarts: AtomicUsize,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("channel", &self.current().map(|c| c.id()))
            .field("restarts", &self.restarts())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Starts the first channel.
    pub fn start(runner: Arc<dyn CompanionRunner>) -> Result<Self> {
        let channel = runner.start()?;
        Ok(Self {
            runner,
            channel: Mutex::new(Some(channel)),
            closed: AtomicBool::new(false),
            restarts: AtomicUsize::new(0),
        })
    }

    /// Snapshot of the active channel.
    fn current(&self) -> Option<Channel> {
        self.channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the active channel, or a transport error if the session is
    /// closed or a restart failed.
    pub fn channel(&self) -> Result<Channel> {
        self.current().ok_or_else(|| {
            if self.is_closed() {
                Error::transport("session is closed")
            } else {
                Error::transport("no companion channel")
            }
        })
    }

    /// Returns `true` once [`Session::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns the active channel, starting one first if an earlier restart
    /// left the slot empty.
    fn acquire(&self) -> Result<Channel> {
        if let Some(channel) = self.current() {
            return Ok(channel);
        }
        if self.is_closed() {
            return Err(Error::transport("session is closed"));
        }
        tracing::info!("no companion channel, reconnecting");
        self.restart()?;
        self.channel()
    }

    /// Stops the current channel (if any) and starts a new one.
    ///
    /// The lock is held across stop and start so no caller can observe a
    /// released channel as current.
    pub fn restart(&self) -> Result<()> {
        let mut guard = self.channel.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() {
            return Err(Error::transport("session is closed"));
        }
        if let Some(old) = guard.take() {
            self.runner.stop(&old);
        }
        let fresh = self.runner.start()?;
        let n = self.restarts.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(channel = fresh.id(), restarts = n, "companion channel restarted");
        *guard = Some(fresh);
        Ok(())
    }

    /// Runs `op` against the active channel, reconnecting once on a
    /// transport failure.
    ///
    /// Only [`Error::is_transport`] failures trigger the retry; application
    /// errors and errors from the second attempt propagate unchanged. An
    /// operation interrupted by a disconnect is re-run from the start, so
    /// callers get at-least-once semantics: a partially applied action (a
    /// half-uploaded bundle, a tap whose down event already landed) may be
    /// applied again.
    ///
    /// If the previous restart failed, the channel is started again before
    /// the first attempt.
    pub fn run<T>(&self, mut op: impl FnMut(&Channel) -> Result<T>) -> Result<T> {
        let channel = self.acquire()?;
        match op(&channel) {
            Err(e) if e.is_transport() => {
                tracing::warn!(channel = channel.id(), error = %e, "transport failure, reconnecting");
                self.restart()?;
                op(&self.channel()?)
            }
            result => result,
        }
    }

    /// Number of restarts performed so far.
    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }

    /// Returns `true` if there is no usable channel.
    pub fn is_shutdown(&self) -> bool {
        self.current().is_none_or(|c| c.is_shutdown())
    }

    /// Stops the active channel. Idempotent.
    pub fn close(&self) {
        let old = {
            let mut guard = self.channel.lock().unwrap_or_else(PoisonError::into_inner);
            self.closed.store(true, Ordering::SeqCst);
            guard.take()
        };
        if let Some(old) = old {
            self.runner.stop(&old);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::channel::Endpoint;

    /// Runner that hands out unconnected channels and counts calls.
    #[derive(Default)]
    struct Counting {
        starts: AtomicUsize,
        stops: AtomicUsize,
        fail_start_after: Option<usize>,
        fail_start_only: Option<usize>,
    }

    impl CompanionRunner for Counting {
        fn start(&self) -> Result<Channel> {
            let n = self.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail_start_after.is_some_and(|limit| n >= limit)
                || self.fail_start_only == Some(n)
            {
                return Err(Error::transport("companion refused to start"));
            }
            Ok(Channel::new(Endpoint::Tcp(([127, 0, 0, 1], 1).into())))
        }

        fn stop(&self, channel: &Channel) {
            if channel.shutdown() {
                self.stops.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn session() -> (Arc<Counting>, Session) {
        let runner = Arc::new(Counting::default());
        let s = Session::start(Arc::clone(&runner) as Arc<dyn CompanionRunner>).unwrap();
        (runner, s)
    }

    #[test]
    fn retries_once_after_transport_failure() {
        let (runner, s) = session();
        let first = s.channel().unwrap().id();
        let mut attempts = Vec::new();

        let out = s.run(|ch| {
            attempts.push(ch.id());
            if attempts.len() == 1 {
                Err(Error::transport("connection reset"))
            } else {
                Ok(42)
            }
        });

        assert_eq!(out.unwrap(), 42);
        assert_eq!(s.restarts(), 1);
        assert_eq!(runner.starts.load(Ordering::SeqCst), 2);
        assert_eq!(runner.stops.load(Ordering::SeqCst), 1);
        assert_eq!(attempts[0], first);
        assert_ne!(attempts[1], first);
    }

    #[test]
    fn second_transport_failure_propagates_after_one_restart() {
        let (_runner, s) = session();
        let mut attempts = 0;

        let err = s
            .run(|_| -> Result<()> {
                attempts += 1;
                Err(Error::transport("companion crashed"))
            })
            .unwrap_err();

        assert!(err.is_transport());
        assert_eq!(attempts, 2);
        assert_eq!(s.restarts(), 1);
    }

    #[test]
    fn application_errors_are_not_retried() {
        let (_runner, s) = session();
        let mut attempts = 0;

        let err = s
            .run(|_| -> Result<()> {
                attempts += 1;
                Err(Error::Status(handset_proto::Status::new(
                    handset_proto::Code::Internal,
                    "boom",
                )))
            })
            .unwrap_err();

        assert!(err.status().is_some());
        assert_eq!(attempts, 1);
        assert_eq!(s.restarts(), 0);
    }

    #[test]
    fn failed_restart_surfaces_start_error() {
        let runner = Arc::new(Counting {
            fail_start_after: Some(1),
            ..Counting::default()
        });
        let s = Session::start(Arc::clone(&runner) as Arc<dyn CompanionRunner>).unwrap();
        let mut attempts = 0;

        let err = s
            .run(|_| -> Result<()> {
                attempts += 1;
                Err(Error::transport("gone"))
            })
            .unwrap_err();

        assert_eq!(attempts, 1);
        assert!(err.to_string().contains("refused to start"));
        assert!(s.is_shutdown());
        assert!(!s.is_closed());

        // The next call tries to reconnect instead of reporting a closed session.
        let err = s.run(|_| Ok(())).unwrap_err();
        assert!(err.to_string().contains("refused to start"));
        assert_eq!(runner.starts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn session_recovers_after_a_failed_restart() {
        let runner = Arc::new(Counting {
            fail_start_only: Some(1),
            ..Counting::default()
        });
        let s = Session::start(Arc::clone(&runner) as Arc<dyn CompanionRunner>).unwrap();

        let err = s
            .run(|_| -> Result<()> { Err(Error::transport("companion rebooting")) })
            .unwrap_err();
        assert!(err.to_string().contains("refused to start"));
        assert!(s.is_shutdown());

        let mut attempts = 0;
        let out = s.run(|_| {
            attempts += 1;
            Ok("back")
        });

        assert_eq!(out.unwrap(), "back");
        assert_eq!(attempts, 1);
        assert_eq!(runner.starts.load(Ordering::SeqCst), 3);
        assert_eq!(s.restarts(), 1);
        assert!(!s.is_shutdown());
    }

    #[test]
    fn close_is_idempotent() {
        let (runner, s) = session();
        assert!(!s.is_shutdown());
        s.close();
        s.close();
        assert!(s.is_shutdown());
        assert!(s.is_closed());
        assert_eq!(runner.stops.load(Ordering::SeqCst), 1);
        assert!(s.run(|_| Ok(())).unwrap_err().is_transport());
        assert!(s.restart().is_err());
        assert_eq!(runner.starts.load(Ordering::SeqCst), 1);
    }
}
