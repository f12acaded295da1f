// Copyright 2025 ToonDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Cancellable periodic background task.

use parking_lot::{Condvar, Mutex};
use std::io;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Cooperative cancellation flag shared between a task and its owner.
///
/// Waiting on the token returns as soon as it is cancelled, so a sleeping
/// task observes cancellation without waiting out its interval.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock() = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleep for up to `timeout`. Returns true if cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut cancelled = flag.lock();
        while !*cancelled {
            if cvar.wait_until(&mut cancelled, deadline).timed_out() {
                break;
            }
        }
        *cancelled
    }
}

/// A step repeated every `interval` on a named thread until cancelled or
/// until the step breaks. The task owns its state and hands it back on join.
pub struct PeriodicTask<S> {
    handle: JoinHandle<S>,
    token: CancellationToken,
    interval: Duration,
}

impl<S: Send + 'static> PeriodicTask<S> {
    pub fn spawn<F>(name: &str, interval: Duration, mut state: S, mut step: F) -> io::Result<Self>
    where
        F: FnMut(&mut S) -> ControlFlow<()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let task_token = token.clone();

        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            while !task_token.is_cancelled() {
                if step(&mut state).is_break() {
                    break;
                }
                if task_token.wait_timeout(interval) {
                    break;
                }
            }
            state
        })?;

        Ok(Self {
            handle,
            token,
            interval,
        })
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel and wait for the task, calling `on_wait` once per elapsed
    /// interval while it is still running. Returns `None` if the task
    /// panicked.
    pub fn stop(self, mut on_wait: impl FnMut()) -> Option<S> {
        self.token.cancel();
        let poll = self.interval.min(Duration::from_millis(5));
        let mut last_notice = Instant::now();
        while !self.handle.is_finished() {
            if last_notice.elapsed() >= self.interval {
                on_wait();
                last_notice = Instant::now();
            }
            thread::sleep(poll);
        }
        self.handle.join().ok()
    }
}
