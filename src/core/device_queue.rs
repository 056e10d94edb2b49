//! Bounded single-producer, multi-consumer carrier of device tokens.
//!
//! A `DeviceQueue` moves through `Init -> Loading -> Pending -> Draining -> Closed`.
//! A source loads the token list (`Loading`), after which the queue is
//! `Pending` and can be dispatched. The pool's publisher streams tokens into a
//! bounded channel that its workers drain concurrently; once every token has
//! been handed to the channel the queue is `Draining`, and when the channel is
//! closed it is `Closed`.
//!
//! Waiters block on a `parking_lot::Condvar` that is signalled on every
//! transition.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::DispatchError;

/// Lifecycle of a device queue. Ordering follows the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceQueueStatus {
    /// Created, source not started.
    Init,
    /// Source is being read.
    Loading,
    /// Loaded and ready for dispatch.
    Pending,
    /// Every token has been handed to the channel.
    Draining,
    /// Channel closed.
    Closed,
}

impl fmt::Display for DeviceQueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Loading => "loading",
            Self::Pending => "pending",
            Self::Draining => "draining",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

struct State {
    status: DeviceQueueStatus,
    failure: Option<String>,
}

/// Device token carrier shared between a producer, the dispatcher and a pool.
pub struct DeviceQueue {
    state: Mutex<State>,
    changed: Condvar,
    /// Tokens loaded but not yet published.
    backlog: Mutex<VecDeque<String>>,
    tx: Mutex<Option<Sender<String>>>,
    rx: Receiver<String>,
    publishing: AtomicBool,
    capacity: usize,
}

impl DeviceQueue {
    /// Empty queue in `Init`, buffering at most `capacity` tokens in flight.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            state: Mutex::new(State {
                status: DeviceQueueStatus::Init,
                failure: None,
            }),
            changed: Condvar::new(),
            backlog: Mutex::new(VecDeque::new()),
            tx: Mutex::new(Some(tx)),
            rx,
            publishing: AtomicBool::new(false),
            capacity: capacity.max(1),
        }
    }

    /// Queue that is already `Pending` with the given tokens.
    #[must_use]
    pub fn from_devices(devices: Vec<String>, capacity: usize) -> Self {
        let queue = Self::new(capacity);
        queue.load(devices);
        queue
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> DeviceQueueStatus {
        self.state.lock().status
    }

    /// Why the source failed, if it did.
    #[must_use]
    pub fn failure(&self) -> Option<String> {
        self.state.lock().failure.clone()
    }

    /// Channel buffer size.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remaining tokens: unpublished plus buffered. Advisory only.
    #[must_use]
    pub fn len(&self) -> usize {
        self.backlog.lock().len() + self.rx.len()
    }

    /// Whether no tokens remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Advance to `next`. Requests that would move backwards are ignored.
    fn transition(&self, next: DeviceQueueStatus) -> bool {
        let mut state = self.state.lock();
        if next <= state.status {
            return false;
        }
        debug!(from = %state.status, to = %next, "device queue transition");
        state.status = next;
        drop(state);
        self.changed.notify_all();
        true
    }

    /// Mark the source as being read.
    pub fn begin_loading(&self) {
        self.transition(DeviceQueueStatus::Loading);
    }

    /// Install the token list and become `Pending`.
    ///
    /// Ignored once the queue is past `Loading`.
    pub fn load<I>(&self, devices: I)
    where
        I: IntoIterator<Item = String>,
    {
        if self.status() > DeviceQueueStatus::Loading {
            warn!("device queue already loaded, ignoring new tokens");
            return;
        }
        {
            let mut backlog = self.backlog.lock();
            backlog.extend(devices.into_iter().filter(|d| !d.trim().is_empty()));
        }
        self.transition(DeviceQueueStatus::Pending);
    }

    /// Record a source failure and close without producing data.
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        {
            let mut state = self.state.lock();
            if state.status >= DeviceQueueStatus::Closed {
                return;
            }
            state.failure = Some(reason.clone());
        }
        warn!(reason = %reason, "device source failed, closing queue");
        self.backlog.lock().clear();
        self.tx.lock().take();
        self.transition(DeviceQueueStatus::Closed);
    }

    /// Block until the queue is at least `Pending` or `timeout` passes.
    /// Returns the state observed last.
    pub fn wait_ready(&self, timeout: Duration) -> DeviceQueueStatus {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.status < DeviceQueueStatus::Pending {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.status
    }

    /// Stream every token into the channel, blocking while it is full, then
    /// close it.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::AlreadyPublishing`] on a second call
    /// - [`DispatchError::SourceUnavailable`] if the source failed
    /// - [`DispatchError::NotReady`] before the queue is `Pending`
    pub fn publish(&self) -> Result<usize, DispatchError> {
        if self.publishing.swap(true, Ordering::AcqRel) {
            return Err(DispatchError::AlreadyPublishing);
        }
        {
            let state = self.state.lock();
            if let Some(reason) = &state.failure {
                return Err(DispatchError::SourceUnavailable(reason.clone()));
            }
            if state.status < DeviceQueueStatus::Pending {
                self.publishing.store(false, Ordering::Release);
                return Err(DispatchError::NotReady);
            }
        }

        let Some(tx) = self.tx.lock().take() else {
            return Ok(0);
        };

        let mut sent = 0usize;
        loop {
            let Some(device) = self.backlog.lock().pop_front() else {
                break;
            };
            if tx.send(device).is_err() {
                // Receiver lives in `self`, so this only happens while dropping.
                break;
            }
            sent += 1;
        }

        self.transition(DeviceQueueStatus::Draining);
        drop(tx);
        self.transition(DeviceQueueStatus::Closed);
        debug!(sent, "device queue published");
        Ok(sent)
    }

    /// Next token, or `None` once the channel is drained and closed.
    pub fn subscribe(&self) -> Option<String> {
        self.rx.recv().ok()
    }
}

impl fmt::Debug for DeviceQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceQueue")
            .field("status", &self.status())
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn tokens(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("device-{i:04}")).collect()
    }

    #[test]
    fn test_lifecycle_is_monotonic() {
        let q = DeviceQueue::new(4);
        assert_eq!(q.status(), DeviceQueueStatus::Init);
        q.begin_loading();
        q.load(tokens(3));
        assert_eq!(q.status(), DeviceQueueStatus::Pending);
        q.begin_loading();
        assert_eq!(q.status(), DeviceQueueStatus::Pending);
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn test_publish_then_subscribe_all() {
        let q = Arc::new(DeviceQueue::from_devices(tokens(10), 2));
        let publisher = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.publish())
        };
        let mut seen = Vec::new();
        while let Some(d) = q.subscribe() {
            seen.push(d);
        }
        assert_eq!(publisher.join().unwrap().unwrap(), 10);
        assert_eq!(seen, tokens(10));
        assert_eq!(q.status(), DeviceQueueStatus::Closed);
        assert!(q.is_empty());
    }

    #[test]
    fn test_publish_twice_fails() {
        let q = DeviceQueue::from_devices(Vec::new(), 2);
        assert_eq!(q.publish().unwrap(), 0);
        assert_eq!(q.publish().unwrap_err(), DispatchError::AlreadyPublishing);
        assert!(q.subscribe().is_none());
    }

    #[test]
    fn test_publish_before_ready() {
        let q = DeviceQueue::new(2);
        assert_eq!(q.publish().unwrap_err(), DispatchError::NotReady);
        q.load(tokens(1));
        assert_eq!(q.publish().unwrap(), 1);
    }

    #[test]
    fn test_failed_source_closes_without_data() {
        let q = DeviceQueue::new(2);
        q.begin_loading();
        q.fail("connection refused");
        assert_eq!(q.status(), DeviceQueueStatus::Closed);
        assert_eq!(q.failure().as_deref(), Some("connection refused"));
        assert!(matches!(q.publish(), Err(DispatchError::SourceUnavailable(_))));
        assert!(q.subscribe().is_none());
    }

    #[test]
    fn test_wait_ready_wakes_on_load() {
        let q = Arc::new(DeviceQueue::new(2));
        let loader = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                q.load(tokens(2));
            })
        };
        let status = q.wait_ready(Duration::from_secs(5));
        assert_eq!(status, DeviceQueueStatus::Pending);
        loader.join().unwrap();
    }

    #[test]
    fn test_wait_ready_times_out() {
        let q = DeviceQueue::new(2);
        assert_eq!(q.wait_ready(Duration::from_millis(10)), DeviceQueueStatus::Init);
    }

    #[test]
    fn test_concurrent_subscribers_receive_each_token_once() {
        let q = Arc::new(DeviceQueue::from_devices(tokens(500), 8));
        let consumers: Vec<_> = (0..6)
            .map(|_| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    let mut got = Vec::new();
                    while let Some(d) = q.subscribe() {
                        got.push(d);
                    }
                    got
                })
            })
            .collect();
        q.publish().unwrap();
        let mut all = HashSet::new();
        let mut total = 0;
        for c in consumers {
            let got = c.join().unwrap();
            total += got.len();
            all.extend(got);
        }
        assert_eq!(total, 500);
        assert_eq!(all.len(), 500);
    }
}
