//! Bounded task ring and the dispatcher that matches tasks to pools.
//!
//! Producers [`TaskQueue::add`] tasks into a ring of
//! [`TASK_QUEUE_MAX_WAITING`] slots. A single dispatcher thread, started with
//! [`TaskQueue::start`], takes the head task once its device queue has loaded,
//! finds a spare pool (creating one lazily, up to [`TASK_QUEUE_MAX_POOL`]),
//! sizes it for the device count and hands the task over on a send thread.
//!
//! # Ring discipline
//!
//! `write` is the slot the next task goes into and `read` is the head. The
//! ring is full when the slot after `write` is occupied, so at most
//! `TASK_QUEUE_MAX_WAITING - 1` tasks wait at once.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use super::device_queue::{DeviceQueue, DeviceQueueStatus};
use super::env::Env;
use super::error::DispatchError;
use super::message::{Message, Task, TaskId};
use super::outcome::{OutcomeRecord, OutcomeSink};
use super::pool::{Pool, PoolSnapshot, PoolStatus};
use crate::builders::QueueBuilder;

/// Ring size.
pub const TASK_QUEUE_MAX_WAITING: usize = 100;
/// Most pools the dispatcher will create.
pub const TASK_QUEUE_MAX_POOL: usize = 5;

const fn next(i: usize) -> usize {
    (i + 1) % TASK_QUEUE_MAX_WAITING
}

struct Ring {
    tasks: Vec<Option<Task>>,
    read: usize,
    write: usize,
}

impl Ring {
    fn new() -> Self {
        Self {
            tasks: vec![None; TASK_QUEUE_MAX_WAITING],
            read: 0,
            write: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.tasks[next(self.write)].is_some()
    }

    const fn len(&self) -> usize {
        (self.write + TASK_QUEUE_MAX_WAITING - self.read) % TASK_QUEUE_MAX_WAITING
    }

    fn check_indices(&self) {
        assert!(
            self.read < TASK_QUEUE_MAX_WAITING && self.write < TASK_QUEUE_MAX_WAITING,
            "task ring index out of bounds: read={} write={}",
            self.read,
            self.write
        );
    }
}

/// Task ring plus dispatcher.
pub struct TaskQueue {
    env: Arc<Env>,
    ring: Mutex<Ring>,
    /// Task-change notifications.
    task_tx: Sender<()>,
    task_rx: Receiver<()>,
    /// Pool ids posted when a send completes.
    finish_tx: Sender<usize>,
    finish_rx: Receiver<usize>,
    pools: Mutex<Vec<Option<Arc<Pool>>>>,
    fail_sink: Arc<dyn OutcomeSink>,
    /// Head task id and how many pool creations have failed for it.
    pool_failures: Mutex<(TaskId, u32)>,
    next_id: AtomicU64,
    /// Set once by `stop`; the condvar wakes back-off sleeps.
    stopped: Mutex<bool>,
    stop_signal: Condvar,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    senders: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskQueue {
    /// Empty queue with no pools. Call [`TaskQueue::start`] to dispatch.
    ///
    /// # Errors
    ///
    /// Propagates failures opening the dispatcher's `fail` sink.
    pub fn new(env: Arc<Env>) -> Result<Self, DispatchError> {
        let (task_tx, task_rx) = bounded(TASK_QUEUE_MAX_WAITING);
        let (finish_tx, finish_rx) = bounded(TASK_QUEUE_MAX_WAITING);
        let fail_sink = env.dispatcher_fail_sink()?;
        Ok(Self {
            env,
            ring: Mutex::new(Ring::new()),
            task_tx,
            task_rx,
            finish_tx,
            finish_rx,
            pools: Mutex::new(vec![None; TASK_QUEUE_MAX_POOL]),
            fail_sink,
            pool_failures: Mutex::new((0, 0)),
            next_id: AtomicU64::new(1),
            stopped: Mutex::new(false),
            stop_signal: Condvar::new(),
            dispatcher: Mutex::new(None),
            senders: Mutex::new(Vec::new()),
        })
    }

    /// Shared dispatch context.
    #[must_use]
    pub const fn env(&self) -> &Arc<Env> {
        &self.env
    }

    /// Enqueue a task for `devices` and return the new depth.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::QueueFull`] when no slot is free.
    pub fn add<M: Message>(&self, devices: Arc<DeviceQueue>, message: M) -> Result<usize, DispatchError> {
        self.add_shared(devices, Arc::new(message))
    }

    /// [`TaskQueue::add`] for an already shared message.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::QueueFull`] when no slot is free.
    pub fn add_shared(
        &self,
        devices: Arc<DeviceQueue>,
        message: Arc<dyn Message>,
    ) -> Result<usize, DispatchError> {
        let mut ring = self.ring.lock();
        ring.check_indices();
        if ring.is_full() {
            warn!(limit = TASK_QUEUE_MAX_WAITING, "task queue is full");
            return Err(DispatchError::QueueFull {
                limit: TASK_QUEUE_MAX_WAITING,
            });
        }
        let id: TaskId = self.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = ring.write;
        ring.tasks[slot] = Some(Task::new(id, devices, message));
        ring.write = next(slot);
        let depth = ring.len();
        drop(ring);

        // Dispatcher may be busy; one pending notification is enough.
        let _ = self.task_tx.try_send(());
        debug!(task_id = id, slot, depth, "task added");
        Ok(depth)
    }

    /// Build a device queue from `builder` and enqueue it.
    ///
    /// The queue buffers up to the template pool capacity and loads in the
    /// background; the dispatcher waits for it.
    ///
    /// # Errors
    ///
    /// Propagates loader start failures and [`DispatchError::QueueFull`].
    pub fn add_by_queue_builder<M: Message>(
        &self,
        builder: &QueueBuilder,
        message: M,
    ) -> Result<usize, DispatchError> {
        let devices = builder.async_to_device_queue(self.env.pool_config().capacity)?;
        self.add(devices, message)
    }

    /// Clear the head slot and advance.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Empty`] when there is nothing to pop.
    pub fn pop(&self) -> Result<(), DispatchError> {
        let mut ring = self.ring.lock();
        ring.check_indices();
        let head = ring.read;
        if ring.tasks[head].take().is_none() {
            return Err(DispatchError::Empty);
        }
        ring.read = next(head);
        Ok(())
    }

    /// Head task, without removing it.
    #[must_use]
    pub fn read(&self) -> Option<Task> {
        let ring = self.ring.lock();
        ring.check_indices();
        ring.tasks[ring.read].clone()
    }

    /// Waiting tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    /// Whether no task is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pool slots that have been filled.
    #[must_use]
    pub fn pool_snapshot(&self) -> Vec<PoolSnapshot> {
        self.pools.lock().iter().flatten().map(|p| p.snapshot()).collect()
    }

    /// Pools currently allocated to a task.
    #[must_use]
    pub fn running_pools(&self) -> usize {
        self.pools
            .lock()
            .iter()
            .flatten()
            .filter(|p| p.status() == PoolStatus::Running)
            .count()
    }

    /// Whether [`TaskQueue::stop`] has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Spawn the dispatcher thread. A second call is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Backend`] if the queue was stopped or the
    /// thread cannot be spawned.
    pub fn start(self: &Arc<Self>) -> Result<(), DispatchError> {
        if self.is_stopped() {
            return Err(DispatchError::Backend("task queue is stopped".into()));
        }
        let mut dispatcher = self.dispatcher.lock();
        if dispatcher.is_some() {
            return Ok(());
        }
        let queue = Arc::downgrade(self);
        let handle = thread::Builder::new()
            .name("task-queue-dispatcher".into())
            .spawn(move || dispatch_loop(&queue))
            .map_err(|e| DispatchError::Backend(format!("dispatcher thread: {e}")))?;
        *dispatcher = Some(handle);
        info!(
            max_waiting = TASK_QUEUE_MAX_WAITING,
            max_pool = TASK_QUEUE_MAX_POOL,
            idle_backoff_ms = self.env.dispatcher().idle_backoff_ms,
            "dispatcher started"
        );
        Ok(())
    }

    /// Stop the dispatcher, wait for in-flight sends and shut every pool down.
    /// Waiting tasks are left in the ring.
    pub fn stop(&self) {
        {
            let mut stopped = self.stopped.lock();
            if *stopped {
                return;
            }
            *stopped = true;
        }
        self.stop_signal.notify_all();
        let _ = self.task_tx.try_send(());

        if let Some(handle) = self.dispatcher.lock().take() {
            if handle.join().is_err() {
                error!("dispatcher thread panicked");
            }
        }
        let senders: Vec<_> = self.senders.lock().drain(..).collect();
        for handle in senders {
            if handle.join().is_err() {
                error!("send thread panicked");
            }
        }
        let pools: Vec<_> = self.pools.lock().iter().flatten().cloned().collect();
        for pool in pools {
            pool.shutdown();
        }
        self.fail_sink.flush();
        info!(waiting = self.len(), "dispatcher stopped");
    }

    /// Sleep for `timeout` unless stopped first. Returns `false` once stopped.
    fn pause(&self, timeout: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            self.stop_signal.wait_for(&mut stopped, timeout);
        }
        !*stopped
    }

    /// One dispatcher iteration. Returns `false` once stopped.
    fn dispatch_once(&self, backoff: Duration) -> bool {
        if self.is_stopped() {
            return false;
        }

        let Some(task) = self.read() else {
            let _ = self.task_rx.recv_timeout(backoff);
            return true;
        };
        let _ = self.task_rx.try_recv();

        let status = loop {
            let status = task.devices().wait_ready(backoff);
            if status >= DeviceQueueStatus::Pending {
                break status;
            }
            if self.is_stopped() {
                return false;
            }
            debug!(task_id = task.id(), %status, "waiting for device queue");
        };

        if status == DeviceQueueStatus::Closed {
            let reason = task
                .devices()
                .failure()
                .unwrap_or_else(|| "device queue closed before dispatch".into());
            self.drop_head(&task, reason);
            return true;
        }

        let devices = task.devices().len();
        let pool = match self.acquire_pool(devices) {
            Ok(Some(pool)) => pool,
            Ok(None) => {
                debug!(task_id = task.id(), "no spare pool, waiting for one to finish");
                let _ = self.finish_rx.recv_timeout(backoff);
                return true;
            }
            Err(e) => {
                let attempts = self.note_pool_failure(task.id());
                let limit = self.env.dispatcher().max_pool_attempts;
                if attempts >= limit {
                    self.drop_head(
                        &task,
                        format!("pool creation failed {attempts} times: {e}"),
                    );
                    return true;
                }
                warn!(task_id = task.id(), attempts, limit, error = %e, "pool creation failed, retrying");
                return self.pause(backoff);
            }
        };
        *self.pool_failures.lock() = (0, 0);

        info!(task_id = task.id(), pool = %pool.name(), workers = pool.size(), devices, "dispatching task");
        self.spawn_send(pool, task);
        if let Err(e) = self.pop() {
            error!(error = %e, "head task vanished after dispatch");
        }
        let _ = self.finish_rx.try_recv();

        self.pause(backoff)
    }

    /// Record `reason` on the dispatcher fail sink and pop the head task.
    fn drop_head(&self, task: &Task, reason: String) {
        warn!(task_id = task.id(), reason = %reason, "dropping task");
        self.fail_sink
            .append(&OutcomeRecord::task_failure("dispatcher", task.id(), reason));
        self.fail_sink.flush();
        *self.pool_failures.lock() = (0, 0);
        let _ = self.pop();
    }

    /// Count a failed pool creation for `task_id`; returns the running total.
    fn note_pool_failure(&self, task_id: TaskId) -> u32 {
        let mut failures = self.pool_failures.lock();
        if failures.0 == task_id {
            failures.1 += 1;
        } else {
            *failures = (task_id, 1);
        }
        failures.1
    }

    /// First spare pool, or a new one in the first empty slot. The returned
    /// pool is `RUNNING` and sized for `devices`. `Ok(None)` means every slot
    /// is filled and busy.
    fn acquire_pool(&self, devices: usize) -> Result<Option<Arc<Pool>>, DispatchError> {
        let mut pools = self.pools.lock();

        for pool in pools.iter().flatten() {
            if pool.try_lock_and_allocate() {
                if let Err(e) = pool.resize_allocated(devices) {
                    warn!(pool = %pool.name(), error = %e, "resize failed, sending with current workers");
                }
                return Ok(Some(Arc::clone(pool)));
            }
        }

        let Some(slot) = pools.iter().position(Option::is_none) else {
            return Ok(None);
        };
        let config = self.env.pool_config().sized_for(devices);
        let pool = Pool::new(slot, config, Arc::clone(&self.env)).inspect_err(|e| {
            error!(slot, error = %e, "pool creation failed");
        })?;
        pools[slot] = Some(Arc::clone(&pool));
        Ok(pool.try_lock_and_allocate().then_some(pool))
    }

    fn spawn_send(&self, pool: Arc<Pool>, task: Task) {
        let finish = self.finish_tx.clone();
        let (inline_pool, inline_task) = (Arc::clone(&pool), task.clone());
        let spawned = thread::Builder::new()
            .name(format!("{}-send", pool.name()))
            .spawn(move || pool.send(task, &finish));
        match spawned {
            Ok(handle) => {
                let mut senders = self.senders.lock();
                senders.retain(|h| !h.is_finished());
                senders.push(handle);
            }
            Err(e) => {
                warn!(error = %e, "send thread unavailable, sending inline");
                inline_pool.send(inline_task, &self.finish_tx);
            }
        }
    }
}

fn dispatch_loop(queue: &Weak<TaskQueue>) {
    let Some(backoff) = queue.upgrade().map(|q| q.env.dispatcher().idle_backoff()) else {
        return;
    };
    while let Some(queue) = queue.upgrade() {
        if !queue.dispatch_once(backoff) {
            break;
        }
    }
    debug!("dispatcher exiting");
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("len", &self.len())
            .field("pools", &self.pool_snapshot().len())
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        // Signal only; the last reference may be held by the dispatcher itself.
        *self.stopped.get_mut() = true;
        self.stop_signal.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::core::worker::{ProviderError, PushProvider, PushResponse};
    use crate::core::ApnsMessage;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl PushProvider for Noop {
        async fn push(&self, _payload: &[u8], _device: &str) -> Result<PushResponse, ProviderError> {
            Ok(PushResponse::accepted(None))
        }
    }

    fn queue() -> TaskQueue {
        let factory = || -> Result<Box<dyn PushProvider>, ProviderError> { Ok(Box::new(Noop)) };
        let env = Env::new("test", PoolConfig::default(), factory);
        TaskQueue::new(Arc::new(env)).unwrap()
    }

    fn devices() -> Arc<DeviceQueue> {
        Arc::new(DeviceQueue::from_devices(vec!["a".into()], 4))
    }

    #[test]
    fn test_empty_queue() {
        let q = queue();
        assert!(q.read().is_none());
        assert_eq!(q.pop(), Err(DispatchError::Empty));
        assert_eq!(q.len(), 0);
        assert!(q.pool_snapshot().is_empty());
    }

    #[test]
    fn test_add_then_pop_is_fifo() {
        let q = queue();
        assert_eq!(q.add(devices(), ApnsMessage::alert("1")).unwrap(), 1);
        assert_eq!(q.add(devices(), ApnsMessage::alert("2")).unwrap(), 2);
        let first = q.read().unwrap().id();
        q.pop().unwrap();
        let second = q.read().unwrap().id();
        assert!(second > first);
        q.pop().unwrap();
        assert!(q.is_empty());
        assert_eq!(q.pop(), Err(DispatchError::Empty));
    }

    #[test]
    fn test_ring_holds_one_less_than_slots() {
        let q = queue();
        for i in 1..TASK_QUEUE_MAX_WAITING {
            assert_eq!(q.add(devices(), ApnsMessage::alert("x")).unwrap(), i);
        }
        assert_eq!(
            q.add(devices(), ApnsMessage::alert("x")),
            Err(DispatchError::QueueFull {
                limit: TASK_QUEUE_MAX_WAITING
            })
        );
        q.pop().unwrap();
        assert!(q.add(devices(), ApnsMessage::alert("x")).is_ok());
        assert_eq!(q.len(), TASK_QUEUE_MAX_WAITING - 1);
    }

    #[test]
    fn test_indices_wrap() {
        let q = queue();
        for _ in 0..(TASK_QUEUE_MAX_WAITING * 3) {
            q.add(devices(), ApnsMessage::alert("x")).unwrap();
            q.pop().unwrap();
            let ring = q.ring.lock();
            assert!(ring.read < TASK_QUEUE_MAX_WAITING);
            assert_eq!(ring.read, ring.write);
        }
    }

    #[test]
    fn test_start_twice_and_stop() {
        let q = Arc::new(queue());
        q.start().unwrap();
        q.start().unwrap();
        q.stop();
        assert!(q.is_stopped());
        assert!(q.start().is_err());
    }
}
