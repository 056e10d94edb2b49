//! Worker pools.
//!
//! A [`Pool`] owns a fixed set of workers, each parked on its own OS thread,
//! and serves at most one [`Task`] at a time. [`Pool::send`] runs the task's
//! publisher on a fresh thread and subscribes every worker to the same device
//! queue, so the device list is drained by all workers concurrently.
//!
//! # Lifecycle
//!
//! ```text
//! SPARE --try_lock_and_allocate--> RUNNING --send completes--> SPARE
//! ```
//!
//! Pools are only resized while nobody else can hand them a task: either in
//! `SPARE` through [`Pool::resize`], or by the dispatcher right after it has
//! allocated the pool.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::env::Env;
use super::error::DispatchError;
use super::message::{Task, TaskId};
use super::outcome::{OutcomeKind, OutcomeRecord, PoolSinks};
use super::worker::{Worker, WorkerCommand};
use crate::config::PoolConfig;

/// Pool availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    /// Idle and selectable by the dispatcher.
    Spare,
    /// Allocated to a task.
    Running,
}

/// Point-in-time view of a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Slot index in the task queue.
    pub id: usize,
    /// Availability.
    pub status: PoolStatus,
    /// Live workers.
    pub workers: usize,
    /// Task being sent, if any.
    pub task_id: Option<TaskId>,
}

/// A worker and the thread running its command loop.
struct WorkerSlot {
    worker: Arc<Worker>,
    handle: Option<JoinHandle<()>>,
}

/// Fixed-size set of workers bound to at most one task.
pub struct Pool {
    /// Self reference handed to workers.
    me: Weak<Pool>,
    id: usize,
    env: Arc<Env>,
    /// This pool's own copy of the sizing template.
    config: Mutex<PoolConfig>,
    status: Mutex<PoolStatus>,
    /// Held for the whole of a send.
    send_gate: Mutex<()>,
    workers: Mutex<Vec<WorkerSlot>>,
    sinks: PoolSinks,
    task: Mutex<Option<TaskId>>,
    shut_down: AtomicBool,
}

impl Pool {
    /// Create `config.size` workers through `env` and start them.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::InvalidConfig`] if `config` does not validate
    /// - [`DispatchError::WorkerCreate`] if any worker or thread cannot be
    ///   created; workers built so far are destroyed
    pub fn new(id: usize, config: PoolConfig, env: Arc<Env>) -> Result<Arc<Self>, DispatchError> {
        config.validate().map_err(DispatchError::InvalidConfig)?;

        let mut workers = Vec::with_capacity(config.size);
        for _ in 0..config.size {
            match env.create_worker() {
                Ok(worker) => workers.push(Arc::new(worker)),
                Err(e) => {
                    error!(pool_id = id, error = %e, "worker creation failed, aborting pool");
                    destroy_all(&env, &workers);
                    return Err(e);
                }
            }
        }
        // Sinks may be files; open them only once the workers exist.
        let sinks = match env.pool_sinks(id) {
            Ok(sinks) => sinks,
            Err(e) => {
                error!(pool_id = id, error = %e, "outcome sinks unavailable, aborting pool");
                destroy_all(&env, &workers);
                return Err(e);
            }
        };

        let pool = Arc::new_cyclic(|me: &Weak<Self>| {
            let slots = workers
                .into_iter()
                .enumerate()
                .map(|(i, worker)| {
                    worker.bind(i, me.clone());
                    WorkerSlot { worker, handle: None }
                })
                .collect();
            Self {
                me: me.clone(),
                id,
                env,
                config: Mutex::new(config),
                status: Mutex::new(PoolStatus::Spare),
                send_gate: Mutex::new(()),
                workers: Mutex::new(slots),
                sinks,
                task: Mutex::new(None),
                shut_down: AtomicBool::new(false),
            }
        });

        pool.run()?;
        info!(pool_id = id, size = config.size, capacity = config.capacity, "pool created");
        Ok(pool)
    }

    /// Start a command-loop thread for every worker that has none.
    ///
    /// # Panics
    ///
    /// If the worker count differs from the configured size.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::WorkerCreate`] if a thread cannot be spawned.
    pub fn run(&self) -> Result<(), DispatchError> {
        let size = self.config.lock().size;
        let mut workers = self.workers.lock();
        assert_eq!(
            workers.len(),
            size,
            "pool-{}: worker count does not match configured size",
            self.id
        );
        for (i, slot) in workers.iter_mut().enumerate() {
            if slot.handle.is_none() {
                slot.handle = Some(self.spawn_worker(i, &slot.worker)?);
            }
        }
        Ok(())
    }

    fn spawn_worker(&self, index: usize, worker: &Arc<Worker>) -> Result<JoinHandle<()>, DispatchError> {
        let worker = Arc::clone(worker);
        thread::Builder::new()
            .name(format!("pool-{}-worker-{index}", self.id))
            .spawn(move || worker.run())
            .map_err(|e| DispatchError::WorkerCreate(e.to_string()))
    }

    /// Move from `SPARE` to `RUNNING`. Returns `false` if the pool was not spare.
    pub fn try_lock_and_allocate(&self) -> bool {
        if self.shut_down.load(Ordering::Acquire) {
            return false;
        }
        let mut status = self.status.lock();
        if *status != PoolStatus::Spare {
            return false;
        }
        *status = PoolStatus::Running;
        true
    }

    /// Drain `task` through every worker, then return to `SPARE` and post this
    /// pool's id on `finish`.
    ///
    /// Blocks until the publisher and every worker are done. Push failures are
    /// recorded and never interrupt the send.
    pub fn send(&self, task: Task, finish: &Sender<usize>) {
        let _gate = self.send_gate.lock();
        *self.task.lock() = Some(task.id());

        match task.message().marshal() {
            Ok(bytes) => info!(
                pool = %self.name(),
                task_id = task.id(),
                devices = task.devices().len(),
                message = %String::from_utf8_lossy(&bytes),
                "pool sending task"
            ),
            Err(e) => warn!(pool = %self.name(), task_id = task.id(), error = %e, "message does not marshal"),
        }

        let devices = Arc::clone(task.devices());
        let publisher = thread::Builder::new()
            .name(format!("{}-publisher", self.name()))
            .spawn(move || devices.publish());
        let publisher = match publisher {
            Ok(handle) => Some(handle),
            Err(e) => {
                self.publish_failed(&task, &format!("publisher thread: {e}"));
                None
            }
        };

        let (done_tx, done_rx) = unbounded();
        let commands: Vec<_> = self
            .workers
            .lock()
            .iter()
            .map(|slot| slot.worker.command_sender())
            .collect();
        let mut subscribed = 0usize;
        for command in commands {
            let subscribe = WorkerCommand::Subscribe {
                task: task.clone(),
                done: done_tx.clone(),
            };
            if command.send(subscribe).is_ok() {
                subscribed += 1;
            }
        }
        drop(done_tx);

        if let Some(handle) = publisher {
            match handle.join() {
                Ok(Ok(sent)) => debug!(pool = %self.name(), task_id = task.id(), sent, "publisher finished"),
                Ok(Err(DispatchError::AlreadyPublishing)) => {
                    warn!(pool = %self.name(), task_id = task.id(), "device queue already being published");
                }
                Ok(Err(e)) => self.publish_failed(&task, &e.to_string()),
                Err(_) => self.publish_failed(&task, "publisher panicked"),
            }
        }

        let finished = done_rx.iter().take(subscribed).count();
        if finished < subscribed {
            error!(pool = %self.name(), task_id = task.id(), finished, subscribed, "workers exited during send");
        }

        *self.task.lock() = None;
        self.sinks.flush();
        *self.status.lock() = PoolStatus::Spare;
        info!(pool = %self.name(), task_id = task.id(), "pool finished task");
        // Advisory; a full channel only means the dispatcher has not caught up.
        let _ = finish.try_send(self.id);
    }

    fn publish_failed(&self, task: &Task, reason: &str) {
        warn!(pool = %self.name(), task_id = task.id(), reason, "publish failed");
        task.devices().fail(reason);
        self.sinks.record(
            OutcomeKind::Fail,
            &OutcomeRecord::task_failure(self.name(), task.id(), reason),
        );
    }

    /// Resize for a task of `queue_len` devices.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::PoolBusy`] unless the pool is `SPARE`
    /// - [`DispatchError::WorkerCreate`] if growing fails part way; the pool
    ///   keeps the workers it managed to start
    pub fn resize(&self, queue_len: usize) -> Result<(), DispatchError> {
        let status = self.status.lock();
        if *status != PoolStatus::Spare || self.shut_down.load(Ordering::Acquire) {
            return Err(DispatchError::PoolBusy);
        }
        let result = self.rebalance(queue_len);
        drop(status);
        result
    }

    /// Resize a pool the caller has just allocated and not yet sent to.
    pub(crate) fn resize_allocated(&self, queue_len: usize) -> Result<(), DispatchError> {
        debug_assert!(self.task.lock().is_none(), "resizing a pool with a task in flight");
        self.rebalance(queue_len)
    }

    fn rebalance(&self, queue_len: usize) -> Result<(), DispatchError> {
        let target = self.config.lock().sized_for(queue_len).size;
        let mut workers = self.workers.lock();
        let current = workers.len();

        let mut outcome = Ok(());
        if target > current {
            for i in current..target {
                let worker = match self.env.create_worker() {
                    Ok(worker) => Arc::new(worker),
                    Err(e) => {
                        outcome = Err(e);
                        break;
                    }
                };
                worker.bind(i, self.me.clone());
                match self.spawn_worker(i, &worker) {
                    Ok(handle) => workers.push(WorkerSlot {
                        worker,
                        handle: Some(handle),
                    }),
                    Err(e) => {
                        let _ = self.env.destroy_worker(&worker);
                        outcome = Err(e);
                        break;
                    }
                }
            }
        } else if target < current {
            let removed: Vec<WorkerSlot> = workers.drain(target..).collect();
            self.retire(removed);
        }

        let size = workers.len();
        self.config.lock().size = size;
        drop(workers);

        if size != current {
            debug!(pool = %self.name(), from = current, to = size, queue_len, "pool resized");
        }
        if let Err(e) = &outcome {
            warn!(pool = %self.name(), error = %e, size, "pool grew only partially");
        }
        outcome
    }

    /// Stop, join and destroy workers.
    fn retire(&self, slots: Vec<WorkerSlot>) {
        for slot in &slots {
            slot.worker.stop();
        }
        for slot in slots {
            if let Some(handle) = slot.handle {
                if handle.join().is_err() {
                    warn!(pool = %self.name(), worker = slot.worker.id(), "worker thread panicked");
                }
            }
            if let Err(e) = self.env.destroy_worker(&slot.worker) {
                warn!(pool = %self.name(), error = %e, "worker destroy failed");
            }
        }
    }

    /// Wait for any in-flight send, then stop, join and destroy every worker.
    /// Later calls are no-ops.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let _gate = self.send_gate.lock();
        let slots: Vec<WorkerSlot> = self.workers.lock().drain(..).collect();
        let count = slots.len();
        self.retire(slots);
        self.sinks.flush();
        info!(pool = %self.name(), workers = count, "pool shut down");
    }

    /// Slot index in the task queue.
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// `pool-<id>`.
    #[must_use]
    pub fn name(&self) -> String {
        format!("pool-{}", self.id)
    }

    /// Live workers.
    #[must_use]
    pub fn size(&self) -> usize {
        self.workers.lock().len()
    }

    /// Availability.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        *self.status.lock()
    }

    /// Copy of this pool's configuration.
    #[must_use]
    pub fn config(&self) -> PoolConfig {
        *self.config.lock()
    }

    /// Outcome sinks.
    #[must_use]
    pub const fn sinks(&self) -> &PoolSinks {
        &self.sinks
    }

    /// Task being sent, if any.
    #[must_use]
    pub fn current_task(&self) -> Option<TaskId> {
        *self.task.lock()
    }

    /// Workers in slot order.
    #[must_use]
    pub fn workers(&self) -> Vec<Arc<Worker>> {
        self.workers.lock().iter().map(|s| Arc::clone(&s.worker)).collect()
    }

    /// Point-in-time view for status reporting.
    #[must_use]
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            id: self.id,
            status: self.status(),
            workers: self.size(),
            task_id: self.current_task(),
        }
    }
}

fn destroy_all(env: &Env, workers: &[Arc<Worker>]) {
    for worker in workers {
        let _ = env.destroy_worker(worker);
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        // Signal workers but don't join; explicit shutdown() does that.
        if !self.shut_down.swap(true, Ordering::AcqRel) {
            for slot in self.workers.get_mut().drain(..) {
                slot.worker.stop();
                let _ = self.env.destroy_worker(&slot.worker);
            }
            debug!(pool_id = self.id, "pool dropped without shutdown, workers detached");
        }
    }
}
