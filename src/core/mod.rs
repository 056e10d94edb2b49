//! Dispatch core: device queues, workers, pools and the task ring.

pub mod device_queue;
pub mod env;
pub mod error;
pub mod message;
pub mod outcome;
pub mod pool;
pub mod task_queue;
pub mod worker;

pub use device_queue::{DeviceQueue, DeviceQueueStatus};
pub use env::{Env, DEFAULT_MEMORY_OUTCOMES};
pub use error::{AppResult, DispatchError};
pub use message::{Alert, ApnsMessage, Aps, Message, Task, TaskId};
pub use outcome::{
    FileOutcomeSink, InMemoryOutcomeSink, OutcomeKind, OutcomeRecord, OutcomeSink, OutcomeTarget, PoolSinks,
};
pub use pool::{Pool, PoolSnapshot, PoolStatus};
pub use task_queue::{TaskQueue, TASK_QUEUE_MAX_POOL, TASK_QUEUE_MAX_WAITING};
pub use worker::{
    ProviderError, ProviderFactory, PushProvider, PushResponse, PushResult, Worker, WorkerCommand, WorkerStatus,
};
