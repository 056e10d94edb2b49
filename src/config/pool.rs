//! Pool sizing and dispatcher pacing configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::DispatchError;

/// Default number of workers a pool starts with.
pub const POOL_DEFAULT_SIZE: usize = 5;
/// Default upper bound on workers per pool.
pub const POOL_DEFAULT_CAPACITY: usize = 500;
/// Default smallest worker count a pool is sized to.
pub const POOL_DEFAULT_MINI_SPARE: usize = 2;
/// Default spare ceiling.
pub const POOL_DEFAULT_MAX_SPARE: usize = 50;
/// Default dispatcher idle back-off in milliseconds.
pub const DISPATCHER_DEFAULT_IDLE_BACKOFF_MS: u64 = 1000;
/// Default number of failed pool creations before the head task is dropped.
pub const DISPATCHER_DEFAULT_MAX_POOL_ATTEMPTS: u32 = 3;

/// Sizing template for a worker pool.
///
/// The dispatcher clones the process-wide template for every pool it creates,
/// so [`PoolConfig::set_size_by_queue_length`] never mutates the shared copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Current worker count, `mini_spare <= size <= capacity`.
    pub size: usize,
    /// Hard upper bound on workers; strictly the largest parameter.
    pub capacity: usize,
    /// Smallest worker count used by the sizing ladder.
    pub mini_spare: usize,
    /// Spare ceiling, `mini_spare <= max_spare < capacity`.
    pub max_spare: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: POOL_DEFAULT_SIZE,
            capacity: POOL_DEFAULT_CAPACITY,
            mini_spare: POOL_DEFAULT_MINI_SPARE,
            max_spare: POOL_DEFAULT_MAX_SPARE,
        }
    }
}

impl PoolConfig {
    /// Build and validate a pool configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidConfig`] when any constraint is violated.
    pub fn new(
        size: usize,
        capacity: usize,
        mini_spare: usize,
        max_spare: usize,
    ) -> Result<Self, DispatchError> {
        let cfg = Self {
            size,
            capacity,
            mini_spare,
            max_spare,
        };
        cfg.validate().map_err(DispatchError::InvalidConfig)?;
        Ok(cfg)
    }

    /// Validate pool configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.size == 0 || self.capacity == 0 || self.mini_spare == 0 || self.max_spare == 0 {
            return Err("size, capacity, mini_spare and max_spare must all be greater than 0".into());
        }
        if self.size < self.mini_spare {
            return Err(format!(
                "size ({}) must be >= mini_spare ({})",
                self.size, self.mini_spare
            ));
        }
        if self.size > self.capacity {
            return Err(format!(
                "size ({}) must be <= capacity ({})",
                self.size, self.capacity
            ));
        }
        if self.mini_spare > self.max_spare {
            return Err(format!(
                "mini_spare ({}) must be <= max_spare ({})",
                self.mini_spare, self.max_spare
            ));
        }
        if self.max_spare >= self.capacity {
            return Err("capacity must be the greatest of size, capacity, mini_spare, max_spare".into());
        }
        Ok(())
    }

    /// Set `size` from the number of devices a task targets.
    ///
    /// | queue length | size |
    /// |---|---|
    /// | <= 10 | `mini_spare` |
    /// | <= 100 | 2 x `mini_spare` |
    /// | <= 1 000 | 5 x `mini_spare` |
    /// | <= 10 000 | 50 x `mini_spare` |
    /// | otherwise | `capacity` |
    ///
    /// The result is clamped to `capacity`.
    pub fn set_size_by_queue_length(&mut self, length: usize) {
        let size = match length {
            0..=10 => self.mini_spare,
            11..=100 => self.mini_spare.saturating_mul(2),
            101..=1_000 => self.mini_spare.saturating_mul(5),
            1_001..=10_000 => self.mini_spare.saturating_mul(50),
            _ => self.capacity,
        };
        self.size = size.min(self.capacity);
    }

    /// Copy of this template sized for `length` devices.
    #[must_use]
    pub fn sized_for(&self, length: usize) -> Self {
        let mut cfg = *self;
        cfg.set_size_by_queue_length(length);
        cfg
    }
}

/// Dispatcher pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Sleep after each dispatch, and the upper bound of every idle wait.
    pub idle_backoff_ms: u64,
    /// Consecutive pool creation failures tolerated for one task.
    #[serde(default = "default_max_pool_attempts")]
    pub max_pool_attempts: u32,
}

const fn default_max_pool_attempts() -> u32 {
    DISPATCHER_DEFAULT_MAX_POOL_ATTEMPTS
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            idle_backoff_ms: DISPATCHER_DEFAULT_IDLE_BACKOFF_MS,
            max_pool_attempts: DISPATCHER_DEFAULT_MAX_POOL_ATTEMPTS,
        }
    }
}

impl DispatcherConfig {
    /// Config with the given back-off.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_idle_backoff(idle_backoff: Duration) -> Self {
        Self {
            idle_backoff_ms: idle_backoff.as_millis() as u64,
            max_pool_attempts: DISPATCHER_DEFAULT_MAX_POOL_ATTEMPTS,
        }
    }

    /// Override the pool creation attempt limit.
    #[must_use]
    pub const fn with_max_pool_attempts(mut self, attempts: u32) -> Self {
        self.max_pool_attempts = attempts;
        self
    }

    /// Idle back-off as a duration.
    #[must_use]
    pub const fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    /// Validate dispatcher configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.idle_backoff_ms == 0 {
            return Err("idle_backoff_ms must be greater than 0".into());
        }
        if self.max_pool_attempts == 0 {
            return Err("max_pool_attempts must be greater than 0".into());
        }
        Ok(())
    }
}
