// This module decides when a job may run. A fixed number of slots is shared between all
// jobs; waiters are woken whenever a slot or a high priority waiter goes away and retry
// admission under one lock. Health checks push an empty job through at high priority.

//! Job admission.
//!
//! [`SlotScheduler`] bounds how many jobs run at once. High priority
//! waiters are admitted ahead of normal ones, and every admitted task runs
//! under the job timeout; a task that overruns is dropped (which kills its
//! child processes) and its slot is released.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;

use crate::core::{DriverError, DriverResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    #[default]
    Normal,
    High,
}

#[derive(Debug)]
struct SlotState {
    available: usize,
    high_waiting: usize,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<SlotState>,
    released: Notify,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        // Slot counters stay consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_take(&self, priority: Priority) -> bool {
        let mut state = self.lock();
        let admissible = priority == Priority::High || state.high_waiting == 0;
        if admissible && state.available > 0 {
            state.available -= 1;
            true
        } else {
            false
        }
    }
}

/// Bounded, priority-aware admission for compilation jobs.
#[derive(Debug, Clone)]
pub struct SlotScheduler {
    inner: Arc<Inner>,
    job_timeout: Duration,
}

/// An acquired execution slot; released on drop.
#[derive(Debug)]
pub struct SlotPermit {
    inner: Arc<Inner>,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        self.inner.lock().available += 1;
        self.inner.released.notify_waiters();
    }
}

/// Counts a pending high priority waiter for as long as it exists.
struct HighWaiter<'a>(&'a Inner);

impl<'a> HighWaiter<'a> {
    fn register(inner: &'a Inner) -> Self {
        inner.lock().high_waiting += 1;
        HighWaiter(inner)
    }
}

impl Drop for HighWaiter<'_> {
    fn drop(&mut self) {
        self.0.lock().high_waiting -= 1;
        self.0.released.notify_waiters();
    }
}

impl SlotScheduler {
    pub fn new(slots: usize, job_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SlotState {
                    available: slots,
                    high_waiting: 0,
                }),
                released: Notify::new(),
            }),
            job_timeout,
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self, priority: Priority) -> SlotPermit {
        let _waiter = (priority == Priority::High).then(|| HighWaiter::register(&self.inner));
        loop {
            let notified = self.inner.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.try_take(priority) {
                return SlotPermit {
                    inner: Arc::clone(&self.inner),
                };
            }
            notified.await;
        }
    }

    /// Run `task` once a slot is granted, cancelling it after the job
    /// timeout.
    pub async fn enqueue<F, Fut, T>(&self, priority: Priority, task: F) -> DriverResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        let _permit = self.acquire(priority).await;
        match tokio::time::timeout(self.job_timeout, task()).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!("job cancelled after {:?}", self.job_timeout);
                Err(DriverError::Cancelled {
                    limit_ms: self.job_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Slots not currently held.
    pub fn available(&self) -> usize {
        self.inner.lock().available
    }
}
