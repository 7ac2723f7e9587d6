//! Counting semaphore with a FIFO wait queue.
//!
//! `release` hands a freed permit straight to the oldest waiter instead of
//! returning it to the counter, so a late arrival can never overtake a queued
//! one. The counter and queue are only touched under a short, non-async
//! critical section.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

pub struct Semaphore {
    state: Mutex<State>,
}

struct State {
    permits: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// Right to run one operation. Returned to the semaphore on drop.
#[must_use = "the permit is released as soon as it is dropped"]
pub struct Permit<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

/// A queued acquire. If the acquiring future is dropped after the permit was
/// handed over but before it was observed, the permit is passed on.
struct Waiter<'a> {
    semaphore: &'a Semaphore,
    receiver: oneshot::Receiver<()>,
    granted: bool,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if self.granted {
            return;
        }
        self.receiver.close();
        if self.receiver.try_recv().is_ok() {
            self.semaphore.release();
        }
    }
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(State {
                permits,
                waiters: VecDeque::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn available_permits(&self) -> usize {
        self.state().permits
    }

    /// Number of acquirers currently parked in the queue.
    pub fn queued(&self) -> usize {
        self.state()
            .waiters
            .iter()
            .filter(|w| !w.is_closed())
            .count()
    }

    pub async fn acquire(&self) -> Permit<'_> {
        let receiver = {
            let mut state = self.state();
            if state.permits > 0 {
                state.permits -= 1;
                return Permit { semaphore: self };
            }
            let (sender, receiver) = oneshot::channel();
            state.waiters.push_back(sender);
            receiver
        };

        let mut waiter = Waiter {
            semaphore: self,
            receiver,
            granted: false,
        };
        // Senders are only consumed by `release`, which always sends.
        let _ = (&mut waiter.receiver).await;
        waiter.granted = true;

        Permit { semaphore: self }
    }

    fn release(&self) {
        let mut state = self.state();
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.send(()).is_ok() {
                return;
            }
        }
        state.permits += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn acquire_decrements_and_drop_restores() {
        let sem = Semaphore::new(2);
        let first = sem.acquire().await;
        let second = sem.acquire().await;
        assert_eq!(sem.available_permits(), 0);

        drop(first);
        assert_eq!(sem.available_permits(), 1);
        drop(second);
        assert_eq!(sem.available_permits(), 2);
    }

    #[tokio::test]
    async fn waiters_resume_in_request_order() {
        let sem = Semaphore::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let holder = async {
            let _permit = sem.acquire().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
        };
        let waiter = |name: &'static str| {
            let order = order.clone();
            let sem = &sem;
            async move {
                let _permit = sem.acquire().await;
                order.lock().unwrap().push(name);
                tokio::task::yield_now().await;
            }
        };

        tokio::join!(holder, waiter("a"), waiter("b"), waiter("c"));

        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(sem.available_permits(), 1);
    }

    #[tokio::test]
    async fn release_hands_permit_to_queue_head() {
        let sem = Semaphore::new(1);
        let permit = sem.acquire().await;

        let mut queued = Box::pin(sem.acquire());
        assert!(futures::poll!(&mut queued).is_pending());
        assert_eq!(sem.queued(), 1);

        drop(permit);
        // The freed permit went to the waiter, not back to the counter.
        assert_eq!(sem.available_permits(), 0);

        let granted = queued.await;
        drop(granted);
        assert_eq!(sem.available_permits(), 1);
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_leak_permit() {
        let sem = Semaphore::new(1);
        let permit = sem.acquire().await;

        assert!(sem.acquire().now_or_never().is_none());

        drop(permit);
        assert_eq!(sem.available_permits(), 1);
    }

    #[tokio::test]
    async fn waiter_cancelled_after_handoff_passes_permit_on() {
        let sem = Semaphore::new(1);
        let permit = sem.acquire().await;

        let mut queued = Box::pin(sem.acquire());
        assert!(futures::poll!(&mut queued).is_pending());

        drop(permit);
        drop(queued);

        assert_eq!(sem.available_permits(), 1);
    }
}
