use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

/// Caps the number of requests in flight across every service sharing this
/// scheduler. Excess requests wait in FIFO order; a released slot is handed
/// straight to the oldest waiter still alive.
#[derive(Debug, Default)]
pub struct RequestScheduler {
    state: Mutex<SchedulerState>,
}

#[derive(Debug, Default)]
struct SchedulerState {
    max_concurrent: Option<usize>,
    in_flight: usize,
    queue: VecDeque<oneshot::Sender<()>>,
}

impl SchedulerState {
    fn has_capacity(&self) -> bool {
        self.max_concurrent.is_none_or(|max| self.in_flight < max)
    }

    fn pump(&mut self) {
        while self.has_capacity() {
            let Some(waiter) = self.queue.pop_front() else {
                break;
            };
            if waiter.send(()).is_ok() {
                self.in_flight += 1;
            }
        }
    }
}

impl RequestScheduler {
    pub fn new(max_concurrent: Option<usize>) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                max_concurrent: max_concurrent.filter(|max| *max > 0),
                ..SchedulerState::default()
            }),
        }
    }

    /// `None` (or zero) removes the cap. Raising the cap admits waiters
    /// immediately.
    pub fn set_max_concurrent(&self, max_concurrent: Option<usize>) {
        let mut state = self.lock();
        state.max_concurrent = max_concurrent.filter(|max| *max > 0);
        state.pump();
    }

    pub fn max_concurrent(&self) -> Option<usize> {
        self.lock().max_concurrent
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    pub fn waiting(&self) -> usize {
        self.lock()
            .queue
            .iter()
            .filter(|waiter| !waiter.is_closed())
            .count()
    }

    /// Resolves once the caller may dispatch a request. The slot is held
    /// until the returned [`Permit`] is released or dropped.
    pub async fn admit(self: &Arc<Self>) -> Permit {
        loop {
            let rx = {
                let mut state = self.lock();
                if state.has_capacity() {
                    state.in_flight += 1;
                    return Permit::new(self.clone());
                }
                let (tx, rx) = oneshot::channel();
                state.queue.push_back(tx);
                tracing::debug!(
                    in_flight = state.in_flight,
                    waiting = state.queue.len(),
                    "request queued"
                );
                rx
            };
            let mut queued = QueuedAdmission {
                scheduler: self.clone(),
                rx,
                granted: false,
            };
            if (&mut queued.rx).await.is_ok() {
                queued.granted = true;
                return Permit::new(self.clone());
            }
        }
    }

    fn release_slot(&self) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.pump();
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns a slot that was handed over after the waiting future was dropped.
struct QueuedAdmission {
    scheduler: Arc<RequestScheduler>,
    rx: oneshot::Receiver<()>,
    granted: bool,
}

impl Drop for QueuedAdmission {
    fn drop(&mut self) {
        if self.granted {
            return;
        }
        self.rx.close();
        if self.rx.try_recv().is_ok() {
            self.scheduler.release_slot();
        }
    }
}

/// One admitted request. Releases its slot exactly once.
#[derive(Debug)]
pub struct Permit {
    scheduler: Option<Arc<RequestScheduler>>,
}

impl Permit {
    fn new(scheduler: Arc<RequestScheduler>) -> Self {
        Self {
            scheduler: Some(scheduler),
        }
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.release_slot();
        }
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn unlimited_admits_everything() {
        let scheduler = Arc::new(RequestScheduler::new(None));
        let a = scheduler.admit().await;
        let b = scheduler.admit().await;
        assert_eq!(scheduler.in_flight(), 2);
        a.release();
        drop(b);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn waiters_are_admitted_in_fifo_order() {
        let scheduler = Arc::new(RequestScheduler::new(Some(1)));
        let first = scheduler.admit().await;
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for idx in 0..3 {
            let task_scheduler = scheduler.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let permit = task_scheduler.admit().await;
                order.lock().unwrap().push(idx);
                permit.release();
            }));
            // Let each task enqueue before spawning the next.
            while scheduler.waiting() < idx + 1 {
                tokio::task::yield_now().await;
            }
        }

        assert_eq!(scheduler.in_flight(), 1);
        first.release();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_leak_slot() {
        let scheduler = Arc::new(RequestScheduler::new(Some(1)));
        let held = scheduler.admit().await;

        let cancelled = tokio::time::timeout(Duration::from_millis(10), scheduler.admit()).await;
        assert!(cancelled.is_err());
        assert_eq!(scheduler.waiting(), 0);

        held.release();
        assert_eq!(scheduler.in_flight(), 0);
        let again = scheduler.admit().await;
        assert_eq!(scheduler.in_flight(), 1);
        drop(again);
    }

    #[tokio::test]
    async fn raising_cap_admits_waiters() {
        let scheduler = Arc::new(RequestScheduler::new(Some(1)));
        let _held = scheduler.admit().await;
        let waiter = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.admit().await })
        };
        while scheduler.waiting() == 0 {
            tokio::task::yield_now().await;
        }
        scheduler.set_max_concurrent(Some(2));
        let permit = waiter.await.unwrap();
        assert_eq!(scheduler.in_flight(), 2);
        drop(permit);
    }
}
