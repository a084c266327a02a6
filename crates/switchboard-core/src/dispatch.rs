//! Deferred delivery of handler calls.
//!
//! Backends never invoke message or presence handlers on the caller's stack.
//! Every delivery is pushed onto a FIFO queue owned by the [`Dispatcher`] and
//! drained by a single consumer task, so deliveries run one at a time and in
//! the order they were scheduled. A panicking handler is caught and logged;
//! the next delivery still runs.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, Notify};
use tracing::{trace, warn};

type Job = Box<dyn FnOnce() + Send>;

#[derive(Debug, Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

struct Queue {
    sender: mpsc::UnboundedSender<Job>,
    /// Taken by the consumer task once it starts.
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
    pending: Pending,
}

/// Schedules handler invocations onto a serial delivery queue.
#[derive(Clone)]
pub struct Dispatcher {
    queue: Arc<Queue>,
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            queue: Arc::new(Queue {
                sender,
                receiver: Mutex::new(Some(receiver)),
                pending: Pending::default(),
            }),
        }
    }

    /// Queue `job` to run after the current call returns control.
    ///
    /// Jobs queued outside a Tokio runtime are kept and run once the
    /// dispatcher is next used from inside one.
    pub fn schedule<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.pending.count.fetch_add(1, Ordering::AcqRel);
        if self.queue.sender.send(Box::new(job)).is_err() {
            warn!("Delivery queue closed, dropping deferred delivery");
            self.queue.pending.done();
            return;
        }
        self.start_consumer();
        trace!(pending = self.pending(), "Scheduled delivery");
    }

    /// Number of deliveries that have not finished yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.pending.count.load(Ordering::Acquire)
    }

    /// Wait until every scheduled delivery has run, including deliveries
    /// scheduled by other deliveries.
    pub async fn settled(&self) {
        self.start_consumer();
        loop {
            let notified = self.queue.pending.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn start_consumer(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let mut slot = self
            .queue
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(mut receiver) = slot.take() else {
            return;
        };
        drop(slot);

        let queue = Arc::downgrade(&self.queue);
        handle.spawn(async move {
            while let Some(job) = receiver.recv().await {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    warn!("Handler panicked during delivery");
                }
                match queue.upgrade() {
                    Some(queue) => queue.pending.done(),
                    None => break,
                }
            }
            trace!("Delivery queue drained and closed");
        });
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pending", &self.pending())
            .finish()
    }
}
