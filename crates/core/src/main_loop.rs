//! The single logical event loop
//!
//! Every state change in the session core happens on one thread. Remote
//! replies, barriers and deferred work are queued here and dispatched in
//! FIFO order, so a barrier queued after a request completes after it.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use tokio::sync::Notify;
use tracing::trace;

type Task = Box<dyn FnOnce()>;

#[derive(Default)]
struct LoopInner {
    queue: RefCell<VecDeque<Task>>,
    wakeup: Notify,
}

/// Cloneable handle to the loop's work queue
#[derive(Clone, Default)]
pub struct MainLoop {
    inner: Rc<LoopInner>,
}

impl MainLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `task` to run on a later dispatch
    pub fn invoke(&self, task: impl FnOnce() + 'static) {
        self.inner.queue.borrow_mut().push_back(Box::new(task));
        self.inner.wakeup.notify_one();
    }

    /// Run the oldest queued task. Returns `false` if the queue was empty.
    pub fn dispatch_one(&self) -> bool {
        let task = self.inner.queue.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Dispatch until no work is left, including work queued while
    /// dispatching. Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut dispatched = 0;
        while self.dispatch_one() {
            dispatched += 1;
        }
        if dispatched > 0 {
            trace!(dispatched, "main loop idle");
        }
        dispatched
    }

    pub fn pending(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Resolve once there is queued work
    pub async fn wait_for_work(&self) {
        if !self.is_idle() {
            return;
        }
        self.inner.wakeup.notified().await;
    }
}

impl std::fmt::Debug for MainLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainLoop")
            .field("pending", &self.pending())
            .finish()
    }
}
