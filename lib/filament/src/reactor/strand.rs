use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::reactor::{Reactor, Task};

thread_local! {
    static CURRENT_STRAND: Cell<usize> = Cell::new(0);
}

/// Serial execution context on top of the worker pool. Tasks posted to one
/// strand run in submission order and never concurrently, which gives a
/// session single threaded callback semantics without a dedicated thread.
pub struct Strand {
    reactor: Reactor,
    queue: Mutex<Queue>,
}

struct Queue {
    tasks: VecDeque<Task>,
    // True while a drain pass is scheduled or running on the pool
    active: bool,
}

impl Strand {
    #[inline]
    pub fn new(reactor: &Reactor) -> Arc<Strand> {
        Arc::new(Strand {
            reactor: reactor.clone(),
            queue: Mutex::new(Queue {
                tasks: VecDeque::new(),
                active: false,
            }),
        })
    }

    /// Appends a task to the strand queue and schedules a drain pass unless
    /// one is already in flight.
    pub fn post<F: FnOnce() + Send + 'static>(self: &Arc<Self>, task: F) {
        let schedule = {
            let mut queue = self.lock();
            queue.tasks.push_back(Box::new(task));

            match queue.active {
                true => false,
                false => {
                    queue.active = true;
                    true
                }
            }
        };

        if schedule {
            let strand = self.clone();
            self.reactor.post(move || strand.drain());
        }
    }

    /// Runs the task inline when already executing on this strand,
    /// otherwise posts it.
    pub fn dispatch<F: FnOnce() + Send + 'static>(self: &Arc<Self>, task: F) {
        if self.is_current() {
            task();
            return;
        }

        self.post(task);
    }

    /// True when the calling thread is inside this strand's drain pass.
    #[inline]
    pub fn is_current(self: &Arc<Self>) -> bool {
        CURRENT_STRAND.with(|current| current.get() == Arc::as_ptr(self) as usize)
    }

    fn drain(self: &Arc<Self>) {
        CURRENT_STRAND.with(|current| current.set(Arc::as_ptr(self) as usize));

        loop {
            let task = {
                let mut queue = self.lock();
                match queue.tasks.pop_front() {
                    Some(task) => task,
                    None => {
                        // Deactivate under the lock so a concurrent post
                        // observes either the task slot or a fresh schedule
                        queue.active = false;
                        break;
                    }
                }
            };

            task();
        }

        CURRENT_STRAND.with(|current| current.set(0));
    }

    #[inline]
    fn lock(&self) -> MutexGuard<Queue> {
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
