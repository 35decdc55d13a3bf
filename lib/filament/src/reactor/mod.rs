//! The reactor multiplexes non-blocking sockets on a poll thread and
//! dispatches readiness to a pool of worker threads. Sessions that require
//! serialized callbacks layer a [`Strand`](strand::Strand) on top of the
//! pool.

pub mod strand;

use ember::logging;
use hashbrown::HashMap;
use mio::{Events, Interest, Poll, Token, Waker};
use std::cell::Cell;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::process;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::support::NetResult;

pub use self::strand::Strand;

const WAKER_TOKEN: Token = Token(0);
const EVENT_CAPACITY: usize = 1024;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static IN_POOL: Cell<bool> = Cell::new(false);
}

/// Reactor lifecycle and fault notifications. All methods have no-op
/// defaults; implementors override what they need.
pub trait ReactorHandler: Send + Sync + 'static {
    /// Called on every reactor thread right after it starts.
    fn on_thread_init(&self) {}
    /// Called on every reactor thread right before it exits.
    fn on_thread_cleanup(&self) {}
    fn on_started(&self) {}
    fn on_stopped(&self) {}
    /// Called after every poll pass in polling mode.
    fn on_idle(&self) {
        thread::yield_now();
    }
    /// A recoverable fault on a reactor thread.
    fn on_error(&self, _code: i32, _category: &str, _message: &str) {}
}

struct NullHandler;

impl ReactorHandler for NullHandler {}

/// Readiness sink for a registered socket. Implementations must only flag
/// state and schedule work, never block the poll thread. Delivery hands the
/// source a fresh strong handle, which keeps it alive for the duration of
/// the scheduled work.
pub(crate) trait EventSource: Send + Sync {
    fn on_ready(self: Arc<Self>, readable: bool, writable: bool);
}

struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
    available: Condvar,
}

impl TaskQueue {
    fn new() -> TaskQueue {
        TaskQueue {
            tasks: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    fn push(&self, task: Task) {
        let mut tasks = lock(&self.tasks);
        tasks.push_back(task);
        drop(tasks);
        self.available.notify_one();
    }

    /// Blocks until a task is available. Returns `None` once the reactor is
    /// stopping and the queue has drained.
    fn pop(&self, stopping: &AtomicBool) -> Option<Task> {
        let mut tasks = lock(&self.tasks);

        loop {
            if let Some(task) = tasks.pop_front() {
                return Some(task);
            }

            if stopping.load(Ordering::Acquire) {
                return None;
            }

            tasks = match self.available.wait(tasks) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}

struct Core {
    registry: mio::Registry,
    poll: Mutex<Option<Poll>>,
    waker: Waker,
    sources: Mutex<HashMap<usize, Arc<dyn EventSource>>>,
    next_token: AtomicUsize,
    queue: TaskQueue,
    started: AtomicBool,
    stopping: AtomicBool,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
    handler: Arc<dyn ReactorHandler>,
    log: logging::Logger,
}

/// Shared handle to the I/O reactor. Cheap to clone; all endpoints hosted
/// on the reactor keep one.
#[derive(Clone)]
pub struct Reactor {
    core: Arc<Core>,
}

impl Reactor {
    /// Constructs an idle reactor with no-op lifecycle notifications.
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(log: L) -> NetResult<Reactor> {
        Self::with_handler(Arc::new(NullHandler), log)
    }

    /// Constructs an idle reactor with the supplied lifecycle handler.
    pub fn with_handler<'a, L: Into<Option<&'a logging::Logger>>>(
        handler: Arc<dyn ReactorHandler>,
        log: L,
    ) -> NetResult<Reactor> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;

        Ok(Reactor {
            core: Arc::new(Core {
                registry,
                poll: Mutex::new(Some(poll)),
                waker,
                sources: Mutex::new(HashMap::new()),
                next_token: AtomicUsize::new(WAKER_TOKEN.0 + 1),
                queue: TaskQueue::new(),
                started: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                threads: Mutex::new(Vec::new()),
                handler,
                log: logging::child(log, logging::o!("unit" => "reactor")),
            }),
        })
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.core.started.load(Ordering::Acquire)
    }

    /// Starts with the worker count and polling mode of the settings.
    #[inline]
    pub fn start_with(&self, settings: &crate::config::Settings) -> bool {
        self.start(settings.threads, settings.polling)
    }

    /// Launches the poll thread plus `threads` workers. In polling mode the
    /// poll thread spins with zero timeout and fires `on_idle` after every
    /// pass. Returns false if the reactor is already started.
    pub fn start(&self, threads: usize, polling: bool) -> bool {
        if self.is_started() {
            return false;
        }

        let poll = match lock(&self.core.poll).take() {
            Some(poll) => poll,
            // Stopped reactors are not restartable
            None => return false,
        };

        self.core.stopping.store(false, Ordering::Release);

        logging::debug!(self.core.log, "starting reactor";
                        "context" => "start",
                        "threads" => threads,
                        "polling" => polling);

        let mut handles = lock(&self.core.threads);

        let core = self.core.clone();
        handles.push(
            thread::Builder::new()
                .name("filament-poll".to_string())
                .spawn(move || poll_loop(core, poll, polling))
                .unwrap_or_else(|err| fatality(&self.core, &err.to_string())),
        );

        for index in 0..threads.max(1) {
            let core = self.core.clone();
            handles.push(
                thread::Builder::new()
                    .name(format!("filament-worker-{}", index))
                    .spawn(move || worker_loop(core))
                    .unwrap_or_else(|err| fatality(&self.core, &err.to_string())),
            );
        }

        drop(handles);

        // Flip the started flag on the pool itself and wait for it to come
        // back around, so a returned start() means the pool is live
        let core = self.core.clone();
        self.core.queue.push(Box::new(move || {
            core.started.store(true, Ordering::Release);
            core.handler.on_started();
        }));

        while !self.is_started() {
            thread::yield_now();
        }

        true
    }

    /// Posts a quit notification, joins all reactor threads and fails any
    /// subsequent submission. Returns false if the reactor is not started.
    pub fn stop(&self) -> bool {
        if !self.is_started() {
            return false;
        }

        let core = self.core.clone();
        self.core.queue.push(Box::new(move || {
            core.started.store(false, Ordering::Release);
            core.handler.on_stopped();
        }));

        self.core.stopping.store(true, Ordering::Release);
        self.core.queue.available.notify_all();
        drop(self.core.waker.wake());

        let mut handles = lock(&self.core.threads);
        for handle in handles.drain(..) {
            drop(handle.join());
        }

        lock(&self.core.sources).clear();

        logging::debug!(self.core.log, "reactor stopped"; "context" => "stop");

        true
    }

    /// Schedules a task on the worker pool. The task never runs inline.
    /// Returns false once the reactor is stopping.
    pub fn post<F: FnOnce() + Send + 'static>(&self, task: F) -> bool {
        if self.core.stopping.load(Ordering::Acquire) {
            return false;
        }

        self.core.queue.push(Box::new(task));
        true
    }

    /// Runs the task inline when called from a reactor thread, otherwise
    /// defers to the pool.
    pub fn dispatch<F: FnOnce() + Send + 'static>(&self, task: F) -> bool {
        if IN_POOL.with(|flag| flag.get()) {
            task();
            return true;
        }

        self.post(task)
    }

    /// Registers an event source and routes its readiness to `handler`.
    pub(crate) fn register<S: mio::event::Source>(
        &self,
        source: &mut S,
        interests: Interest,
        handler: Arc<dyn EventSource>,
    ) -> NetResult<Token> {
        let token = Token(self.core.next_token.fetch_add(1, Ordering::AcqRel));

        self.core.registry.register(source, token, interests)?;
        lock(&self.core.sources).insert(token.0, handler);

        logging::trace!(self.core.log, "source registered";
                        "context" => "register",
                        "token" => token.0);

        Ok(token)
    }

    /// Removes an event source. Readiness already queued for the token is
    /// dropped on delivery.
    pub(crate) fn deregister<S: mio::event::Source>(
        &self,
        source: &mut S,
        token: Token,
    ) -> NetResult<()> {
        lock(&self.core.sources).remove(&token.0);
        self.core.registry.deregister(source)?;

        logging::trace!(self.core.log, "source deregistered";
                        "context" => "deregister",
                        "token" => token.0);

        Ok(())
    }
}

fn poll_loop(core: Arc<Core>, mut poll: Poll, polling: bool) {
    // The poll thread is intentionally not a dispatch target: readiness must
    // only flag state and hop to the pool, never run handler code here
    core.handler.on_thread_init();

    let mut events = Events::with_capacity(EVENT_CAPACITY);
    let timeout = if polling { Some(Duration::from_millis(0)) } else { None };

    loop {
        if let Err(err) = poll.poll(&mut events, timeout) {
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }

            // A broken poll leaves every hosted endpoint dead in the water
            fatality(&core, &format!("Reactor poll failed: {}", err));
        }

        if core.stopping.load(Ordering::Acquire) {
            break;
        }

        for event in events.iter() {
            if event.token() == WAKER_TOKEN {
                continue;
            }

            let source = lock(&core.sources).get(&event.token().0).cloned();

            if let Some(source) = source {
                source.on_ready(
                    event.is_readable() || event.is_read_closed(),
                    event.is_writable() || event.is_write_closed(),
                );
            }
        }

        if polling {
            core.handler.on_idle();
        }
    }

    core.handler.on_thread_cleanup();
}

fn worker_loop(core: Arc<Core>) {
    IN_POOL.with(|flag| flag.set(true));
    core.handler.on_thread_init();

    while let Some(task) = core.queue.pop(&core.stopping) {
        // A panicking task must not take the worker down with it
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            core.handler.on_error(0, "task", "Worker task panicked");
            logging::error!(core.log, "worker task panicked"; "context" => "worker");
        }
    }

    core.handler.on_thread_cleanup();
}

/// Unrecoverable reactor fault: notify and terminate the process.
fn fatality(core: &Core, message: &str) -> ! {
    logging::error!(core.log, "fatal reactor fault"; "context" => "fatality", "message" => message);
    core.handler.on_error(-1, "fatal", message);
    process::abort()
}

#[inline]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
