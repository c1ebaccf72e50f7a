//! Task and execution management
//!
//! This module provides the [EventLoop]: the object that owns the timer queue,
//! the readiness watcher and every spawned task, and that drives them all on
//! the calling thread. There is no global loop; create one with
//! [EventLoop::new] (or [EventLoop::builder]) and hand clones of it to the
//! tasks that need it. Clones are cheap and all refer to the same loop.
//!
//! Tasks are plain futures. The loop polls one task at a time and a task only
//! gives control back at an `.await` that suspends it, so no task is ever
//! interrupted half-way through a statement.
//!
//! # Example
//!
//! ```
//! use coloop::EventLoop;
//! use std::time::Duration;
//!
//! let lp = EventLoop::new();
//! let sleeper = {
//!     let lp = lp.clone();
//!     lp.clone().spawn(async move {
//!         lp.wait(Duration::from_millis(10)).await;
//!         Ok("Hello")
//!     })
//! };
//! let greeting = lp.spawn(async { Ok("world!") });
//!
//! assert_eq!(greeting.join().unwrap(), "world!");
//! assert_eq!(sleeper.join().unwrap(), "Hello");
//! ```
//!
//! # Running the loop
//!
//! Nothing spawned runs until the loop is driven, either by
//! [EventLoop::block_on] (or [Evaluation::join], which is built on it) to wait
//! for one result, or by [EventLoop::run] to run every task to completion.
//! These entry points must not be called from inside a task:
//!
//! ```
//! use coloop::EventLoop;
//!
//! let lp = EventLoop::new();
//! let inner = lp.clone();
//! let nested = lp.block_on(async move { inner.block_on(async { 1 }).is_err() });
//! assert!(nested.unwrap());
//! ```
use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    future::Future,
    pin::Pin,
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    task::{Context, Poll, Wake, Waker},
    time::Duration,
};

use log::trace;
use slab::Slab;

use crate::{
    builder::Builder,
    clock::Clock,
    error::{Error, Result},
    evaluation::{Driver, EvalState, Evaluation},
    futures::manual::Manual,
    reactor::ReadinessWatcher,
    timer::TimerQueue,
};

type RunQueue = Arc<Mutex<VecDeque<usize>>>;

struct TaskId {
    id: usize,
    queued: AtomicBool,
    run_q: RunQueue,
}

impl Wake for TaskId {
    fn wake(self: Arc<TaskId>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<TaskId>) {
        if !self.queued.swap(true, Ordering::Relaxed) {
            self.run_q
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(self.id);
        }
    }
}

/// Per-task state reachable from the futures the task is awaiting.
pub(crate) struct TaskCell {
    id: Arc<TaskId>,
    pub(crate) waker: Waker,
    pub(crate) manual: RefCell<Manual>,
}

struct Task {
    cell: Rc<TaskCell>,
    future: Pin<Box<dyn Future<Output = ()>>>,
}

/// Identifies a hook registered with [EventLoop::on_error].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookId(usize);

type ErrorHook = Rc<dyn Fn(&Error)>;

pub(crate) struct Inner {
    name: String,
    log_uncaught_errors: bool,
    pub(crate) clock: Clock,
    pub(crate) timers: RefCell<TimerQueue>,
    pub(crate) watcher: RefCell<ReadinessWatcher>,
    tasks: RefCell<Slab<Option<Task>>>,
    run_q: RunQueue,
    current: RefCell<Option<Rc<TaskCell>>>,
    hooks: RefCell<Slab<ErrorHook>>,
    running: Cell<bool>,
    // Bumped by `stop`; slab ids taken before a bump are stale.
    generation: Cell<u64>,
}

/// The event loop.
///
/// See the [module-level documentation](self) for more information.
#[derive(Clone)]
pub struct EventLoop {
    pub(crate) inner: Rc<Inner>,
}

struct RunningGuard<'a>(&'a Cell<bool>);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

pub(crate) const STOPPED: &str = "event loop stopped";

const NOTHING_TO_WAIT_FOR: &str = "Infinitely running event loop detected: there are no \
                                   pending timers or watched descriptors to wait for";

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    pub fn new() -> Self {
        Builder::default().build()
    }

    /// Start configuring a new loop.
    pub fn builder() -> Builder {
        Builder::default()
    }

    pub(crate) fn from_builder(builder: Builder) -> Self {
        let mut hooks = Slab::new();
        for hook in builder.hooks {
            hooks.insert(hook);
        }

        Self {
            inner: Rc::new(Inner {
                name: builder.name,
                log_uncaught_errors: builder.log_uncaught_errors,
                clock: Clock,
                timers: RefCell::new(TimerQueue::new()),
                watcher: RefCell::new(ReadinessWatcher::new()),
                tasks: RefCell::new(Slab::new()),
                run_q: Arc::new(Mutex::new(VecDeque::new())),
                current: RefCell::new(None),
                hooks: RefCell::new(hooks),
                running: Cell::new(false),
                generation: Cell::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Spawn `body` as a new task and return its [Evaluation].
    ///
    /// The task is armed with a zero-delay timer: it starts on the next turn
    /// of the loop, never inline, so the handle is always returned before the
    /// body runs.
    pub fn spawn<F, T>(&self, body: F) -> Evaluation<T>
    where
        F: Future<Output = Result<T>> + 'static,
        T: 'static,
    {
        self.spawn_with(body, ())
    }

    /// Like [EventLoop::spawn], attaching immutable `data` to the evaluation.
    pub fn spawn_with<F, T, D>(&self, body: F, data: D) -> Evaluation<T, D>
    where
        F: Future<Output = Result<T>> + 'static,
        T: 'static,
        D: 'static,
    {
        let (id, cell) = self.inner.insert_task();
        let state = Rc::new(EvalState::new(data, Some(cell.clone())));
        let driver = Driver::new(body, state.clone(), Rc::downgrade(&self.inner));

        self.inner.start_task(id, cell, Box::pin(driver));

        Evaluation::new(state, Rc::downgrade(&self.inner))
    }

    /// Run `body` inline on the current task and return an evaluation that is
    /// already concluded with its outcome.
    pub async fn call<F, T>(&self, body: F) -> Evaluation<T>
    where
        F: Future<Output = Result<T>>,
        T: 'static,
    {
        self.call_with(body, ()).await
    }

    /// Like [EventLoop::call], attaching immutable `data` to the evaluation.
    pub async fn call_with<F, T, D>(&self, body: F, data: D) -> Evaluation<T, D>
    where
        F: Future<Output = Result<T>>,
        T: 'static,
        D: 'static,
    {
        let outcome = body.await;

        if let Err(e) = &outcome {
            self.inner.report_uncaught(e);
        }

        Evaluation::concluded(outcome, data, Rc::downgrade(&self.inner))
    }

    /// Synchronous counterpart of [EventLoop::call]: drive the loop until
    /// `body` has finished and return its concluded evaluation.
    pub fn call_and_block<F, T>(&self, body: F) -> Result<Evaluation<T>>
    where
        F: Future<Output = Result<T>> + 'static,
        T: 'static,
    {
        self.call_and_block_with(body, ())
    }

    /// Like [EventLoop::call_and_block], attaching immutable `data` to the
    /// evaluation.
    pub fn call_and_block_with<F, T, D>(&self, body: F, data: D) -> Result<Evaluation<T, D>>
    where
        F: Future<Output = Result<T>> + 'static,
        T: 'static,
        D: 'static,
    {
        let lp = self.clone();
        self.block_on(async move { lp.call_with(body, data).await })
    }

    /// Drive the loop until `fut` completes and return its output.
    ///
    /// Fails if the loop is already running, if the readiness wait fails, or
    /// if every task is suspended with nothing left that could resume it.
    pub fn block_on<F>(&self, fut: F) -> Result<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let _guard = self.enter()?;
        let generation = self.inner.generation.get();

        let slot = Rc::new(RefCell::new(None));
        let slot2 = slot.clone();

        let (id, cell) = self.inner.insert_task();
        self.inner.start_task(
            id,
            cell,
            Box::pin(async move {
                *slot2.borrow_mut() = Some(fut.await);
            }),
        );

        loop {
            self.inner.run_ready();

            if let Some(value) = slot.borrow_mut().take() {
                return Ok(value);
            }

            // The root task went down with a `stop` and `id` may be reused.
            if self.inner.generation.get() != generation {
                return Err(Error::cancelled(STOPPED));
            }

            if let Err(e) = self.inner.turn() {
                self.inner.remove_task(id);
                return Err(e);
            }
        }
    }

    /// Run the loop until every spawned task has finished.
    pub fn run(&self) -> Result<()> {
        let _guard = self.enter()?;

        loop {
            self.inner.run_ready();

            if self.inner.tasks.borrow().is_empty() {
                return Ok(());
            }

            self.inner.turn()?;
        }
    }

    /// Drop every pending task and forget all timers and watches. Pending
    /// evaluations conclude as cancelled.
    ///
    /// When called from a task, that task is dropped as well once it next
    /// suspends. Tasks spawned after the call are unaffected.
    ///
    /// Tasks usually hold clones of the loop, so a loop dropped with tasks
    /// still pending is kept alive by them. Call `stop` to release it.
    pub fn stop(&self) {
        self.inner.generation.set(self.inner.generation.get() + 1);
        let tasks = std::mem::take(&mut *self.inner.tasks.borrow_mut());
        let timers = self.inner.timers.borrow_mut().clear();
        let watches = self.inner.watcher.borrow_mut().clear();

        self.inner
            .run_q
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        trace!(
            "{}: stopping with {} task(s), {} timer(s), {} watch(es)",
            self.inner.name,
            tasks.len(),
            timers.len(),
            watches.len()
        );

        drop(timers);
        drop(watches);
        drop(tasks);
    }

    /// Register a hook called with every error a task body returns.
    pub fn on_error(&self, hook: impl Fn(&Error) + 'static) -> HookId {
        HookId(self.inner.hooks.borrow_mut().insert(Rc::new(hook)))
    }

    /// Remove a hook. Returns whether it was registered.
    pub fn off_error(&self, id: HookId) -> bool {
        self.inner.hooks.borrow_mut().try_remove(id.0).is_some()
    }

    /// Number of tasks that have not finished yet.
    pub fn pending_tasks(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    fn enter(&self) -> Result<RunningGuard<'_>> {
        if self.inner.running.replace(true) {
            return Err(Error::protocol("event loop is already running"));
        }

        Ok(RunningGuard(&self.inner.running))
    }
}

impl Inner {
    fn insert_task(&self) -> (usize, Rc<TaskCell>) {
        let id = self.tasks.borrow_mut().insert(None);
        let task_id = Arc::new(TaskId {
            id,
            queued: AtomicBool::new(false),
            run_q: self.run_q.clone(),
        });

        let cell = Rc::new(TaskCell {
            waker: Waker::from(task_id.clone()),
            id: task_id,
            manual: RefCell::new(Manual::Idle),
        });

        (id, cell)
    }

    fn start_task(&self, id: usize, cell: Rc<TaskCell>, future: Pin<Box<dyn Future<Output = ()>>>) {
        let waker = cell.waker.clone();

        if let Some(slot) = self.tasks.borrow_mut().get_mut(id) {
            *slot = Some(Task { cell, future });
        }

        self.timers
            .borrow_mut()
            .schedule(waker, Some(Duration::ZERO), self.clock.now());
    }

    fn remove_task(&self, id: usize) {
        let task = self.tasks.borrow_mut().try_remove(id);
        drop(task);
    }

    pub(crate) fn current_task(&self) -> Option<Rc<TaskCell>> {
        self.current.borrow().clone()
    }

    /// Poll every task in the run queue, including those woken while doing so.
    fn run_ready(&self) {
        loop {
            let Some(id) = self
                .run_q
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
            else {
                return;
            };

            let task = match self.tasks.borrow_mut().get_mut(id) {
                Some(slot) => slot.take(),
                None => None,
            };

            let Some(mut task) = task else {
                continue;
            };

            task.cell.id.queued.store(false, Ordering::Relaxed);
            trace!("{}: polling task {}", self.name, id);

            *self.current.borrow_mut() = Some(task.cell.clone());
            let generation = self.generation.get();
            let waker = task.cell.waker.clone();
            let mut cx = Context::from_waker(&waker);
            let res = task.future.as_mut().poll(&mut cx);
            *self.current.borrow_mut() = None;

            if self.generation.get() != generation {
                trace!("{}: task {} stopped while running", self.name, id);
                drop(task);
                continue;
            }

            match res {
                Poll::Ready(()) => {
                    trace!("{}: task {} finished", self.name, id);
                    self.tasks.borrow_mut().try_remove(id);
                    drop(task);
                }
                Poll::Pending => {
                    if let Some(slot) = self.tasks.borrow_mut().get_mut(id) {
                        *slot = Some(task);
                    }
                }
            }
        }
    }

    /// One turn of the loop: fire due timers, or block on readiness until the
    /// next timer is due.
    fn turn(&self) -> Result<()> {
        let wait = self.timers.borrow().waiting_time(&self.clock);

        match wait {
            Some(Duration::ZERO) => {
                let n = self.timers.borrow_mut().process_pending(self.clock.now());
                trace!("{}: fired {} timer(s)", self.name, n);
            }
            _ if wait.is_some() || self.watcher.borrow().watches() => {
                let n = self.watcher.borrow_mut().process_ready_in(wait)?;
                trace!("{}: {} descriptor wake-up(s)", self.name, n);
            }
            _ => return Err(Error::protocol(NOTHING_TO_WAIT_FOR)),
        }

        Ok(())
    }

    pub(crate) fn report_uncaught(&self, err: &Error) {
        if self.log_uncaught_errors {
            log::warn!("{}: task failed: {}", self.name, err);
        }

        let hooks: Vec<ErrorHook> = self.hooks.borrow().iter().map(|(_, h)| h.clone()).collect();

        for hook in hooks {
            hook(err);
        }
    }
}
