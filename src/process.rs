//! Task batches and their shared runtime state.

use std::{
    fmt::Debug,
    mem,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc::Sender,
    },
    thread::{self, JoinHandle},
};

use derive_more::{Deref, Display};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace, trace_span};

use crate::{
    Config, Error, TaskError,
    completer::{Completion, completer},
    registry::Message,
    resource::{Locking, Resource},
    utils::panic_message,
};

/// What a single task produces.
pub type TaskResult<T> = Result<T, TaskError>;

/// Future returned by [`Process::future`].
pub type ProcessFuture<T> = Completion<Results<T>>;

type Hook<T> = Box<dyn FnOnce(Result<Results<T>, Error>) + Send>;

/// Identifier of a process within its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display("#{_0}")]
pub struct ProcessId(pub(crate) u64);

/// Index-ordered results of a joined process.
///
/// Cloning is cheap; every clone shares the same slots.
#[derive(Debug, Deref)]
pub struct Results<T>(Arc<[TaskResult<T>]>);

impl<T> Clone for Results<T> {
    #[inline]
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Results<T> {
    fn collect(slots: Vec<Option<TaskResult<T>>>) -> Self {
        Self(
            slots
                .into_iter()
                .map(|slot| {
                    slot.unwrap_or_else(|| Err(TaskError::failed("worker exited without a result")))
                })
                .collect(),
        )
    }

    /// Lowest failing index and its error.
    pub fn first_failure(&self) -> Option<(usize, &TaskError)> {
        self.0
            .iter()
            .enumerate()
            .find_map(|(index, slot)| slot.as_ref().err().map(|err| (index, err)))
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.first_failure().is_none()
    }

    /// `Ok` with the results if every task succeeded, otherwise the lowest
    /// failing task as [`Error::Task`].
    pub fn outcome(&self) -> Result<Self, Error> {
        match self.first_failure() {
            Some((index, source)) => Err(Error::Task {
                index,
                source: source.clone(),
            }),
            None => Ok(self.clone()),
        }
    }
}

enum HookSlot<T> {
    Vacant,
    Bound(Hook<T>),
    Fired,
}

struct JoinState<T> {
    /// `Some` once every worker thread has been joined.
    results: Option<Results<T>>,
    hook: HookSlot<T>,
}

pub(crate) struct ProcessState<T> {
    id: ProcessId,
    count: usize,
    stop: AtomicBool,
    // Workers plus the spawning thread, which holds one slot until every
    // thread handle is recorded.
    outstanding: AtomicUsize,
    slots: Mutex<Vec<Option<TaskResult<T>>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    join: Mutex<JoinState<T>>,
    joined: Condvar,
    reaper: Sender<Message>,
}

/// Runtime handle shared by a process and its worker threads.
///
/// Every task receives a reference to it; it exposes the cooperative stop
/// flag.
pub struct Runtime<T>(Resource<ProcessState<T>>);

impl<T> Runtime<T> {
    #[inline]
    pub fn id(&self) -> ProcessId {
        self.0.id
    }

    /// Number of tasks in the process.
    #[inline]
    pub fn task_count(&self) -> usize {
        self.0.count
    }

    /// Whether a stop was requested. Tasks are expected to poll this and
    /// return early, typically with [`TaskError::Cancelled`].
    #[inline]
    pub fn should_stop(&self) -> bool {
        self.0.stop.load(Ordering::Acquire)
    }

    /// Asks every task of the process to stop.
    #[inline]
    pub fn request_stop(&self) {
        self.0.stop.store(true, Ordering::Release);
    }

    /// Number of live references: the owning process, each running worker
    /// and the manager while it joins.
    #[inline]
    pub fn ref_count(&self) -> usize {
        self.0.ref_count()
    }

    #[inline]
    fn grab(&self) -> Self {
        Self(self.0.grab())
    }
}

impl<T: Send + Sync + 'static> Runtime<T> {
    /// Gives up one `outstanding` slot; the last one hands the process to
    /// the registry manager.
    fn finish(&self) {
        if self.0.outstanding.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let id = self.id();
        if self.0.reaper.send(Message::Reap(Box::new(self.grab()))).is_err() {
            error!(process = %id, "registry manager is gone, process cannot join");
        }
    }
}

impl<T> Debug for Runtime<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.id())
            .field("tasks", &self.task_count())
            .field("stop", &self.should_stop())
            .finish()
    }
}

/// Bookkeeping the registry manager needs from a process, independent of
/// its result type.
pub(crate) trait Reap: Send {
    fn id(&self) -> ProcessId;

    /// Joins every worker thread.
    fn join_workers(&self);

    /// Publishes the results and flips `joining`. Returns the bound hook,
    /// ready to fire.
    fn mark_joined(&self) -> Option<Box<dyn FnOnce() + Send>>;
}

impl<T: Send + Sync + 'static> Reap for Runtime<T> {
    fn id(&self) -> ProcessId {
        self.0.id
    }

    fn join_workers(&self) {
        let handles = mem::take(&mut *self.0.threads.lock());
        for handle in handles {
            if handle.join().is_err() {
                error!(process = %self.0.id, "worker thread panicked outside its task");
            }
        }
    }

    fn mark_joined(&self) -> Option<Box<dyn FnOnce() + Send>> {
        let results = Results::collect(mem::take(&mut *self.0.slots.lock()));
        let mut state = self.0.join.lock();
        state.results = Some(results.clone());
        let hook = match mem::replace(&mut state.hook, HookSlot::Vacant) {
            HookSlot::Bound(hook) => {
                state.hook = HookSlot::Fired;
                Some(hook)
            }
            other => {
                state.hook = other;
                None
            }
        };
        drop(state);
        self.0.joined.notify_all();

        hook.map(|hook| Box::new(move || hook(results.outcome())) as Box<dyn FnOnce() + Send>)
    }
}

/// A batch of tasks spawned together.
///
/// Dropping a `Process` does not stop or detach its tasks; the registry
/// keeps tracking them until they are joined.
#[must_use]
pub struct Process<T> {
    runtime: Runtime<T>,
}

impl<T: Send + Sync + 'static> Process<T> {
    #[inline]
    pub fn id(&self) -> ProcessId {
        self.runtime.id()
    }

    #[inline]
    pub fn task_count(&self) -> usize {
        self.runtime.task_count()
    }

    #[inline]
    pub fn runtime(&self) -> &Runtime<T> {
        &self.runtime
    }

    /// Requests cooperative cancellation of every task.
    #[inline]
    pub fn stop(&self) {
        self.runtime.request_stop();
    }

    /// Checks whether every worker thread has been joined.
    pub fn is_joined(&self) -> bool {
        self.runtime.0.join.lock().results.is_some()
    }

    /// Blocks until every worker thread has been joined and returns the
    /// results. Never times out.
    pub fn sync(&self) -> Results<T> {
        let state = &self.runtime.0;
        let mut join = state.join.lock();
        loop {
            if let Some(results) = &join.results {
                return results.clone();
            }
            state.joined.wait(&mut join);
        }
    }

    /// Binds a future that resolves with the results once the process has
    /// joined, or rejects with the lowest failing task.
    ///
    /// A process accepts one completion binding; a second call returns
    /// [`Error::AlreadyBound`].
    pub fn future(&self) -> Result<ProcessFuture<T>, Error> {
        let (completer, completion) = completer();
        self.bind(Box::new(move |outcome| completer.complete(outcome)))?;
        Ok(completion)
    }

    /// Binds completion callbacks. Exactly one of them runs, on a thread of
    /// its own once the process has joined, or right away if it already
    /// has. Callbacks may spawn and `sync` further processes.
    ///
    /// Callbacks must not wait on the registry (`await_all`), since the
    /// registry waits for them.
    pub fn on_complete<D, F>(&self, on_done: D, on_fail: F) -> Result<(), Error>
    where
        D: FnOnce(Results<T>) + Send + 'static,
        F: FnOnce(Error) + Send + 'static,
    {
        self.bind(Box::new(move |outcome| match outcome {
            Ok(results) => on_done(results),
            Err(err) => on_fail(err),
        }))
    }

    fn bind(&self, hook: Hook<T>) -> Result<(), Error> {
        let mut join = self.runtime.0.join.lock();
        if !matches!(join.hook, HookSlot::Vacant) {
            return Err(Error::AlreadyBound(self.id()));
        }
        match join.results.clone() {
            Some(results) => {
                join.hook = HookSlot::Fired;
                drop(join);
                hook(results.outcome());
            }
            None => join.hook = HookSlot::Bound(hook),
        }
        Ok(())
    }
}

impl<T> Debug for Process<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.runtime.id())
            .field("tasks", &self.runtime.task_count())
            .field("joined", &self.runtime.0.join.lock().results.is_some())
            .finish()
    }
}

/// Starts `count` worker threads for an already registered process.
///
/// On a thread creation failure the launched workers are asked to stop and
/// joined before the error is returned.
pub(crate) fn launch<T, F>(
    id: ProcessId,
    count: usize,
    task: F,
    reaper: Sender<Message>,
    config: &Config,
) -> Result<Process<T>, Error>
where
    T: Send + Sync + 'static,
    F: Fn(&Runtime<T>, usize) -> TaskResult<T> + Send + Sync + 'static,
{
    let state = ProcessState {
        id,
        count,
        stop: AtomicBool::new(false),
        outstanding: AtomicUsize::new(count + 1),
        slots: Mutex::new((0..count).map(|_| None).collect()),
        threads: Mutex::new(Vec::with_capacity(count)),
        join: Mutex::new(JoinState {
            results: None,
            hook: HookSlot::Vacant,
        }),
        joined: Condvar::new(),
        reaper,
    };
    let locking = if config.thread_safe_handles {
        Locking::Reentrant
    } else {
        Locking::None
    };
    let runtime = Runtime(Resource::init(
        state,
        |state: &ProcessState<T>| trace!(process = %state.id, "process state released"),
        locking,
    ));

    let task = Arc::new(task);
    let mut threads = Vec::with_capacity(count);
    for index in 0..count {
        let mut builder = thread::Builder::new().name(format!("{}-{}-{index}", config.thread_name, id.0));
        if let Some(size) = config.stack_size {
            builder = builder.stack_size(size);
        }
        let worker = runtime.grab();
        let task = Arc::clone(&task);
        let spawned = builder.spawn(move || {
            run_task(&worker, index, &*task);
            worker.finish();
        });
        match spawned {
            Ok(handle) => threads.push(handle),
            Err(source) => {
                debug!(process = %id, index, %source, "worker launch failed, unwinding process");
                runtime.request_stop();
                for handle in threads {
                    let _ = handle.join();
                }
                return Err(Error::Spawn { index, source });
            }
        }
    }

    runtime.0.threads.lock().extend(threads);
    runtime.finish();
    Ok(Process { runtime })
}

fn run_task<T, F>(runtime: &Runtime<T>, index: usize, task: &F)
where
    F: Fn(&Runtime<T>, usize) -> TaskResult<T>,
{
    let _span = trace_span!("task", process = %runtime.id(), index).entered();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(runtime, index)))
        .unwrap_or_else(|payload| Err(TaskError::Panicked(panic_message(&*payload))));
    match &outcome {
        Ok(_) => trace!("task finished"),
        Err(err) => debug!(%err, "task failed"),
    }
    runtime.0.slots.lock()[index] = Some(outcome);
}
