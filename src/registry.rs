//! Process-wide bookkeeping of outstanding processes.

use std::{
    fmt::Debug,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU64, Ordering},
        mpsc::{self, Receiver, Sender},
    },
    thread::{self, JoinHandle},
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::{
    Config, Error,
    process::{self, Process, ProcessId, Reap, Runtime, TaskResult},
};

pub(crate) enum Message {
    Reap(Box<dyn Reap>),
    Retire,
}

struct Manager {
    tx: Sender<Message>,
    handle: JoinHandle<()>,
}

#[derive(Debug)]
struct Entry {
    id: ProcessId,
    tasks: usize,
}

struct RegistryState {
    live: Vec<Entry>,
    manager: Option<Manager>,
    exit_code: i32,
    hooks_in_flight: usize,
}

struct RegistryInner {
    config: Config,
    next_id: AtomicU64,
    state: Mutex<RegistryState>,
    drained: Condvar,
}

/// Set of outstanding processes plus the manager thread that joins their
/// workers.
///
/// A process is registered from [`spawn`](Registry::spawn) until all of
/// its worker threads have been joined. [`await_all`](Registry::await_all)
/// blocks until the registry is empty. Dropping a `Registry` drains it.
///
/// ```rust
/// use compact_process::{Config, Registry};
///
/// let registry = Registry::new(Config::default());
/// let squares = registry.spawn(4, |_, i| Ok(i * i)).unwrap();
/// assert_eq!(registry.await_all(), 0);
/// assert_eq!(squares.sync()[3], Ok(9));
/// ```
pub struct Registry {
    inner: Arc<RegistryInner>,
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

impl Registry {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                next_id: AtomicU64::new(1),
                state: Mutex::new(RegistryState {
                    live: Vec::new(),
                    manager: None,
                    exit_code: 0,
                    hooks_in_flight: 0,
                }),
                drained: Condvar::new(),
            }),
        }
    }

    /// The process-wide registry, configured from the environment on first
    /// use. It lives in a static and is never dropped; drain it with
    /// [`await_all`](Registry::await_all) before exiting.
    pub fn global() -> &'static Registry {
        GLOBAL.get_or_init(|| Registry::new(Config::from_env()))
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Spawns `count` tasks, each on its own thread. Task `i` runs
    /// `task(&runtime, i)` and its return value lands at index `i` of the
    /// results.
    pub fn spawn<T, F>(&self, count: usize, task: F) -> Result<Process<T>, Error>
    where
        T: Send + Sync + 'static,
        F: Fn(&Runtime<T>, usize) -> TaskResult<T> + Send + Sync + 'static,
    {
        if count == 0 {
            return Err(Error::EmptyBatch);
        }
        let id = ProcessId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let reaper = {
            let mut state = self.inner.state.lock();
            let reaper = self.manager_sender(&mut state)?;
            state.live.push(Entry { id, tasks: count });
            reaper
        };
        debug!(process = %id, tasks = count, "spawning process");

        process::launch(id, count, task, reaper, &self.inner.config)
            .inspect_err(|_| self.inner.deregister(id))
    }

    /// Spawns a process with a single task.
    pub fn spawn_one<T, F>(&self, task: F) -> Result<Process<T>, Error>
    where
        T: Send + Sync + 'static,
        F: Fn(&Runtime<T>) -> TaskResult<T> + Send + Sync + 'static,
    {
        self.spawn(1, move |runtime, _| task(runtime))
    }

    /// Blocks until no process is outstanding and no completion callback is
    /// running, then joins the manager thread and returns the exit code.
    ///
    /// Must not be called from a task or a completion callback of this
    /// registry.
    pub fn await_all(&self) -> i32 {
        let mut state = self.inner.state.lock();
        while !state.live.is_empty() || state.hooks_in_flight > 0 {
            self.inner.drained.wait(&mut state);
        }
        let manager = state.manager.take();
        let exit_code = state.exit_code;
        drop(state);

        if let Some(Manager { tx, handle }) = manager {
            let _ = tx.send(Message::Retire);
            if handle.join().is_err() {
                error!("registry manager panicked");
            }
        }
        exit_code
    }

    /// Number of processes not yet joined.
    pub fn outstanding(&self) -> usize {
        self.inner.state.lock().live.len()
    }

    pub fn exit_code(&self) -> i32 {
        self.inner.state.lock().exit_code
    }

    /// Sets the code [`await_all`](Registry::await_all) returns.
    pub fn set_exit_code(&self, code: i32) {
        self.inner.state.lock().exit_code = code;
    }

    fn manager_sender(&self, state: &mut RegistryState) -> Result<Sender<Message>, Error> {
        if let Some(manager) = &state.manager {
            return Ok(manager.tx.clone());
        }
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name(format!("{}-manager", self.inner.config.thread_name))
            .spawn(move || inner.run_manager(rx))
            .map_err(Error::Manager)?;
        debug!("registry manager started");
        state.manager = Some(Manager {
            tx: tx.clone(),
            handle,
        });
        Ok(tx)
    }
}

impl RegistryInner {
    fn run_manager(self: Arc<Self>, rx: Receiver<Message>) {
        for message in rx {
            match message {
                Message::Reap(process) => self.reap(process),
                Message::Retire => break,
            }
        }
        debug!("registry manager retired");
    }

    fn reap(self: &Arc<Self>, process: Box<dyn Reap>) {
        let id = process.id();
        process.join_workers();

        // `joining` flips and the entry leaves the registry under the same
        // lock, so `await_all` never sees a joined process as live.
        let (hook, tasks) = {
            let mut state = self.state.lock();
            let hook = process.mark_joined();
            let tasks = state
                .live
                .iter()
                .position(|entry| entry.id == id)
                .map(|pos| state.live.remove(pos).tasks);
            if hook.is_some() {
                state.hooks_in_flight += 1;
            }
            (hook, tasks)
        };
        debug!(process = %id, ?tasks, "process joined");
        self.drained.notify_all();

        if let Some(hook) = hook {
            self.fire(id, hook);
        }
    }

    /// Runs a completion hook on its own thread, so a hook may spawn and
    /// join further processes while the manager keeps reaping.
    fn fire(self: &Arc<Self>, id: ProcessId, hook: Box<dyn FnOnce() + Send>) {
        let inner = Arc::clone(self);
        let hook = Arc::new(Mutex::new(Some(hook)));
        let pending = Arc::clone(&hook);
        let spawned = thread::Builder::new()
            .name(format!("{}-hook-{}", self.config.thread_name, id.0))
            .spawn(move || inner.run_hook(id, &pending));
        if let Err(err) = spawned {
            warn!(process = %id, %err, "no thread for the completion callback, running it on the manager");
            self.run_hook(id, &hook);
        }
    }

    fn run_hook(&self, id: ProcessId, hook: &Mutex<Option<Box<dyn FnOnce() + Send>>>) {
        let hook = hook.lock().take();
        if let Some(hook) = hook
            && panic::catch_unwind(AssertUnwindSafe(hook)).is_err()
        {
            error!(process = %id, "completion callback panicked");
        }
        self.state.lock().hooks_in_flight -= 1;
        self.drained.notify_all();
    }

    fn deregister(&self, id: ProcessId) {
        self.state.lock().live.retain(|entry| entry.id != id);
        self.drained.notify_all();
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.await_all();
    }
}

impl Debug for Registry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Registry")
            .field("live", &state.live)
            .field("manager", &state.manager.is_some())
            .field("exit_code", &state.exit_code)
            .finish()
    }
}
