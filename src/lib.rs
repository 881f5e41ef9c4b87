//! Thread-backed task batches with index-ordered results.
//!
//! A [`Process`] is a batch of tasks spawned together, one OS thread per
//! task. Each task writes its result at its own index. A batch can be
//! consumed three ways:
//!
//! - block on that batch with [`Process::sync`];
//! - block until every batch of a [`Registry`] has been joined with
//!   [`await_all`];
//! - get a [`ProcessFuture`] with [`Process::future`], or plain callbacks
//!   with [`Process::on_complete`].
//!
//! The free functions use a lazily built global registry that is never
//! dropped, so a program must call [`await_all`] before `main` returns if
//! its background processes and callbacks should run to completion.
//!
//! Underneath, process state is shared between the owner and the workers
//! through a manually reference-counted [`Resource`].
//!
//! # Usage
//!
//! ## Blocking join
//!
//! ```rust
//! let process = compact_process::spawn(4, |_, i| Ok(i * 10)).unwrap();
//! let results = process.sync();
//! assert_eq!(results.len(), 4);
//! assert_eq!(results[2], Ok(20));
//! ```
//!
//! ## Future
//!
//! ```rust
//! # futures_executor::block_on(async {
//! let process = compact_process::spawn(2, |_, i| Ok(i + 1)).unwrap();
//! let results = process.future().unwrap().await.unwrap();
//! assert!(results.is_success());
//! # });
//! ```
//!
//! ## Registry-wide join
//!
//! ```rust
//! use std::sync::{
//!     Arc,
//!     atomic::{AtomicUsize, Ordering},
//! };
//!
//! let counter = Arc::new(AtomicUsize::new(0));
//! for _ in 0..3 {
//!     let counter = counter.clone();
//!     compact_process::spawn(2, move |_, _| {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!         Ok(())
//!     })
//!     .unwrap();
//! }
//! compact_process::await_all();
//! assert_eq!(counter.load(Ordering::SeqCst), 6);
//! ```
//!
//! # Failures
//!
//! A task returning `Err` or panicking leaves a [`TaskError`] in its slot;
//! siblings keep running. [`Process::sync`] returns every slot, while the
//! future and `on_fail` callback report the lowest failing index as
//! [`Error::Task`].

mod completer;
mod config;
mod error;
mod process;
mod registry;
mod resource;
mod shell;
mod utils;

pub use crate::{
    completer::{Completer, Completion, completer},
    config::Config,
    error::{Error, TaskError},
    process::{Process, ProcessFuture, ProcessId, Results, Runtime, TaskResult},
    registry::Registry,
    resource::{Locking, Release, Resource},
};

/// Spawns `count` tasks on the global registry. See [`Registry::spawn`].
pub fn spawn<T, F>(count: usize, task: F) -> Result<Process<T>, Error>
where
    T: Send + Sync + 'static,
    F: Fn(&Runtime<T>, usize) -> TaskResult<T> + Send + Sync + 'static,
{
    Registry::global().spawn(count, task)
}

/// Spawns a single task on the global registry.
pub fn spawn_one<T, F>(task: F) -> Result<Process<T>, Error>
where
    T: Send + Sync + 'static,
    F: Fn(&Runtime<T>) -> TaskResult<T> + Send + Sync + 'static,
{
    Registry::global().spawn_one(task)
}

/// Runs `command` through the shell on the global registry. See
/// [`Registry::spawn_shell`].
pub fn spawn_shell(command: impl Into<String>) -> Result<Process<i32>, Error> {
    Registry::global().spawn_shell(command)
}

/// Blocks until every process of the global registry has been joined and
/// returns the exit code.
pub fn await_all() -> i32 {
    Registry::global().await_all()
}

/// Sets the code returned by [`await_all`].
pub fn set_exit_code(code: i32) {
    Registry::global().set_exit_code(code);
}
