use crate::utils::*;

#[cfg(not(loom))]
pub(super) use std::{sync::Arc, thread};
#[cfg(loom)]
pub(super) use loom::{sync::Arc, thread};

#[cfg(loom)]
pub(super) use super::loom::FutureTestExt;

/// Counts how many times a destroy callback or completion hook ran.
pub(super) struct Canary(AtomicUsize);

impl Canary {
    pub fn new() -> Self {
        Self(AtomicUsize::new(0))
    }

    pub fn hits(&self) -> usize {
        self.0.load(atomic::Acquire)
    }

    pub fn hit(&self) {
        self.0.fetch_add(1, atomic::AcqRel);
    }
}

#[cfg(not(loom))]
pub(super) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
