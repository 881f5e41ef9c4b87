//! One-shot resolve/reject pairs.

use core::{
    fmt::Debug,
    pin::Pin,
    task::{Context, Poll, Waker},
};

use crate::{Error, resource::Resource, utils::*};

type Outcome<T> = Result<T, Error>;

const DONE: u8 = 0b01;
const LOCK: u8 = 0b10;

struct Slot<T> {
    state: AtomicU8,
    waker: UnsafeCell<Option<Waker>>,
    outcome: UnsafeCell<Option<Outcome<T>>>,
}

// `waker` is guarded by LOCK, `outcome` is written once before DONE and read
// only by the single `Completion` after it observes DONE.
unsafe impl<T: Send> Send for Slot<T> {}
unsafe impl<T: Send> Sync for Slot<T> {}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(0),
            waker: UnsafeCell::new(None),
            outcome: UnsafeCell::new(None),
        }
    }

    #[inline]
    fn is_settled(&self) -> bool {
        self.state.load(atomic::Acquire) & DONE != 0
    }

    /// Stores the outcome, then wakes the parked waker unless the waiting
    /// side holds the waker lock, in which case it observes DONE itself.
    ///
    /// # Safety
    ///
    /// Must be called at most once, by the completer side only.
    unsafe fn settle(&self, outcome: Outcome<T>) {
        unsafe { with_cell_mut(&self.outcome, |slot| *slot = Some(outcome)) };
        let prev = self.state.fetch_or(DONE | LOCK, atomic::AcqRel);
        if prev & LOCK == 0 {
            // LOCK stays set: the waker is never touched again.
            if let Some(waker) = unsafe { self.take_waker() } {
                waker.wake();
            }
        }
    }

    /// Parks `waker` unless the slot is already settled. Returns whether
    /// the outcome is ready to take.
    fn park(&self, waker: &Waker) -> bool {
        if self.state.fetch_or(LOCK, atomic::Acquire) & DONE != 0 {
            return true;
        }

        // Release LOCK even if cloning the waker unwinds.
        let unlock = UnlockGuard(&self.state);
        unsafe {
            with_cell_mut(&self.waker, |parked| {
                if !parked.as_ref().is_some_and(|old| old.will_wake(waker)) {
                    *parked = Some(waker.clone());
                }
            });
        }
        unlock.defuse();

        if self.state.fetch_and(!LOCK, atomic::AcqRel) & DONE == 0 {
            return false;
        }
        // Settled while we held LOCK, so the completer skipped the wake.
        drop(unsafe { self.take_waker() });
        self.state.fetch_or(LOCK, atomic::Release);
        true
    }

    /// Stops waiting for good; a later settle skips the wake.
    fn detach(&self) {
        if self.state.fetch_or(LOCK, atomic::Acquire) & LOCK == 0 {
            drop(unsafe { self.take_waker() });
        }
    }

    /// # Safety
    ///
    /// The caller must hold LOCK.
    #[inline]
    unsafe fn take_waker(&self) -> Option<Waker> {
        unsafe { with_cell_mut(&self.waker, Option::take) }
    }

    /// # Safety
    ///
    /// DONE must have been observed with acquire ordering, and the caller is
    /// the single consuming side.
    #[inline]
    unsafe fn take_outcome(&self) -> Option<Outcome<T>> {
        unsafe { with_cell_mut(&self.outcome, Option::take) }
    }
}

/// Settling side of a [`completer`] pair.
///
/// Dropping it unsettled rejects the completion with [`Error::Abandoned`].
#[must_use]
pub struct Completer<T>(Resource<Slot<T>>);

/// Consuming side of a [`completer`] pair.
///
/// # Cancellation safety
///
/// This future is cancellation safe. Polling it again after it yielded its
/// outcome panics.
#[must_use]
pub struct Completion<T> {
    slot: Resource<Slot<T>>,
    taken: bool,
}

/// Creates a connected `Completer` / `Completion` pair.
///
/// ```rust
/// # futures_executor::block_on(async {
/// let (completer, completion) = compact_process::completer();
/// std::thread::spawn(move || completer.resolve(42));
/// assert_eq!(completion.await.unwrap(), 42);
/// # });
/// ```
pub fn completer<T>() -> (Completer<T>, Completion<T>) {
    let slot = Resource::new(Slot::new());
    let completion = Completion {
        slot: slot.grab(),
        taken: false,
    };
    (Completer(slot), completion)
}

impl<T> Completer<T> {
    #[inline]
    pub fn resolve(self, value: T) {
        self.complete(Ok(value));
    }

    #[inline]
    pub fn reject(self, error: Error) {
        self.complete(Err(error));
    }

    pub fn complete(self, outcome: Outcome<T>) {
        unsafe { self.0.settle(outcome) };
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if !self.0.is_settled() {
            unsafe { self.0.settle(Err(Error::Abandoned)) };
        }
    }
}

impl<T> Completion<T> {
    /// Checks whether the completer side has settled.
    #[inline]
    pub fn is_settled(&self) -> bool {
        self.slot.is_settled()
    }

    fn take_outcome(&mut self) -> Outcome<T> {
        assert!(!self.taken, "`Completion` polled after it yielded its outcome");
        self.taken = true;
        unsafe { self.slot.take_outcome() }.unwrap_or(Err(Error::Abandoned))
    }
}

impl<T> Future for Completion<T> {
    type Output = Outcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.slot.park(cx.waker()) {
            Poll::Ready(self.take_outcome())
        } else {
            Poll::Pending
        }
    }
}

impl<T> Drop for Completion<T> {
    #[inline]
    fn drop(&mut self) {
        self.slot.detach();
    }
}

#[cfg(feature = "futures-core")]
impl<T> futures_core::FusedFuture for Completion<T> {
    #[inline]
    fn is_terminated(&self) -> bool {
        self.taken
    }
}

impl<T> Debug for Completer<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Completer")
            .field("settled", &self.0.is_settled())
            .finish()
    }
}

impl<T> Debug for Completion<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Completion")
            .field("settled", &self.is_settled())
            .field("taken", &self.taken)
            .finish()
    }
}

struct UnlockGuard<'a>(&'a AtomicU8);

impl UnlockGuard<'_> {
    #[inline]
    fn defuse(self) {
        core::mem::forget(self);
    }
}

impl Drop for UnlockGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.0.fetch_and(!LOCK, atomic::Release);
    }
}
