//! Manually reference-counted resources.
//!
//! Adapted from `alloc::sync::Arc`, with an optional destroy callback that
//! runs exactly once when the last handle is released, and an optional
//! re-entrant lock serialising count transitions.

use core::{
    borrow::Borrow,
    fmt::Debug,
    mem::ManuallyDrop,
    ops::Deref,
    panic::{RefUnwindSafe, UnwindSafe},
    ptr::NonNull,
};

use parking_lot::ReentrantMutex;

use crate::utils::*;

// ThreadSanitizer does not support memory fences. To avoid false positive
// reports in Resource use atomic loads for synchronization instead.
#[cfg(tsan)]
macro_rules! acquire {
    ($x:expr) => {
        $x.load(atomic::Acquire)
    };
}
#[cfg(not(tsan))]
macro_rules! acquire {
    ($_:expr) => {
        atomic::fence(atomic::Acquire)
    };
}

type DestroyFn<T> = Box<dyn FnOnce(&T) + Send>;

/// How count transitions of a [`Resource`] are serialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locking {
    /// Bare atomic counting.
    #[default]
    None,
    /// Count transitions and the destroy callback run under a re-entrant
    /// lock, so the releasing thread may nest grabs and releases of other
    /// handles while tearing down.
    Reentrant,
}

/// Outcome of [`Resource::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Other handles remain.
    Retained { remaining: usize },
    /// This was the last handle; the destroy callback ran and the value is
    /// gone.
    Destroyed,
}

struct ResourceInner<T> {
    count: AtomicUsize,
    lock: Option<ReentrantMutex<()>>,
    destroy: UnsafeCell<Option<DestroyFn<T>>>,
    value: T,
}

/// A shared handle with an explicit init / grab / release lifecycle.
///
/// ```rust
/// # use compact_process::{Locking, Release, Resource};
/// let a = Resource::init(7, |v: &i32| println!("destroying {v}"), Locking::Reentrant);
/// let b = a.grab();
/// assert_eq!(a.release(), Release::Retained { remaining: 1 });
/// assert_eq!(b.release(), Release::Destroyed);
/// ```
#[must_use]
pub struct Resource<T>(NonNull<ResourceInner<T>>);

unsafe impl<T: Sync + Send> Send for Resource<T> {}
unsafe impl<T: Sync + Send> Sync for Resource<T> {}
impl<T: RefUnwindSafe> UnwindSafe for Resource<T> {}
impl<T: RefUnwindSafe> RefUnwindSafe for Resource<T> {}

impl<T> Resource<T> {
    /// Creates a resource with a reference count of one.
    pub fn init<F>(value: T, destroy: F, locking: Locking) -> Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        Self::with_parts(value, Some(Box::new(destroy)), locking)
    }

    /// Creates a resource without a destroy callback or lock.
    pub fn new(value: T) -> Self {
        Self::with_parts(value, None, Locking::None)
    }

    fn with_parts(value: T, destroy: Option<DestroyFn<T>>, locking: Locking) -> Self {
        let inner = Box::new(ResourceInner {
            count: AtomicUsize::new(1),
            lock: match locking {
                Locking::None => None,
                Locking::Reentrant => Some(ReentrantMutex::new(())),
            },
            destroy: UnsafeCell::new(destroy),
            value,
        });
        Self(Box::leak(inner).into())
    }

    #[inline]
    fn inner(&self) -> &ResourceInner<T> {
        unsafe { self.0.as_ref() }
    }

    /// Adds a reference and returns a handle to the same value.
    pub fn grab(&self) -> Self {
        let inner = self.inner();
        let _guard = inner.lock.as_ref().map(ReentrantMutex::lock);
        // Relaxed is enough: holding `self` already keeps the value alive,
        // and handing the new handle to another thread synchronises on its
        // own.
        let old_count = inner.count.fetch_add(1, atomic::Relaxed);

        if old_count > usize::MAX / 2 {
            panic!("reference count overflow");
        }

        Self(self.0)
    }

    /// Drops this reference. The last release runs the destroy callback
    /// and frees the value.
    pub fn release(self) -> Release {
        let mut this = ManuallyDrop::new(self);
        unsafe { this.release_ref() }
    }

    /// # Safety
    ///
    /// Must be called at most once per handle, and the handle must not be
    /// used afterwards.
    unsafe fn release_ref(&mut self) -> Release {
        let inner = self.inner();
        let guard = inner.lock.as_ref().map(ReentrantMutex::lock);
        let old_count = inner.count.fetch_sub(1, atomic::Release);
        assert_ne!(old_count, 0, "released a resource with no references left");
        if old_count != 1 {
            return Release::Retained {
                remaining: old_count - 1,
            };
        }
        acquire!(inner.count);

        // The count reached zero, nobody else can observe the slot.
        if let Some(destroy) = unsafe { with_cell_mut(&inner.destroy, Option::take) } {
            destroy(&inner.value);
        }
        drop(guard);

        let _ = unsafe { Box::from_raw(self.0.as_ptr()) };
        Release::Destroyed
    }

    /// Current number of handles.
    #[inline]
    pub fn ref_count(&self) -> usize {
        self.inner().count.load(atomic::Acquire)
    }

    #[inline]
    pub fn is_thread_safe(&self) -> bool {
        self.inner().lock.is_some()
    }

    /// Returns `true` if both handles point at the same allocation.
    #[inline]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.0 == other.0
    }
}

impl<T> Deref for Resource<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.inner().value
    }
}

impl<T> Clone for Resource<T> {
    #[inline]
    fn clone(&self) -> Self {
        self.grab()
    }
}

impl<T> Drop for Resource<T> {
    #[inline]
    fn drop(&mut self) {
        unsafe {
            self.release_ref();
        }
    }
}

impl<T> Borrow<T> for Resource<T> {
    #[inline]
    fn borrow(&self) -> &T {
        self
    }
}

impl<T: Debug> Debug for Resource<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Resource")
            .field("refs", &self.ref_count())
            .field("thread_safe", &self.is_thread_safe())
            .field("value", &self.inner().value)
            .finish()
    }
}
