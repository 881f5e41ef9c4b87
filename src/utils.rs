#[cfg(not(loom))]
pub use core::sync::atomic::{self as _atomic, AtomicU8, AtomicUsize};
#[cfg(loom)]
pub use loom::sync::atomic::{self as _atomic, AtomicU8, AtomicUsize};

pub mod atomic {
    pub use super::_atomic::{Ordering::*, fence};
}

#[cfg(not(loom))]
pub use core::cell::UnsafeCell;
#[cfg(loom)]
pub use loom::cell::UnsafeCell;

/// # Safety
///
/// The caller must have exclusive access to the cell's content for the
/// duration of `f`.
#[inline]
pub unsafe fn with_cell_mut<T, R, F: FnOnce(&mut T) -> R>(cell: &UnsafeCell<T>, f: F) -> R {
    #[cfg(not(loom))]
    {
        f(unsafe { &mut *cell.get() })
    }
    #[cfg(loom)]
    {
        cell.with_mut(|ptr| f(unsafe { &mut *ptr }))
    }
}

/// Renders a caught panic payload.
pub fn panic_message(payload: &(dyn core::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
