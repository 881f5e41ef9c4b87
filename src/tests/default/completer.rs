use core::{
    pin::pin,
    task::{Context, Poll},
};

use futures_test::task::new_count_waker;

use crate::{
    Error, TaskError, completer,
    tests::utils::{Arc, Canary, thread},
};

#[cfg_attr(not(loom), test)]
pub fn test_completer_resolve_before_poll() {
    let (waker, counter) = new_count_waker();
    let mut cx = Context::from_waker(&waker);
    let (completer, completion) = completer::<u32>();
    completer.resolve(7);
    let mut rx = pin!(completion);
    assert!(rx.is_settled());
    assert!(matches!(rx.as_mut().poll(&mut cx), Poll::Ready(Ok(7))));
    assert_eq!(counter.get(), 0);
}

#[cfg_attr(not(loom), test)]
pub fn test_completer_wakes_once() {
    let (waker, counter) = new_count_waker();
    let mut cx = Context::from_waker(&waker);
    let (completer, completion) = completer::<u32>();
    let mut rx = pin!(completion);
    assert!(rx.as_mut().poll(&mut cx).is_pending());
    assert!(rx.as_mut().poll(&mut cx).is_pending());
    assert_eq!(counter.get(), 0);
    completer.resolve(11);
    assert_eq!(counter.get(), 1);
    assert!(matches!(rx.as_mut().poll(&mut cx), Poll::Ready(Ok(11))));
    assert_eq!(counter.get(), 1);
}

#[cfg_attr(not(loom), test)]
pub fn test_completer_reject() {
    let (waker, _counter) = new_count_waker();
    let mut cx = Context::from_waker(&waker);
    let (completer, completion) = completer::<u32>();
    let mut rx = pin!(completion);
    assert!(rx.as_mut().poll(&mut cx).is_pending());
    completer.reject(Error::Task {
        index: 1,
        source: TaskError::Cancelled,
    });
    assert!(matches!(
        rx.as_mut().poll(&mut cx),
        Poll::Ready(Err(Error::Task {
            index: 1,
            source: TaskError::Cancelled
        }))
    ));
}

#[cfg_attr(not(loom), test)]
pub fn test_completer_abandoned() {
    let (waker, counter) = new_count_waker();
    let mut cx = Context::from_waker(&waker);
    let (completer, completion) = completer::<u32>();
    let mut rx = pin!(completion);
    assert!(rx.as_mut().poll(&mut cx).is_pending());
    drop(completer);
    assert_eq!(counter.get(), 1);
    assert!(matches!(
        rx.as_mut().poll(&mut cx),
        Poll::Ready(Err(Error::Abandoned))
    ));
}

#[cfg_attr(not(loom), test)]
pub fn test_completion_dropped_first() {
    let canary = Arc::new(Canary::new());
    let (completer, completion) = completer::<Arc<Canary>>();
    drop(completion);
    completer.resolve(canary.clone());
    assert_eq!(Arc::strong_count(&canary), 1);
}

#[cfg_attr(not(loom), test)]
pub fn test_completion_polled_by_others() {
    let (waker_a, counter_a) = new_count_waker();
    let (waker_b, counter_b) = new_count_waker();

    let (completer, completion) = completer::<u32>();
    let mut rx = pin!(completion);

    let mut cx = Context::from_waker(&waker_a);
    assert!(rx.as_mut().poll(&mut cx).is_pending());

    let mut cx = Context::from_waker(&waker_b);
    assert!(rx.as_mut().poll(&mut cx).is_pending());

    completer.resolve(3);
    assert_eq!(counter_a.get(), 0);
    assert_eq!(counter_b.get(), 1);
    assert!(matches!(rx.as_mut().poll(&mut cx), Poll::Ready(Ok(3))));
}

#[cfg_attr(not(loom), test)]
pub fn test_completer_resolve_in_thread() {
    let (waker, _counter) = new_count_waker();
    let mut cx = Context::from_waker(&waker);
    let (completer, completion) = completer::<u32>();
    let worker = thread::spawn(move || completer.resolve(5));
    worker.join().unwrap();
    let mut rx = pin!(completion);
    assert!(matches!(rx.as_mut().poll(&mut cx), Poll::Ready(Ok(5))));
}

#[cfg_attr(not(loom), futures_test::test)]
pub async fn test_completer_await_background() {
    let (completer, completion) = completer::<u32>();
    thread::spawn(move || completer.resolve(42));
    assert_eq!(completion.await.unwrap(), 42);
}

#[cfg(not(loom))]
#[test]
#[should_panic(expected = "polled after it yielded its outcome")]
fn test_completion_poll_after_ready() {
    let (waker, _counter) = new_count_waker();
    let mut cx = Context::from_waker(&waker);
    let (completer, completion) = completer::<u32>();
    completer.resolve(1);
    let mut rx = pin!(completion);
    let _ = rx.as_mut().poll(&mut cx);
    let _ = rx.as_mut().poll(&mut cx);
}

#[cfg(all(not(loom), feature = "futures-core"))]
#[test]
fn test_completion_is_terminated() {
    use futures_core::FusedFuture;

    let (waker, _counter) = new_count_waker();
    let mut cx = Context::from_waker(&waker);
    let (completer, completion) = completer::<u32>();
    let mut rx = pin!(completion);
    assert!(!rx.is_terminated());
    completer.resolve(1);
    assert!(!rx.is_terminated());
    let _ = rx.as_mut().poll(&mut cx);
    assert!(rx.is_terminated());
}
