use crate::{
    Locking, Release, Resource,
    tests::utils::{Arc, Canary, thread},
};

fn destroyed(releases: impl IntoIterator<Item = Release>) -> usize {
    releases
        .into_iter()
        .filter(|release| *release == Release::Destroyed)
        .count()
}

#[cfg_attr(not(loom), test)]
pub fn test_resource_grab_release() {
    let canary = Arc::new(Canary::new());
    let inspector = canary.clone();
    let first = Resource::init(
        5u32,
        move |value| {
            assert_eq!(*value, 5);
            canary.hit();
        },
        Locking::None,
    );
    let grabbed = (0..3).map(|_| first.grab()).collect::<Vec<_>>();
    assert_eq!(first.ref_count(), 4);
    assert!(grabbed.iter().all(|handle| Resource::ptr_eq(handle, &first)));

    for (released, handle) in grabbed.into_iter().enumerate() {
        assert_eq!(
            handle.release(),
            Release::Retained {
                remaining: 3 - released
            }
        );
        assert_eq!(inspector.hits(), 0);
    }

    assert_eq!(*first, 5);
    assert_eq!(first.release(), Release::Destroyed);
    assert_eq!(inspector.hits(), 1);
}

#[cfg_attr(not(loom), test)]
pub fn test_resource_drop_releases() {
    let canary = Arc::new(Canary::new());
    let inspector = canary.clone();
    let a = Resource::init((), move |_| canary.hit(), Locking::None);
    let b = a.clone();
    assert_eq!(b.ref_count(), 2);
    drop(a);
    assert_eq!(inspector.hits(), 0);
    assert_eq!(b.ref_count(), 1);
    drop(b);
    assert_eq!(inspector.hits(), 1);
}

#[cfg_attr(not(loom), test)]
pub fn test_resource_without_callback() {
    let a = Resource::new(Arc::new(Canary::new()));
    let inspector = (*a).clone();
    let b = a.grab();
    assert!(!b.is_thread_safe());
    drop(a);
    assert_eq!(b.release(), Release::Destroyed);
    assert_eq!(inspector.hits(), 0);
}

#[cfg_attr(not(loom), test)]
pub fn test_resource_release_across_threads() {
    let canary = Arc::new(Canary::new());
    let inspector = canary.clone();
    let resource = Resource::init((), move |_| canary.hit(), Locking::None);
    let workers = (0..2)
        .map(|_| {
            let handle = resource.grab();
            thread::spawn(move || {
                let extra = handle.grab();
                drop(handle);
                extra.release()
            })
        })
        .collect::<Vec<_>>();
    let mine = resource.release();
    let theirs = workers
        .into_iter()
        .map(|worker| worker.join().unwrap())
        .collect::<Vec<_>>();

    assert_eq!(destroyed(theirs.into_iter().chain([mine])), 1);
    assert_eq!(inspector.hits(), 1);
}

#[cfg(not(loom))]
#[test]
fn test_resource_reentrant_teardown() {
    let canary = Arc::new(Canary::new());
    let inspector = canary.clone();
    let nested = Resource::init(1u8, move |_| canary.hit(), Locking::Reentrant);
    let keep = nested.grab();

    let outer = Resource::init(
        nested,
        |nested: &Resource<u8>| {
            let again = nested.grab();
            assert_eq!(again.release(), Release::Retained { remaining: 2 });
        },
        Locking::Reentrant,
    );
    assert!(outer.is_thread_safe());
    let second = outer.grab();
    drop(outer);
    assert_eq!(keep.ref_count(), 2);

    assert_eq!(second.release(), Release::Destroyed);
    assert_eq!(keep.ref_count(), 1);
    assert_eq!(inspector.hits(), 0);

    drop(keep);
    assert_eq!(inspector.hits(), 1);
}

#[cfg(not(loom))]
#[test]
fn test_resource_many_threads() {
    let canary = Arc::new(Canary::new());
    let inspector = canary.clone();
    let resource = Resource::init(0u64, move |_| canary.hit(), Locking::Reentrant);
    thread::scope(|scope| {
        for _ in 0..8 {
            let handle = resource.grab();
            scope.spawn(move || {
                for _ in 0..1000 {
                    let extra = handle.grab();
                    assert_eq!(*extra, 0);
                    drop(extra);
                }
            });
        }
    });
    assert_eq!(resource.ref_count(), 1);
    assert_eq!(inspector.hits(), 0);
    drop(resource);
    assert_eq!(inspector.hits(), 1);
}
