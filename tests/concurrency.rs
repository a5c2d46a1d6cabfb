use std::pin::pin;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use life_lock::{LifetimeLock, LockedValue, WaitPolicy};
use parking_lot::Mutex;

const WORKERS: usize = 8;

struct Counter {
    hits: AtomicUsize,
}

#[test]
fn no_increments_after_destroy() {
    let counter = Counter {
        hits: AtomicUsize::new(0),
    };
    let mut lock = pin!(LifetimeLock::new());
    unsafe { lock.as_mut().attach(NonNull::from(&counter)) };

    let workers: Vec<_> = (0..WORKERS)
        .map(|_| {
            let weak = unsafe { lock.derive_weak(NonNull::from(&counter)) };
            thread::spawn(move || {
                let mut successes = 0_usize;
                while let Some(counter) = weak.upgrade() {
                    counter.hits.fetch_add(1, Ordering::Relaxed);
                    successes += 1;
                }
                successes
            })
        })
        .collect();

    while counter.hits.load(Ordering::Relaxed) < 1000 {
        thread::yield_now();
    }
    lock.as_mut().destroy();
    let at_destroy = counter.hits.load(Ordering::Relaxed);
    assert!(at_destroy >= 1000);

    let successes: usize = workers
        .into_iter()
        .map(|worker| worker.join().unwrap())
        .sum();
    assert_eq!(successes, at_destroy);

    thread::sleep(Duration::from_millis(10));
    assert_eq!(counter.hits.load(Ordering::Relaxed), at_destroy);
}

/// Object which records whether anyone touched it after its destructor
/// started.
struct Sentinel {
    alive: AtomicBool,
    late_touches: Arc<AtomicUsize>,
}

impl Sentinel {
    fn touch(&self) {
        if !self.alive.load(Ordering::Acquire) {
            self.late_touches.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for Sentinel {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
        // Give a racing handle a chance to show up.
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn no_handle_observes_a_dropped_object() {
    for _ in 0..20 {
        let late_touches = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let mut value = LockedValue::boxed(Sentinel {
            alive: AtomicBool::new(true),
            late_touches: late_touches.clone(),
        });

        let workers: Vec<_> = (0..WORKERS)
            .map(|_| {
                let weak = value.get();
                let stop = stop.clone();
                thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        if let Some(sentinel) = weak.upgrade() {
                            sentinel.touch();
                            thread::yield_now();
                            sentinel.touch();
                        }
                    }
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(2));
        value.as_mut().reset();
        stop.store(true, Ordering::Relaxed);
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(late_touches.load(Ordering::SeqCst), 0);
    }
}

#[test]
fn destroy_returns_after_the_last_staggered_release() {
    let value = 0_u8;
    let released_at = Mutex::new(Vec::new());

    thread::scope(|s| {
        let mut lock = pin!(LifetimeLock::new());
        unsafe { lock.as_mut().attach(NonNull::from(&value)) };

        for delay in [5_u64, 15, 30, 45] {
            let strong = unsafe { lock.derive_strong(NonNull::from(&value)) }.unwrap();
            let released_at = &released_at;
            s.spawn(move || {
                thread::sleep(Duration::from_millis(delay));
                released_at.lock().push(Instant::now());
                drop(strong);
            });
        }

        let policy = WaitPolicy::new().backoff(Duration::from_micros(1), Duration::from_millis(2));
        lock.as_mut().destroy_with(&policy);
        let returned_at = Instant::now();

        let released_at = released_at.lock();
        assert_eq!(released_at.len(), 4);
        let last = released_at.iter().max().copied().unwrap();
        assert!(returned_at >= last);
        assert!(returned_at - last < Duration::from_millis(500));
    });
}

#[test]
fn upgrades_racing_destroy_either_succeed_or_expire() {
    for _ in 0..50 {
        let upgraded = AtomicUsize::new(0);
        let expired = AtomicUsize::new(0);
        let value = AtomicUsize::new(0);

        thread::scope(|s| {
            let mut lock = pin!(LifetimeLock::new());
            unsafe { lock.as_mut().attach(NonNull::from(&value)) };

            for _ in 0..4 {
                let weak = unsafe { lock.derive_weak(NonNull::from(&value)) };
                let (upgraded, expired) = (&upgraded, &expired);
                s.spawn(move || match weak.upgrade() {
                    Some(value) => {
                        value.fetch_add(1, Ordering::Relaxed);
                        upgraded.fetch_add(1, Ordering::Relaxed);
                    }
                    None => {
                        expired.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }

            lock.as_mut().destroy();
            // Every successful upgrade finished its work before destroy returned.
            assert_eq!(
                value.load(Ordering::Relaxed),
                upgraded.load(Ordering::Relaxed)
            );
        });

        assert_eq!(
            upgraded.load(Ordering::Relaxed) + expired.load(Ordering::Relaxed),
            4
        );
    }
}
