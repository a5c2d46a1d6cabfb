//! A lifetime lock kept as a member of the object it protects.
//!
//! The observer lives on the main thread's stack. Event sources get weak
//! handles to it, run on plain `'static` threads, and keep firing until the
//! observer goes away.
use std::marker::PhantomPinned;
use std::pin::{pin, Pin};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use life_lock::{LifetimeLock, Weak};
use tracing_subscriber::EnvFilter;

struct Observer {
    lock: LifetimeLock,
    events: AtomicUsize,
    _pinned: PhantomPinned,
}

impl Observer {
    fn new() -> Self {
        Observer {
            lock: LifetimeLock::new(),
            events: AtomicUsize::new(0),
            _pinned: PhantomPinned,
        }
    }

    fn start(self: Pin<&mut Self>) {
        let this = unsafe { self.get_unchecked_mut() };
        let object = NonNull::from(&*this);
        // SAFETY: we are pinned and `Drop` destroys the lock before any
        // field goes away.
        unsafe { Pin::new_unchecked(&mut this.lock).attach(object) };
    }

    fn subscribe(&self) -> Weak<Observer> {
        unsafe { self.lock.derive_weak(NonNull::from(self)) }
    }

    fn on_event(&self) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        // First thing, so no callback sees a half-dropped observer.
        unsafe { Pin::new_unchecked(&mut self.lock) }.destroy();
        tracing::info!(
            events = self.events.load(Ordering::Relaxed),
            "observer dropped"
        );
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let sources = {
        let mut observer = pin!(Observer::new());
        observer.as_mut().start();

        let sources: Vec<_> = (0..4)
            .map(|source| {
                let observer = observer.subscribe();
                thread::spawn(move || {
                    let mut fired = 0_usize;
                    while let Some(observer) = observer.upgrade() {
                        observer.on_event();
                        fired += 1;
                        thread::sleep(Duration::from_micros(50));
                    }
                    tracing::info!(source, fired, "observer gone, stopping");
                    fired
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(200));
        sources
    };

    let fired: usize = sources
        .into_iter()
        .map(|source| source.join().unwrap_or(0))
        .sum();
    tracing::info!(fired, "all sources stopped");
}
