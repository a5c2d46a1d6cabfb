//! Stress harness: receivers are torn down while sender threads keep
//! submitting to them through weak handles.
//!
//! Each receiver wants values whose hash ends in its own byte pattern.
//! Eight senders search for such values with a PCG generator and submit
//! them through upgraded weak handles until the receiver is full and gets
//! reset. A receiver reports any submission it sees after its lock was
//! destroyed.
//!
//! Run with `cargo run --release --example receiver -- [seconds]`, set
//! `RUST_LOG=debug` to see the lock back off.
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::pin::pin;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use life_lock::{LockedValue, Weak};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

const CAPACITY: usize = 32768;
const SENDERS: usize = 8;
const RECEIVERS: usize = 8;

static FAILURES: AtomicUsize = AtomicUsize::new(0);

/// M.E. O'Neill's permuted congruential generator, XSH RR variant.
struct Pcg32 {
    state: u64,
    inc: u64,
}

impl Pcg32 {
    fn new(seed: u64) -> Self {
        let mut rng = Pcg32 { state: seed, inc: 1 };
        rng.advance();
        rng
    }

    fn advance(&mut self) {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(self.inc);
    }

    fn next_u32(&mut self) -> u32 {
        let old = self.state;
        self.advance();
        let xorshifted = (((old >> 18) ^ old) >> 27) as u32;
        xorshifted.rotate_right((old >> 59) as u32)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct HashTest {
    pattern: u32,
}

impl HashTest {
    const MASK: u64 = 0xFF;

    fn new(pattern: u32) -> Self {
        HashTest {
            pattern: pattern & Self::MASK as u32,
        }
    }

    fn accepts(&self, value: u32) -> bool {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish() & Self::MASK == u64::from(self.pattern)
    }
}

struct Receiver {
    name: String,
    test: HashTest,
    items: Box<[AtomicU32]>,
    count: AtomicUsize,
}

impl Receiver {
    fn new(pattern: u32) -> Self {
        let test = HashTest::new(pattern);
        let name = format!("rcv/{:02x}", test.pattern);
        tracing::info!(%name, "created");
        Receiver {
            name,
            test,
            items: (0..CAPACITY).map(|_| AtomicU32::new(0)).collect(),
            count: AtomicUsize::new(0),
        }
    }

    fn full(&self) -> bool {
        self.count.load(Ordering::Relaxed) >= CAPACITY
    }

    /// Called from sender threads.
    fn submit(&self, item: u32) -> bool {
        let index = self.count.fetch_add(1, Ordering::Relaxed);
        match self.items.get(index) {
            Some(slot) => {
                slot.store(item, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        // The lock is destroyed by now, no sender can reach us.
        let submitted = self.count.swap(CAPACITY, Ordering::SeqCst);
        let checked = submitted.min(CAPACITY);
        let passed = self.items[..checked]
            .iter()
            .filter(|item| self.test.accepts(item.load(Ordering::Relaxed)))
            .count();
        tracing::info!(name = %self.name, submitted, passed, checked, "verifying");

        if passed < checked {
            FAILURES.fetch_add(1, Ordering::Relaxed);
            tracing::error!(name = %self.name, bad = checked - passed, "hash mismatch");
        }

        thread::sleep(Duration::from_millis(200));
        let late = self.count.load(Ordering::SeqCst) - CAPACITY;
        if late > 0 {
            FAILURES.fetch_add(1, Ordering::Relaxed);
            tracing::error!(name = %self.name, late, "received items after destruction");
        }
    }
}

struct Sender {
    receiver: Weak<Receiver>,
    test: HashTest,
    rng: Pcg32,
    attempts: usize,
    submits: usize,
}

impl Sender {
    fn new(receiver: Weak<Receiver>, seed: u64) -> Self {
        let test = match receiver.upgrade() {
            Some(receiver) => receiver.test,
            None => {
                tracing::warn!("receiver expired before the sender started");
                HashTest::default()
            }
        };
        Sender {
            receiver,
            test,
            rng: Pcg32::new(seed),
            attempts: 0,
            submits: 0,
        }
    }

    fn run(mut self) -> (usize, usize) {
        loop {
            let solution = loop {
                let candidate = self.rng.next_u32();
                self.attempts += 1;
                if self.test.accepts(candidate) {
                    break candidate;
                }
            };
            self.submits += 1;

            let Some(receiver) = self.receiver.upgrade() else {
                return (self.attempts, self.submits);
            };
            receiver.submit(solution);
        }
    }
}

fn run_receivers(seed: u64, until: Instant, totals: &Mutex<(usize, usize)>) {
    let mut rng = Pcg32::new(seed);

    while Instant::now() < until {
        let mut receiver = pin!(LockedValue::new());
        receiver.as_mut().emplace(Receiver::new(rng.next_u32()));

        let senders: Vec<_> = (0..SENDERS)
            .map(|_| {
                let sender = Sender::new(receiver.get(), u64::from(rng.next_u32()));
                thread::spawn(move || sender.run())
            })
            .collect();

        while receiver.value().map_or(false, |r| !r.full()) {
            thread::sleep(Duration::from_millis(100));
        }
        receiver.as_mut().reset();

        for sender in senders {
            match sender.join() {
                Ok((attempts, submits)) => {
                    let mut totals = totals.lock();
                    totals.0 += attempts;
                    totals.1 += submits;
                }
                Err(_) => {
                    FAILURES.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let seconds = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(10);
    let until = Instant::now() + Duration::from_secs(seconds);
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_nanos() as u64);

    let totals = Mutex::new((0, 0));
    let mut rng = Pcg32::new(seed);
    thread::scope(|s| {
        for _ in 0..RECEIVERS {
            let seed = u64::from(rng.next_u32());
            let totals = &totals;
            s.spawn(move || run_receivers(seed, until, totals));
        }
    });

    let (attempts, submits) = *totals.lock();
    let failures = FAILURES.load(Ordering::Relaxed);
    tracing::info!(attempts, submits, failures, "test completed");
    if failures > 0 {
        std::process::exit(1);
    }
}
