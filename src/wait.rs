use core::hint;
use core::time::Duration;
use std::thread;

/// How [`LifetimeLock::destroy_with`](crate::LifetimeLock::destroy_with)
/// waits for outstanding strong handles.
///
/// The waiter first polls `spin_limit` times, which covers the common case
/// of nobody holding a handle, then sleeps with exponential backoff from
/// `backoff_start` up to `backoff_cap` per sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    spin_limit: u32,
    backoff_start: Duration,
    backoff_cap: Duration,
}

impl WaitPolicy {
    /// 16384 spins, then sleeps from 1µs doubling up to 2^18µs (~0.26s).
    pub const DEFAULT: WaitPolicy = WaitPolicy {
        spin_limit: 0x4000,
        backoff_start: Duration::from_micros(1),
        backoff_cap: Duration::from_micros(1 << 18),
    };

    pub const fn new() -> Self {
        Self::DEFAULT
    }

    pub const fn spin_limit(mut self, spins: u32) -> Self {
        self.spin_limit = spins;
        self
    }

    /// Sets the first sleep and the longest single sleep. A `cap` shorter
    /// than `start` is raised to `start`.
    pub fn backoff(mut self, start: Duration, cap: Duration) -> Self {
        self.backoff_start = start;
        self.backoff_cap = cap.max(start);
        self
    }

    pub const fn spins(&self) -> u32 {
        self.spin_limit
    }

    pub const fn backoff_start(&self) -> Duration {
        self.backoff_start
    }

    pub const fn backoff_cap(&self) -> Duration {
        self.backoff_cap
    }

    /// Sleep lengths the waiter would use, in order.
    pub fn backoff_schedule(&self) -> impl Iterator<Item = Duration> {
        let cap = self.backoff_cap;
        let mut next = Some(self.backoff_start.min(cap));
        core::iter::from_fn(move || {
            let current = next?;
            next = Some(current.saturating_mul(2).min(cap));
            Some(current)
        })
    }

    /// Blocks until `busy` returns false.
    pub(crate) fn wait_while(&self, mut busy: impl FnMut() -> bool) -> Waited {
        let mut waited = Waited::default();

        while waited.spins < self.spin_limit {
            if !busy() {
                return waited;
            }
            waited.spins += 1;
            hint::spin_loop();
        }

        if !busy() {
            return waited;
        }
        tracing::debug!(
            spins = waited.spins,
            "strong handles still outstanding, backing off"
        );

        for pause in self.backoff_schedule() {
            thread::sleep(pause);
            waited.sleeps += 1;
            if !busy() {
                break;
            }
        }
        waited
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// What a wait cost, for logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Waited {
    pub(crate) spins: u32,
    pub(crate) sleeps: u32,
}
