use core::ptr::NonNull;
use core::sync::atomic::{self, AtomicUsize, Ordering};

/// Same limit as `std::sync::Arc`, leaves room for racing increments
/// before the abort kicks in.
const MAX_REFCOUNT: usize = isize::MAX as usize;

/// One-shot action fired when the last strong reference goes away.
#[derive(Clone, Copy)]
pub(crate) struct Release {
    func: unsafe fn(*const ()),
    data: *const (),
}

impl Release {
    /// # Safety
    ///
    /// `func(data)` must be sound to call exactly once from any thread
    /// at the moment the strong count reaches zero.
    pub(crate) const unsafe fn new(func: unsafe fn(*const ()), data: *const ()) -> Self {
        Release { func, data }
    }
}

/// Shared bookkeeping behind every [`Strong`](crate::Strong) and
/// [`Weak`](crate::Weak) handle.
///
/// Strong references collectively own one weak reference, so the block
/// outlives the release action and is freed with the last weak handle.
pub(crate) struct ControlBlock {
    strong: AtomicUsize,
    weak: AtomicUsize,
    release: Release,
}

impl ControlBlock {
    /// Allocates a block with a single strong reference.
    pub(crate) fn allocate(release: Release) -> NonNull<Self> {
        let block = Box::new(ControlBlock {
            strong: AtomicUsize::new(1),
            weak: AtomicUsize::new(1),
            release,
        });
        NonNull::from(Box::leak(block))
    }

    /// Caller must already hold a strong reference.
    pub(crate) fn increment_strong(&self) {
        // Relaxed is fine: a new reference can only be formed from an
        // existing one, which keeps the count above zero.
        let old = self.strong.fetch_add(1, Ordering::Relaxed);
        if old > MAX_REFCOUNT {
            std::process::abort();
        }
    }

    /// Increments the strong count unless it already reached zero.
    pub(crate) fn try_increment_strong(&self) -> bool {
        let mut count = self.strong.load(Ordering::Relaxed);
        loop {
            if count == 0 {
                return false;
            }
            if count > MAX_REFCOUNT {
                std::process::abort();
            }
            match self.strong.compare_exchange_weak(
                count,
                count + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(old) => count = old,
            }
        }
    }

    pub(crate) fn increment_weak(&self) {
        let old = self.weak.fetch_add(1, Ordering::Relaxed);
        if old > MAX_REFCOUNT {
            std::process::abort();
        }
    }

    pub(crate) fn strong_count(&self) -> usize {
        self.strong.load(Ordering::Acquire)
    }

    /// Drops one strong reference, firing the release action on the last.
    ///
    /// # Safety
    ///
    /// `this` must point to a live block and the caller must own the strong
    /// reference being given up.
    pub(crate) unsafe fn release_strong(this: NonNull<Self>) {
        if unsafe { this.as_ref() }.strong.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        atomic::fence(Ordering::Acquire);

        let Release { func, data } = unsafe { this.as_ref() }.release;
        unsafe { func(data) };

        unsafe { Self::release_weak(this) };
    }

    /// Drops one weak reference, freeing the block on the last.
    ///
    /// # Safety
    ///
    /// `this` must point to a live block and the caller must own the weak
    /// reference being given up.
    pub(crate) unsafe fn release_weak(this: NonNull<Self>) {
        if unsafe { this.as_ref() }.weak.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        atomic::fence(Ordering::Acquire);
        drop(unsafe { Box::from_raw(this.as_ptr()) });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn bump(data: *const ()) {
        unsafe { &*(data as *const AtomicUsize) }.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn release_fires_once_on_last_strong() {
        let fired = AtomicUsize::new(0);
        let release = unsafe { Release::new(bump, &fired as *const AtomicUsize as *const ()) };
        let block = ControlBlock::allocate(release);

        unsafe { block.as_ref() }.increment_strong();
        unsafe { block.as_ref() }.increment_weak();
        assert_eq!(unsafe { block.as_ref() }.strong_count(), 2);

        unsafe { ControlBlock::release_strong(block) };
        assert_eq!(fired.load(Ordering::Relaxed), 0);
        unsafe { ControlBlock::release_strong(block) };
        assert_eq!(fired.load(Ordering::Relaxed), 1);

        // The weak reference we took keeps the block readable.
        assert_eq!(unsafe { block.as_ref() }.strong_count(), 0);
        assert!(!unsafe { block.as_ref() }.try_increment_strong());
        assert_eq!(fired.load(Ordering::Relaxed), 1);

        unsafe { ControlBlock::release_weak(block) };
    }

    #[test]
    fn upgrade_succeeds_while_alive() {
        let fired = AtomicUsize::new(0);
        let release = unsafe { Release::new(bump, &fired as *const AtomicUsize as *const ()) };
        let block = ControlBlock::allocate(release);

        assert!(unsafe { block.as_ref() }.try_increment_strong());
        assert_eq!(unsafe { block.as_ref() }.strong_count(), 2);

        unsafe { ControlBlock::release_strong(block) };
        unsafe { ControlBlock::release_strong(block) };
        assert_eq!(fired.load(Ordering::Relaxed), 1);
    }
}
