use core::fmt;
use core::marker::PhantomPinned;
use core::pin::Pin;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::control::Release;
use crate::{Retainer, Strong, WaitPolicy, Weak};

/// Where a [`LifetimeLock`] is in its one-shot protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockState {
    /// Nothing attached yet.
    Uninitialized,
    /// Retaining an object; handles resolve.
    Active,
    /// Waiting for outstanding strong handles; only the destroying thread
    /// ever observes this.
    Destroying,
    /// Every handle derived from the last attachment is expired.
    Destroyed,
}

/// Hands out weak and strong handles to an object living anywhere (on the
/// stack, inside another struct) and blocks its destruction while any strong
/// handle is alive.
///
/// The lock itself holds the one strong reference that keeps the count
/// above zero. [`destroy`](Self::destroy) gives it up and spins on a flag
/// which the release of the very last strong handle clears. Once the count
/// has hit zero no weak handle can upgrade again.
///
/// The release action points back at the lock, so the lock is `!Unpin` and
/// its state-changing operations take `Pin<&mut Self>`.
pub struct LifetimeLock {
    retainer: Retainer,
    // Only meaningful while `state` is `Destroying`.
    flag: AtomicBool,
    state: LockState,
    _pinned: PhantomPinned,
}

unsafe fn clear_flag(flag: *const ()) {
    // Nothing may touch the lock after this store: the destroying thread
    // is free to return and deallocate it.
    unsafe { &*(flag as *const AtomicBool) }.store(false, Ordering::Release);
}

impl LifetimeLock {
    /// Uninitialized lock.
    pub const fn new() -> Self {
        LifetimeLock {
            retainer: Retainer::new(),
            flag: AtomicBool::new(false),
            state: LockState::Uninitialized,
            _pinned: PhantomPinned,
        }
    }

    /// Starts protecting `object`. A previous attachment is destroyed
    /// first, which may block.
    ///
    /// # Safety
    ///
    /// `object` must stay valid and in place until this lock is destroyed,
    /// either explicitly or by being dropped. It is shared with other
    /// threads through the derived handles, so it must be safe to access
    /// from them.
    pub unsafe fn attach<T: ?Sized>(self: Pin<&mut Self>, object: NonNull<T>) {
        unsafe { self.get_unchecked_mut() }.attach_in_place(object)
    }

    pub(crate) fn attach_in_place<T: ?Sized>(&mut self, object: NonNull<T>) {
        self.destroy_in_place(&WaitPolicy::DEFAULT);

        let flag = &self.flag as *const AtomicBool as *const ();
        // Sound as long as the lock is pinned, which every caller ensures.
        let strong = unsafe { Strong::with_release(object, Release::new(clear_flag, flag)) };
        self.retainer.attach_unchecked(strong);
        self.state = LockState::Active;
        tracing::trace!(object = ?object.cast::<()>(), "lifetime lock attached");
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn is_attached(&self) -> bool {
        self.state == LockState::Active
    }

    /// Strong references currently sharing the count, including the one
    /// the lock itself holds. Zero when not attached.
    pub fn strong_count(&self) -> usize {
        self.retainer.strong_count()
    }

    /// Weak handle to `object` tied to this lock. Empty when not attached.
    ///
    /// # Safety
    ///
    /// `object` must stay valid until this lock is destroyed; normally it is
    /// the object passed to [`attach`](Self::attach) or a part of it.
    pub unsafe fn derive_weak<T: ?Sized>(&self, object: NonNull<T>) -> Weak<T> {
        unsafe { self.retainer.derive_weak(object) }
    }

    /// Strong handle to `object` tied to this lock, `None` when not attached.
    ///
    /// # Safety
    ///
    /// Same as [`derive_weak`](Self::derive_weak).
    pub unsafe fn derive_strong<T: ?Sized>(&self, object: NonNull<T>) -> Option<Strong<T>> {
        unsafe { self.retainer.derive_strong(object) }
    }

    /// Expires every handle and waits until no strong handle is alive.
    ///
    /// Does nothing unless the lock is attached. Must not be called while
    /// the calling thread itself holds a strong handle from this lock: that
    /// never returns.
    pub fn destroy(self: Pin<&mut Self>) {
        self.destroy_with(&WaitPolicy::DEFAULT)
    }

    /// [`destroy`](Self::destroy) with a custom wait policy.
    pub fn destroy_with(self: Pin<&mut Self>, policy: &WaitPolicy) {
        unsafe { self.get_unchecked_mut() }.destroy_in_place(policy)
    }

    pub(crate) fn destroy_in_place(&mut self, policy: &WaitPolicy) {
        if self.state != LockState::Active {
            return;
        }

        // Hand the count over to a handle of our own so the release action
        // cannot fire before the flag is up.
        let this = NonNull::from(&*self);
        let temp = unsafe { self.retainer.derive_strong(this) };
        self.retainer.reset();

        self.state = LockState::Destroying;
        self.flag.store(true, Ordering::Release);
        drop(temp);

        let flag = &self.flag;
        let waited = policy.wait_while(|| flag.load(Ordering::Acquire));

        self.flag.store(false, Ordering::Relaxed);
        self.state = LockState::Destroyed;
        tracing::trace!(
            spins = waited.spins,
            sleeps = waited.sleeps,
            "lifetime lock destroyed"
        );
    }
}

impl Default for LifetimeLock {
    fn default() -> Self {
        LifetimeLock::new()
    }
}

impl Drop for LifetimeLock {
    fn drop(&mut self) {
        self.destroy_in_place(&WaitPolicy::DEFAULT)
    }
}

impl fmt::Debug for LifetimeLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifetimeLock")
            .field("state", &self.state)
            .field("strong_count", &self.strong_count())
            .finish()
    }
}
