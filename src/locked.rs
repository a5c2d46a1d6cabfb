use core::fmt;
use core::mem::MaybeUninit;
use core::pin::{pin, Pin};
use core::ptr::{self, NonNull};

use crate::{LifetimeLock, Strong, WaitPolicy, Weak};

/// Optional value guarded by its own [`LifetimeLock`].
///
/// The value lives inline, so a `LockedValue` may sit on the stack or inside
/// another struct. Weak handles from [`get`](Self::get) may be sent to any
/// thread; [`reset`](Self::reset) and drop wait until no strong handle is
/// alive before running the value's destructor.
///
/// A value can only be placed through `Pin<&mut Self>`, so once it holds a
/// value it never moves again.
pub struct LockedValue<T> {
    slot: MaybeUninit<T>,
    lock: LifetimeLock,
}

impl<T> LockedValue<T> {
    /// Empty value.
    pub const fn new() -> Self {
        LockedValue {
            slot: MaybeUninit::uninit(),
            lock: LifetimeLock::new(),
        }
    }

    /// Heap-pinned value holding `value`.
    pub fn boxed(value: T) -> Pin<Box<Self>> {
        let mut this = Box::pin(LockedValue::new());
        this.as_mut().emplace(value);
        this
    }

    /// Stores `value`, resetting the previous one first.
    pub fn emplace(self: Pin<&mut Self>, value: T) {
        self.emplace_with(|| value)
    }

    /// Stores the result of `make`, resetting the previous value first.
    ///
    /// The previous value is gone before `make` runs.
    pub fn emplace_with<F>(self: Pin<&mut Self>, make: F)
    where
        F: FnOnce() -> T,
    {
        let this = unsafe { self.get_unchecked_mut() };
        this.reset_in_place(&WaitPolicy::DEFAULT);

        let object = NonNull::from(this.slot.write(make()));
        this.lock.attach_in_place(object);
    }

    pub fn has_value(&self) -> bool {
        self.lock.is_attached()
    }

    /// Weak handle to the value; never upgrades if there is none.
    pub fn get(&self) -> Weak<T> {
        unsafe { self.lock.derive_weak(self.slot_ptr()) }
    }

    /// Strong handle to the value, `None` when empty.
    pub fn get_strong(&self) -> Option<Strong<T>> {
        unsafe { self.lock.derive_strong(self.slot_ptr()) }
    }

    /// Owner-side access to the value.
    pub fn value(&self) -> Option<&T> {
        if self.has_value() {
            Some(unsafe { self.slot.assume_init_ref() })
        } else {
            None
        }
    }

    /// Pointer to the value, null when empty. Not tied to any handle.
    pub fn raw_ptr(&self) -> *const T {
        if self.has_value() {
            self.slot.as_ptr()
        } else {
            ptr::null()
        }
    }

    /// Waits until no strong handle is alive, then drops the value.
    pub fn reset(self: Pin<&mut Self>) {
        self.reset_with(&WaitPolicy::DEFAULT)
    }

    pub fn reset_with(self: Pin<&mut Self>, policy: &WaitPolicy) {
        unsafe { self.get_unchecked_mut() }.reset_in_place(policy)
    }

    /// Like [`reset`](Self::reset), but moves the value out instead of
    /// dropping it.
    pub fn take(self: Pin<&mut Self>) -> Option<T> {
        let this = unsafe { self.get_unchecked_mut() };
        if !this.lock.is_attached() {
            return None;
        }
        this.lock.destroy_in_place(&WaitPolicy::DEFAULT);
        Some(unsafe { this.slot.assume_init_read() })
    }

    fn reset_in_place(&mut self, policy: &WaitPolicy) {
        if !self.lock.is_attached() {
            return;
        }
        // The lock is no longer attached from here on, so a panicking
        // destructor cannot lead to a second drop.
        self.lock.destroy_in_place(policy);
        unsafe { self.slot.assume_init_drop() }
    }

    fn slot_ptr(&self) -> NonNull<T> {
        NonNull::from(&self.slot).cast()
    }
}

impl<T> Default for LockedValue<T> {
    fn default() -> Self {
        LockedValue::new()
    }
}

impl<T> Drop for LockedValue<T> {
    fn drop(&mut self) {
        self.reset_in_place(&WaitPolicy::DEFAULT)
    }
}

impl<T: fmt::Debug> fmt::Debug for LockedValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedValue")
            .field("value", &self.value())
            .field("lock", &self.lock)
            .finish()
    }
}

/// Runs `scope` with `value` locked on the current stack frame.
///
/// Handles from the scope may escape into other threads; the frame is not
/// left until every strong handle is gone, and the value is dropped right
/// after.
///
/// ```
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::thread;
///
/// let seen = life_lock::with_locked(AtomicU32::new(0), |counter| {
///     let weak = counter.get();
///     thread::spawn(move || {
///         if let Some(counter) = weak.upgrade() {
///             counter.fetch_add(1, Ordering::Relaxed);
///         }
///     })
///     .join()
///     .unwrap();
///     counter.value().map(|c| c.load(Ordering::Relaxed))
/// });
/// assert_eq!(seen, Some(1));
/// ```
pub fn with_locked<T, F, R>(value: T, scope: F) -> R
where
    F: FnOnce(Pin<&mut LockedValue<T>>) -> R,
{
    let mut locked = pin!(LockedValue::new());
    locked.as_mut().emplace(value);
    scope(locked)
}
