use core::fmt;
use core::marker::PhantomData;
use core::ops::Deref;
use core::ptr::{self, NonNull};

use crate::control::{ControlBlock, Release};
use crate::error::Expired;

/// Strong handle to an object kept alive by a lifetime lock or a box.
///
/// The pointer and the reference count are separate: several handles of
/// different types may share one count, so the object a `Strong` points at
/// is not necessarily the object the count is about.
pub struct Strong<T: ?Sized> {
    ptr: NonNull<T>,
    block: NonNull<ControlBlock>,
    _marker: PhantomData<T>,
}

// Same bounds as `Arc`: the object is shared between threads and a boxed
// one may be dropped by whichever thread lets go last.
unsafe impl<T: ?Sized + Send + Sync> Send for Strong<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for Strong<T> {}

impl<T> Strong<T> {
    /// Moves a boxed object under a fresh reference count. The box is
    /// dropped once the last strong handle is released.
    pub fn from_box(object: Box<T>) -> Self {
        unsafe fn drop_box<T>(data: *const ()) {
            drop(unsafe { Box::from_raw(data as *mut T) });
        }

        let ptr = NonNull::from(Box::leak(object));
        let release = unsafe { Release::new(drop_box::<T>, ptr.as_ptr() as *const ()) };
        Strong {
            ptr,
            block: ControlBlock::allocate(release),
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> Strong<T> {
    /// Creates a handle with its own count whose last release runs `release`.
    ///
    /// # Safety
    ///
    /// `ptr` must stay dereferenceable until `release` fires.
    pub(crate) unsafe fn with_release(ptr: NonNull<T>, release: Release) -> Self {
        Strong {
            ptr,
            block: ControlBlock::allocate(release),
            _marker: PhantomData,
        }
    }

    /// Takes over one strong reference already counted in `block`.
    ///
    /// # Safety
    ///
    /// The caller transfers ownership of one strong reference and `ptr`
    /// must stay dereferenceable for as long as that count is nonzero.
    pub(crate) unsafe fn from_counted(ptr: NonNull<T>, block: NonNull<ControlBlock>) -> Self {
        Strong {
            ptr,
            block,
            _marker: PhantomData,
        }
    }

    /// Gives up the handle, keeping its strong reference counted.
    pub(crate) fn into_block(this: Self) -> NonNull<ControlBlock> {
        let block = this.block;
        core::mem::forget(this);
        block
    }

    pub fn downgrade(this: &Self) -> Weak<T> {
        unsafe { this.block.as_ref() }.increment_weak();
        Weak {
            inner: Some((this.ptr, this.block)),
            _marker: PhantomData,
        }
    }

    /// Number of strong references sharing this handle's count.
    pub fn strong_count(this: &Self) -> usize {
        unsafe { this.block.as_ref() }.strong_count()
    }

    pub fn as_ptr(this: &Self) -> *const T {
        this.ptr.as_ptr()
    }

    /// True when both handles point at the same object through the same
    /// reference count.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        ptr::eq(this.ptr.as_ptr(), other.ptr.as_ptr()) && this.block == other.block
    }
}

impl<T: ?Sized> Deref for Strong<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: ?Sized> Clone for Strong<T> {
    fn clone(&self) -> Self {
        unsafe { self.block.as_ref() }.increment_strong();
        Strong {
            ptr: self.ptr,
            block: self.block,
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> Drop for Strong<T> {
    fn drop(&mut self) {
        unsafe { ControlBlock::release_strong(self.block) }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Strong<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: ?Sized> TryFrom<&Weak<T>> for Strong<T> {
    type Error = Expired;

    fn try_from(weak: &Weak<T>) -> Result<Self, Expired> {
        weak.try_upgrade()
    }
}

/// Non-owning handle which may be upgraded to a [`Strong`] one.
///
/// Upgrading never waits: it either succeeds at once or reports the object
/// as gone. A `Weak` has no lifetime parameter and may be moved into any
/// thread.
pub struct Weak<T: ?Sized> {
    inner: Option<(NonNull<T>, NonNull<ControlBlock>)>,
    _marker: PhantomData<T>,
}

unsafe impl<T: ?Sized + Send + Sync> Send for Weak<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for Weak<T> {}

impl<T: ?Sized> Weak<T> {
    /// Weak handle that never upgrades.
    pub const fn new() -> Self {
        Weak {
            inner: None,
            _marker: PhantomData,
        }
    }

    /// Takes over one weak reference already counted in `block`.
    ///
    /// # Safety
    ///
    /// The caller transfers ownership of one weak reference and `ptr` must
    /// stay dereferenceable while the strong count of `block` is nonzero.
    pub(crate) unsafe fn from_counted(ptr: NonNull<T>, block: NonNull<ControlBlock>) -> Self {
        Weak {
            inner: Some((ptr, block)),
            _marker: PhantomData,
        }
    }

    /// Attempts to get a strong handle, returning `None` once the object is
    /// being or has been destroyed.
    pub fn upgrade(&self) -> Option<Strong<T>> {
        let (ptr, block) = self.inner?;
        if unsafe { block.as_ref() }.try_increment_strong() {
            Some(unsafe { Strong::from_counted(ptr, block) })
        } else {
            None
        }
    }

    pub fn try_upgrade(&self) -> Result<Strong<T>, Expired> {
        self.upgrade().ok_or(Expired)
    }

    pub fn strong_count(&self) -> usize {
        match self.inner {
            Some((_, block)) => unsafe { block.as_ref() }.strong_count(),
            None => 0,
        }
    }

    /// A `false` answer may be stale by the time it is read; only
    /// [`Weak::upgrade`] is authoritative.
    pub fn is_expired(&self) -> bool {
        self.strong_count() == 0
    }
}

impl<T: ?Sized> Default for Weak<T> {
    fn default() -> Self {
        Weak::new()
    }
}

impl<T: ?Sized> Clone for Weak<T> {
    fn clone(&self) -> Self {
        if let Some((_, block)) = self.inner {
            unsafe { block.as_ref() }.increment_weak();
        }
        Weak {
            inner: self.inner,
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> Drop for Weak<T> {
    fn drop(&mut self) {
        if let Some((_, block)) = self.inner {
            unsafe { ControlBlock::release_weak(block) }
        }
    }
}

impl<T: ?Sized> fmt::Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(Weak)")
    }
}
