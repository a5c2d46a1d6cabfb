use core::fmt;
use core::ptr::NonNull;

use crate::control::ControlBlock;
use crate::{Strong, Weak};

/// Type-erased holder of one strong reference.
///
/// A `Retainer` keeps some object alive without knowing its type, and hands
/// out handles typed for *another* pointer which share that object's count.
/// [`LifetimeLock`](crate::LifetimeLock) uses this to retain the protected
/// object while producing handles to itself, and vice versa.
pub struct Retainer {
    block: Option<NonNull<ControlBlock>>,
}

// Only objects that are `Send + Sync` may be attached, see `Retainer::attach`.
unsafe impl Send for Retainer {}
unsafe impl Sync for Retainer {}

impl Retainer {
    /// Empty retainer.
    pub const fn new() -> Self {
        Retainer { block: None }
    }

    /// Keeps `strong`'s object alive, releasing whatever was held before.
    pub fn attach<T>(&mut self, strong: Strong<T>)
    where
        T: ?Sized + Send + Sync,
    {
        self.attach_unchecked(strong)
    }

    /// Same as [`Retainer::attach`] without the thread-safety bounds; the
    /// caller vouches for the release action instead.
    pub(crate) fn attach_unchecked<T: ?Sized>(&mut self, strong: Strong<T>) {
        let previous = self.block.replace(Strong::into_block(strong));
        if let Some(block) = previous {
            unsafe { ControlBlock::release_strong(block) }
        }
    }

    /// Releases the held reference, if any.
    pub fn reset(&mut self) {
        if let Some(block) = self.block.take() {
            unsafe { ControlBlock::release_strong(block) }
        }
    }

    pub fn is_set(&self) -> bool {
        self.block.is_some()
    }

    /// Number of strong references sharing the held count, zero when empty.
    pub fn strong_count(&self) -> usize {
        match self.block {
            Some(block) => unsafe { block.as_ref() }.strong_count(),
            None => 0,
        }
    }

    /// Strong handle to `ptr` sharing the held reference count, or `None`
    /// when nothing is held.
    ///
    /// # Safety
    ///
    /// `ptr` must remain dereferenceable until the held count drops to zero.
    pub unsafe fn derive_strong<T: ?Sized>(&self, ptr: NonNull<T>) -> Option<Strong<T>> {
        let block = self.block?;
        unsafe { block.as_ref() }.increment_strong();
        Some(unsafe { Strong::from_counted(ptr, block) })
    }

    /// Weak handle to `ptr` sharing the held reference count; an empty
    /// [`Weak`] when nothing is held.
    ///
    /// # Safety
    ///
    /// `ptr` must remain dereferenceable until the held count drops to zero.
    pub unsafe fn derive_weak<T: ?Sized>(&self, ptr: NonNull<T>) -> Weak<T> {
        match self.block {
            Some(block) => {
                unsafe { block.as_ref() }.increment_weak();
                unsafe { Weak::from_counted(ptr, block) }
            }
            None => Weak::new(),
        }
    }
}

impl Default for Retainer {
    fn default() -> Self {
        Retainer::new()
    }
}

/// The copy shares the source's reference count.
impl Clone for Retainer {
    fn clone(&self) -> Self {
        let mut copy = Retainer::new();
        if let Some(strong) = unsafe { self.derive_strong(NonNull::from(self)) } {
            copy.attach_unchecked(strong);
        }
        copy
    }
}

impl Drop for Retainer {
    fn drop(&mut self) {
        self.reset()
    }
}

impl<T: ?Sized + Send + Sync> From<Strong<T>> for Retainer {
    fn from(strong: Strong<T>) -> Self {
        let mut retainer = Retainer::new();
        retainer.attach(strong);
        retainer
    }
}

impl fmt::Debug for Retainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retainer")
            .field("strong_count", &self.strong_count())
            .finish()
    }
}
