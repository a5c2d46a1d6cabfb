//! # Life lock
//!
//! Weak and strong handles to objects that were never allocated behind a
//! reference count. An object may live on the stack or inside another
//! struct; its destruction is delayed, not prevented, until every strong
//! handle has been released. After that every handle derived from it is
//! expired, even though its memory may still be around for a moment.
//!
//! This is meant for asynchronous callbacks: an observer hands weak handles
//! to other threads and may be torn down at any time, from the thread of its
//! choosing, without racing against callbacks still running.
//!
//! Two types do the work:
//!
//! - [`LockedValue`] wraps a value and is the easy, safe way in;
//! - [`LifetimeLock`] can be attached to any object by address, for example
//!   as a member of the object itself. In that case destroy it first thing in
//!   the owner's `Drop` so no callback observes a half-dropped object.
//!
//! ## Examples
//!
//! Using a locked value on the stack
//!
//! ```
//! use std::pin::pin;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::thread;
//!
//! use life_lock::LockedValue;
//!
//! let mut hits = pin!(LockedValue::new());
//! hits.as_mut().emplace(AtomicUsize::new(0));
//!
//! let workers: Vec<_> = (0..4)
//!     .map(|_| {
//!         let hits = hits.get();
//!         thread::spawn(move || {
//!             // Always check the upgrade, the owner may be gone already.
//!             if let Some(hits) = hits.upgrade() {
//!                 hits.fetch_add(1, Ordering::Relaxed);
//!             }
//!         })
//!     })
//!     .collect();
//! for worker in workers {
//!     worker.join().unwrap();
//! }
//!
//! let weak = hits.get();
//! assert_eq!(hits.value().map(|h| h.load(Ordering::Relaxed)), Some(4));
//!
//! // Blocks while any thread still holds a strong handle.
//! hits.as_mut().reset();
//! assert!(!hits.has_value());
//! assert!(weak.upgrade().is_none());
//! ```
//!
//! Using a bare lock next to an object
//!
//! ```
//! use std::pin::pin;
//! use std::ptr::NonNull;
//!
//! use life_lock::LifetimeLock;
//!
//! let greeting = String::from("hello");
//! let mut lock = pin!(LifetimeLock::new());
//! // SAFETY: `greeting` outlives `lock`, which is declared after it.
//! unsafe { lock.as_mut().attach(NonNull::from(&greeting)) };
//! let weak = unsafe { lock.derive_weak(NonNull::from(&greeting)) };
//!
//! assert_eq!(weak.upgrade().as_deref().map(String::as_str), Some("hello"));
//! lock.as_mut().destroy();
//! assert!(weak.upgrade().is_none());
//! ```

mod control;
mod error;
mod handle;
mod lock;
mod locked;
mod retainer;
mod wait;

pub use error::Expired;
pub use handle::{Strong, Weak};
pub use lock::{LifetimeLock, LockState};
pub use locked::{with_locked, LockedValue};
pub use retainer::Retainer;
pub use wait::WaitPolicy;
