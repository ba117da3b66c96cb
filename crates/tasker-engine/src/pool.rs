//! Fixed-capacity object pools
//!
//! Objects are handed out as [`Pooled`] guards. Dropping a guard resets the
//! object and returns it to its pool, so a cancelled or failed evaluation
//! still gives its frame back.

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Objects that can be returned to a [`Pool`]
pub trait Recycle: Default + Send {
    /// Restore every mutable field to its default state
    fn reset(&mut self);
}

/// A bounded stack of reusable boxed objects
pub struct Pool<T> {
    slots: Mutex<Vec<Box<T>>>,
    capacity: AtomicUsize,
}

impl<T: Recycle> Pool<T> {
    /// Create a pool retaining at most `capacity` idle objects
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(Vec::with_capacity(capacity)),
            capacity: AtomicUsize::new(capacity),
        }
    }

    /// Take an idle object or construct a fresh one
    pub fn acquire(&'static self) -> Pooled<T> {
        let item = self.slots.lock().pop().unwrap_or_default();
        Pooled {
            item: Some(item),
            pool: self,
        }
    }

    fn release(&self, mut item: Box<T>) {
        item.reset();
        let mut slots = self.slots.lock();
        if slots.len() < self.capacity.load(Ordering::Relaxed) {
            slots.push(item);
        }
    }

    /// Change the retention limit; surplus idle objects are dropped
    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::Relaxed);
        self.slots.lock().truncate(capacity);
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Number of idle objects
    pub fn idle(&self) -> usize {
        self.slots.lock().len()
    }

    /// Drop every idle object, returning how many were released
    pub fn drain(&self) -> usize {
        let mut slots = self.slots.lock();
        let count = slots.len();
        slots.clear();
        count
    }
}

/// An object on loan from a [`Pool`]
pub struct Pooled<T: Recycle + 'static> {
    item: Option<Box<T>>,
    pool: &'static Pool<T>,
}

impl<T: Recycle + 'static> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `drop` takes the item out
        self.item.as_deref().unwrap_or_else(|| unreachable!())
    }
}

impl<T: Recycle + 'static> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_deref_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T: Recycle + 'static> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}

impl<T: Recycle + std::fmt::Debug + 'static> std::fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&**self, f)
    }
}
