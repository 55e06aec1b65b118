//! Single-owner mutual exclusion for stores in shared storage.
//!
//! Exclusive access to a [`Store`](crate::store::Store) is normally enforced
//! by the borrow checker: every mutating operation takes `&mut self`. When a
//! store has to live in a `static` and be reached from more than one context,
//! [`Shared`] adds the missing runtime claim: a single-owner gate with a
//! wait-forever acquire and nothing else — no timeout, no cancellation, no
//! fairness.
//!
//! The gate spins, so contending contexts must be able to preempt each other
//! or run on the same priority level; it is not suitable for claiming a store
//! from an interrupt handler that can preempt the holder.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

/// A single-owner claim flag.
#[derive(Debug)]
pub struct Gate {
    claimed: AtomicBool,
}

impl Gate {
    /// Create an unclaimed gate.
    pub const fn new() -> Self {
        Self {
            claimed: AtomicBool::new(false),
        }
    }

    /// Claim the gate, spinning until the current owner releases it.
    pub fn lock(&self) -> GateGuard<'_> {
        while self
            .claimed
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        GateGuard { gate: self }
    }

    /// Claim the gate if it is free.
    pub fn try_lock(&self) -> Option<GateGuard<'_>> {
        self.claimed
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| GateGuard { gate: self })
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the gate on drop.
#[derive(Debug)]
pub struct GateGuard<'g> {
    gate: &'g Gate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.claimed.store(false, Ordering::Release);
    }
}

/// A value guarded by a [`Gate`], usable from `static` storage.
///
/// # Examples
///
/// ```rust
/// use sastore::gate::Shared;
///
/// static COUNTER: Shared<u32> = Shared::new(0);
///
/// COUNTER.with(|n| *n += 1);
/// assert_eq!(COUNTER.with(|n| *n), 1);
/// ```
#[derive(Debug)]
pub struct Shared<T> {
    gate: Gate,
    value: UnsafeCell<T>,
}

// SAFETY: the gate hands out at most one exclusive claim at a time, so the
// value is never aliased mutably; T: Send is all that sharing then requires.
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    /// Wrap `value` behind an unclaimed gate.
    pub const fn new(value: T) -> Self {
        Self {
            gate: Gate::new(),
            value: UnsafeCell::new(value),
        }
    }

    /// Claim the gate and run `f` with exclusive access to the value.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let _guard = self.gate.lock();
        // SAFETY: the guard is the single live claim.
        f(unsafe { &mut *self.value.get() })
    }

    /// Run `f` with exclusive access if the gate is free, without waiting.
    pub fn try_with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let _guard = self.gate.try_lock()?;
        // SAFETY: the guard is the single live claim.
        Some(f(unsafe { &mut *self.value.get() }))
    }
}
