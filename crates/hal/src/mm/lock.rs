//! Concurrency primitives for the allocator core (SPEC_FULL §1.1, §5).
//!
//! Two shapes are needed: an interrupt-disabling spinlock for the zone and
//! cache locks, and a sleep-capable binary semaphore for the cache chain.
//! The real softirq/semaphore primitives of the host kernel are out of
//! scope (SPEC_FULL §1); only their contract is honored here.

use core::mem::ManuallyDrop;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use talus_utils::{Mutex, MutexGuard};

/// Interrupt enable/disable, real on bare metal, simulated under `std`.
///
/// The teacher HAL calls real `cli`/`sti` unconditionally on `x86_64`
/// regardless of its `std` feature, which would fault in a userspace test
/// process. Here the two are split explicitly so `cargo test --features
/// std` actually exercises the disable/restore/nesting behaviour instead of
/// crashing.
pub mod interrupts {
    #[cfg(all(not(feature = "std"), not(target_arch = "x86_64")))]
    use super::AtomicBool;
    #[cfg(all(not(feature = "std"), not(target_arch = "x86_64")))]
    use super::Ordering;

    // Under `std`, interrupt state is simulated per-thread: real hardware
    // interrupt flags are per-CPU, and a process-global flag would make
    // `cargo test`'s parallel test threads spuriously interfere with one
    // another's disable/restore pairs.
    #[cfg(feature = "std")]
    std::thread_local! {
        static SIMULATED_ENABLED: core::cell::Cell<bool> = const { core::cell::Cell::new(true) };
    }

    #[cfg(all(not(feature = "std"), not(target_arch = "x86_64")))]
    static SIMULATED_ENABLED: AtomicBool = AtomicBool::new(true);

    #[cfg(all(not(feature = "std"), target_arch = "x86_64"))]
    #[inline(always)]
    pub fn disable() -> u64 {
        let flags: u64;
        unsafe {
            core::arch::asm!("pushfq; pop {}", out(reg) flags, options(nomem, nostack));
            core::arch::asm!("cli", options(nomem, nostack));
        }
        flags
    }

    #[cfg(all(not(feature = "std"), target_arch = "x86_64"))]
    #[inline(always)]
    pub fn restore(state: u64) {
        if state & 0x200 != 0 {
            unsafe { core::arch::asm!("sti", options(nomem, nostack)) };
        }
    }

    #[cfg(all(not(feature = "std"), target_arch = "x86_64"))]
    #[inline(always)]
    pub fn is_enabled() -> bool {
        let flags: u64;
        unsafe { core::arch::asm!("pushfq; pop {}", out(reg) flags, options(nomem, nostack)) };
        flags & 0x200 != 0
    }

    #[cfg(feature = "std")]
    #[inline(always)]
    pub fn disable() -> u64 {
        SIMULATED_ENABLED.with(|c| u64::from(c.replace(false)))
    }

    #[cfg(feature = "std")]
    #[inline(always)]
    pub fn restore(state: u64) {
        if state != 0 {
            SIMULATED_ENABLED.with(|c| c.set(true));
        }
    }

    #[cfg(feature = "std")]
    #[inline(always)]
    pub fn is_enabled() -> bool {
        SIMULATED_ENABLED.with(core::cell::Cell::get)
    }

    #[cfg(all(not(feature = "std"), not(target_arch = "x86_64")))]
    #[inline(always)]
    pub fn disable() -> u64 {
        u64::from(SIMULATED_ENABLED.swap(false, Ordering::SeqCst))
    }

    #[cfg(all(not(feature = "std"), not(target_arch = "x86_64")))]
    #[inline(always)]
    pub fn restore(state: u64) {
        if state != 0 {
            SIMULATED_ENABLED.store(true, Ordering::SeqCst);
        }
    }

    #[cfg(all(not(feature = "std"), not(target_arch = "x86_64")))]
    #[inline(always)]
    pub fn is_enabled() -> bool {
        SIMULATED_ENABLED.load(Ordering::SeqCst)
    }
}

/// Spinlock that disables interrupts while held, restoring on drop.
///
/// Used for the zone lock and the cache lock (SPEC_FULL §5): both must be
/// acquired with interrupts disabled and held for the minimum span.
pub struct IrqSafeLock<T> {
    inner: Mutex<T>,
}

impl<T> IrqSafeLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            inner: Mutex::new(data),
        }
    }

    pub fn lock(&self) -> IrqSafeLockGuard<'_, T> {
        let state = interrupts::disable();
        let guard = self.inner.lock();
        IrqSafeLockGuard {
            guard: ManuallyDrop::new(guard),
            state,
        }
    }

    pub fn try_lock(&self) -> Option<IrqSafeLockGuard<'_, T>> {
        let state = interrupts::disable();
        match self.inner.try_lock() {
            Some(guard) => Some(IrqSafeLockGuard {
                guard: ManuallyDrop::new(guard),
                state,
            }),
            None => {
                interrupts::restore(state);
                None
            }
        }
    }
}

pub struct IrqSafeLockGuard<'a, T> {
    guard: ManuallyDrop<MutexGuard<'a, T>>,
    state: u64,
}

impl<T> core::ops::Deref for IrqSafeLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> core::ops::DerefMut for IrqSafeLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for IrqSafeLockGuard<'_, T> {
    fn drop(&mut self) {
        // SAFETY: guard is dropped exactly once, here, before interrupts
        // are restored — an interrupt handler must never observe a
        // half-released guard.
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        interrupts::restore(self.state);
    }
}

/// A sleep-capable binary semaphore guarding the global cache chain.
///
/// Real blocking sleep does not exist in this crate's scope (the scheduler
/// is an external collaborator); acquiring with `wait = true` busy-retries
/// with [`yield_hint`](super::alloc::yield_hint) between attempts, which
/// satisfies the "may sleep, never held from interrupt context" contract
/// without modeling a scheduler.
pub struct ChainSemaphore {
    held: AtomicBool,
    contended: AtomicUsize,
}

impl ChainSemaphore {
    pub const fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
            contended: AtomicUsize::new(0),
        }
    }

    /// Try to acquire without blocking. `Some` on success.
    pub fn try_acquire(&self) -> Option<ChainSemaphoreGuard<'_>> {
        if self
            .held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(ChainSemaphoreGuard { sem: self })
        } else {
            self.contended.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Acquire, retrying with a yield hint between attempts until success.
    pub fn acquire(&self, yield_hint: impl Fn()) -> ChainSemaphoreGuard<'_> {
        loop {
            if let Some(guard) = self.try_acquire() {
                return guard;
            }
            yield_hint();
        }
    }
}

impl Default for ChainSemaphore {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ChainSemaphoreGuard<'a> {
    sem: &'a ChainSemaphore,
}

impl Drop for ChainSemaphoreGuard<'_> {
    fn drop(&mut self) {
        self.sem.held.store(false, Ordering::Release);
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn irq_safe_lock_disables_then_restores() {
        let lock = IrqSafeLock::new(10);
        assert!(interrupts::is_enabled());
        {
            let mut g = lock.lock();
            *g = 20;
            assert!(!interrupts::is_enabled());
        }
        assert!(interrupts::is_enabled());
        assert_eq!(*lock.lock(), 20);
    }

    #[test]
    fn irq_safe_lock_nests() {
        let a = IrqSafeLock::new(1);
        let b = IrqSafeLock::new(2);
        assert!(interrupts::is_enabled());
        {
            let _ga = a.lock();
            assert!(!interrupts::is_enabled());
            {
                let _gb = b.lock();
                assert!(!interrupts::is_enabled());
            }
            assert!(!interrupts::is_enabled());
        }
        assert!(interrupts::is_enabled());
    }

    #[test]
    fn chain_semaphore_excludes_concurrent_holders() {
        let sem = ChainSemaphore::new();
        let g1 = sem.try_acquire();
        assert!(g1.is_some());
        assert!(sem.try_acquire().is_none());
        drop(g1);
        assert!(sem.try_acquire().is_some());
    }
}
