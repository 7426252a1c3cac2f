//! Architecture abstraction for the scheduler's critical section.
//!
//! The scheduler core needs exactly one thing from the machine: a way to
//! suppress concurrent scheduling activity while the donation graph is being
//! mutated. On real hardware that means masking interrupts on the current
//! CPU; on a host build it is a no-op and mutual exclusion comes from the
//! kernel's graph lock alone.

use core::marker::PhantomData;

/// Architecture abstraction trait.
///
/// Implemented once per supported CPU architecture. The scheduler never
/// switches contexts itself, so only interrupt control is required.
pub trait Arch {
    /// Enable interrupts on the current CPU.
    ///
    /// This re-enables interrupt delivery, allowing preemption and timer
    /// interrupts to occur.
    fn enable_interrupts();

    /// Disable interrupts on the current CPU.
    ///
    /// This prevents interrupt delivery, creating a region where the current
    /// thread cannot be preempted.
    fn disable_interrupts();

    /// Check if interrupts are currently enabled.
    fn interrupts_enabled() -> bool;
}

/// A no-op architecture implementation for host builds and tests.
pub struct NoOpArch;

impl Arch for NoOpArch {
    fn enable_interrupts() {}

    fn disable_interrupts() {}

    fn interrupts_enabled() -> bool {
        true
    }
}

/// RAII form of `enterAtomic()/exitAtomic()`.
///
/// Creating the guard disables interrupts; dropping it restores whatever
/// state was in effect before, so guards nest correctly.
pub struct InterruptGuard<A: Arch> {
    was_enabled: bool,
    _arch: PhantomData<A>,
}

impl<A: Arch> InterruptGuard<A> {
    /// Disable interrupts and remember the previous state.
    pub fn new() -> Self {
        let was_enabled = A::interrupts_enabled();
        A::disable_interrupts();
        Self {
            was_enabled,
            _arch: PhantomData,
        }
    }

    /// Whether interrupts were enabled when this guard was created.
    pub fn was_enabled(&self) -> bool {
        self.was_enabled
    }
}

impl<A: Arch> Default for InterruptGuard<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Arch> Drop for InterruptGuard<A> {
    fn drop(&mut self) {
        if self.was_enabled {
            A::enable_interrupts();
        }
    }
}

// DAIF is only writable at EL1, so hosted aarch64 builds (tests) stay on the
// no-op implementation.
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub mod aarch64;

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub use aarch64::Aarch64Arch as DefaultArch;

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
pub use NoOpArch as DefaultArch;
