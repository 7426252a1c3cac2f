//! AArch64 (ARM64) interrupt masking.
//!
//! Only the IRQ bit of DAIF is touched; FIQ, SError and debug exceptions keep
//! whatever mask the boot code configured.

use super::Arch;
use core::arch::asm;

/// AArch64 architecture implementation.
pub struct Aarch64Arch;

impl Arch for Aarch64Arch {
    fn enable_interrupts() {
        unsafe {
            asm!(
                "msr daifclr, #2",
                options(nomem, nostack)
            );
        }
    }

    fn disable_interrupts() {
        unsafe {
            asm!(
                "msr daifset, #2",
                options(nomem, nostack)
            );
        }
    }

    fn interrupts_enabled() -> bool {
        let daif: u64;
        unsafe {
            asm!(
                "mrs {daif}, daif",
                daif = out(reg) daif,
                options(nostack, readonly)
            );
        }
        (daif & 0x80) == 0
    }
}
