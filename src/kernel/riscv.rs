#[cfg(target_os = "none")]
use core::arch::asm;
#[cfg(target_os = "none")]
use riscv::register::sstatus;

// use riscv's sv39 page table scheme.
pub const SATP_SV39: usize = 8 << 60;

pub const PGSIZE: usize = 4096; // bytes per page
pub const PGSHIFT: usize = 12; // bits of offset within a page

// one beyond the highest possible virtual address.
// MAXVA is actually one bit less than the max allowed by
// Sv39, to avoid having to sign-extend virtual addresses
// that have the high bit set.
pub const MAXVA: usize = 1 << (9 + 9 + 9 + 12 - 1);

pub const fn pgroundup(sz: usize) -> usize {
    (sz + PGSIZE - 1) & !(PGSIZE - 1)
}

pub const fn pgrounddown(sz: usize) -> usize {
    sz & !(PGSIZE - 1)
}

// read the thread pointer, which holds this core's hartid.
#[cfg(target_os = "none")]
#[inline]
pub fn r_tp() -> usize {
    let tp;
    unsafe { asm!("mv {0}, tp", out(reg) tp) };
    tp
}

// enable device interrupts
#[cfg(target_os = "none")]
pub fn intr_on() {
    unsafe {
        sstatus::set_sie();
    }
}

// disable device interrupts
#[cfg(target_os = "none")]
pub fn intr_off() {
    unsafe {
        sstatus::clear_sie();
    }
}

// are device interrupts enabled?
#[cfg(target_os = "none")]
pub fn intr_get() -> bool {
    sstatus::read().sie()
}

// On the host there is no sstatus and no harts; a flag stands in for the
// interrupt-enable bit so the push_off/pop_off discipline stays checkable
// in unit tests.
#[cfg(not(target_os = "none"))]
mod host {
    use core::sync::atomic::AtomicBool;

    pub static SIE: AtomicBool = AtomicBool::new(false);
}

#[cfg(not(target_os = "none"))]
pub fn r_tp() -> usize {
    0
}

#[cfg(not(target_os = "none"))]
pub fn intr_on() {
    host::SIE.store(true, core::sync::atomic::Ordering::Release);
}

#[cfg(not(target_os = "none"))]
pub fn intr_off() {
    host::SIE.store(false, core::sync::atomic::Ordering::Release);
}

#[cfg(not(target_os = "none"))]
pub fn intr_get() -> bool {
    host::SIE.load(core::sync::atomic::Ordering::Acquire)
}
