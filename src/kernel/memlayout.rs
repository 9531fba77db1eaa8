// User-visible layout of the top of the address space.
//
// the trampoline page sits at the highest user virtual address, mapped in
// both user and kernel space; the trapframe page is mapped just below it in
// each user page table. kernel stacks are laid out below TRAMPOLINE in the
// kernel page table, each followed by an invalid guard page.
use crate::riscv::{MAXVA, PGSIZE};

pub const TRAMPOLINE: usize = MAXVA - PGSIZE;

pub const TRAPFRAME: usize = TRAMPOLINE - PGSIZE;

// map kernel stacks beneath the trampoline,
// each surrounded by invalid guard pages.
pub const fn kstack(i: usize) -> usize {
    TRAMPOLINE - (i + 1) * 2 * PGSIZE
}
