//! The process subsystem and scheduler core of a small riscv teaching
//! kernel: the fixed process table, the process lifecycle (fork, exit,
//! wait, kill), sleep/wakeup on channels, and four build-time CPU
//! scheduling policies (round robin, fcfs, pbs, mlfq). Virtual memory,
//! the file system, the trap path and the console are collaborators,
//! reached through the narrow interfaces in vm, fs, file, trap and
//! console.
//!
//! Bare-metal-only pieces (CSR access, the swtch assembly, the real
//! trampoline) are gated on `target_os = "none"`; everything else also
//! builds on the host, where the unit tests run.
#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

#[macro_use]
pub mod printf;

pub mod console;
pub mod file;
pub mod fs;
pub mod kalloc;
pub mod memlayout;
pub mod param;
pub mod proc;
pub mod riscv;
pub mod sched;
pub mod spinlock;
pub mod swtch;
pub mod sync;
pub mod trap;
pub mod vm;
