pub const NPROC: usize = 64; // maximum number of processes
pub const NCPU: usize = 8; // maximum number of CPUs
pub const NOFILE: usize = 16; // open files per process
pub const ROOTDEV: usize = 1; // device number of file system root disk

// priority scheduling (pbs)
pub const DEFAULT_PRIORITY: usize = 60; // static priority of a fresh process
pub const MAX_PRIORITY: usize = 100; // static priority range is 0..=100

// multi-level feedback queue (mlfq)
pub const NQUEUE: usize = 4; // active queues, 0 is the highest
pub const SENTINEL_QUEUE: usize = NQUEUE; // parking slot outside the active queues

// ticks a RUNNABLE process may wait in queue q before being promoted,
// indexed by q. queue 0 is never promoted.
pub const MLFQ_MAX_WAIT: [usize; NQUEUE + 1] = [0, 10, 30, 100, 150];

// time slice, in ticks, granted to queue q before demotion.
pub const MLFQ_QUANTUM: [usize; NQUEUE + 1] = [1, 2, 4, 8, 16];
