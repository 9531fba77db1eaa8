// Per-CPU process scheduler, in four build-time flavours:
//
//   (default)  round robin over the table, SMP-correct by construction
//   fcfs       oldest RUNNABLE slot first, never preempted
//   pbs        lowest dynamic priority first (static priority +- niceness)
//   mlfq       four feedback queues with aging and a round-robin tail
//
// Each CPU calls scheduler() after setting itself up. scheduler() never
// returns: it picks a RUNNABLE slot, swtch-es into it, and gets the CPU
// back when the process calls sched() via yielding(), sleep() or exit().
#[cfg(feature = "mlfq")]
use crate::param::{MLFQ_MAX_WAIT, MLFQ_QUANTUM, NPROC, NQUEUE};
use crate::proc::{Cpu, Proc, ProcInner, ProcState, CPUS, PROCS};
#[cfg(any(feature = "fcfs", feature = "pbs", feature = "mlfq"))]
use crate::proc::Procs;
use crate::riscv::intr_on;
use crate::spinlock::MutexGuard;
use crate::swtch::swtch;
#[cfg(any(feature = "pbs", feature = "mlfq"))]
use crate::trap;
use alloc::sync::Arc;
#[cfg(feature = "mlfq")]
use core::sync::atomic::{AtomicUsize, Ordering};

// Run the chosen slot on this cpu until it swtch-es back. The lock
// travels: the guard taken here is released by the process on the far
// side of the switch, and the guard dropped here after swtch is the one
// the process acquired before switching away.
unsafe fn dispatch(c: &mut Cpu, p: &Arc<Proc>, mut guard: MutexGuard<'_, ProcInner>) {
    guard.state = ProcState::RUNNING;
    on_dispatch(&mut guard);
    c.proc.replace(Arc::clone(p));
    swtch(&mut c.context, &(*p.data.get()).context);

    // Process is done running for now; it changed its state before
    // coming back.
    c.proc.take();
}

#[cfg(not(any(feature = "fcfs", feature = "pbs", feature = "mlfq")))]
pub fn scheduler() -> ! {
    let c = unsafe { CPUS.my_cpu() };
    c.proc.take();
    loop {
        // The most recent process may have had interrupts turned off;
        // enable them to avoid a deadlock if everything is waiting.
        intr_on();

        for p in PROCS.pool.iter() {
            let guard = p.inner.lock();
            if guard.state == ProcState::RUNNABLE {
                // Switch to the chosen process. It is the process's job
                // to release its lock and then reacquire it before
                // jumping back to us.
                unsafe { dispatch(c, p, guard) };
            }
        }
    }
}

#[cfg(all(feature = "fcfs", not(feature = "pbs"), not(feature = "mlfq")))]
pub fn scheduler() -> ! {
    let c = unsafe { CPUS.my_cpu() };
    c.proc.take();
    loop {
        intr_on();
        if let Some((p, guard)) = pick_fcfs(&PROCS) {
            unsafe { dispatch(c, p, guard) };
        }
    }
}

#[cfg(all(feature = "pbs", not(feature = "mlfq")))]
pub fn scheduler() -> ! {
    let c = unsafe { CPUS.my_cpu() };
    c.proc.take();
    loop {
        intr_on();
        if let Some((p, guard)) = pick_pbs(&PROCS) {
            unsafe { dispatch(c, p, guard) };
        }
    }
}

#[cfg(feature = "mlfq")]
pub fn scheduler() -> ! {
    // One cpu only: the aging pass and the pick run on state that other
    // harts could change between the two passes.
    let c = unsafe { CPUS.my_cpu() };
    c.proc.take();
    loop {
        intr_on();
        age_queues(&PROCS);
        if let Some((p, guard)) = pick_mlfq(&PROCS) {
            unsafe { dispatch(c, p, guard) };
        }
    }
}

// The RUNNABLE slot that has been in the table longest. The incumbent's
// lock stays held while scanning; a strictly earlier challenger takes
// its place and the loser is released.
#[cfg(feature = "fcfs")]
fn pick_fcfs(procs: &Procs) -> Option<(&Arc<Proc>, MutexGuard<'_, ProcInner>)> {
    let mut chosen: Option<(&Arc<Proc>, MutexGuard<'_, ProcInner>)> = None;
    for p in procs.pool.iter() {
        let guard = p.inner.lock();
        if guard.state != ProcState::RUNNABLE {
            continue;
        }
        chosen = Some(match chosen {
            Some(best) if best.1.fcfs.start_time <= guard.fcfs.start_time => best,
            _ => (p, guard),
        });
    }
    chosen
}

// niceness measures how much of its recent life a slot spent asleep:
// 0..=10, with 5 for a slot that has no history yet.
#[cfg(feature = "pbs")]
pub(crate) fn niceness(inner: &ProcInner) -> isize {
    if inner.pbs.running_time == -1 && inner.pbs.sleeping_time == -1 {
        return 5;
    }
    let run = inner.pbs.running_time.max(0);
    let slept = inner.pbs.sleeping_time.max(0);
    if run + slept == 0 {
        return 5;
    }
    slept * 10 / (run + slept)
}

// lower runs first: a slot that sleeps a lot earns a bonus, one that
// hogs the cpu pays for it.
#[cfg(feature = "pbs")]
pub(crate) fn dyn_priority(inner: &ProcInner) -> usize {
    (inner.pbs.priority as isize - niceness(inner) + 5).clamp(0, 100) as usize
}

// Does a deserve the cpu before b? Dynamic priority first, then the slot
// that has been scheduled less, then the older one.
#[cfg(feature = "pbs")]
fn beats(a: &ProcInner, b: &ProcInner) -> bool {
    (dyn_priority(a), a.pbs.scheds, a.pbs.start_time)
        < (dyn_priority(b), b.pbs.scheds, b.pbs.start_time)
}

#[cfg(feature = "pbs")]
fn pick_pbs(procs: &Procs) -> Option<(&Arc<Proc>, MutexGuard<'_, ProcInner>)> {
    let mut chosen: Option<(&Arc<Proc>, MutexGuard<'_, ProcInner>)> = None;
    for p in procs.pool.iter() {
        let guard = p.inner.lock();
        if guard.state != ProcState::RUNNABLE {
            continue;
        }
        chosen = Some(match chosen {
            Some(best) if !beats(&guard, &best.1) => best,
            _ => (p, guard),
        });
    }
    chosen
}

#[cfg(feature = "mlfq")]
static RR_CURSOR: AtomicUsize = AtomicUsize::new(0);

// Promote every RUNNABLE slot that has waited out its queue's aging
// threshold, one level per round, and restart its wait clock.
#[cfg(feature = "mlfq")]
fn age_queues(procs: &Procs) {
    let now = trap::ticks();
    for p in procs.pool.iter() {
        let mut guard = p.inner.lock();
        if guard.state == ProcState::RUNNABLE
            && guard.mlfq.queue > 0
            && now - guard.mlfq.queued_at > MLFQ_MAX_WAIT[guard.mlfq.queue]
        {
            guard.mlfq.queued_at = now;
            guard.mlfq.queue -= 1;
        }
    }
}

// First non-empty queue wins; FIFO inside a queue. When the active
// queues are all empty, fall back to a plain round robin over whatever
// is RUNNABLE, from a cursor that survives across rounds.
#[cfg(feature = "mlfq")]
fn pick_mlfq(procs: &Procs) -> Option<(&Arc<Proc>, MutexGuard<'_, ProcInner>)> {
    let mut chosen: Option<(&Arc<Proc>, MutexGuard<'_, ProcInner>)> = None;
    for p in procs.pool.iter() {
        let guard = p.inner.lock();
        if guard.state != ProcState::RUNNABLE || guard.mlfq.queue >= NQUEUE {
            continue;
        }
        chosen = Some(match chosen {
            Some(best)
                if (best.1.mlfq.queue, best.1.mlfq.queued_at)
                    <= (guard.mlfq.queue, guard.mlfq.queued_at) =>
            {
                best
            }
            _ => (p, guard),
        });
    }
    if chosen.is_some() {
        return chosen;
    }

    let start = RR_CURSOR.load(Ordering::Relaxed);
    for i in 0..NPROC {
        let idx = (start + i) % NPROC;
        let p = &procs.pool[idx];
        let guard = p.inner.lock();
        if guard.state == ProcState::RUNNABLE {
            RR_CURSOR.store((idx + 1) % NPROC, Ordering::Relaxed);
            return Some((p, guard));
        }
    }
    None
}

// Policy bookkeeping at dispatch; the slot lock is held, swtch is next.
#[allow(unused_variables)]
pub(crate) fn on_dispatch(inner: &mut ProcInner) {
    #[cfg(feature = "pbs")]
    {
        inner.pbs.scheds += 1;
        inner.pbs.sleeping_time = 0;
        inner.pbs.running_time = trap::ticks() as isize; // baseline
    }
    #[cfg(feature = "mlfq")]
    {
        inner.mlfq.scheds += 1;
        inner.mlfq.queued_at = 0; // off the queue while running
    }
}

// The slot is about to go SLEEPING: close the running span and open the
// sleeping one.
#[allow(unused_variables)]
pub(crate) fn on_sleep(inner: &mut ProcInner) {
    #[cfg(feature = "pbs")]
    {
        let now = trap::ticks() as isize;
        inner.pbs.running_time = now - inner.pbs.running_time;
        inner.pbs.sleeping_time = now;
    }
}

// The slot just went RUNNABLE after sleeping: close the sleeping span
// and put it back on a queue.
#[allow(unused_variables)]
pub(crate) fn on_wake(inner: &mut ProcInner) {
    #[cfg(feature = "pbs")]
    {
        inner.pbs.sleeping_time = trap::ticks() as isize - inner.pbs.sleeping_time;
    }
    #[cfg(feature = "mlfq")]
    {
        inner.mlfq.queued_at = trap::ticks();
        inner.mlfq.slice_ticks = 0;
    }
}

// One tick just got charged to a RUNNING slot.
#[allow(unused_variables)]
pub(crate) fn on_tick(inner: &mut ProcInner) {
    #[cfg(feature = "mlfq")]
    {
        inner.mlfq.slice_ticks += 1;
    }
}

// Preemption hook for the trap layer, called on every timer interrupt
// that lands while a process is running.

// round robin and pbs re-evaluate the pick every tick.
#[cfg(all(
    not(feature = "mlfq"),
    not(all(feature = "fcfs", not(feature = "pbs")))
))]
pub fn timer_yield() {
    use crate::proc::Process;
    if let Some(p) = CPUS.my_proc() {
        Arc::clone(p).yielding();
    }
}

// fcfs runs a process to completion or until it blocks.
#[cfg(all(feature = "fcfs", not(feature = "pbs"), not(feature = "mlfq")))]
pub fn timer_yield() {}

// mlfq charges the tick against the queue's quantum; using it up costs
// one level.
#[cfg(feature = "mlfq")]
pub fn timer_yield() {
    use crate::proc::Process;
    let p = match CPUS.my_proc() {
        Some(p) => Arc::clone(p),
        None => return,
    };
    let mut guard = p.inner.lock();
    if guard.state != ProcState::RUNNING {
        return;
    }
    let q = guard.mlfq.queue;
    if guard.mlfq.slice_ticks < MLFQ_QUANTUM[q] {
        return;
    }
    if q < NQUEUE - 1 {
        guard.mlfq.queue = q + 1;
    }
    guard.mlfq.slice_ticks = 0;
    guard.mlfq.queued_at = trap::ticks();
    drop(guard);
    p.yielding();
}
