use crate::proc::PROCS;
use core::sync::atomic::{AtomicUsize, Ordering};

// ticks since boot, bumped by the timer interrupt on hart 0.
// Reads are racy by design, like every clock; writers go through
// clock_intr(). Its address doubles as the sleep channel for processes
// waiting on the clock.
pub static TICKS: AtomicUsize = AtomicUsize::new(0);

pub fn ticks() -> usize {
    TICKS.load(Ordering::Relaxed)
}

// the channel sys_sleep-style waiters sleep on.
pub fn ticks_chan() -> usize {
    &TICKS as *const AtomicUsize as usize
}

// The timer interrupt path calls this once per tick on hart 0: advance the
// clock, account the tick to every RUNNING process, and wake clock
// waiters. Preemption is separate; the trap handler follows up with
// sched::timer_yield().
pub fn clock_intr() {
    TICKS.fetch_add(1, Ordering::Relaxed);
    PROCS.update_time();
    PROCS.wakeup(ticks_chan());
}

// return to user space; the trap layer owns the trampoline registers.
#[cfg(target_os = "none")]
extern "C" {
    pub fn usertrap_ret() -> !;
}

#[cfg(not(target_os = "none"))]
pub unsafe fn usertrap_ret() -> ! {
    unreachable!("usertrap_ret: no user space on the host");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::{test_support, ProcState};

    #[test]
    fn clock_tick_accounts_and_wakes() {
        let _t = test_support::serialize();
        let before = ticks();

        let (p, guard) = PROCS.alloc_proc().expect("alloc");
        drop(guard);

        // a running process collects a tick; a clock sleeper wakes up.
        {
            let mut inner = p.inner.lock();
            inner.state = ProcState::RUNNING;
        }
        clock_intr();
        {
            let mut inner = p.inner.lock();
            assert_eq!(ticks(), before + 1);
            assert_eq!(inner.rtime, 1);

            inner.state = ProcState::SLEEPING;
            inner.chan = ticks_chan();
        }
        clock_intr();
        {
            let inner = p.inner.lock();
            assert_eq!(inner.state, ProcState::RUNNABLE);
            assert_eq!(inner.rtime, 1);
        }

        test_support::release(p);
    }
}
