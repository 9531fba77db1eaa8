use crate::proc::{Cpu, CPUS};
use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::mem;
use core::ops::{Deref, DerefMut};
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

// Mutual exclusion spin lock.
//
// Acquiring disables interrupts on this cpu (via the cpu's intr_lock
// nesting) for as long as the guard lives, so an interrupt handler can
// never deadlock against its own cpu.
pub struct Mutex<T> {
    // records which cpu holds the lock, for holding() and debugging.
    locked: AtomicPtr<Cpu>,
    name: &'static str,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for Mutex<T> {}
unsafe impl<T: Send> Send for Mutex<T> {}

pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> Mutex<T> {
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            locked: AtomicPtr::new(ptr::null_mut()),
            name,
            data: UnsafeCell::new(data),
        }
    }

    // Acquire the lock.
    // Loops (spins) until the lock is acquired.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        // interrupts stay off until release; the matching intr_unlock()
        // happens in release(), not on an RAII path.
        mem::forget(CPUS.intr_lock());
        let me = unsafe { CPUS.my_cpu() as *mut Cpu };
        assert!(!self.holding(), "acquire {}", self.name);

        // Acquire pairs with the Release in release(), so stores made in
        // one critical section are visible to loads in the next.
        while self
            .locked
            .compare_exchange(ptr::null_mut(), me, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spin_loop();
        }
        MutexGuard { mutex: self }
    }

    // Check whether this cpu is holding the lock.
    // Interrupts must be off.
    pub fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed) == unsafe { CPUS.my_cpu() as *mut Cpu }
    }

    // Release the lock without a guard.
    //
    // # Safety
    // Only for the scheduler hand-off: a new process starts in fork_ret()
    // holding the lock that scheduler() acquired on a different kernel
    // stack, where no guard object is in scope.
    pub unsafe fn force_unlock(&self) {
        self.release()
    }

    // Consume the guard, returning a reference to the original Mutex so
    // the caller can re-lock it later (see Proc::sleep).
    pub fn unlock(guard: MutexGuard<'_, T>) -> &'_ Mutex<T> {
        let mutex = guard.mutex;
        drop(guard);
        mutex
    }

    // Access the data without locking.
    //
    // # Safety
    // Caller must rule out concurrent access; used by the panic path and
    // the debug dump, where wedging on a stuck lock would be worse than a
    // racy read.
    pub unsafe fn get_mut(&self) -> &mut T {
        &mut *self.data.get()
    }

    unsafe fn release(&self) {
        assert!(self.holding(), "release {}", self.name);
        self.locked.store(ptr::null_mut(), Ordering::Release);
        CPUS.intr_unlock();
    }
}

impl<'a, T: 'a> MutexGuard<'a, T> {
    pub fn holding(&self) -> bool {
        self.mutex.holding()
    }
}

impl<'a, T: 'a> Deref for MutexGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<'a, T: 'a> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<'a, T: 'a> Drop for MutexGuard<'a, T> {
    fn drop(&mut self) {
        unsafe { self.mutex.release() }
    }
}
