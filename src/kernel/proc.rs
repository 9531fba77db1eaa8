use crate::file::File;
use crate::fs::{self, Inode};
use crate::kalloc::Page;
use crate::memlayout::{kstack, TRAMPOLINE, TRAPFRAME};
use crate::param::{NCPU, NOFILE, NPROC, ROOTDEV};
#[cfg(feature = "pbs")]
use crate::param::{DEFAULT_PRIORITY, MAX_PRIORITY};
use crate::riscv::{intr_get, intr_off, r_tp, PGSIZE};
use crate::sched;
use crate::spinlock::{Mutex, MutexGuard};
use crate::swtch::swtch;
use crate::sync::{Lazy, OnceLock};
use crate::trap;
use crate::vm::{trampoline_addr, KernelMap, PteFlags, UVAddr, Uvm, VirtAddr};
use crate::{print, println};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use array_macro::array;
use core::cell::UnsafeCell;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use zerocopy::{AsBytes, FromBytes};

pub static CPUS: Cpus = Cpus::new();
pub static PROCS: Lazy<Procs> = Lazy::new(Procs::new);
pub static INITPROC: OnceLock<Arc<Proc>> = OnceLock::new();

// Saved registers for kernel context switches.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct Context {
    pub ra: usize,
    pub sp: usize,

    // callee-saved
    pub s0: usize,
    pub s1: usize,
    pub s2: usize,
    pub s3: usize,
    pub s4: usize,
    pub s5: usize,
    pub s6: usize,
    pub s7: usize,
    pub s8: usize,
    pub s9: usize,
    pub s10: usize,
    pub s11: usize,
}

impl Context {
    pub const fn new() -> Self {
        Self {
            ra: 0,
            sp: 0,
            s0: 0,
            s1: 0,
            s2: 0,
            s3: 0,
            s4: 0,
            s5: 0,
            s6: 0,
            s7: 0,
            s8: 0,
            s9: 0,
            s10: 0,
            s11: 0,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

pub struct Cpus([UnsafeCell<Cpu>; NCPU]);
unsafe impl Sync for Cpus {}

// Per-CPU state.
pub struct Cpu {
    pub proc: Option<Arc<Proc>>, // The process running on this cpu, or None.
    pub context: Context,        // swtch() here to enter scheduler().
    pub noff: UnsafeCell<isize>, // Depth of interrupt-disable nesting.
    pub intena: bool,            // Were interrupts enabled before the outermost disable?
}

// Scoped interrupt disable. Several may nest on one cpu, so noff sits in
// an UnsafeCell and the holder only keeps a shared borrow.
pub struct IntrLock<'a> {
    cpu: &'a Cpu,
}

impl Cpus {
    const fn new() -> Self {
        Self(array![_ => UnsafeCell::new(Cpu::new()); NCPU])
    }

    // Must be called with interrupts disabled,
    // to prevent race with process being moved
    // to a different CPU.
    #[inline]
    pub unsafe fn cpu_id() -> usize {
        r_tp()
    }

    // Return this CPU's cpu struct.
    // Interrupts must be disabled.
    pub unsafe fn my_cpu(&self) -> &mut Cpu {
        let id = Self::cpu_id();
        &mut *self.0[id].get()
    }

    // Disable interrupts on this cpu until every IntrLock is dropped;
    // then the previous interrupt state is restored.
    pub fn intr_lock(&self) -> IntrLock<'_> {
        let old = intr_get();
        intr_off();
        unsafe { self.my_cpu().lock(old) }
    }

    // Return the current process on this cpu, or None when the scheduler
    // itself is running.
    pub fn my_proc(&self) -> Option<&Arc<Proc>> {
        let _intr_lock = self.intr_lock();
        unsafe {
            let c = self.my_cpu();
            c.proc.as_ref()
        }
    }

    // Undo one level of interrupt-disable without an IntrLock in scope.
    //
    // # Safety
    // Only from Mutex release paths, matching the intr_lock that
    // Mutex::lock mem::forget'ed at acquire time.
    pub unsafe fn intr_unlock(&self) {
        self.my_cpu().unlock()
    }
}

impl Cpu {
    const fn new() -> Self {
        Self {
            proc: None,
            context: Context::new(),
            noff: UnsafeCell::new(0),
            intena: false,
        }
    }

    // interrupts must be disabled.
    unsafe fn lock(&mut self, old: bool) -> IntrLock<'_> {
        if *self.noff.get() == 0 {
            self.intena = old;
        }
        *self.noff.get() += 1;
        IntrLock { cpu: self }
    }

    // interrupts must be disabled.
    unsafe fn unlock(&self) {
        assert!(!intr_get(), "unlock - interruptible");
        let noff = self.noff.get();
        assert!(*noff >= 1, "unlock");
        *noff -= 1;
        if *noff == 0 && self.intena {
            crate::riscv::intr_on()
        }
    }

    // Switch to the scheduler. The caller must hold exactly p.lock (so
    // noff is 1) and must already have changed the process state away
    // from RUNNING. Saves and restores intena because intena is a
    // property of this kernel thread, not this CPU.
    pub unsafe fn sched<'a>(
        &mut self,
        guard: MutexGuard<'a, ProcInner>,
        ctx: &mut Context,
    ) -> MutexGuard<'a, ProcInner> {
        assert!(guard.holding(), "sched p->lock");
        assert!(*self.noff.get() == 1, "sched locks");
        assert!(guard.state != ProcState::RUNNING, "sched running");
        assert!(!intr_get(), "sched interruptible");

        let intena = self.intena;
        swtch(ctx, &self.context);
        self.intena = intena;

        guard
    }
}

impl<'a> Drop for IntrLock<'a> {
    fn drop(&mut self) {
        unsafe { self.cpu.unlock() }
    }
}

// per-process data for the trap handling code in the trampoline page.
// sits in a page by itself just under the trampoline page in the user
// page table; not specially mapped in the kernel page table. Includes
// callee-saved user registers like s0-s11 because the return-to-user
// path via usertrap_ret() doesn't return through the entire kernel call
// stack.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct Trapframe {
    /*   0 */ pub kernel_satp: usize, // kernel page table
    /*   8 */ pub kernel_sp: usize, // top of process's kernel stack
    /*  16 */ pub kernel_trap: usize, // usertrap()
    /*  24 */ pub epc: usize, // saved user program counter
    /*  32 */ pub kernel_hartid: usize, // saved kernel tp
    /*  40 */ pub ra: usize,
    /*  48 */ pub sp: usize,
    /*  56 */ pub gp: usize,
    /*  64 */ pub tp: usize,
    /*  72 */ pub t0: usize,
    /*  80 */ pub t1: usize,
    /*  88 */ pub t2: usize,
    /*  96 */ pub s0: usize,
    /* 104 */ pub s1: usize,
    /* 112 */ pub a0: usize,
    /* 120 */ pub a1: usize,
    /* 128 */ pub a2: usize,
    /* 136 */ pub a3: usize,
    /* 144 */ pub a4: usize,
    /* 152 */ pub a5: usize,
    /* 160 */ pub a6: usize,
    /* 168 */ pub a7: usize,
    /* 176 */ pub s2: usize,
    /* 184 */ pub s3: usize,
    /* 192 */ pub s4: usize,
    /* 200 */ pub s5: usize,
    /* 208 */ pub s6: usize,
    /* 216 */ pub s7: usize,
    /* 224 */ pub s8: usize,
    /* 232 */ pub s9: usize,
    /* 240 */ pub s10: usize,
    /* 248 */ pub s11: usize,
    /* 256 */ pub t3: usize,
    /* 264 */ pub t4: usize,
    /* 272 */ pub t5: usize,
    /* 280 */ pub t6: usize,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProcState {
    UNUSED,
    USED,
    SLEEPING,
    RUNNABLE,
    RUNNING,
    ZOMBIE,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PId(usize);

impl PId {
    fn alloc() -> Self {
        // pids are positive and never reused within a boot; 0 marks a
        // free slot.
        static NEXT_PID: AtomicUsize = AtomicUsize::new(1);
        PId(NEXT_PID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_usize(self) -> usize {
        self.0
    }
}

#[cfg(feature = "fcfs")]
#[derive(Clone, Copy, Debug)]
pub struct FcfsInfo {
    pub start_time: usize, // tick of slot allocation; earliest runs first
}

#[cfg(feature = "pbs")]
#[derive(Clone, Copy, Debug)]
pub struct PbsInfo {
    pub priority: usize,   // static priority, 0..=100, lower runs first
    pub scheds: usize,     // times dispatched
    pub start_time: usize, // tick of slot allocation, last tie-breaker
    // both hold a tick baseline while the phase is in progress and the
    // elapsed span once it ends; -1 means no history yet.
    pub running_time: isize,
    pub sleeping_time: isize,
}

#[cfg(feature = "mlfq")]
#[derive(Clone, Copy, Debug)]
pub struct MlfqInfo {
    pub queue: usize,       // 0 (highest) ..= SENTINEL_QUEUE
    pub queued_at: usize,   // tick of joining the queue; aging and FIFO key
    pub slice_ticks: usize, // ticks consumed of the current quantum
    pub scheds: usize,      // times dispatched
}

// The lock-protected part of a process slot.
pub struct ProcInner {
    pub state: ProcState,
    pub chan: usize, // non-zero while SLEEPING
    pub killed: bool,
    pub xstate: i32, // exit status, read by the parent's wait
    pub pid: PId,
    pub ctime: usize, // tick of allocation
    pub etime: usize, // tick of exit, 0 until then
    pub rtime: usize, // ticks spent RUNNING
    #[cfg(feature = "fcfs")]
    pub fcfs: FcfsInfo,
    #[cfg(feature = "pbs")]
    pub pbs: PbsInfo,
    #[cfg(feature = "mlfq")]
    pub mlfq: MlfqInfo,
}

impl ProcInner {
    pub const fn new() -> Self {
        Self {
            state: ProcState::UNUSED,
            chan: 0,
            killed: false,
            xstate: 0,
            pid: PId(0),
            ctime: 0,
            etime: 0,
            rtime: 0,
            #[cfg(feature = "fcfs")]
            fcfs: FcfsInfo { start_time: 0 },
            #[cfg(feature = "pbs")]
            pbs: PbsInfo {
                priority: DEFAULT_PRIORITY,
                scheds: 0,
                start_time: 0,
                running_time: -1,
                sleeping_time: -1,
            },
            #[cfg(feature = "mlfq")]
            mlfq: MlfqInfo {
                queue: 0,
                queued_at: 0,
                slice_ticks: 0,
                scheds: 0,
            },
        }
    }
}

// The private part of a process slot: only the process itself touches
// these, so p.lock need not be held.
pub struct ProcData {
    pub kstack: usize, // bottom va of the kernel stack
    pub sz: usize,     // size of user memory in bytes
    pub uvm: Option<Box<Uvm>>,
    pub trapframe: Option<NonNull<Trapframe>>,
    pub context: Context, // swtch() here to run the process
    pub name: String,     // process name (debugging)
    pub ofile: [Option<Arc<File>>; NOFILE],
    pub cwd: Option<Inode>,
}

unsafe impl Sync for ProcData {}
unsafe impl Send for ProcData {}

impl ProcData {
    pub fn new() -> Self {
        Self {
            kstack: 0,
            sz: 0,
            uvm: None,
            trapframe: None,
            context: Context::new(),
            name: String::new(),
            ofile: array![_ => None; NOFILE],
            cwd: None,
        }
    }
}

pub struct Proc {
    // p.lock must be held when using these:
    pub inner: Mutex<ProcInner>,
    // wait_lock must be held when using this:
    pub parent: UnsafeCell<Option<Arc<Proc>>>,
    // private to the process:
    pub data: UnsafeCell<ProcData>,
}

unsafe impl Sync for Proc {}

impl Proc {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ProcInner::new(), "proc"),
            parent: UnsafeCell::new(None),
            data: UnsafeCell::new(ProcData::new()),
        }
    }

    pub fn pid(&self) -> usize {
        self.inner.lock().pid.as_usize()
    }
}

pub struct Procs {
    pub pool: [Arc<Proc>; NPROC],
    // helps ensure that wakeups of wait()ing parents are not lost, and
    // serialises every use of p.parent. must be acquired before any
    // p.lock.
    pub wait_lock: Mutex<()>,
}

unsafe impl Sync for Procs {}

// Errors from set_priority, numbered for the syscall boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetPriorityError {
    BadPriority = 1,
    NoSuchPid = 2,
    NotSupported = 10,
}

impl SetPriorityError {
    pub fn code(self) -> usize {
        self as usize
    }
}

impl Procs {
    pub(crate) fn new() -> Self {
        Self {
            pool: array![_ => Arc::new(Proc::new()); NPROC],
            wait_lock: Mutex::new((), "wait_lock"),
        }
    }

    // Allocate a page for each process's kernel stack and map it high in
    // kernel memory, each followed by an invalid guard page.
    pub fn mapstacks(&self, kvm: &mut impl KernelMap) {
        for (i, _) in self.pool.iter().enumerate() {
            let pa = Page::try_new_zeroed().expect("mapstacks: out of memory");
            kvm.kvmmap(kstack(i).into(), pa as usize, PGSIZE, PteFlags::RW);
        }
    }

    // Look in the process table for an UNUSED slot. If found, initialize
    // the state required to run in the kernel and return with p.lock
    // held. If there are no free slots, or allocation fails, return None.
    pub fn alloc_proc(&self) -> Option<(&Arc<Proc>, MutexGuard<'_, ProcInner>)> {
        for p in self.pool.iter() {
            let mut lock = p.inner.lock();
            if lock.state != ProcState::UNUSED {
                continue;
            }
            lock.pid = PId::alloc();
            lock.state = ProcState::USED;

            let now = trap::ticks();
            lock.ctime = now;
            lock.etime = 0;
            lock.rtime = 0;
            #[cfg(feature = "fcfs")]
            {
                lock.fcfs = FcfsInfo { start_time: now };
            }
            #[cfg(feature = "pbs")]
            {
                lock.pbs = PbsInfo {
                    priority: DEFAULT_PRIORITY,
                    scheds: 0,
                    start_time: now,
                    running_time: -1,
                    sleeping_time: -1,
                };
            }
            #[cfg(feature = "mlfq")]
            {
                lock.mlfq = MlfqInfo {
                    queue: 0,
                    queued_at: now,
                    slice_ticks: 0,
                    scheds: 0,
                };
            }

            let data = unsafe { &mut *p.data.get() };

            // Allocate a trapframe page.
            match Page::try_new_zeroed().and_then(|pa| NonNull::new(pa as *mut Trapframe)) {
                Some(tf) => {
                    data.trapframe.replace(tf);
                }
                None => {
                    p.free_proc(lock);
                    return None;
                }
            }

            // An empty user page table.
            match p.proc_uvm_create() {
                Some(uvm) => {
                    data.uvm.replace(uvm);
                }
                None => {
                    p.free_proc(lock);
                    return None;
                }
            }

            // Set up a new context to start executing at fork_ret,
            // which returns to user space.
            data.context.clear();
            data.context.ra = fork_ret as usize;
            data.context.sp = data.kstack + PGSIZE;
            return Some((p, lock));
        }
        None
    }

    // Pass p's abandoned children to init.
    // Caller must hold wait_lock.
    unsafe fn reparent(&self, p: &Arc<Proc>) {
        for pp in self.pool.iter() {
            if let Some(parent) = (*pp.parent.get()).as_mut() {
                if Arc::ptr_eq(parent, p) {
                    let initproc = INITPROC.get().expect("reparent: no init");
                    (*pp.parent.get()).replace(Arc::clone(initproc));
                    self.wakeup(Arc::as_ptr(initproc) as usize);
                }
            }
        }
    }

    // Wake up all processes sleeping on chan, except the caller itself.
    // Must be called without any p.lock.
    pub fn wakeup(&self, chan: usize) {
        for p in self.pool.iter() {
            if let Some(me) = CPUS.my_proc() {
                if Arc::ptr_eq(p, me) {
                    continue;
                }
            }
            let mut guard = p.inner.lock();
            if guard.state == ProcState::SLEEPING && guard.chan == chan {
                wake_locked(&mut guard);
            }
        }
    }

    // Kill the process with the given pid. The victim won't exit until
    // it next returns to user space (see the trap layer).
    pub fn kill(&self, pid: usize) -> Result<usize, ()> {
        for p in self.pool.iter() {
            let mut guard = p.inner.lock();
            if guard.pid.as_usize() == pid {
                guard.killed = true;
                if guard.state == ProcState::SLEEPING {
                    // Yank it out of sleep(); the wait channel is gone.
                    wake_locked(&mut guard);
                }
                return Ok(0);
            }
        }
        Err(())
    }

    // Called from the clock interrupt once per tick: charge the tick to
    // whoever is RUNNING.
    pub fn update_time(&self) {
        for p in self.pool.iter() {
            let mut guard = p.inner.lock();
            if guard.state == ProcState::RUNNING {
                guard.rtime += 1;
                sched::on_tick(&mut guard);
            }
        }
    }

    // Replace the static priority of pid and return the old one. The
    // caller gives up the cpu when it made the priority numerically
    // worse, so a now-better peer can run.
    #[cfg(feature = "pbs")]
    pub fn set_priority(
        &self,
        new_priority: usize,
        pid: usize,
    ) -> Result<usize, SetPriorityError> {
        if new_priority > MAX_PRIORITY {
            return Err(SetPriorityError::BadPriority);
        }
        for p in self.pool.iter() {
            let mut guard = p.inner.lock();
            if guard.pid.as_usize() != pid
                || !matches!(
                    guard.state,
                    ProcState::RUNNABLE | ProcState::SLEEPING | ProcState::RUNNING
                )
            {
                continue;
            }
            let old = guard.pbs.priority;
            guard.pbs.priority = new_priority;
            // restart the sleep/run history: the next niceness is neutral.
            guard.pbs.running_time = -1;
            guard.pbs.sleeping_time = -1;
            drop(guard);
            if new_priority > old {
                if let Some(me) = CPUS.my_proc() {
                    Arc::clone(me).yielding();
                }
            }
            return Ok(old);
        }
        Err(SetPriorityError::NoSuchPid)
    }

    #[cfg(not(feature = "pbs"))]
    pub fn set_priority(
        &self,
        _new_priority: usize,
        _pid: usize,
    ) -> Result<usize, SetPriorityError> {
        // only the priority scheduler understands static priorities.
        Err(SetPriorityError::NotSupported)
    }
}

// Transition a SLEEPING slot to RUNNABLE. Caller holds the slot's lock.
// Both wakeup() and kill() come through here, so the policy bookkeeping
// sees every wake.
fn wake_locked(inner: &mut ProcInner) {
    inner.state = ProcState::RUNNABLE;
    inner.chan = 0;
    sched::on_wake(inner);
}

// initialize the proc table at boot time.
pub fn init() {
    for (i, p) in PROCS.pool.iter().enumerate() {
        unsafe { (*p.data.get()).kstack = kstack(i) };
    }
}

pub trait Process {
    fn free_proc<'a>(&self, guard: MutexGuard<'a, ProcInner>);
    fn proc_uvm_create(&self) -> Option<Box<Uvm>>;
    fn sleep<'a, T>(&self, chan: usize, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T>;
    fn grow_proc(&self, n: isize) -> Result<(), ()>;
    fn fork(&self) -> Result<usize, ()>;
    fn exit(&self, status: i32) -> !;
    fn wait(&self, addr: UVAddr) -> Option<usize>;
    fn waitx(&self, addr: UVAddr) -> Option<(usize, usize, usize)>;
    fn yielding(&self);
}

pub trait CopyInOut {
    // Copy to either a user address or a kernel address.
    fn either_copyout<T: AsBytes + ?Sized>(&self, dst: VirtAddr, src: &T) -> Result<(), ()>;
    // Copy from either a user address or a kernel address.
    fn either_copyin<T: AsBytes + FromBytes + ?Sized>(
        &self,
        dst: &mut T,
        src: VirtAddr,
    ) -> Result<(), ()>;
}

impl Process for Arc<Proc> {
    // Free a proc structure and the data hanging from it, including user
    // pages. p.lock must be held.
    fn free_proc<'a>(&self, mut guard: MutexGuard<'a, ProcInner>) {
        let data = unsafe { &mut *self.data.get() };
        if let Some(tf) = data.trapframe.take() {
            unsafe { Page::free(tf.as_ptr() as *mut u8) };
        }
        if let Some(mut uvm) = data.uvm.take() {
            uvm.unmap(TRAMPOLINE.into(), 1, false);
            uvm.unmap(TRAPFRAME.into(), 1, false);
            uvm.free(data.sz);
        }
        data.sz = 0;
        data.name.clear();
        unsafe {
            (*self.parent.get()).take();
        }
        guard.pid = PId(0);
        guard.chan = 0;
        guard.killed = false;
        guard.xstate = 0;
        guard.ctime = 0;
        guard.etime = 0;
        guard.rtime = 0;
        guard.state = ProcState::UNUSED;
    }

    // Create a user page table for a given process: no user memory yet,
    // but the trampoline and trapframe pages are in place.
    fn proc_uvm_create(&self) -> Option<Box<Uvm>> {
        let mut uvm = Uvm::create()?;

        // map the trampoline code (for system call return) at the
        // highest user virtual address. only the supervisor uses it, on
        // the way to/from user space, so not PTE_U.
        if uvm
            .mappages(TRAMPOLINE.into(), trampoline_addr(), PGSIZE, PteFlags::RX)
            .is_err()
        {
            uvm.free(0);
            return None;
        }

        // map the trapframe page just below the trampoline page.
        let tf = unsafe { (*self.data.get()).trapframe.unwrap().as_ptr() as usize };
        if uvm
            .mappages(TRAPFRAME.into(), tf, PGSIZE, PteFlags::RW)
            .is_err()
        {
            uvm.unmap(TRAMPOLINE.into(), 1, false);
            uvm.free(0);
            return None;
        }

        Some(uvm)
    }

    // Atomically release the given lock and sleep on chan; reacquire the
    // lock once awake.
    fn sleep<'a, T>(&self, chan: usize, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        // Must take p.lock in order to change state and then call sched.
        // Once it is held, a wakeup cannot slip in between dropping the
        // condition lock and going to sleep (wakeup locks every p), so no
        // wakeup is lost.
        let mutex;
        {
            let mut lock = self.inner.lock();
            mutex = Mutex::unlock(guard);

            lock.chan = chan;
            lock.state = ProcState::SLEEPING;
            sched::on_sleep(&mut lock);

            unsafe {
                lock = CPUS.my_cpu().sched(lock, &mut (*self.data.get()).context);
            }

            // Tidy up.
            lock.chan = 0;
        }
        mutex.lock()
    }

    // Grow or shrink user memory by n bytes.
    fn grow_proc(&self, n: isize) -> Result<(), ()> {
        let data = unsafe { &mut *self.data.get() };
        let mut sz = data.sz;
        let uvm = data.uvm.as_mut().ok_or(())?;
        if n > 0 {
            sz = uvm.alloc(sz, sz + n as usize).ok_or(())?;
        } else if n < 0 {
            sz = uvm.dealloc(sz, (sz as isize + n) as usize);
        }
        data.sz = sz;
        Ok(())
    }

    // Create a new process, copying the parent. Sets up the child kernel
    // stack to return as if from fork().
    fn fork(&self) -> Result<usize, ()> {
        let data = unsafe { &mut *self.data.get() };
        let (np, np_guard) = PROCS.alloc_proc().ok_or(())?;
        let ndata = unsafe { &mut *np.data.get() };

        // Copy user memory from parent to child.
        if data
            .uvm
            .as_mut()
            .unwrap()
            .copy(ndata.uvm.as_mut().unwrap(), data.sz)
            .is_err()
        {
            np.free_proc(np_guard);
            return Err(());
        }
        ndata.sz = data.sz;

        // Copy saved user registers.
        let tf = unsafe { data.trapframe.unwrap().as_mut() };
        let ntf = unsafe { ndata.trapframe.unwrap().as_mut() };
        *ntf = *tf;

        // Cause fork to return 0 in the child.
        ntf.a0 = 0;

        // increment reference counts on open file descriptors.
        for (fd, nfd) in data.ofile.iter().zip(ndata.ofile.iter_mut()) {
            if let Some(f) = fd {
                nfd.replace(File::dup(f));
            }
        }
        ndata.cwd = data.cwd.as_ref().map(Inode::dup);

        ndata.name.push_str(&data.name);

        let pid = np_guard.pid;
        Mutex::unlock(np_guard);

        {
            let _wait_lock = PROCS.wait_lock.lock();
            unsafe {
                (*np.parent.get()).replace(Arc::clone(self));
            }
        }

        np.inner.lock().state = ProcState::RUNNABLE;

        // The child entered the top queue; a parent further down gives up
        // the processor so new work runs first.
        #[cfg(feature = "mlfq")]
        {
            let mut inner = self.inner.lock();
            if inner.mlfq.queue != 0 {
                inner.mlfq.slice_ticks = 0;
                drop(inner);
                self.yielding();
            }
        }

        Ok(pid.as_usize())
    }

    // Exit the current process; does not return. The process stays in
    // the zombie state until its parent calls wait().
    fn exit(&self, status: i32) -> ! {
        assert!(
            !Arc::ptr_eq(self, INITPROC.get().expect("exit: no init")),
            "init exiting"
        );

        // Close all open files.
        let data = unsafe { &mut *self.data.get() };
        for fd in data.ofile.iter_mut() {
            if let Some(f) = fd.take() {
                File::close(f);
            }
        }

        fs::begin_op();
        if let Some(cwd) = data.cwd.take() {
            cwd.put();
        }
        fs::end_op();

        let mut proc_guard;
        {
            let _wait_guard = PROCS.wait_lock.lock();

            // Give any children to init.
            unsafe { PROCS.reparent(self) };

            // Parent might be sleeping in wait().
            let pp = unsafe { (*self.parent.get()).as_ref().expect("exit: no parent") };
            PROCS.wakeup(Arc::as_ptr(pp) as usize);

            proc_guard = self.inner.lock();
            proc_guard.xstate = status;
            proc_guard.etime = trap::ticks();
            proc_guard.state = ProcState::ZOMBIE;
            // wait_lock drops here; p.lock rides into the scheduler.
        }

        unsafe {
            CPUS.my_cpu().sched(proc_guard, &mut data.context);
        }
        panic!("zombie exit");
    }

    fn wait(&self, addr: UVAddr) -> Option<usize> {
        self.waitx(addr).map(|(pid, _, _)| pid)
    }

    // Wait for a child to exit; return its pid, its ticks spent running
    // and its ticks spent waiting. When addr is non-null the child's exit
    // status is copied out to the caller's user memory at addr.
    fn waitx(&self, addr: UVAddr) -> Option<(usize, usize, usize)> {
        loop {
            let wait_guard = PROCS.wait_lock.lock();
            let mut havekids = false;
            // Scan through the table looking for exited children.
            for np in PROCS.pool.iter() {
                let is_child = unsafe {
                    (*np.parent.get())
                        .as_ref()
                        .map_or(false, |pp| Arc::ptr_eq(pp, self))
                };
                if !is_child {
                    continue;
                }
                // make sure the child isn't still in exit() or swtch().
                let np_guard = np.inner.lock();
                havekids = true;
                if np_guard.state == ProcState::ZOMBIE {
                    // Found one.
                    let pid = np_guard.pid.as_usize();
                    let rtime = np_guard.rtime;
                    let wtime = np_guard.etime - np_guard.ctime - np_guard.rtime;
                    if !addr.is_null() {
                        let data = unsafe { &mut *self.data.get() };
                        if data
                            .uvm
                            .as_mut()
                            .unwrap()
                            .copyout(addr, &np_guard.xstate)
                            .is_err()
                        {
                            return None;
                        }
                    }
                    np.free_proc(np_guard);
                    return Some((pid, rtime, wtime));
                }
            }

            // No point waiting if we don't have any children.
            if !havekids || self.inner.lock().killed {
                return None;
            }

            // Wait for a child to exit.
            self.sleep(Arc::as_ptr(self) as usize, wait_guard);
        }
    }

    // Give up the CPU for one scheduling round.
    fn yielding(&self) {
        let mut guard = self.inner.lock();
        guard.state = ProcState::RUNNABLE;
        unsafe {
            CPUS.my_cpu().sched(guard, &mut (*self.data.get()).context);
        }
    }
}

impl CopyInOut for Arc<Proc> {
    fn either_copyout<T: AsBytes + ?Sized>(&self, dst: VirtAddr, src: &T) -> Result<(), ()> {
        match dst {
            VirtAddr::User(addr) => {
                let uvm = unsafe { (*self.data.get()).uvm.as_mut().unwrap() };
                uvm.copyout(addr.into(), src)
            }
            VirtAddr::Kernel(addr) => {
                let src = src.as_bytes();
                let dst = unsafe { core::slice::from_raw_parts_mut(addr as *mut u8, src.len()) };
                dst.copy_from_slice(src);
                Ok(())
            }
        }
    }

    fn either_copyin<T: AsBytes + FromBytes + ?Sized>(
        &self,
        dst: &mut T,
        src: VirtAddr,
    ) -> Result<(), ()> {
        match src {
            VirtAddr::User(addr) => {
                let uvm = unsafe { (*self.data.get()).uvm.as_mut().unwrap() };
                uvm.copyin(dst, addr.into())
            }
            VirtAddr::Kernel(addr) => {
                let dst = dst.as_bytes_mut();
                let src = unsafe { core::slice::from_raw_parts(addr as *const u8, dst.len()) };
                dst.copy_from_slice(src);
                Ok(())
            }
        }
    }
}

// a user program that calls exec("/init").
// od -t xC initcode
static INITCODE: [u8; 52] = [
    0x17, 0x05, 0x00, 0x00, 0x13, 0x05, 0x45, 0x02, 0x97, 0x05, 0x00, 0x00, 0x93, 0x85, 0x35, 0x02,
    0x93, 0x08, 0x70, 0x00, 0x73, 0x00, 0x00, 0x00, 0x93, 0x08, 0x20, 0x00, 0x73, 0x00, 0x00, 0x00,
    0xef, 0xf0, 0x9f, 0xff, 0x2f, 0x69, 0x6e, 0x69, 0x74, 0x00, 0x00, 0x24, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00,
];

// Set up the first user process.
pub fn user_init() {
    let (p, mut guard) = PROCS.alloc_proc().expect("user_init: no free slot");
    if INITPROC.set(Arc::clone(p)).is_err() {
        panic!("user_init: already ran");
    }

    let data = unsafe { &mut *p.data.get() };
    // allocate one user page and copy initcode's instructions and data
    // into it.
    data.uvm.as_mut().unwrap().init(&INITCODE);
    data.sz = PGSIZE;

    // prepare for the very first "return" from kernel to user.
    let tf = unsafe { data.trapframe.unwrap().as_mut() };
    tf.epc = 0; // user program counter
    tf.sp = PGSIZE; // user stack pointer

    data.name.push_str("initcode");
    data.cwd = fs::namei("/");

    guard.state = ProcState::RUNNABLE;
}

// A fork child's very first scheduling by scheduler() will swtch here.
pub unsafe extern "C" fn fork_ret() -> ! {
    static FIRST: AtomicBool = AtomicBool::new(true);

    // still holding p.lock from scheduler.
    CPUS.my_proc().expect("fork_ret").inner.force_unlock();

    if FIRST.swap(false, Ordering::AcqRel) {
        // File system initialization must be run in the context of a
        // regular process (e.g., because it calls sleep), and thus cannot
        // be run from main().
        fs::init(ROOTDEV);
    }
    trap::usertrap_ret()
}

// Print a process listing to the console. For debugging; runs when a
// user types ^P on the console.
// No locks, to avoid wedging a stuck machine further.
pub fn procdump() {
    println!("");
    for p in PROCS.pool.iter() {
        let inner = unsafe { p.inner.get_mut() };
        let data = unsafe { &*p.data.get() };
        if inner.state == ProcState::UNUSED {
            continue;
        }
        print!(
            "{} {:?} {}",
            inner.pid.as_usize(),
            inner.state,
            data.name
        );
        #[cfg(any(feature = "pbs", feature = "mlfq"))]
        {
            let end = if inner.etime != 0 {
                inner.etime
            } else {
                trap::ticks()
            };
            let wtime = end.saturating_sub(inner.ctime + inner.rtime);
            #[cfg(feature = "pbs")]
            print!(
                " prio {} rtime {} wtime {} scheds {}",
                sched::dyn_priority(inner),
                inner.rtime,
                wtime,
                inner.pbs.scheds
            );
            #[cfg(feature = "mlfq")]
            print!(
                " q {} rtime {} wtime {} scheds {}",
                inner.mlfq.queue, inner.rtime, wtime, inner.mlfq.scheds
            );
        }
        println!("");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::{Mutex as StdMutex, MutexGuard as StdMutexGuard};

    // Kernel state (CPUS, PROCS, TICKS) is process-global; tests that
    // touch it take this lock so they do not interleave.
    static TABLE: StdMutex<()> = StdMutex::new(());

    pub fn serialize() -> StdMutexGuard<'static, ()> {
        TABLE.lock().unwrap_or_else(|e| e.into_inner())
    }

    // Pretend p is running on this cpu, the way the scheduler would.
    pub fn set_current(p: Option<Arc<Proc>>) {
        let _intr = CPUS.intr_lock();
        unsafe { CPUS.my_cpu().proc = p };
    }

    // Return an allocated slot to the free pool, as wait() would after
    // reaping.
    pub fn release(p: &Arc<Proc>) {
        let data = unsafe { &mut *p.data.get() };
        for fd in data.ofile.iter_mut() {
            fd.take();
        }
        data.cwd.take();
        let _wait = PROCS.wait_lock.lock();
        let guard = p.inner.lock();
        p.free_proc(guard);
    }

    pub fn find_by_pid(pid: usize) -> Arc<Proc> {
        PROCS
            .pool
            .iter()
            .find(|p| p.inner.lock().pid.as_usize() == pid)
            .map(|p| Arc::clone(p))
            .expect("no slot with that pid")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn pids_are_monotone() {
        let _t = serialize();
        let (p1, g1) = PROCS.alloc_proc().expect("alloc");
        let pid1 = g1.pid.as_usize();
        drop(g1);
        let (p2, g2) = PROCS.alloc_proc().expect("alloc");
        let pid2 = g2.pid.as_usize();
        drop(g2);
        assert!(pid1 > 0);
        assert!(pid2 > pid1);
        release(&Arc::clone(p1));
        release(&Arc::clone(p2));
    }

    #[test]
    fn alloc_proc_prepares_the_slot() {
        let _t = serialize();
        let (p, guard) = PROCS.alloc_proc().expect("alloc");
        assert_eq!(guard.state, ProcState::USED);
        assert!(guard.pid.as_usize() > 0);
        assert_eq!(guard.etime, 0);
        assert_eq!(guard.rtime, 0);
        #[cfg(feature = "pbs")]
        {
            assert_eq!(guard.pbs.priority, DEFAULT_PRIORITY);
            assert_eq!(guard.pbs.running_time, -1);
            assert_eq!(guard.pbs.sleeping_time, -1);
        }
        #[cfg(feature = "mlfq")]
        assert_eq!(guard.mlfq.queue, 0);

        let data = unsafe { &*p.data.get() };
        assert!(data.trapframe.is_some());
        assert!(data.uvm.is_some());
        assert_eq!(data.context.ra, fork_ret as usize);
        assert_eq!(data.context.sp, data.kstack + PGSIZE);

        drop(guard);
        release(&Arc::clone(p));
    }

    #[test]
    fn free_proc_returns_the_slot() {
        let _t = serialize();
        let (p, guard) = PROCS.alloc_proc().expect("alloc");
        drop(guard);
        let p = Arc::clone(p);
        unsafe { (*p.data.get()).name.push_str("doomed") };

        release(&p);

        let inner = p.inner.lock();
        assert_eq!(inner.state, ProcState::UNUSED);
        assert_eq!(inner.pid.as_usize(), 0);
        assert_eq!(inner.chan, 0);
        assert!(!inner.killed);
        let data = unsafe { &*p.data.get() };
        assert!(data.trapframe.is_none());
        assert!(data.uvm.is_none());
        assert!(data.name.is_empty());
    }

    #[test]
    fn table_exhaustion_fails_cleanly() {
        let _t = serialize();
        let mut held = alloc::vec::Vec::new();
        while let Some((p, guard)) = PROCS.alloc_proc() {
            drop(guard);
            held.push(Arc::clone(p));
        }
        assert!(held.len() <= NPROC);
        assert!(PROCS.alloc_proc().is_none());

        // a full table also fails fork
        let parent = held[0].clone();
        set_current(Some(parent.clone()));
        assert_eq!(parent.fork(), Err(()));
        set_current(None);

        for p in held.iter() {
            release(p);
        }
        let (p, guard) = PROCS.alloc_proc().expect("slots are free again");
        drop(guard);
        release(&Arc::clone(p));
    }

    // tests share one process image, and user_init may run only once.
    fn ensure_init() {
        if INITPROC.get().is_none() {
            super::init();
            user_init();
        }
    }

    #[test]
    fn boot_to_init() {
        let _t = serialize();
        ensure_init();

        let p = INITPROC.get().expect("initproc");
        let inner = p.inner.lock();
        assert_eq!(inner.state, ProcState::RUNNABLE);
        assert!(inner.pid.as_usize() >= 1);
        drop(inner);

        let data = unsafe { &*p.data.get() };
        assert_eq!(data.name, "initcode");
        assert_eq!(data.sz, PGSIZE);
        let tf = unsafe { data.trapframe.unwrap().as_ref() };
        assert_eq!(tf.epc, 0);
        assert_eq!(tf.sp, PGSIZE);
        assert_eq!(data.cwd.as_ref().map(|i| i.inum()), Some(fs::ROOTINO));
        assert!(unsafe { (*p.parent.get()).is_none() });

        // init stays allocated; it owns every future orphan.
    }

    #[test]
    fn fork_copies_the_parent() {
        let _t = serialize();
        let (p, guard) = PROCS.alloc_proc().expect("alloc");
        drop(guard);
        let parent = Arc::clone(p);

        let data = unsafe { &mut *parent.data.get() };
        data.sz = data.uvm.as_mut().unwrap().alloc(0, 2 * PGSIZE).unwrap();
        data.uvm
            .as_mut()
            .unwrap()
            .copyout(UVAddr::new(32), &0xfeedu32)
            .unwrap();
        let tf = unsafe { data.trapframe.unwrap().as_mut() };
        tf.epc = 0x1000;
        tf.sp = 2 * PGSIZE;
        tf.a0 = 77;
        tf.a7 = 3;
        let file = File::new(true, false);
        data.ofile[0].replace(Arc::clone(&file));
        data.cwd = fs::namei("/");
        data.name.push_str("parent");

        set_current(Some(parent.clone()));
        let child_pid = parent.fork().expect("fork");
        set_current(None);

        assert_ne!(child_pid, parent.pid());
        assert!(child_pid > parent.pid());

        let child = find_by_pid(child_pid);
        let cdata = unsafe { &mut *child.data.get() };
        assert_eq!(cdata.sz, 2 * PGSIZE);
        assert_eq!(cdata.name, "parent");

        // the trapframe is the parent's, except for fork's return value.
        let ctf = unsafe { cdata.trapframe.unwrap().as_ref() };
        assert_eq!(ctf.epc, 0x1000);
        assert_eq!(ctf.sp, 2 * PGSIZE);
        assert_eq!(ctf.a7, 3);
        assert_eq!(ctf.a0, 0);

        // user memory is deep-copied.
        let mut v: u32 = 0;
        cdata
            .uvm
            .as_mut()
            .unwrap()
            .copyin(&mut v, UVAddr::new(32))
            .unwrap();
        assert_eq!(v, 0xfeed);

        // open files are shared, not copied.
        assert_eq!(Arc::strong_count(&file), 3); // ours + parent + child
        assert!(cdata.ofile[0]
            .as_ref()
            .is_some_and(|f| Arc::ptr_eq(f, &file)));
        assert!(cdata.cwd.is_some());

        {
            let _wait = PROCS.wait_lock.lock();
            let cp = unsafe { (*child.parent.get()).as_ref().map(Arc::clone) };
            assert!(cp.is_some_and(|pp| Arc::ptr_eq(&pp, &parent)));
        }
        assert_eq!(child.inner.lock().state, ProcState::RUNNABLE);

        release(&child);
        release(&parent);
    }

    #[test]
    fn waitx_reaps_a_zombie() {
        let _t = serialize();
        let (p, guard) = PROCS.alloc_proc().expect("alloc");
        drop(guard);
        let parent = Arc::clone(p);
        let pdata = unsafe { &mut *parent.data.get() };
        pdata.sz = pdata.uvm.as_mut().unwrap().alloc(0, PGSIZE).unwrap();

        let (c, cguard) = PROCS.alloc_proc().expect("alloc");
        drop(cguard);
        let child = Arc::clone(c);
        {
            let _wait = PROCS.wait_lock.lock();
            unsafe { (*child.parent.get()).replace(Arc::clone(&parent)) };
        }
        let child_pid = child.pid();
        {
            let mut inner = child.inner.lock();
            inner.state = ProcState::ZOMBIE;
            inner.xstate = 42;
            inner.ctime = 100;
            inner.rtime = 3;
            inner.etime = 110;
        }

        set_current(Some(parent.clone()));
        let got = parent.waitx(UVAddr::new(64));
        set_current(None);

        assert_eq!(got, Some((child_pid, 3, 7)));

        // the exit status landed in the parent's memory.
        let mut xstate: i32 = 0;
        pdata
            .uvm
            .as_mut()
            .unwrap()
            .copyin(&mut xstate, UVAddr::new(64))
            .unwrap();
        assert_eq!(xstate, 42);

        // the child slot is free again.
        let inner = child.inner.lock();
        assert_eq!(inner.state, ProcState::UNUSED);
        assert_eq!(inner.pid.as_usize(), 0);
        drop(inner);

        release(&parent);
    }

    #[test]
    fn orphans_are_given_to_init() {
        let _t = serialize();
        ensure_init();

        let (d, guard) = PROCS.alloc_proc().expect("alloc");
        drop(guard);
        let dying = Arc::clone(d);
        let (c, guard) = PROCS.alloc_proc().expect("alloc");
        drop(guard);
        let child = Arc::clone(c);

        {
            let _wait = PROCS.wait_lock.lock();
            unsafe { (*child.parent.get()).replace(Arc::clone(&dying)) };
        }

        {
            let _wait = PROCS.wait_lock.lock();
            unsafe { PROCS.reparent(&dying) };
            let cp = unsafe { (*child.parent.get()).as_ref().map(Arc::clone) };
            let initproc = INITPROC.get().unwrap();
            assert!(cp.is_some_and(|pp| Arc::ptr_eq(&pp, initproc)));
        }

        release(&child);
        release(&dying);
    }

    #[test]
    fn wait_with_nothing_to_reap() {
        let _t = serialize();
        let (p, guard) = PROCS.alloc_proc().expect("alloc");
        drop(guard);
        let parent = Arc::clone(p);

        set_current(Some(parent.clone()));
        assert_eq!(parent.wait(UVAddr::new(0)), None);
        set_current(None);

        release(&parent);
    }

    #[test]
    fn kill_wakes_a_sleeper() {
        let _t = serialize();
        let (p, guard) = PROCS.alloc_proc().expect("alloc");
        drop(guard);
        let p = Arc::clone(p);
        let pid = p.pid();
        {
            let mut inner = p.inner.lock();
            inner.state = ProcState::SLEEPING;
            inner.chan = 0x1000;
        }

        assert_eq!(PROCS.kill(pid), Ok(0));
        {
            let inner = p.inner.lock();
            assert!(inner.killed);
            assert_eq!(inner.state, ProcState::RUNNABLE);
            assert_eq!(inner.chan, 0);
        }

        assert_eq!(PROCS.kill(usize::MAX), Err(()));
        release(&p);
    }

    #[test]
    fn wakeup_is_a_broadcast_on_one_channel() {
        let _t = serialize();
        let mut sleepers = alloc::vec::Vec::new();
        for chan in [7usize, 7, 8] {
            let (p, mut guard) = PROCS.alloc_proc().expect("alloc");
            guard.state = ProcState::SLEEPING;
            guard.chan = chan;
            drop(guard);
            sleepers.push(Arc::clone(p));
        }

        set_current(None);
        PROCS.wakeup(7);
        assert_eq!(sleepers[0].inner.lock().state, ProcState::RUNNABLE);
        assert_eq!(sleepers[1].inner.lock().state, ProcState::RUNNABLE);
        assert_eq!(sleepers[2].inner.lock().state, ProcState::SLEEPING);

        // wakeup with no sleepers is a no-op, and waking twice is too.
        PROCS.wakeup(7);
        PROCS.wakeup(99);
        assert_eq!(sleepers[2].inner.lock().state, ProcState::SLEEPING);

        for p in sleepers.iter() {
            release(p);
        }
    }

    #[test]
    fn wakeup_skips_the_caller() {
        let _t = serialize();
        let (p, mut guard) = PROCS.alloc_proc().expect("alloc");
        guard.state = ProcState::SLEEPING;
        guard.chan = 5;
        drop(guard);
        let p = Arc::clone(p);

        set_current(Some(p.clone()));
        PROCS.wakeup(5);
        assert_eq!(p.inner.lock().state, ProcState::SLEEPING);
        set_current(None);

        release(&p);
    }

    #[test]
    fn update_time_charges_the_running() {
        let _t = serialize();
        let (p, mut guard) = PROCS.alloc_proc().expect("alloc");
        guard.state = ProcState::RUNNING;
        drop(guard);
        let p = Arc::clone(p);

        PROCS.update_time();
        PROCS.update_time();
        {
            let mut inner = p.inner.lock();
            assert_eq!(inner.rtime, 2);
            inner.state = ProcState::RUNNABLE;
        }
        PROCS.update_time();
        assert_eq!(p.inner.lock().rtime, 2);

        release(&p);
    }

    #[test]
    fn grow_proc_moves_the_break() {
        let _t = serialize();
        let (p, guard) = PROCS.alloc_proc().expect("alloc");
        drop(guard);
        let p = Arc::clone(p);

        p.grow_proc(3000).unwrap();
        assert_eq!(unsafe { &*p.data.get() }.sz, 3000);

        p.grow_proc(-1000).unwrap();
        assert_eq!(unsafe { &*p.data.get() }.sz, 2000);

        release(&p);
    }

    #[cfg(feature = "pbs")]
    #[test]
    fn set_priority_swaps_and_resets() {
        let _t = serialize();
        let (p, mut guard) = PROCS.alloc_proc().expect("alloc");
        guard.state = ProcState::RUNNABLE;
        let pid = guard.pid.as_usize();
        drop(guard);
        let p = Arc::clone(p);

        assert_eq!(PROCS.set_priority(50, pid), Ok(DEFAULT_PRIORITY));
        {
            let inner = p.inner.lock();
            assert_eq!(inner.pbs.priority, 50);
            assert_eq!(inner.pbs.running_time, -1);
            assert_eq!(inner.pbs.sleeping_time, -1);
        }
        // worse priority; no current process, so no one to yield.
        assert_eq!(PROCS.set_priority(90, pid), Ok(50));

        assert_eq!(
            PROCS.set_priority(101, pid),
            Err(SetPriorityError::BadPriority)
        );
        assert_eq!(
            PROCS.set_priority(50, usize::MAX),
            Err(SetPriorityError::NoSuchPid)
        );

        release(&p);
    }

    #[cfg(not(feature = "pbs"))]
    #[test]
    fn set_priority_needs_the_priority_scheduler() {
        let _t = serialize();
        assert_eq!(
            PROCS.set_priority(50, 1),
            Err(SetPriorityError::NotSupported)
        );
        assert_eq!(SetPriorityError::NotSupported.code(), 10);
    }

    #[test]
    fn either_copy_handles_kernel_addresses() {
        let _t = serialize();
        let (p, guard) = PROCS.alloc_proc().expect("alloc");
        drop(guard);
        let p = Arc::clone(p);

        let mut sink: u64 = 0;
        p.either_copyout(
            VirtAddr::Kernel(&mut sink as *mut u64 as usize),
            &0xabcd_1234u64,
        )
        .unwrap();
        assert_eq!(sink, 0xabcd_1234);

        let mut got: u64 = 0;
        p.either_copyin(&mut got, VirtAddr::Kernel(&sink as *const u64 as usize))
            .unwrap();
        assert_eq!(got, 0xabcd_1234);

        release(&p);
    }

    #[test]
    fn mapstacks_covers_every_slot() {
        use crate::vm::KVAddr;

        struct FakeKvm(alloc::vec::Vec<(usize, usize)>);
        impl KernelMap for FakeKvm {
            fn kvmmap(&mut self, va: KVAddr, pa: usize, size: usize, perm: PteFlags) {
                assert_eq!(size, PGSIZE);
                assert_eq!(perm, PteFlags::RW);
                self.0.push((va.into_usize(), pa));
            }
        }

        let _t = serialize();
        let mut kvm = FakeKvm(alloc::vec::Vec::new());
        PROCS.mapstacks(&mut kvm);
        assert_eq!(kvm.0.len(), NPROC);
        assert_eq!(kvm.0[0].0, kstack(0));
        assert_eq!(kvm.0[NPROC - 1].0, kstack(NPROC - 1));
        // each stack got its own page
        assert_ne!(kvm.0[0].1, kvm.0[1].1);
    }

    #[test]
    fn procdump_runs_lockfree() {
        let _t = serialize();
        let (p, guard) = PROCS.alloc_proc().expect("alloc");
        // dump while we hold the slot lock: it must not block.
        procdump();
        drop(guard);
        release(&Arc::clone(p));
    }
}
