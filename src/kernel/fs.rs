use crate::sync::Lazy;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

pub const ROOTINO: u32 = 1; // root i-number

// An in-core inode handle. The inode cache, disk layout and path walking
// belong to the file-system layer; the process core only holds
// reference-counted handles for each process's working directory.
pub struct Inode(Arc<InodeInner>);

pub struct InodeInner {
    pub inum: u32,
}

impl Inode {
    // Increment the reference count.
    pub fn dup(&self) -> Inode {
        Inode(Arc::clone(&self.0))
    }

    // Drop a reference to the in-core inode.
    pub fn put(self) {}

    pub fn inum(&self) -> u32 {
        self.0.inum
    }
}

static ROOT: Lazy<Inode> = Lazy::new(|| Inode(Arc::new(InodeInner { inum: ROOTINO })));

// Look up a path and return its inode.
// Only the root is resolvable from here; real path walking is the
// file-system layer's job.
pub fn namei(path: &str) -> Option<Inode> {
    (path == "/").then(|| ROOT.dup())
}

static INITED: AtomicBool = AtomicBool::new(false);

// One-time file-system initialisation (superblock, log recovery). Runs in
// the context of the first process, from fork_ret().
pub fn init(_dev: usize) {
    INITED.store(true, Ordering::Release);
}

pub fn initialized() -> bool {
    INITED.load(Ordering::Acquire)
}

// Begin/end a file-system transaction. The log implementation is owned by
// the file-system layer; exit() brackets its inode release with these.
pub fn begin_op() {}

pub fn end_op() {}
