use alloc::sync::Arc;

// An open file handle. The open-file table, devices and pipes live in the
// file layer; the process core only tracks shared references: fork
// duplicates them, exit drops them, and the last drop releases the
// underlying object.
pub struct File {
    pub readable: bool,
    pub writable: bool,
}

impl File {
    pub fn new(readable: bool, writable: bool) -> Arc<File> {
        Arc::new(File { readable, writable })
    }

    // Increment the reference count for the file.
    pub fn dup(this: &Arc<File>) -> Arc<File> {
        Arc::clone(this)
    }

    // Drop a reference to the file.
    pub fn close(this: Arc<File>) {
        drop(this);
    }
}
