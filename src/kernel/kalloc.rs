use crate::riscv::PGSIZE;
use alloc::alloc::{alloc_zeroed, dealloc, Layout};

// Page-grained allocation for trapframes, user memory, page-table nodes
// and kernel stacks. Backed by the global allocator: the kernel heap on
// bare metal, the std allocator when the crate is built for the host.
#[repr(C, align(4096))]
pub struct Page([u8; PGSIZE]);

impl Page {
    const LAYOUT: Layout = Layout::new::<Page>();

    // Allocate one zeroed, page-aligned page.
    // Returns None if the allocator is out of memory.
    pub fn try_new_zeroed() -> Option<*mut u8> {
        let pa = unsafe { alloc_zeroed(Self::LAYOUT) };
        if pa.is_null() {
            None
        } else {
            Some(pa)
        }
    }

    // Free a page previously returned by try_new_zeroed().
    //
    // # Safety
    // pa must come from try_new_zeroed() and must not be used afterwards.
    pub unsafe fn free(pa: *mut u8) {
        dealloc(pa, Self::LAYOUT);
    }
}
