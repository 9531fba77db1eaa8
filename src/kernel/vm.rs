use crate::kalloc::Page;
use crate::riscv::{pgrounddown, pgroundup, MAXVA, PGSHIFT, PGSIZE};
use alloc::boxed::Box;
use bitflags::bitflags;
use core::ptr;
use zerocopy::{AsBytes, FromBytes};

#[cfg(target_os = "none")]
use crate::riscv::SATP_SV39;

bitflags! {
    pub struct PteFlags: usize {
        const V = 1 << 0; // valid
        const R = 1 << 1;
        const W = 1 << 2;
        const X = 1 << 3;
        const U = 1 << 4; // user can access
        const RW = Self::R.bits | Self::W.bits;
        const RX = Self::R.bits | Self::X.bits;
        const RWXU = Self::R.bits | Self::W.bits | Self::X.bits | Self::U.bits;
    }
}

// A user virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct UVAddr(usize);

// A kernel virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct KVAddr(usize);

// Either side of the user/kernel split, for either_copyin/either_copyout.
#[derive(Debug, Clone, Copy)]
pub enum VirtAddr {
    User(usize),
    Kernel(usize),
}

impl UVAddr {
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }
    pub const fn into_usize(self) -> usize {
        self.0
    }
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl KVAddr {
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }
    pub const fn into_usize(self) -> usize {
        self.0
    }
}

impl From<usize> for UVAddr {
    fn from(addr: usize) -> Self {
        Self(addr)
    }
}

impl From<usize> for KVAddr {
    fn from(addr: usize) -> Self {
        Self(addr)
    }
}

impl From<UVAddr> for VirtAddr {
    fn from(va: UVAddr) -> Self {
        VirtAddr::User(va.0)
    }
}

impl From<KVAddr> for VirtAddr {
    fn from(va: KVAddr) -> Self {
        VirtAddr::Kernel(va.0)
    }
}

impl core::ops::AddAssign<usize> for UVAddr {
    fn add_assign(&mut self, rhs: usize) {
        self.0 += rhs;
    }
}

impl core::ops::Add<usize> for UVAddr {
    type Output = Self;
    fn add(self, rhs: usize) -> Self {
        Self(self.0 + rhs)
    }
}

#[derive(Clone, Copy)]
#[repr(transparent)]
struct Pte(usize);

impl Pte {
    fn new(pa: usize, flags: PteFlags) -> Self {
        Self(((pa >> PGSHIFT) << 10) | flags.bits() | PteFlags::V.bits())
    }
    fn pa(&self) -> usize {
        (self.0 >> 10) << PGSHIFT
    }
    fn flags(&self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0 & 0x3ff)
    }
    fn is_valid(&self) -> bool {
        self.flags().contains(PteFlags::V)
    }
    // a leaf maps memory; an interior entry only points at the next level.
    fn is_leaf(&self) -> bool {
        self.flags()
            .intersects(PteFlags::R | PteFlags::W | PteFlags::X)
    }
    fn clear(&mut self) {
        self.0 = 0;
    }
}

// extract the three 9-bit page table indices from a virtual address.
const fn px(level: usize, va: usize) -> usize {
    (va >> (PGSHIFT + 9 * level)) & 0x1ff
}

#[repr(C, align(4096))]
struct PageTable {
    entries: [Pte; 512],
}

// Return the PTE for virtual address va in the tree rooted at root,
// creating the interior levels when alloc is set. Sv39 has three levels
// of 512 entries; a leaf sits at level 0.
fn walk(root: *mut PageTable, va: usize, alloc: bool) -> Option<*mut Pte> {
    assert!(va < MAXVA, "walk");
    let mut pt = root;
    for level in [2, 1] {
        let pte = unsafe { &mut (*pt).entries[px(level, va)] };
        if pte.is_valid() {
            pt = pte.pa() as *mut PageTable;
        } else {
            if !alloc {
                return None;
            }
            let next = Page::try_new_zeroed()?;
            *pte = Pte::new(next as usize, PteFlags::empty());
            pt = next as *mut PageTable;
        }
    }
    Some(unsafe { &mut (*pt).entries[px(0, va)] })
}

// Recursively free page-table pages.
// All leaf mappings must already have been removed.
fn free_walk(pt: *mut PageTable) {
    for i in 0..512 {
        let pte = unsafe { &mut (*pt).entries[i] };
        if pte.is_valid() {
            assert!(!pte.is_leaf(), "free_walk: leaf");
            free_walk(pte.pa() as *mut PageTable);
            pte.clear();
        }
    }
    unsafe { Page::free(pt as *mut u8) };
}

// The kernel page table is owned by boot code; the process core maps its
// per-process kernel stacks through this capability.
pub trait KernelMap {
    fn kvmmap(&mut self, va: KVAddr, pa: usize, size: usize, perm: PteFlags);
}

// A process's user page table and the operations the process core needs
// on it. The root and every interior node are single pages from kalloc.
pub struct Uvm {
    root: *mut PageTable,
}

impl Uvm {
    // An empty user page table.
    // Returns None if out of memory.
    pub fn create() -> Option<Box<Uvm>> {
        let root = Page::try_new_zeroed()? as *mut PageTable;
        Some(Box::new(Uvm { root }))
    }

    // Create PTEs for virtual addresses starting at va that refer to
    // physical addresses starting at pa. va and size must be page-aligned.
    // Panics if any mapping already exists.
    pub fn mappages(
        &mut self,
        va: UVAddr,
        pa: usize,
        size: usize,
        perm: PteFlags,
    ) -> Result<(), ()> {
        let va = va.into_usize();
        assert!(va % PGSIZE == 0, "mappages: va not aligned");
        assert!(size % PGSIZE == 0, "mappages: size not aligned");
        assert!(size > 0, "mappages: size");

        let mut a = va;
        let mut pa = pa;
        let last = va + size - PGSIZE;
        loop {
            let pte = walk(self.root, a, true).ok_or(())?;
            unsafe {
                assert!(!(*pte).is_valid(), "mappages: remap");
                *pte = Pte::new(pa, perm);
            }
            if a == last {
                break;
            }
            a += PGSIZE;
            pa += PGSIZE;
        }
        Ok(())
    }

    // Remove npages of mappings starting from va, which must be
    // page-aligned and mapped. Optionally free the physical memory.
    pub fn unmap(&mut self, va: UVAddr, npages: usize, free: bool) {
        let va = va.into_usize();
        assert!(va % PGSIZE == 0, "unmap: not aligned");

        for a in (va..va + npages * PGSIZE).step_by(PGSIZE) {
            let pte = walk(self.root, a, false).expect("unmap: walk");
            let pte = unsafe { &mut *pte };
            assert!(pte.is_valid(), "unmap: not mapped");
            assert!(pte.is_leaf(), "unmap: not a leaf");
            if free {
                unsafe { Page::free(pte.pa() as *mut u8) };
            }
            pte.clear();
        }
    }

    // Load initcode into address 0. For the very first process only.
    // code must fit in one page.
    pub fn init(&mut self, code: &[u8]) {
        assert!(code.len() <= PGSIZE, "init: more than a page");
        let mem = Page::try_new_zeroed().expect("init: out of memory");
        self.mappages(UVAddr::new(0), mem as usize, PGSIZE, PteFlags::RWXU)
            .expect("init: map");
        unsafe { ptr::copy_nonoverlapping(code.as_ptr(), mem, code.len()) };
    }

    // Grow the process from oldsz to newsz bytes, allocating zeroed
    // memory. Returns the new size, or None if out of memory.
    pub fn alloc(&mut self, oldsz: usize, newsz: usize) -> Option<usize> {
        if newsz < oldsz {
            return Some(oldsz);
        }
        let start = pgroundup(oldsz);
        for a in (start..newsz).step_by(PGSIZE) {
            let mem = match Page::try_new_zeroed() {
                Some(mem) => mem,
                None => {
                    self.dealloc(a, oldsz);
                    return None;
                }
            };
            if self
                .mappages(UVAddr::new(a), mem as usize, PGSIZE, PteFlags::RWXU)
                .is_err()
            {
                unsafe { Page::free(mem) };
                self.dealloc(a, oldsz);
                return None;
            }
        }
        Some(newsz)
    }

    // Shrink the process from oldsz to newsz bytes and return the new
    // size. Shrinking never fails.
    pub fn dealloc(&mut self, oldsz: usize, newsz: usize) -> usize {
        if newsz >= oldsz {
            return oldsz;
        }
        if pgroundup(newsz) < pgroundup(oldsz) {
            let npages = (pgroundup(oldsz) - pgroundup(newsz)) / PGSIZE;
            self.unmap(UVAddr::new(pgroundup(newsz)), npages, true);
        }
        newsz
    }

    // Copy this page table's user memory into another, for fork():
    // both the page-table structure and the page contents.
    pub fn copy(&mut self, new: &mut Uvm, sz: usize) -> Result<(), ()> {
        for a in (0..sz).step_by(PGSIZE) {
            let pte = walk(self.root, a, false).expect("uvm copy: pte should exist");
            let pte = unsafe { &*pte };
            assert!(pte.is_valid(), "uvm copy: page not present");
            let mem = match Page::try_new_zeroed() {
                Some(mem) => mem,
                None => {
                    new.unmap(UVAddr::new(0), a / PGSIZE, true);
                    return Err(());
                }
            };
            unsafe { ptr::copy_nonoverlapping(pte.pa() as *const u8, mem, PGSIZE) };
            if new
                .mappages(UVAddr::new(a), mem as usize, PGSIZE, pte.flags())
                .is_err()
            {
                unsafe { Page::free(mem) };
                new.unmap(UVAddr::new(0), a / PGSIZE, true);
                return Err(());
            }
        }
        Ok(())
    }

    // Free sz bytes of user memory, then the page-table pages themselves.
    // Any non-user mappings (trampoline, trapframe) must be unmapped first.
    pub fn free(&mut self, sz: usize) {
        if sz > 0 {
            self.unmap(UVAddr::new(0), pgroundup(sz) / PGSIZE, true);
        }
        free_walk(self.root);
        self.root = ptr::null_mut();
    }

    // Look up a user virtual address and return its physical address,
    // or None if unmapped or not user-accessible.
    pub fn walk_addr(&mut self, va: UVAddr) -> Option<usize> {
        let va = va.into_usize();
        if va >= MAXVA {
            return None;
        }
        let pte = unsafe { &*walk(self.root, va, false)? };
        if !pte.is_valid() || !pte.flags().contains(PteFlags::U) {
            return None;
        }
        Some(pte.pa())
    }

    // Copy the bytes of src to dst in this page table's user memory.
    pub fn copyout<T: AsBytes + ?Sized>(&mut self, dst: UVAddr, src: &T) -> Result<(), ()> {
        let mut src = src.as_bytes();
        let mut dst = dst.into_usize();
        while !src.is_empty() {
            let va0 = pgrounddown(dst);
            let pa0 = self.walk_addr(UVAddr::new(va0)).ok_or(())?;
            let off = dst - va0;
            let n = (PGSIZE - off).min(src.len());
            unsafe { ptr::copy_nonoverlapping(src.as_ptr(), (pa0 + off) as *mut u8, n) };
            src = &src[n..];
            dst += n;
        }
        Ok(())
    }

    // Fill dst from src in this page table's user memory.
    pub fn copyin<T: AsBytes + FromBytes + ?Sized>(
        &mut self,
        dst: &mut T,
        src: UVAddr,
    ) -> Result<(), ()> {
        let mut dst = dst.as_bytes_mut();
        let mut src = src.into_usize();
        while !dst.is_empty() {
            let va0 = pgrounddown(src);
            let pa0 = self.walk_addr(UVAddr::new(va0)).ok_or(())?;
            let off = src - va0;
            let n = (PGSIZE - off).min(dst.len());
            unsafe { ptr::copy_nonoverlapping((pa0 + off) as *const u8, dst.as_mut_ptr(), n) };
            let rest = dst;
            dst = &mut rest[n..];
            src += n;
        }
        Ok(())
    }

    #[cfg(target_os = "none")]
    pub fn as_satp(&self) -> usize {
        SATP_SV39 | ((self.root as usize) >> PGSHIFT)
    }
}

// the trampoline page, shared by every user page table. The assembly
// itself (uservec/userret) belongs to the trap layer; the core only needs
// the page's physical address to map it.
#[cfg(target_os = "none")]
extern "C" {
    fn trampoline();
}

#[cfg(target_os = "none")]
pub fn trampoline_addr() -> usize {
    trampoline as usize
}

// a page-aligned stand-in so page-table setup stays exercisable on the host.
#[cfg(not(target_os = "none"))]
#[repr(C, align(4096))]
struct TrampolinePage([u8; PGSIZE]);

#[cfg(not(target_os = "none"))]
static TRAMPOLINE_PAGE: TrampolinePage = TrampolinePage([0; PGSIZE]);

#[cfg(not(target_os = "none"))]
pub fn trampoline_addr() -> usize {
    &TRAMPOLINE_PAGE as *const TrampolinePage as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_walk_unmap() {
        let mut uvm = Uvm::create().unwrap();
        let pa = Page::try_new_zeroed().unwrap();
        uvm.mappages(UVAddr::new(PGSIZE), pa as usize, PGSIZE, PteFlags::RWXU)
            .unwrap();
        assert_eq!(uvm.walk_addr(UVAddr::new(PGSIZE)), Some(pa as usize));
        // unmapped and non-user addresses don't resolve
        assert_eq!(uvm.walk_addr(UVAddr::new(0)), None);
        uvm.unmap(UVAddr::new(PGSIZE), 1, true);
        assert_eq!(uvm.walk_addr(UVAddr::new(PGSIZE)), None);
        uvm.free(0);
    }

    #[test]
    fn supervisor_pages_are_not_user_visible() {
        let mut uvm = Uvm::create().unwrap();
        let pa = Page::try_new_zeroed().unwrap();
        uvm.mappages(UVAddr::new(0), pa as usize, PGSIZE, PteFlags::RW)
            .unwrap();
        assert_eq!(uvm.walk_addr(UVAddr::new(0)), None);
        uvm.unmap(UVAddr::new(0), 1, true);
        uvm.free(0);
    }

    #[test]
    fn alloc_and_dealloc() {
        let mut uvm = Uvm::create().unwrap();
        let sz = uvm.alloc(0, 3 * PGSIZE + 100).unwrap();
        assert_eq!(sz, 3 * PGSIZE + 100);
        for a in (0..sz).step_by(PGSIZE) {
            assert!(uvm.walk_addr(UVAddr::new(a)).is_some());
        }
        let sz = uvm.dealloc(sz, PGSIZE);
        assert_eq!(sz, PGSIZE);
        assert!(uvm.walk_addr(UVAddr::new(0)).is_some());
        assert_eq!(uvm.walk_addr(UVAddr::new(PGSIZE)), None);
        uvm.free(sz);
    }

    #[test]
    fn init_loads_code_at_zero() {
        let code = [0x17u8, 0x05, 0x00, 0x00, 0x73];
        let mut uvm = Uvm::create().unwrap();
        uvm.init(&code);
        let mut out = [0u8; 5];
        uvm.copyin(&mut out[..], UVAddr::new(0)).unwrap();
        assert_eq!(out, code);
        uvm.free(PGSIZE);
    }

    #[test]
    fn copyout_copyin_across_pages() {
        let mut uvm = Uvm::create().unwrap();
        let sz = uvm.alloc(0, 2 * PGSIZE).unwrap();
        let src: u64 = 0x1122_3344_5566_7788;
        // straddle the page boundary
        let addr = UVAddr::new(PGSIZE - 3);
        uvm.copyout(addr, &src).unwrap();
        let mut back: u64 = 0;
        uvm.copyin(&mut back, addr).unwrap();
        assert_eq!(back, src);
        uvm.free(sz);
    }

    #[test]
    fn copyout_rejects_unmapped() {
        let mut uvm = Uvm::create().unwrap();
        assert!(uvm.copyout(UVAddr::new(0), &1u32).is_err());
        uvm.free(0);
    }

    #[test]
    fn copy_is_deep() {
        let mut a = Uvm::create().unwrap();
        let sz = a.alloc(0, PGSIZE).unwrap();
        a.copyout(UVAddr::new(16), &0xdeadbeefu32).unwrap();
        let mut b = Uvm::create().unwrap();
        a.copy(&mut b, sz).unwrap();

        let mut v: u32 = 0;
        b.copyin(&mut v, UVAddr::new(16)).unwrap();
        assert_eq!(v, 0xdeadbeef);

        // writes to the parent do not show up in the child
        a.copyout(UVAddr::new(16), &7u32).unwrap();
        b.copyin(&mut v, UVAddr::new(16)).unwrap();
        assert_eq!(v, 0xdeadbeef);

        a.free(sz);
        b.free(sz);
    }
}
