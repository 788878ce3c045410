// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use alloc::sync::Arc;
use alloc::vec::Vec;
use arrayvec::ArrayVec;
use core::fmt;

use buddy_alloc::BuddyAllocator;
use phys_mem::{is_page_aligned, page_align_down, page_align_up, PhysMem, PAGE_SIZE};

use crate::format::SvFormat;
use crate::mmu::Mmu;
use crate::pte::{self, leaf_pte, non_leaf_pte, PteFlag};

/// Starting point of the virtual-address search when the caller passes no
/// usable hint.
const DEFAULT_MMAP_HINT: u64 = 0x9100_0000;

/// Windows probed before an `mmap` search is abandoned.
const VA_SEARCH_LIMIT: usize = 4096;

/// Largest buddy block is `2^11` pages (8 MiB).
const MAX_PAGE_ORDER: usize = 11;

/// Staging bound per mapped page: deep enough for every Sv mode through
/// Sv57 (intermediate tables plus the leaf).
const MAX_LEVELS: usize = 5;

type StagedTables = ArrayVec<u64, MAX_LEVELS>;
type StagedPtes = ArrayVec<(u64, u64), MAX_LEVELS>;

/// Errors surfaced by supervisor operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The buddy allocator could not provide a page.
    OutOfMemory,
    /// A region operation was asked to cover zero bytes.
    EmptyRegion,
    /// The backing store refused an access.
    PhysMem(phys_mem::Error),
}

/// Holds the result of supervisor operations.
pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::OutOfMemory => write!(f, "out of physical memory"),
            Error::EmptyRegion => write!(f, "zero-sized region"),
            Error::PhysMem(e) => write!(f, "physical memory error: {}", e),
        }
    }
}

/// Owns page tables on behalf of guest address spaces.
///
/// An address space is identified by the physical address of its root
/// table, handed out by `create_pagetable`. The supervisor holds the buddy
/// allocator every physical page comes from, the set of live roots for
/// validation, and the global count of mapped virtual pages. All page-table
/// bytes are manipulated through the `PhysMem` handle; translation for
/// probing and bookkeeping goes through an embedded `Mmu`.
///
/// Operations are synchronous and run to completion; sharing a supervisor
/// across threads requires external mutual exclusion together with the
/// physical memory it writes.
pub struct Supervisor<T: SvFormat, M: PhysMem> {
    pmem: Arc<M>,
    mmu: Mmu<T, M>,
    buddy: BuddyAllocator,
    ptroots: Vec<u64>,
    vpage_usage: u64,
}

impl<T: SvFormat, M: PhysMem> Supervisor<T, M> {
    /// Creates a supervisor managing all of `pmem` in page units.
    pub fn new(pmem: Arc<M>) -> Self {
        let total_pages = pmem.size() / PAGE_SIZE;
        assert!(total_pages <= u32::MAX as u64);
        Self {
            mmu: Mmu::new(pmem.clone()),
            buddy: BuddyAllocator::new(total_pages as u32, MAX_PAGE_ORDER, PAGE_SIZE),
            pmem,
            ptroots: Vec::new(),
            vpage_usage: 0,
        }
    }

    /// The supervisor's view of the guest address spaces it manages.
    pub fn mmu(&self) -> &Mmu<T, M> {
        &self.mmu
    }

    /// Bytes of virtual memory currently mapped across all address spaces.
    pub fn vmem_usage(&self) -> u64 {
        self.vpage_usage * PAGE_SIZE
    }

    /// Bytes of physical memory currently allocated (roots, intermediate
    /// tables, and data pages).
    pub fn pmem_usage(&self) -> u64 {
        self.buddy.usage()
    }

    /// Creates an empty address space and returns its root.
    ///
    /// Returns `None` when physical memory is exhausted. A returned root is
    /// page-aligned, never 0, and distinct from every other live page.
    pub fn create_pagetable(&mut self) -> Option<u64> {
        let Some(root) = self.buddy.allocate(0) else {
            log::warn!("no physical memory for a new page-table root");
            return None;
        };
        assert!(is_page_aligned(root));
        if let Err(e) = self.pmem.fill(root, 0, PAGE_SIZE) {
            log::error!("failed to zero new page-table root at {:#x}: {}", root, e);
            self.buddy.free(root, 0);
            return None;
        }
        assert!(!self.ptroots.contains(&root));
        self.ptroots.push(root);
        Some(root)
    }

    /// Destroys the address space rooted at `root`, releasing every leaf
    /// data page and every table page back to the buddy allocator.
    pub fn destroy_pagetable(&mut self, root: u64) -> Result<()> {
        self.assert_ptroot(root);
        self.destroy_one_level(root, T::LEVELS - 1)?;
        self.ptroots.retain(|&r| r != root);
        Ok(())
    }

    /// Maps `size` bytes (rounded up to whole pages) of fresh memory into
    /// the address space at `root`, at or above the page containing
    /// `va_hint`. Returns the page-aligned start of the region, or `None`
    /// when no window or no memory is available. On failure the address
    /// space is left exactly as it was.
    pub fn mmap(&mut self, root: u64, va_hint: u64, size: u64) -> Option<u64> {
        if size == 0 {
            log::warn!("mmap called with size 0");
            return None;
        }
        self.assert_ptroot(root);

        let mut va = page_align_down(va_hint);
        if va == 0 {
            va = DEFAULT_MMAP_HINT;
        }
        let num_pages = page_align_up(size) / PAGE_SIZE;

        // Linear probe for a window of `num_pages` unmapped pages, bounded
        // so a saturated address space fails rather than spins.
        let mut found = false;
        for _ in 0..VA_SEARCH_LIMIT {
            let free = (0..num_pages).all(|k| self.mmu.translate(root, va + k * PAGE_SIZE).is_none());
            if free {
                found = true;
                break;
            }
            va += PAGE_SIZE;
        }
        if !found {
            log::warn!(
                "mmap found no free window for {:#x} bytes near {:#x}, ptroot={:#x}",
                size,
                va_hint,
                root
            );
            return None;
        }

        for k in 0..num_pages {
            if self.alloc_one_page(root, va + k * PAGE_SIZE).is_err() {
                log::debug!(
                    "mmap rolling back after {} of {} pages at vaddr={:#x}",
                    k,
                    num_pages,
                    va
                );
                for undo in 0..k {
                    // Unwrap ok, undoing a page this call just mapped.
                    self.free_one_page(root, va + undo * PAGE_SIZE).unwrap();
                }
                return None;
            }
        }
        Some(va)
    }

    /// Unmaps the `size`-byte (rounded up to whole pages) region at `va`,
    /// which must be page-aligned. Intermediate tables that become empty
    /// stay allocated until `destroy_pagetable`.
    pub fn munmap(&mut self, root: u64, va: u64, size: u64) -> Result<()> {
        self.assert_ptroot(root);
        assert!(is_page_aligned(va));
        if size == 0 {
            log::warn!("munmap called with size 0");
            return Err(Error::EmptyRegion);
        }
        let num_pages = page_align_up(size) / PAGE_SIZE;
        for k in 0..num_pages {
            if let Err(e) = self.free_one_page(root, va + k * PAGE_SIZE) {
                log::error!(
                    "munmap failed to free page at vaddr={:#x}, ptroot={:#x}",
                    va + k * PAGE_SIZE,
                    root
                );
                return Err(e);
            }
        }
        Ok(())
    }

    /// Maps one fresh data page at `va`, allocating any missing
    /// intermediate tables.
    ///
    /// The slot must be vacant (`mmap` guarantees it). Staged allocations
    /// are committed only after every page is in hand and zeroed; on any
    /// failure everything staged by this call is released.
    fn alloc_one_page(&mut self, root: u64, va: u64) -> Result<()> {
        self.assert_ptroot(root);
        assert!(is_page_aligned(va));
        assert!(self.mmu.translate(root, va).is_none());

        // Phase 1: walk until the missing level.
        let mut ptaddr = root;
        let mut level = T::LEVELS - 1;
        let mut pte_addr = Mmu::<T, M>::pte_addr(ptaddr, va, level);
        loop {
            let pte = self.mmu.load_pte_at(pte_addr);
            if !PteFlag::Valid.is_set(pte) {
                break;
            }
            if pte::is_malformed(pte) {
                log::error!(
                    "PTE with W set but R clear, ptroot={:#x}, vaddr={:#x}",
                    root,
                    va
                );
                panic!("malformed PTE");
            }
            if pte::is_leaf(pte) {
                // The vacancy probe above said otherwise.
                log::error!(
                    "mapping already present at vaddr={:#x}, ptroot={:#x}",
                    va,
                    root
                );
                panic!("allocation over an existing mapping");
            }
            if level == 0 {
                log::error!(
                    "non-leaf PTE at the bottom level, ptroot={:#x}, vaddr={:#x}",
                    root,
                    va
                );
                panic!("non-leaf PTE at level 0");
            }
            ptaddr = T::PA_PPNFULL.insert(0, T::PTE_PPNFULL.extract(pte));
            level -= 1;
            pte_addr = Mmu::<T, M>::pte_addr(ptaddr, va, level);
        }

        // Phase 2: stage a table page per missing level, then the leaf.
        let mut staged_tables = StagedTables::new();
        let mut staged_ptes = StagedPtes::new();
        while level > 0 {
            let Some(table) = self.buddy.allocate(0) else {
                self.release_staged(&staged_tables, None);
                return Err(Error::OutOfMemory);
            };
            assert!(is_page_aligned(table));
            staged_tables.push(table);
            staged_ptes.push((pte_addr, non_leaf_pte::<T>(table)));
            level -= 1;
            pte_addr = Mmu::<T, M>::pte_addr(table, va, level);
        }
        let Some(data_page) = self.buddy.allocate(0) else {
            log::debug!(
                "no physical page for vaddr={:#x}, ptroot={:#x}",
                va,
                root
            );
            self.release_staged(&staged_tables, None);
            return Err(Error::OutOfMemory);
        };
        assert!(is_page_aligned(data_page));
        staged_ptes.push((pte_addr, leaf_pte::<T>(data_page)));

        // Phase 3: zero the new tables before any PTE makes them
        // reachable, then link parent-first.
        for &table in &staged_tables {
            if let Err(e) = self.pmem.fill(table, 0, PAGE_SIZE) {
                log::error!("failed to zero new page table at {:#x}: {}", table, e);
                self.release_staged(&staged_tables, Some(data_page));
                return Err(Error::PhysMem(e));
            }
        }
        for &(addr, pte) in &staged_ptes {
            if let Err(e) = self.mmu.store_pte_at(addr, pte) {
                log::error!(
                    "failed to write PTE at {:#x}, ptroot={:#x}, vaddr={:#x}",
                    addr,
                    root,
                    va
                );
                self.release_staged(&staged_tables, Some(data_page));
                return Err(Error::PhysMem(e));
            }
        }
        self.vpage_usage += 1;
        Ok(())
    }

    /// Unmaps the page at `va` and frees its data page. The mapping must
    /// exist. Intermediate tables are never freed here.
    fn free_one_page(&mut self, root: u64, va: u64) -> Result<()> {
        self.assert_ptroot(root);
        assert!(is_page_aligned(va));
        assert!(self.mmu.translate(root, va).is_some());

        let mut ptaddr = root;
        for level in (0..T::LEVELS).rev() {
            let pte_addr = Mmu::<T, M>::pte_addr(ptaddr, va, level);
            let pte = self.mmu.load_pte_at(pte_addr);
            if !PteFlag::Valid.is_set(pte) {
                log::error!(
                    "invalid PTE while freeing vaddr={:#x}, ptroot={:#x}",
                    va,
                    root
                );
                panic!("free of an unmapped page");
            }
            if pte::is_malformed(pte) {
                log::error!(
                    "PTE with W set but R clear, ptroot={:#x}, vaddr={:#x}",
                    root,
                    va
                );
                panic!("malformed PTE");
            }
            if pte::is_leaf(pte) {
                if level != 0 {
                    log::error!(
                        "superpage leaf in a supervisor-owned table, ptroot={:#x}, vaddr={:#x}",
                        root,
                        va
                    );
                    panic!("superpage leaves are not supported");
                }
                let paddr = T::PA_PPNFULL.insert(0, T::PTE_PPNFULL.extract(pte));
                assert_ne!(paddr, 0);
                self.buddy.free(paddr, 0);
                if let Err(e) = self.mmu.store_pte_at(pte_addr, 0) {
                    log::error!("failed to clear PTE at {:#x}: {}", pte_addr, e);
                    return Err(Error::PhysMem(e));
                }
                assert!(self.vpage_usage > 0);
                self.vpage_usage -= 1;
                return Ok(());
            }
            if level == 0 {
                log::error!(
                    "non-leaf PTE at the bottom level, ptroot={:#x}, vaddr={:#x}",
                    root,
                    va
                );
                panic!("non-leaf PTE at level 0");
            }
            ptaddr = T::PA_PPNFULL.insert(0, T::PTE_PPNFULL.extract(pte));
        }
        unreachable!("walk must terminate at the leaf");
    }

    /// Releases every table in the level-`level` table at `ptaddr`,
    /// depth-first, then the table itself.
    fn destroy_one_level(&mut self, ptaddr: u64, level: usize) -> Result<()> {
        assert!(is_page_aligned(ptaddr));
        for idx in 0..T::ENTRIES_PER_PAGE {
            let pte_addr = ptaddr + idx * T::PTE_BYTES;
            let pte = self.mmu.load_pte_at(pte_addr);
            if !PteFlag::Valid.is_set(pte) {
                continue;
            }
            if pte::is_leaf(pte) {
                if level != 0 {
                    log::error!(
                        "superpage leaf in a supervisor-owned table at {:#x}",
                        pte_addr
                    );
                    panic!("superpage leaves are not supported");
                }
                let paddr = T::PA_PPNFULL.insert(0, T::PTE_PPNFULL.extract(pte));
                assert_ne!(paddr, 0);
                self.buddy.free(paddr, 0);
                assert!(self.vpage_usage > 0);
                self.vpage_usage -= 1;
            } else {
                if level == 0 {
                    log::error!("non-leaf PTE at the bottom level at {:#x}", pte_addr);
                    panic!("non-leaf PTE at level 0");
                }
                let next = T::PA_PPNFULL.insert(0, T::PTE_PPNFULL.extract(pte));
                self.destroy_one_level(next, level - 1)?;
            }
        }
        self.buddy.free(ptaddr, 0);
        Ok(())
    }

    fn release_staged(&mut self, tables: &StagedTables, data_page: Option<u64>) {
        for &table in tables {
            self.buddy.free(table, 0);
        }
        if let Some(page) = data_page {
            self.buddy.free(page, 0);
        }
    }

    /// `root` must be page-aligned and live; anything else is a caller bug.
    fn assert_ptroot(&self, root: u64) {
        assert!(is_page_aligned(root));
        assert!(self.ptroots.contains(&root), "unknown page-table root");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sv32::Sv32;
    use crate::sv39::Sv39;
    use alloc::vec;
    use phys_mem::SimPhysMem;

    const MEM_SIZE: u64 = 16 << 20;
    const SMALL_MEM_SIZE: u64 = 8 << 20;

    fn supervisor<T: SvFormat>(size: u64) -> Supervisor<T, SimPhysMem> {
        Supervisor::new(Arc::new(SimPhysMem::new(size)))
    }

    #[test]
    fn hello_round_trip() {
        let mut sv = supervisor::<Sv39>(MEM_SIZE);
        let root = sv.create_pagetable().unwrap();
        assert_ne!(root, 0);

        let msg = b"Hello, World!\0";
        let va = sv.mmap(root, 0x1000, msg.len() as u64).unwrap();
        assert_ne!(va, 0);
        assert!(is_page_aligned(va));

        sv.mmu().copy_to_guest(root, va, msg).unwrap();
        let pa = sv.mmu().translate(root, va).unwrap();
        assert_ne!(pa, 0);
        assert!(is_page_aligned(pa));

        let mut out = [0u8; 14];
        sv.mmu().copy_from_guest(root, &mut out, va).unwrap();
        assert_eq!(&out, msg);

        sv.munmap(root, va, msg.len() as u64).unwrap();
        sv.destroy_pagetable(root).unwrap();
        assert_eq!(sv.vmem_usage(), 0);
        assert_eq!(sv.pmem_usage(), 0);
    }

    #[test]
    fn create_destroy_restores_counters() {
        let mut sv = supervisor::<Sv39>(MEM_SIZE);
        assert_eq!(sv.pmem_usage(), 0);
        let root = sv.create_pagetable().unwrap();
        assert_eq!(sv.pmem_usage(), PAGE_SIZE);
        assert_eq!(sv.vmem_usage(), 0);
        sv.destroy_pagetable(root).unwrap();
        assert_eq!(sv.pmem_usage(), 0);
    }

    #[test]
    fn roots_are_distinct_and_aligned() {
        let mut sv = supervisor::<Sv39>(MEM_SIZE);
        let mut roots = vec![];
        for _ in 0..16 {
            let root = sv.create_pagetable().unwrap();
            assert_ne!(root, 0);
            assert!(is_page_aligned(root));
            assert!(!roots.contains(&root));
            roots.push(root);
        }
        for root in roots {
            sv.destroy_pagetable(root).unwrap();
        }
        assert_eq!(sv.pmem_usage(), 0);
    }

    #[test]
    fn mmap_rounds_size_up_to_pages() {
        let mut sv = supervisor::<Sv39>(MEM_SIZE);
        let root = sv.create_pagetable().unwrap();
        let va = sv.mmap(root, 0x1000, PAGE_SIZE + 1).unwrap();
        assert_eq!(sv.vmem_usage(), 2 * PAGE_SIZE);
        // Both pages are live, the third is not.
        assert!(sv.mmu().translate(root, va).is_some());
        assert!(sv.mmu().translate(root, va + PAGE_SIZE).is_some());
        assert!(sv.mmu().translate(root, va + 2 * PAGE_SIZE).is_none());
    }

    #[test]
    fn mmap_without_hint_starts_at_default() {
        let mut sv = supervisor::<Sv39>(MEM_SIZE);
        let root = sv.create_pagetable().unwrap();
        let va = sv.mmap(root, 0, PAGE_SIZE).unwrap();
        assert!(va >= 0x9100_0000);
        assert!(is_page_aligned(va));
    }

    #[test]
    fn zero_sized_regions_are_refused() {
        let mut sv = supervisor::<Sv39>(MEM_SIZE);
        let root = sv.create_pagetable().unwrap();
        assert_eq!(sv.mmap(root, 0x1000, 0), None);
        assert_eq!(sv.munmap(root, 0x1000, 0), Err(Error::EmptyRegion));
    }

    #[test]
    fn overlapping_requests_get_disjoint_regions() {
        let mut sv = supervisor::<Sv39>(MEM_SIZE);
        let root = sv.create_pagetable().unwrap();
        let first = sv.mmap(root, 0x10000, 4 * PAGE_SIZE).unwrap();
        // A hint inside the live region must be skipped over.
        let second = sv.mmap(root, first + PAGE_SIZE, 2 * PAGE_SIZE).unwrap();
        let first_range = first..first + 4 * PAGE_SIZE;
        assert!(!first_range.contains(&second));
        assert!(!first_range.contains(&(second + PAGE_SIZE)));
        assert_eq!(sv.vmem_usage(), 6 * PAGE_SIZE);
    }

    #[test]
    fn matched_mmap_munmap_restores_counters() {
        let mut sv = supervisor::<Sv39>(MEM_SIZE);
        let root = sv.create_pagetable().unwrap();
        let va = sv.mmap(root, 0x5000, 3 * PAGE_SIZE).unwrap();
        let vmem_before_unmap = sv.vmem_usage();
        let pmem_before_unmap = sv.pmem_usage();
        assert_eq!(vmem_before_unmap, 3 * PAGE_SIZE);

        sv.munmap(root, va, 3 * PAGE_SIZE).unwrap();
        assert_eq!(sv.vmem_usage(), 0);
        // Data pages are back; the intermediate tables deliberately stay
        // until the address space dies.
        assert_eq!(sv.pmem_usage(), pmem_before_unmap - 3 * PAGE_SIZE);

        sv.destroy_pagetable(root).unwrap();
        assert_eq!(sv.pmem_usage(), 0);
    }

    #[test]
    fn intermediate_tables_survive_munmap() {
        let mut sv = supervisor::<Sv39>(MEM_SIZE);
        let root = sv.create_pagetable().unwrap();
        // One page at a low address: root + two intermediate levels + leaf.
        let va = sv.mmap(root, 0x1000, PAGE_SIZE).unwrap();
        assert_eq!(sv.pmem_usage(), 4 * PAGE_SIZE);
        sv.munmap(root, va, PAGE_SIZE).unwrap();
        assert_eq!(sv.pmem_usage(), 3 * PAGE_SIZE);
        // Remapping the same page reuses the retained tables.
        let va2 = sv.mmap(root, va, PAGE_SIZE).unwrap();
        assert_eq!(va2, va);
        assert_eq!(sv.pmem_usage(), 4 * PAGE_SIZE);
        sv.destroy_pagetable(root).unwrap();
        assert_eq!(sv.pmem_usage(), 0);
    }

    #[test]
    fn translation_is_stable_until_unmapped() {
        let mut sv = supervisor::<Sv39>(MEM_SIZE);
        let root = sv.create_pagetable().unwrap();
        let va = sv.mmap(root, 0x8000, 2 * PAGE_SIZE).unwrap();
        let pa_first = sv.mmu().translate(root, va).unwrap();
        let other = sv.mmap(root, 0x2000_0000, PAGE_SIZE).unwrap();
        sv.munmap(root, other, PAGE_SIZE).unwrap();
        assert_eq!(sv.mmu().translate(root, va), Some(pa_first));
        sv.munmap(root, va, 2 * PAGE_SIZE).unwrap();
        assert_eq!(sv.mmu().translate(root, va), None);
        sv.destroy_pagetable(root).unwrap();
    }

    #[test]
    fn exhaustion_rolls_back_cleanly() {
        let mut sv = supervisor::<Sv39>(SMALL_MEM_SIZE);
        let root = sv.create_pagetable().unwrap();
        // Soak up every remaining page.
        let mut hoard = vec![];
        while let Some(r) = sv.create_pagetable() {
            hoard.push(r);
        }
        let vmem_before = sv.vmem_usage();
        let pmem_before = sv.pmem_usage();

        assert_eq!(sv.mmap(root, 0, 2 * PAGE_SIZE), None);
        assert_eq!(sv.vmem_usage(), vmem_before);
        assert_eq!(sv.pmem_usage(), pmem_before);

        // Releasing one page is not enough for leaf plus tables either.
        sv.destroy_pagetable(hoard.pop().unwrap()).unwrap();
        assert_eq!(sv.mmap(root, 0, 2 * PAGE_SIZE), None);
        assert_eq!(sv.pmem_usage(), pmem_before - PAGE_SIZE);
    }

    #[test]
    fn recursive_destroy_releases_all_mappings() {
        let mut sv = supervisor::<Sv39>(MEM_SIZE);
        let root = sv.create_pagetable().unwrap();
        // Five regions, twenty pages, spread over distinct table subtrees.
        let hints = [0x1000, 0x60_0000, 0x1234_5000, 0x4000_0000, 0x9abc_d000];
        for hint in hints {
            assert!(sv.mmap(root, hint, 4 * PAGE_SIZE).is_some());
        }
        assert_eq!(sv.vmem_usage(), 20 * PAGE_SIZE);
        assert!(sv.pmem_usage() >= 21 * PAGE_SIZE);

        sv.destroy_pagetable(root).unwrap();
        assert_eq!(sv.vmem_usage(), 0);
        assert_eq!(sv.pmem_usage(), 0);
    }

    #[test]
    fn vmem_usage_spans_address_spaces() {
        let mut sv = supervisor::<Sv39>(MEM_SIZE);
        let a = sv.create_pagetable().unwrap();
        let b = sv.create_pagetable().unwrap();
        sv.mmap(a, 0x1000, PAGE_SIZE).unwrap();
        sv.mmap(b, 0x1000, 2 * PAGE_SIZE).unwrap();
        assert_eq!(sv.vmem_usage(), 3 * PAGE_SIZE);
        sv.destroy_pagetable(a).unwrap();
        assert_eq!(sv.vmem_usage(), 2 * PAGE_SIZE);
        sv.destroy_pagetable(b).unwrap();
        assert_eq!(sv.vmem_usage(), 0);
        assert_eq!(sv.pmem_usage(), 0);
    }

    fn trace_ops<T: SvFormat>() -> (alloc::vec::Vec<(u64, u64)>, u64) {
        let mut sv = supervisor::<T>(SMALL_MEM_SIZE);
        let mut trace = vec![];
        let root = sv.create_pagetable().unwrap();
        for (hint, size) in [
            (0u64, 2 * PAGE_SIZE),
            (0x3000, PAGE_SIZE),
            (0x0040_0000, 3 * PAGE_SIZE),
        ] {
            let va = sv.mmap(root, hint, size).unwrap();
            trace.push((va, sv.vmem_usage()));
        }
        let (middle, _) = trace[1];
        sv.munmap(root, middle, PAGE_SIZE).unwrap();
        trace.push((middle, sv.vmem_usage()));
        sv.destroy_pagetable(root).unwrap();
        trace.push((0, sv.vmem_usage()));
        (trace, sv.pmem_usage())
    }

    #[test]
    fn sv32_and_sv39_agree_on_shared_traces() {
        let (trace32, pmem32) = trace_ops::<Sv32>();
        let (trace39, pmem39) = trace_ops::<Sv39>();
        assert_eq!(trace32, trace39);
        assert_eq!(pmem32, 0);
        assert_eq!(pmem39, 0);
    }

    #[test]
    #[should_panic]
    fn destroying_an_unknown_root_asserts() {
        let mut sv = supervisor::<Sv39>(MEM_SIZE);
        sv.create_pagetable().unwrap();
        sv.destroy_pagetable(0x7000).ok();
    }

    #[test]
    #[should_panic]
    fn unaligned_munmap_asserts() {
        let mut sv = supervisor::<Sv39>(MEM_SIZE);
        let root = sv.create_pagetable().unwrap();
        let va = sv.mmap(root, 0x1000, PAGE_SIZE).unwrap();
        sv.munmap(root, va + 1, PAGE_SIZE).ok();
    }

    #[test]
    #[should_panic]
    fn munmap_of_unmapped_region_asserts() {
        let mut sv = supervisor::<Sv39>(MEM_SIZE);
        let root = sv.create_pagetable().unwrap();
        sv.munmap(root, 0x1000, PAGE_SIZE).ok();
    }
}
