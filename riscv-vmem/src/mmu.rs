// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use alloc::sync::Arc;
use core::cmp::min;
use core::fmt;
use core::marker::PhantomData;

use phys_mem::{is_page_aligned, PhysMem, PAGE_SIZE};

use crate::format::SvFormat;
use crate::pte::{self, PteFlag};

/// Errors from the host-side bulk copy helpers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// No translation exists for the page containing `va`.
    Unmapped { va: u64 },
    /// The backing store refused an access.
    PhysMem(phys_mem::Error),
}

/// Holds the result of guest copy operations.
pub type Result<T> = core::result::Result<T, Error>;

impl From<phys_mem::Error> for Error {
    fn from(e: phys_mem::Error) -> Self {
        Error::PhysMem(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Unmapped { va } => write!(f, "no translation for vaddr {:#x}", va),
            Error::PhysMem(e) => write!(f, "physical memory error: {}", e),
        }
    }
}

/// A stateless walker over page tables stored in physical memory.
///
/// `Mmu` holds nothing but a shared handle to the byte store and never
/// mutates it; it resolves addresses exactly as the hardware would,
/// dereferencing each level through `PhysMem` rather than host pointers.
pub struct Mmu<T: SvFormat, M: PhysMem> {
    pmem: Arc<M>,
    _format: PhantomData<T>,
}

impl<T: SvFormat, M: PhysMem> Mmu<T, M> {
    /// Creates a walker over `pmem`.
    pub fn new(pmem: Arc<M>) -> Self {
        Self {
            pmem,
            _format: PhantomData,
        }
    }

    /// Address of the PTE indexed by `va` in the level-`level` table at
    /// `ptaddr`.
    pub(crate) fn pte_addr(ptaddr: u64, va: u64, level: usize) -> u64 {
        ptaddr + T::VA_VPN[level].extract(va) * T::PTE_BYTES
    }

    /// Loads the PTE word at `pte_addr`, zero-extending narrow formats.
    ///
    /// A table pointing outside physical memory means the table itself is
    /// corrupt, which is fatal.
    pub(crate) fn load_pte_at(&self, pte_addr: u64) -> u64 {
        let mut word = [0u8; 8];
        if let Err(e) = self
            .pmem
            .read(pte_addr, &mut word[..T::PTE_BYTES as usize])
        {
            log::error!("failed to load PTE at {:#x}: {}", pte_addr, e);
            panic!("PTE load from outside physical memory");
        }
        u64::from_le_bytes(word)
    }

    /// Stores the low `PTE_BYTES` of `pte` at `pte_addr`, little-endian.
    pub(crate) fn store_pte_at(&self, pte_addr: u64, pte: u64) -> phys_mem::Result<()> {
        debug_assert!(T::PTE_BYTES == 8 || pte >> (T::PTE_BYTES * 8) == 0);
        let word = pte.to_le_bytes();
        self.pmem.write(pte_addr, &word[..T::PTE_BYTES as usize])
    }

    /// Walks the table rooted at `root` and translates `va`.
    ///
    /// Returns `None` when no mapping exists; the supervisor also relies on
    /// that case as its vacancy probe, so it is not logged. Superpage
    /// leaves (a leaf above level 0) translate the way the hardware
    /// specifies even though the supervisor never creates them. A
    /// malformed entry means the table is corrupt and is fatal.
    pub fn translate(&self, root: u64, va: u64) -> Option<u64> {
        assert!(is_page_aligned(root));
        debug_assert!(va >> T::VA_BITS == 0);

        let mut ptaddr = root;
        for level in (0..T::LEVELS).rev() {
            let pte = self.load_pte_at(Self::pte_addr(ptaddr, va, level));
            if !PteFlag::Valid.is_set(pte) {
                return None;
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
                let mut pa = T::PAGE_OFFSET.insert(0, T::PAGE_OFFSET.extract(va));
                for i in 0..level {
                    // A superpage leaf must leave its low page-number
                    // fields clear.
                    if T::PTE_PPN[i].extract(pte) != 0 {
                        log::error!(
                            "superpage PTE.PPN[{}] != 0, ptroot={:#x}, vaddr={:#x}",
                            i,
                            root,
                            va
                        );
                    }
                    pa = T::PA_PPN[i].insert(pa, T::VA_VPN[i].extract(va));
                }
                for i in level..T::LEVELS {
                    pa = T::PA_PPN[i].insert(pa, T::PTE_PPN[i].extract(pte));
                }
                assert_ne!(pa, 0);
                return Some(pa);
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
        unreachable!("walk must terminate at a leaf or an invalid entry");
    }

    /// Copies `src` into the guest address space at `dst_va`, chunked so
    /// no single store crosses a page boundary.
    ///
    /// Host-side convenience, not modeled hardware. Fails fast on the
    /// first untranslatable page or backing-store refusal.
    pub fn copy_to_guest(&self, root: u64, dst_va: u64, src: &[u8]) -> Result<()> {
        let mut offset = 0;
        while offset < src.len() {
            let va = dst_va + offset as u64;
            let chunk = min(src.len() - offset, (PAGE_SIZE - va % PAGE_SIZE) as usize);
            let pa = self.translate(root, va).ok_or_else(|| {
                log::error!(
                    "copy_to_guest: no translation for vaddr={:#x}, ptroot={:#x}",
                    va,
                    root
                );
                Error::Unmapped { va }
            })?;
            self.pmem.write(pa, &src[offset..offset + chunk]).map_err(|e| {
                log::error!("copy_to_guest: write failed at paddr={:#x}: {}", pa, e);
                Error::PhysMem(e)
            })?;
            offset += chunk;
        }
        Ok(())
    }

    /// Copies guest memory starting at `src_va` into `dst`, chunked by
    /// page like `copy_to_guest`.
    pub fn copy_from_guest(&self, root: u64, dst: &mut [u8], src_va: u64) -> Result<()> {
        let mut offset = 0;
        while offset < dst.len() {
            let va = src_va + offset as u64;
            let chunk = min(dst.len() - offset, (PAGE_SIZE - va % PAGE_SIZE) as usize);
            let pa = self.translate(root, va).ok_or_else(|| {
                log::error!(
                    "copy_from_guest: no translation for vaddr={:#x}, ptroot={:#x}",
                    va,
                    root
                );
                Error::Unmapped { va }
            })?;
            self.pmem
                .read(pa, &mut dst[offset..offset + chunk])
                .map_err(|e| {
                    log::error!("copy_from_guest: read failed at paddr={:#x}: {}", pa, e);
                    Error::PhysMem(e)
                })?;
            offset += chunk;
        }
        Ok(())
    }
}
