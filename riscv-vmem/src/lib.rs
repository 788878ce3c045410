// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! # Sv32/Sv39 virtual-memory simulation
//!
//! ## Key types
//!
//! - `SvFormat` describes a translation scheme: level count, word widths,
//!   and the bit ranges of every VA/PA/PTE field. `Sv32` and `Sv39` are its
//!   two instantiations; the walker and the supervisor are written once
//!   against the trait.
//! - `Mmu` is the stateless translator. Given a page-table root and a
//!   virtual address it performs the multi-level walk through simulated
//!   physical memory, exactly as the hardware would, plus host-side bulk
//!   copies in and out of a guest address space.
//! - `Supervisor` owns page tables on behalf of guest address spaces:
//!   create/destroy of roots and POSIX-like `mmap`/`munmap` of virtual
//!   regions, with every physical page coming from a buddy allocator.
//!
//! ## Ownership
//!
//! Page tables are never materialized as host objects; every reference
//! between levels is a physical address stored in a PTE and dereferenced
//! through the `PhysMem` interface. The supervisor owns all table and data
//! pages it allocates; guests hold opaque root addresses, and the
//! translator holds nothing but a read handle on physical memory.

#![no_std]

extern crate alloc;

pub mod bits;
pub mod format;
pub mod mmu;
pub mod pte;
pub mod supervisor;
mod sv32;
mod sv39;

pub use bits::BitRange;
pub use format::SvFormat;
pub use mmu::Error as MmuError;
pub use mmu::Mmu;
pub use pte::PteFlag;
pub use supervisor::Error as SupervisorError;
pub use supervisor::Supervisor;
pub use sv32::Sv32;
pub use sv39::Sv39;

#[cfg(test)]
#[macro_use]
extern crate std;

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;
    use alloc::vec;
    use alloc::vec::Vec;
    use phys_mem::{SimPhysMem, PAGE_SIZE};

    use super::*;

    const MEM_SIZE: u64 = 16 << 20;

    // The driver pattern: one supervisor mutating the tables, one
    // standalone walker reading them over the same physical memory.
    fn full_cycle<T: SvFormat>() {
        let pmem = Arc::new(SimPhysMem::new(MEM_SIZE));
        let mut sv = Supervisor::<T, _>::new(pmem.clone());
        let mmu = Mmu::<T, _>::new(pmem);

        let root = sv.create_pagetable().unwrap();
        let payload: Vec<u8> = (0..3 * PAGE_SIZE + 17).map(|i| (i * 7) as u8).collect();
        let va = sv.mmap(root, 0x1000, payload.len() as u64).unwrap();
        mmu.copy_to_guest(root, va, &payload).unwrap();

        let mut readback = vec![0u8; payload.len()];
        mmu.copy_from_guest(root, &mut readback, va).unwrap();
        assert_eq!(readback, payload);

        // Every page of the region resolves, to distinct frames.
        let mut frames = vec![];
        for k in 0..4 {
            let pa = mmu.translate(root, va + k * PAGE_SIZE).unwrap();
            assert_ne!(pa, 0);
            assert!(!frames.contains(&pa));
            frames.push(pa);
        }

        sv.munmap(root, va, payload.len() as u64).unwrap();
        assert!(mmu.translate(root, va).is_none());
        sv.destroy_pagetable(root).unwrap();
        assert_eq!(sv.vmem_usage(), 0);
        assert_eq!(sv.pmem_usage(), 0);
    }

    #[test]
    fn sv39_full_cycle() {
        full_cycle::<Sv39>();
    }

    #[test]
    fn sv32_full_cycle() {
        full_cycle::<Sv32>();
    }
}
