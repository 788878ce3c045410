// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use phys_mem::PAGE_SIZE;

use crate::bits::BitRange;

/// Describes one Sv translation scheme.
///
/// The walker and the supervisor are written once against this trait; a
/// variant is nothing more than its level count, word widths, and the bit
/// ranges of the VA, PA, and PTE fields. The per-level slices are indexed
/// by level, least significant first, and carry exactly `LEVELS` entries.
pub trait SvFormat {
    /// Number of page-table levels.
    const LEVELS: usize;

    /// Virtual-address width in bits.
    const VA_BITS: u32;

    /// Bytes per PTE as stored in a page table.
    const PTE_BYTES: u64;

    /// `VA.VPN[i]`, the per-level virtual page-number fields.
    const VA_VPN: &'static [BitRange];

    /// `PA.PPN[i]`, the per-level physical page-number fields.
    const PA_PPN: &'static [BitRange];

    /// `PTE.PPN[i]`, the per-level page-number fields of an entry.
    const PTE_PPN: &'static [BitRange];

    /// The concatenated page-number field of a physical address.
    const PA_PPNFULL: BitRange;

    /// The concatenated page-number field of an entry.
    const PTE_PPNFULL: BitRange;

    /// Page-offset field, common to virtual and physical addresses.
    const PAGE_OFFSET: BitRange = BitRange::new(11, 0);

    /// Entries per page-sized table.
    const ENTRIES_PER_PAGE: u64 = PAGE_SIZE / Self::PTE_BYTES;
}
