// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use crate::bits::BitRange;
use crate::format::SvFormat;

/// The three-level, 39-bit translation scheme with 8-byte PTEs.
///
/// Bits above `PTE.PPN[2]` (reserved, PBMT, N) are never inspected.
#[derive(Copy, Clone, Debug)]
pub enum Sv39 {}

impl SvFormat for Sv39 {
    const LEVELS: usize = 3;
    const VA_BITS: u32 = 39;
    const PTE_BYTES: u64 = 8;

    const VA_VPN: &'static [BitRange] = &[
        BitRange::new(20, 12),
        BitRange::new(29, 21),
        BitRange::new(38, 30),
    ];
    const PA_PPN: &'static [BitRange] = &[
        BitRange::new(20, 12),
        BitRange::new(29, 21),
        BitRange::new(55, 30),
    ];
    const PTE_PPN: &'static [BitRange] = &[
        BitRange::new(18, 10),
        BitRange::new(27, 19),
        BitRange::new(53, 28),
    ];

    const PA_PPNFULL: BitRange = BitRange::new(55, 12);
    const PTE_PPNFULL: BitRange = BitRange::new(53, 10);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_widths_line_up() {
        for level in 0..Sv39::LEVELS {
            assert_eq!(
                Sv39::PTE_PPN[level].width(),
                Sv39::PA_PPN[level].width(),
                "level {}",
                level
            );
        }
        assert_eq!(Sv39::PTE_PPNFULL.width(), Sv39::PA_PPNFULL.width());
        assert_eq!(Sv39::ENTRIES_PER_PAGE, 512);
    }
}
