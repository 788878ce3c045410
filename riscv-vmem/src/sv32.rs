// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use crate::bits::BitRange;
use crate::format::SvFormat;

/// The two-level, 32-bit translation scheme with 4-byte PTEs.
///
/// Physical addresses reach 34 bits: `PPN[1]` is two bits wider than the
/// corresponding `VPN[1]`.
#[derive(Copy, Clone, Debug)]
pub enum Sv32 {}

impl SvFormat for Sv32 {
    const LEVELS: usize = 2;
    const VA_BITS: u32 = 32;
    const PTE_BYTES: u64 = 4;

    const VA_VPN: &'static [BitRange] = &[BitRange::new(21, 12), BitRange::new(31, 22)];
    const PA_PPN: &'static [BitRange] = &[BitRange::new(21, 12), BitRange::new(33, 22)];
    const PTE_PPN: &'static [BitRange] = &[BitRange::new(19, 10), BitRange::new(31, 20)];

    const PA_PPNFULL: BitRange = BitRange::new(33, 12);
    const PTE_PPNFULL: BitRange = BitRange::new(31, 10);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_widths_line_up() {
        for level in 0..Sv32::LEVELS {
            assert_eq!(
                Sv32::PTE_PPN[level].width(),
                Sv32::PA_PPN[level].width(),
                "level {}",
                level
            );
        }
        assert_eq!(Sv32::PTE_PPNFULL.width(), Sv32::PA_PPNFULL.width());
        assert_eq!(Sv32::ENTRIES_PER_PAGE, 1024);
    }
}
