// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Simulator driver: exercises the supervisor and the walker over both
//! translation schemes, first with a fixed hello-world cycle, then with a
//! randomized create/destroy/map/unmap/readback workload checked against a
//! shadow model.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::{debug, error, info, warn};
use rand::Rng;

use phys_mem::{SimPhysMem, PAGE_SIZE};
use riscv_vmem::{Mmu, Supervisor, Sv32, Sv39, SvFormat};

const PMEM_SIZE: u64 = 1 << 32;
const SEED_SPACES: usize = 5;
const SEED_REGIONS: usize = 5;
const WORKLOAD_ITERS: usize = 20_000;

/// Live regions per address space: `root -> va -> bytes written there`.
type Shadow = HashMap<u64, BTreeMap<u64, Vec<u8>>>;

fn hello_cycle<T: SvFormat>(
    sv: &mut Supervisor<T, SimPhysMem>,
    mmu: &Mmu<T, SimPhysMem>,
) -> Result<(), String> {
    let root = sv
        .create_pagetable()
        .ok_or("create_pagetable refused")?;
    let msg = b"Hello, World!\0";
    let va = sv
        .mmap(root, 0x1000, msg.len() as u64)
        .ok_or("mmap refused")?;
    mmu.copy_to_guest(root, va, msg).map_err(|e| e.to_string())?;

    let pa = mmu.translate(root, va).ok_or("translate failed")?;
    let mut readback = [0u8; 14];
    mmu.copy_from_guest(root, &mut readback, va)
        .map_err(|e| e.to_string())?;
    if &readback != msg {
        return Err(format!("readback mismatch at vaddr {:#x}", va));
    }
    debug!("hello cycle: vaddr={:#x}, paddr={:#x}", va, pa);

    sv.munmap(root, va, msg.len() as u64)
        .map_err(|e| e.to_string())?;
    sv.destroy_pagetable(root).map_err(|e| e.to_string())?;
    if sv.vmem_usage() != 0 || sv.pmem_usage() != 0 {
        return Err("usage counters nonzero after teardown".into());
    }
    Ok(())
}

/// Maps a random region in `root`, fills it with random bytes, and records
/// it in the shadow. A refused `mmap` is a normal outcome.
fn map_random_region<T: SvFormat>(
    sv: &mut Supervisor<T, SimPhysMem>,
    mmu: &Mmu<T, SimPhysMem>,
    shadow: &mut Shadow,
    rng: &mut impl Rng,
    root: u64,
) -> Result<(), String> {
    let hint = rng.gen_range(0u64..1000) * PAGE_SIZE;
    let len = rng.gen_range(1..=8192usize);
    let Some(va) = sv.mmap(root, hint, len as u64) else {
        debug!("mmap refused: {:#x} + {:#x}", hint, len);
        return Ok(());
    };
    let mut data = vec![0u8; len];
    rng.fill(&mut data[..]);
    mmu.copy_to_guest(root, va, &data)
        .map_err(|e| format!("write to fresh region failed: {}", e))?;
    debug!("mapped vaddr={:#x}, size={} in root {:#x}", va, len, root);
    shadow.get_mut(&root).unwrap().insert(va, data);
    Ok(())
}

fn pick_root(shadow: &Shadow, rng: &mut impl Rng) -> Option<u64> {
    if shadow.is_empty() {
        return None;
    }
    let roots: Vec<u64> = shadow.keys().copied().collect();
    Some(roots[rng.gen_range(0..roots.len())])
}

fn pick_region(regions: &BTreeMap<u64, Vec<u8>>, rng: &mut impl Rng) -> Option<u64> {
    if regions.is_empty() {
        return None;
    }
    let vas: Vec<u64> = regions.keys().copied().collect();
    Some(vas[rng.gen_range(0..vas.len())])
}

fn random_workload<T: SvFormat>(
    sv: &mut Supervisor<T, SimPhysMem>,
    mmu: &Mmu<T, SimPhysMem>,
) -> Result<(), String> {
    let mut rng = rand::thread_rng();
    let mut shadow = Shadow::new();

    // Seed a few address spaces with data before the mixed phase.
    for _ in 0..SEED_SPACES {
        let Some(root) = sv.create_pagetable() else {
            warn!("seed create_pagetable refused");
            continue;
        };
        shadow.insert(root, BTreeMap::new());
        for _ in 0..SEED_REGIONS {
            map_random_region(sv, mmu, &mut shadow, &mut rng, root)?;
        }
    }

    for _ in 0..WORKLOAD_ITERS {
        let action: f64 = rng.gen_range(0.0..100.0);
        if action < 1.0 {
            match sv.create_pagetable() {
                Some(root) => {
                    debug!("created root {:#x}", root);
                    shadow.insert(root, BTreeMap::new());
                }
                None => debug!("create_pagetable refused"),
            }
        } else if action < 2.0 {
            let Some(root) = pick_root(&shadow, &mut rng) else {
                continue;
            };
            sv.destroy_pagetable(root)
                .map_err(|e| format!("destroy of {:#x} refused: {}", root, e))?;
            debug!("destroyed root {:#x}", root);
            shadow.remove(&root);
        } else if action < 10.0 {
            let Some(root) = pick_root(&shadow, &mut rng) else {
                continue;
            };
            map_random_region(sv, mmu, &mut shadow, &mut rng, root)?;
        } else if action < 18.0 {
            let Some(root) = pick_root(&shadow, &mut rng) else {
                continue;
            };
            let regions = shadow.get_mut(&root).unwrap();
            let Some(va) = pick_region(regions, &mut rng) else {
                continue;
            };
            let len = regions[&va].len() as u64;
            sv.munmap(root, va, len)
                .map_err(|e| format!("munmap of {:#x} refused: {}", va, e))?;
            debug!("unmapped vaddr={:#x}, size={}", va, len);
            regions.remove(&va);
        } else {
            let Some(root) = pick_root(&shadow, &mut rng) else {
                continue;
            };
            let regions = &shadow[&root];
            let Some(va) = pick_region(regions, &mut rng) else {
                continue;
            };
            let expected = &regions[&va];
            let mut readback = vec![0u8; expected.len()];
            mmu.copy_from_guest(root, &mut readback, va)
                .map_err(|e| format!("readback at {:#x} failed: {}", va, e))?;
            if &readback != expected {
                return Err(format!(
                    "readback mismatch at vaddr {:#x} in root {:#x}",
                    va, root
                ));
            }
        }
    }

    for root in shadow.keys().copied().collect::<Vec<_>>() {
        sv.destroy_pagetable(root)
            .map_err(|e| format!("final destroy of {:#x} refused: {}", root, e))?;
    }
    if sv.vmem_usage() != 0 || sv.pmem_usage() != 0 {
        return Err(format!(
            "usage counters nonzero after teardown: vmem={}, pmem={}",
            sv.vmem_usage(),
            sv.pmem_usage()
        ));
    }
    Ok(())
}

fn run_variant<T: SvFormat>(name: &str) -> bool {
    info!("{}: starting", name);
    let pmem = Arc::new(SimPhysMem::new(PMEM_SIZE));
    let mut sv = Supervisor::<T, _>::new(pmem.clone());
    let mmu = Mmu::<T, _>::new(pmem);

    if let Err(e) = hello_cycle(&mut sv, &mmu) {
        error!("{}: hello cycle failed: {}", name, e);
        return false;
    }
    if let Err(e) = random_workload(&mut sv, &mmu) {
        error!("{}: random workload failed: {}", name, e);
        return false;
    }
    info!("{}: all tests passed", name);
    true
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let ok39 = run_variant::<Sv39>("Sv39");
    let ok32 = run_variant::<Sv32>("Sv32");
    if ok39 && ok32 {
        info!("all tests passed: Sv39 and Sv32");
    } else {
        std::process::exit(1);
    }
}
