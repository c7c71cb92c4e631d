//! `soak` subcommand: randomized workloads against a fresh region.
//!
//! Sizes are drawn log-distributed, which is close to the worst case for
//! packing. Each workload reports how much of the region was usefully
//! occupied, averaged over all rounds, and walks the heap at the end.

use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::memory::{
    AllocError, Block, HeapCorruption, MemoryRegion, RegionConfig, ReleaseHint, ReservationError, ResourceId,
    Stealable, StealableQueue, StealReason,
};

/// Which workload to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Workload {
    /// Fill the region, then free everything, each round.
    Packing,
    /// Free about a quarter of live blocks and refill the gaps, each round.
    #[default]
    Fragmentation,
    /// Allocate cached 1 MiB stealables until eviction has to kick in.
    Stealable,
}

impl FromStr for Workload {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "packing" => Ok(Self::Packing),
            "fragmentation" => Ok(Self::Fragmentation),
            "stealable" => Ok(Self::Stealable),
            other => Err(format!("unknown workload: {other}")),
        }
    }
}

#[derive(Debug, Error)]
pub enum SoakError {
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error(transparent)]
    Reservation(#[from] ReservationError),
    #[error("heap check failed: {0}")]
    Corrupted(#[from] HeapCorruption),
}

#[derive(Debug, Clone)]
pub struct SoakOptions {
    pub workload: Workload,
    pub rounds: usize,
    pub region_bytes: usize,
    pub seed: u64,
    pub json: bool,
}

impl Default for SoakOptions {
    fn default() -> Self {
        Self {
            workload: Workload::default(),
            rounds: 1000,
            region_bytes: 10_000_000,
            seed: 1,
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SoakReport {
    pub workload: Workload,
    pub rounds: usize,
    pub region_bytes: usize,
    pub seed: u64,
    /// Requested bytes held per round over region length, averaged.
    pub mean_occupancy: f64,
    pub min_occupancy: f64,
    pub allocations: u64,
    pub failures: u64,
    pub steals: u64,
    /// Packing rounds that did not coalesce back into one free span.
    pub fragmented_rounds: usize,
}

/// Parse `soak` flags. `args` starts after the subcommand name.
pub fn parse_args(args: &[String]) -> Result<SoakOptions, String> {
    let mut opts = SoakOptions::default();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        if flag == "--json" {
            opts.json = true;
            i += 1;
            continue;
        }
        let value = args
            .get(i + 1)
            .ok_or_else(|| format!("Missing value for {flag}"))?;
        match flag {
            "--rounds" => opts.rounds = parse_number(flag, value)?,
            "--region-bytes" => opts.region_bytes = parse_number(flag, value)?,
            "--seed" => opts.seed = parse_number(flag, value)?,
            "--workload" => opts.workload = value.parse()?,
            _ => return Err(format!("Unknown argument: {flag}")),
        }
        i += 2;
    }
    Ok(opts)
}

fn parse_number<T: FromStr>(flag: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid value for {flag}: {value}"))
}

/// Run the workload and summarise it.
pub fn run_workload(opts: &SoakOptions) -> Result<SoakReport, SoakError> {
    let region = MemoryRegion::new(RegionConfig::new("soak", opts.region_bytes))?;
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut report = SoakReport {
        workload: opts.workload,
        rounds: opts.rounds,
        region_bytes: region.len(),
        seed: opts.seed,
        min_occupancy: 1.0,
        ..SoakReport::default()
    };

    match opts.workload {
        Workload::Packing => packing(&region, &mut rng, &mut report)?,
        Workload::Fragmentation => fragmentation(&region, &mut rng, &mut report)?,
        Workload::Stealable => stealable(&region, &mut rng, &mut report)?,
    }

    region.check_integrity()?;
    report.steals = region.stats()?.steals;
    info!(
        workload = ?report.workload,
        rounds = report.rounds,
        mean_occupancy = report.mean_occupancy,
        "soak finished"
    );
    Ok(report)
}

fn record_round(report: &mut SoakReport, held: usize, region_len: usize, round: usize) {
    let occupancy = held as f64 / region_len as f64;
    report.mean_occupancy += (occupancy - report.mean_occupancy) / (round + 1) as f64;
    report.min_occupancy = report.min_occupancy.min(occupancy);
    debug!(round, occupancy, "round complete");
}

fn allocate_counted(
    region: &MemoryRegion,
    size: usize,
    report: &mut SoakReport,
) -> Result<Option<Block>, AllocError> {
    match region.allocate(size, false, None) {
        Ok(block) => {
            report.allocations += 1;
            Ok(Some(block))
        }
        Err(AllocError::OutOfMemory { .. }) => {
            report.failures += 1;
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

fn packing(region: &MemoryRegion, rng: &mut StdRng, report: &mut SoakReport) -> Result<(), AllocError> {
    const SLOTS: usize = 700;
    let mut blocks = Vec::with_capacity(SLOTS);
    for round in 0..report.rounds {
        let mut held = 0;
        for _ in 0..SLOTS {
            let size = rng.gen_range(1..=10usize) << rng.gen_range(2..18u32);
            if let Some(block) = allocate_counted(region, size, report)? {
                held += size;
                blocks.push(block);
            }
        }
        for block in blocks.drain(..) {
            region.deallocate(block)?;
        }
        if region.stats()?.free_spans != 1 {
            report.fragmented_rounds += 1;
        }
        record_round(report, held, region.len(), round);
    }
    Ok(())
}

fn fragmentation(region: &MemoryRegion, rng: &mut StdRng, report: &mut SoakReport) -> Result<(), AllocError> {
    const SLOTS: usize = 600;
    let mut slots: Vec<Option<(Block, usize)>> = vec![None; SLOTS];
    for (i, slot) in slots.iter_mut().enumerate() {
        if i % 4 != 0 {
            let size = rng.gen_range(0..10usize) << rng.gen_range(0..18u32);
            *slot = allocate_counted(region, size, report)?.map(|b| (b, size));
        }
    }

    for round in 0..report.rounds {
        let mut held = 0;
        for slot in slots.iter_mut() {
            match *slot {
                None => {
                    let size = rng.gen_range(0..10usize) << rng.gen_range(0..18u32);
                    if let Some(block) = allocate_counted(region, size, report)? {
                        held += size;
                        *slot = Some((block, size));
                    }
                }
                Some((block, size)) => {
                    if rng.gen_range(0..4u32) == 0 {
                        region.deallocate(block)?;
                        *slot = None;
                    } else {
                        held += size;
                    }
                }
            }
        }
        record_round(report, held, region.len(), round);
    }

    for (block, _) in slots.into_iter().flatten() {
        region.deallocate(block)?;
    }
    Ok(())
}

struct SoakStealable;

impl Stealable for SoakStealable {
    fn may_be_stolen(&self, _exclude: Option<ResourceId>) -> bool {
        true
    }

    fn steal(&mut self, _reason: StealReason) {}

    fn appropriate_queue(&self) -> StealableQueue {
        StealableQueue::IdleSampleData
    }
}

fn stealable(region: &MemoryRegion, rng: &mut StdRng, report: &mut SoakReport) -> Result<(), SoakError> {
    const BLOCK: usize = 1 << 20;
    for round in 0..report.rounds {
        // every tenth allocation is a small object, as in a sample library
        let size = if round % 10 == 0 {
            rng.gen_range(64..4096usize)
        } else {
            BLOCK
        };
        let id = match region.allocate_stealable(size, Box::new(SoakStealable), None) {
            Ok(id) => id,
            Err(AllocError::OutOfMemory { .. } | AllocError::TooLarge { .. }) => {
                report.failures += 1;
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        report.allocations += 1;
        region.remove_reservation(id, ReleaseHint::KeepCached)?;
        let stats = region.stats()?;
        record_round(report, stats.live_bytes, region.len(), round);
    }
    Ok(())
}

/// Entry point for `sampler-heap soak`. Returns the process exit code.
pub fn run(args: &[String]) -> i32 {
    let opts = match parse_args(args) {
        Ok(opts) => opts,
        Err(msg) => {
            eprintln!("{msg}");
            eprintln!(
                "Usage: sampler-heap soak [--workload packing|fragmentation|stealable] \
                 [--rounds N] [--region-bytes N] [--seed N] [--json]"
            );
            return 2;
        }
    };

    match run_workload(&opts) {
        Ok(report) if opts.json => match serde_json::to_string_pretty(&report) {
            Ok(json) => {
                println!("{json}");
                0
            }
            Err(e) => {
                eprintln!("Error: {e}");
                1
            }
        },
        Ok(report) => {
            print_report(&report);
            0
        }
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    }
}

fn print_report(report: &SoakReport) {
    println!("workload:          {:?}", report.workload);
    println!("rounds:            {}", report.rounds);
    println!("region bytes:      {}", report.region_bytes);
    println!("seed:              {}", report.seed);
    println!("mean occupancy:    {:.4}", report.mean_occupancy);
    println!("min occupancy:     {:.4}", report.min_occupancy);
    println!("allocations:       {}", report.allocations);
    println!("failures:          {}", report.failures);
    println!("steals:            {}", report.steals);
    println!("fragmented rounds: {}", report.fragmented_rounds);
}
