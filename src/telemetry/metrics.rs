//! Metrics recorded through the `metrics` facade.
//!
//! No exporter is bundled; without an installed recorder these are no-ops.

use metrics::{counter, describe_counter, describe_gauge, gauge};

use crate::memory::StealableQueue;

/// Register descriptions for every metric this crate emits.
pub fn describe_metrics() {
    describe_counter!("sampler_heap_allocations_total", "Successful allocations");
    describe_counter!("sampler_heap_allocated_bytes_total", "Bytes handed out");
    describe_counter!(
        "sampler_heap_allocation_failures_total",
        "Allocations that failed after eviction"
    );
    describe_counter!("sampler_heap_steals_total", "Stealable spans evicted");
    describe_gauge!("sampler_heap_region_free_bytes", "Free payload bytes per region");
    describe_counter!("sampler_heap_block_loads_total", "Cache block loads by outcome");
    describe_counter!("sampler_heap_block_lookups_total", "Cache block lookups by result");
}

pub fn record_allocation(region: &'static str, bytes: usize) {
    counter!("sampler_heap_allocations_total", "region" => region).increment(1);
    counter!("sampler_heap_allocated_bytes_total", "region" => region).increment(bytes as u64);
}

pub fn record_allocation_failure(region: &'static str) {
    counter!("sampler_heap_allocation_failures_total", "region" => region).increment(1);
}

pub fn record_steal(region: &'static str, queue: StealableQueue) {
    counter!("sampler_heap_steals_total", "region" => region, "queue" => queue.name()).increment(1);
}

pub fn record_region_free(region: &'static str, free_bytes: usize) {
    gauge!("sampler_heap_region_free_bytes", "region" => region).set(free_bytes as f64);
}

pub fn record_block_load(outcome: &'static str) {
    counter!("sampler_heap_block_loads_total", "outcome" => outcome).increment(1);
}

pub fn record_block_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("sampler_heap_block_lookups_total", "result" => result).increment(1);
}
