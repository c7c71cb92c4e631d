//! Streaming cache benchmarks.
//!
//! Measures cache hits, miss-and-load, and reader streaming under eviction.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use sampler_heap::cache::{CacheBlockManager, CacheConfig, DataClass, LoadPolicy, StreamLayout};
use sampler_heap::memory::{MemoryRegion, RegionConfig, ResourceId};
use sampler_heap::resource::{ReaderConfig, SampleReader};
use sampler_heap::storage::MemoryCard;

const BLOCK: usize = 32 * 1024;
const RES: ResourceId = ResourceId(1);

fn cache(region_len: usize, blocks: u64) -> CacheBlockManager<MemoryCard> {
    let region = Arc::new(MemoryRegion::new(RegionConfig::new("bench", region_len)).unwrap());
    let card = MemoryCard::patterned(blocks * (BLOCK as u64 / 512));
    let mut cache = CacheBlockManager::new(region, card, CacheConfig::default()).unwrap();
    cache
        .register_resource(RES, StreamLayout::contiguous(0, blocks * BLOCK as u64, BLOCK), DataClass::SampleData)
        .unwrap();
    cache
}

fn bench_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_hit");
    let mut cache = cache(1 << 22, 16);
    let handle = cache.get_block(RES, 0, LoadPolicy::LoadNow).unwrap();
    cache.release_block(handle).unwrap();

    group.bench_function("get_release", |b| {
        b.iter(|| {
            let handle = cache.get_block(RES, black_box(0), LoadPolicy::LoadNow).unwrap();
            cache.release_block(handle).unwrap();
        })
    });

    group.finish();
}

fn bench_stream_with_eviction(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_stream");
    // Room for 8 blocks while the resource has 64, so the walk keeps evicting.
    let mut cache = cache(8 * (BLOCK + 8) + 16, 64);

    group.throughput(Throughput::Bytes(64 * BLOCK as u64));
    group.bench_function("reader_walk_64_blocks", |b| {
        b.iter(|| {
            let mut reader = SampleReader::new(&cache, RES, &ReaderConfig::default()).unwrap();
            while reader.advance(&mut cache).unwrap() {
                black_box(reader.read(&cache, |d| d[0]).unwrap());
                cache.service_queue(4).unwrap();
            }
            reader.close(&mut cache).unwrap();
        })
    });

    group.finish();
}

criterion_group!(benches, bench_hit, bench_stream_with_eviction);
criterion_main!(benches);
