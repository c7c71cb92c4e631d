//! A single managed address range.
//!
//! The region owns a byte buffer laid out as a sequence of spans, each framed
//! by a matching header and footer tag. Two sentinel tags marked allocated sit
//! at the very start and end of the buffer so coalescing never walks out of
//! bounds.
//!
//! All state sits behind one guard. Entry points take it with `try_lock` and
//! never wait: a call that arrives while another is in progress (a `steal`
//! callback re-entering, or an interrupt-level caller) fails with `Busy`.

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, trace};

use super::error::{AllocError, HeapCorruption};
use super::free_index::{FreeIndex, FreeSpan};
use super::reclaim::ReclaimQueues;
use super::stealable::{ResourceId, Stealable, StealableId, StealableQueue, StealReason};
use super::tag::{BoundaryTag, SpanKind, TagStore, MAX_SPAN_SIZE, SPAN_OVERHEAD, TAG_BYTES};
use crate::telemetry;

/// Bytes taken by the two sentinel tags at the ends of a region.
pub const FENCE_BYTES: usize = 2 * TAG_BYTES;

const MIN_REGION_BYTES: usize = 64;

/// Region layout and placement policy.
#[derive(Debug, Clone)]
pub struct RegionConfig {
    /// Name used in logs, metrics and errors.
    pub name: &'static str,
    /// Total bytes under management, tags included.
    pub len: usize,
    /// Smallest span footprint. Power of two, at least 16.
    pub min_align: usize,
    /// Footprints above this grow in whole chunks of this size.
    pub max_align: usize,
    /// Allocations up to this size are carved from the end of a free span,
    /// larger ones from the start.
    pub pivot: usize,
}

impl RegionConfig {
    pub fn new(name: &'static str, len: usize) -> Self {
        Self {
            name,
            len,
            min_align: 16,
            max_align: 512,
            pivot: 8192,
        }
    }

    /// Check alignment and length limits.
    pub fn validate(&self) -> Result<(), AllocError> {
        if !self.min_align.is_power_of_two() || self.min_align < 2 * SPAN_OVERHEAD {
            return Err(AllocError::Config(format!(
                "{}: min_align {} must be a power of two >= 16",
                self.name, self.min_align
            )));
        }
        if !self.max_align.is_power_of_two() || self.max_align < self.min_align {
            return Err(AllocError::Config(format!(
                "{}: max_align {} must be a power of two >= min_align",
                self.name, self.max_align
            )));
        }
        if self.len < MIN_REGION_BYTES || self.len - 2 * SPAN_OVERHEAD > MAX_SPAN_SIZE {
            return Err(AllocError::Config(format!(
                "{}: length {} outside {}..={}",
                self.name,
                self.len,
                MIN_REGION_BYTES,
                MAX_SPAN_SIZE + 2 * SPAN_OVERHEAD
            )));
        }
        Ok(())
    }
}

/// A live allocation, identified by its payload offset within a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block {
    addr: usize,
}

impl Block {
    /// Payload offset from the start of the region.
    pub fn offset(&self) -> usize {
        self.addr
    }
}

/// Result of growing a block in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extension {
    /// The block after growth. Its offset moves down by `left`.
    pub block: Block,
    /// Bytes gained below the old payload start.
    pub left: usize,
    /// Bytes gained above the old payload end.
    pub right: usize,
}

impl Extension {
    pub fn total(&self) -> usize {
        self.left + self.right
    }
}

/// Result of trimming the front of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortened {
    pub block: Block,
    pub released: usize,
}

/// Point-in-time counters for one region.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RegionStats {
    pub name: &'static str,
    pub len: usize,
    pub capacity: usize,
    pub free_bytes: usize,
    pub free_spans: usize,
    pub largest_free: usize,
    pub live_blocks: usize,
    pub live_bytes: usize,
    pub stealables: usize,
    pub queued: usize,
    pub steals: u64,
}

impl RegionStats {
    /// Live payload bytes as a fraction of the region length.
    pub fn occupancy(&self) -> f64 {
        if self.len == 0 {
            return 0.0;
        }
        self.live_bytes as f64 / self.len as f64
    }
}

/// Totals gathered by a full heap walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapReport {
    pub free_bytes: usize,
    pub free_spans: usize,
    pub live_bytes: usize,
    pub live_blocks: usize,
    pub overhead_bytes: usize,
}

impl HeapReport {
    pub fn accounted(&self) -> usize {
        self.free_bytes + self.live_bytes + self.overhead_bytes
    }
}

pub(crate) struct RegionState {
    store: TagStore,
    free: FreeIndex,
    pub(crate) stealables: ReclaimQueues,
    live_blocks: usize,
    live_bytes: usize,
    steals: u64,
}

/// One independently managed memory span.
pub struct MemoryRegion {
    config: RegionConfig,
    capacity: usize,
    state: Mutex<RegionState>,
}

impl MemoryRegion {
    /// Create a region with one free span covering everything but the tags.
    pub fn new(mut config: RegionConfig) -> Result<Self, AllocError> {
        config.len -= config.len % SPAN_OVERHEAD;
        config.validate()?;

        let len = config.len;
        let mut store = TagStore::new(len);
        store.write(0, BoundaryTag::new(SpanKind::Allocated, 0));
        store.write(len - TAG_BYTES, BoundaryTag::new(SpanKind::Allocated, 0));

        let first = SPAN_OVERHEAD;
        let capacity = len - 2 * SPAN_OVERHEAD;
        store.write_span(first, BoundaryTag::free(capacity));
        let mut free = FreeIndex::new();
        free.insert(first, capacity);

        debug!(region = config.name, len, capacity, "region initialised");

        Ok(Self {
            config,
            capacity,
            state: Mutex::new(RegionState {
                store,
                free,
                stealables: ReclaimQueues::new(),
                live_blocks: 0,
                live_bytes: 0,
                steals: 0,
            }),
        })
    }

    pub fn name(&self) -> &'static str {
        self.config.name
    }

    pub fn config(&self) -> &RegionConfig {
        &self.config
    }

    /// Total bytes under management.
    pub fn len(&self) -> usize {
        self.config.len
    }

    /// Largest payload an empty region could hand out.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn enter(&self) -> Result<MutexGuard<'_, RegionState>, AllocError> {
        self.state.try_lock().ok_or(AllocError::Busy {
            region: self.config.name,
        })
    }

    /// Usable size a request of `size` bytes is rounded up to. Saturates
    /// at `usize::MAX` for requests no region could hold.
    pub fn pad_size(&self, size: usize) -> usize {
        let total = size.saturating_add(SPAN_OVERHEAD);
        let footprint = if total < self.config.min_align {
            Some(self.config.min_align)
        } else {
            let max = self.config.max_align;
            let chunks = (total - 1) / max * max;
            (total - chunks)
                .checked_next_power_of_two()
                .and_then(|rest| chunks.checked_add(rest.max(SPAN_OVERHEAD)))
        };
        footprint.map_or(usize::MAX, |f| f - SPAN_OVERHEAD)
    }

    /// Allocate `size` bytes. With `may_steal`, unreserved stealables are
    /// evicted (never those vetoing for `exclude`) until a span fits.
    pub fn allocate(
        &self,
        size: usize,
        may_steal: bool,
        exclude: Option<ResourceId>,
    ) -> Result<Block, AllocError> {
        let mut state = self.enter()?;
        let addr = self.place(&mut state, size, SpanKind::Allocated, may_steal, exclude)?;
        Ok(Block { addr })
    }

    /// Allocate a stealable span owned by `owner`.
    ///
    /// The entry starts with one reservation, so it is not eligible for
    /// eviction until the owner removes it.
    pub fn allocate_stealable(
        &self,
        size: usize,
        owner: Box<dyn Stealable>,
        exclude: Option<ResourceId>,
    ) -> Result<StealableId, AllocError> {
        let mut state = self.enter()?;
        let addr = self.place(&mut state, size, SpanKind::Stealable, true, exclude)?;
        Ok(state.stealables.insert(owner, addr, 1))
    }

    /// Free a block, coalescing with free neighbours.
    ///
    /// Freeing a stealable span this way drops its owner without notifying it.
    pub fn deallocate(&self, block: Block) -> Result<(), AllocError> {
        let mut state = self.enter()?;
        let tag = self.read_live(&state, block.addr)?;
        if tag.kind == SpanKind::Stealable {
            if let Some(id) = state.stealables.id_at(block.addr) {
                state.stealables.remove(id);
            }
        }
        self.release_live(&mut state, block.addr, tag.size)?;
        trace!(region = self.config.name, addr = block.addr, size = tag.size, "deallocated");
        Ok(())
    }

    /// Owner-driven teardown of a stealable entry, reserved or not.
    pub fn destroy_stealable(&self, id: StealableId) -> Result<(), AllocError> {
        let mut state = self.enter()?;
        self.destroy_locked(&mut state, id)
    }

    pub(crate) fn destroy_locked(&self, state: &mut RegionState, id: StealableId) -> Result<(), AllocError> {
        let occupant = state.stealables.remove(id).ok_or(AllocError::StaleHandle {
            region: self.config.name,
            id,
        })?;
        let tag = self.read_live(state, occupant.payload)?;
        self.release_live(state, occupant.payload, tag.size)
    }

    /// Usable bytes of a live block.
    pub fn allocated_size_of(&self, block: Block) -> Result<usize, AllocError> {
        let state = self.enter()?;
        Ok(self.read_live(&state, block.addr)?.size)
    }

    /// Current block of a stealable entry.
    pub fn block_of(&self, id: StealableId) -> Result<Block, AllocError> {
        let state = self.enter()?;
        state
            .stealables
            .get(id)
            .map(|o| Block { addr: o.payload })
            .ok_or(AllocError::StaleHandle {
                region: self.config.name,
                id,
            })
    }

    /// Whether `id` still names a registered stealable.
    pub fn is_live(&self, id: StealableId) -> Result<bool, AllocError> {
        let state = self.enter()?;
        Ok(state.stealables.get(id).is_some())
    }

    /// Move an unreserved entry to the queue its owner currently asks for.
    pub fn requeue(&self, id: StealableId) -> Result<(), AllocError> {
        let mut state = self.enter()?;
        let occupant = state.stealables.get(id).ok_or(AllocError::StaleHandle {
            region: self.config.name,
            id,
        })?;
        if occupant.reservations == 0 {
            let queue = occupant.owner.appropriate_queue();
            state.stealables.enqueue(id, queue);
        }
        Ok(())
    }

    /// Give back the top of a block so that its usable size becomes
    /// `pad_size(new_size)`. Returns the resulting size, unchanged if too
    /// little would be released to form a free span.
    pub fn shorten_right(&self, block: Block, new_size: usize) -> Result<usize, AllocError> {
        let mut state = self.enter()?;
        let tag = self.read_live(&state, block.addr)?;
        let new_size = self.pad_size(new_size);

        let right_free = matches!(
            state.store.read(block.addr + tag.size + TAG_BYTES),
            Some(t) if t.kind == SpanKind::Free
        );
        let limit = if right_free {
            tag.size
        } else {
            tag.size.saturating_sub(SPAN_OVERHEAD)
        };
        if new_size >= limit {
            return Ok(tag.size);
        }

        state.store.write_span(block.addr, BoundaryTag::new(tag.kind, new_size));
        let tail = block.addr + new_size + SPAN_OVERHEAD;
        self.release_span(&mut state, tail, tag.size - new_size - SPAN_OVERHEAD, false, true)?;
        state.live_bytes -= tag.size - new_size;
        trace!(region = self.config.name, addr = block.addr, from = tag.size, to = new_size, "shortened right");
        Ok(new_size)
    }

    /// Give back `amount` bytes (after padding) from the front of a block.
    /// The payload start moves up by the number of bytes released.
    pub fn shorten_left(&self, block: Block, amount: usize) -> Result<Shortened, AllocError> {
        let mut state = self.enter()?;
        let tag = self.read_live(&state, block.addr)?;
        let new_size = self.pad_size(tag.size.saturating_sub(amount));

        let left_free = matches!(
            state.store.read(block.addr - SPAN_OVERHEAD),
            Some(t) if t.kind == SpanKind::Free
        );
        let limit = if left_free {
            tag.size
        } else {
            tag.size.saturating_sub(SPAN_OVERHEAD)
        };
        if new_size >= limit {
            return Ok(Shortened { block, released: 0 });
        }

        let released = tag.size - new_size;
        let addr = block.addr + released;
        state.store.write_span(addr, BoundaryTag::new(tag.kind, new_size));
        self.release_span(&mut state, block.addr, released - SPAN_OVERHEAD, true, false)?;
        state.live_bytes -= released;
        if tag.kind == SpanKind::Stealable {
            state.stealables.relocate(block.addr, addr);
        }
        trace!(region = self.config.name, from = block.addr, to = addr, released, "shortened left");
        Ok(Shortened {
            block: Block { addr },
            released,
        })
    }

    /// Grow a block into free neighbours, right side first.
    ///
    /// Grants nothing unless at least `min` bytes are available; otherwise
    /// aims for `ideal`. Live data is never moved.
    pub fn extend(&self, block: Block, min: usize, ideal: usize) -> Result<Extension, AllocError> {
        let mut state = self.enter()?;
        let tag = self.read_live(&state, block.addr)?;
        let unchanged = Extension {
            block,
            left: 0,
            right: 0,
        };

        if min > self.capacity {
            return Ok(unchanged);
        }
        let min = round_up(min, SPAN_OVERHEAD);
        let ideal = round_up(ideal.min(self.capacity), SPAN_OVERHEAD).max(min);
        if ideal == 0 {
            return Ok(unchanged);
        }

        let right_header = block.addr + tag.size + TAG_BYTES;
        let right = match state.store.read(right_header) {
            Some(t) if t.kind == SpanKind::Free => Some(FreeSpan {
                addr: right_header + TAG_BYTES,
                len: t.size,
            }),
            _ => None,
        };
        let left_footer = block.addr - SPAN_OVERHEAD;
        let left = match state.store.read(left_footer) {
            Some(t) if t.kind == SpanKind::Free => Some(FreeSpan {
                addr: left_footer - t.size,
                len: t.size,
            }),
            _ => None,
        };

        let avail_right = right.map_or(0, |s| s.len + SPAN_OVERHEAD);
        let avail_left = left.map_or(0, |s| s.len + SPAN_OVERHEAD);
        if avail_right + avail_left < min.max(1) {
            return Ok(unchanged);
        }

        let split_floor = SPAN_OVERHEAD + self.config.min_align;
        let take = |avail: usize, need: usize| {
            if avail == 0 || need == 0 {
                0
            } else if avail <= need || avail - need < split_floor {
                avail
            } else {
                need
            }
        };
        let gained_right = take(avail_right, ideal);
        let gained_left = take(avail_left, ideal.saturating_sub(gained_right));

        if let Some(span) = right.filter(|_| gained_right > 0) {
            self.unindex(&mut state, span)?;
            if gained_right < avail_right {
                let rest = span.addr + gained_right;
                let rest_len = span.len - gained_right;
                state.free.insert(rest, rest_len);
                state.store.write_span(rest, BoundaryTag::free(rest_len));
            }
        }
        if let Some(span) = left.filter(|_| gained_left > 0) {
            self.unindex(&mut state, span)?;
            if gained_left < avail_left {
                let rest_len = span.len - gained_left;
                state.free.insert(span.addr, rest_len);
                state.store.write_span(span.addr, BoundaryTag::free(rest_len));
            }
        }

        let addr = block.addr - gained_left;
        let size = tag.size + gained_left + gained_right;
        state.store.write_span(addr, BoundaryTag::new(tag.kind, size));
        state.live_bytes += gained_left + gained_right;
        if tag.kind == SpanKind::Stealable {
            state.stealables.relocate(block.addr, addr);
        }
        trace!(region = self.config.name, addr, gained_left, gained_right, "extended");
        Ok(Extension {
            block: Block { addr },
            left: gained_left,
            right: gained_right,
        })
    }

    /// Run `f` over the payload of a live block.
    pub fn with_payload<R>(&self, block: Block, f: impl FnOnce(&[u8]) -> R) -> Result<R, AllocError> {
        let state = self.enter()?;
        let tag = self.read_live(&state, block.addr)?;
        Ok(f(state.store.payload(block.addr, tag.size)))
    }

    /// Run `f` over the payload of a live block, mutably.
    pub fn with_payload_mut<R>(
        &self,
        block: Block,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, AllocError> {
        let mut state = self.enter()?;
        let tag = self.read_live(&state, block.addr)?;
        Ok(f(state.store.payload_mut(block.addr, tag.size)))
    }

    /// Number of entries waiting in one eviction queue.
    pub fn queue_len(&self, queue: StealableQueue) -> Result<usize, AllocError> {
        Ok(self.enter()?.stealables.queue_len(queue))
    }

    pub fn stats(&self) -> Result<RegionStats, AllocError> {
        let state = self.enter()?;
        Ok(RegionStats {
            name: self.config.name,
            len: self.config.len,
            capacity: self.capacity,
            free_bytes: state.free.total_bytes(),
            free_spans: state.free.len(),
            largest_free: state.free.largest().map_or(0, |s| s.len),
            live_blocks: state.live_blocks,
            live_bytes: state.live_bytes,
            stealables: state.stealables.live(),
            queued: state.stealables.queued(),
            steals: state.steals,
        })
    }

    /// Walk every span, checking tags, the free index and byte accounting.
    pub fn check_integrity(&self) -> Result<HeapReport, HeapCorruption> {
        let state = self.state.try_lock().ok_or(HeapCorruption::Busy)?;
        let len = self.config.len;
        let end = len - TAG_BYTES;
        let fence = BoundaryTag::new(SpanKind::Allocated, 0);
        if state.store.read(0) != Some(fence) {
            return Err(HeapCorruption::InvalidTag { addr: 0 });
        }
        if state.store.read(end) != Some(fence) {
            return Err(HeapCorruption::InvalidTag { addr: end });
        }

        let mut report = HeapReport {
            free_bytes: 0,
            free_spans: 0,
            live_bytes: 0,
            live_blocks: 0,
            overhead_bytes: FENCE_BYTES,
        };
        let mut header = TAG_BYTES;
        let mut previous_free = false;
        while header < end {
            let tag = state
                .store
                .read(header)
                .ok_or(HeapCorruption::InvalidTag { addr: header })?;
            let payload = header + TAG_BYTES;
            let footer = payload + tag.size;
            if footer >= end || state.store.read(footer) != Some(tag) {
                return Err(HeapCorruption::TagMismatch { addr: payload });
            }
            match tag.kind {
                SpanKind::Free => {
                    if previous_free {
                        return Err(HeapCorruption::Uncoalesced { addr: payload });
                    }
                    if !state.free.contains(payload, tag.size) {
                        return Err(HeapCorruption::Unindexed {
                            addr: payload,
                            len: tag.size,
                        });
                    }
                    report.free_bytes += tag.size;
                    report.free_spans += 1;
                }
                SpanKind::Stealable if state.stealables.id_at(payload).is_none() => {
                    return Err(HeapCorruption::Orphaned { addr: payload });
                }
                SpanKind::Allocated | SpanKind::Stealable => {
                    report.live_bytes += tag.size;
                    report.live_blocks += 1;
                }
            }
            previous_free = tag.kind == SpanKind::Free;
            report.overhead_bytes += SPAN_OVERHEAD;
            header = footer + TAG_BYTES;
        }

        if header != end || report.accounted() != len {
            return Err(HeapCorruption::Accounting {
                accounted: report.accounted(),
                expected: len,
            });
        }
        if report.free_spans != state.free.len() {
            return Err(HeapCorruption::IndexSize {
                indexed: state.free.len(),
                walked: report.free_spans,
            });
        }
        Ok(report)
    }

    fn place(
        &self,
        state: &mut RegionState,
        size: usize,
        kind: SpanKind,
        may_steal: bool,
        exclude: Option<ResourceId>,
    ) -> Result<usize, AllocError> {
        let padded = self.pad_size(size);
        if padded > self.capacity {
            telemetry::record_allocation_failure(self.config.name);
            return Err(AllocError::TooLarge {
                region: self.config.name,
                requested: size,
                capacity: self.capacity,
            });
        }

        loop {
            if let Some(span) = state.free.best_fit(padded) {
                let (addr, granted) = self.carve(state, span, padded, kind);
                telemetry::record_allocation(self.config.name, granted);
                trace!(region = self.config.name, size, granted, addr, "allocated");
                return Ok(addr);
            }
            if !may_steal {
                break;
            }
            let Some(victim) = state.stealables.find_victim(exclude) else {
                break;
            };
            self.steal(state, victim)?;
        }

        telemetry::record_allocation_failure(self.config.name);
        debug!(region = self.config.name, size, padded, "out of memory");
        Err(AllocError::OutOfMemory {
            region: self.config.name,
            requested: size,
        })
    }

    fn carve(&self, state: &mut RegionState, span: FreeSpan, padded: usize, kind: SpanKind) -> (usize, usize) {
        state.free.remove(span.addr, span.len);
        let surplus = span.len.checked_sub(padded + SPAN_OVERHEAD);

        let (addr, size) = match surplus {
            Some(surplus) if surplus > self.config.min_align => {
                if padded <= self.config.pivot {
                    state.free.insert(span.addr, surplus);
                    state.store.write_span(span.addr, BoundaryTag::free(surplus));
                    (span.addr + surplus + SPAN_OVERHEAD, padded)
                } else {
                    let rest = span.addr + padded + SPAN_OVERHEAD;
                    state.free.insert(rest, surplus);
                    state.store.write_span(rest, BoundaryTag::free(surplus));
                    (span.addr, padded)
                }
            }
            _ => (span.addr, span.len),
        };

        state.store.write_span(addr, BoundaryTag::new(kind, size));
        state.live_blocks += 1;
        state.live_bytes += size;
        (addr, size)
    }

    fn steal(&self, state: &mut RegionState, victim: StealableId) -> Result<(), AllocError> {
        let queue = state.stealables.get(victim).and_then(|o| o.queue());
        let mut occupant = state.stealables.remove(victim).ok_or(AllocError::StaleHandle {
            region: self.config.name,
            id: victim,
        })?;
        debug_assert_eq!(occupant.reservations, 0, "stealing a reserved entry");

        occupant.owner.steal(StealReason::Reclaimed);
        drop(occupant.owner);

        let tag = self.read_live(state, occupant.payload)?;
        self.release_live(state, occupant.payload, tag.size)?;
        state.steals += 1;
        if let Some(queue) = queue {
            telemetry::record_steal(self.config.name, queue);
        }
        debug!(
            region = self.config.name,
            addr = occupant.payload,
            size = tag.size,
            queue = queue.map(StealableQueue::name),
            "stole span"
        );
        Ok(())
    }

    fn read_live(&self, state: &RegionState, addr: usize) -> Result<BoundaryTag, AllocError> {
        let invalid = AllocError::InvalidBlock {
            region: self.config.name,
            addr,
        };
        if addr < SPAN_OVERHEAD || addr > self.config.len - SPAN_OVERHEAD {
            return Err(invalid);
        }
        let header = state
            .store
            .read(addr - TAG_BYTES)
            .ok_or_else(|| self.corrupted(addr))?;
        if !header.kind.is_live() {
            return Err(invalid);
        }
        if state.store.read(addr + header.size) != Some(header) {
            return Err(self.corrupted(addr));
        }
        Ok(header)
    }

    fn release_live(&self, state: &mut RegionState, addr: usize, size: usize) -> Result<(), AllocError> {
        state.live_blocks -= 1;
        state.live_bytes -= size;
        self.release_span(state, addr, size, true, true)?;
        telemetry::record_region_free(self.config.name, state.free.total_bytes());
        Ok(())
    }

    /// Mark a span free, merging with free neighbours on the requested sides.
    fn release_span(
        &self,
        state: &mut RegionState,
        addr: usize,
        size: usize,
        look_left: bool,
        look_right: bool,
    ) -> Result<(), AllocError> {
        // Retag first so a stale handle to this span reads as free.
        state.store.write_span(addr, BoundaryTag::free(size));
        let mut start = addr;
        let mut len = size;

        if look_left {
            let left_footer = addr - SPAN_OVERHEAD;
            match state.store.read(left_footer) {
                Some(t) if t.kind == SpanKind::Free => {
                    let left = FreeSpan {
                        addr: left_footer - t.size,
                        len: t.size,
                    };
                    self.unindex(state, left)?;
                    start = left.addr;
                    len += left.len + SPAN_OVERHEAD;
                }
                Some(_) => {}
                None => return Err(self.corrupted(left_footer)),
            }
        }

        if look_right {
            let right_header = start + len + TAG_BYTES;
            match state.store.read(right_header) {
                Some(t) if t.kind == SpanKind::Free => {
                    let right = FreeSpan {
                        addr: right_header + TAG_BYTES,
                        len: t.size,
                    };
                    self.unindex(state, right)?;
                    len += right.len + SPAN_OVERHEAD;
                }
                Some(_) => {}
                None => return Err(self.corrupted(right_header)),
            }
        }

        state.free.insert(start, len);
        state.store.write_span(start, BoundaryTag::free(len));
        Ok(())
    }

    fn unindex(&self, state: &mut RegionState, span: FreeSpan) -> Result<(), AllocError> {
        if state.free.remove(span.addr, span.len) {
            Ok(())
        } else {
            Err(self.corrupted(span.addr))
        }
    }

    fn corrupted(&self, addr: usize) -> AllocError {
        error!(region = self.config.name, addr, "boundary tag corruption");
        debug_assert!(false, "region {}: boundary tag corruption at {addr}", self.config.name);
        AllocError::Corrupted {
            region: self.config.name,
            addr,
        }
    }
}

impl Drop for MemoryRegion {
    fn drop(&mut self) {
        for mut occupant in self.state.get_mut().stealables.drain() {
            occupant.owner.steal(StealReason::RegionTeardown);
        }
    }
}

fn round_up(value: usize, to: usize) -> usize {
    value.div_ceil(to) * to
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(len: usize) -> MemoryRegion {
        MemoryRegion::new(RegionConfig::new("test", len)).unwrap()
    }

    #[test]
    fn test_new_region_has_one_free_span() {
        let r = region(4096);
        let stats = r.stats().unwrap();
        assert_eq!(stats.free_spans, 1);
        assert_eq!(stats.free_bytes, 4096 - 16);
        assert_eq!(r.check_integrity().unwrap().accounted(), 4096);
    }

    #[test]
    fn test_pad_size_rounding() {
        let r = region(4096);
        assert_eq!(r.pad_size(0), 8);
        assert_eq!(r.pad_size(8), 8);
        assert_eq!(r.pad_size(9), 24);
        assert_eq!(r.pad_size(1000), 1016);
        assert_eq!(r.pad_size(1 << 20), 1 << 20);
        assert_eq!(r.pad_size(3 << 12), 3 << 12);
    }

    #[test]
    fn test_small_allocations_come_from_the_top() {
        let r = region(64 * 1024);
        let small = r.allocate(100, false, None).unwrap();
        let large = r.allocate(10_000, false, None).unwrap();
        assert!(small.offset() > large.offset());
        assert_eq!(large.offset(), SPAN_OVERHEAD);
    }

    #[test]
    fn test_tiny_remainder_is_not_split() {
        let r = region(64);
        // capacity 48; a 24-byte request leaves 16, which is not worth a span
        let block = r.allocate(24, false, None).unwrap();
        assert_eq!(r.allocated_size_of(block).unwrap(), 48);
        assert_eq!(r.stats().unwrap().free_spans, 0);
    }

    #[test]
    fn test_double_free_is_rejected() {
        let r = region(4096);
        let block = r.allocate(64, false, None).unwrap();
        r.deallocate(block).unwrap();
        assert!(matches!(r.deallocate(block), Err(AllocError::InvalidBlock { .. })));
    }

    #[test]
    fn test_bad_config_rejected() {
        let mut config = RegionConfig::new("bad", 4096);
        config.min_align = 24;
        assert!(matches!(MemoryRegion::new(config), Err(AllocError::Config(_))));
        assert!(MemoryRegion::new(RegionConfig::new("tiny", 32)).is_err());
    }

    #[test]
    fn test_length_truncated_to_tag_granularity() {
        let r = region(4099);
        assert_eq!(r.len(), 4096);
    }
}
