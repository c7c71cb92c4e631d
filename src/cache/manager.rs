//! Get-or-load cache of fixed-size blocks keyed by (resource, index).
//!
//! Blocks are stealable spans in one region. A caller holding a
//! [`BlockHandle`] holds one reservation; unreserved blocks wait in the
//! region's eviction queues until memory pressure takes them. Reads go
//! through the load queue one at a time. While a read is in flight the
//! manager holds its own reservation on the block so that it cannot be
//! evicted mid-transfer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::block::{BlockHandle, BlockKey, CacheBlock, DataClass, LoadState, StolenLog};
use super::error::CacheError;
use super::layout::StreamLayout;
use crate::memory::{AllocError, MemoryRegion, ReleaseHint, ReservationError, ResourceId, StealableId};
use crate::scheduler::{LoadQueue, Priority};
use crate::storage::{BlockStorage, StorageError, SECTOR_BYTES};
use crate::telemetry;

/// How `get_block` should fill a block it has to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPolicy {
    /// Read it before returning.
    LoadNow,
    /// Queue a read at this priority.
    Enqueue(Priority),
    /// Leave it empty; the caller overwrites the whole block.
    LeaveEmpty,
}

/// Cache sizing.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Bytes per block. Power of two, whole sectors.
    pub block_bytes: usize,
    /// Upper bound on reads per `service_queue` call.
    pub max_loads_per_service: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            block_bytes: 32 * 1024,
            max_loads_per_service: 16,
        }
    }
}

/// What happened to a read once it finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded(BlockKey),
    /// Every holder let go while the read was in flight.
    Discarded(BlockKey),
    Failed { key: BlockKey, error: StorageError },
}

/// Proof that a read was started; hand it back to `complete_load`.
#[derive(Debug, PartialEq, Eq)]
pub struct LoadTicket {
    key: BlockKey,
    id: StealableId,
    priority: Priority,
}

impl LoadTicket {
    pub fn key(&self) -> BlockKey {
        self.key
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }
}

/// Counters since the manager was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub discarded_loads: u64,
    pub failed_loads: u64,
    pub cancelled_loads: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Result of one `service_queue` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceReport {
    pub loaded: usize,
    pub discarded: usize,
    pub failed: usize,
}

struct ResourceEntry {
    layout: StreamLayout,
    class: DataClass,
    active: Arc<AtomicBool>,
}

#[derive(Debug, Clone, Copy)]
struct BlockEntry {
    id: StealableId,
    state: LoadState,
}

pub struct CacheBlockManager<S> {
    region: Arc<MemoryRegion>,
    storage: S,
    config: CacheConfig,
    resources: HashMap<ResourceId, ResourceEntry>,
    blocks: HashMap<BlockKey, BlockEntry>,
    loads: LoadQueue<BlockKey>,
    stolen: StolenLog,
    stats: CacheStats,
}

impl<S: BlockStorage> CacheBlockManager<S> {
    pub fn new(region: Arc<MemoryRegion>, storage: S, config: CacheConfig) -> Result<Self, CacheError> {
        if !config.block_bytes.is_power_of_two() || config.block_bytes < SECTOR_BYTES {
            return Err(CacheError::Config(format!(
                "block size {} must be a power of two of at least {SECTOR_BYTES}",
                config.block_bytes
            )));
        }
        if config.block_bytes > region.capacity() {
            return Err(CacheError::Config(format!(
                "block size {} exceeds region {} capacity {}",
                config.block_bytes,
                region.name(),
                region.capacity()
            )));
        }
        Ok(Self {
            region,
            storage,
            config,
            resources: HashMap::new(),
            blocks: HashMap::new(),
            loads: LoadQueue::new(),
            stolen: StolenLog::default(),
            stats: CacheStats::default(),
        })
    }

    pub fn region(&self) -> &Arc<MemoryRegion> {
        &self.region
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn register_resource(
        &mut self,
        resource: ResourceId,
        layout: StreamLayout,
        class: DataClass,
    ) -> Result<(), CacheError> {
        if self.resources.contains_key(&resource) {
            return Err(CacheError::DuplicateResource(resource));
        }
        if !layout.covers(self.config.block_bytes) {
            return Err(CacheError::InvalidLayout {
                resource,
                reason: format!(
                    "{} block addresses cannot hold {} bytes",
                    layout.block_count(),
                    layout.byte_len()
                ),
            });
        }
        debug!(%resource, blocks = layout.block_count(), ?class, "resource registered");
        self.resources.insert(
            resource,
            ResourceEntry {
                layout,
                class,
                active: Arc::new(AtomicBool::new(false)),
            },
        );
        Ok(())
    }

    /// Mark a resource as part of (or no longer part of) the active working
    /// set. Its cached blocks move to the matching eviction queue.
    pub fn set_resource_active(&mut self, resource: ResourceId, active: bool) -> Result<(), CacheError> {
        let entry = self
            .resources
            .get(&resource)
            .ok_or(CacheError::UnknownResource(resource))?;
        if entry.active.swap(active, Ordering::Relaxed) == active {
            return Ok(());
        }
        self.reap_stolen()?;
        for (key, block) in &self.blocks {
            if key.resource != resource {
                continue;
            }
            match self.region.requeue(block.id) {
                Ok(()) | Err(AllocError::StaleHandle { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Tear down every unreserved block of a resource. The resource is
    /// unregistered once none of its blocks remain. Returns blocks freed.
    pub fn forget_resource(&mut self, resource: ResourceId) -> Result<usize, CacheError> {
        self.reap_stolen()?;
        let keys: Vec<BlockKey> = self
            .blocks
            .keys()
            .filter(|k| k.resource == resource)
            .copied()
            .collect();
        let mut freed = 0;
        let mut remaining = 0;
        for key in keys {
            let entry = self.blocks[&key];
            if self.region.reservations(entry.id)? == 0 {
                self.teardown(key, entry.id)?;
                freed += 1;
            } else {
                remaining += 1;
            }
        }
        if remaining == 0 {
            self.resources.remove(&resource);
        }
        debug!(%resource, freed, remaining, "resource forgotten");
        Ok(freed)
    }

    pub fn block_count(&self, resource: ResourceId) -> Result<u32, CacheError> {
        self.resources
            .get(&resource)
            .map(|r| r.layout.block_count())
            .ok_or(CacheError::UnknownResource(resource))
    }

    /// Reserve block `index` of `resource`, creating it if it is not cached.
    ///
    /// A cached block is returned as is, except that a queued or failed
    /// block is read immediately under `LoadNow` and a queued block is
    /// promoted under `Enqueue`. On any error the caller holds nothing.
    pub fn get_block(
        &mut self,
        resource: ResourceId,
        index: u32,
        policy: LoadPolicy,
    ) -> Result<BlockHandle, CacheError> {
        self.reap_stolen()?;
        let (class, active) = {
            let entry = self
                .resources
                .get(&resource)
                .ok_or(CacheError::UnknownResource(resource))?;
            let blocks = entry.layout.block_count();
            if index >= blocks {
                return Err(CacheError::IndexOutOfRange {
                    resource,
                    index,
                    blocks,
                });
            }
            (entry.class, entry.active.clone())
        };
        let key = BlockKey { resource, index };

        if let Some(entry) = self.blocks.get(&key).copied() {
            match self.region.add_reservation(entry.id) {
                Ok(_) => {}
                Err(ReservationError::Stale { .. }) => {
                    // Evicted by another user of the region since the last reap.
                    self.blocks.remove(&key);
                    self.stats.evictions += 1;
                    return self.get_block(resource, index, policy);
                }
                Err(err) => return Err(err.into()),
            }
            self.stats.hits += 1;
            telemetry::record_block_lookup(true);
            let handle = BlockHandle { key, id: entry.id };
            let fill = match (entry.state, policy) {
                (LoadState::Unrequested | LoadState::Queued | LoadState::Failed, LoadPolicy::LoadNow) => {
                    self.load_now(handle)
                }
                (LoadState::Unrequested | LoadState::Queued | LoadState::Failed, LoadPolicy::Enqueue(priority)) => {
                    self.set_state(key, LoadState::Queued);
                    self.loads.enqueue(key, priority);
                    Ok(())
                }
                _ => Ok(()),
            };
            return self.finish_get(handle, fill);
        }

        self.stats.misses += 1;
        telemetry::record_block_lookup(false);
        let owner = Box::new(CacheBlock::new(key, class, active, self.stolen.clone()));
        let id = self
            .region
            .allocate_stealable(self.config.block_bytes, owner, None)?;
        self.reap_stolen()?;
        self.blocks.insert(
            key,
            BlockEntry {
                id,
                state: LoadState::Unrequested,
            },
        );
        trace!(%key, ?policy, "block created");

        let handle = BlockHandle { key, id };
        let fill = match policy {
            LoadPolicy::LoadNow => self.load_now(handle),
            LoadPolicy::Enqueue(priority) => {
                self.set_state(key, LoadState::Queued);
                self.loads.enqueue(key, priority);
                Ok(())
            }
            LoadPolicy::LeaveEmpty => Ok(()),
        };
        self.finish_get(handle, fill)
    }

    /// Give back one reservation; the block stays cached if it has data.
    pub fn release_block(&mut self, handle: BlockHandle) -> Result<(), CacheError> {
        self.release_block_with(handle, ReleaseHint::KeepCached)
    }

    /// Give back one reservation. On the last one a queued read is
    /// cancelled and the block freed. A failed or never filled block is
    /// freed too; otherwise `hint` decides between caching and freeing.
    pub fn release_block_with(&mut self, handle: BlockHandle, hint: ReleaseHint) -> Result<(), CacheError> {
        self.reap_stolen()?;
        let entry = self.entry(&handle)?;
        let last = self.region.reservations(entry.id)? == 1;

        if last {
            match entry.state {
                LoadState::Queued => {
                    self.loads.cancel(&handle.key);
                    self.stats.cancelled_loads += 1;
                    debug!(key = %handle.key, "queued load cancelled");
                    return self.teardown(handle.key, entry.id);
                }
                LoadState::Failed | LoadState::Unrequested => return self.teardown(handle.key, entry.id),
                _ if hint == ReleaseHint::Discard => return self.teardown(handle.key, entry.id),
                _ => {}
            }
        }

        self.region.remove_reservation(entry.id, ReleaseHint::KeepCached)?;
        Ok(())
    }

    pub fn state_of(&self, key: BlockKey) -> Option<LoadState> {
        self.blocks.get(&key).map(|e| e.state)
    }

    /// Blocks currently tracked (resident, queued, loading or failed).
    pub fn cached_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn pending_loads(&self) -> usize {
        self.loads.pending()
    }

    /// Read access to a block that holds data. A `LeaveEmpty` block is
    /// only readable through [`with_block_data_mut`](Self::with_block_data_mut)
    /// until it is marked filled.
    pub fn with_block_data<R>(&self, handle: &BlockHandle, f: impl FnOnce(&[u8]) -> R) -> Result<R, CacheError> {
        let entry = self.entry(handle)?;
        match entry.state {
            LoadState::Resident => {}
            LoadState::Failed => return Err(CacheError::LoadFailed(handle.key)),
            LoadState::Unrequested | LoadState::Queued | LoadState::Loading => {
                return Err(CacheError::NotResident(handle.key))
            }
        }
        let block = self.region.block_of(entry.id)?;
        let len = self.config.block_bytes;
        Ok(self.region.with_payload(block, |data| f(&data[..len]))?)
    }

    /// Write access to a block created with `LeaveEmpty`, until
    /// [`mark_filled`](Self::mark_filled) is called.
    pub fn with_block_data_mut<R>(
        &mut self,
        handle: &BlockHandle,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, CacheError> {
        let entry = self.entry(handle)?;
        if entry.state != LoadState::Unrequested {
            return Err(CacheError::NotResident(handle.key));
        }
        let block = self.region.block_of(entry.id)?;
        let len = self.config.block_bytes;
        Ok(self.region.with_payload_mut(block, |data| f(&mut data[..len]))?)
    }

    /// The caller finished writing a `LeaveEmpty` block.
    pub fn mark_filled(&mut self, handle: &BlockHandle) -> Result<(), CacheError> {
        let entry = self.entry(handle)?;
        if entry.state != LoadState::Unrequested {
            return Err(CacheError::NotResident(handle.key));
        }
        self.set_state(handle.key, LoadState::Resident);
        Ok(())
    }

    /// Start the most urgent queued read. `None` when the queue is empty or
    /// a read is already in flight.
    pub fn start_next_load(&mut self) -> Result<Option<LoadTicket>, CacheError> {
        self.reap_stolen()?;
        while let Some((key, priority)) = self.loads.take_highest_priority() {
            let Some(entry) = self.blocks.get(&key).copied() else {
                self.loads.finish(&key);
                continue;
            };
            if entry.state != LoadState::Queued {
                self.loads.finish(&key);
                continue;
            }
            if let Err(err) = self.region.add_reservation(entry.id) {
                self.loads.retry(key, priority);
                return Err(err.into());
            }
            self.set_state(key, LoadState::Loading);
            trace!(%key, ?priority, "load started");
            return Ok(Some(LoadTicket {
                key,
                id: entry.id,
                priority,
            }));
        }
        Ok(None)
    }

    /// Perform the read for `ticket` and settle the block.
    pub fn complete_load(&mut self, ticket: LoadTicket) -> Result<LoadOutcome, CacheError> {
        let read = self.read_block(&ticket);
        self.loads.finish(&ticket.key);
        let key = ticket.key;
        let holders = self.region.reservations(ticket.id)?.saturating_sub(1);

        match read {
            Ok(()) if holders == 0 => {
                self.teardown(key, ticket.id)?;
                self.stats.discarded_loads += 1;
                telemetry::record_block_load("discarded");
                debug!(%key, "load finished with no holders, discarded");
                Ok(LoadOutcome::Discarded(key))
            }
            Ok(()) => {
                self.set_state(key, LoadState::Resident);
                self.region.remove_reservation(ticket.id, ReleaseHint::KeepCached)?;
                self.stats.loads += 1;
                telemetry::record_block_load("loaded");
                trace!(%key, "block resident");
                Ok(LoadOutcome::Loaded(key))
            }
            Err(CacheError::Io { source, .. }) => {
                self.set_state(key, LoadState::Failed);
                self.stats.failed_loads += 1;
                telemetry::record_block_load("failed");
                warn!(%key, error = %source, "block load failed");
                if holders == 0 {
                    self.teardown(key, ticket.id)?;
                } else {
                    self.region.remove_reservation(ticket.id, ReleaseHint::KeepCached)?;
                }
                Ok(LoadOutcome::Failed { key, error: source })
            }
            Err(err) => {
                self.set_state(key, LoadState::Queued);
                self.loads.enqueue(key, ticket.priority);
                self.region.remove_reservation(ticket.id, ReleaseHint::KeepCached)?;
                Err(err)
            }
        }
    }

    /// Start and finish the next queued read.
    pub fn load_next(&mut self) -> Result<Option<LoadOutcome>, CacheError> {
        match self.start_next_load()? {
            Some(ticket) => self.complete_load(ticket).map(Some),
            None => Ok(None),
        }
    }

    /// Serve up to `max` queued reads. Main loops usually pass
    /// `config().max_loads_per_service`.
    pub fn service_queue(&mut self, max: usize) -> Result<ServiceReport, CacheError> {
        let mut report = ServiceReport::default();
        for _ in 0..max {
            match self.load_next()? {
                Some(LoadOutcome::Loaded(_)) => report.loaded += 1,
                Some(LoadOutcome::Discarded(_)) => report.discarded += 1,
                Some(LoadOutcome::Failed { .. }) => report.failed += 1,
                None => break,
            }
        }
        Ok(report)
    }

    fn finish_get(&mut self, handle: BlockHandle, fill: Result<(), CacheError>) -> Result<BlockHandle, CacheError> {
        match fill {
            Ok(()) => Ok(handle),
            Err(err) => {
                if let Err(release) = self.release_block_with(handle, ReleaseHint::Discard) {
                    warn!(key = %handle.key, error = %release, "could not release after failed fill");
                }
                Err(err)
            }
        }
    }

    /// Synchronous read outside the queue. The caller already holds a
    /// reservation on `handle`.
    fn load_now(&mut self, handle: BlockHandle) -> Result<(), CacheError> {
        if !self.loads.begin(handle.key) {
            return Err(CacheError::LoadInFlight);
        }
        if let Err(err) = self.region.add_reservation(handle.id) {
            self.loads.finish(&handle.key);
            return Err(err.into());
        }
        self.set_state(handle.key, LoadState::Loading);
        let ticket = LoadTicket {
            key: handle.key,
            id: handle.id,
            priority: Priority::URGENT,
        };
        match self.complete_load(ticket)? {
            LoadOutcome::Loaded(_) => Ok(()),
            LoadOutcome::Failed { key, error } => Err(CacheError::Io { key, source: error }),
            LoadOutcome::Discarded(key) => Err(CacheError::StaleHandle(key)),
        }
    }

    fn read_block(&mut self, ticket: &LoadTicket) -> Result<(), CacheError> {
        let key = ticket.key;
        let (sector, count) = self
            .resources
            .get(&key.resource)
            .ok_or(CacheError::UnknownResource(key.resource))?
            .layout
            .read_plan(key.index, self.config.block_bytes)
            .ok_or(CacheError::IndexOutOfRange {
                resource: key.resource,
                index: key.index,
                blocks: self.block_count(key.resource)?,
            })?;

        let block = self.region.block_of(ticket.id)?;
        let region = &self.region;
        let storage = &mut self.storage;
        region
            .with_payload_mut(block, |data| storage.read_sectors(sector, count, data))?
            .map_err(|source| CacheError::Io { key, source })
    }

    fn entry(&self, handle: &BlockHandle) -> Result<BlockEntry, CacheError> {
        self.blocks
            .get(&handle.key)
            .copied()
            .filter(|e| e.id == handle.id)
            .ok_or(CacheError::StaleHandle(handle.key))
    }

    fn set_state(&mut self, key: BlockKey, state: LoadState) {
        if let Some(entry) = self.blocks.get_mut(&key) {
            entry.state = state;
        }
    }

    fn teardown(&mut self, key: BlockKey, id: StealableId) -> Result<(), CacheError> {
        self.loads.cancel(&key);
        self.blocks.remove(&key);
        self.region.destroy_stealable(id)?;
        trace!(%key, "block torn down");
        Ok(())
    }

    /// Forget blocks the region evicted since the last call.
    fn reap_stolen(&mut self) -> Result<(), CacheError> {
        let stolen = std::mem::take(&mut *self.stolen.lock());
        for key in stolen {
            let Some(entry) = self.blocks.get(&key).copied() else {
                continue;
            };
            if !self.region.is_live(entry.id)? {
                self.blocks.remove(&key);
                self.stats.evictions += 1;
                trace!(%key, "evicted block forgotten");
            }
        }
        Ok(())
    }
}
