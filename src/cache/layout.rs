//! Where a resource's blocks live on storage.

use crate::storage::SECTOR_BYTES;

/// Sector address of every block of a resource, plus its byte length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamLayout {
    block_sectors: Vec<u64>,
    byte_len: u64,
}

impl StreamLayout {
    /// Resource stored in consecutive sectors from `first_sector`.
    pub fn contiguous(first_sector: u64, byte_len: u64, block_bytes: usize) -> Self {
        let sectors_per_block = (block_bytes / SECTOR_BYTES) as u64;
        let blocks = byte_len.div_ceil(block_bytes as u64);
        Self {
            block_sectors: (0..blocks)
                .map(|i| first_sector + i * sectors_per_block)
                .collect(),
            byte_len,
        }
    }

    /// Resource scattered across storage, one starting sector per block.
    pub fn from_block_sectors(block_sectors: Vec<u64>, byte_len: u64) -> Self {
        Self {
            block_sectors,
            byte_len,
        }
    }

    pub fn byte_len(&self) -> u64 {
        self.byte_len
    }

    pub fn block_count(&self) -> u32 {
        self.block_sectors.len() as u32
    }

    pub(crate) fn covers(&self, block_bytes: usize) -> bool {
        self.byte_len.div_ceil(block_bytes as u64) <= self.block_sectors.len() as u64
    }

    /// First sector and sector count to read for block `index`. The final
    /// block reads only the sectors holding data.
    pub(crate) fn read_plan(&self, index: u32, block_bytes: usize) -> Option<(u64, u32)> {
        let sector = *self.block_sectors.get(index as usize)?;
        let start = u64::from(index) * block_bytes as u64;
        let bytes = self.byte_len.checked_sub(start)?.min(block_bytes as u64);
        if bytes == 0 {
            return None;
        }
        let count = bytes.div_ceil(SECTOR_BYTES as u64) as u32;
        Some((sector, count))
    }
}
