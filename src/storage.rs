//! Raw block storage consumed by the streaming cache.
//!
//! The cache only ever reads whole sectors into a block's payload. The
//! filesystem driver behind this trait is not part of this crate;
//! [`MemoryCard`] stands in for it in tests, benches and the soak command.

use thiserror::Error;

/// Bytes per storage sector.
pub const SECTOR_BYTES: usize = 512;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("no card present")]
    NoCard,

    #[error("{count} sectors at {address} out of range (card has {sectors})")]
    OutOfRange { address: u64, count: u32, sectors: u64 },

    #[error("buffer of {len} bytes cannot hold {count} sectors")]
    BufferTooSmall { len: usize, count: u32 },

    #[error("read failed at sector {address}")]
    ReadFailed { address: u64 },
}

/// Sector-granular read access to a storage device.
pub trait BlockStorage {
    /// Read `count` sectors starting at `address` into the front of `buffer`.
    fn read_sectors(&mut self, address: u64, count: u32, buffer: &mut [u8]) -> Result<(), StorageError>;
}

impl<S: BlockStorage + ?Sized> BlockStorage for Box<S> {
    fn read_sectors(&mut self, address: u64, count: u32, buffer: &mut [u8]) -> Result<(), StorageError> {
        (**self).read_sectors(address, count, buffer)
    }
}

/// In-memory card image.
#[derive(Debug, Clone, Default)]
pub struct MemoryCard {
    image: Vec<u8>,
    ejected: bool,
    failing: Vec<u64>,
    reads: u64,
}

impl MemoryCard {
    /// Card holding `image`, padded with zeros to a whole sector.
    pub fn new(mut image: Vec<u8>) -> Self {
        let padded = image.len().div_ceil(SECTOR_BYTES) * SECTOR_BYTES;
        image.resize(padded, 0);
        Self {
            image,
            ..Self::default()
        }
    }

    /// Card of `sectors` sectors where every byte holds its sector number
    /// (low 8 bits), handy for checking what was read.
    pub fn patterned(sectors: u64) -> Self {
        let mut image = vec![0u8; sectors as usize * SECTOR_BYTES];
        for (i, sector) in image.chunks_mut(SECTOR_BYTES).enumerate() {
            sector.fill(i as u8);
        }
        Self::new(image)
    }

    pub fn sectors(&self) -> u64 {
        (self.image.len() / SECTOR_BYTES) as u64
    }

    /// Reads issued so far, failed ones included.
    pub fn reads(&self) -> u64 {
        self.reads
    }

    pub fn eject(&mut self) {
        self.ejected = true;
    }

    pub fn insert(&mut self) {
        self.ejected = false;
    }

    /// Make any read that touches `sector` fail.
    pub fn fail_sector(&mut self, sector: u64) {
        self.failing.push(sector);
    }

    pub fn heal(&mut self) {
        self.failing.clear();
    }
}

impl BlockStorage for MemoryCard {
    fn read_sectors(&mut self, address: u64, count: u32, buffer: &mut [u8]) -> Result<(), StorageError> {
        self.reads += 1;
        if self.ejected {
            return Err(StorageError::NoCard);
        }
        let end = address + u64::from(count);
        if end > self.sectors() {
            return Err(StorageError::OutOfRange {
                address,
                count,
                sectors: self.sectors(),
            });
        }
        let len = count as usize * SECTOR_BYTES;
        if buffer.len() < len {
            return Err(StorageError::BufferTooSmall {
                len: buffer.len(),
                count,
            });
        }
        if let Some(&bad) = self.failing.iter().find(|&&s| s >= address && s < end) {
            return Err(StorageError::ReadFailed { address: bad });
        }
        let start = address as usize * SECTOR_BYTES;
        buffer[..len].copy_from_slice(&self.image[start..start + len]);
        Ok(())
    }
}
