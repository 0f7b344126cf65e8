//! A bounded cache of fixed-size blocks backed by a single [layermap_runtime::Blob].
//!
//! A stored mapping divides its slots into blocks of `2^block_power` entries. [BlockCache] keeps
//! a bounded number of those blocks resident, loading them through a [Payload] on first
//! reference and writing them back when they are evicted or flushed. The blob also carries a
//! [crate::header::Header] ahead of the first block.
//!
//! # Format
//!
//! ```text
//! +--------+---------+---------+---------+-----+
//! | header | block 0 | block 1 | block 2 | ... |
//! +--------+---------+---------+---------+-----+
//!   44 B     block_bytes each
//! ```
//!
//! Blocks that were never written read back as zeros, which the codec decodes as unused slots.
//! On open, trailing bytes that do not form a whole block are truncated.
//!
//! # Dirty Blocks
//!
//! A block modified in place must be marked with [BlockCache::lock_block]. Dirty blocks are
//! written back before eviction and on [BlockCache::flush]; clean blocks are simply dropped.
//! There is no cross-block atomicity: a crash between block writes and the header write can
//! leave them out of step (and a header region that was never written is reported as corrupt).
//!
//! # Example
//!
//! ```rust
//! use layermap_runtime::{memory, Storage};
//! use layermap_storage::{
//!     cache::{BlockCache, Config, Converter, Shape},
//!     codec::Width,
//! };
//!
//! let storage = memory::Storage::default();
//! let (blob, len) = storage.open("mappings", b"lemma").unwrap();
//! let converter = Converter::new(Width::U16, Shape::Value, 16);
//! let mut cache = BlockCache::init(blob, len, converter, &Config::default()).unwrap();
//!
//! // Create block 0, write slot 3, and mark the block dirty
//! let block = cache.get_block(0, true).unwrap().unwrap();
//! Width::U16.write(block.data_mut(), 3, Some(42)).unwrap();
//! cache.lock_block(0);
//! cache.header_mut().grow_size(1);
//! cache.close().unwrap();
//!
//! // Reopen and read it back
//! let (blob, len) = storage.open("mappings", b"lemma").unwrap();
//! let converter = Converter::new(Width::U16, Shape::Value, 16);
//! let mut cache = BlockCache::init(blob, len, converter, &Config::default()).unwrap();
//! assert_eq!(cache.header().size(), 1);
//! let block = cache.get_block(0, false).unwrap().unwrap();
//! assert_eq!(Width::U16.read(block.data(), 3), Some(42));
//! ```

use crate::codec::Width;
use layermap_runtime::Blob;
use std::num::NonZeroUsize;
use thiserror::Error;

mod policy;
pub use policy::{Eviction, Policy};
mod storage;
pub use storage::BlockCache;

/// Default number of resident blocks.
pub const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(100) {
    Some(capacity) => capacity,
    None => panic!("capacity must be non-zero"),
};

/// Errors that can occur when interacting with the cache.
#[derive(Debug, Error)]
pub enum Error {
    #[error("runtime error: {0}")]
    Runtime(#[from] layermap_runtime::Error),
    #[error("header corrupt")]
    HeaderCorrupt,
    #[error("invalid block size: {0}")]
    BlockSize(usize),
    #[error("offset overflow for block: {0}")]
    OffsetOverflow(u64),
}

/// Configuration for a [BlockCache].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of resident blocks.
    pub capacity: NonZeroUsize,

    /// Strategy used to choose which block to evict.
    pub policy: Policy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            policy: Policy::default(),
        }
    }
}

/// Layout of the slots in a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    /// One value per entry.
    Value,
    /// One `(begin, end)` span per entry.
    Span,
}

/// Moves whole blocks between a blob and memory.
pub trait Payload<B: Blob>: Send {
    /// Encoded size of a block.
    fn block_bytes(&self) -> usize;

    /// A block with every slot unused.
    fn create(&self) -> Vec<u8>;

    /// Read the block stored at `offset`.
    fn load(&self, blob: &B, offset: u64) -> Result<Vec<u8>, Error> {
        let mut data = self.create();
        blob.read_at(&mut data, offset)?;
        Ok(data)
    }

    /// Write a block at `offset`.
    fn store(&self, blob: &B, offset: u64, data: &[u8]) -> Result<(), Error> {
        blob.write_at(data, offset)?;
        Ok(())
    }
}

/// [Payload] for blocks of codec-encoded values or spans.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Converter {
    width: Width,
    shape: Shape,
    entries: usize,
}

impl Converter {
    pub fn new(width: Width, shape: Shape, entries: usize) -> Self {
        Self {
            width,
            shape,
            entries,
        }
    }

    pub fn width(&self) -> Width {
        self.width
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Number of entries (values or spans) per block.
    pub fn entries(&self) -> usize {
        self.entries
    }
}

impl<B: Blob> Payload<B> for Converter {
    fn block_bytes(&self) -> usize {
        let entry = match self.shape {
            Shape::Value => self.width.entry_size(),
            Shape::Span => self.width.span_size(),
        };
        self.entries * entry
    }

    fn create(&self) -> Vec<u8> {
        self.width
            .create_buffer(<Self as Payload<B>>::block_bytes(self))
    }
}

/// A resident block.
#[derive(Debug)]
pub struct Block {
    data: Vec<u8>,
    dirty: bool,
}

impl Block {
    fn new(data: Vec<u8>) -> Self {
        Self { data, dirty: false }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access to the block contents. Callers must follow up with
    /// [BlockCache::lock_block] for the change to be persisted.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Whether the block holds changes not yet written to the blob.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header;
    use layermap_runtime::{memory, Blob as _, Storage as _};
    use prometheus_client::{encoding::text::encode, registry::Registry};
    use test_case::test_case;

    const ENTRIES: usize = 8;

    fn open(
        storage: &memory::Storage,
        capacity: usize,
        policy: Policy,
    ) -> BlockCache<memory::Blob> {
        let (blob, len) = storage.open("cache", b"blocks").unwrap();
        let cfg = Config {
            capacity: NonZeroUsize::new(capacity).unwrap(),
            policy,
        };
        BlockCache::init(blob, len, Converter::new(Width::U8, Shape::Value, ENTRIES), &cfg)
            .unwrap()
    }

    fn write(cache: &mut BlockCache<memory::Blob>, id: u64, slot: usize, value: u64) {
        let block = cache.get_block(id, true).unwrap().unwrap();
        Width::U8.write(block.data_mut(), slot, Some(value)).unwrap();
        cache.lock_block(id);
    }

    fn read(cache: &mut BlockCache<memory::Blob>, id: u64, slot: usize) -> Option<u64> {
        let block = cache.get_block(id, false).unwrap()?;
        Width::U8.read(block.data(), slot)
    }

    #[test]
    fn test_converter_block_bytes() {
        let values = Converter::new(Width::U32, Shape::Value, 16);
        let spans = Converter::new(Width::U32, Shape::Span, 16);
        assert_eq!(Payload::<memory::Blob>::block_bytes(&values), 64);
        assert_eq!(Payload::<memory::Blob>::block_bytes(&spans), 128);
        assert_eq!(Payload::<memory::Blob>::create(&spans), vec![0; 128]);
    }

    #[test_case(Policy::Lru; "lru")]
    #[test_case(Policy::Mru; "mru")]
    #[test_case(Policy::Clock; "clock")]
    fn test_capacity_bound(policy: Policy) {
        crate::tests::init_tracing();
        let storage = memory::Storage::default();
        let mut cache = open(&storage, 3, policy);
        for id in 0..20 {
            write(&mut cache, id, (id % ENTRIES as u64) as usize, id);
            assert!(cache.resident() <= 3);
        }

        // Every evicted dirty block was written back first
        for id in 0..20 {
            assert_eq!(read(&mut cache, id, (id % ENTRIES as u64) as usize), Some(id));
            assert!(cache.resident() <= 3);
        }
    }

    #[test]
    fn test_read_mode_does_not_create() {
        let storage = memory::Storage::default();
        let mut cache = open(&storage, 4, Policy::Lru);
        assert!(cache.get_block(0, false).unwrap().is_none());
        assert!(cache.get_block(5, false).unwrap().is_none());
        assert_eq!(cache.resident(), 0);

        write(&mut cache, 2, 0, 9);
        assert_eq!(read(&mut cache, 2, 0), Some(9));
        cache.flush().unwrap();

        // Blocks below the highest persisted block exist (zeroed)
        let mut cache = open(&storage, 4, Policy::Lru);
        assert_eq!(read(&mut cache, 2, 0), Some(9));
        assert!(cache.get_block(1, false).unwrap().is_some());
        assert_eq!(read(&mut cache, 1, 0), None);
        assert!(cache.get_block(3, false).unwrap().is_none());
    }

    #[test]
    fn test_flush_and_reopen() {
        let storage = memory::Storage::default();
        let mut cache = open(&storage, 2, Policy::Lru);
        write(&mut cache, 0, 1, 10);
        write(&mut cache, 1, 2, 20);
        cache.header_mut().grow_size(2);
        cache.header_mut().update_used_index(1);
        cache.close().unwrap();

        let mut cache = open(&storage, 2, Policy::Lru);
        assert_eq!(cache.header().size(), 2);
        assert!(cache.header().is_used_index(1));
        assert_eq!(read(&mut cache, 0, 1), Some(10));
        assert_eq!(read(&mut cache, 1, 2), Some(20));
    }

    #[test]
    fn test_unlocked_changes_discarded() {
        let storage = memory::Storage::default();
        let mut cache = open(&storage, 1, Policy::Lru);
        write(&mut cache, 0, 0, 1);
        cache.flush().unwrap();

        // Modify without locking, then force eviction
        let block = cache.get_block(0, false).unwrap().unwrap();
        Width::U8.write(block.data_mut(), 0, Some(2)).unwrap();
        assert!(!block.is_dirty());
        cache.get_block(1, true).unwrap();
        assert_eq!(read(&mut cache, 0, 0), Some(1));
    }

    #[test]
    fn test_corrupt_header() {
        let storage = memory::Storage::default();
        let mut cache = open(&storage, 2, Policy::Lru);
        write(&mut cache, 0, 0, 1);
        cache.header_mut().grow_size(1);
        cache.close().unwrap();

        let (blob, len) = storage.open("cache", b"blocks").unwrap();
        blob.write_at(&[0xFF], 3).unwrap();
        blob.sync().unwrap();
        let result = BlockCache::init(
            blob,
            len,
            Converter::new(Width::U8, Shape::Value, ENTRIES),
            &Config::default(),
        );
        assert!(matches!(result, Err(Error::HeaderCorrupt)));
    }

    #[test]
    fn test_partial_block_truncated() {
        let storage = memory::Storage::default();
        let mut cache = open(&storage, 2, Policy::Lru);
        write(&mut cache, 0, 0, 1);
        cache.header_mut().grow_size(1);
        cache.close().unwrap();

        // Append a partial block
        let (blob, len) = storage.open("cache", b"blocks").unwrap();
        assert_eq!(len, (header::SIZE + ENTRIES) as u64);
        blob.write_at(&[7, 7, 7], len).unwrap();
        blob.sync().unwrap();

        let mut cache = open(&storage, 2, Policy::Lru);
        assert_eq!(read(&mut cache, 0, 0), Some(1));
        assert!(cache.get_block(1, false).unwrap().is_none());
        let (_, len) = storage.open("cache", b"blocks").unwrap();
        assert_eq!(len, (header::SIZE + ENTRIES) as u64);
    }

    #[test]
    fn test_short_header_reset() {
        let storage = memory::Storage::default();
        let (blob, _) = storage.open("cache", b"blocks").unwrap();
        blob.write_at(&[1, 2, 3], 0).unwrap();
        blob.sync().unwrap();

        let cache = open(&storage, 2, Policy::Lru);
        assert_eq!(cache.header().size(), 0);
        let (_, len) = storage.open("cache", b"blocks").unwrap();
        assert_eq!(len, 0);
    }

    #[test]
    fn test_clear() {
        let storage = memory::Storage::default();
        let mut cache = open(&storage, 2, Policy::Lru);
        write(&mut cache, 0, 0, 1);
        write(&mut cache, 3, 0, 1);
        cache.header_mut().grow_size(2);
        cache.flush().unwrap();

        cache.clear().unwrap();
        assert_eq!(cache.header().size(), 0);
        assert_eq!(cache.resident(), 0);
        assert!(cache.get_block(0, false).unwrap().is_none());
        let (_, len) = storage.open("cache", b"blocks").unwrap();
        assert_eq!(len, 0);
    }

    #[test]
    fn test_metrics() {
        let storage = memory::Storage::default();
        let mut cache = open(&storage, 1, Policy::Lru);
        let mut registry = Registry::default();
        cache.register(&mut registry);

        write(&mut cache, 0, 0, 1);
        write(&mut cache, 0, 1, 2);
        write(&mut cache, 1, 0, 3);
        cache.flush().unwrap();

        let mut buffer = String::new();
        encode(&mut buffer, &registry).unwrap();
        assert!(buffer.contains("hits_total 1"));
        assert!(buffer.contains("misses_total 2"));
        assert!(buffer.contains("evictions_total 1"));
        assert!(buffer.contains("flushes_total 2"));
        assert!(buffer.contains("resident 1"));
    }
}
