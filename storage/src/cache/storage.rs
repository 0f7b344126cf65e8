use super::{Block, Config, Error, Eviction, Payload};
use crate::header::{self, Header};
use layermap_runtime::Blob;
use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Implementation of the block cache.
pub struct BlockCache<B: Blob> {
    // Backing blob and block layout
    blob: B,
    payload: Box<dyn Payload<B>>,
    block_bytes: u64,

    // Number of blocks present in the blob
    persisted: u64,

    // Header, written back on flush when modified
    header: Header,
    header_dirty: bool,
    header_persisted: bool,

    // Resident blocks
    blocks: HashMap<u64, Block>,
    policy: Box<dyn Eviction>,
    capacity: usize,

    // Metrics
    hits: Counter,
    misses: Counter,
    evictions: Counter,
    flushes: Counter,
    resident: Gauge,
}

impl<B: Blob> BlockCache<B> {
    /// Initialize a [BlockCache] over `blob` (of length `len`).
    ///
    /// A blob too short to hold a header is reset to empty. Trailing bytes that do not form a
    /// whole block are truncated.
    pub fn init(
        blob: B,
        len: u64,
        payload: impl Payload<B> + 'static,
        cfg: &Config,
    ) -> Result<Self, Error> {
        let block_bytes = payload.block_bytes();
        if block_bytes == 0 {
            return Err(Error::BlockSize(block_bytes));
        }
        let block_bytes = block_bytes as u64;

        // Load the header
        let header_size = header::SIZE as u64;
        let (header, mut len) = if len == 0 {
            (Header::default(), 0)
        } else if len < header_size {
            warn!(len, "blob shorter than header, resetting");
            blob.resize(0)?;
            blob.sync()?;
            (Header::default(), 0)
        } else {
            let mut buf = [0u8; header::SIZE];
            blob.read_at(&mut buf, 0)?;
            let header = Header::decode(&buf).ok_or(Error::HeaderCorrupt)?;
            debug!(size = header.size(), len, "loaded header");
            (header, len)
        };

        // Check if blob size is aligned to block size
        let body = len.saturating_sub(header_size);
        if body % block_bytes != 0 {
            warn!(
                invalid_size = len,
                block_bytes, "blob size is not a multiple of block size, truncating"
            );
            len -= body % block_bytes;
            blob.resize(len)?;
            blob.sync()?;
        }

        Ok(Self {
            blob,
            payload: Box::new(payload),
            block_bytes,
            persisted: body / block_bytes,
            header,
            header_dirty: false,
            header_persisted: len > 0,
            blocks: HashMap::new(),
            policy: cfg.policy.build(),
            capacity: cfg.capacity.get(),
            hits: Counter::default(),
            misses: Counter::default(),
            evictions: Counter::default(),
            flushes: Counter::default(),
            resident: Gauge::default(),
        })
    }

    /// Register the cache metrics with `registry`.
    pub fn register(&self, registry: &mut Registry) {
        registry.register("hits", "Number of block lookups served from memory", self.hits.clone());
        registry.register("misses", "Number of blocks loaded or created", self.misses.clone());
        registry.register("evictions", "Number of blocks evicted", self.evictions.clone());
        registry.register("flushes", "Number of blocks written back", self.flushes.clone());
        registry.register("resident", "Number of resident blocks", self.resident.clone());
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Mutable access to the header, which is written back on the next flush.
    pub fn header_mut(&mut self) -> &mut Header {
        self.header_dirty = true;
        &mut self.header
    }

    /// Number of resident blocks.
    pub fn resident(&self) -> usize {
        self.blocks.len()
    }

    /// Number of blocks present in the blob.
    pub fn persisted(&self) -> u64 {
        self.persisted
    }

    fn offset(&self, id: u64) -> Result<u64, Error> {
        id.checked_mul(self.block_bytes)
            .and_then(|offset| offset.checked_add(header::SIZE as u64))
            .ok_or(Error::OffsetOverflow(id))
    }

    /// Fetch block `id`, loading it on a miss.
    ///
    /// A block that was never persisted is created (with every slot unused) only if `create` is
    /// set, otherwise `None` is returned.
    pub fn get_block(&mut self, id: u64, create: bool) -> Result<Option<&mut Block>, Error> {
        if self.blocks.contains_key(&id) {
            self.hits.inc();
            self.policy.touch(id);
            return Ok(self.blocks.get_mut(&id));
        }
        if id >= self.persisted && !create {
            return Ok(None);
        }

        // Load or create the block
        self.misses.inc();
        let offset = self.offset(id)?;
        let data = if id < self.persisted {
            self.payload.load(&self.blob, offset)?
        } else {
            debug!(block = id, "created block");
            self.payload.create()
        };

        // Make room for it
        while self.blocks.len() >= self.capacity {
            let Some(victim) = self.policy.victim() else {
                break;
            };
            self.evict(victim)?;
        }
        self.blocks.insert(id, Block::new(data));
        self.policy.insert(id);
        self.resident.set(self.blocks.len() as i64);
        Ok(self.blocks.get_mut(&id))
    }

    /// Mark block `id` as modified.
    pub fn lock_block(&mut self, id: u64) {
        if let Some(block) = self.blocks.get_mut(&id) {
            block.dirty = true;
        }
    }

    fn evict(&mut self, id: u64) -> Result<(), Error> {
        let Some(mut block) = self.blocks.remove(&id) else {
            return Ok(());
        };
        if block.dirty {
            if let Err(err) = self.write_block(id, &mut block) {
                // Keep the block resident so its changes are not lost
                self.blocks.insert(id, block);
                self.policy.insert(id);
                return Err(err);
            }
        }
        self.evictions.inc();
        self.resident.set(self.blocks.len() as i64);
        debug!(block = id, "evicted block");
        Ok(())
    }

    fn write_block(&mut self, id: u64, block: &mut Block) -> Result<(), Error> {
        let offset = self.offset(id)?;
        self.payload.store(&self.blob, offset, &block.data)?;
        block.dirty = false;
        self.persisted = self.persisted.max(id + 1);
        self.flushes.inc();

        // The header region must be written once any block exists
        if !self.header_persisted {
            self.header_dirty = true;
        }
        Ok(())
    }

    /// Write back every dirty block and the header (if modified), then sync the blob.
    pub fn flush(&mut self) -> Result<(), Error> {
        let mut dirty: Vec<u64> = self
            .blocks
            .iter()
            .filter(|(_, block)| block.dirty)
            .map(|(id, _)| *id)
            .collect();
        dirty.sort_unstable();
        for id in &dirty {
            let Some(mut block) = self.blocks.remove(id) else {
                continue;
            };
            let result = self.write_block(*id, &mut block);
            self.blocks.insert(*id, block);
            result?;
        }

        if self.header_dirty {
            self.blob.write_at(&self.header.encode(), 0)?;
            self.header_dirty = false;
            self.header_persisted = true;
        }
        self.blob.sync()?;
        debug!(blocks = dirty.len(), "flushed cache");
        Ok(())
    }

    /// Flush and release the cache.
    pub fn close(mut self) -> Result<(), Error> {
        self.flush()
    }

    /// Drop every block, reset the header, and truncate the blob.
    pub fn clear(&mut self) -> Result<(), Error> {
        self.blocks.clear();
        self.policy.clear();
        self.header = Header::default();
        self.header_dirty = false;
        self.header_persisted = false;
        self.persisted = 0;
        self.resident.set(0);
        self.blob.resize(0)?;
        self.blob.sync()?;
        debug!("cleared cache");
        Ok(())
    }
}
