//! State and block arithmetic shared by the stored mappings.

use super::{Config, Coverage, Error};
use crate::{
    accessor::{self, Accessor, CacheGuard, Mode, Shared},
    cache::{Block, BlockCache, Converter, Shape},
    codec::Width,
    header::Header,
    index::Span,
    interrupt::Interrupt,
};
use layermap_runtime::Blob;
use prometheus_client::registry::Registry;
use std::{iter, sync::Arc};
use tracing::debug;

/// Position of an entry within the blocks of a stored mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Layout {
    width: Width,
    block_power: u32,
}

impl Layout {
    pub(crate) fn new(width: Width, block_power: u32) -> Self {
        Self { width, block_power }
    }

    pub(crate) fn width(&self) -> Width {
        self.width
    }

    /// Entries per block.
    pub(crate) fn entries(&self) -> usize {
        1 << self.block_power
    }

    /// Block holding entry `index`.
    pub(crate) fn block(&self, index: u64) -> u64 {
        index >> self.block_power
    }

    /// Slot of entry `index` within its block.
    pub(crate) fn slot(&self, index: u64) -> usize {
        (index & (self.entries() as u64 - 1)) as usize
    }

    /// Entry index of the first slot of `block`.
    pub(crate) fn first(&self, block: u64) -> u64 {
        block << self.block_power
    }
}

/// Blob-backed state of a stored mapping.
pub(crate) struct Store<B: Blob> {
    id: String,
    coverage: Coverage,
    layout: Layout,
    shared: Arc<Shared<B>>,
}

impl<B: Blob> Store<B> {
    pub(crate) fn init(blob: B, len: u64, cfg: &Config, shape: Shape) -> Result<Self, Error> {
        cfg.validate()?;
        let layout = Layout::new(cfg.width, cfg.block_power);
        let converter = Converter::new(cfg.width, shape, layout.entries());
        let cache = BlockCache::init(blob, len, converter, &cfg.cache)?;
        debug!(
            id = cfg.id,
            size = cache.header().size(),
            blocks = cache.persisted(),
            "opened mapping"
        );
        Ok(Self {
            id: cfg.id.clone(),
            coverage: cfg.coverage,
            layout,
            shared: Arc::new(Shared::new(cache)),
        })
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn coverage(&self) -> Coverage {
        self.coverage
    }

    pub(crate) fn layout(&self) -> Layout {
        self.layout
    }

    pub(crate) fn accessor(&self, mode: Mode) -> Accessor<B> {
        Accessor::new(self.shared.clone(), mode)
    }

    pub(crate) fn header(&self) -> Header {
        self.shared.inspect(|cache| *cache.header())
    }

    pub(crate) fn flush(&self) -> Result<(), Error> {
        self.shared.exclusive(|cache| cache.flush())?;
        Ok(())
    }

    pub(crate) fn clear(&self) -> Result<(), Error> {
        self.shared.exclusive(|cache| cache.clear())?;
        debug!(id = self.id, "cleared mapping");
        Ok(())
    }

    pub(crate) fn register(&self, registry: &mut Registry) {
        self.shared.inspect(|cache| cache.register(registry));
    }
}

/// Block `id` of a write scope (created if missing).
pub(crate) fn block_mut<'a, B: Blob>(
    cache: &'a mut CacheGuard<'_, B>,
    id: u64,
) -> Result<&'a mut Block, Error> {
    cache
        .get_block(id)?
        .ok_or(Error::Accessor(accessor::Error::ReadOnly))
}

/// Search the entries of `window` block by block and return the index of the first hit.
///
/// The first block of the window is searched first, then the last, then every block in between
/// in ascending order. `search` receives a block and the slot range `[from, to)` to examine.
pub(crate) fn search_window<B: Blob>(
    cache: &mut CacheGuard<'_, B>,
    layout: Layout,
    window: Span,
    interrupt: &Interrupt,
    search: impl Fn(&[u8], usize, usize) -> Option<usize>,
) -> Result<Option<u64>, Error> {
    let first = layout.block(window.begin());
    let last = layout.block(window.end());
    let middle = (first + 1)..last;
    let blocks = iter::once(first)
        .chain((last != first).then_some(last))
        .chain(middle);
    for block in blocks {
        interrupt.check()?;
        let Some(data) = cache.peek_block(block)? else {
            continue;
        };
        let from = if block == first {
            layout.slot(window.begin())
        } else {
            0
        };
        let to = if block == last {
            layout.slot(window.end()) + 1
        } else {
            layout.entries()
        };
        if let Some(slot) = search(data.data(), from, to) {
            return Ok(Some(layout.first(block) + slot as u64));
        }
    }
    Ok(None)
}
