//! A stored mapping with at most one target per source.

use super::{
    ensure_sorted,
    stored::{block_mut, search_window, Layout, Store},
    Config, Coverage, Error, Reader, Writer,
};
use crate::{
    accessor::{Accessor, Mode},
    cache::Shape,
    index::{self, Collector, IndexSet, Span},
    interrupt::Interrupt,
};
use layermap_runtime::Blob;

/// Stores one encoded target per source slot.
pub struct OneToOne<B: Blob> {
    store: Store<B>,
}

impl<B: Blob> OneToOne<B> {
    /// Open a mapping over `blob` (of length `len`).
    pub fn init(blob: B, len: u64, cfg: Config) -> Result<Self, Error> {
        Ok(Self {
            store: Store::init(blob, len, &cfg, Shape::Value)?,
        })
    }

    pub fn id(&self) -> &str {
        self.store.id()
    }

    pub fn coverage(&self) -> Coverage {
        self.store.coverage()
    }

    pub(crate) fn store(&self) -> &Store<B> {
        &self.store
    }

    pub fn reader(&self) -> OneToOneReader<B> {
        OneToOneReader {
            accessor: self.store.accessor(Mode::Read),
            layout: self.store.layout(),
            coverage: self.store.coverage(),
        }
    }

    pub fn writer(&self) -> OneToOneWriter<B> {
        OneToOneWriter {
            accessor: self.store.accessor(Mode::Write),
            layout: self.store.layout(),
        }
    }
}

/// [Reader] of a [OneToOne] mapping.
pub struct OneToOneReader<B: Blob> {
    accessor: Accessor<B>,
    layout: Layout,
    coverage: Coverage,
}

impl<B: Blob> OneToOneReader<B> {
    fn get(&mut self, source: u64) -> Result<Option<u64>, Error> {
        let mut cache = self.accessor.cache()?;
        if !cache.header().is_used_index(source) {
            return Ok(None);
        }
        let Some(block) = cache.peek_block(self.layout.block(source))? else {
            return Ok(None);
        };
        Ok(self
            .layout
            .width()
            .read(block.data(), self.layout.slot(source)))
    }
}

impl<B: Blob> Reader for OneToOneReader<B> {
    fn begin(&mut self) -> Result<(), Error> {
        Ok(self.accessor.begin()?)
    }

    fn end(&mut self) -> Result<(), Error> {
        Ok(self.accessor.end()?)
    }

    fn coverage(&self) -> Coverage {
        self.coverage
    }

    fn lookup(&mut self, source: u64, collector: &mut dyn Collector) -> Result<bool, Error> {
        let Some(target) = self.get(source)? else {
            return Ok(false);
        };
        collector.add(target);
        Ok(true)
    }

    fn lookup_all(
        &mut self,
        sources: &[IndexSet],
        collector: &mut dyn Collector,
        interrupt: &Interrupt,
    ) -> Result<(), Error> {
        ensure_sorted(sources, "sources")?;
        for set in sources {
            interrupt.check()?;
            for source in set.iter() {
                self.lookup(source, collector)?;
            }
        }
        Ok(())
    }

    fn indices_count(&mut self, source: u64) -> Result<u64, Error> {
        Ok(self.get(source)?.map_or(0, |_| 1))
    }

    fn begin_index(&mut self, source: u64) -> Result<Option<u64>, Error> {
        self.get(source)
    }

    fn end_index(&mut self, source: u64) -> Result<Option<u64>, Error> {
        self.get(source)
    }

    fn find(
        &mut self,
        from: u64,
        to: u64,
        target: u64,
        interrupt: &Interrupt,
    ) -> Result<Option<u64>, Error> {
        let mut cache = self.accessor.cache()?;
        if !cache.header().is_used_target(target) {
            return Ok(None);
        }
        let Some(window) = cache.header().used_indices(from, to) else {
            return Ok(None);
        };
        let width = self.layout.width();
        let monotonic = self.coverage.monotonic;
        search_window(
            &mut cache,
            self.layout,
            window,
            interrupt,
            |data, from, to| {
                if monotonic {
                    width.sparse_find_sorted(data, from, to, target)
                } else {
                    width.find(data, from, to, target)
                }
            },
        )
    }

    fn find_all(
        &mut self,
        from: u64,
        to: u64,
        targets: &[IndexSet],
        collector: &mut dyn Collector,
        interrupt: &Interrupt,
    ) -> Result<(), Error> {
        ensure_sorted(targets, "targets")?;
        let mut from = from;
        for set in targets {
            interrupt.check()?;
            for target in set.iter() {
                if from > to {
                    return Ok(());
                }
                let Some(source) = self.find(from, to, target, interrupt)? else {
                    continue;
                };
                collector.add(source);

                // Later targets can only map to later sources
                if self.coverage.monotonic {
                    match source.checked_add(1) {
                        Some(next) => from = next,
                        None => return Ok(()),
                    }
                }
            }
        }
        Ok(())
    }
}

/// [Writer] of a [OneToOne] mapping.
pub struct OneToOneWriter<B: Blob> {
    accessor: Accessor<B>,
    layout: Layout,
}

impl<B: Blob> Writer for OneToOneWriter<B> {
    fn begin(&mut self) -> Result<(), Error> {
        Ok(self.accessor.begin()?)
    }

    fn end(&mut self) -> Result<(), Error> {
        Ok(self.accessor.end()?)
    }

    fn map(&mut self, source: u64, target: u64) -> Result<(), Error> {
        let mut cache = self.accessor.cache()?;
        let id = self.layout.block(source);
        let slot = self.layout.slot(source);
        let width = self.layout.width();

        let block = block_mut(&mut cache, id)?;
        let previous = width.read(block.data(), slot);
        if previous == Some(target) {
            return Ok(());
        }
        width.write(block.data_mut(), slot, Some(target))?;
        cache.lock_block(id)?;

        let header = cache.header_mut()?;
        if previous.is_none() {
            header.grow_size(1);
        }
        header.update_used_index(source);
        header.update_target_index(target);
        Ok(())
    }

    fn map_span(&mut self, sources: Span, targets: Span) -> Result<(), Error> {
        if sources.len() != targets.len() {
            return Err(Error::InvalidInput(format!(
                "source span of {} indices cannot map onto target span of {}",
                sources.len(),
                targets.len()
            )));
        }
        for (source, target) in (sources.begin()..=sources.end()).zip(targets.begin()..) {
            self.map(source, target)?;
        }
        Ok(())
    }

    fn map_all(
        &mut self,
        sources: &[IndexSet],
        targets: &[IndexSet],
        interrupt: &Interrupt,
    ) -> Result<(), Error> {
        ensure_sorted(sources, "sources")?;
        let (sources_count, targets_count) =
            (index::index_count(sources), index::index_count(targets));
        if sources_count != targets_count {
            return Err(Error::InvalidInput(format!(
                "{sources_count} sources cannot map onto {targets_count} targets"
            )));
        }
        let mut targets = index::indices(targets);
        for set in sources {
            interrupt.check()?;
            for (source, target) in set.iter().zip(targets.by_ref()) {
                self.map(source, target)?;
            }
        }
        Ok(())
    }
}
