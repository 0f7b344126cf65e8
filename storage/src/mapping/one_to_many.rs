//! A stored mapping from each source to a contiguous span of targets.

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

/// Stores one encoded `(begin, end)` target span per source slot.
pub struct SpanOneToMany<B: Blob> {
    store: Store<B>,
}

impl<B: Blob> SpanOneToMany<B> {
    /// Open a mapping over `blob` (of length `len`).
    pub fn init(blob: B, len: u64, cfg: Config) -> Result<Self, Error> {
        Ok(Self {
            store: Store::init(blob, len, &cfg, Shape::Span)?,
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

    pub fn reader(&self) -> SpanOneToManyReader<B> {
        SpanOneToManyReader {
            accessor: self.store.accessor(Mode::Read),
            layout: self.store.layout(),
            coverage: self.store.coverage(),
        }
    }

    pub fn writer(&self) -> SpanOneToManyWriter<B> {
        SpanOneToManyWriter {
            accessor: self.store.accessor(Mode::Write),
            layout: self.store.layout(),
        }
    }
}

/// [Reader] of a [SpanOneToMany] mapping.
pub struct SpanOneToManyReader<B: Blob> {
    accessor: Accessor<B>,
    layout: Layout,
    coverage: Coverage,
}

impl<B: Blob> SpanOneToManyReader<B> {
    fn get(&mut self, source: u64) -> Result<Option<Span>, Error> {
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
            .read_span(block.data(), self.layout.slot(source)))
    }

    /// First source in `[from, to]` whose span contains `target`, with that span.
    fn find_entry(
        &mut self,
        from: u64,
        to: u64,
        target: u64,
        interrupt: &Interrupt,
    ) -> Result<Option<(u64, Span)>, Error> {
        let source = {
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
                        width.sparse_find_sorted_span(data, from, to, target)
                    } else {
                        width.find_span(data, from, to, target)
                    }
                },
            )?
        };
        let Some(source) = source else {
            return Ok(None);
        };
        Ok(self.get(source)?.map(|span| (source, span)))
    }

    /// After each hit, resume past the matched source and past the targets its span covers.
    fn find_all_monotonic(
        &mut self,
        from: u64,
        to: u64,
        targets: &[IndexSet],
        collector: &mut dyn Collector,
        interrupt: &Interrupt,
    ) -> Result<(), Error> {
        let Some(last) = index::last_index(targets) else {
            return Ok(());
        };
        let mut from = from;
        let mut probe = index::first_index(targets);
        while let Some(target) = probe {
            interrupt.check()?;
            if from > to {
                break;
            }
            let Some((source, span)) = self.find_entry(from, to, target, interrupt)? else {
                probe = target.checked_add(1).and_then(|next| ceiling(targets, next));
                continue;
            };
            collector.add(source);
            if span.end() >= last {
                break;
            }
            match source.checked_add(1) {
                Some(next) => from = next,
                None => break,
            }
            probe = ceiling(targets, span.end().max(target) + 1);
        }
        Ok(())
    }

    /// Shrink the window whenever a hit lands on one of its ends and skip the targets covered by
    /// each matched span.
    fn find_all_unordered(
        &mut self,
        from: u64,
        to: u64,
        targets: &[IndexSet],
        collector: &mut dyn Collector,
        interrupt: &Interrupt,
    ) -> Result<(), Error> {
        let (mut low, mut high) = (from, to);
        let mut probe = index::first_index(targets);
        while let Some(target) = probe {
            interrupt.check()?;
            if high < low {
                break;
            }
            let Some((source, span)) = self.find_entry(low, high, target, interrupt)? else {
                probe = target.checked_add(1).and_then(|next| ceiling(targets, next));
                continue;
            };
            collector.add(source);
            if source == low {
                match low.checked_add(1) {
                    Some(next) => low = next,
                    None => break,
                }
            } else if source == high {
                match high.checked_sub(1) {
                    Some(next) => high = next,
                    None => break,
                }
            }
            probe = span
                .end()
                .max(target)
                .checked_add(1)
                .and_then(|next| ceiling(targets, next));
        }
        Ok(())
    }
}

/// Smallest member of the sorted `sets` that is `>= index`.
fn ceiling(sets: &[IndexSet], index: u64) -> Option<u64> {
    sets.iter().find_map(|set| set.ceiling(index))
}

impl<B: Blob> Reader for SpanOneToManyReader<B> {
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
        let Some(span) = self.get(source)? else {
            return Ok(false);
        };
        collector.add_span(span);
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
        Ok(self.get(source)?.map_or(0, |span| span.len()))
    }

    fn begin_index(&mut self, source: u64) -> Result<Option<u64>, Error> {
        Ok(self.get(source)?.map(|span| span.begin()))
    }

    fn end_index(&mut self, source: u64) -> Result<Option<u64>, Error> {
        Ok(self.get(source)?.map(|span| span.end()))
    }

    fn find(
        &mut self,
        from: u64,
        to: u64,
        target: u64,
        interrupt: &Interrupt,
    ) -> Result<Option<u64>, Error> {
        Ok(self
            .find_entry(from, to, target, interrupt)?
            .map(|(source, _)| source))
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
        if self.coverage.monotonic {
            self.find_all_monotonic(from, to, targets, collector, interrupt)
        } else {
            self.find_all_unordered(from, to, targets, collector, interrupt)
        }
    }
}

/// [Writer] of a [SpanOneToMany] mapping.
pub struct SpanOneToManyWriter<B: Blob> {
    accessor: Accessor<B>,
    layout: Layout,
}

impl<B: Blob> SpanOneToManyWriter<B> {
    /// Grow the span of `source` to cover `targets`.
    fn extend(&mut self, source: u64, targets: Span) -> Result<(), Error> {
        let mut cache = self.accessor.cache()?;
        let id = self.layout.block(source);
        let slot = self.layout.slot(source);
        let width = self.layout.width();

        let block = block_mut(&mut cache, id)?;
        let previous = width.read_span(block.data(), slot);
        let span = previous.map_or(targets, |previous| previous.merge(&targets));
        if previous == Some(span) {
            return Ok(());
        }
        width.write_span(block.data_mut(), slot, Some(span))?;
        cache.lock_block(id)?;

        let header = cache.header_mut()?;
        if previous.is_none() {
            header.grow_size(1);
        }
        header.update_used_index(source);
        header.update_target_indices(targets);
        Ok(())
    }
}

impl<B: Blob> Writer for SpanOneToManyWriter<B> {
    fn begin(&mut self) -> Result<(), Error> {
        Ok(self.accessor.begin()?)
    }

    fn end(&mut self) -> Result<(), Error> {
        Ok(self.accessor.end()?)
    }

    fn map(&mut self, source: u64, target: u64) -> Result<(), Error> {
        self.extend(source, Span::single(target))
    }

    fn map_span(&mut self, sources: Span, targets: Span) -> Result<(), Error> {
        for source in sources.begin()..=sources.end() {
            self.extend(source, targets)?;
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
        ensure_sorted(targets, "targets")?;
        let (Some(first), Some(last)) = (index::first_index(targets), index::last_index(targets))
        else {
            return Err(Error::InvalidInput("targets must not be empty".into()));
        };
        let span = Span::new(first, last);
        if span.len() != index::index_count(targets) {
            return Err(Error::InvalidInput("targets must be continuous".into()));
        }
        for set in sources {
            interrupt.check()?;
            for source in set.iter() {
                self.extend(source, span)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::Width,
        index::IndexSetBuilder,
        mapping::{
            tests::{config, open},
            Mapping,
        },
    };
    use layermap_runtime::memory;

    fn mapping(storage: &memory::Storage, monotonic: bool) -> Mapping<memory::Blob> {
        let (blob, len) = open(storage, "one_to_many");
        Mapping::SpanOneToMany(
            SpanOneToMany::init(blob, len, config("one_to_many", monotonic, Width::U16)).unwrap(),
        )
    }

    fn write(mapping: &Mapping<memory::Blob>, entries: &[(u64, Span)]) {
        let mut writer = mapping.new_writer().unwrap();
        writer.begin().unwrap();
        for (source, targets) in entries {
            writer.map_span(Span::single(*source), *targets).unwrap();
        }
        writer.end().unwrap();
    }

    #[test]
    fn test_lookup_span() {
        let storage = memory::Storage::default();
        let mapping = mapping(&storage, true);
        write(
            &mapping,
            &[(0, Span::new(0, 2)), (1, Span::new(3, 3)), (2, Span::new(4, 9))],
        );
        assert_eq!(mapping.size(), Some(3));

        let mut reader = mapping.new_reader().unwrap();
        reader.begin().unwrap();
        assert_eq!(reader.lookup_sets(2).unwrap(), vec![IndexSet::span(4, 9)]);
        assert_eq!(reader.indices_count(2).unwrap(), 6);
        assert_eq!(reader.indices_count(3).unwrap(), 0);
        assert_eq!(reader.begin_index(0).unwrap(), Some(0));
        assert_eq!(reader.end_index(0).unwrap(), Some(2));

        let mut targets = IndexSetBuilder::new();
        reader
            .lookup_all(&[IndexSet::span(0, 2)], &mut targets, &Interrupt::new())
            .unwrap();
        assert_eq!(targets.finish(), vec![IndexSet::span(0, 9)]);
        reader.end().unwrap();
    }

    #[test]
    fn test_monotonic_find_with_gaps() {
        let storage = memory::Storage::default();
        let mapping = mapping(&storage, true);
        write(&mapping, &[(0, Span::new(1, 1)), (3, Span::new(4, 5))]);

        let mut reader = mapping.new_reader().unwrap();
        reader.begin().unwrap();
        let interrupt = Interrupt::new();
        assert_eq!(reader.find(0, 3, 5, &interrupt).unwrap(), Some(3));
        assert_eq!(reader.find(0, 3, 4, &interrupt).unwrap(), Some(3));
        assert_eq!(reader.find(0, 3, 1, &interrupt).unwrap(), Some(0));
        assert_eq!(reader.find(0, 3, 2, &interrupt).unwrap(), None);
        reader.end().unwrap();
    }

    #[test]
    fn test_map_extends_span() {
        let storage = memory::Storage::default();
        let mapping = mapping(&storage, false);
        let mut writer = mapping.new_writer().unwrap();
        writer.begin().unwrap();
        writer.map(4, 10).unwrap();
        writer.map(4, 7).unwrap();
        writer.map(4, 8).unwrap();
        writer.end().unwrap();
        assert_eq!(mapping.size(), Some(1));

        let mut reader = mapping.new_reader().unwrap();
        reader.begin().unwrap();
        assert_eq!(reader.lookup_sets(4).unwrap(), vec![IndexSet::span(7, 10)]);
        reader.end().unwrap();
    }

    #[test]
    fn test_map_all_requires_continuous_targets() {
        let storage = memory::Storage::default();
        let mapping = mapping(&storage, true);
        let interrupt = Interrupt::new();
        let mut writer = mapping.new_writer().unwrap();
        writer.begin().unwrap();
        assert!(matches!(
            writer.map_all(
                &[IndexSet::span(0, 1)],
                &[IndexSet::values(vec![1, 3])],
                &interrupt
            ),
            Err(Error::InvalidInput(_))
        ));
        writer
            .map_all(
                &[IndexSet::values(vec![2, 3])],
                &[IndexSet::span(5, 6), IndexSet::values(vec![7])],
                &interrupt,
            )
            .unwrap();
        writer.end().unwrap();

        let mut reader = mapping.new_reader().unwrap();
        reader.begin().unwrap();
        assert_eq!(reader.lookup_sets(3).unwrap(), vec![IndexSet::span(5, 7)]);
        reader.end().unwrap();
    }

    #[test]
    fn test_find_monotonic() {
        let storage = memory::Storage::default();
        let mapping = mapping(&storage, true);
        // Sources 0..=9 each cover two targets, spread over three blocks
        let entries: Vec<(u64, Span)> = (0..10)
            .map(|source| (source, Span::new(source * 2, source * 2 + 1)))
            .collect();
        write(&mapping, &entries);

        let interrupt = Interrupt::new();
        let mut reader = mapping.new_reader().unwrap();
        reader.begin().unwrap();
        for target in 0..20 {
            assert_eq!(reader.find(0, 9, target, &interrupt).unwrap(), Some(target / 2));
        }
        assert_eq!(reader.find(0, 9, 20, &interrupt).unwrap(), None);
        assert_eq!(reader.find(3, 5, 4, &interrupt).unwrap(), None);

        let mut sources = Vec::new();
        reader
            .find_all(
                0,
                9,
                &[IndexSet::values(vec![1, 2, 3, 9]), IndexSet::span(14, 30)],
                &mut sources,
                &interrupt,
            )
            .unwrap();
        assert_eq!(sources, [0, 1, 4, 7, 8, 9]);

        let mut sources = Vec::new();
        reader
            .find_all(2, 4, &[IndexSet::span(0, 19)], &mut sources, &interrupt)
            .unwrap();
        assert_eq!(sources, [2, 3, 4]);
        reader.end().unwrap();
    }

    #[test]
    fn test_find_all_unordered() {
        let storage = memory::Storage::default();
        let mapping = mapping(&storage, false);
        write(
            &mapping,
            &[
                (0, Span::new(10, 12)),
                (1, Span::new(0, 3)),
                (2, Span::new(20, 20)),
                (5, Span::new(4, 9)),
                (6, Span::new(13, 19)),
            ],
        );

        let interrupt = Interrupt::new();
        let mut reader = mapping.new_reader().unwrap();
        reader.begin().unwrap();
        assert_eq!(reader.find(0, 6, 15, &interrupt).unwrap(), Some(6));
        assert_eq!(reader.find(0, 5, 15, &interrupt).unwrap(), None);

        let mut sources = Vec::new();
        reader
            .find_all(0, 6, &[IndexSet::span(0, 20)], &mut sources, &interrupt)
            .unwrap();
        assert_eq!(sources, [1, 5, 0, 6, 2]);

        let mut sources = Vec::new();
        reader
            .find_all(
                0,
                6,
                &[IndexSet::values(vec![2, 11, 16])],
                &mut sources,
                &interrupt,
            )
            .unwrap();
        assert_eq!(sources, [1, 0, 6]);
        reader.end().unwrap();
    }

    #[test]
    fn test_find_all_interrupted() {
        let storage = memory::Storage::default();
        let mapping = mapping(&storage, true);
        write(&mapping, &[(0, Span::new(0, 1))]);

        let interrupt = Interrupt::new();
        interrupt.interrupt();
        let mut reader = mapping.new_reader().unwrap();
        reader.begin().unwrap();
        let mut sources = Vec::new();
        assert!(matches!(
            reader.find_all(0, 0, &[IndexSet::span(0, 1)], &mut sources, &interrupt),
            Err(Error::Interrupted(_))
        ));
        reader.end().unwrap();
    }
}
