//! A stored mapping from groups of sources to a bound on their targets.
//!
//! Runs of `2^group_power` consecutive sources share one stored `(min, max)` bound of the targets
//! they map to. The exact target of a source is resolved by searching the bound in the inverse
//! (one-to-many) mapping, which must be built first and outlive every reader.

use super::{
    ensure_sorted,
    stored::{block_mut, Layout, Store},
    Config, Coverage, Error, Mapping, Reader, Relation, Writer,
};
use crate::{
    accessor::{Accessor, Mode},
    cache::Shape,
    index::{self, Collector, IndexSet, Span},
    interrupt::Interrupt,
};
use layermap_runtime::Blob;
use std::sync::{Arc, Weak};

/// Stores one encoded target bound per group of sources.
pub struct SpanManyToOne<B: Blob> {
    store: Store<B>,
    group_power: u32,
    inverse_id: String,
    inverse: Weak<Mapping<B>>,
}

impl<B: Blob> SpanManyToOne<B> {
    /// Open a mapping over `blob` (of length `len`) resolving sources through `inverse`.
    pub fn init(blob: B, len: u64, cfg: Config, inverse: &Arc<Mapping<B>>) -> Result<Self, Error> {
        if inverse.relation() != Relation::OneToMany {
            return Err(Error::InverseRelation(
                inverse.id().into(),
                inverse.relation(),
            ));
        }
        Ok(Self {
            store: Store::init(blob, len, &cfg, Shape::Span)?,
            group_power: cfg.group_power,
            inverse_id: inverse.id().into(),
            inverse: Arc::downgrade(inverse),
        })
    }

    pub fn id(&self) -> &str {
        self.store.id()
    }

    pub fn coverage(&self) -> Coverage {
        self.store.coverage()
    }

    /// Identifier of the inverse mapping.
    pub fn inverse_id(&self) -> &str {
        &self.inverse_id
    }

    pub(crate) fn store(&self) -> &Store<B> {
        &self.store
    }

    /// Create a reader, failing if the inverse mapping has been dropped.
    pub fn reader(&self) -> Result<SpanManyToOneReader<B>, Error> {
        let inverse = self
            .inverse
            .upgrade()
            .ok_or_else(|| Error::MissingInverse(self.inverse_id.clone()))?;
        Ok(SpanManyToOneReader {
            accessor: self.store.accessor(Mode::Read),
            groups: Groups::new(self.store.layout(), self.group_power),
            coverage: self.store.coverage(),
            inverse: inverse.new_reader()?,
            idle: Interrupt::new(),
        })
    }

    pub fn writer(&self) -> SpanManyToOneWriter<B> {
        SpanManyToOneWriter {
            accessor: self.store.accessor(Mode::Write),
            groups: Groups::new(self.store.layout(), self.group_power),
        }
    }
}

/// Maps sources to group slots.
#[derive(Clone, Copy)]
struct Groups {
    layout: Layout,
    power: u32,
}

impl Groups {
    fn new(layout: Layout, power: u32) -> Self {
        Self { layout, power }
    }

    fn group(&self, source: u64) -> u64 {
        source >> self.power
    }

    /// Sources belonging to `group`.
    fn sources(&self, group: u64) -> Span {
        let first = group << self.power;
        Span::new(first, first | ((1 << self.power) - 1))
    }

    fn block(&self, group: u64) -> u64 {
        self.layout.block(group)
    }

    fn slot(&self, group: u64) -> usize {
        self.layout.slot(group)
    }
}

/// [Reader] of a [SpanManyToOne] mapping.
pub struct SpanManyToOneReader<B: Blob> {
    accessor: Accessor<B>,
    groups: Groups,
    coverage: Coverage,
    inverse: Box<dyn Reader>,
    idle: Interrupt,
}

impl<B: Blob> SpanManyToOneReader<B> {
    /// Stored target bound of the group of `source`.
    fn bound(&mut self, source: u64) -> Result<Option<Span>, Error> {
        let mut cache = self.accessor.cache()?;
        if !cache.header().is_used_index(source) {
            return Ok(None);
        }
        let group = self.groups.group(source);
        let Some(block) = cache.peek_block(self.groups.block(group))? else {
            return Ok(None);
        };
        Ok(self
            .groups
            .layout
            .width()
            .read_span(block.data(), self.groups.slot(group)))
    }

    /// Target of `source`, found by searching the inverse within the group bound.
    ///
    /// Single lookups pass no interrupt and search under the reader's own token, which is never
    /// raised.
    fn resolve(
        &mut self,
        source: u64,
        interrupt: Option<&Interrupt>,
    ) -> Result<Option<u64>, Error> {
        let Some(bound) = self.bound(source)? else {
            return Ok(None);
        };
        let interrupt = interrupt.unwrap_or(&self.idle);
        self.inverse
            .find(bound.begin(), bound.end(), source, interrupt)
    }
}

impl<B: Blob> Reader for SpanManyToOneReader<B> {
    fn begin(&mut self) -> Result<(), Error> {
        self.accessor.begin()?;
        if let Err(err) = self.inverse.begin() {
            let _ = self.accessor.end();
            return Err(err);
        }
        Ok(())
    }

    fn end(&mut self) -> Result<(), Error> {
        let own = self.accessor.end();
        let inverse = self.inverse.end();
        own?;
        inverse
    }

    fn coverage(&self) -> Coverage {
        self.coverage
    }

    fn lookup(&mut self, source: u64, collector: &mut dyn Collector) -> Result<bool, Error> {
        let Some(target) = self.resolve(source, None)? else {
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
        if !self.inverse.coverage().monotonic {
            for set in sources {
                interrupt.check()?;
                for source in set.iter() {
                    if let Some(target) = self.resolve(source, Some(interrupt))? {
                        collector.add(target);
                    }
                }
            }
            return Ok(());
        }

        // Every source up to the end of a resolved target's span maps to that target
        let mut resolved: Option<u64> = None;
        'sets: for set in sources {
            interrupt.check()?;
            let start = match resolved {
                Some(end) => match end.checked_add(1) {
                    Some(start) => start,
                    None => break 'sets,
                },
                None => 0,
            };
            let mut probe = set.ceiling(start);
            while let Some(source) = probe {
                let Some(target) = self.resolve(source, Some(interrupt))? else {
                    probe = source.checked_add(1).and_then(|next| set.ceiling(next));
                    continue;
                };
                collector.add(target);
                let end = self.inverse.end_index(target)?.map_or(source, |end| end.max(source));
                resolved = Some(end);
                probe = end.checked_add(1).and_then(|next| set.ceiling(next));
            }
        }
        Ok(())
    }

    fn indices_count(&mut self, source: u64) -> Result<u64, Error> {
        Ok(self.resolve(source, None)?.map_or(0, |_| 1))
    }

    fn begin_index(&mut self, source: u64) -> Result<Option<u64>, Error> {
        self.resolve(source, None)
    }

    fn end_index(&mut self, source: u64) -> Result<Option<u64>, Error> {
        self.resolve(source, None)
    }

    fn find(&mut self, _: u64, _: u64, _: u64, _: &Interrupt) -> Result<Option<u64>, Error> {
        Err(Error::Unsupported(
            "reverse lookup on a many-to-one mapping (use its inverse)",
        ))
    }

    fn find_all(
        &mut self,
        _: u64,
        _: u64,
        _: &[IndexSet],
        _: &mut dyn Collector,
        _: &Interrupt,
    ) -> Result<(), Error> {
        Err(Error::Unsupported(
            "reverse lookup on a many-to-one mapping (use its inverse)",
        ))
    }
}

/// [Writer] of a [SpanManyToOne] mapping.
pub struct SpanManyToOneWriter<B: Blob> {
    accessor: Accessor<B>,
    groups: Groups,
}

impl<B: Blob> SpanManyToOneWriter<B> {
    /// Widen the bound of `group` to cover `targets`, recording `sources` as used.
    fn extend(&mut self, group: u64, sources: Span, targets: Span) -> Result<(), Error> {
        let mut cache = self.accessor.cache()?;
        let id = self.groups.block(group);
        let slot = self.groups.slot(group);
        let width = self.groups.layout.width();

        let block = block_mut(&mut cache, id)?;
        let previous = width.read_span(block.data(), slot);
        let bound = previous.map_or(targets, |previous| previous.merge(&targets));
        let changed = previous != Some(bound);
        if changed {
            width.write_span(block.data_mut(), slot, Some(bound))?;
            cache.lock_block(id)?;
        }

        let header = cache.header();
        if !changed && header.is_used_index(sources.begin()) && header.is_used_index(sources.end())
        {
            return Ok(());
        }
        let header = cache.header_mut()?;
        if previous.is_none() {
            header.grow_size(1);
        }
        header.update_used_indices(sources);
        header.update_target_indices(targets);
        Ok(())
    }
}

impl<B: Blob> Writer for SpanManyToOneWriter<B> {
    fn begin(&mut self) -> Result<(), Error> {
        Ok(self.accessor.begin()?)
    }

    fn end(&mut self) -> Result<(), Error> {
        Ok(self.accessor.end()?)
    }

    fn map(&mut self, source: u64, target: u64) -> Result<(), Error> {
        self.extend(
            self.groups.group(source),
            Span::single(source),
            Span::single(target),
        )
    }

    fn map_span(&mut self, sources: Span, targets: Span) -> Result<(), Error> {
        let (first, last) = (
            self.groups.group(sources.begin()),
            self.groups.group(sources.end()),
        );
        for group in first..=last {
            let Some(members) = self.groups.sources(group).intersect(&sources) else {
                continue;
            };
            self.extend(group, members, targets)?;
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
        let targets = Span::new(first, last);
        for set in sources {
            interrupt.check()?;
            match set {
                IndexSet::Span(span) => self.map_span(*span, targets)?,
                IndexSet::Values(values) => {
                    for source in values {
                        self.extend(self.groups.group(*source), Span::single(*source), targets)?;
                    }
                }
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
        mapping::{
            tests::{config, open},
            SpanOneToMany,
        },
    };
    use layermap_runtime::memory;

    /// Inverse mapping: target 0 covers sources 0..=2, target 1 covers source 3.
    fn inverse(storage: &memory::Storage, monotonic: bool) -> Arc<Mapping<memory::Blob>> {
        let (blob, len) = open(storage, "inverse");
        let mapping = Mapping::SpanOneToMany(
            SpanOneToMany::init(blob, len, config("inverse", monotonic, Width::U8)).unwrap(),
        );
        let mut writer = mapping.new_writer().unwrap();
        writer.begin().unwrap();
        writer.map_span(Span::single(0), Span::new(0, 2)).unwrap();
        writer.map_span(Span::single(1), Span::new(3, 3)).unwrap();
        writer.end().unwrap();
        Arc::new(mapping)
    }

    fn mapping(
        storage: &memory::Storage,
        inverse: &Arc<Mapping<memory::Blob>>,
    ) -> Mapping<memory::Blob> {
        let (blob, len) = open(storage, "many_to_one");
        Mapping::SpanManyToOne(
            SpanManyToOne::init(blob, len, config("many_to_one", true, Width::U8), inverse)
                .unwrap(),
        )
    }

    fn write(mapping: &Mapping<memory::Blob>, pairs: &[(u64, u64)]) {
        let mut writer = mapping.new_writer().unwrap();
        writer.begin().unwrap();
        for (source, target) in pairs {
            writer.map(*source, *target).unwrap();
        }
        writer.end().unwrap();
    }

    #[test]
    fn test_lookup_through_inverse() {
        crate::tests::init_tracing();
        let storage = memory::Storage::default();
        let inverse = inverse(&storage, true);
        let mapping = mapping(&storage, &inverse);
        write(&mapping, &[(0, 0), (1, 0), (2, 0), (3, 1)]);

        // Two groups of two sources
        assert_eq!(mapping.size(), Some(2));

        let mut reader = mapping.new_reader().unwrap();
        reader.begin().unwrap();
        let mut targets = Vec::new();
        assert!(reader.lookup(3, &mut targets).unwrap());
        assert!(reader.lookup(2, &mut targets).unwrap());
        assert!(!reader.lookup(4, &mut targets).unwrap());
        assert_eq!(targets, [1, 0]);
        assert_eq!(reader.indices_count(0).unwrap(), 1);
        assert_eq!(reader.indices_count(9).unwrap(), 0);
        assert_eq!(reader.begin_index(1).unwrap(), Some(0));
        reader.end().unwrap();
    }

    #[test]
    fn test_lookup_all() {
        let storage = memory::Storage::default();
        let interrupt = Interrupt::new();
        for monotonic in [true, false] {
            let inverse = inverse(&storage, monotonic);
            let mapping = mapping(&storage, &inverse);
            mapping.clear().unwrap();
            write(&mapping, &[(0, 0), (1, 0), (2, 0), (3, 1)]);

            let mut reader = mapping.new_reader().unwrap();
            reader.begin().unwrap();
            let mut targets = Vec::new();
            reader
                .lookup_all(&[IndexSet::span(0, 3)], &mut targets, &interrupt)
                .unwrap();
            if monotonic {
                assert_eq!(targets, [0, 1]);
            } else {
                assert_eq!(targets, [0, 0, 0, 1]);
            }

            let mut targets = Vec::new();
            reader
                .lookup_all(
                    &[IndexSet::values(vec![1]), IndexSet::values(vec![2, 3])],
                    &mut targets,
                    &interrupt,
                )
                .unwrap();
            if monotonic {
                assert_eq!(targets, [0, 1]);
            } else {
                assert_eq!(targets, [0, 0, 1]);
            }
            reader.end().unwrap();
        }
    }

    #[test]
    fn test_group_bound_tightening() {
        let storage = memory::Storage::default();
        let inverse = inverse(&storage, true);
        let mapping = mapping(&storage, &inverse);
        write(&mapping, &[(0, 3), (1, 3)]);
        assert_eq!(mapping.size(), Some(1));

        let Mapping::SpanManyToOne(stored) = &mapping else {
            unreachable!();
        };
        let header = stored.store().header();
        assert_eq!(header.sources(), Some(Span::new(0, 1)));
        assert_eq!(header.targets(), Some(Span::new(3, 3)));

        // The bound widens only as far as the mapped targets require
        let mut reader = stored.reader().unwrap();
        reader.begin().unwrap();
        assert_eq!(reader.bound(1).unwrap(), Some(Span::new(3, 3)));
        reader.end().unwrap();

        write(&mapping, &[(1, 5)]);
        let mut reader = stored.reader().unwrap();
        reader.begin().unwrap();
        assert_eq!(reader.bound(0).unwrap(), Some(Span::new(3, 5)));
        assert_eq!(reader.bound(2).unwrap(), None);
        reader.end().unwrap();
        assert_eq!(mapping.size(), Some(1));
    }

    #[test]
    fn test_map_span_and_all() {
        let storage = memory::Storage::default();
        let inverse = inverse(&storage, true);
        let mapping = mapping(&storage, &inverse);
        let interrupt = Interrupt::new();
        let mut writer = mapping.new_writer().unwrap();
        writer.begin().unwrap();
        writer.map_span(Span::new(0, 2), Span::single(0)).unwrap();
        writer
            .map_all(
                &[IndexSet::values(vec![3])],
                &[IndexSet::span(1, 1)],
                &interrupt,
            )
            .unwrap();
        assert!(matches!(
            writer.map_all(&[IndexSet::values(vec![3])], &[], &interrupt),
            Err(Error::InvalidInput(_))
        ));
        writer.end().unwrap();
        assert_eq!(mapping.size(), Some(2));

        let mut reader = mapping.new_reader().unwrap();
        reader.begin().unwrap();
        let mut targets = Vec::new();
        for source in 0..4 {
            reader.lookup(source, &mut targets).unwrap();
        }
        assert_eq!(targets, [0, 0, 0, 1]);
        reader.end().unwrap();
    }

    #[test]
    fn test_reverse_lookup_unsupported() {
        let storage = memory::Storage::default();
        let inverse = inverse(&storage, true);
        let mapping = mapping(&storage, &inverse);
        let mut reader = mapping.new_reader().unwrap();
        reader.begin().unwrap();
        assert!(matches!(
            reader.find(0, 3, 0, &Interrupt::new()),
            Err(Error::Unsupported(_))
        ));
        reader.end().unwrap();
    }

    #[test]
    fn test_inverse_required() {
        let storage = memory::Storage::default();
        let inverse = inverse(&storage, true);
        let mapping = mapping(&storage, &inverse);

        // The inverse of a many-to-one mapping must be one-to-many
        let wrapped = Arc::new(mapping);
        let (blob, len) = open(&storage, "nested");
        assert!(matches!(
            SpanManyToOne::init(blob, len, config("nested", true, Width::U8), &wrapped),
            Err(Error::InverseRelation(_, Relation::ManyToOne))
        ));

        // Readers cannot be created once the inverse is gone
        drop(inverse);
        assert!(matches!(
            wrapped.new_reader(),
            Err(Error::MissingInverse(id)) if id == "inverse"
        ));
    }
}
