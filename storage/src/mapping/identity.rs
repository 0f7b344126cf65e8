use super::{ensure_sorted, Coverage, Error, Reader};
use crate::{
    index::{Collector, IndexSet, Span},
    interrupt::Interrupt,
};

/// Maps every index below `size` to itself.
#[derive(Clone, Debug)]
pub struct Identity {
    id: String,
    size: u64,
}

impl Identity {
    pub fn new(id: impl Into<String>, size: u64) -> Self {
        Self {
            id: id.into(),
            size,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of indices in both layers.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn coverage(&self) -> Coverage {
        Coverage {
            total: true,
            monotonic: true,
        }
    }

    pub fn reader(&self) -> IdentityReader {
        IdentityReader { size: self.size }
    }
}

/// [Reader] of an [Identity] mapping.
pub struct IdentityReader {
    size: u64,
}

impl IdentityReader {
    fn get(&self, index: u64) -> Option<u64> {
        (index < self.size).then_some(index)
    }

    /// Part of `span` inside the layer.
    fn clip(&self, span: Span) -> Option<Span> {
        let last = self.size.checked_sub(1)?;
        span.intersect(&Span::new(0, last))
    }
}

impl Reader for IdentityReader {
    fn begin(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn end(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn coverage(&self) -> Coverage {
        Coverage {
            total: true,
            monotonic: true,
        }
    }

    fn lookup(&mut self, source: u64, collector: &mut dyn Collector) -> Result<bool, Error> {
        let Some(target) = self.get(source) else {
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
            match set {
                IndexSet::Span(span) => {
                    if let Some(span) = self.clip(*span) {
                        collector.add_span(span);
                    }
                }
                IndexSet::Values(values) => {
                    for target in values.iter().filter_map(|value| self.get(*value)) {
                        collector.add(target);
                    }
                }
            }
        }
        Ok(())
    }

    fn indices_count(&mut self, source: u64) -> Result<u64, Error> {
        Ok(self.get(source).map_or(0, |_| 1))
    }

    fn begin_index(&mut self, source: u64) -> Result<Option<u64>, Error> {
        Ok(self.get(source))
    }

    fn end_index(&mut self, source: u64) -> Result<Option<u64>, Error> {
        Ok(self.get(source))
    }

    fn find(
        &mut self,
        from: u64,
        to: u64,
        target: u64,
        _: &Interrupt,
    ) -> Result<Option<u64>, Error> {
        Ok(self
            .get(target)
            .filter(|source| (from..=to).contains(source)))
    }

    fn find_all(
        &mut self,
        from: u64,
        to: u64,
        targets: &[IndexSet],
        collector: &mut dyn Collector,
        interrupt: &Interrupt,
    ) -> Result<(), Error> {
        let Some(window) = Span::checked(from, to) else {
            return Ok(());
        };
        let mut window_sets = Vec::with_capacity(targets.len());
        for set in targets {
            match set {
                IndexSet::Span(span) => {
                    if let Some(span) = span.intersect(&window) {
                        window_sets.push(IndexSet::Span(span));
                    }
                }
                IndexSet::Values(values) => window_sets.push(IndexSet::Values(
                    values
                        .iter()
                        .copied()
                        .filter(|value| window.contains(*value))
                        .collect(),
                )),
            }
        }
        self.lookup_all(&window_sets, collector, interrupt)
    }
}
