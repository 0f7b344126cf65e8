use super::{ensure_sorted, Coverage, Error, Reader, Relation};
use crate::{
    index::{Collector, IndexSet, Span},
    interrupt::Interrupt,
};
use std::sync::Arc;

/// Computes the target of a single index.
pub type MapFn = Arc<dyn Fn(u64) -> u64 + Send + Sync>;

/// Computes the targets of an entire index set.
pub type BatchFn = Arc<dyn Fn(&IndexSet, &mut dyn Collector) + Send + Sync>;

/// A mapping computed by a function.
#[derive(Clone)]
pub struct Function {
    id: String,
    relation: Relation,
    coverage: Coverage,
    map: MapFn,
    batch: Option<BatchFn>,
    inverse: Option<MapFn>,
}

impl Function {
    pub fn new(
        id: impl Into<String>,
        relation: Relation,
        coverage: Coverage,
        map: impl Fn(u64) -> u64 + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            relation,
            coverage,
            map: Arc::new(map),
            batch: None,
            inverse: None,
        }
    }

    /// Compute whole index sets with `batch` instead of one index at a time.
    pub fn with_batch(
        mut self,
        batch: impl Fn(&IndexSet, &mut dyn Collector) + Send + Sync + 'static,
    ) -> Self {
        self.batch = Some(Arc::new(batch));
        self
    }

    /// Enable reverse lookups with `inverse`, which maps a target back to its source.
    pub fn with_inverse(mut self, inverse: impl Fn(u64) -> u64 + Send + Sync + 'static) -> Self {
        self.inverse = Some(Arc::new(inverse));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn relation(&self) -> Relation {
        self.relation
    }

    pub fn coverage(&self) -> Coverage {
        self.coverage
    }

    pub fn reader(&self) -> FunctionReader {
        FunctionReader {
            coverage: self.coverage,
            map: self.map.clone(),
            batch: self.batch.clone(),
            inverse: self.inverse.clone(),
        }
    }
}

/// [Reader] of a [Function] mapping.
pub struct FunctionReader {
    coverage: Coverage,
    map: MapFn,
    batch: Option<BatchFn>,
    inverse: Option<MapFn>,
}

impl Reader for FunctionReader {
    fn begin(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn end(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn coverage(&self) -> Coverage {
        self.coverage
    }

    fn lookup(&mut self, source: u64, collector: &mut dyn Collector) -> Result<bool, Error> {
        collector.add((self.map)(source));
        Ok(true)
    }

    fn lookup_all(
        &mut self,
        sources: &[IndexSet],
        collector: &mut dyn Collector,
        interrupt: &Interrupt,
    ) -> Result<(), Error> {
        ensure_sorted(sources, "sources")?;
        let collapse = self.coverage.total && self.coverage.monotonic;
        for set in sources {
            interrupt.check()?;
            if let Some(batch) = &self.batch {
                batch(set, collector);
                continue;
            }
            if collapse && set.is_continuous() {
                let (Some(first), Some(last)) = (set.first(), set.last()) else {
                    continue;
                };
                if let Some(span) = Span::checked((self.map)(first), (self.map)(last)) {
                    collector.add_span(span);
                    continue;
                }
            }
            for source in set.iter() {
                collector.add((self.map)(source));
            }
        }
        Ok(())
    }

    fn indices_count(&mut self, _: u64) -> Result<u64, Error> {
        Ok(1)
    }

    fn begin_index(&mut self, source: u64) -> Result<Option<u64>, Error> {
        Ok(Some((self.map)(source)))
    }

    fn end_index(&mut self, source: u64) -> Result<Option<u64>, Error> {
        Ok(Some((self.map)(source)))
    }

    fn find(
        &mut self,
        from: u64,
        to: u64,
        target: u64,
        _: &Interrupt,
    ) -> Result<Option<u64>, Error> {
        let Some(inverse) = &self.inverse else {
            return Err(Error::Unsupported("no reverse lookup provided"));
        };
        let source = inverse(target);
        Ok((from..=to).contains(&source).then_some(source))
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
        for set in targets {
            interrupt.check()?;
            for target in set.iter() {
                if let Some(source) = self.find(from, to, target, interrupt)? {
                    collector.add(source);
                }
            }
        }
        Ok(())
    }
}
