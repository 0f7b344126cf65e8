//! Directional relations between the index spaces of two layers.
//!
//! A [Mapping] relates every index of a source layer to zero or more indices of a target layer.
//! It is tagged with a [Relation] and a [Coverage] and is queried through a [Reader]. Stored
//! mappings also hand out a [Writer] and keep their data in a blob behind a
//! [crate::cache::BlockCache].
//!
//! | Variant | Stored | Per entry | Reverse search |
//! |---|---|---|---|
//! | [Identity] | no | - | yes |
//! | [Function] | no | - | with an inverse function |
//! | [OneToOne] | yes | one target per source | yes |
//! | [SpanOneToMany] | yes | one target span per source | yes |
//! | [SpanManyToOne] | yes | one target bound per group of sources | no |
//!
//! Readers and writers must open a scope with `begin` before use and close it with `end`. A
//! write scope is exclusive and flushes on `end`.
//!
//! # Example
//!
//! ```rust
//! use layermap_runtime::{memory, Storage};
//! use layermap_storage::{
//!     codec::Width,
//!     index::IndexSetBuilder,
//!     mapping::{Config, Coverage, Mapping, OneToOne},
//! };
//!
//! let storage = memory::Storage::default();
//! let (blob, len) = storage.open("mappings", b"tokens").unwrap();
//! let cfg = Config::new("tokens", Coverage { total: true, monotonic: true }, Width::U16);
//! let mapping = Mapping::OneToOne(OneToOne::init(blob, len, cfg).unwrap());
//!
//! let mut writer = mapping.new_writer().unwrap();
//! writer.begin().unwrap();
//! writer.map(0, 4).unwrap();
//! writer.map(1, 7).unwrap();
//! writer.end().unwrap();
//!
//! let mut reader = mapping.new_reader().unwrap();
//! reader.begin().unwrap();
//! let mut targets = Vec::new();
//! assert!(reader.lookup(1, &mut targets).unwrap());
//! assert_eq!(targets, [7]);
//! assert_eq!(reader.begin_index(0).unwrap(), Some(4));
//! reader.end().unwrap();
//! ```

use crate::{
    accessor, cache,
    codec::{self, Width},
    index::{self, Collector, IndexSet, IndexSetBuilder, Span},
    interrupt::{Interrupt, Interrupted},
};
use layermap_runtime::Blob;
use prometheus_client::registry::Registry;
use thiserror::Error;

mod function;
pub use function::{BatchFn, Function, MapFn};
mod identity;
pub use identity::Identity;
mod many_to_one;
pub use many_to_one::SpanManyToOne;
mod one_to_many;
pub use one_to_many::SpanOneToMany;
mod one_to_one;
pub use one_to_one::OneToOne;
mod stored;

/// Default `log2` of the number of entries per block.
pub const DEFAULT_BLOCK_POWER: u32 = 14;

/// Default `log2` of the number of sources per many-to-one group.
pub const DEFAULT_GROUP_POWER: u32 = 8;

/// Largest supported block or group power.
pub const MAX_POWER: u32 = 30;

/// Errors that can occur when interacting with a mapping.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("codec error: {0}")]
    Codec(#[from] codec::Error),
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("missing resource for mapping: {0}")]
    MissingResource(String),
    #[error("missing inverse mapping: {0}")]
    MissingInverse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("inverse mapping {0} has relation {1:?}, expected one-to-many")]
    InverseRelation(String, Relation),
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
    #[error("duplicate mapping id: {0}")]
    DuplicateId(String),
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
    #[error("accessor error: {0}")]
    Accessor(#[from] accessor::Error),
    #[error("cache error: {0}")]
    Cache(#[from] cache::Error),
    #[error("runtime error: {0}")]
    Runtime(#[from] layermap_runtime::Error),
}

/// Cardinality of a mapping from the source side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Relation {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl Relation {
    /// The relation seen from the target side.
    pub fn inverse(self) -> Self {
        match self {
            Self::OneToMany => Self::ManyToOne,
            Self::ManyToOne => Self::OneToMany,
            other => other,
        }
    }
}

/// Structural guarantees of a mapping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Coverage {
    /// Every source index has an image.
    pub total: bool,
    /// Source order and target order co-vary.
    pub monotonic: bool,
}

/// Configuration of a stored mapping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Identifier of the mapping (also the name of its blob when built by a factory).
    pub id: String,

    pub coverage: Coverage,

    /// Width of every stored value.
    pub width: Width,

    /// `log2` of the number of entries per block.
    pub block_power: u32,

    /// `log2` of the number of sources per group (many-to-one only).
    pub group_power: u32,

    /// Block cache configuration.
    pub cache: cache::Config,
}

impl Config {
    /// A configuration with default block, group, and cache settings.
    pub fn new(id: impl Into<String>, coverage: Coverage, width: Width) -> Self {
        Self {
            id: id.into(),
            coverage,
            width,
            block_power: DEFAULT_BLOCK_POWER,
            group_power: DEFAULT_GROUP_POWER,
            cache: cache::Config::default(),
        }
    }

    /// Check the block and group powers.
    pub fn validate(&self) -> Result<(), Error> {
        if !(1..=MAX_POWER).contains(&self.block_power) {
            return Err(Error::InvalidConfig(format!(
                "block power {} not in 1..={MAX_POWER}",
                self.block_power
            )));
        }
        if self.group_power > MAX_POWER {
            return Err(Error::InvalidConfig(format!(
                "group power {} exceeds {MAX_POWER}",
                self.group_power
            )));
        }
        Ok(())
    }
}

/// Fail with [Error::InvalidInput] unless `sets` is sorted as a whole.
pub(crate) fn ensure_sorted(sets: &[IndexSet], what: &str) -> Result<(), Error> {
    if !index::is_sorted(sets) {
        return Err(Error::InvalidInput(format!("{what} must be sorted")));
    }
    Ok(())
}

/// Read access to a mapping.
pub trait Reader: Send {
    /// Open a read scope.
    fn begin(&mut self) -> Result<(), Error>;

    /// Close the read scope.
    fn end(&mut self) -> Result<(), Error>;

    fn coverage(&self) -> Coverage;

    /// Add every target of `source` to `collector`, returning whether any was found.
    fn lookup(&mut self, source: u64, collector: &mut dyn Collector) -> Result<bool, Error>;

    /// Add the targets of every index in the sorted `sources` to `collector`.
    fn lookup_all(
        &mut self,
        sources: &[IndexSet],
        collector: &mut dyn Collector,
        interrupt: &Interrupt,
    ) -> Result<(), Error>;

    /// Number of targets of `source`.
    fn indices_count(&mut self, source: u64) -> Result<u64, Error>;

    /// Smallest target of `source`.
    fn begin_index(&mut self, source: u64) -> Result<Option<u64>, Error>;

    /// Largest target of `source`.
    fn end_index(&mut self, source: u64) -> Result<Option<u64>, Error>;

    /// Smallest target of any index in the sorted `sources`.
    fn begin_index_all(&mut self, sources: &[IndexSet]) -> Result<Option<u64>, Error> {
        ensure_sorted(sources, "sources")?;
        if self.coverage().monotonic {
            for source in index::indices(sources) {
                if let Some(target) = self.begin_index(source)? {
                    return Ok(Some(target));
                }
            }
            return Ok(None);
        }
        let mut smallest: Option<u64> = None;
        for source in index::indices(sources) {
            if let Some(target) = self.begin_index(source)? {
                smallest = Some(smallest.map_or(target, |current| current.min(target)));
            }
        }
        Ok(smallest)
    }

    /// Largest target of any index in the sorted `sources`.
    fn end_index_all(&mut self, sources: &[IndexSet]) -> Result<Option<u64>, Error> {
        ensure_sorted(sources, "sources")?;
        if self.coverage().monotonic {
            for source in sources.iter().rev().flat_map(|set| set.iter().rev()) {
                if let Some(target) = self.end_index(source)? {
                    return Ok(Some(target));
                }
            }
            return Ok(None);
        }
        let mut largest: Option<u64> = None;
        for source in index::indices(sources) {
            if let Some(target) = self.end_index(source)? {
                largest = Some(largest.map_or(target, |current| current.max(target)));
            }
        }
        Ok(largest)
    }

    /// First source in `[from, to]` that maps to `target`.
    fn find(
        &mut self,
        from: u64,
        to: u64,
        target: u64,
        interrupt: &Interrupt,
    ) -> Result<Option<u64>, Error>;

    /// Add every source in `[from, to]` that maps to any of the sorted `targets` to `collector`.
    fn find_all(
        &mut self,
        from: u64,
        to: u64,
        targets: &[IndexSet],
        collector: &mut dyn Collector,
        interrupt: &Interrupt,
    ) -> Result<(), Error>;

    /// Targets of `source` as coalesced sets.
    fn lookup_sets(&mut self, source: u64) -> Result<Vec<IndexSet>, Error> {
        let mut builder = IndexSetBuilder::new();
        self.lookup(source, &mut builder)?;
        Ok(builder.finish())
    }
}

/// Write access to a stored mapping.
pub trait Writer: Send {
    /// Open an exclusive write scope.
    fn begin(&mut self) -> Result<(), Error>;

    /// Flush and close the write scope.
    fn end(&mut self) -> Result<(), Error>;

    /// Record that `source` maps to `target`.
    fn map(&mut self, source: u64, target: u64) -> Result<(), Error>;

    /// Record that the indices of `sources` map to the indices of `targets`.
    fn map_span(&mut self, sources: Span, targets: Span) -> Result<(), Error>;

    /// Record that the indices of the sorted `sources` map to the indices of the sorted
    /// `targets`.
    fn map_all(
        &mut self,
        sources: &[IndexSet],
        targets: &[IndexSet],
        interrupt: &Interrupt,
    ) -> Result<(), Error>;
}

/// A mapping between two layers.
pub enum Mapping<B: Blob> {
    Identity(Identity),
    Function(Function),
    OneToOne(OneToOne<B>),
    SpanOneToMany(SpanOneToMany<B>),
    SpanManyToOne(SpanManyToOne<B>),
}

impl<B: Blob> Mapping<B> {
    pub fn id(&self) -> &str {
        match self {
            Self::Identity(mapping) => mapping.id(),
            Self::Function(mapping) => mapping.id(),
            Self::OneToOne(mapping) => mapping.id(),
            Self::SpanOneToMany(mapping) => mapping.id(),
            Self::SpanManyToOne(mapping) => mapping.id(),
        }
    }

    pub fn relation(&self) -> Relation {
        match self {
            Self::Identity(_) | Self::OneToOne(_) => Relation::OneToOne,
            Self::Function(mapping) => mapping.relation(),
            Self::SpanOneToMany(_) => Relation::OneToMany,
            Self::SpanManyToOne(_) => Relation::ManyToOne,
        }
    }

    pub fn coverage(&self) -> Coverage {
        match self {
            Self::Identity(mapping) => mapping.coverage(),
            Self::Function(mapping) => mapping.coverage(),
            Self::OneToOne(mapping) => mapping.coverage(),
            Self::SpanOneToMany(mapping) => mapping.coverage(),
            Self::SpanManyToOne(mapping) => mapping.coverage(),
        }
    }

    /// Whether the mapping keeps its data in a blob.
    pub fn is_stored(&self) -> bool {
        !matches!(self, Self::Identity(_) | Self::Function(_))
    }

    pub fn new_reader(&self) -> Result<Box<dyn Reader>, Error> {
        match self {
            Self::Identity(mapping) => Ok(Box::new(mapping.reader())),
            Self::Function(mapping) => Ok(Box::new(mapping.reader())),
            Self::OneToOne(mapping) => Ok(Box::new(mapping.reader())),
            Self::SpanOneToMany(mapping) => Ok(Box::new(mapping.reader())),
            Self::SpanManyToOne(mapping) => Ok(Box::new(mapping.reader()?)),
        }
    }

    pub fn new_writer(&self) -> Result<Box<dyn Writer>, Error> {
        match self {
            Self::Identity(_) | Self::Function(_) => {
                Err(Error::Unsupported("writing to a stateless mapping"))
            }
            Self::OneToOne(mapping) => Ok(Box::new(mapping.writer())),
            Self::SpanOneToMany(mapping) => Ok(Box::new(mapping.writer())),
            Self::SpanManyToOne(mapping) => Ok(Box::new(mapping.writer())),
        }
    }

    /// Write back all pending changes, waiting for open scopes to close.
    pub fn flush(&self) -> Result<(), Error> {
        match self {
            Self::Identity(_) | Self::Function(_) => Ok(()),
            Self::OneToOne(mapping) => mapping.store().flush(),
            Self::SpanOneToMany(mapping) => mapping.store().flush(),
            Self::SpanManyToOne(mapping) => mapping.store().flush(),
        }
    }

    /// Delete every entry, waiting for open scopes to close.
    pub fn clear(&self) -> Result<(), Error> {
        match self {
            Self::Identity(_) | Self::Function(_) => {
                Err(Error::Unsupported("clearing a stateless mapping"))
            }
            Self::OneToOne(mapping) => mapping.store().clear(),
            Self::SpanOneToMany(mapping) => mapping.store().clear(),
            Self::SpanManyToOne(mapping) => mapping.store().clear(),
        }
    }

    /// Number of stored entries (groups for many-to-one), `None` for stateless mappings.
    pub fn size(&self) -> Option<u64> {
        match self {
            Self::Identity(_) | Self::Function(_) => None,
            Self::OneToOne(mapping) => Some(mapping.store().header().size()),
            Self::SpanOneToMany(mapping) => Some(mapping.store().header().size()),
            Self::SpanManyToOne(mapping) => Some(mapping.store().header().size()),
        }
    }

    /// Register the block cache metrics of a stored mapping under its id.
    pub fn register(&self, registry: &mut Registry) {
        let sub = registry.sub_registry_with_prefix(self.id());
        match self {
            Self::Identity(_) | Self::Function(_) => {}
            Self::OneToOne(mapping) => mapping.store().register(sub),
            Self::SpanOneToMany(mapping) => mapping.store().register(sub),
            Self::SpanManyToOne(mapping) => mapping.store().register(sub),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use layermap_runtime::{memory, Storage as _};

    /// Open a stored mapping configuration over a fresh blob of `storage`.
    pub(crate) fn open(storage: &memory::Storage, id: &str) -> (memory::Blob, u64) {
        storage.open("mappings", id.as_bytes()).unwrap()
    }

    /// A small-block configuration so tests cross block boundaries.
    pub(crate) fn config(id: &str, monotonic: bool, width: Width) -> Config {
        let mut cfg = Config::new(
            id,
            Coverage {
                total: false,
                monotonic,
            },
            width,
        );
        cfg.block_power = 2;
        cfg.group_power = 1;
        cfg
    }

    #[test]
    fn test_config_validation() {
        let mut cfg = Config::new("m", Coverage::default(), Width::U8);
        assert!(cfg.validate().is_ok());
        cfg.block_power = 0;
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
        cfg.block_power = MAX_POWER + 1;
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
        cfg.block_power = MAX_POWER;
        cfg.group_power = MAX_POWER + 1;
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_relation_inverse() {
        assert_eq!(Relation::OneToMany.inverse(), Relation::ManyToOne);
        assert_eq!(Relation::ManyToOne.inverse(), Relation::OneToMany);
        assert_eq!(Relation::OneToOne.inverse(), Relation::OneToOne);
    }

    #[test]
    fn test_stateless_writer_unsupported() {
        let mapping: Mapping<memory::Blob> = Mapping::Identity(Identity::new("id", 10));
        assert!(matches!(mapping.new_writer(), Err(Error::Unsupported(_))));
        assert!(matches!(mapping.clear(), Err(Error::Unsupported(_))));
        assert!(mapping.flush().is_ok());
        assert_eq!(mapping.size(), None);
        assert!(!mapping.is_stored());
    }

    #[test]
    fn test_size_during_write_scope() {
        let storage = memory::Storage::default();
        let (blob, len) = open(&storage, "lemma");
        let mapping = Mapping::OneToOne(
            OneToOne::init(blob, len, config("lemma", true, Width::U8)).unwrap(),
        );

        let mut writer = mapping.new_writer().unwrap();
        writer.begin().unwrap();
        writer.map(0, 1).unwrap();
        assert_eq!(mapping.size(), Some(1));
        let mut registry = Registry::default();
        mapping.register(&mut registry);
        writer.map(1, 2).unwrap();
        assert_eq!(mapping.size(), Some(2));
        writer.end().unwrap();
    }

    #[test]
    fn test_metrics_registered_under_id() {
        let storage = memory::Storage::default();
        let (blob, len) = open(&storage, "lemma");
        let mapping = Mapping::OneToOne(
            OneToOne::init(blob, len, config("lemma", true, Width::U8)).unwrap(),
        );
        let mut registry = Registry::default();
        mapping.register(&mut registry);

        let mut writer = mapping.new_writer().unwrap();
        writer.begin().unwrap();
        writer.map(0, 1).unwrap();
        writer.end().unwrap();
        assert_eq!(mapping.size(), Some(1));

        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &registry).unwrap();
        assert!(buffer.contains("lemma_misses_total 1"));
        assert!(buffer.contains("lemma_flushes_total 1"));
    }
}
