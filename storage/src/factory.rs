//! Build mappings from declarative relation and coverage metadata.
//!
//! A [Factory] chooses the implementation that fits a [Descriptor]:
//!
//! | Relation | Condition | Mapping |
//! |---|---|---|
//! | any but many-to-many | a function is supplied | [Function] |
//! | one-to-one | total, monotonic, and equal layer sizes | [Identity] |
//! | one-to-one | otherwise | [OneToOne] |
//! | one-to-many | | [SpanOneToMany] |
//! | many-to-one | the inverse is registered | [SpanManyToOne] |
//! | many-to-many | | unsupported |
//!
//! Stored mappings keep their data in a blob named after the mapping id inside the configured
//! partition. Every mapping built is registered under its id, which is how a many-to-one mapping
//! finds its inverse.
//!
//! # Example
//!
//! ```rust
//! use layermap_runtime::memory;
//! use layermap_storage::{
//!     factory::{Descriptor, Factory, Options},
//!     mapping::{Coverage, Relation},
//! };
//!
//! let mut factory = Factory::new(Options {
//!     storage: Some(memory::Storage::default()),
//!     ..Options::default()
//! })
//! .unwrap();
//!
//! // Tokens to sentences, then sentences back to tokens through the inverse
//! let coverage = Coverage { total: true, monotonic: true };
//! let sentences = factory
//!     .build(Descriptor::new("sentences", Relation::OneToMany, coverage, 10, 100))
//!     .unwrap();
//! let tokens = factory
//!     .build(
//!         Descriptor::new("tokens", Relation::ManyToOne, coverage, 100, 10)
//!             .with_inverse("sentences"),
//!     )
//!     .unwrap();
//! assert!(sentences.is_stored() && tokens.is_stored());
//! assert!(factory.get("tokens").is_some());
//! ```

use crate::{
    cache,
    codec::Width,
    mapping::{
        Config, Coverage, Error, Function, Identity, Mapping, OneToOne, Relation, SpanManyToOne,
        SpanOneToMany, DEFAULT_BLOCK_POWER, DEFAULT_GROUP_POWER,
    },
};
use layermap_runtime::Storage;
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

/// Settings shared by every mapping a [Factory] builds.
#[derive(Clone)]
pub struct Options<S: Storage> {
    /// Where stored mappings keep their blobs.
    pub storage: Option<S>,

    /// Partition holding the blobs.
    pub partition: String,

    /// Block cache configuration of each stored mapping.
    pub cache: cache::Config,

    /// `log2` of the number of entries per block.
    pub block_power: u32,

    /// `log2` of the number of sources per many-to-one group.
    pub group_power: u32,

    /// Value width, narrowest fitting the largest index of either layer when unset.
    pub width: Option<Width>,
}

impl<S: Storage> Default for Options<S> {
    fn default() -> Self {
        Self {
            storage: None,
            partition: "mappings".into(),
            cache: cache::Config::default(),
            block_power: DEFAULT_BLOCK_POWER,
            group_power: DEFAULT_GROUP_POWER,
            width: None,
        }
    }
}

/// Metadata of a mapping to build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Descriptor {
    pub id: String,
    pub relation: Relation,
    pub coverage: Coverage,

    /// Number of indices in the source layer.
    pub source_size: u64,

    /// Number of indices in the target layer.
    pub target_size: u64,

    /// Id of the inverse mapping (many-to-one only).
    pub inverse: Option<String>,
}

impl Descriptor {
    pub fn new(
        id: impl Into<String>,
        relation: Relation,
        coverage: Coverage,
        source_size: u64,
        target_size: u64,
    ) -> Self {
        Self {
            id: id.into(),
            relation,
            coverage,
            source_size,
            target_size,
            inverse: None,
        }
    }

    pub fn with_inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }
}

/// Builds and registers mappings.
pub struct Factory<S: Storage> {
    options: Options<S>,
    registry: HashMap<String, Arc<Mapping<S::Blob>>>,
}

impl<S: Storage> Factory<S> {
    pub fn new(options: Options<S>) -> Result<Self, Error> {
        let factory = Self {
            options,
            registry: HashMap::new(),
        };
        factory.config(String::new(), Coverage::default(), Width::U8).validate()?;
        Ok(factory)
    }

    /// Mapping registered under `id`.
    pub fn get(&self, id: &str) -> Option<Arc<Mapping<S::Blob>>> {
        self.registry.get(id).cloned()
    }

    /// Ids of every registered mapping.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.registry.keys().map(String::as_str)
    }

    fn config(&self, id: String, coverage: Coverage, width: Width) -> Config {
        Config {
            id,
            coverage,
            width,
            block_power: self.options.block_power,
            group_power: self.options.group_power,
            cache: self.options.cache,
        }
    }

    fn register(&mut self, mapping: Mapping<S::Blob>) -> Result<Arc<Mapping<S::Blob>>, Error> {
        let id = mapping.id().to_string();
        if self.registry.contains_key(&id) {
            return Err(Error::DuplicateId(id));
        }
        let mapping = Arc::new(mapping);
        self.registry.insert(id, mapping.clone());
        Ok(mapping)
    }

    /// Register a function-backed mapping.
    pub fn build_function(&mut self, function: Function) -> Result<Arc<Mapping<S::Blob>>, Error> {
        if self.registry.contains_key(function.id()) {
            return Err(Error::DuplicateId(function.id().into()));
        }
        if function.relation() == Relation::ManyToMany {
            return Err(Error::NotImplemented("many-to-many mappings"));
        }
        debug!(id = function.id(), "built function mapping");
        self.register(Mapping::Function(function))
    }

    /// Build and register the mapping described by `descriptor`.
    pub fn build(&mut self, descriptor: Descriptor) -> Result<Arc<Mapping<S::Blob>>, Error> {
        if self.registry.contains_key(&descriptor.id) {
            return Err(Error::DuplicateId(descriptor.id));
        }
        let Descriptor {
            id,
            relation,
            coverage,
            source_size,
            target_size,
            inverse,
        } = descriptor;

        let mapping = match relation {
            Relation::OneToOne
                if coverage.total && coverage.monotonic && source_size == target_size =>
            {
                Mapping::Identity(Identity::new(id, source_size))
            }
            Relation::OneToOne => {
                let (blob, len, cfg) = self.open(id, coverage, source_size, target_size)?;
                Mapping::OneToOne(OneToOne::init(blob, len, cfg)?)
            }
            Relation::OneToMany => {
                let (blob, len, cfg) = self.open(id, coverage, source_size, target_size)?;
                Mapping::SpanOneToMany(SpanOneToMany::init(blob, len, cfg)?)
            }
            Relation::ManyToOne => {
                let inverse_id = inverse.ok_or_else(|| Error::MissingInverse(id.clone()))?;
                let inverse = self
                    .get(&inverse_id)
                    .ok_or(Error::MissingInverse(inverse_id))?;
                let (blob, len, cfg) = self.open(id, coverage, source_size, target_size)?;
                Mapping::SpanManyToOne(SpanManyToOne::init(blob, len, cfg, &inverse)?)
            }
            Relation::ManyToMany => return Err(Error::NotImplemented("many-to-many mappings")),
        };
        debug!(
            id = mapping.id(),
            relation = ?mapping.relation(),
            stored = mapping.is_stored(),
            "built mapping"
        );
        self.register(mapping)
    }

    /// Open the blob of a stored mapping.
    fn open(
        &self,
        id: String,
        coverage: Coverage,
        source_size: u64,
        target_size: u64,
    ) -> Result<(S::Blob, u64, Config), Error> {
        let storage = self
            .options
            .storage
            .as_ref()
            .ok_or_else(|| Error::MissingResource(id.clone()))?;
        let width = self
            .options
            .width
            .unwrap_or_else(|| Width::for_value(source_size.max(target_size).saturating_sub(1)));
        let (blob, len) = storage.open(&self.options.partition, id.as_bytes())?;
        Ok((blob, len, self.config(id, coverage, width)))
    }
}
