//! Persist and query indexed mappings between the index spaces of two data layers.
//!
//! A [mapping::Mapping] relates the integer index space of a source layer to that of a target
//! layer. Stored mappings keep their data in fixed-size blocks of a single
//! [layermap_runtime::Blob], cached in memory by a bounded [cache::BlockCache] and reached only
//! through a scoped [accessor::Accessor]. Stateless mappings ([mapping::Identity],
//! [mapping::Function]) compute their results directly. [factory::Factory] chooses and builds the
//! right implementation from declarative relation and coverage metadata.
//!
//! # Status
//!
//! `layermap-storage` is **ALPHA** software and is not yet recommended for production use.
//! Developers should expect breaking changes and occasional instability.

pub mod accessor;
pub mod cache;
pub mod codec;
pub mod factory;
pub mod header;
pub mod index;
pub mod interrupt;
pub mod mapping;
