//! Persist bytes in named blobs grouped into partitions.
//!
//! A [Storage] hands out [Blob]s: fixed-address byte resources that can be read and written at
//! arbitrary offsets, resized, and synced. Two backends are provided: [memory::Storage] keeps
//! everything in process memory (useful for tests and ephemeral indices) and [file::Storage]
//! maps each blob to a file under a configured directory.
//!
//! All operations are synchronous and block the calling thread until complete.
//!
//! # Status
//!
//! `layermap-runtime` is **ALPHA** software and is not yet recommended for production use.
//! Developers should expect breaking changes and occasional instability.

use std::io::Error as IoError;
use thiserror::Error;

mod storage;
pub use storage::{file, memory};
mod utils;
pub use utils::{from_hex, hex};

/// Errors that can occur when interacting with the runtime.
#[derive(Error, Debug)]
pub enum Error {
    #[error("read failed")]
    ReadFailed,
    #[error("write failed")]
    WriteFailed,
    #[error("partition name invalid, must only contain alphanumeric, dash ('-'), or underscore ('_') characters: {0}")]
    PartitionNameInvalid(String),
    #[error("partition creation failed: {0}")]
    PartitionCreationFailed(String),
    #[error("partition missing: {0}")]
    PartitionMissing(String),
    #[error("partition corrupt: {0}")]
    PartitionCorrupt(String),
    #[error("blob open failed: {0}/{1} error: {2}")]
    BlobOpenFailed(String, String, IoError),
    #[error("blob missing: {0}/{1}")]
    BlobMissing(String, String),
    #[error("blob resize failed: {0}/{1} error: {2}")]
    BlobResizeFailed(String, String, IoError),
    #[error("blob sync failed: {0}/{1} error: {2}")]
    BlobSyncFailed(String, String, IoError),
    #[error("blob insufficient length")]
    BlobInsufficientLength,
    #[error("offset overflow")]
    OffsetOverflow,
    #[error("io error: {0}")]
    Io(#[from] IoError),
}

/// Interface to interact with storage.
///
/// To support storage implementations that enable concurrent reads and
/// writes, blobs are responsible for maintaining synchronization.
///
/// Storage can be backed by a local filesystem, process memory, or any other
/// byte-addressable medium.
pub trait Storage: Clone + Send + Sync + 'static {
    /// The readable/writeable storage buffer that can be opened by this Storage.
    type Blob: Blob;

    /// Open an existing blob in a given partition or create a new one, returning
    /// the blob and its length.
    ///
    /// Multiple instances of the same blob can be opened concurrently, however,
    /// writing to the same blob concurrently may lead to undefined behavior.
    fn open(&self, partition: &str, name: &[u8]) -> Result<(Self::Blob, u64), Error>;

    /// Remove a blob from a given partition.
    ///
    /// If no `name` is provided, the entire partition is removed.
    fn remove(&self, partition: &str, name: Option<&[u8]>) -> Result<(), Error>;

    /// Return all blobs in a given partition.
    fn scan(&self, partition: &str) -> Result<Vec<Vec<u8>>, Error>;
}

/// Interface to read and write to a blob.
///
/// To support blob implementations that enable concurrent reads and
/// writes, blobs are responsible for maintaining synchronization.
///
/// Cloning a blob is similar to wrapping a single file descriptor in
/// a lock whereas opening a new blob (of the same name) is similar to
/// opening a new file descriptor. If multiple blobs are opened with the same
/// name, they are not expected to coordinate access to underlying storage
/// and writing to both is undefined behavior.
pub trait Blob: Clone + Send + Sync + 'static {
    /// Fill `buf` with the bytes starting at `offset`.
    ///
    /// `read_at` does not return the number of bytes read because it
    /// only returns once the entire buffer has been filled.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<(), Error>;

    /// Write `buf` to the blob at the given offset.
    fn write_at(&self, buf: &[u8], offset: u64) -> Result<(), Error>;

    /// Resize the blob to the given length.
    ///
    /// If the length is greater than the current length, the blob is extended with zeros.
    /// If the length is less than the current length, the blob is truncated.
    fn resize(&self, len: u64) -> Result<(), Error>;

    /// Ensure all pending data is durably persisted.
    fn sync(&self) -> Result<(), Error>;
}
