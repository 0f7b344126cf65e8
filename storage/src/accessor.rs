//! Scoped access to the block cache of a stored mapping.
//!
//! Every reader and writer of a stored mapping owns an [Accessor]. Blocks and the header can only
//! be reached between [Accessor::begin] and [Accessor::end]: a read scope shares the mapping with
//! other read scopes, a write scope excludes every other scope. Ending a write scope flushes the
//! cache.

use crate::{
    cache::{self, Block, BlockCache},
    header::Header,
};
use async_lock::{RwLock, RwLockReadGuardArc, RwLockWriteGuardArc};
use layermap_runtime::Blob;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur when accessing a stored mapping.
#[derive(Debug, Error)]
pub enum Error {
    #[error("scope already open")]
    ScopeOpen,
    #[error("scope closed")]
    ScopeClosed,
    #[error("scope is read-only")]
    ReadOnly,
    #[error("cache error: {0}")]
    Cache(#[from] cache::Error),
}

/// Access mode of a scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
}

/// State shared by every accessor of one stored mapping.
pub struct Shared<B: Blob> {
    scope: Arc<RwLock<()>>,
    cache: Mutex<BlockCache<B>>,
}

impl<B: Blob> Shared<B> {
    pub fn new(cache: BlockCache<B>) -> Self {
        Self {
            scope: Arc::new(RwLock::new(())),
            cache: Mutex::new(cache),
        }
    }

    /// Run `f` against the cache inside an exclusive scope.
    pub fn exclusive<T>(&self, f: impl FnOnce(&mut BlockCache<B>) -> T) -> T {
        let _scope = self.scope.write_arc_blocking();
        let mut cache = self.cache.lock().unwrap();
        f(&mut cache)
    }

    /// Run `f` against the cache without opening a scope.
    ///
    /// Only waits for an in-flight cache operation, never for an open scope.
    pub fn inspect<T>(&self, f: impl FnOnce(&BlockCache<B>) -> T) -> T {
        let cache = self.cache.lock().unwrap();
        f(&cache)
    }
}

enum Guard {
    Read(#[allow(dead_code)] RwLockReadGuardArc<()>),
    Write(#[allow(dead_code)] RwLockWriteGuardArc<()>),
}

/// A scoped handle to a [Shared] cache.
pub struct Accessor<B: Blob> {
    shared: Arc<Shared<B>>,
    mode: Mode,
    guard: Option<Guard>,
}

impl<B: Blob> Accessor<B> {
    pub fn new(shared: Arc<Shared<B>>, mode: Mode) -> Self {
        Self {
            shared,
            mode,
            guard: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_open(&self) -> bool {
        self.guard.is_some()
    }

    /// Open a scope, blocking until the lock for the accessor's mode is available.
    pub fn begin(&mut self) -> Result<(), Error> {
        if self.guard.is_some() {
            return Err(Error::ScopeOpen);
        }
        let guard = match self.mode {
            Mode::Read => Guard::Read(self.shared.scope.read_arc_blocking()),
            Mode::Write => Guard::Write(self.shared.scope.write_arc_blocking()),
        };
        self.guard = Some(guard);
        debug!(mode = ?self.mode, "opened scope");
        Ok(())
    }

    /// Close the scope, flushing the cache first if it was a write scope.
    ///
    /// The lock is released even if the flush fails.
    pub fn end(&mut self) -> Result<(), Error> {
        let Some(guard) = self.guard.take() else {
            return Err(Error::ScopeClosed);
        };
        let result = match guard {
            Guard::Read(_) => Ok(()),
            Guard::Write(_) => self.shared.cache.lock().unwrap().flush(),
        };
        drop(guard);
        debug!(mode = ?self.mode, "closed scope");
        result.map_err(Error::Cache)
    }

    /// Consume the accessor, ending its scope if one is still open.
    pub fn close(mut self) -> Result<(), Error> {
        if self.guard.is_none() {
            return Ok(());
        }
        self.end()
    }

    /// Lock the cache for the current scope.
    pub fn cache(&self) -> Result<CacheGuard<'_, B>, Error> {
        if self.guard.is_none() {
            return Err(Error::ScopeClosed);
        }
        Ok(CacheGuard {
            cache: self.shared.cache.lock().unwrap(),
            mode: self.mode,
        })
    }
}

/// The cache of an open scope, restricted to what the scope's mode allows.
pub struct CacheGuard<'a, B: Blob> {
    cache: MutexGuard<'a, BlockCache<B>>,
    mode: Mode,
}

impl<B: Blob> CacheGuard<'_, B> {
    pub fn header(&self) -> &Header {
        self.cache.header()
    }

    pub fn header_mut(&mut self) -> Result<&mut Header, Error> {
        if self.mode != Mode::Write {
            return Err(Error::ReadOnly);
        }
        Ok(self.cache.header_mut())
    }

    /// Fetch block `id`. Missing blocks are created only in a write scope.
    pub fn get_block(&mut self, id: u64) -> Result<Option<&mut Block>, Error> {
        let create = self.mode == Mode::Write;
        Ok(self.cache.get_block(id, create)?)
    }

    /// Fetch block `id` without creating it.
    pub fn peek_block(&mut self, id: u64) -> Result<Option<&Block>, Error> {
        Ok(self.cache.get_block(id, false)?.map(|block| &*block))
    }

    pub fn lock_block(&mut self, id: u64) -> Result<(), Error> {
        if self.mode != Mode::Write {
            return Err(Error::ReadOnly);
        }
        self.cache.lock_block(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::{Config, Converter, Shape},
        codec::Width,
    };
    use layermap_runtime::{memory, Storage as _};
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        thread,
        time::Duration,
    };

    fn shared(storage: &memory::Storage) -> Arc<Shared<memory::Blob>> {
        let (blob, len) = storage.open("accessor", b"mapping").unwrap();
        let converter = Converter::new(Width::U8, Shape::Value, 4);
        let cache = BlockCache::init(blob, len, converter, &Config::default()).unwrap();
        Arc::new(Shared::new(cache))
    }

    #[test]
    fn test_scope_required() {
        let shared = shared(&memory::Storage::default());
        let mut accessor = Accessor::new(shared, Mode::Read);
        assert!(matches!(accessor.cache(), Err(Error::ScopeClosed)));
        assert!(matches!(accessor.end(), Err(Error::ScopeClosed)));

        accessor.begin().unwrap();
        assert!(matches!(accessor.begin(), Err(Error::ScopeOpen)));
        assert!(accessor.cache().is_ok());
        accessor.end().unwrap();
        assert!(!accessor.is_open());
        assert!(matches!(accessor.cache(), Err(Error::ScopeClosed)));

        accessor.begin().unwrap();
        accessor.close().unwrap();
    }

    #[test]
    fn test_read_scope_is_read_only() {
        let shared = shared(&memory::Storage::default());
        let mut accessor = Accessor::new(shared, Mode::Read);
        accessor.begin().unwrap();
        {
            let mut cache = accessor.cache().unwrap();
            assert!(matches!(cache.header_mut(), Err(Error::ReadOnly)));
            assert!(matches!(cache.lock_block(0), Err(Error::ReadOnly)));
            assert!(cache.get_block(0).unwrap().is_none());
        }
        accessor.end().unwrap();
    }

    #[test]
    fn test_write_scope_flushes_on_end() {
        let storage = memory::Storage::default();
        let mut writer = Accessor::new(shared(&storage), Mode::Write);
        writer.begin().unwrap();
        {
            let mut cache = writer.cache().unwrap();
            let block = cache.get_block(0).unwrap().unwrap();
            Width::U8.write(block.data_mut(), 1, Some(5)).unwrap();
            cache.lock_block(0).unwrap();
            cache.header_mut().unwrap().grow_size(1);
        }
        writer.end().unwrap();

        // A fresh cache over the same storage sees the flushed data
        let mut reader = Accessor::new(shared(&storage), Mode::Read);
        reader.begin().unwrap();
        {
            let mut cache = reader.cache().unwrap();
            assert_eq!(cache.header().size(), 1);
            let block = cache.peek_block(0).unwrap().unwrap();
            assert_eq!(Width::U8.read(block.data(), 1), Some(5));
        }
        reader.end().unwrap();
    }

    #[test]
    fn test_readers_share_writer_excludes() {
        let shared = shared(&memory::Storage::default());
        let mut first = Accessor::new(shared.clone(), Mode::Read);
        let mut second = Accessor::new(shared.clone(), Mode::Read);
        first.begin().unwrap();
        second.begin().unwrap();

        let acquired = Arc::new(AtomicBool::new(false));
        let handle = thread::spawn({
            let shared = shared.clone();
            let acquired = acquired.clone();
            move || {
                let mut writer = Accessor::new(shared, Mode::Write);
                writer.begin().unwrap();
                acquired.store(true, Ordering::SeqCst);
                writer.end().unwrap();
            }
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));
        first.end().unwrap();
        second.end().unwrap();
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }
}
