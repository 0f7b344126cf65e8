use crate::{from_hex, hex, Error};
use std::{
    fs::{self, File, OpenOptions},
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tracing::debug;

/// Configuration for [Storage].
#[derive(Clone)]
pub struct Config {
    /// Directory under which each partition is created as a subdirectory.
    pub storage_directory: PathBuf,
}

impl Config {
    pub fn new(storage_directory: PathBuf) -> Self {
        Self { storage_directory }
    }
}

/// Storage backed by the local filesystem: one directory per partition and one file per blob
/// (named by the hex encoding of the blob name).
#[derive(Clone)]
pub struct Storage {
    lock: Arc<Mutex<()>>,
    cfg: Config,
}

impl Storage {
    pub fn new(cfg: Config) -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            cfg,
        }
    }

    fn partition_dir(&self, partition: &str) -> Result<PathBuf, Error> {
        super::validate_partition_name(partition)?;
        Ok(self.cfg.storage_directory.join(partition))
    }
}

/// A blob stored as a single file.
#[derive(Clone)]
pub struct Blob {
    partition: String,
    name: Vec<u8>,
    file: Arc<File>,
}

impl crate::Storage for Storage {
    type Blob = Blob;

    fn open(&self, partition: &str, name: &[u8]) -> Result<(Blob, u64), Error> {
        let dir = self.partition_dir(partition)?;
        let _guard = self.lock.lock().unwrap();
        fs::create_dir_all(&dir).map_err(|_| Error::PartitionCreationFailed(partition.into()))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(hex(name)))
            .map_err(|e| Error::BlobOpenFailed(partition.into(), hex(name), e))?;
        let len = file.metadata().map_err(|_| Error::ReadFailed)?.len();
        debug!(partition, name = hex(name), len, "opened blob");

        let blob = Blob {
            partition: partition.into(),
            name: name.into(),
            file: Arc::new(file),
        };
        Ok((blob, len))
    }

    fn remove(&self, partition: &str, name: Option<&[u8]>) -> Result<(), Error> {
        let dir = self.partition_dir(partition)?;
        let _guard = self.lock.lock().unwrap();
        match name {
            Some(name) => fs::remove_file(dir.join(hex(name)))
                .map_err(|_| Error::BlobMissing(partition.into(), hex(name))),
            None => fs::remove_dir_all(dir).map_err(|_| Error::PartitionMissing(partition.into())),
        }
    }

    fn scan(&self, partition: &str) -> Result<Vec<Vec<u8>>, Error> {
        let dir = self.partition_dir(partition)?;
        let _guard = self.lock.lock().unwrap();
        let entries = fs::read_dir(dir).map_err(|_| Error::PartitionMissing(partition.into()))?;

        let mut blobs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|_| Error::ReadFailed)?;
            let is_file = entry.file_type().map_err(|_| Error::ReadFailed)?.is_file();
            let name = entry.file_name().to_str().and_then(from_hex);
            match (is_file, name) {
                (true, Some(name)) => blobs.push(name),
                _ => return Err(Error::PartitionCorrupt(partition.into())),
            }
        }
        blobs.sort();
        Ok(blobs)
    }
}

impl crate::Blob for Blob {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<(), Error> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file
                .read_exact_at(buf, offset)
                .map_err(|_| Error::ReadFailed)?;
        }
        #[cfg(windows)]
        {
            use std::os::windows::fs::FileExt;
            let mut read = 0;
            while read < buf.len() {
                let n = self
                    .file
                    .seek_read(&mut buf[read..], offset + read as u64)
                    .map_err(|_| Error::ReadFailed)?;
                if n == 0 {
                    return Err(Error::BlobInsufficientLength);
                }
                read += n;
            }
        }
        Ok(())
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<(), Error> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file
                .write_all_at(buf, offset)
                .map_err(|_| Error::WriteFailed)?;
        }
        #[cfg(windows)]
        {
            use std::os::windows::fs::FileExt;
            let mut written = 0;
            while written < buf.len() {
                let n = self
                    .file
                    .seek_write(&buf[written..], offset + written as u64)
                    .map_err(|_| Error::WriteFailed)?;
                written += n;
            }
        }
        Ok(())
    }

    fn resize(&self, len: u64) -> Result<(), Error> {
        self.file
            .set_len(len)
            .map_err(|e| Error::BlobResizeFailed(self.partition.clone(), hex(&self.name), e))
    }

    fn sync(&self) -> Result<(), Error> {
        self.file
            .sync_all()
            .map_err(|e| Error::BlobSyncFailed(self.partition.clone(), hex(&self.name), e))
    }
}
