use crate::{hex, Error};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, RwLock},
};

type Partition = BTreeMap<Vec<u8>, Vec<u8>>;

/// In-memory storage implementation.
///
/// Writes to a [Blob] are only visible to subsequently opened blobs after [crate::Blob::sync].
#[derive(Clone, Default)]
pub struct Storage {
    partitions: Arc<Mutex<BTreeMap<String, Partition>>>,
}

impl crate::Storage for Storage {
    type Blob = Blob;

    fn open(&self, partition: &str, name: &[u8]) -> Result<(Blob, u64), Error> {
        super::validate_partition_name(partition)?;
        let mut partitions = self.partitions.lock().unwrap();
        let persisted = partitions
            .entry(partition.into())
            .or_default()
            .entry(name.into())
            .or_default();
        let len = persisted.len() as u64;
        let blob = Blob {
            partitions: self.partitions.clone(),
            partition: partition.into(),
            name: name.into(),
            content: Arc::new(RwLock::new(persisted.clone())),
        };
        Ok((blob, len))
    }

    fn remove(&self, partition: &str, name: Option<&[u8]>) -> Result<(), Error> {
        super::validate_partition_name(partition)?;

        let mut partitions = self.partitions.lock().unwrap();
        match name {
            Some(name) => {
                partitions
                    .get_mut(partition)
                    .ok_or(Error::PartitionMissing(partition.into()))?
                    .remove(name)
                    .ok_or(Error::BlobMissing(partition.into(), hex(name)))?;
            }
            None => {
                partitions
                    .remove(partition)
                    .ok_or(Error::PartitionMissing(partition.into()))?;
            }
        }
        Ok(())
    }

    fn scan(&self, partition: &str) -> Result<Vec<Vec<u8>>, Error> {
        super::validate_partition_name(partition)?;

        let partitions = self.partitions.lock().unwrap();
        let partition = partitions
            .get(partition)
            .ok_or(Error::PartitionMissing(partition.into()))?;
        Ok(partition.keys().cloned().collect())
    }
}

/// A blob held in process memory. Reads and writes go to a private copy that [crate::Blob::sync]
/// publishes to the partition.
#[derive(Clone)]
pub struct Blob {
    partitions: Arc<Mutex<BTreeMap<String, Partition>>>,
    partition: String,
    name: Vec<u8>,
    content: Arc<RwLock<Vec<u8>>>,
}

impl crate::Blob for Blob {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<(), Error> {
        let offset: usize = offset.try_into().map_err(|_| Error::OffsetOverflow)?;
        let end = offset
            .checked_add(buf.len())
            .ok_or(Error::OffsetOverflow)?;
        let content = self.content.read().unwrap();
        if end > content.len() {
            return Err(Error::BlobInsufficientLength);
        }
        buf.copy_from_slice(&content[offset..end]);
        Ok(())
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<(), Error> {
        let offset: usize = offset.try_into().map_err(|_| Error::OffsetOverflow)?;
        let end = offset
            .checked_add(buf.len())
            .ok_or(Error::OffsetOverflow)?;
        let mut content = self.content.write().unwrap();
        if end > content.len() {
            content.resize(end, 0);
        }
        content[offset..end].copy_from_slice(buf);
        Ok(())
    }

    fn resize(&self, len: u64) -> Result<(), Error> {
        let len: usize = len.try_into().map_err(|_| Error::OffsetOverflow)?;
        let mut content = self.content.write().unwrap();
        content.resize(len, 0);
        Ok(())
    }

    fn sync(&self) -> Result<(), Error> {
        let snapshot = self.content.read().unwrap().clone();
        let mut partitions = self.partitions.lock().unwrap();
        let persisted = partitions
            .get_mut(&self.partition)
            .and_then(|blobs| blobs.get_mut(&self.name))
            .ok_or_else(|| Error::BlobMissing(self.partition.clone(), hex(&self.name)))?;
        *persisted = snapshot;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Storage;
    use crate::{storage::tests::run_storage_tests, Blob, Storage as _};

    #[test]
    fn test_memory_storage() {
        run_storage_tests(Storage::default());
    }

    #[test]
    fn test_unsynced_writes_invisible() {
        let storage = Storage::default();
        let (blob, _) = storage.open("partition", b"blob").unwrap();
        blob.write_at(b"pending", 0).unwrap();

        let (_, len) = storage.open("partition", b"blob").unwrap();
        assert_eq!(len, 0);

        blob.sync().unwrap();
        let (reopened, len) = storage.open("partition", b"blob").unwrap();
        assert_eq!(len, 7);
        let mut buf = [0u8; 7];
        reopened.read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"pending");
    }
}
