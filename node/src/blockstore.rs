// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Local block storage.
//!
//! `FileBlockstore` is an append-only log. Each record is
//! `[cid_len u32][data_len u32][crc64 u64][cid][data]`, little endian, with
//! the checksum taken over the CID and data bytes.

use crate::errors::BlockstoreError;
use async_trait::async_trait;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use crc64fast::Digest;
use ferry_kernel::Block;
use ipld_core::cid::Cid;
use rustc_hash::FxHashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

pub type Result<T> = std::result::Result<T, BlockstoreError>;

#[async_trait]
pub trait Blockstore: Send + Sync {
    async fn get(&self, cid: &Cid) -> Result<Option<Block>>;
    async fn put(&self, block: &Block) -> Result<()>;
    async fn has(&self, cid: &Cid) -> Result<bool>;
}

#[derive(Default)]
pub struct MemoryBlockstore {
    blocks: RwLock<FxHashMap<Cid, Bytes>>,
}

impl MemoryBlockstore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Blockstore for MemoryBlockstore {
    async fn get(&self, cid: &Cid) -> Result<Option<Block>> {
        let blocks = self.blocks.read().map_err(|_| poisoned())?;
        Ok(blocks.get(cid).map(|data| Block::new_unchecked(*cid, data.clone())))
    }

    async fn put(&self, block: &Block) -> Result<()> {
        let mut blocks = self.blocks.write().map_err(|_| poisoned())?;
        blocks.entry(*block.cid()).or_insert_with(|| block.data().clone());
        Ok(())
    }

    async fn has(&self, cid: &Cid) -> Result<bool> {
        Ok(self.blocks.read().map_err(|_| poisoned())?.contains_key(cid))
    }
}

#[derive(Debug, Clone, Copy)]
struct RecordHeader {
    cid_len: u32,
    data_len: u32,
    checksum: u64,
}

impl RecordHeader {
    const SIZE: u64 = 4 + 4 + 8;

    fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(Self {
            cid_len: reader.read_u32::<LittleEndian>()?,
            data_len: reader.read_u32::<LittleEndian>()?,
            checksum: reader.read_u64::<LittleEndian>()?,
        })
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.cid_len)?;
        writer.write_u32::<LittleEndian>(self.data_len)?;
        writer.write_u64::<LittleEndian>(self.checksum)
    }

    fn total_len(&self) -> u64 {
        Self::SIZE + self.cid_len as u64 + self.data_len as u64
    }
}

fn checksum(cid: &[u8], data: &[u8]) -> u64 {
    let mut digest = Digest::new();
    digest.write(cid);
    digest.write(data);
    digest.sum64()
}

/// Where a block's data sits in the log.
#[derive(Debug, Clone, Copy)]
struct Slot {
    record: u64,
    header: RecordHeader,
}

struct LogFile {
    file: File,
    end: u64,
}

pub struct FileBlockstore {
    path: PathBuf,
    log: Mutex<LogFile>,
    index: RwLock<FxHashMap<Cid, Slot>>,
}

impl FileBlockstore {
    /// Opens or creates the log and rebuilds the index. A torn final record
    /// is cut off; a checksum mismatch anywhere else is an error.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;
        let file_len = file.metadata()?.len();

        let mut index = FxHashMap::default();
        let mut reader = BufReader::new(file.try_clone()?);
        let mut offset = 0u64;
        while offset < file_len {
            if file_len - offset < RecordHeader::SIZE {
                break;
            }
            let header = RecordHeader::read_from(&mut reader)?;
            if offset + header.total_len() > file_len {
                break;
            }
            let mut cid_bytes = vec![0u8; header.cid_len as usize];
            reader.read_exact(&mut cid_bytes)?;
            let mut data = vec![0u8; header.data_len as usize];
            reader.read_exact(&mut data)?;

            let found = checksum(&cid_bytes, &data);
            if found != header.checksum {
                return Err(BlockstoreError::ChecksumMismatch {
                    offset,
                    expected: header.checksum,
                    found,
                });
            }
            let cid = Cid::try_from(cid_bytes.as_slice())
                .map_err(|_| BlockstoreError::Corrupt(offset))?;
            index.insert(cid, Slot { record: offset, header });
            offset += header.total_len();
        }

        if offset < file_len {
            tracing::warn!(
                "Truncating torn tail of {:?}: {} of {} bytes are intact",
                path,
                offset,
                file_len
            );
            file.set_len(offset)?;
        }
        tracing::debug!("Opened block log {:?} with {} blocks", path, index.len());

        Ok(Self {
            path,
            log: Mutex::new(LogFile { file, end: offset }),
            index: RwLock::new(index),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.index.read().map(|i| i.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_slot(&self, cid: &Cid, slot: Slot) -> Result<Block> {
        let mut log = self.log.lock().map_err(|_| poisoned())?;
        let header = slot.header;
        log.file.seek(SeekFrom::Start(slot.record + RecordHeader::SIZE))?;
        let mut cid_bytes = vec![0u8; header.cid_len as usize];
        log.file.read_exact(&mut cid_bytes)?;
        let mut data = vec![0u8; header.data_len as usize];
        log.file.read_exact(&mut data)?;

        let found = checksum(&cid_bytes, &data);
        if found != header.checksum {
            return Err(BlockstoreError::ChecksumMismatch {
                offset: slot.record,
                expected: header.checksum,
                found,
            });
        }
        Ok(Block::new_unchecked(*cid, Bytes::from(data)))
    }
}

#[async_trait]
impl Blockstore for FileBlockstore {
    async fn get(&self, cid: &Cid) -> Result<Option<Block>> {
        let slot = self.index.read().map_err(|_| poisoned())?.get(cid).copied();
        match slot {
            Some(slot) => self.read_slot(cid, slot).map(Some),
            None => Ok(None),
        }
    }

    async fn put(&self, block: &Block) -> Result<()> {
        if self.has(block.cid()).await? {
            return Ok(());
        }
        let cid_bytes = block.cid().to_bytes();
        let data = block.data();
        let header = RecordHeader {
            cid_len: cid_bytes.len() as u32,
            data_len: data.len() as u32,
            checksum: checksum(&cid_bytes, data),
        };

        let mut record = Vec::with_capacity(header.total_len() as usize);
        header.write_to(&mut record)?;
        record.extend_from_slice(&cid_bytes);
        record.extend_from_slice(data);

        let slot = {
            let mut log = self.log.lock().map_err(|_| poisoned())?;
            log.file.write_all(&record)?;
            log.file.sync_data()?;
            let slot = Slot { record: log.end, header };
            log.end += header.total_len();
            slot
        };
        self.index
            .write()
            .map_err(|_| poisoned())?
            .insert(*block.cid(), slot);
        Ok(())
    }

    async fn has(&self, cid: &Cid) -> Result<bool> {
        Ok(self.index.read().map_err(|_| poisoned())?.contains_key(cid))
    }
}

fn poisoned() -> BlockstoreError {
    BlockstoreError::Io("lock poisoned".into())
}
