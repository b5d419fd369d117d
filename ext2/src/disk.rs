//! # 设备读写
//!
//! 对[`BlockDevice`]的一层薄封装：任何短读短写都视为失败，
//! 统一报告为[`Error::Io`]。

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use block_dev::{BlockDevice, SyncFlag};
use enumflags2::BitFlags;
use vfs::Error;

use crate::layout::OnDisk;
use crate::{BlockId, Result};

#[derive(Debug, Clone)]
pub struct Disk {
    dev: Arc<dyn BlockDevice>,
    block_size: u32,
}

impl Disk {
    pub fn new(dev: Arc<dyn BlockDevice>, block_size: u32) -> Self {
        Self { dev, block_size }
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size as usize
    }

    /// 块的起始字节偏移
    #[inline]
    pub fn offset_of(&self, block: BlockId) -> u64 {
        u32::from(block) as u64 * self.block_size as u64
    }

    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        match self.dev.pread(buf, offset) {
            Ok(n) if n == buf.len() => Ok(()),
            res => {
                log::error!("short read: {} bytes at {offset:#x}: {res:?}", buf.len());
                Err(Error::Io)
            }
        }
    }

    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        match self.dev.pwrite(buf, offset) {
            Ok(n) if n == buf.len() => Ok(()),
            res => {
                log::error!("short write: {} bytes at {offset:#x}: {res:?}", buf.len());
                Err(Error::Io)
            }
        }
    }

    pub fn read_struct<T: OnDisk>(&self, offset: u64, len: usize) -> Result<T> {
        let mut buf = vec![0u8; len];
        self.read_at(offset, &mut buf)?;
        Ok(T::from_bytes(&buf))
    }

    /// 只写出结构的前`len`字节，其后的磁盘内容保持不变
    pub fn write_struct<T: OnDisk>(&self, offset: u64, value: &T, len: usize) -> Result<()> {
        let bytes = value.as_bytes();
        self.write_at(offset, &bytes[..len.min(bytes.len())])
    }

    pub fn read_block(&self, block: BlockId) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.block_size()];
        self.read_at(self.offset_of(block), &mut buf)?;
        Ok(buf)
    }

    pub fn write_block(&self, block: BlockId, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len(), self.block_size());
        self.write_at(self.offset_of(block), data)
    }

    pub fn zero_block(&self, block: BlockId) -> Result<()> {
        self.write_block(block, &vec![0u8; self.block_size()])
    }

    /// 读取间接块`block`中的第`index`个指针
    pub fn read_ptr(&self, block: BlockId, index: u64) -> Result<BlockId> {
        let mut raw = [0u8; 4];
        self.read_at(self.offset_of(block) + index * 4, &mut raw)?;
        Ok(BlockId::new(u32::from_le_bytes(raw)))
    }

    pub fn write_ptr(&self, block: BlockId, index: u64, ptr: BlockId) -> Result<()> {
        self.write_at(
            self.offset_of(block) + index * 4,
            &u32::from(ptr).to_le_bytes(),
        )
    }

    pub fn sync(&self, flags: BitFlags<SyncFlag>) -> Result<()> {
        self.dev.sync(flags).map_err(|err| {
            log::error!("device sync failed: {err:?}");
            Error::Io
        })
    }
}
