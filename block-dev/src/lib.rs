//! # 块设备接口层
//!
//! 文件系统只把块设备看作一段可按字节寻址的同步存储：
//! [`BlockDevice::pread`]、[`BlockDevice::pwrite`] 都会阻塞到设备返回为止，
//! 返回值是实际传输的字节数，少于请求量即视为失败。

#![no_std]

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;
use core::any::Any;
use core::fmt::Debug;
use core::sync::atomic::{AtomicUsize, Ordering};

use enumflags2::{BitFlags, bitflags};
use spin::Mutex;

/// 块设备驱动特质
pub trait BlockDevice: Send + Sync + Any + Debug {
    /// 从`offset`处读满`buf`，返回读到的字节数
    fn pread(&self, buf: &mut [u8], offset: u64) -> Result<usize, DeviceError>;

    /// 把`buf`写到`offset`处，返回写入的字节数
    fn pwrite(&self, buf: &[u8], offset: u64) -> Result<usize, DeviceError>;

    fn sync(&self, flags: BitFlags<SyncFlag>) -> Result<(), DeviceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    /// 访问越过了设备末尾
    OutOfRange,
    /// 设备本身报告的错误
    Io,
}

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncFlag {
    /// 只要求数据落盘
    Data = 0b01,
    /// 元数据也要落盘
    Metadata = 0b10,
}

/// 内存盘，整块设备就是一段`Vec<u8>`
#[derive(Debug)]
pub struct RamDisk {
    data: Mutex<Vec<u8>>,
}

impl RamDisk {
    pub fn new(size: usize) -> Self {
        Self {
            data: Mutex::new(vec![0; size]),
        }
    }

    pub fn size(&self) -> u64 {
        self.data.lock().len() as u64
    }

    /// 导出整个盘的内容
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl BlockDevice for RamDisk {
    fn pread(&self, buf: &mut [u8], offset: u64) -> Result<usize, DeviceError> {
        let data = self.data.lock();
        let start = usize::try_from(offset).map_err(|_| DeviceError::OutOfRange)?;
        let end = start
            .checked_add(buf.len())
            .filter(|&end| end <= data.len())
            .ok_or(DeviceError::OutOfRange)?;
        buf.copy_from_slice(&data[start..end]);
        Ok(buf.len())
    }

    fn pwrite(&self, buf: &[u8], offset: u64) -> Result<usize, DeviceError> {
        let mut data = self.data.lock();
        let start = usize::try_from(offset).map_err(|_| DeviceError::OutOfRange)?;
        let end = start
            .checked_add(buf.len())
            .filter(|&end| end <= data.len())
            .ok_or(DeviceError::OutOfRange)?;
        data[start..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn sync(&self, _flags: BitFlags<SyncFlag>) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// 包装另一块设备，在限定次数的读写之后开始报错，用于检验错误路径
#[derive(Debug)]
pub struct FaultyDisk<D> {
    inner: D,
    reads_left: AtomicUsize,
    writes_left: AtomicUsize,
    writes: AtomicUsize,
}

impl<D: BlockDevice> FaultyDisk<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            reads_left: AtomicUsize::new(usize::MAX),
            writes_left: AtomicUsize::new(usize::MAX),
            writes: AtomicUsize::new(0),
        }
    }

    /// 再放行`n`次读，之后的读全部失败
    pub fn fail_reads_after(&self, n: usize) {
        self.reads_left.store(n, Ordering::SeqCst);
    }

    /// 再放行`n`次写，之后的写全部失败
    pub fn fail_writes_after(&self, n: usize) {
        self.writes_left.store(n, Ordering::SeqCst);
    }

    /// 恢复正常读写
    pub fn heal(&self) {
        self.reads_left.store(usize::MAX, Ordering::SeqCst);
        self.writes_left.store(usize::MAX, Ordering::SeqCst);
    }

    /// 迄今成功的写次数
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }
}

/// 额度未耗尽时扣减一次并返回真
fn take(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
            usize::MAX => Some(left),
            0 => None,
            _ => Some(left - 1),
        })
        .is_ok()
}

impl<D: BlockDevice> BlockDevice for FaultyDisk<D> {
    fn pread(&self, buf: &mut [u8], offset: u64) -> Result<usize, DeviceError> {
        if !take(&self.reads_left) {
            return Err(DeviceError::Io);
        }
        self.inner.pread(buf, offset)
    }

    fn pwrite(&self, buf: &[u8], offset: u64) -> Result<usize, DeviceError> {
        if !take(&self.writes_left) {
            return Err(DeviceError::Io);
        }
        let n = self.inner.pwrite(buf, offset)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(n)
    }

    fn sync(&self, flags: BitFlags<SyncFlag>) -> Result<(), DeviceError> {
        self.inner.sync(flags)
    }
}
