//! 单元测试共用的内存盘与时钟

use alloc::sync::Arc;

use block_dev::{BlockDevice, FaultyDisk, RamDisk};
use enumflags2::BitFlags;
use vfs::{Clock, Timespec};

use crate::{Ext2FileSystem, FormatOptions};

/// 永远停在纪元零点的时钟
pub struct Epoch;

impl Clock for Epoch {
    fn now(&self) -> Timespec {
        Timespec::default()
    }
}

/// 按`opts`格式化一块内存盘
pub fn ram_disk(opts: &FormatOptions) -> Arc<dyn BlockDevice> {
    let dev: Arc<dyn BlockDevice> = Arc::new(RamDisk::new(opts.size as usize));
    Ext2FileSystem::format(dev.clone(), opts).unwrap();
    dev
}

pub fn mount_dev(dev: Arc<dyn BlockDevice>) -> Arc<Ext2FileSystem> {
    Ext2FileSystem::initialize(dev, Arc::new(Epoch), "/", BitFlags::empty()).unwrap()
}

pub fn mount_with(opts: &FormatOptions) -> Arc<Ext2FileSystem> {
    mount_dev(ram_disk(opts))
}

/// 默认参数、`size`字节的文件系统
pub fn mount(size: u64) -> Arc<Ext2FileSystem> {
    mount_with(&FormatOptions {
        size,
        ..Default::default()
    })
}

/// 挂在可注入故障的内存盘上
pub fn mount_faulty(size: u64) -> (Arc<FaultyDisk<RamDisk>>, Arc<Ext2FileSystem>) {
    let dev = Arc::new(FaultyDisk::new(RamDisk::new(size as usize)));
    let opts = FormatOptions {
        size,
        ..Default::default()
    };
    Ext2FileSystem::format(dev.clone(), &opts).unwrap();
    let fs = mount_dev(dev.clone());
    (dev, fs)
}
