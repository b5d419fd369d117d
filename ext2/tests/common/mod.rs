#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use block_dev::{BlockDevice, FaultyDisk, RamDisk};
use enumflags2::BitFlags;
use ext2::{Ext2FileSystem, FormatOptions, MountFlag, Vnode};
use vfs::{Clock, Timespec};

/// 每次读取前进一秒的时钟
pub struct TickClock(AtomicI64);

impl TickClock {
    pub fn new(start: i64) -> Arc<Self> {
        Arc::new(Self(AtomicI64::new(start)))
    }
}

impl Clock for TickClock {
    fn now(&self) -> Timespec {
        Timespec::new(self.0.fetch_add(1, Ordering::Relaxed), 0)
    }
}

pub const START: i64 = 1_700_000_000;

pub fn image(opts: &FormatOptions) -> Arc<RamDisk> {
    let dev = Arc::new(RamDisk::new(opts.size as usize));
    Ext2FileSystem::format(dev.clone(), opts).unwrap();
    dev
}

pub fn mount(dev: &Arc<RamDisk>, flags: BitFlags<MountFlag>) -> Result<Arc<Ext2FileSystem>, vfs::Error> {
    mount_dev(dev.clone(), flags)
}

pub fn mount_dev(dev: Arc<dyn BlockDevice>, flags: BitFlags<MountFlag>) -> Result<Arc<Ext2FileSystem>, vfs::Error> {
    Ext2FileSystem::initialize(dev, TickClock::new(START), "/mnt", flags)
}

/// 格式化一块`mib`MiB、块大小1024的内存盘并挂载
pub fn fresh(mib: u64) -> (Arc<RamDisk>, Arc<Ext2FileSystem>) {
    let dev = image(&FormatOptions {
        size: mib << 20,
        ..Default::default()
    });
    let fs = mount(&dev, BitFlags::empty()).unwrap();
    (dev, fs)
}

/// 同[`fresh`]，但设备可以注入读写故障
pub fn fresh_faulty(mib: u64) -> (Arc<FaultyDisk<RamDisk>>, Arc<Ext2FileSystem>) {
    let opts = FormatOptions {
        size: mib << 20,
        ..Default::default()
    };
    let dev = Arc::new(FaultyDisk::new(RamDisk::new(opts.size as usize)));
    Ext2FileSystem::format(dev.clone(), &opts).unwrap();
    let fs = mount_dev(dev.clone(), BitFlags::empty()).unwrap();
    (dev, fs)
}

pub fn names(dir: &Vnode) -> Vec<String> {
    dir.entries().unwrap().into_iter().map(|e| e.name).collect()
}

/// 确定的伪随机字节
pub fn pattern(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (state >> 16) as u8
        })
        .collect()
}
