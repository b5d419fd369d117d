//! # 格式化
//!
//! 生成一个只含根目录的 ext2 文件系统：
//! 0、1号块组以及3、5、7的幂次号块组带超级块与描述符表的备份；
//! 每个块组依次是（备份）、块位图、索引节点位图、索引节点表、数据块。
//! 最后一个块组小到放不下元数据时直接舍弃。

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::mem;

use block_dev::{BlockDevice, SyncFlag};
use vfs::{Error, Timespec};

use crate::dir::new_dir_block;
use crate::disk::Disk;
use crate::efs::Ext2FileSystem;
use crate::layout::{
    DiskInode, GroupDesc, IncompatFeature, InodeMode, OnDisk, RoCompatFeature, SuperBlock,
    group_has_super,
};
use crate::{BlockId, ROOT_INO, Result};

/// 每个索引节点平均对应的字节数
const BYTES_PER_INODE: u64 = 8192;
/// 块组扣除元数据后至少保留的数据块数
const MIN_GROUP_DATA: u64 = 50;

#[derive(Debug, Clone)]
pub struct FormatOptions {
    /// 文件系统的字节数
    pub size: u64,
    pub block_size: u32,
    /// 缺省为一个位图块所能描述的块数
    pub blocks_per_group: Option<u32>,
    /// 缺省按每8KiB一个索引节点估算
    pub inodes_per_group: Option<u32>,
    pub inode_size: u16,
    /// INCOMPAT_64BIT，描述符长64字节
    pub bit64: bool,
    pub volume_name: String,
    pub uuid: [u8; 16],
    /// 写入根目录与超级块的时间
    pub time: Timespec,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            size: 0,
            block_size: 1024,
            blocks_per_group: None,
            inodes_per_group: None,
            inode_size: 256,
            bit64: false,
            volume_name: String::new(),
            uuid: [0; 16],
            time: Timespec::default(),
        }
    }
}

/// 块组内各区域的位置
#[derive(Debug, Clone, Copy)]
struct GroupLayout {
    first_block: u64,
    blocks: u64,
    block_bitmap: u64,
    inode_bitmap: u64,
    inode_table: u64,
    /// 元数据占用的块数，从块组开头算起
    overhead: u64,
}

/// 按选项推导出的整体布局
#[derive(Debug)]
struct Plan {
    block_size: u64,
    first_data_block: u64,
    blocks_count: u64,
    blocks_per_group: u64,
    inodes_per_group: u64,
    inode_size: u64,
    desc_size: u64,
    group_count: u64,
    gdt_blocks: u64,
    inode_table_blocks: u64,
}

impl Plan {
    fn new(opts: &FormatOptions) -> Result<Self> {
        let bs = opts.block_size as u64;
        if !bs.is_power_of_two() || !(1024..=65536).contains(&bs) {
            log::error!("invalid block size {bs}");
            return Err(Error::InvalidArgument);
        }
        let inode_size = opts.inode_size as u64;
        if !inode_size.is_power_of_two() || inode_size < DiskInode::GOOD_OLD_SIZE as u64 || inode_size > bs {
            log::error!("invalid inode size {inode_size}");
            return Err(Error::InvalidArgument);
        }

        let bits = bs * 8;
        let blocks_per_group = opts.blocks_per_group.map_or(bits, |n| n as u64);
        if blocks_per_group < 8 || blocks_per_group > bits || blocks_per_group % 8 != 0 {
            log::error!("invalid blocks per group {blocks_per_group}");
            return Err(Error::InvalidArgument);
        }

        let inodes_per_block = bs / inode_size;
        let inodes_per_group = opts
            .inodes_per_group
            .map_or((blocks_per_group * bs / BYTES_PER_INODE).max(16), |n| n as u64)
            .next_multiple_of(inodes_per_block.max(8))
            .min(bits);

        let first_data_block = (bs == 1024) as u64;
        let mut blocks_count = (opts.size / bs).min(u32::MAX as u64);
        if blocks_count <= first_data_block {
            return Err(Error::NoSpace);
        }

        let mut plan = Self {
            block_size: bs,
            first_data_block,
            blocks_count,
            blocks_per_group,
            inodes_per_group,
            inode_size,
            desc_size: if opts.bit64 { 64 } else { 32 },
            group_count: 0,
            gdt_blocks: 0,
            inode_table_blocks: inodes_per_group * inode_size / bs,
        };

        loop {
            plan.group_count = (blocks_count - first_data_block).div_ceil(blocks_per_group);
            plan.gdt_blocks = (plan.group_count * plan.desc_size).div_ceil(bs);
            plan.blocks_count = blocks_count;

            let last = plan.group(plan.group_count - 1);
            if last.blocks >= last.overhead + MIN_GROUP_DATA {
                break;
            }
            if plan.group_count == 1 {
                log::error!("{} bytes are too small for a file system", opts.size);
                return Err(Error::NoSpace);
            }
            log::debug!("dropping last group of {} blocks", last.blocks);
            blocks_count = last.first_block;
        }

        if plan.group_count * inodes_per_group > u32::MAX as u64 {
            return Err(Error::InvalidArgument);
        }
        Ok(plan)
    }

    fn group(&self, group: u64) -> GroupLayout {
        let first_block = self.first_data_block + group * self.blocks_per_group;
        let blocks = (self.blocks_count - first_block).min(self.blocks_per_group);

        let mut cursor = first_block;
        if group_has_super(group as u32, true) {
            cursor += 1 + self.gdt_blocks;
        }
        let block_bitmap = cursor;
        let inode_bitmap = cursor + 1;
        let inode_table = cursor + 2;
        let data = inode_table + self.inode_table_blocks;

        GroupLayout {
            first_block,
            blocks,
            block_bitmap,
            inode_bitmap,
            inode_table,
            overhead: data - first_block,
        }
    }
}

/// 位图中置位`[start, end)`
fn set_bits(bitmap: &mut [u8], start: u64, end: u64) {
    for bit in start..end {
        bitmap[bit as usize / 8] |= 1 << (bit % 8);
    }
}

impl Ext2FileSystem {
    /// 在设备上建立新的文件系统
    pub fn format(dev: Arc<dyn BlockDevice>, opts: &FormatOptions) -> Result<()> {
        let plan = Plan::new(opts)?;
        let disk = Disk::new(dev, plan.block_size as u32);
        let bs = plan.block_size;
        let bits = bs * 8;
        let wide = plan.desc_size >= GroupDesc::MAX_KNOWN_SIZE as u64;

        let reserved_inodes = SuperBlock::GOOD_OLD_FIRST_INO as u64 - 1;
        let mut descs = Vec::with_capacity(plan.group_count as usize);
        let mut free_blocks = 0;
        let mut free_inodes = 0;
        let zeros = vec![0u8; bs as usize];

        for group in 0..plan.group_count {
            let layout = plan.group(group);
            // 0号块组的第一个数据块给根目录
            let used_blocks = layout.overhead + (group == 0) as u64;
            let used_inodes = if group == 0 { reserved_inodes } else { 0 };

            let mut bitmap = vec![0u8; bs as usize];
            set_bits(&mut bitmap, 0, used_blocks);
            set_bits(&mut bitmap, layout.blocks, bits);
            disk.write_block(BlockId::new(layout.block_bitmap as u32), &bitmap)?;

            let mut bitmap = vec![0u8; bs as usize];
            set_bits(&mut bitmap, 0, used_inodes);
            set_bits(&mut bitmap, plan.inodes_per_group, bits);
            disk.write_block(BlockId::new(layout.inode_bitmap as u32), &bitmap)?;

            for block in layout.inode_table..layout.inode_table + plan.inode_table_blocks {
                disk.write_block(BlockId::new(block as u32), &zeros)?;
            }

            let mut desc = GroupDesc::default();
            desc.set_block_bitmap(layout.block_bitmap, wide);
            desc.set_inode_bitmap(layout.inode_bitmap, wide);
            desc.set_inode_table(layout.inode_table, wide);
            desc.set_free_blocks_count((layout.blocks - used_blocks) as u32, wide);
            desc.set_free_inodes_count((plan.inodes_per_group - used_inodes) as u32, wide);
            desc.set_used_dirs_count((group == 0) as u32, wide);
            descs.push(desc);

            free_blocks += layout.blocks - used_blocks;
            free_inodes += plan.inodes_per_group - used_inodes;
        }

        // 根目录
        let root_layout = plan.group(0);
        let root_block = BlockId::new((root_layout.first_block + root_layout.overhead) as u32);
        disk.write_block(root_block, &new_dir_block(bs as usize, ROOT_INO, ROOT_INO, true))?;

        let mut root = DiskInode::new(InodeMode::DIRECTORY | 0o755, opts.time, plan.inode_size as u32);
        root.links_count = 2;
        root.set_size(bs);
        root.blocks = (bs / 512) as u32;
        root.block[0] = root_block.into();
        let root_offset = root_layout.inode_table * bs + (ROOT_INO as u64 - 1) * plan.inode_size;
        let inode_len = (plan.inode_size as usize).min(mem::size_of::<DiskInode>());
        disk.write_struct(root_offset, &root, inode_len)?;

        let mut sb = SuperBlock::zeroed();
        sb.magic = SuperBlock::MAGIC;
        sb.rev_level = SuperBlock::DYNAMIC_REV;
        sb.state = SuperBlock::STATE_VALID;
        sb.errors = 1;
        sb.max_mnt_count = u16::MAX;
        sb.log_block_size = bs.trailing_zeros() - 10;
        sb.log_cluster_size = sb.log_block_size;
        sb.first_data_block = plan.first_data_block as u32;
        sb.blocks_per_group = plan.blocks_per_group as u32;
        sb.clusters_per_group = plan.blocks_per_group as u32;
        sb.inodes_per_group = plan.inodes_per_group as u32;
        sb.inodes_count = (plan.group_count * plan.inodes_per_group) as u32;
        sb.free_inodes_count = free_inodes as u32;
        sb.first_ino = SuperBlock::GOOD_OLD_FIRST_INO;
        sb.inode_size = plan.inode_size as u16;
        sb.feature_incompat = IncompatFeature::FileType as u32;
        if opts.bit64 {
            sb.feature_incompat |= IncompatFeature::Bit64 as u32;
            sb.desc_size = plan.desc_size as u16;
        }
        sb.feature_ro_compat = RoCompatFeature::SparseSuper as u32;
        sb.set_blocks_count(plan.blocks_count);
        sb.set_free_blocks_count(free_blocks);
        if plan.inode_size > DiskInode::GOOD_OLD_SIZE as u64 {
            sb.min_extra_isize = DiskInode::EXTRA_ISIZE;
            sb.want_extra_isize = DiskInode::EXTRA_ISIZE;
        }
        sb.uuid = opts.uuid;
        let name = opts.volume_name.as_bytes();
        let len = name.len().min(sb.volume_name.len());
        sb.volume_name[..len].copy_from_slice(&name[..len]);
        let now = opts.time.sec as u32;
        sb.mkfs_time = now;
        sb.wtime = now;
        sb.lastcheck = now;

        // 描述符表
        let mut gdt = vec![0u8; (plan.gdt_blocks * bs) as usize];
        let desc_len = plan.desc_size as usize;
        for (i, desc) in descs.iter().enumerate() {
            gdt[i * desc_len..(i + 1) * desc_len].copy_from_slice(&desc.as_bytes()[..desc_len]);
        }

        // 主超级块与各备份
        for group in (0..plan.group_count).filter(|&g| group_has_super(g as u32, true)) {
            let first = plan.group(group).first_block;
            sb.block_group_nr = group as u16;
            let sb_offset = if group == 0 { SuperBlock::OFFSET } else { first * bs };
            disk.write_struct(sb_offset, &sb, mem::size_of::<SuperBlock>())?;
            disk.write_at((first + 1) * bs, &gdt)?;
        }

        disk.sync(SyncFlag::Data | SyncFlag::Metadata)?;
        log::info!(
            "formatted {} blocks of {bs} bytes in {} groups, {} inodes",
            plan.blocks_count,
            plan.group_count,
            sb.inodes_count
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use block_dev::RamDisk;

    use super::*;

    fn options(size: u64, block_size: u32) -> FormatOptions {
        FormatOptions {
            size,
            block_size,
            ..Default::default()
        }
    }

    #[test]
    fn plan_drops_tiny_last_group() {
        // 第二个块组只剩 8 块
        let plan = Plan::new(&options((8193 + 8) * 1024, 1024)).unwrap();
        assert_eq!(1, plan.group_count);
        assert_eq!(8193, plan.blocks_count);

        let plan = Plan::new(&options(3 * 8192 * 1024, 1024)).unwrap();
        assert_eq!(3, plan.group_count);
        assert_eq!(3 * 8192, plan.blocks_count);
    }

    #[test]
    fn plan_rejects_bad_options() {
        let bad_block = FormatOptions {
            block_size: 3000,
            ..options(1 << 20, 1024)
        };
        assert_eq!(Error::InvalidArgument, Plan::new(&bad_block).unwrap_err());

        let bad_inode = FormatOptions {
            inode_size: 100,
            ..options(1 << 20, 1024)
        };
        assert_eq!(Error::InvalidArgument, Plan::new(&bad_inode).unwrap_err());

        assert_eq!(Error::NoSpace, Plan::new(&options(16 * 1024, 1024)).unwrap_err());
    }

    #[test]
    fn groups_start_with_backups() {
        let plan = Plan::new(&options(256 << 20, 4096)).unwrap();
        assert_eq!(2, plan.group_count);
        let first = plan.group(0);
        assert_eq!((0, 1 + plan.gdt_blocks), (first.first_block, first.block_bitmap));
        let second = plan.group(1);
        assert_eq!(second.first_block + 1 + plan.gdt_blocks, second.block_bitmap);
    }

    #[test]
    fn backups_carry_group_number() {
        let size = 4 * 8192 * 1024;
        let dev = Arc::new(RamDisk::new(size as usize));
        Ext2FileSystem::format(dev.clone(), &options(size, 1024)).unwrap();

        let image = dev.snapshot();
        for (group, present) in [(1, true), (2, false), (3, true)] {
            let offset = (1 + group * 8192) * 1024;
            let sb = SuperBlock::from_bytes(&image[offset..offset + 1024]);
            assert_eq!(present, sb.magic == SuperBlock::MAGIC, "group {group}");
            if present {
                assert_eq!(group as u16, sb.block_group_nr);
            }
        }
    }
}
