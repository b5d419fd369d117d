use enumflags2::{BitFlags, bitflags};

use super::OnDisk;

/// 超级块，位于设备第1024字节处，长1024字节。
///
/// 只列出本实现读写的字段，其余都归入保留区原样保留。
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct SuperBlock {
    pub inodes_count: u32,
    blocks_count_lo: u32,
    r_blocks_count_lo: u32,
    free_blocks_count_lo: u32,
    pub free_inodes_count: u32,
    /// 第一个数据块：块大小为1024时是1（0号块留给引导扇区），否则为0
    pub first_data_block: u32,
    /// 块大小 = 1024 << log_block_size
    pub log_block_size: u32,
    pub log_cluster_size: u32,
    pub blocks_per_group: u32,
    pub clusters_per_group: u32,
    pub inodes_per_group: u32,
    pub mtime: u32,
    pub wtime: u32,
    pub mnt_count: u16,
    pub max_mnt_count: u16,
    pub magic: u16,
    pub state: u16,
    pub errors: u16,
    pub minor_rev_level: u16,
    pub lastcheck: u32,
    pub checkinterval: u32,
    pub creator_os: u32,
    pub rev_level: u32,
    pub def_resuid: u16,
    pub def_resgid: u16,

    /*
     * EXT2_DYNAMIC_REV
     */
    pub first_ino: u32,
    pub inode_size: u16,
    pub block_group_nr: u16,
    pub feature_compat: u32,
    pub feature_incompat: u32,
    pub feature_ro_compat: u32,
    pub uuid: [u8; 16],
    pub volume_name: [u8; 16],
    _last_mounted: [u8; 64],
    _algorithm_usage_bitmap: u32,
    _prealloc_blocks: u8,
    _prealloc_dir_blocks: u8,
    _reserved_gdt_blocks: u16,
    _journal_uuid: [u8; 16],
    _journal_inum: u32,
    _journal_dev: u32,
    _last_orphan: u32,
    _hash_seed: [u32; 4],
    _def_hash_version: u8,
    _jnl_backup_type: u8,
    /// 64位特性下块组描述符的大小
    pub desc_size: u16,
    _default_mount_opts: u32,
    _first_meta_bg: u32,
    pub mkfs_time: u32,
    _jnl_blocks: [u32; 17],

    /*
     * INCOMPAT_64BIT
     */
    blocks_count_hi: u32,
    r_blocks_count_hi: u32,
    free_blocks_count_hi: u32,
    pub min_extra_isize: u16,
    pub want_extra_isize: u16,

    _reserved: [u32; 168],
}

unsafe impl OnDisk for SuperBlock {}

impl SuperBlock {
    pub const OFFSET: u64 = 1024;
    pub const MAGIC: u16 = 0xEF53;

    pub const GOOD_OLD_REV: u32 = 0;
    pub const DYNAMIC_REV: u32 = 1;
    pub const GOOD_OLD_FIRST_INO: u32 = 11;
    pub const GOOD_OLD_INODE_SIZE: u16 = 128;

    /// 卸载干净
    pub const STATE_VALID: u16 = 0x0001;
    pub const STATE_ERROR: u16 = 0x0002;

    pub fn zeroed() -> Self {
        Self::from_bytes(&[])
    }

    pub fn block_size(&self) -> u32 {
        1024 << self.log_block_size
    }

    pub fn first_ino(&self) -> u32 {
        if self.rev_level == Self::GOOD_OLD_REV {
            Self::GOOD_OLD_FIRST_INO
        } else {
            self.first_ino
        }
    }

    pub fn inode_size(&self) -> u32 {
        if self.rev_level == Self::GOOD_OLD_REV {
            Self::GOOD_OLD_INODE_SIZE as u32
        } else {
            self.inode_size as u32
        }
    }

    pub fn is_64bit(&self) -> bool {
        self.feature_incompat & IncompatFeature::Bit64 as u32 != 0
    }

    pub fn blocks_count(&self) -> u64 {
        self.join_hi(self.blocks_count_lo, self.blocks_count_hi)
    }

    pub fn set_blocks_count(&mut self, count: u64) {
        (self.blocks_count_lo, self.blocks_count_hi) = self.split_hi(count);
    }

    pub fn free_blocks_count(&self) -> u64 {
        self.join_hi(self.free_blocks_count_lo, self.free_blocks_count_hi)
    }

    pub fn set_free_blocks_count(&mut self, count: u64) {
        (self.free_blocks_count_lo, self.free_blocks_count_hi) = self.split_hi(count);
    }

    pub fn reserved_blocks_count(&self) -> u64 {
        self.join_hi(self.r_blocks_count_lo, self.r_blocks_count_hi)
    }

    /// 未识别的 INCOMPAT 特性位
    pub fn unknown_incompat(&self) -> u32 {
        BitFlags::<IncompatFeature>::from_bits(self.feature_incompat)
            .map_or_else(|err| err.invalid_bits(), |_| 0)
    }

    /// 未识别的 RO_COMPAT 特性位
    pub fn unknown_ro_compat(&self) -> u32 {
        BitFlags::<RoCompatFeature>::from_bits(self.feature_ro_compat)
            .map_or_else(|err| err.invalid_bits(), |_| 0)
    }

    pub fn has_ro_compat(&self, feature: RoCompatFeature) -> bool {
        self.feature_ro_compat & feature as u32 != 0
    }

    fn join_hi(&self, lo: u32, hi: u32) -> u64 {
        if self.is_64bit() {
            (hi as u64) << 32 | lo as u64
        } else {
            lo as u64
        }
    }

    fn split_hi(&self, value: u64) -> (u32, u32) {
        if self.is_64bit() {
            (value as u32, (value >> 32) as u32)
        } else {
            (value as u32, 0)
        }
    }
}

#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncompatFeature {
    /// 目录项记录文件类型
    FileType = 0x0002,
    /// 64位块号，块组描述符可变长
    Bit64 = 0x0080,
}

#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoCompatFeature {
    /// 只有部分块组带有超级块备份
    SparseSuper = 0x0001,
    /// 普通文件大小可超过2GiB，高32位存于`size_high`
    LargeFile = 0x0002,
}

/// 使用 SPARSE_SUPER 时，0、1号块组以及3、5、7的幂次号块组带有超级块备份
pub fn group_has_super(group: u32, sparse: bool) -> bool {
    fn is_power_of(mut n: u32, base: u32) -> bool {
        while n > 1 && n % base == 0 {
            n /= base;
        }
        n == 1
    }

    !sparse || group <= 1 || is_power_of(group, 3) || is_power_of(group, 5) || is_power_of(group, 7)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_backups() {
        let groups: alloc::vec::Vec<u32> = (0..50).filter(|&g| group_has_super(g, true)).collect();
        assert_eq!(&[0, 1, 3, 5, 7, 9, 25, 27, 49][..], &groups[..]);
        assert!(group_has_super(4, false));
    }

    #[test]
    fn unknown_features() {
        let mut sb = SuperBlock::zeroed();
        sb.feature_incompat = IncompatFeature::FileType as u32 | 0x0040;
        sb.feature_ro_compat = RoCompatFeature::LargeFile as u32 | 0x0008;
        assert_eq!(0x0040, sb.unknown_incompat());
        assert_eq!(0x0008, sb.unknown_ro_compat());
    }

    #[test]
    fn counters_split_only_with_64bit() {
        let mut sb = SuperBlock::zeroed();
        sb.set_free_blocks_count(0x1_0000_0005);
        assert_eq!(5, sb.free_blocks_count());

        sb.feature_incompat = IncompatFeature::Bit64 as u32;
        sb.set_free_blocks_count(0x1_0000_0005);
        assert_eq!(0x1_0000_0005, sb.free_blocks_count());
    }
}
