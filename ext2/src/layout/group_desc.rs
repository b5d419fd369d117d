use super::OnDisk;

/// 块组描述符。
///
/// ext2/3 只使用前32字节；启用 INCOMPAT_64BIT 后，
/// 后32字节保存各字段的高位，描述符总长由超级块的`desc_size`决定。
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct GroupDesc {
    block_bitmap_lo: u32,
    inode_bitmap_lo: u32,
    inode_table_lo: u32,
    free_blocks_count_lo: u16,
    free_inodes_count_lo: u16,
    used_dirs_count_lo: u16,
    _flags: u16,
    _exclude_bitmap_lo: u32,
    _block_bitmap_csum_lo: u16,
    _inode_bitmap_csum_lo: u16,
    _itable_unused_lo: u16,
    _checksum: u16,

    block_bitmap_hi: u32,
    inode_bitmap_hi: u32,
    inode_table_hi: u32,
    free_blocks_count_hi: u16,
    free_inodes_count_hi: u16,
    used_dirs_count_hi: u16,
    _itable_unused_hi: u16,
    _exclude_bitmap_hi: u32,
    _block_bitmap_csum_hi: u16,
    _inode_bitmap_csum_hi: u16,
    _reserved: u32,
}

unsafe impl OnDisk for GroupDesc {}

/// 生成一对按`wide`拼接高低位的读写方法
macro_rules! split_field {
    ($get:ident, $set:ident, $lo:ident, $hi:ident, $ty:ty, $wide:ty) => {
        pub fn $get(&self, wide: bool) -> $wide {
            if wide {
                (self.$hi as $wide) << (<$ty>::BITS) | self.$lo as $wide
            } else {
                self.$lo as $wide
            }
        }

        pub fn $set(&mut self, value: $wide, wide: bool) {
            self.$lo = value as $ty;
            if wide {
                self.$hi = (value >> (<$ty>::BITS)) as $ty;
            }
        }
    };
}

impl GroupDesc {
    /// ext2/3 的描述符长度
    pub const GOOD_OLD_SIZE: u32 = 32;
    /// 本实现认识的最大长度，更长的描述符其余部分原样保留
    pub const MAX_KNOWN_SIZE: u32 = 64;

    split_field!(block_bitmap, set_block_bitmap, block_bitmap_lo, block_bitmap_hi, u32, u64);
    split_field!(inode_bitmap, set_inode_bitmap, inode_bitmap_lo, inode_bitmap_hi, u32, u64);
    split_field!(inode_table, set_inode_table, inode_table_lo, inode_table_hi, u32, u64);
    split_field!(
        free_blocks_count,
        set_free_blocks_count,
        free_blocks_count_lo,
        free_blocks_count_hi,
        u16,
        u32
    );
    split_field!(
        free_inodes_count,
        set_free_inodes_count,
        free_inodes_count_lo,
        free_inodes_count_hi,
        u16,
        u32
    );
    split_field!(
        used_dirs_count,
        set_used_dirs_count,
        used_dirs_count_lo,
        used_dirs_count_hi,
        u16,
        u32
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_carry_into_high_half() {
        let mut desc = GroupDesc::default();
        desc.set_free_blocks_count(0x1_0002, true);
        assert_eq!(0x1_0002, desc.free_blocks_count(true));
        assert_eq!(0x0002, desc.free_blocks_count(false));

        desc.set_free_blocks_count(0x1_0001, false);
        // 窄描述符不触碰高位
        assert_eq!(0x1_0001, desc.free_blocks_count(true));
    }
}
