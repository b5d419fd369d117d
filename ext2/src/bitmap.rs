//! # 位图分配器
//!
//! 每个块组各有一个块位图和一个索引节点位图，各占一个块。
//! 位图、块组描述符中的空闲计数、超级块中的空闲计数三者在每次分配或释放后同时落盘。

use vfs::Error;

use crate::efs::{Ext2FileSystem, FsState};
use crate::{BlockId, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bitmap {
    Block,
    Inode,
}

impl Ext2FileSystem {
    /// 分配一个数据块，优先在`hint`块组内寻找
    pub(crate) fn alloc_block(&self, st: &mut FsState, hint: u32) -> Result<BlockId> {
        let (group, bit) = self.alloc_bit(st, Bitmap::Block, hint, false)?;
        let block = self.geo().group_first_block(group) + bit as u64;
        log::trace!("allocated block {block} in group {group}");
        Ok(BlockId::new(block as u32))
    }

    pub(crate) fn free_block(&self, st: &mut FsState, block: BlockId) -> Result<()> {
        let geo = self.geo();
        let raw = u32::from(block) as u64;
        if raw < geo.first_data_block as u64 || raw >= geo.blocks_count {
            log::error!("freeing block {block} outside the volume");
            return Err(Error::Io);
        }

        let rel = raw - geo.first_data_block as u64;
        let group = (rel / geo.blocks_per_group as u64) as u32;
        let bit = (rel % geo.blocks_per_group as u64) as u32;
        log::trace!("freeing block {block} in group {group}");
        self.free_bit(st, Bitmap::Block, group, bit, false)
    }

    /// 分配一个索引节点，优先在`hint`块组内寻找；`is_dir`用于维护目录计数
    pub(crate) fn alloc_inode(&self, st: &mut FsState, hint: u32, is_dir: bool) -> Result<u32> {
        let (group, bit) = self.alloc_bit(st, Bitmap::Inode, hint, is_dir)?;
        let ino = group * self.geo().inodes_per_group + bit + 1;
        log::trace!("allocated inode {ino} in group {group}");
        Ok(ino)
    }

    pub(crate) fn free_inode(&self, st: &mut FsState, ino: u32, is_dir: bool) -> Result<()> {
        let geo = self.geo();
        if ino == 0 || ino > geo.inodes_count {
            log::error!("freeing inode {ino} outside the volume");
            return Err(Error::Io);
        }

        let group = geo.group_of_inode(ino);
        let bit = (ino - 1) % geo.inodes_per_group;
        log::trace!("freeing inode {ino} in group {group}");
        self.free_bit(st, Bitmap::Inode, group, bit, is_dir)
    }

    /// 先试`hint`块组，再从0号块组起依次尝试
    fn alloc_bit(&self, st: &mut FsState, kind: Bitmap, hint: u32, is_dir: bool) -> Result<(u32, u32)> {
        let group_count = self.geo().group_count;
        let hint = if hint < group_count { hint } else { 0 };

        if let Some(bit) = self.alloc_in_group(st, kind, hint, is_dir)? {
            return Ok((hint, bit));
        }
        for group in (0..group_count).filter(|&group| group != hint) {
            if let Some(bit) = self.alloc_in_group(st, kind, group, is_dir)? {
                return Ok((group, bit));
            }
        }

        log::debug!("no free {kind:?} left");
        Err(Error::NoSpace)
    }

    fn alloc_in_group(
        &self,
        st: &mut FsState,
        kind: Bitmap,
        group: u32,
        is_dir: bool,
    ) -> Result<Option<u32>> {
        let geo = self.geo();
        let wide = geo.wide_desc();
        let mut desc = self.read_group_desc(group)?;

        let (free, bitmap_block, limit) = match kind {
            Bitmap::Block => (
                desc.free_blocks_count(wide),
                desc.block_bitmap(wide),
                geo.blocks_in_group(group),
            ),
            Bitmap::Inode => (
                desc.free_inodes_count(wide),
                desc.inode_bitmap(wide),
                geo.inodes_per_group,
            ),
        };
        if free == 0 {
            return Ok(None);
        }

        let bitmap_block = BlockId::new(u32::try_from(bitmap_block).map_err(|_| Error::Io)?);
        let mut bitmap = self.disk().read_block(bitmap_block)?;

        // 逐个64位字查找第一个未满的字
        let Some(bit) = bitmap
            .chunks_exact(8)
            .enumerate()
            .find_map(|(word_index, word)| {
                let word = u64::from_le_bytes([
                    word[0], word[1], word[2], word[3], word[4], word[5], word[6], word[7],
                ]);
                (word != u64::MAX).then(|| word_index as u32 * 64 + word.trailing_ones())
            })
            .filter(|&bit| bit < limit)
        else {
            log::warn!("group {group} claims {free} free {kind:?}s but its bitmap is full");
            return Ok(None);
        };

        bitmap[bit as usize / 8] |= 1 << (bit % 8);
        self.disk().write_block(bitmap_block, &bitmap)?;

        match kind {
            Bitmap::Block => {
                desc.set_free_blocks_count(free - 1, wide);
                let total = st.sb.free_blocks_count();
                st.sb.set_free_blocks_count(total.saturating_sub(1));
            }
            Bitmap::Inode => {
                desc.set_free_inodes_count(free - 1, wide);
                if is_dir {
                    desc.set_used_dirs_count(desc.used_dirs_count(wide) + 1, wide);
                }
                st.sb.free_inodes_count = st.sb.free_inodes_count.saturating_sub(1);
            }
        }
        self.write_group_desc(group, &desc)?;
        self.write_super_block(&st.sb)?;

        Ok(Some(bit))
    }

    fn free_bit(&self, st: &mut FsState, kind: Bitmap, group: u32, bit: u32, is_dir: bool) -> Result<()> {
        let wide = self.geo().wide_desc();
        let mut desc = self.read_group_desc(group)?;
        let bitmap_block = match kind {
            Bitmap::Block => desc.block_bitmap(wide),
            Bitmap::Inode => desc.inode_bitmap(wide),
        };
        let bitmap_block = BlockId::new(u32::try_from(bitmap_block).map_err(|_| Error::Io)?);
        let mut bitmap = self.disk().read_block(bitmap_block)?;

        let (byte, mask) = (bit as usize / 8, 1u8 << (bit % 8));
        // 释放的位必须已被占用
        if bitmap[byte] & mask == 0 {
            log::error!("double free of {kind:?} bit {bit} in group {group}");
            return Err(Error::Io);
        }
        bitmap[byte] &= !mask;
        self.disk().write_block(bitmap_block, &bitmap)?;

        match kind {
            Bitmap::Block => {
                desc.set_free_blocks_count(desc.free_blocks_count(wide) + 1, wide);
                let total = st.sb.free_blocks_count();
                st.sb.set_free_blocks_count(total + 1);
            }
            Bitmap::Inode => {
                desc.set_free_inodes_count(desc.free_inodes_count(wide) + 1, wide);
                if is_dir {
                    desc.set_used_dirs_count(desc.used_dirs_count(wide).saturating_sub(1), wide);
                }
                st.sb.free_inodes_count += 1;
            }
        }
        self.write_group_desc(group, &desc)?;
        self.write_super_block(&st.sb)
    }
}
