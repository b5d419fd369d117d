//! # 逻辑块到物理块的地址转换
//!
//! 索引节点的`block`数组：前12项直接指向数据块，
//! 第12、13、14项分别指向一级、二级、三级间接块。
//! 间接块整块连续存放 P = 块大小 / 4 个块编号。
//!
//! ## 块索引编码
//!
//! 逻辑块号先减去前面各级的容量，得到在本级内的序号`j`：
//! - 一级：`[j]`
//! - 二级：`[j / P, j % P]`
//! - 三级：`[j / P², j / P % P, j % P]`
//!
//! 所有数据块与间接块都在分配时清零，释放时其父指针也随之清零，
//! 因此树中不会残留指向已释放块的指针。

use alloc::vec::Vec;

use vfs::Error;

use crate::efs::{Ext2FileSystem, FsState, Geometry};
use crate::layout::DiskInode;
use crate::{BlockId, Result};

/// 逻辑块在索引树中的位置
#[derive(Debug, Clone, Copy)]
struct BlockPath {
    /// `block`数组中的起点
    root: usize,
    /// 各级间接块内的下标，前`depth`项有效
    indices: [u64; 3],
    depth: usize,
}

impl BlockPath {
    fn indices(&self) -> &[u64] {
        &self.indices[..self.depth]
    }
}

/// 指向某个块的指针所在之处
#[derive(Debug, Clone, Copy)]
enum Slot {
    Inode(usize),
    Indirect(BlockId, u64),
}

impl Geometry {
    fn locate(&self, logical: u64) -> Result<BlockPath> {
        let p = self.ptrs_per_block();

        if logical < Self::DIRECT {
            return Ok(BlockPath {
                root: logical as usize,
                indices: [0; 3],
                depth: 0,
            });
        }

        let j = logical - Self::DIRECT;
        if j < p {
            return Ok(BlockPath {
                root: DiskInode::IND_BLOCK,
                indices: [j, 0, 0],
                depth: 1,
            });
        }

        let j = j - p;
        if j < p * p {
            return Ok(BlockPath {
                root: DiskInode::DIND_BLOCK,
                indices: [j / p, j % p, 0],
                depth: 2,
            });
        }

        let j = j - p * p;
        if j < p * p * p {
            return Ok(BlockPath {
                root: DiskInode::TIND_BLOCK,
                indices: [j / (p * p), j / p % p, j % p],
                depth: 3,
            });
        }

        Err(Error::FileTooLarge)
    }
}

impl Ext2FileSystem {
    /// 逻辑块号对应的物理块号。
    ///
    /// 块号必须小于文件当前的块数；途中遇到空指针说明索引树已损坏。
    pub(crate) fn block_address(&self, inode: &DiskInode, logical: u64) -> Result<BlockId> {
        let path = self.geo().locate(logical)?;

        let mut block = BlockId::new(inode.block[path.root]);
        for &index in path.indices() {
            if block.is_null() {
                break;
            }
            block = self.disk().read_ptr(block, index)?;
        }

        if block.is_null() {
            log::error!("logical block {logical} maps to a hole");
            return Err(Error::Io);
        }
        Ok(block)
    }

    /// 把文件的数据块数从`old`增加到`new`。
    ///
    /// 中途失败时，已分配的块全部归还，块数回到`old`；
    /// 若连回滚也失败，报[`Error::Io`]，此时`i_blocks`与树中实际挂着的块仍然一致。
    pub(crate) fn grow_blocks(
        &self,
        st: &mut FsState,
        ino: u32,
        inode: &mut DiskInode,
        old: u64,
        new: u64,
    ) -> Result<()> {
        if new > self.geo().max_data_blocks() {
            return Err(Error::FileTooLarge);
        }

        let hint = self.geo().group_of_inode(ino);
        for logical in old..new {
            if let Err(err) = self.map_new_block(st, hint, inode, logical) {
                log::debug!("growing inode {ino} stopped at block {logical}: {err}");
                return match self.shrink_blocks(st, inode, logical, old) {
                    Ok(()) => Err(err),
                    Err(undo) => {
                        log::error!("inode {ino}: rollback to {old} blocks failed: {undo}");
                        Err(Error::Io)
                    }
                };
            }
        }
        Ok(())
    }

    /// 为`logical`分配数据块，缺失的间接块一并分配
    fn map_new_block(&self, st: &mut FsState, hint: u32, inode: &mut DiskInode, logical: u64) -> Result<()> {
        let path = self.geo().locate(logical)?;
        let mut fresh = Vec::with_capacity(4);

        let res = self.link_new_blocks(st, hint, inode, &path, &mut fresh);
        if res.is_err() {
            self.unlink_fresh(st, inode, &fresh)?;
        }
        res
    }

    /// 撤销本步新挂上的块，自最深一级起。
    ///
    /// `fresh[k]`挂在`fresh[k - 1]`之下，摘下一块就让它以下的整条链不可达，
    /// `i_blocks`随之扣除整条链。某一步失败也继续向上撤销，最后报[`Error::Io`]。
    fn unlink_fresh(&self, st: &mut FsState, inode: &mut DiskInode, fresh: &[(Slot, BlockId)]) -> Result<()> {
        let spb = self.geo().sectors_per_block();
        let mut reachable = fresh.len();
        let mut res = Ok(());

        for (index, &(slot, block)) in fresh.iter().enumerate().rev() {
            if let Err(err) = self.set_slot(inode, slot, BlockId::NULL) {
                log::error!("cannot unlink new block {block}: {err}");
                res = Err(Error::Io);
                continue;
            }
            inode.blocks -= (reachable - index) as u32 * spb;
            reachable = index;

            if let Err(err) = self.free_block(st, block) {
                log::error!("leaking block {block}: {err}");
                res = Err(Error::Io);
            }
        }
        res
    }

    fn link_new_blocks(
        &self,
        st: &mut FsState,
        hint: u32,
        inode: &mut DiskInode,
        path: &BlockPath,
        fresh: &mut Vec<(Slot, BlockId)>,
    ) -> Result<()> {
        let mut slot = Slot::Inode(path.root);
        let mut current = BlockId::new(inode.block[path.root]);

        for &index in path.indices() {
            if current.is_null() {
                current = self.link_zeroed_block(st, hint, inode, slot, fresh)?;
            }
            slot = Slot::Indirect(current, index);
            current = self.disk().read_ptr(current, index)?;
        }

        if !current.is_null() {
            log::warn!("overwriting stale pointer to block {current}");
        }
        self.link_zeroed_block(st, hint, inode, slot, fresh)?;
        Ok(())
    }

    fn link_zeroed_block(
        &self,
        st: &mut FsState,
        hint: u32,
        inode: &mut DiskInode,
        slot: Slot,
        fresh: &mut Vec<(Slot, BlockId)>,
    ) -> Result<BlockId> {
        let block = self.alloc_block(st, hint)?;
        if let Err(err) = self.disk().zero_block(block) {
            self.free_block(st, block)?;
            return Err(err);
        }
        if let Err(err) = self.set_slot(inode, slot, block) {
            self.free_block(st, block)?;
            return Err(err);
        }
        inode.blocks += self.geo().sectors_per_block();
        fresh.push((slot, block));
        Ok(block)
    }

    fn set_slot(&self, inode: &mut DiskInode, slot: Slot, block: BlockId) -> Result<()> {
        match slot {
            Slot::Inode(index) => {
                inode.block[index] = block.into();
                Ok(())
            }
            Slot::Indirect(parent, index) => self.disk().write_ptr(parent, index, block),
        }
    }

    /// 把文件的数据块数从`old`减少到`new`，自末尾向前逐块释放。
    ///
    /// 间接块在其第0项被释放后变空，随即释放它并清零上一级的指针，逐级向上。
    pub(crate) fn shrink_blocks(&self, st: &mut FsState, inode: &mut DiskInode, old: u64, new: u64) -> Result<()> {
        let spb = self.geo().sectors_per_block();

        for logical in (new..old).rev() {
            let path = self.geo().locate(logical)?;
            let indices = path.indices();

            // chain[k] 是第k级的块，chain[depth] 是数据块
            let mut chain = [BlockId::NULL; 4];
            chain[0] = BlockId::new(inode.block[path.root]);
            let mut reached = 0;
            while reached < path.depth && !chain[reached].is_null() {
                chain[reached + 1] = self.disk().read_ptr(chain[reached], indices[reached])?;
                reached += 1;
            }
            if reached < path.depth {
                log::warn!("logical block {logical} has no indirect block at level {reached}");
                continue;
            }

            let mut level = path.depth;
            if chain[level].is_null() {
                log::warn!("logical block {logical} is already a hole");
            } else {
                self.free_block(st, chain[level])?;
                inode.blocks = inode.blocks.saturating_sub(spb);
            }

            loop {
                if level == 0 {
                    inode.block[path.root] = 0;
                    break;
                }
                let (parent, index) = (chain[level - 1], indices[level - 1]);
                if index != 0 {
                    self.disk().write_ptr(parent, index, BlockId::NULL)?;
                    break;
                }
                // 父块已空
                self.free_block(st, parent)?;
                inode.blocks = inode.blocks.saturating_sub(spb);
                level -= 1;
            }
        }
        Ok(())
    }

    /// 调整文件大小，增减数据块；缩小时把最后一块中新末尾之后的部分清零
    pub(crate) fn resize(&self, st: &mut FsState, ino: u32, inode: &mut DiskInode, size: u64) -> Result<()> {
        let geo = self.geo();
        if size > geo.max_file_size() {
            return Err(Error::FileTooLarge);
        }

        let old_size = inode.size(self.large_file());
        let (old, new) = (geo.data_blocks(old_size), geo.data_blocks(size));
        if new > old {
            self.grow_blocks(st, ino, inode, old, new)?;
        } else if new < old {
            self.shrink_blocks(st, inode, old, new)?;
        }

        let tail = (size % geo.block_size as u64) as usize;
        if size < old_size && tail != 0 {
            let block = self.block_address(inode, new - 1)?;
            let zeros = alloc::vec![0u8; geo.block_size as usize - tail];
            self.disk()
                .write_at(self.disk().offset_of(block) + tail as u64, &zeros)?;
        }

        if inode.is_regular() && size > i32::MAX as u64 {
            self.enable_large_file(st)?;
        }
        inode.set_size(size);
        Ok(())
    }

    /// 读取文件数据，读到文件末尾为止
    pub(crate) fn read_data(&self, inode: &DiskInode, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let size = inode.size(self.large_file());
        if offset >= size {
            return Ok(0);
        }
        let len = buf.len().min((size - offset) as usize);

        let bs = self.geo().block_size as u64;
        let mut done = 0;
        while done < len {
            let pos = offset + done as u64;
            let in_block = (pos % bs) as usize;
            let chunk = (bs as usize - in_block).min(len - done);

            let block = self.block_address(inode, pos / bs)?;
            self.disk().read_at(
                self.disk().offset_of(block) + in_block as u64,
                &mut buf[done..done + chunk],
            )?;
            done += chunk;
        }
        Ok(len)
    }

    /// 写入文件数据，调用者保证范围不超出文件大小
    pub(crate) fn write_data(&self, inode: &DiskInode, offset: u64, buf: &[u8]) -> Result<()> {
        debug_assert!(offset + buf.len() as u64 <= inode.size(self.large_file()));

        let bs = self.geo().block_size as u64;
        let mut done = 0;
        while done < buf.len() {
            let pos = offset + done as u64;
            let in_block = (pos % bs) as usize;
            let chunk = (bs as usize - in_block).min(buf.len() - done);

            let block = self.block_address(inode, pos / bs)?;
            self.disk().write_at(
                self.disk().offset_of(block) + in_block as u64,
                &buf[done..done + chunk],
            )?;
            done += chunk;
        }
        Ok(())
    }
}
