//! # 文件系统层
//!
//! 挂载时解析超级块得到几何参数；之后所有超级块、块组描述符、位图
//! 以及 vnode 表的改动都在同一把锁（[`FsState`]）下串行进行。

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;
use core::mem;
use core::sync::atomic::{AtomicBool, Ordering};

use block_dev::{BlockDevice, SyncFlag};
use enumflags2::BitFlags;
use spin::{Mutex, MutexGuard};
use vfs::{Clock, Error, Timespec};

use crate::disk::Disk;
use crate::layout::{DiskInode, GroupDesc, IncompatFeature, RoCompatFeature, SuperBlock};
use crate::vnode::{Vnode, VnodeCell, VnodeKind};
use crate::{BlockId, MountFlag, ROOT_INO, Result};

/// 由超级块推导出的、挂载期间不变的几何参数
#[derive(Debug, Clone)]
pub struct Geometry {
    pub block_size: u32,
    pub first_data_block: u32,
    pub blocks_count: u64,
    pub blocks_per_group: u32,
    pub inodes_count: u32,
    pub inodes_per_group: u32,
    pub group_count: u32,
    pub desc_size: u32,
    pub inode_size: u32,
    pub first_ino: u32,
    /// INCOMPAT_FILETYPE：目录项中记录文件类型
    pub file_type: bool,
    /// INCOMPAT_64BIT
    pub bit64: bool,
}

impl Geometry {
    /// 直接块的个数
    pub const DIRECT: u64 = DiskInode::N_DIRECT as u64;

    pub fn from_super_block(sb: &SuperBlock) -> Result<Self> {
        if sb.log_block_size > 6 {
            log::error!("unsupported block size: 1024 << {}", sb.log_block_size);
            return Err(Error::NotSupported);
        }
        let block_size = sb.block_size();
        let bits_per_block = block_size * 8;

        if sb.blocks_per_group == 0 || sb.blocks_per_group > bits_per_block {
            log::error!("bad blocks per group: {}", sb.blocks_per_group);
            return Err(Error::InvalidArgument);
        }
        if sb.inodes_per_group == 0 || sb.inodes_per_group > bits_per_block {
            log::error!("bad inodes per group: {}", sb.inodes_per_group);
            return Err(Error::InvalidArgument);
        }

        let inode_size = sb.inode_size();
        if inode_size < DiskInode::GOOD_OLD_SIZE as u32
            || !inode_size.is_power_of_two()
            || inode_size > block_size
        {
            log::error!("bad inode size: {inode_size}");
            return Err(Error::InvalidArgument);
        }

        let bit64 = sb.is_64bit();
        let desc_size = if bit64 {
            sb.desc_size as u32
        } else {
            GroupDesc::GOOD_OLD_SIZE
        };
        if desc_size < GroupDesc::GOOD_OLD_SIZE || desc_size > block_size {
            log::error!("bad group descriptor size: {desc_size}");
            return Err(Error::InvalidArgument);
        }

        let blocks_count = sb.blocks_count();
        if blocks_count <= sb.first_data_block as u64 {
            log::error!("bad block count: {blocks_count}");
            return Err(Error::InvalidArgument);
        }
        if blocks_count > u32::MAX as u64 {
            // 块指针只有32位
            log::error!("{blocks_count} blocks exceed 32-bit block numbers");
            return Err(Error::NotSupported);
        }

        let group_count =
            (blocks_count - sb.first_data_block as u64).div_ceil(sb.blocks_per_group as u64) as u32;
        if group_count as u64 * sb.inodes_per_group as u64 != sb.inodes_count as u64 {
            log::error!(
                "inode count {} disagrees with {group_count} groups of {}",
                sb.inodes_count,
                sb.inodes_per_group
            );
            return Err(Error::InvalidArgument);
        }

        Ok(Self {
            block_size,
            first_data_block: sb.first_data_block,
            blocks_count,
            blocks_per_group: sb.blocks_per_group,
            inodes_count: sb.inodes_count,
            inodes_per_group: sb.inodes_per_group,
            group_count,
            desc_size,
            inode_size,
            first_ino: sb.first_ino(),
            file_type: sb.feature_incompat & IncompatFeature::FileType as u32 != 0,
            bit64,
        })
    }

    /// 一个间接块可容纳的块指针数
    #[inline]
    pub fn ptrs_per_block(&self) -> u64 {
        self.block_size as u64 / 4
    }

    #[inline]
    pub fn sectors_per_block(&self) -> u32 {
        self.block_size / 512
    }

    /// 块组描述符表紧随超级块所在的块
    pub fn desc_table_offset(&self) -> u64 {
        2048u64.next_multiple_of(self.block_size as u64)
    }

    pub fn desc_offset(&self, group: u32) -> u64 {
        self.desc_table_offset() + group as u64 * self.desc_size as u64
    }

    /// 描述符是否带有高32字节
    #[inline]
    pub fn wide_desc(&self) -> bool {
        self.desc_size >= GroupDesc::MAX_KNOWN_SIZE
    }

    /// 实际读写的描述符字节数
    pub fn desc_len(&self) -> usize {
        self.desc_size.min(GroupDesc::MAX_KNOWN_SIZE) as usize
    }

    /// 实际读写的索引节点字节数
    pub fn inode_len(&self) -> usize {
        (self.inode_size as usize).min(mem::size_of::<DiskInode>())
    }

    pub fn group_of_inode(&self, ino: u32) -> u32 {
        (ino - 1) / self.inodes_per_group
    }

    /// 块组的第一个块
    pub fn group_first_block(&self, group: u32) -> u64 {
        self.first_data_block as u64 + group as u64 * self.blocks_per_group as u64
    }

    /// 块组实际拥有的块数，最后一个块组可能不满
    pub fn blocks_in_group(&self, group: u32) -> u32 {
        (self.blocks_count - self.group_first_block(group)).min(self.blocks_per_group as u64) as u32
    }

    /// 容纳`size`字节需要的数据块数
    #[inline]
    pub fn data_blocks(&self, size: u64) -> u64 {
        size.div_ceil(self.block_size as u64)
    }

    /// 三级间接索引所能寻址的最大数据块数
    pub fn max_data_blocks(&self) -> u64 {
        let p = self.ptrs_per_block();
        Self::DIRECT + p + p * p + p * p * p
    }

    /// 文件大小上限：既受索引树限制，也受32位`i_blocks`（512字节扇区）限制
    pub fn max_file_size(&self) -> u64 {
        let spb = self.sectors_per_block() as u64;
        let by_sectors = u32::MAX as u64 / spb;
        // 为间接块预留空间
        let by_sectors = by_sectors - by_sectors.div_ceil(self.ptrs_per_block() - 1) - 3;
        self.max_data_blocks().min(by_sectors) * self.block_size as u64
    }

    /// 容纳`size`字节需要的块总数：数据块加上各级间接块
    pub fn block_count(&self, size: u64) -> u64 {
        let p = self.ptrs_per_block();
        let data = self.data_blocks(size);
        let mut total = data;

        // 一级间接块
        if data > Self::DIRECT {
            total += 1;
        }

        // 二级：顶层块 + 若干一级块
        let single_end = Self::DIRECT + p;
        if data > single_end {
            let rest = (data - single_end).min(p * p);
            total += 1 + rest.div_ceil(p);
        }

        // 三级：顶层块 + 若干二级块 + 若干一级块
        let double_end = single_end + p * p;
        if data > double_end {
            let rest = data - double_end;
            total += 1 + rest.div_ceil(p * p) + rest.div_ceil(p);
        }

        total
    }
}

/// 受文件系统锁保护的可变状态
#[derive(Debug)]
pub(crate) struct FsState {
    pub sb: SuperBlock,
    vnodes: BTreeMap<u32, VnodeSlot>,
}

/// vnode 表中的一项；引用计数显式维护，而非依赖`Arc`的强引用数
#[derive(Debug)]
struct VnodeSlot {
    refs: usize,
    cell: Arc<VnodeCell>,
}

pub struct Ext2FileSystem {
    disk: Disk,
    geo: Geometry,
    clock: Arc<dyn Clock>,
    mount_path: String,
    read_only: bool,
    /// RO_COMPAT_LARGE_FILE，会在写入大文件时被打开
    large_file: AtomicBool,
    state: Mutex<FsState>,
}

impl fmt::Debug for Ext2FileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ext2FileSystem")
            .field("mount_path", &self.mount_path)
            .field("geometry", &self.geo)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl Ext2FileSystem {
    /// 挂载设备上的文件系统。
    ///
    /// 魔数不符报[`Error::InvalidArgument`]，含未知 INCOMPAT 特性报[`Error::NotSupported`]，
    /// 二者都不会改动设备；含未知 RO_COMPAT 特性时强制只读挂载。
    pub fn initialize(
        dev: Arc<dyn BlockDevice>,
        clock: Arc<dyn Clock>,
        mount_path: &str,
        flags: BitFlags<MountFlag>,
    ) -> Result<Arc<Self>> {
        let probe = Disk::new(dev.clone(), 1024);
        let mut sb: SuperBlock =
            probe.read_struct(SuperBlock::OFFSET, mem::size_of::<SuperBlock>())?;

        if sb.magic != SuperBlock::MAGIC {
            log::error!("bad magic {:#06x} on {mount_path}", sb.magic);
            return Err(Error::InvalidArgument);
        }

        let unknown = sb.unknown_incompat();
        if unknown != 0 {
            log::error!("unsupported incompatible features {unknown:#x} on {mount_path}");
            return Err(Error::NotSupported);
        }

        let geo = Geometry::from_super_block(&sb)?;

        let mut read_only = flags.contains(MountFlag::ReadOnly);
        let unknown = sb.unknown_ro_compat();
        if unknown != 0 && !read_only {
            log::warn!("unknown ro-compat features {unknown:#x}, mounting {mount_path} read-only");
            read_only = true;
        }

        let disk = Disk::new(dev, geo.block_size);
        if !read_only {
            if sb.state & SuperBlock::STATE_VALID == 0 {
                log::warn!("{mount_path} was not cleanly unmounted");
            }
            let now = clock.now().sec as u32;
            sb.state &= !SuperBlock::STATE_VALID;
            sb.mnt_count = sb.mnt_count.wrapping_add(1);
            sb.mtime = now;
            sb.wtime = now;
            disk.write_struct(SuperBlock::OFFSET, &sb, mem::size_of::<SuperBlock>())?;
        }

        log::info!(
            "mounted ext2 on {mount_path}: block size {}, {} groups, {} blocks ({} free), \
             {} inodes ({} free), inode size {}, desc size {}{}",
            geo.block_size,
            geo.group_count,
            geo.blocks_count,
            sb.free_blocks_count(),
            geo.inodes_count,
            sb.free_inodes_count,
            geo.inode_size,
            geo.desc_size,
            if read_only { ", read-only" } else { "" },
        );

        Ok(Arc::new(Self {
            disk,
            geo,
            clock,
            mount_path: String::from(mount_path),
            read_only,
            large_file: AtomicBool::new(sb.has_ro_compat(RoCompatFeature::LargeFile)),
            state: Mutex::new(FsState {
                sb,
                vnodes: BTreeMap::new(),
            }),
        }))
    }

    pub fn root_dir(self: &Arc<Self>) -> Result<Vnode> {
        self.vnode(ROOT_INO)
    }

    /// 按索引节点号取得 vnode；不在表中时从磁盘读入并登记。
    ///
    /// 查表与登记处于同一临界区，所以同一索引节点至多存在一个 vnode。
    pub fn vnode(self: &Arc<Self>, ino: u32) -> Result<Vnode> {
        let mut st = self.lock();
        self.acquire(&mut st, ino)
    }

    /// 把所有脏索引节点与超级块写回，再同步设备
    pub fn sync(&self, flags: BitFlags<SyncFlag>) -> Result<()> {
        let mut st = self.lock();
        for (&ino, slot) in &st.vnodes {
            let mut inner = slot.cell.inner.lock();
            if inner.dirty {
                self.write_inode(ino, &inner.inode)?;
                inner.dirty = false;
            }
        }
        if !self.read_only {
            st.sb.wtime = self.now().sec as u32;
            self.write_super_block(&st.sb)?;
        }
        self.disk.sync(flags)
    }

    /// 卸载前的收尾：仍有打开的 vnode 时报[`Error::Busy`]
    pub fn on_unmount(&self) -> Result<()> {
        let mut st = self.lock();
        if !st.vnodes.is_empty() {
            log::warn!(
                "cannot unmount {}: {} vnodes still open",
                self.mount_path,
                st.vnodes.len()
            );
            return Err(Error::Busy);
        }

        if !self.read_only {
            st.sb.state |= SuperBlock::STATE_VALID;
            st.sb.wtime = self.now().sec as u32;
            self.write_super_block(&st.sb)?;
        }
        self.disk.sync(BitFlags::all())?;
        log::info!("unmounted {}", self.mount_path);
        Ok(())
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geo
    }

    pub fn mount_path(&self) -> &str {
        &self.mount_path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn free_blocks(&self) -> u64 {
        self.lock().sb.free_blocks_count()
    }

    pub fn free_inodes(&self) -> u32 {
        self.lock().sb.free_inodes_count
    }

    /// 索引节点当前的引用数，不在表中时为0
    pub fn vnode_refs(&self, ino: u32) -> usize {
        self.lock().vnodes.get(&ino).map_or(0, |slot| slot.refs)
    }

    /// 表中 vnode 的个数
    pub fn open_vnodes(&self) -> usize {
        self.lock().vnodes.len()
    }
}

/* 供其它层使用的内部接口 */
impl Ext2FileSystem {
    #[inline]
    pub(crate) fn lock(&self) -> MutexGuard<'_, FsState> {
        self.state.lock()
    }

    #[inline]
    pub(crate) fn disk(&self) -> &Disk {
        &self.disk
    }

    #[inline]
    pub(crate) fn geo(&self) -> &Geometry {
        &self.geo
    }

    #[inline]
    pub(crate) fn now(&self) -> Timespec {
        self.clock.now()
    }

    #[inline]
    pub(crate) fn large_file(&self) -> bool {
        self.large_file.load(Ordering::Acquire)
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        if self.read_only {
            Err(Error::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// 普通文件超过2GiB时打开 RO_COMPAT_LARGE_FILE
    pub(crate) fn enable_large_file(&self, st: &mut FsState) -> Result<()> {
        if self.large_file() {
            return Ok(());
        }
        log::info!("enabling large_file feature on {}", self.mount_path);
        st.sb.feature_ro_compat |= RoCompatFeature::LargeFile as u32;
        self.write_super_block(&st.sb)?;
        self.large_file.store(true, Ordering::Release);
        Ok(())
    }

    pub(crate) fn write_super_block(&self, sb: &SuperBlock) -> Result<()> {
        self.disk
            .write_struct(SuperBlock::OFFSET, sb, mem::size_of::<SuperBlock>())
    }

    pub(crate) fn read_group_desc(&self, group: u32) -> Result<GroupDesc> {
        debug_assert!(group < self.geo.group_count);
        self.disk
            .read_struct(self.geo.desc_offset(group), self.geo.desc_len())
    }

    pub(crate) fn write_group_desc(&self, group: u32, desc: &GroupDesc) -> Result<()> {
        self.disk
            .write_struct(self.geo.desc_offset(group), desc, self.geo.desc_len())
    }

    /// 索引节点在设备上的字节偏移
    fn inode_offset(&self, ino: u32) -> Result<u64> {
        if ino == 0 || ino > self.geo.inodes_count {
            log::error!("inode number {ino} out of range");
            return Err(Error::Io);
        }

        let group = self.geo.group_of_inode(ino);
        let index = (ino - 1) % self.geo.inodes_per_group;
        let table = self.read_group_desc(group)?.inode_table(self.geo.wide_desc());
        let table = u32::try_from(table).map_err(|_| Error::Io)?;

        Ok(self.disk.offset_of(BlockId::new(table)) + index as u64 * self.geo.inode_size as u64)
    }

    pub(crate) fn read_inode(&self, ino: u32) -> Result<DiskInode> {
        let offset = self.inode_offset(ino)?;
        self.disk.read_struct(offset, self.geo.inode_len())
    }

    pub(crate) fn write_inode(&self, ino: u32, inode: &DiskInode) -> Result<()> {
        let offset = self.inode_offset(ino)?;
        self.disk.write_struct(offset, inode, self.geo.inode_len())
    }

    /// 取得索引节点的当前内容：已缓存则取内存副本，否则读盘
    pub(crate) fn peek_inode(&self, st: &FsState, ino: u32) -> Result<DiskInode> {
        match st.vnodes.get(&ino) {
            Some(slot) => Ok(slot.cell.inner.lock().inode),
            None => self.read_inode(ino),
        }
    }

    /// 修改一个索引节点。
    ///
    /// 已缓存时改内存副本并置脏，由销毁或同步写回；
    /// 否则读盘、修改，`f`成功才写回，链接数降为0时当场回收。
    pub(crate) fn with_inode<R>(
        &self,
        st: &mut FsState,
        ino: u32,
        f: impl FnOnce(&mut FsState, &mut DiskInode) -> Result<R>,
    ) -> Result<R> {
        if let Some(cell) = st.vnodes.get(&ino).map(|slot| slot.cell.clone()) {
            let mut inner = cell.inner.lock();
            let res = f(st, &mut inner.inode);
            inner.dirty = true;
            return res;
        }

        let mut inode = self.read_inode(ino)?;
        let value = f(st, &mut inode)?;
        self.write_inode(ino, &inode)?;
        if inode.links_count == 0 {
            self.reclaim(st, ino, &mut inode)?;
        }
        Ok(value)
    }

    /// 取得 vnode 的一个引用，调用者已持有文件系统锁。
    ///
    /// 返回的[`Vnode`]在析构时会再次加锁，所以必须在释放锁之后才能丢弃它。
    pub(crate) fn acquire(self: &Arc<Self>, st: &mut FsState, ino: u32) -> Result<Vnode> {
        if let Some(slot) = st.vnodes.get_mut(&ino) {
            slot.refs += 1;
            return Ok(Vnode::new(self.clone(), slot.cell.clone()));
        }

        let inode = self.read_inode(ino)?;
        if inode.links_count == 0 {
            log::error!("directory entry refers to free inode {ino}");
            return Err(Error::Io);
        }
        let kind = VnodeKind::from_mode(inode.mode).ok_or_else(|| {
            log::debug!("inode {ino} has unsupported mode {:#o}", inode.mode);
            Error::NotSupported
        })?;

        log::trace!("vnode {ino} cached ({kind:?})");
        let cell = Arc::new(VnodeCell::new(ino, kind, inode));
        st.vnodes.insert(
            ino,
            VnodeSlot {
                refs: 1,
                cell: cell.clone(),
            },
        );
        Ok(Vnode::new(self.clone(), cell))
    }

    pub(crate) fn retain(&self, ino: u32) {
        match self.lock().vnodes.get_mut(&ino) {
            Some(slot) => slot.refs += 1,
            None => log::error!("retaining vnode {ino} absent from the table"),
        }
    }

    /// 放弃一个引用；最后一个引用消失时，先把表项移出再销毁，整个过程都在锁内
    pub(crate) fn release(&self, ino: u32) {
        let mut st = self.lock();
        let Some(slot) = st.vnodes.get_mut(&ino) else {
            log::error!("releasing vnode {ino} absent from the table");
            return;
        };
        if slot.refs > 1 {
            slot.refs -= 1;
            return;
        }

        if let Some(slot) = st.vnodes.remove(&ino) {
            if let Err(err) = self.destroy(&mut st, &slot.cell) {
                log::error!("failed to write back vnode {ino}: {err}");
            }
        }
    }

    fn destroy(&self, st: &mut FsState, cell: &VnodeCell) -> Result<()> {
        let ino = cell.ino;
        let mut inner = cell.inner.lock();

        if inner.inode.links_count == 0 && !self.read_only {
            log::debug!("reclaiming unlinked inode {ino}");
            inner.dirty = false;
            return self.reclaim(st, ino, &mut inner.inode);
        }

        if inner.dirty {
            self.write_inode(ino, &inner.inode)?;
            inner.dirty = false;
        }
        log::trace!("vnode {ino} dropped");
        Ok(())
    }

    /// 释放已无链接的索引节点：截断到0，再归还索引节点本身
    pub(crate) fn reclaim(&self, st: &mut FsState, ino: u32, inode: &mut DiskInode) -> Result<()> {
        let is_dir = inode.is_dir();
        if inode.is_fast_symlink() {
            inode.block = [0; DiskInode::N_BLOCKS];
            inode.set_size(0);
        } else {
            self.resize(st, ino, inode, 0)?;
        }
        inode.dtime = self.now().sec as u32;
        self.write_inode(ino, inode)?;
        self.free_inode(st, ino, is_dir)
    }
}
