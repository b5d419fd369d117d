//! # 索引节点层
//!
//! 每个被打开的索引节点在内存中至多有一个 [`VnodeCell`]，登记在文件系统的 vnode 表里；
//! [`Vnode`] 是指向它的计数句柄，克隆与析构都在文件系统锁内增减引用计数。
//!
//! ## 加锁顺序
//!
//! 先文件系统锁，后 vnode 锁。读、不扩展文件的写只拿 vnode 锁；
//! 其余会改动目录、位图或计数的操作都先拿文件系统锁。
//! 持有文件系统锁时不能丢弃任何 [`Vnode`]。

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use enumflags2::BitFlags;
use spin::Mutex;
use vfs::{DirEntry, Error, Node, Stat, Timespec};

use crate::dir::check_name;
use crate::efs::{Ext2FileSystem, FsState};
use crate::layout::{DiskInode, FileType, InodeMode};
use crate::{OpenFlag, ROOT_INO, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VnodeKind {
    RegularFile,
    Directory,
    Symlink,
}

impl VnodeKind {
    pub(crate) fn from_mode(mode: u16) -> Option<Self> {
        match mode & InodeMode::TYPE_MASK {
            InodeMode::REGULAR => Some(Self::RegularFile),
            InodeMode::DIRECTORY => Some(Self::Directory),
            InodeMode::SYMLINK => Some(Self::Symlink),
            _ => None,
        }
    }
}

/// 内存中的索引节点
#[derive(Debug)]
pub(crate) struct VnodeCell {
    pub ino: u32,
    pub kind: VnodeKind,
    pub inner: Mutex<VnodeInner>,
}

#[derive(Debug)]
pub(crate) struct VnodeInner {
    pub inode: DiskInode,
    /// 内存副本比磁盘上的新
    pub dirty: bool,
}

impl VnodeCell {
    pub fn new(ino: u32, kind: VnodeKind, inode: DiskInode) -> Self {
        Self {
            ino,
            kind,
            inner: Mutex::new(VnodeInner {
                inode,
                dirty: false,
            }),
        }
    }
}

pub struct Vnode {
    fs: Arc<Ext2FileSystem>,
    cell: Arc<VnodeCell>,
}

impl Clone for Vnode {
    fn clone(&self) -> Self {
        self.fs.retain(self.cell.ino);
        Self {
            fs: self.fs.clone(),
            cell: self.cell.clone(),
        }
    }
}

impl Drop for Vnode {
    fn drop(&mut self) {
        self.fs.release(self.cell.ino);
    }
}

impl fmt::Debug for Vnode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vnode")
            .field("ino", &self.cell.ino)
            .field("kind", &self.cell.kind)
            .finish()
    }
}

fn is_dot(name: &[u8]) -> bool {
    name == b"." || name == b".."
}

impl Vnode {
    /// 引用计数已由调用者记入 vnode 表
    pub(crate) fn new(fs: Arc<Ext2FileSystem>, cell: Arc<VnodeCell>) -> Self {
        Self { fs, cell }
    }

    #[inline]
    pub fn ino(&self) -> u32 {
        self.cell.ino
    }

    #[inline]
    pub fn kind(&self) -> VnodeKind {
        self.cell.kind
    }

    pub fn fs(&self) -> &Arc<Ext2FileSystem> {
        &self.fs
    }

    fn expect_dir(&self) -> Result<()> {
        if self.kind() == VnodeKind::Directory {
            Ok(())
        } else {
            Err(Error::NotADirectory)
        }
    }

    fn expect_same_fs(&self, other: &Vnode) -> Result<()> {
        if Arc::ptr_eq(&self.fs, &other.fs) {
            Ok(())
        } else {
            Err(Error::CrossDevice)
        }
    }

    pub fn stat(&self) -> Result<Stat> {
        let inner = self.cell.inner.lock();
        let inode = &inner.inode;
        Ok(Stat {
            ino: self.ino() as u64,
            ty: inode.entry_type(),
            perm: inode.mode & InodeMode::PERM_MASK,
            links: inode.links_count as u32,
            uid: inode.uid(),
            gid: inode.gid(),
            size: inode.size(self.fs.large_file()),
            block_size: self.fs.geometry().block_size as u64,
            blocks: inode.blocks as u64,
            atime: inode.atime(),
            mtime: inode.mtime(),
            ctime: inode.ctime(),
        })
    }

    /// 在本目录下查找`name`；`..`在根目录下指向根目录自身
    pub fn lookup(&self, name: &str) -> Result<Vnode> {
        self.open(name, BitFlags::empty(), 0)
    }

    /// 打开或创建本目录下的`name`，新建的总是普通文件
    pub fn open(&self, name: &str, flags: BitFlags<OpenFlag>, perm: u16) -> Result<Vnode> {
        self.expect_dir()?;
        let exclusive = flags.contains(OpenFlag::Create | OpenFlag::Exclusive);
        if name == "." {
            return if exclusive {
                Err(Error::AlreadyExists)
            } else {
                Ok(self.clone())
            };
        }
        let name = check_name(name)?;

        let fs = &self.fs;
        let mut st = fs.lock();
        let dir = fs.peek_inode(&st, self.ino())?;
        let vnode = match fs.find_entry(&dir, name)? {
            Some(_) if exclusive => return Err(Error::AlreadyExists),
            Some((_, ino)) => fs.acquire(&mut st, ino)?,
            None if !flags.contains(OpenFlag::Create) => return Err(Error::NotFound),
            None => {
                fs.check_writable()?;
                let mode = InodeMode::REGULAR | perm & InodeMode::PERM_MASK;
                let ino = fs.create_node(&mut st, self.ino(), name, mode, |_, _, _, _| Ok(()))?;
                fs.acquire(&mut st, ino)?
            }
        };
        drop(st);

        if flags.contains(OpenFlag::Truncate) && vnode.kind() == VnodeKind::RegularFile {
            vnode.ftruncate(0)?;
        }
        Ok(vnode)
    }

    pub fn mkdir(&self, name: &str, perm: u16) -> Result<Vnode> {
        self.expect_dir()?;
        self.fs.check_writable()?;
        let name = check_name(name)?;

        let fs = &self.fs;
        let parent = self.ino();
        let mut st = fs.lock();
        let mode = InodeMode::DIRECTORY | perm & InodeMode::PERM_MASK;
        let ino = fs.create_node(&mut st, parent, name, mode, |fs, st, ino, inode| {
            fs.grow_blocks(st, ino, inode, 0, 1)?;
            inode.set_size(fs.geometry().block_size as u64);
            let block = fs.block_address(inode, 0)?;
            fs.init_dir_block(block, ino, parent)
        })?;
        fs.acquire(&mut st, ino)
    }

    /// 目标短于60字节时存放在索引节点内，否则占用一个数据块
    pub fn symlink(&self, name: &str, target: &str) -> Result<Vnode> {
        self.expect_dir()?;
        self.fs.check_writable()?;
        let name = check_name(name)?;
        let target = target.as_bytes();
        if target.is_empty() {
            return Err(Error::NotFound);
        }
        if target.len() > self.fs.geometry().block_size as usize {
            return Err(Error::NameTooLong);
        }

        let fs = &self.fs;
        let mut st = fs.lock();
        let mode = InodeMode::SYMLINK | 0o777;
        let ino = fs.create_node(&mut st, self.ino(), name, mode, |fs, st, ino, inode| {
            if target.len() < DiskInode::FAST_SYMLINK_MAX {
                inode.set_inline_data(target);
                Ok(())
            } else {
                fs.resize(st, ino, inode, target.len() as u64)?;
                fs.write_data(inode, 0, target)
            }
        })?;
        fs.acquire(&mut st, ino)
    }

    /// 为`target`在本目录下建立硬链接
    pub fn link(&self, name: &str, target: &Vnode) -> Result<()> {
        self.expect_dir()?;
        self.expect_same_fs(target)?;
        if target.kind() == VnodeKind::Directory {
            return Err(Error::PermissionDenied);
        }
        self.fs.check_writable()?;
        let name = check_name(name)?;

        let fs = &self.fs;
        let mut st = fs.lock();
        let dir = fs.peek_inode(&st, self.ino())?;
        if dir.links_count == 0 {
            return Err(Error::NotFound);
        }
        if fs.find_entry(&dir, name)?.is_some() {
            return Err(Error::AlreadyExists);
        }
        let inode = fs.peek_inode(&st, target.ino())?;
        if inode.links_count == 0 {
            return Err(Error::NotFound);
        }
        if inode.links_count >= DiskInode::LINK_MAX {
            return Err(Error::TooManyLinks);
        }

        let now = fs.now();
        let ty = FileType::from(inode.entry_type());
        fs.with_inode(&mut st, self.ino(), |st, dir| {
            fs.add_entry(st, self.ino(), dir, name, target.ino(), ty)?;
            dir.set_mtime(now);
            dir.set_ctime(now);
            Ok(())
        })?;
        fs.with_inode(&mut st, target.ino(), |_, inode| {
            inode.links_count += 1;
            inode.set_ctime(now);
            Ok(())
        })
    }

    /// 删除目录项；目标是目录时要求它为空
    pub fn unlink(&self, name: &str) -> Result<()> {
        self.expect_dir()?;
        self.fs.check_writable()?;
        let name = check_name(name)?;
        if is_dot(name) {
            return Err(Error::InvalidArgument);
        }

        let mut st = self.fs.lock();
        self.fs.unlink_entry(&mut st, self.ino(), name)
    }

    pub fn rmdir(&self, name: &str) -> Result<()> {
        self.expect_dir()?;
        self.fs.check_writable()?;
        let name = check_name(name)?;
        if is_dot(name) {
            return Err(Error::InvalidArgument);
        }

        let fs = &self.fs;
        let mut st = fs.lock();
        let dir = fs.peek_inode(&st, self.ino())?;
        let (_, ino) = fs.find_entry(&dir, name)?.ok_or(Error::NotFound)?;
        if !fs.peek_inode(&st, ino)?.is_dir() {
            return Err(Error::NotADirectory);
        }
        fs.unlink_entry(&mut st, self.ino(), name)
    }

    /// 把本目录下的`old_name`移到`new_dir`下，命名为`new_name`
    pub fn rename(&self, old_name: &str, new_dir: &Vnode, new_name: &str) -> Result<()> {
        self.expect_dir()?;
        new_dir.expect_dir()?;
        self.expect_same_fs(new_dir)?;
        self.fs.check_writable()?;
        let old_name = check_name(old_name)?;
        let new_name = check_name(new_name)?;
        if is_dot(old_name) || is_dot(new_name) {
            return Err(Error::InvalidArgument);
        }

        let mut st = self.fs.lock();
        self.fs
            .rename_entry(&mut st, self.ino(), old_name, new_dir.ino(), new_name)
    }

    pub fn readlink(&self) -> Result<String> {
        if self.kind() != VnodeKind::Symlink {
            return Err(Error::InvalidArgument);
        }

        let inner = self.cell.inner.lock();
        let inode = &inner.inode;
        let target = if inode.is_fast_symlink() {
            inode.inline_data().to_vec()
        } else {
            let mut buf = vec![0u8; inode.size(false) as usize];
            let len = self.fs.read_data(inode, 0, &mut buf)?;
            buf.truncate(len);
            buf
        };
        Ok(String::from_utf8_lossy(&target).into_owned())
    }

    fn expect_file(&self) -> Result<()> {
        match self.kind() {
            VnodeKind::RegularFile => Ok(()),
            VnodeKind::Directory => Err(Error::IsADirectory),
            VnodeKind::Symlink => Err(Error::InvalidArgument),
        }
    }

    /// 从`offset`读，读到文件末尾为止
    pub fn pread(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.expect_file()?;
        let inner = self.cell.inner.lock();
        self.fs.read_data(&inner.inode, offset, buf)
    }

    /// 在`offset`处写，必要时扩展文件，中间的空洞以0填充
    pub fn pwrite(&self, buf: &[u8], offset: u64) -> Result<usize> {
        self.expect_file()?;
        self.fs.check_writable()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let fs = &self.fs;
        let end = offset
            .checked_add(buf.len() as u64)
            .filter(|&end| end <= fs.geometry().max_file_size())
            .ok_or(Error::FileTooLarge)?;
        let now = fs.now();

        {
            let mut inner = self.cell.inner.lock();
            if end <= inner.inode.size(fs.large_file()) {
                fs.write_data(&inner.inode, offset, buf)?;
                inner.inode.set_mtime(now);
                inner.inode.set_ctime(now);
                inner.dirty = true;
                return Ok(buf.len());
            }
        }

        let mut st = fs.lock();
        let mut inner = self.cell.inner.lock();
        if end > inner.inode.size(fs.large_file()) {
            let res = fs.resize(&mut st, self.ino(), &mut inner.inode, end);
            inner.dirty = true;
            res?;
        }
        drop(st);

        fs.write_data(&inner.inode, offset, buf)?;
        inner.inode.set_mtime(now);
        inner.inode.set_ctime(now);
        inner.dirty = true;
        Ok(buf.len())
    }

    pub fn ftruncate(&self, size: u64) -> Result<()> {
        self.expect_file()?;
        self.fs.check_writable()?;
        let fs = &self.fs;
        if size > fs.geometry().max_file_size() {
            return Err(Error::FileTooLarge);
        }

        let now = fs.now();
        let mut st = fs.lock();
        let mut inner = self.cell.inner.lock();
        let res = fs.resize(&mut st, self.ino(), &mut inner.inode, size);
        inner.dirty = true;
        res?;
        inner.inode.set_mtime(now);
        inner.inode.set_ctime(now);
        Ok(())
    }

    /// 修改内存中的索引节点并置脏
    fn update(&self, f: impl FnOnce(&mut DiskInode)) -> Result<()> {
        self.fs.check_writable()?;
        let now = self.fs.now();
        let mut inner = self.cell.inner.lock();
        f(&mut inner.inode);
        inner.inode.set_ctime(now);
        inner.dirty = true;
        Ok(())
    }

    pub fn chmod(&self, perm: u16) -> Result<()> {
        self.update(|inode| {
            inode.mode = inode.mode & InodeMode::TYPE_MASK | perm & InodeMode::PERM_MASK;
        })
    }

    pub fn chown(&self, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        self.update(|inode| {
            if let Some(uid) = uid {
                inode.set_uid(uid);
            }
            if let Some(gid) = gid {
                inode.set_gid(gid);
            }
        })
    }

    pub fn utimens(&self, atime: Option<Timespec>, mtime: Option<Timespec>) -> Result<()> {
        self.update(|inode| {
            if let Some(atime) = atime {
                inode.set_atime(atime);
            }
            if let Some(mtime) = mtime {
                inode.set_mtime(mtime);
            }
        })
    }

    /// 目录流记录，格式见 [`vfs::DirentWriter`]
    pub fn getdents(&self) -> Result<Vec<u8>> {
        self.expect_dir()?;
        let st = self.fs.lock();
        let dir = self.fs.peek_inode(&st, self.ino())?;
        self.fs.getdents(&dir)
    }

    pub fn entries(&self) -> Result<Vec<DirEntry>> {
        self.expect_dir()?;
        let st = self.fs.lock();
        let dir = self.fs.peek_inode(&st, self.ino())?;
        self.fs.dir_entries(&dir)
    }

    /// 写回索引节点并同步设备
    pub fn fsync(&self) -> Result<()> {
        {
            let mut inner = self.cell.inner.lock();
            if inner.dirty {
                self.fs.write_inode(self.ino(), &inner.inode)?;
                inner.dirty = false;
            }
        }
        self.fs.disk().sync(BitFlags::all())
    }
}

impl Node for Vnode {
    fn stat(&self) -> Result<Stat> {
        Vnode::stat(self)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.pread(buf, offset)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        self.pwrite(buf, offset)
    }

    fn getdents(&self) -> Result<Vec<u8>> {
        Vnode::getdents(self)
    }

    fn readlink(&self) -> Result<String> {
        Vnode::readlink(self)
    }

    fn fsync(&self) -> Result<()> {
        Vnode::fsync(self)
    }
}

/* 需要文件系统锁的目录操作 */
impl Ext2FileSystem {
    /// 分配并初始化新索引节点，再把它加入`parent`目录。
    ///
    /// `fill`负责填充内容；任何一步失败都会归还已分配的索引节点与块。
    fn create_node(
        &self,
        st: &mut FsState,
        parent: u32,
        name: &[u8],
        mode: u16,
        fill: impl FnOnce(&Self, &mut FsState, u32, &mut DiskInode) -> Result<()>,
    ) -> Result<u32> {
        let dir = self.peek_inode(st, parent)?;
        if dir.links_count == 0 {
            return Err(Error::NotFound);
        }
        if self.find_entry(&dir, name)?.is_some() {
            return Err(Error::AlreadyExists);
        }
        let is_dir = mode & InodeMode::TYPE_MASK == InodeMode::DIRECTORY;
        if is_dir && dir.links_count >= DiskInode::LINK_MAX {
            return Err(Error::TooManyLinks);
        }

        let now = self.now();
        let ino = self.alloc_inode(st, self.geometry().group_of_inode(parent), is_dir)?;
        let mut inode = DiskInode::new(mode, now, self.geometry().inode_size);
        inode.links_count = if is_dir { 2 } else { 1 };

        let res = fill(self, st, ino, &mut inode).and_then(|()| {
            self.write_inode(ino, &inode)?;
            self.with_inode(st, parent, |st, dir| {
                self.add_entry(st, parent, dir, name, ino, FileType::from(inode.entry_type()))?;
                if is_dir {
                    dir.links_count += 1;
                }
                dir.set_mtime(now);
                dir.set_ctime(now);
                Ok(())
            })
        });

        if let Err(err) = res {
            log::debug!("creating inode {ino} in directory {parent} failed: {err}");
            inode.links_count = 0;
            if let Err(undo) = self.reclaim(st, ino, &mut inode) {
                log::error!("failed to release inode {ino}: {undo}");
            }
            return Err(err);
        }
        log::debug!("created inode {ino} ({mode:#o}) in directory {parent}");
        Ok(ino)
    }

    /// 删除目录项并减少目标的链接数；目录只有为空时才能删除
    fn unlink_entry(&self, st: &mut FsState, dir_ino: u32, name: &[u8]) -> Result<()> {
        let dir = self.peek_inode(st, dir_ino)?;
        let (pos, ino) = self.find_entry(&dir, name)?.ok_or(Error::NotFound)?;
        let child = self.peek_inode(st, ino)?;
        let is_dir = child.is_dir();
        if is_dir && !self.is_empty_dir(&child)? {
            return Err(Error::DirectoryNotEmpty);
        }

        self.clear_entry(pos)?;
        let now = self.now();
        self.with_inode(st, ino, |_, inode| {
            // 空目录的两个链接（父目录中的项与`.`）一起消失
            inode.links_count = if is_dir {
                0
            } else {
                inode.links_count.saturating_sub(1)
            };
            inode.set_ctime(now);
            Ok(())
        })?;
        self.with_inode(st, dir_ino, |_, dir| {
            if is_dir {
                dir.links_count = dir.links_count.saturating_sub(1);
            }
            dir.set_mtime(now);
            dir.set_ctime(now);
            Ok(())
        })
    }

    /// `dir`是否等于`ancestor`或位于其下
    fn is_descendant(&self, st: &FsState, mut dir: u32, ancestor: u32) -> Result<bool> {
        for _ in 0..self.geometry().inodes_count {
            if dir == ancestor {
                return Ok(true);
            }
            if dir == ROOT_INO {
                return Ok(false);
            }
            let inode = self.peek_inode(st, dir)?;
            let (_, parent) = self.find_entry(&inode, b"..")?.ok_or(Error::Io)?;
            if parent == dir {
                return Ok(false);
            }
            dir = parent;
        }
        log::error!("directory {dir} has a cyclic parent chain");
        Err(Error::Io)
    }

    /// 先加新项、后删旧项；所有类型检查都在改动之前完成
    fn rename_entry(
        &self,
        st: &mut FsState,
        old_dir: u32,
        old_name: &[u8],
        new_dir: u32,
        new_name: &[u8],
    ) -> Result<()> {
        let src_parent = self.peek_inode(st, old_dir)?;
        let (_, src_ino) = self.find_entry(&src_parent, old_name)?.ok_or(Error::NotFound)?;
        if old_dir == new_dir && old_name == new_name {
            return Ok(());
        }

        let src = self.peek_inode(st, src_ino)?;
        let src_is_dir = src.is_dir();
        let moves_dir = src_is_dir && old_dir != new_dir;

        let dst_parent = self.peek_inode(st, new_dir)?;
        if dst_parent.links_count == 0 {
            return Err(Error::NotFound);
        }
        if moves_dir && self.is_descendant(st, new_dir, src_ino)? {
            return Err(Error::InvalidArgument);
        }

        let replaced = self.find_entry(&dst_parent, new_name)?;
        match replaced {
            Some((_, dst_ino)) if dst_ino == src_ino => return Ok(()),
            Some((_, dst_ino)) => {
                let dst = self.peek_inode(st, dst_ino)?;
                match (src_is_dir, dst.is_dir()) {
                    (true, false) => return Err(Error::NotADirectory),
                    (false, true) => return Err(Error::IsADirectory),
                    (true, true) if !self.is_empty_dir(&dst)? => {
                        return Err(Error::DirectoryNotEmpty);
                    }
                    _ => {}
                }
            }
            None if moves_dir && dst_parent.links_count >= DiskInode::LINK_MAX => {
                return Err(Error::TooManyLinks);
            }
            None => {}
        }

        if replaced.is_some() {
            self.unlink_entry(st, new_dir, new_name)?;
        }

        let now = self.now();
        let ty = FileType::from(src.entry_type());
        self.with_inode(st, new_dir, |st, dir| {
            self.add_entry(st, new_dir, dir, new_name, src_ino, ty)?;
            if moves_dir {
                dir.links_count += 1;
            }
            dir.set_mtime(now);
            dir.set_ctime(now);
            Ok(())
        })?;

        // 加入新项可能拆分了同一块中的记录，重新定位旧项
        let src_parent = self.peek_inode(st, old_dir)?;
        let (pos, _) = self.find_entry(&src_parent, old_name)?.ok_or(Error::Io)?;
        self.clear_entry(pos)?;
        self.with_inode(st, old_dir, |_, dir| {
            if moves_dir {
                dir.links_count = dir.links_count.saturating_sub(1);
            }
            dir.set_mtime(now);
            dir.set_ctime(now);
            Ok(())
        })?;

        self.with_inode(st, src_ino, |_, inode| {
            if moves_dir {
                let (pos, _) = self.find_entry(inode, b"..")?.ok_or(Error::Io)?;
                self.set_entry_inode(pos, new_dir)?;
            }
            inode.set_ctime(now);
            Ok(())
        })?;

        log::debug!("renamed inode {src_ino} from directory {old_dir} to {new_dir}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::mount;

    fn set_links(node: &Vnode, links: u16) {
        let fs = node.fs();
        let mut st = fs.lock();
        fs.with_inode(&mut st, node.ino(), |_, inode| {
            inode.links_count = links;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn link_ceiling() {
        let fs = mount(2 << 20);
        let root = fs.root_dir().unwrap();
        let dir = root.mkdir("d", 0o755).unwrap();
        let moved = root.mkdir("m", 0o755).unwrap();
        let file = root.open("f", OpenFlag::Create.into(), 0o644).unwrap();

        set_links(&dir, DiskInode::LINK_MAX - 1);
        dir.mkdir("last", 0o755).unwrap();
        assert_eq!(DiskInode::LINK_MAX as u32, dir.stat().unwrap().links);
        assert_eq!(Err(Error::TooManyLinks), dir.mkdir("more", 0o755).map(|_| ()));
        assert_eq!(Err(Error::TooManyLinks), root.rename("m", &dir, "m"));
        assert_eq!(moved.ino(), root.lookup("m").unwrap().ino());
        assert_eq!(Err(Error::NotFound), dir.lookup("m").map(|_| ()));

        set_links(&file, DiskInode::LINK_MAX);
        assert_eq!(Err(Error::TooManyLinks), root.link("g", &file));
        assert_eq!(Err(Error::NotFound), root.lookup("g").map(|_| ()));
        assert_eq!(DiskInode::LINK_MAX as u32, file.stat().unwrap().links);
    }

    /// 让文件声称已有接近2GiB的内容，免得真的分配那么多块
    fn almost_2g(fs: &Arc<Ext2FileSystem>, name: &str) -> Vnode {
        let root = fs.root_dir().unwrap();
        let file = root.open(name, OpenFlag::Create.into(), 0o644).unwrap();
        let size = (1 << 31) - fs.geometry().block_size as u64;
        let mut st = fs.lock();
        fs.with_inode(&mut st, file.ino(), |_, inode| {
            inode.set_size(size);
            Ok(())
        })
        .unwrap();
        drop(st);
        file
    }

    #[test]
    fn ftruncate_past_2g_enables_large_file() {
        let fs = mount(2 << 20);
        let file = almost_2g(&fs, "big");
        assert!(!fs.large_file());

        file.ftruncate((1 << 31) + 1).unwrap();
        assert!(fs.large_file());
        assert_eq!((1 << 31) + 1, file.stat().unwrap().size);
    }

    #[test]
    fn pwrite_past_2g_enables_large_file() {
        let fs = mount(2 << 20);
        let file = almost_2g(&fs, "big");
        assert!(!fs.large_file());

        assert_eq!(Ok(3), file.pwrite(b"end", 1 << 31));
        assert!(fs.large_file());
        assert_eq!((1 << 31) + 3, file.stat().unwrap().size);

        let mut buf = [0u8; 3];
        assert_eq!(Ok(3), file.pread(&mut buf, 1 << 31));
        assert_eq!(b"end", &buf);
    }
}
