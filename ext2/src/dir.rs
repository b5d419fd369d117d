//! # 目录项管理
//!
//! 目录的数据块被变长记录恰好铺满，记录从不跨块。
//! 插入时在某条记录的富余空间中切出新记录，或者原地复用墓碑；
//! 都找不到时在目录末尾追加一块。删除只把记录的`inode`置0，成为墓碑，
//! 不做合并。

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::ops::ControlFlow;

use vfs::{DirEntry, DirEntryType, DirentWriter, Error};

use crate::efs::{Ext2FileSystem, FsState};
use crate::layout::{DirEntryHead, DiskInode, FileType, OnDisk};
use crate::{BlockId, Result};

/// 目录中的一条记录
#[derive(Debug)]
pub(crate) struct Record<'a> {
    pub pos: EntryPos,
    pub head: DirEntryHead,
    /// 解码后的记录长度
    pub rec_len: usize,
    pub name: &'a [u8],
}

impl Record<'_> {
    #[inline]
    pub fn is_live(&self) -> bool {
        self.head.inode != 0
    }
}

/// 记录在设备上的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryPos {
    pub block: BlockId,
    pub offset: usize,
}

/// 校验单个路径分量
pub(crate) fn check_name(name: &str) -> Result<&[u8]> {
    let bytes = name.as_bytes();
    if bytes.is_empty() {
        return Err(Error::NotFound);
    }
    if bytes.len() > DirEntryHead::NAME_MAX {
        return Err(Error::NameTooLong);
    }
    if bytes.iter().any(|&b| b == b'/' || b == 0) {
        return Err(Error::InvalidArgument);
    }
    Ok(bytes)
}

fn write_record(data: &mut [u8], offset: usize, ino: u32, rec_len: usize, name: &[u8], ty: FileType) {
    let head = DirEntryHead {
        inode: ino,
        rec_len: DirEntryHead::encode_rec_len(rec_len),
        name_len: name.len() as u8,
        file_type: ty as u8,
    };
    let record = &mut data[offset..offset + rec_len];
    record[..DirEntryHead::LEN].copy_from_slice(head.as_bytes());
    record[DirEntryHead::LEN..DirEntryHead::LEN + name.len()].copy_from_slice(name);
    record[DirEntryHead::LEN + name.len()..DirEntryHead::min_rec_len(name.len())].fill(0);
}

/// 只含`.`与`..`的目录块
pub(crate) fn new_dir_block(block_size: usize, ino: u32, parent: u32, file_type: bool) -> Vec<u8> {
    let ty = if file_type { FileType::Directory } else { FileType::Unknown };
    let dot = DirEntryHead::min_rec_len(1);
    let mut data = vec![0u8; block_size];
    write_record(&mut data, 0, ino, dot, b".", ty);
    write_record(&mut data, dot, parent, block_size - dot, b"..", ty);
    data
}

impl Ext2FileSystem {
    /// 依次访问目录中的每条记录（含墓碑），`f`返回`Break`时提前结束
    pub(crate) fn scan_dir<R>(
        &self,
        dir: &DiskInode,
        mut f: impl FnMut(&Record<'_>) -> ControlFlow<R>,
    ) -> Result<Option<R>> {
        let bs = self.geo().block_size as u64;
        let blocks = dir.size(self.large_file()) / bs;

        for index in 0..blocks {
            let block = self.block_address(dir, index)?;
            let data = self.disk().read_block(block)?;

            let mut offset = 0;
            while offset < data.len() {
                let record = self.parse_record(&data, block, offset)?;
                if let ControlFlow::Break(res) = f(&record) {
                    return Ok(Some(res));
                }
                offset += record.rec_len;
            }
        }
        Ok(None)
    }

    fn parse_record<'a>(&self, data: &'a [u8], block: BlockId, offset: usize) -> Result<Record<'a>> {
        let corrupt = |what: &str| {
            log::error!("corrupt directory entry in block {block} at offset {offset}: {what}");
            Error::Io
        };

        if offset + DirEntryHead::LEN > data.len() {
            return Err(corrupt("truncated header"));
        }
        let head = DirEntryHead::from_bytes(&data[offset..offset + DirEntryHead::LEN]);
        let rec_len = DirEntryHead::decode_rec_len(head.rec_len, data.len());

        if rec_len < DirEntryHead::LEN || rec_len % 4 != 0 {
            return Err(corrupt("bad record length"));
        }
        if offset + rec_len > data.len() {
            return Err(corrupt("record crosses block end"));
        }

        let mut name_len = head.name_len as usize;
        if !self.geo().file_type {
            name_len |= (head.file_type as usize) << 8;
        }
        if head.inode != 0 && DirEntryHead::LEN + name_len > rec_len {
            return Err(corrupt("name overflows record"));
        }
        // 墓碑里的名字没有意义，只截取记录内的部分
        let name_len = name_len.min(rec_len - DirEntryHead::LEN);
        let start = offset + DirEntryHead::LEN;

        Ok(Record {
            pos: EntryPos { block, offset },
            head,
            rec_len,
            name: &data[start..start + name_len],
        })
    }

    /// 目录项中记录的类型；没有 INCOMPAT_FILETYPE 时一律未知
    fn record_type(&self, record: &Record<'_>) -> FileType {
        if self.geo().file_type {
            FileType::from(record.head.file_type)
        } else {
            FileType::Unknown
        }
    }

    /// 按名字查找，返回记录位置与索引节点号
    pub(crate) fn find_entry(&self, dir: &DiskInode, name: &[u8]) -> Result<Option<(EntryPos, u32)>> {
        self.scan_dir(dir, |record| {
            if record.is_live() && record.name == name {
                ControlFlow::Break((record.pos, record.head.inode))
            } else {
                ControlFlow::Continue(())
            }
        })
    }

    /// 在目录中加入一条记录。
    ///
    /// 需要追加新块时目录大小增加一个块；调用者负责更新目录的时间戳。
    pub(crate) fn add_entry(
        &self,
        st: &mut FsState,
        dir_ino: u32,
        dir: &mut DiskInode,
        name: &[u8],
        ino: u32,
        ty: FileType,
    ) -> Result<()> {
        debug_assert!(!name.is_empty() && name.len() <= DirEntryHead::NAME_MAX);
        let needed = DirEntryHead::min_rec_len(name.len());

        let found = self.scan_dir(dir, |record| {
            if record.rec_len - record.head.used_len() >= needed {
                ControlFlow::Break((record.pos, record.head, record.rec_len))
            } else {
                ControlFlow::Continue(())
            }
        })?;

        if let Some((pos, head, rec_len)) = found {
            let mut data = self.disk().read_block(pos.block)?;
            let used = head.used_len();
            if used == 0 {
                // 原地复用墓碑
                self.put_record(&mut data, pos.offset, ino, rec_len, name, ty);
            } else {
                // 原记录只保留它需要的部分，剩余空间给新记录
                let mut shrunk = head;
                shrunk.rec_len = DirEntryHead::encode_rec_len(used);
                data[pos.offset..pos.offset + DirEntryHead::LEN].copy_from_slice(shrunk.as_bytes());
                self.put_record(&mut data, pos.offset + used, ino, rec_len - used, name, ty);
            }
            return self.disk().write_block(pos.block, &data);
        }

        // 追加新块：新记录在前，墓碑覆盖其余部分
        let bs = self.geo().block_size as usize;
        let index = dir.size(self.large_file()) / bs as u64;
        self.grow_blocks(st, dir_ino, dir, index, index + 1)?;

        let mut data = vec![0u8; bs];
        self.put_record(&mut data, 0, ino, needed, name, ty);
        if needed < bs {
            self.put_record(&mut data, needed, 0, bs - needed, &[], FileType::Unknown);
        }

        let written = self
            .block_address(dir, index)
            .and_then(|block| self.disk().write_block(block, &data));
        if let Err(err) = written {
            self.shrink_blocks(st, dir, index + 1, index)?;
            return Err(err);
        }

        dir.set_size((index + 1) * bs as u64);
        Ok(())
    }

    fn put_record(&self, data: &mut [u8], offset: usize, ino: u32, rec_len: usize, name: &[u8], ty: FileType) {
        let ty = if self.geo().file_type { ty } else { FileType::Unknown };
        write_record(data, offset, ino, rec_len, name, ty);
    }

    /// 把记录变成墓碑，只改写`inode`字段
    pub(crate) fn clear_entry(&self, pos: EntryPos) -> Result<()> {
        self.set_entry_inode(pos, 0)
    }

    pub(crate) fn set_entry_inode(&self, pos: EntryPos, ino: u32) -> Result<()> {
        let offset = self.disk().offset_of(pos.block) + pos.offset as u64;
        self.disk().write_at(offset, &ino.to_le_bytes())
    }

    /// 新目录的第一个块
    pub(crate) fn init_dir_block(&self, block: BlockId, ino: u32, parent: u32) -> Result<()> {
        let data = new_dir_block(self.geo().block_size as usize, ino, parent, self.geo().file_type);
        self.disk().write_block(block, &data)
    }

    /// 数目录中的有效记录，数到`limit`即停
    pub(crate) fn count_entries(&self, dir: &DiskInode, limit: usize) -> Result<usize> {
        let mut count = 0;
        self.scan_dir(dir, |record| {
            if record.is_live() {
                count += 1;
                if count >= limit {
                    return ControlFlow::Break(());
                }
            }
            ControlFlow::Continue(())
        })?;
        Ok(count)
    }

    /// 只含`.`与`..`的目录才算空
    pub(crate) fn is_empty_dir(&self, dir: &DiskInode) -> Result<bool> {
        Ok(self.count_entries(dir, 3)? < 3)
    }

    /// 以目录流记录的形式导出全部有效目录项
    pub(crate) fn getdents(&self, dir: &DiskInode) -> Result<Vec<u8>> {
        let mut writer = DirentWriter::with_capacity(dir.size(self.large_file()) as usize);
        self.scan_dir(dir, |record| {
            if record.is_live() {
                let ty = DirEntryType::from(self.record_type(record));
                writer.push(record.head.inode as u64, ty, record.name);
            }
            ControlFlow::<()>::Continue(())
        })?;
        Ok(writer.finish())
    }

    pub(crate) fn dir_entries(&self, dir: &DiskInode) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        self.scan_dir(dir, |record| {
            if record.is_live() {
                entries.push(DirEntry {
                    inode: record.head.inode as u64,
                    ty: self.record_type(record).into(),
                    name: String::from_utf8_lossy(record.name).into_owned(),
                });
            }
            ControlFlow::<()>::Continue(())
        })?;
        Ok(entries)
    }
}
