use vfs::DirEntryType;

use super::OnDisk;

/// 目录项头部，后随`name_len`字节的名字，整条记录按4字节对齐。
///
/// 一个目录数据块被若干条记录恰好铺满；`inode`为0的记录是墓碑，
/// 其`rec_len`所覆盖的空间可以被复用。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct DirEntryHead {
    pub inode: u32,
    pub rec_len: u16,
    pub name_len: u8,
    /// 未启用 INCOMPAT_FILETYPE 时为`name_len`的高字节，恒为0
    pub file_type: u8,
}

unsafe impl OnDisk for DirEntryHead {}

impl DirEntryHead {
    pub const LEN: usize = 8;
    pub const NAME_MAX: usize = 255;

    /// 容纳长度为`name_len`的名字所需的最小记录长度
    pub const fn min_rec_len(name_len: usize) -> usize {
        (Self::LEN + name_len).next_multiple_of(4)
    }

    /// 记录实际需要的空间，墓碑不需要
    pub fn used_len(&self) -> usize {
        if self.inode == 0 {
            0
        } else {
            Self::min_rec_len(self.name_len as usize)
        }
    }

    /// 64KiB 的块无法用 u16 表示整块长度，约定以0或65535表示
    pub fn decode_rec_len(raw: u16, block_size: usize) -> usize {
        if block_size >= 65536 && (raw == 0 || raw == u16::MAX) {
            65536
        } else {
            raw as usize
        }
    }

    pub fn encode_rec_len(len: usize) -> u16 {
        if len >= 65536 { u16::MAX } else { len as u16 }
    }
}

/// 目录项中记录的文件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FileType {
    Unknown = 0,
    Regular = 1,
    Directory = 2,
    Char = 3,
    Block = 4,
    Fifo = 5,
    Socket = 6,
    SymLink = 7,
}

impl From<DirEntryType> for FileType {
    fn from(ty: DirEntryType) -> Self {
        match ty {
            DirEntryType::Regular => Self::Regular,
            DirEntryType::Directory => Self::Directory,
            DirEntryType::Char => Self::Char,
            DirEntryType::Block => Self::Block,
            DirEntryType::Fifo => Self::Fifo,
            DirEntryType::Socket => Self::Socket,
            DirEntryType::SymLink => Self::SymLink,
            DirEntryType::Unknown => Self::Unknown,
        }
    }
}

impl From<u8> for FileType {
    fn from(raw: u8) -> Self {
        match raw {
            1 => Self::Regular,
            2 => Self::Directory,
            3 => Self::Char,
            4 => Self::Block,
            5 => Self::Fifo,
            6 => Self::Socket,
            7 => Self::SymLink,
            _ => Self::Unknown,
        }
    }
}

impl From<FileType> for DirEntryType {
    fn from(ty: FileType) -> Self {
        match ty {
            FileType::Regular => Self::Regular,
            FileType::Directory => Self::Directory,
            FileType::Char => Self::Char,
            FileType::Block => Self::Block,
            FileType::Fifo => Self::Fifo,
            FileType::Socket => Self::Socket,
            FileType::SymLink => Self::SymLink,
            FileType::Unknown => Self::Unknown,
        }
    }
}
