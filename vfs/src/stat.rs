use crate::{DirEntryType, Timespec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    /// Inode number
    pub ino: u64,
    pub ty: DirEntryType,
    /// 权限位（含 setuid/setgid/sticky）
    pub perm: u16,
    pub links: u32,
    pub uid: u32,
    pub gid: u32,
    /// File size
    pub size: u64,
    /// Optimal I/O block size
    pub block_size: u64,
    /// 占用的512字节扇区数
    pub blocks: u64,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
}
