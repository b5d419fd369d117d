use vfs::{DirEntryType, Timespec};

use super::OnDisk;
use super::time::{decode_time, encode_time};

/// 磁盘上的索引节点。
///
/// 前128字节是 ext2 的经典布局；`inode_size`更大时，
/// `extra_isize`之后的字段保存 ext4 的纳秒与纪元扩展。
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct DiskInode {
    pub mode: u16,
    uid_lo: u16,
    size_lo: u32,
    atime: u32,
    ctime: u32,
    mtime: u32,
    pub dtime: u32,
    gid_lo: u16,
    pub links_count: u16,
    /// 占用的512字节扇区数，含间接块
    pub blocks: u32,
    pub flags: u32,
    _osd1: u32,
    /// 12个直接块、1个一级、1个二级、1个三级间接块
    pub block: [u32; DiskInode::N_BLOCKS],
    pub generation: u32,
    _file_acl_lo: u32,
    size_hi: u32,
    _faddr: u32,
    _blocks_hi: u16,
    _file_acl_hi: u16,
    uid_hi: u16,
    gid_hi: u16,
    _checksum_lo: u16,
    _osd2_reserved: u16,

    /*
     * 大索引节点的扩展区
     */
    pub extra_isize: u16,
    _checksum_hi: u16,
    ctime_extra: u32,
    mtime_extra: u32,
    atime_extra: u32,
    crtime: u32,
    crtime_extra: u32,
    _version_hi: u32,
    _projid: u32,
}

unsafe impl OnDisk for DiskInode {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeMode;

impl InodeMode {
    pub const TYPE_MASK: u16 = 0o170000;
    pub const SOCKET: u16 = 0o140000;
    pub const SYMLINK: u16 = 0o120000;
    pub const REGULAR: u16 = 0o100000;
    pub const BLOCK: u16 = 0o060000;
    pub const DIRECTORY: u16 = 0o040000;
    pub const CHAR: u16 = 0o020000;
    pub const FIFO: u16 = 0o010000;
    /// 权限位，含 setuid/setgid/sticky
    pub const PERM_MASK: u16 = 0o7777;
}

impl DiskInode {
    pub const N_BLOCKS: usize = 15;
    pub const N_DIRECT: usize = 12;
    pub const IND_BLOCK: usize = 12;
    pub const DIND_BLOCK: usize = 13;
    pub const TIND_BLOCK: usize = 14;

    pub const GOOD_OLD_SIZE: usize = 128;
    /// 新建大索引节点时写入的`extra_isize`
    pub const EXTRA_ISIZE: u16 = 32;

    /// 快速符号链接的目标直接存放在`block`数组里
    pub const FAST_SYMLINK_MAX: usize = Self::N_BLOCKS * 4;

    /// 对应 ext2 的 `EXT2_LINK_MAX`
    pub const LINK_MAX: u16 = 65000;

    pub fn new(mode: u16, now: Timespec, inode_size: u32) -> Self {
        let mut inode = Self {
            mode,
            ..Default::default()
        };
        if inode_size as usize > Self::GOOD_OLD_SIZE {
            inode.extra_isize = Self::EXTRA_ISIZE;
        }
        inode.set_atime(now);
        inode.set_ctime(now);
        inode.set_mtime(now);
        inode.set_crtime(now);
        inode
    }

    pub fn file_type(&self) -> u16 {
        self.mode & InodeMode::TYPE_MASK
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.file_type() == InodeMode::DIRECTORY
    }

    #[inline]
    pub fn is_regular(&self) -> bool {
        self.file_type() == InodeMode::REGULAR
    }

    #[inline]
    pub fn is_symlink(&self) -> bool {
        self.file_type() == InodeMode::SYMLINK
    }

    /// 目标存放在块指针数组中的符号链接不占数据块
    pub fn is_fast_symlink(&self) -> bool {
        self.is_symlink() && self.blocks == 0
    }

    pub fn entry_type(&self) -> DirEntryType {
        match self.file_type() {
            InodeMode::REGULAR => DirEntryType::Regular,
            InodeMode::DIRECTORY => DirEntryType::Directory,
            InodeMode::SYMLINK => DirEntryType::SymLink,
            InodeMode::CHAR => DirEntryType::Char,
            InodeMode::BLOCK => DirEntryType::Block,
            InodeMode::FIFO => DirEntryType::Fifo,
            InodeMode::SOCKET => DirEntryType::Socket,
            _ => DirEntryType::Unknown,
        }
    }

    /// 只有普通文件在 RO_COMPAT_LARGE_FILE 下使用高32位
    pub fn size(&self, large_file: bool) -> u64 {
        if large_file && self.is_regular() {
            (self.size_hi as u64) << 32 | self.size_lo as u64
        } else {
            self.size_lo as u64
        }
    }

    pub fn set_size(&mut self, size: u64) {
        self.size_lo = size as u32;
        if self.is_regular() {
            self.size_hi = (size >> 32) as u32;
        }
    }

    pub fn uid(&self) -> u32 {
        (self.uid_hi as u32) << 16 | self.uid_lo as u32
    }

    pub fn set_uid(&mut self, uid: u32) {
        self.uid_lo = uid as u16;
        self.uid_hi = (uid >> 16) as u16;
    }

    pub fn gid(&self) -> u32 {
        (self.gid_hi as u32) << 16 | self.gid_lo as u32
    }

    pub fn set_gid(&mut self, gid: u32) {
        self.gid_lo = gid as u16;
        self.gid_hi = (gid >> 16) as u16;
    }

    /// 扩展区是否覆盖了以`field_end`（相对索引节点起点）结尾的字段
    fn has_extra(&self, field_end: usize) -> bool {
        Self::GOOD_OLD_SIZE + self.extra_isize as usize >= field_end
    }

    pub fn atime(&self) -> Timespec {
        decode_time(self.atime, self.has_extra(0x90).then_some(self.atime_extra))
    }

    pub fn set_atime(&mut self, time: Timespec) {
        let (raw, extra) = encode_time(time);
        self.atime = raw;
        if self.has_extra(0x90) {
            self.atime_extra = extra;
        }
    }

    pub fn ctime(&self) -> Timespec {
        decode_time(self.ctime, self.has_extra(0x88).then_some(self.ctime_extra))
    }

    pub fn set_ctime(&mut self, time: Timespec) {
        let (raw, extra) = encode_time(time);
        self.ctime = raw;
        if self.has_extra(0x88) {
            self.ctime_extra = extra;
        }
    }

    pub fn mtime(&self) -> Timespec {
        decode_time(self.mtime, self.has_extra(0x8C).then_some(self.mtime_extra))
    }

    pub fn set_mtime(&mut self, time: Timespec) {
        let (raw, extra) = encode_time(time);
        self.mtime = raw;
        if self.has_extra(0x8C) {
            self.mtime_extra = extra;
        }
    }

    pub fn set_crtime(&mut self, time: Timespec) {
        if self.has_extra(0x98) {
            let (raw, extra) = encode_time(time);
            self.crtime = raw;
            self.crtime_extra = extra;
        }
    }

    /// 快速符号链接的目标字节
    pub fn inline_data(&self) -> &[u8] {
        &self.block_bytes()[..(self.size_lo as usize).min(Self::FAST_SYMLINK_MAX)]
    }

    pub fn set_inline_data(&mut self, data: &[u8]) {
        debug_assert!(data.len() < Self::FAST_SYMLINK_MAX);
        let mut bytes = [0u8; Self::FAST_SYMLINK_MAX];
        bytes[..data.len()].copy_from_slice(data);
        for (ptr, chunk) in self.block.iter_mut().zip(bytes.chunks_exact(4)) {
            *ptr = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        self.size_lo = data.len() as u32;
    }

    fn block_bytes(&self) -> &[u8] {
        // `block`在结构内按4字节对齐且连续
        unsafe {
            core::slice::from_raw_parts(self.block.as_ptr().cast::<u8>(), Self::FAST_SYMLINK_MAX)
        }
    }
}
