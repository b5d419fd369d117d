use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Inode number
    pub inode: u64,
    pub ty: DirEntryType,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DirEntryType {
    Block,
    Char,
    Directory,
    Fifo,
    SymLink,
    Socket,
    #[default]
    Regular,
    /// 文件系统没有在目录项中记录类型
    Unknown,
}

impl DirEntryType {
    /// `dirent64.d_type`的取值
    pub const fn d_type(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Fifo => 1,
            Self::Char => 2,
            Self::Directory => 4,
            Self::Block => 6,
            Self::Regular => 8,
            Self::SymLink => 10,
            Self::Socket => 12,
        }
    }

    pub const fn from_d_type(d_type: u8) -> Self {
        match d_type {
            1 => Self::Fifo,
            2 => Self::Char,
            4 => Self::Directory,
            6 => Self::Block,
            8 => Self::Regular,
            10 => Self::SymLink,
            12 => Self::Socket,
            _ => Self::Unknown,
        }
    }
}

/// 把目录项线性化为 Linux `dirent64` 记录流：
///
/// ```text
/// d_ino: u64 | d_off: i64 | d_reclen: u16 | d_type: u8 | d_name: [u8] | NUL | 对齐到8字节
/// ```
///
/// `d_off`为下一条记录在流中的字节偏移。
#[derive(Debug)]
pub struct DirentWriter {
    buf: Vec<u8>,
    len: usize,
}

impl DirentWriter {
    /// 缓冲区不足时每次扩充的字节数
    pub const GROW_STEP: usize = 1024;

    const HEADER_LEN: usize = 19;

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity],
            len: 0,
        }
    }

    pub const fn record_len(name_len: usize) -> usize {
        (Self::HEADER_LEN + name_len + 1).next_multiple_of(8)
    }

    pub fn push(&mut self, inode: u64, ty: DirEntryType, name: &[u8]) {
        let rec_len = Self::record_len(name.len());
        while self.len + rec_len > self.buf.len() {
            self.buf.resize(self.buf.len() + Self::GROW_STEP, 0);
        }

        let next = self.len + rec_len;
        let rec = &mut self.buf[self.len..next];
        rec.fill(0);
        rec[0..8].copy_from_slice(&inode.to_le_bytes());
        rec[8..16].copy_from_slice(&(next as i64).to_le_bytes());
        rec[16..18].copy_from_slice(&(rec_len as u16).to_le_bytes());
        rec[18] = ty.d_type();
        rec[Self::HEADER_LEN..Self::HEADER_LEN + name.len()].copy_from_slice(name);

        self.len = next;
    }

    /// 收缩到恰好容纳已写入的记录
    pub fn finish(mut self) -> Vec<u8> {
        self.buf.truncate(self.len);
        self.buf.shrink_to_fit();
        self.buf
    }
}

impl DirEntry {
    /// 解析[`DirentWriter`]产出的记录流，遇到残缺记录即停止
    pub fn parse_all(mut stream: &[u8]) -> Vec<Self> {
        let mut entries = Vec::new();

        while stream.len() >= DirentWriter::HEADER_LEN {
            let rec_len = u16::from_le_bytes([stream[16], stream[17]]) as usize;
            if rec_len < DirentWriter::HEADER_LEN + 1 || rec_len > stream.len() {
                break;
            }

            let mut ino = [0; 8];
            ino.copy_from_slice(&stream[0..8]);
            let name = &stream[DirentWriter::HEADER_LEN..rec_len];
            let name_len = name.iter().position(|&b| b == 0).unwrap_or(name.len());

            entries.push(Self {
                inode: u64::from_le_bytes(ino),
                ty: DirEntryType::from_d_type(stream[18]),
                name: String::from_utf8_lossy(&name[..name_len]).into_owned(),
            });
            stream = &stream[rec_len..];
        }

        entries
    }
}
