//! # 磁盘数据结构层
//!
//! ext2 的磁盘布局（以块组为单位重复）：
//!
//! ```text
//! [引导块] | 超级块 | 块组描述符表 | 块位图 | 索引节点位图 | 索引节点表 | 数据块 ...
//! ```
//!
//! 所有结构都是小端序，本 crate 只支持小端主机。

mod dir_entry;
mod group_desc;
mod inode;
mod super_block;
mod time;

use core::mem::{self, MaybeUninit};
use core::{ptr, slice};

pub use self::{
    dir_entry::{DirEntryHead, FileType},
    group_desc::GroupDesc,
    inode::{DiskInode, InodeMode},
    super_block::{IncompatFeature, RoCompatFeature, SuperBlock, group_has_super},
    time::{decode_time, encode_time},
};

/// 可以与磁盘字节直接互转的结构。
///
/// # Safety
///
/// 实现者必须是`#[repr(C)]`、没有填充字节、且全零为合法值。
pub unsafe trait OnDisk: Copy + Sized {
    /// 从`bytes`构造结构；字节不足的部分补零，多余的部分忽略
    fn from_bytes(bytes: &[u8]) -> Self {
        let mut value = MaybeUninit::<Self>::zeroed();
        let len = bytes.len().min(mem::size_of::<Self>());
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), value.as_mut_ptr().cast::<u8>(), len);
            value.assume_init()
        }
    }

    fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts((self as *const Self).cast::<u8>(), mem::size_of::<Self>()) }
    }
}
