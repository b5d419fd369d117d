#![no_std]

extern crate alloc;

/* ext2 驱动的整体架构，自上而下 */

// 索引节点层：vnode 的缓存、生命周期与各项文件操作
mod vnode;

// 目录项管理
mod dir;

// 逻辑块到物理块的地址转换
mod block_map;

// 块与索引节点的位图分配器
mod bitmap;

// 文件系统层：挂载、几何参数、索引节点读写、vnode 表
mod efs;

// 格式化
mod format;

// 磁盘数据结构层
pub mod layout;

// 设备读写
mod disk;

#[cfg(test)]
mod test_util;

use derive_more::{Display, From, Into};
use enumflags2::bitflags;

pub use self::{
    efs::{Ext2FileSystem, Geometry},
    format::FormatOptions,
    vnode::{Vnode, VnodeKind},
};

/// 根目录的索引节点号
pub const ROOT_INO: u32 = 2;

type Result<T> = core::result::Result<T, vfs::Error>;

/// 物理块号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Into)]
#[repr(transparent)]
pub struct BlockId(u32);

impl BlockId {
    pub const NULL: Self = Self(0);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountFlag {
    ReadOnly = 0b1,
}

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlag {
    /// 不存在时创建普通文件
    Create = 0b001,
    /// 与`Create`连用，已存在时报错
    Exclusive = 0b010,
    /// 打开普通文件时截断为0
    Truncate = 0b100,
}
