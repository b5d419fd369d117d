use alloc::string::String;
use alloc::vec::Vec;

use crate::{Error, Stat};

/// VFS 通过此特质把文件操作分派给具体文件系统的节点。
///
/// 不适用于节点类型的操作应当返回相应的错误，
/// 例如对目录`read_at`返回[`Error::IsADirectory`]。
pub trait Node: Send + Sync {
    fn stat(&self) -> Result<Stat, Error>;

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, Error>;

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize, Error>;

    /// 以目录流记录（见[`crate::DirentWriter`]）的形式返回全部目录项
    fn getdents(&self) -> Result<Vec<u8>, Error>;

    fn readlink(&self) -> Result<String, Error>;

    fn fsync(&self) -> Result<(), Error>;
}
