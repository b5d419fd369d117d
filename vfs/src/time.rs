/// 自 Unix 纪元起的秒数与纳秒数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: u32,
}

impl Timespec {
    pub const fn new(sec: i64, nsec: u32) -> Self {
        Self { sec, nsec }
    }
}

/// 内核时钟服务
pub trait Clock: Send + Sync {
    fn now(&self) -> Timespec;
}
