//! 时间戳编解码。
//!
//! 经典字段只有32位有符号秒数；ext4 的`*_extra`字段低2位把秒数扩展到34位，
//! 高30位存纳秒。

use vfs::Timespec;

const EPOCH_BITS: u32 = 2;
const EPOCH_MASK: u32 = (1 << EPOCH_BITS) - 1;
const NSEC_MASK: u32 = !EPOCH_MASK;

pub fn encode_time(time: Timespec) -> (u32, u32) {
    let raw = time.sec as i32;
    let epoch = ((time.sec - raw as i64) >> 32) as u32 & EPOCH_MASK;
    let extra = epoch | (time.nsec << EPOCH_BITS) & NSEC_MASK;
    (raw as u32, extra)
}

pub fn decode_time(raw: u32, extra: Option<u32>) -> Timespec {
    let sec = raw as i32 as i64;
    match extra {
        Some(extra) => Timespec {
            sec: sec + (((extra & EPOCH_MASK) as i64) << 32),
            nsec: (extra & NSEC_MASK) >> EPOCH_BITS,
        },
        None => Timespec { sec, nsec: 0 },
    }
}
