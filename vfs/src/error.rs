use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    AlreadyExists,
    NotFound,
    IsADirectory,
    NotADirectory,
    DirectoryNotEmpty,
    /// 设备读写失败，或者磁盘上的结构已损坏
    Io,
    NoSpace,
    NotSupported,
    CrossDevice,
    NameTooLong,
    ReadOnly,
    Busy,
    PermissionDenied,
    InvalidArgument,
    FileTooLarge,
    TooManyLinks,
}

impl Error {
    /// Linux 下对应的错误码（正数）
    pub const fn errno(self) -> isize {
        match self {
            Self::PermissionDenied => 1,
            Self::NotFound => 2,
            Self::Io => 5,
            Self::Busy => 16,
            Self::AlreadyExists => 17,
            Self::CrossDevice => 18,
            Self::NotADirectory => 20,
            Self::IsADirectory => 21,
            Self::InvalidArgument => 22,
            Self::FileTooLarge => 27,
            Self::NoSpace => 28,
            Self::ReadOnly => 30,
            Self::TooManyLinks => 31,
            Self::NameTooLong => 36,
            Self::DirectoryNotEmpty => 39,
            Self::NotSupported => 95,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::AlreadyExists => "file exists",
            Self::NotFound => "no such file or directory",
            Self::IsADirectory => "is a directory",
            Self::NotADirectory => "not a directory",
            Self::DirectoryNotEmpty => "directory not empty",
            Self::Io => "input/output error",
            Self::NoSpace => "no space left on device",
            Self::NotSupported => "operation not supported",
            Self::CrossDevice => "invalid cross-device link",
            Self::NameTooLong => "file name too long",
            Self::ReadOnly => "read-only file system",
            Self::Busy => "device or resource busy",
            Self::PermissionDenied => "operation not permitted",
            Self::InvalidArgument => "invalid argument",
            Self::FileTooLarge => "file too large",
            Self::TooManyLinks => "too many links",
        };
        f.write_str(msg)
    }
}
