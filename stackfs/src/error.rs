use std::io;

/// 核心操作的错误类别，驱动层负责映射到 POSIX errno
#[derive(Debug)]
pub enum Error {
    /// 块号、inode 号越出其合法区域，或偏移越过文件末尾/最大文件尺寸
    OutOfRange,
    /// 空闲链表为空，或 inode 表没有空槽
    OutOfSpace,
    NotFound,
    AlreadyExists,
    IsADirectory,
    NotADirectory,
    /// 文件后端的 I/O 故障
    Io(io::Error),
}

pub type Result<T> = core::result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}
