use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use super::{Block, Storage};
use crate::BlockId;
use crate::Error;
use crate::Result;
use crate::BLOCK_SIZE;

/// 文件后端：镜像文件或块设备节点。
/// `set` 返回前落盘，持久性以最后一次成功的 `set` 为界。
pub struct FileStorage {
    file: Mutex<File>,
    block_count: u64,
}

impl FileStorage {
    /// 新建镜像文件并撑到 `block_count` 块的容量，旧内容清空
    pub fn create(path: impl AsRef<Path>, block_count: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(block_count * BLOCK_SIZE as u64)?;

        Ok(Self {
            file: Mutex::new(file),
            block_count,
        })
    }

    /// 打开既有镜像，容量由文件长度决定
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let block_count = file.metadata()?.len() / BLOCK_SIZE as u64;

        Ok(Self {
            file: Mutex::new(file),
            block_count,
        })
    }
}

impl Storage for FileStorage {
    #[inline]
    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn get(&self, id: BlockId, dst: &mut Block) -> Result<()> {
        if id >= self.block_count {
            return Err(Error::OutOfRange);
        }
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(id * BLOCK_SIZE as u64))?;
        file.read_exact(&mut dst.0)?;
        Ok(())
    }

    fn set(&self, id: BlockId, src: &Block) -> Result<()> {
        if id >= self.block_count {
            return Err(Error::OutOfRange);
        }
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(id * BLOCK_SIZE as u64))?;
        file.write_all(&src.0)?;
        file.sync_data()?;
        Ok(())
    }
}
