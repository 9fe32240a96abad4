use spin::Mutex;

use super::{Block, Storage};
use crate::BlockId;
use crate::Error;
use crate::Result;
use crate::BLOCK_SIZE;

/// 内存后端：一整段连续缓冲区
pub struct MemoryStorage {
    data: Mutex<Box<[u8]>>,
    block_count: u64,
}

impl MemoryStorage {
    pub fn new(block_count: u64) -> Self {
        Self {
            data: Mutex::new(vec![0; block_count as usize * BLOCK_SIZE].into_boxed_slice()),
            block_count,
        }
    }
}

impl Storage for MemoryStorage {
    #[inline]
    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn get(&self, id: BlockId, dst: &mut Block) -> Result<()> {
        if id >= self.block_count {
            return Err(Error::OutOfRange);
        }
        let data = self.data.lock();
        let start = id as usize * BLOCK_SIZE;
        dst.0.copy_from_slice(&data[start..start + BLOCK_SIZE]);
        Ok(())
    }

    fn set(&self, id: BlockId, src: &Block) -> Result<()> {
        if id >= self.block_count {
            return Err(Error::OutOfRange);
        }
        let mut data = self.data.lock();
        let start = id as usize * BLOCK_SIZE;
        data[start..start + BLOCK_SIZE].copy_from_slice(&src.0);
        Ok(())
    }
}
