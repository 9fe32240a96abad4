use crate::storage::{Block, Storage};
use crate::Result;
use crate::{BlockId, BLOCK_SIZE, MAGIC, ROOT_INODE};

/// 超级块：
/// - 提供文件系统合法性校验；
/// - 定位 inode 区域与数据区域；
/// - 持有空闲链表的头指针（0 表示链表为空）
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct SuperBlock {
    magic: u64,
    pub block_size: u64,
    pub block_count: u64,
    pub inode_block_start: u64,
    pub inode_block_count: u64,
    pub free_list_head: BlockId,
    pub root_inode: u64,
}

impl SuperBlock {
    pub fn new(block_count: u64, inode_block_count: u64) -> Self {
        Self {
            magic: MAGIC,
            block_size: BLOCK_SIZE as u64,
            block_count,
            inode_block_start: 1,
            inode_block_count,
            free_list_head: 0,
            root_inode: ROOT_INODE,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
            && self.block_size == BLOCK_SIZE as u64
            && 1 + self.inode_block_count <= self.block_count
    }

    /// inode 区域之后的第一个块，即数据区域的起点
    #[inline]
    pub fn data_region_start(&self) -> BlockId {
        self.inode_block_start + self.inode_block_count
    }

    pub fn load(disk: &dyn Storage) -> Result<Self> {
        let mut block = Block::new();
        disk.get(0, &mut block)?;
        Ok(*block.get::<SuperBlock>(0))
    }

    pub fn flush(&self, disk: &dyn Storage) -> Result<()> {
        let mut block = Block::new();
        *block.get_mut::<SuperBlock>(0) = *self;
        disk.set(0, &block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn load_flush_round_trip() {
        let disk = MemoryStorage::new(16);
        let mut sb = SuperBlock::new(16, 3);
        sb.free_list_head = 4;
        sb.flush(&disk).unwrap();

        let loaded = SuperBlock::load(&disk).unwrap();
        assert!(loaded.is_valid());
        assert_eq!(16, loaded.block_count);
        assert_eq!(3, loaded.inode_block_count);
        assert_eq!(4, loaded.free_list_head);
        assert_eq!(4, loaded.data_region_start());
    }

    #[test]
    fn blank_device_is_invalid() {
        let disk = MemoryStorage::new(16);
        assert!(!SuperBlock::load(&disk).unwrap().is_valid());
    }
}
