//! # inode 表管理层
//!
//! inode 按编号紧排在 inode 区域里：
//! 编号 `id` 住在块 `inode_block_start + id / INODES_PER_BLOCK`，
//! 块内下标为 `id % INODES_PER_BLOCK`。
//! 分配策略是线性扫描第一个空槽，对目标规模足够。

use std::sync::Arc;

use crate::layout::{FileType, INode, SuperBlock, INODES_PER_BLOCK, INODE_SIZE};
use crate::storage::{Block, Storage};
use crate::{BlockId, Error, InodeId, Result, ROOT_INODE};

/// inode 表的能力集
pub trait INodeManager: Send {
    /// 找到一个 `Free` 的 inode 并返回其编号；按约定调用者随即用 `set` 写入新类型。
    /// 没有空槽时报 `OutOfSpace`。
    fn reserve(&mut self) -> Result<InodeId>;

    /// 把磁盘上的 inode 标记回 `Free`。调用者负责先释放它的数据块。
    /// 根 inode 与越界编号报 `OutOfRange`。
    fn release(&mut self, id: InodeId) -> Result<()>;

    /// 读出完整的 inode 记录。编号 0 永远不合法。
    fn get(&self, id: InodeId, dst: &mut INode) -> Result<()>;

    /// 写回完整的 inode 记录
    fn set(&mut self, id: InodeId, src: &INode) -> Result<()>;

    /// 根目录的 inode 编号
    fn root(&self) -> InodeId;

    /// 当前空闲 inode 总数，供 statfs 使用
    fn free_count(&self) -> Result<u64>;
}

pub struct LinearINodeManager {
    disk: Arc<dyn Storage>,
    inode_block_start: BlockId,
    num_inodes: u64,
}

impl LinearINodeManager {
    /// 从超级块恢复 inode 区域的位置
    pub fn mount(disk: Arc<dyn Storage>) -> Result<Self> {
        let sb = SuperBlock::load(&*disk)?;
        Ok(Self {
            disk,
            inode_block_start: sb.inode_block_start,
            num_inodes: sb.inode_block_count * INODES_PER_BLOCK as u64,
        })
    }

    /// mkfs：清零整个 inode 区域，然后把根 inode 写成空目录
    pub fn format(disk: &dyn Storage, sb: &SuperBlock) -> Result<()> {
        let zero = Block::new();
        for id in sb.inode_block_start..sb.data_region_start() {
            disk.set(id, &zero)?;
        }

        let mut block = Block::new();
        disk.get(sb.inode_block_start, &mut block)?;
        *block.get_mut::<INode>(ROOT_INODE as usize * INODE_SIZE) =
            INode::new(FileType::Directory);
        disk.set(sb.inode_block_start, &block)
    }

    /// 编号到磁盘位置：块编号与块内字节偏移
    #[inline]
    fn locate(&self, id: InodeId) -> (BlockId, usize) {
        let block = self.inode_block_start + id / INODES_PER_BLOCK as u64;
        let offset = (id % INODES_PER_BLOCK as u64) as usize * INODE_SIZE;
        (block, offset)
    }
}

impl INodeManager for LinearINodeManager {
    fn reserve(&mut self) -> Result<InodeId> {
        let blocks = self.num_inodes / INODES_PER_BLOCK as u64;
        let mut block = Block::new();

        for block_index in 0..blocks {
            self.disk.get(self.inode_block_start + block_index, &mut block)?;

            for slot in 0..INODES_PER_BLOCK as u64 {
                let id = block_index * INODES_PER_BLOCK as u64 + slot;
                // 0 是"不存在"，根永不参与分配
                if id <= ROOT_INODE {
                    continue;
                }
                if block.get::<INode>(slot as usize * INODE_SIZE).is_free() {
                    return Ok(id);
                }
            }
        }
        Err(Error::OutOfSpace)
    }

    fn release(&mut self, id: InodeId) -> Result<()> {
        if id <= ROOT_INODE || id >= self.num_inodes {
            return Err(Error::OutOfRange);
        }

        let (block_id, offset) = self.locate(id);
        let mut block = Block::new();
        self.disk.get(block_id, &mut block)?;
        block.get_mut::<INode>(offset).kind = FileType::Free;
        self.disk.set(block_id, &block)
    }

    fn get(&self, id: InodeId, dst: &mut INode) -> Result<()> {
        if id < ROOT_INODE || id >= self.num_inodes {
            return Err(Error::OutOfRange);
        }

        let (block_id, offset) = self.locate(id);
        let mut block = Block::new();
        self.disk.get(block_id, &mut block)?;
        *dst = *block.get::<INode>(offset);
        Ok(())
    }

    fn set(&mut self, id: InodeId, src: &INode) -> Result<()> {
        if id < ROOT_INODE || id >= self.num_inodes {
            return Err(Error::OutOfRange);
        }

        let (block_id, offset) = self.locate(id);
        let mut block = Block::new();
        self.disk.get(block_id, &mut block)?;
        *block.get_mut::<INode>(offset) = *src;
        self.disk.set(block_id, &block)
    }

    #[inline]
    fn root(&self) -> InodeId {
        ROOT_INODE
    }

    fn free_count(&self) -> Result<u64> {
        let blocks = self.num_inodes / INODES_PER_BLOCK as u64;
        let mut block = Block::new();
        let mut count = 0;

        for block_index in 0..blocks {
            self.disk.get(self.inode_block_start + block_index, &mut block)?;
            for slot in 0..INODES_PER_BLOCK {
                let id = block_index * INODES_PER_BLOCK as u64 + slot as u64;
                if id > ROOT_INODE && block.get::<INode>(slot * INODE_SIZE).is_free() {
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}
