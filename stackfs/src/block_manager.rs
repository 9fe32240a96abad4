//! # 数据块分配层
//!
//! 空闲链表是磁盘上的"栈的栈"：
//! 每个节点占一整块，节点内的编号数组是一个栈；
//! 链表头本身也是一个栈，头节点弹空之后，它自己的块就是下一次分配的结果。
//! 链表头指针记在超级块里，由本层独占改写。

use std::sync::Arc;

use log::debug;

use crate::layout::{FreeListNode, SuperBlock, FREE_LIST_CAP};
use crate::storage::{Block, Storage};
use crate::{BlockId, Error, Result};

/// 数据块分配器的能力集
pub trait BlockManager: Send {
    /// 取出一个空闲块的编号并标记为已分配；链表耗尽时报 `OutOfSpace`
    fn reserve(&mut self) -> Result<BlockId>;

    /// 把 `id` 归还链表。调用者保证 `id` 来自 `reserve` 且不再被引用。
    fn release(&mut self, id: BlockId) -> Result<()>;

    /// 当前空闲块总数，供 statfs 使用
    fn free_count(&self) -> Result<u64>;
}

pub struct FreeListBlockManager {
    disk: Arc<dyn Storage>,
    free_list_head: BlockId,
}

impl FreeListBlockManager {
    /// 从超级块恢复链表头
    pub fn mount(disk: Arc<dyn Storage>) -> Result<Self> {
        let free_list_head = SuperBlock::load(&*disk)?.free_list_head;
        Ok(Self {
            disk,
            free_list_head,
        })
    }

    /// mkfs：把整个数据区域串成链表。
    /// 每个节点块后面跟至多 `FREE_LIST_CAP` 个入栈的块，`next` 指向再往后的节点。
    /// 链表头写入 `sb`，由调用者负责持久化超级块。
    pub fn format(disk: &dyn Storage, sb: &mut SuperBlock) -> Result<()> {
        let end = sb.block_count;
        let mut node_id = sb.data_region_start();
        sb.free_list_head = if node_id < end { node_id } else { 0 };

        while node_id < end {
            let first = node_id + 1;
            let count = (FREE_LIST_CAP as u64).min(end - first);

            let mut block = Block::new();
            let node = block.get_mut::<FreeListNode>(0);
            node.next = if first + count < end { first + count } else { 0 };
            for i in 0..count {
                node.entries[i as usize] = first + i;
            }
            disk.set(node_id, &block)?;

            node_id = first + count;
        }

        debug!(
            "free list seeded over blocks [{}, {})",
            sb.data_region_start(),
            end
        );
        Ok(())
    }

    /// 链表头挪动后，把超级块中自己拥有的槽位写回去
    fn sync_head(&self) -> Result<()> {
        let mut sb = SuperBlock::load(&*self.disk)?;
        sb.free_list_head = self.free_list_head;
        sb.flush(&*self.disk)
    }
}

impl BlockManager for FreeListBlockManager {
    fn reserve(&mut self) -> Result<BlockId> {
        if self.free_list_head == 0 {
            return Err(Error::OutOfSpace);
        }

        let mut block = Block::new();
        self.disk.get(self.free_list_head, &mut block)?;
        let node = block.get_mut::<FreeListNode>(0);

        match node.top() {
            // 栈非空：弹出栈顶
            Some(top) => {
                let id = node.entries[top];
                node.entries[top] = 0;
                self.disk.set(self.free_list_head, &block)?;
                Ok(id)
            }
            // 栈已空：头节点自己的块就是本次分配
            None => {
                let id = self.free_list_head;
                self.free_list_head = node.next;
                self.sync_head()?;
                Ok(id)
            }
        }
    }

    fn release(&mut self, id: BlockId) -> Result<()> {
        if self.free_list_head != 0 {
            let mut block = Block::new();
            self.disk.get(self.free_list_head, &mut block)?;
            let node = block.get_mut::<FreeListNode>(0);

            if let Some(slot) = node.vacant() {
                node.entries[slot] = id;
                return self.disk.set(self.free_list_head, &block);
            }
        }

        // 链表为空或头节点已满：被归还的块成为新的头节点
        let mut block = Block::new();
        block.get_mut::<FreeListNode>(0).next = self.free_list_head;
        self.disk.set(id, &block)?;
        self.free_list_head = id;
        self.sync_head()
    }

    fn free_count(&self) -> Result<u64> {
        let mut count = 0;
        let mut node_id = self.free_list_head;
        let mut block = Block::new();

        while node_id != 0 {
            self.disk.get(node_id, &mut block)?;
            let node = block.get::<FreeListNode>(0);
            // 节点本身也是可分配的块
            count += 1 + node.top().map_or(0, |top| top + 1) as u64;
            node_id = node.next;
        }
        Ok(count)
    }
}
