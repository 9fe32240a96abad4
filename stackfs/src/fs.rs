//! # 容器层
//!
//! [`Filesystem`] 是运行期对象图的根，依次拥有存储、块分配器、
//! inode 表与访问引擎；引擎只持有共享引用，图中没有环。

use std::io;
use std::sync::Arc;

use log::debug;
use spin::Mutex;

use crate::access::FileAccessEngine;
use crate::block_manager::{BlockManager, FreeListBlockManager};
use crate::inode_manager::{INodeManager, LinearINodeManager};
use crate::layout::{SuperBlock, INODES_PER_BLOCK};
use crate::storage::Storage;
use crate::{Error, InodeId, Result};

pub struct Filesystem {
    disk: Arc<dyn Storage>,
    blocks: Arc<Mutex<dyn BlockManager>>,
    inodes: Arc<Mutex<dyn INodeManager>>,
    engine: FileAccessEngine,
}

/// 文件系统级统计，驱动层 statfs 的数据源
#[derive(Debug)]
pub struct FsStat {
    pub block_size: u64,
    pub block_count: u64,
    pub free_blocks: u64,
    pub inode_count: u64,
    pub free_inodes: u64,
}

impl Filesystem {
    /// mkfs：在空白设备上写出一个合法的空文件系统，然后挂载它。
    /// `inode_blocks` 缺省为总块数的十分之一。
    pub fn format(disk: Arc<dyn Storage>, inode_blocks: Option<u64>) -> Result<Self> {
        let block_count = disk.block_count();
        let inode_blocks = inode_blocks.unwrap_or(block_count / 10).max(1);
        if 1 + inode_blocks >= block_count {
            // 超级块加 inode 区域必须给数据区域留下空间
            return Err(Error::OutOfRange);
        }

        let mut sb = SuperBlock::new(block_count, inode_blocks);
        FreeListBlockManager::format(&*disk, &mut sb)?;
        sb.flush(&*disk)?;
        LinearINodeManager::format(&*disk, &sb)?;

        debug!("formatted: {block_count} blocks, {inode_blocks} inode blocks");
        Self::mount(disk)
    }

    /// 校验超级块并重建各管理器
    pub fn mount(disk: Arc<dyn Storage>) -> Result<Self> {
        let sb = SuperBlock::load(&*disk)?;
        if !sb.is_valid() {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad superblock").into());
        }

        let blocks: Arc<Mutex<dyn BlockManager>> =
            Arc::new(Mutex::new(FreeListBlockManager::mount(disk.clone())?));
        let inodes: Arc<Mutex<dyn INodeManager>> =
            Arc::new(Mutex::new(LinearINodeManager::mount(disk.clone())?));
        let engine = FileAccessEngine::new(disk.clone(), blocks.clone(), inodes.clone());

        debug!(
            "mounted: {} blocks, inode region [{}, {})",
            sb.block_count,
            sb.inode_block_start,
            sb.data_region_start()
        );
        Ok(Self {
            disk,
            blocks,
            inodes,
            engine,
        })
    }

    #[inline]
    pub fn engine(&self) -> &FileAccessEngine {
        &self.engine
    }

    #[inline]
    pub fn root(&self) -> InodeId {
        self.inodes.lock().root()
    }

    pub fn super_block(&self) -> Result<SuperBlock> {
        SuperBlock::load(&*self.disk)
    }

    pub fn stat_fs(&self) -> Result<FsStat> {
        let sb = self.super_block()?;
        Ok(FsStat {
            block_size: sb.block_size,
            block_count: sb.block_count,
            free_blocks: self.blocks.lock().free_count()?,
            inode_count: sb.inode_block_count * INODES_PER_BLOCK as u64,
            free_inodes: self.inodes.lock().free_count()?,
        })
    }
}
