//! # 磁盘数据结构层
//!
//! stackfs 的磁盘布局：
//! 超级块 (块 0) | inode 区域 | 数据块区域
//!
//! 数据块区域里未分配的块由空闲链表串起来，链表头记在超级块中。

mod super_block;
pub use super_block::SuperBlock;

mod inode;
pub use inode::{FileType, INode, IndirectBlock};
pub use inode::{
    DIRECT_CAP, INDIRECT1_CAP, INDIRECT2_CAP, INDIRECT3_CAP, INODES_PER_BLOCK, INODE_SIZE,
    MAX_FILE_SIZE, N_DIRECT, SCALE,
};

mod free_list;
pub use free_list::{FreeListNode, FREE_LIST_CAP};

/// 目录项，也属于磁盘文件系统数据结构
mod dir_record;
pub use dir_record::{DirectoryRecord, NAME_MAX_LEN};
