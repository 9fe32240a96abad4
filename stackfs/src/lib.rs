//! # stackfs
//!
//! 面向用户态驱动的块寻址文件系统核心。
//! 把文件级操作翻译成对定长块设备的读写。

/* stackfs 的整体架构，自下而上 */

// 存储层：定长块数组的抽象，内存与文件两种后端
mod storage;
pub use storage::{Block, FileStorage, MemoryStorage, Storage};

// 磁盘数据结构层：超级块、inode、目录记录、空闲链表节点
mod layout;
pub use layout::{DirectoryRecord, FileType, FreeListNode, INode, SuperBlock};
pub use layout::{INODES_PER_BLOCK, INODE_SIZE, MAX_FILE_SIZE, NAME_MAX_LEN, N_DIRECT, SCALE};

// 数据块分配层：持久化空闲链表
mod block_manager;
pub use block_manager::{BlockManager, FreeListBlockManager};

// inode 表管理层：线性扫描分配
mod inode_manager;
pub use inode_manager::{INodeManager, LinearINodeManager};

// 文件访问层：路径解析、块映射、按字节区间读写
mod access;
pub use access::{FileAccessEngine, Stat, StatKind};

// 容器层：所有权根，mkfs 与挂载
mod fs;
pub use fs::{Filesystem, FsStat};

mod error;
pub use error::{Error, Result};

pub const MAGIC: u64 = 0x73_74_61_63_6b_66_73; // "stackfs"
/// 一个磁盘块的大小为 4096 个字节
pub const BLOCK_SIZE: usize = 4096;

/// 块在设备上的编号
pub type BlockId = u64;
/// inode 在 inode 表中的编号；0 表示"不存在"
pub type InodeId = u64;

/// 根目录的 inode 编号
pub const ROOT_INODE: InodeId = 1;
