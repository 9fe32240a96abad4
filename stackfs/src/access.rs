//! # 文件访问层
//!
//! 唯一同时面对存储、块分配器与 inode 表的组件，自身不持有持久状态。
//! 负责把路径与字节区间翻译成块级读写：
//! 路径解析、直接/一级/二级/三级间接块映射、稀疏补零、目录记录遍历。
//!
//! ## 块索引编码
//!
//! 逻辑偏移空间按区域划分：直接区、一级区、二级区、三级区。
//! 在 x+1 级索引块里，用子树覆盖的字节数做除法取槽位，取余后下降一级。

use std::sync::Arc;

use enumflags2::bitflags;
use log::debug;
use spin::Mutex;

use crate::block_manager::BlockManager;
use crate::inode_manager::INodeManager;
use crate::layout::{
    DirectoryRecord, FileType, INode, IndirectBlock, DIRECT_CAP, INDIRECT1_CAP, INDIRECT2_CAP,
    INDIRECT3_CAP, NAME_MAX_LEN, N_DIRECT, SCALE,
};
use crate::storage::{Block, Storage};
use crate::{BlockId, Error, InodeId, Result, BLOCK_SIZE};

const BLOCK_BYTES: u64 = BLOCK_SIZE as u64;

pub struct FileAccessEngine {
    disk: Arc<dyn Storage>,
    blocks: Arc<Mutex<dyn BlockManager>>,
    inodes: Arc<Mutex<dyn INodeManager>>,
}

/// 文件系统项的属性快照，驱动层的 getattr 数据源
#[repr(C)]
#[derive(Debug, Default)]
pub struct Stat {
    pub dev: u64,
    pub inode: u64,
    pub kind: StatKind,
    pub links: u32,
    pub size: u64,
    pub blocks: u64,
    pad: [u64; 5],
}

#[allow(clippy::upper_case_acronyms)]
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatKind {
    DIR = 0o040000,
    #[default]
    FILE = 0o100000,
    LINK = 0o020000,
}

impl FileAccessEngine {
    pub fn new(
        disk: Arc<dyn Storage>,
        blocks: Arc<Mutex<dyn BlockManager>>,
        inodes: Arc<Mutex<dyn INodeManager>>,
    ) -> Self {
        Self {
            disk,
            blocks,
            inodes,
        }
    }

    /// 把路径解析成 inode 编号；任一分量缺失返回 `Ok(None)`。
    /// 路径分量 `.`/`..` 与多余斜杠由驱动层先行规范化。
    pub fn lookup(&self, path: &str) -> Result<Option<InodeId>> {
        let root = self.inodes.lock().root();
        if path == "/" {
            return Ok(Some(root));
        }

        let mut cur = root;
        for name in path.trim_start_matches('/').split('/') {
            match self.component_lookup(cur, name)? {
                0 => return Ok(None),
                id => cur = id,
            }
        }
        Ok(Some(cur))
    }

    /// 从 `offset` 起读入 `buf`。起点在文件末尾及之后时报 `OutOfRange`；
    /// 区间探出末尾时收窄，返回实际读到的字节数。
    pub fn read(&self, path: &str, buf: &mut [u8], mut offset: u64) -> Result<usize> {
        let (_, inode) = self.load_file(path)?;

        if offset >= inode.size {
            return Err(Error::OutOfRange);
        }

        let mut size = (buf.len() as u64).min(inode.size - offset);
        let mut total = 0usize;

        while size > 0 {
            let id = self.block_at(&inode, offset)?;
            let mut block = Block::new();
            self.disk.get(id, &mut block)?;

            let in_off = (offset % BLOCK_BYTES) as usize;
            let n = (BLOCK_SIZE - in_off).min(size as usize);
            buf[total..total + n].copy_from_slice(&block.0[in_off..in_off + n]);

            offset += n as u64;
            size -= n as u64;
            total += n;
        }

        Ok(total)
    }

    /// 从 `offset` 起写入 `buf`，返回总传输字节数（含稀疏补零）。
    ///
    /// 三个阶段：覆写既有区间；起点越过末尾时先补零到起点；追加剩余数据。
    pub fn write(&self, path: &str, buf: &[u8], mut offset: u64) -> Result<usize> {
        let (id, mut inode) = self.load_file(path)?;

        let mut remaining = buf;
        let mut total = 0u64;

        // 1. 覆写
        while offset < inode.size && !remaining.is_empty() {
            let block_id = self.block_at(&inode, offset)?;
            let mut block = Block::new();
            self.disk.get(block_id, &mut block)?;

            let in_off = (offset % BLOCK_BYTES) as usize;
            let n = (BLOCK_SIZE - in_off)
                .min((inode.size - offset) as usize)
                .min(remaining.len());
            block.0[in_off..in_off + n].copy_from_slice(&remaining[..n]);
            self.disk.set(block_id, &block)?;

            offset += n as u64;
            remaining = &remaining[n..];
            total += n as u64;
        }

        if remaining.is_empty() {
            // 纯覆写不改变 inode，无须写回
            return Ok(total as usize);
        }

        // 2. 稀疏写：起点越过末尾，先补零
        if offset > inode.size {
            let gap = offset - inode.size;
            total += self.append_data(&mut inode, None, gap)?;
        }

        // 3. 追加
        total += self.append_data(&mut inode, Some(remaining), remaining.len() as u64)?;

        // 4. 写回 inode
        self.inodes.lock().set(id, &inode)?;
        Ok(total as usize)
    }

    /// 新建文件、目录或符号链接，返回新 inode 的编号。
    /// 目录记录优先复用步长够用的墓碑，其次是块内已用区域的末尾，
    /// 都没有就给目录追加一个全零块。
    pub fn create(&self, path: &str, kind: FileType) -> Result<InodeId> {
        let (dir_id, name) = self.split_parent(path)?;
        if name.is_empty() || name.len() > NAME_MAX_LEN {
            return Err(Error::OutOfRange);
        }
        if self.component_lookup(dir_id, name)? != 0 {
            return Err(Error::AlreadyExists);
        }

        let new_id = self.inodes.lock().reserve()?;
        self.inodes.lock().set(new_id, &INode::new(kind))?;
        self.insert_record(dir_id, name, new_id)?;

        debug!("create {path} -> inode {new_id}");
        Ok(new_id)
    }

    /// 原地墓碑化目录记录，释放数据块，归还 inode。
    /// 目录不能用 unlink 删除。
    pub fn unlink(&self, path: &str) -> Result<()> {
        let (dir_id, name) = self.split_parent(path)?;

        let Some((id, block_id, record_offset, mut block)) = self.find_record(dir_id, name)?
        else {
            return Err(Error::NotFound);
        };

        let mut inode = INode::default();
        self.inodes.lock().get(id, &mut inode)?;
        if inode.is_dir() {
            return Err(Error::IsADirectory);
        }

        // 墓碑：inode 号清零，步长保留，遍历链不断
        let mut record = DirectoryRecord::decode(&block.0[record_offset..]);
        record.inode_id = 0;
        record.encode(&mut block.0[record_offset..]);
        self.disk.set(block_id, &block)?;

        while inode.blocks > 0 {
            self.release_last_block(&mut inode)?;
        }
        self.inodes.lock().release(id)?;

        debug!("unlink {path} (inode {id})");
        Ok(())
    }

    /// 截断或延长到 `new_size`。缩短从尾部逐块归还；延长按稀疏语义补零。
    pub fn truncate(&self, path: &str, new_size: u64) -> Result<()> {
        let (id, mut inode) = self.load_file(path)?;

        if new_size >= inode.size {
            let grow = new_size - inode.size;
            if grow > 0 {
                self.append_data(&mut inode, None, grow)?;
            }
        } else {
            let keep = new_size.div_ceil(BLOCK_BYTES);
            while inode.blocks > keep {
                self.release_last_block(&mut inode)?;
            }
            inode.size = new_size;
        }

        self.inodes.lock().set(id, &inode)
    }

    /// 属性快照，驱动层 getattr 的数据源
    pub fn stat(&self, path: &str) -> Result<Stat> {
        let id = self.resolve(path)?;
        let mut inode = INode::default();
        self.inodes.lock().get(id, &mut inode)?;

        Ok(Stat {
            dev: 0,
            inode: id,
            kind: inode.kind.into(),
            links: inode.links,
            size: inode.size,
            blocks: inode.blocks,
            pad: Default::default(),
        })
    }
}

impl FileAccessEngine {
    fn resolve(&self, path: &str) -> Result<InodeId> {
        self.lookup(path)?.ok_or(Error::NotFound)
    }

    /// 解析路径并载入可按字节读写的 inode。
    /// 目录报 `IsADirectory`；符号链接按普通文件对待，驱动层用它存放目标路径。
    fn load_file(&self, path: &str) -> Result<(InodeId, INode)> {
        let id = self.resolve(path)?;
        let mut inode = INode::default();
        self.inodes.lock().get(id, &mut inode)?;

        match inode.kind {
            FileType::Directory => Err(Error::IsADirectory),
            FileType::Free => Err(Error::NotFound),
            FileType::Regular | FileType::Symlink => Ok((id, inode)),
        }
    }

    /// 逻辑字节偏移到数据块编号。前置条件：`offset < inode.size`。
    fn block_at(&self, inode: &INode, offset: u64) -> Result<BlockId> {
        if offset >= inode.size {
            return Err(Error::OutOfRange);
        }

        if offset < DIRECT_CAP * BLOCK_BYTES {
            return Ok(inode.block_pointers[(offset / BLOCK_BYTES) as usize]);
        }

        let scale = SCALE as u64;
        let mut offset = offset - DIRECT_CAP * BLOCK_BYTES;
        // 当前层级单棵子树覆盖的字节数
        let mut span = BLOCK_BYTES * scale;
        for level in 0..3 {
            if offset < span {
                let root = inode.block_pointers[N_DIRECT + level];
                return self.indirect_block_at(root, offset, span / scale);
            }
            offset -= span;
            span *= scale;
        }

        // 越过三级间接的上限，只能是调用方的编程错误
        Err(Error::OutOfRange)
    }

    /// 沿间接索引下降。`span` 是本层每个槽位所辖子树的字节数。
    fn indirect_block_at(&self, id: BlockId, offset: u64, span: u64) -> Result<BlockId> {
        let mut block = Block::new();
        self.disk.get(id, &mut block)?;
        let refs = block.get::<IndirectBlock>(0);

        let index = (offset / span) as usize;
        if span == BLOCK_BYTES {
            return Ok(refs[index]);
        }
        self.indirect_block_at(refs[index], offset % span, span / SCALE as u64)
    }

    /// 为文件分配下一个数据块，顺带补齐缺失的间接索引链。
    /// 安装子块后父块立即写回。返回新数据块的编号。
    fn allocate_next_block(&self, inode: &mut INode) -> Result<BlockId> {
        let scale = SCALE as u64;
        // 即将追加的逻辑块号，从 0 起
        let logical = inode.blocks;

        let data_block;
        if logical < DIRECT_CAP {
            data_block = self.blocks.lock().reserve()?;
            inode.block_pointers[logical as usize] = data_block;
        } else if logical < INDIRECT1_CAP {
            let rel = logical - DIRECT_CAP;

            // 区域的第一块需要新的一级索引根
            if rel == 0 {
                inode.block_pointers[N_DIRECT] = self.blocks.lock().reserve()?;
            }
            let root = inode.block_pointers[N_DIRECT];

            let mut block = Block::new();
            self.disk.get(root, &mut block)?;
            data_block = self.blocks.lock().reserve()?;
            block.get_mut::<IndirectBlock>(0)[rel as usize] = data_block;
            self.disk.set(root, &block)?;
        } else if logical < INDIRECT2_CAP {
            let rel = logical - INDIRECT1_CAP;

            if rel == 0 {
                inode.block_pointers[N_DIRECT + 1] = self.blocks.lock().reserve()?;
            }
            let root = inode.block_pointers[N_DIRECT + 1];

            let mut root_block = Block::new();
            self.disk.get(root, &mut root_block)?;
            // 新子树的第一块需要新的一级索引
            if rel % scale == 0 {
                let mid = self.blocks.lock().reserve()?;
                root_block.get_mut::<IndirectBlock>(0)[(rel / scale) as usize] = mid;
                self.disk.set(root, &root_block)?;
            }
            let mid = root_block.get::<IndirectBlock>(0)[(rel / scale) as usize];

            let mut mid_block = Block::new();
            self.disk.get(mid, &mut mid_block)?;
            data_block = self.blocks.lock().reserve()?;
            mid_block.get_mut::<IndirectBlock>(0)[(rel % scale) as usize] = data_block;
            self.disk.set(mid, &mid_block)?;
        } else if logical < INDIRECT3_CAP {
            let rel = logical - INDIRECT2_CAP;

            if rel == 0 {
                inode.block_pointers[N_DIRECT + 2] = self.blocks.lock().reserve()?;
            }
            let root = inode.block_pointers[N_DIRECT + 2];

            let mut root_block = Block::new();
            self.disk.get(root, &mut root_block)?;
            if rel % (scale * scale) == 0 {
                let mid = self.blocks.lock().reserve()?;
                root_block.get_mut::<IndirectBlock>(0)[(rel / (scale * scale)) as usize] = mid;
                self.disk.set(root, &root_block)?;
            }
            let mid = root_block.get::<IndirectBlock>(0)[(rel / (scale * scale)) as usize];

            let rel2 = rel % (scale * scale);
            let mut mid_block = Block::new();
            self.disk.get(mid, &mut mid_block)?;
            if rel2 % scale == 0 {
                let leaf = self.blocks.lock().reserve()?;
                mid_block.get_mut::<IndirectBlock>(0)[(rel2 / scale) as usize] = leaf;
                self.disk.set(mid, &mid_block)?;
            }
            let leaf = mid_block.get::<IndirectBlock>(0)[(rel2 / scale) as usize];

            let mut leaf_block = Block::new();
            self.disk.get(leaf, &mut leaf_block)?;
            data_block = self.blocks.lock().reserve()?;
            leaf_block.get_mut::<IndirectBlock>(0)[(rel2 % scale) as usize] = data_block;
            self.disk.set(leaf, &leaf_block)?;
        } else {
            // 文件已经顶到三级间接的上限
            return Err(Error::OutOfRange);
        }

        inode.blocks += 1;
        Ok(data_block)
    }

    /// 释放文件最后一个逻辑块，`allocate_next_block` 的逆操作。
    /// 子树随最后一个子块一起归还。
    fn release_last_block(&self, inode: &mut INode) -> Result<()> {
        let scale = SCALE as u64;
        let logical = inode.blocks - 1;

        if logical < DIRECT_CAP {
            self.blocks
                .lock()
                .release(inode.block_pointers[logical as usize])?;
            inode.block_pointers[logical as usize] = 0;
        } else if logical < INDIRECT1_CAP {
            let rel = logical - DIRECT_CAP;
            let root = inode.block_pointers[N_DIRECT];

            let mut block = Block::new();
            self.disk.get(root, &mut block)?;
            self.blocks
                .lock()
                .release(block.get::<IndirectBlock>(0)[rel as usize])?;

            if rel == 0 {
                self.blocks.lock().release(root)?;
                inode.block_pointers[N_DIRECT] = 0;
            }
        } else if logical < INDIRECT2_CAP {
            let rel = logical - INDIRECT1_CAP;
            let root = inode.block_pointers[N_DIRECT + 1];

            let mut root_block = Block::new();
            self.disk.get(root, &mut root_block)?;
            let mid = root_block.get::<IndirectBlock>(0)[(rel / scale) as usize];

            let mut mid_block = Block::new();
            self.disk.get(mid, &mut mid_block)?;
            self.blocks
                .lock()
                .release(mid_block.get::<IndirectBlock>(0)[(rel % scale) as usize])?;

            if rel % scale == 0 {
                self.blocks.lock().release(mid)?;
            }
            if rel == 0 {
                self.blocks.lock().release(root)?;
                inode.block_pointers[N_DIRECT + 1] = 0;
            }
        } else {
            let rel = logical - INDIRECT2_CAP;
            let root = inode.block_pointers[N_DIRECT + 2];

            let mut root_block = Block::new();
            self.disk.get(root, &mut root_block)?;
            let mid = root_block.get::<IndirectBlock>(0)[(rel / (scale * scale)) as usize];

            let rel2 = rel % (scale * scale);
            let mut mid_block = Block::new();
            self.disk.get(mid, &mut mid_block)?;
            let leaf = mid_block.get::<IndirectBlock>(0)[(rel2 / scale) as usize];

            let mut leaf_block = Block::new();
            self.disk.get(leaf, &mut leaf_block)?;
            self.blocks
                .lock()
                .release(leaf_block.get::<IndirectBlock>(0)[(rel2 % scale) as usize])?;

            if rel2 % scale == 0 {
                self.blocks.lock().release(leaf)?;
            }
            if rel % (scale * scale) == 0 {
                self.blocks.lock().release(mid)?;
            }
            if rel == 0 {
                self.blocks.lock().release(root)?;
                inode.block_pointers[N_DIRECT + 2] = 0;
            }
        }

        inode.blocks -= 1;
        Ok(())
    }

    /// 在文件末尾追加 `size` 字节：`src` 给数据，为空则补零。
    /// 先填满末尾块的剩余空间，再整块整块地分配；新块清零后落盘，
    /// 所以写不满的尾巴读回来一定是零。
    fn append_data(&self, inode: &mut INode, mut src: Option<&[u8]>, mut size: u64) -> Result<u64> {
        let mut total = 0u64;

        // 1. 末尾块还有空间，先用掉
        let tail = inode.size % BLOCK_BYTES;
        if size > 0 && tail != 0 {
            let id = self.block_at(inode, inode.size - 1)?;
            let mut block = Block::new();
            self.disk.get(id, &mut block)?;

            let n = (BLOCK_BYTES - tail).min(size) as usize;
            let dst = &mut block.0[tail as usize..tail as usize + n];
            match src {
                Some(bytes) => {
                    dst.copy_from_slice(&bytes[..n]);
                    src = Some(&bytes[n..]);
                }
                None => dst.fill(0),
            }
            self.disk.set(id, &block)?;

            inode.size += n as u64;
            size -= n as u64;
            total += n as u64;
        }

        // 2. 分配新块
        while size > 0 {
            let id = self.allocate_next_block(inode)?;
            let n = BLOCK_BYTES.min(size) as usize;

            let mut block = Block::new();
            if let Some(bytes) = src {
                block.0[..n].copy_from_slice(&bytes[..n]);
                src = Some(&bytes[n..]);
            }
            self.disk.set(id, &block)?;

            inode.size += n as u64;
            size -= n as u64;
            total += n as u64;
        }

        Ok(total)
    }

    /// 在目录 `dir` 下找名字。命中返回 inode 编号，没有返回 0。
    fn component_lookup(&self, dir: InodeId, name: &str) -> Result<InodeId> {
        let mut inode = INode::default();
        self.inodes.lock().get(dir, &mut inode)?;
        if !inode.is_dir() {
            return Err(Error::NotADirectory);
        }

        let mut offset = 0;
        while offset < inode.size {
            let id = self.block_at(&inode, offset)?;
            let mut block = Block::new();
            self.disk.get(id, &mut block)?;

            if let Some((found, _)) = Self::direct_lookup(&block, name) {
                return Ok(found);
            }
            offset += BLOCK_BYTES;
        }
        Ok(0)
    }

    /// 找到名字所在的记录：inode 编号、所在块、块内偏移与块内容
    fn find_record(
        &self,
        dir: InodeId,
        name: &str,
    ) -> Result<Option<(InodeId, BlockId, usize, Block)>> {
        let mut inode = INode::default();
        self.inodes.lock().get(dir, &mut inode)?;
        if !inode.is_dir() {
            return Err(Error::NotADirectory);
        }

        let mut offset = 0;
        while offset < inode.size {
            let id = self.block_at(&inode, offset)?;
            let mut block = Block::new();
            self.disk.get(id, &mut block)?;

            if let Some((found, record_offset)) = Self::direct_lookup(&block, name) {
                return Ok(Some((found, id, record_offset, block)));
            }
            offset += BLOCK_BYTES;
        }
        Ok(None)
    }

    /// 单个目录块内按步长遍历记录。
    /// 墓碑跳过；步长为 0 说明已用区域到头，停止。
    fn direct_lookup(block: &Block, name: &str) -> Option<(InodeId, usize)> {
        let mut offset = 0;
        while offset + DirectoryRecord::HEADER_SIZE <= BLOCK_SIZE {
            let record = DirectoryRecord::decode(&block.0[offset..]);
            if record.length == 0 {
                return None;
            }

            if record.inode_id != 0 {
                let start = offset + DirectoryRecord::HEADER_SIZE;
                let end = start + record.name_length as usize;
                if end <= BLOCK_SIZE && &block.0[start..end] == name.as_bytes() {
                    return Some((record.inode_id, offset));
                }
            }
            offset += record.length as usize;
        }
        None
    }

    /// 把记录写进目录。复用墓碑时保留原步长，免得断链。
    fn insert_record(&self, dir: InodeId, name: &str, inode_id: InodeId) -> Result<()> {
        let mut dir_inode = INode::default();
        self.inodes.lock().get(dir, &mut dir_inode)?;
        if !dir_inode.is_dir() {
            return Err(Error::NotADirectory);
        }

        let need = DirectoryRecord::stride_for(name);

        let mut offset = 0;
        while offset < dir_inode.size {
            let id = self.block_at(&dir_inode, offset)?;
            let mut block = Block::new();
            self.disk.get(id, &mut block)?;

            if let Some((record_offset, length)) = Self::vacant_slot(&block, need) {
                DirectoryRecord::write(&mut block.0[record_offset..], name, inode_id, length);
                return self.disk.set(id, &block);
            }
            offset += BLOCK_BYTES;
        }

        // 哪个块都放不下：目录追加一个全零块，记录落在块首。
        // 目录的尺寸始终是整块的倍数。
        self.append_data(&mut dir_inode, None, BLOCK_BYTES)?;
        let id = self.block_at(&dir_inode, dir_inode.size - BLOCK_BYTES)?;

        let mut block = Block::new();
        DirectoryRecord::write(&mut block.0, name, inode_id, need);
        self.disk.set(id, &block)?;
        self.inodes.lock().set(dir, &dir_inode)
    }

    /// 块内可放下步长为 `need` 的记录的位置：
    /// 步长够用的墓碑（保留原步长），或已用区域末尾（用 `need` 做步长）。
    fn vacant_slot(block: &Block, need: u16) -> Option<(usize, u16)> {
        let mut offset = 0;
        while offset + DirectoryRecord::HEADER_SIZE <= BLOCK_SIZE {
            let record = DirectoryRecord::decode(&block.0[offset..]);
            if record.length == 0 {
                // 已用区域结束；剩下的空间够就放这里
                if BLOCK_SIZE - offset >= need as usize {
                    return Some((offset, need));
                }
                return None;
            }
            if record.inode_id == 0 && record.length >= need {
                return Some((offset, record.length));
            }
            offset += record.length as usize;
        }
        None
    }

    /// 拆出父目录的 inode 与最后一个路径分量
    fn split_parent<'a>(&self, path: &'a str) -> Result<(InodeId, &'a str)> {
        let trimmed = path.trim_start_matches('/');
        let (dir_path, name) = match trimmed.rsplit_once('/') {
            Some((dir_path, name)) => (dir_path, name),
            None => ("", trimmed),
        };

        let mut cur = self.inodes.lock().root();
        if !dir_path.is_empty() {
            for component in dir_path.split('/') {
                match self.component_lookup(cur, component)? {
                    0 => return Err(Error::NotFound),
                    id => cur = id,
                }
            }
        }
        Ok((cur, name))
    }
}

impl From<FileType> for StatKind {
    fn from(kind: FileType) -> Self {
        match kind {
            FileType::Directory => Self::DIR,
            FileType::Symlink => Self::LINK,
            _ => Self::FILE,
        }
    }
}
