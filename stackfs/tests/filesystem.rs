use std::sync::Arc;

use stackfs::{
    Error, FileStorage, FileType, Filesystem, MemoryStorage, StatKind, BLOCK_SIZE, ROOT_INODE,
};

const S: usize = BLOCK_SIZE;
/// 1024 块、64 个 inode 块的设备上，数据区域的大小
const DATA_BLOCKS: u64 = 1024 - 1 - 64;

fn fresh() -> Filesystem {
    Filesystem::format(Arc::new(MemoryStorage::new(1024)), Some(64)).unwrap()
}

fn pattern(len: usize, seed: usize) -> Vec<u8> {
    (0..len).map(|i| ((i + seed) % 251) as u8).collect()
}

#[test]
fn write_then_read_back() {
    let fs = fresh();
    let engine = fs.engine();

    assert_eq!(2, engine.create("/a", FileType::Regular).unwrap());
    assert_eq!(5, engine.write("/a", b"hello", 0).unwrap());

    let mut buf = [0u8; 5];
    assert_eq!(5, engine.read("/a", &mut buf, 0).unwrap());
    assert_eq!(b"hello", &buf);

    let stat = engine.stat("/a").unwrap();
    assert_eq!(5, stat.size);
    assert_eq!(1, stat.blocks);
}

#[test]
fn sparse_write_fills_zero() {
    let fs = fresh();
    let engine = fs.engine();
    engine.create("/a", FileType::Regular).unwrap();
    engine.write("/a", b"hello", 0).unwrap();

    // 补零也计入返回值：1 + (4100 - 5)
    assert_eq!(4096, engine.write("/a", b"X", 4100).unwrap());

    let stat = engine.stat("/a").unwrap();
    assert_eq!(4101, stat.size);
    assert_eq!(2, stat.blocks);

    let mut gap = vec![0xffu8; 4095];
    assert_eq!(4095, engine.read("/a", &mut gap, 5).unwrap());
    assert!(gap.iter().all(|&b| b == 0));

    let mut last = [0u8; 1];
    assert_eq!(1, engine.read("/a", &mut last, 4100).unwrap());
    assert_eq!(b"X", &last);
}

#[test]
fn read_bounds() {
    let fs = fresh();
    let engine = fs.engine();
    engine.create("/a", FileType::Regular).unwrap();
    engine.write("/a", &pattern(100, 0), 0).unwrap();

    let mut buf = [0u8; 10];
    assert!(matches!(
        engine.read("/a", &mut buf, 200),
        Err(Error::OutOfRange)
    ));
    // 正好在文件末尾也不行
    assert!(matches!(
        engine.read("/a", &mut buf, 100),
        Err(Error::OutOfRange)
    ));

    // 探出末尾的区间收窄到文件末尾
    let mut buf = vec![0u8; 100];
    assert_eq!(60, engine.read("/a", &mut buf, 40).unwrap());
    assert_eq!(&pattern(100, 0)[40..], &buf[..60]);
}

#[test]
fn write_edges() {
    let fs = fresh();
    let engine = fs.engine();
    engine.create("/a", FileType::Regular).unwrap();

    // 零字节写是空操作
    assert_eq!(0, engine.write("/a", b"", 0).unwrap());
    assert_eq!(0, engine.stat("/a").unwrap().size);

    // offset == size 的写是纯追加
    engine.write("/a", b"ab", 0).unwrap();
    engine.write("/a", b"cd", 2).unwrap();
    let mut buf = [0u8; 4];
    engine.read("/a", &mut buf, 0).unwrap();
    assert_eq!(b"abcd", &buf);

    // 跨块边界的覆写
    engine.write("/a", &vec![0; 2 * S], 0).unwrap();
    let data = pattern(100, 7);
    assert_eq!(100, engine.write("/a", &data, 4050).unwrap());
    let mut buf = vec![0u8; 200];
    engine.read("/a", &mut buf, 4000).unwrap();
    assert!(buf[..50].iter().all(|&b| b == 0));
    assert_eq!(&data, &buf[50..150]);
    assert!(buf[150..].iter().all(|&b| b == 0));
}

#[test]
fn growth_into_single_indirect() {
    let fs = fresh();
    let engine = fs.engine();
    engine.create("/a", FileType::Regular).unwrap();

    // 10 个直接块 + 一级索引的第一个子块
    let data = pattern(11 * S, 3);
    assert_eq!(11 * S, engine.write("/a", &data, 0).unwrap());
    assert_eq!(11, engine.stat("/a").unwrap().blocks);

    // 11 个数据块 + 1 个索引块 + 根目录的 1 个块
    assert_eq!(DATA_BLOCKS - 13, fs.stat_fs().unwrap().free_blocks);

    // 直接区与一级区交界处的数据完好
    let mut buf = vec![0u8; 32];
    engine.read("/a", &mut buf, (10 * S - 16) as u64).unwrap();
    assert_eq!(&data[10 * S - 16..10 * S + 16], &buf[..]);
}

#[test]
fn growth_into_double_indirect() {
    let fs = fresh();
    let engine = fs.engine();
    engine.create("/a", FileType::Regular).unwrap();

    // 523 个数据块：10 直接 + 512 一级 + 二级的第一个子块
    let blocks = 523;
    let data = pattern(blocks * S, 11);
    assert_eq!(blocks * S, engine.write("/a", &data, 0).unwrap());
    assert_eq!(blocks as u64, engine.stat("/a").unwrap().blocks);

    // 链块：一级根 + 二级根 + 二级下第一个一级块
    assert_eq!(
        DATA_BLOCKS - 1 - (blocks as u64 + 3),
        fs.stat_fs().unwrap().free_blocks
    );

    // 各区域边界处抽查
    for offset in [0, 10 * S - 1, 10 * S, 522 * S, blocks * S - 1] {
        let mut buf = [0u8; 1];
        engine.read("/a", &mut buf, offset as u64).unwrap();
        assert_eq!(data[offset], buf[0], "mismatch at offset {offset}");
    }

    // 截断到零要归还全部数据块与链块
    engine.truncate("/a", 0).unwrap();
    let stat = engine.stat("/a").unwrap();
    assert_eq!(0, stat.size);
    assert_eq!(0, stat.blocks);
    assert_eq!(DATA_BLOCKS - 1, fs.stat_fs().unwrap().free_blocks);
}

#[test]
fn truncate_grows_with_zeros() {
    let fs = fresh();
    let engine = fs.engine();
    engine.create("/a", FileType::Regular).unwrap();
    engine.write("/a", b"abc", 0).unwrap();

    engine.truncate("/a", 10000).unwrap();
    assert_eq!(10000, engine.stat("/a").unwrap().size);

    let mut buf = vec![0xffu8; 9997];
    assert_eq!(9997, engine.read("/a", &mut buf, 3).unwrap());
    assert!(buf.iter().all(|&b| b == 0));
}

#[test]
fn truncate_shrinks_and_releases() {
    let fs = fresh();
    let engine = fs.engine();
    engine.create("/a", FileType::Regular).unwrap();
    engine.write("/a", &pattern(5 * S + 100, 0), 0).unwrap();

    engine.truncate("/a", 5).unwrap();
    let stat = engine.stat("/a").unwrap();
    assert_eq!(5, stat.size);
    assert_eq!(1, stat.blocks);
    assert_eq!(DATA_BLOCKS - 2, fs.stat_fs().unwrap().free_blocks);

    let mut buf = [0u8; 5];
    engine.read("/a", &mut buf, 0).unwrap();
    assert_eq!(&pattern(5, 0)[..], &buf);
}

#[test]
fn lookup_paths() {
    let fs = fresh();
    let engine = fs.engine();

    assert_eq!(Some(ROOT_INODE), engine.lookup("/").unwrap());
    assert_eq!(None, engine.lookup("/missing").unwrap());

    engine.create("/dir", FileType::Directory).unwrap();
    let file_id = engine.create("/dir/f", FileType::Regular).unwrap();
    engine.write("/dir/f", b"nested", 0).unwrap();

    assert_eq!(Some(file_id), engine.lookup("/dir/f").unwrap());
    assert_eq!(None, engine.lookup("/dir/nope").unwrap());

    // 没有变动时重复解析结果一致
    assert_eq!(Some(file_id), engine.lookup("/dir/f").unwrap());

    let mut buf = [0u8; 6];
    engine.read("/dir/f", &mut buf, 0).unwrap();
    assert_eq!(b"nested", &buf);

    assert_eq!(StatKind::DIR, engine.stat("/dir").unwrap().kind);
    assert_eq!(StatKind::FILE, engine.stat("/dir/f").unwrap().kind);
}

#[test]
fn type_errors() {
    let fs = fresh();
    let engine = fs.engine();
    engine.create("/dir", FileType::Directory).unwrap();
    engine.create("/a", FileType::Regular).unwrap();

    let mut buf = [0u8; 4];
    assert!(matches!(
        engine.read("/dir", &mut buf, 0),
        Err(Error::IsADirectory)
    ));
    assert!(matches!(
        engine.write("/dir", b"x", 0),
        Err(Error::IsADirectory)
    ));
    assert!(matches!(engine.unlink("/dir"), Err(Error::IsADirectory)));

    // 中间分量必须是目录
    assert!(matches!(
        engine.lookup("/a/x"),
        Err(Error::NotADirectory)
    ));

    assert!(matches!(
        engine.create("/dir", FileType::Directory),
        Err(Error::AlreadyExists)
    ));
    assert!(matches!(
        engine.create("/nope/f", FileType::Regular),
        Err(Error::NotFound)
    ));
    assert!(matches!(engine.unlink("/nope"), Err(Error::NotFound)));
    assert!(matches!(
        engine.read("/missing", &mut buf, 0),
        Err(Error::NotFound)
    ));
}

#[test]
fn unlink_tombstones_in_place() {
    let fs = fresh();
    let engine = fs.engine();
    engine.create("/f1", FileType::Regular).unwrap();
    engine.create("/f2", FileType::Regular).unwrap();
    engine.create("/f3", FileType::Regular).unwrap();
    engine.write("/f2", &pattern(3 * S, 5), 0).unwrap();

    let free_inodes = fs.stat_fs().unwrap().free_inodes;
    let free_blocks = fs.stat_fs().unwrap().free_blocks;

    engine.unlink("/f2").unwrap();
    assert_eq!(None, engine.lookup("/f2").unwrap());
    assert!(engine.lookup("/f1").unwrap().is_some());
    assert!(engine.lookup("/f3").unwrap().is_some());

    // inode 和数据块都回来了
    assert_eq!(free_inodes + 1, fs.stat_fs().unwrap().free_inodes);
    assert_eq!(free_blocks + 3, fs.stat_fs().unwrap().free_blocks);

    // 墓碑被复用，目录不长大
    assert_eq!(S as u64, engine.stat("/").unwrap().size);
    engine.create("/f4", FileType::Regular).unwrap();
    assert_eq!(S as u64, engine.stat("/").unwrap().size);
    assert!(engine.lookup("/f4").unwrap().is_some());
}

#[test]
fn directory_grows_by_whole_blocks() {
    let fs = fresh();
    let engine = fs.engine();

    // 名字 4 字节的记录步长 16，一个块放 256 条
    for i in 0..300 {
        engine
            .create(&format!("/f{i:03}"), FileType::Regular)
            .unwrap();
    }

    assert_eq!(2 * S as u64, engine.stat("/").unwrap().size);
    assert!(engine.lookup("/f000").unwrap().is_some());
    assert!(engine.lookup("/f299").unwrap().is_some());
}

#[test]
fn symlink_stores_target_as_data() {
    let fs = fresh();
    let engine = fs.engine();
    engine.create("/ln", FileType::Symlink).unwrap();
    engine.write("/ln", b"/target/path", 0).unwrap();

    assert_eq!(StatKind::LINK, engine.stat("/ln").unwrap().kind);
    let mut buf = [0u8; 12];
    engine.read("/ln", &mut buf, 0).unwrap();
    assert_eq!(b"/target/path", &buf);
}

#[test]
fn statfs_counts() {
    let fs = fresh();
    let stat = fs.stat_fs().unwrap();

    assert_eq!(S as u64, stat.block_size);
    assert_eq!(1024, stat.block_count);
    assert_eq!(DATA_BLOCKS, stat.free_blocks);
    assert_eq!(64 * 16, stat.inode_count);
    // 0 号与根之外全部空闲
    assert_eq!(64 * 16 - 2, stat.free_inodes);
}

#[test]
fn persists_across_mount() {
    let mut path = std::env::temp_dir();
    path.push(format!("stackfs-image-{}", std::process::id()));

    let data = pattern(3000, 9);
    {
        let disk = Arc::new(FileStorage::create(&path, 128).unwrap());
        let fs = Filesystem::format(disk, None).unwrap();
        fs.engine().create("/f", FileType::Regular).unwrap();
        fs.engine().write("/f", &data, 0).unwrap();
    }

    let disk = Arc::new(FileStorage::open(&path).unwrap());
    let fs = Filesystem::mount(disk).unwrap();
    assert_eq!(128, fs.stat_fs().unwrap().block_count);

    let mut buf = vec![0u8; 3000];
    assert_eq!(3000, fs.engine().read("/f", &mut buf, 0).unwrap());
    assert_eq!(data, buf);

    std::fs::remove_file(&path).unwrap();
}
