mod cli;

use std::sync::Arc;

use clap::Parser;
use cli::Cli;
use stackfs::{FileStorage, Filesystem, INODES_PER_BLOCK};
use stackfs_fuse::pack;

fn main() -> stackfs::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let inode_blocks = cli
        .inode_count
        .map(|count| count.div_ceil(INODES_PER_BLOCK as u64));

    let disk = Arc::new(FileStorage::create(&cli.disk_file, cli.block_count)?);
    let fs = Filesystem::format(disk, inode_blocks)?;

    if let Some(source) = &cli.source {
        pack(&fs, source)?;
    }

    let stat = fs.stat_fs()?;
    println!(
        "{}: {} blocks of {} bytes, {} inodes, {} data blocks free",
        cli.disk_file.display(),
        stat.block_count,
        stat.block_size,
        stat.inode_count,
        stat.free_blocks,
    );
    Ok(())
}
