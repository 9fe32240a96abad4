use clap::Parser;
use std::path::PathBuf;

/// Write an empty stackfs onto an image file, optionally packing host files into it
#[derive(Parser)]
pub struct Cli {
    /// Image file or device to format
    #[arg(long, short = 'f')]
    pub disk_file: PathBuf,

    /// Total number of blocks
    #[arg(long, short = 'n')]
    pub block_count: u64,

    /// Minimum number of inodes (defaults to one tenth of the blocks as inode blocks)
    #[arg(long, short = 'i')]
    pub inode_count: Option<u64>,

    /// Host directory whose regular files are packed into the image root
    #[arg(long, short)]
    pub source: Option<PathBuf>,
}
