//! stackfs 的宿主侧工具：把宿主目录里的普通文件打包进镜像的根目录。
//! FUSE 会话的操作分发由外部驱动承担，不在这里。

use std::fs;
use std::path::Path;

use log::{info, warn};
use stackfs::{FileType, Filesystem, Result};

/// 把 `source` 目录下的普通文件逐个写进镜像根目录
pub fn pack(image: &Filesystem, source: &Path) -> Result<()> {
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            warn!("skipping non-utf8 file name {:?}", name);
            continue;
        };

        let data = fs::read(entry.path())?;
        let path = format!("/{name}");
        image.engine().create(&path, FileType::Regular)?;
        image.engine().write(&path, &data, 0)?;
        info!("packed {path} ({} bytes)", data.len());
    }
    Ok(())
}
