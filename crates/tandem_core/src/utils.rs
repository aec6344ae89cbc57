//! Small filesystem helpers shared by the persistent stores.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use crate::error::{Result, TandemError};

/// Write `contents` to `path` through a sibling temp file and a rename, so a
/// crash never leaves a half-written file behind.
pub(crate) fn write_file_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    let write = || -> std::io::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    };
    write().map_err(|source| TandemError::FileWrite {
        path: path.to_path_buf(),
        source,
    })
}

/// Read `path`, returning `None` if it does not exist.
pub(crate) fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(TandemError::FileRead {
            path: path.to_path_buf(),
            source,
        }),
    }
}
