//! Atomic file replacement shared by the file store and the env-file writer.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// Contents written next to their destination, not yet visible there.
#[derive(Debug)]
pub struct Staged {
    tmp: NamedTempFile,
    path: PathBuf,
}

impl Staged {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rename the staged file over its destination.
    pub fn commit(self) -> io::Result<()> {
        self.tmp.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }
}

/// Write `contents` to a temp file in `path`'s directory, creating missing
/// parents. Dropping the result discards the temp file.
pub fn stage(path: &Path, contents: &[u8]) -> io::Result<Staged> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path has no parent: {}", path.display()),
        )
    })?;
    fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    Ok(Staged {
        tmp,
        path: path.to_path_buf(),
    })
}

/// Replace `path` with `contents`. Readers see either the old or the new
/// contents, never a partial write.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    stage(path, contents)?.commit()
}
