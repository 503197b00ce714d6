//! Generated files backing `envf` substitutions.
//!
//! Every generated file is named `envsync-envf-<random>` so that paths embedded
//! in arguments, env vars, or env files can be recognized and compared by
//! content instead of by their volatile name.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::ResolveError;

pub const GENERATED_FILE_PREFIX: &str = "envsync-envf-";

static GENERATED_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[^\s=:,;"'\x00]*envsync-envf-[A-Za-z0-9]+"#).unwrap()
});

/// Directory in which generated files are created.
#[derive(Debug, Clone)]
pub struct ArtifactDir {
    dir: PathBuf,
}

impl Default for ArtifactDir {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl ArtifactDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Write `content` to a new uniquely named file and return its path.
    pub fn create(&self, content: &str) -> Result<PathBuf, ResolveError> {
        fs::create_dir_all(&self.dir).map_err(|err| ResolveError::io(&self.dir, err))?;
        let mut file = tempfile::Builder::new()
            .prefix(GENERATED_FILE_PREFIX)
            .rand_bytes(12)
            .tempfile_in(&self.dir)
            .map_err(|err| ResolveError::io(&self.dir, err))?;
        file.write_all(content.as_bytes())
            .map_err(|err| ResolveError::io(file.path(), err))?;
        let path = file
            .into_temp_path()
            .keep()
            .map_err(|err| ResolveError::io(&self.dir, err.error))?;
        debug!(path = %path.display(), bytes = content.len(), "created generated file");
        Ok(path)
    }
}

/// Whether `path` follows the generated-file naming convention.
pub fn is_generated(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(GENERATED_FILE_PREFIX))
}

/// Replace every generated path embedded in `text` with a digest of the
/// file's content. Unreadable files keep their path, which compares unequal.
pub fn normalize_generated(text: &str) -> String {
    if !text.contains(GENERATED_FILE_PREFIX) {
        return text.to_string();
    }
    GENERATED_PATH_RE
        .replace_all(text, |caps: &Captures<'_>| {
            let path = Path::new(&caps[0]);
            match fs::read(path) {
                Ok(bytes) => format!("envf:sha256:{}", hex::encode(Sha256::digest(&bytes))),
                Err(_) => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Remove generated files, ignoring ones that are already gone.
pub fn remove_generated<'a, I>(paths: I)
where
    I: IntoIterator<Item = &'a PathBuf>,
{
    for path in paths {
        if !is_generated(path) {
            warn!(path = %path.display(), "refusing to remove non-generated file");
            continue;
        }
        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed generated file"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(path = %path.display(), err = %err, "failed to remove generated file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_files_follow_convention() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = ArtifactDir::new(temp.path());
        let a = dir.create("hello").expect("create");
        let b = dir.create("hello").expect("create");
        assert_ne!(a, b);
        assert!(is_generated(&a));
        assert_eq!(fs::read_to_string(&a).expect("read"), "hello");
    }

    #[test]
    fn normalize_compares_by_content() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = ArtifactDir::new(temp.path());
        let a = dir.create("same").expect("create");
        let b = dir.create("same").expect("create");
        let c = dir.create("other").expect("create");

        let arg = |path: &Path| format!("--cert={}", path.display());
        assert_eq!(normalize_generated(&arg(&a)), normalize_generated(&arg(&b)));
        assert_ne!(normalize_generated(&arg(&a)), normalize_generated(&arg(&c)));
        assert!(normalize_generated(&arg(&a)).starts_with("--cert=envf:sha256:"));
    }

    #[test]
    fn normalize_leaves_plain_text_alone() {
        assert_eq!(normalize_generated("--port=8080"), "--port=8080");
    }

    #[test]
    fn remove_skips_foreign_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let foreign = temp.path().join("keep.txt");
        fs::write(&foreign, "x").expect("write");
        let generated = ArtifactDir::new(temp.path()).create("x").expect("create");

        remove_generated([&foreign, &generated]);
        assert!(foreign.exists());
        assert!(!generated.exists());
        // Second removal is a no-op.
        remove_generated([&generated]);
    }
}
