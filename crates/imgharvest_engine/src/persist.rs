use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("output directory missing or not writable: {0}")]
    OutputDir(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Ensure output directory exists; create if missing.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
        if !meta.is_dir() {
            return Err(PersistError::OutputDir("path is not a directory".into()));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
    }
    // Basic writability probe: try creating a temp file.
    NamedTempFile::new_in(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
    Ok(())
}

/// First free path for `filename` inside `dir`: the name itself, then
/// `{stem}_1{ext}`, `{stem}_2{ext}`, ...
pub fn unique_path(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, ext) = split_extension(filename);
    let mut index = 1usize;
    loop {
        let candidate = dir.join(format!("{stem}_{index}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        index += 1;
    }
}

/// Splits `name.ext` into (`name`, `.ext`); dotfiles keep their leading dot
/// in the stem.
pub(crate) fn split_extension(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(idx) if idx > 0 => filename.split_at(idx),
        _ => (filename, ""),
    }
}

/// Bytes written to a hidden temp file next to their destination; nothing
/// appears under the final name until [`StagedFile::commit`] succeeds, and
/// dropping an uncommitted file removes it.
pub struct StagedFile {
    dir: PathBuf,
    tmp: NamedTempFile,
    written: u64,
}

impl StagedFile {
    pub fn new_in(dir: &Path) -> Result<Self, PersistError> {
        let tmp = NamedTempFile::new_in(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            tmp,
            written: 0,
        })
    }

    pub fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), PersistError> {
        self.tmp.write_all(chunk)?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Moves the staged bytes to the first free variant of `filename`.
    /// Never replaces an existing file.
    pub fn commit(mut self, filename: &str) -> Result<PathBuf, PersistError> {
        self.tmp.flush()?;
        self.tmp.as_file_mut().sync_all()?;

        let mut tmp = self.tmp;
        loop {
            let target = unique_path(&self.dir, filename);
            match tmp.persist_noclobber(&target) {
                Ok(_) => return Ok(target),
                Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                    tmp = err.file;
                }
                Err(err) => return Err(PersistError::Io(err.error)),
            }
        }
    }
}

/// Atomically write content to `{dir}/{filename}` by writing a temp file then renaming.
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Replaces `{dir}/{filename}` with `content`. Used for in-place rewrites
    /// of files this pipeline already owns.
    pub fn write(&self, filename: &str, content: &[u8]) -> Result<PathBuf, PersistError> {
        ensure_output_dir(&self.dir)?;

        let target = self.dir.join(filename);
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content)?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;

        // persist renames over the target, so a failure leaves it untouched.
        tmp.persist(&target).map_err(|e| PersistError::Io(e.error))?;
        Ok(target)
    }
}
