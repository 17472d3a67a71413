//! Where downloaded bytes end up

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::naming::{long_name, short_name, unique_name};

/// An open local file being filled by a download
pub trait LocalFile: Write {
    /// Human-readable location for messages and the history log
    fn location(&self) -> String;
}

pub trait Storage {
    /// Create a fresh file for `remote`; never overwrites an existing one
    fn create(&mut self, remote: &str) -> Result<Box<dyn LocalFile>>;
}

/// Downloads directory on the local filesystem
pub struct FsStorage {
    dir: PathBuf,
    short_names: bool,
}

impl FsStorage {
    pub fn new<P: AsRef<Path>>(dir: P, short_names: bool) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            short_names,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Local path a download of `remote` would get right now
    pub fn local_path(&self, remote: &str) -> PathBuf {
        let name = if self.short_names {
            short_name(remote)
        } else {
            long_name(remote)
        };
        let unique = unique_name(&name, self.short_names, |n| self.dir.join(n).exists());
        self.dir.join(unique)
    }
}

struct FsFile {
    file: File,
    path: PathBuf,
}

impl Write for FsFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl LocalFile for FsFile {
    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

impl Storage for FsStorage {
    fn create(&mut self, remote: &str) -> Result<Box<dyn LocalFile>> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create {}", self.dir.display()))?;
        let path = self.local_path(remote);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("create {}", path.display()))?;
        Ok(Box::new(FsFile { file, path }))
    }
}
