use std::fs::{self, File};
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
}

impl FileKind {
    /// Classifies `path` without following symlinks. `None` when it no longer exists.
    pub fn of(path: &Path) -> Option<Self> {
        let metadata = fs::symlink_metadata(path).ok()?;
        let file_type = metadata.file_type();
        if file_type.is_symlink() {
            Some(FileKind::Symlink)
        } else if file_type.is_dir() {
            Some(FileKind::Directory)
        } else {
            Some(FileKind::File)
        }
    }
}

/// Creates `path` with zero length, truncating any existing contents.
pub fn create_empty_file(path: &Path) -> io::Result<()> {
    File::create(path).map(|_| ())
}
