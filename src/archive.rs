//! Build context archiving.
//!
//! Streams a directory subtree into a gzip-compressed tar archive whose entry
//! names are relative to the archive root, which is what the engine's image
//! build expects as its context.
//!
//! ```text
//! /p/Dockerfile      ->  "Dockerfile"
//! /p/app             ->  "app"          (directory header, no payload)
//! /p/app/main.sh     ->  "app/main.sh"  (header + exact bytes)
//! /p/app/link        ->  "app/link"     (symlink header only)
//! ```
//!
//! Any error while walking or reading aborts the whole archive; callers must
//! discard whatever was written to their sinks.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use walkdir::WalkDir;

use crate::error::ArchiveError;

/// Ensure the archive root exists and is readable.
pub fn check_source(root: &Path) -> Result<(), ArchiveError> {
    fs::metadata(root)
        .and_then(|_| fs::read_dir(root).map(|_| ()))
        .map_err(|source| ArchiveError::SourceNotFound {
            path: root.to_path_buf(),
            source,
        })
}

/// Archive-relative name for `path` under `root`.
///
/// The root prefix is removed and leading separators are stripped. Name bytes
/// are kept exactly as the filesystem reports them. Returns `None` for the
/// root itself, which has no entry of its own.
pub fn archive_name(root: &Path, path: &Path) -> Option<PathBuf> {
    let relative = path.strip_prefix(root).ok()?;
    let name: PathBuf = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();
    if name.as_os_str().is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Tar type for an entry written as a bare header, or `None` when tar has no
/// representation for it (sockets).
fn header_only_type(file_type: fs::FileType) -> Option<tar::EntryType> {
    if file_type.is_symlink() {
        return Some(tar::EntryType::Symlink);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;

        if file_type.is_fifo() {
            return Some(tar::EntryType::Fifo);
        }
        if file_type.is_char_device() {
            return Some(tar::EntryType::Char);
        }
        if file_type.is_block_device() {
            return Some(tar::EntryType::Block);
        }
    }
    None
}

/// Write a gzip-compressed tar of everything under `root` into `sink`.
///
/// Returns the sink once the gzip stream has been finished.
pub fn archive_directory<W: Write>(root: &Path, sink: W) -> Result<W, ArchiveError> {
    check_source(root)?;

    let mut builder = tar::Builder::new(GzEncoder::new(sink, Compression::default()));
    builder.follow_symlinks(false);

    // WalkDir yields a directory before any of its children.
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        let Some(name) = archive_name(root, entry.path()) else {
            continue;
        };
        let file_type = entry.file_type();

        if file_type.is_dir() {
            builder.append_dir(&name, entry.path())?;
        } else if file_type.is_file() {
            let metadata = entry.metadata()?;
            let mut header = tar::Header::new_gnu();
            header.set_metadata(&metadata);
            // Moved into append_data so the descriptor closes before the next entry.
            let file = File::open(entry.path())?;
            builder.append_data(&mut header, &name, file)?;
        } else if let Some(kind) = header_only_type(file_type) {
            // Never opened: a fifo would block and a device has no fixed content.
            let metadata = entry.metadata()?;
            let mut header = tar::Header::new_gnu();
            header.set_metadata(&metadata);
            header.set_entry_type(kind);
            header.set_size(0);
            if kind.is_symlink() {
                let target = fs::read_link(entry.path())?;
                builder.append_link(&mut header, &name, &target)?;
            } else {
                builder.append_data(&mut header, &name, io::empty())?;
            }
        } else {
            tracing::debug!(entry = %name.display(), "Skipping socket, tar cannot represent it");
            continue;
        }
        tracing::trace!(entry = %name.display(), "archived");
    }

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

/// Archive `root` into an in-memory buffer.
pub fn archive_to_vec(root: &Path) -> Result<Vec<u8>, ArchiveError> {
    archive_directory(root, Vec::new())
}

/// A writer that duplicates every write into several sinks.
pub struct FanOut<'a> {
    sinks: Vec<&'a mut dyn Write>,
}

impl<'a> FanOut<'a> {
    pub fn new(sinks: Vec<&'a mut dyn Write>) -> Self {
        Self { sinks }
    }
}

impl Write for FanOut<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for sink in self.sinks.iter_mut() {
            sink.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        for sink in self.sinks.iter_mut() {
            sink.flush()?;
        }
        Ok(())
    }
}
