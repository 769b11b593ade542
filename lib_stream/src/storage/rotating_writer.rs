//! # Rotating File Writer
//!
//! Dispatcher subscriber persisting events as JSON Lines, one file family per tag:
//! `<save_path>/<tag>_<index>.json`.
//!
//! ## Rotation:
//!
//! The threshold is a soft cap checked *after* each write. Once a file reaches it, its
//! handle is closed and the next event for that tag goes to a later index. When no
//! handle is open for a tag, indices are probed upward and the first file below the
//! threshold is appended to, or the first missing index is created. Restarting the
//! process therefore continues where the previous run stopped.
//!
//! All handles live behind one `Mutex`; removing a map entry closes its file.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::core::dispatcher::Callback;
use crate::core::event::StreamEvent;

/// Lowest threshold accepted by [`RotatingFileWriter::set_max_file_size`].
pub const MIN_MAX_FILE_SIZE: u64 = 100 * 1024;
/// Threshold used when none is configured.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("event has no matching_rules[0].tag")]
    MissingTag,

    #[error("tag {0:?} cannot be used in a file name")]
    InvalidTag(String),

    #[error("maximum file size must be greater than zero")]
    InvalidThreshold,

    #[error("maximum file size cannot be smaller than {min} bytes (got {value})")]
    FileSizeTooSmall { value: u64, min: u64 },

    #[error("file I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Where one event ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub path: PathBuf,
    pub index: u64,
    /// `true` when this write filled the file and its handle was closed.
    pub rotated: bool,
}

struct OpenFile {
    path: PathBuf,
    index: u64,
    file: File,
}

struct WriterState {
    save_path: PathBuf,
    max_file_size: u64,
    files: HashMap<String, OpenFile>,
    /// First index to probe for a tag whose last file was rotated out.
    resume_from: HashMap<String, u64>,
}

/// # Rotating File Writer
pub struct RotatingFileWriter {
    inner: Mutex<WriterState>,
}

impl RotatingFileWriter {
    /// Creates `save_path` if needed. `max_file_size` must be non-zero; the operator
    /// minimum is only enforced by [`RotatingFileWriter::set_max_file_size`].
    pub fn new(save_path: impl Into<PathBuf>, max_file_size: u64) -> Result<Self, WriterError> {
        if max_file_size == 0 {
            return Err(WriterError::InvalidThreshold);
        }
        let save_path = save_path.into();
        fs::create_dir_all(&save_path)?;

        Ok(Self {
            inner: Mutex::new(WriterState {
                save_path,
                max_file_size,
                files: HashMap::new(),
                resume_from: HashMap::new(),
            }),
        })
    }

    /// # On Event
    ///
    /// Appends `event` as one line to its tag's current file, rotating afterwards if
    /// the file reached the threshold. A failed write closes that tag's handle.
    pub fn on_event(&self, event: &StreamEvent) -> Result<WriteReceipt, WriterError> {
        let tag = event.tag().ok_or(WriterError::MissingTag)?;
        validate_tag(tag)?;

        let mut line = event.to_json_line().into_bytes();
        line.push(b'\n');

        let mut guard = self.inner.lock().expect("Writer lock poisoned");
        let state = &mut *guard;
        let max_file_size = state.max_file_size;

        let open = match state.files.entry(tag.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let start = state.resume_from.get(tag).copied().unwrap_or(0);
                let opened = open_for_append(&state.save_path, tag, start, max_file_size)?;
                log::info!("Writing tag '{}' to {}", tag, opened.path.display());
                entry.insert(opened)
            }
        };
        let written = open
            .file
            .write_all(&line)
            .and_then(|_| open.file.metadata())
            .map(|meta| meta.len());
        let (path, index) = (open.path.clone(), open.index);

        let size = match written {
            Ok(size) => size,
            Err(e) => {
                state.files.remove(tag);
                log::error!("Write to {} failed, handle closed: {}", path.display(), e);
                return Err(e.into());
            }
        };

        let rotated = size >= max_file_size;
        if rotated {
            state.files.remove(tag);
            state.resume_from.insert(tag.to_string(), index + 1);
            log::info!("{} reached {} bytes, rotating.", path.display(), size);
        }

        Ok(WriteReceipt {
            path,
            index,
            rotated,
        })
    }

    /// # Set Save Path
    ///
    /// Creates `path` if needed. When it differs from the current directory every open
    /// file is closed and later writes go to the new directory.
    ///
    /// # Returns
    /// `true` when the path changed.
    pub fn set_save_path(&self, path: impl AsRef<Path>) -> Result<bool, WriterError> {
        let path = path.as_ref();
        fs::create_dir_all(path)?;

        let mut state = self.inner.lock().expect("Writer lock poisoned");
        if state.save_path == path {
            return Ok(false);
        }
        state.files.clear();
        state.resume_from.clear();
        state.save_path = path.to_path_buf();
        log::info!("Save path set to {}", path.display());
        Ok(true)
    }

    pub fn save_path(&self) -> PathBuf {
        self.inner.lock().expect("Writer lock poisoned").save_path.clone()
    }

    /// Operator-facing threshold setter, rejects values below [`MIN_MAX_FILE_SIZE`].
    pub fn set_max_file_size(&self, bytes: u64) -> Result<(), WriterError> {
        if bytes < MIN_MAX_FILE_SIZE {
            return Err(WriterError::FileSizeTooSmall {
                value: bytes,
                min: MIN_MAX_FILE_SIZE,
            });
        }
        self.inner.lock().expect("Writer lock poisoned").max_file_size = bytes;
        Ok(())
    }

    pub fn max_file_size(&self) -> u64 {
        self.inner.lock().expect("Writer lock poisoned").max_file_size
    }

    /// Closes every open file.
    pub fn close_all(&self) {
        let mut state = self.inner.lock().expect("Writer lock poisoned");
        let closed = state.files.len();
        state.files.clear();
        if closed > 0 {
            log::info!("Closed {} open file(s).", closed);
        }
    }

    /// `(tag, path)` for every open file, sorted by tag.
    pub fn open_files(&self) -> Vec<(String, PathBuf)> {
        let state = self.inner.lock().expect("Writer lock poisoned");
        let mut files: Vec<_> = state
            .files
            .iter()
            .map(|(tag, open)| (tag.clone(), open.path.clone()))
            .collect();
        files.sort();
        files
    }

    /// Wraps the writer as a dispatcher callback.
    pub fn subscriber(self: &Arc<Self>) -> Callback {
        let writer = Arc::clone(self);
        Arc::new(move |event: &StreamEvent| -> anyhow::Result<()> {
            writer.on_event(event)?;
            Ok(())
        })
    }
}

/// Path of file `index` for `tag`.
pub fn file_path(save_path: &Path, tag: &str, index: u64) -> PathBuf {
    save_path.join(format!("{tag}_{index}.json"))
}

fn validate_tag(tag: &str) -> Result<(), WriterError> {
    let bad = tag.is_empty()
        || tag.contains(['/', '\\', '\0'])
        || tag.contains("..");
    if bad {
        return Err(WriterError::InvalidTag(tag.to_string()));
    }
    Ok(())
}

fn open_for_append(
    save_path: &Path,
    tag: &str,
    start: u64,
    max_file_size: u64,
) -> Result<OpenFile, WriterError> {
    let mut index = start;
    loop {
        let path = file_path(save_path, tag, index);
        match fs::metadata(&path) {
            Ok(meta) if meta.len() >= max_file_size => {
                index += 1;
                continue;
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        if ends_mid_line(&mut file)? {
            log::warn!("{} ends with a partial record, starting a new line.", path.display());
            file.write_all(b"\n")?;
        }
        return Ok(OpenFile { path, index, file });
    }
}

/// `true` when the file is non-empty and its last byte is not `\n`.
fn ends_mid_line(file: &mut File) -> io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}
