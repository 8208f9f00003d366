//! `TaskExecutor`: runs [`Task`]s with blocking `std::fs` calls.
//!
//! One executor lives on each worker and owns that worker's open files.
//! This runs on a worker thread and MAY block. That's the point.

use std::fs::{self, DirBuilder, File, Permissions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::Path;

use afio_core::error::TaskError;
use afio_core::sort::sort_natural;
use afio_core::stat::StatRecord;
use afio_core::task::{HandleId, Task, TaskOutput};

use crate::handle_table::HandleTable;

struct OpenFile {
    file: File,
    append: bool,
}

#[derive(Default)]
pub struct TaskExecutor {
    files: HandleTable<OpenFile>,
}

impl TaskExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files currently open on this executor.
    pub fn open_files(&self) -> usize {
        self.files.len()
    }

    pub fn run(&mut self, task: Task) -> Result<TaskOutput, TaskError> {
        match task {
            // ── Handle operations ──
            Task::Open { path, mode } => {
                let file = mode
                    .open_options()
                    .open(&path)
                    .map_err(|e| TaskError::from_io("Could not open the file.", &e))?;
                let size = file
                    .metadata()
                    .map_err(|e| TaskError::from_io("Could not stat the opened file.", &e))?
                    .len();
                let append = mode.append();
                let handle = self.files.insert(OpenFile { file, append });
                Ok(TaskOutput::Opened { handle, size, append })
            }
            Task::Read { handle, length } => {
                let open = self.file(handle)?;
                let mut data = Vec::with_capacity(length.min(1 << 20));
                (&open.file)
                    .take(length as u64)
                    .read_to_end(&mut data)
                    .map_err(|e| TaskError::from_io("Reading from the file failed.", &e))?;
                Ok(TaskOutput::Data(data))
            }
            Task::Write { handle, data } => {
                let open = self.file(handle)?;
                open.file
                    .write_all(&data)
                    .map_err(|e| TaskError::from_io("Writing to the file failed.", &e))?;
                Ok(TaskOutput::Written(data.len()))
            }
            Task::Seek { handle, offset } => {
                let open = self.file(handle)?;
                let position = open
                    .file
                    .seek(SeekFrom::Start(offset))
                    .map_err(|e| TaskError::from_io("Seeking in the file failed.", &e))?;
                Ok(TaskOutput::Position(position))
            }
            Task::Fstat { handle } => {
                let open = self.file(handle)?;
                let meta = open
                    .file
                    .metadata()
                    .map_err(|e| TaskError::from_io("Could not stat the file.", &e))?;
                Ok(TaskOutput::Stat(StatRecord::from_metadata(&meta)))
            }
            Task::Ftruncate { handle, size } => {
                let open = self.file(handle)?;
                truncate(open, size)
                    .map_err(|e| TaskError::from_io("Truncating the file failed.", &e))?;
                Ok(TaskOutput::Done)
            }
            Task::Close { handle } => {
                // Dropping the File closes the descriptor.
                self.files.remove(handle).ok_or_else(|| unknown_handle(handle))?;
                Ok(TaskOutput::Done)
            }

            // ── Path operations ──
            Task::Stat { path } => {
                let meta = fs::metadata(&path)
                    .map_err(|e| TaskError::from_io("Could not stat the file.", &e))?;
                Ok(TaskOutput::Stat(StatRecord::from_metadata(&meta)))
            }
            Task::Unlink { path } => {
                unlink(&path)?;
                Ok(TaskOutput::Done)
            }
            Task::Rename { from, to } => {
                fs::rename(&from, &to)
                    .map_err(|e| TaskError::from_io("Could not rename the file.", &e))?;
                Ok(TaskOutput::Done)
            }
            Task::Copy { from, to } => {
                let copied = fs::copy(&from, &to)
                    .map_err(|e| TaskError::from_io("Could not copy the file.", &e))?;
                Ok(TaskOutput::Copied(copied))
            }
            Task::Link { source, target } => {
                fs::hard_link(&source, &target)
                    .map_err(|e| TaskError::from_io("Could not create the link.", &e))?;
                Ok(TaskOutput::Done)
            }
            Task::Symlink { source, target } => {
                std::os::unix::fs::symlink(&source, &target)
                    .map_err(|e| TaskError::from_io("Could not create the symlink.", &e))?;
                Ok(TaskOutput::Done)
            }
            Task::Readlink { path } => {
                let target = fs::read_link(&path)
                    .map_err(|e| TaskError::from_io("Could not read the link.", &e))?;
                Ok(TaskOutput::Path(target))
            }
            Task::IsFile { path } => Ok(TaskOutput::Flag(path.is_file())),
            Task::IsDir { path } => Ok(TaskOutput::Flag(path.is_dir())),
            Task::Mkdir { path, mode } => {
                DirBuilder::new()
                    .mode(mode)
                    .create(&path)
                    .map_err(|e| TaskError::from_io("Could not create the directory.", &e))?;
                Ok(TaskOutput::Done)
            }
            Task::Lsdir { path } => {
                let mut names = list_dir(&path)
                    .map_err(|e| TaskError::from_io("Could not read the directory.", &e))?;
                sort_natural(&mut names);
                Ok(TaskOutput::Names(names))
            }
            Task::Rmdir { path } => {
                fs::remove_dir(&path)
                    .map_err(|e| TaskError::from_io("Could not remove the directory.", &e))?;
                Ok(TaskOutput::Done)
            }
            Task::Chmod { path, mode } => {
                fs::set_permissions(&path, Permissions::from_mode(mode))
                    .map_err(|e| TaskError::from_io("Could not change the file mode.", &e))?;
                Ok(TaskOutput::Done)
            }
            Task::Chown { path, uid } => {
                std::os::unix::fs::chown(&path, Some(uid), None)
                    .map_err(|e| TaskError::from_io("Could not change the file owner.", &e))?;
                Ok(TaskOutput::Done)
            }
            Task::Chgrp { path, gid } => {
                std::os::unix::fs::chown(&path, None, Some(gid))
                    .map_err(|e| TaskError::from_io("Could not change the file group.", &e))?;
                Ok(TaskOutput::Done)
            }
        }
    }

    fn file(&mut self, handle: HandleId) -> Result<&mut OpenFile, TaskError> {
        self.files.get_mut(handle).ok_or_else(|| unknown_handle(handle))
    }
}

fn unknown_handle(handle: HandleId) -> TaskError {
    TaskError::new(format!(
        "No file handle with the given ID has been opened on the worker: {:?}.",
        handle
    ))
}

// The OS cursor must not stay past the new end, or the next write would
// leave a hole.
fn truncate(open: &mut OpenFile, size: u64) -> io::Result<()> {
    open.file.set_len(size)?;
    if !open.append && open.file.stream_position()? > size {
        open.file.seek(SeekFrom::Start(size))?;
    }
    Ok(())
}

fn unlink(path: &Path) -> Result<(), TaskError> {
    let meta = fs::symlink_metadata(path)
        .map_err(|e| TaskError::from_io("Could not unlink file. File does not exist.", &e))?;
    if meta.is_dir() {
        return Err(TaskError::from_errno(
            "Could not unlink file. Path is a directory.",
            libc::EISDIR,
        ));
    }
    fs::remove_file(path).map_err(|e| TaskError::from_io("Could not unlink file.", &e))
}

fn list_dir(path: &Path) -> io::Result<Vec<String>> {
    fs::read_dir(path)?
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect()
}
