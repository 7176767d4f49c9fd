//! Resources that live behind guest handles
//!
//! A guest only ever holds a number; the table maps it to one of these.
//! Files wrap a host `File`, directories remember where they are below their
//! preopen root, and stdio handles wrap embedder-supplied streams.

use super::dir::DirHandle;
use super::stream::{InputStream, OutputStream, Readiness};
use crate::abi::{Filestat, Filetype, FstFlags, Whence};
use crate::errno::{Errno, WasiResult};
use crate::vfs;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

/// Anything a handle can name
pub enum OpenResource {
    File(FileHandle),
    Directory(DirHandle),
    Stdio(Stream),
}

impl OpenResource {
    pub fn filetype(&self) -> Filetype {
        match self {
            OpenResource::File(f) => f.filetype,
            OpenResource::Directory(_) => Filetype::Directory,
            OpenResource::Stdio(_) => Filetype::CharacterDevice,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            OpenResource::File(_) => "file",
            OpenResource::Directory(_) => "directory",
            OpenResource::Stdio(Stream::Input(_)) => "input stream",
            OpenResource::Stdio(Stream::Output(_)) => "output stream",
        }
    }

    /// Release the host resource, reporting failures the host saw
    pub fn close(self) -> io::Result<()> {
        match self {
            OpenResource::File(f) => f.close(),
            OpenResource::Directory(_) => Ok(()),
            OpenResource::Stdio(Stream::Input(_)) => Ok(()),
            OpenResource::Stdio(Stream::Output(mut out)) => out.flush(),
        }
    }
}

impl std::fmt::Debug for OpenResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpenResource::File(file) => write!(f, "File({})", file.host.display()),
            OpenResource::Directory(dir) => write!(f, "Directory({})", dir.host_path().display()),
            OpenResource::Stdio(_) => write!(f, "Stdio({})", self.type_name()),
        }
    }
}

/// A stdio stream; each handle is one direction
pub enum Stream {
    Input(Box<dyn InputStream>),
    Output(Box<dyn OutputStream>),
}

impl Stream {
    pub fn readiness(&self) -> Readiness {
        match self {
            Stream::Input(input) => input.readiness(),
            Stream::Output(output) => output.readiness(),
        }
    }
}

// ============================================================================
// Files
// ============================================================================

/// An open host file
pub struct FileHandle {
    file: File,
    /// Host path, kept for diagnostics only
    host: PathBuf,
    filetype: Filetype,
    /// Writes go to the end regardless of the cursor
    pub append: bool,
}

impl FileHandle {
    pub fn new(file: File, host: PathBuf, filetype: Filetype, append: bool) -> Self {
        Self {
            file,
            host,
            filetype,
            append,
        }
    }

    pub fn read(&mut self, buf: &mut [u8]) -> WasiResult<usize> {
        Ok(self.file.read(buf)?)
    }

    pub fn write(&mut self, buf: &[u8]) -> WasiResult<usize> {
        if self.append {
            self.file.seek(SeekFrom::End(0))?;
        }
        Ok(self.file.write(buf)?)
    }

    /// Read at `offset` without moving the cursor
    pub fn pread(&mut self, buf: &mut [u8], offset: u64) -> WasiResult<usize> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            Ok(self.file.read_at(buf, offset)?)
        }
        #[cfg(not(unix))]
        {
            let saved = self.file.stream_position()?;
            self.file.seek(SeekFrom::Start(offset))?;
            let result = self.file.read(buf);
            self.file.seek(SeekFrom::Start(saved))?;
            Ok(result?)
        }
    }

    /// Write at `offset` without moving the cursor
    pub fn pwrite(&mut self, buf: &[u8], offset: u64) -> WasiResult<usize> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            Ok(self.file.write_at(buf, offset)?)
        }
        #[cfg(not(unix))]
        {
            let saved = self.file.stream_position()?;
            self.file.seek(SeekFrom::Start(offset))?;
            let result = self.file.write(buf);
            self.file.seek(SeekFrom::Start(saved))?;
            Ok(result?)
        }
    }

    pub fn seek(&mut self, offset: i64, whence: Whence) -> WasiResult<u64> {
        let pos = match whence {
            Whence::Set => SeekFrom::Start(u64::try_from(offset).map_err(|_| Errno::Inval)?),
            Whence::Cur => SeekFrom::Current(offset),
            Whence::End => SeekFrom::End(offset),
        };
        Ok(self.file.seek(pos)?)
    }

    pub fn tell(&mut self) -> WasiResult<u64> {
        Ok(self.file.stream_position()?)
    }

    /// Bytes between the cursor and end of file
    pub fn remaining(&mut self) -> WasiResult<u64> {
        let len = self.file.metadata()?.len();
        let pos = self.file.stream_position()?;
        Ok(len.saturating_sub(pos))
    }

    pub fn filestat(&self) -> WasiResult<Filestat> {
        Ok(vfs::filestat(&self.file.metadata()?))
    }

    pub fn set_size(&self, size: u64) -> WasiResult<()> {
        Ok(self.file.set_len(size)?)
    }

    pub fn set_times(&self, atim: u64, mtim: u64, flags: FstFlags) -> WasiResult<()> {
        vfs::set_times(&self.file, atim, mtim, flags)
    }

    pub fn sync(&self) -> WasiResult<()> {
        Ok(self.file.sync_all()?)
    }

    pub fn datasync(&self) -> WasiResult<()> {
        Ok(self.file.sync_data()?)
    }

    /// Make sure `offset..offset + len` is backed by the file
    pub fn allocate(&self, offset: u64, len: u64) -> WasiResult<()> {
        let end = offset.checked_add(len).ok_or(Errno::Fbig)?;
        if end > self.file.metadata()?.len() {
            self.file.set_len(end)?;
        }
        Ok(())
    }

    fn close(self) -> io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::io::IntoRawFd;
            let fd = self.file.into_raw_fd();
            // SAFETY: `fd` was just released by the `File` that owned it and is
            // closed exactly once here.
            if unsafe { libc::close(fd) } != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }
        #[cfg(not(unix))]
        {
            drop(self.file);
            Ok(())
        }
    }
}
