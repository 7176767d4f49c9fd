//! Host filesystem access
//!
//! Guests never see host paths. They see preopened directories by handle and
//! name paths relative to them; [`resolve`] turns those into host paths that
//! are guaranteed to stay inside the preopen's root.
//!
//! This module also owns the translations between host metadata and the
//! preview1 records: `filestat`, directory entries, open flags and
//! timestamps.

pub mod resolve;

pub use resolve::{MAX_SYMLINK_EXPANSIONS, Resolved, contained_dir, normalize_lexically, resolve};

use crate::abi::{FdFlags, Filestat, Filetype, FstFlags, OFlags, Rights};
use crate::errno::{Errno, WasiResult};
use crate::error::ConfigError;
use std::fs::{self, File, FileTimes, Metadata};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A host directory exposed to the guest
///
/// Fixed for the life of an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preopen {
    /// Handle the guest sees it under
    pub fd: u32,
    /// Canonical host directory
    pub host_root: PathBuf,
    /// Name reported by `fd_prestat_dir_name`
    pub guest_name: String,
}

impl Preopen {
    /// Canonicalize `host` and check it is a directory
    pub fn new(
        fd: u32,
        host: impl AsRef<Path>,
        guest_name: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let host = host.as_ref();
        let guest_name = guest_name.into();
        if guest_name.is_empty() {
            return Err(ConfigError::EmptyPreopenName);
        }
        let host_root = host.canonicalize().map_err(|source| ConfigError::Preopen {
            host: host.to_path_buf(),
            source,
        })?;
        if !host_root.is_dir() {
            return Err(ConfigError::PreopenNotDirectory(host.to_path_buf()));
        }
        Ok(Self {
            fd,
            host_root,
            guest_name,
        })
    }

    /// Host path of a directory below the root
    pub fn host_path(&self, components: &[String]) -> PathBuf {
        let mut path = self.host_root.clone();
        path.extend(components);
        path
    }
}

// ============================================================================
// Open modes
// ============================================================================

/// Host open mode derived from `path_open` arguments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenMode {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub create_new: bool,
    pub truncate: bool,
}

impl OpenMode {
    pub fn from_wasi(oflags: OFlags, fdflags: FdFlags, rights: Rights) -> Self {
        let append = fdflags.contains(FdFlags::APPEND);
        let truncate = oflags.contains(OFlags::TRUNC);
        Self {
            read: rights.contains(Rights::FD_READ) || rights.contains(Rights::FD_READDIR),
            write: rights.intersects(
                Rights::FD_WRITE | Rights::FD_ALLOCATE | Rights::FD_FILESTAT_SET_SIZE,
            ) || append
                || truncate
                || oflags.contains(OFlags::CREAT),
            append,
            create: oflags.contains(OFlags::CREAT),
            create_new: oflags.contains(OFlags::CREAT | OFlags::EXCL),
            truncate,
        }
    }

    pub fn to_std(&self) -> fs::OpenOptions {
        let mut opts = fs::OpenOptions::new();
        // Append is applied per write (see FileHandle) so it can be toggled.
        // A handle with neither right still needs a descriptor for stat.
        opts.read(self.read || !self.write)
            .write(self.write)
            .create(self.create && !self.create_new)
            .create_new(self.create_new)
            .truncate(self.truncate);
        opts
    }
}

// ============================================================================
// Metadata
// ============================================================================

#[cfg(not(unix))]
fn to_nanos(time: std::io::Result<SystemTime>) -> u64 {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .and_then(|d| u64::try_from(d.as_nanos()).ok())
        .unwrap_or(0)
}

/// Translate host metadata into a preview1 `filestat`
pub fn filestat(meta: &Metadata) -> Filestat {
    let filetype = Filetype::from_std(&meta.file_type());
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let stamp = |secs: i64, nsec: i64| -> u64 {
            let ns = secs as i128 * 1_000_000_000 + nsec as i128;
            ns.clamp(0, u64::MAX as i128) as u64
        };
        Filestat {
            dev: meta.dev(),
            ino: meta.ino(),
            filetype,
            nlink: meta.nlink(),
            size: meta.size(),
            atim: stamp(meta.atime(), meta.atime_nsec()),
            mtim: stamp(meta.mtime(), meta.mtime_nsec()),
            ctim: stamp(meta.ctime(), meta.ctime_nsec()),
        }
    }
    #[cfg(not(unix))]
    {
        Filestat {
            dev: 0,
            ino: 0,
            filetype,
            nlink: 1,
            size: meta.len(),
            atim: to_nanos(meta.accessed()),
            mtim: to_nanos(meta.modified()),
            ctim: to_nanos(meta.created()),
        }
    }
}

fn inode(meta: &Metadata) -> u64 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        meta.ino()
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        0
    }
}

/// Build host `FileTimes` from `*_set_times` arguments
pub fn file_times(atim: u64, mtim: u64, flags: FstFlags) -> WasiResult<FileTimes> {
    if flags.contains(FstFlags::ATIM | FstFlags::ATIM_NOW)
        || flags.contains(FstFlags::MTIM | FstFlags::MTIM_NOW)
    {
        return Err(Errno::Inval);
    }
    let now = SystemTime::now();
    let at = |ns: u64| UNIX_EPOCH + Duration::from_nanos(ns);

    let mut times = FileTimes::new();
    if flags.contains(FstFlags::ATIM) {
        times = times.set_accessed(at(atim));
    } else if flags.contains(FstFlags::ATIM_NOW) {
        times = times.set_accessed(now);
    }
    if flags.contains(FstFlags::MTIM) {
        times = times.set_modified(at(mtim));
    } else if flags.contains(FstFlags::MTIM_NOW) {
        times = times.set_modified(now);
    }
    Ok(times)
}

/// Apply timestamps to an open host file
pub fn set_times(file: &File, atim: u64, mtim: u64, flags: FstFlags) -> WasiResult<()> {
    let times = file_times(atim, mtim, flags)?;
    file.set_times(times)?;
    Ok(())
}

// ============================================================================
// Directory listing
// ============================================================================

/// One entry of a directory snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub ino: u64,
    pub filetype: Filetype,
}

/// List a directory: `.`, `..`, then entries sorted by name
///
/// Names that are not UTF-8 cannot be expressed to the guest and are skipped.
pub fn list_dir(host: &Path) -> WasiResult<Vec<DirEntry>> {
    let own = fs::metadata(host)?;
    let mut entries = vec![
        DirEntry {
            name: ".".into(),
            ino: inode(&own),
            filetype: Filetype::Directory,
        },
        DirEntry {
            name: "..".into(),
            ino: host.parent().and_then(|p| fs::metadata(p).ok()).map_or(0, |m| inode(&m)),
            filetype: Filetype::Directory,
        },
    ];

    let mut rest = Vec::new();
    for entry in fs::read_dir(host)? {
        let entry = entry?;
        let Ok(name) = entry.file_name().into_string() else {
            tracing::warn!(dir = %host.display(), "skipping non-UTF-8 directory entry");
            continue;
        };
        let meta = entry.metadata()?;
        rest.push(DirEntry {
            name,
            ino: inode(&meta),
            filetype: Filetype::from_std(&meta.file_type()),
        });
    }
    rest.sort_by(|a, b| a.name.cmp(&b.name));
    entries.extend(rest);
    Ok(entries)
}
