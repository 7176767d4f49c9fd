//! Directory handles and resumable listings
//!
//! `fd_readdir` cookies are indices into a snapshot of the directory taken
//! when the guest starts over at cookie 0. Entries beyond the snapshot read
//! as end-of-directory, and the snapshot is only refreshed by the next
//! cookie-0 call, so a listing that spans several calls is stable even if
//! the directory changes underneath it.

use crate::abi::Dirent;
use crate::errno::WasiResult;
use crate::vfs::{self, DirEntry, Preopen};
use std::path::PathBuf;
use std::sync::Arc;

/// An open directory below a preopen root
#[derive(Debug, Clone)]
pub struct DirHandle {
    pub preopen: Arc<Preopen>,
    /// Components below the preopen root; empty for the preopen itself
    pub components: Vec<String>,
    snapshot: Option<Vec<DirEntry>>,
}

impl DirHandle {
    pub fn new(preopen: Arc<Preopen>, components: Vec<String>) -> Self {
        Self {
            preopen,
            components,
            snapshot: None,
        }
    }

    /// Host path as recorded at open time, for display only
    pub fn host_path(&self) -> PathBuf {
        self.preopen.host_path(&self.components)
    }

    /// Host path to operate on; `notcapable` if the directory has since
    /// been replaced by something leading out of the preopen
    pub fn host_dir(&self) -> WasiResult<PathBuf> {
        vfs::contained_dir(&self.preopen, &self.components)
    }

    /// Entries from `cookie` on
    pub fn entries(&mut self, cookie: u64) -> WasiResult<&[DirEntry]> {
        if cookie == 0 || self.snapshot.is_none() {
            self.snapshot = Some(vfs::list_dir(&self.host_dir()?)?);
        }
        let snapshot = self.snapshot.as_deref().unwrap_or_default();
        let start = usize::try_from(cookie).unwrap_or(usize::MAX).min(snapshot.len());
        Ok(&snapshot[start..])
    }
}

/// Serialize entries starting at `first_cookie` into `buf`
///
/// Returns the number of bytes used. As in preview1, the last entry may be
/// cut off when `buf` runs out; a full buffer tells the guest to call again
/// with the cookie of the last complete entry.
pub fn fill_dirents(entries: &[DirEntry], first_cookie: u64, buf: &mut [u8]) -> usize {
    let mut used = 0;
    for (i, entry) in entries.iter().enumerate() {
        if used == buf.len() {
            break;
        }
        let header = Dirent {
            next: first_cookie + i as u64 + 1,
            ino: entry.ino,
            namlen: entry.name.len() as u32,
            filetype: entry.filetype,
        }
        .to_bytes();

        for chunk in [&header[..], entry.name.as_bytes()] {
            let n = chunk.len().min(buf.len() - used);
            buf[used..used + n].copy_from_slice(&chunk[..n]);
            used += n;
        }
    }
    used
}
