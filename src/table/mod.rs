//! Per-instance resource table
//!
//! Maps guest handles to open resources together with the rights they were
//! granted. Isolation works the same way as kernel handles: a guest can only
//! touch what it holds a handle to, and only in the ways the handle's rights
//! allow. Rights are checked here, before any host call is made.
//!
//! Handle numbers come from a slab, so a number is only reused after the
//! resource behind it was closed. Stdio takes 0, 1 and 2; preopens follow in
//! configuration order. Preopens cannot be closed or renumbered.

pub mod dir;
pub mod object;
pub mod stream;

pub use dir::{DirHandle, fill_dirents};
pub use object::{FileHandle, OpenResource, Stream};
pub use stream::{
    CaptureOutput, HostStderr, HostStdin, HostStdout, InputStream, MemoryInput, NullInput,
    NullOutput, OutputStream, PipeReader, PipeWriter, Readiness, pipe,
};

use crate::abi::{FdFlags, Rights};
use crate::errno::{Errno, WasiResult};
use crate::vfs::Preopen;
use slab::Slab;
use std::fmt;
use std::sync::Arc;

/// Default handle-space limit
pub const DEFAULT_MAX_HANDLES: usize = 1024;

/// A guest handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fd(pub u32);

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd {}", self.0)
    }
}

/// One slot of the table
#[derive(Debug)]
pub struct Entry {
    pub resource: OpenResource,
    pub base: Rights,
    pub inheriting: Rights,
    pub flags: FdFlags,
    /// Set for preopened directories
    pub preopen: Option<Arc<Preopen>>,
}

impl Entry {
    pub fn new(resource: OpenResource, base: Rights, inheriting: Rights) -> Self {
        Self {
            resource,
            base,
            inheriting,
            flags: FdFlags::empty(),
            preopen: None,
        }
    }

    pub fn with_flags(mut self, flags: FdFlags) -> Self {
        self.flags = flags;
        self
    }

    fn require(&self, fd: Fd, required: Rights) -> WasiResult<()> {
        if !self.base.contains(required) {
            tracing::debug!(
                %fd,
                missing = ?required.difference(self.base),
                "handle lacks rights"
            );
            return Err(Errno::Notcapable);
        }
        Ok(())
    }
}

/// What teardown saw when closing everything
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub closed: usize,
    pub failures: Vec<(Fd, String)>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The handle table of one instance
#[derive(Debug)]
pub struct ResourceTable {
    entries: Slab<Entry>,
    max_handles: usize,
}

impl ResourceTable {
    pub fn new(max_handles: usize) -> Self {
        Self {
            entries: Slab::new(),
            max_handles,
        }
    }

    /// Insert a resource; `mfile` when the handle space is full
    pub fn insert(&mut self, entry: Entry) -> WasiResult<Fd> {
        if self.entries.len() >= self.max_handles {
            return Err(Errno::Mfile);
        }
        let slot = self.entries.vacant_entry();
        let fd = Fd(u32::try_from(slot.key()).map_err(|_| Errno::Mfile)?);
        tracing::debug!(%fd, kind = entry.resource.type_name(), "handle opened");
        slot.insert(entry);
        Ok(fd)
    }

    /// Look up a handle without checking rights
    pub fn get(&self, fd: Fd) -> WasiResult<&Entry> {
        self.entries.get(fd.0 as usize).ok_or(Errno::Badf)
    }

    pub fn get_mut(&mut self, fd: Fd) -> WasiResult<&mut Entry> {
        self.entries.get_mut(fd.0 as usize).ok_or(Errno::Badf)
    }

    /// Look up a handle that must hold every right in `required`
    pub fn lookup(&self, fd: Fd, required: Rights) -> WasiResult<&Entry> {
        let entry = self.get(fd)?;
        entry.require(fd, required)?;
        Ok(entry)
    }

    pub fn lookup_mut(&mut self, fd: Fd, required: Rights) -> WasiResult<&mut Entry> {
        let entry = self.get_mut(fd)?;
        entry.require(fd, required)?;
        Ok(entry)
    }

    /// Look up an open file
    pub fn file_mut(&mut self, fd: Fd, required: Rights) -> WasiResult<&mut FileHandle> {
        match &mut self.lookup_mut(fd, required)?.resource {
            OpenResource::File(file) => Ok(file),
            OpenResource::Directory(_) => Err(Errno::Isdir),
            OpenResource::Stdio(_) => Err(Errno::Spipe),
        }
    }

    /// Look up an open directory
    pub fn dir(&self, fd: Fd, required: Rights) -> WasiResult<&DirHandle> {
        match &self.lookup(fd, required)?.resource {
            OpenResource::Directory(dir) => Ok(dir),
            _ => Err(Errno::Notdir),
        }
    }

    pub fn dir_mut(&mut self, fd: Fd, required: Rights) -> WasiResult<&mut DirHandle> {
        match &mut self.lookup_mut(fd, required)?.resource {
            OpenResource::Directory(dir) => Ok(dir),
            _ => Err(Errno::Notdir),
        }
    }

    /// The preopen a handle was configured as; `badf` for anything else
    pub fn preopen(&self, fd: Fd) -> WasiResult<&Arc<Preopen>> {
        self.get(fd)?.preopen.as_ref().ok_or(Errno::Badf)
    }

    /// Remove a handle, returning its resource for the caller to close
    pub fn remove(&mut self, fd: Fd) -> WasiResult<OpenResource> {
        if self.get(fd)?.preopen.is_some() {
            return Err(Errno::Notsup);
        }
        let entry = self.entries.remove(fd.0 as usize);
        tracing::debug!(%fd, kind = entry.resource.type_name(), "handle closed");
        Ok(entry.resource)
    }

    /// Close a handle
    pub fn close(&mut self, fd: Fd) -> WasiResult<()> {
        let resource = self.remove(fd)?;
        resource.close()?;
        Ok(())
    }

    /// Move `from` onto `to`, closing what `to` held
    pub fn renumber(&mut self, from: Fd, to: Fd) -> WasiResult<()> {
        let source = self.get(from)?;
        let target = self.get(to)?;
        if source.preopen.is_some() || target.preopen.is_some() {
            return Err(Errno::Notsup);
        }
        if from == to {
            return Ok(());
        }
        let moved = self.entries.remove(from.0 as usize);
        let displaced = std::mem::replace(&mut self.entries[to.0 as usize], moved);
        tracing::debug!(%from, %to, "handle renumbered");
        if let Err(err) = displaced.resource.close() {
            tracing::warn!(%to, "closing renumbered-over handle failed: {}", err);
        }
        Ok(())
    }

    pub fn contains(&self, fd: Fd) -> bool {
        self.entries.contains(fd.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_handles(&self) -> usize {
        self.max_handles
    }

    /// Handles of all preopens, in handle order
    pub fn preopens(&self) -> impl Iterator<Item = (Fd, &Arc<Preopen>)> {
        self.entries
            .iter()
            .filter_map(|(key, entry)| entry.preopen.as_ref().map(|p| (Fd(key as u32), p)))
    }

    /// Close every handle, preopens included; failures are collected, never
    /// raised
    pub fn close_all(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        let keys: Vec<usize> = self.entries.iter().map(|(key, _)| key).collect();
        for key in keys {
            let entry = self.entries.remove(key);
            report.closed += 1;
            if let Err(err) = entry.resource.close() {
                report.failures.push((Fd(key as u32), err.to_string()));
            }
        }
        report
    }
}

impl Default for ResourceTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HANDLES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output() -> Entry {
        Entry::new(
            OpenResource::Stdio(Stream::Output(Box::new(NullOutput))),
            Rights::STDOUT,
            Rights::empty(),
        )
    }

    fn preopen_entry(dir: &tempfile::TempDir) -> Entry {
        let preopen = Arc::new(Preopen::new(3, dir.path(), "/").unwrap());
        let mut entry = Entry::new(
            OpenResource::Directory(DirHandle::new(preopen.clone(), Vec::new())),
            Rights::DIRECTORY_BASE,
            Rights::DIRECTORY_INHERITING,
        );
        entry.preopen = Some(preopen);
        entry
    }

    #[test]
    fn test_handles_are_sequential() {
        let mut table = ResourceTable::default();
        assert_eq!(table.insert(output()).unwrap(), Fd(0));
        assert_eq!(table.insert(output()).unwrap(), Fd(1));
        assert_eq!(table.insert(output()).unwrap(), Fd(2));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_closed_handle_is_badf() {
        let mut table = ResourceTable::default();
        let fd = table.insert(output()).unwrap();
        table.close(fd).unwrap();
        assert_eq!(table.close(fd), Err(Errno::Badf));
        assert_eq!(table.lookup(fd, Rights::empty()).err(), Some(Errno::Badf));
        assert_eq!(table.lookup(Fd(99), Rights::empty()).err(), Some(Errno::Badf));
    }

    #[test]
    fn test_rights_checked() {
        let mut table = ResourceTable::default();
        let fd = table.insert(output()).unwrap();
        assert!(table.lookup(fd, Rights::FD_WRITE).is_ok());
        assert_eq!(table.lookup(fd, Rights::FD_READ).err(), Some(Errno::Notcapable));
        assert_eq!(
            table.lookup(fd, Rights::FD_WRITE | Rights::FD_SEEK).err(),
            Some(Errno::Notcapable)
        );
    }

    #[test]
    fn test_handle_limit() {
        let mut table = ResourceTable::new(2);
        table.insert(output()).unwrap();
        table.insert(output()).unwrap();
        assert_eq!(table.insert(output()), Err(Errno::Mfile));
        table.close(Fd(0)).unwrap();
        assert_eq!(table.insert(output()), Ok(Fd(0)));
    }

    #[test]
    fn test_preopen_cannot_be_closed_or_renumbered() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = ResourceTable::default();
        let out = table.insert(output()).unwrap();
        let pre = table.insert(preopen_entry(&dir)).unwrap();

        assert_eq!(table.close(pre), Err(Errno::Notsup));
        assert_eq!(table.renumber(pre, out), Err(Errno::Notsup));
        assert_eq!(table.renumber(out, pre), Err(Errno::Notsup));
        assert!(table.contains(pre));
        assert_eq!(table.preopens().count(), 1);
    }

    #[test]
    fn test_renumber() {
        let mut table = ResourceTable::default();
        let a = table.insert(output()).unwrap();
        let b = table.insert(output()).unwrap();
        table.get_mut(a).unwrap().flags = FdFlags::APPEND;

        table.renumber(a, b).unwrap();
        assert!(!table.contains(a));
        assert_eq!(table.get(b).unwrap().flags, FdFlags::APPEND);
        assert_eq!(table.len(), 1);
        assert_eq!(table.renumber(a, b), Err(Errno::Badf));
    }

    #[test]
    fn test_close_all_reports() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = ResourceTable::default();
        table.insert(output()).unwrap();
        table.insert(preopen_entry(&dir)).unwrap();

        let report = table.close_all();
        assert_eq!(report.closed, 2);
        assert!(report.is_clean());
        assert!(table.is_empty());
    }
}
