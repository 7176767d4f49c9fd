//! Path operations
//!
//! Every path argument is resolved through [`vfs::resolve`] against the
//! preopen its directory handle lives under. The host is only touched with
//! the resolved host path, and a final component that is a symlink is never
//! followed by the host call itself: resolution has already expanded every
//! link the guest asked to follow.
//!
//! Path strings are read as [`PathArg`]s together with the other pointer
//! arguments, and only resolved once all of guest memory has been checked.

use super::{check_out, flags_u16};
use crate::abi::{FdFlags, Filestat, Filetype, FstFlags, LookupFlags, OFlags, Rights, guest_size};
use crate::ctx::WasiCtx;
use crate::errno::{Errno, WasiResult};
use crate::memory::{GuestMemory, MemoryExt};
use crate::table::{DirHandle, Entry, Fd, FileHandle, OpenResource};
use crate::vfs::{self, OpenMode, Preopen, Resolved, normalize_lexically, resolve};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::sync::Arc;

/// A guest path read from memory, not yet resolved
struct PathArg<'m> {
    preopen: Arc<Preopen>,
    base: Vec<String>,
    path: &'m str,
}

impl PathArg<'_> {
    fn resolve(self, follow: bool) -> WasiResult<Target> {
        let resolved = resolve(&self.preopen, &self.base, self.path, follow)?;
        Ok(Target {
            preopen: self.preopen,
            resolved,
            wants_dir: self.path.ends_with('/'),
        })
    }
}

/// A guest path resolved below a directory handle
struct Target {
    preopen: Arc<Preopen>,
    resolved: Resolved,
    /// The guest spelled the path with a trailing `/`
    wants_dir: bool,
}

impl Target {
    fn host(&self) -> &Path {
        &self.resolved.host
    }

    /// Operations that replace or remove an entry cannot act on the root
    fn not_root(&self) -> WasiResult<()> {
        if self.resolved.is_root() {
            return Err(Errno::Busy);
        }
        Ok(())
    }
}

fn lookup_flags(raw: u32) -> WasiResult<bool> {
    let flags = LookupFlags::from_bits(raw).ok_or(Errno::Inval)?;
    Ok(flags.contains(LookupFlags::SYMLINK_FOLLOW))
}

/// Open without following a final symlink
fn open_nofollow(path: &Path) -> io::Result<File> {
    let mut opts = fs::OpenOptions::new();
    opts.read(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.custom_flags(libc::O_NOFOLLOW);
    }
    opts.open(path)
}

impl WasiCtx {
    /// Check `required` on the directory handle, then read the guest path
    fn path_arg<'m>(
        &self,
        memory: &'m dyn GuestMemory,
        fd: u32,
        required: Rights,
        path: u32,
        path_len: u32,
    ) -> WasiResult<PathArg<'m>> {
        let dir = self.table.dir(Fd(fd), required)?;
        Ok(PathArg {
            preopen: dir.preopen.clone(),
            base: dir.components.clone(),
            path: memory.read_str(path, path_len)?,
        })
    }

    /// [`path_arg`](Self::path_arg) and resolve it straight away, for
    /// functions with no other pointer arguments
    fn target(
        &self,
        memory: &dyn GuestMemory,
        fd: u32,
        required: Rights,
        path: u32,
        path_len: u32,
        follow: bool,
    ) -> WasiResult<Target> {
        self.path_arg(memory, fd, required, path, path_len)?.resolve(follow)
    }

    pub(crate) fn path_create_directory(
        &mut self,
        memory: &mut dyn GuestMemory,
        fd: u32,
        path: u32,
        path_len: u32,
    ) -> WasiResult<()> {
        let target = self.target(memory, fd, Rights::PATH_CREATE_DIRECTORY, path, path_len, false)?;
        if target.resolved.is_root() {
            return Err(Errno::Exist);
        }
        fs::create_dir(target.host())?;
        Ok(())
    }

    pub(crate) fn path_filestat_get(
        &mut self,
        memory: &mut dyn GuestMemory,
        fd: u32,
        flags: u32,
        path: u32,
        path_len: u32,
        out: u32,
    ) -> WasiResult<()> {
        let follow = lookup_flags(flags)?;
        let arg = self.path_arg(memory, fd, Rights::PATH_FILESTAT_GET, path, path_len)?;
        check_out(memory, out, Filestat::SIZE as u32, Filestat::ALIGN as u32)?;
        let target = arg.resolve(follow)?;
        let meta = fs::symlink_metadata(target.host())?;
        if target.wants_dir && !meta.is_dir() {
            return Err(Errno::Notdir);
        }
        memory.write_record(out, &vfs::filestat(&meta).to_bytes(), Filestat::ALIGN)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn path_filestat_set_times(
        &mut self,
        memory: &mut dyn GuestMemory,
        fd: u32,
        flags: u32,
        path: u32,
        path_len: u32,
        atim: u64,
        mtim: u64,
        fst_flags: u32,
    ) -> WasiResult<()> {
        let follow = lookup_flags(flags)?;
        let fst_flags = FstFlags::from_bits(flags_u16(fst_flags)?).ok_or(Errno::Inval)?;
        let target = self.target(
            memory,
            fd,
            Rights::PATH_FILESTAT_SET_TIMES,
            path,
            path_len,
            follow,
        )?;
        if fs::symlink_metadata(target.host())?.file_type().is_symlink() {
            // Setting times on the link itself has no portable host call
            return Err(Errno::Notsup);
        }
        let file = open_nofollow(target.host())?;
        vfs::set_times(&file, atim, mtim, fst_flags)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn path_link(
        &mut self,
        memory: &mut dyn GuestMemory,
        old_fd: u32,
        old_flags: u32,
        old_path: u32,
        old_path_len: u32,
        new_fd: u32,
        new_path: u32,
        new_path_len: u32,
    ) -> WasiResult<()> {
        let follow = lookup_flags(old_flags)?;
        self.table.dir(Fd(new_fd), Rights::PATH_LINK_TARGET)?;
        let old = self.path_arg(memory, old_fd, Rights::PATH_LINK_SOURCE, old_path, old_path_len)?;
        let new = self.path_arg(memory, new_fd, Rights::PATH_LINK_TARGET, new_path, new_path_len)?;
        let (old, new) = (old.resolve(follow)?, new.resolve(false)?);
        old.not_root()?;
        new.not_root()?;
        fs::hard_link(old.host(), new.host())?;
        Ok(())
    }

    /// Open a file or directory below `fd` and hand the guest a new handle
    ///
    /// The new handle's rights are what the guest asked for, narrowed to
    /// what `fd` may hand down and to what makes sense for the opened type.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn path_open(
        &mut self,
        memory: &mut dyn GuestMemory,
        fd: u32,
        dirflags: u32,
        path: u32,
        path_len: u32,
        oflags: u32,
        rights_base: u64,
        rights_inheriting: u64,
        fdflags: u32,
        fd_out: u32,
    ) -> WasiResult<()> {
        let parent = self.table.lookup(Fd(fd), Rights::PATH_OPEN)?;
        let (parent_inheriting, parent_type) = (parent.inheriting, parent.resource.filetype());
        if parent_type != Filetype::Directory {
            return Err(Errno::Notdir);
        }

        let follow = lookup_flags(dirflags)?;
        let oflags = OFlags::from_bits(flags_u16(oflags)?).ok_or(Errno::Inval)?;
        let fdflags = FdFlags::from_bits(flags_u16(fdflags)?).ok_or(Errno::Inval)?;
        if oflags.contains(OFlags::DIRECTORY | OFlags::CREAT) {
            return Err(Errno::Inval);
        }

        let mut required = Rights::PATH_OPEN;
        if oflags.contains(OFlags::CREAT) {
            required |= Rights::PATH_CREATE_FILE;
        }
        if oflags.contains(OFlags::TRUNC) {
            required |= Rights::PATH_FILESTAT_SET_SIZE;
        }
        let base = Rights::from_bits_truncate(rights_base) & parent_inheriting;
        let inheriting = Rights::from_bits_truncate(rights_inheriting) & parent_inheriting;

        let arg = self.path_arg(memory, fd, required, path, path_len)?;
        check_out(memory, fd_out, 4, 4)?;
        if self.table.len() >= self.table.max_handles() {
            return Err(Errno::Mfile);
        }
        let target = arg.resolve(follow)?;

        let existing = match fs::symlink_metadata(target.host()) {
            Ok(meta) => Some(meta),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };
        let is_dir = existing.as_ref().is_some_and(|m| m.is_dir());

        let entry = if is_dir && !oflags.contains(OFlags::EXCL | OFlags::CREAT) {
            // With O_DIRECTORY, write rights are simply masked off below
            let mode = OpenMode::from_wasi(oflags, fdflags, base);
            if mode.truncate || (mode.write && !oflags.contains(OFlags::DIRECTORY)) {
                return Err(Errno::Isdir);
            }
            let handle = DirHandle::new(target.preopen.clone(), target.resolved.components.clone());
            Entry::new(
                OpenResource::Directory(handle),
                base & Rights::DIRECTORY_BASE,
                inheriting & Rights::DIRECTORY_INHERITING,
            )
            .with_flags(fdflags)
        } else {
            if oflags.contains(OFlags::DIRECTORY) || target.wants_dir {
                return Err(if existing.is_some() { Errno::Notdir } else { Errno::Noent });
            }
            let mode = OpenMode::from_wasi(oflags, fdflags, base);
            let mut opts = mode.to_std();
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                opts.custom_flags(libc::O_NOFOLLOW);
            }
            let file = opts.open(target.host())?;
            let filetype = Filetype::from_std(&file.metadata()?.file_type());
            let handle = FileHandle::new(file, target.resolved.host.clone(), filetype, mode.append);
            Entry::new(
                OpenResource::File(handle),
                base & Rights::REGULAR_FILE_BASE,
                inheriting & Rights::REGULAR_FILE_BASE,
            )
            .with_flags(fdflags)
        };

        let new_fd = self.table.insert(entry)?;
        tracing::debug!(
            parent = fd,
            fd = new_fd.0,
            host = %target.host().display(),
            "path opened"
        );
        memory.write_u32(fd_out, new_fd.0)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn path_readlink(
        &mut self,
        memory: &mut dyn GuestMemory,
        fd: u32,
        path: u32,
        path_len: u32,
        buf: u32,
        buf_len: u32,
        bufused_out: u32,
    ) -> WasiResult<()> {
        let arg = self.path_arg(memory, fd, Rights::PATH_READLINK, path, path_len)?;
        memory.view(buf, buf_len)?;
        check_out(memory, bufused_out, 4, 4)?;
        let target = arg.resolve(false)?;

        let link = fs::read_link(target.host())?;
        let link = link.to_str().ok_or(Errno::Ilseq)?.as_bytes();
        let n = link.len().min(buf_len as usize);
        memory.write_bytes(buf, &link[..n])?;
        memory.write_u32(bufused_out, guest_size(n)?)
    }

    pub(crate) fn path_remove_directory(
        &mut self,
        memory: &mut dyn GuestMemory,
        fd: u32,
        path: u32,
        path_len: u32,
    ) -> WasiResult<()> {
        let target = self.target(memory, fd, Rights::PATH_REMOVE_DIRECTORY, path, path_len, false)?;
        target.not_root()?;
        if !fs::symlink_metadata(target.host())?.is_dir() {
            return Err(Errno::Notdir);
        }
        fs::remove_dir(target.host())?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn path_rename(
        &mut self,
        memory: &mut dyn GuestMemory,
        fd: u32,
        old_path: u32,
        old_path_len: u32,
        new_fd: u32,
        new_path: u32,
        new_path_len: u32,
    ) -> WasiResult<()> {
        self.table.dir(Fd(new_fd), Rights::PATH_RENAME_TARGET)?;
        let old = self.path_arg(memory, fd, Rights::PATH_RENAME_SOURCE, old_path, old_path_len)?;
        let new = self.path_arg(
            memory,
            new_fd,
            Rights::PATH_RENAME_TARGET,
            new_path,
            new_path_len,
        )?;
        let (old, new) = (old.resolve(false)?, new.resolve(false)?);
        old.not_root()?;
        new.not_root()?;
        fs::rename(old.host(), new.host())?;
        Ok(())
    }

    /// The link target must stay inside the sandbox when read relative to
    /// the link's own directory, both spelled out and once the links it
    /// passes through are expanded
    pub(crate) fn path_symlink(
        &mut self,
        memory: &mut dyn GuestMemory,
        old_path: u32,
        old_path_len: u32,
        fd: u32,
        new_path: u32,
        new_path_len: u32,
    ) -> WasiResult<()> {
        let link = self.path_arg(memory, fd, Rights::PATH_SYMLINK, new_path, new_path_len)?;
        let contents = memory.read_str(old_path, old_path_len)?;
        let link = link.resolve(false)?;
        link.not_root()?;

        let components = &link.resolved.components;
        let link_dir = &components[..components.len() - 1];
        let escapes = normalize_lexically(link_dir, contents).is_err()
            || resolve(&link.preopen, link_dir, contents, true) == Err(Errno::Notcapable);
        if escapes {
            tracing::debug!(link = contents, "symlink target would leave preopen");
            return Err(Errno::Notcapable);
        }

        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(contents, link.host())?;
            Ok(())
        }
        #[cfg(not(unix))]
        {
            Err(Errno::Notsup)
        }
    }

    pub(crate) fn path_unlink_file(
        &mut self,
        memory: &mut dyn GuestMemory,
        fd: u32,
        path: u32,
        path_len: u32,
    ) -> WasiResult<()> {
        let target = self.target(memory, fd, Rights::PATH_UNLINK_FILE, path, path_len, false)?;
        target.not_root()?;
        if fs::symlink_metadata(target.host())?.is_dir() {
            return Err(Errno::Isdir);
        }
        if target.wants_dir {
            return Err(Errno::Notdir);
        }
        fs::remove_file(target.host())?;
        Ok(())
    }
}
