//! Handle operations

use super::{check_out, flags_u16};
use crate::abi::{
    Advice, FdFlags, Fdstat, Filestat, FstFlags, IoVec, Prestat, Rights, Whence, guest_size,
};
use crate::ctx::WasiCtx;
use crate::errno::{Errno, WasiResult};
use crate::memory::{GuestMemory, MemoryExt};
use crate::table::{Fd, OpenResource, Stream, fill_dirents};
use crate::vfs;
use std::fs::{self, File};

/// Validate every buffer of an iovec array and the result slot
fn checked_iovecs(
    memory: &dyn GuestMemory,
    iovs: u32,
    iovs_len: u32,
    out: u32,
) -> WasiResult<Vec<IoVec>> {
    let iovs = memory.read_iovecs(iovs, iovs_len)?;
    for iov in &iovs {
        memory.view(iov.buf, iov.buf_len)?;
    }
    check_out(memory, out, 4, 4)?;
    Ok(iovs)
}

fn read_resource(resource: &mut OpenResource, buf: &mut [u8]) -> WasiResult<usize> {
    match resource {
        OpenResource::File(file) => file.read(buf),
        OpenResource::Stdio(Stream::Input(input)) => Ok(input.read(buf)?),
        OpenResource::Stdio(Stream::Output(_)) => Err(Errno::Badf),
        OpenResource::Directory(_) => Err(Errno::Isdir),
    }
}

fn write_resource(resource: &mut OpenResource, buf: &[u8]) -> WasiResult<usize> {
    match resource {
        OpenResource::File(file) => file.write(buf),
        OpenResource::Stdio(Stream::Output(output)) => Ok(output.write(buf)?),
        OpenResource::Stdio(Stream::Input(_)) => Err(Errno::Badf),
        OpenResource::Directory(_) => Err(Errno::Isdir),
    }
}

/// Fold a transfer result into a byte count
///
/// Once some bytes moved, a later failure ends the transfer short instead
/// of failing the whole call.
fn partial(done: usize, result: WasiResult<usize>) -> WasiResult<Option<usize>> {
    match result {
        Ok(n) => Ok(Some(n)),
        Err(_) if done > 0 => Ok(None),
        Err(errno) => Err(errno),
    }
}

impl WasiCtx {
    pub(crate) fn fd_advise(
        &mut self,
        fd: u32,
        offset: u64,
        len: u64,
        advice: u32,
    ) -> WasiResult<()> {
        self.table.file_mut(Fd(fd), Rights::FD_ADVISE)?;
        let advice = Advice::from_raw(advice)?;
        offset.checked_add(len).ok_or(Errno::Inval)?;
        tracing::trace!(fd, offset, len, ?advice, "advice ignored");
        Ok(())
    }

    pub(crate) fn fd_allocate(&mut self, fd: u32, offset: u64, len: u64) -> WasiResult<()> {
        self.table.file_mut(Fd(fd), Rights::FD_ALLOCATE)?.allocate(offset, len)
    }

    pub(crate) fn fd_close(&mut self, fd: u32) -> WasiResult<()> {
        self.table.close(Fd(fd))
    }

    pub(crate) fn fd_datasync(&mut self, fd: u32) -> WasiResult<()> {
        match &mut self.table.lookup_mut(Fd(fd), Rights::FD_DATASYNC)?.resource {
            OpenResource::File(file) => file.datasync(),
            OpenResource::Directory(dir) => Ok(File::open(dir.host_dir()?)?.sync_data()?),
            OpenResource::Stdio(stream) => flush_stream(stream),
        }
    }

    pub(crate) fn fd_sync(&mut self, fd: u32) -> WasiResult<()> {
        match &mut self.table.lookup_mut(Fd(fd), Rights::FD_SYNC)?.resource {
            OpenResource::File(file) => file.sync(),
            OpenResource::Directory(dir) => Ok(File::open(dir.host_dir()?)?.sync_all()?),
            OpenResource::Stdio(stream) => flush_stream(stream),
        }
    }

    pub(crate) fn fd_fdstat_get(
        &mut self,
        memory: &mut dyn GuestMemory,
        fd: u32,
        out: u32,
    ) -> WasiResult<()> {
        let entry = self.table.get(Fd(fd))?;
        let stat = Fdstat {
            filetype: entry.resource.filetype(),
            flags: entry.flags,
            rights_base: entry.base,
            rights_inheriting: entry.inheriting,
        };
        memory.write_record(out, &stat.to_bytes(), Fdstat::ALIGN)
    }

    /// Only `append` and `nonblock` can change after open
    pub(crate) fn fd_fdstat_set_flags(&mut self, fd: u32, flags: u32) -> WasiResult<()> {
        let entry = self.table.lookup_mut(Fd(fd), Rights::FD_FDSTAT_SET_FLAGS)?;
        let flags = FdFlags::from_bits(flags_u16(flags)?).ok_or(Errno::Inval)?;
        if !(FdFlags::APPEND | FdFlags::NONBLOCK).contains(flags) {
            return Err(Errno::Notsup);
        }
        if let OpenResource::File(file) = &mut entry.resource {
            file.append = flags.contains(FdFlags::APPEND);
        }
        entry.flags = flags;
        Ok(())
    }

    /// Rights can only be dropped, never regained
    pub(crate) fn fd_fdstat_set_rights(
        &mut self,
        fd: u32,
        base: u64,
        inheriting: u64,
    ) -> WasiResult<()> {
        let entry = self.table.get_mut(Fd(fd))?;
        let base = Rights::from_bits(base).ok_or(Errno::Inval)?;
        let inheriting = Rights::from_bits(inheriting).ok_or(Errno::Inval)?;
        if !entry.base.contains(base) || !entry.inheriting.contains(inheriting) {
            return Err(Errno::Notcapable);
        }
        entry.base = base;
        entry.inheriting = inheriting;
        Ok(())
    }

    pub(crate) fn fd_filestat_get(
        &mut self,
        memory: &mut dyn GuestMemory,
        fd: u32,
        out: u32,
    ) -> WasiResult<()> {
        let entry = self.table.lookup_mut(Fd(fd), Rights::FD_FILESTAT_GET)?;
        check_out(memory, out, Filestat::SIZE as u32, Filestat::ALIGN as u32)?;
        let stat = match &entry.resource {
            OpenResource::File(file) => file.filestat()?,
            OpenResource::Directory(dir) => vfs::filestat(&fs::metadata(dir.host_dir()?)?),
            OpenResource::Stdio(_) => Filestat::character_device(),
        };
        memory.write_record(out, &stat.to_bytes(), Filestat::ALIGN)
    }

    pub(crate) fn fd_filestat_set_size(&mut self, fd: u32, size: u64) -> WasiResult<()> {
        self.table
            .file_mut(Fd(fd), Rights::FD_FILESTAT_SET_SIZE)?
            .set_size(size)
    }

    pub(crate) fn fd_filestat_set_times(
        &mut self,
        fd: u32,
        atim: u64,
        mtim: u64,
        fst_flags: u32,
    ) -> WasiResult<()> {
        let entry = self.table.lookup_mut(Fd(fd), Rights::FD_FILESTAT_SET_TIMES)?;
        let flags = FstFlags::from_bits(flags_u16(fst_flags)?).ok_or(Errno::Inval)?;
        match &entry.resource {
            OpenResource::File(file) => file.set_times(atim, mtim, flags),
            OpenResource::Directory(dir) => {
                vfs::set_times(&File::open(dir.host_dir()?)?, atim, mtim, flags)
            }
            OpenResource::Stdio(_) => Err(Errno::Notsup),
        }
    }

    pub(crate) fn fd_read(
        &mut self,
        memory: &mut dyn GuestMemory,
        fd: u32,
        iovs: u32,
        iovs_len: u32,
        nread_out: u32,
    ) -> WasiResult<()> {
        let entry = self.table.lookup_mut(Fd(fd), Rights::FD_READ)?;
        let iovs = checked_iovecs(memory, iovs, iovs_len, nread_out)?;

        let mut total = 0usize;
        for iov in iovs {
            let buf = memory.view_mut(iov.buf, iov.buf_len)?;
            let Some(n) = partial(total, read_resource(&mut entry.resource, buf))? else {
                break;
            };
            total += n;
            if n < buf.len() {
                break;
            }
        }
        self.tracer.record_read(total);
        memory.write_u32(nread_out, guest_size(total)?)
    }

    pub(crate) fn fd_pread(
        &mut self,
        memory: &mut dyn GuestMemory,
        fd: u32,
        iovs: u32,
        iovs_len: u32,
        offset: u64,
        nread_out: u32,
    ) -> WasiResult<()> {
        let file = self.table.file_mut(Fd(fd), Rights::FD_READ | Rights::FD_SEEK)?;
        let iovs = checked_iovecs(memory, iovs, iovs_len, nread_out)?;

        let mut total = 0usize;
        for iov in iovs {
            let buf = memory.view_mut(iov.buf, iov.buf_len)?;
            let at = offset.checked_add(total as u64).ok_or(Errno::Overflow)?;
            let Some(n) = partial(total, file.pread(buf, at))? else {
                break;
            };
            total += n;
            if n < buf.len() {
                break;
            }
        }
        self.tracer.record_read(total);
        memory.write_u32(nread_out, guest_size(total)?)
    }

    pub(crate) fn fd_write(
        &mut self,
        memory: &mut dyn GuestMemory,
        fd: u32,
        iovs: u32,
        iovs_len: u32,
        nwritten_out: u32,
    ) -> WasiResult<()> {
        let entry = self.table.lookup_mut(Fd(fd), Rights::FD_WRITE)?;
        let iovs = checked_iovecs(memory, iovs, iovs_len, nwritten_out)?;

        let mut total = 0usize;
        for iov in iovs {
            let buf = memory.view(iov.buf, iov.buf_len)?;
            let Some(n) = partial(total, write_resource(&mut entry.resource, buf))? else {
                break;
            };
            total += n;
            if n < buf.len() {
                break;
            }
        }
        self.tracer.record_write(total);
        memory.write_u32(nwritten_out, guest_size(total)?)
    }

    pub(crate) fn fd_pwrite(
        &mut self,
        memory: &mut dyn GuestMemory,
        fd: u32,
        iovs: u32,
        iovs_len: u32,
        offset: u64,
        nwritten_out: u32,
    ) -> WasiResult<()> {
        let file = self.table.file_mut(Fd(fd), Rights::FD_WRITE | Rights::FD_SEEK)?;
        let iovs = checked_iovecs(memory, iovs, iovs_len, nwritten_out)?;

        let mut total = 0usize;
        for iov in iovs {
            let buf = memory.view(iov.buf, iov.buf_len)?;
            let at = offset.checked_add(total as u64).ok_or(Errno::Overflow)?;
            let Some(n) = partial(total, file.pwrite(buf, at))? else {
                break;
            };
            total += n;
            if n < buf.len() {
                break;
            }
        }
        self.tracer.record_write(total);
        memory.write_u32(nwritten_out, guest_size(total)?)
    }

    /// `(0, cur)` is a position query and only needs `fd_tell`
    pub(crate) fn fd_seek(
        &mut self,
        memory: &mut dyn GuestMemory,
        fd: u32,
        offset: i64,
        whence: u32,
        newoffset_out: u32,
    ) -> WasiResult<()> {
        let required = if offset == 0 && whence == Whence::Cur as u32 {
            Rights::FD_TELL
        } else {
            Rights::FD_SEEK
        };
        let file = self.table.file_mut(Fd(fd), required)?;
        let whence = Whence::from_raw(whence)?;
        check_out(memory, newoffset_out, 8, 8)?;
        let pos = file.seek(offset, whence)?;
        memory.write_u64(newoffset_out, pos)
    }

    pub(crate) fn fd_tell(
        &mut self,
        memory: &mut dyn GuestMemory,
        fd: u32,
        out: u32,
    ) -> WasiResult<()> {
        let file = self.table.file_mut(Fd(fd), Rights::FD_TELL)?;
        check_out(memory, out, 8, 8)?;
        let pos = file.tell()?;
        memory.write_u64(out, pos)
    }

    pub(crate) fn fd_prestat_get(
        &mut self,
        memory: &mut dyn GuestMemory,
        fd: u32,
        out: u32,
    ) -> WasiResult<()> {
        let preopen = self.table.preopen(Fd(fd))?;
        let stat = Prestat {
            name_len: guest_size(preopen.guest_name.len())?,
        };
        memory.write_record(out, &stat.to_bytes(), Prestat::ALIGN)
    }

    pub(crate) fn fd_prestat_dir_name(
        &mut self,
        memory: &mut dyn GuestMemory,
        fd: u32,
        path: u32,
        path_len: u32,
    ) -> WasiResult<()> {
        let preopen = self.table.preopen(Fd(fd))?;
        let name = preopen.guest_name.as_bytes();
        let dst = memory.view_mut(path, path_len)?;
        if dst.len() < name.len() {
            return Err(Errno::Nametoolong);
        }
        dst[..name.len()].copy_from_slice(name);
        Ok(())
    }

    pub(crate) fn fd_readdir(
        &mut self,
        memory: &mut dyn GuestMemory,
        fd: u32,
        buf: u32,
        buf_len: u32,
        cookie: u64,
        bufused_out: u32,
    ) -> WasiResult<()> {
        let dir = self.table.dir_mut(Fd(fd), Rights::FD_READDIR)?;
        memory.view(buf, buf_len)?;
        check_out(memory, bufused_out, 4, 4)?;

        let entries = dir.entries(cookie)?;
        let used = fill_dirents(entries, cookie, memory.view_mut(buf, buf_len)?);
        memory.write_u32(bufused_out, guest_size(used)?)
    }

    pub(crate) fn fd_renumber(&mut self, from: u32, to: u32) -> WasiResult<()> {
        self.table.renumber(Fd(from), Fd(to))
    }
}

fn flush_stream(stream: &mut Stream) -> WasiResult<()> {
    match stream {
        Stream::Output(output) => Ok(output.flush()?),
        Stream::Input(_) => Ok(()),
    }
}
