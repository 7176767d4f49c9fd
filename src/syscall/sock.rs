//! Socket calls
//!
//! No socket handles can exist in an instance, so these only distinguish an
//! unknown handle from one that is not a socket.

use crate::ctx::WasiCtx;
use crate::errno::{Errno, WasiResult};
use crate::table::Fd;

impl WasiCtx {
    fn not_a_socket(&self, fd: u32) -> WasiResult<()> {
        self.table.get(Fd(fd))?;
        Err(Errno::Notsock)
    }

    pub(crate) fn sock_accept(&mut self, fd: u32, _flags: u32, _fd_out: u32) -> WasiResult<()> {
        self.not_a_socket(fd)
    }

    pub(crate) fn sock_recv(
        &mut self,
        fd: u32,
        _ri_data: u32,
        _ri_data_len: u32,
        _ri_flags: u32,
        _ro_datalen_out: u32,
        _ro_flags_out: u32,
    ) -> WasiResult<()> {
        self.not_a_socket(fd)
    }

    pub(crate) fn sock_send(
        &mut self,
        fd: u32,
        _si_data: u32,
        _si_data_len: u32,
        _si_flags: u32,
        _so_datalen_out: u32,
    ) -> WasiResult<()> {
        self.not_a_socket(fd)
    }

    pub(crate) fn sock_shutdown(&mut self, fd: u32, _how: u32) -> WasiResult<()> {
        self.not_a_socket(fd)
    }
}
