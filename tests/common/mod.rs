//! Shared guest harness for integration tests
//!
//! `Guest` stands in for a compiled module: it owns a linear memory, lays
//! out call arguments the way a preview1 guest would and goes through the
//! public dispatcher for everything.

#![allow(dead_code)]

use wasip1::abi::{OFlags, Rights};
use wasip1::{Errno, LinearMemory, MemoryExt, Trap, Value, WasiCtx, WasiFunction};

pub const ROOT: u32 = 3;

pub fn i32v(v: u32) -> Value {
    Value::I32(v as i32)
}

pub fn i64v(v: u64) -> Value {
    Value::I64(v as i64)
}

pub struct Guest {
    pub ctx: WasiCtx,
    pub mem: LinearMemory,
    next: u32,
}

impl Guest {
    pub fn new(ctx: WasiCtx) -> Self {
        Self {
            ctx,
            mem: LinearMemory::new(1),
            next: 1024,
        }
    }

    /// Bump-allocate `size` bytes, 8-aligned
    pub fn alloc(&mut self, size: u32) -> u32 {
        let ptr = self.next;
        self.next = (ptr + size + 7) & !7;
        ptr
    }

    pub fn bytes(&mut self, data: &[u8]) -> (u32, u32) {
        let ptr = self.alloc(data.len() as u32);
        self.mem.write_bytes(ptr, data).unwrap();
        (ptr, data.len() as u32)
    }

    pub fn try_call(&mut self, func: WasiFunction, args: &[Value]) -> Result<Errno, Trap> {
        let raw = self.ctx.call(func, &mut self.mem, args)?;
        Ok(Errno::from_code(raw as u16).unwrap())
    }

    pub fn call(&mut self, func: WasiFunction, args: &[Value]) -> Errno {
        self.try_call(func, args).unwrap()
    }

    /// Call a `(fd, path_ptr, path_len)` function
    pub fn path_call(&mut self, func: WasiFunction, dir: u32, path: &str) -> Errno {
        let (p, len) = self.bytes(path.as_bytes());
        self.call(func, &[i32v(dir), i32v(p), i32v(len)])
    }

    pub fn open_at(
        &mut self,
        dir: u32,
        dirflags: u32,
        path: &str,
        oflags: OFlags,
        base: Rights,
        inheriting: Rights,
    ) -> Result<u32, Errno> {
        let (p, len) = self.bytes(path.as_bytes());
        let out = self.alloc(4);
        let errno = self.call(
            WasiFunction::PathOpen,
            &[
                i32v(dir),
                i32v(dirflags),
                i32v(p),
                i32v(len),
                i32v(oflags.bits() as u32),
                i64v(base.bits()),
                i64v(inheriting.bits()),
                i32v(0),
                i32v(out),
            ],
        );
        match errno {
            Errno::Success => Ok(self.mem.read_u32(out).unwrap()),
            e => Err(e),
        }
    }

    pub fn open(&mut self, path: &str, oflags: OFlags, rights: Rights) -> Result<u32, Errno> {
        self.open_at(ROOT, 0, path, oflags, rights, Rights::empty())
    }

    pub fn iovec(&mut self, buf: u32, len: u32) -> u32 {
        let iov = self.alloc(8);
        self.mem.write_u32(iov, buf).unwrap();
        self.mem.write_u32(iov + 4, len).unwrap();
        iov
    }

    pub fn write(&mut self, fd: u32, data: &[u8]) -> Result<u32, Errno> {
        let (buf, len) = self.bytes(data);
        let iov = self.iovec(buf, len);
        let out = self.alloc(4);
        match self.call(WasiFunction::FdWrite, &[i32v(fd), i32v(iov), i32v(1), i32v(out)]) {
            Errno::Success => Ok(self.mem.read_u32(out).unwrap()),
            e => Err(e),
        }
    }

    pub fn read(&mut self, fd: u32, max: u32) -> Result<Vec<u8>, Errno> {
        let buf = self.alloc(max);
        let iov = self.iovec(buf, max);
        let out = self.alloc(4);
        match self.call(WasiFunction::FdRead, &[i32v(fd), i32v(iov), i32v(1), i32v(out)]) {
            Errno::Success => {
                let n = self.mem.read_u32(out).unwrap();
                Ok(self.mem.view(buf, n).unwrap().to_vec())
            }
            e => Err(e),
        }
    }

    pub fn close(&mut self, fd: u32) -> Errno {
        self.call(WasiFunction::FdClose, &[i32v(fd)])
    }
}

pub const RW: Rights = Rights::FD_READ
    .union(Rights::FD_WRITE)
    .union(Rights::FD_SEEK)
    .union(Rights::FD_TELL)
    .union(Rights::FD_FILESTAT_GET);
