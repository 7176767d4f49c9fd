//! Host function interface
//!
//! This is the boundary between guest code and the host. Every capability a
//! guest has goes through one of these functions:
//! - Isolation: guests only name handles they were given
//! - Auditing: every call goes through [`WasiCtx::call`](crate::WasiCtx::call)
//! - Safety: every pointer and integer is validated before use
//! - Tracing: optional per-call instrumentation
//!
//! Each preview1 function is one variant of [`WasiFunction`], with a stable
//! number, its import name and its core wasm signature. Engines resolve
//! imports once, at link time, with [`resolve_import`]; a name or signature
//! the host does not implement is a [`LinkError`] then, never a runtime
//! surprise.
//!
//! Checks inside each function run in a fixed order: handle and rights
//! first, then guest memory bounds, then the host operation. A guest that
//! lacks a right therefore never causes a host side effect, and a bad
//! pointer is reported before anything is read or written on the host.

mod args;
mod clock;
mod fd;
mod path;
mod poll;
mod sock;


use crate::abi::IMPORT_NAMESPACE;
use crate::errno::{Errno, WasiResult};
use crate::error::LinkError;
use crate::exit::Trap;
use crate::memory::{GuestMemory, MemoryExt};
use std::fmt;

/// Core wasm value types used by preview1 signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValType {
    I32,
    I64,
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValType::I32 => write!(f, "i32"),
            ValType::I64 => write!(f, "i64"),
        }
    }
}

/// An argument passed by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    I32(i32),
    I64(i64),
}

impl Value {
    pub fn ty(&self) -> ValType {
        match self {
            Value::I32(_) => ValType::I32,
            Value::I64(_) => ValType::I64,
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::I32(v as i32)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::I64(v as i64)
    }
}

fn format_signature(params: &[ValType], results: &[ValType]) -> String {
    let list = |tys: &[ValType]| tys.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(", ");
    format!("({}) -> ({})", list(params), list(results))
}

macro_rules! wasi_functions {
    ($( $variant:ident = $num:literal, $name:literal, [$($param:ident),*], [$($result:ident),*]; )*) => {
        /// Every host function of snapshot preview1
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u32)]
        pub enum WasiFunction {
            $( $variant = $num, )*
        }

        impl WasiFunction {
            pub const ALL: &'static [WasiFunction] = &[ $( WasiFunction::$variant, )* ];

            /// Import name
            pub fn name(&self) -> &'static str {
                match self {
                    $( WasiFunction::$variant => $name, )*
                }
            }

            pub fn params(&self) -> &'static [ValType] {
                match self {
                    $( WasiFunction::$variant => &[$(ValType::$param),*], )*
                }
            }

            pub fn results(&self) -> &'static [ValType] {
                match self {
                    $( WasiFunction::$variant => &[$(ValType::$result),*], )*
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $( $name => Some(WasiFunction::$variant), )*
                    _ => None,
                }
            }
        }
    };
}

wasi_functions! {
    ArgsGet = 0, "args_get", [I32, I32], [I32];
    ArgsSizesGet = 1, "args_sizes_get", [I32, I32], [I32];
    EnvironGet = 2, "environ_get", [I32, I32], [I32];
    EnvironSizesGet = 3, "environ_sizes_get", [I32, I32], [I32];
    ClockResGet = 4, "clock_res_get", [I32, I32], [I32];
    ClockTimeGet = 5, "clock_time_get", [I32, I64, I32], [I32];
    FdAdvise = 6, "fd_advise", [I32, I64, I64, I32], [I32];
    FdAllocate = 7, "fd_allocate", [I32, I64, I64], [I32];
    FdClose = 8, "fd_close", [I32], [I32];
    FdDatasync = 9, "fd_datasync", [I32], [I32];
    FdFdstatGet = 10, "fd_fdstat_get", [I32, I32], [I32];
    FdFdstatSetFlags = 11, "fd_fdstat_set_flags", [I32, I32], [I32];
    FdFdstatSetRights = 12, "fd_fdstat_set_rights", [I32, I64, I64], [I32];
    FdFilestatGet = 13, "fd_filestat_get", [I32, I32], [I32];
    FdFilestatSetSize = 14, "fd_filestat_set_size", [I32, I64], [I32];
    FdFilestatSetTimes = 15, "fd_filestat_set_times", [I32, I64, I64, I32], [I32];
    FdPread = 16, "fd_pread", [I32, I32, I32, I64, I32], [I32];
    FdPrestatGet = 17, "fd_prestat_get", [I32, I32], [I32];
    FdPrestatDirName = 18, "fd_prestat_dir_name", [I32, I32, I32], [I32];
    FdPwrite = 19, "fd_pwrite", [I32, I32, I32, I64, I32], [I32];
    FdRead = 20, "fd_read", [I32, I32, I32, I32], [I32];
    FdReaddir = 21, "fd_readdir", [I32, I32, I32, I64, I32], [I32];
    FdRenumber = 22, "fd_renumber", [I32, I32], [I32];
    FdSeek = 23, "fd_seek", [I32, I64, I32, I32], [I32];
    FdSync = 24, "fd_sync", [I32], [I32];
    FdTell = 25, "fd_tell", [I32, I32], [I32];
    FdWrite = 26, "fd_write", [I32, I32, I32, I32], [I32];
    PathCreateDirectory = 27, "path_create_directory", [I32, I32, I32], [I32];
    PathFilestatGet = 28, "path_filestat_get", [I32, I32, I32, I32, I32], [I32];
    PathFilestatSetTimes = 29, "path_filestat_set_times", [I32, I32, I32, I32, I64, I64, I32], [I32];
    PathLink = 30, "path_link", [I32, I32, I32, I32, I32, I32, I32], [I32];
    PathOpen = 31, "path_open", [I32, I32, I32, I32, I32, I64, I64, I32, I32], [I32];
    PathReadlink = 32, "path_readlink", [I32, I32, I32, I32, I32, I32], [I32];
    PathRemoveDirectory = 33, "path_remove_directory", [I32, I32, I32], [I32];
    PathRename = 34, "path_rename", [I32, I32, I32, I32, I32, I32], [I32];
    PathSymlink = 35, "path_symlink", [I32, I32, I32, I32, I32], [I32];
    PathUnlinkFile = 36, "path_unlink_file", [I32, I32, I32], [I32];
    PollOneoff = 37, "poll_oneoff", [I32, I32, I32, I32], [I32];
    ProcExit = 38, "proc_exit", [I32], [];
    ProcRaise = 39, "proc_raise", [I32], [I32];
    SchedYield = 40, "sched_yield", [], [I32];
    RandomGet = 41, "random_get", [I32, I32], [I32];
    SockAccept = 42, "sock_accept", [I32, I32, I32], [I32];
    SockRecv = 43, "sock_recv", [I32, I32, I32, I32, I32, I32], [I32];
    SockSend = 44, "sock_send", [I32, I32, I32, I32, I32], [I32];
    SockShutdown = 45, "sock_shutdown", [I32, I32], [I32];
}

impl WasiFunction {
    /// Stable function number
    pub fn num(&self) -> u32 {
        *self as u32
    }

    /// Signature in `(params) -> (results)` form
    pub fn signature(&self) -> String {
        format_signature(self.params(), self.results())
    }
}

impl fmt::Display for WasiFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.num())
    }
}

/// Resolve a guest import against the host's function set
pub fn resolve_import(
    module: &str,
    name: &str,
    params: &[ValType],
    results: &[ValType],
) -> Result<WasiFunction, LinkError> {
    if module != IMPORT_NAMESPACE {
        return Err(LinkError::UnknownModule(module.to_string()));
    }
    let func = WasiFunction::from_name(name).ok_or_else(|| LinkError::UnknownFunction {
        module: module.to_string(),
        name: name.to_string(),
    })?;
    if func.params() != params || func.results() != results {
        return Err(LinkError::SignatureMismatch {
            name: func.name(),
            expected: func.signature(),
            found: format_signature(params, results),
        });
    }
    Ok(func)
}

// ============================================================================
// Argument decoding
// ============================================================================

/// Typed view over the raw arguments of one call
///
/// Argument count and types were validated against the signature before any
/// routine runs, so the accessors cannot fail on a well-formed call.
pub(crate) struct Args<'a> {
    values: &'a [Value],
    pos: usize,
}

impl<'a> Args<'a> {
    /// Check `values` against the signature of `func`
    pub(crate) fn new(func: WasiFunction, values: &'a [Value]) -> Result<Self, Trap> {
        let types: Vec<ValType> = values.iter().map(Value::ty).collect();
        if types != func.params() {
            return Err(Trap::HostBug(format!(
                "{} expects {}, called with {}",
                func.name(),
                func.signature(),
                format_signature(&types, func.results())
            )));
        }
        Ok(Self { values, pos: 0 })
    }

    fn next(&mut self) -> Value {
        let value = self.values.get(self.pos).copied().unwrap_or(Value::I32(0));
        self.pos += 1;
        value
    }

    /// Next i32 argument, reinterpreted as unsigned
    pub(crate) fn u32(&mut self) -> u32 {
        match self.next() {
            Value::I32(v) => v as u32,
            Value::I64(v) => v as u32,
        }
    }

    /// Next i64 argument, reinterpreted as unsigned
    pub(crate) fn u64(&mut self) -> u64 {
        match self.next() {
            Value::I64(v) => v as u64,
            Value::I32(v) => v as u32 as u64,
        }
    }

    pub(crate) fn i64(&mut self) -> i64 {
        self.u64() as i64
    }
}

/// Validate an output location before any host work happens
pub(crate) fn check_out(
    memory: &dyn GuestMemory,
    ptr: u32,
    size: u32,
    align: u32,
) -> WasiResult<()> {
    memory.view(ptr, size)?;
    if ptr % align != 0 {
        return Err(Errno::Inval);
    }
    Ok(())
}

/// Narrow a raw flags argument, rejecting bits that do not fit
pub(crate) fn flags_u16(raw: u32) -> WasiResult<u16> {
    u16::try_from(raw).map_err(|_| Errno::Inval)
}
