//! Instance context
//!
//! One `WasiCtx` per guest instance. It owns everything the guest can reach:
//! the resource table (stdio, preopens, whatever the guest opened), the
//! argument and environment lists, the clock, sleeper and random providers,
//! the cancellation token and the call tracer. Nothing is shared between
//! instances.
//!
//! Build one with [`WasiCtxBuilder`](crate::WasiCtxBuilder). Engines call
//! [`WasiCtx::call`] for each host import the guest invokes, passing the
//! guest's memory; [`WasiCtx::run`] drives a whole command and turns
//! `proc_exit` into an exit status.

use crate::clock::{CancelToken, Clock, RandomSource, Sleeper};
use crate::errno::{Errno, WasiResult};
use crate::exit::{ExitSignal, Trap};
use crate::memory::GuestMemory;
use crate::syscall::{Args, Value, WasiFunction};
use crate::table::{ResourceTable, TeardownReport};
use crate::trace::{CallOutcome, Tracer};
use std::time::Instant;

/// Host-side state of one guest instance
pub struct WasiCtx {
    pub(crate) table: ResourceTable,
    pub(crate) args: Vec<String>,
    /// `KEY=VALUE` strings, in configuration order
    pub(crate) env: Vec<String>,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) sleeper: Box<dyn Sleeper>,
    pub(crate) random: Box<dyn RandomSource>,
    pub(crate) cancel: CancelToken,
    pub(crate) tracer: Tracer,
    exited: Option<ExitSignal>,
    torn_down: bool,
}

impl WasiCtx {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        table: ResourceTable,
        args: Vec<String>,
        env: Vec<String>,
        clock: Box<dyn Clock>,
        sleeper: Box<dyn Sleeper>,
        random: Box<dyn RandomSource>,
        cancel: CancelToken,
        tracer: Tracer,
    ) -> Self {
        Self {
            table,
            args,
            env,
            clock,
            sleeper,
            random,
            cancel,
            tracer,
            exited: None,
            torn_down: false,
        }
    }

    /// Invoke a host function on behalf of the guest
    ///
    /// Returns the errno as the function's i32 result (0 for `proc_exit`,
    /// which never returns normally). `Err` means guest execution must stop:
    /// either the guest exited or the call broke the calling convention.
    pub fn call(
        &mut self,
        func: WasiFunction,
        memory: &mut dyn GuestMemory,
        args: &[Value],
    ) -> Result<i32, Trap> {
        if let Some(signal) = self.exited {
            return Err(Trap::Exit(signal));
        }
        let mut args = Args::new(func, args)?;

        let started = Instant::now();
        let result = self.dispatch(func, memory, &mut args);
        let elapsed = started.elapsed();

        let outcome = match &result {
            Ok(errno) => CallOutcome::from_errno(*errno),
            Err(Trap::Exit(signal)) => CallOutcome::Exit(signal.code),
            Err(Trap::HostBug(_)) => CallOutcome::HostBug,
        };
        tracing::trace!(
            function = func.name(),
            ?outcome,
            elapsed_ns = elapsed.as_nanos() as u64,
            "host call"
        );
        self.tracer.record(func, outcome, elapsed);

        result.map(Errno::raw)
    }

    /// Invoke a host function by import name
    pub fn call_by_name(
        &mut self,
        name: &str,
        memory: &mut dyn GuestMemory,
        args: &[Value],
    ) -> Result<i32, Trap> {
        let func = WasiFunction::from_name(name)
            .ok_or_else(|| Trap::HostBug(format!("no host function named {name}")))?;
        self.call(func, memory, args)
    }

    fn dispatch(
        &mut self,
        func: WasiFunction,
        mem: &mut dyn GuestMemory,
        a: &mut Args<'_>,
    ) -> Result<Errno, Trap> {
        use WasiFunction::*;

        let result: WasiResult<()> = match func {
            ArgsGet => self.args_get(mem, a.u32(), a.u32()),
            ArgsSizesGet => self.args_sizes_get(mem, a.u32(), a.u32()),
            EnvironGet => self.environ_get(mem, a.u32(), a.u32()),
            EnvironSizesGet => self.environ_sizes_get(mem, a.u32(), a.u32()),
            ClockResGet => self.clock_res_get(mem, a.u32(), a.u32()),
            ClockTimeGet => self.clock_time_get(mem, a.u32(), a.u64(), a.u32()),
            FdAdvise => self.fd_advise(a.u32(), a.u64(), a.u64(), a.u32()),
            FdAllocate => self.fd_allocate(a.u32(), a.u64(), a.u64()),
            FdClose => self.fd_close(a.u32()),
            FdDatasync => self.fd_datasync(a.u32()),
            FdFdstatGet => self.fd_fdstat_get(mem, a.u32(), a.u32()),
            FdFdstatSetFlags => self.fd_fdstat_set_flags(a.u32(), a.u32()),
            FdFdstatSetRights => self.fd_fdstat_set_rights(a.u32(), a.u64(), a.u64()),
            FdFilestatGet => self.fd_filestat_get(mem, a.u32(), a.u32()),
            FdFilestatSetSize => self.fd_filestat_set_size(a.u32(), a.u64()),
            FdFilestatSetTimes => self.fd_filestat_set_times(a.u32(), a.u64(), a.u64(), a.u32()),
            FdPread => self.fd_pread(mem, a.u32(), a.u32(), a.u32(), a.u64(), a.u32()),
            FdPrestatGet => self.fd_prestat_get(mem, a.u32(), a.u32()),
            FdPrestatDirName => self.fd_prestat_dir_name(mem, a.u32(), a.u32(), a.u32()),
            FdPwrite => self.fd_pwrite(mem, a.u32(), a.u32(), a.u32(), a.u64(), a.u32()),
            FdRead => self.fd_read(mem, a.u32(), a.u32(), a.u32(), a.u32()),
            FdReaddir => self.fd_readdir(mem, a.u32(), a.u32(), a.u32(), a.u64(), a.u32()),
            FdRenumber => self.fd_renumber(a.u32(), a.u32()),
            FdSeek => self.fd_seek(mem, a.u32(), a.i64(), a.u32(), a.u32()),
            FdSync => self.fd_sync(a.u32()),
            FdTell => self.fd_tell(mem, a.u32(), a.u32()),
            FdWrite => self.fd_write(mem, a.u32(), a.u32(), a.u32(), a.u32()),
            PathCreateDirectory => self.path_create_directory(mem, a.u32(), a.u32(), a.u32()),
            PathFilestatGet => {
                self.path_filestat_get(mem, a.u32(), a.u32(), a.u32(), a.u32(), a.u32())
            }
            PathFilestatSetTimes => self.path_filestat_set_times(
                mem,
                a.u32(),
                a.u32(),
                a.u32(),
                a.u32(),
                a.u64(),
                a.u64(),
                a.u32(),
            ),
            PathLink => self.path_link(
                mem,
                a.u32(),
                a.u32(),
                a.u32(),
                a.u32(),
                a.u32(),
                a.u32(),
                a.u32(),
            ),
            PathOpen => self.path_open(
                mem,
                a.u32(),
                a.u32(),
                a.u32(),
                a.u32(),
                a.u32(),
                a.u64(),
                a.u64(),
                a.u32(),
                a.u32(),
            ),
            PathReadlink => {
                self.path_readlink(mem, a.u32(), a.u32(), a.u32(), a.u32(), a.u32(), a.u32())
            }
            PathRemoveDirectory => self.path_remove_directory(mem, a.u32(), a.u32(), a.u32()),
            PathRename => {
                self.path_rename(mem, a.u32(), a.u32(), a.u32(), a.u32(), a.u32(), a.u32())
            }
            PathSymlink => self.path_symlink(mem, a.u32(), a.u32(), a.u32(), a.u32(), a.u32()),
            PathUnlinkFile => self.path_unlink_file(mem, a.u32(), a.u32(), a.u32()),
            PollOneoff => self.poll_oneoff(mem, a.u32(), a.u32(), a.u32(), a.u32()),
            ProcExit => return Err(self.proc_exit(a.u32())),
            ProcRaise => self.proc_raise(a.u32()),
            SchedYield => self.sched_yield(),
            RandomGet => self.random_get(mem, a.u32(), a.u32()),
            SockAccept => self.sock_accept(a.u32(), a.u32(), a.u32()),
            SockRecv => self.sock_recv(a.u32(), a.u32(), a.u32(), a.u32(), a.u32(), a.u32()),
            SockSend => self.sock_send(a.u32(), a.u32(), a.u32(), a.u32(), a.u32()),
            SockShutdown => self.sock_shutdown(a.u32(), a.u32()),
        };

        Ok(match result {
            Ok(()) => Errno::Success,
            Err(errno) => errno,
        })
    }

    /// Raise the exit signal; the instance accepts no further calls
    fn proc_exit(&mut self, code: u32) -> Trap {
        tracing::debug!(code, "guest requested exit");
        let signal = ExitSignal::new(code);
        self.exited = Some(signal);
        Trap::Exit(signal)
    }

    /// Run a command's entry point
    ///
    /// `entry` stands in for the guest's `_start`: it makes host calls
    /// through the context and propagates any trap with `?`. Returning
    /// normally is exit status 0; `proc_exit(n)` is status `n`.
    pub fn run<F>(&mut self, entry: F) -> Result<u32, Trap>
    where
        F: FnOnce(&mut WasiCtx) -> Result<(), Trap>,
    {
        match entry(self) {
            Ok(()) => Ok(self.exited.map_or(0, |s| s.code)),
            Err(Trap::Exit(signal)) => Ok(signal.code),
            Err(trap) => Err(trap),
        }
    }

    /// Exit requested by the guest, if any
    pub fn exit_status(&self) -> Option<ExitSignal> {
        self.exited
    }

    pub fn table(&self) -> &ResourceTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut ResourceTable {
        &mut self.table
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Environment as `KEY=VALUE` strings
    pub fn env(&self) -> &[String] {
        &self.env
    }

    /// Token that cancels this instance from another thread
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn tracer_mut(&mut self) -> &mut Tracer {
        &mut self.tracer
    }

    /// Close every open resource
    ///
    /// Failures are collected into the report and logged, never raised.
    /// Called automatically on drop if not called before.
    pub fn teardown(&mut self) -> TeardownReport {
        self.torn_down = true;
        let report = self.table.close_all();
        for (fd, err) in &report.failures {
            tracing::warn!(%fd, "close failed during teardown: {}", err);
        }
        tracing::debug!(
            closed = report.closed,
            failures = report.failures.len(),
            "instance torn down"
        );
        report
    }
}

impl Drop for WasiCtx {
    fn drop(&mut self) {
        if !self.torn_down {
            self.teardown();
        }
    }
}

impl std::fmt::Debug for WasiCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasiCtx")
            .field("handles", &self.table.len())
            .field("args", &self.args)
            .field("exited", &self.exited)
            .finish_non_exhaustive()
    }
}
