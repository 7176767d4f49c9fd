//! wasip1 - host side of WASI snapshot preview1
//!
//! Gives a sandboxed WebAssembly guest POSIX-like capabilities (files,
//! directories, clocks, randomness, args and environment, event waiting,
//! exit) without ever handing it host access.
//!
//! Design principles:
//! - Capabilities, not paths: the guest holds small integer handles; host
//!   paths stay on the host side of the table
//! - Preopens are the only roots: every path is resolved inside exactly one
//!   preopened directory, `..` and symlinks included
//! - Adversarial input: every guest integer and pointer is checked, and
//!   misbehavior degrades to an errno, never to undefined host access
//! - Per-instance state: no globals, instances share nothing
//!
//! Engine-agnostic: the bytecode engine owns the guest and its memory. It
//! resolves imports with [`resolve_import`] and forwards each call to
//! [`WasiCtx::call`] with a [`GuestMemory`] view. `proc_exit` comes back as
//! [`Trap::Exit`]; the engine aborts the guest and [`WasiCtx::run`] reports
//! the status.
//!
//! ```no_run
//! use wasip1::{LinearMemory, Value, WasiCtxBuilder, WasiFunction};
//!
//! let (builder, stdout) = WasiCtxBuilder::new().arg("hello").capture_stdout();
//! let mut ctx = builder.build()?;
//! let mut memory = LinearMemory::new(1);
//! let status = ctx.run(|ctx| {
//!     ctx.call(WasiFunction::ProcExit, &mut memory, &[Value::I32(0)])?;
//!     Ok(())
//! })?;
//! assert_eq!(status, 0);
//! # let _ = stdout;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod abi;
pub mod clock;
pub mod config;
pub mod ctx;
pub mod errno;
pub mod error;
pub mod exit;
pub mod memory;
pub mod poll;
pub mod syscall;
pub mod table;
pub mod trace;
pub mod vfs;

pub use clock::{CancelToken, Clock, ManualClock, RandomSource, Sleeper};
pub use config::{Captured, WasiConfig, WasiCtxBuilder};
pub use ctx::WasiCtx;
pub use errno::{Errno, WasiResult};
pub use error::{ConfigError, LinkError};
pub use exit::{ExitSignal, Trap};
pub use memory::{GuestMemory, LinearMemory, MemoryExt};
pub use syscall::{ValType, Value, WasiFunction, resolve_import};
pub use table::{CaptureOutput, Fd, TeardownReport};
pub use trace::{TraceSummary, Tracer};
