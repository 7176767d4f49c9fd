//! Instance configuration
//!
//! Two ways to describe an instance:
//! - [`WasiCtxBuilder`]: fluent builder for embedders wiring things up in
//!   code (custom streams, clocks, random sources)
//! - [`WasiConfig`]: a serde manifest, typically JSON, for the common case
//!   of args, env, preopens and stdio destinations
//!
//! Everything is validated in `build()`: strings that cannot cross the ABI
//! (NUL bytes, `=` in env keys), preopens that are not directories, a handle
//! limit with no room for stdio and preopens. A built instance starts with
//! stdio on handles 0, 1, 2 and preopens from 3 on, in the order given.

use crate::abi::Rights;
use crate::clock::{
    CancelToken, Clock, ManualClock, OsRandom, RandomSource, SeededRandom, Sleeper, SystemClock,
    ThreadSleeper,
};
use crate::ctx::WasiCtx;
use crate::error::ConfigError;
use crate::table::{
    CaptureOutput, DEFAULT_MAX_HANDLES, DirHandle, Entry, HostStderr, HostStdin, HostStdout,
    InputStream, MemoryInput, NullInput, NullOutput, OpenResource, OutputStream, ResourceTable,
    Stream,
};
use crate::trace::Tracer;
use crate::vfs::Preopen;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Builder for a [`WasiCtx`]
pub struct WasiCtxBuilder {
    args: Vec<String>,
    env: Vec<(String, String)>,
    preopens: Vec<(PathBuf, String)>,
    stdin: Box<dyn InputStream>,
    stdout: Box<dyn OutputStream>,
    stderr: Box<dyn OutputStream>,
    max_handles: usize,
    trace: bool,
    clock: Option<Box<dyn Clock>>,
    sleeper: Option<Box<dyn Sleeper>>,
    random: Option<Box<dyn RandomSource>>,
    random_seed: Option<u64>,
    cancel: CancelToken,
}

impl WasiCtxBuilder {
    /// No args, no env, no preopens; stdin reads as empty and output is
    /// discarded
    pub fn new() -> Self {
        Self {
            args: Vec::new(),
            env: Vec::new(),
            preopens: Vec::new(),
            stdin: Box::new(NullInput),
            stdout: Box::new(NullOutput),
            stderr: Box::new(NullOutput),
            max_handles: DEFAULT_MAX_HANDLES,
            trace: false,
            clock: None,
            sleeper: None,
            random: None,
            random_seed: None,
            cancel: CancelToken::new(),
        }
    }

    /// Append one argument (the first is conventionally the program name)
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append an environment variable; order is preserved
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Expose a host directory to the guest under `guest_name`
    pub fn preopen_dir(mut self, host: impl AsRef<Path>, guest_name: impl Into<String>) -> Self {
        self.preopens.push((host.as_ref().to_path_buf(), guest_name.into()));
        self
    }

    pub fn stdin(mut self, input: impl InputStream + 'static) -> Self {
        self.stdin = Box::new(input);
        self
    }

    /// Fixed stdin contents
    pub fn stdin_bytes(self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin(MemoryInput::new(data))
    }

    pub fn stdout(mut self, output: impl OutputStream + 'static) -> Self {
        self.stdout = Box::new(output);
        self
    }

    pub fn stderr(mut self, output: impl OutputStream + 'static) -> Self {
        self.stderr = Box::new(output);
        self
    }

    /// Connect all three stdio handles to the host process
    pub fn inherit_stdio(self) -> Self {
        self.stdin(HostStdin).stdout(HostStdout).stderr(HostStderr)
    }

    /// Capture stdout; returns the buffer to read it back from
    pub fn capture_stdout(self) -> (Self, CaptureOutput) {
        let capture = CaptureOutput::new();
        (self.stdout(capture.clone()), capture)
    }

    pub fn capture_stderr(self) -> (Self, CaptureOutput) {
        let capture = CaptureOutput::new();
        (self.stderr(capture.clone()), capture)
    }

    /// Limit on simultaneously open handles, stdio and preopens included
    pub fn max_handles(mut self, max: usize) -> Self {
        self.max_handles = max;
        self
    }

    /// Enable the call tracer
    pub fn trace(mut self, enabled: bool) -> Self {
        self.trace = enabled;
        self
    }

    /// Deterministic `random_get` output
    pub fn random_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Box::new(clock));
        self
    }

    pub fn sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Some(Box::new(sleeper));
        self
    }

    pub fn random(mut self, random: impl RandomSource + 'static) -> Self {
        self.random = Some(Box::new(random));
        self
    }

    /// Use one manual clock as both clock and sleeper, so waits only move
    /// its time forward
    pub fn manual_clock(self, clock: &ManualClock) -> Self {
        self.clock(clock.clone()).sleeper(clock.clone())
    }

    /// Share a cancellation token created by the embedder
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Validate and build the instance
    pub fn build(self) -> Result<WasiCtx, ConfigError> {
        for arg in &self.args {
            no_nul("argument", arg)?;
        }
        for (key, value) in &self.env {
            if key.is_empty() || key.contains('=') {
                return Err(ConfigError::EnvKey(key.clone()));
            }
            no_nul("environment variable", key)?;
            no_nul("environment variable", value)?;
        }
        for (_, name) in &self.preopens {
            no_nul("preopen name", name)?;
        }
        if self.max_handles < 3 + self.preopens.len() {
            return Err(ConfigError::HandleLimit(self.max_handles));
        }

        let mut table = ResourceTable::new(self.max_handles);
        let limit = |_| ConfigError::HandleLimit(self.max_handles);
        let stdio = [
            (Stream::Input(self.stdin), Rights::STDIN),
            (Stream::Output(self.stdout), Rights::STDOUT),
            (Stream::Output(self.stderr), Rights::STDOUT),
        ];
        for (stream, rights) in stdio {
            table
                .insert(Entry::new(OpenResource::Stdio(stream), rights, Rights::empty()))
                .map_err(limit)?;
        }

        for (host, name) in &self.preopens {
            let fd = table.len() as u32;
            let preopen = Arc::new(Preopen::new(fd, host, name.clone())?);
            let mut entry = Entry::new(
                OpenResource::Directory(DirHandle::new(preopen.clone(), Vec::new())),
                Rights::DIRECTORY_BASE,
                Rights::DIRECTORY_INHERITING,
            );
            entry.preopen = Some(preopen.clone());
            table.insert(entry).map_err(limit)?;
            tracing::debug!(
                fd,
                guest = %preopen.guest_name,
                host = %preopen.host_root.display(),
                "preopened directory"
            );
        }

        let random: Box<dyn RandomSource> = match (self.random, self.random_seed) {
            (Some(random), _) => random,
            (None, Some(seed)) => Box::new(SeededRandom::new(seed)),
            (None, None) => Box::new(OsRandom),
        };
        let mut tracer = Tracer::new();
        if self.trace {
            tracer.enable();
        }
        let env = self.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

        Ok(WasiCtx::new(
            table,
            self.args,
            env,
            self.clock.unwrap_or_else(|| Box::new(SystemClock::new())),
            self.sleeper.unwrap_or_else(|| Box::new(ThreadSleeper)),
            random,
            self.cancel,
            tracer,
        ))
    }
}

impl Default for WasiCtxBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn no_nul(what: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.contains('\0') {
        return Err(ConfigError::NulByte {
            what,
            value: value.to_string(),
        });
    }
    Ok(())
}

// ============================================================================
// Manifest
// ============================================================================

/// Where the guest's stdin comes from
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSpec {
    Inherit,
    #[default]
    Null,
    /// Fixed contents
    Bytes(String),
}

/// Where a guest output stream goes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSpec {
    Inherit,
    #[default]
    Null,
    Capture,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreopenSpec {
    pub host: PathBuf,
    pub guest: String,
}

fn default_max_handles() -> usize {
    DEFAULT_MAX_HANDLES
}

/// Serializable description of an instance
///
/// ```json
/// {
///   "args": ["prog", "--verbose"],
///   "env": [["HOME", "/"]],
///   "preopens": [{ "host": "/srv/data", "guest": "/data" }],
///   "stdin": { "bytes": "input" },
///   "stdout": "capture"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WasiConfig {
    #[serde(default)]
    pub args: Vec<String>,
    /// Ordered `[key, value]` pairs
    #[serde(default)]
    pub env: Vec<(String, String)>,
    #[serde(default)]
    pub preopens: Vec<PreopenSpec>,
    #[serde(default)]
    pub stdin: InputSpec,
    #[serde(default)]
    pub stdout: OutputSpec,
    #[serde(default)]
    pub stderr: OutputSpec,
    #[serde(default = "default_max_handles")]
    pub max_handles: usize,
    #[serde(default)]
    pub trace: bool,
    #[serde(default)]
    pub random_seed: Option<u64>,
}

impl Default for WasiConfig {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            env: Vec::new(),
            preopens: Vec::new(),
            stdin: InputSpec::default(),
            stdout: OutputSpec::default(),
            stderr: OutputSpec::default(),
            max_handles: DEFAULT_MAX_HANDLES,
            trace: false,
            random_seed: None,
        }
    }
}

/// Buffers for streams a manifest asked to capture
#[derive(Debug, Clone, Default)]
pub struct Captured {
    pub stdout: Option<CaptureOutput>,
    pub stderr: Option<CaptureOutput>,
}

impl WasiConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::ManifestIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Turn the manifest into a builder, for further customization
    pub fn into_builder(self) -> (WasiCtxBuilder, Captured) {
        let mut captured = Captured::default();
        let mut builder = WasiCtxBuilder::new()
            .args(self.args)
            .max_handles(self.max_handles)
            .trace(self.trace);
        for (key, value) in self.env {
            builder = builder.env(key, value);
        }
        for preopen in self.preopens {
            builder = builder.preopen_dir(preopen.host, preopen.guest);
        }
        if let Some(seed) = self.random_seed {
            builder = builder.random_seed(seed);
        }

        builder = match self.stdin {
            InputSpec::Inherit => builder.stdin(HostStdin),
            InputSpec::Null => builder.stdin(NullInput),
            InputSpec::Bytes(data) => builder.stdin_bytes(data.into_bytes()),
        };
        builder = match self.stdout {
            OutputSpec::Inherit => builder.stdout(HostStdout),
            OutputSpec::Null => builder.stdout(NullOutput),
            OutputSpec::Capture => {
                let (b, capture) = builder.capture_stdout();
                captured.stdout = Some(capture);
                b
            }
        };
        builder = match self.stderr {
            OutputSpec::Inherit => builder.stderr(HostStderr),
            OutputSpec::Null => builder.stderr(NullOutput),
            OutputSpec::Capture => {
                let (b, capture) = builder.capture_stderr();
                captured.stderr = Some(capture);
                b
            }
        };
        (builder, captured)
    }

    /// Build an instance straight from the manifest
    pub fn build(self) -> Result<(WasiCtx, Captured), ConfigError> {
        let (builder, captured) = self.into_builder();
        Ok((builder.build()?, captured))
    }
}
