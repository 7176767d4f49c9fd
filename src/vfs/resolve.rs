//! Sandboxed path resolution
//!
//! Every guest path is resolved against exactly one preopen. The walk keeps
//! a stack of components below the preopen root:
//!
//! - `.` is skipped, `..` pops; popping an empty stack is a sandbox violation
//! - a leading `/` restarts at the preopen root, never the host root
//! - symlinks on intermediate components are always expanded; the final
//!   component is expanded only when following is requested (or the path has
//!   a trailing slash)
//! - an expanded link's target is spliced in front of the remaining
//!   components and walked under the same rules, so a link can never reach
//!   further than the guest could by spelling the path out
//! - absolute link targets are violations; more than [`MAX_SYMLINK_EXPANSIONS`]
//!   expansions is `loop`
//!
//! Finally the deepest existing ancestor is canonicalized and must still lie
//! under the canonical root. Violations are reported as `notcapable`.
//!
//! Components stored in a directory handle were link-free when the handle
//! was opened, but the guest can swap a directory for a symlink afterwards.
//! They are therefore re-checked with [`contained_dir`] whenever they are
//! used again.

use super::Preopen;
use crate::errno::{Errno, WasiResult};
use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Symlink expansions allowed in one resolution
pub const MAX_SYMLINK_EXPANSIONS: usize = 32;

/// Outcome of a successful resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Components below the preopen root
    pub components: Vec<String>,
    /// Host path to operate on
    pub host: PathBuf,
}

impl Resolved {
    /// The final component, `None` for the preopen root itself
    pub fn file_name(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty() && *c != ".")
}

fn host_path(root: &Path, components: &[String]) -> PathBuf {
    let mut host = root.to_path_buf();
    host.extend(components);
    host
}

/// Resolve `path` relative to the directory `base` (components below the
/// preopen root)
pub fn resolve(
    preopen: &Preopen,
    base: &[String],
    path: &str,
    follow_final: bool,
) -> WasiResult<Resolved> {
    if path.is_empty() {
        return Err(Errno::Noent);
    }
    if path.contains('\0') {
        return Err(Errno::Ilseq);
    }

    let follow_final = follow_final || path.ends_with('/');
    let mut stack: Vec<String> = if path.starts_with('/') {
        Vec::new()
    } else {
        contained_dir(preopen, base)?;
        base.to_vec()
    };
    let mut pending: VecDeque<String> = split(path).map(str::to_owned).collect();
    let mut expansions = 0;

    while let Some(component) = pending.pop_front() {
        if component == ".." {
            if stack.pop().is_none() {
                tracing::debug!(path, preopen = %preopen.guest_name, "path escapes preopen");
                return Err(Errno::Notcapable);
            }
            continue;
        }

        let is_final = pending.is_empty();
        if is_final && !follow_final {
            stack.push(component);
            break;
        }

        let candidate = host_path(&preopen.host_root, &stack).join(&component);
        let is_link = match fs::symlink_metadata(&candidate) {
            Ok(meta) => meta.file_type().is_symlink(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => false,
            Err(err) => return Err(Errno::from_io(&err)),
        };
        if !is_link {
            stack.push(component);
            continue;
        }

        expansions += 1;
        if expansions > MAX_SYMLINK_EXPANSIONS {
            return Err(Errno::Loop);
        }
        let target = fs::read_link(&candidate)?;
        let target = target.to_str().ok_or(Errno::Ilseq)?;
        if target.starts_with('/') {
            tracing::debug!(path, link = target, "absolute symlink target rejected");
            return Err(Errno::Notcapable);
        }
        for part in split(target).collect::<Vec<_>>().into_iter().rev() {
            pending.push_front(part.to_owned());
        }
    }

    let host = host_path(&preopen.host_root, &stack);
    check_contained(&preopen.host_root, &stack)?;
    Ok(Resolved {
        components: stack,
        host,
    })
}

/// Canonicalize the deepest existing ancestor of the resolved parent and
/// make sure it did not leave the root
fn check_contained(root: &Path, components: &[String]) -> WasiResult<()> {
    let parent_len = components.len().saturating_sub(1);
    let mut probe = host_path(root, &components[..parent_len]);
    loop {
        match probe.canonicalize() {
            Ok(real) => {
                if real.starts_with(root) {
                    return Ok(());
                }
                tracing::debug!(host = %real.display(), "resolved path left preopen");
                return Err(Errno::Notcapable);
            }
            Err(_) if probe.as_path() != root => {
                if !probe.pop() {
                    return Err(Errno::Notcapable);
                }
            }
            Err(err) => return Err(Errno::from_io(&err)),
        }
    }
}

/// Canonical host path of the directory at `components`, provided it is
/// still inside the preopen
pub fn contained_dir(preopen: &Preopen, components: &[String]) -> WasiResult<PathBuf> {
    let root = &preopen.host_root;
    if components.is_empty() {
        return Ok(root.clone());
    }
    let real = host_path(root, components).canonicalize()?;
    if !real.starts_with(root) {
        tracing::debug!(host = %real.display(), "directory handle left preopen");
        return Err(Errno::Notcapable);
    }
    Ok(real)
}

/// Lexically normalize `path` against `base` without touching the host
///
/// Used where no walk is possible, e.g. validating a symlink target that
/// will be stored rather than followed.
pub fn normalize_lexically(base: &[String], path: &str) -> WasiResult<Vec<String>> {
    if path.contains('\0') {
        return Err(Errno::Ilseq);
    }
    if path.starts_with('/') {
        return Err(Errno::Notcapable);
    }
    let mut stack = base.to_vec();
    for component in split(path) {
        if component == ".." {
            stack.pop().ok_or(Errno::Notcapable)?;
        } else {
            stack.push(component.to_owned());
        }
    }
    Ok(stack)
}
