//! Confinement tests
//!
//! A guest is adversarial: nothing it passes (paths, symlinks, pointers,
//! handle numbers, rights) may reach outside what it was given.

mod common;

use common::{Guest, ROOT, RW, i32v, i64v};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use wasip1::abi::{OFlags, Rights};
use wasip1::{Errno, LinearMemory, MemoryExt, WasiCtxBuilder, WasiFunction};

const FOLLOW: u32 = 1;

/// `outer/secret` next to the preopened `outer/sandbox`
struct Layout {
    _outer: TempDir,
    sandbox: PathBuf,
    secret: PathBuf,
}

fn layout() -> (Layout, Guest) {
    let outer = tempfile::tempdir().unwrap();
    let sandbox = outer.path().join("sandbox");
    let secret = outer.path().join("secret");
    fs::create_dir(&sandbox).unwrap();
    fs::create_dir(sandbox.join("sub")).unwrap();
    fs::write(sandbox.join("sub/inside.txt"), b"inside").unwrap();
    fs::write(&secret, b"top secret").unwrap();

    let ctx = WasiCtxBuilder::new().preopen_dir(&sandbox, "/").build().unwrap();
    (
        Layout {
            _outer: outer,
            sandbox,
            secret,
        },
        Guest::new(ctx),
    )
}

// ============================================================================
// Paths
// ============================================================================

#[test]
fn test_dotdot_cannot_escape() {
    let (_layout, mut guest) = layout();
    for path in ["../secret", "sub/../../secret", "sub/../sub/../../secret", "./../secret"] {
        assert_eq!(guest.open(path, OFlags::empty(), RW), Err(Errno::Notcapable), "{path}");
    }
    assert_eq!(guest.ctx.table().len(), 4);
}

#[test]
fn test_dotdot_inside_is_fine() {
    let (_layout, mut guest) = layout();
    let fd = guest.open("sub/../sub/./inside.txt", OFlags::empty(), RW).unwrap();
    assert_eq!(guest.read(fd, 16).unwrap(), b"inside");
}

#[test]
fn test_absolute_paths_are_rooted_at_the_preopen() {
    let (layout, mut guest) = layout();
    let secret = layout.secret.to_str().unwrap().to_string();
    assert_eq!(guest.open(&secret, OFlags::empty(), RW), Err(Errno::Noent));
    assert_eq!(guest.open("/../secret", OFlags::empty(), RW), Err(Errno::Notcapable));
    let fd = guest.open("/sub/inside.txt", OFlags::empty(), RW).unwrap();
    assert_eq!(guest.read(fd, 16).unwrap(), b"inside");
}

#[test]
fn test_escape_attempts_have_no_side_effects() {
    let (layout, mut guest) = layout();
    assert_eq!(
        guest.open("../created", OFlags::CREAT, RW),
        Err(Errno::Notcapable)
    );
    assert_eq!(
        guest.path_call(WasiFunction::PathCreateDirectory, ROOT, "../newdir"),
        Errno::Notcapable
    );
    assert_eq!(
        guest.path_call(WasiFunction::PathUnlinkFile, ROOT, "../secret"),
        Errno::Notcapable
    );
    let outer = layout.sandbox.parent().unwrap();
    assert!(!outer.join("created").exists());
    assert!(!outer.join("newdir").exists());
    assert_eq!(fs::read(&layout.secret).unwrap(), b"top secret");
}

#[test]
fn test_rename_out_of_the_sandbox_is_refused() {
    let (layout, mut guest) = layout();
    let (old, old_len) = guest.bytes(b"sub/inside.txt");
    let (new, new_len) = guest.bytes(b"../stolen.txt");
    assert_eq!(
        guest.call(
            WasiFunction::PathRename,
            &[i32v(ROOT), i32v(old), i32v(old_len), i32v(ROOT), i32v(new), i32v(new_len)]
        ),
        Errno::Notcapable
    );
    assert!(layout.sandbox.join("sub/inside.txt").exists());
}

#[cfg(unix)]
mod symlinks {
    use super::*;
    use std::os::unix::fs::symlink;

    #[test]
    fn test_link_to_absolute_host_path() {
        let (layout, mut guest) = layout();
        symlink(&layout.secret, layout.sandbox.join("abs")).unwrap();
        assert_eq!(
            guest.open_at(ROOT, FOLLOW, "abs", OFlags::empty(), RW, Rights::empty()),
            Err(Errno::Notcapable)
        );
    }

    #[test]
    fn test_relative_link_that_climbs_out() {
        let (layout, mut guest) = layout();
        symlink("../../secret", layout.sandbox.join("sub/up")).unwrap();
        assert_eq!(
            guest.open_at(ROOT, FOLLOW, "sub/up", OFlags::empty(), RW, Rights::empty()),
            Err(Errno::Notcapable)
        );
    }

    #[test]
    fn test_directory_link_in_the_middle_of_a_path() {
        let (layout, mut guest) = layout();
        symlink(layout.sandbox.parent().unwrap(), layout.sandbox.join("door")).unwrap();
        // Intermediate components are always followed, and always checked
        assert_eq!(guest.open("door/secret", OFlags::empty(), RW), Err(Errno::Notcapable));

        symlink("sub", layout.sandbox.join("alias")).unwrap();
        let fd = guest.open("alias/inside.txt", OFlags::empty(), RW).unwrap();
        assert_eq!(guest.read(fd, 16).unwrap(), b"inside");
    }

    #[test]
    fn test_link_loop() {
        let (layout, mut guest) = layout();
        symlink("b", layout.sandbox.join("a")).unwrap();
        symlink("a", layout.sandbox.join("b")).unwrap();
        assert_eq!(
            guest.open_at(ROOT, FOLLOW, "a", OFlags::empty(), RW, Rights::empty()),
            Err(Errno::Loop)
        );
    }

    #[test]
    fn test_followed_link_inside() {
        let (layout, mut guest) = layout();
        symlink("sub/inside.txt", layout.sandbox.join("shortcut")).unwrap();
        let fd = guest
            .open_at(ROOT, FOLLOW, "shortcut", OFlags::empty(), RW, Rights::empty())
            .unwrap();
        assert_eq!(guest.read(fd, 16).unwrap(), b"inside");
    }

    #[test]
    fn test_guest_made_link_cannot_point_out() {
        let (layout, mut guest) = layout();
        for target in ["../../secret", "/etc/passwd", "../sub/../../../x"] {
            let (t, tlen) = guest.bytes(target.as_bytes());
            let (l, llen) = guest.bytes(b"sub/mine");
            assert_eq!(
                guest.call(
                    WasiFunction::PathSymlink,
                    &[i32v(t), i32v(tlen), i32v(ROOT), i32v(l), i32v(llen)]
                ),
                Errno::Notcapable,
                "{target}"
            );
        }
        assert!(fs::symlink_metadata(layout.sandbox.join("sub/mine")).is_err());

        // Relative to the link's own directory, `..` back to the root is fine
        let (t, tlen) = guest.bytes(b"../sub/inside.txt");
        let (l, llen) = guest.bytes(b"sub/ok");
        assert_eq!(
            guest.call(
                WasiFunction::PathSymlink,
                &[i32v(t), i32v(tlen), i32v(ROOT), i32v(l), i32v(llen)]
            ),
            Errno::Success
        );
    }

    fn guest_symlink(guest: &mut Guest, target: &str, link: &str) -> Errno {
        let (t, tlen) = guest.bytes(target.as_bytes());
        let (l, llen) = guest.bytes(link.as_bytes());
        guest.call(
            WasiFunction::PathSymlink,
            &[i32v(t), i32v(tlen), i32v(ROOT), i32v(l), i32v(llen)],
        )
    }

    #[test]
    fn test_link_target_checked_through_existing_links() {
        let (layout, mut guest) = layout();
        for dir in ["d1", "d1/d2"] {
            assert_eq!(
                guest.path_call(WasiFunction::PathCreateDirectory, ROOT, dir),
                Errno::Success
            );
        }
        // Points back at the root, which is fine on its own
        assert_eq!(guest_symlink(&mut guest, "../..", "d1/d2/s2"), Errno::Success);
        // Lexically inside, but one level above the root once `s2` is expanded
        assert_eq!(guest_symlink(&mut guest, "d1/d2/s2/..", "a"), Errno::Notcapable);
        assert!(fs::symlink_metadata(layout.sandbox.join("a")).is_err());
    }

    #[test]
    fn test_directory_handle_swapped_for_link_after_open() {
        let (layout, mut guest) = layout();
        assert_eq!(guest.path_call(WasiFunction::PathCreateDirectory, ROOT, "a"), Errno::Success);
        let rights = Rights::FD_READDIR
            | Rights::FD_FILESTAT_GET
            | Rights::FD_FILESTAT_SET_TIMES
            | Rights::FD_SYNC
            | Rights::PATH_OPEN;
        let fd = guest
            .open_at(ROOT, 0, "a", OFlags::DIRECTORY, rights, rights)
            .unwrap();

        assert_eq!(guest.path_call(WasiFunction::PathRemoveDirectory, ROOT, "a"), Errno::Success);
        symlink("..", layout.sandbox.join("a")).unwrap();

        let buf = guest.alloc(256);
        let out = guest.alloc(64);
        assert_eq!(
            guest.call(
                WasiFunction::FdReaddir,
                &[i32v(fd), i32v(buf), i32v(256), i64v(0), i32v(out)]
            ),
            Errno::Notcapable
        );
        assert_eq!(
            guest.call(WasiFunction::FdFilestatGet, &[i32v(fd), i32v(out)]),
            Errno::Notcapable
        );
        assert_eq!(
            guest.call(
                WasiFunction::FdFilestatSetTimes,
                &[i32v(fd), i64v(0), i64v(0), i32v(0b0101)]
            ),
            Errno::Notcapable
        );
        assert_eq!(guest.call(WasiFunction::FdSync, &[i32v(fd)]), Errno::Notcapable);
        assert_eq!(
            guest.open_at(fd, 0, "secret", OFlags::empty(), RW, Rights::empty()),
            Err(Errno::Notcapable)
        );
        assert_eq!(fs::read(&layout.secret).unwrap(), b"top secret");

        // Put back as a real directory, the handle works again
        fs::remove_file(layout.sandbox.join("a")).unwrap();
        fs::create_dir(layout.sandbox.join("a")).unwrap();
        assert_eq!(guest.call(WasiFunction::FdFilestatGet, &[i32v(fd), i32v(out)]), Errno::Success);
    }
}

// ============================================================================
// Rights
// ============================================================================

#[test]
fn test_rights_only_shrink_down_the_tree() {
    let (_layout, mut guest) = layout();
    let read_only = Rights::FD_READ | Rights::FD_SEEK;
    let sub = guest
        .open_at(ROOT, 0, "sub", OFlags::DIRECTORY, Rights::DIRECTORY_BASE, read_only)
        .unwrap();

    // Asking for more than the directory hands down silently gets less
    let fd = guest
        .open_at(sub, 0, "inside.txt", OFlags::empty(), RW, Rights::empty())
        .unwrap();
    assert_eq!(guest.write(fd, b"x"), Err(Errno::Notcapable));
    assert_eq!(guest.read(fd, 16).unwrap(), b"inside");

    let stat = guest.alloc(24);
    guest.call(WasiFunction::FdFdstatGet, &[i32v(fd), i32v(stat)]);
    let base = Rights::from_bits_truncate(guest.mem.read_u64(stat + 8).unwrap());
    assert_eq!(base, read_only);
}

#[test]
fn test_missing_right_means_no_host_effect() {
    let (layout, mut guest) = layout();
    let fd = guest.open("sub/inside.txt", OFlags::empty(), Rights::FD_READ).unwrap();
    assert_eq!(guest.write(fd, b"overwrite"), Err(Errno::Notcapable));
    assert_eq!(
        guest.call(WasiFunction::FdFilestatSetSize, &[i32v(fd), i64v(0)]),
        Errno::Notcapable
    );
    assert_eq!(fs::read(layout.sandbox.join("sub/inside.txt")).unwrap(), b"inside");
}

#[test]
fn test_forged_handles() {
    let (_layout, mut guest) = layout();
    for fd in [4, 100, 1 << 20, u32::MAX] {
        assert_eq!(guest.write(fd, b"x"), Err(Errno::Badf));
        assert_eq!(guest.close(fd), Errno::Badf);
    }
    // A file handle is not a directory handle
    let file = guest.open("sub/inside.txt", OFlags::empty(), RW).unwrap();
    assert_eq!(
        guest.open_at(file, 0, "x", OFlags::empty(), RW, Rights::empty()),
        Err(Errno::Notcapable)
    );
}

// ============================================================================
// Guest memory
// ============================================================================

#[test]
fn test_path_past_end_of_memory() {
    let (layout, mut guest) = layout();
    let end = LinearMemory::PAGE_SIZE as u32;
    assert_eq!(
        guest.call(
            WasiFunction::PathCreateDirectory,
            &[i32v(ROOT), i32v(end - 2), i32v(8)]
        ),
        Errno::Fault
    );
    assert_eq!(
        guest.call(
            WasiFunction::PathCreateDirectory,
            &[i32v(ROOT), i32v(u32::MAX), i32v(2)]
        ),
        Errno::Fault
    );
    assert_eq!(fs::read_dir(&layout.sandbox).unwrap().count(), 1);
}

#[test]
fn test_bad_result_pointer_reported_before_path_lookup() {
    let (_layout, mut guest) = layout();
    let bad = 0xFFFF_FFF0;
    for path in ["../secret", "missing"] {
        let (p, len) = guest.bytes(path.as_bytes());
        assert_eq!(
            guest.call(
                WasiFunction::PathFilestatGet,
                &[i32v(ROOT), i32v(FOLLOW), i32v(p), i32v(len), i32v(bad)]
            ),
            Errno::Fault,
            "{path}"
        );
        let out = guest.alloc(4);
        assert_eq!(
            guest.call(
                WasiFunction::PathReadlink,
                &[i32v(ROOT), i32v(p), i32v(len), i32v(bad), i32v(16), i32v(out)]
            ),
            Errno::Fault,
            "{path}"
        );
        assert_eq!(
            guest.call(
                WasiFunction::PathOpen,
                &[
                    i32v(ROOT),
                    i32v(0),
                    i32v(p),
                    i32v(len),
                    i32v(0),
                    i64v(RW.bits()),
                    i64v(0),
                    i32v(0),
                    i32v(bad),
                ]
            ),
            Errno::Fault,
            "{path}"
        );
    }
}

#[test]
fn test_non_utf8_path() {
    let (_layout, mut guest) = layout();
    let (p, len) = guest.bytes(&[0x66, 0xff, 0x6f]);
    assert_eq!(
        guest.call(WasiFunction::PathCreateDirectory, &[i32v(ROOT), i32v(p), i32v(len)]),
        Errno::Ilseq
    );
}

#[test]
fn test_read_into_bad_iovec_leaves_file_cursor() {
    let (_layout, mut guest) = layout();
    let fd = guest.open("sub/inside.txt", OFlags::empty(), RW).unwrap();
    let end = LinearMemory::PAGE_SIZE as u32;
    let good = guest.alloc(3);
    let iovs = guest.alloc(16);
    guest.mem.write_u32(iovs, good).unwrap();
    guest.mem.write_u32(iovs + 4, 3).unwrap();
    guest.mem.write_u32(iovs + 8, end - 1).unwrap();
    guest.mem.write_u32(iovs + 12, 4).unwrap();
    let out = guest.alloc(4);
    assert_eq!(
        guest.call(WasiFunction::FdRead, &[i32v(fd), i32v(iovs), i32v(2), i32v(out)]),
        Errno::Fault
    );
    // Nothing was consumed
    assert_eq!(guest.read(fd, 16).unwrap(), b"inside");
}

#[test]
fn test_misaligned_result_pointer() {
    let (_layout, mut guest) = layout();
    let out = guest.alloc(16) + 1;
    assert_eq!(
        guest.call(WasiFunction::FdFdstatGet, &[i32v(ROOT), i32v(out)]),
        Errno::Inval
    );
    assert_eq!(
        guest.call(WasiFunction::ClockTimeGet, &[i32v(0), i64v(0), i32v(out)]),
        Errno::Inval
    );
}

#[test]
fn test_bounds_follow_memory_growth() {
    let (_layout, mut guest) = layout();
    let page = LinearMemory::PAGE_SIZE as u32;
    let out = page + 8;
    assert_eq!(
        guest.call(WasiFunction::ClockTimeGet, &[i32v(0), i64v(0), i32v(out)]),
        Errno::Fault
    );
    assert_eq!(guest.mem.grow(1), Some(1));
    assert_eq!(
        guest.call(WasiFunction::ClockTimeGet, &[i32v(0), i64v(0), i32v(out)]),
        Errno::Success
    );
    assert!(guest.mem.read_u64(out).unwrap() > 0);
}
