//! Integration tests for the preview1 host
//!
//! End-to-end flows through the public API: build an instance, link
//! imports, run guest-shaped call sequences and inspect the host afterwards.

mod common;

use common::{Guest, ROOT, RW, i32v, i64v};
use std::fs;
use std::thread;
use std::time::{Duration, Instant};
use wasip1::abi::{
    Event, EventType, OFlags, Rights, SubclockFlags, Subscription, SubscriptionClock,
    SubscriptionKind,
};
use wasip1::table::pipe;
use wasip1::{
    CancelToken, Errno, LinearMemory, ManualClock, MemoryExt, Trap, ValType, WasiConfig,
    WasiCtxBuilder, WasiFunction, resolve_import,
};

// ============================================================================
// Whole programs
// ============================================================================

/// `cat <file>`: read argv, open the named file under the first preopen,
/// copy it to stdout, exit 0
fn cat(ctx: &mut wasip1::WasiCtx, mem: &mut LinearMemory) -> Result<(), Trap> {
    let (argc_ptr, size_ptr) = (16u32, 20u32);
    ctx.call(WasiFunction::ArgsSizesGet, mem, &[i32v(argc_ptr), i32v(size_ptr)])?;
    let argc = mem.read_u32(argc_ptr).unwrap();
    let (argv, argbuf) = (64u32, 256u32);
    ctx.call(WasiFunction::ArgsGet, mem, &[i32v(argv), i32v(argbuf)])?;

    let name_ptr = mem.read_u32(argv + 4 * (argc - 1)).unwrap();
    let name_len = mem
        .view(name_ptr, 64)
        .unwrap()
        .iter()
        .position(|&b| b == 0)
        .unwrap() as u32;

    let fd_out = 24u32;
    let errno = ctx.call(
        WasiFunction::PathOpen,
        mem,
        &[
            i32v(ROOT),
            i32v(1),
            i32v(name_ptr),
            i32v(name_len),
            i32v(0),
            i64v(Rights::FD_READ.bits()),
            i64v(0),
            i32v(0),
            i32v(fd_out),
        ],
    )?;
    if errno != 0 {
        ctx.call(WasiFunction::ProcExit, mem, &[i32v(1)])?;
    }
    let fd = mem.read_u32(fd_out).unwrap();

    let (buf, iov, n_ptr) = (4096u32, 32u32, 40u32);
    mem.write_u32(iov, buf).unwrap();
    loop {
        mem.write_u32(iov + 4, 7).unwrap();
        ctx.call(WasiFunction::FdRead, mem, &[i32v(fd), i32v(iov), i32v(1), i32v(n_ptr)])?;
        let n = mem.read_u32(n_ptr).unwrap();
        if n == 0 {
            break;
        }
        mem.write_u32(iov + 4, n).unwrap();
        ctx.call(WasiFunction::FdWrite, mem, &[i32v(1), i32v(iov), i32v(1), i32v(n_ptr)])?;
    }
    ctx.call(WasiFunction::FdClose, mem, &[i32v(fd)])?;
    ctx.call(WasiFunction::ProcExit, mem, &[i32v(0)])?;
    unreachable!("proc_exit returned to the guest");
}

#[test]
fn test_cat_program() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("docs")).unwrap();
    fs::write(dir.path().join("docs/readme.txt"), "a file longer than one read\n").unwrap();

    let (builder, stdout) = WasiCtxBuilder::new()
        .args(["cat", "docs/readme.txt"])
        .preopen_dir(dir.path(), "/")
        .capture_stdout();
    let mut ctx = builder.build().unwrap();
    let mut mem = LinearMemory::new(1);

    let status = ctx.run(|ctx| cat(ctx, &mut mem)).unwrap();
    assert_eq!(status, 0);
    assert_eq!(stdout.contents_lossy(), "a file longer than one read\n");
    // Only stdio and the preopen remain
    assert_eq!(ctx.table().len(), 4);
}

#[test]
fn test_cat_missing_file_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = WasiCtxBuilder::new()
        .args(["cat", "nope"])
        .preopen_dir(dir.path(), "/")
        .build()
        .unwrap();
    let mut mem = LinearMemory::new(1);
    assert_eq!(ctx.run(|ctx| cat(ctx, &mut mem)), Ok(1));
    assert_eq!(ctx.exit_status().map(|s| s.code), Some(1));
}

#[test]
fn test_entry_returning_normally_is_status_zero() {
    let mut ctx = WasiCtxBuilder::new().build().unwrap();
    let mut mem = LinearMemory::new(1);
    let status = ctx.run(|ctx| {
        ctx.call(WasiFunction::SchedYield, &mut mem, &[])?;
        Ok(())
    });
    assert_eq!(status, Ok(0));
}

#[test]
fn test_manifest_instance() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("greeting"), "hi").unwrap();
    let manifest = serde_json::json!({
        "args": ["echo"],
        "env": [["NAME", "world"]],
        "preopens": [{ "host": dir.path(), "guest": "/data" }],
        "stdin": { "bytes": "from stdin" },
        "stdout": "capture",
        "stderr": "capture",
        "random_seed": 7
    });
    let path = dir.path().join("instance.json");
    fs::write(&path, manifest.to_string()).unwrap();

    let (ctx, captured) = WasiConfig::from_file(&path).unwrap().build().unwrap();
    assert_eq!(ctx.env(), ["NAME=world"]);
    let mut guest = Guest::new(ctx);

    let input = guest.read(0, 64).unwrap();
    guest.write(1, &input).unwrap();
    guest.write(2, b"done").unwrap();
    let fd = guest.open("greeting", OFlags::empty(), RW).unwrap();
    assert_eq!(guest.read(fd, 16).unwrap(), b"hi");

    assert_eq!(captured.stdout.unwrap().contents(), b"from stdin");
    assert_eq!(captured.stderr.unwrap().contents(), b"done");
}

// ============================================================================
// Linking
// ============================================================================

#[test]
fn test_link_every_import_of_a_typical_module() {
    use ValType::*;
    let imports: &[(&str, &[ValType])] = &[
        ("fd_write", &[I32, I32, I32, I32]),
        ("fd_seek", &[I32, I64, I32, I32]),
        ("path_open", &[I32, I32, I32, I32, I32, I64, I64, I32, I32]),
        ("poll_oneoff", &[I32, I32, I32, I32]),
        ("clock_time_get", &[I32, I64, I32]),
        ("environ_get", &[I32, I32]),
    ];
    for (name, params) in imports {
        let func = resolve_import("wasi_snapshot_preview1", name, params, &[I32]).unwrap();
        assert_eq!(func.name(), *name);
    }
    // proc_exit has no result
    assert!(resolve_import("wasi_snapshot_preview1", "proc_exit", &[I32], &[]).is_ok());
    assert!(resolve_import("wasi_snapshot_preview1", "proc_exit", &[I32], &[I32]).is_err());
    assert!(resolve_import("wasi_unstable", "fd_write", &[I32, I32, I32, I32], &[I32]).is_err());
}

// ============================================================================
// Preopen discovery
// ============================================================================

#[test]
fn test_preopens_discovered_in_order() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    let ctx = WasiCtxBuilder::new()
        .preopen_dir(a.path(), "/a")
        .preopen_dir(b.path(), "/data/b")
        .build()
        .unwrap();
    let mut guest = Guest::new(ctx);

    let mut names = Vec::new();
    let stat = guest.alloc(8);
    for fd in 3.. {
        match guest.call(WasiFunction::FdPrestatGet, &[i32v(fd), i32v(stat)]) {
            Errno::Success => {}
            Errno::Badf => break,
            other => panic!("unexpected errno {other}"),
        }
        let len = guest.mem.read_u32(stat + 4).unwrap();
        let buf = guest.alloc(len);
        assert_eq!(
            guest.call(WasiFunction::FdPrestatDirName, &[i32v(fd), i32v(buf), i32v(len)]),
            Errno::Success
        );
        names.push(String::from_utf8(guest.mem.view(buf, len).unwrap().to_vec()).unwrap());
    }
    assert_eq!(names, ["/a", "/data/b"]);
}

// ============================================================================
// Files
// ============================================================================

#[test]
fn test_file_roundtrip_through_guest() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = WasiCtxBuilder::new().preopen_dir(dir.path(), ".").build().unwrap();
    let mut guest = Guest::new(ctx);

    assert_eq!(guest.path_call(WasiFunction::PathCreateDirectory, ROOT, "out"), Errno::Success);
    let fd = guest.open("out/result.txt", OFlags::CREAT | OFlags::TRUNC, RW).unwrap();
    assert_eq!(guest.write(fd, b"line 1\n"), Ok(7));
    assert_eq!(guest.write(fd, b"line 2\n"), Ok(7));
    assert_eq!(guest.close(fd), Errno::Success);

    assert_eq!(
        fs::read_to_string(dir.path().join("out/result.txt")).unwrap(),
        "line 1\nline 2\n"
    );

    let fd = guest.open("out/result.txt", OFlags::empty(), RW).unwrap();
    assert_eq!(guest.read(fd, 100).unwrap(), b"line 1\nline 2\n");
}

#[test]
fn test_handle_numbers_are_reused_after_close() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = WasiCtxBuilder::new().preopen_dir(dir.path(), ".").build().unwrap();
    let mut guest = Guest::new(ctx);

    let a = guest.open("a", OFlags::CREAT, RW).unwrap();
    let b = guest.open("b", OFlags::CREAT, RW).unwrap();
    assert_eq!((a, b), (4, 5));
    guest.close(a);
    assert_eq!(guest.open("c", OFlags::CREAT, RW), Ok(4));
    assert_eq!(guest.write(a, b"to c"), Ok(4));
    assert_eq!(fs::read(dir.path().join("c")).unwrap(), b"to c");
    assert!(fs::read(dir.path().join("a")).unwrap().is_empty());
}

#[test]
fn test_handle_limit() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = WasiCtxBuilder::new()
        .preopen_dir(dir.path(), ".")
        .max_handles(6)
        .build()
        .unwrap();
    let mut guest = Guest::new(ctx);

    guest.open("1", OFlags::CREAT, RW).unwrap();
    let second = guest.open("2", OFlags::CREAT, RW).unwrap();
    assert_eq!(guest.open("3", OFlags::CREAT, RW), Err(Errno::Mfile));
    assert!(!dir.path().join("3").exists());

    guest.close(second);
    assert!(guest.open("3", OFlags::CREAT, RW).is_ok());
}

#[test]
fn test_subdirectory_handle_listing() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("logs")).unwrap();
    for i in 0..20 {
        fs::write(dir.path().join(format!("logs/{i:02}.log")), b"").unwrap();
    }
    let ctx = WasiCtxBuilder::new().preopen_dir(dir.path(), ".").build().unwrap();
    let mut guest = Guest::new(ctx);
    let logs = guest
        .open_at(ROOT, 0, "logs", OFlags::DIRECTORY, Rights::all(), Rights::all())
        .unwrap();

    // Read the listing in small chunks the way a libc readdir loop does
    let mut names = Vec::new();
    let mut cookie = 0u64;
    let (buf, used) = (guest.alloc(64), guest.alloc(4));
    loop {
        assert_eq!(
            guest.call(
                WasiFunction::FdReaddir,
                &[i32v(logs), i32v(buf), i32v(64), i64v(cookie), i32v(used)]
            ),
            Errno::Success
        );
        let used = guest.mem.read_u32(used).unwrap();
        let mut at = 0;
        while at + 24 <= used {
            let next = guest.mem.read_u64(buf + at).unwrap();
            let namlen = guest.mem.read_u32(buf + at + 16).unwrap();
            if at + 24 + namlen > used {
                break;
            }
            let name = guest.mem.view(buf + at + 24, namlen).unwrap();
            names.push(String::from_utf8(name.to_vec()).unwrap());
            cookie = next;
            at += 24 + namlen;
        }
        if used < 64 {
            break;
        }
    }
    assert_eq!(names.len(), 22);
    assert_eq!(names[..3], [".", "..", "00.log"]);
    assert_eq!(names[21], "19.log");
}

// ============================================================================
// Waiting
// ============================================================================

fn clock_sub(userdata: u64, timeout_ns: u64) -> Subscription {
    Subscription {
        userdata,
        kind: SubscriptionKind::Clock(SubscriptionClock {
            id: 1,
            timeout: timeout_ns,
            precision: 0,
            flags: SubclockFlags::empty(),
        }),
    }
}

fn poll(guest: &mut Guest, subs: &[Subscription]) -> Result<Vec<Event>, Errno> {
    let n = subs.len() as u32;
    let in_ptr = guest.alloc(48 * n);
    for (i, sub) in subs.iter().enumerate() {
        guest
            .mem
            .write_record(in_ptr + 48 * i as u32, &sub.to_bytes(), Subscription::ALIGN)
            .unwrap();
    }
    let out_ptr = guest.alloc(32 * n);
    let nevents = guest.alloc(4);
    match guest.call(
        WasiFunction::PollOneoff,
        &[i32v(in_ptr), i32v(out_ptr), i32v(n), i32v(nevents)],
    ) {
        Errno::Success => {}
        e => return Err(e),
    }
    let count = guest.mem.read_u32(nevents).unwrap();
    Ok((0..count)
        .map(|i| {
            let raw = guest.mem.read_array::<32>(out_ptr + 32 * i, 8).unwrap();
            Event::from_bytes(&raw).unwrap()
        })
        .collect())
}

#[test]
fn test_poll_stdin_pipe_then_timeout() {
    let clock = ManualClock::new(0);
    let (reader, mut writer) = pipe(64);
    let ctx = WasiCtxBuilder::new()
        .stdin(reader)
        .manual_clock(&clock)
        .build()
        .unwrap();
    let mut guest = Guest::new(ctx);
    let subs = [
        Subscription {
            userdata: 1,
            kind: SubscriptionKind::FdRead(0),
        },
        clock_sub(2, 50_000_000),
    ];

    // Nothing buffered: the timer wins after the fd slices run out
    let events = poll(&mut guest, &subs).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!((events[0].userdata, events[0].kind), (2, EventType::Clock));
    assert_eq!(clock.now_ns(), 50_000_000);

    use wasip1::table::OutputStream;
    writer.write(b"ready").unwrap();
    let events = poll(&mut guest, &subs).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].userdata, 1);
    assert_eq!(events[0].nbytes, 5);
    assert_eq!(guest.read(0, 16).unwrap(), b"ready");

    // Writer gone: reading side sees hang-up
    drop(writer);
    let events = poll(&mut guest, &subs).unwrap();
    assert_eq!(events[0].userdata, 1);
    assert!(events[0].flags.contains(wasip1::abi::EventRwFlags::HANGUP));
}

#[test]
fn test_poll_sleeps_on_real_clock() {
    let ctx = WasiCtxBuilder::new().build().unwrap();
    let mut guest = Guest::new(ctx);
    let started = Instant::now();
    let events = poll(&mut guest, &[clock_sub(9, 20_000_000)]).unwrap();
    assert!(started.elapsed() >= Duration::from_millis(20));
    assert_eq!(events[0].userdata, 9);
    assert_eq!(events[0].error, Errno::Success);
}

#[test]
fn test_cancel_interrupts_a_long_poll() {
    let cancel = CancelToken::new();
    let ctx = WasiCtxBuilder::new().cancel_token(cancel.clone()).build().unwrap();
    let mut guest = Guest::new(ctx);

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        cancel.cancel();
    });
    let started = Instant::now();
    assert_eq!(poll(&mut guest, &[clock_sub(1, 60_000_000_000)]), Err(Errno::Intr));
    assert!(started.elapsed() < Duration::from_secs(30));
    canceller.join().unwrap();
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_teardown_closes_everything_once() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = WasiCtxBuilder::new().preopen_dir(dir.path(), ".").build().unwrap();
    let mut guest = Guest::new(ctx);
    guest.open("x", OFlags::CREAT, RW).unwrap();
    guest.open("y", OFlags::CREAT, RW).unwrap();

    let report = guest.ctx.teardown();
    assert!(report.is_clean());
    assert_eq!(report.closed, 6);
    assert!(guest.ctx.table().is_empty());
    assert_eq!(guest.close(1), Errno::Badf);
}

#[test]
fn test_instances_are_independent() {
    let (b1, out1) = WasiCtxBuilder::new().args(["one"]).capture_stdout();
    let (b2, out2) = WasiCtxBuilder::new().args(["two", "2"]).capture_stdout();
    let mut one = Guest::new(b1.build().unwrap());
    let mut two = Guest::new(b2.build().unwrap());

    one.write(1, b"1").unwrap();
    assert_eq!(one.close(1), Errno::Success);
    two.write(1, b"2").unwrap();
    assert_eq!(one.write(1, b"x"), Err(Errno::Badf));

    assert_eq!(out1.contents(), b"1");
    assert_eq!(out2.contents(), b"2");
    assert_eq!(two.ctx.args(), ["two", "2"]);

    let exit = one.try_call(WasiFunction::ProcExit, &[i32v(4)]);
    assert_eq!(exit.unwrap_err().exit_code(), Some(4));
    assert_eq!(two.call(WasiFunction::SchedYield, &[]), Errno::Success);
}

#[test]
fn test_trace_summary_serializes() {
    let ctx = WasiCtxBuilder::new().trace(true).build().unwrap();
    let mut guest = Guest::new(ctx);
    guest.write(1, b"abc").unwrap();
    guest.close(42);

    let summary = guest.ctx.tracer().summary();
    let json: serde_json::Value = serde_json::from_str(&summary.to_json().unwrap()).unwrap();
    assert_eq!(json["total_calls"], 2);
    assert_eq!(json["total_errors"], 1);
    assert_eq!(json["bytes_written"], 3);
    assert_eq!(json["functions"]["fd_close"]["errors"], 1);
}
