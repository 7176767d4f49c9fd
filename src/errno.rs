//! Error translation
//!
//! The preview1 errno space is a frozen external contract: the numbers below
//! must never be renumbered. This module is the single place where a host
//! failure kind is given a guest-visible code.
//!
//! Translation order for `std::io::Error`:
//! 1. the raw OS errno (unix), mapped one-to-one where preview1 has a twin
//! 2. the portable `ErrorKind`
//! 3. anything else becomes `Errno::Io`

use std::fmt;
use std::io;

/// Result type used by every guest-facing operation
pub type WasiResult<T> = Result<T, Errno>;

/// Error codes returned by preview1 functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Errno {
    Success = 0,
    TooBig = 1,
    Acces = 2,
    Addrinuse = 3,
    Addrnotavail = 4,
    Afnosupport = 5,
    Again = 6,
    Already = 7,
    Badf = 8,
    Badmsg = 9,
    Busy = 10,
    Canceled = 11,
    Child = 12,
    Connaborted = 13,
    Connrefused = 14,
    Connreset = 15,
    Deadlk = 16,
    Destaddrreq = 17,
    Dom = 18,
    Dquot = 19,
    Exist = 20,
    Fault = 21,
    Fbig = 22,
    Hostunreach = 23,
    Idrm = 24,
    Ilseq = 25,
    Inprogress = 26,
    Intr = 27,
    Inval = 28,
    Io = 29,
    Isconn = 30,
    Isdir = 31,
    Loop = 32,
    Mfile = 33,
    Mlink = 34,
    Msgsize = 35,
    Multihop = 36,
    Nametoolong = 37,
    Netdown = 38,
    Netreset = 39,
    Netunreach = 40,
    Nfile = 41,
    Nobufs = 42,
    Nodev = 43,
    Noent = 44,
    Noexec = 45,
    Nolck = 46,
    Nolink = 47,
    Nomem = 48,
    Nomsg = 49,
    Noprotoopt = 50,
    Nospc = 51,
    Nosys = 52,
    Notconn = 53,
    Notdir = 54,
    Notempty = 55,
    Notrecoverable = 56,
    Notsock = 57,
    Notsup = 58,
    Notty = 59,
    Nxio = 60,
    Overflow = 61,
    Ownerdead = 62,
    Perm = 63,
    Pipe = 64,
    Proto = 65,
    Protonosupport = 66,
    Prototype = 67,
    Range = 68,
    Rofs = 69,
    Spipe = 70,
    Srch = 71,
    Stale = 72,
    Timedout = 73,
    Txtbsy = 74,
    Xdev = 75,
    Notcapable = 76,
}

const ALL: [Errno; 77] = [
    Errno::Success,
    Errno::TooBig,
    Errno::Acces,
    Errno::Addrinuse,
    Errno::Addrnotavail,
    Errno::Afnosupport,
    Errno::Again,
    Errno::Already,
    Errno::Badf,
    Errno::Badmsg,
    Errno::Busy,
    Errno::Canceled,
    Errno::Child,
    Errno::Connaborted,
    Errno::Connrefused,
    Errno::Connreset,
    Errno::Deadlk,
    Errno::Destaddrreq,
    Errno::Dom,
    Errno::Dquot,
    Errno::Exist,
    Errno::Fault,
    Errno::Fbig,
    Errno::Hostunreach,
    Errno::Idrm,
    Errno::Ilseq,
    Errno::Inprogress,
    Errno::Intr,
    Errno::Inval,
    Errno::Io,
    Errno::Isconn,
    Errno::Isdir,
    Errno::Loop,
    Errno::Mfile,
    Errno::Mlink,
    Errno::Msgsize,
    Errno::Multihop,
    Errno::Nametoolong,
    Errno::Netdown,
    Errno::Netreset,
    Errno::Netunreach,
    Errno::Nfile,
    Errno::Nobufs,
    Errno::Nodev,
    Errno::Noent,
    Errno::Noexec,
    Errno::Nolck,
    Errno::Nolink,
    Errno::Nomem,
    Errno::Nomsg,
    Errno::Noprotoopt,
    Errno::Nospc,
    Errno::Nosys,
    Errno::Notconn,
    Errno::Notdir,
    Errno::Notempty,
    Errno::Notrecoverable,
    Errno::Notsock,
    Errno::Notsup,
    Errno::Notty,
    Errno::Nxio,
    Errno::Overflow,
    Errno::Ownerdead,
    Errno::Perm,
    Errno::Pipe,
    Errno::Proto,
    Errno::Protonosupport,
    Errno::Prototype,
    Errno::Range,
    Errno::Rofs,
    Errno::Spipe,
    Errno::Srch,
    Errno::Stale,
    Errno::Timedout,
    Errno::Txtbsy,
    Errno::Xdev,
    Errno::Notcapable,
];

impl Errno {
    /// The guest-visible numeric code
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Code widened to the i32 result type of every host function
    pub fn raw(self) -> i32 {
        self as u16 as i32
    }

    pub fn from_code(code: u16) -> Option<Self> {
        ALL.get(code as usize).copied()
    }

    pub fn is_success(self) -> bool {
        self == Errno::Success
    }

    /// Symbolic name as written in the preview1 witx
    pub fn name(self) -> &'static str {
        match self {
            Errno::Success => "success",
            Errno::TooBig => "2big",
            Errno::Acces => "acces",
            Errno::Addrinuse => "addrinuse",
            Errno::Addrnotavail => "addrnotavail",
            Errno::Afnosupport => "afnosupport",
            Errno::Again => "again",
            Errno::Already => "already",
            Errno::Badf => "badf",
            Errno::Badmsg => "badmsg",
            Errno::Busy => "busy",
            Errno::Canceled => "canceled",
            Errno::Child => "child",
            Errno::Connaborted => "connaborted",
            Errno::Connrefused => "connrefused",
            Errno::Connreset => "connreset",
            Errno::Deadlk => "deadlk",
            Errno::Destaddrreq => "destaddrreq",
            Errno::Dom => "dom",
            Errno::Dquot => "dquot",
            Errno::Exist => "exist",
            Errno::Fault => "fault",
            Errno::Fbig => "fbig",
            Errno::Hostunreach => "hostunreach",
            Errno::Idrm => "idrm",
            Errno::Ilseq => "ilseq",
            Errno::Inprogress => "inprogress",
            Errno::Intr => "intr",
            Errno::Inval => "inval",
            Errno::Io => "io",
            Errno::Isconn => "isconn",
            Errno::Isdir => "isdir",
            Errno::Loop => "loop",
            Errno::Mfile => "mfile",
            Errno::Mlink => "mlink",
            Errno::Msgsize => "msgsize",
            Errno::Multihop => "multihop",
            Errno::Nametoolong => "nametoolong",
            Errno::Netdown => "netdown",
            Errno::Netreset => "netreset",
            Errno::Netunreach => "netunreach",
            Errno::Nfile => "nfile",
            Errno::Nobufs => "nobufs",
            Errno::Nodev => "nodev",
            Errno::Noent => "noent",
            Errno::Noexec => "noexec",
            Errno::Nolck => "nolck",
            Errno::Nolink => "nolink",
            Errno::Nomem => "nomem",
            Errno::Nomsg => "nomsg",
            Errno::Noprotoopt => "noprotoopt",
            Errno::Nospc => "nospc",
            Errno::Nosys => "nosys",
            Errno::Notconn => "notconn",
            Errno::Notdir => "notdir",
            Errno::Notempty => "notempty",
            Errno::Notrecoverable => "notrecoverable",
            Errno::Notsock => "notsock",
            Errno::Notsup => "notsup",
            Errno::Notty => "notty",
            Errno::Nxio => "nxio",
            Errno::Overflow => "overflow",
            Errno::Ownerdead => "ownerdead",
            Errno::Perm => "perm",
            Errno::Pipe => "pipe",
            Errno::Proto => "proto",
            Errno::Protonosupport => "protonosupport",
            Errno::Prototype => "prototype",
            Errno::Range => "range",
            Errno::Rofs => "rofs",
            Errno::Spipe => "spipe",
            Errno::Srch => "srch",
            Errno::Stale => "stale",
            Errno::Timedout => "timedout",
            Errno::Txtbsy => "txtbsy",
            Errno::Xdev => "xdev",
            Errno::Notcapable => "notcapable",
        }
    }

    /// Translate a host I/O failure
    pub fn from_io(err: &io::Error) -> Self {
        #[cfg(unix)]
        if let Some(code) = err.raw_os_error() {
            if let Some(errno) = from_raw_os_error(code) {
                return errno;
            }
        }
        from_error_kind(err.kind())
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

impl std::error::Error for Errno {}

impl From<io::Error> for Errno {
    fn from(err: io::Error) -> Self {
        Errno::from_io(&err)
    }
}

impl From<std::str::Utf8Error> for Errno {
    fn from(_: std::str::Utf8Error) -> Self {
        Errno::Ilseq
    }
}

impl From<std::num::TryFromIntError> for Errno {
    fn from(_: std::num::TryFromIntError) -> Self {
        Errno::Overflow
    }
}

#[cfg(unix)]
fn from_raw_os_error(code: i32) -> Option<Errno> {
    let errno = match code {
        libc::E2BIG => Errno::TooBig,
        libc::EACCES => Errno::Acces,
        libc::EADDRINUSE => Errno::Addrinuse,
        libc::EADDRNOTAVAIL => Errno::Addrnotavail,
        libc::EAFNOSUPPORT => Errno::Afnosupport,
        libc::EAGAIN => Errno::Again,
        libc::EALREADY => Errno::Already,
        libc::EBADF => Errno::Badf,
        libc::EBUSY => Errno::Busy,
        libc::ECANCELED => Errno::Canceled,
        libc::ECONNREFUSED => Errno::Connrefused,
        libc::ECONNRESET => Errno::Connreset,
        libc::EDEADLK => Errno::Deadlk,
        libc::EDQUOT => Errno::Dquot,
        libc::EEXIST => Errno::Exist,
        libc::EFAULT => Errno::Fault,
        libc::EFBIG => Errno::Fbig,
        libc::EILSEQ => Errno::Ilseq,
        libc::EINTR => Errno::Intr,
        libc::EINVAL => Errno::Inval,
        libc::EIO => Errno::Io,
        libc::EISDIR => Errno::Isdir,
        libc::ELOOP => Errno::Loop,
        libc::EMFILE => Errno::Mfile,
        libc::EMLINK => Errno::Mlink,
        libc::ENAMETOOLONG => Errno::Nametoolong,
        libc::ENFILE => Errno::Nfile,
        libc::ENODEV => Errno::Nodev,
        libc::ENOENT => Errno::Noent,
        libc::ENOLCK => Errno::Nolck,
        libc::ENOMEM => Errno::Nomem,
        libc::ENOSPC => Errno::Nospc,
        libc::ENOSYS => Errno::Nosys,
        libc::ENOTDIR => Errno::Notdir,
        libc::ENOTEMPTY => Errno::Notempty,
        libc::ENOTSUP => Errno::Notsup,
        libc::ENOTTY => Errno::Notty,
        libc::ENXIO => Errno::Nxio,
        libc::EOVERFLOW => Errno::Overflow,
        libc::EPERM => Errno::Perm,
        libc::EPIPE => Errno::Pipe,
        libc::ERANGE => Errno::Range,
        libc::EROFS => Errno::Rofs,
        libc::ESPIPE => Errno::Spipe,
        libc::ESTALE => Errno::Stale,
        libc::ETIMEDOUT => Errno::Timedout,
        libc::ETXTBSY => Errno::Txtbsy,
        libc::EXDEV => Errno::Xdev,
        _ => return None,
    };
    Some(errno)
}

fn from_error_kind(kind: io::ErrorKind) -> Errno {
    use io::ErrorKind;
    match kind {
        ErrorKind::NotFound => Errno::Noent,
        ErrorKind::PermissionDenied => Errno::Acces,
        ErrorKind::AlreadyExists => Errno::Exist,
        ErrorKind::WouldBlock => Errno::Again,
        ErrorKind::BrokenPipe => Errno::Pipe,
        ErrorKind::Interrupted => Errno::Intr,
        ErrorKind::InvalidInput => Errno::Inval,
        ErrorKind::InvalidData => Errno::Ilseq,
        ErrorKind::TimedOut => Errno::Timedout,
        ErrorKind::Unsupported => Errno::Notsup,
        ErrorKind::OutOfMemory => Errno::Nomem,
        ErrorKind::NotADirectory => Errno::Notdir,
        ErrorKind::IsADirectory => Errno::Isdir,
        ErrorKind::DirectoryNotEmpty => Errno::Notempty,
        ErrorKind::ConnectionRefused => Errno::Connrefused,
        ErrorKind::ConnectionReset => Errno::Connreset,
        ErrorKind::ConnectionAborted => Errno::Connaborted,
        ErrorKind::NotConnected => Errno::Notconn,
        ErrorKind::AddrInUse => Errno::Addrinuse,
        ErrorKind::AddrNotAvailable => Errno::Addrnotavail,
        _ => Errno::Io,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_frozen() {
        assert_eq!(Errno::Success.code(), 0);
        assert_eq!(Errno::Acces.code(), 2);
        assert_eq!(Errno::Badf.code(), 8);
        assert_eq!(Errno::Exist.code(), 20);
        assert_eq!(Errno::Inval.code(), 28);
        assert_eq!(Errno::Io.code(), 29);
        assert_eq!(Errno::Noent.code(), 44);
        assert_eq!(Errno::Notdir.code(), 54);
        assert_eq!(Errno::Notcapable.code(), 76);
    }

    #[test]
    fn test_table_matches_discriminants() {
        for (i, errno) in ALL.iter().enumerate() {
            assert_eq!(errno.code() as usize, i, "{}", errno.name());
            assert_eq!(Errno::from_code(i as u16), Some(*errno));
        }
        assert_eq!(Errno::from_code(77), None);
    }

    #[test]
    fn test_error_kind_translation() {
        let cases = [
            (io::ErrorKind::NotFound, Errno::Noent),
            (io::ErrorKind::PermissionDenied, Errno::Acces),
            (io::ErrorKind::Interrupted, Errno::Intr),
            (io::ErrorKind::WouldBlock, Errno::Again),
            (io::ErrorKind::BrokenPipe, Errno::Pipe),
            (io::ErrorKind::InvalidInput, Errno::Inval),
        ];
        for (kind, expected) in cases {
            assert_eq!(Errno::from(io::Error::from(kind)), expected);
        }
    }

    #[test]
    fn test_unknown_failures_become_io() {
        let err = io::Error::other("something odd");
        assert_eq!(Errno::from(err), Errno::Io);
    }

    #[cfg(unix)]
    #[test]
    fn test_raw_os_error_wins() {
        let err = io::Error::from_raw_os_error(libc::ELOOP);
        assert_eq!(Errno::from(err), Errno::Loop);

        let err = io::Error::from_raw_os_error(libc::EPERM);
        assert_eq!(Errno::from(err), Errno::Perm);
    }

    #[test]
    fn test_display() {
        assert_eq!(Errno::Notcapable.to_string(), "notcapable (76)");
    }
}
