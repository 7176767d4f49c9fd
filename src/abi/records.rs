//! Fixed-layout records exchanged through guest memory
//!
//! Every record is serialized byte-for-byte at its wasm32 layout, in
//! little-endian order. Padding bytes are written as zero.

use super::{EventRwFlags, EventType, FdFlags, Filetype, Rights, SubclockFlags};
use crate::errno::Errno;

fn u16_at(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn u32_at(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn u64_at(buf: &[u8], off: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(raw)
}

/// `iovec` / `ciovec` (8 bytes, align 4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoVec {
    pub buf: u32,
    pub buf_len: u32,
}

impl IoVec {
    pub const SIZE: usize = 8;
    pub const ALIGN: usize = 4;

    pub fn from_bytes(buf: &[u8; 8]) -> Self {
        Self {
            buf: u32_at(buf, 0),
            buf_len: u32_at(buf, 4),
        }
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[0..4].copy_from_slice(&self.buf.to_le_bytes());
        buf[4..8].copy_from_slice(&self.buf_len.to_le_bytes());
        buf
    }
}

/// `fdstat` (24 bytes, align 8)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fdstat {
    pub filetype: Filetype,
    pub flags: FdFlags,
    pub rights_base: Rights,
    pub rights_inheriting: Rights,
}

impl Fdstat {
    pub const SIZE: usize = 24;
    pub const ALIGN: usize = 8;

    pub fn to_bytes(&self) -> [u8; 24] {
        let mut buf = [0u8; 24];
        buf[0] = self.filetype as u8;
        buf[2..4].copy_from_slice(&self.flags.bits().to_le_bytes());
        buf[8..16].copy_from_slice(&self.rights_base.bits().to_le_bytes());
        buf[16..24].copy_from_slice(&self.rights_inheriting.bits().to_le_bytes());
        buf
    }
}

/// `filestat` (64 bytes, align 8)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Filestat {
    pub dev: u64,
    pub ino: u64,
    pub filetype: Filetype,
    pub nlink: u64,
    pub size: u64,
    /// Access time, nanoseconds since the epoch
    pub atim: u64,
    pub mtim: u64,
    pub ctim: u64,
}

impl Filestat {
    pub const SIZE: usize = 64;
    pub const ALIGN: usize = 8;

    /// Stat record for a stream with no backing file
    pub fn character_device() -> Self {
        Self {
            dev: 0,
            ino: 0,
            filetype: Filetype::CharacterDevice,
            nlink: 0,
            size: 0,
            atim: 0,
            mtim: 0,
            ctim: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        let mut buf = [0u8; 64];
        buf[0..8].copy_from_slice(&self.dev.to_le_bytes());
        buf[8..16].copy_from_slice(&self.ino.to_le_bytes());
        buf[16] = self.filetype as u8;
        buf[24..32].copy_from_slice(&self.nlink.to_le_bytes());
        buf[32..40].copy_from_slice(&self.size.to_le_bytes());
        buf[40..48].copy_from_slice(&self.atim.to_le_bytes());
        buf[48..56].copy_from_slice(&self.mtim.to_le_bytes());
        buf[56..64].copy_from_slice(&self.ctim.to_le_bytes());
        buf
    }
}

/// `dirent` header (24 bytes, align 8); the name follows unterminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dirent {
    /// Cookie of the entry after this one
    pub next: u64,
    pub ino: u64,
    pub namlen: u32,
    pub filetype: Filetype,
}

impl Dirent {
    pub const SIZE: usize = 24;

    pub fn to_bytes(&self) -> [u8; 24] {
        let mut buf = [0u8; 24];
        buf[0..8].copy_from_slice(&self.next.to_le_bytes());
        buf[8..16].copy_from_slice(&self.ino.to_le_bytes());
        buf[16..20].copy_from_slice(&self.namlen.to_le_bytes());
        buf[20] = self.filetype as u8;
        buf
    }
}

/// `prestat` (8 bytes, align 4); only the directory variant exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prestat {
    pub name_len: u32,
}

impl Prestat {
    pub const SIZE: usize = 8;
    pub const ALIGN: usize = 4;

    pub fn to_bytes(&self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[0] = super::PREOPENTYPE_DIR;
        buf[4..8].copy_from_slice(&self.name_len.to_le_bytes());
        buf
    }
}

/// Clock half of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionClock {
    /// Raw clock id; validated by the poll engine so a bad id fails only
    /// its own subscription
    pub id: u32,
    pub timeout: u64,
    pub precision: u64,
    pub flags: SubclockFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    Clock(SubscriptionClock),
    FdRead(u32),
    FdWrite(u32),
}

impl SubscriptionKind {
    pub fn event_type(&self) -> EventType {
        match self {
            SubscriptionKind::Clock(_) => EventType::Clock,
            SubscriptionKind::FdRead(_) => EventType::FdRead,
            SubscriptionKind::FdWrite(_) => EventType::FdWrite,
        }
    }
}

/// `subscription` (48 bytes, align 8)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub userdata: u64,
    pub kind: SubscriptionKind,
}

impl Subscription {
    pub const SIZE: usize = 48;
    pub const ALIGN: usize = 8;

    /// Decode a subscription; an unknown tag is `inval`
    pub fn from_bytes(buf: &[u8; 48]) -> Result<Self, Errno> {
        let userdata = u64_at(buf, 0);
        let kind = match EventType::from_raw(buf[8])? {
            EventType::Clock => SubscriptionKind::Clock(SubscriptionClock {
                id: u32_at(buf, 16),
                timeout: u64_at(buf, 24),
                precision: u64_at(buf, 32),
                flags: SubclockFlags::from_bits_truncate(u16_at(buf, 40)),
            }),
            EventType::FdRead => SubscriptionKind::FdRead(u32_at(buf, 16)),
            EventType::FdWrite => SubscriptionKind::FdWrite(u32_at(buf, 16)),
        };
        Ok(Self { userdata, kind })
    }

    pub fn to_bytes(&self) -> [u8; 48] {
        let mut buf = [0u8; 48];
        buf[0..8].copy_from_slice(&self.userdata.to_le_bytes());
        buf[8] = self.kind.event_type() as u8;
        match self.kind {
            SubscriptionKind::Clock(clock) => {
                buf[16..20].copy_from_slice(&clock.id.to_le_bytes());
                buf[24..32].copy_from_slice(&clock.timeout.to_le_bytes());
                buf[32..40].copy_from_slice(&clock.precision.to_le_bytes());
                buf[40..42].copy_from_slice(&clock.flags.bits().to_le_bytes());
            }
            SubscriptionKind::FdRead(fd) | SubscriptionKind::FdWrite(fd) => {
                buf[16..20].copy_from_slice(&fd.to_le_bytes());
            }
        }
        buf
    }
}

/// `event` (32 bytes, align 8)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub userdata: u64,
    pub error: Errno,
    pub kind: EventType,
    /// Bytes available; only meaningful for descriptor events
    pub nbytes: u64,
    pub flags: EventRwFlags,
}

impl Event {
    pub const SIZE: usize = 32;
    pub const ALIGN: usize = 8;

    pub fn to_bytes(&self) -> [u8; 32] {
        let mut buf = [0u8; 32];
        buf[0..8].copy_from_slice(&self.userdata.to_le_bytes());
        buf[8..10].copy_from_slice(&self.error.code().to_le_bytes());
        buf[10] = self.kind as u8;
        buf[16..24].copy_from_slice(&self.nbytes.to_le_bytes());
        buf[24..26].copy_from_slice(&self.flags.bits().to_le_bytes());
        buf
    }

    /// Decode an event written by [`Event::to_bytes`]
    pub fn from_bytes(buf: &[u8; 32]) -> Result<Self, Errno> {
        Ok(Self {
            userdata: u64_at(buf, 0),
            error: Errno::from_code(u16_at(buf, 8)).ok_or(Errno::Inval)?,
            kind: EventType::from_raw(buf[10])?,
            nbytes: u64_at(buf, 16),
            flags: EventRwFlags::from_bits_truncate(u16_at(buf, 24)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fdstat_layout() {
        let stat = Fdstat {
            filetype: Filetype::RegularFile,
            flags: FdFlags::APPEND | FdFlags::NONBLOCK,
            rights_base: Rights::FD_READ,
            rights_inheriting: Rights::empty(),
        };
        let buf = stat.to_bytes();
        assert_eq!(buf[0], 4);
        assert_eq!(buf[1], 0);
        assert_eq!(u16_at(&buf, 2), 0b101);
        assert_eq!(u64_at(&buf, 8), 2);
        assert_eq!(u64_at(&buf, 16), 0);
    }

    #[test]
    fn test_filestat_layout() {
        let stat = Filestat {
            dev: 1,
            ino: 2,
            filetype: Filetype::Directory,
            nlink: 3,
            size: 4,
            atim: 5,
            mtim: 6,
            ctim: 7,
        };
        let buf = stat.to_bytes();
        assert_eq!(u64_at(&buf, 0), 1);
        assert_eq!(u64_at(&buf, 8), 2);
        assert_eq!(buf[16], 3);
        assert_eq!(&buf[17..24], &[0u8; 7]);
        assert_eq!(u64_at(&buf, 24), 3);
        assert_eq!(u64_at(&buf, 32), 4);
        assert_eq!(u64_at(&buf, 56), 7);
    }

    #[test]
    fn test_dirent_and_prestat_layout() {
        let dirent = Dirent {
            next: 9,
            ino: 42,
            namlen: 5,
            filetype: Filetype::SymbolicLink,
        };
        let buf = dirent.to_bytes();
        assert_eq!(u64_at(&buf, 0), 9);
        assert_eq!(u32_at(&buf, 16), 5);
        assert_eq!(buf[20], 7);

        let prestat = Prestat { name_len: 4 }.to_bytes();
        assert_eq!(prestat, [0, 0, 0, 0, 4, 0, 0, 0]);
    }

    #[test]
    fn test_subscription_decoding() {
        let mut raw = [0u8; 48];
        raw[0..8].copy_from_slice(&77u64.to_le_bytes());
        raw[8] = 0;
        raw[16..20].copy_from_slice(&1u32.to_le_bytes());
        raw[24..32].copy_from_slice(&100_000_000u64.to_le_bytes());
        raw[40..42].copy_from_slice(&1u16.to_le_bytes());

        let sub = Subscription::from_bytes(&raw).unwrap();
        assert_eq!(sub.userdata, 77);
        match sub.kind {
            SubscriptionKind::Clock(clock) => {
                assert_eq!(clock.id, 1);
                assert_eq!(clock.timeout, 100_000_000);
                assert!(clock.flags.contains(SubclockFlags::ABSTIME));
            }
            other => panic!("unexpected kind {:?}", other),
        }

        raw[8] = 3;
        assert_eq!(Subscription::from_bytes(&raw), Err(Errno::Inval));
    }

    #[test]
    fn test_event_layout() {
        let event = Event {
            userdata: 5,
            error: Errno::Badf,
            kind: EventType::FdWrite,
            nbytes: 0,
            flags: EventRwFlags::HANGUP,
        };
        let buf = event.to_bytes();
        assert_eq!(u16_at(&buf, 8), 8);
        assert_eq!(buf[10], 2);
        assert_eq!(u16_at(&buf, 24), 1);
        assert_eq!(Event::from_bytes(&buf), Ok(event));
    }
}
