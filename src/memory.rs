//! Memory bridge
//!
//! Guest pointers are plain offsets into the instance's linear memory. Every
//! access goes through [`MemoryExt`], which bounds-checks `offset + length`
//! against the memory's *current* length on each call. Memory can grow
//! between host calls (or even between two accesses of one call when the
//! engine shares it), so no size is ever cached.
//!
//! Failure classes:
//! - `offset + length` overflows or runs past the end → `fault`
//! - a typed scalar or record at a misaligned offset → `inval`
//! - a guest string that is not UTF-8 → `ilseq`

use crate::abi::IoVec;
use crate::errno::{Errno, WasiResult};

/// A guest's linear memory as the engine exposes it to host functions
pub trait GuestMemory {
    fn data(&self) -> &[u8];
    fn data_mut(&mut self) -> &mut [u8];
}

/// Vec-backed linear memory, used by embedders without an engine-owned
/// buffer and by the test suite
#[derive(Debug, Clone)]
pub struct LinearMemory {
    data: Vec<u8>,
    max_pages: Option<u32>,
}

impl LinearMemory {
    /// Page size in bytes (64KB)
    pub const PAGE_SIZE: usize = 65536;

    /// Create memory with the given number of zeroed pages
    pub fn new(pages: u32) -> Self {
        Self {
            data: vec![0; pages as usize * Self::PAGE_SIZE],
            max_pages: None,
        }
    }

    /// Limit how far `grow` may take this memory
    pub fn with_max_pages(mut self, max: u32) -> Self {
        self.max_pages = Some(max);
        self
    }

    pub fn pages(&self) -> u32 {
        (self.data.len() / Self::PAGE_SIZE) as u32
    }

    /// Grow by `delta` pages; returns the previous page count, like
    /// `memory.grow`, or `None` if the limit would be exceeded
    pub fn grow(&mut self, delta: u32) -> Option<u32> {
        let old = self.pages();
        let new = old.checked_add(delta)?;
        if new > self.max_pages.unwrap_or(65536) {
            return None;
        }
        self.data.resize(new as usize * Self::PAGE_SIZE, 0);
        Some(old)
    }
}

impl GuestMemory for LinearMemory {
    fn data(&self) -> &[u8] {
        &self.data
    }

    fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl GuestMemory for Vec<u8> {
    fn data(&self) -> &[u8] {
        self
    }

    fn data_mut(&mut self) -> &mut [u8] {
        self
    }
}

fn range(size: usize, ptr: u32, len: u32) -> WasiResult<std::ops::Range<usize>> {
    let start = ptr as usize;
    let end = start.checked_add(len as usize).ok_or(Errno::Fault)?;
    if end > size {
        return Err(Errno::Fault);
    }
    Ok(start..end)
}

fn check_align(ptr: u32, align: usize) -> WasiResult<()> {
    if (ptr as usize) % align != 0 {
        return Err(Errno::Inval);
    }
    Ok(())
}

/// Bounds-checked accessors over any [`GuestMemory`]
pub trait MemoryExt: GuestMemory {
    /// Current size in bytes
    fn size(&self) -> usize {
        self.data().len()
    }

    fn view(&self, ptr: u32, len: u32) -> WasiResult<&[u8]> {
        let range = range(self.data().len(), ptr, len)?;
        Ok(&self.data()[range])
    }

    fn view_mut(&mut self, ptr: u32, len: u32) -> WasiResult<&mut [u8]> {
        let range = range(self.data().len(), ptr, len)?;
        Ok(&mut self.data_mut()[range])
    }

    /// Read a fixed-size record at a naturally aligned offset
    fn read_array<const N: usize>(&self, ptr: u32, align: usize) -> WasiResult<[u8; N]> {
        let bytes = self.view(ptr, N as u32)?;
        check_align(ptr, align)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Write a fixed-size record at a naturally aligned offset
    fn write_record(&mut self, ptr: u32, bytes: &[u8], align: usize) -> WasiResult<()> {
        let len = u32::try_from(bytes.len()).map_err(|_| Errno::Fault)?;
        let dst = self.view_mut(ptr, len)?;
        check_align(ptr, align)?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    /// Copy unaligned bytes into guest memory
    fn write_bytes(&mut self, ptr: u32, bytes: &[u8]) -> WasiResult<()> {
        let len = u32::try_from(bytes.len()).map_err(|_| Errno::Fault)?;
        self.view_mut(ptr, len)?.copy_from_slice(bytes);
        Ok(())
    }

    fn read_u32(&self, ptr: u32) -> WasiResult<u32> {
        Ok(u32::from_le_bytes(self.read_array::<4>(ptr, 4)?))
    }

    fn read_u64(&self, ptr: u32) -> WasiResult<u64> {
        Ok(u64::from_le_bytes(self.read_array::<8>(ptr, 8)?))
    }

    fn write_u32(&mut self, ptr: u32, value: u32) -> WasiResult<()> {
        self.write_record(ptr, &value.to_le_bytes(), 4)
    }

    fn write_u64(&mut self, ptr: u32, value: u64) -> WasiResult<()> {
        self.write_record(ptr, &value.to_le_bytes(), 8)
    }

    /// A guest string given as (ptr, len); must be UTF-8
    fn read_str(&self, ptr: u32, len: u32) -> WasiResult<&str> {
        let bytes = self.view(ptr, len)?;
        Ok(std::str::from_utf8(bytes)?)
    }

    /// Decode an `iovec` array
    fn read_iovecs(&self, ptr: u32, count: u32) -> WasiResult<Vec<IoVec>> {
        let total = (count as usize)
            .checked_mul(IoVec::SIZE)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or(Errno::Fault)?;
        self.view(ptr, total)?;
        check_align(ptr, IoVec::ALIGN)?;

        let mut iovs = Vec::with_capacity(count as usize);
        for i in 0..count {
            let at = ptr + i * IoVec::SIZE as u32;
            iovs.push(IoVec::from_bytes(&self.read_array::<8>(at, IoVec::ALIGN)?));
        }
        Ok(iovs)
    }
}

impl<M: GuestMemory + ?Sized> MemoryExt for M {}
