//! Arguments and environment
//!
//! Both lists use the same guest layout: a pointer array (one u32 per
//! string) and a buffer of NUL-terminated strings packed back to back.

use super::check_out;
use crate::ctx::WasiCtx;
use crate::errno::{Errno, WasiResult};
use crate::memory::{GuestMemory, MemoryExt};

/// Where each string of a list lands in the guest's buffer
#[derive(Debug)]
struct StringLayout {
    /// Total bytes for strings, NUL terminators included
    buf_size: u32,
    /// Offset of each string from the start of the buffer
    offsets: Vec<u32>,
}

impl StringLayout {
    fn new(strings: &[String]) -> WasiResult<Self> {
        let mut buf_size: u32 = 0;
        let mut offsets = Vec::with_capacity(strings.len());
        for s in strings {
            offsets.push(buf_size);
            let len = u32::try_from(s.len())?;
            buf_size = buf_size
                .checked_add(len)
                .and_then(|n| n.checked_add(1))
                .ok_or(Errno::Overflow)?;
        }
        Ok(Self { buf_size, offsets })
    }

    fn count(&self) -> WasiResult<u32> {
        Ok(u32::try_from(self.offsets.len())?)
    }

    /// Write the pointer array at `ptrs` and the strings at `buf`
    fn write_to(
        &self,
        strings: &[String],
        memory: &mut dyn GuestMemory,
        ptrs: u32,
        buf: u32,
    ) -> WasiResult<()> {
        let array_len = self.count()?.checked_mul(4).ok_or(Errno::Fault)?;
        check_out(memory, ptrs, array_len, 4)?;
        memory.view(buf, self.buf_size)?;
        // Every pointer must fit in the address space before anything lands
        buf.checked_add(self.buf_size).ok_or(Errno::Fault)?;

        for (i, (s, offset)) in strings.iter().zip(&self.offsets).enumerate() {
            let at = buf + offset;
            memory.write_bytes(at, s.as_bytes())?;
            memory.write_bytes(at + s.len() as u32, &[0])?;
            memory.write_u32(ptrs + i as u32 * 4, at)?;
        }
        Ok(())
    }
}

impl WasiCtx {
    pub(crate) fn args_sizes_get(
        &mut self,
        memory: &mut dyn GuestMemory,
        argc_out: u32,
        buf_size_out: u32,
    ) -> WasiResult<()> {
        let layout = StringLayout::new(&self.args)?;
        sizes_out(memory, &layout, argc_out, buf_size_out)
    }

    pub(crate) fn args_get(
        &mut self,
        memory: &mut dyn GuestMemory,
        argv: u32,
        argv_buf: u32,
    ) -> WasiResult<()> {
        let layout = StringLayout::new(&self.args)?;
        layout.write_to(&self.args, memory, argv, argv_buf)
    }

    pub(crate) fn environ_sizes_get(
        &mut self,
        memory: &mut dyn GuestMemory,
        count_out: u32,
        buf_size_out: u32,
    ) -> WasiResult<()> {
        let layout = StringLayout::new(&self.env)?;
        sizes_out(memory, &layout, count_out, buf_size_out)
    }

    pub(crate) fn environ_get(
        &mut self,
        memory: &mut dyn GuestMemory,
        environ: u32,
        environ_buf: u32,
    ) -> WasiResult<()> {
        let layout = StringLayout::new(&self.env)?;
        layout.write_to(&self.env, memory, environ, environ_buf)
    }
}

fn sizes_out(
    memory: &mut dyn GuestMemory,
    layout: &StringLayout,
    count_out: u32,
    size_out: u32,
) -> WasiResult<()> {
    check_out(memory, count_out, 4, 4)?;
    check_out(memory, size_out, 4, 4)?;
    memory.write_u32(count_out, layout.count()?)?;
    memory.write_u32(size_out, layout.buf_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_offsets() {
        let args = vec!["cat".to_string(), "-n".to_string(), String::new()];
        let layout = StringLayout::new(&args).unwrap();
        assert_eq!(layout.offsets, vec![0, 4, 7]);
        assert_eq!(layout.buf_size, 8);
        assert_eq!(layout.count().unwrap(), 3);
    }

    #[test]
    fn test_layout_write() {
        let args = vec!["ls".to_string(), "/tmp".to_string()];
        let layout = StringLayout::new(&args).unwrap();
        let mut memory = vec![0u8; 64];
        layout.write_to(&args, &mut memory, 0, 16).unwrap();

        assert_eq!(memory.read_u32(0).unwrap(), 16);
        assert_eq!(memory.read_u32(4).unwrap(), 19);
        assert_eq!(&memory[16..24], b"ls\0/tmp\0");
    }

    #[test]
    fn test_layout_write_checks_bounds_first() {
        let args = vec!["program".to_string()];
        let layout = StringLayout::new(&args).unwrap();
        let mut memory = vec![0u8; 16];
        assert_eq!(layout.write_to(&args, &mut memory, 0, 12), Err(Errno::Fault));
        assert!(memory.iter().all(|&b| b == 0));
    }
}
