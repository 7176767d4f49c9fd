//! Clocks, randomness and scheduling

use super::check_out;
use crate::abi::ClockId;
use crate::ctx::WasiCtx;
use crate::errno::{Errno, WasiResult};
use crate::memory::{GuestMemory, MemoryExt};

/// Largest `random_get` request served in one provider call
const RANDOM_CHUNK: usize = 64 * 1024;

impl WasiCtx {
    pub(crate) fn clock_res_get(
        &mut self,
        memory: &mut dyn GuestMemory,
        id: u32,
        out: u32,
    ) -> WasiResult<()> {
        let id = ClockId::from_raw(id)?;
        check_out(memory, out, 8, 8)?;
        let resolution = self.clock.resolution(id)?;
        memory.write_u64(out, resolution)
    }

    /// `precision` is a hint and is ignored
    pub(crate) fn clock_time_get(
        &mut self,
        memory: &mut dyn GuestMemory,
        id: u32,
        _precision: u64,
        out: u32,
    ) -> WasiResult<()> {
        let id = ClockId::from_raw(id)?;
        check_out(memory, out, 8, 8)?;
        let now = self.clock.now(id)?;
        memory.write_u64(out, now)
    }

    pub(crate) fn random_get(
        &mut self,
        memory: &mut dyn GuestMemory,
        buf: u32,
        len: u32,
    ) -> WasiResult<()> {
        for chunk in memory.view_mut(buf, len)?.chunks_mut(RANDOM_CHUNK) {
            self.random.fill(chunk)?;
        }
        Ok(())
    }

    pub(crate) fn sched_yield(&mut self) -> WasiResult<()> {
        std::thread::yield_now();
        Ok(())
    }

    /// Signals are not delivered to guests
    pub(crate) fn proc_raise(&mut self, sig: u32) -> WasiResult<()> {
        tracing::debug!(sig, "proc_raise is not supported");
        Err(Errno::Nosys)
    }
}
