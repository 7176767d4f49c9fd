//! `poll_oneoff`

use super::check_out;
use crate::abi::{Event, Subscription, guest_size};
use crate::ctx::WasiCtx;
use crate::errno::{Errno, WasiResult};
use crate::memory::{GuestMemory, MemoryExt};
use crate::poll::PollEngine;

impl WasiCtx {
    /// Block until a subscription fires, then write the fired events in
    /// subscription order
    pub(crate) fn poll_oneoff(
        &mut self,
        memory: &mut dyn GuestMemory,
        in_ptr: u32,
        out_ptr: u32,
        nsubscriptions: u32,
        nevents_out: u32,
    ) -> WasiResult<()> {
        if nsubscriptions == 0 {
            check_out(memory, nevents_out, 4, 4)?;
            return memory.write_u32(nevents_out, 0);
        }
        let in_len = nsubscriptions
            .checked_mul(Subscription::SIZE as u32)
            .ok_or(Errno::Fault)?;
        let out_len = nsubscriptions.checked_mul(Event::SIZE as u32).ok_or(Errno::Fault)?;
        check_out(memory, in_ptr, in_len, Subscription::ALIGN as u32)?;
        check_out(memory, out_ptr, out_len, Event::ALIGN as u32)?;
        check_out(memory, nevents_out, 4, 4)?;

        let mut subs = Vec::with_capacity(nsubscriptions as usize);
        for i in 0..nsubscriptions {
            let at = in_ptr + i * Subscription::SIZE as u32;
            let raw = memory.read_array::<48>(at, Subscription::ALIGN)?;
            subs.push(Subscription::from_bytes(&raw)?);
        }

        let engine = PollEngine::new(self.clock.as_ref(), self.sleeper.as_ref(), &self.cancel);
        let events = engine.poll(&mut self.table, &subs, None)?;

        let mut written = 0u32;
        for event in events.iter().filter(|e| e.triggered) {
            let at = out_ptr + written * Event::SIZE as u32;
            memory.write_record(at, &event.event.to_bytes(), Event::ALIGN)?;
            written += 1;
        }
        tracing::trace!(subscriptions = subs.len(), fired = written, "poll_oneoff returned");
        memory.write_u32(nevents_out, guest_size(written as usize)?)
    }
}
