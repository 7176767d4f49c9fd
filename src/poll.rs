//! Poll engine
//!
//! Multiplexes clock deadlines and handle readiness into one blocking wait.
//!
//! Design:
//! - every clock subscription is turned into a deadline on the provider's
//!   monotonic clock and kept in a min-heap, soonest first
//! - handle subscriptions are polled for readiness on each pass
//! - between passes the engine sleeps through the injected [`Sleeper`] until
//!   the next deadline, or for at most [`FD_POLL_SLICE`] while handles are
//!   still pending
//! - a subscription that cannot be evaluated (bad handle, missing right,
//!   unsupported clock) fires immediately with its own error and does not
//!   disturb the others
//!
//! With a [`ManualClock`](crate::clock::ManualClock) as clock and sleeper the
//! whole wait is deterministic.

use crate::abi::{
    ClockId, Event, EventRwFlags, EventType, Rights, SubclockFlags, Subscription, SubscriptionKind,
};
use crate::clock::{CancelToken, Clock, Sleeper};
use crate::errno::{Errno, WasiResult};
use crate::table::{Fd, OpenResource, Readiness, ResourceTable};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;

/// Longest single sleep while handle subscriptions are pending
pub const FD_POLL_SLICE: Duration = Duration::from_millis(10);

/// One result slot, in subscription order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollEvent {
    pub event: Event,
    /// Whether the subscription fired (errors count as firing)
    pub triggered: bool,
}

impl PollEvent {
    fn pending(sub: &Subscription) -> Self {
        Self {
            event: Event {
                userdata: sub.userdata,
                error: Errno::Again,
                kind: sub.kind.event_type(),
                nbytes: 0,
                flags: EventRwFlags::empty(),
            },
            triggered: false,
        }
    }

    fn fire(&mut self, error: Errno, nbytes: u64, flags: EventRwFlags) {
        self.event.error = error;
        self.event.nbytes = nbytes;
        self.event.flags = flags;
        self.triggered = true;
    }
}

/// Clock deadlines ordered soonest first
#[derive(Debug, Default)]
struct DeadlineQueue {
    heap: BinaryHeap<Reverse<(u64, usize)>>,
}

impl DeadlineQueue {
    fn push(&mut self, deadline: u64, index: usize) {
        self.heap.push(Reverse((deadline, index)));
    }

    /// Pop every subscription whose deadline is at or before `now`
    fn pop_expired(&mut self, now: u64) -> Vec<usize> {
        let mut expired = Vec::new();
        while let Some(Reverse((deadline, index))) = self.heap.peek().copied() {
            if deadline > now {
                break;
            }
            self.heap.pop();
            expired.push(index);
        }
        expired
    }

    fn time_until_next(&self, now: u64) -> Option<u64> {
        self.heap
            .peek()
            .map(|Reverse((deadline, _))| deadline.saturating_sub(now))
    }
}

/// Blocking wait over a batch of subscriptions
pub struct PollEngine<'a> {
    clock: &'a dyn Clock,
    sleeper: &'a dyn Sleeper,
    cancel: &'a CancelToken,
}

impl<'a> PollEngine<'a> {
    pub fn new(clock: &'a dyn Clock, sleeper: &'a dyn Sleeper, cancel: &'a CancelToken) -> Self {
        Self {
            clock,
            sleeper,
            cancel,
        }
    }

    /// Wait until at least one subscription fires or `timeout` elapses
    ///
    /// Returns one event per subscription. Untriggered events carry `again`,
    /// or `timedout` when the engine timeout ended the wait. Fails with
    /// `intr` if the instance is cancelled while waiting.
    pub fn poll(
        &self,
        table: &mut ResourceTable,
        subs: &[Subscription],
        timeout: Option<Duration>,
    ) -> WasiResult<Vec<PollEvent>> {
        if subs.is_empty() {
            return Ok(Vec::new());
        }

        let start = self.clock.now(ClockId::Monotonic)?;
        let give_up =
            timeout.map(|t| start.saturating_add(u64::try_from(t.as_nanos()).unwrap_or(u64::MAX)));

        let mut events: Vec<PollEvent> = subs.iter().map(PollEvent::pending).collect();
        let mut deadlines = DeadlineQueue::default();
        let mut waiting_fds = Vec::new();

        for (index, sub) in subs.iter().enumerate() {
            match sub.kind {
                SubscriptionKind::Clock(clock) => {
                    match self.clock_wait(clock.id, clock.timeout, clock.flags) {
                        Ok(wait) => deadlines.push(start.saturating_add(wait), index),
                        Err(errno) => events[index].fire(errno, 0, EventRwFlags::empty()),
                    }
                }
                SubscriptionKind::FdRead(fd) | SubscriptionKind::FdWrite(fd) => {
                    let required = match sub.kind.event_type() {
                        EventType::FdRead => Rights::FD_READ,
                        _ => Rights::FD_WRITE,
                    };
                    match table.lookup(Fd(fd), required) {
                        Ok(entry) if matches!(entry.resource, OpenResource::Directory(_)) => {
                            events[index].fire(Errno::Badf, 0, EventRwFlags::empty())
                        }
                        Ok(_) => waiting_fds.push(index),
                        Err(errno) => events[index].fire(errno, 0, EventRwFlags::empty()),
                    }
                }
            }
        }

        loop {
            if self.cancel.is_cancelled() {
                return Err(Errno::Intr);
            }

            waiting_fds.retain(|&index| {
                let (fd, kind) = match subs[index].kind {
                    SubscriptionKind::FdRead(fd) => (fd, EventType::FdRead),
                    SubscriptionKind::FdWrite(fd) => (fd, EventType::FdWrite),
                    SubscriptionKind::Clock(_) => return false,
                };
                match readiness(table, Fd(fd), kind) {
                    Ok(Readiness::Pending) => true,
                    Ok(Readiness::Ready(n)) => {
                        events[index].fire(Errno::Success, n, EventRwFlags::empty());
                        false
                    }
                    Ok(Readiness::HangUp) => {
                        events[index].fire(Errno::Success, 0, EventRwFlags::HANGUP);
                        false
                    }
                    Err(errno) => {
                        events[index].fire(errno, 0, EventRwFlags::empty());
                        false
                    }
                }
            });

            let now = self.clock.now(ClockId::Monotonic)?;
            for index in deadlines.pop_expired(now) {
                events[index].fire(Errno::Success, 0, EventRwFlags::empty());
            }

            if events.iter().any(|e| e.triggered) {
                break;
            }
            if give_up.is_some_and(|g| now >= g) {
                for event in &mut events {
                    event.event.error = Errno::Timedout;
                }
                break;
            }

            let mut wait = deadlines.time_until_next(now).unwrap_or(u64::MAX);
            if !waiting_fds.is_empty() {
                wait = wait.min(FD_POLL_SLICE.as_nanos() as u64);
            }
            if let Some(g) = give_up {
                wait = wait.min(g.saturating_sub(now));
            }
            tracing::trace!(wait_ns = wait, pending_fds = waiting_fds.len(), "poll sleeping");
            if !self.sleeper.sleep(Duration::from_nanos(wait), self.cancel) {
                return Err(Errno::Intr);
            }
        }

        Ok(events)
    }

    /// Nanoseconds to wait for a clock subscription
    fn clock_wait(&self, id: u32, timeout: u64, flags: SubclockFlags) -> WasiResult<u64> {
        let id = ClockId::from_raw(id)?;
        let now = self.clock.now(id)?;
        if flags.contains(SubclockFlags::ABSTIME) {
            Ok(timeout.saturating_sub(now))
        } else {
            Ok(timeout)
        }
    }
}

fn readiness(table: &mut ResourceTable, fd: Fd, kind: EventType) -> WasiResult<Readiness> {
    match &mut table.get_mut(fd)?.resource {
        OpenResource::File(file) => match kind {
            EventType::FdRead => Ok(Readiness::Ready(file.remaining()?)),
            _ => Ok(Readiness::Ready(0)),
        },
        OpenResource::Stdio(stream) => Ok(stream.readiness()),
        OpenResource::Directory(_) => Err(Errno::Badf),
    }
}
