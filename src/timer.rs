//! Multiplexed millisecond-resolution timer service over a single hardware
//! alarm (component C2).
//!
//! `fire_time = t0 + dt`, compared with wrap-aware `u32` arithmetic exactly
//! as the source core's `Timer`/`TimerScheduler` pair does: a timer list
//! ordered by earliest `fire_time`, a single alarm reprogrammed to the head,
//! and `fire_timers()` draining any expired head in a loop so a handler may
//! re-arm itself without missing the sweep.

use heapless::Vec;

/// A monotonic millisecond clock, supplied by the embedder. Matches the
/// source core's `Timer::GetNow() -> uint32_t`: a plain wrapping counter,
/// not a typed `Duration`, since the comparisons below are wrap-aware.
pub trait Clock {
    fn now_ms(&self) -> u32;
}

/// `(a - b) as i32 < 0`: true when `a` is chronologically before `b`,
/// correct across one wraparound of the 32-bit millisecond counter.
#[inline]
pub fn time_a_before_b(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// Identifies one purpose-built timer slot (attach sub-machine, periodic
/// state-update tick, advertise trickle, ...). Index-based rather than an
/// intrusive pointer chain, so neighbor/timer references elsewhere in the
/// core are plain small integers (per the redesign note in `spec.md` §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimerId(pub u8);

#[derive(Debug, Clone, Copy)]
struct Scheduled {
    id: TimerId,
    t0: u32,
    dt: u32,
    /// Insertion sequence, used to break fire_time ties in insertion order.
    seq: u32,
}

impl Scheduled {
    fn fire_time(&self) -> u32 {
        self.t0.wrapping_add(self.dt)
    }
}

pub const MAX_TIMERS: usize = 16;

/// The timer service. Generic over the capability that reprograms the
/// hardware alarm; `fire_timers` is expected to be called from that alarm's
/// interrupt/callback context, which is this core's single dispatch thread.
pub struct TimerService {
    scheduled: Vec<Scheduled, MAX_TIMERS>,
    next_seq: u32,
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerService {
    pub const fn new() -> Self {
        Self {
            scheduled: Vec::new(),
            next_seq: 0,
        }
    }

    fn insert_sorted(&mut self, entry: Scheduled) -> Result<(), crate::error::Error> {
        let pos = self
            .scheduled
            .iter()
            .position(|e| {
                let e_before = time_a_before_b(e.fire_time(), entry.fire_time());
                let tie = e.fire_time() == entry.fire_time() && e.seq < entry.seq;
                !(e_before || tie)
            })
            .unwrap_or(self.scheduled.len());
        self.scheduled
            .insert(pos, entry)
            .map_err(|_| crate::error::Error::NoBufs)
    }

    /// Schedule `id` to fire `dt` milliseconds after `t0`. Re-adds (and
    /// reorders) the timer if it was already scheduled.
    pub fn start_at(&mut self, id: TimerId, t0: u32, dt: u32) -> Result<(), crate::error::Error> {
        self.remove(id);
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.insert_sorted(Scheduled { id, t0, dt, seq })
    }

    pub fn start(&mut self, clock: &dyn Clock, id: TimerId, dt: u32) -> Result<(), crate::error::Error> {
        self.start_at(id, clock.now_ms(), dt)
    }

    /// Cancel `id`. A no-op if it was not scheduled.
    pub fn remove(&mut self, id: TimerId) {
        if let Some(pos) = self.scheduled.iter().position(|e| e.id == id) {
            self.scheduled.remove(pos);
        }
    }

    pub fn is_running(&self, id: TimerId) -> bool {
        self.scheduled.iter().any(|e| e.id == id)
    }

    /// The fire time of the earliest-scheduled timer, if any — what the
    /// hardware alarm should be reprogrammed to.
    pub fn next_fire_time(&self) -> Option<u32> {
        self.scheduled.first().map(|e| e.fire_time())
    }

    /// Pop and return every timer whose `fire_time` has passed, in
    /// `fire_time` order (ties broken by insertion order). A timer that a
    /// just-invoked handler `remove`s is already gone from `scheduled` and
    /// will not be returned again in the same sweep, even if it re-arms
    /// itself under the same `TimerId` before the sweep completes (the
    /// re-add goes through `start_at`, which reorders as a fresh insert).
    pub fn drain_expired(&mut self, now: u32) -> ExpiredIter<'_> {
        ExpiredIter { timers: self, now }
    }
}

pub struct ExpiredIter<'a> {
    timers: &'a mut TimerService,
    now: u32,
}

impl<'a> Iterator for ExpiredIter<'a> {
    type Item = TimerId;

    fn next(&mut self) -> Option<TimerId> {
        let head_expired = self
            .timers
            .scheduled
            .first()
            .map(|e| !time_a_before_b(self.now, e.fire_time()))
            .unwrap_or(false);
        if !head_expired {
            return None;
        }
        Some(self.timers.scheduled.remove(0).id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_aware_comparison() {
        // a just before wraparound, b just after: a is still "before" b.
        assert!(time_a_before_b(u32::MAX - 1, 1));
        assert!(!time_a_before_b(1, u32::MAX - 1));
        assert!(!time_a_before_b(5, 5));
    }

    #[test]
    fn fires_in_order_and_respects_ties() {
        let mut svc = TimerService::new();
        svc.start_at(TimerId(1), 0, 100).unwrap();
        svc.start_at(TimerId(2), 0, 50).unwrap();
        svc.start_at(TimerId(3), 0, 50).unwrap();

        let fired: Vec<TimerId, 4> = svc.drain_expired(50).collect();
        // both dt=50 timers fire, in insertion order; dt=100 does not yet.
        assert_eq!(fired.as_slice(), &[TimerId(2), TimerId(3)]);
        assert!(svc.is_running(TimerId(1)));
    }

    #[test]
    fn removed_timer_does_not_fire() {
        let mut svc = TimerService::new();
        svc.start_at(TimerId(1), 0, 10).unwrap();
        svc.remove(TimerId(1));
        let fired: Vec<TimerId, 4> = svc.drain_expired(100).collect();
        assert!(fired.is_empty());
    }

    #[test]
    fn reschedule_reorders() {
        let mut svc = TimerService::new();
        svc.start_at(TimerId(1), 0, 100).unwrap();
        svc.start_at(TimerId(2), 0, 10).unwrap();
        assert_eq!(svc.next_fire_time(), Some(10));
        svc.start_at(TimerId(1), 0, 5).unwrap();
        assert_eq!(svc.next_fire_time(), Some(5));
    }
}
