//! Countdown timers driving the FSM's Expires events (RFC 4271 Section 4.4).
//!
//! Each timer decrements once per second while armed; the tick that
//! brings it to zero is the one that fires. Disabling a timer (value
//! 0) simply stops the countdown without firing.

use crate::event::{Event, EventSink};
use std::time::Duration;
use tokio::time::interval;

/// A single countdown timer. `remaining` is driven down by
/// [`Timer::tick`]; `base` is the duration a `reset` rearms it to.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    remaining: u16,
    base: u16,
}

impl Timer {
    pub fn new(base: u16) -> Self {
        Self { remaining: 0, base }
    }

    pub fn is_armed(&self) -> bool {
        self.remaining > 0
    }

    pub fn remaining(&self) -> u16 {
        self.remaining
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    pub fn set_base(&mut self, base: u16) {
        self.base = base;
    }

    /// Arm (or re-arm) the timer to its base duration. A base of 0
    /// leaves the timer disabled.
    pub fn reset(&mut self) {
        self.remaining = self.base;
    }

    pub fn disable(&mut self) {
        self.remaining = 0;
    }

    /// Decrement by one second. Returns true exactly on the tick that
    /// crosses to zero.
    pub fn tick(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        self.remaining == 0
    }
}

/// The three primary timers plus the two optional ones, bundled for
/// convenience by the session aggregate.
#[derive(Debug, Clone, Copy)]
pub struct TimerSet {
    pub connect_retry: Timer,
    pub hold: Timer,
    pub keepalive: Timer,
    pub delay_open: Timer,
    pub idle_hold: Timer,
}

impl TimerSet {
    pub fn new(connect_retry_time: u16, hold_time: u16, keepalive_time: u16) -> Self {
        Self {
            connect_retry: Timer::new(connect_retry_time),
            hold: Timer::new(hold_time),
            keepalive: Timer::new(keepalive_time),
            delay_open: Timer::new(0),
            idle_hold: Timer::new(0),
        }
    }

    /// Matches the Idle-state invariant: every timer disabled.
    pub fn disable_all(&mut self) {
        self.connect_retry.disable();
        self.hold.disable();
        self.keepalive.disable();
        self.delay_open.disable();
        self.idle_hold.disable();
    }
}

/// Spawns the one-second tick driver for a single timer, pushing the
/// given event through `sink` whenever the timer's countdown reaches
/// zero. The driver itself holds no FSM state; the session owns the
/// `Timer` value and advances it under its own lock each tick. Pushing
/// through the same `EventSink` every other producer uses (rather than
/// a private channel) is what lets a ManualStop/AutomaticStop flush
/// reach events this driver already produced. The driver runs until
/// its task is cancelled (see `PeerSession::shutdown`); it has no
/// termination condition of its own.
pub fn spawn_driver<F>(sink: EventSink, mut tick_fn: F) -> tokio::task::JoinHandle<()>
where
    F: FnMut() -> Option<Event> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            if let Some(event) = tick_fn() {
                sink.push(event);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_fires_on_zero_crossing() {
        let mut t = Timer::new(3);
        t.reset();
        assert!(!t.tick());
        assert!(!t.tick());
        assert!(t.tick());
        assert!(!t.is_armed());
    }

    #[test]
    fn disabled_timer_never_fires() {
        let mut t = Timer::new(0);
        t.reset();
        assert!(!t.is_armed());
        assert!(!t.tick());
    }

    #[test]
    fn reset_rearms_to_base() {
        let mut t = Timer::new(5);
        t.reset();
        for _ in 0..4 {
            t.tick();
        }
        assert_eq!(t.remaining(), 1);
        t.reset();
        assert_eq!(t.remaining(), 5);
    }

    #[test]
    fn timer_set_disable_all_zeroes_everything() {
        let mut set = TimerSet::new(5, 90, 30);
        set.connect_retry.reset();
        set.hold.reset();
        set.keepalive.reset();
        set.disable_all();
        assert!(!set.connect_retry.is_armed());
        assert!(!set.hold.is_armed());
        assert!(!set.keepalive.is_armed());
    }
}
