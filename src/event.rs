//! FSM event catalogue and the serialized event queue feeding the engine.

use crate::error::NotificationPayload;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Events the FSM reacts to. Numeric comments match the RFC 4271
/// Section 8.1 event numbering; a few numbers (3-7, 14-15, 23) are not
/// modeled because they belong to administrative/capability features
/// this crate does not implement (route refresh, graceful restart, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// 1
    ManualStart,
    /// 2
    ManualStop,
    /// 8
    AutomaticStop,
    /// 9
    ConnectRetryTimerExpires,
    /// 10
    HoldTimerExpires,
    /// 11
    KeepaliveTimerExpires,
    /// 12
    DelayOpenTimerExpires,
    /// 13
    IdleHoldTimerExpires,
    /// 16
    TcpCrAcked,
    /// 17
    TcpConnectionConfirmed,
    /// 18
    TcpConnectionFails,
    /// 19
    BgpOpen { peer_hold_time: u16, peer_bgp_id: u32 },
    /// 20
    BgpOpenWithDelayOpenTimerRunning { peer_hold_time: u16, peer_bgp_id: u32 },
    /// 21
    BgpHeaderErr(NotificationPayload),
    /// 22
    BgpOpenMsgErr(NotificationPayload),
    /// 24
    NotifMsgVerErr,
    /// 25
    NotifMsg(NotificationPayload),
    /// 26
    KeepAliveMsg,
    /// 27
    UpdateMsg { nlri_count: usize, withdrawn_count: usize },
    /// 28
    UpdateMsgErr(NotificationPayload),
}

impl Event {
    /// Numeric event id, matching the RFC 4271 catalogue this crate
    /// implements.
    pub fn id(&self) -> u8 {
        match self {
            Event::ManualStart => 1,
            Event::ManualStop => 2,
            Event::AutomaticStop => 8,
            Event::ConnectRetryTimerExpires => 9,
            Event::HoldTimerExpires => 10,
            Event::KeepaliveTimerExpires => 11,
            Event::DelayOpenTimerExpires => 12,
            Event::IdleHoldTimerExpires => 13,
            Event::TcpCrAcked => 16,
            Event::TcpConnectionConfirmed => 17,
            Event::TcpConnectionFails => 18,
            Event::BgpOpen { .. } => 19,
            Event::BgpOpenWithDelayOpenTimerRunning { .. } => 20,
            Event::BgpHeaderErr(_) => 21,
            Event::BgpOpenMsgErr(_) => 22,
            Event::NotifMsgVerErr => 24,
            Event::NotifMsg(_) => 25,
            Event::KeepAliveMsg => 26,
            Event::UpdateMsg { .. } => 27,
            Event::UpdateMsgErr(_) => 28,
        }
    }

    /// True for the two events that demand the queue be flushed before
    /// they themselves are enqueued (RFC 4271 Section 8: stop events
    /// take precedence over anything already pending).
    pub fn flushes_queue(&self) -> bool {
        matches!(self, Event::ManualStop | Event::AutomaticStop)
    }
}

/// A queued event tagged with its enqueue-order serial number.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    pub serial: u16,
    pub event: Event,
}

/// FIFO event queue with wrap-safe serial numbering and stop-event
/// flush semantics (§3/§4.4 of the session's event-queue discipline).
pub struct EventQueue {
    queue: std::collections::VecDeque<QueuedEvent>,
    next_serial: u16,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            queue: std::collections::VecDeque::new(),
            next_serial: 1,
        }
    }

    fn take_serial(&mut self) -> u16 {
        let serial = self.next_serial;
        self.next_serial = if self.next_serial == u16::MAX { 1 } else { self.next_serial + 1 };
        serial
    }

    /// Enqueue an event. ManualStop/AutomaticStop clear the queue
    /// first so teardown always takes immediate precedence.
    pub fn push(&mut self, event: Event) -> u16 {
        if event.flushes_queue() {
            self.queue.clear();
        }
        let serial = self.take_serial();
        self.queue.push_back(QueuedEvent { serial, event });
        serial
    }

    pub fn pop(&mut self) -> Option<QueuedEvent> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle every event producer — admin `start`/`stop`, the
/// timer drivers, the TCP input loop — pushes through. Routing all of
/// them through one `EventQueue` behind this single lock is what makes
/// ManualStop/AutomaticStop's flush-the-queue guarantee hold: a stop
/// pushed here clears events a timer or the input loop already pushed,
/// not just events the admin side itself had queued. A side-channel
/// (e.g. each producer holding its own sender into an unbounded
/// channel) would let already-sent timer/TCP events bypass the flush
/// entirely, since flushing the `EventQueue` can't reach into a
/// channel's internal buffer.
#[derive(Clone)]
pub struct EventSink {
    queue: Arc<Mutex<EventQueue>>,
    notify: Arc<Notify>,
}

impl EventSink {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(EventQueue::new())),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Enqueues `event` (subject to `EventQueue::push`'s stop-flush
    /// rule) and wakes the consumer. Returns the assigned serial.
    pub fn push(&self, event: Event) -> u16 {
        let serial = self.queue.lock().unwrap().push(event);
        self.notify.notify_one();
        serial
    }

    /// Waits for and removes the next event in FIFO order.
    pub async fn recv(&self) -> QueuedEvent {
        loop {
            if let Some(queued) = self.queue.lock().unwrap().pop() {
                return queued;
            }
            self.notify.notified().await;
        }
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}
