//! Keepalive schedule for one live socket.

use std::time::Duration;
use tokio::time::Instant;

/// What the handling loop should do about keepalive right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeepaliveAction {
    Idle,
    SendPing,
    Expired,
}

/// PING schedule and PONG deadline.
#[derive(Debug)]
pub(crate) struct Keepalive {
    interval: Duration,
    timeout: Duration,
    next_ping: Instant,
    pong_deadline: Option<Instant>,
}

impl Keepalive {
    /// A fresh schedule with the first PING due at `now`.
    pub(crate) fn new(interval: Duration, timeout: Duration, now: Instant) -> Self {
        Self {
            interval,
            timeout,
            next_ping: now,
            pong_deadline: None,
        }
    }

    /// Advance the schedule to `now`.
    ///
    /// An outstanding PING keeps its original deadline even if the next PING
    /// is sent before the PONG arrives.
    pub(crate) fn poll(&mut self, now: Instant) -> KeepaliveAction {
        if self.pong_deadline.is_some_and(|deadline| now >= deadline) {
            return KeepaliveAction::Expired;
        }
        if now >= self.next_ping {
            self.next_ping = now + self.interval;
            self.pong_deadline.get_or_insert(now + self.timeout);
            return KeepaliveAction::SendPing;
        }
        KeepaliveAction::Idle
    }

    pub(crate) fn pong_received(&mut self) {
        self.pong_deadline = None;
    }

    /// The next instant at which `poll` can return something other than `Idle`.
    pub(crate) fn next_deadline(&self) -> Instant {
        match self.pong_deadline {
            Some(deadline) => deadline.min(self.next_ping),
            None => self.next_ping,
        }
    }
}
