//! Outbound channel fan-out with a short-lived pending queue

use crate::payload::Payload;
use crate::peer::ChannelLink;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// What happened to a send request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to at least one open channel
    Sent,
    /// No channel open yet; held until one opens or the entry expires
    Queued,
    /// Neither sent nor queued
    Dropped,
}

/// Channels a sendable store writes to
///
/// Producers may emit before any channel is open. Those payloads wait in a
/// bounded queue for at most `ttl`; the oldest entry makes room when full.
pub struct SenderCore {
    links: RwLock<BTreeMap<String, Arc<dyn ChannelLink>>>,
    pending: Mutex<VecDeque<(Instant, Payload)>>,
    capacity: usize,
    ttl: Duration,
}

impl SenderCore {
    /// `capacity` of zero disables queueing
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            links: RwLock::new(BTreeMap::new()),
            pending: Mutex::new(VecDeque::new()),
            capacity,
            ttl,
        }
    }

    pub fn attach(&self, link: Arc<dyn ChannelLink>) {
        let label = link.label().to_string();
        debug!(label = %label, "Attaching send channel");
        self.links.write().insert(label, link);
    }

    pub fn detach(&self, label: &str) -> bool {
        self.links.write().remove(label).is_some()
    }

    pub fn detach_all(&self) -> usize {
        let mut links = self.links.write();
        let count = links.len();
        links.clear();
        count
    }

    pub fn can_send(&self) -> bool {
        self.links.read().values().any(|link| link.is_open())
    }

    /// Labels of attached channels that are open right now
    pub fn open_labels(&self) -> Vec<String> {
        self.links
            .read()
            .iter()
            .filter(|(_, link)| link.is_open())
            .map(|(label, _)| label.clone())
            .collect()
    }

    fn open_links(&self) -> Vec<Arc<dyn ChannelLink>> {
        self.links
            .read()
            .values()
            .filter(|link| link.is_open())
            .cloned()
            .collect()
    }

    /// Write to every open channel, or queue when none is open
    pub fn send(&self, payload: Payload) -> SendOutcome {
        self.send_at(payload, Instant::now())
    }

    pub fn send_at(&self, payload: Payload, now: Instant) -> SendOutcome {
        let links = self.open_links();
        if links.is_empty() {
            return self.enqueue(payload, now);
        }

        if write_all(&links, &payload) {
            SendOutcome::Sent
        } else {
            SendOutcome::Dropped
        }
    }

    /// Write to one attached channel only
    pub fn send_to(&self, label: &str, payload: Payload) -> SendOutcome {
        let link = self.links.read().get(label).cloned();
        match link {
            Some(link) if link.is_open() => match link.send(payload) {
                Ok(()) => SendOutcome::Sent,
                Err(e) => {
                    warn!(label = %label, "Send failed: {}", e);
                    SendOutcome::Dropped
                }
            },
            _ => SendOutcome::Dropped,
        }
    }

    fn enqueue(&self, payload: Payload, now: Instant) -> SendOutcome {
        if self.capacity == 0 {
            return SendOutcome::Dropped;
        }

        let mut pending = self.pending.lock();
        self.expire(&mut pending, now);
        if pending.len() == self.capacity {
            pending.pop_front();
        }
        pending.push_back((now, payload));
        SendOutcome::Queued
    }

    fn expire(&self, pending: &mut VecDeque<(Instant, Payload)>, now: Instant) {
        while let Some((queued_at, _)) = pending.front() {
            if now.saturating_duration_since(*queued_at) > self.ttl {
                pending.pop_front();
            } else {
                break;
            }
        }
    }

    /// Deliver unexpired queued payloads; returns how many were written
    pub fn flush(&self) -> usize {
        self.flush_at(Instant::now())
    }

    pub fn flush_at(&self, now: Instant) -> usize {
        let links = self.open_links();
        if links.is_empty() {
            return 0;
        }

        let drained: Vec<Payload> = {
            let mut pending = self.pending.lock();
            self.expire(&mut pending, now);
            pending.drain(..).map(|(_, payload)| payload).collect()
        };

        let flushed = drained
            .iter()
            .filter(|payload| write_all(&links, payload))
            .count();
        if flushed > 0 {
            debug!(flushed, "Flushed queued sends");
        }
        flushed
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}

fn write_all(links: &[Arc<dyn ChannelLink>], payload: &Payload) -> bool {
    let mut delivered = false;
    for link in links {
        match link.send(payload.clone()) {
            Ok(()) => delivered = true,
            Err(e) => warn!(label = %link.label(), "Send failed: {}", e),
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::testing::FakeLink;
    use crate::peer::DataChannelState;

    #[test]
    fn test_queue_then_flush_on_open() {
        let core = SenderCore::new(4, Duration::from_secs(2));
        let link = FakeLink::connecting("r1:pad");
        core.attach(link.clone());

        assert_eq!(core.send(Payload::text("a")), SendOutcome::Queued);
        assert_eq!(core.pending(), 1);

        link.set_state(DataChannelState::Open);
        assert_eq!(core.flush(), 1);
        assert_eq!(core.pending(), 0);
        assert_eq!(link.sent(), vec![Payload::text("a")]);

        assert_eq!(core.send(Payload::text("b")), SendOutcome::Sent);
        assert_eq!(link.sent().len(), 2);
    }

    #[test]
    fn test_expired_entries_are_not_flushed() {
        let core = SenderCore::new(4, Duration::from_millis(100));
        let t0 = Instant::now();
        core.send_at(Payload::text("stale"), t0);

        let link = FakeLink::open("r1:pad");
        core.attach(link.clone());
        assert_eq!(core.flush_at(t0 + Duration::from_millis(500)), 0);
        assert!(link.sent().is_empty());
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let core = SenderCore::new(2, Duration::from_secs(5));
        for text in ["1", "2", "3"] {
            core.send(Payload::text(text));
        }
        let link = FakeLink::open("r1:pad");
        core.attach(link.clone());
        core.flush();
        assert_eq!(link.sent(), vec![Payload::text("2"), Payload::text("3")]);
    }

    #[test]
    fn test_zero_capacity_drops() {
        let core = SenderCore::new(0, Duration::from_secs(5));
        assert_eq!(core.send(Payload::text("x")), SendOutcome::Dropped);
    }

    #[test]
    fn test_send_to_targets_one_label() {
        let core = SenderCore::new(4, Duration::from_secs(5));
        let a = FakeLink::open("r1:check");
        let b = FakeLink::open("r1:check_2");
        core.attach(a.clone());
        core.attach(b.clone());
        assert_eq!(core.send_to("r1:check_2", Payload::text("pong")), SendOutcome::Sent);
        assert!(a.sent().is_empty());
        assert_eq!(b.sent().len(), 1);
        assert_eq!(core.send_to("r1:missing", Payload::text("pong")), SendOutcome::Dropped);
    }
}
