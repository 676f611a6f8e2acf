use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ConsumerId(String);

impl ConsumerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestTicket {
    pub consumer: ConsumerId,
    pub sequence: u64,
}

#[derive(Debug, Clone)]
pub struct RequestSequencer {
    consumer: ConsumerId,
    counter: Arc<AtomicU64>,
}

impl RequestSequencer {
    pub fn new(consumer: ConsumerId) -> Self {
        Self {
            consumer,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn consumer(&self) -> &ConsumerId {
        &self.consumer
    }

    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    pub fn begin(&self) -> RequestTicket {
        let sequence = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        RequestTicket {
            consumer: self.consumer.clone(),
            sequence,
        }
    }

    pub fn is_current(&self, ticket: &RequestTicket) -> bool {
        ticket.consumer == self.consumer && ticket.sequence == self.current()
    }

    pub fn invalidate(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn accept<T>(&self, ticket: &RequestTicket, value: T) -> Option<T> {
        if self.is_current(ticket) {
            Some(value)
        } else {
            debug!(
                consumer = %self.consumer,
                sequence = ticket.sequence,
                current = self.current(),
                "dropping stale response"
            );
            None
        }
    }
}

#[derive(Debug, Default)]
pub struct StalenessGuard {
    consumers: HashMap<ConsumerId, RequestSequencer>,
    floor: u64,
}

impl StalenessGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sequencer(&mut self, consumer: &ConsumerId) -> RequestSequencer {
        let floor = self.floor;
        self.consumers
            .entry(consumer.clone())
            .or_insert_with(|| RequestSequencer {
                consumer: consumer.clone(),
                counter: Arc::new(AtomicU64::new(floor)),
            })
            .clone()
    }

    pub fn begin(&mut self, consumer: &ConsumerId) -> u64 {
        self.sequencer(consumer).begin().sequence
    }

    pub fn is_current(&self, consumer: &ConsumerId, sequence: u64) -> bool {
        self.consumers
            .get(consumer)
            .is_some_and(|sequencer| sequencer.current() == sequence)
    }

    pub fn invalidate(&mut self, consumer: &ConsumerId) {
        if let Some(sequencer) = self.consumers.get(consumer) {
            sequencer.invalidate();
        }
    }

    /// Invalidates and forgets `consumer`. Sequencers created afterwards start
    /// above every sequence issued so far, so a retired ticket never matches.
    pub fn retire(&mut self, consumer: &ConsumerId) {
        if let Some(sequencer) = self.consumers.remove(consumer) {
            sequencer.invalidate();
            self.floor = self.floor.max(sequencer.current());
        }
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_increments_from_one() {
        let sequencer = RequestSequencer::new(ConsumerId::new("kpi-card"));
        assert_eq!(sequencer.begin().sequence, 1);
        assert_eq!(sequencer.begin().sequence, 2);
        assert_eq!(sequencer.current(), 2);
    }

    #[test]
    fn later_ticket_supersedes_earlier() {
        let sequencer = RequestSequencer::new(ConsumerId::new("leaderboard"));
        let a = sequencer.begin();
        let b = sequencer.begin();
        assert!(!sequencer.is_current(&a));
        assert!(sequencer.is_current(&b));
        assert_eq!(sequencer.accept(&a, "a"), None);
        assert_eq!(sequencer.accept(&b, "b"), Some("b"));
    }

    #[test]
    fn invalidate_rejects_every_pending_ticket() {
        let sequencer = RequestSequencer::new(ConsumerId::new("directory"));
        let ticket = sequencer.begin();
        sequencer.invalidate();
        assert!(!sequencer.is_current(&ticket));
    }

    #[test]
    fn guard_tracks_consumers_independently() {
        let mut guard = StalenessGuard::new();
        let left = ConsumerId::new("left");
        let right = ConsumerId::new("right");
        let l1 = guard.begin(&left);
        let r1 = guard.begin(&right);
        let l2 = guard.begin(&left);

        assert!(!guard.is_current(&left, l1));
        assert!(guard.is_current(&left, l2));
        assert!(guard.is_current(&right, r1));
        assert!(!guard.is_current(&ConsumerId::new("unknown"), 1));
    }

    #[test]
    fn retired_consumer_is_forgotten_and_old_tickets_stay_stale() {
        let mut guard = StalenessGuard::new();
        let card = ConsumerId::new("card");
        let old = guard.begin(&card);
        let held = guard.sequencer(&card);
        let ticket = held.begin();

        guard.retire(&card);
        assert!(guard.is_empty());
        assert!(!held.is_current(&ticket));
        assert!(!guard.is_current(&card, old));

        let fresh = guard.begin(&card);
        assert!(fresh > ticket.sequence);
        assert!(!guard.is_current(&card, old));
        assert!(!guard.is_current(&card, ticket.sequence));
        assert!(guard.is_current(&card, fresh));
        assert_eq!(guard.len(), 1);
    }
}
