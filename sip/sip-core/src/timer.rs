use slotmap::SlotMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

slotmap::new_key_type! {
    /// Handle of a scheduled timer, generational so a stale cancel is a no-op
    pub struct TimerId;
}

/// One-shot timer queue.
///
/// Timers fire through [`pop_expired`](TimerQueue::pop_expired) and are
/// implicitly removed once fired. Cancelled ids stay in the heap and are
/// skipped lazily.
pub struct TimerQueue<T> {
    entries: SlotMap<TimerId, (Instant, T)>,
    order: BinaryHeap<(Reverse<Instant>, TimerId)>,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self {
            entries: SlotMap::with_key(),
            order: BinaryHeap::new(),
        }
    }
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, deadline: Instant, payload: T) -> TimerId {
        let id = self.entries.insert((deadline, payload));
        self.order.push((Reverse(deadline), id));
        id
    }

    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        self.entries.remove(id).map(|(_, payload)| payload)
    }

    /// Remove and return the next timer whose deadline has passed
    pub fn pop_expired(&mut self, now: Instant) -> Option<(TimerId, T)> {
        loop {
            let &(Reverse(deadline), id) = self.order.peek()?;

            if !self.entries.contains_key(id) {
                // cancelled
                self.order.pop();
                continue;
            }

            if deadline > now {
                return None;
            }

            self.order.pop();
            let (_, payload) = self.entries.remove(id)?;
            return Some((id, payload));
        }
    }

    /// Deadline of the earliest live timer
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .values()
            .map(|(deadline, _)| *deadline)
            .min()
    }

    pub fn timeout(&self, now: Instant) -> Option<Duration> {
        self.next_deadline()
            .map(|deadline| deadline.checked_duration_since(now).unwrap_or(Duration::ZERO))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fires_in_deadline_order() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();

        queue.schedule(now + Duration::from_secs(2), "late");
        queue.schedule(now + Duration::from_secs(1), "early");

        assert!(queue.pop_expired(now).is_none());

        let later = now + Duration::from_secs(3);
        assert_eq!(queue.pop_expired(later).unwrap().1, "early");
        assert_eq!(queue.pop_expired(later).unwrap().1, "late");
        assert!(queue.pop_expired(later).is_none());
    }

    #[test]
    fn cancel_prevents_firing() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();

        let id = queue.schedule(now, "never");
        assert_eq!(queue.cancel(id), Some("never"));

        // double cancel is harmless
        assert_eq!(queue.cancel(id), None);

        assert!(queue.pop_expired(now + Duration::from_secs(1)).is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn timeout_tracks_earliest() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();

        queue.schedule(now + Duration::from_secs(5), ());
        let id = queue.schedule(now + Duration::from_secs(1), ());

        assert!(queue.timeout(now).unwrap() <= Duration::from_secs(1));

        queue.cancel(id);
        assert!(queue.timeout(now).unwrap() > Duration::from_secs(4));
    }
}
