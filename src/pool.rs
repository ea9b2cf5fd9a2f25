//! The bounded pool of concurrent TCP transfers, with a FIFO wait queue for
//! zones that arrive once the pool is full.

use std::collections::VecDeque;

use crate::zone::StoredName;

/// A fixed-capacity pool of TCP transfer slots.
///
/// When capacity is exhausted, further requests are queued and served in
/// the order they arrived once a slot is released. Slot *identity* here is
/// just a counter; the actual socket and buffer for a transfer live with
/// the task driving it; the pool only tracks how many are in flight and who
/// is waiting.
#[derive(Debug)]
pub struct TcpPool {
    capacity: usize,
    in_use: usize,
    waiting: VecDeque<StoredName>,
}

impl TcpPool {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "a TCP pool must have positive capacity");
        Self {
            capacity,
            in_use: 0,
            waiting: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Request a slot for `zone`.
    ///
    /// Returns `true` if a slot was granted immediately; the caller should
    /// start the transfer. Returns `false` if the zone was parked on the
    /// wait queue instead; the caller must not start anything and should
    /// record the zone as waiting.
    pub fn obtain(&mut self, zone: StoredName) -> bool {
        if self.in_use < self.capacity {
            self.in_use += 1;
            true
        } else {
            self.waiting.push_back(zone);
            false
        }
    }

    /// Release the slot held by the caller.
    ///
    /// If another zone is waiting, it is handed the slot (ownership moves
    /// directly to it, `in_use` is unchanged) and returned so the caller can
    /// start its transfer. Otherwise `in_use` is decremented and `None` is
    /// returned.
    pub fn release(&mut self) -> Option<StoredName> {
        match self.waiting.pop_front() {
            Some(next) => Some(next),
            None => {
                self.in_use = self.in_use.saturating_sub(1);
                None
            }
        }
    }

    #[cfg(test)]
    pub fn is_waiting(&self, zone: &StoredName) -> bool {
        self.waiting.contains(zone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn name(s: &str) -> StoredName {
        StoredName::from_str(s).unwrap()
    }

    #[test]
    fn grants_up_to_capacity() {
        let mut pool = TcpPool::new(2);
        assert!(pool.obtain(name("a.")));
        assert!(pool.obtain(name("b.")));
        assert_eq!(pool.in_use(), 2);
    }

    #[test]
    fn overflow_waits_fifo() {
        let mut pool = TcpPool::new(2);
        assert!(pool.obtain(name("a.")));
        assert!(pool.obtain(name("b.")));

        // Pool full: third and fourth zones queue up in arrival order.
        assert!(!pool.obtain(name("c.")));
        assert!(!pool.obtain(name("d.")));
        assert!(pool.is_waiting(&name("c.")));
        assert!(pool.is_waiting(&name("d.")));

        // Releasing one slot serves the head of the queue, not the tail.
        let next = pool.release();
        assert_eq!(next, Some(name("c.")));
        assert_eq!(pool.in_use(), 2);
        assert!(!pool.is_waiting(&name("c.")));
        assert!(pool.is_waiting(&name("d.")));

        let next = pool.release();
        assert_eq!(next, Some(name("d.")));
        assert_eq!(pool.in_use(), 2);

        // Queue now empty: releasing actually frees capacity.
        let next = pool.release();
        assert_eq!(next, None);
        assert_eq!(pool.in_use(), 1);
    }
}
