//! Zone records and the registry that holds them.

use std::net::SocketAddr;
use std::sync::Mutex;

use bytes::Bytes;
use domain::base::Name;

use crate::soa::TimedSoa;

/// A domain name carried by value, the form zones are keyed and addressed
/// by throughout the coordinator.
pub type StoredName = Name<Bytes>;

//----------- TransferState ------------------------------------------------

/// The coarse SOA-timing state of a zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferState {
    /// The zone is current; the next wakeup is a routine refresh.
    Ok,
    /// A transfer is being actively pursued.
    Refreshing,
    /// The zone has passed its expire timer without a successful transfer.
    Expired,
}

//----------- Activity -------------------------------------------------------

/// What a zone is doing right now.
///
/// A zone may be doing at most one of these at a time; this is an explicit
/// representation of the "at most one outstanding operation per zone"
/// invariant, rather than a set of independent optional fields that could
/// be accidentally populated together.
#[derive(Debug, Default)]
pub enum Activity {
    /// Nothing in flight; waiting for the next timer.
    #[default]
    Idle,
    /// A UDP probe is outstanding, carrying the query ID it was sent with.
    Udp { query_id: u16 },
    /// A TCP transfer holds pool slot `slot`.
    Tcp { slot: usize },
    /// Parked on the TCP pool's FIFO wait queue.
    Waiting,
}

//----------- ZoneState -------------------------------------------------------

/// The mutable state of a zone.
#[derive(Debug)]
pub struct ZoneState {
    /// Primaries to poll, tried in order.
    pub masters: Vec<SocketAddr>,
    /// Index into `masters` of the one currently being used.
    pub current_master: usize,

    /// The serial the authoritative server has loaded in memory.
    pub soa_nsd: TimedSoa,
    /// The serial present in the diff log, awaiting reload.
    pub soa_disk: TimedSoa,
    /// The serial carried by the most recent NOTIFY.
    pub soa_notified: TimedSoa,

    pub status: TransferState,
    /// Absolute epoch-seconds the next timer fires, or `0` if disarmed.
    pub timer_at: u64,

    pub activity: Activity,
}

impl ZoneState {
    pub fn new(masters: Vec<SocketAddr>) -> Self {
        assert!(!masters.is_empty(), "a zone must have at least one master");
        Self {
            masters,
            current_master: 0,
            soa_nsd: TimedSoa::never(),
            soa_disk: TimedSoa::never(),
            soa_notified: TimedSoa::never(),
            status: TransferState::Refreshing,
            timer_at: 0,
            activity: Activity::Idle,
        }
    }

    /// The master that should be contacted next.
    pub fn master(&self) -> SocketAddr {
        self.masters[self.current_master]
    }

    /// Advance to the next configured master, wrapping around.
    pub fn rotate_master(&mut self) {
        self.current_master = (self.current_master + 1) % self.masters.len();
    }
}

//----------- Zone -------------------------------------------------------------

/// A zone this coordinator keeps current via periodic transfers.
#[derive(Debug)]
pub struct Zone {
    pub apex: StoredName,
    /// A human-readable rendering of `apex`, cached for logging and the
    /// state file, which are both hot paths that would otherwise format it
    /// repeatedly.
    pub apex_str: Box<str>,
    pub state: Mutex<ZoneState>,
}

impl Zone {
    pub fn new(apex: StoredName, masters: Vec<SocketAddr>) -> Self {
        let apex_str = apex.to_string().into_boxed_str();
        Self {
            apex,
            apex_str,
            state: Mutex::new(ZoneState::new(masters)),
        }
    }
}

//----------- Registry ---------------------------------------------------------

/// The set of zones this coordinator maintains.
///
/// Zones are created once at startup and never removed. Lookup is by
/// canonical name; iteration follows insertion order, which is required so
/// that the state file is written deterministically.
#[derive(Debug, Default)]
pub struct Registry {
    zones: Vec<std::sync::Arc<Zone>>,
    by_name: foldhash::HashMap<StoredName, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new zone.
    ///
    /// # Panics
    ///
    /// Panics if a zone with the same apex is already registered.
    pub fn insert(&mut self, zone: std::sync::Arc<Zone>) {
        let index = self.zones.len();
        let prev = self.by_name.insert(zone.apex.clone(), index);
        assert!(prev.is_none(), "duplicate zone '{}'", zone.apex);
        self.zones.push(zone);
    }

    pub fn get(&self, name: &StoredName) -> Option<&std::sync::Arc<Zone>> {
        self.by_name.get(name).map(|&i| &self.zones[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &std::sync::Arc<Zone>> {
        self.zones.iter()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn test_zone(name: &str) -> std::sync::Arc<Zone> {
        let apex = StoredName::from_str(name).unwrap();
        std::sync::Arc::new(Zone::new(
            apex,
            vec![SocketAddr::from(([192, 0, 2, 1], 53))],
        ))
    }

    #[test]
    fn insertion_order_preserved() {
        let mut registry = Registry::new();
        registry.insert(test_zone("b.example."));
        registry.insert(test_zone("a.example."));

        let names: Vec<_> = registry.iter().map(|z| z.apex_str.clone()).collect();
        assert_eq!(&*names[0], "b.example.");
        assert_eq!(&*names[1], "a.example.");
    }

    #[test]
    fn lookup_by_name() {
        let mut registry = Registry::new();
        let zone = test_zone("example.com.");
        registry.insert(zone.clone());

        let found = registry
            .get(&StoredName::from_str("example.com.").unwrap())
            .unwrap();
        assert!(std::sync::Arc::ptr_eq(found, &zone));
    }

    #[test]
    fn master_rotation_wraps() {
        let zone = test_zone("example.com.");
        let mut state = zone.state.lock().unwrap();
        state.masters.push(SocketAddr::from(([192, 0, 2, 2], 53)));
        assert_eq!(state.current_master, 0);
        state.rotate_master();
        assert_eq!(state.current_master, 1);
        state.rotate_master();
        assert_eq!(state.current_master, 0);
    }
}
