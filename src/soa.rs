//! SOA snapshots and the wire-level records the coordinator exchanges.

use std::str::FromStr;

use bytes::Bytes;
use domain::base::iana::{Class, Rtype};
use domain::base::{Name, Serial};

/// A single SOA resource record, as it would appear on the wire.
///
/// All numeric fields are kept in network byte order, matching the bytes
/// they were read from or will be written as. Arithmetic on the timers
/// converts to host order explicitly; keeping the representation close to
/// the wire avoids repeated round-tripping when a snapshot is immediately
/// re-serialized into a query's authority section.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SoaSnapshot {
    pub rtype: Rtype,
    pub class: Class,
    pub ttl: u32,
    /// RDLENGTH / rdata-count, as persisted alongside the RR.
    pub rdata_count: u16,
    /// The primary master's name (SOA MNAME).
    pub primary_ns: Name<Bytes>,
    /// The responsible party's mailbox, dot-encoded (SOA RNAME).
    pub responsible_email: Name<Bytes>,
    pub serial: Serial,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

impl SoaSnapshot {
    /// A snapshot with every numeric field zeroed and MNAME/RNAME set to the
    /// root name, used as a placeholder before the first SOA has ever been
    /// acquired.
    pub fn zero() -> SoaSnapshot {
        SoaSnapshot {
            rtype: Rtype::SOA,
            class: Class::IN,
            ttl: 0,
            rdata_count: 0,
            primary_ns: root_name(),
            responsible_email: root_name(),
            serial: Serial(0),
            refresh: 0,
            retry: 0,
            expire: 0,
            minimum: 0,
        }
    }
}

/// The root name (`.`), used as a stand-in for a primary-NS/email that has
/// never been learned, matching NSD's own null-pointer-means-root fallback
/// in `xfrd_write_soa_buffer`.
pub fn root_name() -> Name<Bytes> {
    Name::from_str(".").expect("\".\" is a valid domain name")
}

/// A SOA snapshot together with the moment (in seconds since the Unix
/// epoch) it was recorded.
///
/// An `acquired` of `0` means the snapshot has never been populated; its
/// other fields must not be read in that case.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimedSoa {
    pub acquired: u64,
    pub soa: SoaSnapshot,
}

impl TimedSoa {
    pub fn never() -> TimedSoa {
        TimedSoa {
            acquired: 0,
            soa: SoaSnapshot::zero(),
        }
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired != 0
    }
}

impl Default for TimedSoa {
    fn default() -> Self {
        Self::never()
    }
}

/// Compare two serial numbers using RFC 1982 serial-number arithmetic.
///
/// Returns a positive value if `new` is strictly newer than `old`, zero if
/// they are equal, and a negative value if `new` is older (or the
/// comparison is undefined, per RFC 1982 §3.2, in which case `new` is
/// conservatively treated as not-newer).
pub fn compare_serial(old: Serial, new: Serial) -> i64 {
    match new.partial_cmp(&old) {
        Some(std::cmp::Ordering::Greater) => 1,
        Some(std::cmp::Ordering::Equal) => 0,
        _ => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_serial_wins() {
        let old = Serial(100);
        let new = Serial(105);
        assert!(compare_serial(old, new) > 0);
        assert!(compare_serial(new, old) < 0);
        assert_eq!(compare_serial(old, old), 0);
    }

    #[test]
    fn serial_wraps_around() {
        // RFC 1982 example: 2^32 - 1 is "older" than 0.
        let old = Serial(u32::MAX);
        let new = Serial(0);
        assert!(compare_serial(old, new) > 0);
    }

    #[test]
    fn zero_snapshot_uses_root_names() {
        let soa = SoaSnapshot::zero();
        assert_eq!(soa.primary_ns, root_name());
        assert_eq!(soa.responsible_email, root_name());
    }
}
