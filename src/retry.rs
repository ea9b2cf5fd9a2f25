//! Timer scheduling for the SOA state machine: what the next wakeup should
//! be after a failed attempt, and the expire-boundary capping that keeps a
//! zone from silently sailing past its expire timer while still retrying.

use crate::transfer::udp::T0;
use crate::zone::{TransferState, ZoneState};

/// After a failed attempt (timeout, malformed reply, connection failure),
/// pick the next wakeup and rotate to the next configured master.
///
/// Returns `true` exactly when this call is the one that flips the zone
/// from a non-expired status into `Expired` — the edge the caller should
/// treat as a fresh expiry, worth notifying the parent about exactly once.
pub fn schedule_after_failure(state: &mut ZoneState, now: u64) -> bool {
    state.rotate_master();

    let next = if !state.soa_disk.is_acquired() {
        now + jittered_t0_secs()
    } else {
        let expire_at = state.soa_disk.acquired + state.soa_disk.soa.expire as u64;
        let retry_at = now + state.soa_disk.soa.retry as u64;

        if matches!(state.status, TransferState::Expired) || retry_at < expire_at {
            retry_at
        } else {
            expire_at
        }
    };

    state.timer_at = next;

    let was_expired = matches!(state.status, TransferState::Expired);

    if state.soa_disk.is_acquired() {
        let expire_at = state.soa_disk.acquired + state.soa_disk.soa.expire as u64;
        if now >= expire_at {
            state.status = TransferState::Expired;
        } else {
            state.status = TransferState::Refreshing;
        }
    } else {
        state.status = TransferState::Refreshing;
    }

    !was_expired && matches!(state.status, TransferState::Expired)
}

/// After a successful commit (or an unchanged-serial reply), arm the
/// routine refresh timer.
pub fn schedule_after_commit(state: &mut ZoneState, now: u64) {
    state.status = TransferState::Ok;
    state.timer_at = now + state.soa_disk.soa.refresh as u64;
}

/// Force a zone to refresh immediately, e.g. at startup or when the state
/// file shows it is already overdue.
pub fn schedule_refresh_now(state: &mut ZoneState, now: u64) {
    state.status = TransferState::Refreshing;
    state.timer_at = now;
}

fn jittered_t0_secs() -> u64 {
    // `T0` plus up to one more `T0` of jitter, matching
    // `crate::transfer::udp::jittered_t0`'s range but without requiring an
    // async context or an actual socket deadline here.
    use rand::Rng;
    T0.as_secs() + rand::rng().random_range(0..=T0.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soa::{SoaSnapshot, TimedSoa};
    use domain::base::Serial;

    fn zone_state_with_disk(acquired: u64, refresh: u32, retry: u32, expire: u32) -> ZoneState {
        let mut state = ZoneState::new(vec![std::net::SocketAddr::from(([192, 0, 2, 1], 53))]);
        state.soa_disk = TimedSoa {
            acquired,
            soa: SoaSnapshot {
                rtype: domain::base::iana::Rtype::SOA,
                class: domain::base::iana::Class::IN,
                ttl: 3600,
                rdata_count: 22,
                primary_ns: crate::soa::root_name(),
                responsible_email: crate::soa::root_name(),
                serial: Serial(1),
                refresh,
                retry,
                expire,
                minimum: 300,
            },
        };
        state
    }

    #[test]
    fn cold_start_uses_jittered_t0() {
        let mut state = ZoneState::new(vec![std::net::SocketAddr::from(([192, 0, 2, 1], 53))]);
        let now = 1_000_000;
        schedule_after_failure(&mut state, now);
        assert!(state.timer_at >= now + T0.as_secs());
        assert!(state.timer_at <= now + 2 * T0.as_secs());
        assert_eq!(state.status, TransferState::Refreshing);
    }

    #[test]
    fn retry_is_capped_at_expire_boundary() {
        // refresh=60, retry=30, expire=100, acquired = now-95.
        let now = 1_000_000;
        let mut state = zone_state_with_disk(now - 95, 60, 30, 100);

        schedule_after_failure(&mut state, now);

        // retry_at = now+30, expire_at = acquired+100 = now+5.
        assert_eq!(state.timer_at, now + 5);
    }

    #[test]
    fn past_expire_transitions_to_expired() {
        let now = 1_000_000;
        let mut state = zone_state_with_disk(now - 200, 60, 30, 100);

        let freshly_expired = schedule_after_failure(&mut state, now);

        assert_eq!(state.status, TransferState::Expired);
        assert!(freshly_expired);
    }

    #[test]
    fn repeated_failure_past_expire_does_not_resignal() {
        let now = 1_000_000;
        let mut state = zone_state_with_disk(now - 200, 60, 30, 100);

        assert!(schedule_after_failure(&mut state, now));
        assert!(!schedule_after_failure(&mut state, now + 30));
    }

    #[test]
    fn commit_arms_routine_refresh() {
        let now = 1_000_000;
        let mut state = zone_state_with_disk(now - 10, 3600, 900, 1_209_600);
        schedule_after_commit(&mut state, now);
        assert_eq!(state.status, TransferState::Ok);
        assert_eq!(state.timer_at, now + 3600);
    }
}
