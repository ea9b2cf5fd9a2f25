//! Validation and commit of a received AXFR/IXFR reply.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::difflog::DiffLog;
use crate::soa::compare_serial;
use crate::util;
use crate::wire;
use crate::zone::{Activity, TransferState, Zone};

/// The result of validating one reply message against a zone's current
/// state. Any failure variant means the message is dropped and the zone's
/// current activity (if any) should be abandoned without further effect.
#[derive(Debug)]
pub enum Outcome {
    /// The master's serial matches what we already have; no transfer
    /// needed. The zone returns to `Ok` with its refresh timer reset.
    Unchanged,
    /// A full reply was validated and committed to the diff log. Carries
    /// the new serial now on disk.
    Committed { serial: u32 },
    /// The reply (over UDP) was too big and got truncated; promote the
    /// zone to a TCP transfer against the same master.
    PromoteToTcp,
    /// The serial offered is not newer than what's already on disk.
    Stale,
    /// The reply failed structural or protocol validation.
    Malformed(&'static str),
}

/// Validate `msg` as a reply to the outstanding query on `zone`, and, if it
/// represents a complete transfer, commit it to `diff_log`.
///
/// The caller is responsible for requesting a reload from the parent
/// process when this returns [`Outcome::Committed`]; that requires the
/// single shared IPC channel, which does not travel into per-zone transfer
/// tasks (see [`crate::coordinator`]).
pub fn validate_and_commit(zone: &Arc<Zone>, msg: &[u8], expected_query_id: u16, diff_log: &dyn DiffLog) -> Outcome {
    let Some(header) = wire::parse_header(msg) else {
        warn!(zone = %zone.apex_str, "reply too short to contain a header");
        return Outcome::Malformed("short header");
    };

    if header.id != expected_query_id {
        warn!(zone = %zone.apex_str, got = header.id, want = expected_query_id, "query ID mismatch");
        return Outcome::Malformed("id mismatch");
    }

    if header.rcode != domain::base::iana::Rcode::NOERROR {
        info!(zone = %zone.apex_str, rcode = ?header.rcode, "master rejected transfer request");
        return Outcome::Malformed("non-zero rcode");
    }

    let Some(after_questions) = wire::skip_questions(msg, 12, header.qdcount) else {
        return Outcome::Malformed("bad question section");
    };

    if header.ancount == 0 {
        return Outcome::Malformed("no answer records");
    }

    let Some(first) = wire::parse_first_answer_soa(msg, after_questions) else {
        return Outcome::Malformed("first answer is not a SOA");
    };

    let now = util::now_secs();
    let new_serial = first.soa.serial;

    let mut state = zone.state.lock().unwrap();

    if state.soa_disk.is_acquired() {
        match compare_serial(state.soa_disk.soa.serial, new_serial) {
            diff if diff < 0 => {
                info!(zone = %zone.apex_str, "master offered a stale serial, ignoring");
                return Outcome::Stale;
            }
            0 => {
                // Serial unchanged. This guard preserves a pending
                // notification: if one is outstanding, the disk SOA's
                // acquired time is deliberately left untouched so the
                // notification is not silently treated as satisfied.
                if !state.soa_notified.is_acquired() {
                    state.soa_disk.acquired = now;
                    if state.soa_nsd.is_acquired() && state.soa_nsd.soa.serial == new_serial {
                        state.soa_nsd.acquired = now;
                    }
                }
                state.status = TransferState::Ok;
                state.timer_at = now + state.soa_disk.soa.refresh as u64;
                state.activity = Activity::Idle;
                return Outcome::Unchanged;
            }
            _ => {}
        }
    }

    if header.tc {
        debug!(zone = %zone.apex_str, "UDP reply truncated, promoting to TCP");
        return Outcome::PromoteToTcp;
    }

    if header.ancount < 2 {
        // A single-SOA reply with a genuinely newer serial over UDP means
        // the real answer didn't fit; the master should have set TC, but
        // some implementations don't. Treat it the same way.
        debug!(zone = %zone.apex_str, "single-SOA reply with newer serial, promoting to TCP");
        return Outcome::PromoteToTcp;
    }

    drop(state);

    if let Err(err) = diff_log.write_packet(&zone.apex_str, new_serial.0, msg) {
        warn!(zone = %zone.apex_str, %err, "failed to append transfer to diff log");
        return Outcome::Malformed("diff log write failed");
    }
    if let Err(err) = diff_log.write_commit(&zone.apex_str, new_serial.0, "xfr") {
        warn!(zone = %zone.apex_str, %err, "failed to append commit record");
        return Outcome::Malformed("diff log commit failed");
    }

    let mut state = zone.state.lock().unwrap();
    state.soa_disk.acquired = now;
    state.soa_disk.soa.serial = new_serial;
    state.status = TransferState::Ok;
    state.timer_at = now + state.soa_disk.soa.refresh as u64;
    state.activity = Activity::Idle;
    drop(state);

    info!(zone = %zone.apex_str, serial = new_serial.0, "committed zone transfer");
    Outcome::Committed { serial: new_serial.0 }
}
