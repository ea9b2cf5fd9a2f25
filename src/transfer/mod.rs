//! The transfer engine: UDP probes, TCP fetches, and validating what comes
//! back.

pub mod tcp;
pub mod udp;
pub mod validate;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::difflog::DiffLog;
use crate::zone::{Activity, Zone};

/// What a single attempt (one UDP probe, or one TCP transfer) resulted in.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// The zone is now current. `committed` is true when a new serial was
    /// actually written to the diff log, meaning the parent process needs
    /// to be told to reload; false means the master just confirmed the
    /// serial we already had.
    Settled { committed: bool },
    /// A UDP probe came back truncated or otherwise incomplete; the zone
    /// should immediately be handed to the TCP engine against the same
    /// master.
    NeedsTcp,
    /// The attempt failed outright (timeout, malformed reply, I/O error);
    /// caller should run retry scheduling.
    Failed,
}

/// Run one UDP IXFR probe for `zone` and process whatever comes back.
pub async fn attempt_udp(zone: &Arc<Zone>, diff_log: &dyn DiffLog) -> AttemptOutcome {
    let query_id = udp::new_query_id();
    let (apex, master, soa_disk, deadline) = {
        let mut state = zone.state.lock().unwrap();
        state.activity = Activity::Udp { query_id };
        (
            zone.apex.clone(),
            state.master(),
            state.soa_disk.soa.clone(),
            udp::jittered_t0(),
        )
    };

    match udp::probe(&apex, master, query_id, &soa_disk, deadline).await {
        udp::ProbeResult::Reply(msg) => {
            match validate::validate_and_commit(zone, &msg, query_id, diff_log) {
                validate::Outcome::Unchanged => AttemptOutcome::Settled { committed: false },
                validate::Outcome::Committed { .. } => AttemptOutcome::Settled { committed: true },
                validate::Outcome::PromoteToTcp => AttemptOutcome::NeedsTcp,
                validate::Outcome::Stale | validate::Outcome::Malformed(_) => {
                    AttemptOutcome::Failed
                }
            }
        }
        udp::ProbeResult::Timeout => {
            info!(zone = %zone.apex_str, "UDP probe timed out");
            AttemptOutcome::Failed
        }
        udp::ProbeResult::Error(err) => {
            warn!(zone = %zone.apex_str, %err, "UDP probe errored");
            AttemptOutcome::Failed
        }
    }
}

/// Run one TCP transfer for `zone` against its current master.
pub async fn attempt_tcp(zone: &Arc<Zone>, timeout: Duration, diff_log: &dyn DiffLog) -> AttemptOutcome {
    let (apex, master, soa_disk, query_id) = {
        let state = zone.state.lock().unwrap();
        let soa_disk = state.soa_disk.is_acquired().then(|| state.soa_disk.soa.clone());
        (zone.apex.clone(), state.master(), soa_disk, udp::new_query_id())
    };

    match tcp::transfer(&apex, master, query_id, soa_disk.as_ref(), timeout).await {
        tcp::TransferResult::Reply(msg) => {
            match validate::validate_and_commit(zone, &msg, query_id, diff_log) {
                validate::Outcome::Unchanged => AttemptOutcome::Settled { committed: false },
                validate::Outcome::Committed { .. } => AttemptOutcome::Settled { committed: true },
                // A TCP reply that is itself truncated or too-short-to-be-
                // real indicates the master (or our parsing) is confused;
                // there's nowhere further to escalate to, so it's a
                // failure, to be retried like any other.
                validate::Outcome::PromoteToTcp
                | validate::Outcome::Stale
                | validate::Outcome::Malformed(_) => AttemptOutcome::Failed,
            }
        }
        tcp::TransferResult::Failed(err) => {
            warn!(zone = %zone.apex_str, %err, "TCP transfer failed");
            AttemptOutcome::Failed
        }
    }
}
