//! The event dispatcher: a single-threaded, event-driven loop tying the
//! zone registry, transfer engine, and parent IPC channel together.
//!
//! The "single thread, handlers run to completion between iterations"
//! discipline of the design is realized here as a `tokio::select!` loop on
//! a `current_thread` runtime: the only concurrency is cooperative task
//! scheduling around `.await` points, never true parallelism.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::difflog::DiffLog;
use crate::ipc::{self, Command, Event};
use crate::pool::TcpPool;
use crate::retry;
use crate::transfer::{self, AttemptOutcome};
use crate::util;
use crate::zone::{Activity, Registry, TransferState, Zone};

/// What kind of attempt a finished task was running, so its result can be
/// routed back to the right follow-up logic.
enum Kind {
    Udp,
    Tcp,
}

/// A finished attempt task's result.
struct Finished {
    zone: Arc<Zone>,
    kind: Kind,
    outcome: AttemptOutcome,
}

/// Ties together the registry, TCP pool, diff log, and parent IPC channel
/// into the running coordinator.
pub struct Coordinator {
    pub registry: Registry,
    pool: Mutex<TcpPool>,
    diff_log: Arc<dyn DiffLog>,
    tcp_timeout: Duration,
}

impl Coordinator {
    pub fn new(registry: Registry, pool_capacity: usize, tcp_timeout: Duration, diff_log: Arc<dyn DiffLog>) -> Self {
        Self {
            registry,
            pool: Mutex::new(TcpPool::new(pool_capacity)),
            diff_log,
            tcp_timeout,
        }
    }

    /// Run the dispatcher loop until shutdown is requested over `channel`.
    pub async fn run(&self, mut channel: ipc::Channel) {
        let mut tasks: JoinSet<Finished> = JoinSet::new();

        loop {
            let wakeup = self.next_wakeup();

            tokio::select! {
                _ = sleep_until(wakeup) => {
                    self.dispatch_due_zones(&mut tasks, &mut channel);
                }

                event = channel.recv() => {
                    match event {
                        Ok(Event::Command(Command::Quit | Command::Shutdown)) | Ok(Event::Eof) => {
                            info!("shutdown requested, stopping dispatcher");
                            break;
                        }
                        Ok(Event::Unknown(byte)) => {
                            warn!(byte, "ignoring unrecognized parent command");
                        }
                        Err(err) => {
                            warn!(%err, "parent IPC channel errored, shutting down");
                            break;
                        }
                    }
                }

                Some(result) = tasks.join_next() => {
                    match result {
                        Ok(finished) => self.handle_finished(finished, &mut tasks, &mut channel).await,
                        Err(err) => warn!(%err, "transfer task panicked"),
                    }
                }
            }
        }

        // Drain whatever is still running; nothing further is awaited on
        // the results since the process is on its way out.
        tasks.abort_all();
    }

    /// The nearest timer among idle zones, or a conservative fallback if
    /// every zone is currently busy (so the loop still wakes periodically
    /// to re-check, rather than relying solely on task completions).
    fn next_wakeup(&self) -> tokio::time::Instant {
        let now = util::now_secs();
        let mut earliest: Option<u64> = None;

        for zone in self.registry.iter() {
            let state = zone.state.lock().unwrap();
            if matches!(state.activity, Activity::Idle) {
                earliest = Some(earliest.map_or(state.timer_at, |e| e.min(state.timer_at)));
            }
        }

        let target = earliest.unwrap_or(now + 5);
        let delay = target.saturating_sub(now);
        tokio::time::Instant::now() + Duration::from_secs(delay)
    }

    fn dispatch_due_zones(&self, tasks: &mut JoinSet<Finished>, channel: &mut ipc::Channel) {
        let now = util::now_secs();
        let _ = channel; // reserved for future use (e.g. logging sink)

        for zone in self.registry.iter() {
            let (due, cold) = {
                let state = zone.state.lock().unwrap();
                (
                    matches!(state.activity, Activity::Idle) && state.timer_at <= now,
                    !state.soa_disk.is_acquired(),
                )
            };
            if !due {
                continue;
            }

            // A zone with no acquired disk SOA has nothing an IXFR probe
            // could diff against, so it goes straight to a full AXFR over
            // TCP instead of wasting a UDP round trip, subject to the same
            // pool limit as any other TCP transfer.
            if cold {
                let wants_slot = {
                    let mut pool = self.pool.lock().unwrap();
                    pool.obtain(zone.apex.clone())
                };
                let mut state = zone.state.lock().unwrap();
                if wants_slot {
                    state.activity = Activity::Tcp { slot: 0 };
                    drop(state);
                    self.start_tcp(Arc::clone(zone), tasks);
                } else {
                    state.activity = Activity::Waiting;
                }
            } else {
                self.start_udp(Arc::clone(zone), tasks);
            }
        }
    }

    fn start_udp(&self, zone: Arc<Zone>, tasks: &mut JoinSet<Finished>) {
        debug!(zone = %zone.apex_str, "starting UDP probe");
        let log = self.diff_log_handle();
        tasks.spawn(async move {
            let outcome = transfer::attempt_udp(&zone, log.as_ref()).await;
            Finished {
                zone,
                kind: Kind::Udp,
                outcome,
            }
        });
    }

    fn start_tcp(&self, zone: Arc<Zone>, tasks: &mut JoinSet<Finished>) {
        {
            let mut state = zone.state.lock().unwrap();
            state.activity = Activity::Tcp { slot: 0 };
        }
        debug!(zone = %zone.apex_str, "starting TCP transfer");
        let log = self.diff_log_handle();
        let timeout = self.tcp_timeout;
        tasks.spawn(async move {
            let outcome = transfer::attempt_tcp(&zone, timeout, log.as_ref()).await;
            Finished {
                zone,
                kind: Kind::Tcp,
                outcome,
            }
        });
    }

    async fn handle_finished(
        &self,
        finished: Finished,
        tasks: &mut JoinSet<Finished>,
        channel: &mut ipc::Channel,
    ) {
        let Finished { zone, kind, outcome } = finished;
        let now = util::now_secs();

        if matches!(kind, Kind::Tcp) {
            self.release_tcp_slot(tasks);
        }

        match outcome {
            AttemptOutcome::Settled { committed } => {
                let mut state = zone.state.lock().unwrap();
                retry::schedule_after_commit(&mut state, now);
                state.activity = Activity::Idle;
                drop(state);
                if committed {
                    if let Err(err) = channel.request_reload().await {
                        warn!(zone = %zone.apex_str, %err, "failed to notify parent of commit");
                    }
                }
            }
            AttemptOutcome::NeedsTcp => {
                let wants_slot = {
                    let mut pool = self.pool.lock().unwrap();
                    pool.obtain(zone.apex.clone())
                };
                if wants_slot {
                    zone.state.lock().unwrap().activity = Activity::Tcp { slot: 0 };
                    self.start_tcp(zone, tasks);
                } else {
                    zone.state.lock().unwrap().activity = Activity::Waiting;
                }
            }
            AttemptOutcome::Failed => {
                let mut state = zone.state.lock().unwrap();
                let freshly_expired = retry::schedule_after_failure(&mut state, now);
                state.activity = Activity::Idle;
                drop(state);
                if freshly_expired {
                    self.notify_expiry(&zone);
                }
            }
        }
    }

    /// Tell the parent process a NOTIFY should go out to `zone`'s
    /// secondaries. A stub matching the source's hook of the same name;
    /// wiring it to a real NOTIFY sender is future work.
    pub fn notify_master(&self, zone: &Zone) {
        info!(zone = %zone.apex_str, "would send NOTIFY to configured masters (not wired up)");
    }

    /// Tell the parent process `zone` has passed its expire timer without a
    /// successful transfer. Called exactly once, at the REFRESHING →
    /// EXPIRED transition.
    pub fn notify_expiry(&self, zone: &Zone) {
        warn!(zone = %zone.apex_str, "zone has expired without a successful transfer");
    }

    /// Re-derive a zone's state transition after the authoritative server
    /// reports it has now loaded the serial already on disk (`soa_nsd`
    /// catches up to `soa_disk`), rather than leaving the state untouched.
    ///
    /// In a full integration this is invoked from the parent IPC's
    /// reload-acknowledgement reply; the minimal IPC stub here doesn't carry
    /// one, so this is reachable and tested but not called from [`Self::run`].
    pub fn on_nsd_caught_up(&self, zone: &Zone, now: u64) {
        let mut state = zone.state.lock().unwrap();
        state.soa_nsd = state.soa_disk.clone();

        if !state.soa_disk.is_acquired() {
            return;
        }

        let expire_at = state.soa_disk.acquired + state.soa_disk.soa.expire as u64;
        state.status = if now >= expire_at {
            TransferState::Expired
        } else if now >= state.soa_disk.acquired + state.soa_disk.soa.refresh as u64 {
            TransferState::Refreshing
        } else {
            TransferState::Ok
        };
    }

    /// Release a TCP slot and, if another zone was parked waiting for one,
    /// start its transfer with the slot handed straight to it.
    fn release_tcp_slot(&self, tasks: &mut JoinSet<Finished>) {
        let next = {
            let mut pool = self.pool.lock().unwrap();
            pool.release()
        };
        if let Some(name) = next {
            if let Some(zone) = self.registry.get(&name).cloned() {
                self.start_tcp(zone, tasks);
            }
        }
    }

    fn diff_log_handle(&self) -> Arc<dyn DiffLog> {
        // `diff_log` is immutable for the coordinator's lifetime, so a
        // cheap `Arc` clone is all each spawned task needs.
        Arc::clone(&self.diff_log)
    }
}

async fn sleep_until(instant: tokio::time::Instant) {
    tokio::time::sleep_until(instant).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::difflog::FileDiffLog;
    use crate::soa::SoaSnapshot;
    use crate::zone::StoredName;
    use domain::base::Serial;
    use std::str::FromStr;

    fn test_coordinator(registry: Registry, pool_capacity: usize) -> Coordinator {
        let dir = tempfile::tempdir().unwrap();
        let log: Arc<dyn DiffLog> = Arc::new(FileDiffLog::new(
            camino::Utf8Path::from_path(dir.path()).unwrap().join("d"),
        ));
        // Leak the tempdir so the diff log file stays alive for the test;
        // these are short-lived unit tests, not long-running processes.
        std::mem::forget(dir);
        Coordinator::new(registry, pool_capacity, Duration::from_secs(10), log)
    }

    fn add_zone(registry: &mut Registry, name: &str) -> Arc<Zone> {
        let apex = StoredName::from_str(name).unwrap();
        let zone = Arc::new(Zone::new(apex, vec![std::net::SocketAddr::from(([192, 0, 2, 1], 53))]));
        registry.insert(Arc::clone(&zone));
        zone
    }

    fn acquired_soa(now: u64, refresh: u32, retry: u32, expire: u32) -> crate::soa::TimedSoa {
        crate::soa::TimedSoa {
            acquired: now,
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
        }
    }

    /// Scenario 1 (generalized by the §4.4/item-2 dispatch gate): a zone
    /// with no acquired disk SOA has nothing to IXFR against, so a due
    /// wakeup routes it straight into the TCP pool rather than firing a
    /// UDP probe.
    #[tokio::test(start_paused = true)]
    async fn cold_zone_dispatches_into_tcp_pool_not_udp() {
        let mut registry = Registry::new();
        let zone = add_zone(&mut registry, "example.com.");
        {
            let mut state = zone.state.lock().unwrap();
            state.timer_at = 0; // already due
        }
        let coordinator = test_coordinator(registry, 8);

        let mut tasks = JoinSet::new();
        let mut channel = ipc::Channel::open(&crate::config::IpcConfig::Disabled).await.unwrap();
        coordinator.dispatch_due_zones(&mut tasks, &mut channel);

        assert!(matches!(
            zone.state.lock().unwrap().activity,
            Activity::Tcp { .. }
        ));
        assert_eq!(coordinator.pool.lock().unwrap().in_use(), 1);
        tasks.abort_all();
    }

    /// A zone with an acquired disk SOA is warm: a due wakeup must not
    /// touch the TCP pool at all (it takes the UDP probe path instead).
    #[tokio::test(start_paused = true)]
    async fn warm_zone_dispatch_leaves_tcp_pool_untouched() {
        let mut registry = Registry::new();
        let zone = add_zone(&mut registry, "example.com.");
        {
            let mut state = zone.state.lock().unwrap();
            state.timer_at = 0;
            state.soa_disk = acquired_soa(util::now_secs(), 3600, 900, 1_209_600);
        }
        let coordinator = test_coordinator(registry, 8);

        let mut tasks = JoinSet::new();
        let mut channel = ipc::Channel::open(&crate::config::IpcConfig::Disabled).await.unwrap();
        coordinator.dispatch_due_zones(&mut tasks, &mut channel);

        assert_eq!(coordinator.pool.lock().unwrap().in_use(), 0);
        assert!(matches!(zone.state.lock().unwrap().activity, Activity::Idle));
        tasks.abort_all();
    }

    /// Scenario 5: a zone capped right at its expire boundary transitions
    /// to EXPIRED on the failure that crosses it, and only then.
    #[tokio::test(start_paused = true)]
    async fn expiry_boundary_transitions_on_crossing_failure() {
        let mut registry = Registry::new();
        let zone = add_zone(&mut registry, "example.com.");
        let now = util::now_secs();
        {
            let mut state = zone.state.lock().unwrap();
            state.soa_disk = acquired_soa(now - 95, 60, 30, 100);
            state.status = TransferState::Refreshing;
        }
        let coordinator = test_coordinator(registry, 8);
        let mut tasks = JoinSet::new();
        let mut channel = ipc::Channel::open(&crate::config::IpcConfig::Disabled).await.unwrap();

        let finished = Finished { zone: Arc::clone(&zone), kind: Kind::Udp, outcome: AttemptOutcome::Failed };
        coordinator.handle_finished(finished, &mut tasks, &mut channel).await;
        assert_eq!(zone.state.lock().unwrap().status, TransferState::Refreshing);

        // `handle_finished` reads the wall clock directly rather than
        // tokio's virtual one, so the next 5 seconds are simulated by
        // moving the reference point back instead of actually sleeping.
        zone.state.lock().unwrap().soa_disk.acquired -= 5;
        let finished = Finished { zone: Arc::clone(&zone), kind: Kind::Udp, outcome: AttemptOutcome::Failed };
        coordinator.handle_finished(finished, &mut tasks, &mut channel).await;
        assert_eq!(zone.state.lock().unwrap().status, TransferState::Expired);

        tasks.abort_all();
    }

    /// Scenario 6: with two slots and three zones wanting TCP at once, the
    /// third waits; when the first zone's slot releases, the third (FIFO
    /// head), not a newcomer, is handed the slot.
    #[tokio::test(start_paused = true)]
    async fn pool_release_serves_fifo_head() {
        let mut registry = Registry::new();
        let a = add_zone(&mut registry, "a.example.");
        let b = add_zone(&mut registry, "b.example.");
        let c = add_zone(&mut registry, "c.example.");

        let coordinator = test_coordinator(registry, 2);
        let mut tasks = JoinSet::new();

        {
            let mut pool = coordinator.pool.lock().unwrap();
            assert!(pool.obtain(a.apex.clone()));
            assert!(pool.obtain(b.apex.clone()));
            assert!(!pool.obtain(c.apex.clone()));
        }
        {
            a.state.lock().unwrap().activity = Activity::Tcp { slot: 0 };
            b.state.lock().unwrap().activity = Activity::Tcp { slot: 0 };
            c.state.lock().unwrap().activity = Activity::Waiting;
        }

        coordinator.release_tcp_slot(&mut tasks);

        assert!(matches!(c.state.lock().unwrap().activity, Activity::Tcp { .. }));
        assert_eq!(coordinator.pool.lock().unwrap().in_use(), 2);
        tasks.abort_all();
    }
}
