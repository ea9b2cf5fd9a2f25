//! The persisted, line-oriented state file: per-zone SOA snapshots and
//! timer offsets, read at startup and written at shutdown.
//!
//! This is deliberately not a `serde`/TOML document (unlike the
//! configuration file): it mirrors the line-oriented, whitespace-tokenized,
//! corruption-tolerant format the coordinator inherits its semantics from,
//! down to the specific tolerances in [`read`].

use std::io::Write as _;
use std::str::FromStr;

use camino::Utf8Path;
use domain::base::iana::{Class, Rtype};
use domain::base::Serial;

use crate::soa::{SoaSnapshot, TimedSoa};
use crate::util;
use crate::zone::{Registry, StoredName, TransferState};

const MAGIC: &str = "; zonexfrd state file v1";

/// How far into the future a persisted timestamp may read before the file
/// is considered corrupt.
const FUTURE_SKEW_TOLERANCE_SECS: u64 = 15;

/// One zone's persisted record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZoneRecord {
    pub name: String,
    pub status: TransferState,
    pub master: usize,
    pub next_timeout: u64,
    pub soa_nsd: TimedSoa,
    pub soa_disk: TimedSoa,
    pub soa_notified: TimedSoa,
}

/// The parsed contents of a state file.
#[derive(Clone, Debug, Default)]
pub struct State {
    pub filetime: u64,
    pub zones: Vec<ZoneRecord>,
}

/// Whether a state file was read cleanly or showed signs of corruption.
///
/// A corrupt file is not rejected outright: whatever was parsed before the
/// corruption was noticed is still returned, on the theory that a partial
/// state beats discarding everything and refreshing every zone from
/// scratch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Clean,
    Corrupt,
}

/// An error encountered while reading or writing the state file.
#[derive(Debug)]
pub enum StateFileError {
    Io(std::io::Error),
}

impl StateFileError {
    /// Whether this error is "the file doesn't exist yet", the one case the
    /// caller treats as a cold start rather than a failure.
    pub fn is_not_found(&self) -> bool {
        match self {
            StateFileError::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
        }
    }
}

impl From<std::io::Error> for StateFileError {
    fn from(err: std::io::Error) -> Self {
        StateFileError::Io(err)
    }
}

impl std::fmt::Display for StateFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateFileError::Io(err) => write!(f, "state file I/O error: {err}"),
        }
    }
}

impl std::error::Error for StateFileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StateFileError::Io(err) => Some(err),
        }
    }
}

/// Write the registry's current state to `path`, atomically.
pub fn write(path: &Utf8Path, registry: &Registry) -> Result<(), StateFileError> {
    let mut out = Vec::new();
    writeln!(out, "{MAGIC}")?;
    writeln!(out, "filetime: {}", util::now_secs())?;
    writeln!(out, "numzones: {}", registry.len())?;

    for zone in registry.iter() {
        let state = zone.state.lock().unwrap();
        writeln!(out, "zone:")?;
        writeln!(out, "  name: {}", zone.apex_str)?;
        writeln!(out, "  state: {}", status_code(state.status))?;
        writeln!(out, "  master: {}", state.current_master)?;
        writeln!(out, "  next_timeout: {}  # {}", state.timer_at, describe_epoch(state.timer_at))?;
        write_timed_soa(&mut out, "soa_nsd", &state.soa_nsd)?;
        write_timed_soa(&mut out, "soa_disk", &state.soa_disk)?;
        write_timed_soa(&mut out, "soa_notify", &state.soa_notified)?;
    }

    writeln!(out, "{MAGIC}")?;
    util::write_file(path, &out)
}

fn write_timed_soa(out: &mut Vec<u8>, label: &str, timed: &TimedSoa) -> Result<(), StateFileError> {
    if !timed.is_acquired() {
        return Ok(());
    }
    writeln!(
        out,
        "  {label}_acquired: {}  # {}",
        timed.acquired,
        describe_epoch(timed.acquired)
    )?;
    let soa = &timed.soa;
    writeln!(
        out,
        "  {label}: {rtype} {class} {ttl} {rdcount} {primary} {email} {serial} {refresh} {retry} {expire} {minimum}",
        rtype = soa.rtype.to_int(),
        class = soa.class.to_int(),
        ttl = soa.ttl,
        rdcount = soa.rdata_count,
        primary = soa.primary_ns,
        email = soa.responsible_email,
        serial = soa.serial.0,
        refresh = soa.refresh,
        retry = soa.retry,
        expire = soa.expire,
        minimum = soa.minimum,
    )?;
    Ok(())
}

fn status_code(status: TransferState) -> u8 {
    match status {
        TransferState::Ok => 0,
        TransferState::Refreshing => 1,
        TransferState::Expired => 2,
    }
}

fn status_from_code(code: u8) -> TransferState {
    match code {
        0 => TransferState::Ok,
        2 => TransferState::Expired,
        _ => TransferState::Refreshing,
    }
}

fn describe_epoch(epoch: u64) -> String {
    let now = util::now_secs();
    if epoch == 0 {
        return "never".to_string();
    }
    let delta = epoch.abs_diff(now);
    let days = delta / 86400;
    let hours = (delta % 86400) / 3600;
    let minutes = (delta % 3600) / 60;
    let secs = delta % 60;
    let verb = if epoch >= now { "in" } else { "ago" };
    format!("{days}d{hours:02}h{minutes:02}m{secs:02}s {verb}")
}

/// Read and parse a state file, tolerating a corrupt or truncated file by
/// returning what could be salvaged.
pub fn read(path: &Utf8Path) -> Result<(State, ReadOutcome), StateFileError> {
    let text = std::fs::read_to_string(path)?;
    let mut lines = text.lines().peekable();
    let now = util::now_secs();

    let Some(first) = lines.next() else {
        return Ok((State::default(), ReadOutcome::Corrupt));
    };
    if first.trim() != MAGIC {
        return Ok((State::default(), ReadOutcome::Corrupt));
    }

    let mut state = State::default();
    let mut corrupt = false;

    let Some(filetime) = lines.next().and_then(|l| parse_kv(l, "filetime")) else {
        return Ok((state, ReadOutcome::Corrupt));
    };
    state.filetime = filetime;
    if filetime > now + FUTURE_SKEW_TOLERANCE_SECS {
        corrupt = true;
    }

    let Some(numzones) = lines.next().and_then(|l| parse_kv(l, "numzones")) else {
        return Ok((state, ReadOutcome::Corrupt));
    };

    for _ in 0..numzones {
        match read_zone_block(&mut lines, now) {
            Some((record, zone_corrupt)) => {
                corrupt |= zone_corrupt;
                state.zones.push(record);
            }
            None => {
                corrupt = true;
                break;
            }
        }
    }

    match lines.next() {
        Some(line) if line.trim() == MAGIC => {}
        _ => corrupt = true,
    }

    Ok((
        state,
        if corrupt {
            ReadOutcome::Corrupt
        } else {
            ReadOutcome::Clean
        },
    ))
}

fn read_zone_block(
    lines: &mut std::iter::Peekable<std::str::Lines<'_>>,
    now: u64,
) -> Option<(ZoneRecord, bool)> {
    let mut corrupt = false;

    if lines.next()?.trim() != "zone:" {
        return None;
    }
    let name = parse_kv_str(lines.next()?, "name")?;
    let status = status_from_code(parse_kv(lines.next()?, "state")? as u8);
    let master = parse_kv(lines.next()?, "master")? as usize;
    let next_timeout = parse_timestamp_line(lines.next()?, "next_timeout")?;
    if next_timeout > now + FUTURE_SKEW_TOLERANCE_SECS {
        corrupt = true;
    }

    let soa_nsd = read_optional_timed_soa(lines, "soa_nsd", now, &mut corrupt);
    let soa_disk = read_optional_timed_soa(lines, "soa_disk", now, &mut corrupt);
    let soa_notified = read_optional_timed_soa(lines, "soa_notify", now, &mut corrupt);

    Some((
        ZoneRecord {
            name,
            status,
            master,
            next_timeout,
            soa_nsd,
            soa_disk,
            soa_notified,
        },
        corrupt,
    ))
}

fn read_optional_timed_soa(
    lines: &mut std::iter::Peekable<std::str::Lines<'_>>,
    label: &str,
    now: u64,
    corrupt: &mut bool,
) -> TimedSoa {
    let acquired_key = format!("{label}_acquired");
    let Some(&peeked) = lines.peek().as_ref() else {
        return TimedSoa::never();
    };
    let Some(acquired) = parse_timestamp_line(peeked, &acquired_key) else {
        return TimedSoa::never();
    };
    lines.next();
    if acquired > now + FUTURE_SKEW_TOLERANCE_SECS {
        *corrupt = true;
    }

    let Some(soa_line) = lines.next() else {
        *corrupt = true;
        return TimedSoa::never();
    };
    let Some(soa) = parse_soa_line(soa_line, label) else {
        *corrupt = true;
        return TimedSoa::never();
    };

    TimedSoa { acquired, soa }
}

fn parse_kv(line: &str, key: &str) -> Option<u64> {
    parse_kv_str(line, key)?.parse().ok()
}

fn parse_kv_str(line: &str, key: &str) -> Option<String> {
    let line = strip_comment(line).trim();
    let rest = line.strip_prefix(key)?.trim_start();
    let rest = rest.strip_prefix(':')?.trim();
    Some(rest.to_string())
}

/// Like [`parse_kv`], but the value is the first whitespace-delimited token
/// (a trailing human-readable comment may follow it, already stripped).
fn parse_timestamp_line(line: &str, key: &str) -> Option<u64> {
    parse_kv_str(line, key)?.split_whitespace().next()?.parse().ok()
}

fn parse_soa_line(line: &str, label: &str) -> Option<SoaSnapshot> {
    let line = strip_comment(line).trim();
    let rest = line.strip_prefix(label)?.trim_start();
    let rest = rest.strip_prefix(':')?.trim();
    let mut tokens = rest.split_whitespace();

    let rtype = Rtype::from_int(tokens.next()?.parse().ok()?);
    let class = Class::from_int(tokens.next()?.parse().ok()?);
    let ttl: u32 = tokens.next()?.parse().ok()?;
    let rdata_count: u16 = tokens.next()?.parse().ok()?;
    let primary_ns = parse_name_token(tokens.next()?)?;
    let responsible_email = parse_name_token(tokens.next()?)?;
    let serial: u32 = tokens.next()?.parse().ok()?;
    let refresh: u32 = tokens.next()?.parse().ok()?;
    let retry: u32 = tokens.next()?.parse().ok()?;
    let expire: u32 = tokens.next()?.parse().ok()?;
    let minimum: u32 = tokens.next()?.parse().ok()?;

    Some(SoaSnapshot {
        rtype,
        class,
        ttl,
        rdata_count,
        primary_ns,
        responsible_email,
        serial: Serial(serial),
        refresh,
        retry,
        expire,
        minimum,
    })
}

fn parse_name_token(token: &str) -> Option<StoredName> {
    StoredName::from_str(token).ok()
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// Map the records in a freshly-read [`State`] onto a live [`Registry`],
/// per the startup rehydration rules: unknown zones are skipped, an
/// out-of-range master index falls back to `0`, and a zone whose persisted
/// timers already demand attention is set refreshing (or expired)
/// immediately rather than waiting for its stale `next_timeout`.
pub fn apply_to_registry(state: &State, registry: &Registry) {
    let now = util::now_secs();

    for record in &state.zones {
        let Ok(name) = record.name.parse() else {
            continue;
        };
        let Some(zone) = registry.get(&name) else {
            continue;
        };

        let mut zstate = zone.state.lock().unwrap();
        if record.master < zstate.masters.len() {
            zstate.current_master = record.master;
        } else {
            zstate.current_master = 0;
        }

        zstate.soa_nsd = record.soa_nsd.clone();
        zstate.soa_disk = record.soa_disk.clone();
        zstate.soa_notified = record.soa_notified.clone();
        zstate.timer_at = record.next_timeout;
        zstate.status = record.status;

        let overdue_for_refresh = record.soa_disk.is_acquired()
            && record.next_timeout.saturating_sub(record.soa_disk.acquired)
                > record.soa_disk.soa.refresh as u64;

        if overdue_for_refresh || record.soa_notified.is_acquired() || zstate.timer_at <= now {
            zstate.status = TransferState::Refreshing;
            zstate.timer_at = now;
        }

        if zstate.soa_disk.is_acquired() {
            let expire = zstate.soa_disk.soa.expire as u64;
            if now.saturating_sub(zstate.soa_disk.acquired) > expire {
                zstate.status = TransferState::Expired;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::Zone;
    use std::str::FromStr;
    use std::sync::Arc;

    fn sample_registry() -> Registry {
        let mut registry = Registry::new();
        let zone = Zone::new(
            domain::base::Name::from_str("example.com.").unwrap(),
            vec![std::net::SocketAddr::from(([192, 0, 2, 1], 53))],
        );
        {
            let mut state = zone.state.lock().unwrap();
            state.status = TransferState::Ok;
            state.timer_at = 1_700_003_600;
            state.soa_disk = TimedSoa {
                acquired: 1_700_000_000,
                soa: SoaSnapshot {
                    rtype: Rtype::SOA,
                    class: Class::IN,
                    ttl: 3600,
                    rdata_count: 22,
                    primary_ns: domain::base::Name::from_str("ns1.example.com.").unwrap(),
                    responsible_email: domain::base::Name::from_str("hostmaster.example.com.")
                        .unwrap(),
                    serial: Serial(42),
                    refresh: 3600,
                    retry: 900,
                    expire: 1_209_600,
                    minimum: 300,
                },
            };
        }
        registry.insert(Arc::new(zone));
        registry
    }

    #[test]
    fn round_trip_preserves_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap().join("state");
        let registry = sample_registry();

        write(&path, &registry).unwrap();
        let (state, outcome) = read(&path).unwrap();

        assert_eq!(outcome, ReadOutcome::Clean);
        assert_eq!(state.zones.len(), 1);
        let record = &state.zones[0];
        assert_eq!(record.name, "example.com.");
        assert_eq!(record.status, TransferState::Ok);
        assert_eq!(record.soa_disk.soa.serial, Serial(42));
        assert_eq!(record.soa_disk.soa.refresh, 3600);
        assert!(!record.soa_nsd.is_acquired());
    }

    #[test]
    fn missing_trailing_magic_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap().join("state");
        let registry = sample_registry();
        write(&path, &registry).unwrap();

        let mut text = std::fs::read_to_string(&path).unwrap();
        // Truncate right before the closing magic line.
        let cut = text.rfind(MAGIC).unwrap();
        text.truncate(cut);
        std::fs::write(&path, text).unwrap();

        let (_, outcome) = read(&path).unwrap();
        assert_eq!(outcome, ReadOutcome::Corrupt);
    }

    #[test]
    fn future_filetime_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap().join("state");
        let text = format!(
            "{MAGIC}\nfiletime: {}\nnumzones: 0\n{MAGIC}\n",
            util::now_secs() + 10_000
        );
        std::fs::write(&path, text).unwrap();

        let (_, outcome) = read(&path).unwrap();
        assert_eq!(outcome, ReadOutcome::Corrupt);
    }

    #[test]
    fn unknown_zone_in_file_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap().join("state");
        let registry = sample_registry();
        write(&path, &registry).unwrap();

        let (state, _) = read(&path).unwrap();
        let empty_registry = Registry::new();
        apply_to_registry(&state, &empty_registry);
        // No panic, nothing to assert beyond "this didn't blow up": the
        // configured registry simply has no zones to rehydrate into.
    }
}
