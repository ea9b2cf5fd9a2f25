//! Miscellaneous utilities.

use std::{
    fmt, fs,
    io::{self, Write},
    time::Duration,
};

use camino::Utf8Path;
use serde::{
    Deserializer, Serializer,
    de::{self, Visitor},
};

/// Atomically write a file.
///
/// # Panics
///
/// Panics if `path` does not have a containing directory.
pub fn write_file(path: &Utf8Path, contents: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .expect("'path' must be a file, so it must have a parent");
    fs::create_dir_all(dir)?;

    let mut tmp_file = tempfile::Builder::new().tempfile_in(dir)?;
    tmp_file.as_file_mut().write_all(contents)?;
    let _ = tmp_file.persist(path)?;

    Ok(())
}

/// Append bytes to a file, creating it (and its containing directory) if
/// necessary.
///
/// Unlike [`write_file`], this is not atomic: the diff log is meant to be
/// appended to continuously, so there is no single "new version" to swap in.
pub fn append_file(path: &Utf8Path, contents: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .expect("'path' must be a file, so it must have a parent");
    fs::create_dir_all(dir)?;

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(contents)
}

/// The current time in seconds since the Unix epoch.
///
/// The coordinator only ever compares its own timestamps against each other
/// or against ones it persisted earlier, so the exact epoch does not matter
/// beyond being monotonic with the system clock.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub fn serialize_duration_as_secs<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_secs())
}

pub fn deserialize_duration_from_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct U64Visitor;
    impl<'de> Visitor<'de> for U64Visitor {
        type Value = u64;
        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a u64 unsigned integer value")
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value)
        }
    }
    Ok(Duration::from_secs(
        deserializer.deserialize_u64(U64Visitor)?,
    ))
}
