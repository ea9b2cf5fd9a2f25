//! The diff log: the append-only record of zone data the authoritative
//! server picks up and reloads from.
//!
//! The exact on-disk representation is owned by the authoritative server
//! this coordinator is embedded in; here it is an external collaborator
//! reached through a narrow trait, with a simple file-backed implementation
//! usable standalone.

use camino::Utf8Path;

use crate::util;

/// Where received transfer data and commit markers are recorded.
pub trait DiffLog: Send + Sync {
    /// Append the raw bytes of one transfer reply, associated with `zone`
    /// and the serial it carries.
    fn write_packet(&self, zone: &str, serial: u32, bytes: &[u8]) -> Result<(), DiffLogError>;

    /// Mark a transfer as fully committed, so the authoritative server
    /// knows it may reload up to (and including) `serial`.
    fn write_commit(&self, zone: &str, serial: u32, comment: &str) -> Result<(), DiffLogError>;
}

/// An error encountered while appending to a diff log.
#[derive(Debug)]
pub enum DiffLogError {
    Io(std::io::Error),
}

impl From<std::io::Error> for DiffLogError {
    fn from(err: std::io::Error) -> Self {
        DiffLogError::Io(err)
    }
}

impl std::fmt::Display for DiffLogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiffLogError::Io(err) => write!(f, "diff log I/O error: {err}"),
        }
    }
}

impl std::error::Error for DiffLogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DiffLogError::Io(err) => Some(err),
        }
    }
}

/// A [`DiffLog`] that appends human-readable records to a single file.
#[derive(Debug)]
pub struct FileDiffLog {
    path: camino::Utf8PathBuf,
}

impl FileDiffLog {
    pub fn new(path: impl Into<camino::Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl DiffLog for FileDiffLog {
    fn write_packet(&self, zone: &str, serial: u32, bytes: &[u8]) -> Result<(), DiffLogError> {
        let mut record = format!("packet: {zone} {serial} {}\n", bytes.len()).into_bytes();
        record.extend_from_slice(bytes);
        record.push(b'\n');
        util::append_file(self.path(), &record)?;
        Ok(())
    }

    fn write_commit(&self, zone: &str, serial: u32, comment: &str) -> Result<(), DiffLogError> {
        let record = format!("commit: {zone} {serial} 1 {comment}\n");
        util::append_file(self.path(), record.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_appended_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8Path::from_path(dir.path()).unwrap().join("ixfr.db");
        let log = FileDiffLog::new(path.clone());

        log.write_packet("example.com.", 10, b"\x00\x01").unwrap();
        log.write_commit("example.com.", 10, "ixfr").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("packet: example.com. 10 2\n"));
        assert!(contents.contains("commit: example.com. 10 1 ixfr\n"));
    }
}
