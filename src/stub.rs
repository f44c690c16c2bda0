//! Persisted snapshots of expensive stages.
//!
//! A stub is a single bincode blob. Nothing here checks that the stub belongs
//! to the current input; callers pass a path that matches the video and
//! detector they run, and delete it when either changes. Concurrent runs must
//! not share a stub path.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::error::Error;

/// Reads a stub, returning `None` if it is absent or unreadable.
pub fn read<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Option<T> {
    let path = path.as_ref();
    if !path.exists() {
        return None;
    }

    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "stub could not be opened");
            return None;
        }
    };

    match bincode::deserialize_from(BufReader::new(file)) {
        Ok(value) => {
            debug!(path = %path.display(), "stub loaded");
            Some(value)
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "stub is corrupt, recomputing");
            None
        }
    }
}

pub fn write<T: Serialize, P: AsRef<Path>>(path: P, value: &T) -> Result<(), Error> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut out = BufWriter::new(File::create(path)?);
    bincode::serialize_into(&mut out, value)?;
    out.flush()?;

    debug!(path = %path.display(), "stub written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/stub.bin");

        assert_eq!(read::<Vec<u32>, _>(&path), None);

        write(&path, &vec![1u32, 2, 3]).unwrap();
        assert_eq!(read::<Vec<u32>, _>(&path), Some(vec![1, 2, 3]));
    }

    #[test]
    fn corrupt_stub_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stub.bin");
        std::fs::write(&path, [0xffu8; 3]).unwrap();

        assert_eq!(read::<Vec<String>, _>(&path), None);
    }
}
