// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Durable storage for received samples, one backing file per registered
//! schema (`spec.md` §4.E, grounded on `original_source/src/mug.cpp`'s
//! `Keg::addFormat`/`Keg::write` usage).
//!
//! Shaped as a trait, following the backend-agnostic storage abstraction in
//! `hdds-persistence/src/store.rs`'s `PersistenceStore`, so a future
//! non-file-backed keg (e.g. one that hands samples to a downstream sink)
//! can be dropped in without touching the mug.

use crate::chp::ids::Uuid;
use crate::error::LagerError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

/// Durable sink for decoded sample bytes, keyed by the schema UUID a sample
/// was published under.
pub trait Keg: Send + Sync {
    fn start(&self) -> Result<(), LagerError>;
    fn stop(&self) -> Result<(), LagerError>;

    /// Registers (or re-registers) the schema for `uuid`, opening its
    /// backing storage. `schema_xml` is kept alongside the data file so the
    /// recording is self-describing.
    fn add_format(&self, uuid: Uuid, schema_xml: &str) -> Result<(), LagerError>;

    /// Appends `&data[..length]` to the file registered for the UUID found
    /// in `data`'s leading 16 bytes. Called once per data field as a
    /// sample's frames arrive, per `spec.md` §9's preserved "write after
    /// every data frame" behavior.
    fn write(&self, data: &[u8], length: usize) -> Result<(), LagerError>;
}

struct KegFile {
    data_file: File,
}

/// A [`Keg`] that stores each registered schema as `<dir>/<uuid>.schema.xml`
/// and appends sample bytes to `<dir>/<uuid>.keg`.
pub struct FileKeg {
    dir: PathBuf,
    files: Mutex<HashMap<Uuid, KegFile>>,
}

impl FileKeg {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: Mutex::new(HashMap::new()),
        }
    }

    fn data_path(&self, uuid: Uuid) -> PathBuf {
        self.dir.join(format!("{uuid}.keg"))
    }

    fn schema_path(&self, uuid: Uuid) -> PathBuf {
        self.dir.join(format!("{uuid}.schema.xml"))
    }
}

impl Keg for FileKeg {
    fn start(&self) -> Result<(), LagerError> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    fn stop(&self) -> Result<(), LagerError> {
        let mut files = self.files.lock();
        for (_, file) in files.iter_mut() {
            file.data_file.flush()?;
        }
        files.clear();
        Ok(())
    }

    fn add_format(&self, uuid: Uuid, schema_xml: &str) -> Result<(), LagerError> {
        fs::write(self.schema_path(uuid), schema_xml)?;

        let data_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.data_path(uuid))?;
        self.files.lock().insert(uuid, KegFile { data_file });
        Ok(())
    }

    fn write(&self, data: &[u8], length: usize) -> Result<(), LagerError> {
        if data.len() < crate::sample::UUID_SIZE_BYTES {
            return Err(LagerError::KegError(
                "sample buffer shorter than a uuid prefix".to_string(),
            ));
        }
        let uuid = Uuid::from_slice(&data[..crate::sample::UUID_SIZE_BYTES])
            .map_err(|e| LagerError::KegError(format!("malformed uuid prefix: {e}")))?;

        let mut files = self.files.lock();
        let keg_file = files
            .get_mut(&uuid)
            .ok_or_else(|| LagerError::KegError(format!("no format registered for {uuid}")))?;

        let bytes = &data[..length.min(data.len())];
        keg_file.data_file.write_all(bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writing_without_a_registered_format_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let keg = FileKeg::new(dir.path());
        keg.start().unwrap();

        let mut buf = Uuid::nil().as_bytes().to_vec();
        buf.extend_from_slice(&[0u8; 8]);
        assert!(keg.write(&buf, buf.len()).is_err());
    }

    #[test]
    fn registers_a_format_and_writes_samples() {
        let dir = tempfile::tempdir().unwrap();
        let keg = FileKeg::new(dir.path());
        keg.start().unwrap();

        let uuid = Uuid::nil();
        keg.add_format(uuid, "<format version=\"V\"/>").unwrap();

        let mut buf = uuid.as_bytes().to_vec();
        buf.extend_from_slice(&42u64.to_le_bytes());
        keg.write(&buf, buf.len()).unwrap();
        keg.write(&buf, buf.len()).unwrap();

        keg.stop().unwrap();

        let contents = fs::read(dir.path().join(format!("{uuid}.keg"))).unwrap();
        assert_eq!(contents.len(), buf.len() * 2);

        let schema = fs::read_to_string(dir.path().join(format!("{uuid}.schema.xml"))).unwrap();
        assert_eq!(schema, "<format version=\"V\"/>");
    }
}
