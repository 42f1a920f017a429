use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::warn;
use memmap2::MmapOptions;
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};
use crate::core::types::{CollectionType, Fid, Tick};
use crate::storage::marker::{Marker, MarkerKind, MARKER_HEADER_SIZE};

/// Role of a datafile within the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatafileState {
    /// The active append target.
    Journal,
    /// Immutable, footer-terminated.
    Sealed,
    /// Replacement file being produced by compaction.
    Compactor,
}

/// Payload of the leading `Header` marker.
#[derive(Debug, Serialize, Deserialize)]
struct DatafileHeader {
    version: u32,
    fid: u64,
}

const DATAFILE_VERSION: u32 = 1;

/// Payload of the `ColHeader` marker, identifying the owning collection.
#[derive(Debug, Serialize, Deserialize)]
pub struct CollectionHeader {
    pub collection_id: u64,
    pub collection_type: CollectionType,
}

/// An append-only file of aligned, CRC-framed markers.
#[derive(Debug)]
pub struct Datafile {
    pub fid: Fid,
    path: PathBuf,
    file: Option<File>,
    pub state: DatafileState,
    pub current_size: u64,

    // Populated while markers are written or iterated.
    pub tick_min: Tick,
    pub tick_max: Tick,
    pub data_min: Tick,
    pub data_max: Tick,
}

fn map_io(err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::StorageFull {
        Error::FilesystemFull
    } else {
        Error::Io(err)
    }
}

impl Datafile {
    /// Create a fresh writable datafile and stamp it with the `Header` and
    /// `ColHeader` markers.
    pub fn create(
        path: &Path,
        fid: Fid,
        state: DatafileState,
        collection_id: u64,
        collection_type: CollectionType,
        tick: Tick,
    ) -> Result<Datafile> {
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(path)
            .map_err(map_io)?;

        let mut datafile = Datafile {
            fid,
            path: path.to_path_buf(),
            file: Some(file),
            state,
            current_size: 0,
            tick_min: Tick::ZERO,
            tick_max: Tick::ZERO,
            data_min: Tick::ZERO,
            data_max: Tick::ZERO,
        };

        let header = DatafileHeader {
            version: DATAFILE_VERSION,
            fid: fid.value(),
        };
        datafile.append_marker(&Marker::new(
            MarkerKind::Header,
            tick,
            bincode::serialize(&header)?,
        ))?;

        let col_header = CollectionHeader {
            collection_id,
            collection_type,
        };
        datafile.append_marker(&Marker::new(
            MarkerKind::ColHeader,
            tick,
            bincode::serialize(&col_header)?,
        ))?;

        Ok(datafile)
    }

    /// Open an existing datafile for iteration. The file stays read-only
    /// until `reopen_for_append` is called.
    pub fn open(path: &Path, fid: Fid, state: DatafileState) -> Result<Datafile> {
        let len = std::fs::metadata(path).map_err(map_io)?.len();
        Ok(Datafile {
            fid,
            path: path.to_path_buf(),
            file: None,
            state,
            current_size: len,
            tick_min: Tick::ZERO,
            tick_max: Tick::ZERO,
            data_min: Tick::ZERO,
            data_max: Tick::ZERO,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_writable(&self) -> bool {
        self.state != DatafileState::Sealed
    }

    /// Re-acquire an append handle on a recovered journal.
    pub fn reopen_for_append(&mut self) -> Result<()> {
        if !self.is_writable() {
            return Err(Error::Internal("cannot append to a sealed datafile".into()));
        }
        if self.file.is_none() {
            let file = OpenOptions::new()
                .append(true)
                .open(&self.path)
                .map_err(map_io)?;
            self.file = Some(file);
        }
        Ok(())
    }

    /// Append one marker. Returns the byte offset the marker was written at.
    pub fn append_marker(&mut self, marker: &Marker) -> Result<u64> {
        if !self.is_writable() {
            return Err(Error::Internal("datafile is sealed".into()));
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::Internal("datafile has no append handle".into()))?;

        let bytes = marker.encode();
        file.write_all(&bytes).map_err(map_io)?;

        let offset = self.current_size;
        self.current_size += bytes.len() as u64;
        self.observe(marker);
        Ok(offset)
    }

    /// Move the file, e.g. from the journal series into the datafile series
    /// after sealing. Any open append handle must be gone by then.
    pub fn rename(&mut self, to: &Path) -> Result<()> {
        std::fs::rename(&self.path, to).map_err(map_io)?;
        self.path = to.to_path_buf();
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.sync_all().map_err(map_io)?;
        }
        Ok(())
    }

    /// Append the footer, flush, and freeze the file.
    pub fn seal(&mut self, tick: Tick) -> Result<()> {
        self.append_marker(&Marker::new(MarkerKind::Footer, tick, Vec::new()))?;
        self.sync()?;
        self.state = DatafileState::Sealed;
        self.file = None;
        Ok(())
    }

    fn observe(&mut self, marker: &Marker) {
        let tick = marker.tick;
        if self.tick_min.is_zero() {
            self.tick_min = tick;
        }
        if tick > self.tick_max {
            self.tick_max = tick;
        }
        if marker.kind == MarkerKind::VpackDocument {
            if self.data_min.is_zero() {
                self.data_min = tick;
            }
            if tick > self.data_max {
                self.data_max = tick;
            }
        }
    }

    /// Walk every marker in physical order, feeding each one to `f`.
    /// Returns whether a footer was seen. A corrupt tail terminates the walk
    /// when `ignore_errors` is set and fails it otherwise. On return,
    /// `current_size` marks the end of the valid marker region.
    pub fn iterate<F>(&mut self, ignore_errors: bool, mut f: F) -> Result<bool>
    where
        F: FnMut(&Marker) -> Result<()>,
    {
        if self.current_size == 0 {
            return Ok(false);
        }

        let file = File::open(&self.path).map_err(map_io)?;
        let mmap = unsafe { MmapOptions::new().map(&file) }
            .map_err(|e| Error::MmapFailed(format!("{}: {e}", self.path.display())))?;
        let bytes = &mmap[..];

        let mut offset = 0usize;
        let mut saw_footer = false;

        while offset + MARKER_HEADER_SIZE <= bytes.len() {
            // A zero kind byte marks preallocated space past the last write.
            if bytes[offset] == 0 {
                break;
            }

            let (marker, consumed) = match Marker::decode(&bytes[offset..]) {
                Ok(decoded) => decoded,
                Err(err) if ignore_errors => {
                    warn!(
                        "treating corrupt tail of '{}' at offset {offset} as end of data: {err}",
                        self.path.display()
                    );
                    break;
                }
                Err(err) => return Err(err),
            };

            self.observe(&marker);

            if marker.kind == MarkerKind::Footer {
                saw_footer = true;
                offset += consumed;
                break;
            }

            f(&marker)?;
            offset += consumed;
        }

        self.current_size = offset as u64;
        Ok(saw_footer)
    }

    /// Drop bytes past the valid marker region, e.g. a torn tail a crash
    /// left in the journal. Requires a prior `iterate`.
    pub fn truncate_to_valid(&mut self) -> Result<()> {
        let on_disk = std::fs::metadata(&self.path).map_err(map_io)?.len();
        if on_disk > self.current_size {
            warn!(
                "truncating '{}' from {on_disk} to {} bytes",
                self.path.display(),
                self.current_size
            );
            let file = OpenOptions::new()
                .write(true)
                .open(&self.path)
                .map_err(map_io)?;
            file.set_len(self.current_size).map_err(map_io)?;
            file.sync_all().map_err(map_io)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::CollectionType;

    fn sample_file(dir: &Path, markers: usize) -> Datafile {
        let path = dir.join("datafile-1.db");
        let mut df = Datafile::create(
            &path,
            Fid(1),
            DatafileState::Journal,
            9,
            CollectionType::Document,
            Tick(1),
        )
        .unwrap();
        for i in 0..markers {
            df.append_marker(&Marker::new(
                MarkerKind::VpackDocument,
                Tick(10 + i as u64),
                format!("{{\"n\":{i}}}").into_bytes(),
            ))
            .unwrap();
        }
        df
    }

    #[test]
    fn iterate_replays_written_markers() {
        let dir = tempfile::tempdir().unwrap();
        let mut df = sample_file(dir.path(), 3);
        df.seal(Tick(20)).unwrap();

        let mut reopened =
            Datafile::open(df.path(), Fid(1), DatafileState::Sealed).unwrap();
        let mut kinds = Vec::new();
        let sealed = reopened
            .iterate(false, |marker| {
                kinds.push(marker.kind);
                Ok(())
            })
            .unwrap();

        assert!(sealed);
        assert_eq!(
            kinds,
            vec![
                MarkerKind::Header,
                MarkerKind::ColHeader,
                MarkerKind::VpackDocument,
                MarkerKind::VpackDocument,
                MarkerKind::VpackDocument,
            ]
        );
        assert_eq!(reopened.data_min, Tick(10));
        assert_eq!(reopened.data_max, Tick(12));
        assert_eq!(reopened.tick_max, Tick(20));
    }

    #[test]
    fn corrupt_tail_stops_iteration_when_ignoring_errors() {
        let dir = tempfile::tempdir().unwrap();
        let df = sample_file(dir.path(), 2);
        let path = df.path().to_path_buf();
        drop(df);

        // Flip a byte inside the last marker's payload.
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 4;
        bytes[last] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let mut reopened = Datafile::open(&path, Fid(1), DatafileState::Journal).unwrap();
        let mut documents = 0;
        reopened
            .iterate(true, |marker| {
                if marker.kind == MarkerKind::VpackDocument {
                    documents += 1;
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(documents, 1);

        let mut strict = Datafile::open(&path, Fid(1), DatafileState::Journal).unwrap();
        let result = strict.iterate(false, |_| Ok(()));
        assert!(matches!(result, Err(Error::CorruptDatafile(_))));
    }
}
