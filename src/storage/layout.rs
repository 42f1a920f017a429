use std::fs;
use std::path::PathBuf;

use crate::core::config::CollectionConfig;
use crate::core::error::{Error, Result};
use crate::core::types::{Fid, IndexId};
use crate::storage::datafile::DatafileState;

/// Directory layout of one collection:
///
/// ```text
/// <collection-dir>/
///   parameter.json      collection parameters
///   index-<id>.json     one sidecar per secondary index definition
///   datafile-<fid>.db   sealed datafiles
///   journal-<fid>.db    the active journal
///   compactor-<fid>.db  compaction outputs
/// ```
#[derive(Debug, Clone)]
pub struct CollectionLayout {
    pub dir: PathBuf,
}

impl CollectionLayout {
    pub fn create(dir: PathBuf) -> Result<CollectionLayout> {
        fs::create_dir_all(&dir)?;
        Ok(CollectionLayout { dir })
    }

    pub fn open(dir: PathBuf) -> Result<CollectionLayout> {
        if !dir.is_dir() {
            return Err(Error::BadParameter(format!(
                "collection directory '{}' does not exist",
                dir.display()
            )));
        }
        Ok(CollectionLayout { dir })
    }

    pub fn datafile_path(&self, fid: Fid, state: DatafileState) -> PathBuf {
        let prefix = match state {
            DatafileState::Journal => "journal",
            DatafileState::Sealed => "datafile",
            DatafileState::Compactor => "compactor",
        };
        self.dir.join(format!("{prefix}-{}.db", fid.value()))
    }

    pub fn parameter_path(&self) -> PathBuf {
        self.dir.join("parameter.json")
    }

    pub fn index_path(&self, id: IndexId) -> PathBuf {
        self.dir.join(format!("index-{}.json", id.value()))
    }

    pub fn save_parameters(&self, config: &CollectionConfig) -> Result<()> {
        let data = serde_json::to_vec_pretty(config)?;
        fs::write(self.parameter_path(), data)?;
        Ok(())
    }

    pub fn load_parameters(&self) -> Result<CollectionConfig> {
        let data = fs::read(self.parameter_path())?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn remove_index_file(&self, id: IndexId) -> Result<()> {
        fs::remove_file(self.index_path(id))?;
        Ok(())
    }

    /// All datafiles and journals in the directory, ordered by file id.
    pub fn list_datafiles(&self) -> Result<Vec<(Fid, PathBuf, DatafileState)>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some((fid, state)) = parse_datafile_name(&name) {
                files.push((fid, entry.path(), state));
            }
        }
        files.sort_by_key(|(fid, _, _)| *fid);
        Ok(files)
    }

    /// All index sidecar files in the directory, ordered by index id.
    pub fn list_index_files(&self) -> Result<Vec<(IndexId, PathBuf)>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name
                .strip_prefix("index-")
                .and_then(|s| s.strip_suffix(".json"))
            {
                if let Ok(id) = rest.parse::<u64>() {
                    files.push((IndexId(id), entry.path()));
                }
            }
        }
        files.sort_by_key(|(id, _)| *id);
        Ok(files)
    }
}

fn parse_datafile_name(name: &str) -> Option<(Fid, DatafileState)> {
    let (prefix, state) = if name.starts_with("datafile-") {
        ("datafile-", DatafileState::Sealed)
    } else if name.starts_with("journal-") {
        ("journal-", DatafileState::Journal)
    } else if name.starts_with("compactor-") {
        ("compactor-", DatafileState::Compactor)
    } else {
        return None;
    };

    name.strip_prefix(prefix)?
        .strip_suffix(".db")?
        .parse::<u64>()
        .ok()
        .map(|fid| (Fid(fid), state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::CollectionType;

    #[test]
    fn parses_datafile_names() {
        assert_eq!(
            parse_datafile_name("datafile-17.db"),
            Some((Fid(17), DatafileState::Sealed))
        );
        assert_eq!(
            parse_datafile_name("journal-3.db"),
            Some((Fid(3), DatafileState::Journal))
        );
        assert_eq!(parse_datafile_name("parameter.json"), None);
        assert_eq!(parse_datafile_name("datafile-x.db"), None);
    }

    #[test]
    fn parameters_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let layout = CollectionLayout::create(dir.path().join("c1")).unwrap();

        let config = CollectionConfig::new(5, "people", CollectionType::Edge);
        layout.save_parameters(&config).unwrap();

        let loaded = layout.load_parameters().unwrap();
        assert_eq!(loaded.id, 5);
        assert_eq!(loaded.name, "people");
        assert!(loaded.is_edge());
    }
}
