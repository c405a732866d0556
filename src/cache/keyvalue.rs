use std::borrow::Cow;
use std::fs;
use std::io::{ErrorKind, Write};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::Builder;

use crate::cache::{CacheBackend, CacheRecord};
use crate::domain::FreshnessWindow;
use crate::error::GatorError;

/// Latest-value-only store: one JSON file per (service, accession) under
/// `<root>/<service>/<accession>.json`. Keeps no history, so sweeping and
/// timestamp listing do nothing.
#[derive(Debug, Clone)]
pub struct KeyValueBackend {
    root: Utf8PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    accession: String,
    service: String,
    retrieved: DateTime<Utc>,
    data: String,
}

impl KeyValueBackend {
    pub fn open(root: &Utf8Path) -> Result<Self, GatorError> {
        fs::create_dir_all(root.as_std_path()).map_err(fs_error)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn service_dir(&self, service: &str) -> Utf8PathBuf {
        self.root.join(encode_component(service))
    }

    fn entry_path(&self, service: &str, accession: &str) -> Utf8PathBuf {
        self.service_dir(service)
            .join(format!("{}.json", encode_component(accession)))
    }

    fn read_entry(path: &Utf8Path) -> Result<Option<Entry>, GatorError> {
        let content = match fs::read_to_string(path.as_std_path()) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(fs_error(err)),
        };
        let entry = serde_json::from_str(&content)
            .map_err(|err| GatorError::Cache(format!("corrupt entry {path}: {err}")))?;
        Ok(Some(entry))
    }

    fn write_entry(path: &Utf8Path, entry: &Entry) -> Result<(), GatorError> {
        let parent = path
            .parent()
            .ok_or_else(|| GatorError::Filesystem(format!("invalid cache path {path}")))?;
        fs::create_dir_all(parent.as_std_path()).map_err(fs_error)?;
        let content =
            serde_json::to_vec(entry).map_err(|err| GatorError::Cache(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix("gator-entry")
            .tempfile_in(parent.as_std_path())
            .map_err(fs_error)?;
        temp.write_all(&content).map_err(fs_error)?;
        temp.persist(path.as_std_path())
            .map_err(|err| GatorError::Filesystem(err.to_string()))?;
        Ok(())
    }

    /// Service directories as `(service name, path)`.
    fn service_dirs(&self) -> Result<Vec<(String, Utf8PathBuf)>, GatorError> {
        let mut dirs = Vec::new();
        for entry in fs::read_dir(self.root.as_std_path()).map_err(fs_error)? {
            let entry = entry.map_err(fs_error)?;
            if !entry.path().is_dir() {
                continue;
            }
            let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
                continue;
            };
            if let Some(name) = path.file_name().and_then(decode_component) {
                dirs.push((name, path));
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    fn entry_files(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, GatorError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir.as_std_path()).map_err(fs_error)? {
            let entry = entry.map_err(fs_error)?;
            let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
                continue;
            };
            if path.is_file() && path.extension() == Some("json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl CacheBackend for KeyValueBackend {
    fn name(&self) -> &'static str {
        "keyvalue"
    }

    fn fetch(
        &self,
        accession: &str,
        service: &str,
        window: &FreshnessWindow,
    ) -> Result<Option<CacheRecord>, GatorError> {
        let entry = Self::read_entry(&self.entry_path(service, accession))?;
        Ok(entry
            .filter(|entry| window.contains(entry.retrieved))
            .map(|entry| CacheRecord {
                accession: entry.accession,
                service: entry.service,
                retrieved: entry.retrieved,
                data: entry.data,
            }))
    }

    fn insert(&self, record: &CacheRecord) -> Result<(), GatorError> {
        let entry = Entry {
            accession: record.accession.clone(),
            service: record.service.clone(),
            retrieved: record.retrieved,
            data: record.data.clone(),
        };
        Self::write_entry(&self.entry_path(&record.service, &record.accession), &entry)
    }

    fn services(&self, prefix: &str) -> Result<Vec<String>, GatorError> {
        let mut services = Vec::new();
        for (name, dir) in self.service_dirs()? {
            if name.starts_with(prefix) && !Self::entry_files(&dir)?.is_empty() {
                services.push(name);
            }
        }
        Ok(services)
    }

    fn accessions(&self, service: &str) -> Result<Vec<String>, GatorError> {
        let dir = self.service_dir(service);
        if !dir.as_std_path().is_dir() {
            return Ok(Vec::new());
        }
        Ok(Self::entry_files(&dir)?
            .iter()
            .filter_map(|path| path.file_stem().and_then(decode_component))
            .collect())
    }

    fn timestamps(
        &self,
        _service: &str,
        _window: &FreshnessWindow,
    ) -> Result<Vec<DateTime<Utc>>, GatorError> {
        Ok(Vec::new())
    }

    fn remove(&self, service_prefix: &str, accession: Option<&str>) -> Result<usize, GatorError> {
        let mut removed = 0;
        for (name, dir) in self.service_dirs()? {
            if !name.starts_with(service_prefix) {
                continue;
            }
            match accession {
                Some(acc) => {
                    let path = dir.join(format!("{}.json", encode_component(acc)));
                    match fs::remove_file(path.as_std_path()) {
                        Ok(()) => removed += 1,
                        Err(err) if err.kind() == ErrorKind::NotFound => {}
                        Err(err) => return Err(fs_error(err)),
                    }
                }
                None => {
                    removed += Self::entry_files(&dir)?.len();
                    fs::remove_dir_all(dir.as_std_path()).map_err(fs_error)?;
                }
            }
        }
        Ok(removed)
    }

    fn sweep(&self, _before: DateTime<Utc>) -> Result<usize, GatorError> {
        Ok(0)
    }
}

fn fs_error(err: std::io::Error) -> GatorError {
    GatorError::Filesystem(err.to_string())
}

/// Maps a service or accession name onto a single path component.
fn encode_component(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

fn decode_component(value: &str) -> Option<String> {
    urlencoding::decode(value).ok().map(Cow::into_owned)
}
