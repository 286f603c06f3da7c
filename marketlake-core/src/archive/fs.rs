//! Filesystem archive with Hive-style partitioning.
//!
//! Layout: `{root}/{source}/symbol={SYMBOL}/date={YYYY-MM-DD}/{fetched_at}.json`
//! with a `{fetched_at}.meta.json` sidecar beside each body.
//!
//! - Bodies are written to a temp file and hard-linked into place; linking
//!   fails on an existing name, so nothing is ever overwritten.
//! - A name collision (same millisecond) takes the next free `-N` suffix.
//! - Reads verify the BLAKE3 hash recorded in the sidecar.

use super::{ArchiveError, ArchiveMeta, RawArchive, StorageLocation};
use crate::domain::{DateRange, RawPayload, Symbol};
use chrono::NaiveDate;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

const META_SUFFIX: &str = ".meta.json";
const MAX_COLLISIONS: u32 = 1000;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

pub struct FsArchive {
    root: PathBuf,
}

impl FsArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Partition key: `{source}/symbol={SYMBOL}/date={YYYY-MM-DD}`.
    fn partition_key(source: &str, symbol: &str, date: NaiveDate) -> String {
        format!("{source}/symbol={symbol}/date={date}")
    }

    fn resolve(&self, location: &StorageLocation) -> PathBuf {
        self.root.join(location.as_str())
    }

    fn meta_path(body_path: &Path) -> PathBuf {
        let stem = body_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        body_path.with_file_name(format!("{stem}{META_SUFFIX}"))
    }

    /// Hard-link `tmp` to the first free name `{stem}.json`, `{stem}-1.json`, …
    fn link_unique(dir: &Path, stem: &str, tmp: &Path) -> Result<String, ArchiveError> {
        for n in 0..MAX_COLLISIONS {
            let name = if n == 0 {
                format!("{stem}.json")
            } else {
                format!("{stem}-{n}.json")
            };
            let target = dir.join(&name);
            match fs::hard_link(tmp, &target) {
                Ok(()) => return Ok(name),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(ArchiveError::Write {
                        path: target,
                        reason: e.to_string(),
                    })
                }
            }
        }
        Err(ArchiveError::Write {
            path: dir.join(format!("{stem}.json")),
            reason: format!("more than {MAX_COLLISIONS} objects share this key"),
        })
    }
}

/// Create `path` (never replacing) and fill it. A half-written file is removed.
fn write_file(path: &Path, bytes: &[u8]) -> Result<(), ArchiveError> {
    let failed = |e: io::Error| ArchiveError::Write {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(failed)?;
    let written = file.write_all(bytes).and_then(|()| file.sync_all());
    if let Err(e) = written {
        drop(file);
        let _ = fs::remove_file(path);
        return Err(failed(e));
    }
    Ok(())
}

impl RawArchive for FsArchive {
    fn archive(&self, payload: &RawPayload) -> Result<StorageLocation, ArchiveError> {
        let partition =
            Self::partition_key(&payload.source, payload.symbol.as_str(), payload.date());
        let dir = self.root.join(&partition);
        fs::create_dir_all(&dir).map_err(|e| {
            ArchiveError::Unavailable(format!("cannot create {}: {e}", dir.display()))
        })?;

        let stem = payload.fetched_at.format("%Y%m%dT%H%M%S%3fZ").to_string();
        let meta = ArchiveMeta {
            symbol: payload.symbol.to_string(),
            range_start: payload.range.start,
            range_end: payload.range.end,
            source: payload.source.clone(),
            fetched_at: payload.fetched_at,
            byte_len: payload.body.len(),
            content_hash: payload.content_hash(),
        };
        let meta_json = serde_json::to_vec_pretty(&meta).map_err(|e| ArchiveError::Write {
            path: dir.join(format!("{stem}{META_SUFFIX}")),
            reason: format!("meta serialization: {e}"),
        })?;

        let tmp_id = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp = dir.join(format!(".{stem}.{}.{tmp_id}.tmp", std::process::id()));
        write_file(&tmp, &payload.body)?;

        let linked = Self::link_unique(&dir, &stem, &tmp);
        let _ = fs::remove_file(&tmp);
        let name = linked?;

        // A body without its sidecar would be listed but never readable.
        let body_path = dir.join(&name);
        if let Err(e) = write_file(&Self::meta_path(&body_path), &meta_json) {
            let _ = fs::remove_file(&body_path);
            return Err(e);
        }

        let location = StorageLocation(format!("{partition}/{name}"));
        debug!(%location, bytes = payload.body.len(), "archived raw payload");
        Ok(location)
    }

    fn list(
        &self,
        source: &str,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Vec<StorageLocation>, ArchiveError> {
        let partition = Self::partition_key(source, symbol, date);
        let dir = self.root.join(&partition);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ArchiveError::Unavailable(format!(
                    "cannot read {}: {e}",
                    dir.display()
                )))
            }
        };

        let mut names: Vec<String> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ArchiveError::Unavailable(e.to_string()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".json") && !name.ends_with(META_SUFFIX) && !name.starts_with('.') {
                names.push(name);
            }
        }
        // Timestamps sort lexically; collision suffixes sort after their base name.
        names.sort_by(|a, b| collision_order(a).cmp(&collision_order(b)));

        Ok(names
            .into_iter()
            .map(|name| StorageLocation(format!("{partition}/{name}")))
            .collect())
    }

    fn read(&self, location: &StorageLocation) -> Result<RawPayload, ArchiveError> {
        if Path::new(location.as_str())
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(ArchiveError::NotFound(location.to_string()));
        }
        let body_path = self.resolve(location);
        let body = match fs::read(&body_path) {
            Ok(body) => body,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ArchiveError::NotFound(location.to_string()))
            }
            Err(e) => return Err(ArchiveError::Unavailable(e.to_string())),
        };

        let meta_path = Self::meta_path(&body_path);
        let corrupt = |reason: String| ArchiveError::Corrupt {
            path: body_path.clone(),
            reason,
        };
        let meta_raw = fs::read(&meta_path).map_err(|e| corrupt(format!("sidecar: {e}")))?;
        let meta: ArchiveMeta =
            serde_json::from_slice(&meta_raw).map_err(|e| corrupt(format!("sidecar: {e}")))?;

        let actual = blake3::hash(&body).to_hex().to_string();
        if actual != meta.content_hash {
            return Err(corrupt(format!(
                "content hash {actual} does not match recorded {}",
                meta.content_hash
            )));
        }

        Ok(RawPayload {
            symbol: Symbol::parse(&meta.symbol).map_err(|e| corrupt(e.to_string()))?,
            range: DateRange::new(meta.range_start, meta.range_end)
                .map_err(|e| corrupt(e.to_string()))?,
            fetched_at: meta.fetched_at,
            source: meta.source,
            body,
        })
    }
}

/// Sort key: (timestamp stem, collision number).
fn collision_order(name: &str) -> (String, u32) {
    let stem = name.trim_end_matches(".json");
    match stem.rsplit_once('-') {
        Some((base, n)) => match n.parse::<u32>() {
            Ok(n) => (base.to_string(), n),
            Err(_) => (stem.to_string(), 0),
        },
        None => (stem.to_string(), 0),
    }
}
