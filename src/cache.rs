//! Persistent cache of indexed files.
//!
//! Records which files have been pushed to the vector store and at what
//! modification time, so unchanged files are skipped on the next run.
//! Persistence is an append-only line log (`INDEXED:<path>|<mod millis>`)
//! that is replayed and compacted on load.
//!
//! Every I/O failure here fails open: the worst outcome of a broken cache
//! is re-indexing work, never a missed file.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

const ENTRY_PREFIX: &str = "INDEXED:";

/// Summary of a [`FileCache::load`] replay.
#[derive(Debug, Default, Clone)]
pub struct LoadReport {
    /// Entries kept (file exists, modtime unchanged).
    pub valid: usize,
    /// Paths whose file no longer exists on disk; the pipeline may use
    /// these to clean up the vector store.
    pub deleted: Vec<PathBuf>,
    /// Entries dropped because the file changed since it was indexed.
    pub modified: usize,
}

/// Persistent record of indexed files keyed by absolute path.
pub struct FileCache {
    cache_file: PathBuf,
    enabled: bool,
    entries: Mutex<HashMap<PathBuf, i64>>,
}

impl FileCache {
    pub fn new(cache_file: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            cache_file: cache_file.into(),
            enabled,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// True when the file is absent from the cache or its on-disk
    /// modification time differs from the recorded one. A stale entry is
    /// evicted here, before re-indexing, so a crash mid-reindex leaves the
    /// file still marked as needing work.
    pub fn needs_reindexing(&self, file: &Path) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let cached = match entries.get(file) {
            Some(mod_time) => *mod_time,
            None => return true,
        };

        match mod_time_millis(file) {
            Some(current) if current == cached => false,
            _ => {
                // Modified, deleted, or unreadable: evict and reindex.
                entries.remove(file);
                true
            }
        }
    }

    /// Record a successfully indexed file and append it to the log.
    pub fn record_indexed(&self, file: &Path) {
        let mod_time = match mod_time_millis(file) {
            Some(t) => t,
            None => {
                warn!(path = %file.display(), "could not stat indexed file for cache");
                return;
            }
        };

        self.entries
            .lock()
            .unwrap()
            .insert(file.to_path_buf(), mod_time);

        if !self.enabled {
            return;
        }

        let line = format!("{}{}|{}\n", ENTRY_PREFIX, file.display(), mod_time);
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.cache_file)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = result {
            warn!(error = %e, "could not append to cache file");
        }
    }

    /// Replay the log, dropping entries for deleted or modified files, and
    /// rewrite a compacted file when anything was dropped. Idempotent:
    /// loading twice with no disk changes yields the same entry set.
    pub fn load(&self) -> LoadReport {
        let mut report = LoadReport::default();
        if !self.enabled {
            return report;
        }

        let content = match std::fs::read_to_string(&self.cache_file) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return report,
            Err(e) => {
                warn!(error = %e, "could not read cache file; treating all files as unindexed");
                return report;
            }
        };

        let mut entries = self.entries.lock().unwrap();
        entries.clear();
        let mut valid_lines: Vec<String> = Vec::new();

        for line in content.lines() {
            let Some(rest) = line.trim().strip_prefix(ENTRY_PREFIX) else {
                continue;
            };
            let Some((path_str, mod_str)) = rest.rsplit_once('|') else {
                continue;
            };
            let Ok(cached_mod) = mod_str.trim().parse::<i64>() else {
                continue;
            };
            let path = PathBuf::from(path_str.trim());

            match mod_time_millis(&path) {
                Some(current) if current == cached_mod => {
                    entries.insert(path, cached_mod);
                    valid_lines.push(line.to_string());
                    report.valid += 1;
                }
                Some(_) => report.modified += 1,
                None => report.deleted.push(path),
            }
        }

        // Later appends for the same path win over earlier ones.
        if !report.deleted.is_empty() || report.modified > 0 {
            self.rewrite_compacted(&valid_lines);
        }

        report
    }

    /// Forget everything, in memory and on disk.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
        if !self.enabled {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.cache_file) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "could not remove cache file");
            }
        }
    }

    /// Drop entries for files known to be gone from disk.
    pub fn prune(&self, deleted: &[PathBuf]) {
        if deleted.is_empty() {
            return;
        }
        let mut entries = self.entries.lock().unwrap();
        for path in deleted {
            entries.remove(path);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn indexed_paths(&self) -> Vec<PathBuf> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }

    fn rewrite_compacted(&self, valid_lines: &[String]) {
        let result = if valid_lines.is_empty() {
            std::fs::remove_file(&self.cache_file).or_else(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Ok(())
                } else {
                    Err(e)
                }
            })
        } else {
            let mut content = valid_lines.join("\n");
            content.push('\n');
            std::fs::write(&self.cache_file, content)
        };
        if let Err(e) = result {
            warn!(error = %e, "could not rewrite compacted cache file");
        }
    }
}

fn mod_time_millis(path: &Path) -> Option<i64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let millis = modified
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .ok()?
        .as_millis();
    i64::try_from(millis).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, FileCache, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let cache = FileCache::new(tmp.path().join("cache.txt"), true);
        let file = tmp.path().join("Main.java");
        fs::write(&file, "class Main {}").unwrap();
        (tmp, cache, file)
    }

    #[test]
    fn unseen_file_needs_reindexing() {
        let (_tmp, cache, file) = setup();
        assert!(cache.needs_reindexing(&file));
    }

    #[test]
    fn recorded_file_is_skipped_until_modified() {
        let (_tmp, cache, file) = setup();
        cache.record_indexed(&file);
        assert!(!cache.needs_reindexing(&file));

        // Bump the modification time well past filesystem granularity.
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(10);
        let f = fs::OpenOptions::new().write(true).open(&file).unwrap();
        f.set_modified(later).unwrap();
        drop(f);

        assert!(cache.needs_reindexing(&file));
        // Stale entry was evicted as a side effect.
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn load_replays_persisted_entries() {
        let (tmp, cache, file) = setup();
        cache.record_indexed(&file);

        let reloaded = FileCache::new(tmp.path().join("cache.txt"), true);
        let report = reloaded.load();
        assert_eq!(report.valid, 1);
        assert!(report.deleted.is_empty());
        assert!(!reloaded.needs_reindexing(&file));
    }

    #[test]
    fn load_is_idempotent() {
        let (tmp, cache, file) = setup();
        cache.record_indexed(&file);
        let other = tmp.path().join("Other.java");
        fs::write(&other, "class Other {}").unwrap();
        cache.record_indexed(&other);

        let reloaded = FileCache::new(tmp.path().join("cache.txt"), true);
        let first = reloaded.load();
        let mut paths_a = reloaded.indexed_paths();
        let second = reloaded.load();
        let mut paths_b = reloaded.indexed_paths();

        paths_a.sort();
        paths_b.sort();
        assert_eq!(first.valid, second.valid);
        assert_eq!(paths_a, paths_b);
    }

    #[test]
    fn load_drops_and_reports_deleted_files() {
        let (tmp, cache, file) = setup();
        cache.record_indexed(&file);
        fs::remove_file(&file).unwrap();

        let reloaded = FileCache::new(tmp.path().join("cache.txt"), true);
        let report = reloaded.load();
        assert_eq!(report.valid, 0);
        assert_eq!(report.deleted, vec![file]);
        assert_eq!(reloaded.len(), 0);

        // Compaction removed the stale entry from disk too.
        let again = FileCache::new(tmp.path().join("cache.txt"), true);
        let report = again.load();
        assert_eq!(report.valid, 0);
        assert!(report.deleted.is_empty());
    }

    #[test]
    fn corrupt_lines_fail_open() {
        let (tmp, _cache, file) = setup();
        let cache_path = tmp.path().join("cache.txt");
        fs::write(
            &cache_path,
            format!(
                "garbage line\nINDEXED:{}|not-a-number\nINDEXED:no-separator\n",
                file.display()
            ),
        )
        .unwrap();

        let cache = FileCache::new(&cache_path, true);
        let report = cache.load();
        assert_eq!(report.valid, 0);
        // Corruption never blocks indexing, it only costs a re-index.
        assert!(cache.needs_reindexing(&file));
    }

    #[test]
    fn disabled_cache_keeps_memory_only() {
        let tmp = TempDir::new().unwrap();
        let cache_path = tmp.path().join("cache.txt");
        let cache = FileCache::new(&cache_path, false);
        let file = tmp.path().join("Main.java");
        fs::write(&file, "x").unwrap();

        cache.record_indexed(&file);
        assert!(!cache.needs_reindexing(&file));
        assert!(!cache_path.exists());
    }

    #[test]
    fn clear_and_prune() {
        let (_tmp, cache, file) = setup();
        cache.record_indexed(&file);
        cache.prune(&[file.clone()]);
        assert!(cache.needs_reindexing(&file));

        cache.record_indexed(&file);
        cache.clear();
        assert_eq!(cache.len(), 0);
        assert!(cache.needs_reindexing(&file));
    }
}
