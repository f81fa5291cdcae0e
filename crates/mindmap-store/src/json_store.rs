use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use fs2::FileExt;
use tracing::debug;

use mindmap_core::{Mindmap, MindmapError, MindmapResult, MindmapStore, Updater};

/// Mindmap snapshot in a single pretty-printed JSON file.
///
/// Writes go to a sibling temp file that is flushed to disk and renamed over
/// the target. Every operation holds an in-process mutex and an exclusive
/// advisory lock on `<file>.lock`; `update` keeps both for the whole
/// read-modify-write, so two processes sharing a data dir cannot drop each
/// other's changes.
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
    guard: Mutex<()>,
}

struct FileLock {
    file: File,
}

/// Both locks, released in reverse order on drop.
struct Held<'a> {
    _lock: FileLock,
    _guard: MutexGuard<'a, ()>,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> MindmapResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                MindmapError::Storage(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let lock_path = with_suffix(&path, "lock");
        Ok(Self {
            path,
            lock_path,
            guard: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn hold(&self) -> MindmapResult<Held<'_>> {
        let guard = self
            .guard
            .lock()
            .map_err(|_| MindmapError::Storage("store lock poisoned".into()))?;
        let lock = self.lock()?;
        Ok(Held {
            _lock: lock,
            _guard: guard,
        })
    }

    fn lock(&self) -> MindmapResult<FileLock> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| {
                MindmapError::Storage(format!("open lock {}: {e}", self.lock_path.display()))
            })?;
        file.lock_exclusive().map_err(|e| {
            MindmapError::Storage(format!("acquire lock {}: {e}", self.lock_path.display()))
        })?;
        Ok(FileLock { file })
    }

    /// Caller holds the locks.
    fn read_unlocked(&self) -> MindmapResult<Mindmap> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no snapshot yet");
                return Ok(Mindmap::new());
            }
            Err(e) => {
                return Err(MindmapError::Storage(format!(
                    "read {}: {e}",
                    self.path.display()
                )))
            }
        };
        Ok(Mindmap::from_snapshot_lossy(&text))
    }

    fn write_atomic(&self, text: &str) -> MindmapResult<()> {
        let tmp = with_suffix(&self.path, "tmp");
        let written = File::create(&tmp).and_then(|mut file| {
            file.write_all(text.as_bytes())?;
            file.sync_all()
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(MindmapError::Storage(format!("write {}: {e}", tmp.display())));
        }
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            MindmapError::Storage(format!("replace {}: {e}", self.path.display()))
        })
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

impl MindmapStore for JsonFileStore {
    fn load(&self) -> MindmapResult<Mindmap> {
        let _held = self.hold()?;
        self.read_unlocked()
    }

    fn save(&self, mindmap: &Mindmap) -> MindmapResult<()> {
        let text = mindmap.to_snapshot()?;
        let _held = self.hold()?;
        self.write_atomic(&text)?;
        debug!(path = %self.path.display(), graphs = mindmap.graphs.len(), "snapshot saved");
        Ok(())
    }

    fn clear(&self) -> MindmapResult<()> {
        let _held = self.hold()?;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MindmapError::Storage(format!(
                "remove {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn update(&self, apply: &mut Updater<'_>) -> MindmapResult<Mindmap> {
        let _held = self.hold()?;
        let mut mindmap = self.read_unlocked()?;
        apply(&mut mindmap)?;
        self.write_atomic(&mindmap.to_snapshot()?)?;
        debug!(path = %self.path.display(), graphs = mindmap.graphs.len(), "snapshot updated");
        Ok(mindmap)
    }
}
