//! Persistence of the conversation id across runs.

use std::fs;
use std::io::{self, ErrorKind, Write as _};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use directories::ProjectDirs;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;

/// The key the conversation id is stored under.
pub const CONVERSATION_ID_KEY: &str = "medicalAssistantConversationId";

const STATE_FILE_NAME: &str = "state.json";

/// A place to keep the conversation id between runs.
pub trait IdStore: Send + Sync {
    /// Returns the saved id, if any.
    fn load(&self) -> io::Result<Option<String>>;

    /// Saves `id`, replacing the previous one.
    fn save(&self, id: &str) -> io::Result<()>;

    /// Forgets the saved id.
    fn remove(&self) -> io::Result<()>;
}

/// An [`IdStore`] that lives as long as the process.
///
/// Clones share the same slot.
#[derive(Clone, Debug, Default)]
pub struct MemoryIdStore {
    slot: Arc<Mutex<Option<String>>>,
}

impl MemoryIdStore {
    /// Creates a store that already holds `id`.
    #[inline]
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(id.into()))),
        }
    }

    /// Returns the stored id.
    #[inline]
    pub fn get(&self) -> Option<String> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, id: Option<String>) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = id;
    }
}

impl IdStore for MemoryIdStore {
    fn load(&self) -> io::Result<Option<String>> {
        Ok(self.get())
    }

    fn save(&self, id: &str) -> io::Result<()> {
        self.set(Some(id.to_owned()));
        Ok(())
    }

    fn remove(&self) -> io::Result<()> {
        self.set(None);
        Ok(())
    }
}

/// An [`IdStore`] backed by a small JSON key/value file.
///
/// Keys other than [`CONVERSATION_ID_KEY`] are preserved.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FileIdStore {
    path: PathBuf,
}

impl FileIdStore {
    /// Creates a store that reads and writes `path`.
    #[inline]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates a store that keeps its file in `dir`.
    #[inline]
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(STATE_FILE_NAME))
    }

    /// Creates a store in the platform data directory.
    ///
    /// Returns `None` if the home directory can't be determined.
    pub fn in_data_dir() -> Option<Self> {
        let proj_dirs = ProjectDirs::from("org", "medchat", "medchat")?;
        Some(Self::in_dir(proj_dirs.data_dir()))
    }

    /// Returns the path of the backing file.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> io::Result<Map<String, Value>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok(Map::new());
            }
            Err(err) => return Err(err),
        };
        if contents.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(&contents)
            .map_err(|err| io::Error::new(ErrorKind::InvalidData, err))
    }

    fn write_map(&self, map: &Map<String, Value>) -> io::Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty());
        if let Some(dir) = parent {
            fs::create_dir_all(dir)?;
        }
        let contents = serde_json::to_string_pretty(map)
            .map_err(|err| io::Error::new(ErrorKind::InvalidData, err))?;

        let mut temp_file = match parent {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };
        temp_file.write_all(contents.as_bytes())?;
        temp_file.as_file_mut().sync_all()?;
        temp_file.persist(&self.path)?;
        Ok(())
    }
}

impl IdStore for FileIdStore {
    fn load(&self) -> io::Result<Option<String>> {
        let map = self.read_map()?;
        Ok(map
            .get(CONVERSATION_ID_KEY)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(ToOwned::to_owned))
    }

    fn save(&self, id: &str) -> io::Result<()> {
        let mut map = self.read_map().unwrap_or_else(|err| {
            warn!("overwriting unreadable state file: {err}");
            Map::new()
        });
        map.insert(CONVERSATION_ID_KEY.to_owned(), Value::from(id));
        self.write_map(&map)?;
        debug!("saved conversation id to {}", self.path.display());
        Ok(())
    }

    fn remove(&self) -> io::Result<()> {
        let mut map = self.read_map()?;
        if map.remove(CONVERSATION_ID_KEY).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_memory_store() {
        let store = MemoryIdStore::default();
        assert_eq!(store.load().unwrap(), None);
        store.save("abc").unwrap();
        assert_eq!(store.clone().load().unwrap().as_deref(), Some("abc"));
        store.remove().unwrap();
        assert_eq!(store.get(), None);
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempdir().unwrap();
        let store = FileIdStore::in_dir(dir.path().join("nested"));
        assert_eq!(store.load().unwrap(), None);

        store.save("1718000000.5").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("1718000000.5"));
        let contents = fs::read_to_string(store.path()).unwrap();
        assert!(contents.contains(CONVERSATION_ID_KEY));

        store.remove().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_file_store_keeps_other_keys() {
        let dir = tempdir().unwrap();
        let store = FileIdStore::in_dir(dir.path());
        fs::write(store.path(), r#"{"theme":"dark"}"#).unwrap();

        store.save("abc").unwrap();
        let map: Map<String, Value> =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap())
                .unwrap();
        assert_eq!(map["theme"], "dark");
        assert_eq!(map[CONVERSATION_ID_KEY], "abc");
    }

    #[test]
    fn test_file_store_invalid_contents() {
        let dir = tempdir().unwrap();
        let store = FileIdStore::in_dir(dir.path());
        fs::write(store.path(), "not json").unwrap();

        let err = store.load().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        // Saving recovers the file.
        store.save("abc").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("abc"));
    }

    #[test]
    fn test_file_store_concurrent_saves() {
        let dir = tempdir().unwrap();
        let ids: Vec<String> = (0..8).map(|i| format!("id-{i}")).collect();

        thread::scope(|scope| {
            for id in &ids {
                let store = FileIdStore::in_dir(dir.path());
                scope.spawn(move || {
                    for _ in 0..20 {
                        store.save(id).unwrap();
                    }
                });
            }
        });

        let store = FileIdStore::in_dir(dir.path());
        let saved = store.load().unwrap().unwrap();
        assert!(ids.contains(&saved));
        // Only the state file is left behind.
        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![STATE_FILE_NAME]);
    }
}
