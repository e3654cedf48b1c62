//! Session persistence.
//!
//! The whole [`SessionState`] is stored under two keys of a [`PersistentStore`]:
//!
//! ```json
//! // "conversations"
//! [{ "id": 1, "title": "New Conversation", "messages": [{ "sender": "user", "text": "..." }] }]
//! // "active_conversation"
//! 1
//! ```
//!
//! Data written without the active key stays loadable: the first conversation
//! becomes active.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, error, warn};

use super::session::{Conversation, ConversationId, SessionState};

/// Key holding the JSON array of conversations.
pub const CONVERSATIONS_KEY: &str = "conversations";

/// Key holding the active conversation id (number or `null`).
pub const ACTIVE_KEY: &str = "active_conversation";

/// Key receiving a copy of an undecodable conversations blob.
pub const CORRUPT_KEY: &str = "conversations.corrupt";

/// Byte-oriented key/value storage.
pub trait PersistentStore: Send + Sync {
    /// Returns the bytes stored under `key`, or `None` when absent.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be read.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Replaces the value stored under `key`.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be written.
    fn write(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Removes `key`. Removing an absent key is not an error.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be written.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Stores each key as `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid || key.starts_with('.') {
            bail!("Invalid store key '{key}'");
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl PersistentStore for FileStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create directory {}", self.dir.display()))?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, bytes)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistentStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| anyhow!("memory store lock poisoned: {e}"))?;
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| anyhow!("memory store lock poisoned: {e}"))?;
        entries.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| anyhow!("memory store lock poisoned: {e}"))?;
        entries.remove(key);
        Ok(())
    }
}

/// Loads the session state. Never fails: absent, unreadable or undecodable
/// data yields [`SessionState::initial`].
pub fn load(store: &impl PersistentStore) -> SessionState {
    let bytes = match store.read(CONVERSATIONS_KEY) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            debug!("no stored conversations, starting fresh");
            return SessionState::initial();
        }
        Err(e) => {
            warn!(error = %format!("{e:#}"), "failed to read conversations, starting fresh");
            return SessionState::initial();
        }
    };

    let conversations: Vec<Conversation> = match serde_json::from_slice(&bytes) {
        Ok(conversations) => conversations,
        Err(e) => {
            error!(error = %e, "stored conversations are corrupt, starting fresh");
            if let Err(e) = store.write(CORRUPT_KEY, &bytes) {
                warn!(error = %format!("{e:#}"), "failed to keep a copy of corrupt conversations");
            }
            return SessionState::initial();
        }
    };

    let active = load_active(store);
    let state = SessionState::from_parts(conversations, active);
    debug!(
        conversations = state.conversations().len(),
        active = ?state.active_id().map(ConversationId::get),
        "loaded conversations"
    );
    state
}

fn load_active(store: &impl PersistentStore) -> Option<ConversationId> {
    let bytes = match store.read(ACTIVE_KEY) {
        Ok(bytes) => bytes?,
        Err(e) => {
            warn!(error = %format!("{e:#}"), "failed to read active conversation");
            return None;
        }
    };
    match serde_json::from_slice::<Option<ConversationId>>(&bytes) {
        Ok(active) => active,
        Err(e) => {
            warn!(error = %e, "ignoring undecodable active conversation");
            None
        }
    }
}

/// Writes the full state: conversations first, then the active id.
///
/// If the active id cannot be written, the previous conversations value is
/// put back so the store never mixes two states.
///
/// # Errors
/// Returns an error if serialization, the pre-read or either write fails.
pub fn persist(store: &impl PersistentStore, state: &SessionState) -> Result<()> {
    let conversations = serde_json::to_vec(state.conversations())
        .context("Failed to serialize conversations")?;
    let active =
        serde_json::to_vec(&state.active_id()).context("Failed to serialize active conversation")?;

    let previous = store
        .read(CONVERSATIONS_KEY)
        .context("Failed to read stored conversations")?;
    store
        .write(CONVERSATIONS_KEY, &conversations)
        .context("Failed to persist conversations")?;

    if let Err(e) = store.write(ACTIVE_KEY, &active) {
        restore_conversations(store, previous.as_deref());
        return Err(e).context("Failed to persist active conversation");
    }
    Ok(())
}

fn restore_conversations(store: &impl PersistentStore, previous: Option<&[u8]>) {
    let restored = match previous {
        Some(bytes) => store.write(CONVERSATIONS_KEY, bytes),
        None => store.remove(CONVERSATIONS_KEY),
    };
    if let Err(e) = restored {
        error!(error = %format!("{e:#}"), "failed to restore conversations after a partial write");
    }
}


#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::test_support::FailingStore;
    use super::*;
    use crate::core::session::Message;
    use crate::core::title::PLACEHOLDER_TITLE;

    fn populated_state() -> SessionState {
        let mut state = SessionState::initial();
        state
            .append_message(ConversationId::FIRST, Message::user("I have chest pain"))
            .unwrap();
        state
            .append_message(ConversationId::FIRST, Message::assistant("Since when?"))
            .unwrap();
        let second = state.create_conversation().unwrap();
        state
            .append_message(second, Message::user("Palpitations at night"))
            .unwrap();
        state.select_active(ConversationId::FIRST).unwrap();
        state
    }

    #[test]
    fn test_load_absent_yields_initial_state() {
        let store = MemoryStore::new();
        assert_eq!(load(&store), SessionState::initial());
    }

    #[test]
    fn test_round_trip_memory_store() {
        let store = MemoryStore::new();
        let state = populated_state();
        persist(&store, &state).unwrap();
        assert_eq!(load(&store), state);
    }

    #[test]
    fn test_round_trip_file_store() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("store"));
        let state = populated_state();
        persist(&store, &state).unwrap();

        assert!(dir.path().join("store/conversations.json").exists());
        assert!(dir.path().join("store/active_conversation.json").exists());
        assert_eq!(load(&FileStore::new(dir.path().join("store"))), state);
    }

    #[test]
    fn test_round_trip_empty_state() {
        let store = MemoryStore::new();
        let mut state = SessionState::initial();
        state.delete_conversation(ConversationId::FIRST).unwrap();
        persist(&store, &state).unwrap();

        let loaded = load(&store);
        assert!(loaded.is_empty());
        assert_eq!(loaded.active_id(), None);
    }

    #[test]
    fn test_wire_format() {
        let store = MemoryStore::new();
        let mut state = SessionState::initial();
        state
            .append_message(ConversationId::FIRST, Message::user("hi"))
            .unwrap();
        state
            .append_message(ConversationId::FIRST, Message::assistant("hello"))
            .unwrap();
        persist(&store, &state).unwrap();

        let raw = store.read(CONVERSATIONS_KEY).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(
            value,
            json!([{
                "id": 1,
                "title": "hi",
                "messages": [
                    {"sender": "user", "text": "hi"},
                    {"sender": "ai", "text": "hello"}
                ]
            }])
        );
        assert_eq!(store.read(ACTIVE_KEY).unwrap().unwrap(), b"1");
    }

    #[test]
    fn test_load_without_active_key_selects_first() {
        let store = MemoryStore::new();
        let legacy = json!([
            {"id": 3, "title": PLACEHOLDER_TITLE, "messages": []},
            {"id": 7, "title": "Dizziness", "messages": [{"sender": "user", "text": "Dizziness"}]}
        ]);
        store
            .write(CONVERSATIONS_KEY, legacy.to_string().as_bytes())
            .unwrap();

        let state = load(&store);
        assert_eq!(state.conversations().len(), 2);
        assert_eq!(state.active_id(), Some(ConversationId::new(3)));
    }

    #[test]
    fn test_load_with_dangling_active_selects_first() {
        let store = MemoryStore::new();
        persist(&store, &populated_state()).unwrap();
        store.write(ACTIVE_KEY, b"99").unwrap();

        assert_eq!(load(&store).active_id(), Some(ConversationId::FIRST));
    }

    #[test]
    fn test_corrupt_blob_falls_back_and_is_kept() {
        let store = MemoryStore::new();
        store.write(CONVERSATIONS_KEY, b"{not json").unwrap();

        assert_eq!(load(&store), SessionState::initial());
        assert_eq!(store.read(CORRUPT_KEY).unwrap().unwrap(), b"{not json");
    }

    #[test]
    fn test_wrong_shape_is_treated_as_corrupt() {
        let store = MemoryStore::new();
        store.write(CONVERSATIONS_KEY, br#"{"id": 1}"#).unwrap();
        assert_eq!(load(&store), SessionState::initial());
        assert!(store.read(CORRUPT_KEY).unwrap().is_some());
    }

    #[test]
    fn test_file_store_rejects_path_like_keys() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.write("../escape", b"x").is_err());
        assert!(store.write("a/b", b"x").is_err());
        assert!(store.write("", b"x").is_err());
        assert!(store.read("..").is_err());
    }

    #[test]
    fn test_file_store_missing_key_is_none() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("never-created"));
        assert!(store.read(CONVERSATIONS_KEY).unwrap().is_none());
    }

    #[test]
    fn test_file_store_overwrites_atomically() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        store.write("k", b"one").unwrap();
        store.write("k", b"two").unwrap();
        assert_eq!(store.read("k").unwrap().unwrap(), b"two");
        assert!(!dir.path().join("k.json.tmp").exists());
    }

    #[test]
    fn test_failed_active_write_keeps_previous_state() {
        let store = FailingStore::new();
        let before = populated_state();
        persist(&store, &before).unwrap();

        let mut after = before.clone();
        after.create_conversation().unwrap();
        store.fail_writes_to(ACTIVE_KEY);

        assert!(persist(&store, &after).is_err());
        assert_eq!(load(&store), before);
    }

    #[test]
    fn test_failed_first_persist_leaves_store_empty() {
        let store = FailingStore::new();
        store.fail_writes_to(ACTIVE_KEY);

        assert!(persist(&store, &populated_state()).is_err());
        assert!(store.read(CONVERSATIONS_KEY).unwrap().is_none());

        store.heal();
        persist(&store, &populated_state()).unwrap();
        assert_eq!(load(&store), populated_state());
    }

    #[test]
    fn test_file_store_remove() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        store.write("k", b"one").unwrap();
        store.remove("k").unwrap();
        assert!(store.read("k").unwrap().is_none());
        store.remove("k").unwrap();
    }
}
