//! Credential persistence.
//!
//! The flow controller and the token manager only need identifier-keyed
//! lookup, upsert and delete, expressed by [`CredentialStore`]. Two backends
//! ship with the crate:
//!
//! - [`MemoryCredentialStore`] keeps users in a map; for tests and ephemeral
//!   deployments.
//! - [`FileCredentialStore`] keeps one JSON document per user in a directory,
//!   written atomically and readable only by the owner.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use nclink_core::{User, UserId};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::BoxFuture;
use crate::error::{StoreError, StoreResult};
use crate::security::random_token;

/// Identifier-keyed storage of linked users and their tokens.
///
/// Implementations must be safe to call from concurrent request handlers.
pub trait CredentialStore: Send + Sync {
    /// Loads a user by identifier. `Ok(None)` if the user is not stored.
    fn load_user<'a>(&'a self, id: &'a UserId) -> BoxFuture<'a, StoreResult<Option<User>>>;

    /// Inserts or replaces a user.
    fn save_user<'a>(&'a self, user: &'a User) -> BoxFuture<'a, StoreResult<()>>;

    /// Removes a user. Removing an absent user is not an error.
    fn delete_user<'a>(&'a self, id: &'a UserId) -> BoxFuture<'a, StoreResult<()>>;

    /// Returns every stored user, ordered by identifier.
    fn list_users(&self) -> BoxFuture<'_, StoreResult<Vec<User>>>;
}

/// In-memory credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    users: RwLock<HashMap<UserId, User>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `users`.
    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let users = users.into_iter().map(|u| (u.id.clone(), u)).collect();
        Self {
            users: RwLock::new(users),
        }
    }

    /// Number of stored users.
    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    /// Returns true if no user is stored.
    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load_user<'a>(&'a self, id: &'a UserId) -> BoxFuture<'a, StoreResult<Option<User>>> {
        Box::pin(async move { Ok(self.users.read().await.get(id).cloned()) })
    }

    fn save_user<'a>(&'a self, user: &'a User) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            self.users
                .write()
                .await
                .insert(user.id.clone(), user.clone());
            Ok(())
        })
    }

    fn delete_user<'a>(&'a self, id: &'a UserId) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            self.users.write().await.remove(id);
            Ok(())
        })
    }

    fn list_users(&self) -> BoxFuture<'_, StoreResult<Vec<User>>> {
        Box::pin(async move {
            let mut users: Vec<User> = self.users.read().await.values().cloned().collect();
            users.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(users)
        })
    }
}

/// File-backed credential store: one JSON file per user.
///
/// File names are the base64url encoding of the user identifier, so any
/// identifier maps to a single file inside the directory.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    /// Extension of user documents.
    const EXTENSION: &'static str = "json";

    /// Creates a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &UserId) -> PathBuf {
        let stem = URL_SAFE_NO_PAD.encode(id.as_str().as_bytes());
        self.dir.join(format!("{}.{}", stem, Self::EXTENSION))
    }

    async fn read_user(path: &Path) -> StoreResult<Option<User>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_user(&self, user: &User) -> StoreResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(&user.id);
        let temp_path = path.with_extension(format!("{}.tmp", &random_token()[..8]));
        let content = serde_json::to_string_pretty(user)?;

        tokio::fs::write(&temp_path, content).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&temp_path, perms).await?;
        }

        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!(user_id = %user.id, path = ?path, "saved user credentials");
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn load_user<'a>(&'a self, id: &'a UserId) -> BoxFuture<'a, StoreResult<Option<User>>> {
        Box::pin(async move {
            let user = Self::read_user(&self.path_for(id)).await?;
            if let Some(ref user) = user
                && &user.id != id
            {
                return Err(StoreError::Backend(format!(
                    "credential file for '{}' holds user '{}'",
                    id, user.id
                )));
            }
            Ok(user)
        })
    }

    fn save_user<'a>(&'a self, user: &'a User) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(self.write_user(user))
    }

    fn delete_user<'a>(&'a self, id: &'a UserId) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            match tokio::fs::remove_file(self.path_for(id)).await {
                Ok(()) => {
                    info!(user_id = %id, "removed user credentials");
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn list_users(&self) -> BoxFuture<'_, StoreResult<Vec<User>>> {
        Box::pin(async move {
            let mut entries = match tokio::fs::read_dir(&self.dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(e.into()),
            };

            let mut users = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(Self::EXTENSION) {
                    continue;
                }
                match Self::read_user(&path).await {
                    Ok(Some(user)) => users.push(user),
                    Ok(None) => {}
                    Err(e) => warn!(path = ?path, error = %e, "skipping unreadable credential file"),
                }
            }

            users.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(users)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nclink_core::Token;

    fn user(id: &str) -> User {
        User::new(id, Token::issued("access", "refresh", "Bearer", 3600, Utc::now()))
    }

    #[tokio::test]
    async fn memory_store_crud() {
        let store = MemoryCredentialStore::new();
        let alice = user("alice");

        assert!(store.load_user(&alice.id).await.unwrap().is_none());
        store.save_user(&alice).await.unwrap();
        assert_eq!(store.load_user(&alice.id).await.unwrap(), Some(alice.clone()));
        assert_eq!(store.len().await, 1);

        store.delete_user(&alice.id).await.unwrap();
        assert!(store.is_empty().await);
        // Deleting again is fine.
        store.delete_user(&alice.id).await.unwrap();
    }

    #[tokio::test]
    async fn memory_store_lists_sorted() {
        let store = MemoryCredentialStore::with_users([user("carol"), user("alice"), user("bob")]);
        let ids: Vec<String> = store
            .list_users()
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.id.to_string())
            .collect();
        assert_eq!(ids, ["alice", "bob", "carol"]);
    }

    #[tokio::test]
    async fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("users"));
        let alice = user("alice");

        assert!(store.load_user(&alice.id).await.unwrap().is_none());
        assert!(store.list_users().await.unwrap().is_empty());

        store.save_user(&alice).await.unwrap();
        let loaded = store.load_user(&alice.id).await.unwrap().unwrap();
        assert_eq!(loaded, alice);

        let mut updated = alice.clone();
        updated.token.access_token = "new-access".to_string();
        store.save_user(&updated).await.unwrap();
        let loaded = store.load_user(&alice.id).await.unwrap().unwrap();
        assert_eq!(loaded.token.access_token, "new-access");

        store.delete_user(&alice.id).await.unwrap();
        assert!(store.load_user(&alice.id).await.unwrap().is_none());
        store.delete_user(&alice.id).await.unwrap();
    }

    #[tokio::test]
    async fn file_store_lists_users_and_skips_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        store.save_user(&user("bob")).await.unwrap();
        store.save_user(&user("alice")).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();

        let ids: Vec<String> = store
            .list_users()
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.id.to_string())
            .collect();
        assert_eq!(ids, ["alice", "bob"]);
    }

    #[tokio::test]
    async fn file_store_keeps_hostile_ids_inside_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("users"));
        let hostile = user("../../etc/passwd");

        store.save_user(&hostile).await.unwrap();

        let path = store.path_for(&hostile.id);
        assert_eq!(path.parent().unwrap(), store.dir());
        assert!(path.exists());
        assert_eq!(store.load_user(&hostile.id).await.unwrap(), Some(hostile));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_store_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        let alice = user("alice");
        store.save_user(&alice).await.unwrap();

        let mode = std::fs::metadata(store.path_for(&alice.id))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
