//! Durable bot configuration storage

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{BotConfig, BotUpdate};

#[async_trait]
pub trait Store: Send + Sync {
    async fn save_bot(&self, config: &BotConfig) -> Result<(), StoreError>;

    /// Apply a partial update and return the stored result
    async fn update_bot(&self, id: Uuid, update: &BotUpdate) -> Result<BotConfig, StoreError>;

    async fn delete_bot(&self, id: Uuid) -> Result<(), StoreError>;

    /// Every persisted bot; the caller restarts those whose status is active
    async fn get_active_bots(&self) -> Result<Vec<BotConfig>, StoreError>;
}

fn apply_update(
    bots: &mut HashMap<Uuid, BotConfig>,
    id: Uuid,
    update: &BotUpdate,
) -> Result<BotConfig, StoreError> {
    let config = bots.get_mut(&id).ok_or(StoreError::NotFound(id))?;
    update
        .apply_to(config)
        .map_err(|e| StoreError::Invalid(e.to_string()))?;
    Ok(config.clone())
}

fn sorted(bots: &HashMap<Uuid, BotConfig>) -> Vec<BotConfig> {
    let mut list: Vec<BotConfig> = bots.values().cloned().collect();
    list.sort_by_key(|b| (b.created_at, b.id));
    list
}

/// Process-local store
#[derive(Default)]
pub struct MemoryStore {
    bots: RwLock<HashMap<Uuid, BotConfig>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: Uuid) -> Option<BotConfig> {
        self.bots.read().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.bots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.bots.read().await.is_empty()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_bot(&self, config: &BotConfig) -> Result<(), StoreError> {
        self.bots.write().await.insert(config.id, config.clone());
        Ok(())
    }

    async fn update_bot(&self, id: Uuid, update: &BotUpdate) -> Result<BotConfig, StoreError> {
        let mut bots = self.bots.write().await;
        apply_update(&mut bots, id, update)
    }

    async fn delete_bot(&self, id: Uuid) -> Result<(), StoreError> {
        self.bots
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    async fn get_active_bots(&self) -> Result<Vec<BotConfig>, StoreError> {
        Ok(sorted(&*self.bots.read().await))
    }
}

/// JSON file holding every bot config, rewritten on each change
pub struct JsonFileStore {
    path: PathBuf,
    bots: Mutex<HashMap<Uuid, BotConfig>>,
}

impl JsonFileStore {
    /// Open the file, creating its directory; a missing file is an empty store
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let bots = match fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => {
                let list: Vec<BotConfig> = serde_json::from_slice(&bytes)?;
                list.into_iter().map(|b| (b.id, b)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), bots = bots.len(), "Opened bot store");
        Ok(Self {
            path,
            bots: Mutex::new(bots),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, bots: &HashMap<Uuid, BotConfig>) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(&sorted(bots))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), bots = bots.len(), "Wrote bot store");
        Ok(())
    }
}

// Changes go to a copy that replaces the cached map only once written
#[async_trait]
impl Store for JsonFileStore {
    async fn save_bot(&self, config: &BotConfig) -> Result<(), StoreError> {
        let mut bots = self.bots.lock().await;
        let mut next = bots.clone();
        next.insert(config.id, config.clone());
        self.flush(&next).await?;
        *bots = next;
        Ok(())
    }

    async fn update_bot(&self, id: Uuid, update: &BotUpdate) -> Result<BotConfig, StoreError> {
        let mut bots = self.bots.lock().await;
        let mut next = bots.clone();
        let updated = apply_update(&mut next, id, update)?;
        self.flush(&next).await?;
        *bots = next;
        Ok(updated)
    }

    async fn delete_bot(&self, id: Uuid) -> Result<(), StoreError> {
        let mut bots = self.bots.lock().await;
        let mut next = bots.clone();
        if next.remove(&id).is_none() {
            return Err(StoreError::NotFound(id));
        }
        self.flush(&next).await?;
        *bots = next;
        Ok(())
    }

    async fn get_active_bots(&self) -> Result<Vec<BotConfig>, StoreError> {
        Ok(sorted(&*self.bots.lock().await))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BotMode, BotStatus, NewBot};

    fn bot() -> BotConfig {
        NewBot::new(BotMode::Simulation, &["BTCUSDT"])
            .into_config()
            .unwrap()
    }

    #[tokio::test]
    async fn test_memory_store_crud() {
        let store = MemoryStore::new();
        let config = bot();
        tokio_test::assert_ok!(store.save_bot(&config).await);

        let updated = store
            .update_bot(config.id, &BotUpdate::status(BotStatus::Active))
            .await
            .unwrap();
        assert_eq!(updated.status, BotStatus::Active);
        assert_eq!(store.get(config.id).await.unwrap().status, BotStatus::Active);

        store.delete_bot(config.id).await.unwrap();
        assert!(store.is_empty().await);
        let err = tokio_test::assert_err!(store.delete_bot(config.id).await);
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bots.json");

        let first = bot();
        let second = bot();
        {
            let store = JsonFileStore::open(&path).await.unwrap();
            store.save_bot(&first).await.unwrap();
            store.save_bot(&second).await.unwrap();
            store
                .update_bot(first.id, &BotUpdate::status(BotStatus::Active))
                .await
                .unwrap();
            store.delete_bot(second.id).await.unwrap();
        }

        let reopened = JsonFileStore::open(&path).await.unwrap();
        let bots = reopened.get_active_bots().await.unwrap();
        assert_eq!(bots.len(), 1);
        assert_eq!(bots[0].id, first.id);
        assert_eq!(bots[0].status, BotStatus::Active);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_cache_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bots.json");
        let store = JsonFileStore::open(&path).await.unwrap();
        let kept = bot();
        store.save_bot(&kept).await.unwrap();

        // A directory at the temp path makes the next write fail
        std::fs::create_dir(path.with_extension("json.tmp")).unwrap();

        let lost = bot();
        assert!(store.save_bot(&lost).await.is_err());
        assert!(store
            .update_bot(kept.id, &BotUpdate::status(BotStatus::Active))
            .await
            .is_err());
        assert!(store.delete_bot(kept.id).await.is_err());

        let bots = store.get_active_bots().await.unwrap();
        assert_eq!(bots.len(), 1);
        assert_eq!(bots[0].id, kept.id);
        assert_eq!(bots[0].status, BotStatus::Inactive);
    }

    #[tokio::test]
    async fn test_update_unknown_bot() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("bots.json")).await.unwrap();
        let err = store
            .update_bot(Uuid::new_v4(), &BotUpdate::status(BotStatus::Error))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
