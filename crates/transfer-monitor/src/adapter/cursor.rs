use std::fs;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::domain::types::{ChainId, unix_millis};
use crate::error::{Error, Result};

/// Last block per chain whose events were fully handed downstream.
#[async_trait::async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self, chain_id: ChainId) -> Result<Option<u64>>;
    async fn save(&self, chain_id: ChainId, block: u64) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    cursors: DashMap<ChainId, u64>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn load(&self, chain_id: ChainId) -> Result<Option<u64>> {
        Ok(self.cursors.get(&chain_id).map(|c| *c))
    }

    async fn save(&self, chain_id: ChainId, block: u64) -> Result<()> {
        self.cursors.insert(chain_id, block);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CursorFile {
    chain_id: ChainId,
    block: u64,
    saved_at_ms: u64,
}

/// One JSON file per chain. Writes go to a temp file that is renamed over
/// the old cursor, so a crash leaves either the old or the new value.
#[derive(Debug, Clone)]
pub struct FsCursorStore {
    root: PathBuf,
}

impl FsCursorStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .map_err(|e| Error::Backend(format!("create cursor dir: {e}")))?;
        Ok(Self { root })
    }

    fn cursor_path(&self, chain_id: ChainId) -> PathBuf {
        self.root.join(format!("chain-{chain_id}.cursor.json"))
    }
}

#[async_trait::async_trait]
impl CursorStore for FsCursorStore {
    async fn load(&self, chain_id: ChainId) -> Result<Option<u64>> {
        let path = self.cursor_path(chain_id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read(&path).map_err(|e| Error::Backend(format!("cursor read: {e}")))?;
        let file: CursorFile = serde_json::from_slice(&raw)
            .map_err(|e| Error::Serialization(format!("cursor {}: {e}", path.display())))?;
        if file.chain_id != chain_id {
            return Err(Error::Backend(format!(
                "cursor {} belongs to chain {}",
                path.display(),
                file.chain_id
            )));
        }
        Ok(Some(file.block))
    }

    async fn save(&self, chain_id: ChainId, block: u64) -> Result<()> {
        let path = self.cursor_path(chain_id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec(&CursorFile {
            chain_id,
            block,
            saved_at_ms: unix_millis(),
        })
        .map_err(|e| Error::Serialization(format!("cursor encode: {e}")))?;
        fs::write(&tmp, body).map_err(|e| Error::Backend(format!("cursor write: {e}")))?;
        fs::rename(&tmp, &path).map_err(|e| Error::Backend(format!("cursor rename: {e}")))?;
        Ok(())
    }
}
