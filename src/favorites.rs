//! Persisted favorites list: a small durable set of peer ids, following
//! the outbox's `sled` persistence approach but with no ordering or
//! per-entry payload to track — membership is all that matters.

use crate::error::OutboxError;
use crate::types::PeerId;

pub struct FavoritesStore {
    db: sled::Db,
}

impl FavoritesStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, OutboxError> {
        let db = sled::open(path).map_err(|e| OutboxError::Persistence(e.to_string()))?;
        Ok(Self { db })
    }

    pub fn open_in_memory() -> Result<Self, OutboxError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| OutboxError::Persistence(e.to_string()))?;
        Ok(Self { db })
    }

    pub fn add(&self, peer: &PeerId) -> Result<(), OutboxError> {
        self.db
            .insert(peer.as_bytes(), &[])
            .map_err(|e| OutboxError::Persistence(e.to_string()))?;
        self.db.flush().map_err(|e| OutboxError::Persistence(e.to_string()))?;
        Ok(())
    }

    pub fn remove(&self, peer: &PeerId) -> Result<(), OutboxError> {
        self.db.remove(peer.as_bytes()).map_err(|e| OutboxError::Persistence(e.to_string()))?;
        self.db.flush().map_err(|e| OutboxError::Persistence(e.to_string()))?;
        Ok(())
    }

    pub fn is_favorite(&self, peer: &PeerId) -> Result<bool, OutboxError> {
        Ok(self
            .db
            .contains_key(peer.as_bytes())
            .map_err(|e| OutboxError::Persistence(e.to_string()))?)
    }

    pub fn list(&self) -> Result<Vec<PeerId>, OutboxError> {
        let mut peers = Vec::new();
        for key in self.db.iter().keys() {
            let key = key.map_err(|e| OutboxError::Persistence(e.to_string()))?;
            if key.len() == 8 {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&key);
                peers.push(PeerId(bytes));
            }
        }
        Ok(peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_remove_and_list_round_trip() {
        let store = FavoritesStore::open_in_memory().unwrap();
        let alice = PeerId([1; 8]);
        let bob = PeerId([2; 8]);

        store.add(&alice).unwrap();
        store.add(&bob).unwrap();
        assert!(store.is_favorite(&alice).unwrap());
        let mut listed = store.list().unwrap();
        listed.sort();
        let mut expected = vec![alice, bob];
        expected.sort();
        assert_eq!(listed, expected);

        store.remove(&alice).unwrap();
        assert!(!store.is_favorite(&alice).unwrap());
        assert_eq!(store.list().unwrap(), vec![bob]);
    }

    #[test]
    fn persists_across_instances() {
        let dir = std::env::temp_dir().join(format!("bitchat-favorites-test-{}", std::process::id()));
        let store_a = FavoritesStore::open(&dir).unwrap();
        store_a.add(&PeerId([9; 8])).unwrap();
        drop(store_a);

        let store_b = FavoritesStore::open(&dir).unwrap();
        assert!(store_b.is_favorite(&PeerId([9; 8])).unwrap());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
