use crate::record_store::ItemCollection;
use tracing::{debug, warn};

/// Strip quoting and whitespace that stored hashes sometimes carry
fn normalize(hash: &str) -> &str {
    hash.trim().trim_matches('"').trim()
}

/// Checks image fingerprints against those already in the catalog
#[derive(Clone)]
pub struct DuplicateDetector {
    items: ItemCollection,
}

impl DuplicateDetector {
    pub fn new(items: ItemCollection) -> Self {
        Self { items }
    }

    /// True when a stored item already carries `hash`.
    ///
    /// A failed lookup is logged and treated as "not a duplicate".
    pub async fn is_duplicate(&self, hash: &str) -> bool {
        let wanted = normalize(hash);
        if wanted.is_empty() {
            return false;
        }

        let items = match self.items.all_items().await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Duplicate lookup failed; assuming image is new");
                return false;
            }
        };

        match items.iter().find(|item| normalize(&item.image_hash) == wanted) {
            Some(existing) => {
                debug!(existing_id = existing.id, "Image hash already stored");
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::hasher::hash_bytes;
    use crate::item::tests::milk;
    use crate::memory_store::MemoryRecordStore;
    use crate::record_store::MockRecordStore;
    use std::sync::Arc;

    async fn detector_with(hashes: &[&str]) -> DuplicateDetector {
        let items = ItemCollection::new(Arc::new(MemoryRecordStore::new()), "groceryItems");
        for (i, hash) in hashes.iter().enumerate() {
            let mut item = milk();
            item.id = i as i64 + 1;
            item.image_hash = hash.to_string();
            items.add(&item).await.unwrap();
        }
        DuplicateDetector::new(items)
    }

    #[tokio::test]
    async fn test_same_bytes_are_duplicate() {
        let hash = hash_bytes(b"image bytes");
        let detector = detector_with(&[&hash]).await;
        assert!(detector.is_duplicate(&hash_bytes(b"image bytes")).await);
    }

    #[tokio::test]
    async fn test_distinct_bytes_are_not_duplicate() {
        let detector = detector_with(&[&hash_bytes(b"first image")]).await;
        assert!(!detector.is_duplicate(&hash_bytes(b"second image")).await);
    }

    #[tokio::test]
    async fn test_stored_hash_quoting_ignored() {
        let hash = hash_bytes(b"quoted");
        let quoted = format!("\"{hash}\" ");
        let detector = detector_with(&[&quoted]).await;
        assert!(detector.is_duplicate(&hash).await);
    }

    #[tokio::test]
    async fn test_empty_hash_never_matches() {
        // Items without images store an empty hash
        let detector = detector_with(&[""]).await;
        assert!(!detector.is_duplicate("").await);
        assert!(!detector.is_duplicate("  ").await);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_not_duplicate() {
        let mut store = MockRecordStore::new();
        store
            .expect_list_all()
            .returning(|_| Err(StoreError::Database(sqlx::Error::PoolTimedOut)));

        let detector = DuplicateDetector::new(ItemCollection::new(Arc::new(store), "groceryItems"));
        assert!(!detector.is_duplicate(&hash_bytes(b"x")).await);
    }
}
