use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{Collection, DocumentStore, ReadStamp, Versioned, WriteOp};
use crate::error::StoreError;

type Key = (Collection, String);

/// In-process document store. Used when no database is configured and in tests.
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<HashMap<Key, Versioned>>,
    failing_reads: RwLock<HashSet<Key>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later `get` of the document fail with a backend error.
    pub async fn fail_reads_of(&self, collection: Collection, id: &str) {
        self.failing_reads
            .write()
            .await
            .insert((collection, id.to_string()));
    }

    pub async fn clear_failures(&self) {
        self.failing_reads.write().await.clear();
    }

    pub async fn count(&self, collection: Collection) -> usize {
        self.docs
            .read()
            .await
            .keys()
            .filter(|(c, _)| *c == collection)
            .count()
    }
}

/// Looks up a dot-separated path such as `details.kind`.
fn field_at<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |cur, part| cur.get(part))
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Versioned>, StoreError> {
        let key = (collection, id.to_string());
        if self.failing_reads.read().await.contains(&key) {
            return Err(StoreError::Backend(format!(
                "injected read failure on {collection}/{id}"
            )));
        }
        Ok(self.docs.read().await.get(&key).cloned())
    }

    async fn query_eq(
        &self,
        collection: Collection,
        path: &str,
        value: &str,
    ) -> Result<Vec<Versioned>, StoreError> {
        let docs = self.docs.read().await;
        let mut found: Vec<Versioned> = docs
            .iter()
            .filter(|((c, _), _)| *c == collection)
            .filter(|(_, doc)| field_at(&doc.data, path).and_then(Value::as_str) == Some(value))
            .map(|(_, doc)| doc.clone())
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn commit(&self, reads: Vec<ReadStamp>, writes: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut docs = self.docs.write().await;

        for read in &reads {
            let current = docs
                .get(&(read.collection, read.id.clone()))
                .map(|d| d.version);
            if current != read.version {
                return Err(StoreError::Conflict {
                    collection: read.collection.to_string(),
                    id: read.id.clone(),
                });
            }
        }

        for write in &writes {
            if let WriteOp::Create { collection, id, .. } = write {
                if docs.contains_key(&(*collection, id.clone())) {
                    return Err(StoreError::AlreadyExists {
                        collection: collection.to_string(),
                        id: id.clone(),
                    });
                }
            }
        }

        for write in writes {
            let (collection, id, data) = match write {
                WriteOp::Put {
                    collection,
                    id,
                    data,
                }
                | WriteOp::Create {
                    collection,
                    id,
                    data,
                } => (collection, id, data),
            };
            let key = (collection, id.clone());
            let version = docs.get(&key).map(|d| d.version + 1).unwrap_or(1);
            docs.insert(key, Versioned { id, version, data });
        }
        Ok(())
    }
}
