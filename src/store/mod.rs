//! Document store port and the optimistic transaction built on top of it.
//!
//! A [`Txn`] records the version of every document it reads and buffers
//! every write. [`DocumentStore::commit`] applies the buffered writes only if
//! none of the read documents changed in the meantime; otherwise it fails
//! with [`StoreError::Conflict`] and [`run_transaction`] re-runs the body
//! against fresh reads.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{LedgerError, LedgerResult, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Users,
    ReferralCodes,
    Wallets,
    WalletEntries,
    FinancialRequests,
    CommissionEvents,
    Purchases,
    AuditLogs,
    Notifications,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::ReferralCodes => "referral_codes",
            Self::Wallets => "wallets",
            Self::WalletEntries => "wallet_entries",
            Self::FinancialRequests => "financial_requests",
            Self::CommissionEvents => "commission_events",
            Self::Purchases => "purchases",
            Self::AuditLogs => "audit_logs",
            Self::Notifications => "notifications",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored document together with its optimistic-concurrency version.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub id: String,
    pub version: u64,
    pub data: Value,
}

/// Version observed by a transaction read. `None` means the document was absent.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadStamp {
    pub collection: Collection,
    pub id: String,
    pub version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Create or replace.
    Put {
        collection: Collection,
        id: String,
        data: Value,
    },
    /// Insert only; fails with [`StoreError::AlreadyExists`] if the id is taken.
    Create {
        collection: Collection,
        id: String,
        data: Value,
    },
}

impl WriteOp {
    pub fn key(&self) -> (Collection, &str) {
        match self {
            WriteOp::Put { collection, id, .. } | WriteOp::Create { collection, id, .. } => {
                (*collection, id.as_str())
            }
        }
    }
}

/// Storage backend for the ledger's document collections.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Versioned>, StoreError>;

    /// Documents whose string field at `path` (dot separated) equals `value`.
    async fn query_eq(
        &self,
        collection: Collection,
        path: &str,
        value: &str,
    ) -> Result<Vec<Versioned>, StoreError>;

    /// Atomically validates `reads` and applies `writes`.
    async fn commit(&self, reads: Vec<ReadStamp>, writes: Vec<WriteOp>) -> Result<(), StoreError>;
}

/// Optimistic read-modify-write transaction over a [`DocumentStore`].
pub struct Txn {
    store: Arc<dyn DocumentStore>,
    reads: HashMap<(Collection, String), Option<u64>>,
    staged: HashMap<(Collection, String), Value>,
    writes: Vec<WriteOp>,
    started_at: DateTime<Utc>,
}

impl Txn {
    pub fn begin(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            reads: HashMap::new(),
            staged: HashMap::new(),
            writes: Vec::new(),
            started_at: Utc::now(),
        }
    }

    /// Timestamp shared by every record written in this attempt.
    pub fn now(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Reads a document, seeing this transaction's own staged writes first.
    pub async fn get<T: DeserializeOwned>(
        &mut self,
        collection: Collection,
        id: &str,
    ) -> LedgerResult<Option<T>> {
        let key = (collection, id.to_string());
        if let Some(staged) = self.staged.get(&key) {
            return Ok(Some(serde_json::from_value(staged.clone())?));
        }

        let doc = self.store.get(collection, id).await?;
        self.reads
            .entry(key)
            .or_insert(doc.as_ref().map(|d| d.version));
        match doc {
            Some(d) => Ok(Some(serde_json::from_value(d.data)?)),
            None => Ok(None),
        }
    }

    /// Like [`Txn::get`] but a missing document is [`LedgerError::RecordNotFound`].
    pub async fn require<T: DeserializeOwned>(
        &mut self,
        collection: Collection,
        id: &str,
    ) -> LedgerResult<T> {
        self.get(collection, id)
            .await?
            .ok_or_else(|| LedgerError::not_found(collection.as_str(), id))
    }

    /// Non-transactional query; results are not version-tracked.
    pub async fn query_eq<T: DeserializeOwned>(
        &self,
        collection: Collection,
        path: &str,
        value: &str,
    ) -> LedgerResult<Vec<T>> {
        let docs = self.store.query_eq(collection, path, value).await?;
        docs.into_iter()
            .map(|d| serde_json::from_value(d.data).map_err(LedgerError::from))
            .collect()
    }

    pub fn put<T: Serialize>(&mut self, collection: Collection, id: &str, doc: &T) -> LedgerResult<()> {
        let data = serde_json::to_value(doc)?;
        self.staged.insert((collection, id.to_string()), data.clone());

        let existing = self.writes.iter_mut().find(|w| w.key() == (collection, id));
        match existing {
            Some(WriteOp::Put { data: slot, .. }) | Some(WriteOp::Create { data: slot, .. }) => {
                *slot = data;
            }
            None => self.writes.push(WriteOp::Put {
                collection,
                id: id.to_string(),
                data,
            }),
        }
        Ok(())
    }

    pub fn create<T: Serialize>(
        &mut self,
        collection: Collection,
        id: &str,
        doc: &T,
    ) -> LedgerResult<()> {
        let key = (collection, id.to_string());
        if self.staged.contains_key(&key) {
            return Err(LedgerError::DuplicateRecord {
                collection: collection.as_str().to_string(),
                id: id.to_string(),
            });
        }
        let data = serde_json::to_value(doc)?;
        self.staged.insert(key, data.clone());
        self.writes.push(WriteOp::Create {
            collection,
            id: id.to_string(),
            data,
        });
        Ok(())
    }

    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        if self.writes.is_empty() {
            return Ok(());
        }
        let reads = self
            .reads
            .into_iter()
            .map(|((collection, id), version)| ReadStamp {
                collection,
                id,
                version,
            })
            .collect();
        self.store.commit(reads, self.writes).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Sleep before retry `n` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(10),
        }
    }
}

/// Runs `body` in a fresh [`Txn`] and commits it, retrying on write conflicts.
///
/// An error from `body` aborts the attempt without writing anything.
pub async fn run_transaction<T, F>(
    store: &Arc<dyn DocumentStore>,
    policy: RetryPolicy,
    mut body: F,
) -> LedgerResult<T>
where
    T: Send,
    F: FnMut(&mut Txn) -> BoxFuture<'_, LedgerResult<T>> + Send,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut tx = Txn::begin(Arc::clone(store));
        let value = body(&mut tx).await?;
        debug!(attempt, writes = tx.pending_writes(), "committing transaction");

        match tx.commit().await {
            Ok(()) => return Ok(value),
            Err(StoreError::Conflict { collection, id }) if attempt < max_attempts => {
                warn!(attempt, %collection, %id, "transaction conflict, retrying");
                tokio::time::sleep(policy.backoff * attempt).await;
            }
            Err(StoreError::Conflict { .. }) => {
                return Err(LedgerError::TransactionConflict { attempts: attempt });
            }
            Err(e) => return Err(e.into()),
        }
    }
}
