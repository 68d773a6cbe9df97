//! Chain store
//!
//! Blocks and transactions are stored under their id. The validator only reads
//! previous outputs and writes accepted blocks, so the interface is a keyed
//! get/contains/put in blocking and cancellable async forms.

use crate::error::{ConsensusError, Result};
use crate::types::*;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A value held by the chain store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainItem {
    Block(Arc<Block>),
    Transaction(Arc<Transaction>),
}

impl ChainItem {
    pub fn id(&self) -> Hash {
        match self {
            ChainItem::Block(block) => block.id(),
            ChainItem::Transaction(tx) => tx.id(),
        }
    }

    pub fn as_block(&self) -> Option<&Arc<Block>> {
        match self {
            ChainItem::Block(block) => Some(block),
            ChainItem::Transaction(_) => None,
        }
    }

    pub fn as_transaction(&self) -> Option<&Arc<Transaction>> {
        match self {
            ChainItem::Transaction(tx) => Some(tx),
            ChainItem::Block(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChainItem::Block(_) => "block",
            ChainItem::Transaction(_) => "transaction",
        }
    }
}

impl From<Block> for ChainItem {
    fn from(block: Block) -> Self {
        ChainItem::Block(Arc::new(block))
    }
}

impl From<Transaction> for ChainItem {
    fn from(tx: Transaction) -> Self {
        ChainItem::Transaction(Arc::new(tx))
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(ConsensusError::Cancelled);
    }
    Ok(())
}

/// Keyed storage of blocks and transactions.
///
/// `put` of an id already present succeeds when the stored item is equal and
/// fails with [`ConsensusError::Conflict`] otherwise.
#[async_trait]
pub trait ChainStore: Send + Sync {
    fn try_get(&self, id: &Hash) -> Result<Option<ChainItem>>;

    fn contains(&self, id: &Hash) -> Result<bool>;

    fn put(&self, item: ChainItem) -> Result<()>;

    async fn try_get_async(&self, id: &Hash, cancel: &CancellationToken) -> Result<Option<ChainItem>> {
        check_cancelled(cancel)?;
        self.try_get(id)
    }

    async fn contains_async(&self, id: &Hash, cancel: &CancellationToken) -> Result<bool> {
        check_cancelled(cancel)?;
        self.contains(id)
    }

    async fn put_async(&self, item: ChainItem, cancel: &CancellationToken) -> Result<()> {
        check_cancelled(cancel)?;
        self.put(item)
    }
}

/// In-memory chain store
#[derive(Debug, Default)]
pub struct MemoryChainStore {
    items: RwLock<HashMap<Hash, ChainItem>>,
}

impl MemoryChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl ChainStore for MemoryChainStore {
    fn try_get(&self, id: &Hash) -> Result<Option<ChainItem>> {
        Ok(self.items.read().get(id).cloned())
    }

    fn contains(&self, id: &Hash) -> Result<bool> {
        Ok(self.items.read().contains_key(id))
    }

    fn put(&self, item: ChainItem) -> Result<()> {
        let id = item.id();
        match self.items.write().entry(id) {
            Entry::Occupied(existing) => {
                if existing.get() == &item {
                    Ok(())
                } else {
                    Err(ConsensusError::Conflict(format!(
                        "{} {} already stored with different content",
                        item.kind(),
                        display_hash(&id)
                    )))
                }
            }
            Entry::Vacant(slot) => {
                debug!(id = %display_hash(&id), kind = item.kind(), "stored chain item");
                slot.insert(item);
                Ok(())
            }
        }
    }
}

/// Wraps a store so that every write is refused
#[derive(Debug)]
pub struct ReadOnlyChainStore<S> {
    inner: S,
}

impl<S: ChainStore> ReadOnlyChainStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: ChainStore> ChainStore for ReadOnlyChainStore<S> {
    fn try_get(&self, id: &Hash) -> Result<Option<ChainItem>> {
        self.inner.try_get(id)
    }

    fn contains(&self, id: &Hash) -> Result<bool> {
        self.inner.contains(id)
    }

    fn put(&self, item: ChainItem) -> Result<()> {
        Err(ConsensusError::Unsupported(format!(
            "read-only chain store cannot store {} {}",
            item.kind(),
            display_hash(&item.id())
        )))
    }

    async fn try_get_async(&self, id: &Hash, cancel: &CancellationToken) -> Result<Option<ChainItem>> {
        self.inner.try_get_async(id, cancel).await
    }

    async fn contains_async(&self, id: &Hash, cancel: &CancellationToken) -> Result<bool> {
        self.inner.contains_async(id, cancel).await
    }
}
