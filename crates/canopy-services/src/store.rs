use anyhow::{bail, Result};
use canopy_core::crypto::Hash;
use canopy_core::tx::Tx;
use dashmap::DashMap;
use std::sync::Arc;

/// Transaction persistence consumed by the host.
pub trait Store: Send + Sync {
    fn start(&self) -> Result<()>;

    fn have_tx(&self, hash: &Hash) -> Result<bool>;

    /// Persist a signed transaction. Adding a known hash is a no-op.
    fn add_tx(&self, tx: &Tx) -> Result<()>;
}

/// In-memory transaction store
#[derive(Clone, Default)]
pub struct MemoryStore {
    /// hash -> tx
    txs: Arc<DashMap<Hash, Tx>>,
    /// url -> hashes in arrival order
    by_url: Arc<DashMap<String, Vec<Hash>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_tx(&self, hash: &Hash) -> Option<Tx> {
        self.txs.get(hash).map(|tx| tx.clone())
    }

    /// All transactions for a URL, oldest first
    pub fn txs_for_url(&self, url: &str) -> Vec<Tx> {
        self.by_url
            .get(url)
            .map(|hashes| hashes.iter().filter_map(|h| self.get_tx(h)).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }
}

impl Store for MemoryStore {
    fn start(&self) -> Result<()> {
        Ok(())
    }

    fn have_tx(&self, hash: &Hash) -> Result<bool> {
        Ok(self.txs.contains_key(hash))
    }

    fn add_tx(&self, tx: &Tx) -> Result<()> {
        if !tx.is_signed() {
            bail!("refusing to store unsigned tx {}", tx.hash().pretty());
        }
        let hash = tx.hash();
        if self.txs.insert(hash, tx.clone()).is_none() {
            self.by_url.entry(tx.url.clone()).or_default().push(hash);
        }
        Ok(())
    }
}
