use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::store::Store;

#[derive(Debug, Default)]
struct Inner {
    kv: HashMap<String, Vec<u8>>,
    lists: HashMap<String, VecDeque<String>>,
    // (score, member) ordering gives score order with member tie-breaking.
    zsets: HashMap<String, BTreeSet<(i64, String)>>,
}

/// In-process store backed by a single lock.
///
/// One mutex over all three keyspaces makes every operation, in particular
/// [`Store::lpop`], atomic with respect to concurrent workers on the same
/// runtime. Suited to tests and single-process deployments; multi-process
/// setups plug in an external adapter implementing [`Store`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.lock().await;
        Ok(inner.kv.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.kv.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let existed = inner.kv.remove(key).is_some();
        let had_list = inner.lists.remove(key).is_some();
        let had_zset = inner.zsets.remove(key).is_some();
        Ok(existed || had_list || had_zset)
    }

    async fn rpush(&self, key: &str, member: String) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.lists.entry(key.to_string()).or_default().push_back(member);
        Ok(())
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.inner.lock().await;
        Ok(inner.lists.get_mut(key).and_then(VecDeque::pop_front))
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        let inner = self.inner.lock().await;
        Ok(inner.lists.get(key).map_or(0, VecDeque::len))
    }

    async fn zadd(&self, key: &str, score: i64, member: String) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let set = inner.zsets.entry(key.to_string()).or_default();
        set.retain(|(_, m)| m != &member);
        set.insert((score, member));
        Ok(())
    }

    async fn zpop_le(&self, key: &str, max_score: i64) -> Result<Vec<String>> {
        let mut inner = self.inner.lock().await;
        let Some(set) = inner.zsets.get_mut(key) else {
            return Ok(Vec::new());
        };
        let due: Vec<(i64, String)> = set
            .iter()
            .take_while(|(score, _)| *score <= max_score)
            .cloned()
            .collect();
        for entry in &due {
            set.remove(entry);
        }
        Ok(due.into_iter().map(|(_, member)| member).collect())
    }

    async fn zcard(&self, key: &str) -> Result<usize> {
        let inner = self.inner.lock().await;
        Ok(inner.zsets.get(key).map_or(0, BTreeSet::len))
    }
}
