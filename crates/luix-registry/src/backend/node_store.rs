//! Hierarchical node store used by the tree backend
//!
//! Models the subset of a ZooKeeper-style coordination service the tree
//! backend needs: slash-separated node paths carrying string data, child
//! listing, and persistent child watches.

use crate::{
    error::{Error, Result},
    spawn::{BoxTask, Spawner},
    sync::lock,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Callback fired when the children of a watched node change; receives the
/// watched path and returns the work to run on the store's executor
pub type ChildWatcher = Arc<dyn Fn(String) -> BoxTask + Send + Sync>;

/// Hierarchical node store transport
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Create a node, creating missing parents; fails if it already exists
    async fn create(&self, path: &str, data: &str) -> Result<()>;

    /// Read node data, `None` when the node does not exist
    async fn get_data(&self, path: &str) -> Result<Option<String>>;

    /// Delete a node and its descendants; missing nodes are ignored
    async fn delete(&self, path: &str) -> Result<()>;

    /// Whether a node exists
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Names of the direct children of a node, empty when it does not exist
    async fn children(&self, path: &str) -> Result<Vec<String>>;

    /// Install a persistent child watch, replacing any previous one
    fn watch_children(&self, path: &str, watcher: ChildWatcher);

    /// Remove the child watch of a node
    fn unwatch_children(&self, path: &str);
}

/// In-process node store
pub struct MemoryNodeStore {
    nodes: Mutex<BTreeMap<String, String>>,
    watchers: Mutex<HashMap<String, ChildWatcher>>,
    spawner: Arc<dyn Spawner>,
}

impl MemoryNodeStore {
    /// Create an empty store whose watches fire on `spawner`
    pub fn new(spawner: Arc<dyn Spawner>) -> Self {
        Self {
            nodes: Mutex::new(BTreeMap::new()),
            watchers: Mutex::new(HashMap::new()),
            spawner,
        }
    }

    fn parent(path: &str) -> Option<&str> {
        path.rsplit_once('/')
            .map(|(parent, _)| parent)
            .filter(|p| !p.is_empty())
    }

    fn fire(&self, changed_parents: Vec<String>) {
        let watchers = lock(&self.watchers);
        for parent in changed_parents {
            if let Some(watcher) = watchers.get(&parent) {
                debug!("Child watch fired on {}", parent);
                self.spawner.spawn(watcher(parent.clone()));
            }
        }
    }
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn create(&self, path: &str, data: &str) -> Result<()> {
        let mut changed = Vec::new();
        {
            let mut nodes = lock(&self.nodes);
            if nodes.contains_key(path) {
                return Err(Error::NodeExists(path.to_string()));
            }

            // Materialize missing parents so they show up as children
            let mut missing = Vec::new();
            let mut current = Self::parent(path);
            while let Some(parent) = current {
                if nodes.contains_key(parent) {
                    break;
                }
                missing.push(parent.to_string());
                current = Self::parent(parent);
            }
            for parent in missing.into_iter().rev() {
                if let Some(grandparent) = Self::parent(&parent) {
                    changed.push(grandparent.to_string());
                }
                nodes.insert(parent, String::new());
            }

            nodes.insert(path.to_string(), data.to_string());
            if let Some(parent) = Self::parent(path) {
                changed.push(parent.to_string());
            }
        }
        self.fire(changed);
        Ok(())
    }

    async fn get_data(&self, path: &str) -> Result<Option<String>> {
        Ok(lock(&self.nodes).get(path).cloned())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let removed = {
            let mut nodes = lock(&self.nodes);
            let prefix = format!("{}/", path);
            let descendants: Vec<String> = nodes
                .range(prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&prefix))
                .map(|(k, _)| k.clone())
                .collect();
            for key in descendants {
                nodes.remove(&key);
            }
            nodes.remove(path).is_some()
        };

        if removed {
            if let Some(parent) = Self::parent(path) {
                self.fire(vec![parent.to_string()]);
            }
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(lock(&self.nodes).contains_key(path))
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        let nodes = lock(&self.nodes);
        let prefix = format!("{}/", path);
        Ok(nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, _)| {
                let name = &k[prefix.len()..];
                (!name.contains('/')).then(|| name.to_string())
            })
            .collect())
    }

    fn watch_children(&self, path: &str, watcher: ChildWatcher) {
        lock(&self.watchers).insert(path.to_string(), watcher);
    }

    fn unwatch_children(&self, path: &str) {
        lock(&self.watchers).remove(path);
    }
}
