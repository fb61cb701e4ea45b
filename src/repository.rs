//! The shared class pool and its lifecycle.
//!
//! A [`ClassRepository`] hands out one [`ClassPool`] until it is told to
//! [`recreate`](ClassRepository::recreate) it. Search-path entries added
//! through the repository are recorded so a recreated pool can get them back.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::class_path::ClassPath;
use crate::error::{InstrumentError, Result};
use crate::structured::{SharedClass, StructuredClass};

/// Options applied to every pool a repository builds.
#[derive(Debug, Clone, Default)]
pub struct RepositoryConfig {
    /// Consulted after every prepended and before every appended entry, and kept by every recreated pool.
    pub system_path: Vec<ClassPath>,
}

/// Search path plus the cache of classes read through it.
#[derive(Debug)]
pub struct ClassPool {
    search_path: RwLock<Vec<ClassPath>>,
    classes: Mutex<HashMap<String, SharedClass>>,
}

impl ClassPool {
    pub fn new(system_path: Vec<ClassPath>) -> Self {
        Self { search_path: RwLock::new(system_path), classes: Mutex::new(HashMap::new()) }
    }

    /// Returns the cached class or reads it from the first search-path entry that has it.
    pub fn get(&self, name: &str) -> Result<SharedClass> {
        self.find(name)?.ok_or_else(|| InstrumentError::not_found(name))
    }

    /// Like [`get`](Self::get) but a class missing from every entry is `Ok(None)`.
    pub fn find(&self, name: &str) -> Result<Option<SharedClass>> {
        if let Some(class) = self.classes.lock().get(name) {
            return Ok(Some(Arc::clone(class)));
        }

        let entries = self.search_path.read().clone();
        for entry in &entries {
            let bytes = entry
                .find_class(name)
                .map_err(|source| InstrumentError::Io { name: name.to_owned(), source })?;
            if let Some(bytes) = bytes {
                trace!(class = name, entry = %entry, "Read class");
                let parsed = StructuredClass::parse(name, &bytes)?;
                let mut classes = self.classes.lock();
                let class = classes
                    .entry(name.to_owned())
                    .or_insert_with(|| Arc::new(Mutex::new(parsed)));
                return Ok(Some(Arc::clone(class)));
            }
        }
        Ok(None)
    }

    pub fn append_class_path(&self, entry: ClassPath) {
        self.search_path.write().push(entry);
    }

    pub fn insert_class_path(&self, entry: ClassPath) {
        self.search_path.write().insert(0, entry);
    }

    fn insert_class_path_at(&self, index: usize, entry: ClassPath) {
        let mut search_path = self.search_path.write();
        let index = index.min(search_path.len());
        search_path.insert(index, entry);
    }

    /// Entries in lookup order.
    pub fn search_path(&self) -> Vec<ClassPath> {
        self.search_path.read().clone()
    }

    pub fn cached_classes(&self) -> usize {
        self.classes.lock().len()
    }
}

#[derive(Debug, Default)]
struct PathRegistry {
    system: Vec<ClassPath>,
    prepended: Vec<ClassPath>,
    appended: Vec<ClassPath>,
    preserve: bool,
}

impl PathRegistry {
    /// Records `entry` and applies it to `pool` unless it is already recorded on that side.
    fn register(&mut self, pool: &ClassPool, entry: ClassPath, append: bool) -> bool {
        let recorded = if append { &mut self.appended } else { &mut self.prepended };
        if recorded.contains(&entry) {
            return false;
        }
        if append {
            pool.append_class_path(entry.clone());
        } else {
            pool.insert_class_path(entry.clone());
        }
        recorded.push(entry);
        true
    }
}

/// Owner of the current [`ClassPool`].
#[derive(Debug)]
pub struct ClassRepository {
    current: RwLock<Option<Arc<ClassPool>>>,
    registry: Mutex<PathRegistry>,
}

impl ClassRepository {
    pub fn new(config: RepositoryConfig) -> Self {
        let registry = PathRegistry { system: config.system_path, ..PathRegistry::default() };
        Self { current: RwLock::new(None), registry: Mutex::new(registry) }
    }

    /// Returns the current pool, building it on first use after construction or [`recreate`](Self::recreate).
    pub fn get_pool(&self) -> Arc<ClassPool> {
        if let Some(pool) = self.current.read().as_ref() {
            return Arc::clone(pool);
        }
        let mut registry = self.registry.lock();
        self.pool_locked(&mut registry)
    }

    /// Requires the registry lock; lock order is registry, then `current`.
    fn pool_locked(&self, registry: &mut PathRegistry) -> Arc<ClassPool> {
        let mut current = self.current.write();
        if let Some(pool) = current.as_ref() {
            return Arc::clone(pool);
        }

        let pool = ClassPool::new(registry.system.clone());
        if registry.preserve {
            let prepended = std::mem::take(&mut registry.prepended);
            let appended = std::mem::take(&mut registry.appended);
            for entry in prepended {
                registry.register(&pool, entry, false);
            }
            for entry in appended {
                registry.register(&pool, entry, true);
            }
        }
        debug!(
            prepended = registry.prepended.len(),
            appended = registry.appended.len(),
            "Created class pool"
        );
        let pool = Arc::new(pool);
        *current = Some(Arc::clone(&pool));
        pool
    }

    /// Adds `entry` to the end of the search path. `false` if it was appended before.
    pub fn append_search_path(&self, entry: ClassPath) -> bool {
        self.modify_search_path(entry, true)
    }

    /// Adds `entry` to the head of the search path. `false` if it was prepended before.
    pub fn prepend_search_path(&self, entry: ClassPath) -> bool {
        self.modify_search_path(entry, false)
    }

    /// Adds `entry` after the system path entries already present. Unlike the other
    /// registrations it survives [`recreate`](Self::recreate) either way. `false` if it
    /// is already part of the system path.
    pub fn append_system_path(&self, entry: ClassPath) -> bool {
        let mut registry = self.registry.lock();
        if registry.system.contains(&entry) {
            return false;
        }
        if let Some(pool) = self.current.read().as_ref() {
            pool.insert_class_path_at(registry.prepended.len() + registry.system.len(), entry.clone());
        }
        debug!(entry = %entry, "System path extended");
        registry.system.push(entry);
        true
    }

    fn modify_search_path(&self, entry: ClassPath, append: bool) -> bool {
        let mut registry = self.registry.lock();
        let pool = self.pool_locked(&mut registry);
        let added = registry.register(&pool, entry, append);
        trace!(append, added, "Search path registration");
        added
    }

    /// Drops the current pool. The next [`get_pool`](Self::get_pool) builds a fresh one that
    /// replays recorded entries if `preserve_search_path`, and otherwise forgets them.
    pub fn recreate(&self, preserve_search_path: bool) {
        let mut registry = self.registry.lock();
        *self.current.write() = None;
        registry.preserve = preserve_search_path;
        if !preserve_search_path {
            registry.prepended.clear();
            registry.appended.clear();
        }
        debug!(preserve_search_path, "Class pool invalidated");
    }
}

impl Default for ClassRepository {
    fn default() -> Self {
        Self::new(RepositoryConfig::default())
    }
}
