//! Name- and loader-based access to pooled classes.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::class_path::{ClassLoaderHandle, ClassPath};
use crate::error::{ErrorChain, ErrorKind, Result};
use crate::lock::{FairReentrantRwLock, ReadGuard, WriteGuard};
use crate::repository::{ClassRepository, RepositoryConfig};
use crate::structured::{SharedClass, StructuredClass};

/// Entry point for reading and serializing classes.
///
/// Class names may be given in dotted (`a.b.C`) or internal (`a/b/C`) form.
/// The facade also owns the lock that lets a multi-step sequence (renew,
/// fetch, serialize) run without interleaving `transform` calls: those take
/// it in shared mode, [`lock`](Self::lock) takes it exclusively.
#[derive(Debug)]
pub struct ClassAccessFacade {
    repository: ClassRepository,
    lock: FairReentrantRwLock,
}

impl ClassAccessFacade {
    pub fn new(config: RepositoryConfig) -> Self {
        Self::with_repository(ClassRepository::new(config))
    }

    pub fn with_repository(repository: ClassRepository) -> Self {
        Self { repository, lock: FairReentrantRwLock::new() }
    }

    pub fn repository(&self) -> &ClassRepository {
        &self.repository
    }

    pub fn get_class(&self, name: &str) -> Result<SharedClass> {
        self.repository.get_pool().get(&dotted(name))
    }

    pub fn get_class_or_none(&self, name: &str) -> Option<SharedClass> {
        match self.repository.get_pool().get(&dotted(name)) {
            Ok(class) => Some(class),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!(class = name, "Can't read class: {}", ErrorChain(&e));
                None
            }
        }
    }

    /// Resolves `name` for a class being defined by `loader` (`None` is the bootstrap loader).
    ///
    /// On a miss the loader itself is appended to the search path and the lookup repeated.
    pub fn get_class_for_loader(
        &self,
        loader: Option<&Arc<dyn ClassLoaderHandle>>,
        name: &str,
    ) -> Result<SharedClass> {
        let Some(loader) = loader else {
            return self.get_class(name);
        };
        if let Some(class) = self.get_class_or_none(name) {
            return Ok(class);
        }
        if self.repository.append_search_path(ClassPath::loader(Arc::clone(loader))) {
            debug!(class = name, loader = %loader.describe(), "Appended class loader to the search path");
        }
        self.get_class(name)
    }

    /// Serializes `class` and freezes it.
    pub fn get_bytes(&self, class: &mut StructuredClass) -> Result<Vec<u8>> {
        Ok(class.to_bytecode())
    }

    /// See [`ClassRepository::recreate`].
    pub fn renew(&self, preserve_search_path: bool) {
        self.repository.recreate(preserve_search_path);
    }

    pub fn append_search_path(&self, entry: ClassPath) -> bool {
        self.repository.append_search_path(entry)
    }

    pub fn prepend_search_path(&self, entry: ClassPath) -> bool {
        self.repository.prepend_search_path(entry)
    }

    /// See [`ClassRepository::append_system_path`].
    pub fn append_system_path(&self, entry: ClassPath) -> bool {
        self.repository.append_system_path(entry)
    }

    /// Effective lookup order of the current pool.
    pub fn search_path(&self) -> Vec<ClassPath> {
        self.repository.get_pool().search_path()
    }

    /// Takes the facade lock exclusively. Reentrant; pair every call with [`unlock`](Self::unlock).
    pub fn lock(&self) -> Result<()> {
        self.lock.lock_exclusive()
    }

    pub fn unlock(&self) -> Result<()> {
        self.lock.unlock_exclusive()
    }

    pub fn exclusive(&self) -> Result<WriteGuard<'_>> {
        self.lock.write()
    }

    pub fn shared(&self) -> ReadGuard<'_> {
        self.lock.read()
    }

    pub fn is_locked_by_current_thread(&self) -> bool {
        self.lock.is_held_exclusively()
    }
}

impl Default for ClassAccessFacade {
    fn default() -> Self {
        Self::new(RepositoryConfig::default())
    }
}

fn dotted(name: &str) -> String {
    name.replace('/', ".")
}

