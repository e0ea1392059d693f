// ============================================================================
// Registries service
// ============================================================================
//
// One `Registries` per process: it owns the connection pools and a bounded
// map from database name to loaded registry. A registry is built outside
// of the map and published only once fully loaded, so a failed build
// leaves the previous registry of the database in place.
//
// ============================================================================

use super::Registry;
use super::loading::{LoadOptions, ModuleLoader, load_modules};
use super::signaling::{Changes, Signal};
use crate::config::RegistryConfig;
use crate::connection::config::ConnectionInfo;
use crate::connection::{ConnectionPool, Driver};
use crate::core::{DbError, Result};
use crate::cursor::{BaseCursor, Database};
use lru::LruCache;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

pub struct Registries {
    config: RegistryConfig,
    base_info: ConnectionInfo,
    pool: Arc<ConnectionPool>,
    readonly_pool: Option<Arc<ConnectionPool>>,
    loader: Arc<dyn ModuleLoader>,
    registries: Mutex<LruCache<String, Arc<Registry>>>,
    lock: ReentrantMutex<()>,
    /// Set in test mode: the service lock becomes a no-op.
    dummy_lock: AtomicBool,
}

impl Registries {
    /// `base_info` carries the server and credentials; the database name is
    /// replaced by the one of each registry.
    pub fn new(
        config: RegistryConfig,
        driver: Arc<dyn Driver>,
        base_info: ConnectionInfo,
        loader: Arc<dyn ModuleLoader>,
    ) -> Result<Self> {
        config.validate()?;
        let pool = Arc::new(
            ConnectionPool::new(Arc::clone(&driver), config.db_maxconn).idle_timeout(config.idle_timeout),
        );
        let readonly_pool = config.readonly_replica.then(|| {
            Arc::new(
                ConnectionPool::new(Arc::clone(&driver), config.maxconn_readonly())
                    .readonly(true)
                    .idle_timeout(config.idle_timeout),
            )
        });
        let size = NonZeroUsize::new(config.lru_size()).unwrap_or(NonZeroUsize::MIN);
        log::debug!(target: "ormregistry::registry", "registries LRU sized for {size} databases");
        Ok(Self {
            config,
            base_info,
            pool,
            readonly_pool,
            loader,
            registries: Mutex::new(LruCache::new(size)),
            lock: ReentrantMutex::new(()),
            dummy_lock: AtomicBool::new(false),
        })
    }

    fn lock(&self) -> Option<ReentrantMutexGuard<'_, ()>> {
        if self.dummy_lock.load(Ordering::SeqCst) {
            None
        } else {
            Some(self.lock.lock())
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Handle on `dbname` sharing the service pools.
    pub fn database(&self, dbname: &str) -> Database {
        let info = self.base_info.clone().database(dbname);
        let mut db = Database::new(info, Arc::clone(&self.pool))
            .keep_in_pool(!self.config.is_template(dbname));
        if let Some(replica) = &self.readonly_pool {
            db = db.with_readonly_pool(Arc::clone(replica));
        }
        db
    }

    /// The registry of `dbname`, built when not loaded yet.
    pub fn get(&self, dbname: &str) -> Result<Arc<Registry>> {
        if dbname.is_empty() {
            return Err(DbError::Config("Missing database name".into()));
        }
        let _guard = self.lock();
        if let Some(registry) = self.registries.lock().get(dbname) {
            return Ok(Arc::clone(registry));
        }
        self.new_registry(dbname, &LoadOptions::default())
    }

    /// The registry of `dbname` if loaded, without building it.
    pub fn peek(&self, dbname: &str) -> Option<Arc<Registry>> {
        self.registries.lock().peek(dbname).cloned()
    }

    /// Builds a new registry for `dbname` and publishes it in place of the
    /// current one. On failure the module markers of the database are reset
    /// and the current registry, if any, stays.
    pub fn new_registry(&self, dbname: &str, options: &LoadOptions) -> Result<Arc<Registry>> {
        let _guard = self.lock();
        let start = Instant::now();
        let _span = tracing::info_span!("registry_new", db = %dbname).entered();

        let registry = Arc::new(Registry::new(self.database(dbname), &self.config));
        if let Some(session) = self.peek(dbname).and_then(|current| current.test_session()) {
            registry.set_test_session(Some(session));
        }

        let mut changes = Changes::new();
        let built = registry
            .check_extensions()
            .and_then(|()| registry.setup_signaling())
            .and_then(|()| {
                load_modules(&registry, self.loader.as_ref(), options, &mut changes).inspect_err(|_| {
                    if let Err(e) = self.loader.reset_modules_state(dbname) {
                        log::error!(target: "ormregistry::registry", "resetting modules state of {dbname}: {e}");
                    }
                })
            });
        if let Err(e) = built {
            log::error!(target: "ormregistry::registry", "Failed to load registry");
            return Err(DbError::RegistryLoad {
                db: dbname.to_string(),
                source: Box::new(e),
            });
        }

        registry.mark_ready();
        if options.update_module {
            changes.registry_invalidated = true;
        }
        registry.signal_changes(&mut changes)?;

        if let Some((evicted, _)) = self
            .registries
            .lock()
            .push(dbname.to_string(), Arc::clone(&registry))
            .filter(|(name, _)| name != dbname)
        {
            log::info!(target: "ormregistry::registry", "registry of {evicted} evicted from the LRU");
        }
        log::info!(target: "ormregistry::registry", "Registry loaded in {:.3}s", start.elapsed().as_secs_f64());
        Ok(registry)
    }

    /// Forgets the registry of `dbname`.
    pub fn delete(&self, dbname: &str) -> Option<Arc<Registry>> {
        let _guard = self.lock();
        self.registries.lock().pop(dbname)
    }

    pub fn delete_all(&self) {
        let _guard = self.lock();
        self.registries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.registries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, dbname: &str) -> bool {
        self.registries.lock().contains(dbname)
    }

    /// Names of the loaded databases, most recently used first.
    pub fn names(&self) -> Vec<String> {
        self.registries.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    /// Brings the registry of `dbname` up to date with the other processes:
    /// rebuilt when its registry id moved, partitions cleared otherwise.
    /// Returns the up-to-date registry.
    pub fn check_signaling(&self, dbname: &str) -> Result<Arc<Registry>> {
        let registry = self.get(dbname)?;
        match registry.check_signaling()? {
            Signal::Reload(sequence) => {
                let registry = self.new_registry(dbname, &LoadOptions::default())?;
                registry.set_registry_sequence(sequence);
                Ok(registry)
            }
            Signal::Cleared(_) | Signal::UpToDate => Ok(registry),
        }
    }

    /// Routes every cursor of the registry of `dbname` through `cr`, and
    /// turns the service lock into a no-op.
    pub fn enter_test_mode(&self, dbname: &str, cr: Box<dyn BaseCursor>) -> Result<()> {
        let registry = self.get(dbname)?;
        registry.enter_test_mode(cr)?;
        self.dummy_lock.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Leaves test mode and gives the physical cursor back.
    pub fn leave_test_mode(&self, dbname: &str) -> Result<Box<dyn BaseCursor>> {
        let registry = self
            .peek(dbname)
            .ok_or_else(|| DbError::KeyNotFound(format!("registry of database '{dbname}'")))?;
        let cr = registry.leave_test_mode()?;
        self.dummy_lock.store(false, Ordering::SeqCst);
        Ok(cr)
    }

    pub fn is_test_mode(&self) -> bool {
        self.dummy_lock.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Registries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registries")
            .field("databases", &self.names())
            .field("pool", &self.pool.stats())
            .field("test_mode", &self.is_test_mode())
            .finish()
    }
}
