// ============================================================================
// Model registry
// ============================================================================
//
// A `Registry` holds, for one database:
//
//   - the composed models and their field dependencies (`ModelGraph`),
//     replaced as a whole by every load or setup
//   - values derived from the graph (trigger trees, inverses), memoized
//     per graph generation
//   - the cache partitions and the signaling ids seen last
//   - the state of the running table initialization
//
// `Registries` is the per-process service mapping database names to
// registries.
//
// ============================================================================

pub mod dependencies;
pub mod field;
pub mod loading;
pub mod model;
pub mod reconcile;
pub mod reflection;
pub mod registries;
pub mod schema;
pub mod setup;
pub mod signaling;
pub mod triggers;

pub use dependencies::{FieldInverses, FieldTriggers};
pub use field::{Field, FieldId, FieldType, IndexKind};
pub use loading::{LoadOptions, ModuleLoader, ModuleState, StaticLoader, load_modules};
pub use model::{Model, ModelDef, ModelHooks, ModelKind, Module, SqlConstraint};
pub use reconcile::{ConstraintFn, ForeignKey};
pub use registries::Registries;
pub use setup::ModelGraph;
pub use signaling::{Changes, Sequences, Signal, signaling_table};
pub use triggers::TriggerTree;

use crate::cache::{CacheLayout, Caches, OrmCache};
use crate::config::RegistryConfig;
use crate::core::{DbError, Params, Result, Value};
use crate::cursor::{BaseCursor, Database, TestCursor, TestSession, scoped};
use indexmap::IndexSet;
use parking_lot::{Mutex, RwLock};
use reconcile::InitState;
use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use triggers::TriggerMemo;

pub struct Registry {
    dbname: String,
    db: Database,
    pub(crate) caches: Caches,
    pub(crate) layout: CacheLayout,
    pub(crate) graph: RwLock<Arc<ModelGraph>>,
    pub(crate) memo: Mutex<TriggerMemo>,
    /// Serializes `load`, `setup_models` and `discard_fields`.
    pub(crate) setup_lock: Mutex<()>,
    pub(crate) sequences: Mutex<Sequences>,
    /// Set once every module is loaded.
    pub(crate) loaded: AtomicBool,
    /// Set once the registry is published and usable.
    pub(crate) ready: AtomicBool,
    test_session: RwLock<Option<Arc<TestSession>>>,
    test_lock_timeout: Duration,
    pub(crate) init: Mutex<InitState>,
    pub(crate) ordinary_tables: Mutex<Option<HashSet<String>>>,
    pub(crate) not_null_fields: RwLock<IndexSet<FieldId>>,
    has_unaccent: AtomicBool,
    has_trigram: AtomicBool,
}

impl Registry {
    pub fn new(db: Database, config: &RegistryConfig) -> Self {
        let layout = config.cache_layout.clone();
        Self {
            dbname: db.dbname().to_string(),
            db,
            caches: Caches::new(&layout),
            layout,
            graph: RwLock::new(Arc::new(ModelGraph::default())),
            memo: Mutex::new(TriggerMemo::default()),
            setup_lock: Mutex::new(()),
            sequences: Mutex::new(Sequences::default()),
            loaded: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            test_session: RwLock::new(None),
            test_lock_timeout: config.test_lock_timeout,
            init: Mutex::new(InitState::default()),
            ordinary_tables: Mutex::new(None),
            not_null_fields: RwLock::new(IndexSet::new()),
            has_unaccent: AtomicBool::new(false),
            has_trigram: AtomicBool::new(false),
        }
    }

    pub fn dbname(&self) -> &str {
        &self.dbname
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Snapshot of the current models.
    pub fn graph(&self) -> Arc<ModelGraph> {
        Arc::clone(&self.graph.read())
    }

    pub fn model(&self, name: &str) -> Result<Model> {
        self.graph()
            .model(name)
            .cloned()
            .ok_or_else(|| DbError::KeyNotFound(format!("model '{name}'")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.graph().models.contains_key(name)
    }

    pub fn model_names(&self) -> Vec<String> {
        self.graph().models.keys().cloned().collect()
    }

    /// Number of models.
    pub fn len(&self) -> usize {
        self.graph().models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `names` and the models inheriting from them, transitively.
    pub fn descendants(&self, names: &[&str], inherit: bool, inherits: bool) -> IndexSet<String> {
        self.graph().descendants(names.iter().copied(), inherit, inherits)
    }

    pub fn field_depends(&self, field: &FieldId) -> Vec<String> {
        self.graph().field_depends.get(field).cloned().unwrap_or_default()
    }

    pub fn field_depends_context(&self, field: &FieldId) -> Vec<String> {
        self.graph()
            .field_depends_context
            .get(field)
            .cloned()
            .unwrap_or_default()
    }

    /// Required fields known to be backed by a NOT NULL column.
    pub fn not_null_fields(&self) -> IndexSet<FieldId> {
        self.not_null_fields.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_loaded(&self) {
        self.loaded.store(true, Ordering::SeqCst);
    }

    pub(crate) fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn caches(&self) -> &Caches {
        &self.caches
    }

    pub fn cache_layout(&self) -> &CacheLayout {
        &self.layout
    }

    /// Memoized result of `cache` for `args` on `model`.
    pub fn cached<T, F>(
        &self,
        cache: &OrmCache,
        model: &str,
        args: Vec<Value>,
        compute: F,
    ) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Result<T>,
    {
        cache.lookup(&self.caches, &self.dbname, model, args, compute)
    }

    /// A new cursor on the database: a test cursor in test mode, otherwise
    /// a real one (on the replica when `readonly` and one is configured).
    #[track_caller]
    pub fn cursor(&self, readonly: bool) -> Result<Box<dyn BaseCursor>> {
        if let Some(session) = self.test_session() {
            return Ok(Box::new(TestCursor::new(session, readonly)?));
        }
        Ok(Box::new(self.db.cursor(readonly)?))
    }

    /// Reads the database extensions the registry can take advantage of.
    pub fn check_extensions(&self) -> Result<()> {
        let extensions = scoped(self.cursor(true)?, |cr| {
            cr.execute("SELECT extname FROM pg_extension", &Params::None)
        })?
        .column("extname")?;
        let has = |name: &str| extensions.iter().any(|v| v.as_str() == Some(name));
        self.has_unaccent.store(has("unaccent"), Ordering::SeqCst);
        self.has_trigram.store(has("pg_trgm"), Ordering::SeqCst);
        Ok(())
    }

    pub fn has_unaccent(&self) -> bool {
        self.has_unaccent.load(Ordering::SeqCst)
    }

    pub fn has_trigram(&self) -> bool {
        self.has_trigram.load(Ordering::SeqCst)
    }

    pub fn in_test_mode(&self) -> bool {
        self.test_session.read().is_some()
    }

    pub(crate) fn test_session(&self) -> Option<Arc<TestSession>> {
        self.test_session.read().clone()
    }

    pub(crate) fn set_test_session(&self, session: Option<Arc<TestSession>>) {
        *self.test_session.write() = session;
    }

    /// Makes every cursor of the registry a test cursor on top of `cr`.
    pub fn enter_test_mode(&self, cr: Box<dyn BaseCursor>) -> Result<()> {
        let mut session = self.test_session.write();
        if session.is_some() {
            return Err(DbError::Interface(format!(
                "registry of {} is already in test mode",
                self.dbname
            )));
        }
        *session = Some(TestSession::new(cr, self.test_lock_timeout));
        log::debug!(target: "ormregistry::registry", "registry of {} entered test mode", self.dbname);
        Ok(())
    }

    /// Leaves test mode and gives the physical cursor back. Fails while
    /// test cursors are still open.
    pub fn leave_test_mode(&self) -> Result<Box<dyn BaseCursor>> {
        let mut slot = self.test_session.write();
        let Some(session) = slot.take() else {
            return Err(DbError::Interface(format!(
                "registry of {} is not in test mode",
                self.dbname
            )));
        };
        if Arc::strong_count(&session) > 1 {
            *slot = Some(session);
            return Err(DbError::Interface("test cursors are still open".into()));
        }
        drop(slot);
        log::debug!(target: "ormregistry::registry", "registry of {} left test mode", self.dbname);
        session
            .into_cursor()
            .ok_or_else(|| DbError::Interface("test session still shared".into()))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("dbname", &self.dbname)
            .field("models", &self.len())
            .field("ready", &self.is_ready())
            .field("test_mode", &self.in_test_mode())
            .finish()
    }
}
