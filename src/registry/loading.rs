use super::Registry;
use super::model::Module;
use super::signaling::Changes;
use crate::core::Result;
use crate::cursor::BaseCursor;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleState {
    Installed,
    ToInstall,
    ToUpgrade,
}

/// Source of the modules of a database, in dependency order.
pub trait ModuleLoader: Send + Sync {
    fn modules(&self, dbname: &str) -> Result<Vec<(Module, ModuleState)>>;

    fn mark_installed(&self, dbname: &str, module: &str) -> Result<()>;

    /// Puts the markers of pending installs and upgrades back in a safe
    /// state after a failed load.
    fn reset_modules_state(&self, dbname: &str) -> Result<()>;
}

/// Fixed list of modules, with their state tracked per database.
#[derive(Debug, Default)]
pub struct StaticLoader {
    modules: RwLock<Vec<Module>>,
    states: Mutex<HashMap<(String, String), ModuleState>>,
    resets: AtomicUsize,
}

impl StaticLoader {
    pub fn new(modules: Vec<Module>) -> Self {
        Self {
            modules: RwLock::new(modules),
            ..Self::default()
        }
    }

    /// Appends a module; databases that already load the others will
    /// install it on their next load.
    pub fn add_module(&self, module: Module) {
        self.modules.write().push(module);
    }

    pub fn state(&self, dbname: &str, module: &str) -> ModuleState {
        self.states
            .lock()
            .get(&(dbname.to_string(), module.to_string()))
            .copied()
            .unwrap_or(ModuleState::ToInstall)
    }

    pub fn set_state(&self, dbname: &str, module: &str, state: ModuleState) {
        self.states
            .lock()
            .insert((dbname.to_string(), module.to_string()), state);
    }

    /// Number of `reset_modules_state` calls so far.
    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

impl ModuleLoader for StaticLoader {
    fn modules(&self, dbname: &str) -> Result<Vec<(Module, ModuleState)>> {
        Ok(self
            .modules
            .read()
            .iter()
            .map(|module| (module.clone(), self.state(dbname, &module.name)))
            .collect())
    }

    fn mark_installed(&self, dbname: &str, module: &str) -> Result<()> {
        self.set_state(dbname, module, ModuleState::Installed);
        Ok(())
    }

    fn reset_modules_state(&self, dbname: &str) -> Result<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        let mut states = self.states.lock();
        for ((db, _), state) in states.iter_mut() {
            if db == dbname && *state == ModuleState::ToUpgrade {
                *state = ModuleState::Installed;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Update the tables of installed modules too.
    pub update_module: bool,
}

impl LoadOptions {
    pub fn update_module(mut self, update: bool) -> Self {
        self.update_module = update;
        self
    }
}

/// Loads the modules of the registry's database one by one: their models
/// are merged and set up, and their tables initialized when they are
/// installed or upgraded. Each module is committed on its own.
pub fn load_modules(
    registry: &Registry,
    loader: &dyn ModuleLoader,
    options: &LoadOptions,
    changes: &mut Changes,
) -> Result<()> {
    let dbname = registry.dbname().to_string();
    let _span = tracing::info_span!("load_modules", db = %dbname).entered();
    let modules = loader.modules(&dbname)?;
    log::info!(target: "ormregistry::registry", "loading {} modules...", modules.len());

    let mut cr = registry.cursor(false)?;
    let result = load_modules_with(registry, loader, options, changes, &mut *cr, &dbname, modules);
    let closed = cr.close();
    result?;
    closed
}

fn load_modules_with(
    registry: &Registry,
    loader: &dyn ModuleLoader,
    options: &LoadOptions,
    changes: &mut Changes,
    cr: &mut dyn BaseCursor,
    dbname: &str,
    modules: Vec<(Module, ModuleState)>,
) -> Result<()> {
    for (module, state) in &modules {
        let affected = registry.load(module)?;
        registry.setup_models(cr)?;

        let needs_init = *state != ModuleState::Installed || options.update_module;
        if needs_init {
            let names: Vec<String> = affected.into_iter().collect();
            registry.init_models(cr, &names, Some(&module.name), *state == ModuleState::ToInstall)?;
            if *state != ModuleState::Installed {
                changes.registry_invalidated = true;
            }
        }
        cr.commit()?;
        if *state != ModuleState::Installed {
            loader.mark_installed(dbname, &module.name)?;
        }
        log::debug!(target: "ormregistry::registry", "module {} loaded ({state:?})", module.name);
    }

    registry.finalize_constraints(cr)?;
    registry.check_null_constraints(cr)?;
    cr.commit()?;
    if options.update_module {
        changes.registry_invalidated = true;
    }
    registry.mark_loaded();
    log::info!(target: "ormregistry::registry", "{} modules loaded.", modules.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_only_touches_upgrades_of_the_database() {
        let loader = StaticLoader::new(vec![Module::new("base"), Module::new("sale")]);
        loader.set_state("db1", "base", ModuleState::ToUpgrade);
        loader.set_state("db1", "sale", ModuleState::ToInstall);
        loader.set_state("db2", "base", ModuleState::ToUpgrade);

        loader.reset_modules_state("db1").unwrap();

        assert_eq!(loader.state("db1", "base"), ModuleState::Installed);
        assert_eq!(loader.state("db1", "sale"), ModuleState::ToInstall);
        assert_eq!(loader.state("db2", "base"), ModuleState::ToUpgrade);
        assert_eq!(loader.resets(), 1);
    }

    #[test]
    fn test_modules_default_to_install() {
        let loader = StaticLoader::new(vec![Module::new("base")]);
        let modules = loader.modules("fresh").unwrap();
        assert_eq!(modules[0].1, ModuleState::ToInstall);
        loader.mark_installed("fresh", "base").unwrap();
        assert_eq!(loader.modules("fresh").unwrap()[0].1, ModuleState::Installed);
    }
}
