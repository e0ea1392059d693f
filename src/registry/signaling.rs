// ============================================================================
// Cross-process signaling
// ============================================================================
//
// Processes sharing a database never talk to each other directly. Each
// cache partition has an append-only table `orm_signaling_<partition>`, and
// the registry itself has `orm_signaling_registry`. A process that
// invalidates something appends a row; every process compares the max ids
// with the ones it last saw before a unit of work:
//
//   registry id moved  -> rebuild the whole registry
//   partition id moved -> clear that partition only
//
// Invalidations of one unit of work accumulate in a `Changes` value that
// travels with it, and are signaled (or reset) once at its end.
//
// ============================================================================

use super::Registry;
use crate::core::{DbError, Params, Result, Value};
use crate::cursor::{BaseCursor, scoped};
use indexmap::{IndexMap, IndexSet};
use std::sync::atomic::Ordering;

pub const REGISTRY_SIGNAL: &str = "registry";

/// Name of the signaling table of a cache partition, or of the registry.
pub fn signaling_table(name: &str) -> String {
    format!("orm_signaling_{}", name.replace('.', "_"))
}

/// Last signaling ids seen by a registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sequences {
    pub registry: Option<i64>,
    pub caches: IndexMap<String, i64>,
}

/// Invalidations made by one unit of work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    pub registry_invalidated: bool,
    /// Cleared cache partitions.
    pub cache_invalidated: IndexSet<String>,
}

impl Changes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        !self.registry_invalidated && self.cache_invalidated.is_empty()
    }

    pub fn clear(&mut self) {
        self.registry_invalidated = false;
        self.cache_invalidated.clear();
    }
}

/// Outcome of a signaling check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// The registry changed elsewhere and must be rebuilt; carries the new
    /// registry id.
    Reload(i64),
    /// These partitions changed elsewhere and were cleared.
    Cleared(Vec<String>),
    UpToDate,
}

impl Registry {
    fn signaling_names(&self) -> Vec<String> {
        std::iter::once(REGISTRY_SIGNAL.to_string())
            .chain(self.caches.names().map(str::to_string))
            .collect()
    }

    /// Creates the missing signaling tables, each seeded with one row, and
    /// records their current ids.
    pub fn setup_signaling(&self) -> Result<()> {
        let names = self.signaling_names();
        let tables: Vec<String> = names.iter().map(|n| signaling_table(n)).collect();
        let (registry, caches) = scoped(self.cursor(false)?, |cr| {
            let existing = super::schema::existing_tables(cr, &tables)?;
            for table in tables.iter().filter(|t| !existing.contains(*t)) {
                cr.execute(
                    &format!("CREATE TABLE {table} (id SERIAL PRIMARY KEY, date TIMESTAMP DEFAULT now())"),
                    &Params::None,
                )?;
                cr.execute(&format!("INSERT INTO {table} DEFAULT VALUES"), &Params::None)?;
                log::debug!(target: "ormregistry::registry", "created signaling table {table}");
            }
            self.get_sequences(cr)
        })?;

        let mut sequences = self.sequences.lock();
        sequences.registry = Some(registry);
        sequences.caches.extend(caches);
        log::debug!(
            target: "ormregistry::registry",
            "Multiprocess load registry signaling: [Registry: {registry}] {}",
            sequences
                .caches
                .iter()
                .map(|(name, seq)| format!("[Cache {name}: {seq}]"))
                .collect::<Vec<_>>()
                .join(" ")
        );
        Ok(())
    }

    /// Current ids of the registry and of every partition, read in one
    /// statement.
    pub fn get_sequences(&self, cr: &mut dyn BaseCursor) -> Result<(i64, IndexMap<String, i64>)> {
        let names = self.signaling_names();
        let selects = names
            .iter()
            .map(|name| format!("(SELECT max(id) FROM {})", signaling_table(name)))
            .collect::<Vec<_>>()
            .join(", ");
        let result = cr.execute(&format!("SELECT {selects}"), &Params::None)?;
        let row = result
            .first()
            .ok_or_else(|| {
                DbError::Interface("No result when reading signaling sequences".into())
            })?;

        let mut values = row.iter().map(|value| match value {
            Value::Integer(id) => Ok(*id),
            other => Err(DbError::Interface(format!(
                "unexpected signaling id of type {}",
                other.type_name()
            ))),
        });
        let registry = values
            .next()
            .ok_or_else(|| DbError::Interface("missing registry signaling id".into()))??;
        let caches = names
            .into_iter()
            .skip(1)
            .zip(values)
            .map(|(name, id)| id.map(|id| (name, id)))
            .collect::<Result<IndexMap<_, _>>>()?;
        Ok((registry, caches))
    }

    pub fn sequences(&self) -> Sequences {
        self.sequences.lock().clone()
    }

    pub fn registry_sequence(&self) -> Option<i64> {
        self.sequences.lock().registry
    }

    pub(crate) fn set_registry_sequence(&self, sequence: i64) {
        self.sequences.lock().registry = Some(sequence);
    }

    /// Compares the signaling ids with the ones seen last, on a read-only
    /// cursor of the registry.
    pub fn check_signaling(&self) -> Result<Signal> {
        scoped(self.cursor(true)?, |cr| self.check_signaling_with(cr))
    }

    /// Compares the signaling ids with the ones seen last. Partitions that
    /// changed are cleared here; a registry change is only reported.
    pub fn check_signaling_with(&self, cr: &mut dyn BaseCursor) -> Result<Signal> {
        let (db_registry, db_caches) = self.get_sequences(cr)?;
        let mut sequences = self.sequences.lock();

        if sequences.registry != Some(db_registry) {
            log::info!(target: "ormregistry::registry", "Reloading the model registry after database signaling.");
            log::debug!(
                target: "ormregistry::registry",
                "Multiprocess signaling check: [Registry - {:?} -> {db_registry}]",
                sequences.registry
            );
            return Ok(Signal::Reload(db_registry));
        }

        let mut invalidated = Vec::new();
        for (name, db_sequence) in db_caches {
            let known = sequences.caches.get(&name).copied();
            if known != Some(db_sequence) {
                self.caches.clear(&name)?;
                log::debug!(
                    target: "ormregistry::registry",
                    "Multiprocess signaling check: [Cache {name} - {known:?} -> {db_sequence}]"
                );
                sequences.caches.insert(name.clone(), db_sequence);
                invalidated.push(name);
            }
        }
        if invalidated.is_empty() {
            return Ok(Signal::UpToDate);
        }
        invalidated.sort();
        log::info!(
            target: "ormregistry::registry",
            "Invalidating caches after database signaling: {invalidated:?}"
        );
        Ok(Signal::Cleared(invalidated))
    }

    /// Tells the other processes about `changes`, then forgets them. A
    /// registry change supersedes cache changes.
    pub fn signal_changes(&self, changes: &mut Changes) -> Result<()> {
        if !self.ready.load(Ordering::SeqCst) {
            log::warn!(target: "ormregistry::registry", "Calling signal_changes when registry is not ready is not supported");
            return Ok(());
        }

        if changes.registry_invalidated {
            log::info!(target: "ormregistry::registry", "Registry changed, signaling through the database");
            scoped(self.cursor(false)?, |cr| {
                cr.execute(
                    &format!("INSERT INTO {} DEFAULT VALUES", signaling_table(REGISTRY_SIGNAL)),
                    &Params::None,
                )
            })?;
            // a concurrent signal makes this id stale, which the next
            // check detects
            let mut sequences = self.sequences.lock();
            sequences.registry = Some(sequences.registry.unwrap_or_default() + 1);
        } else if !changes.cache_invalidated.is_empty() {
            log::info!(
                target: "ormregistry::registry",
                "Caches invalidated, signaling through the database: {:?}",
                changes.cache_invalidated
            );
            let names: Vec<String> = changes.cache_invalidated.iter().cloned().collect();
            scoped(self.cursor(false)?, |cr| {
                for name in &names {
                    let sql = format!("INSERT INTO {} DEFAULT VALUES", signaling_table(name));
                    cr.execute(&sql, &Params::None)?;
                }
                Ok(())
            })?;
            let mut sequences = self.sequences.lock();
            for name in names {
                *sequences.caches.entry(name).or_default() += 1;
            }
        }

        changes.clear();
        Ok(())
    }

    /// Drops `changes` without telling anyone: a changed registry is set up
    /// again, changed partitions are cleared.
    pub fn reset_changes(&self, changes: &mut Changes) -> Result<()> {
        if changes.registry_invalidated {
            let mut cr = self.cursor(false)?;
            let result = self.setup_models(&mut *cr);
            cr.close()?;
            result?;
            changes.registry_invalidated = false;
        }
        for name in changes.cache_invalidated.drain(..) {
            self.caches.clear(&name)?;
        }
        Ok(())
    }

    /// Runs `f` as a unit of work: its changes are signaled when it
    /// succeeds, reset when it fails.
    pub fn manage_changes<T>(&self, f: impl FnOnce(&mut Changes) -> Result<T>) -> Result<T> {
        let mut changes = Changes::new();
        match f(&mut changes) {
            Ok(value) => {
                self.signal_changes(&mut changes)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(reset_err) = self.reset_changes(&mut changes) {
                    log::error!(target: "ormregistry::registry", "resetting changes after failure: {reset_err}");
                }
                Err(e)
            }
        }
    }

    /// Clears the partitions of the given invalidation groups (`default`
    /// when none) and records them in `changes`.
    pub fn clear_cache(&self, changes: &mut Changes, groups: &[&str]) -> Result<()> {
        let groups = if groups.is_empty() { &["default"][..] } else { groups };
        for group in groups {
            for partition in self.layout.resolve(group)? {
                self.caches.clear(&partition)?;
                changes.cache_invalidated.insert(partition);
            }
        }
        log::debug!(target: "ormregistry::registry", "Invalidating {} model caches", groups.join(","));
        Ok(())
    }

    pub fn clear_all_caches(&self, changes: &mut Changes) {
        self.caches.clear_all();
        changes
            .cache_invalidated
            .extend(self.caches.names().map(str::to_string));
        if self.loaded.load(Ordering::SeqCst) {
            log::info!(target: "ormregistry::registry", "Invalidating all model caches");
        } else {
            log::debug!(target: "ormregistry::registry", "Invalidating all model caches");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signaling_table_names() {
        assert_eq!(signaling_table("registry"), "orm_signaling_registry");
        assert_eq!(signaling_table("routing.rewrites"), "orm_signaling_routing_rewrites");
    }

    #[test]
    fn test_changes_clear() {
        let mut changes = Changes::new();
        assert!(changes.is_empty());
        changes.cache_invalidated.insert("assets".into());
        changes.registry_invalidated = true;
        assert!(!changes.is_empty());
        changes.clear();
        assert!(changes.is_empty());
    }
}
