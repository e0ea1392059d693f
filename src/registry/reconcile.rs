// ============================================================================
// DDL reconciliation
// ============================================================================
//
// `init_models` brings the database in line with a set of models:
//
//   1. table and columns of each model, then its custom init hooks
//   2. metadata reflection
//   3. post-init queue
//   4. indexes (created when missing, never dropped)
//   5. foreign keys (created when missing, replaced when different)
//   6. flush
//   7. every table exists, or is initialized once more
//
// Constraints that fail during an upgrade are queued and retried once by
// `finalize_constraints`.
//
// ============================================================================

use super::Registry;
use super::field::IndexKind;
use super::model::Model;
use super::schema::{self, make_index_name};
use crate::core::{DbError, Params, Result, Value};
use crate::cursor::{BaseCursor, with_savepoint};
use crate::storage::catalog::delete_action_code;
use indexmap::{IndexMap, IndexSet};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// A constraint to apply, retried at the end of the load when it fails.
pub type ConstraintFn = Arc<dyn Fn(&mut dyn BaseCursor) -> Result<()> + Send + Sync>;

/// Work deferred to the end of `init_models`.
pub type PostInitFn = Box<dyn FnOnce(&Registry, &mut dyn BaseCursor) -> Result<()> + Send>;

/// An expected foreign key `table1(column1) -> table2(column2)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub table1: String,
    pub column1: String,
    pub table2: String,
    pub column2: String,
    pub ondelete: String,
    /// Model and module reflected as owners of the constraint.
    pub model: String,
    pub module: String,
}

impl ForeignKey {
    pub fn new(table1: &str, column1: &str, table2: &str, column2: &str, ondelete: &str) -> Self {
        Self {
            table1: table1.to_string(),
            column1: column1.to_string(),
            table2: table2.to_string(),
            column2: column2.to_string(),
            ondelete: ondelete.to_string(),
            model: String::new(),
            module: String::new(),
        }
    }

    pub fn owner(mut self, model: &str, module: &str) -> Self {
        self.model = model.to_string();
        self.module = module.to_string();
        self
    }
}

/// State of the current `init_models` run.
#[derive(Default)]
pub(crate) struct InitState {
    pub(crate) is_install: bool,
    pub(crate) post_init: VecDeque<PostInitFn>,
    /// (table1, column1) -> expected foreign key
    pub(crate) foreign_keys: IndexMap<(String, String), ForeignKey>,
    pub(crate) constraint_queue: IndexMap<String, ConstraintFn>,
}

#[derive(Debug, Clone)]
struct ExistingForeignKey {
    name: String,
    table2: String,
    column2: String,
    deltype: String,
}

impl Registry {
    /// Creates or updates the tables of `names`, in that order.
    pub fn init_models(
        &self,
        cr: &mut dyn BaseCursor,
        names: &[String],
        module: Option<&str>,
        install: bool,
    ) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let _span =
            tracing::info_span!("init_models", db = %self.dbname, models = names.len()).entered();
        if let Some(module) = module {
            log::info!(target: "ormregistry::registry", "module {module}: creating or updating database tables");
        }

        {
            let mut init = self.init.lock();
            init.post_init.clear();
            init.foreign_keys.clear();
            init.is_install = install;
        }
        let result = self.init_models_impl(cr, names, module);
        self.init.lock().is_install = false;
        result
    }

    fn init_models_impl(
        &self,
        cr: &mut dyn BaseCursor,
        names: &[String],
        module: Option<&str>,
    ) -> Result<()> {
        let graph = self.graph();
        let models = names
            .iter()
            .map(|name| graph.require_model(name))
            .collect::<Result<Vec<&Model>>>()?;

        for model in &models {
            self.auto_init(cr, model)?;
            self.run_init_hooks(cr, model)?;
        }

        self.reflect_models(cr, &models, module.unwrap_or_default())?;
        *self.ordinary_tables.lock() = None;

        loop {
            let next = self.init.lock().post_init.pop_front();
            match next {
                Some(func) => func(self, cr)?,
                None => break,
            }
        }

        self.check_indexes(cr, &models)?;
        self.check_foreign_keys(cr)?;
        cr.flush()?;
        self.check_tables_exist(cr)
    }

    fn run_init_hooks(&self, cr: &mut dyn BaseCursor, model: &Model) -> Result<()> {
        for hooks in &model.hooks {
            hooks.init(self, model, cr)?;
        }
        Ok(())
    }

    /// Queues `func` to run at the end of the current `init_models`.
    pub fn post_init(
        &self,
        func: impl FnOnce(&Registry, &mut dyn BaseCursor) -> Result<()> + Send + 'static,
    ) {
        self.init.lock().post_init.push_back(Box::new(func));
    }

    /// Declares an expected foreign key. Without `force`, an already
    /// declared key on the same column wins.
    pub fn add_foreign_key(&self, fk: ForeignKey, force: bool) {
        let mut init = self.init.lock();
        let key = (fk.table1.clone(), fk.column1.clone());
        if force {
            init.foreign_keys.insert(key, fk);
        } else {
            init.foreign_keys.entry(key).or_insert(fk);
        }
    }

    /// Expected foreign keys of the current or last `init_models` run.
    pub fn expected_foreign_keys(&self) -> Vec<ForeignKey> {
        self.init.lock().foreign_keys.values().cloned().collect()
    }

    /// Applies a constraint in a savepoint. On failure during an install
    /// the error is returned; during an upgrade the constraint is queued
    /// for `finalize_constraints`. A constraint already queued is not
    /// applied again.
    pub fn post_constraint(
        &self,
        cr: &mut dyn BaseCursor,
        key: &str,
        func: ConstraintFn,
    ) -> Result<()> {
        if self.init.lock().constraint_queue.contains_key(key) {
            return Ok(());
        }
        let Err(e) = with_savepoint(cr, false, |cr| func(cr)) else {
            return Ok(());
        };
        let mut init = self.init.lock();
        if init.is_install {
            log::error!(target: "ormregistry::schema", "{key}: {e}");
            Err(DbError::Constraint(format!("{key}: {e}")))
        } else {
            log::info!(target: "ormregistry::schema", "{key}: {e}");
            init.constraint_queue.insert(key.to_string(), func);
            Ok(())
        }
    }

    /// Retries the queued constraints once. Failures are only warned about.
    pub fn finalize_constraints(&self, cr: &mut dyn BaseCursor) -> Result<()> {
        let queue = std::mem::take(&mut self.init.lock().constraint_queue);
        for (key, func) in queue {
            if let Err(e) = with_savepoint(cr, false, |cr| func(cr)) {
                log::warn!(target: "ormregistry::schema", "{key}: {e}");
            }
        }
        Ok(())
    }

    /// Keys of the constraints waiting for `finalize_constraints`.
    pub fn pending_constraints(&self) -> Vec<String> {
        self.init.lock().constraint_queue.keys().cloned().collect()
    }

    /// Creates the missing indexes of the stored fields of `models`.
    pub fn check_indexes(&self, cr: &mut dyn BaseCursor, models: &[&Model]) -> Result<()> {
        let expected: Vec<(String, &str, Option<IndexKind>, &str)> = models
            .iter()
            .filter(|m| m.has_table())
            .flat_map(|m| {
                m.fields
                    .values()
                    .filter(|f| f.column_type().is_some() && f.name != "id")
                    .map(move |f| {
                        let name = make_index_name(&m.table, &f.name);
                        (name, m.table.as_str(), f.index, f.name.as_str())
                    })
            })
            .collect();
        if expected.is_empty() {
            return Ok(());
        }

        let names: Vec<String> = expected.iter().map(|(name, ..)| name.clone()).collect();
        let result = cr.execute(
            "SELECT indexname, tablename FROM pg_indexes WHERE indexname IN %s",
            &Params::from([Value::from(names)]),
        )?;
        let existing: HashMap<String, String> = result
            .rows
            .into_iter()
            .filter_map(|row| match row.as_slice() {
                [Value::Text(index), Value::Text(table)] => Some((index.clone(), table.clone())),
                _ => None,
            })
            .collect();

        for (indexname, table, index, column) in expected {
            match index {
                Some(IndexKind::Trigram) if !self.has_trigram() => {
                    log::debug!(
                        target: "ormregistry::schema",
                        "Skip trigram index {indexname}: no pg_trgm"
                    );
                }
                Some(kind) if !existing.contains_key(&indexname) => {
                    let column = format!("\"{column}\"");
                    let (method, expression, predicate) = match kind {
                        IndexKind::Trigram => ("gin", format!("{column} gin_trgm_ops"), None),
                        IndexKind::BtreeNotNull => {
                            let predicate = format!("{column} IS NOT NULL");
                            ("btree", column, Some(predicate))
                        }
                        IndexKind::Btree => ("btree", column, None),
                    };
                    let created = with_savepoint(cr, false, |cr| {
                        schema::create_index(
                            cr,
                            &indexname,
                            table,
                            &[expression],
                            method,
                            false,
                            predicate.as_deref(),
                        )
                    });
                    if let Err(e) = created {
                        log::error!(target: "ormregistry::schema", "Unable to add index {indexname:?} for {}: {e}", self.dbname);
                    }
                }
                None if existing.get(&indexname).is_some_and(|t| t == table) => {
                    log::info!(target: "ormregistry::schema", "Keep unexpected index {indexname} on table {table}");
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Creates the expected foreign keys that are missing, and replaces the
    /// ones whose target or delete action differ.
    pub fn check_foreign_keys(&self, cr: &mut dyn BaseCursor) -> Result<()> {
        let expected = self.expected_foreign_keys();
        if expected.is_empty() {
            return Ok(());
        }
        let tables: Vec<String> = expected
            .iter()
            .map(|fk| fk.table1.clone())
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect();
        let result = cr.execute(
            "SELECT conname, relname, attname, confrelname, confattname, confdeltype \
             FROM pg_constraint WHERE contype = 'f' AND relname IN %s",
            &Params::from([Value::from(tables)]),
        )?;
        let mut existing = HashMap::new();
        for row in result.rows {
            if let [
                Value::Text(name),
                Value::Text(table1),
                Value::Text(column1),
                Value::Text(table2),
                Value::Text(column2),
                Value::Text(deltype),
            ] = row.as_slice()
            {
                existing.insert(
                    (table1.clone(), column1.clone()),
                    ExistingForeignKey {
                        name: name.clone(),
                        table2: table2.clone(),
                        column2: column2.clone(),
                        deltype: deltype.clone(),
                    },
                );
            }
        }

        for fk in expected {
            let deltype = delete_action_code(&fk.ondelete);
            match existing.get(&(fk.table1.clone(), fk.column1.clone())) {
                None => {}
                Some(spec)
                    if (spec.table2.as_str(), spec.column2.as_str(), spec.deltype.as_str())
                        == (fk.table2.as_str(), fk.column2.as_str(), deltype) =>
                {
                    continue;
                }
                Some(spec) => schema::drop_constraint(cr, &fk.table1, &spec.name)?,
            }
            let conname = schema::add_foreign_key(
                cr,
                &fk.table1,
                &fk.column1,
                &fk.table2,
                &fk.column2,
                &fk.ondelete,
            )?;
            self.reflect_constraint(cr, &fk.model, &conname, "f", None, &fk.module)?;
        }
        Ok(())
    }

    /// Initializes once more the models whose table is missing, then logs
    /// the ones still without a table.
    pub fn check_tables_exist(&self, cr: &mut dyn BaseCursor) -> Result<()> {
        let graph = self.graph();
        let table2model: IndexMap<String, &Model> = graph
            .models
            .values()
            .filter(|m| !m.is_abstract())
            .map(|m| (m.table.clone(), m))
            .collect();
        let tables: Vec<String> = table2model.keys().cloned().collect();
        let existing = schema::existing_tables(cr, &tables)?;
        let missing: Vec<&Model> = table2model
            .iter()
            .filter(|(table, _)| !existing.contains(*table))
            .map(|(_, model)| *model)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let names: Vec<&str> = missing.iter().map(|m| m.name.as_str()).collect();
        log::info!(target: "ormregistry::registry", "Models have no table: {}.", names.join(", "));
        for model in &missing {
            log::info!(target: "ormregistry::registry", "Recreate table of model {}.", model.name);
            self.auto_init(cr, model)?;
            self.run_init_hooks(cr, model)?;
        }
        cr.flush()?;

        let existing = schema::existing_tables(cr, &tables)?;
        for model in missing.iter().filter(|m| !existing.contains(&m.table)) {
            log::error!(target: "ormregistry::registry", "Model {} has no table.", model.name);
        }
        Ok(())
    }

    /// Records the required stored fields backed by a NOT NULL column, and
    /// warns about the others.
    pub fn check_null_constraints(&self, cr: &mut dyn BaseCursor) -> Result<()> {
        let result = cr.execute(
            "SELECT table_name, column_name FROM information_schema.columns WHERE is_nullable = 'NO'",
            &Params::None,
        )?;
        let not_null: HashSet<(String, String)> = result
            .rows
            .into_iter()
            .filter_map(|row| match row.as_slice() {
                [Value::Text(table), Value::Text(column)] if column != "id" => {
                    Some((table.clone(), column.clone()))
                }
                _ => None,
            })
            .collect();

        let graph = self.graph();
        let mut fields = IndexSet::new();
        for model in graph.models.values().filter(|m| m.has_table()) {
            for field in model.fields.values() {
                if field.name == "id" {
                    fields.insert(field.id());
                } else if field.column_type().is_some() && field.required {
                    if not_null.contains(&(model.table.clone(), field.name.clone())) {
                        fields.insert(field.id());
                    } else {
                        log::warn!(target: "ormregistry::schema", "Missing not-null constraint on {field}");
                    }
                }
            }
        }
        *self.not_null_fields.write() = fields;
        Ok(())
    }

    /// Whether the table of `model` is an ordinary table, as opposed to a
    /// view or a missing relation. Cached until the next `init_models`.
    pub fn is_an_ordinary_table(&self, cr: &mut dyn BaseCursor, model: &Model) -> Result<bool> {
        let mut cached = self.ordinary_tables.lock();
        if cached.is_none() {
            let tables: Vec<String> =
                self.graph().models.values().map(|m| m.table.clone()).collect();
            let result = cr.execute(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_name IN %s AND table_type = 'BASE TABLE'",
                &Params::from([Value::from(tables)]),
            )?;
            *cached = Some(
                result
                    .rows
                    .into_iter()
                    .filter_map(|row| row.into_iter().next().and_then(|v| v.as_str().map(str::to_string)))
                    .collect(),
            );
        }
        Ok(cached.as_ref().is_some_and(|tables| tables.contains(&model.table)))
    }
}
