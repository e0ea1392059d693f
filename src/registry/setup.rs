// ============================================================================
// Model composition and setup
// ============================================================================
//
// `load` merges the contributions of one module into the composed models;
// `setup_models` then sets up every model in passes, each pass applied to all
// models before the next one starts:
//
//   prepare  -> forget the fields of the previous setup
//   base     -> copy parent fields, add delegation fields and `id`
//   fields   -> resolve comodels and inverses
//   complete -> check delegation links, mark the model as set up
//
// Both work on a copy of the current graph and publish it in one swap, so a
// failure leaves the previous graph in place.
//
// ============================================================================

use super::Registry;
use super::dependencies;
use super::field::{Field, FieldId, FieldType};
use super::model::{Model, Module};
use crate::core::{DbError, Result};
use crate::cursor::BaseCursor;
use indexmap::{IndexMap, IndexSet};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Models of a registry with their field dependencies.
#[derive(Debug, Clone, Default)]
pub struct ModelGraph {
    pub models: IndexMap<String, Model>,
    /// Field -> dotted paths it depends on.
    pub field_depends: IndexMap<FieldId, Vec<String>>,
    /// Field -> context keys it depends on.
    pub field_depends_context: IndexMap<FieldId, Vec<String>>,
    pub(crate) generation: u64,
}

impl ModelGraph {
    pub fn model(&self, name: &str) -> Option<&Model> {
        self.models.get(name)
    }

    pub(crate) fn require_model(&self, name: &str) -> Result<&Model> {
        self.models
            .get(name)
            .ok_or_else(|| DbError::Model(format!("unknown model '{name}'")))
    }

    pub fn field(&self, id: &FieldId) -> Option<&Field> {
        self.models.get(&id.model)?.fields.get(&id.name)
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.models.values().flat_map(|m| m.fields.values())
    }

    /// `names` and every model inheriting from (`inherit`) or delegating to
    /// (`inherits`) them, transitively.
    pub fn descendants<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
        inherit: bool,
        inherits: bool,
    ) -> IndexSet<String> {
        let mut result = IndexSet::new();
        let mut queue: VecDeque<String> = names.into_iter().map(str::to_string).collect();
        while let Some(name) = queue.pop_front() {
            let Some(model) = self.models.get(&name) else {
                continue;
            };
            if !result.insert(name) {
                continue;
            }
            if inherit {
                queue.extend(model.inherit_children.iter().cloned());
            }
            if inherits {
                queue.extend(model.inherits_children.iter().cloned());
            }
        }
        result
    }

    fn next(&self) -> Self {
        let mut graph = self.clone();
        graph.generation += 1;
        graph
    }
}

impl Registry {
    /// Merges the models of `module` and returns the affected models: the
    /// ones the module defines or extends, and all their descendants.
    pub fn load(&self, module: &Module) -> Result<IndexSet<String>> {
        let _setup = self.setup_lock.lock();
        log::debug!(target: "ormregistry::registry", "loading models of module {}", module.name);

        // local consistency only, nothing to signal
        self.caches.clear_all();

        let mut graph = self.graph().next();
        let mut names = Vec::new();
        for def in &module.models {
            let exists = graph.models.contains_key(&def.name);
            match (def.extension, exists) {
                (true, false) => {
                    return Err(DbError::Model(format!(
                        "module {} extends unknown model '{}'",
                        module.name, def.name
                    )));
                }
                (false, true) => {
                    return Err(DbError::Model(format!(
                        "module {} redefines model '{}'",
                        module.name, def.name
                    )));
                }
                _ => {}
            }
            for parent in def.inherit.iter().chain(def.inherits.keys()) {
                if *parent != def.name && !graph.models.contains_key(parent) {
                    return Err(DbError::Model(format!(
                        "model '{}' inherits from unknown model '{parent}'",
                        def.name
                    )));
                }
            }

            let model = graph
                .models
                .entry(def.name.clone())
                .or_insert_with(|| Model::new(def));
            model.merge(def, &module.name);

            for parent in def.inherit.iter().filter(|p| **p != def.name) {
                if let Some(parent) = graph.models.get_mut(parent) {
                    parent.inherit_children.insert(def.name.clone());
                }
            }
            for parent in def.inherits.keys() {
                if let Some(parent) = graph.models.get_mut(parent) {
                    parent.inherits_children.insert(def.name.clone());
                }
            }
            names.push(def.name.clone());
        }

        let affected = graph.descendants(names.iter().map(String::as_str), true, true);
        *self.graph.write() = Arc::new(graph);
        Ok(affected)
    }

    /// Sets up every model and recomputes the field dependencies. A failure
    /// leaves the registry as it was; callers treat it as corrupt and rebuild.
    pub fn setup_models(&self, cr: &mut dyn BaseCursor) -> Result<()> {
        let _setup = self.setup_lock.lock();
        let _span = tracing::info_span!("setup_models", db = %self.dbname).entered();

        self.caches.clear_all();
        let ready = self.is_ready();
        let current = self.graph();

        if ready {
            for model in current.models.values() {
                for hooks in &model.hooks {
                    hooks.unregister_hook(self, model)?;
                }
            }
        }

        let mut graph = current.next();
        prepare_setup(&mut graph);
        setup_base(&mut graph)?;
        setup_fields(&mut graph)?;
        setup_complete(&mut graph)?;
        compute_field_depends(&mut graph)?;

        let graph = Arc::new(graph);
        *self.graph.write() = Arc::clone(&graph);

        if ready {
            for model in graph.models.values() {
                for hooks in &model.hooks {
                    hooks.register_hook(self, model)?;
                }
            }
            cr.flush()?;
        }
        Ok(())
    }
}

fn prepare_setup(graph: &mut ModelGraph) {
    for model in graph.models.values_mut() {
        model.fields.clear();
        model.setup_done = false;
    }
    graph.field_depends.clear();
    graph.field_depends_context.clear();
}

fn setup_base(graph: &mut ModelGraph) -> Result<()> {
    let names: Vec<String> = graph.models.keys().cloned().collect();
    let mut done = HashSet::new();
    for name in &names {
        setup_model_base(graph, name, &mut Vec::new(), &mut done)?;
    }
    Ok(())
}

fn setup_model_base(
    graph: &mut ModelGraph,
    name: &str,
    visiting: &mut Vec<String>,
    done: &mut HashSet<String>,
) -> Result<()> {
    if done.contains(name) {
        return Ok(());
    }
    if visiting.iter().any(|v| v == name) {
        return Err(DbError::Model(format!(
            "inheritance cycle: {} -> {name}",
            visiting.join(" -> ")
        )));
    }
    let model = graph.require_model(name)?;
    let parents: Vec<String> = model
        .inherit
        .iter()
        .chain(model.inherits.keys())
        .cloned()
        .collect();

    visiting.push(name.to_string());
    for parent in &parents {
        setup_model_base(graph, parent, visiting, done)?;
    }
    visiting.pop();

    let model = graph.require_model(name)?;
    let mut fields: IndexMap<String, Field> = IndexMap::new();
    let mut id = Field::integer("id").string("ID");
    id.model_name = name.to_string();
    fields.insert("id".into(), id);

    for parent in &model.inherit {
        for field in graph.require_model(parent)?.fields.values() {
            if field.name == "id" {
                continue;
            }
            let mut field = field.clone();
            field.model_name = name.to_string();
            field.inherited = true;
            fields.insert(field.name.clone(), field);
        }
    }
    for field in model.declared.values() {
        fields.insert(field.name.clone(), field.clone());
    }
    for (parent, link) in &model.inherits {
        if !fields.contains_key(link) {
            let mut field = Field::many2one(link, parent).required().ondelete("cascade");
            field.model_name = name.to_string();
            field.modules = model.modules.first().cloned().into_iter().collect();
            fields.insert(link.clone(), field);
        }
        for field in graph.require_model(parent)?.fields.values() {
            if fields.contains_key(&field.name) {
                continue;
            }
            let mut delegated =
                Field::new(&field.name, field.ftype).related(&format!("{link}.{}", field.name));
            delegated.model_name = name.to_string();
            delegated.comodel_name = field.comodel_name.clone();
            delegated.inverse_name = field.inverse_name.clone();
            delegated.relation = field.relation.clone();
            delegated.selection = field.selection.clone();
            delegated.string = field.string.clone();
            delegated.modules = field.modules.clone();
            delegated.inherited = true;
            fields.insert(field.name.clone(), delegated);
        }
    }

    if let Some(model) = graph.models.get_mut(name) {
        model.fields = fields;
    }
    done.insert(name.to_string());
    Ok(())
}

fn setup_fields(graph: &mut ModelGraph) -> Result<()> {
    let mut relations: Vec<(String, String, String)> = Vec::new();
    for model in graph.models.values() {
        for field in model.fields.values() {
            if !field.is_relational() {
                continue;
            }
            let comodel_name = field.comodel_name.as_deref().ok_or_else(|| {
                DbError::Model(format!("relational field {field} has no comodel"))
            })?;
            let comodel = graph.models.get(comodel_name).ok_or_else(|| {
                DbError::Model(format!("field {field} refers to unknown model '{comodel_name}'"))
            })?;
            match field.ftype {
                // the inverse belongs to the delegation parent
                FieldType::One2many if field.related.is_some() => {}
                FieldType::One2many => {
                    let inverse_name = field.inverse_name.as_deref().unwrap_or_default();
                    let inverse = comodel.fields.get(inverse_name).ok_or_else(|| {
                        DbError::Model(format!(
                            "field {field}: inverse field '{comodel_name}.{inverse_name}' does not exist"
                        ))
                    })?;
                    if inverse.ftype != FieldType::Many2one
                        || inverse.comodel_name.as_deref() != Some(model.name.as_str())
                    {
                        return Err(DbError::Model(format!(
                            "field {field}: inverse field {inverse} is not a many2one to '{}'",
                            model.name
                        )));
                    }
                }
                FieldType::Many2many if field.relation.is_none() => {
                    let mut tables = [model.table.as_str(), comodel.table.as_str()];
                    tables.sort_unstable();
                    relations.push((
                        model.name.clone(),
                        field.name.clone(),
                        format!("{}_{}_rel", tables[0], tables[1]),
                    ));
                }
                _ => {}
            }
        }
    }
    for (model, field, relation) in relations {
        if let Some(field) = graph
            .models
            .get_mut(&model)
            .and_then(|m| m.fields.get_mut(&field))
        {
            field.relation = Some(relation);
        }
    }
    Ok(())
}

fn setup_complete(graph: &mut ModelGraph) -> Result<()> {
    for model in graph.models.values() {
        for (parent, link) in &model.inherits {
            let field = model.fields.get(link).ok_or_else(|| {
                DbError::Model(format!("model '{}': delegation field '{link}' is missing", model.name))
            })?;
            if field.ftype != FieldType::Many2one || field.comodel_name.as_deref() != Some(parent) {
                return Err(DbError::Model(format!(
                    "model '{}': delegation field {field} must be a many2one to '{parent}'",
                    model.name
                )));
            }
        }
        for field in model.fields.values() {
            if field.compute.is_some() && field.store && field.depends.is_empty() {
                log::warn!(
                    target: "ormregistry::registry",
                    "stored computed field {field} declares no dependency"
                );
            }
        }
    }
    for model in graph.models.values_mut() {
        model.setup_done = true;
    }
    Ok(())
}

fn compute_field_depends(graph: &mut ModelGraph) -> Result<()> {
    let mut depends = IndexMap::new();
    let mut depends_context = IndexMap::new();
    for field in graph.fields() {
        let (paths, context) = field.get_depends();
        let mut resolved = Vec::with_capacity(paths.len());
        for path in paths {
            match dependencies::resolve_path(graph, &field.model_name, &path) {
                Ok(_) => resolved.push(path),
                Err(e) if field.manual => log::warn!(
                    target: "ormregistry::registry",
                    "ignoring dependency '{path}' of custom field {field}: {e}"
                ),
                Err(e) => {
                    return Err(DbError::Model(format!(
                        "field {field} depends on '{path}': {e}"
                    )));
                }
            }
        }
        depends.insert(field.id(), resolved);
        depends_context.insert(field.id(), context);
    }
    graph.field_depends = depends;
    graph.field_depends_context = depends_context;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::model::ModelDef;

    fn graph_of(defs: Vec<(&str, ModelDef)>) -> ModelGraph {
        let mut graph = ModelGraph::default();
        for (module, def) in defs {
            let model = graph
                .models
                .entry(def.name.clone())
                .or_insert_with(|| Model::new(&def));
            model.merge(&def, module);
            for parent in def.inherit.iter().filter(|p| **p != def.name) {
                graph.models[parent].inherit_children.insert(def.name.clone());
            }
            for parent in def.inherits.keys() {
                graph.models[parent].inherits_children.insert(def.name.clone());
            }
        }
        graph
    }

    fn set_up(graph: &mut ModelGraph) -> Result<()> {
        prepare_setup(graph);
        setup_base(graph)?;
        setup_fields(graph)?;
        setup_complete(graph)?;
        compute_field_depends(graph)
    }

    #[test]
    fn test_descendants_are_transitive() {
        let graph = graph_of(vec![
            ("base", ModelDef::abstract_model("mail.thread")),
            ("base", ModelDef::new("res.partner").inherit("mail.thread")),
            ("base", ModelDef::new("res.users").inherits("res.partner", "partner_id")),
        ]);
        let names: Vec<_> = graph.descendants(["mail.thread"], true, true).into_iter().collect();
        assert_eq!(names, vec!["mail.thread", "res.partner", "res.users"]);
        let inherit_only = graph.descendants(["mail.thread"], true, false);
        assert!(!inherit_only.contains("res.users"));
    }

    #[test]
    fn test_setup_copies_and_delegates_fields() {
        let mut graph = graph_of(vec![
            (
                "base",
                ModelDef::abstract_model("mail.thread").field(Field::char("message_subject")),
            ),
            (
                "base",
                ModelDef::new("res.partner")
                    .inherit("mail.thread")
                    .field(Field::char("name")),
            ),
            (
                "base",
                ModelDef::new("res.users")
                    .inherits("res.partner", "partner_id")
                    .field(Field::char("login")),
            ),
        ]);
        set_up(&mut graph).unwrap();

        let partner = graph.model("res.partner").unwrap();
        assert!(partner.fields["message_subject"].inherited);
        assert_eq!(partner.fields["message_subject"].model_name, "res.partner");

        let users = graph.model("res.users").unwrap();
        let link = &users.fields["partner_id"];
        assert!(link.required);
        assert_eq!(link.ondelete_action(), "cascade");
        let name = &users.fields["name"];
        assert_eq!(name.related.as_deref(), Some("partner_id.name"));
        assert!(!name.store);
        assert_eq!(
            graph.field_depends[&FieldId::new("res.users", "name")],
            vec!["partner_id.name"]
        );
    }

    #[test]
    fn test_one2many_requires_matching_inverse() {
        let mut graph = graph_of(vec![
            ("sale", ModelDef::new("sale.order").field(Field::one2many("line_ids", "sale.line", "order_id"))),
            ("sale", ModelDef::new("sale.line").field(Field::integer("order_id"))),
        ]);
        assert!(matches!(set_up(&mut graph), Err(DbError::Model(_))));
    }

    #[test]
    fn test_unresolved_dependency() {
        let mut graph = graph_of(vec![(
            "sale",
            ModelDef::new("sale.order").field(Field::float("total").compute("_compute_total", &["missing"])),
        )]);
        assert!(matches!(set_up(&mut graph), Err(DbError::Model(_))));

        let mut graph = graph_of(vec![(
            "sale",
            ModelDef::new("sale.order")
                .field(Field::float("x_total").compute("_compute_total", &["missing"]).manual()),
        )]);
        set_up(&mut graph).unwrap();
        assert!(graph.field_depends[&FieldId::new("sale.order", "x_total")].is_empty());
    }

    #[test]
    fn test_many2many_relation_name() {
        let mut graph = graph_of(vec![
            ("base", ModelDef::new("res.groups")),
            ("base", ModelDef::new("res.users").field(Field::many2many("group_ids", "res.groups"))),
        ]);
        set_up(&mut graph).unwrap();
        let field = graph.field(&FieldId::new("res.users", "group_ids")).unwrap();
        assert_eq!(field.relation.as_deref(), Some("res_groups_res_users_rel"));
    }
}
