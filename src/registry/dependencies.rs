use super::field::{Field, FieldId, FieldType};
use super::setup::ModelGraph;
use crate::core::{DbError, Result};
use indexmap::{IndexMap, IndexSet};

/// Dependency -> (path of relations to inverse -> dependent fields).
pub type FieldTriggers = IndexMap<FieldId, IndexMap<Vec<FieldId>, IndexSet<FieldId>>>;

/// Field -> fields that are its inverse.
pub type FieldInverses = IndexMap<FieldId, IndexSet<FieldId>>;

/// Resolves the dotted `path` from `model` into the fields it traverses.
pub fn resolve_path(graph: &ModelGraph, model: &str, path: &str) -> Result<Vec<FieldId>> {
    let mut current = model.to_string();
    let mut fields = Vec::new();
    let names: Vec<&str> = path.split('.').collect();
    for (i, name) in names.iter().enumerate() {
        let model = graph.require_model(&current)?;
        let field = model.fields.get(*name).ok_or_else(|| {
            DbError::Model(format!("field '{name}' not found on model '{current}'"))
        })?;
        fields.push(field.id());
        if i + 1 < names.len() {
            current = match (&field.comodel_name, field.is_relational()) {
                (Some(comodel), true) => comodel.clone(),
                _ => {
                    return Err(DbError::Model(format!(
                        "field {field} is not relational and cannot be traversed"
                    )));
                }
            };
        }
    }
    Ok(fields)
}

/// Resolved dependencies of `field`: for each dependency, the fields along
/// its path, the last one being the field depended upon.
pub fn resolve_depends(graph: &ModelGraph, field: &FieldId) -> Result<Vec<Vec<FieldId>>> {
    let Some(paths) = graph.field_depends.get(field) else {
        return Ok(Vec::new());
    };
    paths
        .iter()
        .map(|path| resolve_path(graph, &field.model, path))
        .collect()
}

pub fn field_inverses(graph: &ModelGraph) -> FieldInverses {
    let mut inverses: FieldInverses = IndexMap::new();
    for field in graph.fields() {
        match field.ftype {
            FieldType::One2many => {
                let (Some(comodel), Some(inverse_name)) = (&field.comodel_name, &field.inverse_name)
                else {
                    continue;
                };
                let inverse = FieldId::new(comodel, inverse_name);
                if graph.field(&inverse).is_some() {
                    inverses.entry(field.id()).or_default().insert(inverse.clone());
                    inverses.entry(inverse).or_default().insert(field.id());
                }
            }
            FieldType::Many2many => {
                let Some(comodel) = graph.model(field.comodel_name.as_deref().unwrap_or_default())
                else {
                    continue;
                };
                for other in comodel.fields.values() {
                    if other.ftype == FieldType::Many2many
                        && other.comodel_name.as_deref() == Some(field.model_name.as_str())
                        && other.relation == field.relation
                        && other.id() != field.id()
                    {
                        inverses.entry(field.id()).or_default().insert(other.id());
                    }
                }
            }
            _ => {}
        }
    }
    inverses
}

/// Inverts the resolved dependencies of every field of a concrete model.
pub fn field_triggers(graph: &ModelGraph) -> FieldTriggers {
    let mut triggers: FieldTriggers = IndexMap::new();
    for model in graph.models.values().filter(|m| !m.is_abstract()) {
        for field in model.fields.values() {
            let field_id = field.id();
            let dependencies = match resolve_depends(graph, &field_id) {
                Ok(dependencies) => dependencies,
                Err(e) => {
                    log::debug!(target: "ormregistry::registry", "skipping triggers of {field_id}: {e}");
                    continue;
                }
            };
            for mut path in dependencies {
                let Some(dependency) = path.pop() else {
                    continue;
                };
                path.reverse();
                triggers
                    .entry(dependency)
                    .or_default()
                    .entry(path)
                    .or_default()
                    .insert(field_id.clone());
            }
        }
    }
    triggers
}

/// Fields computed by the same method as each computed field, model by
/// model. Inconsistent settings inside a group are reported.
pub fn field_computed(graph: &ModelGraph) -> IndexMap<FieldId, Vec<FieldId>> {
    let mut computed = IndexMap::new();
    for model in graph.models.values() {
        let mut groups: IndexMap<&str, Vec<&Field>> = IndexMap::new();
        for field in model.fields.values() {
            if let Some(method) = &field.compute {
                groups.entry(method.as_str()).or_default().push(field);
            }
        }
        for fields in groups.values() {
            if fields.len() > 1 {
                let names = || {
                    fields
                        .iter()
                        .map(|f| f.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                let differ = |attr: fn(&Field) -> bool| {
                    fields.iter().any(|f| attr(*f) != attr(fields[0]))
                };
                if differ(|f| f.compute_sudo) {
                    log::warn!(
                        target: "ormregistry::registry",
                        "{}: inconsistent 'compute_sudo' for computed fields {}",
                        model.name,
                        names()
                    );
                }
                if differ(|f| f.precompute) {
                    log::warn!(
                        target: "ormregistry::registry",
                        "{}: inconsistent 'precompute' for computed fields {}",
                        model.name,
                        names()
                    );
                }
                if differ(|f| f.store) {
                    log::warn!(
                        target: "ormregistry::registry",
                        "{}: inconsistent 'store' for computed fields {}",
                        model.name,
                        names()
                    );
                }
            }
            let group: Vec<FieldId> = fields.iter().map(|f| f.id()).collect();
            for field in fields {
                computed.insert(field.id(), group.clone());
            }
        }
    }
    computed
}
