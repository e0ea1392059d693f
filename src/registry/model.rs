use super::Registry;
use super::field::Field;
use crate::cursor::BaseCursor;
use indexmap::{IndexMap, IndexSet};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Regular,
    Transient,
    /// No table; only meant to be inherited.
    Abstract,
}

/// Behavior attached to a model by the modules defining or extending it.
/// Every hook of every contribution runs, in load order.
pub trait ModelHooks: Send + Sync {
    /// Custom initialization, run after the table of the model is set up.
    fn init(
        &self,
        _registry: &Registry,
        _model: &Model,
        _cr: &mut dyn BaseCursor,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Run when a fully loaded registry finishes a new setup.
    fn register_hook(&self, _registry: &Registry, _model: &Model) -> anyhow::Result<()> {
        Ok(())
    }

    /// Run when a fully loaded registry starts a new setup.
    fn unregister_hook(&self, _registry: &Registry, _model: &Model) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlConstraint {
    pub name: String,
    pub definition: String,
    pub message: String,
}

/// A model contribution of a module: either a new model or an extension of
/// an existing one.
#[derive(Clone)]
pub struct ModelDef {
    pub name: String,
    pub extension: bool,
    pub kind: ModelKind,
    pub description: Option<String>,
    /// Parent models whose fields are copied.
    pub inherit: Vec<String>,
    /// Parent model -> many2one field delegating to it.
    pub inherits: IndexMap<String, String>,
    pub table: Option<String>,
    /// Whether the table is managed from the field declarations.
    pub auto: bool,
    pub fields: Vec<Field>,
    pub sql_constraints: Vec<SqlConstraint>,
    pub hooks: Option<Arc<dyn ModelHooks>>,
}

impl ModelDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            extension: false,
            kind: ModelKind::Regular,
            description: None,
            inherit: Vec::new(),
            inherits: IndexMap::new(),
            table: None,
            auto: true,
            fields: Vec::new(),
            sql_constraints: Vec::new(),
            hooks: None,
        }
    }

    /// Extends the model `name` defined by another module.
    pub fn extend(name: &str) -> Self {
        Self {
            extension: true,
            ..Self::new(name)
        }
    }

    pub fn abstract_model(name: &str) -> Self {
        Self::new(name).kind(ModelKind::Abstract)
    }

    pub fn kind(mut self, kind: ModelKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn inherit(mut self, parent: &str) -> Self {
        self.inherit.push(parent.to_string());
        self
    }

    /// Delegates to `parent` through the many2one `field`, which is added
    /// when not declared.
    pub fn inherits(mut self, parent: &str, field: &str) -> Self {
        self.inherits.insert(parent.to_string(), field.to_string());
        self
    }

    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    pub fn auto(mut self, auto: bool) -> Self {
        self.auto = auto;
        self
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn sql_constraint(mut self, name: &str, definition: &str, message: &str) -> Self {
        self.sql_constraints.push(SqlConstraint {
            name: name.to_string(),
            definition: definition.to_string(),
            message: message.to_string(),
        });
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn ModelHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }
}

impl fmt::Debug for ModelDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDef")
            .field("name", &self.name)
            .field("extension", &self.extension)
            .field("fields", &self.fields.len())
            .finish()
    }
}

/// A unit of functionality contributing model definitions.
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub models: Vec<ModelDef>,
}

impl Module {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            models: Vec::new(),
        }
    }

    pub fn model(mut self, model: ModelDef) -> Self {
        self.models.push(model);
        self
    }
}

/// A composed model: the merge of every contribution loaded so far.
#[derive(Clone)]
pub struct Model {
    pub name: String,
    pub kind: ModelKind,
    pub description: String,
    pub table: String,
    pub auto: bool,
    pub inherit: Vec<String>,
    pub inherits: IndexMap<String, String>,
    /// Fields declared by the contributions of the model itself.
    pub declared: IndexMap<String, Field>,
    /// Every field, set up.
    pub fields: IndexMap<String, Field>,
    pub sql_constraints: Vec<SqlConstraint>,
    pub hooks: Vec<Arc<dyn ModelHooks>>,
    pub modules: Vec<String>,
    pub inherit_children: IndexSet<String>,
    pub inherits_children: IndexSet<String>,
    pub(crate) setup_done: bool,
}

impl Model {
    pub(crate) fn new(def: &ModelDef) -> Self {
        Self {
            name: def.name.clone(),
            kind: def.kind,
            description: def.description.clone().unwrap_or_else(|| def.name.clone()),
            table: def.table.clone().unwrap_or_else(|| def.name.replace('.', "_")),
            auto: def.auto,
            inherit: Vec::new(),
            inherits: IndexMap::new(),
            declared: IndexMap::new(),
            fields: IndexMap::new(),
            sql_constraints: Vec::new(),
            hooks: Vec::new(),
            modules: Vec::new(),
            inherit_children: IndexSet::new(),
            inherits_children: IndexSet::new(),
            setup_done: false,
        }
    }

    pub fn is_abstract(&self) -> bool {
        self.kind == ModelKind::Abstract
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ModelKind::Transient
    }

    /// Whether the model has a table managed by the registry.
    pub fn has_table(&self) -> bool {
        self.auto && !self.is_abstract()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// Merges a contribution of `module` into the model.
    pub(crate) fn merge(&mut self, def: &ModelDef, module: &str) {
        if let Some(description) = &def.description {
            self.description = description.clone();
        }
        if let Some(table) = &def.table {
            self.table = table.clone();
        }
        if !def.extension {
            self.auto = def.auto;
        }
        for parent in def.inherit.iter().filter(|p| **p != self.name) {
            if !self.inherit.contains(parent) {
                self.inherit.push(parent.clone());
            }
        }
        for (parent, field) in &def.inherits {
            self.inherits.insert(parent.clone(), field.clone());
        }
        for field in &def.fields {
            let mut field = field.clone();
            field.model_name = self.name.clone();
            if let Some(previous) = self.declared.get(&field.name) {
                let mut modules = previous.modules.clone();
                modules.push(module.to_string());
                field.modules = modules;
            } else {
                field.modules = vec![module.to_string()];
            }
            self.declared.insert(field.name.clone(), field);
        }
        for constraint in &def.sql_constraints {
            self.sql_constraints.retain(|c| c.name != constraint.name);
            self.sql_constraints.push(constraint.clone());
        }
        if let Some(hooks) = &def.hooks {
            self.hooks.push(Arc::clone(hooks));
        }
        if !self.modules.iter().any(|m| m == module) {
            self.modules.push(module.to_string());
        }
        self.setup_done = false;
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("table", &self.table)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_overrides_fields_and_tracks_modules() {
        let base = ModelDef::new("res.partner").field(Field::char("name"));
        let mut model = Model::new(&base);
        model.merge(&base, "base");
        assert_eq!(model.table, "res_partner");

        let ext = ModelDef::extend("res.partner")
            .field(Field::char("name").required())
            .field(Field::char("email"));
        model.merge(&ext, "mail");

        let name = &model.declared["name"];
        assert!(name.required);
        assert_eq!(name.modules, vec!["base", "mail"]);
        assert_eq!(name.model_name, "res.partner");
        assert_eq!(model.modules, vec!["base", "mail"]);
        assert_eq!(model.declared.len(), 2);
    }

    #[test]
    fn test_extension_keeps_auto() {
        let base = ModelDef::new("report.view").auto(false);
        let mut model = Model::new(&base);
        model.merge(&base, "base");
        model.merge(&ModelDef::extend("report.view"), "sale");
        assert!(!model.auto);
        assert!(!model.has_table());
    }
}
