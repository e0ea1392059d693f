use crate::core::DataType;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Boolean,
    Integer,
    Float,
    Char,
    Text,
    Html,
    Selection,
    Date,
    Datetime,
    Many2one,
    One2many,
    Many2many,
}

impl FieldType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Char => "char",
            Self::Text => "text",
            Self::Html => "html",
            Self::Selection => "selection",
            Self::Date => "date",
            Self::Datetime => "datetime",
            Self::Many2one => "many2one",
            Self::One2many => "one2many",
            Self::Many2many => "many2many",
        }
    }

    pub fn is_relational(&self) -> bool {
        matches!(self, Self::Many2one | Self::One2many | Self::Many2many)
    }

    /// SQL type of the column holding the field, if any.
    pub fn column_type(&self) -> Option<(&'static str, DataType)> {
        let column = match self {
            Self::Boolean => ("BOOLEAN", DataType::Boolean),
            Self::Integer | Self::Many2one => ("INT4", DataType::Integer),
            Self::Float => ("FLOAT8", DataType::Float),
            Self::Char | Self::Selection => ("VARCHAR", DataType::Text),
            Self::Text | Self::Html => ("TEXT", DataType::Text),
            Self::Date => ("DATE", DataType::Timestamp),
            Self::Datetime => ("TIMESTAMP", DataType::Timestamp),
            Self::One2many | Self::Many2many => return None,
        };
        Some(column)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    Btree,
    /// Partial index skipping NULL values.
    BtreeNotNull,
    /// GIN trigram index for `like` searches; created only when the
    /// database has `pg_trgm`.
    Trigram,
}

/// Identity of a field: owning model and field name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId {
    pub model: String,
    pub name: String,
}

impl FieldId {
    pub fn new(model: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.model, self.name)
    }
}

/// A field, as contributed by a module and, once set up, as composed on
/// its model.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ftype: FieldType,
    /// Set during setup.
    pub model_name: String,
    pub string: Option<String>,
    pub comodel_name: Option<String>,
    /// Many2one field of the comodel pointing back (one2many only).
    pub inverse_name: Option<String>,
    /// Relation table (many2many only); derived from both tables when unset.
    pub relation: Option<String>,
    pub store: bool,
    pub required: bool,
    pub index: Option<IndexKind>,
    pub compute: Option<String>,
    pub compute_sudo: bool,
    pub precompute: bool,
    pub depends: Vec<String>,
    pub depends_context: Vec<String>,
    /// Dotted path of a related field.
    pub related: Option<String>,
    pub ondelete: Option<String>,
    pub selection: Vec<(String, String)>,
    /// Created at runtime rather than by a module.
    pub manual: bool,
    /// Modules that defined or overrode the field.
    pub modules: Vec<String>,
    /// Copied from a parent model.
    pub inherited: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, ftype: FieldType) -> Self {
        Self {
            name: name.into(),
            ftype,
            model_name: String::new(),
            string: None,
            comodel_name: None,
            inverse_name: None,
            relation: None,
            store: true,
            required: false,
            index: None,
            compute: None,
            compute_sudo: true,
            precompute: false,
            depends: Vec::new(),
            depends_context: Vec::new(),
            related: None,
            ondelete: None,
            selection: Vec::new(),
            manual: false,
            modules: Vec::new(),
            inherited: false,
        }
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn float(name: &str) -> Self {
        Self::new(name, FieldType::Float)
    }

    pub fn char(name: &str) -> Self {
        Self::new(name, FieldType::Char)
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, FieldType::Text)
    }

    pub fn datetime(name: &str) -> Self {
        Self::new(name, FieldType::Datetime)
    }

    pub fn selection(name: &str, values: &[(&str, &str)]) -> Self {
        let mut field = Self::new(name, FieldType::Selection);
        field.selection = values
            .iter()
            .map(|(value, label)| (value.to_string(), label.to_string()))
            .collect();
        field
    }

    pub fn many2one(name: &str, comodel: &str) -> Self {
        let mut field = Self::new(name, FieldType::Many2one);
        field.comodel_name = Some(comodel.to_string());
        field
    }

    pub fn one2many(name: &str, comodel: &str, inverse_name: &str) -> Self {
        let mut field = Self::new(name, FieldType::One2many);
        field.comodel_name = Some(comodel.to_string());
        field.inverse_name = Some(inverse_name.to_string());
        field
    }

    pub fn many2many(name: &str, comodel: &str) -> Self {
        let mut field = Self::new(name, FieldType::Many2many);
        field.comodel_name = Some(comodel.to_string());
        field
    }

    pub fn string(mut self, label: &str) -> Self {
        self.string = Some(label.to_string());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn index(mut self, kind: IndexKind) -> Self {
        self.index = Some(kind);
        self
    }

    pub fn ondelete(mut self, action: &str) -> Self {
        self.ondelete = Some(action.to_string());
        self
    }

    pub fn relation(mut self, table: &str) -> Self {
        self.relation = Some(table.to_string());
        self
    }

    /// Computed by `method` from the dotted paths in `depends`. Computed
    /// fields are not stored unless [`Field::stored`] is called.
    pub fn compute(mut self, method: &str, depends: &[&str]) -> Self {
        self.compute = Some(method.to_string());
        self.depends = depends.iter().map(|d| d.to_string()).collect();
        self.store = false;
        self
    }

    pub fn depends_context(mut self, keys: &[&str]) -> Self {
        self.depends_context = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn compute_sudo(mut self, sudo: bool) -> Self {
        self.compute_sudo = sudo;
        self
    }

    pub fn precompute(mut self) -> Self {
        self.precompute = true;
        self
    }

    /// Related to the dotted path `path`; not stored by default.
    pub fn related(mut self, path: &str) -> Self {
        self.related = Some(path.to_string());
        self.store = false;
        self
    }

    pub fn stored(mut self) -> Self {
        self.store = true;
        self
    }

    pub fn manual(mut self) -> Self {
        self.manual = true;
        self
    }

    pub fn id(&self) -> FieldId {
        FieldId::new(&self.model_name, &self.name)
    }

    pub fn is_relational(&self) -> bool {
        self.ftype.is_relational()
    }

    /// SQL column type when the field has a column.
    pub fn column_type(&self) -> Option<(&'static str, DataType)> {
        if self.store {
            self.ftype.column_type()
        } else {
            None
        }
    }

    /// Delete action of the foreign key of a many2one column.
    pub fn ondelete_action(&self) -> &str {
        match &self.ondelete {
            Some(action) => action,
            None if self.required => "restrict",
            None => "set null",
        }
    }

    /// Dependencies declared by the field: the dependencies of its compute
    /// method or the path of the related field, and the context keys.
    pub fn get_depends(&self) -> (Vec<String>, Vec<String>) {
        let mut depends = self.depends.clone();
        if let Some(related) = &self.related {
            depends.push(related.clone());
        }
        (depends, self.depends_context.clone())
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.model_name, self.name)
    }
}
