use crate::core::{Column, DbError, Result};
use crate::parser::ast::Expr;

/// Table definition: name plus ordered columns.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    name: String,
    columns: Vec<Column>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Result<Self> {
        let name = name.into();
        for (i, col) in columns.iter().enumerate() {
            if columns[..i].iter().any(|other| other.name == col.name) {
                return Err(DbError::query(format!(
                    "column \"{}\" specified more than once",
                    col.name
                )));
            }
        }
        Ok(Self { name, columns })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn find_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col.name == name)
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.find_column_index(name).map(|idx| &self.columns[idx])
    }

    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.find_column_index(name).ok_or_else(|| {
            DbError::query(format!(
                "column \"{}\" of relation \"{}\" does not exist",
                name, self.name
            ))
        })
    }

    pub(crate) fn columns_mut(&mut self) -> &mut Vec<Column> {
        &mut self.columns
    }

    /// Column sets that must hold unique values (primary key and UNIQUE columns).
    pub fn unique_column_sets(&self) -> Vec<Vec<usize>> {
        let mut sets = Vec::new();
        let pk: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, _)| i)
            .collect();
        if !pk.is_empty() {
            sets.push(pk);
        }
        for (i, col) in self.columns.iter().enumerate() {
            if col.unique && !col.primary_key {
                sets.push(vec![i]);
            }
        }
        sets
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexDef {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintKind {
    ForeignKey {
        column: String,
        foreign_table: String,
        foreign_column: String,
        on_delete: String,
    },
    Unique {
        columns: Vec<String>,
    },
    Check {
        expr: Expr,
        definition: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintDef {
    pub name: String,
    pub table: String,
    pub kind: ConstraintKind,
}

impl ConstraintDef {
    /// `pg_constraint.contype`
    pub fn contype(&self) -> &'static str {
        match self.kind {
            ConstraintKind::ForeignKey { .. } => "f",
            ConstraintKind::Unique { .. } => "u",
            ConstraintKind::Check { .. } => "c",
        }
    }

    /// `pg_constraint.confdeltype` code of a delete action.
    pub fn confdeltype(&self) -> Option<&'static str> {
        match &self.kind {
            ConstraintKind::ForeignKey { on_delete, .. } => Some(delete_action_code(on_delete)),
            _ => None,
        }
    }

    pub fn definition(&self) -> String {
        match &self.kind {
            ConstraintKind::ForeignKey {
                column,
                foreign_table,
                foreign_column,
                on_delete,
            } => format!(
                "FOREIGN KEY ({column}) REFERENCES {foreign_table}({foreign_column}) ON DELETE {on_delete}"
            ),
            ConstraintKind::Unique { columns } => format!("UNIQUE ({})", columns.join(", ")),
            ConstraintKind::Check { definition, .. } => format!("CHECK ({definition})"),
        }
    }
}

pub fn delete_action_code(action: &str) -> &'static str {
    match action.to_ascii_uppercase().as_str() {
        "RESTRICT" => "r",
        "CASCADE" => "c",
        "SET NULL" => "n",
        "SET DEFAULT" => "d",
        _ => "a",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;

    #[test]
    fn test_duplicate_columns_rejected() {
        let cols = vec![
            Column::new("a", DataType::Integer),
            Column::new("a", DataType::Text),
        ];
        assert!(TableSchema::new("t", cols).is_err());
    }

    #[test]
    fn test_unique_sets() {
        let mut code = Column::new("code", DataType::Text);
        code.unique = true;
        let schema = TableSchema::new(
            "t",
            vec![Column::new("id", DataType::Integer).primary_key(), code],
        )
        .unwrap();
        assert_eq!(schema.unique_column_sets(), vec![vec![0], vec![1]]);
    }

    #[test]
    fn test_delete_action_codes() {
        assert_eq!(delete_action_code("cascade"), "c");
        assert_eq!(delete_action_code("SET NULL"), "n");
        assert_eq!(delete_action_code("NO ACTION"), "a");
    }
}
