use super::{ConstraintDef, ConstraintKind, IndexDef, Table};
use crate::core::{DbError, Result};
use crate::transaction::Change;
use im::OrdMap;

/// Complete content of one database at a point in time.
///
/// All maps are persistent: cloning a state is O(1) and is how snapshots,
/// savepoints and transaction working copies are taken.
#[derive(Debug, Clone, Default)]
pub struct DatabaseState {
    tables: OrdMap<String, Table>,
    indexes: OrdMap<String, IndexDef>,
    constraints: OrdMap<(String, String), ConstraintDef>,
}

impl DatabaseState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn require_table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| DbError::query(format!("relation \"{name}\" does not exist")))
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.get(name)
    }

    pub fn indexes(&self) -> impl Iterator<Item = &IndexDef> {
        self.indexes.values()
    }

    pub fn constraint(&self, table: &str, name: &str) -> Option<&ConstraintDef> {
        self.constraints.get(&(table.to_string(), name.to_string()))
    }

    pub fn constraints(&self) -> impl Iterator<Item = &ConstraintDef> {
        self.constraints.values()
    }

    pub fn table_constraints<'a>(
        &'a self,
        table: &'a str,
    ) -> impl Iterator<Item = &'a ConstraintDef> {
        self.constraints.values().filter(move |c| c.table == table)
    }

    /// Applies one change, failing if it no longer fits the state
    /// (e.g. a concurrent transaction dropped the table first).
    pub fn apply(&mut self, change: &Change) -> Result<()> {
        match change {
            Change::CreateTable { schema } => {
                if self.tables.contains_key(schema.name()) {
                    return Err(DbError::query(format!(
                        "relation \"{}\" already exists",
                        schema.name()
                    )));
                }
                self.tables
                    .insert(schema.name().to_string(), Table::new(schema.clone()));
            }
            Change::DropTable { name } => {
                if self.tables.remove(name).is_none() {
                    return Err(DbError::query(format!("table \"{name}\" does not exist")));
                }
                self.indexes = self
                    .indexes
                    .iter()
                    .filter(|(_, idx)| &idx.table != name)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                self.constraints = self
                    .constraints
                    .iter()
                    .filter(|(_, c)| &c.table != name)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
            }
            Change::AddColumn { table, column, fill } => {
                let t = self.table_mut(table)?;
                if t.schema().find_column_index(&column.name).is_some() {
                    return Err(DbError::query(format!(
                        "column \"{}\" of relation \"{table}\" already exists",
                        column.name
                    )));
                }
                t.add_column(column.clone(), fill.clone());
            }
            Change::RenameColumn { table, old_name, new_name } => {
                let t = self.table_mut(table)?;
                let idx = t.schema().require_column(old_name)?;
                t.schema_mut().columns_mut()[idx].name = new_name.clone();
                let rename = |col: &String| {
                    if col == old_name { new_name.clone() } else { col.clone() }
                };
                self.indexes = self
                    .indexes
                    .iter()
                    .map(|(k, idx)| {
                        let mut idx = idx.clone();
                        if &idx.table == table {
                            idx.columns = idx.columns.iter().map(rename).collect();
                        }
                        (k.clone(), idx)
                    })
                    .collect();
                self.constraints = self
                    .constraints
                    .iter()
                    .map(|(k, c)| {
                        let mut c = c.clone();
                        if &c.table == table
                            && let ConstraintKind::ForeignKey { column, .. } = &mut c.kind
                        {
                            *column = rename(column);
                        }
                        (k.clone(), c)
                    })
                    .collect();
            }
            Change::SetNotNull { table, column, not_null } => {
                let t = self.table_mut(table)?;
                let idx = t.schema().require_column(column)?;
                t.schema_mut().columns_mut()[idx].nullable = !not_null;
            }
            Change::CreateIndex(index) => {
                if self.indexes.contains_key(&index.name) {
                    return Err(DbError::query(format!(
                        "relation \"{}\" already exists",
                        index.name
                    )));
                }
                self.indexes.insert(index.name.clone(), index.clone());
            }
            Change::DropIndex { name } => {
                if self.indexes.remove(name).is_none() {
                    return Err(DbError::query(format!("index \"{name}\" does not exist")));
                }
            }
            Change::AddConstraint(constraint) => {
                let key = (constraint.table.clone(), constraint.name.clone());
                if self.constraints.contains_key(&key) {
                    return Err(DbError::query(format!(
                        "constraint \"{}\" for relation \"{}\" already exists",
                        constraint.name, constraint.table
                    )));
                }
                self.constraints.insert(key, constraint.clone());
            }
            Change::DropConstraint { table, name } => {
                if self
                    .constraints
                    .remove(&(table.clone(), name.clone()))
                    .is_none()
                {
                    return Err(DbError::query(format!(
                        "constraint \"{name}\" of relation \"{table}\" does not exist"
                    )));
                }
            }
            Change::InsertRow { table, row_id, row } => {
                self.table_mut(table)?.insert(*row_id, row.clone());
            }
            Change::UpdateRow { table, row_id, row } => {
                self.table_mut(table)?.update(*row_id, row.clone())?;
            }
            Change::DeleteRow { table, row_id } => {
                // deleting a row a concurrent transaction already removed is a no-op
                self.table_mut(table)?.delete(*row_id);
            }
        }
        Ok(())
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| DbError::query(format!("relation \"{name}\" does not exist")))
    }

    /// Column index sets covered by UNIQUE table constraints of `table`.
    pub fn unique_constraint_sets(&self, table: &Table) -> Vec<Vec<usize>> {
        self.table_constraints(table.schema().name())
            .filter_map(|c| match &c.kind {
                ConstraintKind::Unique { columns } => columns
                    .iter()
                    .map(|col| table.schema().find_column_index(col))
                    .collect::<Option<Vec<_>>>(),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType, Value};
    use crate::storage::TableSchema;

    fn create(name: &str) -> Change {
        Change::CreateTable {
            schema: TableSchema::new(name, vec![Column::new("id", DataType::Integer)]).unwrap(),
        }
    }

    #[test]
    fn test_snapshot_isolation_by_clone() {
        let mut state = DatabaseState::new();
        state.apply(&create("t")).unwrap();
        let snapshot = state.clone();
        state
            .apply(&Change::InsertRow {
                table: "t".into(),
                row_id: 1,
                row: vec![Value::Integer(1)],
            })
            .unwrap();
        assert_eq!(state.table("t").unwrap().len(), 1);
        assert_eq!(snapshot.table("t").unwrap().len(), 0);
    }

    #[test]
    fn test_drop_table_removes_dependents() {
        let mut state = DatabaseState::new();
        state.apply(&create("t")).unwrap();
        state
            .apply(&Change::CreateIndex(IndexDef {
                name: "t_id_index".into(),
                table: "t".into(),
                columns: vec!["id".into()],
                unique: false,
                definition: String::new(),
            }))
            .unwrap();
        state.apply(&Change::DropTable { name: "t".into() }).unwrap();
        assert!(state.index("t_id_index").is_none());
        assert!(state.apply(&create("t")).is_ok());
        assert!(state.apply(&create("t")).is_err());
    }
}
